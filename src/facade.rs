use crate::class_reader::MethodVisitor;
use crate::error::InstrumentError;
use crate::frame::FrameType;
use crate::insn::LabelNode;
use crate::types::JvmType;

/// The slot, handler and frame operations a kind-specific instrumentor may use.
///
/// Every operation forwards to [`MethodInstrumentorHelper::helper`] by default.
/// Only the innermost visitor of a chain, the one that owns the method state,
/// implements them for real.
pub trait MethodInstrumentorHelper {
    /// The next helper towards the owner of the method state.
    fn helper(&mut self) -> &mut dyn MethodInstrumentorHelper;

    /// A label no other part of the method uses.
    fn new_label(&mut self) -> LabelNode {
        self.helper().new_label()
    }

    /// Reserves the next free local slot for a value of `ty`.
    fn allocate_scratch_local(&mut self, ty: &JvmType) -> Result<u16, InstrumentError> {
        self.helper().allocate_scratch_local(ty)
    }

    /// Pops a value of `ty` into a freshly reserved slot and returns the slot.
    fn store_as_new_local(&mut self, ty: &JvmType) -> Result<u16, InstrumentError> {
        self.helper().store_as_new_local(ty)
    }

    /// Adds a handler covering `[start, end)`. `None` catches everything.
    fn register_exception_handler(
        &mut self,
        start: LabelNode,
        end: LabelNode,
        handler: LabelNode,
        catch_type: Option<&str>,
    ) -> Result<(), InstrumentError> {
        self.helper()
            .register_exception_handler(start, end, handler, catch_type)
    }

    /// The frame at `label` has exactly `stack` on the operand stack.
    fn insert_frame_replace_stack(
        &mut self,
        label: LabelNode,
        stack: &[FrameType],
    ) -> Result<(), InstrumentError> {
        self.helper().insert_frame_replace_stack(label, stack)
    }

    /// The frame at `label` has `stack` pushed on top of the incoming stack.
    fn insert_frame_append_stack(
        &mut self,
        label: LabelNode,
        stack: &[FrameType],
    ) -> Result<(), InstrumentError> {
        self.helper().insert_frame_append_stack(label, stack)
    }

    /// The frame at `label` keeps the incoming stack.
    fn insert_frame_same_stack(&mut self, label: LabelNode) -> Result<(), InstrumentError> {
        self.helper().insert_frame_same_stack(label)
    }

    /// Internal name of the class being rewritten.
    fn class_name(&mut self) -> &str {
        self.helper().class_name()
    }

    /// Marks the method as failed. The first reported error wins.
    fn report_error(&mut self, err: InstrumentError) {
        self.helper().report_error(err)
    }

    /// Where injected code goes. Events written here skip every instrumentor
    /// layer, so one probe's code is never matched by another probe.
    fn code_sink(&mut self) -> &mut dyn MethodVisitor {
        self.helper().code_sink()
    }
}

/// A link in an instrumenting chain: sees method events and reaches the helper.
pub trait InstrumentingVisitor: MethodVisitor + MethodInstrumentorHelper {}

impl<T: MethodVisitor + MethodInstrumentorHelper + ?Sized> InstrumentingVisitor for T {}

/// Pass-through base for kind-specific instrumentors. Method events and
/// helper calls go to the wrapped chain unchanged.
pub struct MethodInstrumentor<'v> {
    next: Box<dyn InstrumentingVisitor + 'v>,
}

impl<'v> MethodInstrumentor<'v> {
    pub fn new(next: Box<dyn InstrumentingVisitor + 'v>) -> Self {
        Self { next }
    }
}

impl MethodVisitor for MethodInstrumentor<'_> {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        Some(&mut *self.next)
    }
}

impl MethodInstrumentorHelper for MethodInstrumentor<'_> {
    fn helper(&mut self) -> &mut dyn MethodInstrumentorHelper {
        &mut *self.next
    }
}
