//! Kind-specific instrumentors.
//!
//! Each one wraps the rest of the chain in a [`MethodInstrumentor`], watches
//! the original method events for its [`Kind`] and emits the probe's code
//! through [`MethodInstrumentorHelper::code_sink`] at the matching spots.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::class_cache::ClassName;
use crate::class_reader::MethodVisitor;
use crate::constants;
use crate::error::InstrumentError;
use crate::facade::{InstrumentingVisitor, MethodInstrumentor, MethodInstrumentorHelper};
use crate::frame::FrameType;
use crate::insn::{AbstractInsnNode, Insn, InsnList, LabelNode};
use crate::location::{Kind, Location, Where};
use crate::method_visitor::MethodContext;
use crate::opcodes;
use crate::transformer::Probe;
use crate::types::{JvmType, MethodType};

/// Code a probe injects at each matching site.
pub trait ProbeCode {
    fn emit(&self, site: &mut InjectionSite<'_>) -> Result<(), InstrumentError>;
}

/// What probe code sees while it is being emitted.
pub struct InjectionSite<'s> {
    helper: &'s mut dyn MethodInstrumentorHelper,
    location: &'s Location,
    method: &'s MethodContext,
    value_slot: Option<u16>,
}

impl<'s> InjectionSite<'s> {
    pub fn location(&self) -> &Location {
        self.location
    }

    pub fn method(&self) -> &MethodContext {
        self.method
    }

    /// Slot holding the returned value or the thrown/caught exception, for
    /// the kinds that capture one.
    pub fn value_slot(&self) -> Option<u16> {
        self.value_slot
    }

    pub fn helper(&mut self) -> &mut dyn MethodInstrumentorHelper {
        &mut *self.helper
    }

    /// Where injected instructions go.
    pub fn code(&mut self) -> &mut dyn MethodVisitor {
        self.helper.code_sink()
    }
}

impl ProbeCode for InsnList {
    /// Replays the list with every label renamed to a fresh one. Jump targets
    /// inside the list get a same-stack frame.
    fn emit(&self, site: &mut InjectionSite<'_>) -> Result<(), InstrumentError> {
        let mut renamed: HashMap<LabelNode, LabelNode> = HashMap::new();
        for node in self.nodes() {
            let labels = match node {
                AbstractInsnNode::Label(label) => vec![*label],
                AbstractInsnNode::LineNumber(line) => vec![line.start],
                AbstractInsnNode::Insn(insn) => insn.targets(),
            };
            for label in labels {
                if !renamed.contains_key(&label) {
                    let fresh = site.helper().new_label();
                    renamed.insert(label, fresh);
                }
            }
        }
        let targets: HashSet<LabelNode> = self.jump_targets().into_iter().collect();
        let rename = |label: LabelNode| renamed.get(&label).copied().unwrap_or(label);

        for node in self.nodes() {
            match node {
                AbstractInsnNode::Label(label) => {
                    let fresh = rename(*label);
                    site.code().visit_label(fresh);
                    if targets.contains(label) {
                        site.helper().insert_frame_same_stack(fresh)?;
                    }
                }
                AbstractInsnNode::LineNumber(line) => {
                    site.code().visit_line_number(line.line, rename(line.start))
                }
                AbstractInsnNode::Insn(insn) => {
                    insn.accept_mapped(site.code(), &mut |label| rename(label))
                }
            }
        }
        Ok(())
    }
}

impl<F> ProbeCode for F
where
    F: Fn(&mut InjectionSite<'_>) -> Result<(), InstrumentError>,
{
    fn emit(&self, site: &mut InjectionSite<'_>) -> Result<(), InstrumentError> {
        self(site)
    }
}

/// Wraps `core` with one instrumentor per probe. The first probe ends up
/// outermost, so it sees original events first.
pub fn build_chain<'v>(
    core: Box<dyn InstrumentingVisitor + 'v>,
    probes: &[&'v Probe],
    method: &MethodContext,
) -> Box<dyn InstrumentingVisitor + 'v> {
    probes
        .iter()
        .rev()
        .fold(core, |next, probe| wrap(next, *probe, method))
}

fn wrap<'v>(
    next: Box<dyn InstrumentingVisitor + 'v>,
    probe: &'v Probe,
    method: &MethodContext,
) -> Box<dyn InstrumentingVisitor + 'v> {
    let base = Base {
        facade: MethodInstrumentor::new(next),
        probe,
        method: method.clone(),
    };
    match probe.location.kind {
        Kind::Entry => Box::new(EntryInstrumentor {
            prologue: Prologue::new(method),
            base,
        }),
        Kind::Return => Box::new(ReturnInstrumentor {
            return_type: MethodType::parse(&method.descriptor)
                .map(|t| t.ret)
                .unwrap_or(JvmType::Void),
            base,
        }),
        Kind::Error => Box::new(ErrorInstrumentor {
            prologue: Prologue::new(method),
            start: None,
            base,
        }),
        Kind::Line => Box::new(LineInstrumentor {
            pending: false,
            last_line: None,
            base,
        }),
        Kind::Catch => Box::new(CatchInstrumentor {
            handlers: HashSet::new(),
            pending: false,
            base,
        }),
        _ => Box::new(InsnInstrumentor { base }),
    }
}

/// Shared part of every instrumentor: the facade to the rest of the chain
/// and the probe being applied.
struct Base<'v> {
    facade: MethodInstrumentor<'v>,
    probe: &'v Probe,
    method: MethodContext,
}

impl Base<'_> {
    fn inject(&mut self, value_slot: Option<u16>) {
        debug!(
            "{} matched in {}{}",
            self.probe.location, self.method.name, self.method.descriptor
        );
        let result = {
            let mut site = InjectionSite {
                helper: &mut self.facade,
                location: &self.probe.location,
                method: &self.method,
                value_slot,
            };
            self.probe.code.emit(&mut site)
        };
        if let Err(err) = result {
            self.facade.report_error(err);
        }
    }

    /// Copies the value on top of the stack into a fresh slot.
    fn capture(&mut self, ty: &JvmType) -> Option<u16> {
        let dup = if ty.size() == 2 {
            opcodes::DUP2
        } else {
            opcodes::DUP
        };
        self.facade.code_sink().visit_insn(dup);
        match self.facade.store_as_new_local(ty) {
            Ok(slot) => Some(slot),
            Err(err) => {
                self.facade.report_error(err);
                None
            }
        }
    }
}

/// Finds the `invokespecial <init>` that initializes `this` in a constructor.
struct Prologue {
    waiting: bool,
    pending_news: usize,
}

impl Prologue {
    fn new(method: &MethodContext) -> Self {
        Self {
            waiting: method.is_constructor(),
            pending_news: 0,
        }
    }

    /// True for the instruction after which `this` is usable.
    fn completes_at(&mut self, insn: &Insn) -> bool {
        if !self.waiting {
            return false;
        }
        match insn {
            Insn::Type(node) if node.insn.opcode == opcodes::NEW => {
                self.pending_news += 1;
                false
            }
            Insn::Method(node)
                if node.insn.opcode == opcodes::INVOKESPECIAL
                    && node.name == constants::CONSTRUCTOR_NAME =>
            {
                if self.pending_news == 0 {
                    self.waiting = false;
                    true
                } else {
                    self.pending_news -= 1;
                    false
                }
            }
            _ => false,
        }
    }
}

macro_rules! delegate_to_base {
    ($ty:ident) => {
        impl MethodInstrumentorHelper for $ty<'_> {
            fn helper(&mut self) -> &mut dyn MethodInstrumentorHelper {
                &mut self.base.facade
            }
        }
    };
}

struct EntryInstrumentor<'v> {
    base: Base<'v>,
    prologue: Prologue,
}

impl EntryInstrumentor<'_> {
    fn on_insn(&mut self, insn: Insn) {
        let initialized = self.prologue.completes_at(&insn);
        insn.accept(&mut self.base.facade);
        if initialized {
            self.base.inject(None);
        }
    }
}

impl MethodVisitor for EntryInstrumentor<'_> {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        Some(&mut self.base.facade)
    }

    fn visit_code(&mut self, max_stack: u16, max_locals: u16) {
        self.base.facade.visit_code(max_stack, max_locals);
        if !self.prologue.waiting {
            self.base.inject(None);
        }
    }

    visit_insns_via!(on_insn);
}

delegate_to_base!(EntryInstrumentor);

struct ReturnInstrumentor<'v> {
    base: Base<'v>,
    return_type: JvmType,
}

impl ReturnInstrumentor<'_> {
    fn on_insn(&mut self, insn: Insn) {
        if opcodes::is_return(insn.opcode()) {
            let slot = match &self.return_type {
                JvmType::Void => None,
                ty => {
                    let ty = ty.clone();
                    self.base.capture(&ty)
                }
            };
            self.base.inject(slot);
        }
        insn.accept(&mut self.base.facade);
    }
}

impl MethodVisitor for ReturnInstrumentor<'_> {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        Some(&mut self.base.facade)
    }

    visit_insns_via!(on_insn);
}

delegate_to_base!(ReturnInstrumentor);

/// Wraps the body in a catch-all handler that runs the probe and rethrows.
struct ErrorInstrumentor<'v> {
    base: Base<'v>,
    prologue: Prologue,
    start: Option<LabelNode>,
}

impl ErrorInstrumentor<'_> {
    fn open_range(&mut self) {
        let start = self.base.facade.new_label();
        self.base.facade.code_sink().visit_label(start);
        self.start = Some(start);
    }

    fn close_range(&mut self, start: LabelNode) -> Result<(), InstrumentError> {
        let facade = &mut self.base.facade;
        let end = facade.new_label();
        let handler = facade.new_label();
        facade.code_sink().visit_label(end);
        facade.code_sink().visit_label(handler);
        facade.register_exception_handler(start, end, handler, None)?;
        facade.insert_frame_replace_stack(
            handler,
            &[FrameType::Object(constants::THROWABLE.to_string())],
        )?;
        let slot = self.base.capture(&JvmType::throwable());
        self.base.inject(slot);
        self.base.facade.code_sink().visit_insn(opcodes::ATHROW);
        Ok(())
    }

    fn on_insn(&mut self, insn: Insn) {
        let initialized = self.prologue.completes_at(&insn);
        insn.accept(&mut self.base.facade);
        if initialized {
            self.open_range();
        }
    }
}

impl MethodVisitor for ErrorInstrumentor<'_> {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        Some(&mut self.base.facade)
    }

    fn visit_code(&mut self, max_stack: u16, max_locals: u16) {
        self.base.facade.visit_code(max_stack, max_locals);
        if !self.prologue.waiting {
            self.open_range();
        }
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) {
        if let Some(start) = self.start.take() {
            if let Err(err) = self.close_range(start) {
                self.base.facade.report_error(err);
            }
        }
        self.base.facade.visit_maxs(max_stack, max_locals);
    }

    visit_insns_via!(on_insn);
}

delegate_to_base!(ErrorInstrumentor);

/// Fires before a matching line, or with `Where::After` once the next line
/// starts. A line left through a return or throw has no after point.
struct LineInstrumentor<'v> {
    base: Base<'v>,
    pending: bool,
    last_line: Option<u16>,
}

impl LineInstrumentor<'_> {
    fn on_insn(&mut self, insn: Insn) {
        if std::mem::take(&mut self.pending) {
            self.base.inject(None);
        }
        insn.accept(&mut self.base.facade);
    }
}

impl MethodVisitor for LineInstrumentor<'_> {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        Some(&mut self.base.facade)
    }

    fn visit_line_number(&mut self, line: u16, start: LabelNode) {
        let location = &self.base.probe.location;
        let matches = |line: u16| location.line == 0 || location.line == u32::from(line);
        let fires = match location.placement {
            Where::Before => matches(line),
            Where::After => self
                .last_line
                .is_some_and(|previous| previous != line && matches(previous)),
        };
        if fires {
            self.pending = true;
        }
        self.last_line = Some(line);
        self.base.facade.visit_line_number(line, start);
    }

    visit_insns_via!(on_insn);
}

delegate_to_base!(LineInstrumentor);

/// Runs the probe on entry to every original exception handler.
struct CatchInstrumentor<'v> {
    base: Base<'v>,
    handlers: HashSet<LabelNode>,
    pending: bool,
}

impl CatchInstrumentor<'_> {
    fn on_insn(&mut self, insn: Insn) {
        if std::mem::take(&mut self.pending) {
            let slot = self.base.capture(&JvmType::throwable());
            self.base.inject(slot);
        }
        insn.accept(&mut self.base.facade);
    }
}

impl MethodVisitor for CatchInstrumentor<'_> {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        Some(&mut self.base.facade)
    }

    fn visit_try_catch_block(
        &mut self,
        start: LabelNode,
        end: LabelNode,
        handler: LabelNode,
        catch_type: Option<&str>,
    ) {
        self.handlers.insert(handler);
        self.base
            .facade
            .visit_try_catch_block(start, end, handler, catch_type);
    }

    fn visit_label(&mut self, label: LabelNode) {
        if self.handlers.contains(&label) {
            self.pending = true;
        }
        self.base.facade.visit_label(label);
    }

    visit_insns_via!(on_insn);
}

delegate_to_base!(CatchInstrumentor);

/// Instrumentor for the kinds anchored to a single instruction.
struct InsnInstrumentor<'v> {
    base: Base<'v>,
}

impl InsnInstrumentor<'_> {
    fn on_insn(&mut self, insn: Insn) {
        let location = &self.base.probe.location;
        if !matches_insn(location, &insn) {
            insn.accept(&mut self.base.facade);
            return;
        }
        let opcode = insn.opcode();
        let after = location.placement == Where::After && !ends_flow(opcode);
        if after {
            insn.accept(&mut self.base.facade);
            let slot = match call_result(&insn) {
                Some(ty) => self.base.capture(&ty),
                None => None,
            };
            self.base.inject(slot);
            return;
        }
        let slot = if opcode == opcodes::ATHROW {
            self.base.capture(&JvmType::throwable())
        } else {
            None
        };
        self.base.inject(slot);
        insn.accept(&mut self.base.facade);
    }
}

impl MethodVisitor for InsnInstrumentor<'_> {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        Some(&mut self.base.facade)
    }

    visit_insns_via!(on_insn);
}

delegate_to_base!(InsnInstrumentor);

/// Non-void result type of a call instruction.
fn call_result(insn: &Insn) -> Option<JvmType> {
    let descriptor = match insn {
        Insn::Method(node) => &node.descriptor,
        Insn::InvokeDynamic(node) => &node.descriptor,
        _ => return None,
    };
    MethodType::parse(descriptor)
        .ok()
        .map(|method| method.ret)
        .filter(|ret| *ret != JvmType::Void)
}

fn ends_flow(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::GOTO
            | opcodes::GOTO_W
            | opcodes::TABLESWITCH
            | opcodes::LOOKUPSWITCH
            | opcodes::IRETURN..=opcodes::RETURN
            | opcodes::ATHROW
    )
}

fn name_matches(pattern: &str, name: &str) -> bool {
    pattern.is_empty() || pattern == name
}

fn class_matches(pattern: &str, internal_name: &str) -> bool {
    pattern.is_empty() || ClassName::new(pattern) == ClassName::new(internal_name)
}

/// Whether `insn` is an anchor for `location`. Empty location fields match anything.
pub fn matches_insn(location: &Location, insn: &Insn) -> bool {
    let opcode = insn.opcode();
    match (location.kind, insn) {
        (Kind::Call, Insn::Method(node)) => {
            class_matches(&location.clazz, &node.owner)
                && name_matches(&location.method, &node.name)
                && name_matches(&location.type_name, &node.descriptor)
        }
        (Kind::FieldGet, Insn::Field(node))
            if matches!(opcode, opcodes::GETFIELD | opcodes::GETSTATIC) =>
        {
            field_matches(location, &node.owner, &node.name, &node.descriptor)
        }
        (Kind::FieldSet, Insn::Field(node))
            if matches!(opcode, opcodes::PUTFIELD | opcodes::PUTSTATIC) =>
        {
            field_matches(location, &node.owner, &node.name, &node.descriptor)
        }
        (Kind::New, Insn::Type(node)) if opcode == opcodes::NEW => {
            class_matches(&location.clazz, &node.type_name)
        }
        (Kind::Newarray, Insn::Int(_)) => opcode == opcodes::NEWARRAY,
        (Kind::Newarray, Insn::Type(node)) if opcode == opcodes::ANEWARRAY => {
            class_matches(&location.clazz, &node.type_name)
        }
        (Kind::Newarray, Insn::MultiANewArray(_)) => true,
        (Kind::Checkcast, Insn::Type(node)) if opcode == opcodes::CHECKCAST => {
            class_matches(&location.clazz, &node.type_name)
        }
        (Kind::Instanceof, Insn::Type(node)) if opcode == opcodes::INSTANCEOF => {
            class_matches(&location.clazz, &node.type_name)
        }
        (Kind::ArrayGet, Insn::Simple(_)) => (opcodes::IALOAD..=opcodes::SALOAD).contains(&opcode),
        (Kind::ArraySet, Insn::Simple(_)) => {
            (opcodes::IASTORE..=opcodes::SASTORE).contains(&opcode)
        }
        (Kind::Throw, Insn::Simple(_)) => opcode == opcodes::ATHROW,
        (Kind::SyncEntry, Insn::Simple(_)) => opcode == opcodes::MONITORENTER,
        (Kind::SyncExit, Insn::Simple(_)) => opcode == opcodes::MONITOREXIT,
        _ => false,
    }
}

fn field_matches(location: &Location, owner: &str, name: &str, descriptor: &str) -> bool {
    class_matches(&location.clazz, owner)
        && name_matches(&location.field, name)
        && name_matches(&location.type_name, descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::{FieldInsnNode, InsnNode, MethodInsnNode, TypeInsnNode};

    fn location(kind: Kind) -> Location {
        Location::new(kind)
    }

    #[test]
    fn test_call_matching() {
        let call: Insn = MethodInsnNode::new(
            opcodes::INVOKEVIRTUAL,
            "java/io/File",
            "exists",
            "()Z",
        )
        .into();
        let mut loc = location(Kind::Call);
        assert!(matches_insn(&loc, &call));
        loc.set_clazz("java.io.File").set_method("exists");
        assert!(matches_insn(&loc, &call));
        loc.set_type("()V");
        assert!(!matches_insn(&loc, &call));
        assert!(!matches_insn(&location(Kind::FieldGet), &call));
    }

    #[test]
    fn test_field_matching_respects_direction() {
        let get: Insn =
            FieldInsnNode::new(opcodes::GETFIELD, "a/B", "count", "I").into();
        let put: Insn =
            FieldInsnNode::new(opcodes::PUTSTATIC, "a/B", "count", "I").into();
        let mut loc = location(Kind::FieldGet);
        loc.set_field("count");
        assert!(matches_insn(&loc, &get));
        assert!(!matches_insn(&loc, &put));
        loc.set_kind(Kind::FieldSet);
        assert!(matches_insn(&loc, &put));
        loc.set_field("other");
        assert!(!matches_insn(&loc, &put));
    }

    #[test]
    fn test_simple_kinds() {
        let insn = |opcode| -> Insn { InsnNode { opcode }.into() };
        assert!(matches_insn(&location(Kind::ArrayGet), &insn(opcodes::BALOAD)));
        assert!(!matches_insn(&location(Kind::ArrayGet), &insn(opcodes::BASTORE)));
        assert!(matches_insn(&location(Kind::ArraySet), &insn(opcodes::AASTORE)));
        assert!(matches_insn(&location(Kind::Throw), &insn(opcodes::ATHROW)));
        assert!(matches_insn(&location(Kind::SyncExit), &insn(opcodes::MONITOREXIT)));
        assert!(!matches_insn(&location(Kind::SyncEntry), &insn(opcodes::MONITOREXIT)));
    }

    #[test]
    fn test_type_kinds_filter_on_class() {
        let new: Insn = TypeInsnNode {
            insn: opcodes::NEW.into(),
            type_name: "java/lang/StringBuilder".to_string(),
        }
        .into();
        let mut loc = location(Kind::New);
        assert!(matches_insn(&loc, &new));
        loc.set_clazz("java.lang.String");
        assert!(!matches_insn(&loc, &new));
        assert!(!matches_insn(&location(Kind::Checkcast), &new));
    }

    #[test]
    fn test_call_result_skips_void() {
        let call = |desc: &str| -> Insn {
            MethodInsnNode::new(opcodes::INVOKESTATIC, "a/B", "f", desc).into()
        };
        assert_eq!(call_result(&call("()J")), Some(JvmType::Long));
        assert_eq!(call_result(&call("(I)V")), None);
        assert_eq!(call_result(&InsnNode { opcode: opcodes::NOP }.into()), None);
    }

    #[test]
    fn test_prologue_skips_nested_constructions() {
        let method = MethodContext {
            index: 0,
            access_flags: constants::ACC_PUBLIC,
            name: "<init>".to_string(),
            descriptor: "()V".to_string(),
        };
        let mut prologue = Prologue::new(&method);
        let new: Insn = TypeInsnNode {
            insn: opcodes::NEW.into(),
            type_name: "a/Arg".to_string(),
        }
        .into();
        let init = |owner: &str| -> Insn {
            MethodInsnNode::new(opcodes::INVOKESPECIAL, owner, "<init>", "()V").into()
        };
        assert!(!prologue.completes_at(&new));
        assert!(!prologue.completes_at(&init("a/Arg")));
        assert!(prologue.completes_at(&init("java/lang/Object")));
        assert!(!prologue.completes_at(&init("java/lang/Object")));
    }
}
