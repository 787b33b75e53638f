use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::class_reader::MethodVisitor;
use crate::class_writer::{assemble, encode_code_attribute, resolve_handlers};
use crate::constant_pool::ConstantPool;
use crate::constants;
use crate::error::InstrumentError;
use crate::facade::MethodInstrumentorHelper;
use crate::frame::{FrameState, FrameType, TypeHierarchy, compact_locals, expand_locals};
use crate::insn::{FIRST_FRESH_LABEL, Insn, LabelNode};
use crate::method_state::{FrameMode, MethodState, Phase, merge_handlers};
use crate::nodes::{FrameNode, LocalVariableNode, MethodBody};
use crate::opcodes;
use crate::options::{TransformFlags, TransformOptions};
use crate::types::JvmType;

/// Class-wide resources every method rewrite of one class writes into.
pub struct RewriteTarget<'a> {
    pub class_name: String,
    pub major_version: u16,
    pub pool: ConstantPool,
    pub hierarchy: &'a dyn TypeHierarchy,
    pub options: TransformOptions,
    /// New `Code` payloads by method index.
    pub rewritten: HashMap<usize, Vec<u8>>,
    /// First failure, with the method it happened in.
    pub failure: Option<(String, InstrumentError)>,
}

impl<'a> RewriteTarget<'a> {
    pub fn new(
        class_name: &str,
        major_version: u16,
        pool: ConstantPool,
        hierarchy: &'a dyn TypeHierarchy,
        options: TransformOptions,
    ) -> Self {
        Self {
            class_name: class_name.to_string(),
            major_version,
            pool,
            hierarchy,
            options,
            rewritten: HashMap::new(),
            failure: None,
        }
    }

    pub fn fail(&mut self, method: &str, err: InstrumentError) {
        if self.failure.is_none() {
            self.failure = Some((method.to_string(), err));
        }
    }
}

/// The method being rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodContext {
    /// Position in the class's method table.
    pub index: usize,
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
}

impl MethodContext {
    pub fn is_static(&self) -> bool {
        self.access_flags & constants::ACC_STATIC != 0
    }

    pub fn is_constructor(&self) -> bool {
        self.name == constants::CONSTRUCTOR_NAME
    }
}

/// Innermost visitor of an instrumenting chain.
///
/// Collects the method body, original and injected code alike, while
/// simulating the verifier state so injected joins and handlers get correct
/// frames. Owns the [`MethodState`] and serializes the new `Code` attribute
/// when the method ends.
pub struct InstrumentingMethodVisitor<'v, 'a> {
    target: &'v mut RewriteTarget<'a>,
    method: MethodContext,
    state: MethodState,
    body: MethodBody,
    has_code: bool,
    /// Set once anything beyond the original events reached this method.
    injected: bool,
    original_max_stack: u16,
    original_max_locals: u16,

    current: FrameState,
    reachable: bool,
    /// States carried by forward jumps, keyed by target.
    saved: HashMap<LabelNode, FrameState>,
    placed: HashSet<LabelNode>,
    /// Labels placed since the last instruction.
    group: Vec<LabelNode>,
    frame_requested_here: bool,
    insn_count: usize,
    label_index: HashMap<LabelNode, usize>,
    /// Locals before each instruction, by instruction index.
    snapshots: Vec<Vec<FrameType>>,
    handler_ranges: HashMap<LabelNode, Vec<(LabelNode, LabelNode, Option<String>)>>,
    /// Still inside the branch-free code every path runs through.
    in_prefix: bool,
    /// Locals at the end of that prefix.
    prefix_locals: Vec<FrameType>,
    next_label: usize,
    max_stack: usize,
    max_locals: usize,
    error: Option<InstrumentError>,
}

impl<'v, 'a> InstrumentingMethodVisitor<'v, 'a> {
    /// A descriptor that cannot be parsed fails the method when it closes.
    pub fn new(target: &'v mut RewriteTarget<'a>, method: MethodContext) -> Self {
        let (current, error) = match FrameState::initial(
            &target.class_name,
            &method.name,
            &method.descriptor,
            method.is_static(),
        ) {
            Ok(state) => (state, None),
            Err(err) => (FrameState::default(), Some(err)),
        };
        let max_locals = current.locals.len();
        Self {
            target,
            method,
            state: MethodState::new(max_locals as u16),
            body: MethodBody::new(),
            has_code: false,
            injected: false,
            original_max_stack: 0,
            original_max_locals: 0,
            current,
            reachable: true,
            saved: HashMap::new(),
            placed: HashSet::new(),
            group: Vec::new(),
            frame_requested_here: false,
            insn_count: 0,
            label_index: HashMap::new(),
            snapshots: Vec::new(),
            handler_ranges: HashMap::new(),
            in_prefix: true,
            prefix_locals: Vec::new(),
            next_label: 0,
            max_stack: 0,
            max_locals,
            error,
        }
    }

    pub fn state(&self) -> &MethodState {
        &self.state
    }

    fn fail(&mut self, err: InstrumentError) {
        if self.error.is_none() {
            debug!(
                "{}.{}{} failed: {err}",
                self.target.class_name, self.method.name, self.method.descriptor
            );
            self.error = Some(err);
        }
    }

    /// Returns `result` unchanged, keeping a copy of any error as the
    /// method's failure.
    fn sticky<T>(&mut self, result: Result<T, InstrumentError>) -> Result<T, InstrumentError> {
        if let Err(err) = &result {
            self.fail(err.clone());
        }
        result
    }

    fn fresh_label(&mut self) -> LabelNode {
        let label = LabelNode {
            id: FIRST_FRESH_LABEL + self.next_label,
        };
        self.next_label += 1;
        label
    }

    fn note_depth(&mut self) {
        self.max_stack = self.max_stack.max(self.current.stack_slots());
        self.max_locals = self.max_locals.max(self.current.locals.len());
    }

    fn end_prefix(&mut self) {
        if self.in_prefix {
            self.in_prefix = false;
            self.prefix_locals = self.current.locals.clone();
        }
    }

    fn record_frame(&mut self, label: LabelNode) {
        let frame = FrameNode {
            label,
            locals: compact_locals(&self.current.locals),
            stack: self.current.stack.clone(),
        };
        trace!(
            "frame at {:?}: locals {:?} stack {:?}",
            label, frame.locals, frame.stack
        );
        self.body.frames.push(frame);
    }

    /// State on entry to a handler: locals merged over every instruction the
    /// handler protects, and the caught exception on the stack.
    fn handler_state(&self, handler: LabelNode) -> FrameState {
        let hierarchy = self.target.hierarchy;
        let mut merged: Option<FrameState> = None;
        let mut caught: Option<String> = None;
        let ranges = self.handler_ranges.get(&handler).map(Vec::as_slice).unwrap_or(&[]);
        for (start, end, catch_type) in ranges {
            let catch_type = catch_type.as_deref().unwrap_or(constants::THROWABLE);
            caught = Some(match caught {
                Some(seen) => hierarchy.common_superclass(&seen, catch_type),
                None => catch_type.to_string(),
            });
            let Some(&from) = self.label_index.get(start) else {
                continue;
            };
            let to = self
                .label_index
                .get(end)
                .copied()
                .unwrap_or(self.insn_count)
                .min(self.snapshots.len());
            for locals in self.snapshots.get(from..to).unwrap_or(&[]) {
                let snapshot = FrameState {
                    locals: locals.clone(),
                    stack: Vec::new(),
                };
                match &mut merged {
                    Some(state) => state.merge_from(&snapshot, hierarchy),
                    None => merged = Some(snapshot),
                }
            }
        }
        let mut state = merged.unwrap_or_else(|| FrameState {
            locals: self.current.locals.clone(),
            stack: Vec::new(),
        });
        state.stack = vec![FrameType::Object(
            caught.unwrap_or_else(|| constants::THROWABLE.to_string()),
        )];
        state
    }

    fn request_frame(&mut self, label: LabelNode, mode: FrameMode) -> Result<(), InstrumentError> {
        self.state.ensure_open()?;
        self.injected = true;
        if !self.group.contains(&label) {
            return Err(InstrumentError::LabelNotPlaced(label));
        }
        if !self.state.request_frame(label, mode.clone())? {
            return Ok(());
        }
        let locals = if self.handler_ranges.contains_key(&label) {
            self.handler_state(label).locals
        } else {
            self.current.locals.clone()
        };
        self.end_prefix();
        let stack = match mode {
            FrameMode::Replace(stack) => stack,
            FrameMode::Append(extra) => {
                let mut stack = self.current.stack.clone();
                stack.extend(extra);
                stack
            }
            FrameMode::Same => self.current.stack.clone(),
        };
        self.current = FrameState { locals, stack };
        self.reachable = true;
        self.frame_requested_here = true;
        self.note_depth();
        self.record_frame(label);
        Ok(())
    }

    fn on_insn(&mut self, insn: Insn) {
        if self.state.phase() != Phase::Open {
            let phase = self.state.phase().as_str();
            self.fail(InstrumentError::MethodClosed { state: phase });
            return;
        }
        let opcode = insn.opcode();
        let position = match self.group.last().copied() {
            Some(label) => label,
            None if opcode == opcodes::NEW => {
                let label = self.fresh_label();
                self.visit_label(label);
                label
            }
            None => LabelNode::at(0),
        };

        self.snapshots.push(self.current.locals.clone());
        if self.error.is_none() && self.reachable {
            let result = self
                .current
                .execute(&insn, position, &self.target.class_name);
            if let Err(err) = result {
                self.fail(err);
            }
            self.note_depth();
        }

        if self.reachable {
            let hierarchy = self.target.hierarchy;
            for target in insn.targets() {
                if self.placed.contains(&target) {
                    continue;
                }
                match self.saved.get_mut(&target) {
                    Some(saved) => saved.merge_from(&self.current, hierarchy),
                    None => {
                        self.saved.insert(target, self.current.clone());
                    }
                }
            }
        }

        if is_terminal(opcode) || !insn.targets().is_empty() {
            self.end_prefix();
        }
        if is_terminal(opcode) {
            self.reachable = false;
            self.current.stack.clear();
        }
        self.group.clear();
        self.frame_requested_here = false;
        self.insn_count += 1;
        insn.accept(&mut self.body);
    }

    fn close(&mut self) {
        if !self.has_code {
            return;
        }
        if let Err(err) = self.state.begin_close() {
            self.fail(err);
            return;
        }
        let method = format!("{}{}", self.method.name, self.method.descriptor);
        if self.error.is_none() && !self.injected {
            self.state.finish_close();
            debug!("nothing injected into {}.{method}", self.target.class_name);
            return;
        }
        let result = match self.error.take() {
            Some(err) => Err(err),
            None => self.serialize(),
        };
        self.state.finish_close();
        match result {
            Ok(code) => {
                debug!(
                    "rewrote {}.{method}: {} injected handlers, {} frames, {} locals",
                    self.target.class_name,
                    self.state.handlers().len(),
                    self.body.frames.len(),
                    self.state.next_local()
                );
                self.target.rewritten.insert(self.method.index, code);
            }
            Err(err) => self.target.fail(&method, err),
        }
    }

    fn serialize(&mut self) -> Result<Vec<u8>, InstrumentError> {
        let target = &mut *self.target;
        let assembled = assemble(self.body.nodes(), &mut target.pool)?;
        let original = resolve_handlers(&assembled, &self.body.try_catch_blocks, &mut target.pool)?;
        let injected = resolve_handlers(&assembled, self.state.handlers(), &mut target.pool)?;
        for entry in &injected {
            trace!(
                "handler [{}, {}) -> {}",
                entry.start_pc, entry.end_pc, entry.handler_pc
            );
        }
        let table = merge_handlers(original, injected);

        let max_stack = u16::try_from(self.max_stack)
            .unwrap_or(u16::MAX)
            .max(self.original_max_stack);
        let max_locals = u16::try_from(self.max_locals)
            .unwrap_or(u16::MAX)
            .max(self.original_max_locals)
            .max(self.state.next_local());
        let frames = target
            .options
            .emits_frames(target.major_version)
            .then_some(self.body.frames.as_slice());
        let local_variables: &[LocalVariableNode] = if target
            .options
            .flags
            .contains(TransformFlags::DROP_DEBUG_TABLES)
        {
            &[]
        } else {
            &self.body.local_variables
        };
        Ok(encode_code_attribute(
            &assembled,
            max_stack,
            max_locals,
            &table,
            frames,
            local_variables,
            &mut target.pool,
        )?)
    }
}

fn is_terminal(opcode: u8) -> bool {
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

/// Takes the simulated uninitialized tag when both sides hold one, since
/// injected code can move a `NEW` away from its original offset.
fn remap_uninitialized(original: FrameType, simulated: Option<&FrameType>) -> FrameType {
    match (&original, simulated) {
        (FrameType::Uninitialized(_), Some(FrameType::Uninitialized(actual))) => {
            FrameType::Uninitialized(*actual)
        }
        _ => original,
    }
}

impl MethodVisitor for InstrumentingMethodVisitor<'_, '_> {
    fn visit_code(&mut self, max_stack: u16, max_locals: u16) {
        self.has_code = true;
        self.original_max_stack = max_stack;
        self.original_max_locals = max_locals;
        self.state.reserve_original(max_locals);
        self.body.visit_code(max_stack, max_locals);
    }

    /// Original frames. Slots the original method knows about come from the
    /// frame; scratch slots keep their simulated types.
    fn visit_frame(&mut self, locals: &[FrameType], stack: &[FrameType]) {
        if self.frame_requested_here {
            return;
        }
        let label = match self.group.last().copied() {
            Some(label) => label,
            None => {
                let label = self.fresh_label();
                self.visit_label(label);
                label
            }
        };
        self.end_prefix();
        let original = expand_locals(locals);
        let known = self.original_max_locals as usize;
        let mut merged = Vec::with_capacity(known.max(self.current.locals.len()));
        for slot in 0..known {
            let value = original.get(slot).cloned().unwrap_or(FrameType::Top);
            merged.push(remap_uninitialized(value, self.current.locals.get(slot)));
        }
        merged.extend(self.current.locals.iter().skip(known).cloned());
        let simulated_stack = (self.current.stack.len() == stack.len()).then_some(&self.current.stack);
        let stack = stack
            .iter()
            .enumerate()
            .map(|(i, value)| {
                remap_uninitialized(value.clone(), simulated_stack.and_then(|s| s.get(i)))
            })
            .collect();
        self.current = FrameState {
            locals: merged,
            stack,
        };
        self.reachable = true;
        self.note_depth();
        self.record_frame(label);
    }

    visit_insns_via!(on_insn);

    fn visit_label(&mut self, label: LabelNode) {
        let hierarchy = self.target.hierarchy;
        let mut incoming = self.reachable.then(|| self.current.clone());
        if let Some(saved) = self.saved.remove(&label) {
            incoming = Some(match incoming {
                Some(mut state) => {
                    state.merge_from(&saved, hierarchy);
                    state
                }
                None => saved,
            });
        }
        if self.handler_ranges.contains_key(&label) {
            incoming = Some(self.handler_state(label));
        }
        match incoming {
            Some(state) => {
                self.current = state;
                self.reachable = true;
                self.note_depth();
            }
            None => {
                // Only backward edges can reach this label, and those carry
                // whatever the prefix established.
                self.current = FrameState {
                    locals: self.prefix_locals.clone(),
                    stack: Vec::new(),
                };
            }
        }
        self.placed.insert(label);
        self.group.push(label);
        self.label_index.insert(label, self.insn_count);
        self.body.visit_label(label);
    }

    fn visit_line_number(&mut self, line: u16, start: LabelNode) {
        self.body.visit_line_number(line, start);
    }

    fn visit_try_catch_block(
        &mut self,
        start: LabelNode,
        end: LabelNode,
        handler: LabelNode,
        catch_type: Option<&str>,
    ) {
        self.handler_ranges
            .entry(handler)
            .or_default()
            .push((start, end, catch_type.map(str::to_string)));
        self.body
            .visit_try_catch_block(start, end, handler, catch_type);
    }

    fn visit_local_variable(
        &mut self,
        name: &str,
        desc: &str,
        signature: Option<&str>,
        start: LabelNode,
        end: LabelNode,
        index: u16,
    ) {
        self.body
            .visit_local_variable(name, desc, signature, start, end, index);
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) {
        self.original_max_stack = self.original_max_stack.max(max_stack);
        self.original_max_locals = self.original_max_locals.max(max_locals);
    }

    fn visit_end(&mut self) {
        self.close();
    }
}

impl MethodInstrumentorHelper for InstrumentingMethodVisitor<'_, '_> {
    fn helper(&mut self) -> &mut dyn MethodInstrumentorHelper {
        self
    }

    fn new_label(&mut self) -> LabelNode {
        self.fresh_label()
    }

    fn allocate_scratch_local(&mut self, ty: &JvmType) -> Result<u16, InstrumentError> {
        self.injected = true;
        let slot = self.state.allocate(ty);
        self.sticky(slot)
    }

    fn store_as_new_local(&mut self, ty: &JvmType) -> Result<u16, InstrumentError> {
        let slot = self.allocate_scratch_local(ty)?;
        self.visit_var_insn(ty.store_opcode(), slot);
        Ok(slot)
    }

    fn register_exception_handler(
        &mut self,
        start: LabelNode,
        end: LabelNode,
        handler: LabelNode,
        catch_type: Option<&str>,
    ) -> Result<(), InstrumentError> {
        self.injected = true;
        let added = self.state.add_handler(start, end, handler, catch_type);
        self.sticky(added)?;
        self.handler_ranges
            .entry(handler)
            .or_default()
            .push((start, end, catch_type.map(str::to_string)));
        trace!("registered handler {:?} for [{:?}, {:?})", handler, start, end);
        Ok(())
    }

    fn insert_frame_replace_stack(
        &mut self,
        label: LabelNode,
        stack: &[FrameType],
    ) -> Result<(), InstrumentError> {
        let result = self.request_frame(label, FrameMode::Replace(stack.to_vec()));
        self.sticky(result)
    }

    fn insert_frame_append_stack(
        &mut self,
        label: LabelNode,
        stack: &[FrameType],
    ) -> Result<(), InstrumentError> {
        let result = self.request_frame(label, FrameMode::Append(stack.to_vec()));
        self.sticky(result)
    }

    fn insert_frame_same_stack(&mut self, label: LabelNode) -> Result<(), InstrumentError> {
        let result = self.request_frame(label, FrameMode::Same);
        self.sticky(result)
    }

    fn class_name(&mut self) -> &str {
        &self.target.class_name
    }

    fn report_error(&mut self, err: InstrumentError) {
        self.fail(err);
    }

    fn code_sink(&mut self) -> &mut dyn MethodVisitor {
        self.injected = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_reader::CodeAttribute;
    use crate::frame::FlatHierarchy;

    fn target(hierarchy: &FlatHierarchy) -> RewriteTarget<'_> {
        RewriteTarget::new(
            "demo/C",
            52,
            ConstantPool::new(),
            hierarchy,
            TransformOptions::default(),
        )
    }

    fn context(name: &str, descriptor: &str, access_flags: u16) -> MethodContext {
        MethodContext {
            index: 0,
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    fn code_of(target: &RewriteTarget<'_>) -> CodeAttribute {
        let bytes = target.rewritten.get(&0).expect("method was rewritten");
        CodeAttribute::parse(bytes, target.pool.entries()).unwrap()
    }

    #[test]
    fn test_scratch_slots_follow_original_locals() {
        let hierarchy = FlatHierarchy;
        let mut target = target(&hierarchy);
        {
            let mut mv =
                InstrumentingMethodVisitor::new(&mut target, context("m", "(I)V", 0x0001));
            mv.visit_code(1, 2);
            mv.visit_label(LabelNode::at(0));
            mv.visit_insn(opcodes::LCONST_0);
            let a = mv.store_as_new_local(&JvmType::Long).unwrap();
            let b = mv.allocate_scratch_local(&JvmType::Int).unwrap();
            let c = mv.allocate_scratch_local(&JvmType::object("java/lang/String")).unwrap();
            assert_eq!((a, b, c), (2, 4, 5));
            mv.visit_insn(opcodes::RETURN);
            mv.visit_label(LabelNode::at(1));
            mv.visit_maxs(1, 2);
            mv.visit_end();
        }
        let code = code_of(&target);
        assert_eq!(code.max_locals, 6);
        assert_eq!(code.max_stack, 2);
        assert_eq!(
            code.code,
            vec![opcodes::LCONST_0, opcodes::LSTORE, 2, opcodes::RETURN]
        );
    }

    #[test]
    fn test_frame_request_needs_current_position() {
        let hierarchy = FlatHierarchy;
        let mut target = target(&hierarchy);
        let mut mv =
            InstrumentingMethodVisitor::new(&mut target, context("m", "()V", 0x0009));
        mv.visit_code(0, 0);
        let label = mv.new_label();
        mv.visit_label(label);
        mv.visit_insn(opcodes::NOP);
        assert!(matches!(
            mv.insert_frame_same_stack(label),
            Err(InstrumentError::LabelNotPlaced(at)) if at == label
        ));
    }

    #[test]
    fn test_conflicting_frame_aborts_method() {
        let hierarchy = FlatHierarchy;
        let mut target = target(&hierarchy);
        {
            let mut mv =
                InstrumentingMethodVisitor::new(&mut target, context("m", "()V", 0x0009));
            mv.visit_code(0, 0);
            let label = mv.new_label();
            mv.visit_label(label);
            mv.insert_frame_same_stack(label).unwrap();
            mv.insert_frame_same_stack(label).unwrap();
            assert!(
                mv.insert_frame_replace_stack(label, &[FrameType::Integer])
                    .is_err()
            );
            mv.visit_insn(opcodes::RETURN);
            mv.visit_end();
        }
        assert!(target.rewritten.is_empty());
        let (method, err) = target.failure.expect("failure recorded");
        assert_eq!(method, "m()V");
        assert!(matches!(err, InstrumentError::FrameConflict { .. }));
    }

    #[test]
    fn test_injected_branch_gets_frame() {
        let hierarchy = FlatHierarchy;
        let mut target = target(&hierarchy);
        {
            let mut mv =
                InstrumentingMethodVisitor::new(&mut target, context("m", "(I)V", 0x0009));
            mv.visit_code(1, 1);
            let skip = mv.new_label();
            mv.visit_var_insn(opcodes::ILOAD, 0);
            mv.visit_jump_insn(opcodes::IFEQ, skip);
            mv.visit_insn(opcodes::NOP);
            mv.visit_label(skip);
            mv.insert_frame_same_stack(skip).unwrap();
            mv.visit_insn(opcodes::RETURN);
            mv.visit_maxs(0, 1);
            mv.visit_end();
        }
        let code = code_of(&target);
        let frames = code.stack_map_table().unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_handler_frame_merges_protected_locals() {
        let hierarchy = FlatHierarchy;
        let mut target = target(&hierarchy);
        {
            let mut mv =
                InstrumentingMethodVisitor::new(&mut target, context("m", "()V", 0x0009));
            mv.visit_code(0, 0);
            let start = mv.new_label();
            let end = mv.new_label();
            let handler = mv.new_label();
            mv.visit_label(start);
            mv.visit_insn(opcodes::ICONST_1);
            mv.visit_var_insn(opcodes::ISTORE, 0);
            mv.visit_insn(opcodes::RETURN);
            mv.visit_label(end);
            mv.visit_label(handler);
            mv.register_exception_handler(start, end, handler, None)
                .unwrap();
            mv.insert_frame_replace_stack(handler, &[FrameType::Object(constants::THROWABLE.to_string())])
                .unwrap();
            mv.visit_insn(opcodes::ATHROW);
            mv.visit_end();
        }
        let code = code_of(&target);
        assert_eq!(code.exception_table.len(), 1);
        assert_eq!(code.exception_table[0].start_pc, 0);
        assert_eq!(code.exception_table[0].end_pc, 4);
        assert_eq!(code.exception_table[0].handler_pc, 4);
        assert_eq!(code.exception_table[0].catch_type, 0);
        // istore 0 happens inside the range, so slot 0 is not definitely set.
        let frames = code.stack_map_table().unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_untouched_method_is_not_rewritten() {
        let hierarchy = FlatHierarchy;
        let mut target = target(&hierarchy);
        {
            let mut mv =
                InstrumentingMethodVisitor::new(&mut target, context("m", "()V", 0x0009));
            mv.visit_code(0, 0);
            let label = mv.new_label();
            mv.visit_label(label);
            mv.visit_insn(opcodes::RETURN);
            mv.visit_maxs(0, 0);
            mv.visit_end();
            assert_eq!(mv.state().phase(), Phase::Closed);
        }
        assert!(target.rewritten.is_empty());
        assert!(target.failure.is_none());
    }

    #[test]
    fn test_closed_method_rejects_calls() {
        let hierarchy = FlatHierarchy;
        let mut target = target(&hierarchy);
        let mut mv =
            InstrumentingMethodVisitor::new(&mut target, context("m", "()V", 0x0009));
        mv.visit_code(0, 0);
        mv.visit_insn(opcodes::RETURN);
        mv.visit_end();
        assert_eq!(mv.state().phase(), Phase::Closed);
        assert!(matches!(
            mv.allocate_scratch_local(&JvmType::Int),
            Err(InstrumentError::MethodClosed { state: "CLOSED" })
        ));
    }
}
