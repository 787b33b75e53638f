use crate::class_reader::MethodVisitor;
use crate::frame::FrameType;
use crate::insn::{
    AbstractInsnNode, FieldInsnNode, IincInsnNode, Insn, InsnList, IntInsnNode,
    InvokeDynamicInsnNode, JumpInsnNode, LabelNode, LdcConstant, LdcInsnNode, LineNumberInsnNode,
    LookupSwitchInsnNode, MethodInsnNode, MultiANewArrayInsnNode, TableSwitchInsnNode,
    TypeInsnNode, VarInsnNode,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatchBlockNode {
    pub start: LabelNode,
    pub end: LabelNode,
    pub handler: LabelNode,
    /// `None` catches everything.
    pub catch_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableNode {
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    pub start: LabelNode,
    pub end: LabelNode,
    pub index: u16,
}

/// A stack map frame pinned to a label. Locals are in stack map form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameNode {
    pub label: LabelNode,
    pub locals: Vec<FrameType>,
    pub stack: Vec<FrameType>,
}

/// Everything that goes into a `Code` attribute, with positions expressed as labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodBody {
    pub instructions: InsnList,
    pub try_catch_blocks: Vec<TryCatchBlockNode>,
    pub frames: Vec<FrameNode>,
    pub local_variables: Vec<LocalVariableNode>,
    pub max_stack: u16,
    pub max_locals: u16,
    last_label: Option<LabelNode>,
}

impl MethodBody {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_insn(&mut self, insn: impl Into<Insn>) {
        self.last_label = None;
        self.instructions.add(insn.into());
    }

    /// Label marking the current position, placing a fresh one if the last
    /// node is an instruction.
    fn current_label(&mut self) -> LabelNode {
        if let Some(label) = self.last_label {
            return label;
        }
        let label = LabelNode {
            id: crate::insn::FIRST_FRESH_LABEL + self.instructions.len(),
        };
        self.visit_label(label);
        label
    }
}

impl MethodVisitor for MethodBody {
    fn visit_frame(&mut self, locals: &[FrameType], stack: &[FrameType]) {
        let label = self.current_label();
        self.frames.push(FrameNode {
            label,
            locals: locals.to_vec(),
            stack: stack.to_vec(),
        });
    }

    fn visit_insn(&mut self, opcode: u8) {
        self.push_insn(crate::insn::InsnNode { opcode });
    }

    fn visit_int_insn(&mut self, opcode: u8, operand: i32) {
        self.push_insn(IntInsnNode {
            insn: opcode.into(),
            operand,
        });
    }

    fn visit_var_insn(&mut self, opcode: u8, var_index: u16) {
        self.push_insn(VarInsnNode {
            insn: opcode.into(),
            var_index,
        });
    }

    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) {
        self.push_insn(TypeInsnNode {
            insn: opcode.into(),
            type_name: type_name.to_string(),
        });
    }

    fn visit_field_insn(&mut self, opcode: u8, owner: &str, name: &str, desc: &str) {
        self.push_insn(FieldInsnNode::new(opcode, owner, name, desc));
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        desc: &str,
        is_interface: bool,
    ) {
        let mut node = MethodInsnNode::new(opcode, owner, name, desc);
        node.is_interface = is_interface;
        self.push_insn(node);
    }

    fn visit_invoke_dynamic_insn(&mut self, bootstrap_index: u16, name: &str, desc: &str) {
        self.push_insn(InvokeDynamicInsnNode {
            insn: crate::opcodes::INVOKEDYNAMIC.into(),
            bootstrap_index,
            name: name.to_string(),
            descriptor: desc.to_string(),
        });
    }

    fn visit_jump_insn(&mut self, opcode: u8, target: LabelNode) {
        self.push_insn(JumpInsnNode {
            insn: opcode.into(),
            target,
        });
    }

    fn visit_ldc_insn(&mut self, value: LdcConstant) {
        self.push_insn(LdcInsnNode::new(value));
    }

    fn visit_iinc_insn(&mut self, var_index: u16, increment: i16) {
        self.push_insn(IincInsnNode {
            insn: crate::opcodes::IINC.into(),
            var_index,
            increment,
        });
    }

    fn visit_table_switch(&mut self, low: i32, high: i32, default: LabelNode, targets: &[LabelNode]) {
        self.push_insn(TableSwitchInsnNode {
            insn: crate::opcodes::TABLESWITCH.into(),
            default,
            low,
            high,
            targets: targets.to_vec(),
        });
    }

    fn visit_lookup_switch(&mut self, default: LabelNode, pairs: &[(i32, LabelNode)]) {
        self.push_insn(LookupSwitchInsnNode {
            insn: crate::opcodes::LOOKUPSWITCH.into(),
            default,
            pairs: pairs.to_vec(),
        });
    }

    fn visit_multi_anewarray_insn(&mut self, type_name: &str, dims: u8) {
        self.push_insn(MultiANewArrayInsnNode {
            insn: crate::opcodes::MULTIANEWARRAY.into(),
            type_name: type_name.to_string(),
            dimensions: dims,
        });
    }

    fn visit_label(&mut self, label: LabelNode) {
        self.last_label = Some(label);
        self.instructions.add(label);
    }

    fn visit_line_number(&mut self, line: u16, start: LabelNode) {
        self.instructions.add(LineNumberInsnNode { line, start });
    }

    fn visit_try_catch_block(
        &mut self,
        start: LabelNode,
        end: LabelNode,
        handler: LabelNode,
        catch_type: Option<&str>,
    ) {
        self.try_catch_blocks.push(TryCatchBlockNode {
            start,
            end,
            handler,
            catch_type: catch_type.map(str::to_string),
        });
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
        self.local_variables.push(LocalVariableNode {
            name: name.to_string(),
            descriptor: desc.to_string(),
            signature: signature.map(str::to_string),
            start,
            end,
            index,
        });
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) {
        self.max_stack = max_stack;
        self.max_locals = max_locals;
    }
}

impl MethodBody {
    /// Instructions only, in order.
    pub fn insns(&self) -> impl Iterator<Item = &Insn> {
        self.instructions.insns()
    }

    pub fn nodes(&self) -> &[AbstractInsnNode] {
        self.instructions.nodes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes;

    #[test]
    fn test_frame_attaches_to_last_label() {
        let mut body = MethodBody::new();
        body.visit_label(LabelNode::at(0));
        body.visit_frame(&[FrameType::Integer], &[]);
        body.visit_insn(opcodes::RETURN);
        assert_eq!(body.frames[0].label, LabelNode::at(0));
    }

    #[test]
    fn test_frame_after_insn_places_fresh_label() {
        let mut body = MethodBody::new();
        body.visit_insn(opcodes::NOP);
        body.visit_frame(&[], &[]);
        let label = body.frames[0].label;
        assert!(label.is_fresh());
        assert_eq!(body.nodes()[1], AbstractInsnNode::Label(label));
    }
}
