use crate::class_reader::MethodVisitor;
use crate::opcodes;

#[derive(Debug, Clone, PartialEq)]
pub struct InsnNode {
    pub opcode: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntInsnNode {
    pub insn: InsnNode,
    pub operand: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarInsnNode {
    pub insn: InsnNode,
    pub var_index: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeInsnNode {
    pub insn: InsnNode,
    /// Internal name or array descriptor.
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInsnNode {
    pub insn: InsnNode,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInsnNode {
    pub insn: InsnNode,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub is_interface: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvokeDynamicInsnNode {
    pub insn: InsnNode,
    pub bootstrap_index: u16,
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JumpInsnNode {
    pub insn: InsnNode,
    pub target: LabelNode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LdcInsnNode {
    pub insn: InsnNode,
    pub value: LdcConstant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IincInsnNode {
    pub insn: InsnNode,
    pub var_index: u16,
    pub increment: i16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSwitchInsnNode {
    pub insn: InsnNode,
    pub default: LabelNode,
    pub low: i32,
    pub high: i32,
    pub targets: Vec<LabelNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupSwitchInsnNode {
    pub insn: InsnNode,
    pub default: LabelNode,
    pub pairs: Vec<(i32, LabelNode)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiANewArrayInsnNode {
    pub insn: InsnNode,
    pub type_name: String,
    pub dimensions: u8,
}

/// A position in a code array. Labels read from a class file use the bytecode
/// offset as their id; labels created while rewriting use ids past the end of
/// the original code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelNode {
    pub id: usize,
}

/// First id handed out to labels that do not come from a bytecode offset.
/// Code arrays are at most 65535 bytes long, so the two ranges never meet.
pub const FIRST_FRESH_LABEL: usize = 0x1_0000;

impl LabelNode {
    pub fn at(offset: usize) -> Self {
        Self { id: offset }
    }

    pub fn is_fresh(&self) -> bool {
        self.id >= FIRST_FRESH_LABEL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineNumberInsnNode {
    pub line: u16,
    pub start: LabelNode,
}

/// A loadable constant. Method handles and dynamic constants keep the pool
/// index they were read from, since their bootstrap data is not modelled.
#[derive(Debug, Clone, PartialEq)]
pub enum LdcConstant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(String),
    MethodType(String),
    MethodHandle { index: u16 },
    Dynamic { index: u16, descriptor: String },
}

impl LdcConstant {
    pub fn is_wide(&self) -> bool {
        match self {
            LdcConstant::Long(_) | LdcConstant::Double(_) => true,
            LdcConstant::Dynamic { descriptor, .. } => descriptor == "J" || descriptor == "D",
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbstractInsnNode {
    Label(LabelNode),
    LineNumber(LineNumberInsnNode),
    Insn(Insn),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    Simple(InsnNode),
    Int(IntInsnNode),
    Var(VarInsnNode),
    Type(TypeInsnNode),
    Field(FieldInsnNode),
    Method(MethodInsnNode),
    InvokeDynamic(InvokeDynamicInsnNode),
    Jump(JumpInsnNode),
    Ldc(LdcInsnNode),
    Iinc(IincInsnNode),
    TableSwitch(TableSwitchInsnNode),
    LookupSwitch(LookupSwitchInsnNode),
    MultiANewArray(MultiANewArrayInsnNode),
}

impl Insn {
    pub fn opcode(&self) -> u8 {
        match self {
            Insn::Simple(node) => node.opcode,
            Insn::Int(node) => node.insn.opcode,
            Insn::Var(node) => node.insn.opcode,
            Insn::Type(node) => node.insn.opcode,
            Insn::Field(node) => node.insn.opcode,
            Insn::Method(node) => node.insn.opcode,
            Insn::InvokeDynamic(node) => node.insn.opcode,
            Insn::Jump(node) => node.insn.opcode,
            Insn::Ldc(node) => node.insn.opcode,
            Insn::Iinc(node) => node.insn.opcode,
            Insn::TableSwitch(node) => node.insn.opcode,
            Insn::LookupSwitch(node) => node.insn.opcode,
            Insn::MultiANewArray(node) => node.insn.opcode,
        }
    }

    /// Labels this instruction may transfer control to.
    pub fn targets(&self) -> Vec<LabelNode> {
        match self {
            Insn::Jump(node) => vec![node.target],
            Insn::TableSwitch(node) => {
                let mut out = node.targets.clone();
                out.push(node.default);
                out
            }
            Insn::LookupSwitch(node) => {
                let mut out: Vec<LabelNode> = node.pairs.iter().map(|(_, l)| *l).collect();
                out.push(node.default);
                out
            }
            _ => Vec::new(),
        }
    }

    /// Replays this instruction into `mv`, rewriting every label through `map`.
    pub fn accept_mapped(
        &self,
        mv: &mut dyn MethodVisitor,
        map: &mut dyn FnMut(LabelNode) -> LabelNode,
    ) {
        match self {
            Insn::Simple(node) => mv.visit_insn(node.opcode),
            Insn::Int(node) => mv.visit_int_insn(node.insn.opcode, node.operand),
            Insn::Var(node) => mv.visit_var_insn(node.insn.opcode, node.var_index),
            Insn::Type(node) => mv.visit_type_insn(node.insn.opcode, &node.type_name),
            Insn::Field(node) => {
                mv.visit_field_insn(node.insn.opcode, &node.owner, &node.name, &node.descriptor)
            }
            Insn::Method(node) => mv.visit_method_insn(
                node.insn.opcode,
                &node.owner,
                &node.name,
                &node.descriptor,
                node.is_interface,
            ),
            Insn::InvokeDynamic(node) => {
                mv.visit_invoke_dynamic_insn(node.bootstrap_index, &node.name, &node.descriptor)
            }
            Insn::Jump(node) => mv.visit_jump_insn(node.insn.opcode, map(node.target)),
            Insn::Ldc(node) => mv.visit_ldc_insn(node.value.clone()),
            Insn::Iinc(node) => mv.visit_iinc_insn(node.var_index, node.increment),
            Insn::TableSwitch(node) => {
                let targets: Vec<LabelNode> = node.targets.iter().map(|l| map(*l)).collect();
                mv.visit_table_switch(node.low, node.high, map(node.default), &targets)
            }
            Insn::LookupSwitch(node) => {
                let pairs: Vec<(i32, LabelNode)> =
                    node.pairs.iter().map(|(k, l)| (*k, map(*l))).collect();
                mv.visit_lookup_switch(map(node.default), &pairs)
            }
            Insn::MultiANewArray(node) => {
                mv.visit_multi_anewarray_insn(&node.type_name, node.dimensions)
            }
        }
    }

    pub fn accept(&self, mv: &mut dyn MethodVisitor) {
        self.accept_mapped(mv, &mut |label| label);
    }
}

/// An ordered sequence of instructions, labels and line markers, typically a
/// probe body to be injected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsnList {
    nodes: Vec<AbstractInsnNode>,
}

impl InsnList {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn add<T: Into<AbstractInsnNode>>(&mut self, node: T) -> &mut Self {
        self.nodes.push(node.into());
        self
    }

    pub fn nodes(&self) -> &[AbstractInsnNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Instructions only, skipping labels and line markers.
    pub fn insns(&self) -> impl Iterator<Item = &Insn> {
        self.nodes.iter().filter_map(|node| match node {
            AbstractInsnNode::Insn(insn) => Some(insn),
            _ => None,
        })
    }

    /// Labels that some jump or switch inside this list targets.
    pub fn jump_targets(&self) -> Vec<LabelNode> {
        let mut out: Vec<LabelNode> = self.insns().flat_map(Insn::targets).collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn accept(&self, mv: &mut dyn MethodVisitor) {
        for node in &self.nodes {
            match node {
                AbstractInsnNode::Label(label) => mv.visit_label(*label),
                AbstractInsnNode::LineNumber(line) => mv.visit_line_number(line.line, line.start),
                AbstractInsnNode::Insn(insn) => insn.accept(mv),
            }
        }
    }
}

impl From<Vec<AbstractInsnNode>> for InsnList {
    fn from(nodes: Vec<AbstractInsnNode>) -> Self {
        Self { nodes }
    }
}

impl From<LabelNode> for AbstractInsnNode {
    fn from(value: LabelNode) -> Self {
        AbstractInsnNode::Label(value)
    }
}

impl From<LineNumberInsnNode> for AbstractInsnNode {
    fn from(value: LineNumberInsnNode) -> Self {
        AbstractInsnNode::LineNumber(value)
    }
}

impl From<Insn> for AbstractInsnNode {
    fn from(value: Insn) -> Self {
        AbstractInsnNode::Insn(value)
    }
}

impl FieldInsnNode {
    pub fn new(opcode: u8, owner: &str, name: &str, descriptor: &str) -> Self {
        Self {
            insn: InsnNode { opcode },
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }
}

impl MethodInsnNode {
    pub fn new(opcode: u8, owner: &str, name: &str, descriptor: &str) -> Self {
        Self {
            insn: InsnNode { opcode },
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_interface: opcode == opcodes::INVOKEINTERFACE,
        }
    }
}

impl LdcInsnNode {
    pub fn new(value: LdcConstant) -> Self {
        let opcode = if value.is_wide() {
            opcodes::LDC2_W
        } else {
            opcodes::LDC
        };
        Self {
            insn: InsnNode { opcode },
            value,
        }
    }

    pub fn string(value: &str) -> Self {
        Self::new(LdcConstant::String(value.to_string()))
    }
}

impl From<u8> for InsnNode {
    fn from(opcode: u8) -> Self {
        InsnNode { opcode }
    }
}

macro_rules! impl_insn_from {
    ($($node:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$node> for Insn {
                fn from(value: $node) -> Self {
                    Insn::$variant(value)
                }
            }

            impl From<$node> for AbstractInsnNode {
                fn from(value: $node) -> Self {
                    AbstractInsnNode::Insn(Insn::$variant(value))
                }
            }
        )*
    };
}

impl_insn_from! {
    InsnNode => Simple,
    IntInsnNode => Int,
    VarInsnNode => Var,
    TypeInsnNode => Type,
    FieldInsnNode => Field,
    MethodInsnNode => Method,
    InvokeDynamicInsnNode => InvokeDynamic,
    JumpInsnNode => Jump,
    LdcInsnNode => Ldc,
    IincInsnNode => Iinc,
    TableSwitchInsnNode => TableSwitch,
    LookupSwitchInsnNode => LookupSwitch,
    MultiANewArrayInsnNode => MultiANewArray,
}
