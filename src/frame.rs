//! Verifier types and a single-instruction operand stack simulator.
//!
//! Locals are kept in slot form: a `Long` or `Double` occupies its slot and the
//! following one, which holds `Top`. Stack map frames use the compact form where
//! a wide value is a single entry; [`compact_locals`] and [`expand_locals`]
//! convert between the two.

use std::fmt;

use crate::constants;
use crate::error::InstrumentError;
use crate::insn::{Insn, LabelNode, LdcConstant};
use crate::opcodes;
use crate::types::{JvmType, MethodType};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// Internal class name or array descriptor.
    Object(String),
    /// Result of the `NEW` instruction placed at this label.
    Uninitialized(LabelNode),
}

impl FrameType {
    pub fn is_wide(&self) -> bool {
        matches!(self, FrameType::Long | FrameType::Double)
    }

    pub fn from_type(ty: &JvmType) -> Result<Self, InstrumentError> {
        Ok(match ty {
            JvmType::Boolean | JvmType::Byte | JvmType::Char | JvmType::Short | JvmType::Int => {
                FrameType::Integer
            }
            JvmType::Float => FrameType::Float,
            JvmType::Long => FrameType::Long,
            JvmType::Double => FrameType::Double,
            JvmType::Object(name) => FrameType::Object(name.clone()),
            JvmType::Array(desc) => FrameType::Object(desc.clone()),
            JvmType::Null => FrameType::Null,
            JvmType::Void => {
                return Err(InstrumentError::InvalidType(
                    "void has no verifier type".to_string(),
                ));
            }
        })
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameType::Top => f.write_str("top"),
            FrameType::Integer => f.write_str("int"),
            FrameType::Float => f.write_str("float"),
            FrameType::Long => f.write_str("long"),
            FrameType::Double => f.write_str("double"),
            FrameType::Null => f.write_str("null"),
            FrameType::UninitializedThis => f.write_str("uninitializedThis"),
            FrameType::Object(name) => f.write_str(name),
            FrameType::Uninitialized(label) => write!(f, "uninitialized({})", label.id),
        }
    }
}

/// Answers the one hierarchy question frame merging needs.
pub trait TypeHierarchy {
    fn common_superclass(&self, left: &str, right: &str) -> String;
}

/// Hierarchy that knows nothing beyond `java/lang/Object`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatHierarchy;

impl TypeHierarchy for FlatHierarchy {
    fn common_superclass(&self, left: &str, right: &str) -> String {
        if left == right {
            left.to_string()
        } else {
            constants::OBJECT.to_string()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameState {
    pub locals: Vec<FrameType>,
    pub stack: Vec<FrameType>,
}

impl FrameState {
    /// Frame on method entry: `this` (uninitialized in constructors) followed by the parameters.
    pub fn initial(
        class_name: &str,
        method_name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> Result<Self, InstrumentError> {
        let method_type = MethodType::parse(descriptor)?;
        let mut locals = Vec::new();
        if !is_static {
            if method_name == constants::CONSTRUCTOR_NAME {
                locals.push(FrameType::UninitializedThis);
            } else {
                locals.push(FrameType::Object(class_name.to_string()));
            }
        }
        for param in &method_type.params {
            let ty = FrameType::from_type(param)?;
            let wide = ty.is_wide();
            locals.push(ty);
            if wide {
                locals.push(FrameType::Top);
            }
        }
        Ok(Self {
            locals,
            stack: Vec::new(),
        })
    }

    pub fn stack_slots(&self) -> usize {
        self.stack
            .iter()
            .map(|value| if value.is_wide() { 2 } else { 1 })
            .sum()
    }

    pub fn store(&mut self, index: u16, value: FrameType) {
        let idx = index as usize;
        let wide = value.is_wide();
        let needed = if wide { idx + 2 } else { idx + 1 };
        if self.locals.len() < needed {
            self.locals.resize(needed, FrameType::Top);
        }
        // Overwriting the low half of a wide value invalidates it.
        if idx > 0 && self.locals[idx - 1].is_wide() {
            self.locals[idx - 1] = FrameType::Top;
        }
        self.locals[idx] = value;
        if wide {
            self.locals[idx + 1] = FrameType::Top;
        }
    }

    pub fn load(&self, index: u16) -> FrameType {
        self.locals
            .get(index as usize)
            .cloned()
            .unwrap_or(FrameType::Top)
    }

    fn pop(&mut self, at: &str) -> Result<FrameType, InstrumentError> {
        self.stack
            .pop()
            .ok_or_else(|| InstrumentError::StackUnderflow(at.to_string()))
    }

    fn pop_n(&mut self, count: usize, at: &str) -> Result<(), InstrumentError> {
        for _ in 0..count {
            self.pop(at)?;
        }
        Ok(())
    }

    /// Merges `other` into `self` the way the verifier joins two incoming edges.
    pub fn merge_from(&mut self, other: &FrameState, hierarchy: &dyn TypeHierarchy) {
        self.locals = merge_vec(&self.locals, &other.locals, hierarchy);
        if self.stack.len() == other.stack.len() {
            self.stack = merge_vec(&self.stack, &other.stack, hierarchy);
        }
    }

    /// Applies the effect of one instruction. `position` is the label placed
    /// immediately before it, used to tag the value produced by `NEW`.
    pub fn execute(
        &mut self,
        insn: &Insn,
        position: LabelNode,
        class_name: &str,
    ) -> Result<(), InstrumentError> {
        let opcode = insn.opcode();
        let at = format!("opcode 0x{opcode:02x}");
        match insn {
            Insn::Simple(_) => self.execute_simple(opcode, &at)?,
            Insn::Int(node) => match opcode {
                opcodes::NEWARRAY => {
                    self.pop(&at)?;
                    self.stack
                        .push(FrameType::Object(newarray_descriptor(node.operand as u8)?));
                }
                _ => self.stack.push(FrameType::Integer),
            },
            Insn::Var(node) => match opcode {
                opcodes::ILOAD..=opcodes::ALOAD => {
                    let fallback = match opcode {
                        opcodes::ILOAD => FrameType::Integer,
                        opcodes::LLOAD => FrameType::Long,
                        opcodes::FLOAD => FrameType::Float,
                        opcodes::DLOAD => FrameType::Double,
                        _ => FrameType::Object(constants::OBJECT.to_string()),
                    };
                    let value = match self.load(node.var_index) {
                        FrameType::Top => fallback,
                        value => value,
                    };
                    self.stack.push(value);
                }
                opcodes::ISTORE..=opcodes::ASTORE => {
                    let value = self.pop(&at)?;
                    self.store(node.var_index, value);
                }
                _ => return Err(InstrumentError::UnsupportedInstruction(opcode)),
            },
            Insn::Type(node) => match opcode {
                opcodes::NEW => self.stack.push(FrameType::Uninitialized(position)),
                opcodes::ANEWARRAY => {
                    self.pop(&at)?;
                    let element = if node.type_name.starts_with('[') {
                        node.type_name.clone()
                    } else {
                        format!("L{};", node.type_name)
                    };
                    self.stack.push(FrameType::Object(format!("[{element}")));
                }
                opcodes::CHECKCAST => {
                    self.pop(&at)?;
                    self.stack.push(FrameType::Object(node.type_name.clone()));
                }
                opcodes::INSTANCEOF => {
                    self.pop(&at)?;
                    self.stack.push(FrameType::Integer);
                }
                _ => return Err(InstrumentError::UnsupportedInstruction(opcode)),
            },
            Insn::Field(node) => {
                let ty = FrameType::from_type(&JvmType::from_descriptor(&node.descriptor)?)?;
                match opcode {
                    opcodes::GETSTATIC => self.stack.push(ty),
                    opcodes::PUTSTATIC => {
                        self.pop(&at)?;
                    }
                    opcodes::GETFIELD => {
                        self.pop(&at)?;
                        self.stack.push(ty);
                    }
                    _ => self.pop_n(2, &at)?,
                }
            }
            Insn::Method(node) => {
                let method_type = MethodType::parse(&node.descriptor)?;
                self.pop_n(method_type.params.len(), &at)?;
                if opcode != opcodes::INVOKESTATIC {
                    let receiver = self.pop(&at)?;
                    if node.name == constants::CONSTRUCTOR_NAME {
                        let owner = if receiver == FrameType::UninitializedThis {
                            class_name.to_string()
                        } else {
                            node.owner.clone()
                        };
                        self.initialize(&receiver, owner);
                    }
                }
                if method_type.ret != JvmType::Void {
                    self.stack.push(FrameType::from_type(&method_type.ret)?);
                }
            }
            Insn::InvokeDynamic(node) => {
                let method_type = MethodType::parse(&node.descriptor)?;
                self.pop_n(method_type.params.len(), &at)?;
                if method_type.ret != JvmType::Void {
                    self.stack.push(FrameType::from_type(&method_type.ret)?);
                }
            }
            Insn::Jump(_) => match opcode {
                opcodes::IFEQ..=opcodes::IFLE | opcodes::IFNULL | opcodes::IFNONNULL => {
                    self.pop(&at)?;
                }
                opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => self.pop_n(2, &at)?,
                opcodes::GOTO | opcodes::GOTO_W => {}
                _ => return Err(InstrumentError::UnsupportedInstruction(opcode)),
            },
            Insn::Ldc(node) => {
                let ty = match &node.value {
                    LdcConstant::Integer(_) => FrameType::Integer,
                    LdcConstant::Float(_) => FrameType::Float,
                    LdcConstant::Long(_) => FrameType::Long,
                    LdcConstant::Double(_) => FrameType::Double,
                    LdcConstant::String(_) => FrameType::Object(constants::STRING.to_string()),
                    LdcConstant::Class(_) => FrameType::Object(constants::CLASS.to_string()),
                    LdcConstant::MethodType(_) => {
                        FrameType::Object("java/lang/invoke/MethodType".to_string())
                    }
                    LdcConstant::MethodHandle { .. } => {
                        FrameType::Object("java/lang/invoke/MethodHandle".to_string())
                    }
                    LdcConstant::Dynamic { descriptor, .. } => {
                        FrameType::from_type(&JvmType::from_descriptor(descriptor)?)?
                    }
                };
                self.stack.push(ty);
            }
            Insn::Iinc(_) => {}
            Insn::TableSwitch(_) | Insn::LookupSwitch(_) => {
                self.pop(&at)?;
            }
            Insn::MultiANewArray(node) => {
                self.pop_n(node.dimensions as usize, &at)?;
                self.stack.push(FrameType::Object(node.type_name.clone()));
            }
        }
        Ok(())
    }

    fn execute_simple(&mut self, opcode: u8, at: &str) -> Result<(), InstrumentError> {
        match opcode {
            opcodes::NOP => {}
            opcodes::ACONST_NULL => self.stack.push(FrameType::Null),
            opcodes::ICONST_M1..=opcodes::ICONST_5 => self.stack.push(FrameType::Integer),
            opcodes::LCONST_0 | opcodes::LCONST_1 => self.stack.push(FrameType::Long),
            opcodes::FCONST_0..=opcodes::FCONST_2 => self.stack.push(FrameType::Float),
            opcodes::DCONST_0 | opcodes::DCONST_1 => self.stack.push(FrameType::Double),
            opcodes::ILOAD_0..=opcodes::ILOAD_3 => self.load_short(opcode - opcodes::ILOAD_0, FrameType::Integer),
            opcodes::LLOAD_0..=opcodes::LLOAD_3 => self.load_short(opcode - opcodes::LLOAD_0, FrameType::Long),
            opcodes::FLOAD_0..=opcodes::FLOAD_3 => self.load_short(opcode - opcodes::FLOAD_0, FrameType::Float),
            opcodes::DLOAD_0..=opcodes::DLOAD_3 => self.load_short(opcode - opcodes::DLOAD_0, FrameType::Double),
            opcodes::ALOAD_0..=opcodes::ALOAD_3 => self.load_short(
                opcode - opcodes::ALOAD_0,
                FrameType::Object(constants::OBJECT.to_string()),
            ),
            opcodes::IALOAD..=opcodes::SALOAD => {
                self.pop(at)?;
                let array_ref = self.pop(at)?;
                let ty = match opcode {
                    opcodes::IALOAD => FrameType::Integer,
                    opcodes::LALOAD => FrameType::Long,
                    opcodes::FALOAD => FrameType::Float,
                    opcodes::DALOAD => FrameType::Double,
                    opcodes::AALOAD => array_element_type(&array_ref)
                        .unwrap_or_else(|| FrameType::Object(constants::OBJECT.to_string())),
                    _ => FrameType::Integer,
                };
                self.stack.push(ty);
            }
            opcodes::ISTORE_0..=opcodes::ISTORE_3 => self.store_short(opcode - opcodes::ISTORE_0, at)?,
            opcodes::LSTORE_0..=opcodes::LSTORE_3 => self.store_short(opcode - opcodes::LSTORE_0, at)?,
            opcodes::FSTORE_0..=opcodes::FSTORE_3 => self.store_short(opcode - opcodes::FSTORE_0, at)?,
            opcodes::DSTORE_0..=opcodes::DSTORE_3 => self.store_short(opcode - opcodes::DSTORE_0, at)?,
            opcodes::ASTORE_0..=opcodes::ASTORE_3 => self.store_short(opcode - opcodes::ASTORE_0, at)?,
            opcodes::IASTORE..=opcodes::SASTORE => self.pop_n(3, at)?,
            opcodes::POP => {
                self.pop(at)?;
            }
            opcodes::POP2 => {
                let v1 = self.pop(at)?;
                if !v1.is_wide() {
                    self.pop(at)?;
                }
            }
            opcodes::DUP => {
                let v1 = self.pop(at)?;
                self.stack.push(v1.clone());
                self.stack.push(v1);
            }
            opcodes::DUP_X1 => {
                let v1 = self.pop(at)?;
                let v2 = self.pop(at)?;
                self.stack.extend([v1.clone(), v2, v1]);
            }
            opcodes::DUP_X2 => {
                let v1 = self.pop(at)?;
                let v2 = self.pop(at)?;
                if v2.is_wide() {
                    self.stack.extend([v1.clone(), v2, v1]);
                } else {
                    let v3 = self.pop(at)?;
                    self.stack.extend([v1.clone(), v3, v2, v1]);
                }
            }
            opcodes::DUP2 => {
                let v1 = self.pop(at)?;
                if v1.is_wide() {
                    self.stack.extend([v1.clone(), v1]);
                } else {
                    let v2 = self.pop(at)?;
                    self.stack.extend([v2.clone(), v1.clone(), v2, v1]);
                }
            }
            opcodes::DUP2_X1 => {
                let v1 = self.pop(at)?;
                if v1.is_wide() {
                    let v2 = self.pop(at)?;
                    self.stack.extend([v1.clone(), v2, v1]);
                } else {
                    let v2 = self.pop(at)?;
                    let v3 = self.pop(at)?;
                    self.stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
                }
            }
            opcodes::DUP2_X2 => {
                let v1 = self.pop(at)?;
                if v1.is_wide() {
                    let v2 = self.pop(at)?;
                    if v2.is_wide() {
                        self.stack.extend([v1.clone(), v2, v1]);
                    } else {
                        let v3 = self.pop(at)?;
                        self.stack.extend([v1.clone(), v3, v2, v1]);
                    }
                } else {
                    let v2 = self.pop(at)?;
                    let v3 = self.pop(at)?;
                    if v3.is_wide() {
                        self.stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
                    } else {
                        let v4 = self.pop(at)?;
                        self.stack.extend([v2.clone(), v1.clone(), v4, v3, v2, v1]);
                    }
                }
            }
            opcodes::SWAP => {
                let v1 = self.pop(at)?;
                let v2 = self.pop(at)?;
                self.stack.extend([v1, v2]);
            }
            opcodes::IADD..=opcodes::DREM => {
                self.pop_n(2, at)?;
                self.stack.push(arithmetic_result(opcode));
            }
            opcodes::INEG..=opcodes::DNEG => {
                self.pop(at)?;
                self.stack.push(arithmetic_result(opcode));
            }
            opcodes::ISHL..=opcodes::LXOR => {
                self.pop_n(2, at)?;
                self.stack.push(if opcode % 2 == 0 {
                    FrameType::Integer
                } else {
                    FrameType::Long
                });
            }
            opcodes::I2L..=opcodes::I2S => {
                self.pop(at)?;
                self.stack.push(match opcode {
                    opcodes::I2L | opcodes::F2L | opcodes::D2L => FrameType::Long,
                    opcodes::I2F | opcodes::L2F | opcodes::D2F => FrameType::Float,
                    opcodes::I2D | opcodes::L2D | opcodes::F2D => FrameType::Double,
                    _ => FrameType::Integer,
                });
            }
            opcodes::LCMP..=opcodes::DCMPG => {
                self.pop_n(2, at)?;
                self.stack.push(FrameType::Integer);
            }
            opcodes::IRETURN..=opcodes::ARETURN | opcodes::ATHROW => {
                self.pop(at)?;
            }
            opcodes::RETURN => {}
            opcodes::ARRAYLENGTH => {
                self.pop(at)?;
                self.stack.push(FrameType::Integer);
            }
            opcodes::MONITORENTER | opcodes::MONITOREXIT => {
                self.pop(at)?;
            }
            opcodes::BREAKPOINT | opcodes::IMPDEP1 | opcodes::IMPDEP2 => {}
            other => return Err(InstrumentError::UnsupportedInstruction(other)),
        }
        Ok(())
    }

    fn load_short(&mut self, index: u8, fallback: FrameType) {
        let value = match self.load(index as u16) {
            FrameType::Top => fallback,
            value => value,
        };
        self.stack.push(value);
    }

    fn store_short(&mut self, index: u8, at: &str) -> Result<(), InstrumentError> {
        let value = self.pop(at)?;
        self.store(index as u16, value);
        Ok(())
    }

    fn initialize(&mut self, receiver: &FrameType, owner: String) {
        let init = FrameType::Object(owner);
        for value in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if value == receiver {
                *value = init.clone();
            }
        }
    }
}

fn arithmetic_result(opcode: u8) -> FrameType {
    // IADD..DREM and INEG..DNEG cycle through int, long, float, double.
    match (opcode - opcodes::IADD) % 4 {
        0 => FrameType::Integer,
        1 => FrameType::Long,
        2 => FrameType::Float,
        _ => FrameType::Double,
    }
}

fn merge_vec(a: &[FrameType], b: &[FrameType], hierarchy: &dyn TypeHierarchy) -> Vec<FrameType> {
    let len = a.len().max(b.len());
    let mut merged = Vec::with_capacity(len);
    for i in 0..len {
        let left = a.get(i).cloned().unwrap_or(FrameType::Top);
        let right = b.get(i).cloned().unwrap_or(FrameType::Top);
        merged.push(merge_type(&left, &right, hierarchy));
    }
    while matches!(merged.last(), Some(FrameType::Top)) {
        merged.pop();
    }
    merged
}

pub fn merge_type(a: &FrameType, b: &FrameType, hierarchy: &dyn TypeHierarchy) -> FrameType {
    if a == b {
        return a.clone();
    }
    match (a, b) {
        (FrameType::Null, FrameType::Object(name)) | (FrameType::Object(name), FrameType::Null) => {
            FrameType::Object(name.clone())
        }
        (FrameType::Object(left), FrameType::Object(right)) => {
            if left.starts_with('[') || right.starts_with('[') {
                FrameType::Object(constants::OBJECT.to_string())
            } else {
                FrameType::Object(hierarchy.common_superclass(left, right))
            }
        }
        _ => FrameType::Top,
    }
}

/// Collapses slot-form locals into stack map form and trims trailing `Top`s.
pub fn compact_locals(locals: &[FrameType]) -> Vec<FrameType> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < locals.len() {
        let value = &locals[i];
        out.push(value.clone());
        if value.is_wide() {
            i += 1;
        }
        i += 1;
    }
    while matches!(out.last(), Some(FrameType::Top)) {
        out.pop();
    }
    out
}

/// Expands stack map form locals into one entry per slot.
pub fn expand_locals(locals: &[FrameType]) -> Vec<FrameType> {
    let mut out = Vec::with_capacity(locals.len());
    for value in locals {
        out.push(value.clone());
        if value.is_wide() {
            out.push(FrameType::Top);
        }
    }
    out
}

fn array_element_type(value: &FrameType) -> Option<FrameType> {
    let FrameType::Object(desc) = value else {
        return None;
    };
    let element = desc.strip_prefix('[')?;
    if element.starts_with('[') {
        return Some(FrameType::Object(element.to_string()));
    }
    match element.chars().next() {
        Some('L') => Some(FrameType::Object(
            element
                .trim_start_matches('L')
                .trim_end_matches(';')
                .to_string(),
        )),
        Some('Z') | Some('B') | Some('C') | Some('S') | Some('I') => Some(FrameType::Integer),
        Some('F') => Some(FrameType::Float),
        Some('J') => Some(FrameType::Long),
        Some('D') => Some(FrameType::Double),
        _ => None,
    }
}

fn newarray_descriptor(atype: u8) -> Result<String, InstrumentError> {
    let desc = match atype {
        opcodes::T_BOOLEAN => "[Z",
        opcodes::T_CHAR => "[C",
        opcodes::T_FLOAT => "[F",
        opcodes::T_DOUBLE => "[D",
        opcodes::T_BYTE => "[B",
        opcodes::T_SHORT => "[S",
        opcodes::T_INT => "[I",
        opcodes::T_LONG => "[J",
        _ => {
            return Err(InstrumentError::InvalidType(format!(
                "invalid newarray type {atype}"
            )));
        }
    };
    Ok(desc.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::{FieldInsnNode, InsnNode, MethodInsnNode, TypeInsnNode, VarInsnNode};

    fn simple(opcode: u8) -> Insn {
        Insn::Simple(InsnNode { opcode })
    }

    #[test]
    fn test_initial_frame_for_constructor() {
        let frame = FrameState::initial("a/B", "<init>", "(JI)V", false).unwrap();
        assert_eq!(
            frame.locals,
            vec![
                FrameType::UninitializedThis,
                FrameType::Long,
                FrameType::Top,
                FrameType::Integer
            ]
        );
    }

    #[test]
    fn test_super_call_initializes_this() {
        let mut frame = FrameState::initial("a/B", "<init>", "()V", false).unwrap();
        let here = LabelNode::at(0);
        frame.execute(&simple(opcodes::ALOAD_0), here, "a/B").unwrap();
        let init = Insn::Method(MethodInsnNode::new(
            opcodes::INVOKESPECIAL,
            "java/lang/Object",
            "<init>",
            "()V",
        ));
        frame.execute(&init, here, "a/B").unwrap();
        assert_eq!(frame.locals[0], FrameType::Object("a/B".to_string()));
        assert!(frame.stack.is_empty());
    }

    #[test]
    fn test_new_is_tagged_with_its_label() {
        let mut frame = FrameState::default();
        let new = Insn::Type(TypeInsnNode {
            insn: InsnNode {
                opcode: opcodes::NEW,
            },
            type_name: "a/C".to_string(),
        });
        frame.execute(&new, LabelNode::at(7), "a/B").unwrap();
        assert_eq!(frame.stack, vec![FrameType::Uninitialized(LabelNode::at(7))]);
    }

    #[test]
    fn test_wide_store_and_stack_slots() {
        let mut frame = FrameState::default();
        let here = LabelNode::at(0);
        frame.execute(&simple(opcodes::LCONST_1), here, "X").unwrap();
        assert_eq!(frame.stack_slots(), 2);
        let store = Insn::Var(VarInsnNode {
            insn: InsnNode {
                opcode: opcodes::LSTORE,
            },
            var_index: 2,
        });
        frame.execute(&store, here, "X").unwrap();
        assert_eq!(
            frame.locals,
            vec![FrameType::Top, FrameType::Top, FrameType::Long, FrameType::Top]
        );
        assert_eq!(compact_locals(&frame.locals), vec![
            FrameType::Top,
            FrameType::Top,
            FrameType::Long
        ]);
        assert_eq!(expand_locals(&compact_locals(&frame.locals)), frame.locals);
    }

    #[test]
    fn test_field_get_and_underflow() {
        let mut frame = FrameState::default();
        let get = Insn::Field(FieldInsnNode::new(
            opcodes::GETFIELD,
            "a/B",
            "count",
            "J",
        ));
        let err = frame.execute(&get, LabelNode::at(0), "a/B").unwrap_err();
        assert!(matches!(err, InstrumentError::StackUnderflow(_)));
    }

    #[test]
    fn test_merge_uses_hierarchy() {
        struct Fixed;
        impl TypeHierarchy for Fixed {
            fn common_superclass(&self, _: &str, _: &str) -> String {
                "a/Base".to_string()
            }
        }
        let left = FrameType::Object("a/Left".to_string());
        let right = FrameType::Object("a/Right".to_string());
        assert_eq!(
            merge_type(&left, &right, &Fixed),
            FrameType::Object("a/Base".to_string())
        );
        assert_eq!(merge_type(&left, &FrameType::Integer, &Fixed), FrameType::Top);
        assert_eq!(merge_type(&FrameType::Null, &left, &FlatHierarchy), left);
    }
}
