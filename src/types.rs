use std::fmt;

use crate::constants;
use crate::error::ClassReadError;
use crate::opcodes;

/// A JVM value type as written in field and method descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JvmType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Float,
    Long,
    Double,
    /// Internal class name, e.g. `java/lang/String`.
    Object(String),
    /// Full array descriptor, e.g. `[I` or `[Ljava/lang/String;`.
    Array(String),
    /// The type of `aconst_null`; only meaningful on the operand stack.
    Null,
    Void,
}

impl JvmType {
    pub fn object(internal_name: &str) -> Self {
        if internal_name.starts_with('[') {
            JvmType::Array(internal_name.to_string())
        } else {
            JvmType::Object(internal_name.to_string())
        }
    }

    pub fn throwable() -> Self {
        JvmType::Object(constants::THROWABLE.to_string())
    }

    pub fn from_descriptor(desc: &str) -> Result<Self, ClassReadError> {
        let mut chars = desc.chars().peekable();
        let ty = parse_return_type(&mut chars, desc)?;
        if chars.next().is_some() {
            return Err(ClassReadError::InvalidDescriptor(desc.to_string()));
        }
        Ok(ty)
    }

    /// Number of local-variable (and operand-stack) slots a value occupies.
    pub fn size(&self) -> u16 {
        match self {
            JvmType::Long | JvmType::Double => 2,
            JvmType::Void => 0,
            _ => 1,
        }
    }

    pub fn descriptor(&self) -> String {
        match self {
            JvmType::Boolean => "Z".to_string(),
            JvmType::Byte => "B".to_string(),
            JvmType::Char => "C".to_string(),
            JvmType::Short => "S".to_string(),
            JvmType::Int => "I".to_string(),
            JvmType::Float => "F".to_string(),
            JvmType::Long => "J".to_string(),
            JvmType::Double => "D".to_string(),
            JvmType::Object(name) => format!("L{name};"),
            JvmType::Array(desc) => desc.clone(),
            JvmType::Null => format!("L{};", constants::OBJECT),
            JvmType::Void => "V".to_string(),
        }
    }

    pub fn load_opcode(&self) -> u8 {
        match self {
            JvmType::Long => opcodes::LLOAD,
            JvmType::Float => opcodes::FLOAD,
            JvmType::Double => opcodes::DLOAD,
            JvmType::Object(_) | JvmType::Array(_) | JvmType::Null => opcodes::ALOAD,
            _ => opcodes::ILOAD,
        }
    }

    pub fn store_opcode(&self) -> u8 {
        match self {
            JvmType::Long => opcodes::LSTORE,
            JvmType::Float => opcodes::FSTORE,
            JvmType::Double => opcodes::DSTORE,
            JvmType::Object(_) | JvmType::Array(_) | JvmType::Null => opcodes::ASTORE,
            _ => opcodes::ISTORE,
        }
    }
}

impl fmt::Display for JvmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JvmType::Null => f.write_str("null"),
            other => f.write_str(&other.descriptor()),
        }
    }
}

/// Parameter and return types of a method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodType {
    pub params: Vec<JvmType>,
    pub ret: JvmType,
}

impl MethodType {
    pub fn parse(desc: &str) -> Result<Self, ClassReadError> {
        let mut chars = desc.chars().peekable();
        if chars.next() != Some('(') {
            return Err(ClassReadError::InvalidDescriptor(desc.to_string()));
        }
        let mut params = Vec::new();
        loop {
            match chars.peek() {
                Some(')') => {
                    chars.next();
                    break;
                }
                Some(_) => params.push(parse_field_type(&mut chars, desc)?),
                None => return Err(ClassReadError::InvalidDescriptor(desc.to_string())),
            }
        }
        let ret = parse_return_type(&mut chars, desc)?;
        if chars.next().is_some() {
            return Err(ClassReadError::InvalidDescriptor(desc.to_string()));
        }
        Ok(Self { params, ret })
    }

    /// Slots taken by the arguments, plus one for `this` on instance methods.
    pub fn argument_slots(&self, is_static: bool) -> u16 {
        let receiver = if is_static { 0 } else { 1 };
        self.params.iter().map(JvmType::size).sum::<u16>() + receiver
    }
}

fn parse_field_type<I>(
    chars: &mut std::iter::Peekable<I>,
    desc: &str,
) -> Result<JvmType, ClassReadError>
where
    I: Iterator<Item = char>,
{
    match chars.next() {
        Some('Z') => Ok(JvmType::Boolean),
        Some('B') => Ok(JvmType::Byte),
        Some('C') => Ok(JvmType::Char),
        Some('S') => Ok(JvmType::Short),
        Some('I') => Ok(JvmType::Int),
        Some('F') => Ok(JvmType::Float),
        Some('J') => Ok(JvmType::Long),
        Some('D') => Ok(JvmType::Double),
        Some('L') => {
            let mut name = String::new();
            for ch in chars.by_ref() {
                if ch == ';' {
                    return Ok(JvmType::Object(name));
                }
                name.push(ch);
            }
            Err(ClassReadError::InvalidDescriptor(desc.to_string()))
        }
        Some('[') => {
            let inner = parse_field_type(chars, desc)?;
            Ok(JvmType::Array(format!("[{}", inner.descriptor())))
        }
        _ => Err(ClassReadError::InvalidDescriptor(desc.to_string())),
    }
}

fn parse_return_type<I>(
    chars: &mut std::iter::Peekable<I>,
    desc: &str,
) -> Result<JvmType, ClassReadError>
where
    I: Iterator<Item = char>,
{
    match chars.peek() {
        Some('V') => {
            chars.next();
            Ok(JvmType::Void)
        }
        _ => parse_field_type(chars, desc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_descriptor() {
        let ty = MethodType::parse("(IJ[Ljava/lang/String;D)V").unwrap();
        assert_eq!(
            ty.params,
            vec![
                JvmType::Int,
                JvmType::Long,
                JvmType::Array("[Ljava/lang/String;".to_string()),
                JvmType::Double
            ]
        );
        assert_eq!(ty.ret, JvmType::Void);
        assert_eq!(ty.argument_slots(true), 6);
        assert_eq!(ty.argument_slots(false), 7);
    }

    #[test]
    fn test_wide_types_take_two_slots() {
        assert_eq!(JvmType::Long.size(), 2);
        assert_eq!(JvmType::Double.size(), 2);
        assert_eq!(JvmType::Object("a/B".to_string()).size(), 1);
        assert_eq!(JvmType::Long.store_opcode(), opcodes::LSTORE);
        assert_eq!(JvmType::object("[I").load_opcode(), opcodes::ALOAD);
    }

    #[test]
    fn test_rejects_malformed_descriptors() {
        assert!(MethodType::parse("I)V").is_err());
        assert!(MethodType::parse("(Ljava/lang/String").is_err());
        assert!(JvmType::from_descriptor("Q").is_err());
        assert!(JvmType::from_descriptor("II").is_err());
    }
}
