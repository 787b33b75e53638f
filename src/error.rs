use crate::insn::LabelNode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("class read error")]
    ClassRead(#[from] ClassReadError),
    #[error("class write error")]
    ClassWrite(#[from] ClassWriteError),
    #[error("instrumentation of {class}.{method} failed")]
    Instrument {
        class: String,
        method: String,
        #[source]
        source: InstrumentError,
    },
    #[error("class resolution error")]
    Resolve(#[from] ResolveError),
    #[error("i/o error")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum ClassReadError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid magic 0x{0:08x}")]
    InvalidMagic(u32),
    #[error("invalid constant pool tag {0}")]
    InvalidConstantPoolTag(u8),
    #[error("invalid constant pool index {0}")]
    InvalidIndex(u16),
    #[error("invalid attribute {0}")]
    InvalidAttribute(String),
    #[error("invalid opcode 0x{opcode:02x} at {offset}")]
    InvalidOpcode {
        /// The opcode that caused the error.
        opcode: u8,
        /// Offset into the byte sequence where the error occurred.
        offset: usize,
    },
    #[error("branch at {offset} targets {target}, outside the code array")]
    InvalidBranchTarget { offset: usize, target: i64 },
    #[error("modified utf8 error: {0}")]
    Utf8Error(String),
    #[error("invalid descriptor {0:?}")]
    InvalidDescriptor(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassWriteError {
    #[error("constant pool exceeds 65535 entries")]
    ConstantPoolOverflow,
    #[error("invalid constant pool entry {0}")]
    InvalidConstantPool(u16),
    #[error("label {0:?} was never placed")]
    UnresolvedLabel(LabelNode),
    #[error("branch from {from} to {to} does not fit a 16-bit offset")]
    BranchOutOfRange { from: usize, to: usize },
    #[error("code length {0} exceeds 65535 bytes")]
    CodeTooLarge(usize),
    #[error("invalid descriptor {0:?}")]
    InvalidDescriptor(String),
    #[error("stack map frame at offset {offset} cannot be encoded: {reason}")]
    InvalidFrame { offset: usize, reason: String },
}

/// Failures raised while rewriting one method body.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InstrumentError {
    #[error("conflicting frame requests at {label:?}: {existing} vs {requested}")]
    FrameConflict {
        label: LabelNode,
        existing: String,
        requested: String,
    },
    #[error("method state is {state}, no further instrumentation accepted")]
    MethodClosed { state: &'static str },
    #[error("frame requested for {0:?}, which is not the current code position")]
    LabelNotPlaced(LabelNode),
    #[error("operand stack underflow at {0}")]
    StackUnderflow(String),
    #[error("unsupported instruction 0x{0:02x}")]
    UnsupportedInstruction(u8),
    #[error("invalid type: {0}")]
    InvalidType(String),
    #[error("local slot space exhausted")]
    TooManyLocals,
    #[error(transparent)]
    Write(#[from] ClassWriteError),
    #[error(transparent)]
    Read(#[from] ClassReadError),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("class {name} not found by loader {loader}")]
    NotFound { loader: String, name: String },
    #[error("class {name} could not be parsed")]
    Read {
        name: String,
        #[source]
        source: ClassReadError,
    },
}
