pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_PROTECTED: u16 = 0x0004;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_SYNCHRONIZED: u16 = 0x0020;
pub const ACC_BRIDGE: u16 = 0x0040;
pub const ACC_VARARGS: u16 = 0x0080;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_SYNTHETIC: u16 = 0x1000;

pub const OBJECT: &str = "java/lang/Object";
pub const THROWABLE: &str = "java/lang/Throwable";
pub const STRING: &str = "java/lang/String";
pub const CLASS: &str = "java/lang/Class";

pub const CONSTRUCTOR_NAME: &str = "<init>";
pub const CLASS_INIT_NAME: &str = "<clinit>";

pub const ATTR_CODE: &str = "Code";
pub const ATTR_STACK_MAP_TABLE: &str = "StackMapTable";
pub const ATTR_LINE_NUMBER_TABLE: &str = "LineNumberTable";
pub const ATTR_LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
pub const ATTR_LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
pub const ATTR_SOURCE_FILE: &str = "SourceFile";

/// First class file major version whose verifier requires a StackMapTable (Java 6).
pub const V1_6: u16 = 50;
