use std::collections::HashMap;

use crate::constants;
use crate::error::ClassReadError;
use crate::frame::{FrameState, FrameType, compact_locals};
use crate::insn::{
    FieldInsnNode, IincInsnNode, Insn, InsnNode, IntInsnNode, InvokeDynamicInsnNode,
    JumpInsnNode, LabelNode, LdcConstant, LdcInsnNode, LookupSwitchInsnNode, MethodInsnNode,
    MultiANewArrayInsnNode, TableSwitchInsnNode, TypeInsnNode, VarInsnNode,
};
use crate::opcodes;

/// Receives the events of one method body.
///
/// Every callback forwards to [`MethodVisitor::delegate`] by default, so a layer
/// only overrides the events it cares about and passes the rest down the chain.
pub trait MethodVisitor {
    /// The next visitor in the chain, if any.
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        None
    }

    fn visit_code(&mut self, max_stack: u16, max_locals: u16) {
        if let Some(next) = self.delegate() {
            next.visit_code(max_stack, max_locals);
        }
    }

    /// A verifier frame for the current position. Locals are in stack map form:
    /// a `long` or `double` is a single entry.
    fn visit_frame(&mut self, locals: &[FrameType], stack: &[FrameType]) {
        if let Some(next) = self.delegate() {
            next.visit_frame(locals, stack);
        }
    }

    fn visit_insn(&mut self, opcode: u8) {
        if let Some(next) = self.delegate() {
            next.visit_insn(opcode);
        }
    }

    fn visit_int_insn(&mut self, opcode: u8, operand: i32) {
        if let Some(next) = self.delegate() {
            next.visit_int_insn(opcode, operand);
        }
    }

    fn visit_var_insn(&mut self, opcode: u8, var_index: u16) {
        if let Some(next) = self.delegate() {
            next.visit_var_insn(opcode, var_index);
        }
    }

    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) {
        if let Some(next) = self.delegate() {
            next.visit_type_insn(opcode, type_name);
        }
    }

    fn visit_field_insn(&mut self, opcode: u8, owner: &str, name: &str, desc: &str) {
        if let Some(next) = self.delegate() {
            next.visit_field_insn(opcode, owner, name, desc);
        }
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        desc: &str,
        is_interface: bool,
    ) {
        if let Some(next) = self.delegate() {
            next.visit_method_insn(opcode, owner, name, desc, is_interface);
        }
    }

    fn visit_invoke_dynamic_insn(&mut self, bootstrap_index: u16, name: &str, desc: &str) {
        if let Some(next) = self.delegate() {
            next.visit_invoke_dynamic_insn(bootstrap_index, name, desc);
        }
    }

    fn visit_jump_insn(&mut self, opcode: u8, target: LabelNode) {
        if let Some(next) = self.delegate() {
            next.visit_jump_insn(opcode, target);
        }
    }

    fn visit_ldc_insn(&mut self, value: LdcConstant) {
        if let Some(next) = self.delegate() {
            next.visit_ldc_insn(value);
        }
    }

    fn visit_iinc_insn(&mut self, var_index: u16, increment: i16) {
        if let Some(next) = self.delegate() {
            next.visit_iinc_insn(var_index, increment);
        }
    }

    fn visit_table_switch(&mut self, low: i32, high: i32, default: LabelNode, targets: &[LabelNode]) {
        if let Some(next) = self.delegate() {
            next.visit_table_switch(low, high, default, targets);
        }
    }

    fn visit_lookup_switch(&mut self, default: LabelNode, pairs: &[(i32, LabelNode)]) {
        if let Some(next) = self.delegate() {
            next.visit_lookup_switch(default, pairs);
        }
    }

    fn visit_multi_anewarray_insn(&mut self, type_name: &str, dims: u8) {
        if let Some(next) = self.delegate() {
            next.visit_multi_anewarray_insn(type_name, dims);
        }
    }

    fn visit_label(&mut self, label: LabelNode) {
        if let Some(next) = self.delegate() {
            next.visit_label(label);
        }
    }

    fn visit_line_number(&mut self, line: u16, start: LabelNode) {
        if let Some(next) = self.delegate() {
            next.visit_line_number(line, start);
        }
    }

    fn visit_try_catch_block(
        &mut self,
        start: LabelNode,
        end: LabelNode,
        handler: LabelNode,
        catch_type: Option<&str>,
    ) {
        if let Some(next) = self.delegate() {
            next.visit_try_catch_block(start, end, handler, catch_type);
        }
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
        if let Some(next) = self.delegate() {
            next.visit_local_variable(name, desc, signature, start, end, index);
        }
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) {
        if let Some(next) = self.delegate() {
            next.visit_maxs(max_stack, max_locals);
        }
    }

    fn visit_end(&mut self) {
        if let Some(next) = self.delegate() {
            next.visit_end();
        }
    }
}

pub trait ClassVisitor {
    fn visit(
        &mut self,
        _major: u16,
        _minor: u16,
        _access_flags: u16,
        _name: &str,
        _super_name: Option<&str>,
        _interfaces: &[String],
    ) {
    }
    fn visit_source(&mut self, _source: &str) {}
    fn visit_field(&mut self, _access_flags: u16, _name: &str, _descriptor: &str) {}
    fn visit_method<'v>(
        &'v mut self,
        _access_flags: u16,
        _name: &str,
        _descriptor: &str,
    ) -> Option<Box<dyn MethodVisitor + 'v>> {
        None
    }
    fn visit_end(&mut self) {}
}

/// Parses a class file once and replays it into visitors.
pub struct ClassReader {
    class_file: ClassFile,
}

impl ClassReader {
    pub fn new(bytes: &[u8]) -> Result<Self, ClassReadError> {
        Ok(Self {
            class_file: read_class_file(bytes)?,
        })
    }

    pub fn class_file(&self) -> &ClassFile {
        &self.class_file
    }

    pub fn accept(&self, visitor: &mut dyn ClassVisitor) -> Result<(), ClassReadError> {
        let class_file = &self.class_file;
        let name = class_file.name()?.to_string();
        let super_name = class_file.super_name()?.map(str::to_string);
        let interfaces = class_file.interface_names()?;

        visitor.visit(
            class_file.major_version,
            class_file.minor_version,
            class_file.access_flags,
            &name,
            super_name.as_deref(),
            &interfaces,
        );

        if let Some(source) = class_file.source_file()? {
            visitor.visit_source(source);
        }

        for field in &class_file.fields {
            let field_name = class_file.cp_utf8(field.name_index)?;
            let field_desc = class_file.cp_utf8(field.descriptor_index)?;
            visitor.visit_field(field.access_flags, field_name, field_desc);
        }

        for method in &class_file.methods {
            let method_name = class_file.cp_utf8(method.name_index)?;
            let method_desc = class_file.cp_utf8(method.descriptor_index)?;
            if let Some(mut mv) = visitor.visit_method(method.access_flags, method_name, method_desc)
            {
                if let Some(code) = method.code(&class_file.constant_pool)? {
                    let is_static = method.access_flags & constants::ACC_STATIC != 0;
                    replay_code(
                        class_file,
                        &name,
                        method_name,
                        method_desc,
                        is_static,
                        &code,
                        &mut *mv,
                    )?;
                }
                mv.visit_end();
            }
        }

        visitor.visit_end();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CpInfo {
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
}

#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: Vec<CpInfo>,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    pub fn cp_utf8(&self, index: u16) -> Result<&str, ClassReadError> {
        cp_utf8(&self.constant_pool, index)
    }

    pub fn class_name(&self, index: u16) -> Result<&str, ClassReadError> {
        cp_class_name(&self.constant_pool, index)
    }

    pub fn name(&self) -> Result<&str, ClassReadError> {
        self.class_name(self.this_class)
    }

    pub fn super_name(&self) -> Result<Option<&str>, ClassReadError> {
        if self.super_class == 0 {
            Ok(None)
        } else {
            self.class_name(self.super_class).map(Some)
        }
    }

    pub fn interface_names(&self) -> Result<Vec<String>, ClassReadError> {
        self.interfaces
            .iter()
            .map(|index| self.class_name(*index).map(str::to_string))
            .collect()
    }

    pub fn source_file(&self) -> Result<Option<&str>, ClassReadError> {
        for attr in &self.attributes {
            if attr.name == constants::ATTR_SOURCE_FILE {
                let mut reader = ByteReader::new(&attr.info);
                return self.cp_utf8(reader.read_u2()?).map(Some);
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl MethodInfo {
    /// Decodes the `Code` attribute, if the method has one.
    pub fn code(&self, cp: &[CpInfo]) -> Result<Option<CodeAttribute>, ClassReadError> {
        self.attributes
            .iter()
            .find(|attr| attr.name == constants::ATTR_CODE)
            .map(|attr| CodeAttribute::parse(&attr.info, cp))
            .transpose()
    }
}

/// An attribute as it appears in the class file. The payload is kept verbatim
/// so attributes nobody rewrites are written back byte for byte.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInfo {
    pub name_index: u16,
    pub name: String,
    pub info: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    pub fn parse(info: &[u8], cp: &[CpInfo]) -> Result<Self, ClassReadError> {
        let mut reader = ByteReader::new(info);
        let max_stack = reader.read_u2()?;
        let max_locals = reader.read_u2()?;
        let code_length = reader.read_u4()? as usize;
        let code = reader.read_bytes(code_length)?;
        let exception_table_length = reader.read_u2()? as usize;
        let mut exception_table = Vec::with_capacity(exception_table_length);
        for _ in 0..exception_table_length {
            exception_table.push(ExceptionTableEntry {
                start_pc: reader.read_u2()?,
                end_pc: reader.read_u2()?,
                handler_pc: reader.read_u2()?,
                catch_type: reader.read_u2()?,
            });
        }
        let attributes = read_attributes(&mut reader, cp)?;
        if reader.remaining() != 0 {
            return Err(ClassReadError::InvalidAttribute(
                constants::ATTR_CODE.to_string(),
            ));
        }
        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    pub fn line_numbers(&self) -> Result<Vec<LineNumber>, ClassReadError> {
        let mut entries = Vec::new();
        for attr in self
            .attributes
            .iter()
            .filter(|attr| attr.name == constants::ATTR_LINE_NUMBER_TABLE)
        {
            let mut reader = ByteReader::new(&attr.info);
            let count = reader.read_u2()? as usize;
            for _ in 0..count {
                entries.push(LineNumber {
                    start_pc: reader.read_u2()?,
                    line_number: reader.read_u2()?,
                });
            }
        }
        Ok(entries)
    }

    pub fn local_variables(&self, name: &str) -> Result<Vec<LocalVariable>, ClassReadError> {
        let mut entries = Vec::new();
        for attr in self.attributes.iter().filter(|attr| attr.name == name) {
            let mut reader = ByteReader::new(&attr.info);
            let count = reader.read_u2()? as usize;
            for _ in 0..count {
                entries.push(LocalVariable {
                    start_pc: reader.read_u2()?,
                    length: reader.read_u2()?,
                    name_index: reader.read_u2()?,
                    descriptor_index: reader.read_u2()?,
                    index: reader.read_u2()?,
                });
            }
        }
        Ok(entries)
    }

    pub fn stack_map_table(&self) -> Result<Vec<StackMapFrame>, ClassReadError> {
        match self.attribute(constants::ATTR_STACK_MAP_TABLE) {
            Some(attr) => parse_stack_map_table(&attr.info),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line_number: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationTypeInfo {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object { cpool_index: u16 },
    Uninitialized { offset: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    SameFrame {
        offset_delta: u16,
    },
    SameLocals1StackItemFrame {
        offset_delta: u16,
        stack: VerificationTypeInfo,
    },
    SameLocals1StackItemFrameExtended {
        offset_delta: u16,
        stack: VerificationTypeInfo,
    },
    ChopFrame {
        offset_delta: u16,
        k: u8,
    },
    SameFrameExtended {
        offset_delta: u16,
    },
    AppendFrame {
        offset_delta: u16,
        locals: Vec<VerificationTypeInfo>,
    },
    FullFrame {
        offset_delta: u16,
        locals: Vec<VerificationTypeInfo>,
        stack: Vec<VerificationTypeInfo>,
    },
}

impl StackMapFrame {
    fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::SameFrame { offset_delta }
            | StackMapFrame::SameLocals1StackItemFrame { offset_delta, .. }
            | StackMapFrame::SameLocals1StackItemFrameExtended { offset_delta, .. }
            | StackMapFrame::ChopFrame { offset_delta, .. }
            | StackMapFrame::SameFrameExtended { offset_delta }
            | StackMapFrame::AppendFrame { offset_delta, .. }
            | StackMapFrame::FullFrame { offset_delta, .. } => *offset_delta,
        }
    }
}

pub fn read_class_file(bytes: &[u8]) -> Result<ClassFile, ClassReadError> {
    let mut reader = ByteReader::new(bytes);
    let magic = reader.read_u4()?;
    if magic != 0xCAFEBABE {
        return Err(ClassReadError::InvalidMagic(magic));
    }
    let minor_version = reader.read_u2()?;
    let major_version = reader.read_u2()?;
    let constant_pool = read_constant_pool(&mut reader)?;
    let access_flags = reader.read_u2()?;
    let this_class = reader.read_u2()?;
    let super_class = reader.read_u2()?;
    let interfaces = read_u2_table(&mut reader)?;
    let fields = read_fields(&mut reader, &constant_pool)?;
    let methods = read_methods(&mut reader, &constant_pool)?;
    let attributes = read_attributes(&mut reader, &constant_pool)?;

    Ok(ClassFile {
        minor_version,
        major_version,
        constant_pool,
        access_flags,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        attributes,
    })
}

fn read_constant_pool(reader: &mut ByteReader<'_>) -> Result<Vec<CpInfo>, ClassReadError> {
    let count = reader.read_u2()? as usize;
    let mut pool = Vec::with_capacity(count);
    pool.push(CpInfo::Unusable);

    let mut index = 1;
    while index < count {
        let tag = reader.read_u1()?;
        let entry = match tag {
            1 => {
                let len = reader.read_u2()? as usize;
                let bytes = reader.read_bytes(len)?;
                CpInfo::Utf8(decode_modified_utf8(&bytes)?)
            }
            3 => CpInfo::Integer(reader.read_u4()? as i32),
            4 => CpInfo::Float(f32::from_bits(reader.read_u4()?)),
            5 => CpInfo::Long(reader.read_u8()? as i64),
            6 => CpInfo::Double(f64::from_bits(reader.read_u8()?)),
            7 => CpInfo::Class {
                name_index: reader.read_u2()?,
            },
            8 => CpInfo::String {
                string_index: reader.read_u2()?,
            },
            9 => CpInfo::Fieldref {
                class_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            10 => CpInfo::Methodref {
                class_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            11 => CpInfo::InterfaceMethodref {
                class_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            12 => CpInfo::NameAndType {
                name_index: reader.read_u2()?,
                descriptor_index: reader.read_u2()?,
            },
            15 => CpInfo::MethodHandle {
                reference_kind: reader.read_u1()?,
                reference_index: reader.read_u2()?,
            },
            16 => CpInfo::MethodType {
                descriptor_index: reader.read_u2()?,
            },
            17 => CpInfo::Dynamic {
                bootstrap_method_attr_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            18 => CpInfo::InvokeDynamic {
                bootstrap_method_attr_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            19 => CpInfo::Module {
                name_index: reader.read_u2()?,
            },
            20 => CpInfo::Package {
                name_index: reader.read_u2()?,
            },
            _ => return Err(ClassReadError::InvalidConstantPoolTag(tag)),
        };

        pool.push(entry);

        if tag == 5 || tag == 6 {
            pool.push(CpInfo::Unusable);
            index += 2;
        } else {
            index += 1;
        }
    }

    Ok(pool)
}

fn read_u2_table(reader: &mut ByteReader<'_>) -> Result<Vec<u16>, ClassReadError> {
    let count = reader.read_u2()? as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(reader.read_u2()?);
    }
    Ok(values)
}

fn read_fields(
    reader: &mut ByteReader<'_>,
    cp: &[CpInfo],
) -> Result<Vec<FieldInfo>, ClassReadError> {
    let count = reader.read_u2()? as usize;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        fields.push(FieldInfo {
            access_flags: reader.read_u2()?,
            name_index: reader.read_u2()?,
            descriptor_index: reader.read_u2()?,
            attributes: read_attributes(reader, cp)?,
        });
    }
    Ok(fields)
}

fn read_methods(
    reader: &mut ByteReader<'_>,
    cp: &[CpInfo],
) -> Result<Vec<MethodInfo>, ClassReadError> {
    let count = reader.read_u2()? as usize;
    let mut methods = Vec::with_capacity(count);
    for _ in 0..count {
        methods.push(MethodInfo {
            access_flags: reader.read_u2()?,
            name_index: reader.read_u2()?,
            descriptor_index: reader.read_u2()?,
            attributes: read_attributes(reader, cp)?,
        });
    }
    Ok(methods)
}

fn read_attributes(
    reader: &mut ByteReader<'_>,
    cp: &[CpInfo],
) -> Result<Vec<AttributeInfo>, ClassReadError> {
    let count = reader.read_u2()? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        let name_index = reader.read_u2()?;
        let length = reader.read_u4()? as usize;
        let name = cp_utf8(cp, name_index)?.to_string();
        let info = reader.read_bytes(length)?;
        attributes.push(AttributeInfo {
            name_index,
            name,
            info,
        });
    }
    Ok(attributes)
}

fn parse_stack_map_table(info: &[u8]) -> Result<Vec<StackMapFrame>, ClassReadError> {
    let mut reader = ByteReader::new(info);
    let count = reader.read_u2()? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let frame_type = reader.read_u1()?;
        let frame = match frame_type {
            0..=63 => StackMapFrame::SameFrame {
                offset_delta: frame_type as u16,
            },
            64..=127 => StackMapFrame::SameLocals1StackItemFrame {
                offset_delta: (frame_type - 64) as u16,
                stack: parse_verification_type(&mut reader)?,
            },
            247 => StackMapFrame::SameLocals1StackItemFrameExtended {
                offset_delta: reader.read_u2()?,
                stack: parse_verification_type(&mut reader)?,
            },
            248..=250 => StackMapFrame::ChopFrame {
                offset_delta: reader.read_u2()?,
                k: 251 - frame_type,
            },
            251 => StackMapFrame::SameFrameExtended {
                offset_delta: reader.read_u2()?,
            },
            252..=254 => {
                let offset_delta = reader.read_u2()?;
                let locals_count = (frame_type - 251) as usize;
                let mut locals = Vec::with_capacity(locals_count);
                for _ in 0..locals_count {
                    locals.push(parse_verification_type(&mut reader)?);
                }
                StackMapFrame::AppendFrame {
                    offset_delta,
                    locals,
                }
            }
            255 => {
                let offset_delta = reader.read_u2()?;
                let locals_count = reader.read_u2()? as usize;
                let mut locals = Vec::with_capacity(locals_count);
                for _ in 0..locals_count {
                    locals.push(parse_verification_type(&mut reader)?);
                }
                let stack_count = reader.read_u2()? as usize;
                let mut stack = Vec::with_capacity(stack_count);
                for _ in 0..stack_count {
                    stack.push(parse_verification_type(&mut reader)?);
                }
                StackMapFrame::FullFrame {
                    offset_delta,
                    locals,
                    stack,
                }
            }
            _ => {
                return Err(ClassReadError::InvalidAttribute(
                    constants::ATTR_STACK_MAP_TABLE.to_string(),
                ));
            }
        };
        entries.push(frame);
    }
    Ok(entries)
}

fn parse_verification_type(
    reader: &mut ByteReader<'_>,
) -> Result<VerificationTypeInfo, ClassReadError> {
    let tag = reader.read_u1()?;
    let kind = match tag {
        0 => VerificationTypeInfo::Top,
        1 => VerificationTypeInfo::Integer,
        2 => VerificationTypeInfo::Float,
        3 => VerificationTypeInfo::Double,
        4 => VerificationTypeInfo::Long,
        5 => VerificationTypeInfo::Null,
        6 => VerificationTypeInfo::UninitializedThis,
        7 => VerificationTypeInfo::Object {
            cpool_index: reader.read_u2()?,
        },
        8 => VerificationTypeInfo::Uninitialized {
            offset: reader.read_u2()?,
        },
        _ => {
            return Err(ClassReadError::InvalidAttribute(
                constants::ATTR_STACK_MAP_TABLE.to_string(),
            ));
        }
    };
    Ok(kind)
}

fn to_frame_type(cp: &[CpInfo], value: &VerificationTypeInfo) -> Result<FrameType, ClassReadError> {
    Ok(match value {
        VerificationTypeInfo::Top => FrameType::Top,
        VerificationTypeInfo::Integer => FrameType::Integer,
        VerificationTypeInfo::Float => FrameType::Float,
        VerificationTypeInfo::Double => FrameType::Double,
        VerificationTypeInfo::Long => FrameType::Long,
        VerificationTypeInfo::Null => FrameType::Null,
        VerificationTypeInfo::UninitializedThis => FrameType::UninitializedThis,
        VerificationTypeInfo::Object { cpool_index } => {
            FrameType::Object(cp_class_name(cp, *cpool_index)?.to_string())
        }
        VerificationTypeInfo::Uninitialized { offset } => {
            FrameType::Uninitialized(LabelNode::at(*offset as usize))
        }
    })
}

/// Expands a stack map table into one full frame per offset. Locals stay in
/// stack map form.
fn expand_frames(
    cp: &[CpInfo],
    initial_locals: Vec<FrameType>,
    frames: &[StackMapFrame],
) -> Result<HashMap<usize, (Vec<FrameType>, Vec<FrameType>)>, ClassReadError> {
    let mut out = HashMap::with_capacity(frames.len());
    let mut locals = initial_locals;
    let mut offset: Option<usize> = None;
    for frame in frames {
        let delta = frame.offset_delta() as usize;
        let at = match offset {
            None => delta,
            Some(previous) => previous + delta + 1,
        };
        offset = Some(at);
        let stack = match frame {
            StackMapFrame::SameFrame { .. } | StackMapFrame::SameFrameExtended { .. } => Vec::new(),
            StackMapFrame::SameLocals1StackItemFrame { stack, .. }
            | StackMapFrame::SameLocals1StackItemFrameExtended { stack, .. } => {
                vec![to_frame_type(cp, stack)?]
            }
            StackMapFrame::ChopFrame { k, .. } => {
                let keep = locals.len().saturating_sub(*k as usize);
                locals.truncate(keep);
                Vec::new()
            }
            StackMapFrame::AppendFrame {
                locals: appended, ..
            } => {
                for value in appended {
                    locals.push(to_frame_type(cp, value)?);
                }
                Vec::new()
            }
            StackMapFrame::FullFrame {
                locals: full_locals,
                stack,
                ..
            } => {
                locals = full_locals
                    .iter()
                    .map(|value| to_frame_type(cp, value))
                    .collect::<Result<_, _>>()?;
                stack
                    .iter()
                    .map(|value| to_frame_type(cp, value))
                    .collect::<Result<_, _>>()?
            }
        };
        out.insert(at, (locals.clone(), stack));
    }
    Ok(out)
}

fn replay_code(
    class_file: &ClassFile,
    class_name: &str,
    method_name: &str,
    method_desc: &str,
    is_static: bool,
    code: &CodeAttribute,
    mv: &mut dyn MethodVisitor,
) -> Result<(), ClassReadError> {
    let cp = &class_file.constant_pool;
    let code_len = code.code.len();
    mv.visit_code(code.max_stack, code.max_locals);

    let instructions = decode_instructions(&code.code, cp)?;

    for entry in &code.exception_table {
        for pc in [entry.start_pc, entry.end_pc, entry.handler_pc] {
            if pc as usize > code_len {
                return Err(ClassReadError::InvalidBranchTarget {
                    offset: entry.start_pc as usize,
                    target: pc as i64,
                });
            }
        }
        let catch_type = if entry.catch_type == 0 {
            None
        } else {
            Some(cp_class_name(cp, entry.catch_type)?)
        };
        mv.visit_try_catch_block(
            LabelNode::at(entry.start_pc as usize),
            LabelNode::at(entry.end_pc as usize),
            LabelNode::at(entry.handler_pc as usize),
            catch_type,
        );
    }

    let mut lines: HashMap<usize, Vec<u16>> = HashMap::new();
    for entry in code.line_numbers()? {
        lines
            .entry(entry.start_pc as usize)
            .or_default()
            .push(entry.line_number);
    }

    let stack_map = code.stack_map_table()?;
    let frames = if stack_map.is_empty() {
        HashMap::new()
    } else {
        let initial = FrameState::initial(class_name, method_name, method_desc, is_static)
            .map_err(|_| ClassReadError::InvalidDescriptor(method_desc.to_string()))?;
        expand_frames(cp, compact_locals(&initial.locals), &stack_map)?
    };

    for (offset, insn) in &instructions {
        let label = LabelNode::at(*offset);
        mv.visit_label(label);
        if let Some(numbers) = lines.get(offset) {
            for line in numbers {
                mv.visit_line_number(*line, label);
            }
        }
        if let Some((locals, stack)) = frames.get(offset) {
            mv.visit_frame(locals, stack);
        }
        insn.accept(mv);
    }
    mv.visit_label(LabelNode::at(code_len));

    let signatures: HashMap<(u16, u16, u16), &str> = code
        .local_variables(constants::ATTR_LOCAL_VARIABLE_TYPE_TABLE)?
        .iter()
        .map(|entry| {
            cp_utf8(cp, entry.descriptor_index)
                .map(|signature| ((entry.start_pc, entry.length, entry.index), signature))
        })
        .collect::<Result<_, _>>()?;
    for entry in code.local_variables(constants::ATTR_LOCAL_VARIABLE_TABLE)? {
        let start = entry.start_pc as usize;
        let end = start + entry.length as usize;
        if end > code_len {
            continue;
        }
        let signature = signatures
            .get(&(entry.start_pc, entry.length, entry.index))
            .copied();
        mv.visit_local_variable(
            cp_utf8(cp, entry.name_index)?,
            cp_utf8(cp, entry.descriptor_index)?,
            signature,
            LabelNode::at(start),
            LabelNode::at(end),
            entry.index,
        );
    }

    mv.visit_maxs(code.max_stack, code.max_locals);
    Ok(())
}

pub(crate) fn cp_utf8(cp: &[CpInfo], index: u16) -> Result<&str, ClassReadError> {
    match cp.get(index as usize) {
        Some(CpInfo::Utf8(value)) => Ok(value.as_str()),
        _ => Err(ClassReadError::InvalidIndex(index)),
    }
}

pub(crate) fn cp_class_name(cp: &[CpInfo], index: u16) -> Result<&str, ClassReadError> {
    match cp.get(index as usize) {
        Some(CpInfo::Class { name_index }) => cp_utf8(cp, *name_index),
        _ => Err(ClassReadError::InvalidIndex(index)),
    }
}

fn cp_name_and_type(cp: &[CpInfo], index: u16) -> Result<(&str, &str), ClassReadError> {
    match cp.get(index as usize) {
        Some(CpInfo::NameAndType {
            name_index,
            descriptor_index,
        }) => Ok((cp_utf8(cp, *name_index)?, cp_utf8(cp, *descriptor_index)?)),
        _ => Err(ClassReadError::InvalidIndex(index)),
    }
}

fn cp_field_ref(cp: &[CpInfo], index: u16) -> Result<(&str, &str, &str), ClassReadError> {
    match cp.get(index as usize) {
        Some(CpInfo::Fieldref {
            class_index,
            name_and_type_index,
        }) => {
            let owner = cp_class_name(cp, *class_index)?;
            let (name, desc) = cp_name_and_type(cp, *name_and_type_index)?;
            Ok((owner, name, desc))
        }
        _ => Err(ClassReadError::InvalidIndex(index)),
    }
}

fn cp_method_ref(cp: &[CpInfo], index: u16) -> Result<(&str, &str, &str, bool), ClassReadError> {
    match cp.get(index as usize) {
        Some(CpInfo::Methodref {
            class_index,
            name_and_type_index,
        }) => {
            let owner = cp_class_name(cp, *class_index)?;
            let (name, desc) = cp_name_and_type(cp, *name_and_type_index)?;
            Ok((owner, name, desc, false))
        }
        Some(CpInfo::InterfaceMethodref {
            class_index,
            name_and_type_index,
        }) => {
            let owner = cp_class_name(cp, *class_index)?;
            let (name, desc) = cp_name_and_type(cp, *name_and_type_index)?;
            Ok((owner, name, desc, true))
        }
        _ => Err(ClassReadError::InvalidIndex(index)),
    }
}

fn cp_invoke_dynamic(cp: &[CpInfo], index: u16) -> Result<(u16, &str, &str), ClassReadError> {
    match cp.get(index as usize) {
        Some(CpInfo::InvokeDynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        }) => {
            let (name, desc) = cp_name_and_type(cp, *name_and_type_index)?;
            Ok((*bootstrap_method_attr_index, name, desc))
        }
        _ => Err(ClassReadError::InvalidIndex(index)),
    }
}

fn cp_ldc_constant(cp: &[CpInfo], index: u16) -> Result<LdcConstant, ClassReadError> {
    match cp.get(index as usize) {
        Some(CpInfo::Integer(value)) => Ok(LdcConstant::Integer(*value)),
        Some(CpInfo::Float(value)) => Ok(LdcConstant::Float(*value)),
        Some(CpInfo::Long(value)) => Ok(LdcConstant::Long(*value)),
        Some(CpInfo::Double(value)) => Ok(LdcConstant::Double(*value)),
        Some(CpInfo::String { string_index }) => {
            Ok(LdcConstant::String(cp_utf8(cp, *string_index)?.to_string()))
        }
        Some(CpInfo::Class { name_index }) => {
            Ok(LdcConstant::Class(cp_utf8(cp, *name_index)?.to_string()))
        }
        Some(CpInfo::MethodType { descriptor_index }) => Ok(LdcConstant::MethodType(
            cp_utf8(cp, *descriptor_index)?.to_string(),
        )),
        Some(CpInfo::MethodHandle { .. }) => Ok(LdcConstant::MethodHandle { index }),
        Some(CpInfo::Dynamic {
            name_and_type_index,
            ..
        }) => {
            let (_, descriptor) = cp_name_and_type(cp, *name_and_type_index)?;
            Ok(LdcConstant::Dynamic {
                index,
                descriptor: descriptor.to_string(),
            })
        }
        _ => Err(ClassReadError::InvalidIndex(index)),
    }
}

pub(crate) fn decode_modified_utf8(bytes: &[u8]) -> Result<String, ClassReadError> {
    let mut code_units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte & 0x80 == 0 {
            code_units.push(byte as u16);
            i += 1;
        } else if byte & 0xE0 == 0xC0 {
            if i + 1 >= bytes.len() {
                return Err(ClassReadError::Utf8Error("truncated 2-byte".to_string()));
            }
            let byte2 = bytes[i + 1];
            if byte2 & 0xC0 != 0x80 {
                return Err(ClassReadError::Utf8Error("invalid 2-byte".to_string()));
            }
            let value = (((byte & 0x1F) as u16) << 6) | ((byte2 & 0x3F) as u16);
            code_units.push(value);
            i += 2;
        } else if byte & 0xF0 == 0xE0 {
            if i + 2 >= bytes.len() {
                return Err(ClassReadError::Utf8Error("truncated 3-byte".to_string()));
            }
            let byte2 = bytes[i + 1];
            let byte3 = bytes[i + 2];
            if byte2 & 0xC0 != 0x80 || byte3 & 0xC0 != 0x80 {
                return Err(ClassReadError::Utf8Error("invalid 3-byte".to_string()));
            }
            let value = (((byte & 0x0F) as u16) << 12)
                | (((byte2 & 0x3F) as u16) << 6)
                | ((byte3 & 0x3F) as u16);
            code_units.push(value);
            i += 3;
        } else {
            return Err(ClassReadError::Utf8Error(
                "invalid leading byte".to_string(),
            ));
        }
    }

    String::from_utf16(&code_units)
        .map_err(|_| ClassReadError::Utf8Error("invalid utf16".to_string()))
}

/// Decodes a code array into instructions keyed by offset, with every branch
/// target turned into the label of its offset.
pub fn decode_instructions(
    code: &[u8],
    cp: &[CpInfo],
) -> Result<Vec<(usize, Insn)>, ClassReadError> {
    let mut reader = CodeReader::new(code);
    let mut insns = Vec::new();
    let code_len = code.len();
    let target = |offset: usize, relative: i32| -> Result<LabelNode, ClassReadError> {
        let absolute = offset as i64 + relative as i64;
        if absolute < 0 || absolute >= code_len as i64 {
            return Err(ClassReadError::InvalidBranchTarget {
                offset,
                target: absolute,
            });
        }
        Ok(LabelNode::at(absolute as usize))
    };

    while reader.remaining() > 0 {
        let offset = reader.pos();
        let opcode = reader.read_u1()?;
        let insn = match opcode {
            opcodes::NOP..=opcodes::DCONST_1 => Insn::Simple(opcode.into()),
            opcodes::BIPUSH => Insn::Int(IntInsnNode {
                insn: opcode.into(),
                operand: reader.read_i1()? as i32,
            }),
            opcodes::SIPUSH => Insn::Int(IntInsnNode {
                insn: opcode.into(),
                operand: reader.read_i2()? as i32,
            }),
            opcodes::LDC => Insn::Ldc(LdcInsnNode {
                insn: opcode.into(),
                value: cp_ldc_constant(cp, reader.read_u1()? as u16)?,
            }),
            opcodes::LDC_W | opcodes::LDC2_W => Insn::Ldc(LdcInsnNode {
                insn: opcode.into(),
                value: cp_ldc_constant(cp, reader.read_u2()?)?,
            }),
            opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
                Insn::Var(VarInsnNode {
                    insn: opcode.into(),
                    var_index: reader.read_u1()? as u16,
                })
            }
            opcodes::ILOAD_0..=opcodes::SALOAD | opcodes::ISTORE_0..=opcodes::LXOR => {
                Insn::Simple(opcode.into())
            }
            opcodes::IINC => Insn::Iinc(IincInsnNode {
                insn: opcode.into(),
                var_index: reader.read_u1()? as u16,
                increment: reader.read_i1()? as i16,
            }),
            opcodes::I2L..=opcodes::DCMPG => Insn::Simple(opcode.into()),
            opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
                Insn::Jump(JumpInsnNode {
                    insn: opcode.into(),
                    target: target(offset, reader.read_i2()? as i32)?,
                })
            }
            opcodes::GOTO_W | opcodes::JSR_W => Insn::Jump(JumpInsnNode {
                insn: opcode.into(),
                target: target(offset, reader.read_i4()?)?,
            }),
            opcodes::TABLESWITCH => {
                reader.align4(offset)?;
                let default = target(offset, reader.read_i4()?)?;
                let low = reader.read_i4()?;
                let high = reader.read_i4()?;
                let count = if high < low {
                    0
                } else {
                    (high as i64 - low as i64 + 1) as usize
                };
                let mut targets = Vec::with_capacity(count.min(reader.remaining() / 4));
                for _ in 0..count {
                    targets.push(target(offset, reader.read_i4()?)?);
                }
                Insn::TableSwitch(TableSwitchInsnNode {
                    insn: opcode.into(),
                    default,
                    low,
                    high,
                    targets,
                })
            }
            opcodes::LOOKUPSWITCH => {
                reader.align4(offset)?;
                let default = target(offset, reader.read_i4()?)?;
                let npairs = reader.read_i4()?.max(0) as usize;
                let mut pairs = Vec::with_capacity(npairs.min(reader.remaining() / 8));
                for _ in 0..npairs {
                    let key = reader.read_i4()?;
                    pairs.push((key, target(offset, reader.read_i4()?)?));
                }
                Insn::LookupSwitch(LookupSwitchInsnNode {
                    insn: opcode.into(),
                    default,
                    pairs,
                })
            }
            opcodes::IRETURN..=opcodes::RETURN => Insn::Simple(opcode.into()),
            opcodes::GETSTATIC..=opcodes::PUTFIELD => {
                let (owner, name, desc) = cp_field_ref(cp, reader.read_u2()?)?;
                Insn::Field(FieldInsnNode::new(opcode, owner, name, desc))
            }
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKESTATIC => {
                let (owner, name, desc, is_interface) = cp_method_ref(cp, reader.read_u2()?)?;
                let mut node = MethodInsnNode::new(opcode, owner, name, desc);
                node.is_interface = is_interface;
                Insn::Method(node)
            }
            opcodes::INVOKEINTERFACE => {
                let (owner, name, desc, _) = cp_method_ref(cp, reader.read_u2()?)?;
                let _count = reader.read_u1()?;
                let _zero = reader.read_u1()?;
                Insn::Method(MethodInsnNode::new(opcode, owner, name, desc))
            }
            opcodes::INVOKEDYNAMIC => {
                let (bootstrap_index, name, desc) = cp_invoke_dynamic(cp, reader.read_u2()?)?;
                let _zero = reader.read_u2()?;
                Insn::InvokeDynamic(InvokeDynamicInsnNode {
                    insn: opcode.into(),
                    bootstrap_index,
                    name: name.to_string(),
                    descriptor: desc.to_string(),
                })
            }
            opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
                Insn::Type(TypeInsnNode {
                    insn: opcode.into(),
                    type_name: cp_class_name(cp, reader.read_u2()?)?.to_string(),
                })
            }
            opcodes::NEWARRAY => Insn::Int(IntInsnNode {
                insn: opcode.into(),
                operand: reader.read_u1()? as i32,
            }),
            opcodes::ARRAYLENGTH | opcodes::ATHROW | opcodes::MONITORENTER | opcodes::MONITOREXIT => {
                Insn::Simple(opcode.into())
            }
            opcodes::WIDE => read_wide(&mut reader)?,
            opcodes::MULTIANEWARRAY => Insn::MultiANewArray(MultiANewArrayInsnNode {
                insn: opcode.into(),
                type_name: cp_class_name(cp, reader.read_u2()?)?.to_string(),
                dimensions: reader.read_u1()?,
            }),
            opcodes::BREAKPOINT | opcodes::IMPDEP1 | opcodes::IMPDEP2 => {
                Insn::Simple(opcode.into())
            }
            _ => return Err(ClassReadError::InvalidOpcode { opcode, offset }),
        };
        insns.push((offset, insn));
    }

    Ok(insns)
}

fn read_wide(reader: &mut CodeReader<'_>) -> Result<Insn, ClassReadError> {
    let opcode = reader.read_u1()?;
    match opcode {
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            Ok(Insn::Var(VarInsnNode {
                insn: InsnNode { opcode },
                var_index: reader.read_u2()?,
            }))
        }
        opcodes::IINC => Ok(Insn::Iinc(IincInsnNode {
            insn: InsnNode { opcode },
            var_index: reader.read_u2()?,
            increment: reader.read_i2()?,
        })),
        _ => Err(ClassReadError::InvalidOpcode {
            opcode,
            offset: reader.pos().saturating_sub(1),
        }),
    }
}

struct CodeReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> CodeReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn align4(&mut self, opcode_offset: usize) -> Result<(), ClassReadError> {
        let mut padding = (4 - ((opcode_offset + 1) % 4)) % 4;
        while padding > 0 {
            self.read_u1()?;
            padding -= 1;
        }
        Ok(())
    }

    fn read_u1(&mut self) -> Result<u8, ClassReadError> {
        if self.pos >= self.data.len() {
            return Err(ClassReadError::UnexpectedEof);
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn read_i1(&mut self) -> Result<i8, ClassReadError> {
        Ok(self.read_u1()? as i8)
    }

    fn read_u2(&mut self) -> Result<u16, ClassReadError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_i2(&mut self) -> Result<i16, ClassReadError> {
        Ok(self.read_u2()? as i16)
    }

    fn read_i4(&mut self) -> Result<i32, ClassReadError> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ClassReadError> {
        if self.pos + len > self.data.len() {
            return Err(ClassReadError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn read_u1(&mut self) -> Result<u8, ClassReadError> {
        if self.pos >= self.data.len() {
            return Err(ClassReadError::UnexpectedEof);
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn read_u2(&mut self) -> Result<u16, ClassReadError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u4(&mut self) -> Result<u32, ClassReadError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u8(&mut self) -> Result<u64, ClassReadError> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, ClassReadError> {
        if self.pos + len > self.data.len() {
            return Err(ClassReadError::UnexpectedEof);
        }
        let bytes = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_magic() {
        let err = read_class_file(&[0xCA, 0xFE, 0xBA, 0xBF, 0, 0, 0, 50]).unwrap_err();
        assert!(matches!(err, ClassReadError::InvalidMagic(0xCAFEBABF)));
        assert!(matches!(
            read_class_file(&[0xCA, 0xFE]),
            Err(ClassReadError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_decode_modified_utf8() {
        assert_eq!(decode_modified_utf8(b"abc").unwrap(), "abc");
        // U+0000 is encoded on two bytes.
        assert_eq!(decode_modified_utf8(&[0xC0, 0x80]).unwrap(), "\0");
        assert!(decode_modified_utf8(&[0xE0, 0x80]).is_err());
    }

    #[test]
    fn test_decode_branches_become_labels() {
        let cp = vec![CpInfo::Unusable];
        // 0: iconst_0; 1: ifeq +4 -> 5; 4: nop; 5: return
        let code = [
            opcodes::ICONST_0,
            opcodes::IFEQ,
            0x00,
            0x04,
            opcodes::NOP,
            opcodes::RETURN,
        ];
        let insns = decode_instructions(&code, &cp).unwrap();
        assert_eq!(insns.len(), 4);
        assert_eq!(insns[1].0, 1);
        assert_eq!(insns[1].1.targets(), vec![LabelNode::at(5)]);
    }

    #[test]
    fn test_decode_rejects_branch_outside_code() {
        let cp = vec![CpInfo::Unusable];
        let code = [opcodes::GOTO, 0x00, 0x10];
        let err = decode_instructions(&code, &cp).unwrap_err();
        assert!(matches!(
            err,
            ClassReadError::InvalidBranchTarget { offset: 0, target: 16 }
        ));
    }

    #[test]
    fn test_decode_wide_iinc() {
        let cp = vec![CpInfo::Unusable];
        let code = [opcodes::WIDE, opcodes::IINC, 0x01, 0x00, 0x03, 0xE8];
        let insns = decode_instructions(&code, &cp).unwrap();
        match &insns[0].1 {
            Insn::Iinc(node) => {
                assert_eq!(node.var_index, 256);
                assert_eq!(node.increment, 1000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_expand_frames_tracks_deltas() {
        let cp = vec![CpInfo::Unusable];
        let frames = vec![
            StackMapFrame::AppendFrame {
                offset_delta: 4,
                locals: vec![VerificationTypeInfo::Integer],
            },
            StackMapFrame::SameLocals1StackItemFrame {
                offset_delta: 2,
                stack: VerificationTypeInfo::Long,
            },
            StackMapFrame::ChopFrame {
                offset_delta: 0,
                k: 1,
            },
        ];
        let expanded = expand_frames(&cp, vec![FrameType::Float], &frames).unwrap();
        assert_eq!(
            expanded[&4],
            (vec![FrameType::Float, FrameType::Integer], vec![])
        );
        assert_eq!(
            expanded[&7],
            (
                vec![FrameType::Float, FrameType::Integer],
                vec![FrameType::Long]
            )
        );
        assert_eq!(expanded[&8], (vec![FrameType::Float], vec![]));
    }
}
