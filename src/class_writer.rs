use std::collections::HashMap;

use crate::class_reader::{
    AttributeInfo, ClassFile, CpInfo, ExceptionTableEntry, FieldInfo, MethodInfo, MethodVisitor,
};
use crate::constant_pool::{ConstantPool, encode_modified_utf8};
use crate::constants;
use crate::error::ClassWriteError;
use crate::frame::FrameType;
use crate::insn::{AbstractInsnNode, Insn, LabelNode, LdcConstant};
use crate::nodes::{FrameNode, LocalVariableNode, MethodBody, TryCatchBlockNode};
use crate::opcodes;
use crate::types::MethodType;

/// A code array with every label resolved to its offset.
#[derive(Debug, Clone, Default)]
pub struct AssembledCode {
    pub code: Vec<u8>,
    labels: HashMap<LabelNode, usize>,
    lines: Vec<(LabelNode, u16)>,
}

impl AssembledCode {
    pub fn offset_of(&self, label: LabelNode) -> Result<usize, ClassWriteError> {
        self.labels
            .get(&label)
            .copied()
            .ok_or(ClassWriteError::UnresolvedLabel(label))
    }
}

#[derive(Debug, Clone, Copy)]
struct JumpFixup {
    opcode_offset: usize,
    patch_at: usize,
    target: LabelNode,
    wide: bool,
}

/// Lays out instructions, interning their operands in `pool`, and patches
/// branch offsets once every label has a position.
pub fn assemble(
    nodes: &[AbstractInsnNode],
    pool: &mut ConstantPool,
) -> Result<AssembledCode, ClassWriteError> {
    let mut code = Vec::new();
    let mut labels = HashMap::new();
    let mut lines = Vec::new();
    let mut fixups = Vec::new();

    for node in nodes {
        match node {
            AbstractInsnNode::Label(label) => {
                labels.insert(*label, code.len());
            }
            AbstractInsnNode::LineNumber(line) => lines.push((line.start, line.line)),
            AbstractInsnNode::Insn(insn) => emit_insn(&mut code, insn, pool, &mut fixups)?,
        }
    }

    if code.len() > u16::MAX as usize {
        return Err(ClassWriteError::CodeTooLarge(code.len()));
    }

    for fixup in fixups {
        let target = *labels
            .get(&fixup.target)
            .ok_or(ClassWriteError::UnresolvedLabel(fixup.target))?;
        let delta = target as i64 - fixup.opcode_offset as i64;
        if fixup.wide {
            write_i4_at(&mut code, fixup.patch_at, delta as i32);
        } else {
            let delta = i16::try_from(delta).map_err(|_| ClassWriteError::BranchOutOfRange {
                from: fixup.opcode_offset,
                to: target,
            })?;
            write_i2_at(&mut code, fixup.patch_at, delta);
        }
    }

    Ok(AssembledCode {
        code,
        labels,
        lines,
    })
}

fn emit_insn(
    code: &mut Vec<u8>,
    insn: &Insn,
    cp: &mut ConstantPool,
    fixups: &mut Vec<JumpFixup>,
) -> Result<(), ClassWriteError> {
    let offset = code.len();
    match insn {
        Insn::Simple(node) => code.push(node.opcode),
        Insn::Int(node) => {
            code.push(node.insn.opcode);
            match node.insn.opcode {
                opcodes::SIPUSH => write_i2(code, node.operand as i16),
                opcodes::NEWARRAY => write_u1(code, node.operand as u8),
                _ => write_i1(code, node.operand as i8),
            }
        }
        Insn::Var(node) => {
            if node.var_index > u8::MAX as u16 {
                code.push(opcodes::WIDE);
                code.push(node.insn.opcode);
                write_u2(code, node.var_index);
            } else {
                code.push(node.insn.opcode);
                write_u1(code, node.var_index as u8);
            }
        }
        Insn::Type(node) => {
            code.push(node.insn.opcode);
            write_u2(code, cp.class(&node.type_name)?);
        }
        Insn::Field(node) => {
            code.push(node.insn.opcode);
            write_u2(code, cp.field_ref(&node.owner, &node.name, &node.descriptor)?);
        }
        Insn::Method(node) => {
            code.push(node.insn.opcode);
            let index = cp.method_ref(&node.owner, &node.name, &node.descriptor, node.is_interface)?;
            write_u2(code, index);
            if node.insn.opcode == opcodes::INVOKEINTERFACE {
                let method_type = MethodType::parse(&node.descriptor)
                    .map_err(|_| ClassWriteError::InvalidDescriptor(node.descriptor.clone()))?;
                write_u1(code, method_type.argument_slots(false) as u8);
                write_u1(code, 0);
            }
        }
        Insn::InvokeDynamic(node) => {
            code.push(opcodes::INVOKEDYNAMIC);
            write_u2(code, cp.invoke_dynamic(node.bootstrap_index, &node.name, &node.descriptor)?);
            write_u2(code, 0);
        }
        Insn::Jump(node) => {
            let wide = matches!(node.insn.opcode, opcodes::GOTO_W | opcodes::JSR_W);
            code.push(node.insn.opcode);
            fixups.push(JumpFixup {
                opcode_offset: offset,
                patch_at: code.len(),
                target: node.target,
                wide,
            });
            if wide {
                write_i4(code, 0);
            } else {
                write_i2(code, 0);
            }
        }
        Insn::Ldc(node) => {
            let index = ldc_index(&node.value, cp)?;
            if node.value.is_wide() {
                code.push(opcodes::LDC2_W);
                write_u2(code, index);
            } else if index <= u8::MAX as u16 {
                code.push(opcodes::LDC);
                write_u1(code, index as u8);
            } else {
                code.push(opcodes::LDC_W);
                write_u2(code, index);
            }
        }
        Insn::Iinc(node) => {
            if node.var_index > u8::MAX as u16 || i8::try_from(node.increment).is_err() {
                code.push(opcodes::WIDE);
                code.push(opcodes::IINC);
                write_u2(code, node.var_index);
                write_i2(code, node.increment);
            } else {
                code.push(opcodes::IINC);
                write_u1(code, node.var_index as u8);
                write_i1(code, node.increment as i8);
            }
        }
        Insn::TableSwitch(node) => {
            code.push(opcodes::TABLESWITCH);
            write_switch_padding(code, offset);
            push_switch_fixup(code, fixups, offset, node.default);
            write_i4(code, node.low);
            write_i4(code, node.high);
            for target in &node.targets {
                push_switch_fixup(code, fixups, offset, *target);
            }
        }
        Insn::LookupSwitch(node) => {
            code.push(opcodes::LOOKUPSWITCH);
            write_switch_padding(code, offset);
            push_switch_fixup(code, fixups, offset, node.default);
            write_i4(code, node.pairs.len() as i32);
            let mut pairs = node.pairs.clone();
            pairs.sort_by_key(|(key, _)| *key);
            for (key, target) in pairs {
                write_i4(code, key);
                push_switch_fixup(code, fixups, offset, target);
            }
        }
        Insn::MultiANewArray(node) => {
            code.push(opcodes::MULTIANEWARRAY);
            write_u2(code, cp.class(&node.type_name)?);
            write_u1(code, node.dimensions);
        }
    }
    Ok(())
}

fn push_switch_fixup(
    code: &mut Vec<u8>,
    fixups: &mut Vec<JumpFixup>,
    opcode_offset: usize,
    target: LabelNode,
) {
    fixups.push(JumpFixup {
        opcode_offset,
        patch_at: code.len(),
        target,
        wide: true,
    });
    write_i4(code, 0);
}

fn ldc_index(value: &LdcConstant, cp: &mut ConstantPool) -> Result<u16, ClassWriteError> {
    match value {
        LdcConstant::Integer(value) => cp.integer(*value),
        LdcConstant::Float(value) => cp.float(*value),
        LdcConstant::Long(value) => cp.long(*value),
        LdcConstant::Double(value) => cp.double(*value),
        LdcConstant::String(value) => cp.string(value),
        LdcConstant::Class(value) => cp.class(value),
        LdcConstant::MethodType(value) => cp.method_type(value),
        LdcConstant::MethodHandle { index } | LdcConstant::Dynamic { index, .. } => {
            match cp.entries().get(*index as usize) {
                Some(CpInfo::MethodHandle { .. }) | Some(CpInfo::Dynamic { .. }) => Ok(*index),
                _ => Err(ClassWriteError::InvalidConstantPool(*index)),
            }
        }
    }
}

/// Resolves try/catch blocks to table entries, in order. Ranges that collapsed
/// to nothing are dropped since the verifier rejects them.
pub fn resolve_handlers(
    assembled: &AssembledCode,
    blocks: &[TryCatchBlockNode],
    pool: &mut ConstantPool,
) -> Result<Vec<ExceptionTableEntry>, ClassWriteError> {
    let mut entries = Vec::with_capacity(blocks.len());
    for block in blocks {
        let start_pc = assembled.offset_of(block.start)?;
        let end_pc = assembled.offset_of(block.end)?;
        if end_pc <= start_pc {
            continue;
        }
        let catch_type = match &block.catch_type {
            Some(name) => pool.class(name)?,
            None => 0,
        };
        entries.push(ExceptionTableEntry {
            start_pc: start_pc as u16,
            end_pc: end_pc as u16,
            handler_pc: assembled.offset_of(block.handler)? as u16,
            catch_type,
        });
    }
    Ok(entries)
}

/// Serializes the payload of a `Code` attribute.
///
/// `frames` is `None` for class versions that predate stack map tables.
pub fn encode_code_attribute(
    assembled: &AssembledCode,
    max_stack: u16,
    max_locals: u16,
    exception_table: &[ExceptionTableEntry],
    frames: Option<&[FrameNode]>,
    local_variables: &[LocalVariableNode],
    pool: &mut ConstantPool,
) -> Result<Vec<u8>, ClassWriteError> {
    let mut out = Vec::new();
    write_u2(&mut out, max_stack);
    write_u2(&mut out, max_locals);
    write_u4(&mut out, assembled.code.len() as u32);
    out.extend_from_slice(&assembled.code);
    write_u2(&mut out, exception_table.len() as u16);
    for entry in exception_table {
        write_u2(&mut out, entry.start_pc);
        write_u2(&mut out, entry.end_pc);
        write_u2(&mut out, entry.handler_pc);
        write_u2(&mut out, entry.catch_type);
    }

    let mut attributes: Vec<(u16, Vec<u8>)> = Vec::new();

    if let Some(frames) = frames {
        let table = encode_stack_map_table(assembled, frames, pool)?;
        if let Some(table) = table {
            attributes.push((pool.utf8(constants::ATTR_STACK_MAP_TABLE)?, table));
        }
    }

    let code_len = assembled.code.len();
    let mut lines = Vec::new();
    for (label, line) in &assembled.lines {
        let start_pc = assembled.offset_of(*label)?;
        if start_pc < code_len {
            lines.push((start_pc as u16, *line));
        }
    }
    if !lines.is_empty() {
        let mut info = Vec::new();
        write_u2(&mut info, lines.len() as u16);
        for (start_pc, line) in lines {
            write_u2(&mut info, start_pc);
            write_u2(&mut info, line);
        }
        attributes.push((pool.utf8(constants::ATTR_LINE_NUMBER_TABLE)?, info));
    }

    let mut variables = Vec::new();
    let mut typed_variables = Vec::new();
    for variable in local_variables {
        let start = assembled.offset_of(variable.start)?;
        let end = assembled.offset_of(variable.end)?;
        if end < start {
            continue;
        }
        let name_index = pool.utf8(&variable.name)?;
        let descriptor_index = pool.utf8(&variable.descriptor)?;
        let entry = [
            start as u16,
            (end - start) as u16,
            name_index,
            descriptor_index,
            variable.index,
        ];
        variables.push(entry);
        if let Some(signature) = &variable.signature {
            let signature_index = pool.utf8(signature)?;
            typed_variables.push([entry[0], entry[1], name_index, signature_index, entry[4]]);
        }
    }
    for (name, entries) in [
        (constants::ATTR_LOCAL_VARIABLE_TABLE, variables),
        (constants::ATTR_LOCAL_VARIABLE_TYPE_TABLE, typed_variables),
    ] {
        if entries.is_empty() {
            continue;
        }
        let mut info = Vec::new();
        write_u2(&mut info, entries.len() as u16);
        for entry in entries {
            for value in entry {
                write_u2(&mut info, value);
            }
        }
        attributes.push((pool.utf8(name)?, info));
    }

    write_u2(&mut out, attributes.len() as u16);
    for (name_index, info) in attributes {
        write_attribute_with_info(&mut out, name_index, &info);
    }
    Ok(out)
}

/// Writes every frame as a full frame. Frames sharing an offset collapse to the
/// one recorded last.
fn encode_stack_map_table(
    assembled: &AssembledCode,
    frames: &[FrameNode],
    pool: &mut ConstantPool,
) -> Result<Option<Vec<u8>>, ClassWriteError> {
    let mut by_offset: Vec<(usize, &FrameNode)> = Vec::with_capacity(frames.len());
    for frame in frames {
        let offset = assembled.offset_of(frame.label)?;
        if offset >= assembled.code.len() {
            continue;
        }
        by_offset.push((offset, frame));
    }
    by_offset.sort_by_key(|(offset, _)| *offset);
    let mut deduped: Vec<(usize, &FrameNode)> = Vec::with_capacity(by_offset.len());
    for (offset, frame) in by_offset {
        match deduped.last_mut() {
            Some(last) if last.0 == offset => *last = (offset, frame),
            _ => deduped.push((offset, frame)),
        }
    }
    if deduped.is_empty() {
        return Ok(None);
    }

    let mut out = Vec::new();
    write_u2(&mut out, deduped.len() as u16);
    let mut previous: Option<usize> = None;
    for (offset, frame) in deduped {
        let delta = match previous {
            None => offset,
            Some(prev) => offset - prev - 1,
        };
        previous = Some(offset);
        write_u1(&mut out, 255);
        write_u2(&mut out, delta as u16);
        write_u2(&mut out, frame.locals.len() as u16);
        for value in &frame.locals {
            write_verification_type(&mut out, value, assembled, pool)?;
        }
        write_u2(&mut out, frame.stack.len() as u16);
        for value in &frame.stack {
            write_verification_type(&mut out, value, assembled, pool)?;
        }
    }
    Ok(Some(out))
}

fn write_verification_type(
    out: &mut Vec<u8>,
    value: &FrameType,
    assembled: &AssembledCode,
    pool: &mut ConstantPool,
) -> Result<(), ClassWriteError> {
    match value {
        FrameType::Top => write_u1(out, 0),
        FrameType::Integer => write_u1(out, 1),
        FrameType::Float => write_u1(out, 2),
        FrameType::Double => write_u1(out, 3),
        FrameType::Long => write_u1(out, 4),
        FrameType::Null => write_u1(out, 5),
        FrameType::UninitializedThis => write_u1(out, 6),
        FrameType::Object(name) => {
            write_u1(out, 7);
            write_u2(out, pool.class(name)?);
        }
        FrameType::Uninitialized(label) => {
            write_u1(out, 8);
            write_u2(out, assembled.offset_of(*label)? as u16);
        }
    }
    Ok(())
}

/// Builds the `Code` payload for a body whose handlers are already in final order.
pub fn build_code_attribute(
    body: &MethodBody,
    emit_frames: bool,
    pool: &mut ConstantPool,
) -> Result<Vec<u8>, ClassWriteError> {
    let assembled = assemble(body.nodes(), pool)?;
    let handlers = resolve_handlers(&assembled, &body.try_catch_blocks, pool)?;
    encode_code_attribute(
        &assembled,
        body.max_stack,
        body.max_locals,
        &handlers,
        emit_frames.then_some(body.frames.as_slice()),
        &body.local_variables,
        pool,
    )
}

/// Serializes `class`, substituting the `Code` payload of every method index in
/// `code_replacements`. All other attributes are written back verbatim.
pub fn write_class_file(
    class: &ClassFile,
    pool: &ConstantPool,
    code_replacements: &HashMap<usize, Vec<u8>>,
) -> Result<Vec<u8>, ClassWriteError> {
    let mut out = Vec::new();
    write_u4(&mut out, 0xCAFEBABE);
    write_u2(&mut out, class.minor_version);
    write_u2(&mut out, class.major_version);
    write_constant_pool(&mut out, pool.entries())?;
    write_u2(&mut out, class.access_flags);
    write_u2(&mut out, class.this_class);
    write_u2(&mut out, class.super_class);
    write_u2(&mut out, class.interfaces.len() as u16);
    for index in &class.interfaces {
        write_u2(&mut out, *index);
    }

    write_u2(&mut out, class.fields.len() as u16);
    for field in &class.fields {
        write_u2(&mut out, field.access_flags);
        write_u2(&mut out, field.name_index);
        write_u2(&mut out, field.descriptor_index);
        write_attributes(&mut out, &field.attributes, None);
    }

    write_u2(&mut out, class.methods.len() as u16);
    for (index, method) in class.methods.iter().enumerate() {
        write_u2(&mut out, method.access_flags);
        write_u2(&mut out, method.name_index);
        write_u2(&mut out, method.descriptor_index);
        write_attributes(
            &mut out,
            &method.attributes,
            code_replacements.get(&index).map(Vec::as_slice),
        );
    }

    write_attributes(&mut out, &class.attributes, None);
    Ok(out)
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[AttributeInfo], code: Option<&[u8]>) {
    write_u2(out, attributes.len() as u16);
    for attr in attributes {
        let info = match code {
            Some(code) if attr.name == constants::ATTR_CODE => code,
            _ => attr.info.as_slice(),
        };
        write_attribute_with_info(out, attr.name_index, info);
    }
}

fn write_attribute_with_info(out: &mut Vec<u8>, name_index: u16, info: &[u8]) {
    write_u2(out, name_index);
    write_u4(out, info.len() as u32);
    out.extend_from_slice(info);
}

fn write_constant_pool(out: &mut Vec<u8>, cp: &[CpInfo]) -> Result<(), ClassWriteError> {
    if cp.len() > u16::MAX as usize {
        return Err(ClassWriteError::ConstantPoolOverflow);
    }
    write_u2(out, cp.len() as u16);
    for entry in cp.iter().skip(1) {
        match entry {
            CpInfo::Unusable => {}
            CpInfo::Utf8(value) => {
                let bytes = encode_modified_utf8(value);
                if bytes.len() > u16::MAX as usize {
                    return Err(ClassWriteError::ConstantPoolOverflow);
                }
                write_u1(out, 1);
                write_u2(out, bytes.len() as u16);
                out.extend_from_slice(&bytes);
            }
            CpInfo::Integer(value) => {
                write_u1(out, 3);
                write_u4(out, *value as u32);
            }
            CpInfo::Float(value) => {
                write_u1(out, 4);
                write_u4(out, value.to_bits());
            }
            CpInfo::Long(value) => {
                write_u1(out, 5);
                write_u8(out, *value as u64);
            }
            CpInfo::Double(value) => {
                write_u1(out, 6);
                write_u8(out, value.to_bits());
            }
            CpInfo::Class { name_index } => {
                write_u1(out, 7);
                write_u2(out, *name_index);
            }
            CpInfo::String { string_index } => {
                write_u1(out, 8);
                write_u2(out, *string_index);
            }
            CpInfo::Fieldref {
                class_index,
                name_and_type_index,
            } => {
                write_u1(out, 9);
                write_u2(out, *class_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::Methodref {
                class_index,
                name_and_type_index,
            } => {
                write_u1(out, 10);
                write_u2(out, *class_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => {
                write_u1(out, 11);
                write_u2(out, *class_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::NameAndType {
                name_index,
                descriptor_index,
            } => {
                write_u1(out, 12);
                write_u2(out, *name_index);
                write_u2(out, *descriptor_index);
            }
            CpInfo::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                write_u1(out, 15);
                write_u1(out, *reference_kind);
                write_u2(out, *reference_index);
            }
            CpInfo::MethodType { descriptor_index } => {
                write_u1(out, 16);
                write_u2(out, *descriptor_index);
            }
            CpInfo::Dynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                write_u1(out, 17);
                write_u2(out, *bootstrap_method_attr_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                write_u1(out, 18);
                write_u2(out, *bootstrap_method_attr_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::Module { name_index } => {
                write_u1(out, 19);
                write_u2(out, *name_index);
            }
            CpInfo::Package { name_index } => {
                write_u1(out, 20);
                write_u2(out, *name_index);
            }
        }
    }
    Ok(())
}

/// Builds a class from scratch, mostly for generated helpers and test fixtures.
///
/// Frames are not computed: a method body that needs a `StackMapTable` supplies
/// its frames through [`MethodVisitor::visit_frame`].
#[derive(Debug)]
pub struct ClassWriter {
    pool: ConstantPool,
    major_version: u16,
    minor_version: u16,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
    attributes: Vec<AttributeInfo>,
    error: Option<ClassWriteError>,
}

impl Default for ClassWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassWriter {
    pub fn new() -> Self {
        Self {
            pool: ConstantPool::new(),
            major_version: constants::V1_6,
            minor_version: 0,
            access_flags: 0,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
            error: None,
        }
    }

    fn record<T>(&mut self, result: Result<T, ClassWriteError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.error.get_or_insert(err);
                None
            }
        }
    }

    pub fn visit(
        &mut self,
        major: u16,
        minor: u16,
        access_flags: u16,
        name: &str,
        super_name: Option<&str>,
        interfaces: &[&str],
    ) -> &mut Self {
        self.major_version = major;
        self.minor_version = minor;
        self.access_flags = access_flags;
        let this_class = self.pool.class(name);
        self.this_class = self.record(this_class).unwrap_or_default();
        if let Some(super_name) = super_name {
            let super_class = self.pool.class(super_name);
            self.super_class = self.record(super_class).unwrap_or_default();
        }
        for interface in interfaces {
            let index = self.pool.class(interface);
            if let Some(index) = self.record(index) {
                self.interfaces.push(index);
            }
        }
        self
    }

    pub fn visit_source_file(&mut self, name: &str) -> &mut Self {
        let indices = self
            .pool
            .utf8(constants::ATTR_SOURCE_FILE)
            .and_then(|name_index| Ok((name_index, self.pool.utf8(name)?)));
        if let Some((name_index, source_index)) = self.record(indices) {
            self.attributes.push(AttributeInfo {
                name_index,
                name: constants::ATTR_SOURCE_FILE.to_string(),
                info: source_index.to_be_bytes().to_vec(),
            });
        }
        self
    }

    pub fn visit_field(&mut self, access_flags: u16, name: &str, descriptor: &str) -> &mut Self {
        let indices = self
            .pool
            .utf8(name)
            .and_then(|name_index| Ok((name_index, self.pool.utf8(descriptor)?)));
        if let Some((name_index, descriptor_index)) = self.record(indices) {
            self.fields.push(FieldInfo {
                access_flags,
                name_index,
                descriptor_index,
                attributes: Vec::new(),
            });
        }
        self
    }

    pub fn visit_method(&mut self, access_flags: u16, name: &str, descriptor: &str) -> MethodWriter {
        MethodWriter {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            body: MethodBody::new(),
            has_code: false,
        }
    }

    pub fn to_bytes(mut self) -> Result<Vec<u8>, ClassWriteError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        let class = ClassFile {
            minor_version: self.minor_version,
            major_version: self.major_version,
            constant_pool: Vec::new(),
            access_flags: self.access_flags,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: self.interfaces,
            fields: self.fields,
            methods: self.methods,
            attributes: self.attributes,
        };
        write_class_file(&class, &self.pool, &HashMap::new())
    }
}

/// Collects one method's events for a [`ClassWriter`].
#[derive(Debug)]
pub struct MethodWriter {
    access_flags: u16,
    name: String,
    descriptor: String,
    body: MethodBody,
    has_code: bool,
}

impl MethodWriter {
    /// Assembles the method and adds it to `cw`.
    pub fn finish(self, cw: &mut ClassWriter) {
        let emit_frames = cw.major_version >= constants::V1_6;
        let pool = &mut cw.pool;
        let result = (|| -> Result<MethodInfo, ClassWriteError> {
            let name_index = pool.utf8(&self.name)?;
            let descriptor_index = pool.utf8(&self.descriptor)?;
            let mut attributes = Vec::new();
            if self.has_code {
                let info = build_code_attribute(&self.body, emit_frames, pool)?;
                attributes.push(AttributeInfo {
                    name_index: pool.utf8(constants::ATTR_CODE)?,
                    name: constants::ATTR_CODE.to_string(),
                    info,
                });
            }
            Ok(MethodInfo {
                access_flags: self.access_flags,
                name_index,
                descriptor_index,
                attributes,
            })
        })();
        if let Some(method) = cw.record(result) {
            cw.methods.push(method);
        }
    }
}

impl MethodVisitor for MethodWriter {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        Some(&mut self.body)
    }

    fn visit_code(&mut self, max_stack: u16, max_locals: u16) {
        self.has_code = true;
        self.body.max_stack = max_stack;
        self.body.max_locals = max_locals;
    }
}

fn write_u1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

fn write_u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_u4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_u8(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_i1(out: &mut Vec<u8>, value: i8) {
    out.push(value as u8);
}

fn write_i2(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_i4(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_i2_at(out: &mut [u8], pos: usize, value: i16) {
    out[pos..pos + 2].copy_from_slice(&value.to_be_bytes());
}

fn write_i4_at(out: &mut [u8], pos: usize, value: i32) {
    out[pos..pos + 4].copy_from_slice(&value.to_be_bytes());
}

fn write_switch_padding(out: &mut Vec<u8>, opcode_offset: usize) {
    let mut padding = (4 - ((opcode_offset + 1) % 4)) % 4;
    while padding > 0 {
        out.push(0);
        padding -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_reader::{ClassReader, decode_instructions};
    use crate::insn::{InsnList, JumpInsnNode, LdcInsnNode, VarInsnNode};

    #[test]
    fn test_basic_class_generation() {
        let mut cw = ClassWriter::new();
        cw.visit(52, 0, 0x0001, "TestClass", Some("java/lang/Object"), &[]);
        cw.visit_source_file("TestClass.java");
        cw.visit_field(0x0002, "myField", "I");

        let mut mv = cw.visit_method(0x0001, "<init>", "()V");
        mv.visit_code(1, 1);
        mv.visit_var_insn(opcodes::ALOAD, 0);
        mv.visit_method_insn(
            opcodes::INVOKESPECIAL,
            "java/lang/Object",
            "<init>",
            "()V",
            false,
        );
        mv.visit_insn(opcodes::RETURN);
        mv.visit_maxs(1, 1);
        mv.finish(&mut cw);

        let bytes = cw.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);

        let reader = ClassReader::new(&bytes).unwrap();
        let class = reader.class_file();
        assert_eq!(class.name().unwrap(), "TestClass");
        assert_eq!(class.source_file().unwrap(), Some("TestClass.java"));
        assert_eq!(class.fields.len(), 1);
        let code = class.methods[0].code(&class.constant_pool).unwrap().unwrap();
        assert_eq!(code.code.len(), 6);
        assert_eq!(&code.code[..3], &[opcodes::ALOAD, 0, opcodes::INVOKESPECIAL]);
        assert_eq!(code.code[5], opcodes::RETURN);
        assert_eq!(code.max_stack, 1);
    }

    #[test]
    fn test_backward_and_forward_branches() {
        let mut pool = ConstantPool::new();
        let top = LabelNode::at(100);
        let out = LabelNode::at(101);
        let mut list = InsnList::new();
        list.add(top)
            .add(VarInsnNode {
                insn: opcodes::ILOAD.into(),
                var_index: 0,
            })
            .add(JumpInsnNode {
                insn: opcodes::IFEQ.into(),
                target: out,
            })
            .add(JumpInsnNode {
                insn: opcodes::GOTO.into(),
                target: top,
            })
            .add(out)
            .add(crate::insn::InsnNode::from(opcodes::RETURN));
        let assembled = assemble(list.nodes(), &mut pool).unwrap();
        // iload 0 (2) ; ifeq +5 (3) ; goto -5 (3) ; return
        assert_eq!(
            assembled.code,
            vec![opcodes::ILOAD, 0, opcodes::IFEQ, 0, 6, opcodes::GOTO, 0xFF, 0xFB, opcodes::RETURN]
        );
        assert_eq!(assembled.offset_of(out).unwrap(), 8);
        let decoded = decode_instructions(&assembled.code, pool.entries()).unwrap();
        assert_eq!(decoded[1].1.targets(), vec![LabelNode::at(8)]);
        assert_eq!(decoded[2].1.targets(), vec![LabelNode::at(0)]);
    }

    #[test]
    fn test_unplaced_label_is_an_error() {
        let mut pool = ConstantPool::new();
        let mut list = InsnList::new();
        list.add(JumpInsnNode {
            insn: opcodes::GOTO.into(),
            target: LabelNode::at(9),
        });
        let err = assemble(list.nodes(), &mut pool).unwrap_err();
        assert!(matches!(err, ClassWriteError::UnresolvedLabel(label) if label.id == 9));
    }

    #[test]
    fn test_wide_forms_for_large_slots() {
        let mut pool = ConstantPool::new();
        let mut list = InsnList::new();
        list.add(VarInsnNode {
            insn: opcodes::ASTORE.into(),
            var_index: 300,
        })
        .add(crate::insn::IincInsnNode {
            insn: opcodes::IINC.into(),
            var_index: 1,
            increment: 200,
        });
        let assembled = assemble(list.nodes(), &mut pool).unwrap();
        assert_eq!(
            assembled.code,
            vec![
                opcodes::WIDE,
                opcodes::ASTORE,
                0x01,
                0x2C,
                opcodes::WIDE,
                opcodes::IINC,
                0x00,
                0x01,
                0x00,
                0xC8
            ]
        );
    }

    #[test]
    fn test_ldc_switches_to_wide_index() {
        let mut pool = ConstantPool::new();
        for i in 0..300 {
            pool.integer(i).unwrap();
        }
        let mut list = InsnList::new();
        list.add(LdcInsnNode::string("late"));
        let assembled = assemble(list.nodes(), &mut pool).unwrap();
        assert_eq!(assembled.code[0], opcodes::LDC_W);
    }
}
