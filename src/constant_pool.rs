use std::collections::HashMap;

use crate::class_reader::CpInfo;
use crate::error::ClassWriteError;

/// An append-only constant pool.
///
/// The pool can start from the table of an existing class: every original index
/// stays valid, and lookups for values already present return the original
/// index instead of adding a duplicate.
#[derive(Debug, Default, Clone)]
pub struct ConstantPool {
    cp: Vec<CpInfo>,
    utf8: HashMap<String, u16>,
    class: HashMap<String, u16>,
    string: HashMap<String, u16>,
    integer: HashMap<i32, u16>,
    float: HashMap<u32, u16>,
    long: HashMap<i64, u16>,
    double: HashMap<u64, u16>,
    name_and_type: HashMap<(String, String), u16>,
    field_ref: HashMap<(String, String, String), u16>,
    method_ref: HashMap<(String, String, String), u16>,
    interface_method_ref: HashMap<(String, String, String), u16>,
    method_type: HashMap<String, u16>,
    invoke_dynamic: HashMap<(u16, String, String), u16>,
}

impl ConstantPool {
    /// Creates an empty pool. Index 0 is reserved.
    pub fn new() -> Self {
        Self {
            cp: vec![CpInfo::Unusable],
            ..Default::default()
        }
    }

    /// Wraps an existing table, indexing its entries for de-duplication.
    pub fn from_entries(entries: Vec<CpInfo>) -> Self {
        let mut pool = Self {
            cp: entries,
            ..Default::default()
        };
        if pool.cp.is_empty() {
            pool.cp.push(CpInfo::Unusable);
        }
        for index in 1..pool.cp.len() {
            pool.index_entry(index as u16);
        }
        pool
    }

    pub fn entries(&self) -> &[CpInfo] {
        &self.cp
    }

    pub fn len(&self) -> usize {
        self.cp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cp.len() <= 1
    }

    fn index_entry(&mut self, index: u16) {
        let Some(entry) = self.cp.get(index as usize).cloned() else {
            return;
        };
        // First occurrence wins so lookups keep returning the lowest index.
        match entry {
            CpInfo::Utf8(value) => {
                self.utf8.entry(value).or_insert(index);
            }
            CpInfo::Integer(value) => {
                self.integer.entry(value).or_insert(index);
            }
            CpInfo::Float(value) => {
                self.float.entry(value.to_bits()).or_insert(index);
            }
            CpInfo::Long(value) => {
                self.long.entry(value).or_insert(index);
            }
            CpInfo::Double(value) => {
                self.double.entry(value.to_bits()).or_insert(index);
            }
            CpInfo::Class { name_index } => {
                if let Some(name) = self.utf8_at(name_index) {
                    self.class.entry(name).or_insert(index);
                }
            }
            CpInfo::String { string_index } => {
                if let Some(value) = self.utf8_at(string_index) {
                    self.string.entry(value).or_insert(index);
                }
            }
            CpInfo::NameAndType {
                name_index,
                descriptor_index,
            } => {
                if let (Some(name), Some(desc)) =
                    (self.utf8_at(name_index), self.utf8_at(descriptor_index))
                {
                    self.name_and_type.entry((name, desc)).or_insert(index);
                }
            }
            CpInfo::Fieldref {
                class_index,
                name_and_type_index,
            } => {
                if let Some(key) = self.member_key(class_index, name_and_type_index) {
                    self.field_ref.entry(key).or_insert(index);
                }
            }
            CpInfo::Methodref {
                class_index,
                name_and_type_index,
            } => {
                if let Some(key) = self.member_key(class_index, name_and_type_index) {
                    self.method_ref.entry(key).or_insert(index);
                }
            }
            CpInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => {
                if let Some(key) = self.member_key(class_index, name_and_type_index) {
                    self.interface_method_ref.entry(key).or_insert(index);
                }
            }
            CpInfo::MethodType { descriptor_index } => {
                if let Some(desc) = self.utf8_at(descriptor_index) {
                    self.method_type.entry(desc).or_insert(index);
                }
            }
            CpInfo::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                if let Some((name, desc)) = self.name_and_type_at(name_and_type_index) {
                    self.invoke_dynamic
                        .entry((bootstrap_method_attr_index, name, desc))
                        .or_insert(index);
                }
            }
            _ => {}
        }
    }

    fn utf8_at(&self, index: u16) -> Option<String> {
        match self.cp.get(index as usize) {
            Some(CpInfo::Utf8(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn name_and_type_at(&self, index: u16) -> Option<(String, String)> {
        match self.cp.get(index as usize) {
            Some(CpInfo::NameAndType {
                name_index,
                descriptor_index,
            }) => Some((self.utf8_at(*name_index)?, self.utf8_at(*descriptor_index)?)),
            _ => None,
        }
    }

    fn member_key(&self, class_index: u16, name_and_type_index: u16) -> Option<(String, String, String)> {
        let owner = match self.cp.get(class_index as usize) {
            Some(CpInfo::Class { name_index }) => self.utf8_at(*name_index)?,
            _ => return None,
        };
        let (name, desc) = self.name_and_type_at(name_and_type_index)?;
        Some((owner, name, desc))
    }

    pub fn utf8(&mut self, value: &str) -> Result<u16, ClassWriteError> {
        if let Some(index) = self.utf8.get(value) {
            return Ok(*index);
        }
        let index = self.push(CpInfo::Utf8(value.to_string()))?;
        self.utf8.insert(value.to_string(), index);
        Ok(index)
    }

    pub fn class(&mut self, name: &str) -> Result<u16, ClassWriteError> {
        if let Some(index) = self.class.get(name) {
            return Ok(*index);
        }
        let name_index = self.utf8(name)?;
        let index = self.push(CpInfo::Class { name_index })?;
        self.class.insert(name.to_string(), index);
        Ok(index)
    }

    pub fn string(&mut self, value: &str) -> Result<u16, ClassWriteError> {
        if let Some(index) = self.string.get(value) {
            return Ok(*index);
        }
        let string_index = self.utf8(value)?;
        let index = self.push(CpInfo::String { string_index })?;
        self.string.insert(value.to_string(), index);
        Ok(index)
    }

    pub fn integer(&mut self, value: i32) -> Result<u16, ClassWriteError> {
        if let Some(index) = self.integer.get(&value) {
            return Ok(*index);
        }
        let index = self.push(CpInfo::Integer(value))?;
        self.integer.insert(value, index);
        Ok(index)
    }

    pub fn float(&mut self, value: f32) -> Result<u16, ClassWriteError> {
        let bits = value.to_bits();
        if let Some(index) = self.float.get(&bits) {
            return Ok(*index);
        }
        let index = self.push(CpInfo::Float(value))?;
        self.float.insert(bits, index);
        Ok(index)
    }

    pub fn long(&mut self, value: i64) -> Result<u16, ClassWriteError> {
        if let Some(index) = self.long.get(&value) {
            return Ok(*index);
        }
        let index = self.push_wide(CpInfo::Long(value))?;
        self.long.insert(value, index);
        Ok(index)
    }

    pub fn double(&mut self, value: f64) -> Result<u16, ClassWriteError> {
        let bits = value.to_bits();
        if let Some(index) = self.double.get(&bits) {
            return Ok(*index);
        }
        let index = self.push_wide(CpInfo::Double(value))?;
        self.double.insert(bits, index);
        Ok(index)
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, ClassWriteError> {
        let key = (name.to_string(), descriptor.to_string());
        if let Some(index) = self.name_and_type.get(&key) {
            return Ok(*index);
        }
        let name_index = self.utf8(name)?;
        let descriptor_index = self.utf8(descriptor)?;
        let index = self.push(CpInfo::NameAndType {
            name_index,
            descriptor_index,
        })?;
        self.name_and_type.insert(key, index);
        Ok(index)
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16, ClassWriteError> {
        let key = (owner.to_string(), name.to_string(), descriptor.to_string());
        if let Some(index) = self.field_ref.get(&key) {
            return Ok(*index);
        }
        let class_index = self.class(owner)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        let index = self.push(CpInfo::Fieldref {
            class_index,
            name_and_type_index,
        })?;
        self.field_ref.insert(key, index);
        Ok(index)
    }

    pub fn method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<u16, ClassWriteError> {
        let key = (owner.to_string(), name.to_string(), descriptor.to_string());
        let cached = if is_interface {
            self.interface_method_ref.get(&key)
        } else {
            self.method_ref.get(&key)
        };
        if let Some(index) = cached {
            return Ok(*index);
        }
        let class_index = self.class(owner)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        let index = if is_interface {
            let index = self.push(CpInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            })?;
            self.interface_method_ref.insert(key, index);
            index
        } else {
            let index = self.push(CpInfo::Methodref {
                class_index,
                name_and_type_index,
            })?;
            self.method_ref.insert(key, index);
            index
        };
        Ok(index)
    }

    pub fn method_type(&mut self, descriptor: &str) -> Result<u16, ClassWriteError> {
        if let Some(index) = self.method_type.get(descriptor) {
            return Ok(*index);
        }
        let descriptor_index = self.utf8(descriptor)?;
        let index = self.push(CpInfo::MethodType { descriptor_index })?;
        self.method_type.insert(descriptor.to_string(), index);
        Ok(index)
    }

    pub fn invoke_dynamic(
        &mut self,
        bootstrap_index: u16,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ClassWriteError> {
        let key = (bootstrap_index, name.to_string(), descriptor.to_string());
        if let Some(index) = self.invoke_dynamic.get(&key) {
            return Ok(*index);
        }
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        let index = self.push(CpInfo::InvokeDynamic {
            bootstrap_method_attr_index: bootstrap_index,
            name_and_type_index,
        })?;
        self.invoke_dynamic.insert(key, index);
        Ok(index)
    }

    fn push(&mut self, entry: CpInfo) -> Result<u16, ClassWriteError> {
        let index = self.cp.len();
        if index > u16::MAX as usize - 1 {
            return Err(ClassWriteError::ConstantPoolOverflow);
        }
        self.cp.push(entry);
        Ok(index as u16)
    }

    fn push_wide(&mut self, entry: CpInfo) -> Result<u16, ClassWriteError> {
        let index = self.cp.len();
        if index > u16::MAX as usize - 2 {
            return Err(ClassWriteError::ConstantPoolOverflow);
        }
        self.cp.push(entry);
        self.cp.push(CpInfo::Unusable);
        Ok(index as u16)
    }
}

/// Encodes a string the way class files store it: NUL on two bytes and
/// supplementary characters as surrogate pairs.
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) as u8 & 0x1F));
                out.push(0x80 | (unit as u8 & 0x3F));
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) as u8 & 0x0F));
                out.push(0x80 | ((unit >> 6) as u8 & 0x3F));
                out.push(0x80 | (unit as u8 & 0x3F));
            }
        }
    }
    out
}
