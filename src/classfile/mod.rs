//! Java class-file input.

pub mod bytecode;
pub mod parser;

use std::sync::Arc;

use crate::error::{FormatError, FormatResult};
use crate::model::{CodeRef, ConstValue, MemberRef, quote_string};
use crate::signature::{self, JavaType};

pub use parser::parse_class;

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Slot 0 and the upper slot of long/double entries.
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
}

#[derive(Debug, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    pub fn new(entries: Vec<Constant>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, idx: u16) -> FormatResult<&Constant> {
        match self.entries.get(usize::from(idx)) {
            Some(Constant::Unusable) | None => Err(FormatError::IndexOutOfRange {
                kind: "constant",
                index: usize::from(idx),
                len: self.entries.len(),
            }),
            Some(c) => Ok(c),
        }
    }

    pub fn utf8(&self, idx: u16) -> FormatResult<&str> {
        match self.get(idx)? {
            Constant::Utf8(s) => Ok(s.as_str()),
            other => Err(FormatError::Malformed(format!(
                "constant #{idx}: expected Utf8, found {other:?}"
            ))),
        }
    }

    /// Descriptor of a `Class` constant; array classes are already descriptors.
    pub fn class_descriptor(&self, idx: u16) -> FormatResult<String> {
        match self.get(idx)? {
            Constant::Class(name) => Ok(signature::internal_to_descriptor(self.utf8(*name)?)),
            other => Err(FormatError::Malformed(format!(
                "constant #{idx}: expected Class, found {other:?}"
            ))),
        }
    }

    pub fn name_and_type(&self, idx: u16) -> FormatResult<(&str, &str)> {
        match self.get(idx)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            other => Err(FormatError::Malformed(format!(
                "constant #{idx}: expected NameAndType, found {other:?}"
            ))),
        }
    }

    pub fn member_ref(&self, idx: u16) -> FormatResult<MemberRef> {
        match self.get(idx)? {
            Constant::FieldRef { class, name_and_type }
            | Constant::MethodRef { class, name_and_type }
            | Constant::InterfaceMethodRef { class, name_and_type } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(MemberRef {
                    owner: self.class_descriptor(*class)?,
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                })
            }
            other => Err(FormatError::Malformed(format!(
                "constant #{idx}: expected member reference, found {other:?}"
            ))),
        }
    }

    /// `ConstantValue` of a field, typed by the field descriptor.
    pub fn constant_value(&self, idx: u16, field: &JavaType) -> FormatResult<ConstValue> {
        let value = match (self.get(idx)?, field) {
            (Constant::Integer(v), JavaType::Boolean) => ConstValue::Bool(*v != 0),
            (Constant::Integer(v), JavaType::Byte) => ConstValue::Byte(*v as i8),
            (Constant::Integer(v), JavaType::Short) => ConstValue::Short(*v as i16),
            (Constant::Integer(v), JavaType::Char) => ConstValue::Char(*v as u16),
            (Constant::Integer(v), _) => ConstValue::Int(*v),
            (Constant::Long(v), _) => ConstValue::Long(*v),
            (Constant::Float(v), _) => ConstValue::Float(*v),
            (Constant::Double(v), _) => ConstValue::Double(*v),
            (Constant::String(s), _) => ConstValue::String(self.utf8(*s)?.to_string()),
            (other, _) => {
                return Err(FormatError::Malformed(format!(
                    "ConstantValue #{idx} is {other:?}"
                )));
            }
        };
        Ok(value)
    }

    /// Operand text for listings; unresolvable entries print as `#idx`.
    pub fn describe(&self, idx: u16) -> String {
        let text = match self.get(idx) {
            Ok(Constant::Utf8(s)) => Some(quote_string(s)),
            Ok(Constant::Integer(v)) => Some(v.to_string()),
            Ok(Constant::Float(v)) => Some(format!("{v:?}f")),
            Ok(Constant::Long(v)) => Some(format!("{v}L")),
            Ok(Constant::Double(v)) => Some(format!("{v:?}d")),
            Ok(Constant::Class(_)) => self.class_descriptor(idx).ok(),
            Ok(Constant::String(s)) => self.utf8(*s).ok().map(quote_string),
            Ok(Constant::FieldRef { .. }) => self.member_ref(idx).ok().map(|m| m.smali_field()),
            Ok(Constant::MethodRef { .. } | Constant::InterfaceMethodRef { .. }) => {
                self.member_ref(idx).ok().map(|m| m.smali_method())
            }
            Ok(Constant::MethodType(d)) => self.utf8(*d).ok().map(str::to_string),
            Ok(
                Constant::InvokeDynamic { name_and_type, bootstrap }
                | Constant::Dynamic { name_and_type, bootstrap },
            ) => self
                .name_and_type(*name_and_type)
                .ok()
                .map(|(name, desc)| format!("bootstrap#{bootstrap}:{name}{desc}")),
            _ => None,
        };
        text.unwrap_or_else(|| format!("#{idx}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start: u16,
    pub end: u16,
    pub handler: u16,
    /// Caught type descriptor, `None` for `finally` handlers.
    pub catch_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JvmCode {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub pool: Arc<ConstantPool>,
}

impl JvmCode {
    pub fn disassemble(&self) -> Vec<String> {
        bytecode::listing(self)
    }

    pub fn references(&self) -> Vec<CodeRef> {
        let mut refs = bytecode::references(&self.code, &self.pool);
        refs.extend(
            self.exception_table
                .iter()
                .filter_map(|e| e.catch_type.clone())
                .map(CodeRef::Type),
        );
        refs
    }
}
