//! In-memory class model shared by the DEX and class-file inputs.
//!
//! Descriptors are kept in JVM form (`Lcom/example/Foo;`), names are exposed in
//! Java form (`com.example.Foo`). Method and field display strings double as
//! lookup keys, so they must match what `signature` produces for client input.

use crate::classfile::JvmCode;
use crate::dex::DexCode;
use crate::error::FormatResult;
use crate::signature::{self, JavaType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct AccessFlags(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagTarget {
    Class,
    Field,
    Method,
}

impl AccessFlags {
    pub const PUBLIC: u32 = 0x1;
    pub const PRIVATE: u32 = 0x2;
    pub const PROTECTED: u32 = 0x4;
    pub const STATIC: u32 = 0x8;
    pub const FINAL: u32 = 0x10;
    pub const SYNCHRONIZED: u32 = 0x20;
    pub const VOLATILE: u32 = 0x40;
    pub const BRIDGE: u32 = 0x40;
    pub const TRANSIENT: u32 = 0x80;
    pub const VARARGS: u32 = 0x80;
    pub const NATIVE: u32 = 0x100;
    pub const INTERFACE: u32 = 0x200;
    pub const ABSTRACT: u32 = 0x400;
    pub const STRICT: u32 = 0x800;
    pub const SYNTHETIC: u32 = 0x1000;
    pub const ANNOTATION: u32 = 0x2000;
    pub const ENUM: u32 = 0x4000;
    pub const CONSTRUCTOR: u32 = 0x10000;
    pub const DECLARED_SYNCHRONIZED: u32 = 0x20000;

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Modifiers in Java source order.
    pub fn java_modifiers(self, target: FlagTarget) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.contains(Self::PUBLIC) {
            out.push("public");
        } else if self.contains(Self::PROTECTED) {
            out.push("protected");
        } else if self.contains(Self::PRIVATE) {
            out.push("private");
        }

        match target {
            FlagTarget::Class => {
                let interface = self.contains(Self::INTERFACE);
                if self.contains(Self::ABSTRACT) && !interface {
                    out.push("abstract");
                }
                if self.contains(Self::STATIC) {
                    out.push("static");
                }
                if self.contains(Self::FINAL) && !interface && !self.contains(Self::ENUM) {
                    out.push("final");
                }
            }
            FlagTarget::Field => {
                if self.contains(Self::STATIC) {
                    out.push("static");
                }
                if self.contains(Self::FINAL) {
                    out.push("final");
                }
                if self.contains(Self::TRANSIENT) {
                    out.push("transient");
                }
                if self.contains(Self::VOLATILE) {
                    out.push("volatile");
                }
            }
            FlagTarget::Method => {
                if self.contains(Self::ABSTRACT) {
                    out.push("abstract");
                }
                if self.contains(Self::STATIC) {
                    out.push("static");
                }
                if self.contains(Self::FINAL) {
                    out.push("final");
                }
                if self.contains(Self::SYNCHRONIZED) || self.contains(Self::DECLARED_SYNCHRONIZED) {
                    out.push("synchronized");
                }
                if self.contains(Self::NATIVE) {
                    out.push("native");
                }
                if self.contains(Self::STRICT) {
                    out.push("strictfp");
                }
            }
        }
        out
    }

    /// Flags in baksmali order.
    pub fn smali_flags(self, target: FlagTarget) -> Vec<&'static str> {
        let table: &[(u32, &str)] = match target {
            FlagTarget::Class => &[
                (Self::PUBLIC, "public"),
                (Self::PRIVATE, "private"),
                (Self::PROTECTED, "protected"),
                (Self::STATIC, "static"),
                (Self::FINAL, "final"),
                (Self::INTERFACE, "interface"),
                (Self::ABSTRACT, "abstract"),
                (Self::SYNTHETIC, "synthetic"),
                (Self::ANNOTATION, "annotation"),
                (Self::ENUM, "enum"),
            ],
            FlagTarget::Field => &[
                (Self::PUBLIC, "public"),
                (Self::PRIVATE, "private"),
                (Self::PROTECTED, "protected"),
                (Self::STATIC, "static"),
                (Self::FINAL, "final"),
                (Self::VOLATILE, "volatile"),
                (Self::TRANSIENT, "transient"),
                (Self::SYNTHETIC, "synthetic"),
                (Self::ENUM, "enum"),
            ],
            FlagTarget::Method => &[
                (Self::PUBLIC, "public"),
                (Self::PRIVATE, "private"),
                (Self::PROTECTED, "protected"),
                (Self::STATIC, "static"),
                (Self::FINAL, "final"),
                (Self::SYNCHRONIZED, "synchronized"),
                (Self::BRIDGE, "bridge"),
                (Self::VARARGS, "varargs"),
                (Self::NATIVE, "native"),
                (Self::ABSTRACT, "abstract"),
                (Self::STRICT, "strictfp"),
                (Self::SYNTHETIC, "synthetic"),
                (Self::CONSTRUCTOR, "constructor"),
                (Self::DECLARED_SYNCHRONIZED, "declared-synchronized"),
            ],
        };
        table
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Literal from a DEX `encoded_value` or a class-file `ConstantValue`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// Class literal, as a descriptor.
    Type(String),
    Array(Vec<ConstValue>),
    Null,
    /// Values with no Java literal form (method handles, enum refs, annotations).
    Other(String),
}

impl ConstValue {
    pub fn java_literal(&self) -> String {
        match self {
            ConstValue::Bool(b) => b.to_string(),
            ConstValue::Byte(v) => v.to_string(),
            ConstValue::Short(v) => v.to_string(),
            ConstValue::Char(c) => format!("'{}'", escape_java_char(*c)),
            ConstValue::Int(v) => v.to_string(),
            ConstValue::Long(v) => format!("{v}L"),
            ConstValue::Float(v) => {
                if v.is_nan() {
                    "Float.NaN".to_string()
                } else if v.is_infinite() {
                    if *v > 0.0 {
                        "Float.POSITIVE_INFINITY".to_string()
                    } else {
                        "Float.NEGATIVE_INFINITY".to_string()
                    }
                } else {
                    format!("{v:?}f")
                }
            }
            ConstValue::Double(v) => {
                if v.is_nan() {
                    "Double.NaN".to_string()
                } else if v.is_infinite() {
                    if *v > 0.0 {
                        "Double.POSITIVE_INFINITY".to_string()
                    } else {
                        "Double.NEGATIVE_INFINITY".to_string()
                    }
                } else {
                    format!("{v:?}")
                }
            }
            ConstValue::String(s) => quote_string(s),
            ConstValue::Type(desc) => match signature::parse_type(desc) {
                Ok(ty) => format!("{}.class", ty.source_name()),
                Err(_) => format!("{desc}.class"),
            },
            ConstValue::Array(items) => {
                let inner = items
                    .iter()
                    .map(|v| v.java_literal())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{inner}}}")
            }
            ConstValue::Null => "null".to_string(),
            ConstValue::Other(text) => format!("/* {text} */ null"),
        }
    }

    pub fn smali_literal(&self) -> String {
        match self {
            ConstValue::Bool(b) => b.to_string(),
            ConstValue::Byte(v) => format!("{}t", smali_hex(i64::from(*v))),
            ConstValue::Short(v) => format!("{}s", smali_hex(i64::from(*v))),
            ConstValue::Char(c) => format!("'{}'", escape_java_char(*c)),
            ConstValue::Int(v) => smali_hex(i64::from(*v)),
            ConstValue::Long(v) => format!("{}L", smali_hex(*v)),
            ConstValue::Float(v) => format!("{v:?}f"),
            ConstValue::Double(v) => format!("{v:?}"),
            ConstValue::String(s) => quote_string(s),
            ConstValue::Type(desc) => desc.clone(),
            ConstValue::Array(items) => {
                let inner = items
                    .iter()
                    .map(|v| v.smali_literal())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{inner}}}")
            }
            ConstValue::Null => "null".to_string(),
            ConstValue::Other(text) => text.clone(),
        }
    }
}

pub fn smali_hex(v: i64) -> String {
    if v < 0 {
        format!("-0x{:x}", v.unsigned_abs())
    } else {
        format!("0x{v:x}")
    }
}

fn escape_java_char(c: u16) -> String {
    match c {
        0x27 => "\\'".to_string(),
        0x5c => "\\\\".to_string(),
        0x0a => "\\n".to_string(),
        0x0d => "\\r".to_string(),
        0x09 => "\\t".to_string(),
        0x20..=0x7e => char::from(c as u8).to_string(),
        _ => format!("\\u{c:04x}"),
    }
}

/// Java string literal with escapes; non-ASCII printable text is kept as is.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Field or method reference as it appears in code, all parts in descriptor form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MemberRef {
    pub fn smali_method(&self) -> String {
        format!("{}->{}{}", self.owner, self.name, self.descriptor)
    }

    pub fn smali_field(&self) -> String {
        format!("{}->{}:{}", self.owner, self.name, self.descriptor)
    }

    /// Java display key of a method reference, `None` when a descriptor is malformed.
    pub fn method_key(&self) -> Option<String> {
        let owner = signature::parse_type(&self.owner).ok()?;
        let (params, ret) = signature::parse_method_descriptor(&self.descriptor).ok()?;
        Some(signature::format_method(&owner.to_string(), &self.name, &params, &ret))
    }

    pub fn owner_class(&self) -> Option<String> {
        signature::parse_type(&self.owner)
            .ok()
            .and_then(|ty| ty.class_name().map(str::to_string))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CodeRef {
    Method(MemberRef),
    Field(MemberRef),
    /// Type descriptor, possibly an array.
    Type(String),
}

impl CodeRef {
    /// Class the reference points into, looking through array types.
    pub fn referenced_class(&self) -> Option<String> {
        match self {
            CodeRef::Method(m) | CodeRef::Field(m) => m.owner_class(),
            CodeRef::Type(desc) => signature::parse_type(desc)
                .ok()
                .and_then(|ty| ty.class_name().map(str::to_string)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MethodBody {
    Dex(DexCode),
    Jvm(JvmCode),
}

impl MethodBody {
    /// Listing lines; labels start with `:`.
    pub fn disassemble(&self) -> Vec<String> {
        match self {
            MethodBody::Dex(code) => code.disassemble(),
            MethodBody::Jvm(code) => code.disassemble(),
        }
    }

    pub fn references(&self) -> Vec<CodeRef> {
        match self {
            MethodBody::Dex(code) => code.references(),
            MethodBody::Jvm(code) => code.references(),
        }
    }

    /// Frame size directives for smali output.
    pub fn frame_directives(&self) -> Vec<String> {
        match self {
            MethodBody::Dex(code) => vec![format!(".registers {}", code.registers)],
            MethodBody::Jvm(code) => vec![
                format!(".limit stack {}", code.max_stack),
                format!(".limit locals {}", code.max_locals),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Declaring class, Java name.
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub ty: JavaType,
    pub access: AccessFlags,
    pub value: Option<ConstValue>,
}

impl FieldDef {
    pub fn new(
        owner: &str,
        name: String,
        descriptor: String,
        access: AccessFlags,
        value: Option<ConstValue>,
    ) -> FormatResult<Self> {
        let ty = signature::parse_type(&descriptor)?;
        Ok(Self {
            owner: owner.to_string(),
            name,
            descriptor,
            ty,
            access,
            value,
        })
    }

    /// `owner.name:type`
    pub fn display(&self) -> String {
        format!("{}.{}:{}", self.owner, self.name, self.ty)
    }

    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }
}

#[derive(Debug, Clone)]
pub struct MethodDef {
    /// Declaring class, Java name.
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub params: Vec<JavaType>,
    pub ret: JavaType,
    pub access: AccessFlags,
    pub body: Option<MethodBody>,
}

impl MethodDef {
    pub fn new(
        owner: &str,
        name: String,
        descriptor: String,
        access: AccessFlags,
        body: Option<MethodBody>,
    ) -> FormatResult<Self> {
        let (params, ret) = signature::parse_method_descriptor(&descriptor)?;
        Ok(Self {
            owner: owner.to_string(),
            name,
            descriptor,
            params,
            ret,
            access,
            body,
        })
    }

    /// `owner.name(params):ret`, identical to `signature::to_java_method_signature`.
    pub fn display(&self) -> String {
        signature::format_method(&self.owner, &self.name, &self.params, &self.ret)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == "<clinit>"
    }

    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }

    pub fn is_private(&self) -> bool {
        self.access.contains(AccessFlags::PRIVATE)
    }

    /// Static, private and constructor methods are dispatched directly.
    pub fn is_direct(&self) -> bool {
        self.is_static() || self.is_private() || self.is_constructor() || self.is_static_initializer()
    }
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub descriptor: String,
    /// Binary name with dots, nested classes keep `$`.
    pub name: String,
    pub access: AccessFlags,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}

impl ClassDef {
    pub fn new(descriptor: String, access: AccessFlags) -> FormatResult<Self> {
        let name = match signature::parse_type(&descriptor)? {
            JavaType::Object(name) => name,
            _ => {
                return Err(crate::error::FormatError::Malformed(format!(
                    "class descriptor {descriptor}"
                )));
            }
        };
        Ok(Self {
            descriptor,
            name,
            access,
            super_class: None,
            interfaces: Vec::new(),
            source_file: None,
            fields: Vec::new(),
            methods: Vec::new(),
        })
    }

    pub fn package(&self) -> &str {
        self.name.rsplit_once('.').map(|(pkg, _)| pkg).unwrap_or("")
    }

    /// Name as declared in source: the part after the package and the last `$`.
    pub fn simple_name(&self) -> &str {
        let tail = self.name.rsplit_once('.').map(|(_, n)| n).unwrap_or(&self.name);
        tail.rsplit_once('$').map(|(_, n)| n).unwrap_or(tail)
    }

    pub fn super_class_name(&self) -> Option<String> {
        self.super_class.as_deref().map(signature::descriptor_to_java)
    }

    pub fn interface_names(&self) -> Vec<String> {
        self.interfaces
            .iter()
            .map(|i| signature::descriptor_to_java(i))
            .collect()
    }

    pub fn is_interface(&self) -> bool {
        self.access.contains(AccessFlags::INTERFACE)
    }

    pub fn is_annotation(&self) -> bool {
        self.access.contains(AccessFlags::ANNOTATION)
    }

    pub fn is_enum(&self) -> bool {
        self.access.contains(AccessFlags::ENUM)
    }

    pub fn find_method(&self, display: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.display() == display)
    }
}
