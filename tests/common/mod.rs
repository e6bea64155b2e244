#![allow(dead_code)]

//! Byte-level fixture builders shared by the integration tests.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";
const NO_INDEX: u32 = 0xffff_ffff;

pub fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "dex_daemon_it_{}_{}_{}",
        std::process::id(),
        nanos,
        name
    ))
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
    use zip::write::FileOptions;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(content)?;
    }
    zip.finish()?;
    Ok(())
}

fn uleb128(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn align4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// Splits `(I[Ljava/lang/String;)V` into parameter and return descriptors.
fn split_method_descriptor(desc: &str) -> (Vec<String>, String) {
    let close = desc.find(')').unwrap();
    let params_raw = &desc[1..close];
    let mut params = Vec::new();
    let bytes = params_raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while bytes[i] == b'[' {
            i += 1;
        }
        if bytes[i] == b'L' {
            while bytes[i] != b';' {
                i += 1;
            }
        }
        i += 1;
        params.push(params_raw[start..i].to_string());
    }
    (params, desc[close + 1..].to_string())
}

// ---------------------------------------------------------------- DEX

pub const RETURN_VOID: u16 = 0x000e;
pub const INVOKE_VIRTUAL: u8 = 0x6e;
pub const INVOKE_SUPER: u8 = 0x6f;
pub const INVOKE_DIRECT: u8 = 0x70;
pub const INVOKE_STATIC: u8 = 0x71;
pub const NEW_INSTANCE: u8 = 0x22;
pub const CONST_STRING: u8 = 0x1a;
pub const SGET_OBJECT: u8 = 0x62;

/// Format 35c invoke with up to five argument registers.
pub fn invoke(opcode: u8, args: &[u16], method: u16) -> Vec<u16> {
    let mut regs = [0u16; 5];
    for (i, r) in args.iter().enumerate() {
        regs[i] = *r;
    }
    let count = args.len() as u16;
    vec![
        (count << 12) | (regs[4] << 8) | u16::from(opcode),
        method,
        (regs[3] << 12) | (regs[2] << 8) | (regs[1] << 4) | regs[0],
    ]
}

/// Format 21c: one register and a 16-bit pool index.
pub fn op21c(opcode: u8, reg: u16, index: u16) -> Vec<u16> {
    vec![(reg << 8) | u16::from(opcode), index]
}

#[derive(Debug, Clone)]
pub enum DexValue {
    Int(i32),
    Str(String),
}

#[derive(Debug, Clone)]
pub struct DexCodeItem {
    pub registers: u16,
    pub ins: u16,
    pub outs: u16,
    pub insns: Vec<u16>,
}

#[derive(Debug, Clone)]
pub struct DexMember {
    pub name: String,
    /// Field type or method descriptor.
    pub descriptor: String,
    pub access: u32,
    pub value: Option<DexValue>,
    pub code: Option<DexCodeItem>,
}

#[derive(Debug, Clone)]
pub struct DexClass {
    pub descriptor: String,
    pub access: u32,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub static_fields: Vec<DexMember>,
    pub instance_fields: Vec<DexMember>,
    pub direct_methods: Vec<DexMember>,
    pub virtual_methods: Vec<DexMember>,
}

impl DexClass {
    pub fn new(descriptor: &str, access: u32) -> Self {
        Self {
            descriptor: descriptor.to_string(),
            access,
            super_class: Some("Ljava/lang/Object;".to_string()),
            interfaces: Vec::new(),
            source_file: None,
            static_fields: Vec::new(),
            instance_fields: Vec::new(),
            direct_methods: Vec::new(),
            virtual_methods: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: &str) -> Self {
        self.super_class = Some(parent.to_string());
        self
    }

    pub fn implements(mut self, iface: &str) -> Self {
        self.interfaces.push(iface.to_string());
        self
    }

    pub fn source(mut self, file: &str) -> Self {
        self.source_file = Some(file.to_string());
        self
    }

    pub fn static_field(mut self, name: &str, ty: &str, access: u32, value: Option<DexValue>) -> Self {
        self.static_fields.push(field(name, ty, access, value));
        self
    }

    pub fn instance_field(mut self, name: &str, ty: &str, access: u32) -> Self {
        self.instance_fields.push(field(name, ty, access, None));
        self
    }

    pub fn direct(mut self, name: &str, descriptor: &str, access: u32, code: Option<DexCodeItem>) -> Self {
        self.direct_methods.push(method(name, descriptor, access, code));
        self
    }

    pub fn virtual_method(mut self, name: &str, descriptor: &str, access: u32, code: Option<DexCodeItem>) -> Self {
        self.virtual_methods.push(method(name, descriptor, access, code));
        self
    }
}

fn field(name: &str, ty: &str, access: u32, value: Option<DexValue>) -> DexMember {
    DexMember {
        name: name.to_string(),
        descriptor: ty.to_string(),
        access,
        value,
        code: None,
    }
}

fn method(name: &str, descriptor: &str, access: u32, code: Option<DexCodeItem>) -> DexMember {
    DexMember {
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        access,
        value: None,
        code,
    }
}

pub fn code(registers: u16, ins: u16, parts: &[Vec<u16>]) -> DexCodeItem {
    DexCodeItem {
        registers,
        ins,
        outs: registers,
        insns: parts.concat(),
    }
}

struct InternedMember {
    idx: u32,
    access: u32,
    value: Option<DexValue>,
    code: Option<DexCodeItem>,
}

struct InternedClass {
    type_idx: u32,
    access: u32,
    super_idx: u32,
    interfaces: Vec<u32>,
    source_idx: u32,
    lists: [Vec<InternedMember>; 4],
}

/// Builds a DEX file with ids assigned in interning order. Pool indices
/// returned by `string`, `type_id`, `field` and `method` stay valid.
#[derive(Default)]
pub struct DexBuilder {
    strings: Vec<String>,
    string_idx: HashMap<String, u32>,
    types: Vec<u32>,
    type_idx: HashMap<String, u32>,
    protos: Vec<(u32, Vec<u32>)>,
    proto_idx: HashMap<String, u32>,
    fields: Vec<(u32, u32, u32)>,
    field_idx: HashMap<(String, String, String), u32>,
    methods: Vec<(u32, u32, u32)>,
    method_idx: HashMap<(String, String, String), u32>,
    classes: Vec<InternedClass>,
}

impl DexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(&mut self, s: &str) -> u32 {
        if let Some(idx) = self.string_idx.get(s) {
            return *idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.string_idx.insert(s.to_string(), idx);
        idx
    }

    pub fn type_id(&mut self, desc: &str) -> u32 {
        if let Some(idx) = self.type_idx.get(desc) {
            return *idx;
        }
        let s = self.string(desc);
        let idx = self.types.len() as u32;
        self.types.push(s);
        self.type_idx.insert(desc.to_string(), idx);
        idx
    }

    pub fn proto(&mut self, desc: &str) -> u32 {
        if let Some(idx) = self.proto_idx.get(desc) {
            return *idx;
        }
        let (params, ret) = split_method_descriptor(desc);
        let ret = self.type_id(&ret);
        let params = params.iter().map(|p| self.type_id(p)).collect();
        let idx = self.protos.len() as u32;
        self.protos.push((ret, params));
        self.proto_idx.insert(desc.to_string(), idx);
        idx
    }

    pub fn field(&mut self, owner: &str, name: &str, ty: &str) -> u16 {
        let key = (owner.to_string(), name.to_string(), ty.to_string());
        if let Some(idx) = self.field_idx.get(&key) {
            return *idx as u16;
        }
        let entry = (self.type_id(owner), self.type_id(ty), self.string(name));
        let idx = self.fields.len() as u32;
        self.fields.push(entry);
        self.field_idx.insert(key, idx);
        idx as u16
    }

    pub fn method(&mut self, owner: &str, name: &str, desc: &str) -> u16 {
        let key = (owner.to_string(), name.to_string(), desc.to_string());
        if let Some(idx) = self.method_idx.get(&key) {
            return *idx as u16;
        }
        let entry = (self.type_id(owner), self.proto(desc), self.string(name));
        let idx = self.methods.len() as u32;
        self.methods.push(entry);
        self.method_idx.insert(key, idx);
        idx as u16
    }

    pub fn class(&mut self, class: DexClass) {
        let type_idx = self.type_id(&class.descriptor);
        let super_idx = match &class.super_class {
            Some(s) => self.type_id(s),
            None => NO_INDEX,
        };
        let interfaces = class.interfaces.iter().map(|i| self.type_id(i)).collect();
        let source_idx = match &class.source_file {
            Some(s) => self.string(s),
            None => NO_INDEX,
        };
        let owner = class.descriptor.clone();
        let mut intern_fields = |b: &mut Self, members: Vec<DexMember>| -> Vec<InternedMember> {
            members
                .into_iter()
                .map(|m| {
                    if let Some(DexValue::Str(s)) = &m.value {
                        b.string(s);
                    }
                    InternedMember {
                        idx: u32::from(b.field(&owner, &m.name, &m.descriptor)),
                        access: m.access,
                        value: m.value,
                        code: None,
                    }
                })
                .collect()
        };
        let statics = intern_fields(self, class.static_fields);
        let instance = intern_fields(self, class.instance_fields);
        let owner = class.descriptor.clone();
        let mut intern_methods = |b: &mut Self, members: Vec<DexMember>| -> Vec<InternedMember> {
            members
                .into_iter()
                .map(|m| InternedMember {
                    idx: u32::from(b.method(&owner, &m.name, &m.descriptor)),
                    access: m.access,
                    value: None,
                    code: m.code,
                })
                .collect()
        };
        let direct = intern_methods(self, class.direct_methods);
        let virtuals = intern_methods(self, class.virtual_methods);

        self.classes.push(InternedClass {
            type_idx,
            access: class.access,
            super_idx,
            interfaces,
            source_idx,
            lists: [statics, instance, direct, virtuals],
        });
    }

    pub fn build(mut self) -> Vec<u8> {
        for class in &mut self.classes {
            for list in &mut class.lists {
                list.sort_by_key(|m| m.idx);
            }
        }

        let (s, t, p, f, m, c) = (
            self.strings.len() as u32,
            self.types.len() as u32,
            self.protos.len() as u32,
            self.fields.len() as u32,
            self.methods.len() as u32,
            self.classes.len() as u32,
        );
        let string_ids_off = 0x70u32;
        let type_ids_off = string_ids_off + 4 * s;
        let proto_ids_off = type_ids_off + 4 * t;
        let field_ids_off = proto_ids_off + 12 * p;
        let method_ids_off = field_ids_off + 8 * f;
        let class_defs_off = method_ids_off + 8 * m;
        let data_off = class_defs_off + 32 * c;

        let mut data: Vec<u8> = Vec::new();
        let at = |data: &Vec<u8>| data_off + data.len() as u32;

        let mut string_offsets = Vec::new();
        for string in &self.strings {
            string_offsets.push(at(&data));
            uleb128(&mut data, string.encode_utf16().count() as u32);
            data.extend(string.as_bytes());
            data.push(0);
        }
        align4(&mut data);

        let mut write_type_list = |data: &mut Vec<u8>, list: &[u32]| -> u32 {
            if list.is_empty() {
                return 0;
            }
            align4(data);
            let off = data_off + data.len() as u32;
            data.extend((list.len() as u32).to_le_bytes());
            for t in list {
                data.extend((*t as u16).to_le_bytes());
            }
            align4(data);
            off
        };
        let proto_params: Vec<u32> = self
            .protos
            .iter()
            .map(|(_, params)| write_type_list(&mut data, params))
            .collect();
        let interface_lists: Vec<u32> = self
            .classes
            .iter()
            .map(|cls| write_type_list(&mut data, &cls.interfaces))
            .collect();

        let mut code_offsets: Vec<[Vec<u32>; 2]> = Vec::new();
        for cls in &self.classes {
            let mut per_list: [Vec<u32>; 2] = [Vec::new(), Vec::new()];
            for (slot, list) in [&cls.lists[2], &cls.lists[3]].into_iter().enumerate() {
                for member in list {
                    let off = match &member.code {
                        Some(item) => {
                            align4(&mut data);
                            let off = at(&data);
                            data.extend(item.registers.to_le_bytes());
                            data.extend(item.ins.to_le_bytes());
                            data.extend(item.outs.to_le_bytes());
                            data.extend(0u16.to_le_bytes());
                            data.extend(0u32.to_le_bytes());
                            data.extend((item.insns.len() as u32).to_le_bytes());
                            for unit in &item.insns {
                                data.extend(unit.to_le_bytes());
                            }
                            off
                        }
                        None => 0,
                    };
                    per_list[slot].push(off);
                }
            }
            code_offsets.push(per_list);
        }

        let mut class_data_offsets = Vec::new();
        let mut static_value_offsets = Vec::new();
        for (ci, cls) in self.classes.iter().enumerate() {
            class_data_offsets.push(at(&data));
            for list in &cls.lists {
                uleb128(&mut data, list.len() as u32);
            }
            for (li, list) in cls.lists.iter().enumerate() {
                let mut prev = 0u32;
                for (mi, member) in list.iter().enumerate() {
                    uleb128(&mut data, member.idx - prev);
                    prev = member.idx;
                    uleb128(&mut data, member.access);
                    if li >= 2 {
                        uleb128(&mut data, code_offsets[ci][li - 2][mi]);
                    }
                }
            }

            let values: Vec<&DexValue> = cls.lists[0]
                .iter()
                .map_while(|m| m.value.as_ref())
                .collect();
            if values.is_empty() {
                static_value_offsets.push(0);
                continue;
            }
            static_value_offsets.push(at(&data));
            uleb128(&mut data, values.len() as u32);
            for value in values {
                match value {
                    DexValue::Int(v) => {
                        data.push(0x04 | (3 << 5));
                        data.extend(v.to_le_bytes());
                    }
                    DexValue::Str(text) => {
                        data.push(0x17 | (3 << 5));
                        data.extend(self.string_idx[text].to_le_bytes());
                    }
                }
            }
        }

        let mut out = Vec::with_capacity(data_off as usize + data.len());
        out.extend(b"dex\n035\0");
        out.extend(0u32.to_le_bytes()); // checksum
        out.extend([0u8; 20]); // signature
        out.extend((data_off + data.len() as u32).to_le_bytes());
        out.extend(0x70u32.to_le_bytes());
        out.extend(0x1234_5678u32.to_le_bytes());
        out.extend([0u8; 12]); // link size/off, map off
        for (count, off) in [
            (s, string_ids_off),
            (t, type_ids_off),
            (p, proto_ids_off),
            (f, field_ids_off),
            (m, method_ids_off),
            (c, class_defs_off),
            (data.len() as u32, data_off),
        ] {
            out.extend(count.to_le_bytes());
            out.extend(off.to_le_bytes());
        }
        assert_eq!(out.len(), 0x70);

        for off in &string_offsets {
            out.extend(off.to_le_bytes());
        }
        for t in &self.types {
            out.extend(t.to_le_bytes());
        }
        for (i, (ret, _)) in self.protos.iter().enumerate() {
            out.extend(0u32.to_le_bytes()); // shorty
            out.extend(ret.to_le_bytes());
            out.extend(proto_params[i].to_le_bytes());
        }
        for (owner, ty, name) in &self.fields {
            out.extend((*owner as u16).to_le_bytes());
            out.extend((*ty as u16).to_le_bytes());
            out.extend(name.to_le_bytes());
        }
        for (owner, proto, name) in &self.methods {
            out.extend((*owner as u16).to_le_bytes());
            out.extend((*proto as u16).to_le_bytes());
            out.extend(name.to_le_bytes());
        }
        for (i, cls) in self.classes.iter().enumerate() {
            out.extend(cls.type_idx.to_le_bytes());
            out.extend(cls.access.to_le_bytes());
            out.extend(cls.super_idx.to_le_bytes());
            out.extend(interface_lists[i].to_le_bytes());
            out.extend(cls.source_idx.to_le_bytes());
            out.extend(0u32.to_le_bytes()); // annotations
            out.extend(class_data_offsets[i].to_le_bytes());
            out.extend(static_value_offsets[i].to_le_bytes());
        }
        out.extend(data);
        out
    }
}

// ---------------------------------------------------------------- class files

/// Builds a Java 8 class file. Pool helpers return constant indices for code bytes.
pub struct ClassFileBuilder {
    pool: Vec<Vec<u8>>,
    pool_idx: HashMap<Vec<u8>, u16>,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
    attributes: Vec<Vec<u8>>,
}

impl ClassFileBuilder {
    pub fn new(this_internal: &str, super_internal: Option<&str>, access: u16) -> Self {
        let mut b = Self {
            pool: Vec::new(),
            pool_idx: HashMap::new(),
            access,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        };
        b.this_class = b.class(this_internal);
        if let Some(parent) = super_internal {
            b.super_class = b.class(parent);
        }
        b
    }

    fn entry(&mut self, bytes: Vec<u8>) -> u16 {
        if let Some(idx) = self.pool_idx.get(&bytes) {
            return *idx;
        }
        self.pool.push(bytes.clone());
        let idx = self.pool.len() as u16;
        self.pool_idx.insert(bytes, idx);
        idx
    }

    pub fn utf8(&mut self, s: &str) -> u16 {
        let mut bytes = vec![1];
        bytes.extend((s.len() as u16).to_be_bytes());
        bytes.extend(s.as_bytes());
        self.entry(bytes)
    }

    pub fn integer(&mut self, v: i32) -> u16 {
        let mut bytes = vec![3];
        bytes.extend(v.to_be_bytes());
        self.entry(bytes)
    }

    pub fn class(&mut self, internal: &str) -> u16 {
        let name = self.utf8(internal);
        let mut bytes = vec![7];
        bytes.extend(name.to_be_bytes());
        self.entry(bytes)
    }

    pub fn string(&mut self, s: &str) -> u16 {
        let text = self.utf8(s);
        let mut bytes = vec![8];
        bytes.extend(text.to_be_bytes());
        self.entry(bytes)
    }

    fn member(&mut self, tag: u8, owner: &str, name: &str, desc: &str) -> u16 {
        let class = self.class(owner);
        let name = self.utf8(name);
        let desc = self.utf8(desc);
        let mut nat = vec![12];
        nat.extend(name.to_be_bytes());
        nat.extend(desc.to_be_bytes());
        let nat = self.entry(nat);
        let mut bytes = vec![tag];
        bytes.extend(class.to_be_bytes());
        bytes.extend(nat.to_be_bytes());
        self.entry(bytes)
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, desc: &str) -> u16 {
        self.member(9, owner, name, desc)
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, desc: &str) -> u16 {
        self.member(10, owner, name, desc)
    }

    pub fn interface(mut self, internal: &str) -> Self {
        let idx = self.class(internal);
        self.interfaces.push(idx);
        self
    }

    pub fn source_file(mut self, name: &str) -> Self {
        let attr = self.utf8("SourceFile");
        let value = self.utf8(name);
        let mut bytes = Vec::new();
        bytes.extend(attr.to_be_bytes());
        bytes.extend(2u32.to_be_bytes());
        bytes.extend(value.to_be_bytes());
        self.attributes.push(bytes);
        self
    }

    /// `constant` is a pool index from `integer` or `string`.
    pub fn field(mut self, access: u16, name: &str, desc: &str, constant: Option<u16>) -> Self {
        let name = self.utf8(name);
        let desc = self.utf8(desc);
        let mut bytes = Vec::new();
        bytes.extend(access.to_be_bytes());
        bytes.extend(name.to_be_bytes());
        bytes.extend(desc.to_be_bytes());
        match constant {
            Some(idx) => {
                let attr = self.utf8("ConstantValue");
                bytes.extend(1u16.to_be_bytes());
                bytes.extend(attr.to_be_bytes());
                bytes.extend(2u32.to_be_bytes());
                bytes.extend(idx.to_be_bytes());
            }
            None => bytes.extend(0u16.to_be_bytes()),
        }
        self.fields.push(bytes);
        self
    }

    pub fn method(mut self, access: u16, name: &str, desc: &str, code: Option<(u16, u16, Vec<u8>)>) -> Self {
        let name = self.utf8(name);
        let desc = self.utf8(desc);
        let mut bytes = Vec::new();
        bytes.extend(access.to_be_bytes());
        bytes.extend(name.to_be_bytes());
        bytes.extend(desc.to_be_bytes());
        match code {
            Some((max_stack, max_locals, insns)) => {
                let attr = self.utf8("Code");
                bytes.extend(1u16.to_be_bytes());
                bytes.extend(attr.to_be_bytes());
                bytes.extend((12 + insns.len() as u32).to_be_bytes());
                bytes.extend(max_stack.to_be_bytes());
                bytes.extend(max_locals.to_be_bytes());
                bytes.extend((insns.len() as u32).to_be_bytes());
                bytes.extend(&insns);
                bytes.extend(0u16.to_be_bytes()); // exception table
                bytes.extend(0u16.to_be_bytes()); // attributes
            }
            None => bytes.extend(0u16.to_be_bytes()),
        }
        self.methods.push(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(0xCAFE_BABEu32.to_be_bytes());
        out.extend(0u16.to_be_bytes());
        out.extend(52u16.to_be_bytes());
        out.extend((self.pool.len() as u16 + 1).to_be_bytes());
        for entry in &self.pool {
            out.extend(entry);
        }
        out.extend(self.access.to_be_bytes());
        out.extend(self.this_class.to_be_bytes());
        out.extend(self.super_class.to_be_bytes());
        out.extend((self.interfaces.len() as u16).to_be_bytes());
        for i in &self.interfaces {
            out.extend(i.to_be_bytes());
        }
        for group in [&self.fields, &self.methods] {
            out.extend((group.len() as u16).to_be_bytes());
            for item in group {
                out.extend(item);
            }
        }
        out.extend((self.attributes.len() as u16).to_be_bytes());
        for attr in &self.attributes {
            out.extend(attr);
        }
        out
    }
}

// ---------------------------------------------------------------- binary XML

#[derive(Debug, Clone, Copy)]
pub enum AxmlValue<'a> {
    Str(&'a str),
    Bool(bool),
    Int(i32),
}

#[derive(Debug, Clone, Copy)]
pub struct AxmlAttr<'a> {
    pub ns: Option<&'a str>,
    pub name: &'a str,
    pub value: AxmlValue<'a>,
}

pub fn android<'a>(name: &'a str, value: AxmlValue<'a>) -> AxmlAttr<'a> {
    AxmlAttr {
        ns: Some(ANDROID_NS),
        name,
        value,
    }
}

pub fn plain<'a>(name: &'a str, value: &'a str) -> AxmlAttr<'a> {
    AxmlAttr {
        ns: None,
        name,
        value: AxmlValue::Str(value),
    }
}

/// Builds UTF-16 binary XML without a resource map.
#[derive(Default)]
pub struct AxmlBuilder {
    strings: Vec<String>,
    chunks: Vec<u8>,
}

impl AxmlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn string(&mut self, s: &str) -> u32 {
        if let Some(i) = self.strings.iter().position(|x| x == s) {
            return i as u32;
        }
        self.strings.push(s.to_string());
        (self.strings.len() - 1) as u32
    }

    fn node_header(&mut self, kind: u16, size: u32) {
        self.chunks.extend(kind.to_le_bytes());
        self.chunks.extend(16u16.to_le_bytes());
        self.chunks.extend(size.to_le_bytes());
        self.chunks.extend(1u32.to_le_bytes()); // line
        self.chunks.extend(NO_INDEX.to_le_bytes()); // comment
    }

    pub fn namespace(&mut self, start: bool, prefix: &str, uri: &str) {
        let prefix = self.string(prefix);
        let uri = self.string(uri);
        self.node_header(if start { 0x0100 } else { 0x0101 }, 24);
        self.chunks.extend(prefix.to_le_bytes());
        self.chunks.extend(uri.to_le_bytes());
    }

    pub fn start(&mut self, name: &str, attrs: &[AxmlAttr<'_>]) {
        let name = self.string(name);
        let encoded: Vec<[u32; 5]> = attrs
            .iter()
            .map(|a| {
                let ns = a.ns.map(|n| self.string(n)).unwrap_or(NO_INDEX);
                let attr_name = self.string(a.name);
                let (raw, kind, data) = match a.value {
                    AxmlValue::Str(s) => {
                        let idx = self.string(s);
                        (idx, 0x03u32, idx)
                    }
                    AxmlValue::Bool(b) => (NO_INDEX, 0x12, if b { 0xffff_ffff } else { 0 }),
                    AxmlValue::Int(v) => (NO_INDEX, 0x10, v as u32),
                };
                [ns, attr_name, raw, kind, data]
            })
            .collect();

        self.node_header(0x0102, 16 + 20 + 20 * attrs.len() as u32);
        self.chunks.extend(NO_INDEX.to_le_bytes());
        self.chunks.extend(name.to_le_bytes());
        self.chunks.extend(20u16.to_le_bytes());
        self.chunks.extend(20u16.to_le_bytes());
        self.chunks.extend((attrs.len() as u16).to_le_bytes());
        self.chunks.extend([0u8; 6]);
        for [ns, attr_name, raw, kind, data] in encoded {
            self.chunks.extend(ns.to_le_bytes());
            self.chunks.extend(attr_name.to_le_bytes());
            self.chunks.extend(raw.to_le_bytes());
            self.chunks.extend(8u16.to_le_bytes());
            self.chunks.push(0);
            self.chunks.push(kind as u8);
            self.chunks.extend(data.to_le_bytes());
        }
    }

    pub fn end(&mut self, name: &str) {
        let name = self.string(name);
        self.node_header(0x0103, 24);
        self.chunks.extend(NO_INDEX.to_le_bytes());
        self.chunks.extend(name.to_le_bytes());
    }

    pub fn build(self) -> Vec<u8> {
        let count = self.strings.len() as u32;
        let mut string_data = Vec::new();
        let mut offsets = Vec::new();
        for s in &self.strings {
            offsets.push(string_data.len() as u32);
            let units: Vec<u16> = s.encode_utf16().collect();
            string_data.extend((units.len() as u16).to_le_bytes());
            for u in units {
                string_data.extend(u.to_le_bytes());
            }
            string_data.extend(0u16.to_le_bytes());
        }
        align4(&mut string_data);

        let strings_start = 28 + 4 * count;
        let pool_size = strings_start + string_data.len() as u32;
        let mut pool = Vec::new();
        pool.extend(0x0001u16.to_le_bytes());
        pool.extend(28u16.to_le_bytes());
        pool.extend(pool_size.to_le_bytes());
        pool.extend(count.to_le_bytes());
        pool.extend(0u32.to_le_bytes());
        pool.extend(0u32.to_le_bytes()); // UTF-16
        pool.extend(strings_start.to_le_bytes());
        pool.extend(0u32.to_le_bytes());
        for off in offsets {
            pool.extend(off.to_le_bytes());
        }
        pool.extend(string_data);

        let total = 8 + pool.len() as u32 + self.chunks.len() as u32;
        let mut out = Vec::new();
        out.extend(0x0003u16.to_le_bytes());
        out.extend(8u16.to_le_bytes());
        out.extend(total.to_le_bytes());
        out.extend(pool);
        out.extend(self.chunks);
        out
    }
}

// ---------------------------------------------------------------- sample app

pub const BASE: &str = "Lcom/example/app/Base;";
pub const MAIN: &str = "Lcom/example/app/MainActivity;";
pub const HELPER: &str = "Lcom/example/app/MainActivity$Helper;";
pub const OBJECT: &str = "Ljava/lang/Object;";

pub const ACC_PUBLIC: u32 = 0x1;
pub const ACC_PRIVATE: u32 = 0x2;
pub const ACC_STATIC: u32 = 0x8;
pub const ACC_FINAL: u32 = 0x10;
pub const ACC_ABSTRACT: u32 = 0x400;
pub const ACC_CONSTRUCTOR: u32 = 0x10000;

/// Base implements Runnable; MainActivity extends Base and creates its nested Helper.
pub fn sample_dex() -> Vec<u8> {
    let mut b = DexBuilder::new();
    let object_init = b.method(OBJECT, "<init>", "()V");
    let base_init = b.method(BASE, "<init>", "()V");
    let base_run = b.method(BASE, "run", "()V");
    let main_run = b.method(MAIN, "run", "()V");
    let helper_init = b.method(HELPER, "<init>", "()V");
    let helper_type = b.type_id(HELPER) as u16;

    let ctor = |target: u16| code(1, 1, &[invoke(INVOKE_DIRECT, &[0], target), vec![RETURN_VOID]]);

    b.class(
        DexClass::new(BASE, ACC_PUBLIC | ACC_ABSTRACT)
            .implements("Ljava/lang/Runnable;")
            .source("Base.java")
            .direct("<init>", "()V", ACC_PUBLIC | ACC_CONSTRUCTOR, Some(ctor(object_init)))
            .virtual_method("run", "()V", ACC_PUBLIC, Some(code(1, 1, &[vec![RETURN_VOID]]))),
    );
    b.class(
        DexClass::new(MAIN, ACC_PUBLIC)
            .extends(BASE)
            .source("MainActivity.java")
            .static_field("TAG", "Ljava/lang/String;", ACC_PUBLIC | ACC_STATIC | ACC_FINAL, Some(DexValue::Str("Main".to_string())))
            .static_field("COUNT", "I", ACC_PUBLIC | ACC_STATIC | ACC_FINAL, Some(DexValue::Int(3)))
            .instance_field("name", "Ljava/lang/String;", ACC_PRIVATE)
            .direct("<init>", "()V", ACC_PUBLIC | ACC_CONSTRUCTOR, Some(ctor(base_init)))
            .virtual_method(
                "run",
                "()V",
                ACC_PUBLIC,
                Some(code(1, 1, &[invoke(INVOKE_SUPER, &[0], base_run), vec![RETURN_VOID]])),
            )
            .virtual_method(
                "onCreate",
                "(Landroid/os/Bundle;)V",
                ACC_PUBLIC,
                Some(code(
                    3,
                    2,
                    &[
                        op21c(NEW_INSTANCE, 0, helper_type),
                        invoke(INVOKE_DIRECT, &[0], helper_init),
                        invoke(INVOKE_VIRTUAL, &[1], main_run),
                        vec![RETURN_VOID],
                    ],
                )),
            ),
    );
    b.class(
        DexClass::new(HELPER, ACC_STATIC)
            .source("MainActivity.java")
            .direct("<init>", "()V", ACC_CONSTRUCTOR, Some(ctor(object_init))),
    );
    b.build()
}

pub fn sample_manifest() -> Vec<u8> {
    let mut x = AxmlBuilder::new();
    x.namespace(true, "android", ANDROID_NS);
    x.start("manifest", &[plain("package", "com.example.app"), android("versionCode", AxmlValue::Int(7))]);
    x.start("application", &[android("label", AxmlValue::Str("Sample"))]);

    x.start("activity", &[android("name", AxmlValue::Str(".MainActivity"))]);
    x.start("intent-filter", &[]);
    x.start("action", &[android("name", AxmlValue::Str("android.intent.action.MAIN"))]);
    x.end("action");
    x.end("intent-filter");
    x.end("activity");

    x.start(
        "service",
        &[android("name", AxmlValue::Str(".SyncService")), android("exported", AxmlValue::Bool(false))],
    );
    x.end("service");

    x.start(
        "receiver",
        &[android("name", AxmlValue::Str("com.example.app.BootReceiver")), android("exported", AxmlValue::Bool(true))],
    );
    x.end("receiver");

    x.start("provider", &[android("name", AxmlValue::Str(".DataProvider"))]);
    x.end("provider");

    x.end("application");
    x.end("manifest");
    x.namespace(false, "android", ANDROID_NS);
    x.build()
}

pub fn write_sample_apk(path: &Path) -> anyhow::Result<()> {
    let dex = sample_dex();
    let manifest = sample_manifest();
    write_zip(
        path,
        &[
            ("AndroidManifest.xml", &manifest),
            ("classes.dex", &dex),
            ("res/raw/readme.txt", b"not code"),
        ],
    )
}

/// `org/demo/Greeter` with a constant, a constructor and a method calling `String.length()`.
pub fn sample_class() -> Vec<u8> {
    let mut b = ClassFileBuilder::new("org/demo/Greeter", Some("java/lang/Object"), 0x21)
        .interface("java/io/Serializable")
        .source_file("Greeter.java");
    let object_init = b.method_ref("java/lang/Object", "<init>", "()V");
    let length = b.method_ref("java/lang/String", "length", "()I");
    let limit = b.integer(42);

    let [oi_hi, oi_lo] = object_init.to_be_bytes();
    let [len_hi, len_lo] = length.to_be_bytes();
    b.field(0x19, "LIMIT", "I", Some(limit))
        .field(0x2, "greeting", "Ljava/lang/String;", None)
        .method(
            0x1,
            "<init>",
            "()V",
            Some((1, 1, vec![0x2a, 0xb7, oi_hi, oi_lo, 0xb1])), // aload_0; invokespecial; return
        )
        .method(
            0x1,
            "size",
            "(Ljava/lang/String;)I",
            Some((1, 2, vec![0x2b, 0xb6, len_hi, len_lo, 0xac])), // aload_1; invokevirtual; ireturn
        )
        .build()
}
