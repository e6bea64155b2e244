//! DEX input: file parser, Dalvik instruction decoder and smali rendering.

pub mod opcodes;
pub mod parser;
pub mod smali;

use std::sync::Arc;

use crate::model::{CodeRef, MemberRef};
use opcodes::RefKind;

pub use parser::parse_dex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proto {
    pub params: Vec<String>,
    pub ret: String,
}

impl Proto {
    pub fn descriptor(&self) -> String {
        format!("({}){}", self.params.concat(), self.ret)
    }
}

/// Resolved id tables of one DEX file, shared by every method body parsed from it.
#[derive(Debug, Default)]
pub struct DexPool {
    pub strings: Vec<String>,
    /// Type descriptors.
    pub types: Vec<String>,
    pub protos: Vec<Proto>,
    pub fields: Vec<MemberRef>,
    pub methods: Vec<MemberRef>,
}

impl DexPool {
    pub fn string(&self, idx: u32) -> Option<&str> {
        self.strings.get(idx as usize).map(String::as_str)
    }

    pub fn type_desc(&self, idx: u32) -> Option<&str> {
        self.types.get(idx as usize).map(String::as_str)
    }

    pub fn proto(&self, idx: u32) -> Option<&Proto> {
        self.protos.get(idx as usize)
    }

    pub fn field(&self, idx: u32) -> Option<&MemberRef> {
        self.fields.get(idx as usize)
    }

    pub fn method(&self, idx: u32) -> Option<&MemberRef> {
        self.methods.get(idx as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchHandler {
    /// Caught type descriptor, `None` for catch-all.
    pub exception: Option<String>,
    pub address: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryBlock {
    pub start: u32,
    pub count: u16,
    pub handlers: Vec<CatchHandler>,
}

#[derive(Debug, Clone)]
pub struct DexCode {
    pub registers: u16,
    pub ins: u16,
    pub insns: Vec<u16>,
    pub tries: Vec<TryBlock>,
    pub pool: Arc<DexPool>,
}

impl DexCode {
    pub fn disassemble(&self) -> Vec<String> {
        smali::disassemble(self)
    }

    pub fn references(&self) -> Vec<CodeRef> {
        let decoded = opcodes::decode_all(&self.insns);
        let mut refs = Vec::new();
        for insn in &decoded.instructions {
            let Some(idx) = insn.index else { continue };
            let resolved = match insn.info.reference {
                RefKind::Type => self.pool.type_desc(idx).map(|t| CodeRef::Type(t.to_string())),
                RefKind::Field => self.pool.field(idx).cloned().map(CodeRef::Field),
                RefKind::Method => self.pool.method(idx).cloned().map(CodeRef::Method),
                _ => None,
            };
            refs.extend(resolved);
        }
        for block in &self.tries {
            refs.extend(
                block
                    .handlers
                    .iter()
                    .filter_map(|h| h.exception.clone())
                    .map(CodeRef::Type),
            );
        }
        refs
    }
}
