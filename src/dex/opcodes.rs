//! Dalvik instruction table and decoder.

use crate::error::{FormatError, FormatResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    F10x,
    F12x,
    F11n,
    F11x,
    F10t,
    F20t,
    F22x,
    F21t,
    F21s,
    F21h,
    F21c,
    F23x,
    F22b,
    F22t,
    F22s,
    F22c,
    F30t,
    F32x,
    F31i,
    F31t,
    F31c,
    F35c,
    F3rc,
    F45cc,
    F4rcc,
    F51l,
}

impl Format {
    /// Instruction width in 16-bit code units.
    pub fn units(self) -> usize {
        use Format::*;
        match self {
            F10x | F12x | F11n | F11x | F10t => 1,
            F20t | F22x | F21t | F21s | F21h | F21c | F23x | F22b | F22t | F22s | F22c => 2,
            F30t | F32x | F31i | F31t | F31c | F35c | F3rc => 3,
            F45cc | F4rcc => 4,
            F51l => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    None,
    String,
    Type,
    Field,
    Method,
    CallSite,
    MethodHandle,
    Proto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    pub name: &'static str,
    pub format: Format,
    pub reference: RefKind,
}

const CMP: [&str; 5] = ["cmpl-float", "cmpg-float", "cmpl-double", "cmpg-double", "cmp-long"];
const IF_TEST: [&str; 6] = ["if-eq", "if-ne", "if-lt", "if-ge", "if-gt", "if-le"];
const IF_TESTZ: [&str; 6] = ["if-eqz", "if-nez", "if-ltz", "if-gez", "if-gtz", "if-lez"];
const ARRAY_OPS: [&str; 14] = [
    "aget", "aget-wide", "aget-object", "aget-boolean", "aget-byte", "aget-char", "aget-short",
    "aput", "aput-wide", "aput-object", "aput-boolean", "aput-byte", "aput-char", "aput-short",
];
const INSTANCE_OPS: [&str; 14] = [
    "iget", "iget-wide", "iget-object", "iget-boolean", "iget-byte", "iget-char", "iget-short",
    "iput", "iput-wide", "iput-object", "iput-boolean", "iput-byte", "iput-char", "iput-short",
];
const STATIC_OPS: [&str; 14] = [
    "sget", "sget-wide", "sget-object", "sget-boolean", "sget-byte", "sget-char", "sget-short",
    "sput", "sput-wide", "sput-object", "sput-boolean", "sput-byte", "sput-char", "sput-short",
];
const INVOKE: [&str; 5] = [
    "invoke-virtual", "invoke-super", "invoke-direct", "invoke-static", "invoke-interface",
];
const INVOKE_RANGE: [&str; 5] = [
    "invoke-virtual/range", "invoke-super/range", "invoke-direct/range", "invoke-static/range",
    "invoke-interface/range",
];
const UNOPS: [&str; 21] = [
    "neg-int", "not-int", "neg-long", "not-long", "neg-float", "neg-double", "int-to-long",
    "int-to-float", "int-to-double", "long-to-int", "long-to-float", "long-to-double",
    "float-to-int", "float-to-long", "float-to-double", "double-to-int", "double-to-long",
    "double-to-float", "int-to-byte", "int-to-char", "int-to-short",
];
const BINOPS: [&str; 32] = [
    "add-int", "sub-int", "mul-int", "div-int", "rem-int", "and-int", "or-int", "xor-int",
    "shl-int", "shr-int", "ushr-int", "add-long", "sub-long", "mul-long", "div-long", "rem-long",
    "and-long", "or-long", "xor-long", "shl-long", "shr-long", "ushr-long", "add-float",
    "sub-float", "mul-float", "div-float", "rem-float", "add-double", "sub-double", "mul-double",
    "div-double", "rem-double",
];
const BINOPS_2ADDR: [&str; 32] = [
    "add-int/2addr", "sub-int/2addr", "mul-int/2addr", "div-int/2addr", "rem-int/2addr",
    "and-int/2addr", "or-int/2addr", "xor-int/2addr", "shl-int/2addr", "shr-int/2addr",
    "ushr-int/2addr", "add-long/2addr", "sub-long/2addr", "mul-long/2addr", "div-long/2addr",
    "rem-long/2addr", "and-long/2addr", "or-long/2addr", "xor-long/2addr", "shl-long/2addr",
    "shr-long/2addr", "ushr-long/2addr", "add-float/2addr", "sub-float/2addr",
    "mul-float/2addr", "div-float/2addr", "rem-float/2addr", "add-double/2addr",
    "sub-double/2addr", "mul-double/2addr", "div-double/2addr", "rem-double/2addr",
];
const LIT16: [&str; 8] = [
    "add-int/lit16", "rsub-int", "mul-int/lit16", "div-int/lit16", "rem-int/lit16",
    "and-int/lit16", "or-int/lit16", "xor-int/lit16",
];
const LIT8: [&str; 11] = [
    "add-int/lit8", "rsub-int/lit8", "mul-int/lit8", "div-int/lit8", "rem-int/lit8",
    "and-int/lit8", "or-int/lit8", "xor-int/lit8", "shl-int/lit8", "shr-int/lit8",
    "ushr-int/lit8",
];

pub fn op_info(op: u8) -> OpInfo {
    use Format::*;

    let idx = |base: u8| usize::from(op - base);
    let (name, format, reference) = match op {
        0x00 => ("nop", F10x, RefKind::None),
        0x01 => ("move", F12x, RefKind::None),
        0x02 => ("move/from16", F22x, RefKind::None),
        0x03 => ("move/16", F32x, RefKind::None),
        0x04 => ("move-wide", F12x, RefKind::None),
        0x05 => ("move-wide/from16", F22x, RefKind::None),
        0x06 => ("move-wide/16", F32x, RefKind::None),
        0x07 => ("move-object", F12x, RefKind::None),
        0x08 => ("move-object/from16", F22x, RefKind::None),
        0x09 => ("move-object/16", F32x, RefKind::None),
        0x0a => ("move-result", F11x, RefKind::None),
        0x0b => ("move-result-wide", F11x, RefKind::None),
        0x0c => ("move-result-object", F11x, RefKind::None),
        0x0d => ("move-exception", F11x, RefKind::None),
        0x0e => ("return-void", F10x, RefKind::None),
        0x0f => ("return", F11x, RefKind::None),
        0x10 => ("return-wide", F11x, RefKind::None),
        0x11 => ("return-object", F11x, RefKind::None),
        0x12 => ("const/4", F11n, RefKind::None),
        0x13 => ("const/16", F21s, RefKind::None),
        0x14 => ("const", F31i, RefKind::None),
        0x15 => ("const/high16", F21h, RefKind::None),
        0x16 => ("const-wide/16", F21s, RefKind::None),
        0x17 => ("const-wide/32", F31i, RefKind::None),
        0x18 => ("const-wide", F51l, RefKind::None),
        0x19 => ("const-wide/high16", F21h, RefKind::None),
        0x1a => ("const-string", F21c, RefKind::String),
        0x1b => ("const-string/jumbo", F31c, RefKind::String),
        0x1c => ("const-class", F21c, RefKind::Type),
        0x1d => ("monitor-enter", F11x, RefKind::None),
        0x1e => ("monitor-exit", F11x, RefKind::None),
        0x1f => ("check-cast", F21c, RefKind::Type),
        0x20 => ("instance-of", F22c, RefKind::Type),
        0x21 => ("array-length", F12x, RefKind::None),
        0x22 => ("new-instance", F21c, RefKind::Type),
        0x23 => ("new-array", F22c, RefKind::Type),
        0x24 => ("filled-new-array", F35c, RefKind::Type),
        0x25 => ("filled-new-array/range", F3rc, RefKind::Type),
        0x26 => ("fill-array-data", F31t, RefKind::None),
        0x27 => ("throw", F11x, RefKind::None),
        0x28 => ("goto", F10t, RefKind::None),
        0x29 => ("goto/16", F20t, RefKind::None),
        0x2a => ("goto/32", F30t, RefKind::None),
        0x2b => ("packed-switch", F31t, RefKind::None),
        0x2c => ("sparse-switch", F31t, RefKind::None),
        0x2d..=0x31 => (CMP[idx(0x2d)], F23x, RefKind::None),
        0x32..=0x37 => (IF_TEST[idx(0x32)], F22t, RefKind::None),
        0x38..=0x3d => (IF_TESTZ[idx(0x38)], F21t, RefKind::None),
        0x44..=0x51 => (ARRAY_OPS[idx(0x44)], F23x, RefKind::None),
        0x52..=0x5f => (INSTANCE_OPS[idx(0x52)], F22c, RefKind::Field),
        0x60..=0x6d => (STATIC_OPS[idx(0x60)], F21c, RefKind::Field),
        0x6e..=0x72 => (INVOKE[idx(0x6e)], F35c, RefKind::Method),
        0x74..=0x78 => (INVOKE_RANGE[idx(0x74)], F3rc, RefKind::Method),
        0x7b..=0x8f => (UNOPS[idx(0x7b)], F12x, RefKind::None),
        0x90..=0xaf => (BINOPS[idx(0x90)], F23x, RefKind::None),
        0xb0..=0xcf => (BINOPS_2ADDR[idx(0xb0)], F12x, RefKind::None),
        0xd0..=0xd7 => (LIT16[idx(0xd0)], F22s, RefKind::None),
        0xd8..=0xe2 => (LIT8[idx(0xd8)], F22b, RefKind::None),
        0xfa => ("invoke-polymorphic", F45cc, RefKind::Method),
        0xfb => ("invoke-polymorphic/range", F4rcc, RefKind::Method),
        0xfc => ("invoke-custom", F35c, RefKind::CallSite),
        0xfd => ("invoke-custom/range", F3rc, RefKind::CallSite),
        0xfe => ("const-method-handle", F21c, RefKind::MethodHandle),
        0xff => ("const-method-type", F21c, RefKind::Proto),
        // 0x3e..=0x43, 0x73, 0x79, 0x7a, 0xe3..=0xf9
        _ => ("unused", F10x, RefKind::None),
    };
    OpInfo {
        name,
        format,
        reference,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    PackedSwitch { first_key: i32, targets: Vec<i32> },
    SparseSwitch { keys: Vec<i32>, targets: Vec<i32> },
    ArrayData { width: u16, elements: Vec<i64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Position in code units.
    pub offset: usize,
    pub units: usize,
    pub opcode: u8,
    pub info: OpInfo,
    pub registers: Vec<u32>,
    /// Register list is `first..first+count` (`/range` forms).
    pub range: bool,
    pub literal: Option<i64>,
    /// Branch offset relative to this instruction, in code units.
    pub branch: Option<i32>,
    pub index: Option<u32>,
    /// Proto index of `invoke-polymorphic`.
    pub proto: Option<u32>,
    pub payload: Option<Payload>,
}

impl Instruction {
    fn new(offset: usize, units: usize, opcode: u8) -> Self {
        Self {
            offset,
            units,
            opcode,
            info: op_info(opcode),
            registers: Vec::new(),
            range: false,
            literal: None,
            branch: None,
            index: None,
            proto: None,
            payload: None,
        }
    }

    pub fn branch_target(&self) -> Option<usize> {
        let branch = self.branch?;
        usize::try_from(self.offset as i64 + i64::from(branch)).ok()
    }
}

/// Result of decoding a code array; decoding stops at the first malformed instruction.
#[derive(Debug, Default)]
pub struct Decoded {
    pub instructions: Vec<Instruction>,
    pub error: Option<FormatError>,
}

pub fn decode_all(insns: &[u16]) -> Decoded {
    let mut decoded = Decoded::default();
    let mut pos = 0usize;
    while pos < insns.len() {
        match decode_at(insns, pos) {
            Ok(insn) => {
                pos += insn.units;
                decoded.instructions.push(insn);
            }
            Err(err) => {
                decoded.error = Some(err);
                break;
            }
        }
    }
    decoded
}

fn unit(insns: &[u16], pos: usize) -> FormatResult<u16> {
    insns
        .get(pos)
        .copied()
        .ok_or_else(|| FormatError::Malformed(format!("instruction truncated at unit {pos:#x}")))
}

fn unit32(insns: &[u16], pos: usize) -> FormatResult<u32> {
    Ok(u32::from(unit(insns, pos)?) | (u32::from(unit(insns, pos + 1)?) << 16))
}

pub fn decode_at(insns: &[u16], pos: usize) -> FormatResult<Instruction> {
    let u0 = unit(insns, pos)?;
    let opcode = (u0 & 0xff) as u8;

    if opcode == 0x00 && (u0 >> 8) != 0 {
        return decode_payload(insns, pos, u0);
    }

    let info = op_info(opcode);
    let units = info.format.units();
    if pos + units > insns.len() {
        return Err(FormatError::Malformed(format!(
            "{} at unit {pos:#x} runs past the end of code",
            info.name
        )));
    }

    let mut insn = Instruction::new(pos, units, opcode);
    let a8 = u32::from(u0 >> 8);
    let a4 = u32::from((u0 >> 8) & 0xf);
    let b4 = u32::from(u0 >> 12);
    let u1 = insns.get(pos + 1).copied().unwrap_or(0);

    use Format::*;
    match info.format {
        F10x => {}
        F12x => insn.registers = vec![a4, b4],
        F11n => {
            insn.registers = vec![a4];
            insn.literal = Some(i64::from((u0 as i16) >> 12));
        }
        F11x => insn.registers = vec![a8],
        F10t => insn.branch = Some(i32::from((u0 as i16) >> 8)),
        F20t => insn.branch = Some(i32::from(u1 as i16)),
        F22x => insn.registers = vec![a8, u32::from(u1)],
        F21t => {
            insn.registers = vec![a8];
            insn.branch = Some(i32::from(u1 as i16));
        }
        F21s => {
            insn.registers = vec![a8];
            insn.literal = Some(i64::from(u1 as i16));
        }
        F21h => {
            insn.registers = vec![a8];
            let shift = if opcode == 0x19 { 48 } else { 16 };
            insn.literal = Some(i64::from(u1 as i16) << shift);
        }
        F21c => {
            insn.registers = vec![a8];
            insn.index = Some(u32::from(u1));
        }
        F23x => insn.registers = vec![a8, u32::from(u1 & 0xff), u32::from(u1 >> 8)],
        F22b => {
            insn.registers = vec![a8, u32::from(u1 & 0xff)];
            insn.literal = Some(i64::from((u1 as i16) >> 8));
        }
        F22t => {
            insn.registers = vec![a4, b4];
            insn.branch = Some(i32::from(u1 as i16));
        }
        F22s => {
            insn.registers = vec![a4, b4];
            insn.literal = Some(i64::from(u1 as i16));
        }
        F22c => {
            insn.registers = vec![a4, b4];
            insn.index = Some(u32::from(u1));
        }
        F30t => insn.branch = Some(unit32(insns, pos + 1)? as i32),
        F32x => insn.registers = vec![u32::from(u1), u32::from(unit(insns, pos + 2)?)],
        F31i => {
            insn.registers = vec![a8];
            insn.literal = Some(i64::from(unit32(insns, pos + 1)? as i32));
        }
        F31t => {
            insn.registers = vec![a8];
            insn.branch = Some(unit32(insns, pos + 1)? as i32);
        }
        F31c => {
            insn.registers = vec![a8];
            insn.index = Some(unit32(insns, pos + 1)?);
        }
        F35c | F45cc => {
            let count = b4 as usize;
            if count > 5 {
                return Err(FormatError::Malformed(format!(
                    "{} at unit {pos:#x} lists {count} registers",
                    info.name
                )));
            }
            let u2 = unit(insns, pos + 2)?;
            let all = [
                u32::from(u2 & 0xf),
                u32::from((u2 >> 4) & 0xf),
                u32::from((u2 >> 8) & 0xf),
                u32::from(u2 >> 12),
                a4,
            ];
            insn.registers = all[..count].to_vec();
            insn.index = Some(u32::from(u1));
            if info.format == F45cc {
                insn.proto = Some(u32::from(unit(insns, pos + 3)?));
            }
        }
        F3rc | F4rcc => {
            let first = u32::from(unit(insns, pos + 2)?);
            insn.registers = (first..first + a8).collect();
            insn.range = true;
            insn.index = Some(u32::from(u1));
            if info.format == F4rcc {
                insn.proto = Some(u32::from(unit(insns, pos + 3)?));
            }
        }
        F51l => {
            insn.registers = vec![a8];
            let mut value = 0u64;
            for i in 0..4 {
                value |= u64::from(unit(insns, pos + 1 + i)?) << (16 * i);
            }
            insn.literal = Some(value as i64);
        }
    }

    Ok(insn)
}

fn decode_payload(insns: &[u16], pos: usize, u0: u16) -> FormatResult<Instruction> {
    let ident = u0 >> 8;
    let (units, payload) = match ident {
        0x01 => {
            let size = usize::from(unit(insns, pos + 1)?);
            let first_key = unit32(insns, pos + 2)? as i32;
            let mut targets = Vec::with_capacity(size);
            for i in 0..size {
                targets.push(unit32(insns, pos + 4 + i * 2)? as i32);
            }
            (size * 2 + 4, Payload::PackedSwitch { first_key, targets })
        }
        0x02 => {
            let size = usize::from(unit(insns, pos + 1)?);
            let mut keys = Vec::with_capacity(size);
            let mut targets = Vec::with_capacity(size);
            for i in 0..size {
                keys.push(unit32(insns, pos + 2 + i * 2)? as i32);
            }
            for i in 0..size {
                targets.push(unit32(insns, pos + 2 + size * 2 + i * 2)? as i32);
            }
            (size * 4 + 2, Payload::SparseSwitch { keys, targets })
        }
        0x03 => {
            let width = unit(insns, pos + 1)?;
            let count = unit32(insns, pos + 2)? as usize;
            let data_units = (count as u64 * u64::from(width)).div_ceil(2) as usize;
            let units = data_units + 4;
            if pos + units > insns.len() || !matches!(width, 1 | 2 | 4 | 8) {
                return Err(FormatError::Malformed(format!(
                    "array payload at unit {pos:#x}"
                )));
            }
            let bytes: Vec<u8> = insns[pos + 4..pos + units]
                .iter()
                .flat_map(|u| u.to_le_bytes())
                .collect();
            let w = usize::from(width);
            let elements = (0..count)
                .map(|i| {
                    let chunk = &bytes[i * w..i * w + w];
                    let mut raw = 0u64;
                    for (shift, b) in chunk.iter().enumerate() {
                        raw |= u64::from(*b) << (8 * shift);
                    }
                    let bits = (w * 8) as u32;
                    if bits == 64 {
                        raw as i64
                    } else {
                        ((raw << (64 - bits)) as i64) >> (64 - bits)
                    }
                })
                .collect();
            (units, Payload::ArrayData { width, elements })
        }
        _ => {
            return Err(FormatError::Malformed(format!(
                "unknown payload {ident:#x} at unit {pos:#x}"
            )));
        }
    };

    if pos + units > insns.len() {
        return Err(FormatError::Malformed(format!(
            "payload at unit {pos:#x} runs past the end of code"
        )));
    }

    let mut insn = Instruction::new(pos, units, 0x00);
    insn.payload = Some(payload);
    Ok(insn)
}
