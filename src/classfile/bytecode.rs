//! JVM opcode table, decoder and javap-style listing.

use super::{ConstantPool, JvmCode};
use crate::bytes::ByteReader;
use crate::error::{FormatError, FormatResult};
use crate::model::CodeRef;

const NAMES: [&str; 202] = [
    "nop", "aconst_null", "iconst_m1", "iconst_0", "iconst_1", "iconst_2", "iconst_3", "iconst_4",
    "iconst_5", "lconst_0", "lconst_1", "fconst_0", "fconst_1", "fconst_2", "dconst_0", "dconst_1",
    "bipush", "sipush", "ldc", "ldc_w", "ldc2_w", "iload", "lload", "fload", "dload", "aload",
    "iload_0", "iload_1", "iload_2", "iload_3", "lload_0", "lload_1", "lload_2", "lload_3",
    "fload_0", "fload_1", "fload_2", "fload_3", "dload_0", "dload_1", "dload_2", "dload_3",
    "aload_0", "aload_1", "aload_2", "aload_3", "iaload", "laload", "faload", "daload", "aaload",
    "baload", "caload", "saload", "istore", "lstore", "fstore", "dstore", "astore", "istore_0",
    "istore_1", "istore_2", "istore_3", "lstore_0", "lstore_1", "lstore_2", "lstore_3",
    "fstore_0", "fstore_1", "fstore_2", "fstore_3", "dstore_0", "dstore_1", "dstore_2",
    "dstore_3", "astore_0", "astore_1", "astore_2", "astore_3", "iastore", "lastore", "fastore",
    "dastore", "aastore", "bastore", "castore", "sastore", "pop", "pop2", "dup", "dup_x1",
    "dup_x2", "dup2", "dup2_x1", "dup2_x2", "swap", "iadd", "ladd", "fadd", "dadd", "isub", "lsub",
    "fsub", "dsub", "imul", "lmul", "fmul", "dmul", "idiv", "ldiv", "fdiv", "ddiv", "irem", "lrem",
    "frem", "drem", "ineg", "lneg", "fneg", "dneg", "ishl", "lshl", "ishr", "lshr", "iushr",
    "lushr", "iand", "land", "ior", "lor", "ixor", "lxor", "iinc", "i2l", "i2f", "i2d", "l2i",
    "l2f", "l2d", "f2i", "f2l", "f2d", "d2i", "d2l", "d2f", "i2b", "i2c", "i2s", "lcmp", "fcmpl",
    "fcmpg", "dcmpl", "dcmpg", "ifeq", "ifne", "iflt", "ifge", "ifgt", "ifle", "if_icmpeq",
    "if_icmpne", "if_icmplt", "if_icmpge", "if_icmpgt", "if_icmple", "if_acmpeq", "if_acmpne",
    "goto", "jsr", "ret", "tableswitch", "lookupswitch", "ireturn", "lreturn", "freturn",
    "dreturn", "areturn", "return", "getstatic", "putstatic", "getfield", "putfield",
    "invokevirtual", "invokespecial", "invokestatic", "invokeinterface", "invokedynamic", "new",
    "newarray", "anewarray", "arraylength", "athrow", "checkcast", "instanceof", "monitorenter",
    "monitorexit", "wide", "multianewarray", "ifnull", "ifnonnull", "goto_w", "jsr_w",
];

pub fn opcode_name(op: u8) -> Option<&'static str> {
    NAMES.get(usize::from(op)).copied()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Local(u16),
    Int(i32),
    Constant(u16),
    /// Absolute bytecode offset.
    Branch(usize),
    Iinc { index: u16, delta: i16 },
    Interface { index: u16, count: u8 },
    NewArray(u8),
    MultiArray { index: u16, dims: u8 },
    TableSwitch { default: usize, low: i32, targets: Vec<usize> },
    LookupSwitch { default: usize, pairs: Vec<(i32, usize)> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct JvmInstruction {
    pub offset: usize,
    pub opcode: u8,
    pub wide: bool,
    pub operand: Operand,
}

impl JvmInstruction {
    pub fn name(&self) -> &'static str {
        opcode_name(self.opcode).unwrap_or("invalid")
    }
}

fn branch(offset: usize, delta: i32) -> FormatResult<usize> {
    usize::try_from(offset as i64 + i64::from(delta))
        .map_err(|_| FormatError::Malformed(format!("branch before code start at {offset}")))
}

fn decode_at(r: &mut ByteReader<'_>) -> FormatResult<JvmInstruction> {
    let offset = r.position();
    let mut opcode = r.u8()?;
    let mut wide = false;
    if opcode == 196 {
        wide = true;
        opcode = r.u8()?;
    }

    let operand = match opcode {
        16 => Operand::Int(i32::from(r.u8()? as i8)),
        17 => Operand::Int(i32::from(r.u16_be()? as i16)),
        18 => Operand::Constant(u16::from(r.u8()?)),
        19 | 20 | 178..=184 | 187 | 189 | 192 | 193 => Operand::Constant(r.u16_be()?),
        21..=25 | 54..=58 | 169 => {
            if wide {
                Operand::Local(r.u16_be()?)
            } else {
                Operand::Local(u16::from(r.u8()?))
            }
        }
        132 => {
            if wide {
                Operand::Iinc {
                    index: r.u16_be()?,
                    delta: r.u16_be()? as i16,
                }
            } else {
                Operand::Iinc {
                    index: u16::from(r.u8()?),
                    delta: i16::from(r.u8()? as i8),
                }
            }
        }
        153..=168 | 198 | 199 => Operand::Branch(branch(offset, i32::from(r.u16_be()? as i16))?),
        200 | 201 => Operand::Branch(branch(offset, r.i32_be()?)?),
        170 => {
            let pad = (4 - (offset + 1) % 4) % 4;
            r.skip(pad)?;
            let default = branch(offset, r.i32_be()?)?;
            let low = r.i32_be()?;
            let high = r.i32_be()?;
            let count = (i64::from(high) - i64::from(low) + 1) as usize;
            if high < low || count > r.remaining() / 4 {
                return Err(FormatError::Malformed(format!("tableswitch at {offset}")));
            }
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(branch(offset, r.i32_be()?)?);
            }
            Operand::TableSwitch {
                default,
                low,
                targets,
            }
        }
        171 => {
            let pad = (4 - (offset + 1) % 4) % 4;
            r.skip(pad)?;
            let default = branch(offset, r.i32_be()?)?;
            let npairs = r.i32_be()?;
            if npairs < 0 || npairs as usize > r.remaining() / 8 {
                return Err(FormatError::Malformed(format!("lookupswitch at {offset}")));
            }
            let mut pairs = Vec::with_capacity(npairs as usize);
            for _ in 0..npairs {
                let key = r.i32_be()?;
                pairs.push((key, branch(offset, r.i32_be()?)?));
            }
            Operand::LookupSwitch { default, pairs }
        }
        185 => {
            let index = r.u16_be()?;
            let count = r.u8()?;
            r.skip(1)?;
            Operand::Interface { index, count }
        }
        186 => {
            let index = r.u16_be()?;
            r.skip(2)?;
            Operand::Constant(index)
        }
        188 => Operand::NewArray(r.u8()?),
        197 => Operand::MultiArray {
            index: r.u16_be()?,
            dims: r.u8()?,
        },
        op if usize::from(op) >= NAMES.len() || op == 196 => {
            return Err(FormatError::Malformed(format!("opcode {op} at {offset}")));
        }
        _ => Operand::None,
    };

    if wide && !matches!(opcode, 21..=25 | 54..=58 | 132 | 169) {
        return Err(FormatError::Malformed(format!("wide {opcode} at {offset}")));
    }

    Ok(JvmInstruction {
        offset,
        opcode,
        wide,
        operand,
    })
}

/// Decodes the whole code array, stopping at the first malformed instruction.
pub fn decode_all(code: &[u8]) -> (Vec<JvmInstruction>, Option<FormatError>) {
    let mut r = ByteReader::new(code);
    let mut out = Vec::new();
    while r.remaining() > 0 {
        match decode_at(&mut r) {
            Ok(insn) => out.push(insn),
            Err(err) => return (out, Some(err)),
        }
    }
    (out, None)
}

fn array_type(code: u8) -> &'static str {
    match code {
        4 => "boolean",
        5 => "char",
        6 => "float",
        7 => "double",
        8 => "byte",
        9 => "short",
        10 => "int",
        11 => "long",
        _ => "?",
    }
}

fn render(insn: &JvmInstruction, pool: &ConstantPool) -> Vec<String> {
    let head = format!("{:>4}: {}{}", insn.offset, if insn.wide { "wide " } else { "" }, insn.name());
    let first = match &insn.operand {
        Operand::None => head,
        Operand::Local(idx) => format!("{head} {idx}"),
        Operand::Int(v) => format!("{head} {v}"),
        Operand::Constant(idx) => format!("{head} {}", pool.describe(*idx)),
        Operand::Branch(target) => format!("{head} {target}"),
        Operand::Iinc { index, delta } => format!("{head} {index}, {delta}"),
        Operand::Interface { index, count } => format!("{head} {}, {count}", pool.describe(*index)),
        Operand::NewArray(t) => format!("{head} {}", array_type(*t)),
        Operand::MultiArray { index, dims } => format!("{head} {}, {dims}", pool.describe(*index)),
        Operand::TableSwitch {
            default,
            low,
            targets,
        } => {
            let mut lines = vec![format!("{head} {{")];
            lines.extend(
                targets
                    .iter()
                    .enumerate()
                    .map(|(i, t)| format!("      {}: {t}", i64::from(*low) + i as i64)),
            );
            lines.push(format!("      default: {default}"));
            lines.push("      }".to_string());
            return lines;
        }
        Operand::LookupSwitch { default, pairs } => {
            let mut lines = vec![format!("{head} {{")];
            lines.extend(pairs.iter().map(|(k, t)| format!("      {k}: {t}")));
            lines.push(format!("      default: {default}"));
            lines.push("      }".to_string());
            return lines;
        }
    };
    vec![first]
}

pub fn listing(code: &JvmCode) -> Vec<String> {
    let (insns, error) = decode_all(&code.code);
    let mut lines: Vec<String> = insns.iter().flat_map(|i| render(i, &code.pool)).collect();
    for entry in &code.exception_table {
        lines.push(format!(
            "catch {} from {} to {} using {}",
            entry.catch_type.as_deref().unwrap_or("any"),
            entry.start,
            entry.end,
            entry.handler
        ));
    }
    if let Some(err) = error {
        lines.push(format!("// disassembly stopped: {err}"));
    }
    lines
}

pub fn references(code: &[u8], pool: &ConstantPool) -> Vec<CodeRef> {
    let (insns, _) = decode_all(code);
    let mut refs = Vec::new();
    for insn in insns {
        let resolved = match (&insn.operand, insn.opcode) {
            (Operand::Constant(idx), 178..=181) => pool.member_ref(*idx).ok().map(CodeRef::Field),
            (Operand::Constant(idx), 182..=184) | (Operand::Interface { index: idx, .. }, 185) => {
                pool.member_ref(*idx).ok().map(CodeRef::Method)
            }
            (Operand::Constant(idx), 187 | 189 | 192 | 193)
            | (Operand::MultiArray { index: idx, .. }, 197) => {
                pool.class_descriptor(*idx).ok().map(CodeRef::Type)
            }
            (Operand::Constant(idx), 18 | 19) => match pool.get(*idx) {
                Ok(super::Constant::Class(_)) => pool.class_descriptor(*idx).ok().map(CodeRef::Type),
                _ => None,
            },
            _ => None,
        };
        refs.extend(resolved);
    }
    refs
}
