//! Smali text for Dalvik method bodies.

use std::collections::{BTreeSet, HashMap};

use super::opcodes::{self, Format, Instruction, Payload, RefKind};
use super::{DexCode, DexPool};
use crate::model::{quote_string, smali_hex};

pub fn label(addr: usize) -> String {
    format!(":addr_{addr:x}")
}

/// Listing of a method body: instructions, `:addr_N` labels, payload blocks and
/// `.catch` directives.
pub fn disassemble(code: &DexCode) -> Vec<String> {
    let decoded = opcodes::decode_all(&code.insns);

    // payload address -> address of the switch that uses it
    let mut switch_of_payload: HashMap<usize, usize> = HashMap::new();
    let mut labels: BTreeSet<usize> = BTreeSet::new();
    for insn in &decoded.instructions {
        if let Some(target) = insn.branch_target() {
            if matches!(insn.opcode, 0x2b | 0x2c) {
                switch_of_payload.insert(target, insn.offset);
            }
            labels.insert(target);
        }
    }
    for insn in &decoded.instructions {
        if let Some(Payload::PackedSwitch { targets, .. } | Payload::SparseSwitch { targets, .. }) =
            &insn.payload
            && let Some(base) = switch_of_payload.get(&insn.offset)
        {
            labels.extend(targets.iter().filter_map(|t| relative(*base, *t)));
        }
    }
    for block in &code.tries {
        labels.insert(block.start as usize);
        labels.insert(block.start as usize + usize::from(block.count));
        labels.extend(block.handlers.iter().map(|h| h.address as usize));
    }

    let mut lines = Vec::with_capacity(decoded.instructions.len() + labels.len());
    for insn in &decoded.instructions {
        if labels.contains(&insn.offset) {
            lines.push(label(insn.offset));
        }
        match &insn.payload {
            Some(payload) => {
                let base = switch_of_payload.get(&insn.offset).copied();
                lines.extend(render_payload(payload, base));
            }
            None => lines.push(render_instruction(insn, &code.pool)),
        }
    }
    let end = code.insns.len();
    if labels.contains(&end) {
        lines.push(label(end));
    }

    for block in &code.tries {
        let start = block.start as usize;
        let end = start + usize::from(block.count);
        for handler in &block.handlers {
            let range = format!("{{{} .. {}}}", label(start), label(end));
            let target = label(handler.address as usize);
            lines.push(match &handler.exception {
                Some(ty) => format!(".catch {ty} {range} {target}"),
                None => format!(".catchall {range} {target}"),
            });
        }
    }

    if let Some(err) = decoded.error {
        lines.push(format!("# disassembly stopped: {err}"));
    }
    lines
}

fn relative(base: usize, delta: i32) -> Option<usize> {
    usize::try_from(base as i64 + i64::from(delta)).ok()
}

fn register_list(insn: &Instruction) -> String {
    if insn.range {
        match (insn.registers.first(), insn.registers.last()) {
            (Some(first), Some(last)) => format!("{{v{first} .. v{last}}}"),
            _ => "{}".to_string(),
        }
    } else {
        let regs = insn
            .registers
            .iter()
            .map(|r| format!("v{r}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{regs}}}")
    }
}

fn render_reference(kind: RefKind, idx: u32, pool: &DexPool) -> String {
    let resolved = match kind {
        RefKind::String => pool.string(idx).map(quote_string),
        RefKind::Type => pool.type_desc(idx).map(str::to_string),
        RefKind::Field => pool.field(idx).map(|f| f.smali_field()),
        RefKind::Method => pool.method(idx).map(|m| m.smali_method()),
        RefKind::Proto => pool.proto(idx).map(|p| p.descriptor()),
        RefKind::CallSite => Some(format!("call_site_{idx}")),
        RefKind::MethodHandle => Some(format!("method_handle@{idx}")),
        RefKind::None => None,
    };
    resolved.unwrap_or_else(|| format!("{kind:?}@{idx}").to_lowercase())
}

pub fn render_instruction(insn: &Instruction, pool: &DexPool) -> String {
    let mut operands: Vec<String> = Vec::new();

    if matches!(insn.info.format, Format::F35c | Format::F3rc | Format::F45cc | Format::F4rcc) {
        operands.push(register_list(insn));
    } else {
        operands.extend(insn.registers.iter().map(|r| format!("v{r}")));
    }

    if let Some(literal) = insn.literal {
        let wide = matches!(insn.opcode, 0x16..=0x19);
        operands.push(if wide {
            format!("{}L", smali_hex(literal))
        } else {
            smali_hex(literal)
        });
    }
    if let Some(target) = insn.branch_target() {
        operands.push(label(target));
    }
    if let Some(idx) = insn.index {
        operands.push(render_reference(insn.info.reference, idx, pool));
    }
    if let Some(proto) = insn.proto {
        operands.push(render_reference(RefKind::Proto, proto, pool));
    }

    if operands.is_empty() {
        insn.info.name.to_string()
    } else {
        format!("{} {}", insn.info.name, operands.join(", "))
    }
}

fn render_payload(payload: &Payload, switch_at: Option<usize>) -> Vec<String> {
    let target = |delta: &i32| match switch_at.and_then(|base| relative(base, *delta)) {
        Some(addr) => label(addr),
        None => format!("{}  # relative", smali_hex(i64::from(*delta))),
    };
    let mut lines = Vec::new();
    match payload {
        Payload::PackedSwitch { first_key, targets } => {
            lines.push(format!(".packed-switch {}", smali_hex(i64::from(*first_key))));
            lines.extend(targets.iter().map(|t| format!("    {}", target(t))));
            lines.push(".end packed-switch".to_string());
        }
        Payload::SparseSwitch { keys, targets } => {
            lines.push(".sparse-switch".to_string());
            lines.extend(
                keys.iter()
                    .zip(targets)
                    .map(|(k, t)| format!("    {} -> {}", smali_hex(i64::from(*k)), target(t))),
            );
            lines.push(".end sparse-switch".to_string());
        }
        Payload::ArrayData { width, elements } => {
            lines.push(format!(".array-data {width}"));
            let suffix = match width {
                1 => "t",
                2 => "s",
                8 => "L",
                _ => "",
            };
            lines.extend(
                elements
                    .iter()
                    .map(|e| format!("    {}{suffix}", smali_hex(*e))),
            );
            lines.push(".end array-data".to_string());
        }
    }
    lines
}
