use std::sync::Arc;

use log::{debug, warn};

use super::{CatchHandler, DexCode, DexPool, Proto, TryBlock};
use crate::bytes::ByteReader;
use crate::error::{FormatError, FormatResult};
use crate::model::{AccessFlags, ClassDef, ConstValue, FieldDef, MemberRef, MethodBody, MethodDef};

const HEADER_SIZE: u32 = 0x70;
const ENDIAN_CONSTANT: u32 = 0x1234_5678;
const NO_INDEX: u32 = 0xffff_ffff;
/// Nesting limit for encoded arrays and annotations inside encoded values.
const MAX_VALUE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy)]
struct Header {
    string_ids: (u32, u32),
    type_ids: (u32, u32),
    proto_ids: (u32, u32),
    field_ids: (u32, u32),
    method_ids: (u32, u32),
    class_defs: (u32, u32),
}

/// Parses every class definition of a DEX file.
///
/// Classes that fail to decode are logged and skipped; a broken header or id
/// table fails the whole file.
pub fn parse_dex(data: &[u8]) -> FormatResult<Vec<ClassDef>> {
    let header = read_header(data)?;
    let pool = Arc::new(read_pool(data, &header)?);

    let (count, off) = header.class_defs;
    check_table(data, "class_def", count, off, 32)?;

    let mut classes = Vec::with_capacity(count as usize);
    for i in 0..count {
        let item_off = off as usize + i as usize * 32;
        match read_class_def(data, item_off, &pool) {
            Ok(class) => classes.push(class),
            Err(err) => warn!("Skipping class_def #{i}: {err}"),
        }
    }
    debug!(
        "Parsed DEX: {} strings, {} types, {} methods, {} classes",
        pool.strings.len(),
        pool.types.len(),
        pool.methods.len(),
        classes.len()
    );
    Ok(classes)
}

pub fn has_dex_magic(data: &[u8]) -> bool {
    data.len() >= 8
        && &data[..4] == b"dex\n"
        && data[4..7].iter().all(u8::is_ascii_digit)
        && data[7] == 0
}

fn read_header(data: &[u8]) -> FormatResult<Header> {
    if !has_dex_magic(data) {
        let shown = &data[..data.len().min(8)];
        return Err(FormatError::BadMagic(format!("expected dex\\n0xx\\0, found {shown:02x?}")));
    }

    let mut r = ByteReader::at(data, 36)?;
    let header_size = r.u32_le()?;
    if header_size != HEADER_SIZE {
        return Err(FormatError::Malformed(format!("DEX header size {header_size:#x}")));
    }
    let endian = r.u32_le()?;
    if endian != ENDIAN_CONSTANT {
        return Err(FormatError::Malformed(format!("DEX endian tag {endian:#x}")));
    }

    r.seek(56)?;
    let mut pair = || -> FormatResult<(u32, u32)> { Ok((r.u32_le()?, r.u32_le()?)) };
    Ok(Header {
        string_ids: pair()?,
        type_ids: pair()?,
        proto_ids: pair()?,
        field_ids: pair()?,
        method_ids: pair()?,
        class_defs: pair()?,
    })
}

fn check_table(data: &[u8], kind: &str, count: u32, off: u32, item_size: usize) -> FormatResult<()> {
    let end = (count as usize)
        .checked_mul(item_size)
        .and_then(|len| len.checked_add(off as usize));
    match end {
        Some(end) if end <= data.len() => Ok(()),
        _ => Err(FormatError::Malformed(format!(
            "{kind} table ({count} items at {off:#x}) exceeds file size {}",
            data.len()
        ))),
    }
}

fn lookup<'a, T>(table: &'a [T], kind: &'static str, idx: u32) -> FormatResult<&'a T> {
    table.get(idx as usize).ok_or(FormatError::IndexOutOfRange {
        kind,
        index: idx as usize,
        len: table.len(),
    })
}

fn read_pool(data: &[u8], header: &Header) -> FormatResult<DexPool> {
    let (count, off) = header.string_ids;
    check_table(data, "string_id", count, off, 4)?;
    let mut strings = Vec::with_capacity(count as usize);
    let mut ids = ByteReader::at(data, off as usize)?;
    for _ in 0..count {
        let data_off = ids.u32_le()? as usize;
        let mut r = ByteReader::at(data, data_off)?;
        let _utf16_len = r.uleb128()?;
        strings.push(r.mutf8_cstr()?);
    }

    let (count, off) = header.type_ids;
    check_table(data, "type_id", count, off, 4)?;
    let mut types = Vec::with_capacity(count as usize);
    let mut r = ByteReader::at(data, off as usize)?;
    for _ in 0..count {
        types.push(lookup(&strings, "string", r.u32_le()?)?.clone());
    }

    let (count, off) = header.proto_ids;
    check_table(data, "proto_id", count, off, 12)?;
    let mut protos = Vec::with_capacity(count as usize);
    let mut r = ByteReader::at(data, off as usize)?;
    for _ in 0..count {
        let _shorty = r.u32_le()?;
        let ret = lookup(&types, "type", r.u32_le()?)?.clone();
        let params_off = r.u32_le()?;
        let params = read_type_list(data, params_off, &types)?;
        protos.push(Proto { params, ret });
    }

    let (count, off) = header.field_ids;
    check_table(data, "field_id", count, off, 8)?;
    let mut fields = Vec::with_capacity(count as usize);
    let mut r = ByteReader::at(data, off as usize)?;
    for _ in 0..count {
        let owner = lookup(&types, "type", u32::from(r.u16_le()?))?.clone();
        let descriptor = lookup(&types, "type", u32::from(r.u16_le()?))?.clone();
        let name = lookup(&strings, "string", r.u32_le()?)?.clone();
        fields.push(MemberRef {
            owner,
            name,
            descriptor,
        });
    }

    let (count, off) = header.method_ids;
    check_table(data, "method_id", count, off, 8)?;
    let mut methods = Vec::with_capacity(count as usize);
    let mut r = ByteReader::at(data, off as usize)?;
    for _ in 0..count {
        let owner = lookup(&types, "type", u32::from(r.u16_le()?))?.clone();
        let descriptor = lookup(&protos, "proto", u32::from(r.u16_le()?))?.descriptor();
        let name = lookup(&strings, "string", r.u32_le()?)?.clone();
        methods.push(MemberRef {
            owner,
            name,
            descriptor,
        });
    }

    Ok(DexPool {
        strings,
        types,
        protos,
        fields,
        methods,
    })
}

fn read_type_list(data: &[u8], off: u32, types: &[String]) -> FormatResult<Vec<String>> {
    if off == 0 {
        return Ok(Vec::new());
    }
    let mut r = ByteReader::at(data, off as usize)?;
    let size = r.u32_le()?;
    check_table(data, "type_list", size, off.saturating_add(4), 2)?;
    (0..size)
        .map(|_| Ok(lookup(types, "type", u32::from(r.u16_le()?))?.clone()))
        .collect()
}

fn read_class_def(data: &[u8], off: usize, pool: &Arc<DexPool>) -> FormatResult<ClassDef> {
    let mut r = ByteReader::at(data, off)?;
    let descriptor = lookup(&pool.types, "type", r.u32_le()?)?.clone();
    let access = AccessFlags(r.u32_le()?);
    let super_idx = r.u32_le()?;
    let interfaces_off = r.u32_le()?;
    let source_idx = r.u32_le()?;
    let _annotations_off = r.u32_le()?;
    let class_data_off = r.u32_le()?;
    let static_values_off = r.u32_le()?;

    let mut class = ClassDef::new(descriptor, access)?;
    if super_idx != NO_INDEX {
        class.super_class = Some(lookup(&pool.types, "type", super_idx)?.clone());
    }
    class.interfaces = read_type_list(data, interfaces_off, &pool.types)?;
    if source_idx != NO_INDEX {
        class.source_file = Some(lookup(&pool.strings, "string", source_idx)?.clone());
    }
    if class_data_off == 0 {
        return Ok(class);
    }

    let static_values = if static_values_off == 0 {
        Vec::new()
    } else {
        let mut r = ByteReader::at(data, static_values_off as usize)?;
        read_encoded_array(&mut r, pool, 0)?
    };

    let mut r = ByteReader::at(data, class_data_off as usize)?;
    let static_fields = r.uleb128()?;
    let instance_fields = r.uleb128()?;
    let direct_methods = r.uleb128()?;
    let virtual_methods = r.uleb128()?;

    for (group, count) in [static_fields, instance_fields].into_iter().enumerate() {
        let mut idx = 0u32;
        for i in 0..count {
            idx = idx.wrapping_add(r.uleb128()?);
            let flags = AccessFlags(r.uleb128()?);
            let field = lookup(&pool.fields, "field", idx)?;
            let value = if group == 0 {
                static_values.get(i as usize).cloned()
            } else {
                None
            };
            class.fields.push(FieldDef::new(
                &class.name,
                field.name.clone(),
                field.descriptor.clone(),
                flags,
                value,
            )?);
        }
    }

    for count in [direct_methods, virtual_methods] {
        let mut idx = 0u32;
        for _ in 0..count {
            idx = idx.wrapping_add(r.uleb128()?);
            let flags = AccessFlags(r.uleb128()?);
            let code_off = r.uleb128()?;
            let method = lookup(&pool.methods, "method", idx)?;
            let body = if code_off == 0 {
                None
            } else {
                Some(MethodBody::Dex(read_code(data, code_off, pool)?))
            };
            class.methods.push(MethodDef::new(
                &class.name,
                method.name.clone(),
                method.descriptor.clone(),
                flags,
                body,
            )?);
        }
    }

    Ok(class)
}

fn read_code(data: &[u8], off: u32, pool: &Arc<DexPool>) -> FormatResult<DexCode> {
    let mut r = ByteReader::at(data, off as usize)?;
    let registers = r.u16_le()?;
    let ins = r.u16_le()?;
    let _outs = r.u16_le()?;
    let tries_size = r.u16_le()?;
    let _debug_info_off = r.u32_le()?;
    let insns_size = r.u32_le()?;
    check_table(data, "insns", insns_size, r.position() as u32, 2)?;
    let insns = (0..insns_size)
        .map(|_| r.u16_le())
        .collect::<FormatResult<Vec<u16>>>()?;

    let mut tries = Vec::with_capacity(usize::from(tries_size));
    if tries_size > 0 {
        if insns_size % 2 == 1 {
            r.skip(2)?;
        }
        let mut raw = Vec::with_capacity(usize::from(tries_size));
        for _ in 0..tries_size {
            raw.push((r.u32_le()?, r.u16_le()?, r.u16_le()?));
        }
        let handlers_base = r.position();
        for (start, count, handler_off) in raw {
            let mut h = ByteReader::at(data, handlers_base + usize::from(handler_off))?;
            let size = h.sleb128()?;
            let mut handlers = Vec::new();
            for _ in 0..size.unsigned_abs() {
                let type_idx = h.uleb128()?;
                let address = h.uleb128()?;
                handlers.push(CatchHandler {
                    exception: Some(lookup(&pool.types, "type", type_idx)?.clone()),
                    address,
                });
            }
            if size <= 0 {
                handlers.push(CatchHandler {
                    exception: None,
                    address: h.uleb128()?,
                });
            }
            tries.push(TryBlock {
                start,
                count,
                handlers,
            });
        }
    }

    Ok(DexCode {
        registers,
        ins,
        insns,
        tries,
        pool: Arc::clone(pool),
    })
}

fn read_encoded_array(r: &mut ByteReader<'_>, pool: &DexPool, depth: usize) -> FormatResult<Vec<ConstValue>> {
    if depth > MAX_VALUE_DEPTH {
        return Err(FormatError::Malformed(format!(
            "encoded values nested deeper than {MAX_VALUE_DEPTH} at {:#x}",
            r.position()
        )));
    }
    let size = r.uleb128()?;
    if size as usize > r.remaining() {
        return Err(FormatError::Malformed(format!("encoded_array of {size} items")));
    }
    (0..size).map(|_| read_encoded_value(r, pool, depth)).collect()
}

fn read_sized(r: &mut ByteReader<'_>, len: usize, sign_extend: bool) -> FormatResult<u64> {
    let bytes = r.bytes(len)?;
    let mut value = 0u64;
    for (i, b) in bytes.iter().enumerate() {
        value |= u64::from(*b) << (8 * i);
    }
    let bits = (len * 8) as u32;
    if sign_extend && bits < 64 {
        value = (((value << (64 - bits)) as i64) >> (64 - bits)) as u64;
    }
    Ok(value)
}

/// Reads bytes that fill the high end of a `width`-byte value (float/double encoding).
fn read_right_extended(r: &mut ByteReader<'_>, len: usize, width: usize) -> FormatResult<u64> {
    let raw = read_sized(r, len, false)?;
    Ok(raw << (8 * (width - len)))
}

fn read_encoded_value(r: &mut ByteReader<'_>, pool: &DexPool, depth: usize) -> FormatResult<ConstValue> {
    let header = r.u8()?;
    let arg = usize::from(header >> 5);
    let len = arg + 1;
    let value = match header & 0x1f {
        0x00 => ConstValue::Byte(read_sized(r, 1, true)? as i8),
        0x02 => ConstValue::Short(read_sized(r, len, true)? as i16),
        0x03 => ConstValue::Char(read_sized(r, len, false)? as u16),
        0x04 => ConstValue::Int(read_sized(r, len, true)? as i32),
        0x06 => ConstValue::Long(read_sized(r, len, true)? as i64),
        0x10 if len <= 4 => ConstValue::Float(f32::from_bits(read_right_extended(r, len, 4)? as u32)),
        0x11 => ConstValue::Double(f64::from_bits(read_right_extended(r, len, 8)?)),
        0x15 => {
            let idx = read_sized(r, len, false)? as u32;
            let proto = lookup(&pool.protos, "proto", idx)?;
            ConstValue::Other(proto.descriptor())
        }
        0x16 => ConstValue::Other(format!("method_handle@{}", read_sized(r, len, false)?)),
        0x17 => {
            let idx = read_sized(r, len, false)? as u32;
            ConstValue::String(lookup(&pool.strings, "string", idx)?.clone())
        }
        0x18 => {
            let idx = read_sized(r, len, false)? as u32;
            ConstValue::Type(lookup(&pool.types, "type", idx)?.clone())
        }
        0x19 | 0x1b => {
            let idx = read_sized(r, len, false)? as u32;
            ConstValue::Other(lookup(&pool.fields, "field", idx)?.smali_field())
        }
        0x1a => {
            let idx = read_sized(r, len, false)? as u32;
            ConstValue::Other(lookup(&pool.methods, "method", idx)?.smali_method())
        }
        0x1c => ConstValue::Array(read_encoded_array(r, pool, depth + 1)?),
        0x1d => {
            skip_encoded_annotation(r, pool, depth + 1)?;
            ConstValue::Other("annotation".to_string())
        }
        0x1e => ConstValue::Null,
        0x1f => ConstValue::Bool(arg != 0),
        other => {
            return Err(FormatError::Malformed(format!(
                "encoded_value type {other:#x} at {:#x}",
                r.position() - 1
            )));
        }
    };
    Ok(value)
}

fn skip_encoded_annotation(r: &mut ByteReader<'_>, pool: &DexPool, depth: usize) -> FormatResult<()> {
    if depth > MAX_VALUE_DEPTH {
        return Err(FormatError::Malformed(format!(
            "encoded annotations nested deeper than {MAX_VALUE_DEPTH} at {:#x}",
            r.position()
        )));
    }
    let _type_idx = r.uleb128()?;
    let size = r.uleb128()?;
    for _ in 0..size {
        let _name_idx = r.uleb128()?;
        read_encoded_value(r, pool, depth)?;
    }
    Ok(())
}
