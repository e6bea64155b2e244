use std::sync::Arc;

use super::{Constant, ConstantPool, ExceptionEntry, JvmCode};
use crate::bytes::{ByteReader, decode_mutf8};
use crate::error::{FormatError, FormatResult};
use crate::model::{AccessFlags, ClassDef, FieldDef, MethodBody, MethodDef};
use crate::signature;

const MAGIC: u32 = 0xCAFE_BABE;
const ACC_SUPER: u32 = 0x20;
const ACC_MODULE: u32 = 0x8000;

pub fn has_class_magic(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == MAGIC.to_be_bytes()
}

/// Parses one `.class` file into the shared class model.
pub fn parse_class(data: &[u8]) -> FormatResult<ClassDef> {
    let mut r = ByteReader::new(data);
    let magic = r.u32_be()?;
    if magic != MAGIC {
        return Err(FormatError::BadMagic(format!(
            "expected 0xcafebabe, found {magic:#010x}"
        )));
    }
    let _minor = r.u16_be()?;
    let _major = r.u16_be()?;

    let pool = Arc::new(read_constant_pool(&mut r)?);

    let access = u32::from(r.u16_be()?) & !(ACC_SUPER | ACC_MODULE);
    let this_idx = r.u16_be()?;
    let super_idx = r.u16_be()?;

    let mut class = ClassDef::new(pool.class_descriptor(this_idx)?, AccessFlags(access))?;
    if super_idx != 0 {
        class.super_class = Some(pool.class_descriptor(super_idx)?);
    }
    let interfaces = r.u16_be()?;
    for _ in 0..interfaces {
        class.interfaces.push(pool.class_descriptor(r.u16_be()?)?);
    }

    let fields = r.u16_be()?;
    for _ in 0..fields {
        let field = read_field(&mut r, &pool, &class.name)?;
        class.fields.push(field);
    }

    let methods = r.u16_be()?;
    for _ in 0..methods {
        let method = read_method(&mut r, &pool, &class.name)?;
        class.methods.push(method);
    }

    let attributes = r.u16_be()?;
    for _ in 0..attributes {
        let (name, body) = read_attribute(&mut r, &pool)?;
        match name {
            "SourceFile" => {
                let idx = ByteReader::new(body).u16_be()?;
                class.source_file = Some(pool.utf8(idx)?.to_string());
            }
            "InnerClasses" => {
                if let Some(inner_access) = inner_class_access(body, &pool, this_idx)? {
                    class.access = AccessFlags(inner_access & !ACC_SUPER);
                }
            }
            _ => {}
        }
    }

    Ok(class)
}

fn read_constant_pool(r: &mut ByteReader<'_>) -> FormatResult<ConstantPool> {
    let count = r.u16_be()?;
    let mut entries = Vec::with_capacity(usize::from(count));
    entries.push(Constant::Unusable);

    while entries.len() < usize::from(count) {
        let tag = r.u8()?;
        let entry = match tag {
            1 => {
                let len = usize::from(r.u16_be()?);
                Constant::Utf8(decode_mutf8(r.bytes(len)?))
            }
            3 => Constant::Integer(r.i32_be()?),
            4 => Constant::Float(f32::from_bits(r.u32_be()?)),
            5 => Constant::Long(r.u64_be()? as i64),
            6 => Constant::Double(f64::from_bits(r.u64_be()?)),
            7 => Constant::Class(r.u16_be()?),
            8 => Constant::String(r.u16_be()?),
            9 => Constant::FieldRef {
                class: r.u16_be()?,
                name_and_type: r.u16_be()?,
            },
            10 => Constant::MethodRef {
                class: r.u16_be()?,
                name_and_type: r.u16_be()?,
            },
            11 => Constant::InterfaceMethodRef {
                class: r.u16_be()?,
                name_and_type: r.u16_be()?,
            },
            12 => Constant::NameAndType {
                name: r.u16_be()?,
                descriptor: r.u16_be()?,
            },
            15 => Constant::MethodHandle {
                kind: r.u8()?,
                reference: r.u16_be()?,
            },
            16 => Constant::MethodType(r.u16_be()?),
            17 => Constant::Dynamic {
                bootstrap: r.u16_be()?,
                name_and_type: r.u16_be()?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap: r.u16_be()?,
                name_and_type: r.u16_be()?,
            },
            19 => Constant::Module(r.u16_be()?),
            20 => Constant::Package(r.u16_be()?),
            other => {
                return Err(FormatError::Malformed(format!(
                    "constant pool tag {other} at entry #{}",
                    entries.len()
                )));
            }
        };
        let two_slots = matches!(entry, Constant::Long(_) | Constant::Double(_));
        entries.push(entry);
        if two_slots {
            entries.push(Constant::Unusable);
        }
    }

    Ok(ConstantPool::new(entries))
}

fn read_attribute<'d, 'p>(
    r: &mut ByteReader<'d>,
    pool: &'p ConstantPool,
) -> FormatResult<(&'p str, &'d [u8])> {
    let name = pool.utf8(r.u16_be()?)?;
    let len = r.u32_be()? as usize;
    Ok((name, r.bytes(len)?))
}

fn read_field(r: &mut ByteReader<'_>, pool: &ConstantPool, owner: &str) -> FormatResult<FieldDef> {
    let access = AccessFlags(u32::from(r.u16_be()?));
    let name = pool.utf8(r.u16_be()?)?.to_string();
    let descriptor = pool.utf8(r.u16_be()?)?.to_string();
    let ty = signature::parse_type(&descriptor)?;

    let mut value = None;
    let attributes = r.u16_be()?;
    for _ in 0..attributes {
        let (attr, body) = read_attribute(r, pool)?;
        if attr == "ConstantValue" {
            let idx = ByteReader::new(body).u16_be()?;
            value = Some(pool.constant_value(idx, &ty)?);
        }
    }

    FieldDef::new(owner, name, descriptor, access, value)
}

fn read_method(
    r: &mut ByteReader<'_>,
    pool: &Arc<ConstantPool>,
    owner: &str,
) -> FormatResult<MethodDef> {
    let access = AccessFlags(u32::from(r.u16_be()?));
    let name = pool.utf8(r.u16_be()?)?.to_string();
    let descriptor = pool.utf8(r.u16_be()?)?.to_string();

    let mut body = None;
    let attributes = r.u16_be()?;
    for _ in 0..attributes {
        let (attr, data) = read_attribute(r, pool)?;
        if attr == "Code" {
            body = Some(MethodBody::Jvm(read_code(data, pool)?));
        }
    }

    MethodDef::new(owner, name, descriptor, access, body)
}

fn read_code(data: &[u8], pool: &Arc<ConstantPool>) -> FormatResult<JvmCode> {
    let mut r = ByteReader::new(data);
    let max_stack = r.u16_be()?;
    let max_locals = r.u16_be()?;
    let len = r.u32_be()? as usize;
    let code = r.bytes(len)?.to_vec();

    let entries = r.u16_be()?;
    let mut exception_table = Vec::with_capacity(usize::from(entries));
    for _ in 0..entries {
        let start = r.u16_be()?;
        let end = r.u16_be()?;
        let handler = r.u16_be()?;
        let catch_idx = r.u16_be()?;
        let catch_type = if catch_idx == 0 {
            None
        } else {
            Some(pool.class_descriptor(catch_idx)?)
        };
        exception_table.push(ExceptionEntry {
            start,
            end,
            handler,
            catch_type,
        });
    }

    Ok(JvmCode {
        max_stack,
        max_locals,
        code,
        exception_table,
        pool: Arc::clone(pool),
    })
}

/// Access flags recorded for this class in its own `InnerClasses` table.
fn inner_class_access(body: &[u8], pool: &ConstantPool, this_idx: u16) -> FormatResult<Option<u32>> {
    let mut r = ByteReader::new(body);
    let count = r.u16_be()?;
    let this_name = pool.class_descriptor(this_idx)?;
    for _ in 0..count {
        let inner = r.u16_be()?;
        let _outer = r.u16_be()?;
        let _name = r.u16_be()?;
        let access = r.u16_be()?;
        if inner != 0 && pool.class_descriptor(inner)? == this_name {
            return Ok(Some(u32::from(access)));
        }
    }
    Ok(None)
}
