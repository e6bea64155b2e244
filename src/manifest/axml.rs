//! Android binary XML decoder.

use std::collections::HashMap;

use crate::bytes::ByteReader;
use crate::error::{FormatError, FormatResult};

pub const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";

const RES_XML_TYPE: u16 = 0x0003;
const RES_STRING_POOL_TYPE: u16 = 0x0001;
const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;
const RES_XML_START_NAMESPACE_TYPE: u16 = 0x0100;
const RES_XML_END_NAMESPACE_TYPE: u16 = 0x0101;
const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;
const RES_XML_END_ELEMENT_TYPE: u16 = 0x0103;
const RES_XML_CDATA_TYPE: u16 = 0x0104;

const UTF8_FLAG: u32 = 0x100;
/// Deepest element nesting `decode_axml` accepts. Rendering and dropping the
/// tree recurse per level, so this also bounds their stack use.
pub const MAX_ELEMENT_DEPTH: usize = 256;
const NO_ENTRY: u32 = 0xffff_ffff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub namespace: Option<String>,
    pub prefix: Option<String>,
    pub name: String,
    pub value: String,
}

impl XmlAttribute {
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub prefix: Option<String>,
    pub name: String,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlElement>,
    pub text: Option<String>,
}

impl XmlElement {
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Attribute in the `android:` namespace, falling back to an unqualified one.
    pub fn android_attr(&self, name: &str) -> Option<&str> {
        let android = self.attributes.iter().find(|a| {
            a.name == name
                && (a.namespace.as_deref() == Some(ANDROID_NS) || a.prefix.as_deref() == Some("android"))
        });
        android
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|a| a.name == name && a.namespace.is_none())
            })
            .map(|a| a.value.as_str())
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name && a.namespace.is_none())
            .map(|a| a.value.as_str())
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub root: XmlElement,
    /// `(prefix, uri)` in declaration order.
    pub namespaces: Vec<(String, String)>,
}

pub fn has_axml_magic(data: &[u8]) -> bool {
    data.len() >= 8 && u16::from_le_bytes([data[0], data[1]]) == RES_XML_TYPE
}

struct ChunkHeader {
    start: usize,
    kind: u16,
    header_size: usize,
    size: usize,
}

fn read_chunk_header(r: &mut ByteReader<'_>) -> FormatResult<ChunkHeader> {
    let start = r.position();
    let kind = r.u16_le()?;
    let header_size = usize::from(r.u16_le()?);
    let size = r.u32_le()? as usize;
    if header_size < 8 || size < header_size {
        return Err(FormatError::Malformed(format!(
            "chunk {kind:#06x} at {start:#x} (header {header_size}, size {size})"
        )));
    }
    Ok(ChunkHeader {
        start,
        kind,
        header_size,
        size,
    })
}

pub fn decode_axml(data: &[u8]) -> FormatResult<XmlDocument> {
    let mut r = ByteReader::new(data);
    let file = read_chunk_header(&mut r)?;
    if file.kind != RES_XML_TYPE {
        return Err(FormatError::BadMagic(format!(
            "expected binary XML chunk 0x0003, found {:#06x}",
            file.kind
        )));
    }
    let end = file.size.min(data.len());
    r.seek(file.header_size)?;

    let mut strings: Vec<String> = Vec::new();
    let mut resource_ids: Vec<u32> = Vec::new();
    let mut namespaces: Vec<(String, String)> = Vec::new();
    let mut prefix_of: HashMap<String, String> = HashMap::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    while r.position() + 8 <= end {
        let chunk = read_chunk_header(&mut r)?;
        let chunk_end = chunk
            .start
            .checked_add(chunk.size)
            .filter(|e| *e <= data.len())
            .ok_or(FormatError::UnexpectedEof {
                offset: chunk.start,
                needed: chunk.size,
            })?;
        let body = &data[chunk.start..chunk_end];

        match chunk.kind {
            RES_STRING_POOL_TYPE => strings = read_string_pool(body, chunk.header_size)?,
            RES_XML_RESOURCE_MAP_TYPE => {
                let mut m = ByteReader::at(body, chunk.header_size)?;
                resource_ids = (0..(chunk.size - chunk.header_size) / 4)
                    .map(|_| m.u32_le())
                    .collect::<FormatResult<_>>()?;
            }
            RES_XML_START_NAMESPACE_TYPE => {
                let mut n = ByteReader::at(body, chunk.header_size)?;
                let prefix = string_at(&strings, n.u32_le()?).unwrap_or_default();
                let uri = string_at(&strings, n.u32_le()?).unwrap_or_default();
                prefix_of.insert(uri.clone(), prefix.clone());
                if !namespaces.iter().any(|(_, u)| *u == uri) {
                    namespaces.push((prefix, uri));
                }
            }
            RES_XML_END_NAMESPACE_TYPE => {}
            RES_XML_START_ELEMENT_TYPE => {
                if stack.len() >= MAX_ELEMENT_DEPTH {
                    return Err(FormatError::Malformed(format!(
                        "elements nested deeper than {MAX_ELEMENT_DEPTH} at {:#x}",
                        chunk.start
                    )));
                }
                let element = read_start_element(body, &chunk, &strings, &resource_ids, &prefix_of)?;
                stack.push(element);
            }
            RES_XML_END_ELEMENT_TYPE => {
                let element = stack.pop().ok_or_else(|| {
                    FormatError::Malformed(format!("unbalanced end element at {:#x}", chunk.start))
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => {
                        if root.is_none() {
                            root = Some(element);
                        }
                    }
                }
            }
            RES_XML_CDATA_TYPE => {
                let mut c = ByteReader::at(body, chunk.header_size)?;
                if let Some(text) = string_at(&strings, c.u32_le()?)
                    && let Some(current) = stack.last_mut()
                {
                    current.text.get_or_insert_with(String::new).push_str(&text);
                }
            }
            _ => {}
        }
        r.seek(chunk_end)?;
    }

    let root = root.ok_or_else(|| FormatError::Malformed("binary XML without root element".to_string()))?;
    Ok(XmlDocument { root, namespaces })
}

fn string_at(strings: &[String], idx: u32) -> Option<String> {
    if idx == NO_ENTRY {
        return None;
    }
    strings.get(idx as usize).cloned()
}

fn read_start_element(
    body: &[u8],
    chunk: &ChunkHeader,
    strings: &[String],
    resource_ids: &[u32],
    prefix_of: &HashMap<String, String>,
) -> FormatResult<XmlElement> {
    let mut r = ByteReader::at(body, chunk.header_size)?;
    let ns = string_at(strings, r.u32_le()?);
    let name = string_at(strings, r.u32_le()?).unwrap_or_default();
    let attribute_start = usize::from(r.u16_le()?);
    let attribute_size = usize::from(r.u16_le()?).max(20);
    let attribute_count = usize::from(r.u16_le()?);

    let mut attributes = Vec::with_capacity(attribute_count);
    for i in 0..attribute_count {
        let mut a = ByteReader::at(body, chunk.header_size + attribute_start + i * attribute_size)?;
        let attr_ns = string_at(strings, a.u32_le()?);
        let name_idx = a.u32_le()?;
        let raw_value = a.u32_le()?;
        let _size = a.u16_le()?;
        let _res0 = a.u8()?;
        let data_type = a.u8()?;
        let data = a.u32_le()?;

        let mut attr_name = string_at(strings, name_idx).unwrap_or_default();
        if attr_name.is_empty()
            && let Some(id) = resource_ids.get(name_idx as usize)
        {
            attr_name = android_attribute_name(*id)
                .map(str::to_string)
                .unwrap_or_else(|| format!("attr_{id:08x}"));
        }

        let value = match string_at(strings, raw_value) {
            Some(raw) if data_type == 0x03 || data_type == 0x00 => raw,
            _ => format_typed_value(data_type, data, strings),
        };

        let prefix = attr_ns.as_ref().and_then(|uri| prefix_of.get(uri).cloned());
        attributes.push(XmlAttribute {
            namespace: attr_ns,
            prefix,
            name: attr_name,
            value,
        });
    }

    let prefix = ns.as_ref().and_then(|uri| prefix_of.get(uri).cloned());
    Ok(XmlElement {
        prefix,
        name,
        attributes,
        children: Vec::new(),
        text: None,
    })
}

fn read_string_pool(body: &[u8], header_size: usize) -> FormatResult<Vec<String>> {
    let mut r = ByteReader::at(body, 8)?;
    let count = r.u32_le()? as usize;
    let _style_count = r.u32_le()?;
    let flags = r.u32_le()?;
    let strings_start = r.u32_le()? as usize;
    let _styles_start = r.u32_le()?;

    if count > body.len() / 4 {
        return Err(FormatError::Malformed(format!("string pool with {count} entries")));
    }
    let utf8 = flags & UTF8_FLAG != 0;
    let mut offsets = ByteReader::at(body, header_size)?;
    let mut strings = Vec::with_capacity(count);
    for _ in 0..count {
        let off = offsets.u32_le()? as usize;
        let mut s = ByteReader::at(body, strings_start.saturating_add(off))?;
        strings.push(if utf8 {
            read_utf8_entry(&mut s)?
        } else {
            read_utf16_entry(&mut s)?
        });
    }
    Ok(strings)
}

fn read_utf8_len(r: &mut ByteReader<'_>) -> FormatResult<usize> {
    let first = usize::from(r.u8()?);
    if first & 0x80 != 0 {
        Ok(((first & 0x7f) << 8) | usize::from(r.u8()?))
    } else {
        Ok(first)
    }
}

fn read_utf8_entry(r: &mut ByteReader<'_>) -> FormatResult<String> {
    let _utf16_len = read_utf8_len(r)?;
    let len = read_utf8_len(r)?;
    Ok(String::from_utf8_lossy(r.bytes(len)?).into_owned())
}

fn read_utf16_entry(r: &mut ByteReader<'_>) -> FormatResult<String> {
    let first = usize::from(r.u16_le()?);
    let len = if first & 0x8000 != 0 {
        ((first & 0x7fff) << 16) | usize::from(r.u16_le()?)
    } else {
        first
    };
    let units = (0..len).map(|_| r.u16_le()).collect::<FormatResult<Vec<u16>>>()?;
    Ok(String::from_utf16_lossy(&units))
}

const RADIX_MULTIPLIERS: [f64; 4] = [
    1.0 / 256.0,
    1.0 / 32768.0,
    1.0 / 8_388_608.0,
    1.0 / 2_147_483_648.0,
];

fn complex_value(data: u32) -> f64 {
    let mantissa = f64::from((data & 0xffff_ff00) as i32);
    mantissa * RADIX_MULTIPLIERS[((data >> 4) & 0x3) as usize]
}

fn trim_float(v: f64) -> String {
    let text = format!("{v:.6}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() || text == "-" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Text form of a `Res_value`.
pub fn format_typed_value(data_type: u8, data: u32, strings: &[String]) -> String {
    match data_type {
        0x00 => String::new(),
        0x01 => format!("@0x{data:08x}"),
        0x02 => format!("?0x{data:08x}"),
        0x03 => string_at(strings, data).unwrap_or_default(),
        0x04 => trim_float(f64::from(f32::from_bits(data))),
        0x05 => {
            let unit = match data & 0xf {
                0 => "px",
                1 => "dp",
                2 => "sp",
                3 => "pt",
                4 => "in",
                5 => "mm",
                _ => "",
            };
            format!("{}{unit}", trim_float(complex_value(data)))
        }
        0x06 => {
            let unit = if data & 0xf == 1 { "%p" } else { "%" };
            format!("{}{unit}", trim_float(complex_value(data) * 100.0))
        }
        0x07 => format!("@dynamic/0x{data:08x}"),
        0x10 => (data as i32).to_string(),
        0x11 => format!("0x{data:x}"),
        0x12 => (data != 0).to_string(),
        0x1c | 0x1e => format!("#{data:08x}"),
        0x1d | 0x1f => format!("#{:06x}", data & 0x00ff_ffff),
        other => format!("0x{data:08x} /* type {other:#04x} */"),
    }
}

/// Names of well-known `android:` attributes, by resource id.
pub fn android_attribute_name(id: u32) -> Option<&'static str> {
    const BASE: [&str; 48] = [
        "theme", "label", "icon", "name", "manageSpaceActivity", "allowClearUserData",
        "permission", "readPermission", "writePermission", "protectionLevel", "permissionGroup",
        "sharedUserId", "hasCode", "persistent", "enabled", "debuggable", "exported", "process",
        "taskAffinity", "multiprocess", "finishOnTaskLaunch", "clearTaskOnLaunch",
        "stateNotNeeded", "excludeFromRecents", "authorities", "syncable", "initOrder",
        "grantUriPermissions", "priority", "launchMode", "screenOrientation", "configChanges",
        "description", "targetPackage", "handleProfiling", "functionalTest", "value", "resource",
        "mimeType", "scheme", "host", "port", "path", "pathPrefix", "pathPattern", "action",
        "data", "targetClass",
    ];
    if let Some(offset) = id.checked_sub(0x0101_0000)
        && let Some(name) = BASE.get(offset as usize)
    {
        return Some(*name);
    }
    let name = match id {
        0x0101_020c => "minSdkVersion",
        0x0101_021b => "versionCode",
        0x0101_021c => "versionName",
        0x0101_0270 => "targetSdkVersion",
        0x0101_0271 => "maxSdkVersion",
        0x0101_0280 => "allowBackup",
        0x0101_0281 => "glEsVersion",
        0x0101_028e => "required",
        0x0101_02b7 => "installLocation",
        0x0101_02d3 => "hardwareAccelerated",
        0x0101_035a => "largeHeap",
        0x0101_03af => "supportsRtl",
        0x0101_04ea => "extractNativeLibs",
        0x0101_04ec => "usesCleartextTraffic",
        0x0101_0527 => "networkSecurityConfig",
        0x0101_052c => "roundIcon",
        0x0101_0572 => "compileSdkVersion",
        0x0101_0573 => "compileSdkVersionCodename",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_values_render_like_aapt() {
        assert_eq!(format_typed_value(0x12, 0xffff_ffff, &[]), "true");
        assert_eq!(format_typed_value(0x12, 0, &[]), "false");
        assert_eq!(format_typed_value(0x10, 0xffff_ffff, &[]), "-1");
        assert_eq!(format_typed_value(0x11, 0x10, &[]), "0x10");
        assert_eq!(format_typed_value(0x01, 0x7f01_0000, &[]), "@0x7f010000");
        assert_eq!(format_typed_value(0x02, 0x0101_0000, &[]), "?0x01010000");
        assert_eq!(format_typed_value(0x1c, 0xff00_ff00, &[]), "#ff00ff00");
        assert_eq!(format_typed_value(0x04, 1.5f32.to_bits(), &[]), "1.5");
        // 16dp: mantissa 16 << 8, radix 0, unit dp
        assert_eq!(format_typed_value(0x05, (16 << 8) | 1, &[]), "16dp");
        // 50%: 0.5 with radix 23p0
        assert_eq!(format_typed_value(0x06, (1 << 30) | (3 << 4), &[]), "50%");
    }

    #[test]
    fn android_ids_resolve_to_names() {
        assert_eq!(android_attribute_name(0x0101_0003), Some("name"));
        assert_eq!(android_attribute_name(0x0101_0010), Some("exported"));
        assert_eq!(android_attribute_name(0x0101_002f), Some("targetClass"));
        assert_eq!(android_attribute_name(0x0101_021b), Some("versionCode"));
        assert_eq!(android_attribute_name(0x7f01_0000), None);
    }

    #[test]
    fn rejects_non_xml_chunk() {
        let err = decode_axml(&[0x02, 0x00, 0x08, 0x00, 0x08, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, FormatError::BadMagic(_)));
    }

    #[test]
    fn document_without_elements_is_malformed() {
        let err = decode_axml(&[0x03, 0x00, 0x08, 0x00, 0x08, 0, 0, 0]).unwrap_err();
        assert!(err.to_string().contains("root"));
    }

    fn start_element() -> Vec<u8> {
        let mut c = Vec::new();
        c.extend(RES_XML_START_ELEMENT_TYPE.to_le_bytes());
        c.extend(16u16.to_le_bytes());
        c.extend(36u32.to_le_bytes());
        c.extend(1u32.to_le_bytes());
        for _ in 0..3 {
            c.extend(NO_ENTRY.to_le_bytes());
        }
        c.extend(20u16.to_le_bytes());
        c.extend(20u16.to_le_bytes());
        c.extend([0u8; 8]);
        c
    }

    fn end_element() -> Vec<u8> {
        let mut c = Vec::new();
        c.extend(RES_XML_END_ELEMENT_TYPE.to_le_bytes());
        c.extend(16u16.to_le_bytes());
        c.extend(24u32.to_le_bytes());
        c.extend(1u32.to_le_bytes());
        for _ in 0..3 {
            c.extend(NO_ENTRY.to_le_bytes());
        }
        c
    }

    fn nested_document(depth: usize) -> Vec<u8> {
        let mut body = Vec::new();
        for _ in 0..depth {
            body.extend(start_element());
        }
        for _ in 0..depth {
            body.extend(end_element());
        }
        let mut doc = Vec::new();
        doc.extend(RES_XML_TYPE.to_le_bytes());
        doc.extend(8u16.to_le_bytes());
        doc.extend((8 + body.len() as u32).to_le_bytes());
        doc.extend(body);
        doc
    }

    #[test]
    fn nesting_up_to_the_limit_decodes() {
        let doc = decode_axml(&nested_document(MAX_ELEMENT_DEPTH)).unwrap();
        let mut depth = 1;
        let mut node = &doc.root;
        while let Some(child) = node.children.first() {
            depth += 1;
            node = child;
        }
        assert_eq!(depth, MAX_ELEMENT_DEPTH);
    }

    #[test]
    fn nesting_past_the_limit_is_rejected() {
        let err = decode_axml(&nested_document(200_000)).unwrap_err();
        assert!(err.to_string().contains("nested deeper"));
    }
}
