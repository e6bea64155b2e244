//! Reading APK, DEX, JAR, AAR and class files into the class model.

use anyhow::{Context, Result, bail};
use ignore::WalkBuilder;
use log::{debug, warn};
use memmap2::Mmap;
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::classfile::parser::has_class_magic;
use crate::classfile::parse_class;
use crate::dex::parse_dex;
use crate::dex::parser::has_dex_magic;
use crate::manifest::Manifest;
use crate::manifest::axml::has_axml_magic;
use crate::model::ClassDef;

const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Apk,
    Dex,
    Jar,
    Class,
    /// `.zip` and `.aar`, read like an APK.
    Archive,
}

impl InputKind {
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "apk" => Some(InputKind::Apk),
            "dex" => Some(InputKind::Dex),
            "jar" => Some(InputKind::Jar),
            "class" => Some(InputKind::Class),
            "zip" | "aar" => Some(InputKind::Archive),
            _ => None,
        }
    }

    fn is_archive(self) -> bool {
        matches!(self, InputKind::Apk | InputKind::Jar | InputKind::Archive)
    }

    fn magic_matches(self, data: &[u8]) -> bool {
        match self {
            InputKind::Dex => has_dex_magic(data),
            InputKind::Class => has_class_magic(data),
            _ => has_zip_magic(data),
        }
    }
}

fn has_zip_magic(data: &[u8]) -> bool {
    data.starts_with(b"PK\x03\x04") || data.starts_with(b"PK\x05\x06")
}

/// Kind from the extension, confirmed by magic bytes. Unknown extensions are sniffed.
pub fn detect_kind(path: &Path, data: &[u8]) -> Result<InputKind> {
    match InputKind::from_extension(path) {
        Some(kind) if kind.magic_matches(data) => Ok(kind),
        Some(kind) => bail!(
            "{} does not look like a {:?} file (bad magic)",
            path.display(),
            kind
        ),
        None if has_dex_magic(data) => Ok(InputKind::Dex),
        None if has_class_magic(data) => Ok(InputKind::Class),
        None if has_zip_magic(data) => Ok(InputKind::Archive),
        None => bail!("Unsupported input: {}", path.display()),
    }
}

/// One input file after parsing.
#[derive(Debug)]
pub struct ParsedInput {
    pub path: PathBuf,
    pub kind: InputKind,
    pub sha256: String,
    pub classes: Vec<ClassDef>,
    pub manifest: Option<Manifest>,
}

pub fn fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

enum Blob {
    Dex { name: String, data: Vec<u8> },
    Class { name: String, data: Vec<u8> },
}

pub fn read_input(path: &Path) -> Result<ParsedInput> {
    let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    // SAFETY: The file is opened read-only and the mapping is dropped before this function returns.
    let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("mmap failed: {}", path.display()))?;
    let data = &mmap[..];

    let kind = detect_kind(path, data)?;
    let sha256 = fingerprint(data);

    let (classes, manifest) = match kind {
        InputKind::Dex => {
            let classes = parse_dex(data).with_context(|| format!("Cannot parse DEX {}", path.display()))?;
            (classes, None)
        }
        InputKind::Class => {
            let class = parse_class(data).with_context(|| format!("Cannot parse class file {}", path.display()))?;
            (vec![class], None)
        }
        _ => {
            let archive = ZipArchive::new(Cursor::new(data))
                .with_context(|| format!("Cannot read zip structure: {}", path.display()))?;
            let mut blobs = Vec::new();
            let manifest = collect_archive(archive, kind, &mut blobs)
                .with_context(|| format!("Cannot read {}", path.display()))?;
            let classes = parse_blobs(blobs).with_context(|| format!("Cannot parse {}", path.display()))?;
            (classes, manifest)
        }
    };

    debug!(
        "Read {} ({:?}): {} classes, manifest: {}",
        path.display(),
        kind,
        classes.len(),
        manifest.is_some()
    );

    Ok(ParsedInput {
        path: path.to_path_buf(),
        kind,
        sha256,
        classes,
        manifest,
    })
}

fn is_dex_entry(name: &str) -> bool {
    !name.contains('/') && name.starts_with("classes") && name.ends_with(".dex")
}

fn is_class_entry(name: &str) -> bool {
    name.ends_with(".class")
        && !name.ends_with("module-info.class")
        && !name.starts_with("META-INF/")
}

/// Upper bound on the up-front allocation for one entry; the declared size is untrusted.
const MAX_ENTRY_PREALLOC: u64 = 64 << 20;

fn read_entry<R: Read>(mut entry: R, size: u64) -> Result<Vec<u8>> {
    let capacity = usize::try_from(size.min(MAX_ENTRY_PREALLOC)).unwrap_or(0);
    let mut buf = Vec::with_capacity(capacity);
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Pulls code blobs out of an archive; returns the decoded manifest if there is one.
fn collect_archive<R: Read + Seek>(
    mut archive: ZipArchive<R>,
    kind: InputKind,
    blobs: &mut Vec<Blob>,
) -> Result<Option<Manifest>> {
    let mut manifest = None;
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let size = entry.size();

        if is_class_entry(&name) {
            blobs.push(Blob::Class {
                data: read_entry(entry, size).with_context(|| format!("Cannot read entry {name}"))?,
                name,
            });
        } else if kind == InputKind::Jar {
            continue;
        } else if is_dex_entry(&name) {
            blobs.push(Blob::Dex {
                data: read_entry(entry, size).with_context(|| format!("Cannot read entry {name}"))?,
                name,
            });
        } else if kind == InputKind::Archive && name.ends_with(".jar") {
            // AAR bundles its code as classes.jar (and libs/*.jar).
            let data = read_entry(entry, size).with_context(|| format!("Cannot read entry {name}"))?;
            match ZipArchive::new(Cursor::new(data)) {
                Ok(nested) => {
                    collect_archive(nested, InputKind::Jar, blobs)
                        .with_context(|| format!("Cannot read nested jar {name}"))?;
                }
                Err(e) => warn!("Skipping nested jar {name}: {e}"),
            }
        } else if name == MANIFEST_ENTRY {
            let data = read_entry(entry, size).with_context(|| format!("Cannot read entry {name}"))?;
            if !has_axml_magic(&data) {
                warn!("{MANIFEST_ENTRY} is not binary XML, ignoring it");
                continue;
            }
            match Manifest::decode(&data) {
                Ok(decoded) => manifest = Some(decoded),
                Err(e) => warn!("Failed to decode {MANIFEST_ENTRY}: {e}"),
            }
        }
    }
    Ok(manifest)
}

/// Parses blobs in parallel, keeping archive order. A broken DEX fails the
/// input; a broken class file is skipped.
fn parse_blobs(blobs: Vec<Blob>) -> Result<Vec<ClassDef>> {
    let parsed: Vec<Result<Vec<ClassDef>>> = blobs
        .into_par_iter()
        .map(|blob| match blob {
            Blob::Dex { name, data } => {
                parse_dex(&data).with_context(|| format!("Cannot parse {name}"))
            }
            Blob::Class { name, data } => match parse_class(&data) {
                Ok(class) => Ok(vec![class]),
                Err(e) => {
                    warn!("Skipping {name}: {e}");
                    Ok(Vec::new())
                }
            },
        })
        .collect();

    let mut classes = Vec::new();
    for result in parsed {
        classes.extend(result?);
    }
    Ok(classes)
}

/// `.apk`, `.dex` and `.jar` files directly inside `dir`, sorted by path.
pub fn collect_dir_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }
    let walker = WalkBuilder::new(dir)
        .max_depth(Some(1))
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .build();

    let mut inputs = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Cannot list {}", dir.display()))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if matches!(
            InputKind::from_extension(path),
            Some(InputKind::Apk | InputKind::Dex | InputKind::Jar)
        ) {
            inputs.push(path.to_path_buf());
        }
    }
    inputs.sort();
    Ok(inputs)
}
