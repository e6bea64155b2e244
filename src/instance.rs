//! One loaded set of inputs and the queries the daemon answers about it.

use anyhow::{Result, bail};
use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::index::ClassIndex;
use crate::input::{self, InputKind, ParsedInput};
use crate::manifest::{ComponentKind, Manifest};
use crate::model::ClassDef;
use crate::render;

#[derive(Debug, Clone, Serialize)]
pub struct InputSummary {
    pub path: PathBuf,
    pub kind: InputKind,
    pub sha256: String,
    pub classes: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub inputs: Vec<InputSummary>,
    pub class_count: usize,
    pub has_manifest: bool,
}

#[derive(Debug)]
pub struct DecompilerInstance {
    inputs: Vec<InputSummary>,
    index: ClassIndex,
    manifest: Option<Manifest>,
}

impl DecompilerInstance {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("File not found: {}", path.display());
        }
        if !path.is_file() {
            bail!("Not a regular file: {}", path.display());
        }
        let parsed = input::read_input(path)?;
        Ok(Self::from_inputs(vec![parsed]))
    }

    /// Loads every input directly inside `dir`; inputs that fail to parse are skipped.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            bail!("Directory not found: {}", dir.display());
        }
        if !dir.is_dir() {
            bail!("Not a directory: {}", dir.display());
        }
        let mut parsed = Vec::new();
        for path in input::collect_dir_inputs(dir)? {
            match input::read_input(&path) {
                Ok(p) => parsed.push(p),
                Err(e) => warn!("Skipping {}: {e:#}", path.display()),
            }
        }
        if parsed.is_empty() {
            bail!("No loadable .apk, .dex or .jar files in {}", dir.display());
        }
        Ok(Self::from_inputs(parsed))
    }

    pub fn from_inputs(parsed: Vec<ParsedInput>) -> Self {
        let mut inputs = Vec::with_capacity(parsed.len());
        let mut classes = Vec::new();
        let mut manifest = None;
        for p in parsed {
            inputs.push(InputSummary {
                path: p.path,
                kind: p.kind,
                sha256: p.sha256,
                classes: p.classes.len(),
            });
            classes.extend(p.classes);
            if manifest.is_none() {
                manifest = p.manifest;
            }
        }
        let index = ClassIndex::build(classes);
        info!(
            "Loaded {} input(s), {} classes, manifest: {}",
            inputs.len(),
            index.len(),
            manifest.is_some()
        );
        Self {
            inputs,
            index,
            manifest,
        }
    }

    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            inputs: self.inputs.clone(),
            class_count: self.index.len(),
            has_manifest: self.manifest.is_some(),
        }
    }

    pub fn class_count(&self) -> usize {
        self.index.len()
    }

    pub fn index(&self) -> &ClassIndex {
        &self.index
    }

    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.index.class(name).map(|c| c.as_ref())
    }

    pub fn manifest(&self) -> Option<&str> {
        self.manifest.as_ref().map(Manifest::text)
    }

    pub fn exported_components(&self, kind: ComponentKind) -> Option<Vec<String>> {
        self.manifest.as_ref().map(|m| m.exported_components(kind))
    }

    pub fn method_code(&self, class: &str, method: &str) -> Option<String> {
        let (owner, found) = self.index.method(class, method)?;
        Some(render::method_source(owner, found))
    }

    pub fn class_code(&self, class: &str) -> Option<String> {
        let found = self.index.class(class)?;
        Some(render::class_source(&self.index, found))
    }

    pub fn class_smali(&self, class: &str) -> Option<String> {
        self.class(class).map(render::class_smali)
    }

    /// `java.lang.Object` when the class declares no superclass.
    pub fn super_class(&self, class: &str) -> Option<String> {
        let found = self.class(class)?;
        Some(
            found
                .super_class_name()
                .unwrap_or_else(|| "java.lang.Object".to_string()),
        )
    }

    pub fn interfaces(&self, class: &str) -> Option<Vec<String>> {
        self.class(class).map(ClassDef::interface_names)
    }

    pub fn class_methods(&self, class: &str) -> Option<Vec<String>> {
        self.class(class)
            .map(|c| c.methods.iter().map(|m| m.display()).collect())
    }

    pub fn class_fields(&self, class: &str) -> Option<Vec<String>> {
        self.class(class)
            .map(|c| c.fields.iter().map(|f| f.display()).collect())
    }

    pub fn method_callers(&self, class: &str, method: &str) -> Option<Vec<String>> {
        self.index.method_callers(class, method)
    }

    pub fn class_callers(&self, class: &str) -> Option<Vec<String>> {
        self.index.class_users(class)
    }

    pub fn method_overrides(&self, class: &str, method: &str) -> Option<Vec<String>> {
        self.index.overrides(class, method)
    }
}
