use serde::Serialize;

use crate::model::{ClassDef, FlagTarget};

/// Declaration-level view of one class, printed by `class -f json`.
#[derive(Debug, Clone, Serialize)]
pub struct ClassStructure {
    pub name: String,
    pub package: String,
    pub access: Vec<&'static str>,
    pub super_class: String,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub fields: Vec<String>,
    pub methods: Vec<String>,
}

pub fn class_structure(class: &ClassDef) -> ClassStructure {
    ClassStructure {
        name: class.name.clone(),
        package: class.package().to_string(),
        access: class.access.smali_flags(FlagTarget::Class),
        super_class: class
            .super_class_name()
            .unwrap_or_else(|| "java.lang.Object".to_string()),
        interfaces: class.interface_names(),
        source_file: class.source_file.clone(),
        fields: class.fields.iter().map(|f| f.display()).collect(),
        methods: class.methods.iter().map(|m| m.display()).collect(),
    }
}
