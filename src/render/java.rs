//! Java source skeletons with fallback-mode bodies.
//!
//! Declarations are reconstructed from the class model; method bodies are the
//! raw instruction listing inside a block comment, the way a decompiler prints
//! methods it could not structure.

use crate::index::ClassIndex;
use crate::model::{AccessFlags, ClassDef, FieldDef, FlagTarget, MethodDef};
use crate::signature::JavaType;

const INDENT: &str = "    ";

fn source_name(descriptor_or_name: &str) -> String {
    descriptor_or_name.replace('$', ".")
}

fn type_name(ty: &JavaType) -> String {
    ty.source_name()
}

/// Full source of a class, nested classes included.
pub fn class_source(index: &ClassIndex, class: &ClassDef) -> String {
    let mut out = String::new();
    if !class.package().is_empty() {
        out.push_str(&format!("package {};\n\n", class.package()));
    }
    if let Some(source) = &class.source_file {
        out.push_str(&format!("/* compiled from: {source} */\n"));
    }
    write_class(&mut out, index, class, 0);
    out
}

/// Source of one method, unindented.
pub fn method_source(class: &ClassDef, method: &MethodDef) -> String {
    let mut out = String::new();
    write_method(&mut out, class, method, 0);
    out
}

fn class_keyword(class: &ClassDef) -> &'static str {
    if class.is_annotation() {
        "@interface"
    } else if class.is_interface() {
        "interface"
    } else if class.is_enum() {
        "enum"
    } else {
        "class"
    }
}

fn class_header(class: &ClassDef) -> String {
    let mut parts: Vec<String> = class
        .access
        .java_modifiers(FlagTarget::Class)
        .into_iter()
        .map(str::to_string)
        .collect();
    parts.push(class_keyword(class).to_string());
    parts.push(class.simple_name().to_string());

    let interfaces: Vec<String> = class
        .interface_names()
        .into_iter()
        .filter(|i| !(class.is_annotation() && i == "java.lang.annotation.Annotation"))
        .map(|i| source_name(&i))
        .collect();

    if class.is_interface() {
        if !interfaces.is_empty() {
            parts.push(format!("extends {}", interfaces.join(", ")));
        }
    } else {
        if let Some(parent) = class.super_class_name() {
            let implicit = parent == "java.lang.Object" || (class.is_enum() && parent == "java.lang.Enum");
            if !implicit {
                parts.push(format!("extends {}", source_name(&parent)));
            }
        }
        if !interfaces.is_empty() {
            parts.push(format!("implements {}", interfaces.join(", ")));
        }
    }
    parts.join(" ")
}

fn is_enum_constant(class: &ClassDef, field: &FieldDef) -> bool {
    class.is_enum()
        && field.access.contains(AccessFlags::ENUM)
        && field.ty.class_name() == Some(class.name.as_str())
}

fn write_class(out: &mut String, index: &ClassIndex, class: &ClassDef, depth: usize) {
    let pad = INDENT.repeat(depth);
    out.push_str(&format!("{pad}{} {{\n", class_header(class)));

    let mut sections: Vec<String> = Vec::new();

    let constants: Vec<&str> = class
        .fields
        .iter()
        .filter(|f| is_enum_constant(class, f))
        .map(|f| f.name.as_str())
        .collect();
    if !constants.is_empty() {
        sections.push(format!("{pad}{INDENT}{};\n", constants.join(", ")));
    }

    let fields: Vec<String> = class
        .fields
        .iter()
        .filter(|f| !is_enum_constant(class, f))
        .map(|f| field_line(class, f, depth + 1))
        .collect();
    if !fields.is_empty() {
        sections.push(fields.concat());
    }

    for method in &class.methods {
        let mut text = String::new();
        write_method(&mut text, class, method, depth + 1);
        sections.push(text);
    }

    for nested in index.nested_classes(class) {
        let mut text = String::new();
        write_class(&mut text, index, nested, depth + 1);
        sections.push(text);
    }

    out.push_str(&sections.join("\n"));
    out.push_str(&format!("{pad}}}\n"));
}

fn field_line(class: &ClassDef, field: &FieldDef, depth: usize) -> String {
    let pad = INDENT.repeat(depth);
    let mut modifiers = field.access.java_modifiers(FlagTarget::Field);
    if class.is_interface() {
        modifiers.retain(|m| !matches!(*m, "public" | "static" | "final"));
    }
    let mut decl: Vec<String> = modifiers.into_iter().map(str::to_string).collect();
    decl.push(type_name(&field.ty));
    decl.push(field.name.clone());
    let mut line = format!("{pad}{}", decl.join(" "));
    if let Some(value) = &field.value {
        line.push_str(&format!(" = {}", value.java_literal()));
    }
    line.push_str(";\n");
    line
}

fn method_header(class: &ClassDef, method: &MethodDef) -> String {
    if method.is_static_initializer() {
        return "static".to_string();
    }

    let mut modifiers = method.access.java_modifiers(FlagTarget::Method);
    if class.is_interface() {
        modifiers.retain(|m| !matches!(*m, "public" | "abstract"));
    }
    let mut parts: Vec<String> = modifiers.into_iter().map(str::to_string).collect();

    let varargs = method.access.contains(AccessFlags::VARARGS);
    let last = method.params.len().saturating_sub(1);
    let params: Vec<String> = method
        .params
        .iter()
        .enumerate()
        .map(|(i, p)| match p {
            JavaType::Array(inner) if varargs && i == last => {
                format!("{}... arg{i}", type_name(inner))
            }
            _ => format!("{} arg{i}", type_name(p)),
        })
        .collect();

    if method.is_constructor() {
        parts.push(format!("{}({})", class.simple_name(), params.join(", ")));
    } else {
        parts.push(type_name(&method.ret));
        parts.push(format!("{}({})", method.name, params.join(", ")));
    }
    parts.join(" ")
}

fn write_method(out: &mut String, class: &ClassDef, method: &MethodDef, depth: usize) {
    let pad = INDENT.repeat(depth);
    let header = method_header(class, method);
    let bodyless = method.access.contains(AccessFlags::ABSTRACT) || method.access.contains(AccessFlags::NATIVE);

    match (&method.body, bodyless) {
        (Some(body), false) => {
            out.push_str(&format!("{pad}{header} {{\n"));
            out.push_str(&format!("{pad}{INDENT}/*\n"));
            for line in body.disassemble() {
                let line = line.replace("*/", "*\\/");
                out.push_str(&format!("{pad}{INDENT}{INDENT}{line}\n"));
            }
            out.push_str(&format!("{pad}{INDENT}*/\n"));
            out.push_str(&format!("{pad}}}\n"));
        }
        _ => out.push_str(&format!("{pad}{header};\n")),
    }
}
