//! baksmali-style class layout around the per-method listings.

use crate::model::{ClassDef, FieldDef, FlagTarget, MethodDef, quote_string};

fn flags_prefix(flags: Vec<&'static str>) -> String {
    if flags.is_empty() {
        String::new()
    } else {
        format!("{} ", flags.join(" "))
    }
}

/// Smali text for one class; nested classes are separate smali files and are not included.
pub fn class_smali(class: &ClassDef) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        ".class {}{}\n",
        flags_prefix(class.access.smali_flags(FlagTarget::Class)),
        class.descriptor
    ));
    if let Some(parent) = &class.super_class {
        out.push_str(&format!(".super {parent}\n"));
    }
    if let Some(source) = &class.source_file {
        out.push_str(&format!(".source {}\n", quote_string(source)));
    }

    if !class.interfaces.is_empty() {
        out.push_str("\n\n# interfaces\n");
        for iface in &class.interfaces {
            out.push_str(&format!(".implements {iface}\n"));
        }
    }

    let (statics, instance): (Vec<&FieldDef>, Vec<&FieldDef>) =
        class.fields.iter().partition(|f| f.is_static());
    write_fields(&mut out, "# static fields", &statics);
    write_fields(&mut out, "# instance fields", &instance);

    let (direct, is_virtual): (Vec<&MethodDef>, Vec<&MethodDef>) =
        class.methods.iter().partition(|m| m.is_direct());
    write_methods(&mut out, "# direct methods", &direct);
    write_methods(&mut out, "# virtual methods", &is_virtual);
    out
}

fn write_fields(out: &mut String, title: &str, fields: &[&FieldDef]) {
    if fields.is_empty() {
        return;
    }
    out.push_str(&format!("\n\n{title}\n"));
    let lines: Vec<String> = fields.iter().map(|f| field_smali(f)).collect();
    out.push_str(&lines.join("\n"));
}

fn write_methods(out: &mut String, title: &str, methods: &[&MethodDef]) {
    if methods.is_empty() {
        return;
    }
    out.push_str(&format!("\n\n{title}\n"));
    let blocks: Vec<String> = methods.iter().map(|m| method_smali(m)).collect();
    out.push_str(&blocks.join("\n"));
}

pub fn field_smali(field: &FieldDef) -> String {
    let mut line = format!(
        ".field {}{}:{}",
        flags_prefix(field.access.smali_flags(FlagTarget::Field)),
        field.name,
        field.descriptor
    );
    if let Some(value) = &field.value {
        line.push_str(&format!(" = {}", value.smali_literal()));
    }
    line.push('\n');
    line
}

/// `.method` block with the listing indented under the frame directives.
pub fn method_smali(method: &MethodDef) -> String {
    let mut out = format!(
        ".method {}{}{}\n",
        flags_prefix(method.access.smali_flags(FlagTarget::Method)),
        method.name,
        method.descriptor
    );
    if let Some(body) = &method.body {
        for directive in body.frame_directives() {
            out.push_str(&format!("    {directive}\n"));
        }
        out.push('\n');
        for line in body.disassemble() {
            if line.is_empty() {
                out.push('\n');
            } else {
                out.push_str(&format!("    {line}\n"));
            }
        }
    }
    out.push_str(".end method\n");
    out
}
