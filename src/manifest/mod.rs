//! AndroidManifest.xml decoding and component queries.

pub mod axml;

use serde::Serialize;

use crate::error::FormatResult;
use axml::{MAX_ELEMENT_DEPTH, XmlDocument, XmlElement, decode_axml};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Activity,
    Service,
    Receiver,
    Provider,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 4] = [
        ComponentKind::Activity,
        ComponentKind::Service,
        ComponentKind::Receiver,
        ComponentKind::Provider,
    ];

    fn tags(self) -> &'static [&'static str] {
        match self {
            ComponentKind::Activity => &["activity", "activity-alias"],
            ComponentKind::Service => &["service"],
            ComponentKind::Receiver => &["receiver"],
            ComponentKind::Provider => &["provider"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Manifest {
    document: XmlDocument,
    text: String,
}

impl Manifest {
    pub fn decode(data: &[u8]) -> FormatResult<Self> {
        let document = decode_axml(data)?;
        let text = render_xml(&document);
        Ok(Self { document, text })
    }

    /// Decoded XML text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn document(&self) -> &XmlDocument {
        &self.document
    }

    pub fn package(&self) -> Option<&str> {
        self.document.root.attr("package")
    }

    /// Fully qualified names of the exported components of one kind, in manifest order.
    pub fn exported_components(&self, kind: ComponentKind) -> Vec<String> {
        let package = self.package().unwrap_or("");
        let mut out = Vec::new();
        for application in self.document.root.children_named("application") {
            for component in &application.children {
                if !kind.tags().contains(&component.name.as_str()) {
                    continue;
                }
                let Some(name) = component.android_attr("name") else {
                    continue;
                };
                if is_exported(component, kind) {
                    out.push(qualify_component_name(package, name));
                }
            }
        }
        out
    }
}

fn is_exported(component: &XmlElement, kind: ComponentKind) -> bool {
    match component.android_attr("exported") {
        Some("true") => true,
        Some("false") => false,
        _ => kind != ComponentKind::Provider && component.children_named("intent-filter").next().is_some(),
    }
}

/// `.Main` and `Main` resolve against the package; dotted names are kept.
pub fn qualify_component_name(package: &str, name: &str) -> String {
    if name.starts_with('.') {
        format!("{package}{name}")
    } else if !name.contains('.') && !package.is_empty() {
        format!("{package}.{name}")
    } else {
        name.to_string()
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\n' => out.push_str("&#10;"),
            c => out.push(c),
        }
    }
    out
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Pretty printed XML with a prolog and the namespace declarations on the root.
pub fn render_xml(document: &XmlDocument) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    let xmlns: Vec<String> = document
        .namespaces
        .iter()
        .map(|(prefix, uri)| {
            if prefix.is_empty() {
                format!("xmlns=\"{}\"", escape_attr(uri))
            } else {
                format!("xmlns:{prefix}=\"{}\"", escape_attr(uri))
            }
        })
        .collect();
    write_element(&mut out, &document.root, 0, &xmlns);
    out
}

fn write_element(out: &mut String, element: &XmlElement, depth: usize, extra: &[String]) {
    let indent = "    ".repeat(depth);
    out.push_str(&indent);
    out.push('<');
    out.push_str(&element.qualified_name());
    for decl in extra {
        out.push(' ');
        out.push_str(decl);
    }
    for attr in &element.attributes {
        out.push_str(&format!(" {}=\"{}\"", attr.qualified_name(), escape_attr(&attr.value)));
    }

    let text = element.text.as_deref().map(str::trim).filter(|t| !t.is_empty());
    if element.children.is_empty() && text.is_none() {
        out.push_str(" />\n");
        return;
    }
    out.push('>');
    if let Some(text) = text {
        out.push_str(&escape_text(text));
    }
    if !element.children.is_empty() {
        out.push('\n');
        if depth + 1 >= MAX_ELEMENT_DEPTH {
            out.push_str(&format!("{indent}    <!-- {} nested element(s) omitted -->\n", element.children.len()));
        } else {
            for child in &element.children {
                write_element(out, child, depth + 1, &[]);
            }
        }
        out.push_str(&indent);
    }
    out.push_str(&format!("</{}>\n", element.qualified_name()));
}
