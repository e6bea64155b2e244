//! JVM descriptor and signature conversion.
//!
//! Clients address classes and members with JVM-form strings such as
//! `Lcom/example/abc;->testMethod(Ljava/lang/String;I)V`. The class index is
//! keyed by the Java display form (`com.example.abc.testMethod(java.lang.String, int):void`),
//! so every query goes through this module first.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Invalid JVM signature format: (empty)")]
    Empty,
    #[error("Invalid JVM signature format: {0}")]
    InvalidClass(String),
    #[error("Invalid type descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("Invalid JVM method signature format: {0}")]
    InvalidMethod(String),
    #[error("Invalid JVM field signature format: {0}")]
    InvalidField(String),
}

pub type Result<T> = std::result::Result<T, SignatureError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JavaType {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// Binary name with dots, nested classes keep `$`.
    Object(String),
    Array(Box<JavaType>),
}

impl JavaType {
    /// Innermost non-array type.
    pub fn element_type(&self) -> &JavaType {
        match self {
            JavaType::Array(inner) => inner.element_type(),
            other => other,
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            JavaType::Array(inner) => 1 + inner.dimensions(),
            _ => 0,
        }
    }

    /// Class name behind this type, looking through arrays.
    pub fn class_name(&self) -> Option<&str> {
        match self.element_type() {
            JavaType::Object(name) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, JavaType::Long | JavaType::Double)
    }

    pub fn descriptor(&self) -> String {
        match self {
            JavaType::Void => "V".to_string(),
            JavaType::Boolean => "Z".to_string(),
            JavaType::Byte => "B".to_string(),
            JavaType::Char => "C".to_string(),
            JavaType::Short => "S".to_string(),
            JavaType::Int => "I".to_string(),
            JavaType::Long => "J".to_string(),
            JavaType::Float => "F".to_string(),
            JavaType::Double => "D".to_string(),
            JavaType::Object(name) => format!("L{};", name.replace('.', "/")),
            JavaType::Array(inner) => format!("[{}", inner.descriptor()),
        }
    }

    /// Name as written in Java source: nested classes use `.` instead of `$`.
    pub fn source_name(&self) -> String {
        match self {
            JavaType::Object(name) => name.replace('$', "."),
            JavaType::Array(inner) => format!("{}[]", inner.source_name()),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for JavaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JavaType::Void => f.write_str("void"),
            JavaType::Boolean => f.write_str("boolean"),
            JavaType::Byte => f.write_str("byte"),
            JavaType::Char => f.write_str("char"),
            JavaType::Short => f.write_str("short"),
            JavaType::Int => f.write_str("int"),
            JavaType::Long => f.write_str("long"),
            JavaType::Float => f.write_str("float"),
            JavaType::Double => f.write_str("double"),
            JavaType::Object(name) => f.write_str(name),
            JavaType::Array(inner) => write!(f, "{inner}[]"),
        }
    }
}

/// Both the JVM and Dalvik reject descriptors with more dimensions.
const MAX_ARRAY_DIMENSIONS: usize = 255;

fn parse_at(desc: &str, start: usize) -> Option<(JavaType, usize)> {
    let bytes = desc.as_bytes();
    let mut dims = 0usize;
    let mut i = start;
    while bytes.get(i) == Some(&b'[') {
        dims += 1;
        i += 1;
    }
    if dims > MAX_ARRAY_DIMENSIONS {
        return None;
    }

    let (base, next) = match *bytes.get(i)? {
        b'V' => (JavaType::Void, i + 1),
        b'Z' => (JavaType::Boolean, i + 1),
        b'B' => (JavaType::Byte, i + 1),
        b'C' => (JavaType::Char, i + 1),
        b'S' => (JavaType::Short, i + 1),
        b'I' => (JavaType::Int, i + 1),
        b'J' => (JavaType::Long, i + 1),
        b'F' => (JavaType::Float, i + 1),
        b'D' => (JavaType::Double, i + 1),
        b'L' => {
            let end = i + 1 + desc[i + 1..].find(';')?;
            let internal = &desc[i + 1..end];
            if internal.is_empty() || internal.contains(['(', ')', '[']) {
                return None;
            }
            (JavaType::Object(internal.replace('/', ".")), end + 1)
        }
        _ => return None,
    };

    if dims > 0 && base == JavaType::Void {
        return None;
    }

    let mut ty = base;
    for _ in 0..dims {
        ty = JavaType::Array(Box::new(ty));
    }
    Some((ty, next))
}

/// Parses exactly one field descriptor.
pub fn parse_type(descriptor: &str) -> Result<JavaType> {
    match parse_at(descriptor, 0) {
        Some((ty, next)) if next == descriptor.len() => Ok(ty),
        _ => Err(SignatureError::InvalidDescriptor(descriptor.to_string())),
    }
}

/// Parses `(params)ret` into parameter and return types.
pub fn parse_method_descriptor(descriptor: &str) -> Result<(Vec<JavaType>, JavaType)> {
    let invalid = || SignatureError::InvalidDescriptor(descriptor.to_string());

    if !descriptor.starts_with('(') {
        return Err(invalid());
    }

    let mut params = Vec::new();
    let mut pos = 1usize;
    loop {
        match descriptor.as_bytes().get(pos) {
            Some(b')') => {
                pos += 1;
                break;
            }
            Some(_) => {
                let (ty, next) = parse_at(descriptor, pos).ok_or_else(invalid)?;
                if ty == JavaType::Void {
                    return Err(invalid());
                }
                params.push(ty);
                pos = next;
            }
            None => return Err(invalid()),
        }
    }

    match parse_at(descriptor, pos) {
        Some((ret, next)) if next == descriptor.len() => Ok((params, ret)),
        _ => Err(invalid()),
    }
}

/// Java FQN of the class a signature starts with, e.g. `Lcom/a/B;->m()V` gives `com.a.B`.
pub fn extract_class_fqn(signature: &str) -> Result<String> {
    if signature.is_empty() {
        return Err(SignatureError::Empty);
    }

    let invalid = || SignatureError::InvalidClass(signature.to_string());
    if !signature.starts_with('L') {
        return Err(invalid());
    }
    let end = signature.find(';').ok_or_else(invalid)?;
    let class_descriptor = &signature[..=end];
    match parse_type(class_descriptor) {
        Ok(JavaType::Object(name)) => Ok(name),
        _ => Err(invalid()),
    }
}

/// Readable name of a class descriptor. Arrays and primitives are accepted, and
/// names already in dotted form pass through unchanged.
pub fn to_java_class_signature(descriptor: &str) -> Result<String> {
    let descriptor = descriptor.trim();
    if descriptor.is_empty() {
        return Err(SignatureError::Empty);
    }

    let primitive = descriptor.len() == 1 && "VZBCSIJFD".contains(descriptor);
    let looks_like_descriptor = descriptor.starts_with('[')
        || descriptor.ends_with(';')
        || primitive
        || (descriptor.starts_with('L') && descriptor.contains('/'));
    if looks_like_descriptor {
        return parse_type(descriptor).map(|ty| ty.to_string());
    }

    if descriptor.contains([';', '(', ')', ' ', '[']) {
        return Err(SignatureError::InvalidDescriptor(descriptor.to_string()));
    }
    Ok(descriptor.replace('/', "."))
}

/// `Lcom/example/abc;->testMethod(Ljava/lang/String;I)V`
/// becomes `com.example.abc.testMethod(java.lang.String, int):void`.
pub fn to_java_method_signature(signature: &str) -> Result<String> {
    let invalid = || SignatureError::InvalidMethod(signature.to_string());

    let (class_part, member) = signature.split_once("->").ok_or_else(invalid)?;
    let class_name = match parse_type(class_part) {
        Ok(JavaType::Object(name)) => name,
        _ => return Err(invalid()),
    };

    let paren = member.find('(').ok_or_else(invalid)?;
    let (name, descriptor) = member.split_at(paren);
    if name.is_empty() {
        return Err(invalid());
    }
    let (params, ret) = parse_method_descriptor(descriptor).map_err(|_| invalid())?;

    Ok(format_method(&class_name, name, &params, &ret))
}

/// `Lcom/example/abc;->name:Ljava/lang/String;` becomes `com.example.abc.name`.
pub fn to_java_field_signature(signature: &str) -> Result<String> {
    let invalid = || SignatureError::InvalidField(signature.to_string());

    let (class_part, member) = signature.split_once("->").ok_or_else(invalid)?;
    let class_name = match parse_type(class_part) {
        Ok(JavaType::Object(name)) => name,
        _ => return Err(invalid()),
    };

    let (name, ty) = member.split_once(':').ok_or_else(invalid)?;
    if name.is_empty() {
        return Err(invalid());
    }
    parse_type(ty).map_err(|_| invalid())?;

    Ok(format!("{class_name}.{name}"))
}

pub fn format_method(class_name: &str, name: &str, params: &[JavaType], ret: &JavaType) -> String {
    let params = params
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{class_name}.{name}({params}):{ret}")
}

/// Turns a JVM internal class name (`java/lang/String`, `[I`) into a descriptor.
pub fn internal_to_descriptor(internal: &str) -> String {
    if internal.starts_with('[') {
        internal.to_string()
    } else {
        format!("L{internal};")
    }
}

/// Best-effort readable form of a descriptor, falling back to the raw text.
pub fn descriptor_to_java(descriptor: &str) -> String {
    parse_type(descriptor)
        .map(|ty| ty.to_string())
        .unwrap_or_else(|_| descriptor.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_signature_converts_to_java_form() {
        assert_eq!(
            to_java_method_signature("Lcom/example/abc;->testMethod(Ljava/lang/String;I)V").unwrap(),
            "com.example.abc.testMethod(java.lang.String, int):void"
        );
    }

    #[test]
    fn method_signature_with_arrays_and_no_args() {
        assert_eq!(
            to_java_method_signature("La/B;->get()[[Ljava/lang/Object;").unwrap(),
            "a.B.get():java.lang.Object[][]"
        );
        assert_eq!(
            to_java_method_signature("La/B;-><init>(JZ[B)V").unwrap(),
            "a.B.<init>(long, boolean, byte[]):void"
        );
    }

    #[test]
    fn method_signature_rejects_garbage() {
        assert!(to_java_method_signature("com.example.abc.testMethod").is_err());
        assert!(to_java_method_signature("Lcom/example/abc;->(I)V").is_err());
        assert!(to_java_method_signature("Lcom/example/abc;->m(Q)V").is_err());
        assert!(to_java_method_signature("Lcom/example/abc;->m(I)").is_err());
        assert!(to_java_method_signature("Lcom/example/abc;->m(V)V").is_err());
    }

    #[test]
    fn extract_class_fqn_reads_leading_descriptor() {
        assert_eq!(
            extract_class_fqn("Lcom/tencent/assistant/activity/BaseActivity;->activityExposureReport()V")
                .unwrap(),
            "com.tencent.assistant.activity.BaseActivity"
        );
        assert_eq!(extract_class_fqn("La/b/C;").unwrap(), "a.b.C");
        assert_eq!(extract_class_fqn(""), Err(SignatureError::Empty));
        assert!(extract_class_fqn("a.b.C").is_err());
    }

    #[test]
    fn class_signature_handles_descriptors_and_plain_names() {
        assert_eq!(to_java_class_signature("Lcom/example/Foo;").unwrap(), "com.example.Foo");
        assert_eq!(to_java_class_signature("Lcom/example/Foo$Bar;").unwrap(), "com.example.Foo$Bar");
        assert_eq!(to_java_class_signature("[I").unwrap(), "int[]");
        assert_eq!(to_java_class_signature("com.example.Foo").unwrap(), "com.example.Foo");
        assert_eq!(to_java_class_signature("com/example/Foo").unwrap(), "com.example.Foo");
        assert!(to_java_class_signature("Lcom/example/Foo").is_err());
        assert!(to_java_class_signature("  ").is_err());
    }

    #[test]
    fn single_letter_default_package_classes_are_names() {
        assert_eq!(to_java_class_signature("A").unwrap(), "A");
        assert_eq!(to_java_class_signature("LA;").unwrap(), "A");
        assert_eq!(to_java_class_signature("I").unwrap(), "int");
        assert_eq!(to_java_class_signature("[Z").unwrap(), "boolean[]");
    }

    #[test]
    fn field_signature_drops_type() {
        assert_eq!(
            to_java_field_signature("Lcom/example/abc;->name:Ljava/lang/String;").unwrap(),
            "com.example.abc.name"
        );
        assert!(to_java_field_signature("Lcom/example/abc;->name").is_err());
        assert!(to_java_field_signature("Lcom/example/abc;->:I").is_err());
    }

    #[test]
    fn parse_type_round_trips_descriptor() {
        let ty = parse_type("[[Ljava/util/Map$Entry;").unwrap();
        assert_eq!(ty.dimensions(), 2);
        assert_eq!(ty.class_name(), Some("java.util.Map$Entry"));
        assert_eq!(ty.descriptor(), "[[Ljava/util/Map$Entry;");
        assert_eq!(ty.source_name(), "java.util.Map.Entry[][]");
        assert!(parse_type("II").is_err());
        assert!(parse_type("[V").is_err());
    }

    #[test]
    fn array_dimensions_are_capped() {
        let max = format!("{}I", "[".repeat(255));
        assert_eq!(parse_type(&max).unwrap().dimensions(), 255);
        let over = format!("{}I", "[".repeat(100_000));
        assert!(parse_type(&over).is_err());
        assert!(to_java_class_signature(&over).is_err());
    }

    #[test]
    fn parse_method_descriptor_splits_params() {
        let (params, ret) = parse_method_descriptor("(IJLjava/lang/String;[D)Z").unwrap();
        assert_eq!(
            params,
            vec![
                JavaType::Int,
                JavaType::Long,
                JavaType::Object("java.lang.String".to_string()),
                JavaType::Array(Box::new(JavaType::Double)),
            ]
        );
        assert_eq!(ret, JavaType::Boolean);
    }

    #[test]
    fn internal_names_become_descriptors() {
        assert_eq!(internal_to_descriptor("java/lang/String"), "Ljava/lang/String;");
        assert_eq!(internal_to_descriptor("[I"), "[I");
    }
}
