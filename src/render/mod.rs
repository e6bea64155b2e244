//! Text renderings of loaded classes.

pub mod java;
pub mod smali;

pub use java::{class_source, method_source};
pub use smali::{class_smali, method_smali};
