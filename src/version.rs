//! Build version resolution.
//!
//! The release version is injected through the `VERSION` environment variable
//! at build time. Unset means a development build.

pub const DEV_VERSION: &str = "dev";

pub fn resolve_version(raw: Option<&str>) -> &str {
    raw.unwrap_or(DEV_VERSION)
}

pub fn build_version() -> &'static str {
    resolve_version(option_env!("VERSION"))
}
