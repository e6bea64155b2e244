use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{DEFAULT_HOST, DEFAULT_PORT};

#[derive(Debug, Clone, Parser)]
#[command(name = "dex-daemon")]
#[command(about = "Serve class, code, manifest and cross-reference queries over loaded APK/DEX/JAR files")]
#[command(version = crate::version::build_version())]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[arg(long, env = "DEX_DAEMON_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(long, env = "DEX_DAEMON_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(long, env = "DEX_DAEMON_MAX_INSTANCES", default_value_t = crate::registry::DEFAULT_MAX_INSTANCES)]
    pub max_instances: usize,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Run the HTTP daemon (default).
    Serve {
        #[command(flatten)]
        args: ServeArgs,
    },
    /// Print the decoded AndroidManifest.xml of an input.
    Manifest { path: PathBuf },
    /// Print one class of an input.
    Class {
        path: PathBuf,

        class_name: String,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Code)]
        format: OutputFormat,
    },
    /// Print one method of an input, addressed by its JVM signature.
    Method {
        path: PathBuf,

        method_signature: String,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Code,
    Smali,
    Json,
}
