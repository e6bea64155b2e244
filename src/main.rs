use anyhow::{Context, Result};
use clap::Parser;
use dex_daemon::cli::{Cli, Commands, OutputFormat, ServeArgs};
use dex_daemon::config::ServerConfig;
use dex_daemon::error::DaemonError;
use dex_daemon::instance::DecompilerInstance;
use dex_daemon::server;
use dex_daemon::signature;
use dex_daemon::structure::class_structure;
use env_logger::Env;
use std::path::Path;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command.clone() {
        None => serve(&cli.serve)?,
        Some(Commands::Serve { args }) => serve(&args)?,
        Some(Commands::Manifest { path }) => {
            let instance = open(&path)?;
            let text = instance.manifest().ok_or(DaemonError::ManifestNotFound)?;
            write_output(text);
        }
        Some(Commands::Class {
            path,
            class_name,
            format,
        }) => {
            let instance = open(&path)?;
            let name = signature::to_java_class_signature(&class_name)?;
            let missing = || DaemonError::ClassNotFound(class_name.clone());
            let content = match format {
                OutputFormat::Code => instance.class_code(&name).ok_or_else(missing)?,
                OutputFormat::Smali => instance.class_smali(&name).ok_or_else(missing)?,
                OutputFormat::Json => {
                    let class = instance.class(&name).ok_or_else(missing)?;
                    serde_json::to_string_pretty(&class_structure(class))?
                }
            };
            write_output(&content);
        }
        Some(Commands::Method {
            path,
            method_signature,
        }) => {
            let instance = open(&path)?;
            let class = signature::extract_class_fqn(&method_signature)?;
            let method = signature::to_java_method_signature(&method_signature)?;
            let content = instance
                .method_code(&class, &method)
                .ok_or_else(|| DaemonError::MethodNotFound(method_signature.clone()))?;
            write_output(&content);
        }
    }

    Ok(())
}

fn serve(args: &ServeArgs) -> Result<()> {
    let config = ServerConfig::from_args(args)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("create tokio runtime")?;
    runtime.block_on(server::serve(config))
}

fn open(path: &Path) -> Result<DecompilerInstance> {
    if path.is_dir() {
        DecompilerInstance::load_dir(path)
    } else {
        DecompilerInstance::load(path)
    }
    .with_context(|| format!("Failed to load {}", path.display()))
}

fn write_output(content: &str) {
    print!("{content}");
    if !content.ends_with('\n') {
        println!();
    }
}
