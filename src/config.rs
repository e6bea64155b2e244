use anyhow::{Result, bail};

use crate::cli::ServeArgs;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8651;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_instances: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_instances: crate::registry::DEFAULT_MAX_INSTANCES,
        }
    }
}

impl ServerConfig {
    pub fn from_args(args: &ServeArgs) -> Result<Self> {
        let host = args.host.trim();
        if host.is_empty() {
            bail!("--host must not be empty");
        }
        if args.max_instances == 0 {
            bail!("--max-instances must be at least 1");
        }
        Ok(Self {
            host: host.to_string(),
            port: args.port,
            max_instances: args.max_instances,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reported by `/health`.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}
