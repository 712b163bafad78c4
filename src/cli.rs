//! Command-Line Interface (CLI) argument parsing.
//!
//! The flags mirror the operator interface of the exporter and are merged
//! over the configuration file and environment by acting as a `figment`
//! provider.

use clap::Parser;
use figment::{
    value::{Dict, Map, Tag, Value},
    Error, Metadata, Profile, Provider,
};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Prometheus exporter for XenServer / XCP-ng pools.
#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML or TOML configuration file [default: config.yml].
    #[arg(long = "config.file", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address on which to expose metrics and the web interface.
    #[arg(long = "web.listen", value_name = "ADDR")]
    pub listen_address: Option<SocketAddr>,

    /// Path under which to expose metrics.
    #[arg(long = "web.path", value_name = "PATH")]
    pub metrics_path: Option<String>,

    /// Namespace prefix for the exported Xen metrics.
    #[arg(long, value_name = "NAME")]
    pub namespace: Option<String>,

    /// Logging level (overridden by RUST_LOG when set).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        let mut server = Dict::new();
        if let Some(addr) = self.listen_address {
            server.insert("listen_address".into(), Value::from(addr.to_string()));
        }
        if let Some(path) = &self.metrics_path {
            server.insert("metrics_path".into(), Value::from(path.clone()));
        }
        if !server.is_empty() {
            dict.insert("server".into(), Value::Dict(Tag::Default, server));
        }

        if let Some(namespace) = &self.namespace {
            dict.insert("namespace".into(), Value::from(namespace.clone()));
        }
        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
