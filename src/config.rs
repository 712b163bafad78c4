//! Configuration management for the exporter
//!
//! This module defines the main `Config` struct and its sub-structs. It uses
//! the `figment` crate to layer built-in defaults, a YAML or TOML file,
//! `XENSTATS_`-prefixed environment variables and command-line flags.

use crate::cli::Cli;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Configuration file read when none is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "config.yml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Address of the XenAPI pool master, with an optional port.
    pub xenhost: String,
    /// Credentials used for `session.login_with_password`.
    pub credentials: Credentials,
    /// Prefix applied to every exported Xen metric name.
    pub namespace: String,
    /// The logging level for the application.
    pub log_level: String,
    /// XenAPI client settings.
    pub xenapi: XenApiConfig,
    /// HTTP exposition settings.
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// XenAPI client settings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct XenApiConfig {
    /// Deadline for each individual remote call, login included.
    pub call_timeout_ms: u64,
    /// Skip TLS certificate validation. XenServer ships self-signed certificates.
    pub accept_invalid_certs: bool,
    /// Originator string sent with the login call; shows up in the XAPI audit log.
    pub originator: String,
}

impl XenApiConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// HTTP exposition settings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the metrics server binds to.
    pub listen_address: SocketAddr,
    /// Path under which metrics are served.
    pub metrics_path: String,
    /// Append the exporter's own metrics to every scrape.
    pub internal_metrics: bool,
}

impl Config {
    /// Loads the application configuration.
    ///
    /// Sources are layered in increasing priority: built-in defaults, the
    /// configuration file named by the CLI or [`DEFAULT_CONFIG_FILE`] (YAML
    /// for `.yml`/`.yaml`, TOML otherwise; a missing file is skipped),
    /// environment variables such as `XENSTATS_XENHOST` or
    /// `XENSTATS_CREDENTIALS__PASSWORD`, and finally explicit CLI flags.
    pub fn load(cli: &Cli) -> Result<Self> {
        let path = cli
            .config
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        let figment = if is_yaml(path) {
            figment.merge(Yaml::file(path))
        } else {
            figment.merge(Toml::file(path))
        };

        let config: Config = figment
            .merge(Env::prefixed("XENSTATS_").split("__"))
            .merge(cli.clone())
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.server.metrics_path.starts_with('/') {
            anyhow::bail!(
                "server.metrics_path must start with '/', got '{}'",
                self.server.metrics_path
            );
        }
        if self.xenapi.call_timeout_ms == 0 {
            anyhow::bail!("xenapi.call_timeout_ms must be greater than zero");
        }
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

impl Default for Config {
    fn default() -> Self {
        Self {
            xenhost: String::new(),
            credentials: Credentials::default(),
            namespace: "xenstats".to_string(),
            log_level: "info".to_string(),
            xenapi: XenApiConfig {
                call_timeout_ms: 10_000,
                accept_invalid_certs: true,
                originator: "xenstats-exporter".to_string(),
            },
            server: ServerConfig {
                listen_address: SocketAddr::from(([0, 0, 0, 0], 9290)),
                metrics_path: "/metrics".to_string(),
                internal_metrics: true,
            },
        }
    }
}
