//! Configuration file management for the exporter.
//!
//! This module handles loading, parsing, and merging configuration from TOML
//! files and command-line arguments. Settings can be specified in multiple
//! places with clear precedence rules.
//!
//! # Configuration Precedence
//!
//! 1. Default values (lowest priority)
//! 2. Configuration file (tlsexporter.toml or specified with --config)
//! 3. Command-line arguments (highest priority)
//!
//! # Example Configuration File
//!
//! ```toml
//! port = 8080
//! probe_timeout_secs = 5
//! max_workers = 32
//!
//! [kubernetes]
//! api_server = "https://10.0.0.1:6443"
//! token_file = "/var/run/secrets/kubernetes.io/serviceaccount/token"
//! ca_cert_file = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_WORKERS: usize = 32;

/// Main configuration structure for the exporter.
///
/// All fields are optional to support partial configuration and merging.
/// Missing values will be filled in by defaults or overridden by CLI
/// arguments.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Port the metrics endpoint listens on
    pub port: Option<u16>,
    /// Per-probe dial/read timeout in seconds
    pub probe_timeout_secs: Option<u64>,
    /// Upper bound on concurrent probes
    pub max_workers: Option<usize>,
    /// Cluster API access configuration
    pub kubernetes: Option<KubernetesConfig>,
}

/// Cluster credentials configuration.
///
/// When `api_server` is unset the exporter falls back to the in-cluster
/// service account.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct KubernetesConfig {
    /// Cluster API server address (e.g., "https://10.0.0.1:6443")
    pub api_server: Option<String>,
    /// File holding the bearer token for the API server
    pub token_file: Option<String>,
    /// File holding the cluster CA certificate (PEM)
    pub ca_cert_file: Option<String>,
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully parsed configuration
    /// * `Err(ConfigError::Io)` - File could not be read
    /// * `Err(ConfigError::Parse)` - File contains invalid TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Creates a default configuration.
    ///
    /// # Default Values
    ///
    /// - `port`: 8080
    /// - `probe_timeout_secs`: 5
    /// - `max_workers`: 32
    /// - `kubernetes`: in-cluster service account (no explicit credentials)
    pub fn default() -> Self {
        Config {
            port: Some(DEFAULT_PORT),
            probe_timeout_secs: Some(DEFAULT_PROBE_TIMEOUT_SECS),
            max_workers: Some(DEFAULT_MAX_WORKERS),
            kubernetes: Some(KubernetesConfig {
                api_server: None,
                token_file: None,
                ca_cert_file: None,
            }),
        }
    }

    /// Merges this configuration with another, prioritizing the other's
    /// values.
    ///
    /// For each field, if the `other` config has a value (Some), it overrides
    /// this config's value. If the `other` value is None, keeps the current
    /// value.
    pub fn merge_with(mut self, other: Config) -> Self {
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.probe_timeout_secs.is_some() {
            self.probe_timeout_secs = other.probe_timeout_secs;
        }
        if other.max_workers.is_some() {
            self.max_workers = other.max_workers;
        }
        if let Some(other_kube) = other.kubernetes {
            if let Some(ref mut self_kube) = self.kubernetes {
                if other_kube.api_server.is_some() {
                    self_kube.api_server = other_kube.api_server;
                }
                if other_kube.token_file.is_some() {
                    self_kube.token_file = other_kube.token_file;
                }
                if other_kube.ca_cert_file.is_some() {
                    self_kube.ca_cert_file = other_kube.ca_cert_file;
                }
            } else {
                self.kubernetes = Some(other_kube);
            }
        }
        self
    }

    /// Creates a Config from command-line arguments for merging.
    ///
    /// Only provided arguments (Some values) will override other
    /// configurations.
    pub fn from_cli_args(
        port: Option<u16>,
        probe_timeout_secs: Option<u64>,
        max_workers: Option<usize>,
        api_server: Option<String>,
        token_file: Option<String>,
        ca_cert_file: Option<String>,
    ) -> Self {
        Config {
            port,
            probe_timeout_secs,
            max_workers,
            kubernetes: Some(KubernetesConfig {
                api_server,
                token_file,
                ca_cert_file,
            }),
        }
    }

    /// Checks that the resolved configuration can actually run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == Some(0) {
            return Err(ConfigError::Validation(
                "port must be between 1 and 65535".to_string(),
            ));
        }
        if self.probe_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "probe_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.max_workers == Some(0) {
            return Err(ConfigError::Validation(
                "max_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Generates an example configuration file in TOML format.
    ///
    /// Useful for bootstrapping a new configuration file.
    pub fn example_toml() -> String {
        let example = Config {
            port: Some(DEFAULT_PORT),
            probe_timeout_secs: Some(DEFAULT_PROBE_TIMEOUT_SECS),
            max_workers: Some(DEFAULT_MAX_WORKERS),
            kubernetes: Some(KubernetesConfig {
                api_server: Some("https://10.0.0.1:6443".to_string()),
                token_file: Some(
                    "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string(),
                ),
                ca_cert_file: Some(
                    "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt".to_string(),
                ),
            }),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    Parse(String),
    /// Validation error (missing required fields, invalid values, etc.)
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO Error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse Error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
