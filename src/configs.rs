//! Security domain configuration.
//!
//! Loaded exactly once per run: `config.toml` first (when present), then
//! `CLUSTER_PKI_*` environment variables on top. The resulting
//! [`DomainConfig`] is immutable for the rest of the run.
//!
//! The domain passphrase deliberately has no default. It protects the CA
//! private key and every credential container, so it must be injected from
//! outside via the `passphrase` key or `CLUSTER_PKI_PASSPHRASE`.

use crate::credential_bundle::ContainerFormat;
use crate::errors::{ProvisionError, Result};
use crate::generate_node_identity::node_name_violation;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

const CONFIG_PATH: &str = "config.toml";
const ENV_PREFIX: &str = "CLUSTER_PKI_";

/// Raw on-disk configuration shape, before validation
#[derive(Debug, Deserialize, Clone)]
pub struct FileConfig {
    pub passphrase: Option<String>,
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
    #[serde(default = "default_node_names")]
    pub node_names: Vec<String>,
    #[serde(default = "default_host_ip")]
    pub host_ip: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_domain_name")]
    pub domain_name: String,
    #[serde(default)]
    pub container_format: ContainerFormat,
    #[serde(default = "default_rotate")]
    pub rotate_node_credentials: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            passphrase: None,
            validity_days: default_validity_days(),
            node_names: default_node_names(),
            host_ip: default_host_ip(),
            output_dir: default_output_dir(),
            domain_name: default_domain_name(),
            container_format: ContainerFormat::default(),
            rotate_node_credentials: default_rotate(),
        }
    }
}

fn default_validity_days() -> u32 {
    365
}

fn default_node_names() -> Vec<String> {
    vec![
        "kafka1".to_string(),
        "kafka2".to_string(),
        "kafka3".to_string(),
    ]
}

fn default_host_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("secrets")
}

fn default_domain_name() -> String {
    "kafka-cluster".to_string()
}

fn default_rotate() -> bool {
    true
}

/// Validated, process-wide security domain configuration
#[derive(Debug, Clone)]
pub struct DomainConfig {
    /// Passphrase protecting the CA key and all credential containers
    pub passphrase: SecretString,
    /// Certificate validity in days, for the CA and every node certificate
    pub validity_days: u32,
    /// Ordered node names; issuance walks this list front to back
    pub node_names: Vec<String>,
    /// Host IP embedded in every node certificate's SAN extension
    pub host_ip: IpAddr,
    /// Root directory for all security material
    pub output_dir: PathBuf,
    /// Subject common name of the root CA
    pub domain_name: String,
    /// Output container flavor (PKCS#12 or PEM)
    pub container_format: ContainerFormat,
    /// Regenerate node keys and certificates on every run (reference
    /// behavior). When false, nodes with complete artifacts are skipped.
    pub rotate_node_credentials: bool,
}

impl DomainConfig {
    /// Load configuration from the default path plus environment overrides
    pub fn load() -> Result<Self> {
        let mut raw = if Path::new(CONFIG_PATH).exists() {
            FileConfig::from_file(CONFIG_PATH)?
        } else {
            FileConfig::default()
        };
        raw.apply_env_overrides()?;
        Self::from_raw(raw)
    }

    /// Validate a raw configuration into an immutable domain configuration
    pub fn from_raw(raw: FileConfig) -> Result<Self> {
        let passphrase = raw.passphrase.filter(|p| !p.is_empty()).ok_or_else(|| {
            ProvisionError::Config(format!(
                "no domain passphrase set; provide `passphrase` in {CONFIG_PATH} \
                 or the {ENV_PREFIX}PASSPHRASE environment variable"
            ))
        })?;

        if raw.validity_days == 0 {
            return Err(ProvisionError::Config(
                "validity_days must be at least 1".to_string(),
            ));
        }

        if raw.node_names.is_empty() {
            return Err(ProvisionError::Config(
                "node_names must contain at least one node".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for name in &raw.node_names {
            if let Some(reason) = node_name_violation(name) {
                return Err(ProvisionError::Config(reason));
            }
            if !seen.insert(name.as_str()) {
                return Err(ProvisionError::Config(format!(
                    "duplicate node name: {name}"
                )));
            }
        }

        if raw.domain_name.trim().is_empty() {
            return Err(ProvisionError::Config(
                "domain_name must not be empty".to_string(),
            ));
        }

        let host_ip: IpAddr = raw
            .host_ip
            .parse()
            .map_err(|_| ProvisionError::Config(format!("invalid host_ip: {}", raw.host_ip)))?;

        Ok(Self {
            passphrase: SecretString::new(passphrase),
            validity_days: raw.validity_days,
            node_names: raw.node_names,
            host_ip,
            output_dir: raw.output_dir,
            domain_name: raw.domain_name,
            container_format: raw.container_format,
            rotate_node_credentials: raw.rotate_node_credentials,
        })
    }
}

impl FileConfig {
    /// Load raw configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str =
            fs::read_to_string(path).map_err(|e| ProvisionError::filesystem(path, e))?;

        toml::from_str(&config_str)
            .map_err(|e| ProvisionError::Config(format!("Failed to parse {path}: {e}")))
    }

    /// Apply `CLUSTER_PKI_*` environment variables on top of file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = env::var(format!("{ENV_PREFIX}PASSPHRASE")) {
            self.passphrase = Some(v);
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}VALIDITY_DAYS")) {
            self.validity_days = v.parse().map_err(|_| {
                ProvisionError::Config(format!("invalid {ENV_PREFIX}VALIDITY_DAYS: {v}"))
            })?;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}NODES")) {
            self.node_names = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}HOST_IP")) {
            self.host_ip = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}OUTPUT_DIR")) {
            self.output_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}DOMAIN_NAME")) {
            self.domain_name = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}CONTAINER_FORMAT")) {
            self.container_format = v.parse()?;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}ROTATE_NODE_CREDENTIALS")) {
            self.rotate_node_credentials = v.parse().map_err(|_| {
                ProvisionError::Config(format!(
                    "invalid {ENV_PREFIX}ROTATE_NODE_CREDENTIALS: {v} (expected true/false)"
                ))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_passphrase() -> FileConfig {
        FileConfig {
            passphrase: Some("changeit".to_string()),
            ..FileConfig::default()
        }
    }

    #[test]
    fn test_defaults_validate() {
        let config = DomainConfig::from_raw(raw_with_passphrase()).unwrap();
        assert_eq!(config.validity_days, 365);
        assert_eq!(config.node_names, vec!["kafka1", "kafka2", "kafka3"]);
        assert_eq!(config.host_ip.to_string(), "127.0.0.1");
        assert!(config.rotate_node_credentials);
    }

    #[test]
    fn test_missing_passphrase_rejected() {
        let result = DomainConfig::from_raw(FileConfig::default());
        assert!(matches!(result, Err(ProvisionError::Config(_))));
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        let mut raw = FileConfig::default();
        raw.passphrase = Some(String::new());
        assert!(matches!(
            DomainConfig::from_raw(raw),
            Err(ProvisionError::Config(_))
        ));
    }

    #[test]
    fn test_empty_node_list_rejected() {
        let mut raw = raw_with_passphrase();
        raw.node_names.clear();
        assert!(matches!(
            DomainConfig::from_raw(raw),
            Err(ProvisionError::Config(_))
        ));
    }

    #[test]
    fn test_duplicate_node_names_rejected() {
        let mut raw = raw_with_passphrase();
        raw.node_names = vec!["kafka1".to_string(), "kafka1".to_string()];
        let result = DomainConfig::from_raw(raw);
        match result {
            Err(ProvisionError::Config(msg)) => assert!(msg.contains("duplicate")),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_reserved_and_traversal_node_names_rejected() {
        for bad in ["ca", "CA", ".", ".."] {
            let mut raw = raw_with_passphrase();
            raw.node_names = vec![bad.to_string()];
            assert!(
                matches!(DomainConfig::from_raw(raw), Err(ProvisionError::Config(_))),
                "node name {bad:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_host_ip_rejected() {
        let mut raw = raw_with_passphrase();
        raw.host_ip = "not-an-ip".to_string();
        assert!(matches!(
            DomainConfig::from_raw(raw),
            Err(ProvisionError::Config(_))
        ));
    }

    #[test]
    fn test_zero_validity_rejected() {
        let mut raw = raw_with_passphrase();
        raw.validity_days = 0;
        assert!(matches!(
            DomainConfig::from_raw(raw),
            Err(ProvisionError::Config(_))
        ));
    }

    #[test]
    fn test_toml_parse() {
        let raw: FileConfig = toml::from_str(
            r#"
            passphrase = "hunter2"
            validity_days = 30
            node_names = ["a", "b"]
            container_format = "pem"
            "#,
        )
        .unwrap();
        let config = DomainConfig::from_raw(raw).unwrap();
        assert_eq!(config.validity_days, 30);
        assert_eq!(config.node_names, vec!["a", "b"]);
        assert_eq!(config.container_format, ContainerFormat::Pem);
    }

    #[test]
    fn test_debug_output_does_not_leak_passphrase() {
        let config = DomainConfig::from_raw(raw_with_passphrase()).unwrap();
        let debug = format!("{:?}", config.passphrase);
        assert!(!debug.contains("changeit"));
    }
}
