//! Error taxonomy for the provisioning pipeline.
//!
//! Every stage of a run maps onto exactly one variant, and the first error
//! anywhere aborts the whole run (fail-fast, no retry, no rollback of
//! artifacts already written to disk).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Errors that can occur while provisioning cluster trust material
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Invalid or incomplete domain configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Root CA creation or loading inconsistency.
    ///
    /// Raised on cryptographic failure during CA generation, and also when
    /// the on-disk CA material is half-present (key without certificate, or
    /// the reverse) or the key no longer matches the certificate. A
    /// mismatched replacement CA is never synthesized.
    #[error("root CA generation failed: {0}")]
    CaGeneration(String),

    /// Malformed certificate signing request input
    #[error("certificate request failed: {0}")]
    Csr(String),

    /// The CA could not produce a signature: corrupt or mismatched key,
    /// expired CA certificate, or serial number exhaustion
    #[error("certificate signing failed: {0}")]
    Signing(String),

    /// Credential container assembly failed: passphrase mismatch or
    /// unexpected container content after import
    #[error("credential container assembly failed: {0}")]
    StoreAssembly(String),

    /// Filesystem permission or disk failure
    #[error("filesystem operation failed on {path}: {source}")]
    Filesystem {
        /// Path the operation was acting on
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

impl ProvisionError {
    /// Wrap an I/O error with the path it occurred on
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}
