//! Filesystem layout for security material.
//!
//! All artifacts live under a single root directory:
//!
//! ```text
//! <root>/
//!   ca/
//!     ca-key.pem    encrypted CA private key (0600)
//!     ca-cert.pem   self-signed CA certificate (0644)
//!     serial        write-ahead serial allocator state (0600)
//!   <node>/
//!     <node>.keystore.p12    identity container (0600)
//!     <node>.csr             certificate signing request (0644)
//!     <node>.crt             signed certificate (0644)
//!     <node>.truststore.p12  trust container (0644)
//! ```
//!
//! Directories are 0700 on Unix. Writes go through a temp file in the target
//! directory followed by an atomic rename, so readers never observe a
//! partially written artifact.

use crate::errors::{ProvisionError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const CA_DIR: &str = "ca";
const CA_KEY_FILE: &str = "ca-key.pem";
const CA_CERT_FILE: &str = "ca-cert.pem";
const SERIAL_FILE: &str = "serial";

/// Owner read/write only; used for anything holding private key material
pub const MODE_PRIVATE: u32 = 0o600;
/// World-readable; used for public certificates and requests
pub const MODE_PUBLIC: u32 = 0o644;
const MODE_DIR: u32 = 0o700;

/// Resolves and creates the per-domain directory structure
#[derive(Debug, Clone)]
pub struct MaterialLayout {
    root: PathBuf,
}

impl MaterialLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create (or reuse) the CA directory and return its path
    pub fn ensure_ca_dir(&self) -> Result<PathBuf> {
        let dir = self.root.join(CA_DIR);
        ensure_dir(&dir)?;
        Ok(dir)
    }

    /// Create (or reuse) a node's isolated output directory
    pub fn ensure_node_dir(&self, node_name: &str) -> Result<PathBuf> {
        let dir = self.root.join(node_name);
        ensure_dir(&dir)?;
        Ok(dir)
    }

    pub fn ca_dir(&self) -> PathBuf {
        self.root.join(CA_DIR)
    }

    pub fn ca_key_path(&self) -> PathBuf {
        self.root.join(CA_DIR).join(CA_KEY_FILE)
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.root.join(CA_DIR).join(CA_CERT_FILE)
    }

    pub fn serial_path(&self) -> PathBuf {
        self.root.join(CA_DIR).join(SERIAL_FILE)
    }

    pub fn node_dir(&self, node_name: &str) -> PathBuf {
        self.root.join(node_name)
    }

    /// Identity container path; extension depends on the container format
    pub fn keystore_path(&self, node_name: &str, extension: &str) -> PathBuf {
        self.node_dir(node_name)
            .join(format!("{node_name}.keystore.{extension}"))
    }

    pub fn csr_path(&self, node_name: &str) -> PathBuf {
        self.node_dir(node_name).join(format!("{node_name}.csr"))
    }

    pub fn cert_path(&self, node_name: &str) -> PathBuf {
        self.node_dir(node_name).join(format!("{node_name}.crt"))
    }

    /// Trust container path; extension depends on the container format
    pub fn truststore_path(&self, node_name: &str, extension: &str) -> PathBuf {
        self.node_dir(node_name)
            .join(format!("{node_name}.truststore.{extension}"))
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| ProvisionError::filesystem(dir, e))?;
    set_mode(dir, MODE_DIR)
}

/// Atomically write `bytes` to `path` with the given Unix mode
pub fn atomic_write(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| {
            ProvisionError::filesystem(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent"),
            )
        })?;

    let mut tmp =
        NamedTempFile::new_in(parent).map_err(|e| ProvisionError::filesystem(parent, e))?;
    tmp.write_all(bytes)
        .map_err(|e| ProvisionError::filesystem(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| ProvisionError::filesystem(path, e))?;
    tmp.persist(path)
        .map_err(|e| ProvisionError::filesystem(path, e.error))?;
    set_mode(path, mode)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| ProvisionError::filesystem(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
