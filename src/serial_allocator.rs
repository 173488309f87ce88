//! Write-ahead persisted serial number allocation.
//!
//! Certificate serial numbers within a security domain must never repeat,
//! even across process crashes. The allocator keeps the *next* serial in a
//! plain text file and persists the successor value before ever handing a
//! serial out: a crash after allocation leaves a gap, never a duplicate.

use crate::errors::{ProvisionError, Result};
use crate::layout::{self, MODE_PRIVATE};
use std::fs;
use std::path::PathBuf;

const FIRST_SERIAL: u64 = 1;

/// Monotonically increasing serial counter backed by a state file.
///
/// Not internally synchronized; the owning CA wraps it in a `Mutex` so
/// concurrent signers cannot observe the same value.
#[derive(Debug)]
pub struct SerialAllocator {
    path: PathBuf,
    next: u64,
}

impl SerialAllocator {
    /// Create the state file for a brand-new domain.
    ///
    /// Fails if the file already exists: an existing allocator must be
    /// opened, never reset, or previously issued serials could repeat.
    pub fn initialize(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            return Err(ProvisionError::CaGeneration(format!(
                "serial allocator state already exists at {}",
                path.display()
            )));
        }
        layout::atomic_write(&path, format!("{FIRST_SERIAL}\n").as_bytes(), MODE_PRIVATE)?;
        Ok(Self {
            path,
            next: FIRST_SERIAL,
        })
    }

    /// Open the state file of an existing domain.
    ///
    /// A missing file alongside existing CA material means the domain state
    /// was tampered with; continuing could reuse serials, so this fails.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path).map_err(|e| {
            ProvisionError::CaGeneration(format!(
                "serial allocator state missing or unreadable at {}: {e}",
                path.display()
            ))
        })?;
        let next: u64 = content.trim().parse().map_err(|_| {
            ProvisionError::CaGeneration(format!(
                "corrupt serial allocator state at {}: {content:?}",
                path.display()
            ))
        })?;
        Ok(Self { path, next })
    }

    /// Allocate the next serial.
    ///
    /// The successor value is durably written before the allocated serial is
    /// returned (write-ahead), so the caller may embed it in a certificate
    /// without risking reuse after a crash.
    pub fn next(&mut self) -> Result<u64> {
        let serial = self.next;
        let successor = serial.checked_add(1).ok_or_else(|| {
            ProvisionError::Signing("serial number space exhausted for this domain".to_string())
        })?;
        layout::atomic_write(&self.path, format!("{successor}\n").as_bytes(), MODE_PRIVATE)?;
        self.next = successor;
        Ok(serial)
    }
}
