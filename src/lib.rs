//! Cluster PKI - Mutual-TLS Trust Bootstrap Library
//!
//! Provisions the transport trust material a multi-node messaging cluster
//! needs for mutual TLS: a private root certificate authority, one signed
//! identity certificate per cluster node, and per-node credential
//! containers ready to plug into each broker's TLS listener configuration.
//!
//! # Overview
//!
//! ```text
//! Root CA (self-signed, one per security domain, idempotent)
//!   └── Node Certificate (one per configured node, SAN = {DNS:node, IP:host})
//!         ├── identity container  (node key + leaf cert + CA entry)
//!         └── trust container     (CA cert only)
//! ```
//!
//! One run establishes domain trust and walks the ordered node list:
//! issue → assemble → write, fail-fast on the first error. Rerunning with
//! an intact CA reuses it byte-for-byte; it is never silently regenerated.
//!
//! # Quick Start
//!
//! ```no_run
//! use cluster_pki::configs::DomainConfig;
//! use cluster_pki::provisioner;
//!
//! fn main() -> anyhow::Result<()> {
//!     // Reads config.toml (if present) plus CLUSTER_PKI_* overrides;
//!     // the passphrase must be injected, it has no default.
//!     let config = DomainConfig::load()?;
//!     let report = provisioner::run(&config)?;
//!     for node in &report.nodes {
//!         println!("{}: serial {}", node.node_name, node.serial);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! ## [`configs`]
//!
//! The immutable per-run [`configs::DomainConfig`]: passphrase (held in a
//! [`secrecy::SecretString`]), validity window, ordered node names, host IP
//! for SAN entries, output root, and container format.
//!
//! ## [`generate_root_ca`]
//!
//! The domain trust anchor. [`generate_root_ca::ensure_root_ca`] loads an
//! existing CA or creates a fresh one, and refuses to continue over
//! half-present or mismatched CA state. Signing goes through the
//! [`generate_root_ca::CertificateAuthority`] capability trait.
//!
//! ## [`generate_node_identity`]
//!
//! Per-node issuance: fresh RSA key pair, CSR with the node's
//! distinguished name, CA-signed leaf with both DNS and IP
//! subject-alternative-names so the certificate validates over in-cluster
//! DNS and host-mapped loopback alike.
//!
//! ## [`credential_bundle`]
//!
//! Container assembly behind the
//! [`credential_bundle::CredentialContainerCodec`] trait: PKCS#12 bundles
//! by default, plain PEM for consumers without PKCS#12 support. Every
//! freshly built container is reopened and checked before it is written.
//!
//! ## [`serial_allocator`]
//!
//! Write-ahead persisted serial numbers: the successor value is durable
//! before a serial is ever embedded in a certificate, so serials are never
//! reused within a domain, even across crashes.
//!
//! ## [`layout`]
//!
//! The fixed on-disk layout under the security-material root: `ca/` plus
//! one isolated directory per node, with hardened file modes and atomic
//! writes.
//!
//! # Error Handling
//!
//! Library operations return [`errors::ProvisionError`], one variant per
//! pipeline stage. The binary adds operator-facing context with
//! `anyhow::Context` and exits non-zero on the first failure.

pub mod configs;
pub mod credential_bundle;
pub mod errors;
pub mod generate_node_identity;
pub mod generate_root_ca;
pub mod layout;
pub mod provisioner;
pub mod serial_allocator;

pub use errors::{ProvisionError, Result};
