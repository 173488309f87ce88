//! Node Certificate Generation Module
//!
//! Issues one signed identity per configured cluster node: a fresh RSA key
//! pair, a CSR carrying the node's distinguished name, and a leaf
//! certificate signed by the domain's root CA.
//!
//! # PKI Hierarchy Position
//! ```text
//! Root CA (self-signed)
//!   └── Node Certificate (signed by Root) ← This module
//! ```
//!
//! # Certificate Properties
//! - **Key Usage**: digitalSignature, keyEncipherment
//! - **Extended Key Usage**: serverAuth, clientAuth (mutual TLS)
//! - **Basic Constraints**: CA=false, critical
//! - **SAN**: exactly {DNS:<node name>, IP:<configured host IP>}, so the
//!   certificate validates whether a peer connects via in-cluster DNS or
//!   the host-mapped address

use crate::configs::DomainConfig;
use crate::errors::{ProvisionError, Result};
use crate::generate_root_ca::CertificateAuthority;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509Name, X509Req, X509ReqBuilder, X509};
use std::net::IpAddr;
use tracing::debug;

const RSA_KEY_SIZE_DEFAULT: u32 = 4096;

/// Subject-alternative-name entries embedded in a node certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanEntries {
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
}

impl SanEntries {
    /// SAN entries for a cluster node: its DNS name plus the host IP
    pub fn for_node(node_name: &str, host_ip: IpAddr) -> Self {
        Self {
            dns_names: vec![node_name.to_string()],
            ip_addresses: vec![host_ip],
        }
    }
}

/// A node's freshly issued identity material
pub struct NodeIdentity {
    pub node_name: String,
    pub private_key: PKey<Private>,
    pub csr: X509Req,
    pub certificate: X509,
    pub san: SanEntries,
}

/// Generate a key pair and CSR for `node_name` and have the CA sign it.
///
/// The resulting certificate's issuer equals the CA's subject, its serial
/// comes from the domain allocator, and its SAN extension holds exactly the
/// node's DNS name and the configured host IP.
pub fn issue_node_identity<A: CertificateAuthority>(
    node_name: &str,
    ca: &A,
    config: &DomainConfig,
) -> Result<NodeIdentity> {
    validate_node_name(node_name)?;

    // Fresh key pair per node per run; never shared across node directories
    let rsa = openssl::rsa::Rsa::generate(RSA_KEY_SIZE_DEFAULT)
        .map_err(|e| ProvisionError::Csr(format!("Failed to generate RSA keypair: {e}")))?;
    let private_key = PKey::from_rsa(rsa)
        .map_err(|e| ProvisionError::Csr(format!("Failed to create private key: {e}")))?;

    let csr = build_csr(node_name, &private_key)?;
    let san = SanEntries::for_node(node_name, config.host_ip);
    let certificate = ca.sign_request(&csr, &san, config.validity_days)?;

    debug!(node = node_name, "node identity issued");
    Ok(NodeIdentity {
        node_name: node_name.to_string(),
        private_key,
        csr,
        certificate,
        san,
    })
}

/// Build a CSR with subject CN = `node_name`, self-signed by the node key
pub(crate) fn build_csr(node_name: &str, private_key: &PKey<Private>) -> Result<X509Req> {
    let csr_err = |e: openssl::error::ErrorStack| ProvisionError::Csr(e.to_string());

    let mut name_builder = X509Name::builder().map_err(csr_err)?;
    name_builder
        .append_entry_by_nid(Nid::COMMONNAME, node_name)
        .map_err(|e| {
            ProvisionError::Csr(format!("invalid distinguished name {node_name:?}: {e}"))
        })?;
    let name = name_builder.build();

    let mut builder = X509ReqBuilder::new().map_err(csr_err)?;
    builder.set_version(0).map_err(csr_err)?;
    builder.set_subject_name(&name).map_err(csr_err)?;
    builder.set_pubkey(private_key).map_err(csr_err)?;
    builder
        .sign(private_key, MessageDigest::sha256())
        .map_err(|e| ProvisionError::Csr(format!("Failed to sign CSR: {e}")))?;

    Ok(builder.build())
}

fn validate_node_name(node_name: &str) -> Result<()> {
    match node_name_violation(node_name) {
        Some(reason) => Err(ProvisionError::Csr(reason)),
        None => Ok(()),
    }
}

/// Why `name` is unusable as a node name, or `None` if it is fine.
///
/// Node names double as directory names under the output root, so on top of
/// the DNS-label character set this rejects the reserved `ca` directory and
/// dot-only names that would resolve outside the node's own directory.
pub(crate) fn node_name_violation(name: &str) -> Option<String> {
    if name.trim().is_empty() {
        return Some("node name must not be empty".to_string());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Some(format!("node name {name:?} is not a valid DNS label"));
    }
    if name.chars().all(|c| c == '.') {
        return Some(format!(
            "node name {name:?} would resolve outside its own directory"
        ));
    }
    if name.eq_ignore_ascii_case("ca") {
        return Some(format!(
            "node name {name:?} is reserved for the certificate authority directory"
        ));
    }
    None
}
