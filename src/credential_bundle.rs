//! Credential container assembly.
//!
//! Packages each node's trust material into two containers:
//!
//! - **Identity container**: the node's private key and leaf certificate,
//!   plus the CA certificate as an unnamed chain entry, so a node can both
//!   present its identity and validate peers from a single file.
//! - **Trust container**: the CA certificate alone under the fixed
//!   [`CA_ALIAS`] friendly name, for callers that only verify and never
//!   present identity.
//!
//! Both are protected by the domain passphrase. Assembly is verified by
//! re-opening the freshly built containers: the identity container must end
//! up with exactly one key, one leaf entry, and one CA entry; the trust
//! container with exactly one certificate and no key material.
//!
//! The [`CredentialContainerCodec`] trait decouples the pipeline from the
//! container flavor: [`Pkcs12Codec`] emits platform-native PKCS#12 bundles,
//! [`PemCodec`] emits plain PEM for consumers without PKCS#12 support.

use crate::errors::{ProvisionError, Result};
use crate::generate_node_identity::NodeIdentity;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::stack::Stack;
use openssl::symm::Cipher;
use openssl::x509::X509;
use serde::Deserialize;
use std::str::FromStr;

/// Friendly name of the trust container's CA entry, also written as a
/// comment header ahead of the CA certificate in PEM identity containers.
/// PKCS#12 friendly names attach to the key-and-leaf bag only, so the
/// identity container's CA chain entry carries no alias.
pub const CA_ALIAS: &str = "CARoot";

/// Output flavor for credential containers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// PKCS#12 bundles (`.p12`), loadable by JVM keystore tooling
    #[default]
    Pkcs12,
    /// Concatenated PEM files for PEM-only consumers
    Pem,
}

impl ContainerFormat {
    /// File extension for containers of this format
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pkcs12 => "p12",
            Self::Pem => "pem",
        }
    }
}

impl FromStr for ContainerFormat {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pkcs12" | "p12" => Ok(Self::Pkcs12),
            "pem" => Ok(Self::Pem),
            other => Err(ProvisionError::Config(format!(
                "invalid container format: {other} (expected pkcs12 or pem)"
            ))),
        }
    }
}

/// A node's assembled trust material, ready to persist
pub struct CredentialBundle {
    /// Identity container: node key + leaf certificate + CA entry
    pub identity_container: Vec<u8>,
    /// Trust container: CA certificate only
    pub trust_container: Vec<u8>,
    pub format: ContainerFormat,
}

/// Capability interface for building and verifying credential containers
pub trait CredentialContainerCodec {
    fn format(&self) -> ContainerFormat;

    /// Build the identity container for a node
    fn build_identity(
        &self,
        identity: &NodeIdentity,
        ca_cert: &X509,
        passphrase: &str,
    ) -> Result<Vec<u8>>;

    /// Build the trust-only container
    fn build_trust(&self, ca_cert: &X509, passphrase: &str) -> Result<Vec<u8>>;

    /// Re-open a freshly built identity container and check its contents
    fn verify_identity(&self, container: &[u8], passphrase: &str) -> Result<()>;

    /// Re-open a freshly built trust container and check its contents
    fn verify_trust(&self, container: &[u8], passphrase: &str) -> Result<()>;
}

/// Assemble and verify both containers for a node.
///
/// The CA entry is imported independently of the leaf entry, so the trust
/// chain stays usable even for consumers that only read the CA entry.
pub fn assemble_bundles(
    identity: &NodeIdentity,
    ca_cert: &X509,
    passphrase: &str,
    codec: &dyn CredentialContainerCodec,
) -> Result<CredentialBundle> {
    let identity_container = codec.build_identity(identity, ca_cert, passphrase)?;
    codec.verify_identity(&identity_container, passphrase)?;

    let trust_container = codec.build_trust(ca_cert, passphrase)?;
    codec.verify_trust(&trust_container, passphrase)?;

    Ok(CredentialBundle {
        identity_container,
        trust_container,
        format: codec.format(),
    })
}

/// PKCS#12 container codec (default)
pub struct Pkcs12Codec;

impl Pkcs12Codec {
    fn ca_stack(ca_cert: &X509) -> Result<Stack<X509>> {
        let mut stack = Stack::new()
            .map_err(|e| ProvisionError::StoreAssembly(format!("Failed to create stack: {e}")))?;
        stack
            .push(ca_cert.clone())
            .map_err(|e| ProvisionError::StoreAssembly(format!("Failed to add CA entry: {e}")))?;
        Ok(stack)
    }
}

impl CredentialContainerCodec for Pkcs12Codec {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Pkcs12
    }

    fn build_identity(
        &self,
        identity: &NodeIdentity,
        ca_cert: &X509,
        passphrase: &str,
    ) -> Result<Vec<u8>> {
        let mut builder = Pkcs12::builder();
        builder.name(&identity.node_name);
        builder.pkey(&identity.private_key);
        builder.cert(&identity.certificate);
        builder.ca(Self::ca_stack(ca_cert)?);

        let pkcs12 = builder.build2(passphrase).map_err(|e| {
            ProvisionError::StoreAssembly(format!("Failed to build identity container: {e}"))
        })?;
        pkcs12.to_der().map_err(|e| {
            ProvisionError::StoreAssembly(format!("Failed to encode identity container: {e}"))
        })
    }

    fn build_trust(&self, ca_cert: &X509, passphrase: &str) -> Result<Vec<u8>> {
        let mut builder = Pkcs12::builder();
        builder.name(CA_ALIAS);
        builder.ca(Self::ca_stack(ca_cert)?);

        let pkcs12 = builder.build2(passphrase).map_err(|e| {
            ProvisionError::StoreAssembly(format!("Failed to build trust container: {e}"))
        })?;
        pkcs12.to_der().map_err(|e| {
            ProvisionError::StoreAssembly(format!("Failed to encode trust container: {e}"))
        })
    }

    fn verify_identity(&self, container: &[u8], passphrase: &str) -> Result<()> {
        let parsed = Pkcs12::from_der(container)
            .map_err(|e| {
                ProvisionError::StoreAssembly(format!("Failed to reopen identity container: {e}"))
            })?
            .parse2(passphrase)
            .map_err(|e| {
                ProvisionError::StoreAssembly(format!(
                    "Failed to unlock identity container (passphrase mismatch?): {e}"
                ))
            })?;

        if parsed.pkey.is_none() {
            return Err(ProvisionError::StoreAssembly(
                "identity container is missing its private key entry".to_string(),
            ));
        }
        if parsed.cert.is_none() {
            return Err(ProvisionError::StoreAssembly(
                "identity container is missing its leaf certificate entry".to_string(),
            ));
        }
        let ca_entries = parsed.ca.as_ref().map_or(0, |s| s.len());
        if ca_entries != 1 {
            return Err(ProvisionError::StoreAssembly(format!(
                "identity container holds {ca_entries} CA entries, expected exactly 1"
            )));
        }
        Ok(())
    }

    fn verify_trust(&self, container: &[u8], passphrase: &str) -> Result<()> {
        let parsed = Pkcs12::from_der(container)
            .map_err(|e| {
                ProvisionError::StoreAssembly(format!("Failed to reopen trust container: {e}"))
            })?
            .parse2(passphrase)
            .map_err(|e| {
                ProvisionError::StoreAssembly(format!(
                    "Failed to unlock trust container (passphrase mismatch?): {e}"
                ))
            })?;

        if parsed.pkey.is_some() {
            return Err(ProvisionError::StoreAssembly(
                "trust container must not hold private key material".to_string(),
            ));
        }
        let total = usize::from(parsed.cert.is_some()) + parsed.ca.as_ref().map_or(0, |s| s.len());
        if total != 1 {
            return Err(ProvisionError::StoreAssembly(format!(
                "trust container holds {total} certificates, expected exactly 1"
            )));
        }
        Ok(())
    }
}

/// PEM container codec.
///
/// The identity container is a single PEM file: the passphrase-encrypted
/// PKCS#8 node key first, then the leaf certificate, then the CA
/// certificate under the [`CA_ALIAS`] comment header. The trust container
/// is the CA certificate alone.
pub struct PemCodec;

impl CredentialContainerCodec for PemCodec {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Pem
    }

    fn build_identity(
        &self,
        identity: &NodeIdentity,
        ca_cert: &X509,
        passphrase: &str,
    ) -> Result<Vec<u8>> {
        let key_pem = identity
            .private_key
            .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), passphrase.as_bytes())
            .map_err(|e| {
                ProvisionError::StoreAssembly(format!("Failed to encrypt node key: {e}"))
            })?;
        let leaf_pem = identity.certificate.to_pem().map_err(|e| {
            ProvisionError::StoreAssembly(format!("Failed to encode leaf certificate: {e}"))
        })?;
        let ca_pem = ca_cert.to_pem().map_err(|e| {
            ProvisionError::StoreAssembly(format!("Failed to encode CA certificate: {e}"))
        })?;

        let mut out = key_pem;
        out.extend_from_slice(&leaf_pem);
        out.extend_from_slice(format!("# alias: {CA_ALIAS}\n").as_bytes());
        out.extend_from_slice(&ca_pem);
        Ok(out)
    }

    fn build_trust(&self, ca_cert: &X509, _passphrase: &str) -> Result<Vec<u8>> {
        ca_cert.to_pem().map_err(|e| {
            ProvisionError::StoreAssembly(format!("Failed to encode CA certificate: {e}"))
        })
    }

    fn verify_identity(&self, container: &[u8], passphrase: &str) -> Result<()> {
        PKey::private_key_from_pem_passphrase(container, passphrase.as_bytes()).map_err(|e| {
            ProvisionError::StoreAssembly(format!(
                "Failed to unlock identity container (passphrase mismatch?): {e}"
            ))
        })?;

        let certs = X509::stack_from_pem(container).map_err(|e| {
            ProvisionError::StoreAssembly(format!("Failed to reopen identity container: {e}"))
        })?;
        if certs.len() != 2 {
            return Err(ProvisionError::StoreAssembly(format!(
                "identity container holds {} certificates, expected leaf + CA",
                certs.len()
            )));
        }
        Ok(())
    }

    fn verify_trust(&self, container: &[u8], _passphrase: &str) -> Result<()> {
        if PKey::private_key_from_pem(container).is_ok() {
            return Err(ProvisionError::StoreAssembly(
                "trust container must not hold private key material".to_string(),
            ));
        }
        let certs = X509::stack_from_pem(container).map_err(|e| {
            ProvisionError::StoreAssembly(format!("Failed to reopen trust container: {e}"))
        })?;
        if certs.len() != 1 {
            return Err(ProvisionError::StoreAssembly(format!(
                "trust container holds {} certificates, expected exactly 1",
                certs.len()
            )));
        }
        Ok(())
    }
}

/// Codec for the configured container format
pub fn codec_for(format: ContainerFormat) -> Box<dyn CredentialContainerCodec> {
    match format {
        ContainerFormat::Pkcs12 => Box::new(Pkcs12Codec),
        ContainerFormat::Pem => Box::new(PemCodec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::{DomainConfig, FileConfig};
    use crate::generate_node_identity::issue_node_identity;
    use crate::generate_root_ca::{ensure_root_ca, CertificateAuthority};
    use crate::layout::MaterialLayout;
    use tempfile::TempDir;

    const PASSPHRASE: &str = "changeit";

    fn test_identity() -> (NodeIdentity, X509) {
        let tmp = TempDir::new().unwrap();
        let layout = MaterialLayout::new(tmp.path());
        let config = DomainConfig::from_raw(FileConfig {
            passphrase: Some(PASSPHRASE.to_string()),
            ..FileConfig::default()
        })
        .unwrap();
        let (ca, _) = ensure_root_ca(&config, &layout).unwrap();
        let identity = issue_node_identity("kafka1", &ca, &config).unwrap();
        (identity, ca.certificate().clone())
    }

    #[test]
    fn test_pkcs12_identity_contents() {
        let (identity, ca_cert) = test_identity();
        let bundle = assemble_bundles(&identity, &ca_cert, PASSPHRASE, &Pkcs12Codec).unwrap();

        let parsed = Pkcs12::from_der(&bundle.identity_container)
            .unwrap()
            .parse2(PASSPHRASE)
            .unwrap();
        assert!(parsed.pkey.is_some());
        assert!(parsed.cert.is_some());
        assert_eq!(parsed.ca.unwrap().len(), 1);
    }

    #[test]
    fn test_pkcs12_trust_is_minimal() {
        let (identity, ca_cert) = test_identity();
        let bundle = assemble_bundles(&identity, &ca_cert, PASSPHRASE, &Pkcs12Codec).unwrap();

        let parsed = Pkcs12::from_der(&bundle.trust_container)
            .unwrap()
            .parse2(PASSPHRASE)
            .unwrap();
        assert!(parsed.pkey.is_none(), "trust container must hold no key");

        let total =
            usize::from(parsed.cert.is_some()) + parsed.ca.as_ref().map_or(0, |s| s.len());
        assert_eq!(total, 1, "trust container must hold exactly the CA cert");
    }

    #[test]
    fn test_pkcs12_trust_entry_is_the_ca() {
        let (identity, ca_cert) = test_identity();
        let bundle = assemble_bundles(&identity, &ca_cert, PASSPHRASE, &Pkcs12Codec).unwrap();

        let parsed = Pkcs12::from_der(&bundle.trust_container)
            .unwrap()
            .parse2(PASSPHRASE)
            .unwrap();
        let stored = parsed
            .ca
            .as_ref()
            .and_then(|stack| stack.get(0))
            .map(|c| c.to_der().unwrap())
            .or_else(|| parsed.cert.as_ref().map(|c| c.to_der().unwrap()))
            .unwrap();
        assert_eq!(stored, ca_cert.to_der().unwrap());
    }

    #[test]
    fn test_pkcs12_wrong_passphrase_rejected() {
        let (identity, ca_cert) = test_identity();
        let container = Pkcs12Codec
            .build_identity(&identity, &ca_cert, PASSPHRASE)
            .unwrap();

        assert!(matches!(
            Pkcs12Codec.verify_identity(&container, "wrong"),
            Err(ProvisionError::StoreAssembly(_))
        ));
    }

    #[test]
    fn test_pem_identity_round_trip() {
        let (identity, ca_cert) = test_identity();
        let bundle = assemble_bundles(&identity, &ca_cert, PASSPHRASE, &PemCodec).unwrap();

        let key =
            PKey::private_key_from_pem_passphrase(&bundle.identity_container, PASSPHRASE.as_bytes())
                .unwrap();
        assert!(key.public_eq(&identity.certificate.public_key().unwrap()));

        let certs = X509::stack_from_pem(&bundle.identity_container).unwrap();
        assert_eq!(certs.len(), 2);
        assert_eq!(
            certs[1].to_der().unwrap(),
            ca_cert.to_der().unwrap(),
            "CA entry must come after the leaf"
        );
    }

    #[test]
    fn test_pem_trust_is_minimal() {
        let (identity, ca_cert) = test_identity();
        let bundle = assemble_bundles(&identity, &ca_cert, PASSPHRASE, &PemCodec).unwrap();

        let certs = X509::stack_from_pem(&bundle.trust_container).unwrap();
        assert_eq!(certs.len(), 1);
        assert!(PKey::private_key_from_pem(&bundle.trust_container).is_err());
    }

    #[test]
    fn test_container_format_parsing() {
        assert_eq!("pkcs12".parse::<ContainerFormat>().unwrap(), ContainerFormat::Pkcs12);
        assert_eq!("P12".parse::<ContainerFormat>().unwrap(), ContainerFormat::Pkcs12);
        assert_eq!("pem".parse::<ContainerFormat>().unwrap(), ContainerFormat::Pem);
        assert!("jks".parse::<ContainerFormat>().is_err());
    }
}
