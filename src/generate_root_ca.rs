//! Root CA Certificate Generation Module
//!
//! Owns the security domain's trust anchor: a self-signed root CA whose key
//! signs every node certificate in the cluster.
//!
//! # PKI Hierarchy Position
//! ```text
//! Root CA (self-signed) ← This module
//!   └── Node Certificate (signed by Root, one per cluster node)
//! ```
//!
//! # Certificate Properties
//! - **Self-signed**: Issuer and subject are the same
//! - **Key Usage**: keyCertSign, cRLSign, digitalSignature
//! - **Basic Constraints**: CA=true, critical
//! - **Key Size**: RSA 4096-bit, SHA-256 signatures
//! - **Serial Numbers**: allocated from the domain's write-ahead counter,
//!   never random, never reused
//!
//! # Idempotence
//! [`ensure_root_ca`] is the only entry point. If both the key and the
//! certificate already exist on disk they are loaded and reused unchanged;
//! they are never silently regenerated. A half-present CA (key without
//! certificate, or certificate without key, or a pair that no longer
//! matches) is an error the operator must resolve by removing the stale
//! files and rerunning.

use crate::configs::DomainConfig;
use crate::errors::{ProvisionError, Result};
use crate::generate_node_identity::SanEntries;
use crate::layout::{self, MaterialLayout, MODE_PRIVATE, MODE_PUBLIC};
use crate::serial_allocator::SerialAllocator;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::symm::Cipher;
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509Name, X509NameRef, X509Req, X509};
use secrecy::ExposeSecret;
use std::fs;
use std::sync::Mutex;
use tracing::{debug, info};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const RSA_KEY_SIZE_DEFAULT: u32 = 4096;

/// How the run obtained its root CA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaOutcome {
    /// Fresh key pair and self-signed certificate were generated
    Created,
    /// Existing on-disk material was loaded and reused unchanged
    Reused,
}

/// Capability interface for anything that can sign node certificate
/// requests. Keeps issuance code decoupled from the concrete CA and its
/// cryptographic backend.
pub trait CertificateAuthority {
    /// The CA's subject distinguished name (becomes the issuer of every
    /// certificate it signs)
    fn subject_name(&self) -> &X509NameRef;

    /// The CA's own certificate (the cluster trust anchor)
    fn certificate(&self) -> &X509;

    /// Sign a verified CSR into a leaf certificate carrying the given SAN
    /// entries, valid for `validity_days` from now
    fn sign_request(&self, csr: &X509Req, san: &SanEntries, validity_days: u32) -> Result<X509>;
}

/// The security domain's root certificate authority.
///
/// Exclusively owns its private key and the domain's serial allocator. The
/// allocator sits behind a mutex so signing stays collision-free even if a
/// caller fans node provisioning out across threads.
pub struct RootCertificateAuthority {
    private_key: PKey<Private>,
    certificate: X509,
    serials: Mutex<SerialAllocator>,
}

/// Load the existing root CA or create a fresh one.
///
/// Exactly one CA exists per security domain:
/// - both `ca-key.pem` and `ca-cert.pem` present → load, verify the key
///   still matches the certificate, and report [`CaOutcome::Reused`];
/// - neither present → generate and persist a new CA,
///   [`CaOutcome::Created`];
/// - anything in between → `CaGeneration` error. A mismatched replacement
///   CA is never synthesized over partial state.
pub fn ensure_root_ca(
    config: &DomainConfig,
    layout: &MaterialLayout,
) -> Result<(RootCertificateAuthority, CaOutcome)> {
    layout.ensure_ca_dir()?;
    let key_path = layout.ca_key_path();
    let cert_path = layout.ca_cert_path();

    match (key_path.exists(), cert_path.exists()) {
        (true, true) => {
            let ca = load_root_ca(config, layout)?;
            info!(subject = %config.domain_name, "reusing existing root CA");
            Ok((ca, CaOutcome::Reused))
        }
        (false, false) => {
            let ca = create_root_ca(config, layout)?;
            info!(subject = %config.domain_name, "root CA created");
            Ok((ca, CaOutcome::Created))
        }
        (true, false) => Err(ProvisionError::CaGeneration(format!(
            "CA key exists at {} but certificate is missing at {}; \
             remove the stale key and rerun",
            key_path.display(),
            cert_path.display()
        ))),
        (false, true) => Err(ProvisionError::CaGeneration(format!(
            "CA certificate exists at {} but key is missing at {}; \
             remove the stale certificate and rerun",
            cert_path.display(),
            key_path.display()
        ))),
    }
}

fn load_root_ca(
    config: &DomainConfig,
    layout: &MaterialLayout,
) -> Result<RootCertificateAuthority> {
    let key_path = layout.ca_key_path();
    let cert_path = layout.ca_cert_path();

    let key_pem = fs::read(&key_path).map_err(|e| ProvisionError::filesystem(&key_path, e))?;
    let private_key = PKey::private_key_from_pem_passphrase(
        &key_pem,
        config.passphrase.expose_secret().as_bytes(),
    )
    .map_err(|e| {
        ProvisionError::CaGeneration(format!(
            "Failed to decrypt CA private key at {} (wrong passphrase or corrupt file): {e}",
            key_path.display()
        ))
    })?;

    let cert_pem = fs::read(&cert_path).map_err(|e| ProvisionError::filesystem(&cert_path, e))?;
    let certificate = X509::from_pem(&cert_pem).map_err(|e| {
        ProvisionError::CaGeneration(format!(
            "Failed to parse CA certificate at {}: {e}",
            cert_path.display()
        ))
    })?;

    let cert_public = certificate.public_key().map_err(|e| {
        ProvisionError::CaGeneration(format!("Failed to extract CA certificate public key: {e}"))
    })?;
    if !private_key.public_eq(&cert_public) {
        return Err(ProvisionError::CaGeneration(format!(
            "CA key at {} does not match certificate at {}; \
             the domain state is inconsistent",
            key_path.display(),
            cert_path.display()
        )));
    }

    let serials = SerialAllocator::open(layout.serial_path())?;
    Ok(RootCertificateAuthority {
        private_key,
        certificate,
        serials: Mutex::new(serials),
    })
}

fn create_root_ca(
    config: &DomainConfig,
    layout: &MaterialLayout,
) -> Result<RootCertificateAuthority> {
    let mut serials = SerialAllocator::initialize(layout.serial_path())?;

    // Generate RSA key pair
    let rsa = openssl::rsa::Rsa::generate(RSA_KEY_SIZE_DEFAULT)
        .map_err(|e| ProvisionError::CaGeneration(format!("Failed to generate RSA keypair: {e}")))?;
    let private_key = PKey::from_rsa(rsa)
        .map_err(|e| ProvisionError::CaGeneration(format!("Failed to create private key: {e}")))?;

    let name = build_subject_name(&config.domain_name)
        .map_err(|e| ProvisionError::CaGeneration(format!("Failed to build CA subject: {e}")))?;

    let mut builder = X509::builder()
        .map_err(|e| ProvisionError::CaGeneration(format!("Failed to create X509 builder: {e}")))?;
    let ca_err = |e: openssl::error::ErrorStack| ProvisionError::CaGeneration(e.to_string());

    builder.set_version(X509_VERSION_3).map_err(ca_err)?;

    let serial = serials.next()?;
    let asn1_serial = BigNum::from_dec_str(&serial.to_string())
        .and_then(|bn| bn.to_asn1_integer())
        .map_err(ca_err)?;
    builder.set_serial_number(&asn1_serial).map_err(ca_err)?;

    // Self-signed: issuer and subject are identical
    builder.set_subject_name(&name).map_err(ca_err)?;
    builder.set_issuer_name(&name).map_err(ca_err)?;

    let not_before = Asn1Time::days_from_now(0).map_err(ca_err)?;
    builder.set_not_before(&not_before).map_err(ca_err)?;
    let not_after = Asn1Time::days_from_now(config.validity_days).map_err(ca_err)?;
    builder.set_not_after(&not_after).map_err(ca_err)?;

    builder.set_pubkey(&private_key).map_err(ca_err)?;

    let bc = BasicConstraints::new().critical().ca().build().map_err(ca_err)?;
    builder.append_extension(bc).map_err(ca_err)?;

    let ku = KeyUsage::new()
        .critical()
        .key_cert_sign()
        .crl_sign()
        .digital_signature()
        .build()
        .map_err(ca_err)?;
    builder.append_extension(ku).map_err(ca_err)?;

    builder
        .sign(&private_key, MessageDigest::sha256())
        .map_err(|e| ProvisionError::CaGeneration(format!("Failed to sign CA certificate: {e}")))?;
    let certificate = builder.build();

    // Persist: key encrypted under the domain passphrase, certificate as PEM
    let key_pem = private_key
        .private_key_to_pem_pkcs8_passphrase(
            Cipher::aes_256_cbc(),
            config.passphrase.expose_secret().as_bytes(),
        )
        .map_err(|e| {
            ProvisionError::CaGeneration(format!("Failed to encrypt CA private key: {e}"))
        })?;
    layout::atomic_write(&layout.ca_key_path(), &key_pem, MODE_PRIVATE)?;

    let cert_pem = certificate
        .to_pem()
        .map_err(|e| ProvisionError::CaGeneration(format!("Failed to encode CA certificate: {e}")))?;
    layout::atomic_write(&layout.ca_cert_path(), &cert_pem, MODE_PUBLIC)?;

    Ok(RootCertificateAuthority {
        private_key,
        certificate,
        serials: Mutex::new(serials),
    })
}

fn build_subject_name(common_name: &str) -> std::result::Result<X509Name, openssl::error::ErrorStack> {
    let mut name_builder = X509Name::builder()?;
    name_builder.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    Ok(name_builder.build())
}

impl RootCertificateAuthority {
    fn allocate_serial(&self) -> Result<u64> {
        let mut serials = self
            .serials
            .lock()
            .map_err(|_| ProvisionError::Signing("serial allocator lock poisoned".to_string()))?;
        serials.next()
    }
}

impl CertificateAuthority for RootCertificateAuthority {
    fn subject_name(&self) -> &X509NameRef {
        self.certificate.subject_name()
    }

    fn certificate(&self) -> &X509 {
        &self.certificate
    }

    fn sign_request(&self, csr: &X509Req, san: &SanEntries, validity_days: u32) -> Result<X509> {
        // An expired trust anchor would make every issued chain unverifiable
        let now = Asn1Time::days_from_now(0)
            .map_err(|e| ProvisionError::Signing(e.to_string()))?;
        if self.certificate.not_after() < &now {
            return Err(ProvisionError::Signing(
                "root CA certificate has expired; recreate the domain CA".to_string(),
            ));
        }

        // Proof of possession: the CSR must be signed by its own key
        let csr_public = csr
            .public_key()
            .map_err(|e| ProvisionError::Csr(format!("Failed to read CSR public key: {e}")))?;
        let verified = csr
            .verify(&csr_public)
            .map_err(|e| ProvisionError::Csr(format!("Failed to verify CSR signature: {e}")))?;
        if !verified {
            return Err(ProvisionError::Csr(
                "CSR signature does not match its public key".to_string(),
            ));
        }

        let sign_err = |e: openssl::error::ErrorStack| ProvisionError::Signing(e.to_string());

        let mut builder = X509::builder().map_err(sign_err)?;
        builder.set_version(X509_VERSION_3).map_err(sign_err)?;

        let serial = self.allocate_serial()?;
        let asn1_serial = BigNum::from_dec_str(&serial.to_string())
            .and_then(|bn| bn.to_asn1_integer())
            .map_err(sign_err)?;
        builder.set_serial_number(&asn1_serial).map_err(sign_err)?;

        builder
            .set_subject_name(csr.subject_name())
            .map_err(sign_err)?;
        builder
            .set_issuer_name(self.certificate.subject_name())
            .map_err(sign_err)?;

        let not_before = Asn1Time::days_from_now(0).map_err(sign_err)?;
        builder.set_not_before(&not_before).map_err(sign_err)?;
        let not_after = Asn1Time::days_from_now(validity_days).map_err(sign_err)?;
        builder.set_not_after(&not_after).map_err(sign_err)?;

        builder.set_pubkey(&csr_public).map_err(sign_err)?;

        // End-entity: CA=false
        let bc = BasicConstraints::new().critical().build().map_err(sign_err)?;
        builder.append_extension(bc).map_err(sign_err)?;

        let ku = KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()
            .map_err(sign_err)?;
        builder.append_extension(ku).map_err(sign_err)?;

        // Both sides of the mutual-TLS handshake present this certificate
        let eku = ExtendedKeyUsage::new()
            .server_auth()
            .client_auth()
            .build()
            .map_err(sign_err)?;
        builder.append_extension(eku).map_err(sign_err)?;

        let mut san_builder = SubjectAlternativeName::new();
        for dns in &san.dns_names {
            san_builder.dns(dns);
        }
        for ip in &san.ip_addresses {
            san_builder.ip(&ip.to_string());
        }
        let san_ext = san_builder
            .build(&builder.x509v3_context(Some(&self.certificate), None))
            .map_err(sign_err)?;
        builder.append_extension(san_ext).map_err(sign_err)?;

        builder
            .sign(&self.private_key, MessageDigest::sha256())
            .map_err(|e| ProvisionError::Signing(format!("Failed to sign certificate: {e}")))?;

        debug!(serial, "leaf certificate signed");
        Ok(builder.build())
    }
}
