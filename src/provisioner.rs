//! Provisioning run orchestration.
//!
//! One run walks the whole pipeline: ensure the root CA, then iterate the
//! configured node list in order, taking each node through
//! `KeyGenerated → CSRCreated → Signed → BundleAssembled → Written`.
//! The first failure anywhere aborts the run; artifacts already written for
//! earlier nodes stay on disk (no rollback), and the operator reruns after
//! resolving the condition.

use crate::configs::DomainConfig;
use crate::credential_bundle::{assemble_bundles, codec_for};
use crate::errors::{ProvisionError, Result};
use crate::generate_node_identity::{issue_node_identity, NodeIdentity};
use crate::generate_root_ca::{ensure_root_ca, CaOutcome, CertificateAuthority};
use crate::layout::{self, MaterialLayout, MODE_PRIVATE, MODE_PUBLIC};
use openssl::x509::X509;
use secrecy::ExposeSecret;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// What happened to a single node during the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    /// Fresh key, certificate, and containers were written
    Provisioned,
    /// Existing artifacts were left untouched (rotation disabled)
    Reused,
}

/// Per-node result value, aggregated into the final [`RunReport`]
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub node_name: String,
    /// Decimal certificate serial, unique within the domain
    pub serial: String,
    pub action: NodeAction,
    /// The node's isolated output directory
    pub directory: PathBuf,
}

/// Outcome of a full provisioning run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub ca: CaOutcome,
    pub nodes: Vec<NodeReport>,
}

/// Execute one full provisioning run for the configured domain.
///
/// Strictly sequential over the ordered node list; each node writes only
/// into its own directory, and nothing is written into `ca/` after initial
/// CA creation (besides the serial allocator's write-ahead state).
pub fn run(config: &DomainConfig) -> Result<RunReport> {
    let layout = MaterialLayout::new(&config.output_dir);
    let (ca, ca_outcome) = ensure_root_ca(config, &layout)?;
    let codec = codec_for(config.container_format);
    let extension = config.container_format.extension();

    let mut nodes = Vec::with_capacity(config.node_names.len());
    for node_name in &config.node_names {
        let directory = layout.ensure_node_dir(node_name)?;

        if !config.rotate_node_credentials {
            if let Some(report) = reuse_existing(&layout, node_name, extension, &directory)? {
                info!(node = %node_name, "existing node credentials reused");
                nodes.push(report);
                continue;
            }
        }

        let identity = issue_node_identity(node_name, &ca, config)?;
        let bundle = assemble_bundles(
            &identity,
            ca.certificate(),
            config.passphrase.expose_secret(),
            codec.as_ref(),
        )?;

        write_node_artifacts(
            &layout,
            &identity,
            extension,
            &bundle.identity_container,
            &bundle.trust_container,
        )?;

        let serial = certificate_serial(&identity.certificate)?;
        info!(node = %node_name, serial = %serial, "node provisioned");
        nodes.push(NodeReport {
            node_name: node_name.clone(),
            serial,
            action: NodeAction::Provisioned,
            directory,
        });
    }

    Ok(RunReport {
        ca: ca_outcome,
        nodes,
    })
}

/// When rotation is disabled and all four artifacts exist, report the node
/// as reused (serial read back from the existing certificate)
fn reuse_existing(
    layout: &MaterialLayout,
    node_name: &str,
    extension: &str,
    directory: &Path,
) -> Result<Option<NodeReport>> {
    let paths = [
        layout.keystore_path(node_name, extension),
        layout.csr_path(node_name),
        layout.cert_path(node_name),
        layout.truststore_path(node_name, extension),
    ];
    if !paths.iter().all(|p| p.exists()) {
        return Ok(None);
    }

    let cert_path = layout.cert_path(node_name);
    let pem = fs::read(&cert_path).map_err(|e| ProvisionError::filesystem(&cert_path, e))?;
    let certificate = X509::from_pem(&pem).map_err(|e| {
        ProvisionError::StoreAssembly(format!(
            "existing certificate at {} is corrupt: {e}; remove the node directory and rerun",
            cert_path.display()
        ))
    })?;

    Ok(Some(NodeReport {
        node_name: node_name.to_string(),
        serial: certificate_serial(&certificate)?,
        action: NodeAction::Reused,
        directory: directory.to_path_buf(),
    }))
}

fn write_node_artifacts(
    layout: &MaterialLayout,
    identity: &NodeIdentity,
    extension: &str,
    identity_container: &[u8],
    trust_container: &[u8],
) -> Result<()> {
    let node = &identity.node_name;

    // The identity container embeds the private key; everything else is
    // public material
    layout::atomic_write(
        &layout.keystore_path(node, extension),
        identity_container,
        MODE_PRIVATE,
    )?;

    let csr_pem = identity
        .csr
        .to_pem()
        .map_err(|e| ProvisionError::Csr(format!("Failed to encode CSR: {e}")))?;
    layout::atomic_write(&layout.csr_path(node), &csr_pem, MODE_PUBLIC)?;

    let cert_pem = identity
        .certificate
        .to_pem()
        .map_err(|e| ProvisionError::Signing(format!("Failed to encode certificate: {e}")))?;
    layout::atomic_write(&layout.cert_path(node), &cert_pem, MODE_PUBLIC)?;

    layout::atomic_write(
        &layout.truststore_path(node, extension),
        trust_container,
        MODE_PUBLIC,
    )
}

fn certificate_serial(certificate: &X509) -> Result<String> {
    certificate
        .serial_number()
        .to_bn()
        .and_then(|bn| bn.to_dec_str().map(|s| s.to_string()))
        .map_err(|e| ProvisionError::Signing(format!("Failed to read certificate serial: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::{DomainConfig, FileConfig};
    use crate::credential_bundle::ContainerFormat;
    use openssl::stack::Stack;
    use openssl::x509::store::X509StoreBuilder;
    use openssl::x509::X509StoreContext;
    use tempfile::TempDir;

    fn test_config(output_dir: &std::path::Path) -> DomainConfig {
        DomainConfig::from_raw(FileConfig {
            passphrase: Some("changeit".to_string()),
            output_dir: output_dir.to_path_buf(),
            ..FileConfig::default()
        })
        .unwrap()
    }

    fn verify_chain(ca_cert: &X509, leaf: &X509) -> bool {
        let mut store_builder = X509StoreBuilder::new().unwrap();
        store_builder.add_cert(ca_cert.clone()).unwrap();
        let store = store_builder.build();

        let chain = Stack::new().unwrap();
        let mut ctx = X509StoreContext::new().unwrap();
        ctx.init(&store, leaf, &chain, |c| c.verify_cert()).unwrap()
    }

    #[test]
    fn test_end_to_end_three_nodes() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let layout = MaterialLayout::new(tmp.path());

        let report = run(&config).unwrap();
        assert_eq!(report.ca, CaOutcome::Created);
        assert_eq!(report.nodes.len(), 3);

        let ca_cert = X509::from_pem(&fs::read(layout.ca_cert_path()).unwrap()).unwrap();
        for node in ["kafka1", "kafka2", "kafka3"] {
            for path in [
                layout.keystore_path(node, "p12"),
                layout.csr_path(node),
                layout.cert_path(node),
                layout.truststore_path(node, "p12"),
            ] {
                assert!(path.exists(), "missing artifact: {}", path.display());
            }

            // Chain validation round-trip against the trust anchor
            let leaf = X509::from_pem(&fs::read(layout.cert_path(node)).unwrap()).unwrap();
            assert!(verify_chain(&ca_cert, &leaf), "chain invalid for {node}");
        }

        // Serial uniqueness across the run
        let mut serials: Vec<_> = report.nodes.iter().map(|n| n.serial.clone()).collect();
        serials.sort();
        serials.dedup();
        assert_eq!(serials.len(), 3);
    }

    #[test]
    fn test_second_run_reuses_ca_but_rotates_nodes() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let layout = MaterialLayout::new(tmp.path());

        let first = run(&config).unwrap();
        let ca_key = fs::read(layout.ca_key_path()).unwrap();
        let ca_cert = fs::read(layout.ca_cert_path()).unwrap();

        let second = run(&config).unwrap();
        assert_eq!(second.ca, CaOutcome::Reused);
        assert_eq!(fs::read(layout.ca_key_path()).unwrap(), ca_key);
        assert_eq!(fs::read(layout.ca_cert_path()).unwrap(), ca_cert);

        // Rotation enabled: every node gets a fresh serial
        let first_serials: Vec<_> = first.nodes.iter().map(|n| n.serial.clone()).collect();
        for node in &second.nodes {
            assert_eq!(node.action, NodeAction::Provisioned);
            assert!(!first_serials.contains(&node.serial));
        }
    }

    #[test]
    fn test_rotation_disabled_skips_complete_nodes() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(tmp.path());
        let layout = MaterialLayout::new(tmp.path());

        let first = run(&config).unwrap();
        let keystore = fs::read(layout.keystore_path("kafka1", "p12")).unwrap();

        config.rotate_node_credentials = false;
        let second = run(&config).unwrap();

        for (before, after) in first.nodes.iter().zip(&second.nodes) {
            assert_eq!(after.action, NodeAction::Reused);
            assert_eq!(before.serial, after.serial);
        }
        assert_eq!(
            fs::read(layout.keystore_path("kafka1", "p12")).unwrap(),
            keystore
        );
    }

    #[test]
    fn test_corrupt_ca_state_aborts_run() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let layout = MaterialLayout::new(tmp.path());

        run(&config).unwrap();
        fs::remove_file(layout.ca_cert_path()).unwrap();

        assert!(matches!(
            run(&config),
            Err(ProvisionError::CaGeneration(_))
        ));
    }

    #[test]
    fn test_pem_format_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(tmp.path());
        config.container_format = ContainerFormat::Pem;
        let layout = MaterialLayout::new(tmp.path());

        run(&config).unwrap();
        for node in ["kafka1", "kafka2", "kafka3"] {
            assert!(layout.keystore_path(node, "pem").exists());
            assert!(layout.truststore_path(node, "pem").exists());
        }
    }

    #[test]
    fn test_no_key_material_outside_owning_directories() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let layout = MaterialLayout::new(tmp.path());

        run(&config).unwrap();

        // Each node directory holds exactly its own four artifacts
        for node in ["kafka1", "kafka2", "kafka3"] {
            let entries: Vec<_> = fs::read_dir(layout.node_dir(node))
                .unwrap()
                .map(|e| e.unwrap().file_name().into_string().unwrap())
                .collect();
            assert_eq!(entries.len(), 4);
            assert!(entries.iter().all(|name| name.starts_with(node)));
        }
    }

    #[test]
    fn test_ca_dir_holds_only_ca_material() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let layout = MaterialLayout::new(tmp.path());

        run(&config).unwrap();
        run(&config).unwrap();

        // Nothing writes into ca/ after initial creation, so it contains
        // exactly the key, the certificate, and the serial state.
        let mut entries: Vec<_> = fs::read_dir(layout.ca_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["ca-cert.pem", "ca-key.pem", "serial"]);
    }
}
