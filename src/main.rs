//! Cluster PKI - Mutual-TLS Trust Bootstrap
//!
//! Parameterless provisioning run: reads the domain configuration from
//! `config.toml` and `CLUSTER_PKI_*` environment variables, establishes (or
//! reuses) the root CA, issues a certificate per configured node, and
//! writes each node's credential containers into its own directory.
//!
//! Exit status is 0 only when every configured node reached the terminal
//! `Written` state; the first stage failure aborts with a non-zero status.

use anyhow::{Context, Result};
use cluster_pki::configs::DomainConfig;
use cluster_pki::generate_root_ca::CaOutcome;
use cluster_pki::provisioner::{self, NodeAction};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("=== Cluster PKI Bootstrap ===\n");

    let config = DomainConfig::load().context("Failed to load domain configuration")?;
    let report = provisioner::run(&config).context("Provisioning run failed")?;

    match report.ca {
        CaOutcome::Created => println!("✓ Root CA created"),
        CaOutcome::Reused => println!("✓ Existing root CA reused"),
    }
    for node in &report.nodes {
        let action = match node.action {
            NodeAction::Provisioned => "provisioned",
            NodeAction::Reused => "reused",
        };
        println!(
            "✓ {}: certificate serial {} ({action}) in {}",
            node.node_name,
            node.serial,
            node.directory.display()
        );
    }
    println!(
        "\nAll {} node(s) ready under {}",
        report.nodes.len(),
        config.output_dir.display()
    );

    Ok(())
}
