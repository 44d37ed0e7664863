//! # Command Line Interface
//!
//! Harness utilities usable outside a test run: print the resolved settings,
//! collect component logs for a test after the fact, and mint blamed names
//! for resources created by hand.

pub mod output;

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use crate::config::settings::LoggingSettings;
use crate::config::validators::get_path;
use crate::config::{HarnessConfig, Settings, SettingsLoader};
use crate::fixtures::Blame;
use crate::kubernetes::{ClusterClient, ClusterOptions};
use crate::observability::{init_logging, LogCollector};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "kuadrant-testsuite")]
#[command(about = "Kuadrant end-to-end test harness utilities")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding settings.yaml and secrets.yaml
    #[arg(long, global = true, default_value = "config")]
    pub config_dir: PathBuf,

    /// Settings environment section applied after `default`; overrides `KUADRANT_ENV`
    #[arg(long, global = true)]
    pub env: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the resolved settings with secrets masked
    Settings {
        /// Dotted key of a single section, e.g. `service_protection`
        #[arg(long)]
        section: Option<String>,

        /// Resolve in-cluster defaults (Keycloak URL, credentials) first
        #[arg(long)]
        resolve: bool,

        /// Output format (json or yaml)
        #[arg(short, long, default_value = "yaml")]
        output: String,
    },

    /// Collect component logs for a test into the failure artifact tree
    CollectLogs {
        /// Test name, used as the artifact directory
        #[arg(long)]
        test: String,

        /// Start of the log window (RFC 3339)
        #[arg(long)]
        since: DateTime<Utc>,

        /// Component to collect; repeatable
        #[arg(long = "component", required = true)]
        components: Vec<String>,
    },

    /// Print a unique name for a resource created by hand
    Blame {
        name: String,

        /// Context embedded in the name
        #[arg(long, default_value = "manual")]
        context: String,
    },
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut loader = SettingsLoader::new().config_dir(&cli.config_dir);
    if cli.env.is_some() {
        loader = loader.environment(cli.env.clone());
    }
    let settings = loader.load().context("Failed to load settings")?;
    initialise_logging(&settings, cli.verbose);

    match cli.command {
        Commands::Settings { section, resolve, output } => {
            handle_settings(settings, section.as_deref(), resolve, output.parse()?).await?
        }
        Commands::CollectLogs { test, since, components } => {
            handle_collect_logs(&settings, &test, since, &components).await?
        }
        Commands::Blame { name, context } => println!("{}", Blame::new(context).blame(&name)),
    }

    Ok(())
}

fn initialise_logging(settings: &Settings, verbose: bool) {
    let logging = if verbose {
        LoggingSettings {
            level: "debug".to_string(),
            ..settings.logging.clone()
        }
    } else {
        settings.logging.clone()
    };
    init_logging(&logging);
}

async fn connect(settings: &Settings) -> anyhow::Result<ClusterClient> {
    ClusterClient::connect(ClusterOptions::from(&settings.cluster))
        .await
        .context("Failed to connect to the cluster")
}

async fn handle_settings(
    settings: Settings,
    section: Option<&str>,
    resolve: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let cluster = if resolve { Some(connect(&settings).await?) } else { None };
    let mut config = HarnessConfig::from_settings(settings)?;
    if let Some(cluster) = cluster {
        config = config.attach_cluster(cluster);
    }

    let tree = match section {
        Some(key) => {
            config.section(key).await?;
            get_path(&config.redacted().await, key).cloned().unwrap_or(Value::Null)
        }
        None => config.redacted().await,
    };
    output::print_output(&tree, format)
}

async fn handle_collect_logs(
    settings: &Settings,
    test: &str,
    since: DateTime<Utc>,
    components: &[String],
) -> anyhow::Result<()> {
    let collector = LogCollector::from_settings(connect(settings).await?, settings);
    let report = collector.collect(test, since, components).await;
    info!(logs = report.logs.len(), errors = report.errors.len(), "Collected logs");
    for path in report.logs.iter().chain(&report.errors) {
        println!("{}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_collect_logs() {
        let cli = Cli::try_parse_from([
            "kuadrant-testsuite",
            "collect-logs",
            "--test",
            "test_basic",
            "--since",
            "2024-05-01T10:00:00Z",
            "--component",
            "authorino",
            "--component",
            "gateway",
        ])
        .unwrap();
        match cli.command {
            Commands::CollectLogs { test, components, since } => {
                assert_eq!(test, "test_basic");
                assert_eq!(components, vec!["authorino", "gateway"]);
                assert_eq!(since.to_rfc3339(), "2024-05-01T10:00:00+00:00");
            }
            _ => panic!("expected collect-logs"),
        }
    }

    #[test]
    fn test_collect_logs_needs_a_component() {
        assert!(Cli::try_parse_from([
            "kuadrant-testsuite",
            "collect-logs",
            "--test",
            "t",
            "--since",
            "2024-05-01T10:00:00Z",
        ])
        .is_err());
    }
}
