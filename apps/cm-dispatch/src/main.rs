use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cm_backends::{register_builtin_backends, ChefConnector, InMemoryChefServer};
use cmkit::{BackendRegistry, ConfigManager, RegistryBuilder};
use cmkit_bootstrap::{AppConfig, CliArgs};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Configuration-management dispatch - drive infrastructure environments
/// on the configured backends
#[derive(Parser)]
#[command(name = "cm-dispatch")]
#[command(about = "Configuration-management dispatch for infrastructures")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use an in-process Chef server instead of a real one
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate every configured backend record and exit
    Check,
    /// Create the infrastructure's environment on every backend
    CreateInfra { infra_id: String },
    /// Tear down the infrastructure's environment on every backend
    DropInfra { infra_id: String },
    /// Report whether every backend has the infrastructure's environment
    InfraExists { infra_id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        verbose: cli.verbose,
        mock: cli.mock,
    };

    // 1) defaults -> 2) YAML (if provided) -> 3) env (CM__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.clone().unwrap_or_default();
    cmkit_bootstrap::logging::init_logging(&logging_config, &log_base_dir(cli.config.as_deref()));

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let chef: Option<Arc<dyn ChefConnector>> = if args.mock {
        tracing::info!("Mock mode enabled: Chef backends use an in-process server");
        Some(Arc::new(InMemoryChefServer::new()))
    } else {
        None
    };
    let registry = Arc::new(build_registry(chef)?);

    match cli.command.unwrap_or(Commands::Check) {
        Commands::Check => check_config(&config, &registry),
        Commands::CreateInfra { infra_id } => {
            dispatcher(&config, registry).create_infrastructure(&infra_id)?;
            println!("Infrastructure '{infra_id}' created");
            Ok(())
        }
        Commands::DropInfra { infra_id } => {
            dispatcher(&config, registry).drop_infrastructure(&infra_id)?;
            println!("Infrastructure '{infra_id}' dropped");
            Ok(())
        }
        Commands::InfraExists { infra_id } => {
            let exists = dispatcher(&config, registry).infrastructure_exists(&infra_id)?;
            println!("{exists}");
            Ok(())
        }
    }
}

/// Relative log files land next to the config file, or in the working directory.
fn log_base_dir(config_path: Option<&Path>) -> PathBuf {
    config_path
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn build_registry(chef: Option<Arc<dyn ChefConnector>>) -> Result<BackendRegistry> {
    let mut builder = RegistryBuilder::new();
    register_builtin_backends(&mut builder, chef);
    builder
        .build()
        .context("Failed to build the backend registry")
}

fn dispatcher(config: &AppConfig, registry: Arc<BackendRegistry>) -> ConfigManager {
    ConfigManager::new(
        registry,
        Arc::new(config.credential_store()),
        Arc::new(config.info_broker()),
    )
    .with_options(config.dispatcher.clone())
}

fn check_config(config: &AppConfig, registry: &BackendRegistry) -> Result<()> {
    tracing::info!("Checking configuration…");

    let mut failures = Vec::new();
    for (infra_id, records) in &config.infrastructures {
        for (position, record) in records.iter().enumerate() {
            if let Err(e) = registry.check(record) {
                tracing::error!(infra_id = %infra_id, position, error = %e, "Invalid backend record");
                failures.push(format!("{infra_id}[{position}]: {e}"));
            }
        }
    }
    for entry in &config.credentials {
        if !registry.contains(&entry.protocol) {
            failures.push(format!(
                "credentials: no backend registered for protocol '{}'",
                entry.protocol
            ));
        }
    }

    if !failures.is_empty() {
        anyhow::bail!("Configuration is invalid:\n  {}", failures.join("\n  "));
    }
    println!("{}", check_summary(config));
    Ok(())
}

/// One line of counts; credential contents stay out of the output.
fn check_summary(config: &AppConfig) -> String {
    let backends: usize = config.infrastructures.values().map(Vec::len).sum();
    format!(
        "Configuration is valid: {} infrastructures, {} backend records, {} credential entries",
        config.infrastructures.len(),
        backends,
        config.credentials.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn load(yaml: &str) -> (tempfile::TempDir, AppConfig) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cm.yaml");
        fs::write(&path, yaml).unwrap();
        let config = AppConfig::load_layered(&path).unwrap();
        (dir, config)
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["cm-dispatch", "--mock", "-vv", "infra-exists", "infra-1"])
            .unwrap();
        assert!(cli.mock);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Some(Commands::InfraExists { ref infra_id }) if infra_id == "infra-1"));
    }

    #[test]
    fn check_reports_every_bad_record() {
        let (_dir, config) = load(
            r#"
credentials:
  - type: salt
    auth_data: {}
infrastructures:
  infra-1:
    - type: chef
      endpoint: "https://chef"
    - type: puppet
      endpoint: "https://puppet"
      colour: red
    - type: dummy
"#,
        );
        let registry = build_registry(None).unwrap();
        let err = check_config(&config, &registry).unwrap_err().to_string();
        assert!(err.contains("infra-1[0]"));
        assert!(err.contains("run_list"));
        assert!(err.contains("infra-1[1]"));
        assert!(err.contains("colour"));
        assert!(err.contains("'salt'"));
        assert!(!err.contains("infra-1[2]"));
    }

    #[test]
    fn mock_chef_infrastructure_round_trip() {
        let (_dir, config) = load(
            r#"
credentials:
  - type: chef
    auth_data: {client_name: occo, client_key: PEM}
infrastructures:
  infra-1:
    - type: chef
      endpoint: "https://chef"
      run_list: []
    - type: puppet_solo
      manifests: [site.pp]
"#,
        );
        let chef = InMemoryChefServer::new();
        let registry = Arc::new(build_registry(Some(Arc::new(chef.clone()))).unwrap());
        check_config(&config, &registry).unwrap();

        let cm = dispatcher(&config, registry);
        assert!(!cm.infrastructure_exists("infra-1").unwrap());
        cm.create_infrastructure("infra-1").unwrap();
        assert!(cm.infrastructure_exists("infra-1").unwrap());
        cm.drop_infrastructure("infra-1").unwrap();
        assert!(chef.environments().is_empty());
    }

    #[test]
    fn check_summary_omits_credentials() {
        let (_dir, config) = load(
            r#"
credentials:
  - type: chef
    auth_data: {client_name: occo, client_key: SECRET-PEM}
infrastructures:
  infra-1:
    - type: dummy
    - type: puppet_solo
      manifests: [site.pp]
"#,
        );
        let registry = build_registry(None).unwrap();
        check_config(&config, &registry).unwrap();

        let summary = check_summary(&config);
        assert!(summary.starts_with("Configuration is valid"));
        assert!(summary.contains("1 infrastructures, 2 backend records, 1 credential entries"));
        assert!(!summary.contains("SECRET-PEM"));
        assert!(!summary.contains("occo"));
    }

    #[test]
    fn chef_without_mock_cannot_connect() {
        let (_dir, config) = load(
            r#"
credentials:
  - type: chef
    auth_data: {client_name: occo, client_key: PEM}
infrastructures:
  infra-1:
    - type: chef
      endpoint: "https://chef"
      run_list: []
"#,
        );
        let registry = Arc::new(build_registry(None).unwrap());
        assert!(dispatcher(&config, registry)
            .create_infrastructure("infra-1")
            .is_err());
    }

    #[test]
    fn log_dir_follows_config_file() {
        assert_eq!(
            log_base_dir(Some(Path::new("/etc/cm/cm.yaml"))),
            PathBuf::from("/etc/cm")
        );
        assert_eq!(log_base_dir(Some(Path::new("cm.yaml"))), PathBuf::from("."));
        assert_eq!(log_base_dir(None), PathBuf::from("."));
    }
}
