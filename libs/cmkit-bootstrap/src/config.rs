use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use cmkit::{
    BackendRecord, CredentialEntry, DispatcherOptions, InMemoryInfoBroker, StaticCredentialStore,
};

/// Environment prefix: `CM__DISPATCHER__INFRA_BACKEND_SOURCE=instances`
/// maps to `dispatcher.infra_backend_source`.
pub const ENV_PREFIX: &str = "CM__";

/// Operator configuration: dispatcher tuning, seeded collaborators and
/// logging.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Dispatcher options (credential purpose, infrastructure backend source).
    #[serde(default)]
    pub dispatcher: DispatcherOptions,
    /// Entries seeding the static credential store.
    #[serde(default)]
    pub credentials: Vec<CredentialEntry>,
    /// infra_id → ordered backend records, seeding the information broker.
    #[serde(default)]
    pub infrastructures: BTreeMap<String, Vec<BackendRecord>>,
    /// Logging configuration (optional, uses defaults if None).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Logging configuration - maps subsystem names to their logging settings.
/// Key "default" is the catch-all for logs that don't match explicit subsystems.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    #[serde(default)]
    pub file: String, // "logs/cm-dispatch.log"; empty disables the file sink
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

impl Section {
    pub fn console(level: &str) -> Self {
        Self {
            console_level: level.to_string(),
            file: String::new(),
            file_level: String::new(),
            max_age_days: None,
            max_backups: None,
            max_size_mb: None,
        }
    }
}

pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: "logs/cm-dispatch.log".to_string(),
            file_level: "debug".to_string(),
            max_age_days: Some(7),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl AppConfig {
    /// Layered loading: defaults → YAML file → `CM__*` environment.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        let path = config_path.as_ref();
        if !path.is_file() {
            anyhow::bail!("Config file '{}' does not exist", path.display());
        }

        let figment = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: AppConfig = figment
            .extract()
            .with_context(|| format!("Failed to load config from '{}'", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            infrastructures = config.infrastructures.len(),
            credentials = config.credentials.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration from file, or defaults with the stock logging setup.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => Ok(Self {
                logging: Some(default_logging_config()),
                ..Self::default()
            }),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Raise the console level of the "default" logging section from `-v` flags.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        let logging = self.logging.get_or_insert_with(default_logging_config);
        let default_section = logging
            .entry("default".to_string())
            .or_insert_with(|| Section::console("info"));
        default_section.console_level = match args.verbose {
            0 => default_section.console_level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        };
    }

    pub fn credential_store(&self) -> StaticCredentialStore {
        StaticCredentialStore::new(self.credentials.clone())
    }

    /// Information broker seeded with the configured infrastructures.
    pub fn info_broker(&self) -> InMemoryInfoBroker {
        let broker = InMemoryInfoBroker::new();
        for (infra_id, records) in &self.infrastructures {
            broker.set_config_managers(infra_id.clone(), records.clone());
        }
        broker
    }
}

/// Command line arguments that feed configuration overrides.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub verbose: u8,
    pub mock: bool,
}
