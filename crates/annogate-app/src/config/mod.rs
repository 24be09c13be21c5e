//! Configuration loading and XDG path helpers.
//!
//! Sources, later wins: built-in defaults, `<etc>/annogate/settings`,
//! `$XDG_CONFIG_HOME/annogate/settings`, `./config/settings`, the file named by
//! `ANNOGATE_CONFIG_FILE`, then `ANNOGATE__*` environment variables.
//!
//! Environment keys arrive lowercased, so pipeline option keys are mapped back
//! to the spelling of known options afterwards. `ANNOGATE_PIPELINE_DEFAULTS`
//! and `ANNOGATE_PIPELINE_FIXED` take a `key=value;...` blob whose keys keep
//! their case, and apply last.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use annogate_server::Properties;
use annogate_server::blob::parse_pairs;
use annogate_server::properties::canonical_option;
use annogate_server::config::ServerConfig;
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

const CONFIG_FILE: &str = "config/settings";
const SETTINGS_NAME: &str = "settings";
const ETC_DIR_ENV: &str = "ANNOGATE_ETC_CONFIG_DIR";
const OVERRIDE_FILE_ENV: &str = "ANNOGATE_CONFIG_FILE";
const PIPELINE_DEFAULTS_ENV: &str = "ANNOGATE_PIPELINE_DEFAULTS";
const PIPELINE_FIXED_ENV: &str = "ANNOGATE_PIPELINE_FIXED";
const DEFAULT_ETC_DIR: &str = "/etc";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9000";
const DEFAULT_ANNOTATORS: &str = "tokenize,ssplit";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("unable to resolve project directories")]
    MissingProjectDirs,
    #[error(transparent)]
    Build(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResourcesConfig {
    /// Directory searched before the overlays compiled into the binary.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineConfig {
    /// Bound on cached pipelines; unset keeps every pipeline.
    #[serde(default)]
    pub cache_capacity: Option<u64>,
    /// Extra built-in defaults, applied beneath every request.
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
    /// Options for the fixed `/json`, `/xml` and `/conll` endpoints.
    #[serde(default)]
    pub fixed: BTreeMap<String, String>,
}

impl PipelineConfig {
    pub fn default_properties(&self) -> Properties {
        self.defaults.clone().into()
    }

    pub fn fixed_properties(&self) -> Properties {
        self.fixed.clone().into()
    }

    fn restore_option_case(&mut self) {
        self.defaults = canonical_keys(std::mem::take(&mut self.defaults));
        self.fixed = canonical_keys(std::mem::take(&mut self.fixed));
    }

    fn apply_blob_env(&mut self) {
        if let Some(blob) = env_blob(PIPELINE_DEFAULTS_ENV) {
            extend_with_blob(&mut self.defaults, &blob);
        }
        if let Some(blob) = env_blob(PIPELINE_FIXED_ENV) {
            extend_with_blob(&mut self.fixed, &blob);
        }
    }
}

/// Respell keys naming a known option. A respelled key wins over an entry
/// already spelled canonically.
fn canonical_keys(options: BTreeMap<String, String>) -> BTreeMap<String, String> {
    let (aliased, exact): (Vec<_>, Vec<_>) = options
        .into_iter()
        .partition(|(key, _)| canonical_option(key).is_some_and(|name| name != key.as_str()));
    let mut out: BTreeMap<String, String> = exact.into_iter().collect();
    for (key, value) in aliased {
        if let Some(name) = canonical_option(&key) {
            out.insert(name.to_string(), value);
        }
    }
    out
}

fn env_blob(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(blob) => Some(blob),
        Err(env::VarError::NotPresent) => None,
        Err(env::VarError::NotUnicode(_)) => {
            tracing::warn!(variable = name, "ignoring non UTF-8 pipeline options");
            None
        }
    }
}

fn extend_with_blob(options: &mut BTreeMap<String, String>, blob: &str) {
    for (key, value) in parse_pairs(blob).iter() {
        options.insert(key.to_string(), value.to_string());
    }
}

pub fn load() -> Result<AppConfig, AppConfigError> {
    let default_resources = default_resources_dir()?;
    let etc_dir = env::var_os(ETC_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ETC_DIR));
    let etc_settings = etc_dir.join("annogate").join(SETTINGS_NAME);
    let xdg_settings = project_dirs()?.config_dir().join(SETTINGS_NAME);

    let mut builder = Config::builder()
        .set_default("server.listen_addr", DEFAULT_LISTEN_ADDR)?
        .set_default(
            "resources.dir",
            default_resources.to_string_lossy().to_string(),
        )?
        .set_default("pipeline.defaults.annotators", DEFAULT_ANNOTATORS)?
        .add_source(File::from(etc_settings).required(false))
        .add_source(File::from(xdg_settings).required(false))
        .add_source(File::with_name(CONFIG_FILE).required(false));

    if let Some(path) = env::var_os(OVERRIDE_FILE_ENV) {
        builder = builder.add_source(File::from(PathBuf::from(path)).required(true));
    }

    let mut cfg: AppConfig = builder
        .add_source(
            Environment::with_prefix("ANNOGATE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    cfg.pipeline.restore_option_case();
    cfg.pipeline.apply_blob_env();
    Ok(cfg)
}

pub fn project_dirs() -> Result<ProjectDirs, AppConfigError> {
    ProjectDirs::from("dev", "annogate", "annogate").ok_or(AppConfigError::MissingProjectDirs)
}

fn default_resources_dir() -> Result<PathBuf, AppConfigError> {
    Ok(project_dirs()?.data_dir().join("resources"))
}
