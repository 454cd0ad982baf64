//! Application configuration and path discovery.
//!
//! Layered the usual way: built-in defaults, then the TOML config
//! file, then `ANNUAIRE_*` environment variables (`__` separates
//! nesting levels, e.g. `ANNUAIRE_SERVER__PORT=5001`).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "annuaire";

/// Resolved filesystem locations for this run.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Discover paths, honoring an explicit `--config` override.
    pub fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        Ok(Self {
            config_file,
            data_dir: default_data_dir()?,
        })
    }

    pub fn apply_overrides(mut self, cfg: &AppConfig) -> Result<Self> {
        if let Some(ref data_override) = cfg.paths.data_dir {
            self.data_dir = expand_str_path(data_override)?;
        }
        Ok(self)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating data directory {}", self.data_dir.display()))
    }

    /// Storage descriptor handed to the local backend process.
    pub fn db_uri(&self) -> String {
        format!("sqlite:///{}", self.data_dir.join("contacts.db").display())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub readiness: ReadinessConfig,
    pub paths: PathsConfig,
}

/// Local backend process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Backend executable (packaged binary or interpreter wrapper).
    pub program: String,
    /// Arguments placed before the `--db-uri` descriptor.
    pub args: Vec<String>,
    /// Port the local backend listens on.
    pub port: u16,
    /// Seconds to wait after a graceful termination request before
    /// escalating to a forceful kill.
    pub grace_period_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            program: "annuaire-api".to_string(),
            args: Vec::new(),
            port: 5000,
            grace_period_secs: 5,
        }
    }
}

impl ServerConfig {
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// What to do when the local backend never reports ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadinessPolicy {
    /// Deliver the (unverified) endpoint anyway; data calls will
    /// surface connection errors on their own.
    #[default]
    BestEffort,
    /// Fail the selection instead of handing out an unverified URL.
    Strict,
}

/// Readiness polling budget for local backend startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub max_attempts: u32,
    pub per_attempt_timeout_ms: u64,
    pub inter_attempt_delay_ms: u64,
    pub policy: ReadinessPolicy,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            per_attempt_timeout_ms: 2_000,
            inter_attempt_delay_ms: 500,
            policy: ReadinessPolicy::default(),
        }
    }
}

impl ReadinessConfig {
    pub fn per_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.per_attempt_timeout_ms)
    }

    pub fn inter_attempt_delay(&self) -> Duration {
        Duration::from_millis(self.inter_attempt_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: Option<String>,
}

/// Load configuration, writing a default config file on first run.
pub fn load_or_init_config(paths: &AppPaths) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        write_default_config(&paths.config_file)?;
    }

    let built = Config::builder()
        .add_source(
            File::from(paths.config_file.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix("ANNUAIRE").separator("__"))
        .build()
        .context("building configuration")?;

    built
        .try_deserialize::<AppConfig>()
        .context("deserializing configuration")
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {}", parent.display()))?;
    }
    let contents =
        toml::to_string_pretty(&AppConfig::default()).context("serializing default config")?;
    fs::write(path, contents)
        .with_context(|| format!("writing default config {}", path.display()))
}

pub fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::data_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}
