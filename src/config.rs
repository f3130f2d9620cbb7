use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for git-carrier
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CarrierConfig {
    /// Git toolchain settings
    pub git: GitConfig,
    /// Bundle creation defaults
    pub pack: PackConfig,
    /// Commit listing settings
    pub log: LogConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GitConfig {
    /// Git executable, looked up on PATH unless absolute
    pub binary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PackConfig {
    /// Directory for bundles written without an explicit output path
    pub output_dir: Option<PathBuf>,
    /// Replace an existing file at the output path
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Commits per page in listings
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level, used when RUST_LOG is not set
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: "git".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            page_size: crate::bundling::resolver::DEFAULT_PAGE_SIZE,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            json_logs: false,
        }
    }
}

impl CarrierConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (git-carrier.toml, .git-carrier-rc), or only
    ///    `explicit` when given
    /// 3. Environment variables (`GIT_CARRIER__SECTION__KEY`)
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_from(Path::new("."), explicit)
    }

    /// Same as [`CarrierConfig::load`] with config files looked up in `dir`.
    pub fn load_from(dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match explicit {
            Some(path) => {
                builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
            }
            None => {
                let toml = dir.join("git-carrier.toml");
                if toml.exists() {
                    builder = builder.add_source(File::from(toml).format(FileFormat::Toml));
                }
                let rc = dir.join(".git-carrier-rc");
                if rc.exists() {
                    builder = builder.add_source(File::from(rc).format(FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("GIT_CARRIER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to read configuration")?;
        let carrier_config: CarrierConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(carrier_config)
    }

    /// Render as TOML, the same format the config files use.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::debug!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
