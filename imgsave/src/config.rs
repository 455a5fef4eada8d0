use std::env;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use ociclient::ImageReference;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_REGISTRY: &str = "https://registry-1.docker.io";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for SettingsError {
    fn from(err: config::ConfigError) -> Self {
        SettingsError::Config(err.to_string())
    }
}

/// Values that can come from files, the environment or the command line
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub registry_url: String,
    pub os: String,
    pub arch: String,
    pub timeout_secs: u64,
}

/// Command line values; `None` leaves the lower layers in charge
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub registry_url: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Settings {
    pub fn load(overrides: &SettingsOverrides) -> Result<Self, SettingsError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "dev".into());

        let config = Config::builder()
            // Start with default values
            .set_default("registry_url", DEFAULT_REGISTRY)?
            .set_default("os", "linux")?
            .set_default("arch", "amd64")?
            .set_default("timeout_secs", 300)?
            // Add configuration from files
            .add_source(File::with_name("/etc/imgsave/config").required(false))
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add environment variables with prefix IMGSAVE_
            .add_source(Environment::with_prefix("IMGSAVE"))
            .set_override_option("registry_url", overrides.registry_url.clone())?
            .set_override_option("os", overrides.os.clone())?
            .set_override_option("arch", overrides.arch.clone())?
            .set_override_option("timeout_secs", overrides.timeout_secs.map(|secs| secs as i64))?
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY.to_string(),
            os: "linux".to_string(),
            arch: "amd64".to_string(),
            timeout_secs: 300,
        }
    }
}

/// Everything one pull needs. Built once, then only borrowed.
#[derive(Debug, Clone)]
pub struct PullConfig {
    pub registry_url: String,
    /// Repository path, e.g. `library/alpine`
    pub image: String,
    /// Tag or digest
    pub reference: String,
    pub os: String,
    pub arch: String,
    pub output_dir: PathBuf,
    pub timeout: Duration,
}

impl PullConfig {
    /// A registry host named in the image wins over the configured registry;
    /// the output directory defaults to the repository's last path segment.
    pub fn new(settings: &Settings, image: &ImageReference, output_dir: Option<PathBuf>) -> Self {
        Self {
            registry_url: image
                .registry_url()
                .unwrap_or_else(|| settings.registry_url.clone()),
            image: image.name.clone(),
            reference: image.reference.clone(),
            os: settings.os.clone(),
            arch: settings.arch.clone(),
            output_dir: output_dir.unwrap_or_else(|| PathBuf::from(image.basename())),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}
