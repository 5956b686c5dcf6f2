//! # Config Loader
//!
//! Loads `config.toml` (writing a default one on first run) and layers the
//! command-line flags and environment switches on top of it. The resulting
//! [`Settings`] value is what the filters consult while a template renders.
use crate::{
    constants::{ENV_RECACHE, ENV_RECACHE_LEGACY, ENV_VERBOSE},
    core::paths::{self, PathError},
    models::SiestaConfig,
};
use std::{collections::HashMap, env, fs, path::Path};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Path error: {0}")]
    Path(#[from] PathError),
    #[error("Failed to parse config.toml: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Where environment switches are read from.
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    /// The real process environment, read on every lookup.
    #[default]
    Process,
    /// A fixed set of variables. Used by tests so they never mutate the process environment.
    Fixed(HashMap<String, String>),
}

impl EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        match self {
            Self::Process => env::var(key).ok(),
            Self::Fixed(vars) => vars.get(key).cloned(),
        }
    }
}

/// The effective settings of one run.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub config: SiestaConfig,
    /// `--recache` was passed on the command line.
    pub recache: bool,
    /// `--verbose` was passed on the command line.
    pub verbose: bool,
    pub env: EnvSource,
}

impl Settings {
    /// Combines the loaded config with the command-line flags.
    pub fn new(config: SiestaConfig, recache: bool, verbose: bool) -> Self {
        Self {
            config,
            recache,
            verbose,
            env: EnvSource::Process,
        }
    }

    /// Whether cache reads must be skipped. The environment is consulted on every call.
    pub fn bypass_cache(&self) -> bool {
        self.recache
            || [ENV_RECACHE, ENV_RECACHE_LEGACY]
                .iter()
                .any(|key| is_affirmative(self.env.get(key).as_deref()))
    }

    /// Whether streamed deltas are mirrored to stderr. The environment is consulted on every call.
    pub fn mirror_stream(&self) -> bool {
        self.verbose || is_affirmative(self.env.get(ENV_VERBOSE).as_deref())
    }

    /// Reads an arbitrary variable through the configured source.
    pub fn env_var(&self, key: &str) -> Option<String> {
        self.env.get(key)
    }
}

/// Returns true for the textual values accepted as "on": `1`, `true`, `yes`.
pub fn is_affirmative(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes")
    )
}

/// Loads the user's `config.toml`, creating it with defaults when it does not exist yet.
pub fn load_config() -> Result<SiestaConfig, ConfigError> {
    let config_path = paths::get_config_file_path()?;
    load_config_from(&config_path)
}

/// Loads a config file from an explicit path, writing the defaults there when missing.
pub fn load_config_from(config_path: &Path) -> Result<SiestaConfig, ConfigError> {
    if !config_path.exists() {
        log::debug!(
            "No config found at '{}'. Writing defaults.",
            config_path.display()
        );
        let default_config = SiestaConfig::default();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(config_path, toml::to_string_pretty(&default_config)?)?;
        Ok(default_config)
    } else {
        let content = fs::read_to_string(config_path)?;
        Ok(toml::from_str(&content)?)
    }
}
