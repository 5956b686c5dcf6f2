// src/core/paths.rs

use crate::constants::{APP_DIR, CONFIG_FILENAME, RESPONSE_CACHE_FILENAME};
use crate::models::SiestaConfig;
use lazy_static::lazy_static;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

lazy_static! {
    static ref SIESTA_CONFIG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
    #[error("Could not find system cache directory.")]
    CacheDirNotFound,
    #[error("Could not create directory at '{path}': {source}")]
    DirCreation {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to expand path '{path}': {message}")]
    Expansion { path: String, message: String },
}

/// Returns the path to the siesta configuration directory (`~/.config/siesta`).
/// Creates it if it doesn't exist.
///
/// This function is memoized: the first call computes and caches the path,
/// subsequent calls return the cached value instantly.
pub fn get_siesta_config_dir() -> Result<PathBuf, PathError> {
    // A poisoned lock only means another thread panicked mid-lookup; the cached
    // value is still usable.
    let mut cached_path_guard = SIESTA_CONFIG_DIR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(path) = &*cached_path_guard {
        return Ok(path.clone());
    }

    let config_path = dirs::config_dir()
        .ok_or(PathError::ConfigDirNotFound)?
        .join(APP_DIR);
    ensure_dir(&config_path)?;

    *cached_path_guard = Some(config_path.clone());
    Ok(config_path)
}

/// Returns the path to `config.toml`.
pub fn get_config_file_path() -> Result<PathBuf, PathError> {
    get_siesta_config_dir().map(|dir| dir.join(CONFIG_FILENAME))
}

/// Returns the location of the response cache file.
///
/// The `render.cache_path` setting wins when present; otherwise the file lives
/// in the platform cache directory (`~/.cache/siesta/responses.bin` on Linux).
pub fn get_response_cache_path(config: &SiestaConfig) -> Result<PathBuf, PathError> {
    if let Some(custom) = &config.render.cache_path {
        return expand_path(&custom.to_string_lossy());
    }
    let cache_dir = dirs::cache_dir()
        .ok_or(PathError::CacheDirNotFound)?
        .join(APP_DIR);
    ensure_dir(&cache_dir)?;
    Ok(cache_dir.join(RESPONSE_CACHE_FILENAME))
}

/// Expands the home directory (`~`) and environment variables (`$VAR`) in a path string.
pub fn expand_path(template: &str) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(template).map_err(|e| PathError::Expansion {
        path: template.to_string(),
        message: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.into_owned()))
}

fn ensure_dir(path: &PathBuf) -> Result<(), PathError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| PathError::DirCreation {
            path: path.display().to_string(),
            source: e,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RenderConfig;

    #[test]
    fn test_custom_cache_path_wins() {
        let config = SiestaConfig {
            render: RenderConfig {
                cache_path: Some(PathBuf::from("/tmp/siesta-test/custom.bin")),
                ..RenderConfig::default()
            },
            ..SiestaConfig::default()
        };

        let path = get_response_cache_path(&config).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/siesta-test/custom.bin"));
    }

    #[test]
    fn test_expand_path_leaves_plain_paths_alone() {
        assert_eq!(
            expand_path("relative/dir/file.txt").unwrap(),
            PathBuf::from("relative/dir/file.txt")
        );
    }
}
