// src/core/templates.rs

use crate::core::paths::{PathError, expand_path};
use crate::models::RenderConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template '{name}' not found. Searched: {searched}")]
    NotFound { name: String, searched: String },
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("Could not resolve template path '{path}': {source}")]
    Canonicalize {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A template found in one of the configured directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateEntry {
    /// Path relative to its template directory, without the extension.
    pub name: String,
    pub path: PathBuf,
}

/// The configured template directories, expanded. Missing directories are kept;
/// callers skip them.
pub fn template_dirs(config: &RenderConfig) -> Result<Vec<PathBuf>, PathError> {
    config.template_dirs.iter().map(|dir| expand_path(dir)).collect()
}

/// Finds the template file for `name_or_path`.
///
/// An existing file path wins. Otherwise each template directory is tried in
/// order, first as `<dir>/<name>` and then as `<dir>/<name>.<extension>`.
pub fn resolve_template(
    name_or_path: &str,
    config: &RenderConfig,
) -> Result<PathBuf, TemplateError> {
    let direct = expand_path(name_or_path)?;
    if direct.is_file() {
        return canonical(&direct);
    }

    let dirs = template_dirs(config)?;
    let with_extension = format!("{}.{}", name_or_path, config.template_extension);
    for dir in &dirs {
        for candidate in [dir.join(name_or_path), dir.join(&with_extension)] {
            log::trace!("Trying template candidate '{}'", candidate.display());
            if candidate.is_file() {
                return canonical(&candidate);
            }
        }
    }

    Err(TemplateError::NotFound {
        name: name_or_path.to_string(),
        searched: dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Lists every file with the configured extension under the template directories.
///
/// Entries are sorted by name. When two directories provide the same name, the
/// first directory wins, matching [`resolve_template`].
pub fn list_templates(config: &RenderConfig) -> Result<Vec<TemplateEntry>, TemplateError> {
    let mut entries: Vec<TemplateEntry> = Vec::new();
    for dir in template_dirs(config)? {
        if !dir.is_dir() {
            log::debug!("Skipping missing template directory '{}'", dir.display());
            continue;
        }
        for entry in WalkDir::new(&dir).follow_links(true).into_iter().filter_map(Result::ok) {
            let path = entry.path();
            if !entry.file_type().is_file() || !has_extension(path, &config.template_extension) {
                continue;
            }
            let Some(name) = template_name(&dir, path) else {
                continue;
            };
            if entries.iter().all(|known| known.name != name) {
                entries.push(TemplateEntry {
                    name,
                    path: path.to_path_buf(),
                });
            }
        }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

fn template_name(dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(dir).ok()?.with_extension("");
    Some(
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

fn canonical(path: &Path) -> Result<PathBuf, TemplateError> {
    dunce::canonicalize(path).map_err(|e| TemplateError::Canonicalize {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn config_with(dirs: &[&TempDir]) -> RenderConfig {
        RenderConfig {
            template_dirs: dirs.iter().map(|d| d.path().display().to_string()).collect(),
            ..RenderConfig::default()
        }
    }

    #[test]
    fn test_direct_path_wins() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("standalone.txt");
        fs::write(&file, "x").unwrap();

        let resolved = resolve_template(&file.display().to_string(), &config_with(&[])).unwrap();
        assert_eq!(resolved, dunce::canonicalize(&file).unwrap());
    }

    #[test]
    fn test_name_resolves_with_extension_in_dir_order() {
        // --- Setup ---
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        fs::write(second.path().join("commit.siesta"), "second").unwrap();
        fs::write(first.path().join("commit.siesta"), "first").unwrap();
        let config = config_with(&[&first, &second]);

        // --- Execute ---
        let resolved = resolve_template("commit", &config).unwrap();

        // --- Assert ---
        assert_eq!(fs::read_to_string(resolved).unwrap(), "first");
    }

    #[test]
    fn test_missing_template_lists_searched_dirs() {
        let dir = tempdir().unwrap();
        let err = resolve_template("nope-not-here", &config_with(&[&dir])).unwrap_err();
        match err {
            TemplateError::NotFound { name, searched } => {
                assert_eq!(name, "nope-not-here");
                assert!(searched.contains(&dir.path().display().to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_list_filters_by_extension_and_nests() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("git")).unwrap();
        fs::write(dir.path().join("review.siesta"), "").unwrap();
        fs::write(dir.path().join("git/commit.siesta"), "").unwrap();
        fs::write(dir.path().join("notes.md"), "").unwrap();

        // --- Execute ---
        let names: Vec<String> = list_templates(&config_with(&[&dir]))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();

        // --- Assert ---
        assert_eq!(names, vec!["git/commit", "review"]);
    }
}
