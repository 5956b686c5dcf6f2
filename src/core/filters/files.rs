// src/core/filters/files.rs

use super::{FilterError, Invocation};
use crate::core::session::RenderContext;
use lazy_static::lazy_static;
use minijinja::Value;
use rayon::prelude::*;
use regex::Regex;
use std::{fs, io::Write, path::Path};

lazy_static! {
    // Anything shaped like `dir/file` is a candidate. Absolute paths lose their
    // leading slash and single-segment names never match.
    static ref PATH_CANDIDATE: Regex = Regex::new(r"(\w+/[\w/\.]+)").unwrap();
}

const BINARY_PLACEHOLDER: &str = "<binary file omitted>";

/// `path | read`
pub fn read(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    let path = invocation.input_text();
    let content = fs::read_to_string(&path).map_err(|e| FilterError::file("read", &path, e))?;
    Ok(Value::from(content))
}

/// `content | write(path)`
///
/// Creates missing parent directories and stores the content with exactly one
/// trailing newline.
pub fn write(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    let path = invocation.required_text(0, "path")?;
    let mut content = invocation.input_text().trim_end_matches('\n').to_string();
    content.push('\n');

    if let Some(parent) = Path::new(&path).parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| FilterError::file("create the parent of", &path, e))?;
    }
    fs::write(&path, content).map_err(|e| FilterError::file("write", &path, e))?;
    log::debug!("Wrote '{}'", path);
    Ok(Value::from(""))
}

/// `content | append(path)`
pub fn append(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    let path = invocation.required_text(0, "path")?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| FilterError::file("open", &path, e))?;
    file.write_all(invocation.input_text().as_bytes())
        .map_err(|e| FilterError::file("append to", &path, e))?;
    Ok(Value::from(""))
}

/// `text | catfiles`
pub fn catfiles(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    Ok(Value::from(concatenate_files(&invocation.input_text())))
}

/// Every path-looking substring of `text`, repeats included, in order of appearance.
pub fn path_candidates(text: &str) -> Vec<String> {
    PATH_CANDIDATE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Reads every candidate that names a regular file, in parallel, and joins the
/// sections in the order the paths appeared.
pub fn concatenate_files(text: &str) -> String {
    concatenate_files_in(Path::new("."), text)
}

/// Like [`concatenate_files`], resolving relative candidates against `base`.
pub fn concatenate_files_in(base: &Path, text: &str) -> String {
    let candidates = path_candidates(text);
    log::trace!("catfiles candidates: {:?}", candidates);
    candidates
        .par_iter()
        .map(|path| file_section(base, path))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

fn file_section(base: &Path, path: &str) -> Option<String> {
    let full = base.join(path);
    if !full.is_file() {
        return None;
    }
    let body = match fs::read(&full) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| BINARY_PLACEHOLDER.to_string()),
        Err(e) => {
            log::warn!("Skipping unreadable file '{}': {}", path, e);
            return None;
        }
    };
    Some(format!("=== file: {} ===\n{}\n======\n", path, body))
}
