// src/core/filters/text.rs

use super::{FilterError, Invocation};
use crate::core::session::RenderContext;
use lazy_static::lazy_static;
use minijinja::Value;
use regex::Regex;

lazy_static! {
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```(.*?)```").unwrap();
    static ref INLINE_SPAN: Regex = Regex::new(r"(?s)`(.*?)`").unwrap();
    static ref NON_SLUG: Regex = Regex::new(r"\W+").unwrap();
}

/// Extracts code from a model answer.
///
/// The last fenced block wins, minus its opening line (the language tag).
/// Without a fenced block the last inline span is used, and without either the
/// input comes back unchanged.
pub fn extract_code(text: &str) -> String {
    let last_capture = |re: &Regex| re.captures_iter(text).filter_map(|c| c.get(1)).last();

    if let Some(block) = last_capture(&*FENCED_BLOCK) {
        return block.as_str().lines().skip(1).collect::<Vec<_>>().join("\n");
    }
    if let Some(span) = last_capture(&*INLINE_SPAN) {
        return span.as_str().to_string();
    }
    text.to_string()
}

/// Lowercases `text` and collapses every run of non-word characters into one dash.
pub fn to_slug(text: &str) -> String {
    let lowered = text.to_lowercase();
    NON_SLUG.replace_all(&lowered, "-").trim_matches('-').to_string()
}

/// Removes the longest common leading whitespace from every non-blank line.
pub fn remove_common_indent(text: &str) -> String {
    let indent = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.get(..line.len() - line.trim_start().len()).unwrap_or(""))
        .reduce(common_prefix)
        .unwrap_or("");

    let mut result = text
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                ""
            } else {
                line.strip_prefix(indent).unwrap_or_else(|| line.trim_start())
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    if text.ends_with('\n') {
        result.push('\n');
    }
    result
}

fn common_prefix<'a>(a: &'a str, b: &'a str) -> &'a str {
    let len = a
        .char_indices()
        .zip(b.chars())
        .take_while(|((_, x), y)| x == y)
        .last()
        .map_or(0, |((i, x), _)| i + x.len_utf8());
    a.get(..len).unwrap_or("")
}

pub fn code(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    Ok(Value::from(extract_code(&invocation.input_text())))
}

/// Shell-quotes the input so it can be pasted into a command line.
pub fn quote(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    let text = invocation.input_text();
    let quoted = shlex::try_quote(&text)
        .map_err(|e| FilterError::InvalidArgument(format!("cannot quote input: {}", e)))?;
    Ok(Value::from(quoted.into_owned()))
}

/// Parses the input as JSON into a template value.
pub fn json(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    let parsed: serde_json::Value = serde_json::from_str(&invocation.input_text())?;
    Ok(Value::from_serialize(&parsed))
}

pub fn slugify(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    Ok(Value::from(to_slug(&invocation.input_text())))
}

pub fn dedent(_: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    Ok(Value::from(remove_common_indent(&invocation.input_text())))
}
