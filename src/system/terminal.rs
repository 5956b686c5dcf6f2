// src/system/terminal.rs

use colored::Colorize;
use dialoguer::{Input, theme::ColorfulTheme};
use std::io;

/// The human at the keyboard, as seen by the confirm loop.
///
/// Implementations return `ErrorKind::Interrupted` when the operator cancels
/// the prompt (e.g. with Ctrl+C).
pub trait Operator: Send + std::fmt::Debug {
    /// Shows the proposed command and returns the raw answer typed by the operator.
    fn choose(&mut self, command: &str) -> io::Result<String>;

    /// Opens an edit dialog seeded with `text` and returns the edited result.
    fn edit(&mut self, text: &str) -> io::Result<String>;
}

/// An [`Operator`] backed by interactive `dialoguer` prompts.
#[derive(Debug, Default)]
pub struct TerminalOperator;

impl Operator for TerminalOperator {
    fn choose(&mut self, command: &str) -> io::Result<String> {
        println!("{} {}", "$".dimmed(), command.green());
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt("[R]epeat, E[x]ecute, E[d]it or [Q]uit?")
            .allow_empty(true)
            .interact_text()
            .map_err(into_io_error)
    }

    fn edit(&mut self, text: &str) -> io::Result<String> {
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt("Edit")
            .with_initial_text(text)
            .allow_empty(true)
            .interact_text()
            .map_err(into_io_error)
    }
}

/// Keeps the underlying I/O error kind so Ctrl+C still reads as `Interrupted`.
fn into_io_error(error: dialoguer::Error) -> io::Error {
    let kind = std::error::Error::source(&error)
        .and_then(|source| source.downcast_ref::<io::Error>())
        .map(io::Error::kind)
        .unwrap_or(io::ErrorKind::Other);
    io::Error::new(kind, error.to_string())
}
