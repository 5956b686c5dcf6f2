//! # Interactive Confirm Loop
//!
//! A proposed shell command is shown to the operator, who decides what happens
//! next:
//!
//! ```text
//! Proposed --x-----------> Executed
//! Proposed --r / empty---> Repeated
//! Proposed --q-----------> Aborted
//! Proposed --d--> edit --> Proposed
//! any prompt --Ctrl+C----> Interrupted
//! ```
//!
//! Unknown answers count as "repeat".

use crate::system::terminal::Operator;
use std::io;

/// An operator's answer to a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Execute,
    Repeat,
    Edit,
    Quit,
}

impl Choice {
    /// Maps raw input to a choice. Case and surrounding whitespace are ignored.
    pub fn parse(answer: &str) -> Self {
        match answer.trim().to_ascii_lowercase().as_str() {
            "x" => Self::Execute,
            "d" => Self::Edit,
            "q" => Self::Quit,
            _ => Self::Repeat,
        }
    }
}

/// Where the confirm loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Replace the process with this command.
    Execute(String),
    /// Throw away the current render and start over.
    Repeat,
    /// Stop with a success status.
    Quit,
    /// The operator cancelled the prompt.
    Interrupted,
}

/// Runs the loop for `command` until the operator settles on a terminal choice.
///
/// I/O failures other than an interrupt are returned as errors.
pub fn confirm(operator: &mut dyn Operator, command: &str) -> io::Result<Decision> {
    let mut candidate = command.to_string();
    loop {
        let answer = match operator.choose(&candidate) {
            Ok(answer) => answer,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Decision::Interrupted),
            Err(e) => return Err(e),
        };

        match Choice::parse(&answer) {
            Choice::Execute => return Ok(Decision::Execute(candidate)),
            Choice::Repeat => return Ok(Decision::Repeat),
            Choice::Quit => return Ok(Decision::Quit),
            Choice::Edit => match operator.edit(&candidate) {
                Ok(edited) => candidate = edited,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    return Ok(Decision::Interrupted);
                }
                Err(e) => return Err(e),
            },
        }
    }
}
