//! # siesta
//!
//! Renders text templates whose filters run shell commands, ask LLMs for
//! completions and read or write files, then prints the result.
//!
//! Slow completions do not stall the render: the `prompt` filter hands back a
//! placeholder token at once and the real text is spliced in when the output
//! needs it (see [`core::registry`]).

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;
