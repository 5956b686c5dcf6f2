//! # System Interaction Layer
//!
//! Abstractions over the world outside the process: child processes, the
//! completion service and the human at the terminal.
//!
//! ## Modules
//!
//! - **`completion`**: The transport-agnostic completion client. It consumes a
//!   stream of text deltas and assembles the final response.
//! - **`executor`**: Spawns shell commands with piped stdin and captured stdout,
//!   and replaces the process image when a confirmed command is executed.
//! - **`openai`**: The HTTP transport for OpenAI-compatible `/chat/completions`
//!   endpoints, including the server-sent-events decoder.
//! - **`terminal`**: The `Operator` seam used by the interactive filters, with a
//!   `dialoguer`-backed implementation.

pub mod completion;
pub mod executor;
pub mod openai;
pub mod terminal;
