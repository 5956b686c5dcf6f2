// src/cli/handlers/mod.rs

// One module per top-level mode of the binary.

pub mod list;
pub mod render;
