// src/core/mod.rs

pub mod cache;
pub mod config_loader;
pub mod confirm;
pub mod filters;
pub mod paths;
pub mod registry;
pub mod session;
pub mod templates;
