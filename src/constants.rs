// src/constants.rs

/// The name of the directory holding siesta's configuration and cache (under the user dirs).
pub const APP_DIR: &str = "siesta";

/// The name of the main configuration file (in ~/.config/siesta/).
pub const CONFIG_FILENAME: &str = "config.toml";

/// The name of the response cache file (in ~/.cache/siesta/).
pub const RESPONSE_CACHE_FILENAME: &str = "responses.bin";

/// The name of the directory where named templates live by default.
pub const TEMPLATES_DIRNAME: &str = "templates";

/// The file extension that marks a file as a listable template.
pub const DEFAULT_TEMPLATE_EXTENSION: &str = "siesta";

/// Environment switch that forces fresh completions while still writing through to the cache.
pub const ENV_RECACHE: &str = "SIESTA_RECACHE";

/// Older name of [`ENV_RECACHE`], still honored.
pub const ENV_RECACHE_LEGACY: &str = "SIESTA_CACHE";

/// Environment switch that mirrors streamed completion deltas to stderr.
pub const ENV_VERBOSE: &str = "SIESTA_VERBOSE";

/// Prefix of every placeholder token handed out by the deferred registry.
pub const DEFERRED_TOKEN_PREFIX: &str = "siesta-deferred-";

/// Exit code used for failed subprocesses and every other reported error.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code used when the operator interrupts a confirmation prompt.
pub const EXIT_INTERRUPTED: i32 = 130;
