//! # Filter/Function Library
//!
//! Every operation a template can call lives in [`CAPABILITIES`], a static
//! table mapping a name to a handler with one uniform signature:
//! `(render context, invocation) -> value`. [`register_all`] installs the
//! table into a `minijinja` environment before rendering starts.
//!
//! Unless an entry is marked `defers`, placeholder tokens are resolved in its
//! string arguments before the handler runs and in its string result
//! afterwards, so handlers only ever see finished text.
//!
//! ## Modules
//!
//! - **`files`**: `read`, `write`, `append`, `catfiles`.
//! - **`functions`**: imperative helpers (`print`, `fail`, `cd`, `load_config`, `eval`, `debug`).
//! - **`prompt`**: the cache-aware, deferred `prompt` filter and its blocking twin.
//! - **`shell`**: `run` plus the interactive `askrun` / `askedit`.
//! - **`text`**: pure string utilities (`code`, `slugify`, `dedent`, `quote`, `json`).

pub mod files;
pub mod functions;
pub mod prompt;
pub mod shell;
pub mod text;

use crate::{
    core::{
        cache::CacheError, paths::PathError, registry::RegistryError, session::RenderContext,
    },
    system::{completion::CompletionError, executor::ExecutionError},
};
use minijinja::{
    Environment, ErrorKind, Value,
    value::{Kwargs, Rest},
};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;

/// A terminal control-flow request raised from inside a render.
///
/// Halts travel as errors so they unwind the template engine, and are turned
/// back into outcomes by the render session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    #[error("render stopped by the operator")]
    Quit,
    #[error("interrupted by the operator")]
    Interrupted,
    #[error("render restart requested")]
    Repeat,
    #[error("process replacement with '{0}' requested")]
    Execute(String),
    #[error("debug stop")]
    Debug,
}

#[derive(Error, Debug)]
pub enum FilterError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("Could not {action} '{path}': {source}")]
    FileIo {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error("Response cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("Expression error: {0}")]
    Expression(#[from] minijinja::Error),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("`eval` is disabled. Set `allow_eval = true` under [render] in config.toml to enable it.")]
    EvalDisabled,
    #[error("{0}")]
    Failed(String),
    #[error("Terminal error: {0}")]
    Terminal(std::io::Error),
    #[error(transparent)]
    Halt(#[from] Halt),
}

impl FilterError {
    pub(crate) fn file(action: &'static str, path: &str, source: std::io::Error) -> Self {
        Self::FileIo {
            action,
            path: path.to_string(),
            source,
        }
    }
}

/// Whether an entry is applied with pipe syntax or called by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Filter,
    Function,
}

/// The arguments of one call, normalized across filters and functions.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// The piped value for filters; undefined for functions.
    pub input: Value,
    /// Positional arguments after the piped value.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub options: BTreeMap<String, Value>,
}

impl Invocation {
    /// The piped value as text.
    pub fn input_text(&self) -> String {
        text_of(&self.input)
    }

    /// A positional argument, falling back to the keyword of the same meaning.
    pub fn arg_or_option(&self, index: usize, name: &str) -> Option<&Value> {
        self.args
            .get(index)
            .or_else(|| self.options.get(name))
            .filter(|v| !v.is_undefined() && !v.is_none())
    }

    /// A required text argument.
    pub fn required_text(&self, index: usize, name: &str) -> Result<String, FilterError> {
        self.arg_or_option(index, name)
            .map(text_of)
            .ok_or_else(|| FilterError::InvalidArgument(format!("missing argument `{}`", name)))
    }

    /// A boolean given positionally or by keyword; any truthy value turns it on.
    pub fn flag(&self, index: usize, name: &str, default: bool) -> bool {
        self.arg_or_option(index, name).map_or(default, Value::is_true)
    }
}

type Handler = fn(&RenderContext, Invocation) -> Result<Value, FilterError>;

/// One entry of the capability table.
#[derive(Debug)]
pub struct FilterDefinition {
    pub name: &'static str,
    pub kind: Kind,
    /// Deferred entries return placeholder tokens and must not have their output resolved.
    pub defers: bool,
    pub handler: Handler,
}

/// The single source of truth for everything templates can call.
pub static CAPABILITIES: &[FilterDefinition] = &[
    // --- Shell ---
    FilterDefinition {
        name: "run",
        kind: Kind::Filter,
        defers: false,
        handler: shell::run,
    },
    FilterDefinition {
        name: "askrun",
        kind: Kind::Filter,
        defers: false,
        handler: shell::askrun,
    },
    FilterDefinition {
        name: "askedit",
        kind: Kind::Filter,
        defers: false,
        handler: shell::askedit,
    },
    // --- Completions ---
    FilterDefinition {
        name: "prompt",
        kind: Kind::Filter,
        defers: true,
        handler: prompt::prompt,
    },
    FilterDefinition {
        name: "prompt_sync",
        kind: Kind::Filter,
        defers: false,
        handler: prompt::prompt_sync,
    },
    // --- Files ---
    FilterDefinition {
        name: "read",
        kind: Kind::Filter,
        defers: false,
        handler: files::read,
    },
    FilterDefinition {
        name: "write",
        kind: Kind::Filter,
        defers: false,
        handler: files::write,
    },
    FilterDefinition {
        name: "append",
        kind: Kind::Filter,
        defers: false,
        handler: files::append,
    },
    FilterDefinition {
        name: "catfiles",
        kind: Kind::Filter,
        defers: false,
        handler: files::catfiles,
    },
    // --- Text ---
    FilterDefinition {
        name: "code",
        kind: Kind::Filter,
        defers: false,
        handler: text::code,
    },
    FilterDefinition {
        name: "quote",
        kind: Kind::Filter,
        defers: false,
        handler: text::quote,
    },
    FilterDefinition {
        name: "escape",
        kind: Kind::Filter,
        defers: false,
        handler: text::quote,
    },
    FilterDefinition {
        name: "json",
        kind: Kind::Filter,
        defers: false,
        handler: text::json,
    },
    FilterDefinition {
        name: "slugify",
        kind: Kind::Filter,
        defers: false,
        handler: text::slugify,
    },
    FilterDefinition {
        name: "dedent",
        kind: Kind::Filter,
        defers: false,
        handler: text::dedent,
    },
    FilterDefinition {
        name: "print",
        kind: Kind::Filter,
        defers: false,
        handler: functions::print_filter,
    },
    FilterDefinition {
        name: "debug",
        kind: Kind::Filter,
        defers: false,
        handler: functions::debug,
    },
    // --- Functions ---
    FilterDefinition {
        name: "print",
        kind: Kind::Function,
        defers: false,
        handler: functions::print,
    },
    FilterDefinition {
        name: "fail",
        kind: Kind::Function,
        defers: false,
        handler: functions::fail,
    },
    FilterDefinition {
        name: "cd",
        kind: Kind::Function,
        defers: false,
        handler: functions::cd,
    },
    FilterDefinition {
        name: "load_config",
        kind: Kind::Function,
        defers: false,
        handler: functions::load_config,
    },
    FilterDefinition {
        name: "eval",
        kind: Kind::Function,
        defers: false,
        handler: functions::eval,
    },
];

/// Finds a table entry by name and kind.
pub fn find(name: &str, kind: Kind) -> Option<&'static FilterDefinition> {
    CAPABILITIES
        .iter()
        .find(|def| def.name == name && def.kind == kind)
}

/// Installs every entry of [`CAPABILITIES`] into `env`.
pub fn register_all(env: &mut Environment<'static>, context: &Arc<RenderContext>) {
    for def in CAPABILITIES {
        let context = Arc::clone(context);
        match def.kind {
            Kind::Filter => env.add_filter(def.name, move |args: Rest<Value>, kwargs: Kwargs| {
                dispatch(&context, def, args.0, kwargs)
            }),
            Kind::Function => env.add_function(def.name, move |args: Rest<Value>, kwargs: Kwargs| {
                dispatch(&context, def, args.0, kwargs)
            }),
        }
    }
    log::trace!("Registered {} filters and functions", CAPABILITIES.len());
}

/// Normalizes the raw call, resolves tokens around the handler and converts errors.
fn dispatch(
    context: &RenderContext,
    def: &FilterDefinition,
    mut positional: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, minijinja::Error> {
    let mut options = BTreeMap::new();
    for key in kwargs.args() {
        let value: Value = kwargs.get(key)?;
        options.insert(key.to_string(), value);
    }

    let input = match def.kind {
        Kind::Filter if !positional.is_empty() => positional.remove(0),
        _ => Value::UNDEFINED,
    };
    let invocation = Invocation {
        input,
        args: positional,
        options,
    };

    apply(context, def, invocation).map_err(|err| {
        log::debug!("Filter '{}' failed: {}", def.name, err);
        minijinja::Error::new(ErrorKind::InvalidOperation, err.to_string()).with_source(err)
    })
}

fn apply(
    context: &RenderContext,
    def: &FilterDefinition,
    mut invocation: Invocation,
) -> Result<Value, FilterError> {
    resolve_arguments(context, &mut invocation)?;
    let value = (def.handler)(context, invocation)?;
    if def.defers {
        return Ok(value);
    }
    resolve_value(context, value)
}

fn resolve_arguments(
    context: &RenderContext,
    invocation: &mut Invocation,
) -> Result<(), FilterError> {
    invocation.input = resolve_value(context, std::mem::take(&mut invocation.input))?;
    for arg in invocation.args.iter_mut() {
        *arg = resolve_value(context, std::mem::take(arg))?;
    }
    for value in invocation.options.values_mut() {
        *value = resolve_value(context, std::mem::take(value))?;
    }
    Ok(())
}

/// Resolves placeholder tokens inside a string value. Other values pass through.
fn resolve_value(context: &RenderContext, value: Value) -> Result<Value, FilterError> {
    match value.as_str() {
        Some(text) => Ok(Value::from(context.registry.resolve(text)?)),
        None => Ok(value),
    }
}

/// Renders a value as plain text. Undefined and none become the empty string.
pub fn text_of(value: &Value) -> String {
    if value.is_undefined() || value.is_none() {
        return String::new();
    }
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}
