//! # Render Session
//!
//! One [`Session`] renders one template. It owns the `minijinja` environment
//! with every filter registered, and shares a [`RenderContext`] with those
//! filters: the settings, the response cache, the deferred registry, the
//! completion client and the operator used by interactive filters.
//!
//! A render runs in passes. A pass that finishes normally has its remaining
//! placeholder tokens resolved and its output post-processed. A pass stopped
//! by a [`Halt`] is mapped to an [`Outcome`], except `Repeat`, which discards
//! the partial output and starts a fresh pass against the same context.
//!
//! [`Session::close`] must run before the process exits: it waits for every
//! deferred operation and then persists this run's cache writes.

use crate::{
    core::{
        cache::{CacheError, Fingerprint, ResponseCache},
        config_loader::Settings,
        filters::{self, FilterError, Halt},
        registry::{DeferredRegistry, RegistryError},
    },
    constants::EXIT_INTERRUPTED,
    models::Outcome,
    system::{completion::CompletionClient, terminal::Operator},
};
use minijinja::{AutoEscape, Environment, context};
use std::{
    collections::HashMap,
    error::Error as StdError,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Template path '{0}' does not name a file.")]
    InvalidTemplatePath(String),
    /// Carries the engine's message and template location. The filter error it
    /// wraps is already part of that message, so it is not exposed as a source.
    #[error("{0}")]
    Render(minijinja::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<minijinja::Error> for SessionError {
    fn from(err: minijinja::Error) -> Self {
        Self::Render(err)
    }
}

/// State shared by the session and every filter invocation.
#[derive(Debug)]
pub struct RenderContext {
    pub settings: Settings,
    pub cache: Arc<ResponseCache>,
    pub registry: DeferredRegistry,
    pub client: CompletionClient,
    operator: Mutex<Box<dyn Operator>>,
    /// Fingerprints of completions started but not yet cached, and their tokens.
    inflight: Mutex<HashMap<Fingerprint, String>>,
}

impl RenderContext {
    pub fn new(
        settings: Settings,
        cache: ResponseCache,
        client: CompletionClient,
        operator: Box<dyn Operator>,
    ) -> Result<Self, RegistryError> {
        let registry = DeferredRegistry::new(settings.config.completion.max_concurrency)?;
        cache.set_bypass(settings.bypass_cache());
        Ok(Self {
            settings,
            cache: Arc::new(cache),
            registry,
            client,
            operator: Mutex::new(operator),
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Gives `action` exclusive use of the operator.
    pub fn with_operator<R>(&self, action: impl FnOnce(&mut dyn Operator) -> R) -> R {
        let mut operator = self
            .operator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        action(operator.as_mut())
    }

    pub(crate) fn inflight(&self) -> MutexGuard<'_, HashMap<Fingerprint, String>> {
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Waits for all deferred work, then persists the cache writes of this run.
    ///
    /// Failures of operations no template text referenced are logged only.
    pub fn close(&self) -> Result<(), SessionError> {
        let drained = self.registry.drain(false)?;
        log::debug!("Closing session after draining {} operations", drained);
        self.cache.flush()?;
        Ok(())
    }
}

/// How one render pass ended.
enum Pass {
    Finished(String),
    Halted(Halt),
}

/// Renders one template file with the full filter library.
#[derive(Debug)]
pub struct Session {
    env: Environment<'static>,
    context: Arc<RenderContext>,
    template_name: String,
    argv: Vec<String>,
    input: String,
}

impl Session {
    /// Prepares `template_path` for rendering.
    ///
    /// `argv` is the full argument vector: program name, template, then the
    /// extra arguments. The extras joined by spaces become `input`. Templates
    /// in the same directory can be included by name.
    pub fn new(
        template_path: &Path,
        argv: Vec<String>,
        context: RenderContext,
    ) -> Result<Self, SessionError> {
        let invalid = || SessionError::InvalidTemplatePath(template_path.display().to_string());
        let template_name = template_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(invalid)?
            .to_string();
        let dir = template_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let context = Arc::new(context);
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(dir));
        env.set_lstrip_blocks(true);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        filters::register_all(&mut env, &context);

        let input = argv.iter().skip(2).cloned().collect::<Vec<_>>().join(" ");
        log::debug!("Prepared session for '{}' with input {:?}", template_name, input);
        Ok(Self {
            env,
            context,
            template_name,
            argv,
            input,
        })
    }

    pub fn context(&self) -> &Arc<RenderContext> {
        &self.context
    }

    /// Renders until a pass finishes or halts with something other than `Repeat`.
    pub fn render(&self) -> Result<Outcome, SessionError> {
        let mut pass_number = 1;
        loop {
            log::debug!("Render pass {} of '{}'", pass_number, self.template_name);
            match self.render_pass()? {
                Pass::Finished(text) => return Ok(Outcome::Rendered(text)),
                Pass::Halted(Halt::Repeat) => pass_number += 1,
                Pass::Halted(halt) => return Ok(self.outcome_of(halt)),
            }
        }
    }

    fn render_pass(&self) -> Result<Pass, SessionError> {
        let template = self.env.get_template(&self.template_name)?;
        let vars = context! { argv => &self.argv, input => &self.input };
        let rendered = match template.render(vars) {
            Ok(rendered) => rendered,
            Err(err) => {
                return match find_halt(&err) {
                    Some(halt) => Ok(Pass::Halted(halt)),
                    None => Err(err.into()),
                };
            }
        };

        let resolved = self.context.registry.resolve(&rendered)?;
        Ok(Pass::Finished(finish_output(&resolved)))
    }

    fn outcome_of(&self, halt: Halt) -> Outcome {
        log::debug!("Render halted: {}", halt);
        match halt {
            Halt::Quit | Halt::Debug | Halt::Repeat => Outcome::Exit(0),
            Halt::Interrupted => Outcome::Exit(EXIT_INTERRUPTED),
            Halt::Execute(command) => Outcome::Execute {
                shell: self.context.settings.config.render.interactive_shell.clone(),
                command,
            },
        }
    }

    /// See [`RenderContext::close`].
    pub fn close(&self) -> Result<(), SessionError> {
        self.context.close()
    }
}

/// Looks for a halt request anywhere in the error's source chain.
fn find_halt(err: &minijinja::Error) -> Option<Halt> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(error) = current {
        if let Some(FilterError::Halt(halt)) = error.downcast_ref::<FilterError>() {
            return Some(halt.clone());
        }
        current = error.source();
    }
    None
}

/// Drops a leading shebang line and trims surrounding newlines.
pub fn finish_output(text: &str) -> String {
    let body = match text.strip_prefix("#!") {
        Some(rest) => rest.split_once('\n').map_or("", |(_, body)| body),
        None => text,
    };
    body.trim_matches(|c| c == '\n' || c == '\r').to_string()
}
