//! # Deferred Value Registry
//!
//! Template rendering is synchronous, but completions are slow and independent
//! of each other. A deferring filter hands its work to [`DeferredRegistry::register`],
//! gets back an opaque placeholder token, and lets the render carry on. Whenever
//! text leaves a filter (and once more when the render finishes) the registry
//! swaps every token it finds for the finished result, blocking only on the
//! operations that text actually references.
//!
//! The registry owns the worker runtime the operations run on. [`DeferredRegistry::drain`]
//! joins everything still in flight, so no work outlives the run.

use crate::{constants::DEFERRED_TOKEN_PREFIX, system::completion::CompletionError};
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
};
use thiserror::Error;
use tokio::{
    runtime::{Builder, Runtime},
    sync::Semaphore,
    task::JoinHandle,
};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to start the worker runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("Deferred operation {token} failed: {source}")]
    Operation {
        token: String,
        #[source]
        source: CompletionError,
    },
}

type PendingResult = Result<String, CompletionError>;

/// The lifecycle of one pending operation.
#[derive(Debug)]
enum Slot {
    /// Still running (or finished but never joined).
    Running(JoinHandle<PendingResult>),
    /// Joined successfully. Kept so later strings carrying the token resolve identically.
    Resolved(String),
}

/// Issues placeholder tokens for asynchronous work and splices results back into text.
#[derive(Debug)]
pub struct DeferredRegistry {
    runtime: Runtime,
    permits: Arc<Semaphore>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl DeferredRegistry {
    /// Creates a registry whose pool runs at most `max_concurrency` operations at once.
    pub fn new(max_concurrency: usize) -> Result<Self, RegistryError> {
        let limit = max_concurrency.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(limit.min(4))
            .thread_name("siesta-deferred")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            permits: Arc::new(Semaphore::new(limit)),
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Starts `work` on the pool and returns the token standing in for its result.
    ///
    /// This never blocks the caller.
    pub fn register<F>(&self, work: F) -> String
    where
        F: Future<Output = PendingResult> + Send + 'static,
    {
        let token = format!("{}{}", DEFERRED_TOKEN_PREFIX, Uuid::new_v4().simple());
        let permits = Arc::clone(&self.permits);
        let handle = self.runtime.spawn(async move {
            // The semaphore is never closed, so a failed acquire cannot happen; run
            // unthrottled if it does.
            let _permit = permits.acquire_owned().await.ok();
            work.await
        });
        log::debug!("Registered deferred operation {}", token);
        self.lock().insert(token.clone(), Slot::Running(handle));
        token
    }

    /// Whether `token` still stands for a running or successfully finished operation.
    pub fn is_live(&self, token: &str) -> bool {
        self.lock().contains_key(token)
    }

    /// Replaces every registered token found in `text` with its operation's result.
    ///
    /// Blocks until each referenced operation finishes. Text with no tokens is
    /// returned unchanged, which makes the call idempotent. Surrounding text and
    /// its ordering are never touched.
    pub fn resolve(&self, text: &str) -> Result<String, RegistryError> {
        if !text.contains(DEFERRED_TOKEN_PREFIX) {
            return Ok(text.to_string());
        }

        let mut slots = self.lock();
        let referenced: Vec<String> = slots
            .keys()
            .filter(|token| text.contains(token.as_str()))
            .cloned()
            .collect();

        let mut resolved = text.to_string();
        for token in referenced {
            let result = self.settle(&mut slots, &token)?;
            log::trace!("Resolved deferred operation {}", token);
            resolved = resolved.replace(&token, &result);
        }
        Ok(resolved)
    }

    /// Waits for every operation still in flight.
    ///
    /// Results stay available to later `resolve` calls. Failures of operations
    /// nobody referenced are logged rather than returned; the first failure is
    /// returned only when `strict` is set.
    pub fn drain(&self, strict: bool) -> Result<usize, RegistryError> {
        let mut slots = self.lock();
        let running: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Running(_)))
            .map(|(token, _)| token.clone())
            .collect();

        let mut first_error = None;
        for token in &running {
            if let Err(e) = self.settle(&mut slots, token) {
                log::warn!("Unreferenced deferred operation failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        log::debug!("Drained {} deferred operations", running.len());

        match first_error {
            Some(e) if strict => Err(e),
            _ => Ok(running.len()),
        }
    }

    /// The number of operations that have not been joined yet.
    pub fn pending_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Running(_)))
            .count()
    }

    /// Joins the operation behind `token` if needed and returns its result.
    ///
    /// A failed operation is removed, so its token is no longer recognized.
    fn settle(
        &self,
        slots: &mut HashMap<String, Slot>,
        token: &str,
    ) -> Result<String, RegistryError> {
        let handle = match slots.remove(token) {
            Some(Slot::Resolved(text)) => {
                slots.insert(token.to_string(), Slot::Resolved(text.clone()));
                return Ok(text);
            }
            Some(Slot::Running(handle)) => handle,
            None => return Ok(token.to_string()),
        };

        let outcome = self
            .runtime
            .block_on(handle)
            .map_err(|e| CompletionError::TaskFailed(e.to_string()))
            .and_then(|result| result);

        match outcome {
            Ok(text) => {
                slots.insert(token.to_string(), Slot::Resolved(text.clone()));
                Ok(text)
            }
            Err(source) => Err(RegistryError::Operation {
                token: token.to_string(),
                source,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
