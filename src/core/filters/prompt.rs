//! Cache-aware completion filters.
//!
//! `prompt` never blocks the render: a cache hit returns the stored text, a miss
//! starts the completion on the deferred registry and returns its token. Within
//! one run, identical requests share a single in-flight completion.

use super::{FilterError, Invocation, text_of};
use crate::{
    core::{cache::Fingerprint, session::RenderContext},
    models::{CompletionRequest, Options},
};
use minijinja::Value;
use std::sync::Arc;

/// What a lookup found for a request.
enum Lookup {
    Cached(String),
    Pending(String),
}

/// `input | prompt(model, **options)`
pub fn prompt(context: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    match lookup_or_start(context, invocation)? {
        Lookup::Cached(text) | Lookup::Pending(text) => Ok(Value::from(text)),
    }
}

/// `input | prompt_sync(model, **options)`
pub fn prompt_sync(context: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    match lookup_or_start(context, invocation)? {
        Lookup::Cached(text) => Ok(Value::from(text)),
        Lookup::Pending(token) => Ok(Value::from(context.registry.resolve(&token)?)),
    }
}

/// Arguments arrive with their tokens already resolved, so the fingerprint only
/// ever sees final text.
fn build_request(invocation: Invocation) -> Result<CompletionRequest, FilterError> {
    let prompt = invocation.input_text();
    let mut options = invocation.options;
    let model = match invocation.args.first() {
        Some(model) => text_of(model),
        None => options.remove("model").map(|m| text_of(&m)).ok_or_else(|| {
            FilterError::InvalidArgument("`prompt` needs a model, e.g. prompt(\"gpt-4o\")".into())
        })?,
    };

    let mut converted = Options::new();
    for (key, value) in options {
        converted.insert(key, serde_json::to_value(&value)?);
    }
    Ok(CompletionRequest::new(model, prompt).with_options(converted))
}

fn lookup_or_start(context: &RenderContext, invocation: Invocation) -> Result<Lookup, FilterError> {
    let request = build_request(invocation)?;
    let key = Fingerprint::of(&request.model, &request.prompt, &request.options)?;

    // The switch is read each time a prompt runs, so a template can flip it mid-render.
    context.cache.set_bypass(context.settings.bypass_cache());
    if let Some(text) = context.cache.get(&key) {
        log::debug!("Response cache hit for {}", key);
        return Ok(Lookup::Cached(text));
    }

    let mut inflight = context.inflight();
    if let Some(token) = inflight.get(&key).filter(|t| context.registry.is_live(t)) {
        log::debug!("Sharing in-flight completion {} for {}", token, key);
        return Ok(Lookup::Pending(token.clone()));
    }

    let client = context.client.clone();
    let cache = Arc::clone(&context.cache);
    let mirror = context.settings.mirror_stream();
    let write_key = key.clone();
    let token = context.registry.register(async move {
        let text = client.complete(request, mirror).await?;
        cache.put(&write_key, &text);
        Ok(text)
    });
    inflight.insert(key, token.clone());
    Ok(Lookup::Pending(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::{DEFERRED_TOKEN_PREFIX, ENV_RECACHE},
        core::{
            confirm::tests::ScriptedOperator,
            filters::tests::{context_with_transport, invoke},
        },
        system::completion::tests::ScriptedTransport,
    };

    #[test]
    fn test_prompt_returns_a_token_then_caches() {
        // --- Setup ---
        let (context, transport) =
            context_with_transport(ScriptedOperator::default(), ScriptedTransport::echoing(), &[]);

        // --- Execute ---
        let first = invoke(&context, "prompt", "hello", &["m"], &[]).unwrap();
        let token = first.as_str().unwrap().to_string();
        let resolved = context.registry.resolve(&token).unwrap();
        let second = invoke(&context, "prompt", "hello", &["m"], &[]).unwrap();

        // --- Assert ---
        assert!(token.starts_with(DEFERRED_TOKEN_PREFIX));
        assert_eq!(resolved, "re: hello");
        assert_eq!(second.as_str(), Some("re: hello"));
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn test_identical_pending_prompts_share_one_call() {
        let (context, transport) =
            context_with_transport(ScriptedOperator::default(), ScriptedTransport::echoing(), &[]);

        let a = invoke(&context, "prompt", "same", &["m"], &[]).unwrap();
        let b = invoke(&context, "prompt", "same", &["m"], &[]).unwrap();
        let text = context
            .registry
            .resolve(&format!("{}|{}", a.as_str().unwrap(), b.as_str().unwrap()))
            .unwrap();

        assert_eq!(text, "re: same|re: same");
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn test_options_change_the_request() {
        let (context, transport) =
            context_with_transport(ScriptedOperator::default(), ScriptedTransport::echoing(), &[]);

        invoke(&context, "prompt_sync", "q", &["m"], &[("temperature", Value::from(0.2))]).unwrap();
        invoke(&context, "prompt_sync", "q", &["m"], &[("temperature", Value::from(0.9))]).unwrap();
        let keyword_model = [("model", Value::from("m")), ("temperature", Value::from(0.9))];
        invoke(&context, "prompt_sync", "q", &[], &keyword_model).unwrap();

        assert_eq!(transport.call_count(), 2);
    }

    #[test]
    fn test_prompt_sync_blocks_for_text() {
        let (context, _) = context_with_transport(
            ScriptedOperator::default(),
            ScriptedTransport::replying("done"),
            &[],
        );
        let value = invoke(&context, "prompt_sync", "q", &["m"], &[]).unwrap();
        assert_eq!(value.as_str(), Some("done"));
    }

    #[test]
    fn test_recache_skips_reads_but_writes_through() {
        // --- Setup ---
        let (context, transport) = context_with_transport(
            ScriptedOperator::default(),
            ScriptedTransport::echoing(),
            &[(ENV_RECACHE, "yes")],
        );
        let key = Fingerprint::of("m", "q", &Options::new()).unwrap();
        context.cache.put(&key, "stale");

        // --- Execute ---
        let value = invoke(&context, "prompt_sync", "q", &["m"], &[]).unwrap();

        // --- Assert ---
        assert_eq!(value.as_str(), Some("re: q"));
        assert_eq!(transport.call_count(), 1);
        context.cache.set_bypass(false);
        assert_eq!(context.cache.get(&key).as_deref(), Some("re: q"));
    }

    #[test]
    fn test_prompt_input_tokens_are_resolved_first() {
        let (context, _) =
            context_with_transport(ScriptedOperator::default(), ScriptedTransport::echoing(), &[]);
        let inner = invoke(&context, "prompt", "inner", &["m"], &[]).unwrap();

        let outer = invoke(&context, "prompt_sync", inner.as_str().unwrap(), &["m"], &[]).unwrap();

        assert_eq!(outer.as_str(), Some("re: re: inner"));
    }

    #[test]
    fn test_option_tokens_are_resolved_before_fingerprinting() {
        // --- Setup ---
        let (context, transport) =
            context_with_transport(ScriptedOperator::default(), ScriptedTransport::echoing(), &[]);
        let system = invoke(&context, "prompt", "x", &["m"], &[]).unwrap();

        // --- Execute ---
        let token = invoke(&context, "prompt", "q", &["m"], &[("system", system)]).unwrap();
        let text = context.registry.resolve(token.as_str().unwrap()).unwrap();

        // --- Assert ---
        let mut options = Options::new();
        options.insert("system".into(), serde_json::json!("re: x"));
        let key = Fingerprint::of("m", "q", &options).unwrap();
        assert_eq!(text, "re: q");
        assert_eq!(context.cache.get(&key).as_deref(), Some("re: q"));
        assert_eq!(transport.call_count(), 2);
    }

    #[test]
    fn test_missing_model_is_rejected() {
        let (context, _) =
            context_with_transport(ScriptedOperator::default(), ScriptedTransport::echoing(), &[]);
        let err = invoke(&context, "prompt", "q", &[], &[]).unwrap_err();
        assert!(matches!(err, FilterError::InvalidArgument(_)));
    }

    #[test]
    fn test_transport_failure_surfaces_on_resolve() {
        let (context, _) =
            context_with_transport(ScriptedOperator::default(), ScriptedTransport::failing(), &[]);
        let token = invoke(&context, "prompt", "q", &["m"], &[]).unwrap();

        assert!(context.registry.resolve(token.as_str().unwrap()).is_err());
        // A failed token is not reused; the next identical prompt tries again.
        let retry = invoke(&context, "prompt", "q", &["m"], &[]).unwrap();
        assert_ne!(retry.as_str(), token.as_str());
    }
}
