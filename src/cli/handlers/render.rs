// src/cli/handlers/render.rs

use anyhow::{Context, Result, anyhow};
use scopeguard::ScopeGuard;
use std::sync::Arc;

use crate::{
    cli::Cli,
    core::{
        cache::ResponseCache,
        config_loader::{self, Settings},
        paths,
        session::{RenderContext, Session},
        templates,
    },
    models::Outcome,
    system::{completion::CompletionClient, openai::OpenAiTransport, terminal::TerminalOperator},
};

/// The main handler: renders the requested template and reports how the run ends.
///
/// The session is closed on every path out of this function. Deferred work is
/// drained and cache writes are flushed even when the render fails.
pub fn handle(cli: &Cli, program: &str) -> Result<Outcome> {
    // 1. Load configuration and find the template.
    let config = config_loader::load_config().context("Failed to load configuration")?;
    let template = cli
        .template
        .as_deref()
        .ok_or_else(|| anyhow!("No template given. Run with --help for usage."))?;
    let template_path = templates::resolve_template(template, &config.render)?;
    log::debug!("Resolved template '{}' to '{}'", template, template_path.display());

    // 2. Wire up the shared render context.
    let settings = Settings::new(config, cli.recache, cli.verbose);
    let api_key = settings.env_var(&settings.config.completion.api_key_env);
    let transport = OpenAiTransport::new(&settings.config.completion, api_key)?;
    let cache_path = paths::get_response_cache_path(&settings.config)?;
    let cache = ResponseCache::open(&cache_path);
    let context = RenderContext::new(
        settings,
        cache,
        CompletionClient::new(Arc::new(transport)),
        Box::new(TerminalOperator),
    )?;

    // 3. Build the template arguments: program, template, extras.
    let mut argv = vec![program.to_string(), template.to_string()];
    argv.extend(cli.args.iter().cloned());
    let session = Session::new(&template_path, argv, context)?;

    // 4. Render, closing the session whichever way the render ends.
    let session = scopeguard::guard(session, |session| {
        if let Err(e) = session.close() {
            log::warn!("Failed to close render session: {}", e);
        }
    });
    let outcome = session.render()?;
    let session = ScopeGuard::into_inner(session);
    session.close().context("Failed to close the render session")?;

    Ok(outcome)
}
