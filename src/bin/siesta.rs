// src/bin/siesta.rs

use anyhow::Result;
use clap::Parser;
use colored::*;
use siesta::{
    cli::{Cli, handlers},
    constants::EXIT_FAILURE,
    models::Outcome,
    system::executor,
};
use std::env;

/// The main entry point of the `siesta` application.
/// It sets up logging, parses arguments, dispatches to the correct handler,
/// and performs centralized error handling.
fn main() {
    env_logger::init();

    let code = match run_cli(Cli::parse()) {
        Ok(Outcome::Rendered(text)) => {
            println!("{}", text);
            0
        }
        Ok(Outcome::Exit(code)) => code,
        Ok(Outcome::Execute { shell, command }) => {
            // Everything is closed by now; the exec is the last thing this process does.
            let err = executor::replace_process(&shell, &command);
            report(&err.into());
            EXIT_FAILURE
        }
        Err(e) => {
            report(&e);
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

/// Routes to the handler for the requested mode.
fn run_cli(cli: Cli) -> Result<Outcome> {
    log::debug!("CLI args parsed: {:?}", cli);

    if cli.list {
        handlers::list::handle()?;
        return Ok(Outcome::Exit(0));
    }

    let program = env::args().next().unwrap_or_else(|| "siesta".to_string());
    handlers::render::handle(&cli, &program)
}

fn report(e: &anyhow::Error) {
    eprintln!("{}: {:#}", "Error".red().bold(), e);
    log::debug!("Error chain: {:?}", e);
}
