// src/core/filters/shell.rs

use super::{FilterError, Halt, Invocation, text_of};
use crate::{
    core::{
        confirm::{self, Decision},
        session::RenderContext,
    },
    system::executor::{self, ExecutionError},
};
use minijinja::{Value, value::ValueKind};
use std::io;

const DEFAULT_COMMAND: &str = "bash";

/// Turns the `cmd` argument into one command line. Sequences are shell-joined.
fn command_line(value: Option<&Value>) -> Result<String, FilterError> {
    let Some(value) = value else {
        return Ok(DEFAULT_COMMAND.to_string());
    };
    if value.kind() != ValueKind::Seq {
        return Ok(text_of(value));
    }

    let parts = value
        .try_iter()
        .map_err(|e| FilterError::InvalidArgument(format!("cannot read command list: {}", e)))?
        .map(|part| text_of(&part))
        .collect::<Vec<_>>();
    shlex::try_join(parts.iter().map(String::as_str))
        .map_err(|e| FilterError::InvalidArgument(format!("cannot join command list: {}", e)))
}

/// `input | run(cmd="bash", label=false, silentfail=false, trim=true)`
///
/// Feeds the input (trimmed of spaces and newlines) to `cmd` on stdin and
/// returns what it printed.
pub fn run(context: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    let cmd = command_line(invocation.arg_or_option(0, "cmd"))?;
    let label = invocation.flag(1, "label", false);
    let silentfail = invocation.flag(2, "silentfail", false);
    let trim = invocation.flag(3, "trim", true);

    let raw_input = invocation.input_text();
    let stdin = raw_input.trim_matches(|c| c == ' ' || c == '\n');

    let shell = &context.settings.config.render.shell;
    let output = match executor::execute_with_input(shell, &cmd, stdin) {
        Ok(output) => output,
        Err(ExecutionError::NonZeroExitStatus { command, status }) if silentfail => {
            log::debug!("Ignoring failure of '{}' ({})", command, status);
            return Ok(Value::from(""));
        }
        Err(e) => return Err(e.into()),
    };
    let output = if trim { output.trim().to_string() } else { output };

    if label {
        return Ok(Value::from(format!("```{}\n$ {}\n{}\n\n```", cmd, stdin, output)));
    }
    Ok(Value::from(output))
}

/// `command | askrun`
///
/// Shows the command to the operator and always ends the render with their decision.
pub fn askrun(context: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    let command = invocation.input_text();
    let decision = context
        .with_operator(|operator| confirm::confirm(operator, &command))
        .map_err(FilterError::Terminal)?;

    let halt = match decision {
        Decision::Execute(command) => Halt::Execute(command),
        Decision::Repeat => Halt::Repeat,
        Decision::Quit => Halt::Quit,
        Decision::Interrupted => Halt::Interrupted,
    };
    Err(FilterError::Halt(halt))
}

/// `text | askedit`
///
/// Lets the operator edit the text and returns the edited version.
pub fn askedit(context: &RenderContext, invocation: Invocation) -> Result<Value, FilterError> {
    let text = invocation.input_text();
    match context.with_operator(|operator| operator.edit(&text)) {
        Ok(edited) => Ok(Value::from(edited)),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => {
            Err(FilterError::Halt(Halt::Interrupted))
        }
        Err(e) => Err(FilterError::Terminal(e)),
    }
}
