// src/system/executor.rs

use std::io::{ErrorKind, Write};
use std::process::{Command as StdCommand, ExitStatus, Stdio};
use std::thread;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No command specified to run.")]
    EmptyCommand,
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error("Command '{command}' exited with a non-zero status ({status}).")]
    NonZeroExitStatus { command: String, status: String },
    #[error("Command '{command}' produced output that was not valid UTF-8")]
    InvalidUtf8Output {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
    #[error("Could not hand the process over to '{command}': {source}")]
    ReplaceFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Builds `<shell> -c <command>`, or `cmd /C <command>` when the shell is `cmd`.
fn shell_command(shell: &str, command_line: &str) -> StdCommand {
    let mut command = StdCommand::new(shell);
    if shell.eq_ignore_ascii_case("cmd") || shell.eq_ignore_ascii_case("cmd.exe") {
        command.arg("/C");
    } else {
        command.arg("-c");
    }
    command.arg(command_line);
    command
}

/// Runs `command_line` through `shell`, writing `input` to its stdin and capturing stdout.
///
/// Stderr is passed through to the user's terminal. The call blocks until the
/// command exits; a non-zero status is reported as `NonZeroExitStatus`.
pub fn execute_with_input(
    shell: &str,
    command_line: &str,
    input: &str,
) -> Result<String, ExecutionError> {
    if command_line.trim().is_empty() {
        return Err(ExecutionError::EmptyCommand);
    }
    log::debug!("Spawning '{} -c {}'", shell, command_line);

    let mut child = shell_command(shell, command_line)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| ExecutionError::CommandFailed(command_line.to_string(), e))?;

    // Feed stdin from a separate thread so a command that writes before it has
    // read all its input cannot deadlock against us.
    let writer = child.stdin.take().map(|mut stdin| {
        let input = input.to_string();
        thread::spawn(move || match stdin.write_all(input.as_bytes()) {
            // The command may exit without reading its input.
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
            other => other,
        })
    });

    let output = child
        .wait_with_output()
        .map_err(|e| ExecutionError::CommandFailed(command_line.to_string(), e))?;

    if let Some(writer) = writer {
        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Failed to write stdin of '{}': {}", command_line, e),
            Err(_) => log::warn!("Stdin writer for '{}' panicked", command_line),
        }
    }

    if !output.status.success() {
        return Err(ExecutionError::NonZeroExitStatus {
            command: command_line.to_string(),
            status: describe_status(output.status),
        });
    }

    String::from_utf8(output.stdout).map_err(|e| ExecutionError::InvalidUtf8Output {
        command: command_line.to_string(),
        source: e,
    })
}

/// Replaces the current process with `<shell> -c <command_line>`, inheriting the standard streams.
///
/// On Unix this only returns if the exec itself failed. Elsewhere the command
/// runs as a child and the whole program exits with its status.
pub fn replace_process(shell: &str, command_line: &str) -> ExecutionError {
    log::debug!("Replacing process with '{} -c {}'", shell, command_line);
    let mut command = shell_command(shell, command_line);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let source = command.exec();
        ExecutionError::ReplaceFailed {
            command: command_line.to_string(),
            source,
        }
    }

    #[cfg(not(unix))]
    {
        match command.status() {
            Ok(status) => std::process::exit(status.code().unwrap_or(1)),
            Err(source) => ExecutionError::ReplaceFailed {
                command: command_line.to_string(),
                source,
            },
        }
    }
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}
