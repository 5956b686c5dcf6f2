use clap::Parser;

pub mod handlers;

/// siesta: render text templates whose filters run shell commands, call LLMs and touch files.
///
/// The first positional argument is a template path, or a template name looked
/// up in the configured template directories. Everything after it is handed to
/// the template untouched, as `argv` and as the space-joined `input`. Flags for
/// siesta itself go before the template.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = None,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Template file, or the name of a template in a template directory.
    #[arg(required_unless_present = "list")]
    pub template: Option<String>,

    /// Extra arguments exposed to the template.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// List the templates found in the template directories and exit.
    #[arg(long)]
    pub list: bool,

    /// Ignore cached completions (fresh results are still written to the cache).
    #[arg(long)]
    pub recache: bool,

    /// Mirror streamed completion text to stderr as it arrives.
    #[arg(long)]
    pub verbose: bool,
}
