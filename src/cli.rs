// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! The built-in help/version handling is disabled: `--help` and `--version`
//! must exit with code 2, so they are plain flags the entry point inspects.
//! The opaque `--args` tail is peeled off before clap sees the argument
//! list; everything after `-a`/`--args` is handed to recipes untouched.

use clap::{CommandFactory, Parser};

use crate::errors::{ExMakeError, Result};

/// Command-line arguments for `exmake`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "exmake",
    about = "A modern, scriptable, dependency-based build tool.",
    disable_help_flag = true,
    disable_version_flag = true,
    long_about = None
)]
pub struct CliArgs {
    /// Print the help message and exit.
    #[arg(short = 'h', long)]
    pub help: bool,

    /// Print the version and exit.
    #[arg(short = 'v', long)]
    pub version: bool,

    /// Path to the entry script.
    #[arg(short = 'f', long, value_name = "PATH", default_value = "Exmakefile")]
    pub file: String,

    /// Print everything recipes do.
    #[arg(short = 'l', long)]
    pub loud: bool,

    /// Only check whether the targets are up to date.
    #[arg(short = 'q', long)]
    pub question: bool,

    /// Maximum number of concurrently running recipes.
    #[arg(short = 'j', long, value_name = "N", default_value_t = 1)]
    pub jobs: usize,

    /// Collect and print pass timings.
    #[arg(short = 't', long)]
    pub time: bool,

    /// Clear the cache before deciding whether it is stale.
    #[arg(short = 'c', long)]
    pub clear: bool,

    /// Targets to build; defaults to `all`.
    #[arg(value_name = "TARGET")]
    pub targets: Vec<String>,

    /// Opaque tail after `--args`, passed through to script hooks.
    #[arg(skip)]
    pub args: Vec<String>,
}

/// Parse the process arguments.
pub fn parse() -> Result<CliArgs> {
    parse_from(std::env::args().collect())
}

/// Parse an explicit argument vector (first element is the program name).
pub fn parse_from(argv: Vec<String>) -> Result<CliArgs> {
    let (head, tail) = split_tail(argv);
    let mut args =
        CliArgs::try_parse_from(head).map_err(|e| ExMakeError::Usage(e.to_string()))?;
    args.args = tail;
    Ok(args)
}

/// Split off everything after the first `-a`/`--args` switch.
fn split_tail(argv: Vec<String>) -> (Vec<String>, Vec<String>) {
    match argv.iter().position(|a| a == "-a" || a == "--args") {
        Some(pos) => {
            let tail = argv[pos + 1..].to_vec();
            (argv[..pos].to_vec(), tail)
        }
        None => (argv, Vec::new()),
    }
}

/// Rendered help text for the `--help` flag.
pub fn render_help() -> String {
    CliArgs::command().render_help().to_string()
}

/// One-line version banner for the `--version` flag.
pub fn version_line() -> String {
    format!("exmake {}", env!("CARGO_PKG_VERSION"))
}

/// Recognized options, with their defaults.
#[derive(Debug, Clone)]
pub struct Options {
    pub help: bool,
    pub version: bool,
    pub file: String,
    pub loud: bool,
    pub question: bool,
    pub jobs: usize,
    pub time: bool,
    pub clear: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            help: false,
            version: false,
            file: "Exmakefile".to_string(),
            loud: false,
            question: false,
            jobs: 1,
            time: false,
            clear: false,
        }
    }
}

/// The full build configuration the coordinator holds.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub targets: Vec<String>,
    pub options: Options,
    pub args: Vec<String>,
}

impl From<CliArgs> for Config {
    fn from(args: CliArgs) -> Self {
        let targets = if args.targets.is_empty() {
            vec!["all".to_string()]
        } else {
            args.targets
        };

        Config {
            targets,
            options: Options {
                help: args.help,
                version: args.version,
                file: args.file,
                loud: args.loud,
                question: args.question,
                jobs: args.jobs,
                time: args.time,
                clear: args.clear,
            },
            args: args.args,
        }
    }
}
