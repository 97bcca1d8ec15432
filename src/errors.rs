// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Every failure the engine can surface is one of the kinds below; the kind
//! is stable even where the message text is not. Errors render as
//! `<Kind>: <message>` so the driver can print them verbatim.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ExMakeError {
    /// Bad command-line arguments, or a source file missing at build time.
    #[error("UsageError: {0}")]
    Usage(String),

    /// A script could not be loaded: absent, unreadable, or violating the
    /// one-module-per-script rule.
    #[error("LoadError: {}/{}: {}", directory.display(), file, underlying)]
    Load {
        file: String,
        directory: PathBuf,
        underlying: String,
    },

    /// Malformed declaration, duplicate target, name collision, cyclic
    /// dependency, or a recipe contract violation.
    #[error("ScriptError: {0}")]
    Script(String),

    /// I/O failure persisting or restoring a cache file.
    #[error("CacheError: {0}")]
    Cache(String),

    /// A subprocess invoked by a recipe exited non-zero.
    #[error("ShellError: command `{command}` exited with code {exit_code}\n{output}")]
    Shell {
        command: String,
        output: String,
        exit_code: i32,
    },

    /// Mismatched string/list operation on an environment table entry.
    #[error("EnvError: {0}")]
    Env(String),

    /// Raised only under `--question` when some rule is stale. Exits 1
    /// without any error text.
    #[error("StaleError: a rule is out of date")]
    Stale,

    /// A recipe panicked; the payload is wrapped so callers can handle
    /// failure uniformly.
    #[error("ThrowError: {0}")]
    Throw(String),
}

impl ExMakeError {
    /// Convenience constructor for [`ExMakeError::Load`].
    pub fn load(
        file: impl Into<String>,
        directory: impl Into<PathBuf>,
        underlying: impl Into<String>,
    ) -> Self {
        ExMakeError::Load {
            file: file.into(),
            directory: directory.into(),
            underlying: underlying.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExMakeError>;
