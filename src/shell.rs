// src/shell.rs

//! Subprocess execution for recipes.
//!
//! Commands are expanded against the global environment table first, then
//! run through the platform shell with stdout and stderr captured. A
//! non-zero exit becomes a `ShellError` carrying the command, the captured
//! output and the exit code. [`format`] does the `${}` expansion step on
//! its own, for recipes that assemble commands without running them.
//!
//! Recipes run on blocking threads, so this uses the synchronous process
//! API.

use std::process::Command;

use tracing::info;

use crate::env::{self, EnvTable};
use crate::errors::{ExMakeError, Result};

/// Expand `${KEY}` references in a command template without running it.
///
/// `args` supplies extra bindings that take precedence over the global
/// environment table; expansion stays a single pass.
pub fn format(fmt: &str, args: &[(&str, &str)]) -> String {
    let mut table = {
        let global = env::global().read().unwrap_or_else(|p| p.into_inner());
        let mut local = EnvTable::new();
        local.restore(global.snapshot());
        local
    };
    for (key, value) in args {
        table.put(*key, *value);
    }
    table.expand(fmt)
}

/// Run a shell command, returning its combined output.
pub fn execute(command: &str) -> Result<String> {
    let expanded = env::expand(command);
    info!(command = %expanded, "sh");

    let output = shell_command(&expanded).output().map_err(|e| ExMakeError::Shell {
        command: expanded.clone(),
        output: e.to_string(),
        exit_code: -1,
    })?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    if output.status.success() {
        Ok(text)
    } else {
        Err(ExMakeError::Shell {
            command: expanded,
            output: text,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_captures_stdout() {
        let out = execute("echo hello").unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn non_zero_exit_is_a_shell_error() {
        let err = execute("exit 3").unwrap_err();
        match err {
            ExMakeError::Shell {
                command, exit_code, ..
            } => {
                assert_eq!(command, "exit 3");
                assert_eq!(exit_code, 3);
            }
            other => panic!("expected ShellError, got {other:?}"),
        }
    }

    #[test]
    fn commands_expand_environment_references() {
        {
            let mut table = env::global().write().unwrap_or_else(|p| p.into_inner());
            table.put("SHELL_TEST_WORD", "expanded");
        }
        let out = execute("echo ${SHELL_TEST_WORD}").unwrap();
        assert_eq!(out.trim(), "expanded");
    }

    #[test]
    fn format_expands_without_executing() {
        {
            let mut table = env::global().write().unwrap_or_else(|p| p.into_inner());
            table.put("SHELL_FMT_CC", "cc");
        }
        let out = format("${SHELL_FMT_CC} -c ${SHELL_FMT_IN} -o ${OUT}", &[("SHELL_FMT_IN", "foo.c")]);
        assert_eq!(out, "cc -c foo.c -o ${OUT}");
    }

    #[test]
    fn format_args_take_precedence_over_the_table() {
        {
            let mut table = env::global().write().unwrap_or_else(|p| p.into_inner());
            table.put("SHELL_FMT_FLAVOR", "release");
        }
        let out = format("build ${SHELL_FMT_FLAVOR}", &[("SHELL_FMT_FLAVOR", "debug")]);
        assert_eq!(out, "build debug");
    }
}
