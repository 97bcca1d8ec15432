// src/lib.rs

pub mod cache;
pub mod cli;
pub mod coordinator;
pub mod env;
pub mod errors;
pub mod graph;
pub mod loader;
pub mod logging;
pub mod runner;
pub mod script;
pub mod shell;
pub mod timing;
pub mod worker;

use std::sync::Arc;

pub use errors::{ExMakeError, Result};

use crate::cli::{CliArgs, Config};
use crate::coordinator::CoordinatorHandle;
use crate::script::ScriptEvaluator;

/// High-level entry point used by `main.rs`.
///
/// Scripts registered against the global evaluator registry are visible to
/// this entry point; tests supply their own evaluator through
/// [`run_with_evaluator`].
pub async fn run(args: CliArgs) -> i32 {
    run_with_evaluator(args, script::evaluator::global_evaluator()).await
}

/// Run one build against an explicit evaluator and return the exit code.
///
/// This wires together:
/// - help/version short-circuits (exit code 2)
/// - the coordinator actor holding configuration and the job pool
/// - the worker driver doing cache decisions and graph processing
pub async fn run_with_evaluator(args: CliArgs, evaluator: Arc<dyn ScriptEvaluator>) -> i32 {
    if args.help {
        print!("{}", cli::render_help());
        return 2;
    }
    if args.version {
        println!("{}", cli::version_line());
        return 2;
    }

    let config = Config::from(args);
    let coordinator = CoordinatorHandle::spawn(evaluator.clone());
    if let Err(err) = coordinator.set_cfg(config).await {
        eprintln!("{err}");
        return 1;
    }

    worker::execute(&coordinator, evaluator).await
}
