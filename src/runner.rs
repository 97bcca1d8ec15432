// src/runner.rs

//! Recipe execution for one job.
//!
//! A runner checks that the job's source files exist, decides staleness,
//! invokes the recipe on a blocking thread, enforces the recipe contract
//! (working directory unchanged, declared outputs produced), removes partial
//! outputs on failure, and reports the outcome.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task;
use tracing::{debug, info};

use crate::cache::mtime;
use crate::coordinator::JobResult;
use crate::errors::{ExMakeError, Result};
use crate::script::{Recipe, Rule, ScriptEvaluator};

/// Execute one job to completion and convert any failure into a reportable
/// result, cleaning up declared outputs first.
pub async fn run_job(rule: Rule, evaluator: Arc<dyn ScriptEvaluator>) -> JobResult {
    match run_job_inner(&rule, evaluator).await {
        Ok(()) => JobResult::Ok,
        Err(err) => {
            cleanup_targets(&rule);
            JobResult::Failed(err)
        }
    }
}

async fn run_job_inner(rule: &Rule, evaluator: Arc<dyn ScriptEvaluator>) -> Result<()> {
    check_sources(rule)?;

    if !is_stale(rule) {
        debug!(rule = %rule.label(), "up to date; skipping recipe");
        return Ok(());
    }

    let recipe = evaluator.resolve_recipe(rule.recipe_ref()).ok_or_else(|| {
        ExMakeError::Script(format!("no recipe registered for rule {}", rule.label()))
    })?;

    info!(rule = %rule.label(), "running recipe");
    let before = working_dir()?;

    let job_rule = rule.clone();
    let outcome = task::spawn_blocking(move || {
        catch_unwind(AssertUnwindSafe(|| invoke(&job_rule, &recipe)))
    })
    .await;

    match outcome {
        Err(join_err) => {
            return Err(ExMakeError::Throw(format!(
                "recipe task aborted: {join_err}"
            )))
        }
        Ok(Err(panic)) => return Err(ExMakeError::Throw(panic_message(panic))),
        Ok(Ok(Err(err))) => return Err(err),
        Ok(Ok(Ok(()))) => {}
    }

    let after = working_dir()?;
    if after != before {
        return Err(ExMakeError::Script(format!(
            "Recipe for rule {} changed directory from '{}' to '{}'",
            rule.label(),
            before.display(),
            after.display()
        )));
    }

    if let Rule::File(file_rule) = rule {
        for target in &file_rule.targets {
            if !target.exists() {
                return Err(ExMakeError::Script(format!(
                    "Recipe for rule {} did not produce {} as expected",
                    rule.label(),
                    target.display()
                )));
            }
        }
    }

    Ok(())
}

/// Every source of a file rule must exist on disk; tasks only require their
/// `real_sources` (sources that do not name another task).
fn check_sources(rule: &Rule) -> Result<()> {
    let sources: &[PathBuf] = match rule {
        Rule::File(r) => &r.sources,
        Rule::Task(t) => &t.real_sources,
        Rule::Fallback(_) => &[],
    };

    for source in sources {
        if !source.exists() {
            return Err(ExMakeError::Usage(format!(
                "No rule to make target '{}'",
                source.display()
            )));
        }
    }
    Ok(())
}

/// Tasks and fallbacks always run. A file rule runs when a target is
/// missing, or when the newest source is newer than the oldest target.
pub fn is_stale(rule: &Rule) -> bool {
    match rule {
        Rule::Task(_) | Rule::Fallback(_) => true,
        Rule::File(r) => {
            if r.targets.iter().any(|t| !t.exists()) {
                return true;
            }
            let newest_source = r.sources.iter().map(|s| mtime(s)).max();
            let oldest_target = r.targets.iter().map(|t| mtime(t)).min();
            match (newest_source, oldest_target) {
                (Some(source), Some(target)) => source > target,
                _ => false,
            }
        }
    }
}

fn invoke(rule: &Rule, recipe: &Recipe) -> Result<()> {
    match (rule, recipe) {
        (Rule::File(r), Recipe::Rule2(f)) => f(&r.sources, &r.targets),
        (Rule::File(r), Recipe::Rule3(f)) => f(&r.sources, &r.targets, &r.directory),
        (Rule::Task(t), Recipe::Task(f)) => f(&t.name, &t.sources, &t.directory),
        (Rule::Fallback(fb), Recipe::Fallback(f)) => f(&fb.directory),
        _ => Err(ExMakeError::Script(format!(
            "recipe shape does not match rule {}",
            rule.label()
        ))),
    }
}

/// Best-effort removal of every declared target file.
fn cleanup_targets(rule: &Rule) {
    if let Rule::File(file_rule) = rule {
        for target in &file_rule.targets {
            if std::fs::remove_file(target).is_ok() {
                debug!(path = %target.display(), "removed partial output");
            }
        }
    }
}

fn working_dir() -> Result<PathBuf> {
    std::env::current_dir()
        .map_err(|e| ExMakeError::Script(format!("cannot read working directory: {e}")))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "recipe threw a non-string value".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{FileRule, RecipeRef, RecipeSlot, TaskRule};
    use std::fs;

    fn recipe_ref() -> RecipeRef {
        RecipeRef {
            module: "Test.Exmakefile".into(),
            slot: RecipeSlot::Rule,
            index: 0,
        }
    }

    #[test]
    fn missing_target_forces_staleness() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.c");
        fs::write(&source, "int main;").unwrap();

        let rule = Rule::File(FileRule {
            targets: vec![dir.path().join("out.o")],
            sources: vec![source],
            recipe: recipe_ref(),
            directory: dir.path().to_path_buf(),
        });
        assert!(is_stale(&rule));
    }

    #[test]
    fn existing_newer_target_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.c");
        let target = dir.path().join("out.o");
        fs::write(&source, "int main;").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&target, "obj").unwrap();

        let rule = Rule::File(FileRule {
            targets: vec![target],
            sources: vec![source],
            recipe: recipe_ref(),
            directory: dir.path().to_path_buf(),
        });
        assert!(!is_stale(&rule));
    }

    #[test]
    fn tasks_are_always_stale() {
        let task = Rule::Task(TaskRule {
            name: "all".into(),
            sources: vec![],
            real_sources: vec![],
            recipe: recipe_ref(),
            directory: ".".into(),
        });
        assert!(is_stale(&task));
    }

    #[test]
    fn missing_source_is_a_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let rule = Rule::File(FileRule {
            targets: vec![dir.path().join("out.o")],
            sources: vec![dir.path().join("in.c")],
            recipe: recipe_ref(),
            directory: dir.path().to_path_buf(),
        });

        let err = check_sources(&rule).unwrap_err();
        assert!(matches!(err, ExMakeError::Usage(_)));
        assert!(err.to_string().contains("No rule to make target"));
    }

    #[test]
    fn task_checks_only_real_sources() {
        let task = Rule::Task(TaskRule {
            name: "all".into(),
            // `other-task` names a task, so it is not in real_sources and
            // must not be required on disk.
            sources: vec!["other-task".into()],
            real_sources: vec![],
            recipe: recipe_ref(),
            directory: ".".into(),
        });
        assert!(check_sources(&task).is_ok());
    }
}
