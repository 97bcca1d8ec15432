// src/worker.rs

//! Top-level build orchestration.
//!
//! One call per invocation: decide whether the cache is usable, load or
//! rebuild the graph, then drive every requested target's pruned sub-graph
//! through the coordinator, one completion at a time. Returns the process
//! exit code.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use petgraph::stable_graph::NodeIndex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::cli::Config;
use crate::coordinator::{CoordinatorHandle, JobResult};
use crate::env;
use crate::errors::{ExMakeError, Result};
use crate::graph::{self, DepGraph};
use crate::loader;
use crate::logging;
use crate::runner;
use crate::script::{normalize, Fallback, Rule, ScriptEvaluator};
use crate::timing::TimerSession;

/// Run the build described by the coordinator's configuration and return
/// the exit code.
pub async fn execute(coordinator: &CoordinatorHandle, evaluator: Arc<dyn ScriptEvaluator>) -> i32 {
    let config = match coordinator.get_cfg().await {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };

    if let Err(err) = coordinator.clear_libraries().await {
        eprintln!("{err}");
        return 1;
    }

    if config.options.time {
        let _ = coordinator
            .apply_timer(|_| Some(TimerSession::new("exmake")))
            .await;
    }

    let result = run_build(coordinator, &evaluator, &config).await;

    if config.options.time {
        if let Ok(Some(session)) = coordinator.apply_timer(|t| t).await {
            println!("{}", session.render());
        }
    }

    match result {
        Ok(()) => 0,
        // `--question` staleness exits 1 without any noise.
        Err(ExMakeError::Stale) => 1,
        Err(err) => {
            eprintln!("{err}");
            if logging::debug_enabled() {
                eprintln!("{err:?}");
            }
            1
        }
    }
}

async fn run_build(
    coordinator: &CoordinatorHandle,
    evaluator: &Arc<dyn ScriptEvaluator>,
    config: &Config,
) -> Result<()> {
    let entry = Path::new(&config.options.file);
    let file_name = entry
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            ExMakeError::Usage(format!("invalid script path '{}'", config.options.file))
        })?
        .to_string();

    if let Some(parent) = entry.parent() {
        if !parent.as_os_str().is_empty() {
            std::env::set_current_dir(parent).map_err(|e| {
                ExMakeError::Usage(format!("cannot enter '{}': {e}", parent.display()))
            })?;
        }
    }

    for path in library_search_paths() {
        evaluator.add_search_path(&path);
    }

    let store = CacheStore::default_location();
    let stale = if config.options.clear {
        store.clear()?;
        true
    } else {
        store.is_stale()
    };

    let (graph, fallbacks) = if stale {
        debug!("cache is stale; loading scripts");
        build_and_persist(coordinator, evaluator, config, &store, &file_name).await?
    } else {
        debug!("cache is fresh; restoring");
        restore_from_cache(evaluator.as_ref(), &store)?
    };

    if let Some(missing) = config
        .targets
        .iter()
        .find(|t| graph.find_target(t.as_str()).is_none())
    {
        run_fallbacks(coordinator, &fallbacks).await?;
        return Err(ExMakeError::Usage(format!("Target '{missing}' not found")));
    }

    for target in &config.targets {
        let root = graph.find_target(target).ok_or_else(|| {
            ExMakeError::Usage(format!("Target '{target}' not found"))
        })?;
        let sub = graph.prune_to(root);

        let started = Instant::now();
        if config.options.question {
            question_walk(sub)?;
        } else {
            process_subgraph(coordinator, sub, target).await?;
        }
        record_pass(
            coordinator,
            config.options.time,
            format!("process '{target}'"),
            started.elapsed(),
        )
        .await;
    }

    Ok(())
}

/// The stale-cache path: reload scripts, rebuild the graph, persist all of
/// it for the next run.
async fn build_and_persist(
    coordinator: &CoordinatorHandle,
    evaluator: &Arc<dyn ScriptEvaluator>,
    config: &Config,
    store: &CacheStore,
    file_name: &str,
) -> Result<(DepGraph, Vec<Fallback>)> {
    let mut tail_args = config.args.clone();

    if store.has_config() {
        let (saved_args, saved_vars) = store.load_config()?;
        restore_precious_vars(saved_vars);
        if tail_args.is_empty() {
            tail_args = saved_args;
        }
    }

    let started = Instant::now();
    let (records, precious) = loader::load_scripts(
        evaluator,
        coordinator,
        Path::new("."),
        file_name,
        &tail_args,
    )
    .await?;
    record_pass(
        coordinator,
        config.options.time,
        "load scripts",
        started.elapsed(),
    )
    .await;

    store.save_mods(evaluator.as_ref(), &records)?;
    {
        let mut table = env::global().write().unwrap_or_else(|p| p.into_inner());
        store.save_env(&mut table)?;
    }

    let (graph, passes) = graph::build(&records)?;
    if config.options.time {
        for pass in passes {
            record_pass(coordinator, true, pass.name, pass.elapsed).await;
        }
    }
    store.save_graph(&graph)?;

    // Fallbacks come from the entry script only.
    let fallbacks: Vec<Fallback> = records
        .first()
        .map(|record| {
            record
                .fallbacks
                .iter()
                .map(|decl| Fallback {
                    recipe: decl.recipe.clone(),
                    directory: record.directory.clone(),
                })
                .collect()
        })
        .unwrap_or_default();
    store.save_fallbacks(&fallbacks)?;

    // The manifest covers every loaded script file plus everything the
    // scripts declared explicitly.
    let mut manifest: Vec<PathBuf> = records.iter().map(|r| r.script_path()).collect();
    for record in &records {
        for entry in &record.manifest_entries {
            manifest.push(normalize(&record.directory.join(entry)));
        }
    }
    store.append_manifest(&manifest)?;

    store.save_config(&tail_args, &precious)?;

    info!(
        scripts = records.len(),
        vertices = graph.vertex_count(),
        "graph built and cached"
    );
    Ok((graph, fallbacks))
}

/// The fresh-cache path: everything comes back from disk.
fn restore_from_cache(
    evaluator: &dyn ScriptEvaluator,
    store: &CacheStore,
) -> Result<(DepGraph, Vec<Fallback>)> {
    store.load_mods(evaluator)?;
    {
        let mut table = env::global().write().unwrap_or_else(|p| p.into_inner());
        store.load_env(&mut table)?;
    }
    Ok((store.load_graph()?, store.load_fallbacks()?))
}

/// Set each saved precious variable that the current environment leaves
/// unset.
fn restore_precious_vars(saved: HashMap<String, String>) {
    for (name, value) in saved {
        if std::env::var_os(&name).is_none() {
            debug!(var = %name, "restoring precious environment variable");
            std::env::set_var(&name, value);
        }
    }
}

/// `--question`: walk the leaves without invoking anything; any stale rule
/// fails the check.
fn question_walk(mut sub: DepGraph) -> Result<()> {
    while !sub.is_empty() {
        let leaves = sub.leaves();
        if leaves.is_empty() {
            return Err(ExMakeError::Script(
                "dependency graph has no runnable leaves".to_string(),
            ));
        }
        for leaf in leaves {
            if let Some(rule) = sub.rule(leaf) {
                if runner::is_stale(rule) {
                    return Err(ExMakeError::Stale);
                }
            }
            sub.remove_vertex(leaf);
        }
    }
    Ok(())
}

/// Drive one pruned sub-graph to empty: enqueue pending leaves, await one
/// completion, delete the finished vertex, repeat. On failure the in-flight
/// jobs are drained before the error propagates.
async fn process_subgraph(
    coordinator: &CoordinatorHandle,
    mut sub: DepGraph,
    target: &str,
) -> Result<()> {
    debug!(goal = %target, vertices = sub.vertex_count(), "processing sub-graph");

    let (owner_tx, mut owner_rx) = mpsc::unbounded_channel();
    let mut in_flight = 0usize;

    let result = 'drive: loop {
        if sub.is_empty() {
            break Ok(());
        }

        let leaves = sub.pending_leaves();
        if leaves.is_empty() && in_flight == 0 {
            // Cannot happen on an acyclic graph; guard against a corrupt
            // cache all the same.
            break Err(ExMakeError::Script(format!(
                "no runnable leaves left while processing '{target}'"
            )));
        }

        for leaf in leaves {
            let Some(rule) = sub.rule(leaf).cloned() else {
                continue;
            };
            if let Err(err) = coordinator
                .enqueue(rule, leaf.index(), owner_tx.clone())
                .await
            {
                break 'drive Err(err);
            }
            sub.mark_processing(leaf);
            in_flight += 1;
        }

        let Some(done) = owner_rx.recv().await else {
            break Err(ExMakeError::Throw(
                "completion channel closed".to_string(),
            ));
        };
        in_flight -= 1;

        match done.result {
            JobResult::Ok => {
                debug!(rule = %done.rule.label(), "vertex complete");
                sub.remove_vertex(NodeIndex::new(done.data));
            }
            JobResult::Failed(err) => break Err(err),
        }
    };

    if result.is_err() && in_flight > 0 {
        warn!(in_flight, "draining in-flight jobs after failure");
        while in_flight > 0 {
            if owner_rx.recv().await.is_none() {
                break;
            }
            in_flight -= 1;
        }
    }

    result
}

/// Run every stored fallback serially; fallback failures are logged but do
/// not mask the missing-target error that follows.
async fn run_fallbacks(coordinator: &CoordinatorHandle, fallbacks: &[Fallback]) -> Result<()> {
    for fallback in fallbacks {
        let (owner_tx, mut owner_rx) = mpsc::unbounded_channel();
        coordinator
            .enqueue(Rule::Fallback(fallback.clone()), 0, owner_tx)
            .await?;
        if let Some(done) = owner_rx.recv().await {
            if let JobResult::Failed(err) = done.result {
                debug!(error = %err, "fallback failed");
            }
        }
    }
    Ok(())
}

async fn record_pass(
    coordinator: &CoordinatorHandle,
    enabled: bool,
    name: impl Into<String>,
    elapsed: Duration,
) {
    if !enabled {
        return;
    }
    let name = name.into();
    let _ = coordinator
        .apply_timer(move |timing| {
            timing.map(|mut session| {
                session.record(name, elapsed);
                session
            })
        })
        .await;
}

/// Library search path: `EXMAKE_PATH` replaces the default list entirely
/// when set.
fn library_search_paths() -> Vec<PathBuf> {
    if let Ok(value) = std::env::var("EXMAKE_PATH") {
        return value
            .split(':')
            .filter(|part| !part.is_empty())
            .map(PathBuf::from)
            .collect();
    }

    let mut paths = vec![PathBuf::from("./exmake")];
    if let Ok(home) = std::env::var("HOME") {
        paths.push(Path::new(&home).join(".exmake"));
    }
    for fixed in ["/usr/local/lib/exmake", "/usr/lib/exmake", "/lib/exmake"] {
        paths.push(PathBuf::from(fixed));
    }
    paths
}
