// src/loader.rs

//! Loader facade over the script evaluator.
//!
//! Loading a script means asking the evaluator for the modules it defines,
//! picking the one module whose identifier ends in `.Exmakefile`, reading
//! its metadata, loading the libraries it requests (each library's
//! `on_load` hook runs at most once per build), and recursing into declared
//! sub-directories. The result is the flattened list of script records,
//! parent before children.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::coordinator::CoordinatorHandle;
use crate::errors::{ExMakeError, Result};
use crate::script::{ScriptEvaluator, ScriptRecord, SubScript};

const EXMAKEFILE_SUFFIX: &str = ".Exmakefile";

/// Load the script at `(directory, file)` and everything it includes.
///
/// Returns the flattened script records plus the union of the precious
/// environment variable names declared by loaded libraries.
pub async fn load_scripts(
    evaluator: &Arc<dyn ScriptEvaluator>,
    coordinator: &CoordinatorHandle,
    directory: &Path,
    file: &str,
    tail_args: &[String],
) -> Result<(Vec<ScriptRecord>, Vec<String>)> {
    let mut records = Vec::new();
    let mut precious = Vec::new();

    // Depth-first, parent before children.
    let mut stack: Vec<(PathBuf, String)> = vec![(directory.to_path_buf(), file.to_string())];
    while let Some((dir, name)) = stack.pop() {
        let record = load_one(evaluator, coordinator, &dir, &name, tail_args, &mut precious).await?;

        for sub in record.sub_scripts.iter().rev() {
            validate_sub_script(&record, sub)?;
            stack.push((dir.join(&sub.directory), sub.file.clone()));
        }

        records.push(record);
    }

    precious.sort();
    precious.dedup();
    Ok((records, precious))
}

async fn load_one(
    evaluator: &Arc<dyn ScriptEvaluator>,
    coordinator: &CoordinatorHandle,
    directory: &Path,
    file: &str,
    tail_args: &[String],
    precious: &mut Vec<String>,
) -> Result<ScriptRecord> {
    if has_path_separator(file) {
        return Err(ExMakeError::Usage(format!(
            "Script file name '{file}' must not contain path separators"
        )));
    }

    let modules = evaluator.load_script(directory, file)?;
    let mut script_modules: Vec<_> = modules
        .into_iter()
        .filter(|m| m.module.ends_with(EXMAKEFILE_SUFFIX))
        .collect();

    let chosen = match script_modules.len() {
        1 => script_modules.remove(0),
        0 => {
            return Err(ExMakeError::load(
                file,
                directory,
                format!("No module ending in '{EXMAKEFILE_SUFFIX}' defined"),
            ))
        }
        n => {
            return Err(ExMakeError::load(
                file,
                directory,
                format!("{n} modules ending in '{EXMAKEFILE_SUFFIX}' defined"),
            ))
        }
    };

    debug!(module = %chosen.module, directory = %directory.display(), "loaded script");
    let metadata = evaluator.metadata(&chosen.module)?;

    for library in &metadata.libraries {
        // The libraries set deduplicates `on_load` across the whole build.
        if !coordinator.add_library(&library.name).await? {
            continue;
        }

        let module = evaluator.library(&library.name)?;
        info!(
            library = %module.name,
            version = ?module.info.version,
            "loaded library"
        );
        precious.extend(module.precious.iter().cloned());

        if let Some(hook) = &module.on_load {
            hook(&library.args, tail_args)?;
        }
    }

    Ok(ScriptRecord {
        directory: directory.to_path_buf(),
        file_name: file.to_string(),
        module: chosen.module,
        artifact: chosen.artifact,
        rules: metadata.rules,
        tasks: metadata.tasks,
        fallbacks: metadata.fallbacks,
        manifest_entries: metadata.manifest_entries,
        sub_scripts: metadata.sub_scripts,
        libraries: metadata.libraries,
    })
}

fn validate_sub_script(record: &ScriptRecord, sub: &SubScript) -> Result<()> {
    if sub.directory.is_empty() || has_path_separator(&sub.directory) {
        return Err(ExMakeError::Script(format!(
            "{}: recurse directory '{}' must be a name without path separators",
            record.script_path().display(),
            sub.directory
        )));
    }
    if sub.file.is_empty() || has_path_separator(&sub.file) {
        return Err(ExMakeError::Script(format!(
            "{}: recurse file '{}' must be a name without path separators",
            record.script_path().display(),
            sub.file
        )));
    }
    Ok(())
}

fn has_path_separator(name: &str) -> bool {
    name.contains('/') || name.contains('\\')
}
