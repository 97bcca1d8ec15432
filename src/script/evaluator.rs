// src/script/evaluator.rs

//! The script evaluator seam.
//!
//! The engine never interprets script text itself; it talks to a
//! [`ScriptEvaluator`] that loads script files, surfaces per-module
//! metadata, restores compiled artifacts from cache, and resolves recipe
//! references into callables at dispatch time.
//!
//! [`StaticEvaluator`] is the registry-backed implementation: script modules
//! and libraries are compiled into the program and registered against the
//! `(directory, file)` locations they claim. The binary uses one global
//! registry; tests build their own instances.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use tracing::debug;

use crate::errors::{ExMakeError, Result};
use crate::script::builder::ScriptModule;
use crate::script::model::{LibraryModule, ModuleMetadata, Recipe, RecipeRef};
use crate::script::normalize;

/// A module the evaluator produced for one script file.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub module: String,
    pub artifact: Vec<u8>,
}

/// Contract with the external script evaluator.
pub trait ScriptEvaluator: Send + Sync {
    /// Load `file` in the context of `directory`; returns every module the
    /// script defines.
    fn load_script(&self, directory: &Path, file: &str) -> Result<Vec<LoadedModule>>;

    /// Metadata declared by a previously loaded module.
    fn metadata(&self, module: &str) -> Result<ModuleMetadata>;

    /// Reload a compiled artifact persisted by an earlier run.
    fn restore_module(&self, module: &str, artifact: &[u8]) -> Result<()>;

    /// Resolve a recipe reference into its callable, if the module is loaded.
    fn resolve_recipe(&self, recipe: &RecipeRef) -> Option<Recipe>;

    /// Load a library module by name.
    fn library(&self, name: &str) -> Result<LibraryModule>;

    /// Append a directory to the library search path.
    fn add_search_path(&self, dir: &Path);

    /// File-name suffix for persisted compiled artifacts.
    fn artifact_suffix(&self) -> &'static str {
        "mod"
    }
}

/// Registry-backed evaluator: modules and libraries are registered up front
/// and "loading" a script looks its location up in the registry.
#[derive(Default)]
pub struct StaticEvaluator {
    scripts: RwLock<HashMap<(PathBuf, String), Vec<ScriptModule>>>,
    loaded: RwLock<HashMap<String, ScriptModule>>,
    libraries: RwLock<HashMap<String, LibraryModule>>,
    search_paths: RwLock<Vec<PathBuf>>,
}

impl StaticEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the modules a script file at `(directory, file)` defines.
    ///
    /// Registering the same location twice replaces the earlier modules.
    pub fn register_script(
        &self,
        directory: impl AsRef<Path>,
        file: impl Into<String>,
        modules: Vec<ScriptModule>,
    ) {
        let key = (normalize(directory.as_ref()), file.into());
        self.scripts
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key, modules);
    }

    /// Register a loadable library.
    pub fn register_library(&self, library: LibraryModule) {
        self.libraries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(library.name.clone(), library);
    }

    /// Current library search path, in append order.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.search_paths
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl ScriptEvaluator for StaticEvaluator {
    fn load_script(&self, directory: &Path, file: &str) -> Result<Vec<LoadedModule>> {
        let key = (normalize(directory), file.to_string());
        let modules = {
            let scripts = self.scripts.read().unwrap_or_else(|p| p.into_inner());
            scripts.get(&key).cloned()
        };

        let modules = modules.ok_or_else(|| {
            ExMakeError::load(file, directory, "script not found")
        })?;

        let mut loaded = self.loaded.write().unwrap_or_else(|p| p.into_inner());
        let mut out = Vec::with_capacity(modules.len());
        for module in modules {
            debug!(module = module.identifier(), "evaluated script module");
            out.push(LoadedModule {
                module: module.identifier().to_string(),
                artifact: module.artifact(),
            });
            loaded.insert(module.identifier().to_string(), module);
        }
        Ok(out)
    }

    fn metadata(&self, module: &str) -> Result<ModuleMetadata> {
        let loaded = self.loaded.read().unwrap_or_else(|p| p.into_inner());
        loaded
            .get(module)
            .map(|m| m.metadata())
            .ok_or_else(|| ExMakeError::Script(format!("module '{module}' is not loaded")))
    }

    fn restore_module(&self, module: &str, _artifact: &[u8]) -> Result<()> {
        // Modules are compiled into the program; restoring means finding the
        // registered definition the artifact was produced from.
        let scripts = self.scripts.read().unwrap_or_else(|p| p.into_inner());
        let found = scripts
            .values()
            .flatten()
            .find(|m| m.identifier() == module)
            .cloned();
        drop(scripts);

        match found {
            Some(definition) => {
                self.loaded
                    .write()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(module.to_string(), definition);
                Ok(())
            }
            None => Err(ExMakeError::Cache(format!(
                "compiled module '{module}' has no registered definition"
            ))),
        }
    }

    fn resolve_recipe(&self, recipe: &RecipeRef) -> Option<Recipe> {
        let loaded = self.loaded.read().unwrap_or_else(|p| p.into_inner());
        loaded
            .get(&recipe.module)
            .and_then(|m| m.recipe(recipe.slot, recipe.index))
    }

    fn library(&self, name: &str) -> Result<LibraryModule> {
        let libraries = self.libraries.read().unwrap_or_else(|p| p.into_inner());
        libraries.get(name).cloned().ok_or_else(|| {
            ExMakeError::Script(format!("library '{name}' not found on the library path"))
        })
    }

    fn add_search_path(&self, dir: &Path) {
        let mut paths = self.search_paths.write().unwrap_or_else(|p| p.into_inner());
        if !paths.iter().any(|p| p == dir) {
            paths.push(dir.to_path_buf());
        }
    }
}

static GLOBAL: OnceLock<Arc<StaticEvaluator>> = OnceLock::new();

/// The process-wide evaluator registry used by the binary entry point.
pub fn global_evaluator() -> Arc<StaticEvaluator> {
    GLOBAL.get_or_init(|| Arc::new(StaticEvaluator::new())).clone()
}
