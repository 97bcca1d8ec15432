// src/script/model.rs

//! Data model for everything a script declares.
//!
//! Declarations (`RuleDecl`, `TaskDecl`, `FallbackDecl`) are what a module
//! surfaces before path anchoring; the graph builder turns them into the
//! anchored [`Rule`] records that become graph vertices and cache entries.
//! Recipes stay opaque throughout: a [`RecipeRef`] names a callable slot in
//! a loaded module and is resolved at job dispatch time.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Which declaration list of a module a recipe lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecipeSlot {
    Rule,
    Task,
    Fallback,
}

/// Opaque, serializable reference to a recipe in some loaded module.
///
/// The reference (not the callable) is what the graph cache persists; the
/// evaluator re-resolves it when the job is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipeRef {
    pub module: String,
    pub slot: RecipeSlot,
    pub index: usize,
}

impl fmt::Display for RecipeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:?}[{}]", self.module, self.slot, self.index)
    }
}

/// A resolved recipe callable, in one of the accepted argument shapes.
#[derive(Clone)]
pub enum Recipe {
    /// Rule recipe taking (sources, targets).
    Rule2(Arc<dyn Fn(&[PathBuf], &[PathBuf]) -> Result<()> + Send + Sync>),
    /// Rule recipe taking (sources, targets, directory).
    Rule3(Arc<dyn Fn(&[PathBuf], &[PathBuf], &std::path::Path) -> Result<()> + Send + Sync>),
    /// Task recipe taking (name, sources, directory).
    Task(Arc<dyn Fn(&str, &[PathBuf], &std::path::Path) -> Result<()> + Send + Sync>),
    /// Fallback recipe taking (directory) only.
    Fallback(Arc<dyn Fn(&std::path::Path) -> Result<()> + Send + Sync>),
}

impl fmt::Debug for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self {
            Recipe::Rule2(_) => "Rule2",
            Recipe::Rule3(_) => "Rule3",
            Recipe::Task(_) => "Task",
            Recipe::Fallback(_) => "Fallback",
        };
        write!(f, "Recipe::{shape}")
    }
}

/// A rule as declared, before path anchoring.
#[derive(Debug, Clone)]
pub struct RuleDecl {
    pub targets: Vec<String>,
    pub sources: Vec<String>,
    pub recipe: RecipeRef,
    pub line: u32,
}

/// A task as declared, before path anchoring.
#[derive(Debug, Clone)]
pub struct TaskDecl {
    pub name: String,
    pub sources: Vec<String>,
    pub recipe: RecipeRef,
    pub line: u32,
}

/// A fallback as declared.
#[derive(Debug, Clone)]
pub struct FallbackDecl {
    pub recipe: RecipeRef,
    pub line: u32,
}

/// A sub-directory inclusion: `{sub_dir, sub_file}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubScript {
    pub directory: String,
    pub file: String,
}

/// A library load request declared by a script.
#[derive(Debug, Clone)]
pub struct LibraryUse {
    pub name: String,
    pub args: Vec<String>,
    pub qualified: bool,
}

/// Everything a loaded module declares, as surfaced by the evaluator.
#[derive(Debug, Clone, Default)]
pub struct ModuleMetadata {
    pub rules: Vec<RuleDecl>,
    pub tasks: Vec<TaskDecl>,
    pub fallbacks: Vec<FallbackDecl>,
    pub manifest_entries: Vec<String>,
    pub sub_scripts: Vec<SubScript>,
    pub libraries: Vec<LibraryUse>,
}

/// One record per loaded script, produced by the loader facade.
#[derive(Debug, Clone)]
pub struct ScriptRecord {
    pub directory: PathBuf,
    pub file_name: String,
    pub module: String,
    pub artifact: Vec<u8>,
    pub rules: Vec<RuleDecl>,
    pub tasks: Vec<TaskDecl>,
    pub fallbacks: Vec<FallbackDecl>,
    pub manifest_entries: Vec<String>,
    pub sub_scripts: Vec<SubScript>,
    pub libraries: Vec<LibraryUse>,
}

impl ScriptRecord {
    /// Path of the script file itself, anchored under its directory.
    pub fn script_path(&self) -> PathBuf {
        super::normalize(&self.directory.join(&self.file_name))
    }
}

/// An anchored file rule: targets produced from sources by a recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRule {
    pub targets: Vec<PathBuf>,
    pub sources: Vec<PathBuf>,
    pub recipe: RecipeRef,
    pub directory: PathBuf,
}

/// An anchored task: a symbolic name rather than files; always stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRule {
    pub name: String,
    pub sources: Vec<PathBuf>,
    /// The subset of `sources` that do not name another task and therefore
    /// must exist as files on disk.
    pub real_sources: Vec<PathBuf>,
    pub recipe: RecipeRef,
    pub directory: PathBuf,
}

/// A fallback: runs only when a requested target cannot be resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fallback {
    pub recipe: RecipeRef,
    pub directory: PathBuf,
}

/// A graph vertex payload (and runner job payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Rule {
    File(FileRule),
    Task(TaskRule),
    Fallback(Fallback),
}

impl Rule {
    /// Human-readable label used in error messages and logs.
    pub fn label(&self) -> String {
        match self {
            Rule::File(r) => {
                let targets: Vec<String> = r
                    .targets
                    .iter()
                    .map(|t| t.display().to_string())
                    .collect();
                format!("[{}]", targets.join(", "))
            }
            Rule::Task(t) => format!("'{}'", t.name),
            Rule::Fallback(_) => "(fallback)".to_string(),
        }
    }

    pub fn recipe_ref(&self) -> &RecipeRef {
        match self {
            Rule::File(r) => &r.recipe,
            Rule::Task(t) => &t.recipe,
            Rule::Fallback(f) => &f.recipe,
        }
    }

    pub fn directory(&self) -> &std::path::Path {
        match self {
            Rule::File(r) => &r.directory,
            Rule::Task(t) => &t.directory,
            Rule::Fallback(f) => &f.directory,
        }
    }
}

/// Descriptive metadata a library module declares about itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryInfo {
    pub description: String,
    pub license: String,
    pub version: (u32, u32, u32),
    pub url: String,
    pub author: String,
}

/// `on_load(args, tail_args)` hook type.
pub type OnLoadFn = Arc<dyn Fn(&[String], &[String]) -> Result<()> + Send + Sync>;

/// A loadable library: metadata, an optional once-per-build hook, and the
/// OS environment variables it wants persisted ("precious").
#[derive(Clone)]
pub struct LibraryModule {
    pub name: String,
    pub info: LibraryInfo,
    pub on_load: Option<OnLoadFn>,
    pub precious: Vec<String>,
}

impl fmt::Debug for LibraryModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryModule")
            .field("name", &self.name)
            .field("info", &self.info)
            .field("on_load", &self.on_load.is_some())
            .field("precious", &self.precious)
            .finish()
    }
}

impl LibraryModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            info: LibraryInfo::default(),
            on_load: None,
            precious: Vec::new(),
        }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.info.description = text.into();
        self
    }

    pub fn license(mut self, text: impl Into<String>) -> Self {
        self.info.license = text.into();
        self
    }

    pub fn version(mut self, version: (u32, u32, u32)) -> Self {
        self.info.version = version;
        self
    }

    pub fn url(mut self, text: impl Into<String>) -> Self {
        self.info.url = text.into();
        self
    }

    pub fn author(mut self, text: impl Into<String>) -> Self {
        self.info.author = text.into();
        self
    }

    /// Install the hook executed once per build when the environment cache
    /// is stale.
    pub fn on_load<F>(mut self, hook: F) -> Self
    where
        F: Fn(&[String], &[String]) -> Result<()> + Send + Sync + 'static,
    {
        self.on_load = Some(Arc::new(hook));
        self
    }

    /// Mark an OS environment variable for inclusion in the configuration
    /// snapshot.
    pub fn precious(mut self, var: impl Into<String>) -> Self {
        self.precious.push(var.into());
        self
    }
}
