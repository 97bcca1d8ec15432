// src/script/builder.rs

//! Fluent builder for script modules.
//!
//! A script module accumulates rule, task and fallback declarations together
//! with their recipes, plus manifest additions, sub-directory inclusions and
//! library load requests. The engine only ever sees the declaration side
//! (through [`ScriptModule::metadata`]); recipes are handed out one at a
//! time when a [`RecipeRef`] is resolved.

use std::panic::Location;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::errors::Result;
use crate::script::model::{
    FallbackDecl, LibraryUse, ModuleMetadata, Recipe, RecipeRef, RecipeSlot, RuleDecl, SubScript,
    TaskDecl,
};

#[derive(Clone)]
struct RuleEntry {
    decl: RuleDecl,
    recipe: Recipe,
}

#[derive(Clone)]
struct TaskEntry {
    decl: TaskDecl,
    recipe: Recipe,
}

#[derive(Clone)]
struct FallbackEntry {
    decl: FallbackDecl,
    recipe: Recipe,
}

/// One script module under construction (or registered).
#[derive(Clone)]
pub struct ScriptModule {
    module: String,
    rules: Vec<RuleEntry>,
    tasks: Vec<TaskEntry>,
    fallbacks: Vec<FallbackEntry>,
    manifest_entries: Vec<String>,
    sub_scripts: Vec<SubScript>,
    libraries: Vec<LibraryUse>,
}

/// Compact descriptor persisted as the module's compiled artifact.
#[derive(Serialize)]
struct ArtifactDescriptor<'a> {
    module: &'a str,
    rules: usize,
    tasks: usize,
    fallbacks: usize,
}

impl ScriptModule {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            rules: Vec::new(),
            tasks: Vec::new(),
            fallbacks: Vec::new(),
            manifest_entries: Vec::new(),
            sub_scripts: Vec::new(),
            libraries: Vec::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.module
    }

    /// Declare a rule whose recipe takes (sources, targets).
    #[track_caller]
    pub fn rule<T, S, F>(mut self, targets: T, sources: S, recipe: F) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
        F: Fn(&[std::path::PathBuf], &[std::path::PathBuf]) -> Result<()> + Send + Sync + 'static,
    {
        let line = Location::caller().line();
        let decl = RuleDecl {
            targets: targets.into_iter().map(Into::into).collect(),
            sources: sources.into_iter().map(Into::into).collect(),
            recipe: self.next_ref(RecipeSlot::Rule),
            line,
        };
        self.rules.push(RuleEntry {
            decl,
            recipe: Recipe::Rule2(Arc::new(recipe)),
        });
        self
    }

    /// Declare a rule whose recipe takes (sources, targets, directory).
    #[track_caller]
    pub fn rule_with_dir<T, S, F>(mut self, targets: T, sources: S, recipe: F) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
        F: Fn(&[std::path::PathBuf], &[std::path::PathBuf], &Path) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        let line = Location::caller().line();
        let decl = RuleDecl {
            targets: targets.into_iter().map(Into::into).collect(),
            sources: sources.into_iter().map(Into::into).collect(),
            recipe: self.next_ref(RecipeSlot::Rule),
            line,
        };
        self.rules.push(RuleEntry {
            decl,
            recipe: Recipe::Rule3(Arc::new(recipe)),
        });
        self
    }

    /// Declare a named task; its recipe takes (name, sources, directory).
    #[track_caller]
    pub fn task<S, F>(mut self, name: impl Into<String>, sources: S, recipe: F) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        F: Fn(&str, &[std::path::PathBuf], &Path) -> Result<()> + Send + Sync + 'static,
    {
        let line = Location::caller().line();
        let decl = TaskDecl {
            name: name.into(),
            sources: sources.into_iter().map(Into::into).collect(),
            recipe: self.next_ref(RecipeSlot::Task),
            line,
        };
        self.tasks.push(TaskEntry {
            decl,
            recipe: Recipe::Task(Arc::new(recipe)),
        });
        self
    }

    /// Declare a fallback; its recipe takes (directory) only.
    #[track_caller]
    pub fn fallback<F>(mut self, recipe: F) -> Self
    where
        F: Fn(&Path) -> Result<()> + Send + Sync + 'static,
    {
        let line = Location::caller().line();
        let decl = FallbackDecl {
            recipe: self.next_ref(RecipeSlot::Fallback),
            line,
        };
        self.fallbacks.push(FallbackEntry {
            decl,
            recipe: Recipe::Fallback(Arc::new(recipe)),
        });
        self
    }

    /// Add a file whose modification invalidates the build cache.
    pub fn manifest(mut self, path: impl Into<String>) -> Self {
        self.manifest_entries.push(path.into());
        self
    }

    /// Include `Exmakefile` from a sub-directory.
    pub fn recurse(self, sub_dir: impl Into<String>) -> Self {
        self.recurse_file(sub_dir, "Exmakefile")
    }

    /// Include a named script file from a sub-directory.
    pub fn recurse_file(mut self, sub_dir: impl Into<String>, file: impl Into<String>) -> Self {
        self.sub_scripts.push(SubScript {
            directory: sub_dir.into(),
            file: file.into(),
        });
        self
    }

    /// Request a library load; its exports join the script namespace.
    pub fn library<A>(mut self, name: impl Into<String>, args: A) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
    {
        self.libraries.push(LibraryUse {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
            qualified: false,
        });
        self
    }

    /// Request a library load with qualified access only.
    pub fn library_qualified<A>(mut self, name: impl Into<String>, args: A) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
    {
        self.libraries.push(LibraryUse {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
            qualified: true,
        });
        self
    }

    /// Declaration view of the module, as the loader consumes it.
    pub fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            rules: self.rules.iter().map(|e| e.decl.clone()).collect(),
            tasks: self.tasks.iter().map(|e| e.decl.clone()).collect(),
            fallbacks: self.fallbacks.iter().map(|e| e.decl.clone()).collect(),
            manifest_entries: self.manifest_entries.clone(),
            sub_scripts: self.sub_scripts.clone(),
            libraries: self.libraries.clone(),
        }
    }

    /// Resolve a recipe slot into its callable.
    pub fn recipe(&self, slot: RecipeSlot, index: usize) -> Option<Recipe> {
        match slot {
            RecipeSlot::Rule => self.rules.get(index).map(|e| e.recipe.clone()),
            RecipeSlot::Task => self.tasks.get(index).map(|e| e.recipe.clone()),
            RecipeSlot::Fallback => self.fallbacks.get(index).map(|e| e.recipe.clone()),
        }
    }

    /// The module's compiled artifact, persisted verbatim by the cache.
    pub fn artifact(&self) -> Vec<u8> {
        let descriptor = ArtifactDescriptor {
            module: &self.module,
            rules: self.rules.len(),
            tasks: self.tasks.len(),
            fallbacks: self.fallbacks.len(),
        };
        // Serialization of a plain descriptor cannot fail.
        serde_json::to_vec(&descriptor).unwrap_or_default()
    }

    fn next_ref(&self, slot: RecipeSlot) -> RecipeRef {
        let index = match slot {
            RecipeSlot::Rule => self.rules.len(),
            RecipeSlot::Task => self.tasks.len(),
            RecipeSlot::Fallback => self.fallbacks.len(),
        };
        RecipeRef {
            module: self.module.clone(),
            slot,
            index,
        }
    }
}
