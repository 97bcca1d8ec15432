// src/script/mod.rs

//! Script metadata model and the evaluator seam.
//!
//! - [`model`] defines the per-script records the rest of the engine
//!   consumes: rule/task/fallback declarations, recipe references, library
//!   metadata, and the anchored rule records that end up in the graph.
//! - [`evaluator`] defines the contract with the script evaluator, plus the
//!   registry-backed implementation used by the binary and by tests.
//! - [`builder`] is the fluent API script modules are written against.

pub mod builder;
pub mod evaluator;
pub mod model;

pub use builder::ScriptModule;
pub use evaluator::{LoadedModule, ScriptEvaluator, StaticEvaluator};
pub use model::{
    Fallback, FallbackDecl, FileRule, LibraryInfo, LibraryModule, LibraryUse, ModuleMetadata,
    Recipe, RecipeRef, RecipeSlot, Rule, RuleDecl, ScriptRecord, SubScript, TaskDecl, TaskRule,
};

use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path: drop `.` components, collapse nothing else.
///
/// Rule paths are anchored by joining the script directory in front of them;
/// normalizing afterwards keeps `./foo.o` and `foo.o` naming the same vertex.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_cur_dir_components() {
        assert_eq!(normalize(Path::new("./foo.o")), PathBuf::from("foo.o"));
        assert_eq!(
            normalize(Path::new("./sub/./lib.a")),
            PathBuf::from("sub/lib.a")
        );
        assert_eq!(normalize(Path::new(".")), PathBuf::new());
    }
}
