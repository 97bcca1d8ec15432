// src/cache.rs

//! On-disk cache of everything a run computes that the next run can reuse:
//! the dependency graph, the environment table, compiled script artifacts,
//! stored fallbacks, the invalidation manifest, and the configuration
//! snapshot (tail arguments plus precious environment variables).
//!
//! Layout under the cache directory (default `.exmake/`):
//! `vertices.dag`, `edges.dag`, `neighbors.dag`, `table.env`,
//! `manifest.lst`, `config.env`, `config.arg`, `fallbacks.dag`, and one
//! `<ModuleIdentifier>.<suffix>` file per compiled script module.
//!
//! Staleness is purely timestamp-driven: the cache is stale when the newest
//! manifest entry is newer than the oldest cache file. Missing files count
//! as epoch-old.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::env::{EnvTable, EnvValue};
use crate::errors::{ExMakeError, Result};
use crate::graph::{DepGraph, GraphSnapshot};
use crate::script::{Fallback, Rule, ScriptEvaluator, ScriptRecord};

/// Default cache directory, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = ".exmake";

const VERTICES_FILE: &str = "vertices.dag";
const EDGES_FILE: &str = "edges.dag";
const NEIGHBORS_FILE: &str = "neighbors.dag";
const TABLE_FILE: &str = "table.env";
const MANIFEST_FILE: &str = "manifest.lst";
const CONFIG_ENV_FILE: &str = "config.env";
const CONFIG_ARG_FILE: &str = "config.arg";
const FALLBACKS_FILE: &str = "fallbacks.dag";

const FIXED_FILES: &[&str] = &[
    VERTICES_FILE,
    EDGES_FILE,
    NEIGHBORS_FILE,
    TABLE_FILE,
    MANIFEST_FILE,
    CONFIG_ENV_FILE,
    CONFIG_ARG_FILE,
    FALLBACKS_FILE,
];

/// Persistence operations keyed by one cache directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn default_location() -> Self {
        Self::new(DEFAULT_CACHE_DIR)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            ExMakeError::Cache(format!(
                "cannot create cache directory {}: {e}",
                self.dir.display()
            ))
        })
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        self.ensure_dir()?;
        let path = self.path(name);
        let bytes = serde_json::to_vec(value)
            .map_err(|e| ExMakeError::Cache(format!("cannot encode {name}: {e}")))?;
        fs::write(&path, bytes)
            .map_err(|e| ExMakeError::Cache(format!("cannot write {}: {e}", path.display())))
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.path(name);
        let bytes = fs::read(&path)
            .map_err(|e| ExMakeError::Cache(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ExMakeError::Cache(format!("cannot decode {}: {e}", path.display())))
    }

    /// Persist the adjacency tables of the dependency graph.
    pub fn save_graph(&self, graph: &DepGraph) -> Result<()> {
        let snapshot = graph.snapshot();
        self.write_json(VERTICES_FILE, &snapshot.vertices)?;
        self.write_json(EDGES_FILE, &snapshot.edges)?;
        self.write_json(NEIGHBORS_FILE, &snapshot.neighbors)?;
        debug!(vertices = snapshot.vertices.len(), "saved dependency graph");
        Ok(())
    }

    /// Reconstruct a semantically identical graph from the cache.
    pub fn load_graph(&self) -> Result<DepGraph> {
        let snapshot = GraphSnapshot {
            vertices: self.read_json::<Vec<(u64, Rule)>>(VERTICES_FILE)?,
            edges: self.read_json::<Vec<(u64, u64)>>(EDGES_FILE)?,
            neighbors: self.read_json::<Vec<(u64, Vec<u64>)>>(NEIGHBORS_FILE)?,
        };
        DepGraph::from_snapshot(snapshot)
    }

    /// Persist the environment table. A synthetic `EXMAKE_STAMP` entry is
    /// refreshed on every save so the file always differs across saves.
    pub fn save_env(&self, table: &mut EnvTable) -> Result<()> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos().to_string())
            .unwrap_or_default();
        table.put("EXMAKE_STAMP", stamp);
        self.write_json(TABLE_FILE, &table.snapshot())
    }

    /// Restore the environment table, discarding the in-memory contents.
    pub fn load_env(&self, table: &mut EnvTable) -> Result<()> {
        let entries: HashMap<String, EnvValue> = self.read_json(TABLE_FILE)?;
        table.clear();
        table.restore(entries);
        Ok(())
    }

    /// Persist every compiled script artifact verbatim.
    pub fn save_mods(
        &self,
        evaluator: &dyn ScriptEvaluator,
        records: &[ScriptRecord],
    ) -> Result<()> {
        self.ensure_dir()?;
        for record in records {
            let name = format!("{}.{}", record.module, evaluator.artifact_suffix());
            let path = self.path(&name);
            fs::write(&path, &record.artifact).map_err(|e| {
                ExMakeError::Cache(format!("cannot write {}: {e}", path.display()))
            })?;
        }
        Ok(())
    }

    /// Reload every persisted artifact into the evaluator.
    pub fn load_mods(&self, evaluator: &dyn ScriptEvaluator) -> Result<()> {
        let suffix = format!(".{}", evaluator.artifact_suffix());
        for path in self.artifact_paths(&suffix)? {
            let module = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(&suffix))
                .unwrap_or_default()
                .to_string();
            let bytes = fs::read(&path).map_err(|e| {
                ExMakeError::Cache(format!("cannot read {}: {e}", path.display()))
            })?;
            evaluator.restore_module(&module, &bytes)?;
            debug!(module, "restored compiled module from cache");
        }
        Ok(())
    }

    fn artifact_paths(&self, suffix: &str) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ExMakeError::Cache(format!(
                    "cannot list cache directory {}: {e}",
                    self.dir.display()
                )))
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(suffix))
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Append paths to the invalidation manifest, deduplicating while
    /// keeping first-seen order.
    pub fn append_manifest(&self, paths: &[PathBuf]) -> Result<()> {
        let mut entries = self.manifest_list().unwrap_or_default();
        for path in paths {
            if !entries.contains(path) {
                entries.push(path.clone());
            }
        }

        self.ensure_dir()?;
        let mut text = String::new();
        for entry in &entries {
            text.push_str(&entry.display().to_string());
            text.push('\n');
        }
        let path = self.path(MANIFEST_FILE);
        fs::write(&path, text)
            .map_err(|e| ExMakeError::Cache(format!("cannot write {}: {e}", path.display())))
    }

    /// The current manifest, one path per line.
    pub fn manifest_list(&self) -> Result<Vec<PathBuf>> {
        let path = self.path(MANIFEST_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ExMakeError::Cache(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };
        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(PathBuf::from)
            .collect())
    }

    /// Persist the tail arguments and the precious environment variables so
    /// staleness-triggered reruns see the values the user configured with.
    pub fn save_config(&self, tail_args: &[String], precious: &[String]) -> Result<()> {
        self.write_json(CONFIG_ARG_FILE, &tail_args.to_vec())?;

        let mut vars: HashMap<String, String> = HashMap::new();
        for name in precious {
            if let Ok(value) = std::env::var(name) {
                vars.insert(name.clone(), value);
            }
        }
        self.write_json(CONFIG_ENV_FILE, &vars)
    }

    /// Restore the configuration snapshot.
    pub fn load_config(&self) -> Result<(Vec<String>, HashMap<String, String>)> {
        let args: Vec<String> = self.read_json(CONFIG_ARG_FILE)?;
        let vars: HashMap<String, String> = self.read_json(CONFIG_ENV_FILE)?;
        Ok((args, vars))
    }

    pub fn has_config(&self) -> bool {
        self.path(CONFIG_ARG_FILE).is_file() && self.path(CONFIG_ENV_FILE).is_file()
    }

    /// Persist the entry script's fallbacks.
    pub fn save_fallbacks(&self, fallbacks: &[Fallback]) -> Result<()> {
        self.write_json(FALLBACKS_FILE, &fallbacks.to_vec())
    }

    pub fn load_fallbacks(&self) -> Result<Vec<Fallback>> {
        self.read_json(FALLBACKS_FILE)
    }

    /// Whether the cache must be rebuilt: the manifest is empty, or the
    /// newest manifest entry is newer than the oldest cache file (compiled
    /// artifacts included). Missing files count as epoch-old.
    pub fn is_stale(&self) -> bool {
        let manifest = self.manifest_list().unwrap_or_default();
        if manifest.is_empty() {
            return true;
        }

        let newest_input = manifest
            .iter()
            .map(|p| mtime(p))
            .max()
            .unwrap_or(UNIX_EPOCH);

        let mut cache_files: Vec<PathBuf> =
            FIXED_FILES.iter().map(|name| self.path(name)).collect();
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if !cache_files.contains(&path) {
                    cache_files.push(path);
                }
            }
        }

        let oldest_cache = cache_files
            .iter()
            .map(|p| mtime(p))
            .min()
            .unwrap_or(UNIX_EPOCH);

        newest_input > oldest_cache
    }

    /// Remove every cache file and artifact.
    pub fn clear(&self) -> Result<()> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(ExMakeError::Cache(format!(
                    "cannot list cache directory {}: {e}",
                    self.dir.display()
                )))
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_file() {
                fs::remove_file(&path).map_err(|e| {
                    ExMakeError::Cache(format!("cannot remove {}: {e}", path.display()))
                })?;
            }
        }
        info!(dir = %self.dir.display(), "cache cleared");
        Ok(())
    }
}

/// Modification time of a file, epoch when absent or unreadable.
pub fn mtime(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(UNIX_EPOCH)
}
