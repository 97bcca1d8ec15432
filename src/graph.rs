// src/graph.rs

//! The dependency graph and its builder.
//!
//! Each vertex owns exactly one rule or task record; an edge `u -> v` means
//! producing `u`'s outputs requires `v`'s outputs first. Cycles are rejected
//! at edge-insertion time, so a constructed graph is always acyclic.
//!
//! The persisted form is an opaque [`GraphSnapshot`]; callers never see the
//! backing tables.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ExMakeError, Result};
use crate::script::{normalize, Rule, ScriptRecord, TaskRule};
use crate::timing::TimedPass;

/// Processing status of a vertex while a build is driving the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexStatus {
    Pending,
    Processing,
}

/// Serializable, implementation-opaque form of a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub vertices: Vec<(u64, Rule)>,
    pub edges: Vec<(u64, u64)>,
    /// Outgoing adjacency per vertex; redundant with `edges` but part of the
    /// persisted layout and verified on load.
    pub neighbors: Vec<(u64, Vec<u64>)>,
}

/// Acyclic directed dependency graph.
#[derive(Debug, Default)]
pub struct DepGraph {
    inner: StableDiGraph<Rule, ()>,
    status: HashMap<NodeIndex, VertexStatus>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, rule: Rule) -> NodeIndex {
        let ix = self.inner.add_node(rule);
        self.status.insert(ix, VertexStatus::Pending);
        ix
    }

    /// Insert `from -> to`. Fails without committing when the edge would
    /// close a cycle; duplicate edges are ignored.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) -> std::result::Result<(), ()> {
        if from == to || has_path_connecting(&self.inner, to, from, None) {
            return Err(());
        }
        if self.inner.find_edge(from, to).is_none() {
            self.inner.add_edge(from, to, ());
        }
        Ok(())
    }

    pub fn rule(&self, ix: NodeIndex) -> Option<&Rule> {
        self.inner.node_weight(ix)
    }

    pub fn status(&self, ix: NodeIndex) -> Option<VertexStatus> {
        self.status.get(&ix).copied()
    }

    pub fn mark_processing(&mut self, ix: NodeIndex) {
        if let Some(status) = self.status.get_mut(&ix) {
            *status = VertexStatus::Processing;
        }
    }

    /// Remove a completed vertex together with its edges.
    pub fn remove_vertex(&mut self, ix: NodeIndex) {
        self.inner.remove_node(ix);
        self.status.remove(&ix);
    }

    pub fn vertex_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    /// All vertices in stable index order.
    pub fn vertices(&self) -> Vec<NodeIndex> {
        self.inner.node_indices().collect()
    }

    /// Vertices with no outgoing edges, in stable index order.
    pub fn leaves(&self) -> Vec<NodeIndex> {
        self.inner
            .node_indices()
            .filter(|&ix| {
                self.inner
                    .neighbors_directed(ix, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .collect()
    }

    /// Leaves that have not been handed to the coordinator yet.
    pub fn pending_leaves(&self) -> Vec<NodeIndex> {
        self.leaves()
            .into_iter()
            .filter(|ix| self.status(*ix) == Some(VertexStatus::Pending))
            .collect()
    }

    /// Find the vertex producing `name`: a rule with a matching target, or a
    /// task with a matching name.
    pub fn find_target(&self, name: &str) -> Option<NodeIndex> {
        let wanted = normalize(std::path::Path::new(name));
        self.inner.node_indices().find(|&ix| {
            match &self.inner[ix] {
                Rule::File(rule) => rule.targets.iter().any(|t| t.as_path() == wanted.as_path()),
                Rule::Task(task) => std::path::Path::new(&task.name) == wanted.as_path(),
                Rule::Fallback(_) => false,
            }
        })
    }

    /// Restrict the graph to the vertices reachable from `root`.
    pub fn prune_to(&self, root: NodeIndex) -> DepGraph {
        let mut keep: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();
        queue.push_back(root);

        while let Some(ix) = queue.pop_front() {
            if !keep.insert(ix) {
                continue;
            }
            for next in self.inner.neighbors_directed(ix, Direction::Outgoing) {
                queue.push_back(next);
            }
        }

        let mut pruned = DepGraph::new();
        let mut mapping: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        for ix in self.inner.node_indices().filter(|ix| keep.contains(ix)) {
            mapping.insert(ix, pruned.add_vertex(self.inner[ix].clone()));
        }
        for ix in self.inner.node_indices().filter(|ix| keep.contains(ix)) {
            for next in self.inner.neighbors_directed(ix, Direction::Outgoing) {
                // Edges between kept vertices cannot introduce cycles.
                let _ = pruned.add_edge(mapping[&ix], mapping[&next]);
            }
        }
        pruned
    }

    /// Opaque persisted form.
    pub fn snapshot(&self) -> GraphSnapshot {
        let vertices: Vec<(u64, Rule)> = self
            .inner
            .node_indices()
            .map(|ix| (ix.index() as u64, self.inner[ix].clone()))
            .collect();

        let edges: Vec<(u64, u64)> = self
            .inner
            .edge_indices()
            .filter_map(|e| self.inner.edge_endpoints(e))
            .map(|(a, b)| (a.index() as u64, b.index() as u64))
            .collect();

        let neighbors: Vec<(u64, Vec<u64>)> = self
            .inner
            .node_indices()
            .map(|ix| {
                let out: Vec<u64> = self
                    .inner
                    .neighbors_directed(ix, Direction::Outgoing)
                    .map(|n| n.index() as u64)
                    .collect();
                (ix.index() as u64, out)
            })
            .collect();

        GraphSnapshot {
            vertices,
            edges,
            neighbors,
        }
    }

    /// Rebuild a graph from its persisted form.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        let mut graph = DepGraph::new();
        let mut mapping: HashMap<u64, NodeIndex> = HashMap::new();

        for (id, rule) in snapshot.vertices {
            mapping.insert(id, graph.add_vertex(rule));
        }

        for (from, to) in &snapshot.edges {
            let (from_ix, to_ix) = match (mapping.get(from), mapping.get(to)) {
                (Some(a), Some(b)) => (*a, *b),
                _ => {
                    return Err(ExMakeError::Cache(format!(
                        "cached graph edge {from} -> {to} references a missing vertex"
                    )))
                }
            };
            graph.add_edge(from_ix, to_ix).map_err(|_| {
                ExMakeError::Cache(format!("cached graph edge {from} -> {to} closes a cycle"))
            })?;
        }

        for (id, out) in &snapshot.neighbors {
            if !mapping.contains_key(id) || out.iter().any(|n| !mapping.contains_key(n)) {
                return Err(ExMakeError::Cache(
                    "cached graph adjacency references a missing vertex".to_string(),
                ));
            }
        }

        Ok(graph)
    }
}

/// Build the merged, validated graph from the flattened script records.
///
/// The passes run in a fixed order; each returns its wall time so the driver
/// can feed a timing session.
pub fn build(records: &[ScriptRecord]) -> Result<(DepGraph, Vec<TimedPass>)> {
    let mut passes = Vec::new();

    let started = Instant::now();
    validate_declarations(records)?;
    passes.push(TimedPass {
        name: "validate declarations".into(),
        elapsed: started.elapsed(),
    });

    let started = Instant::now();
    let (rules, tasks) = anchor_paths(records);
    passes.push(TimedPass {
        name: "anchor paths".into(),
        elapsed: started.elapsed(),
    });

    let started = Instant::now();
    check_uniqueness(&rules, &tasks)?;
    passes.push(TimedPass {
        name: "check uniqueness".into(),
        elapsed: started.elapsed(),
    });

    let started = Instant::now();
    let tasks = resolve_real_sources(tasks);
    passes.push(TimedPass {
        name: "resolve task sources".into(),
        elapsed: started.elapsed(),
    });

    let started = Instant::now();
    let graph = insert_vertices_and_edges(rules, tasks)?;
    passes.push(TimedPass {
        name: "insert vertices and edges".into(),
        elapsed: started.elapsed(),
    });

    debug!(
        vertices = graph.vertex_count(),
        "dependency graph constructed"
    );
    Ok((graph, passes))
}

fn validate_declarations(records: &[ScriptRecord]) -> Result<()> {
    for record in records {
        let script = record.script_path();
        for rule in &record.rules {
            if rule.targets.is_empty() || rule.targets.iter().any(|t| t.is_empty()) {
                return Err(ExMakeError::Script(format!(
                    "{}:{}: rule targets must be a non-empty list of paths",
                    script.display(),
                    rule.line
                )));
            }
            if rule.sources.iter().any(|s| s.is_empty()) {
                return Err(ExMakeError::Script(format!(
                    "{}:{}: rule sources must be a list of paths",
                    script.display(),
                    rule.line
                )));
            }
        }
        for task in &record.tasks {
            if task.name.is_empty() {
                return Err(ExMakeError::Script(format!(
                    "{}:{}: task name must be a non-empty string",
                    script.display(),
                    task.line
                )));
            }
            if task.sources.iter().any(|s| s.is_empty()) {
                return Err(ExMakeError::Script(format!(
                    "{}:{}: task sources must be a list of paths",
                    script.display(),
                    task.line
                )));
            }
        }
    }
    Ok(())
}

/// Prefix every source, target and task name with its script's directory.
fn anchor_paths(records: &[ScriptRecord]) -> (Vec<crate::script::FileRule>, Vec<TaskRule>) {
    let mut rules = Vec::new();
    let mut tasks = Vec::new();

    for record in records {
        let dir = &record.directory;
        for decl in &record.rules {
            rules.push(crate::script::FileRule {
                targets: decl.targets.iter().map(|t| normalize(&dir.join(t))).collect(),
                sources: decl.sources.iter().map(|s| normalize(&dir.join(s))).collect(),
                recipe: decl.recipe.clone(),
                directory: dir.clone(),
            });
        }
        for decl in &record.tasks {
            let name = normalize(&dir.join(&decl.name)).display().to_string();
            tasks.push(TaskRule {
                name,
                sources: decl.sources.iter().map(|s| normalize(&dir.join(s))).collect(),
                real_sources: Vec::new(),
                recipe: decl.recipe.clone(),
                directory: dir.clone(),
            });
        }
    }

    (rules, tasks)
}

fn check_uniqueness(rules: &[crate::script::FileRule], tasks: &[TaskRule]) -> Result<()> {
    let mut targets: HashSet<&std::path::Path> = HashSet::new();
    for rule in rules {
        for target in &rule.targets {
            if !targets.insert(target.as_path()) {
                return Err(ExMakeError::Script(format!(
                    "Multiple rules mention target '{}'",
                    target.display()
                )));
            }
        }
    }

    let mut names: HashSet<&str> = HashSet::new();
    for task in tasks {
        if targets.contains(std::path::Path::new(&task.name)) || !names.insert(&task.name) {
            return Err(ExMakeError::Script(format!(
                "Task name '{}' conflicts with a rule",
                task.name
            )));
        }
    }

    Ok(())
}

/// `real_sources` is the subset of a task's sources that do not name another
/// task, i.e. that must exist as files on disk.
fn resolve_real_sources(mut tasks: Vec<TaskRule>) -> Vec<TaskRule> {
    let names: HashSet<String> = tasks.iter().map(|t| t.name.clone()).collect();
    for task in &mut tasks {
        task.real_sources = task
            .sources
            .iter()
            .filter(|s| !names.contains(&s.display().to_string()))
            .cloned()
            .collect();
    }
    tasks
}

fn insert_vertices_and_edges(
    rules: Vec<crate::script::FileRule>,
    tasks: Vec<TaskRule>,
) -> Result<DepGraph> {
    let mut graph = DepGraph::new();
    let mut producers: HashMap<String, NodeIndex> = HashMap::new();

    for rule in rules {
        let targets = rule.targets.clone();
        let ix = graph.add_vertex(Rule::File(rule));
        for target in targets {
            producers.insert(target.display().to_string(), ix);
        }
    }
    for task in tasks {
        let name = task.name.clone();
        let ix = graph.add_vertex(Rule::Task(task));
        producers.insert(name, ix);
    }

    for u in graph.vertices() {
        let sources: Vec<String> = match graph.rule(u) {
            Some(Rule::File(r)) => r.sources.iter().map(|s| s.display().to_string()).collect(),
            Some(Rule::Task(t)) => t.sources.iter().map(|s| s.display().to_string()).collect(),
            _ => Vec::new(),
        };

        for source in sources {
            let Some(&v) = producers.get(&source) else {
                // A plain file dependency; its existence is checked when the
                // rule runs.
                continue;
            };

            let u_is_file = matches!(graph.rule(u), Some(Rule::File(_)));
            if u_is_file {
                if let Some(Rule::Task(task)) = graph.rule(v) {
                    let label = graph.rule(u).map(|r| r.label()).unwrap_or_default();
                    return Err(ExMakeError::Script(format!(
                        "Rule {} depends on task '{}'",
                        label, task.name
                    )));
                }
            }

            if graph.add_edge(u, v).is_err() {
                let from = graph.rule(u).map(|r| r.label()).unwrap_or_default();
                let to = graph.rule(v).map(|r| r.label()).unwrap_or_default();
                return Err(ExMakeError::Script(format!(
                    "Cyclic dependency detected between rule {from} and rule {to}"
                )));
            }
        }
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{RecipeRef, RecipeSlot};

    fn recipe_ref(index: usize) -> RecipeRef {
        RecipeRef {
            module: "Test.Exmakefile".into(),
            slot: RecipeSlot::Rule,
            index,
        }
    }

    fn file_rule(targets: &[&str], sources: &[&str]) -> Rule {
        Rule::File(crate::script::FileRule {
            targets: targets.iter().copied().map(std::path::PathBuf::from).collect(),
            sources: sources.iter().copied().map(std::path::PathBuf::from).collect(),
            recipe: recipe_ref(0),
            directory: ".".into(),
        })
    }

    #[test]
    fn edge_insertion_rejects_cycles_without_committing() {
        let mut graph = DepGraph::new();
        let a = graph.add_vertex(file_rule(&["a"], &["b"]));
        let b = graph.add_vertex(file_rule(&["b"], &["a"]));

        graph.add_edge(a, b).unwrap();
        assert!(graph.add_edge(b, a).is_err());
        assert!(graph.add_edge(a, a).is_err());

        // The failed insert left the graph untouched.
        assert_eq!(graph.leaves(), vec![b]);
    }

    #[test]
    fn prune_keeps_only_reachable_vertices() {
        let mut graph = DepGraph::new();
        let a = graph.add_vertex(file_rule(&["a"], &["b"]));
        let b = graph.add_vertex(file_rule(&["b"], &[]));
        let _c = graph.add_vertex(file_rule(&["c"], &[]));
        graph.add_edge(a, b).unwrap();

        let pruned = graph.prune_to(a);
        assert_eq!(pruned.vertex_count(), 2);
        assert!(pruned.find_target("a").is_some());
        assert!(pruned.find_target("b").is_some());
        assert!(pruned.find_target("c").is_none());
    }

    #[test]
    fn snapshot_roundtrip_is_isomorphic() {
        let mut graph = DepGraph::new();
        let a = graph.add_vertex(file_rule(&["a"], &["b"]));
        let b = graph.add_vertex(file_rule(&["b"], &[]));
        graph.add_edge(a, b).unwrap();

        let reloaded = DepGraph::from_snapshot(graph.snapshot()).unwrap();
        assert_eq!(reloaded.vertex_count(), 2);
        let a2 = reloaded.find_target("a").unwrap();
        let b2 = reloaded.find_target("b").unwrap();
        assert_eq!(reloaded.leaves(), vec![b2]);
        assert_ne!(a2, b2);
    }

    #[test]
    fn pending_leaves_skip_processing_vertices() {
        let mut graph = DepGraph::new();
        let a = graph.add_vertex(file_rule(&["a"], &[]));
        let b = graph.add_vertex(file_rule(&["b"], &[]));

        graph.mark_processing(a);
        assert_eq!(graph.pending_leaves(), vec![b]);
    }
}
