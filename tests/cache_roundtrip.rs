// tests/cache_roundtrip.rs
//
// The cache store must round-trip everything it persists: graph, environment
// table, fallbacks, manifest, configuration snapshot and compiled modules.
// Stores here are keyed by absolute scratch directories, so no working
// directory games are needed.

use std::path::PathBuf;
use std::time::Duration;

use exmake::cache::CacheStore;
use exmake::env::EnvTable;
use exmake::graph::DepGraph;
use exmake::script::{
    Fallback, FileRule, RecipeRef, RecipeSlot, Rule, ScriptEvaluator, ScriptModule, ScriptRecord,
    StaticEvaluator, TaskRule,
};

fn store() -> (tempfile::TempDir, CacheStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path().join(".exmake"));
    (dir, store)
}

fn recipe_ref(slot: RecipeSlot, index: usize) -> RecipeRef {
    RecipeRef {
        module: "Cache.Exmakefile".to_string(),
        slot,
        index,
    }
}

fn sample_graph() -> DepGraph {
    let mut graph = DepGraph::new();
    let object = graph.add_vertex(Rule::File(FileRule {
        targets: vec![PathBuf::from("foo.o")],
        sources: vec![PathBuf::from("foo.c")],
        recipe: recipe_ref(RecipeSlot::Rule, 0),
        directory: PathBuf::from("."),
    }));
    let all = graph.add_vertex(Rule::Task(TaskRule {
        name: "all".to_string(),
        sources: vec![PathBuf::from("foo.o")],
        real_sources: vec![PathBuf::from("foo.o")],
        recipe: recipe_ref(RecipeSlot::Task, 0),
        directory: PathBuf::from("."),
    }));
    graph.add_edge(all, object).unwrap();
    graph
}

#[test]
fn graph_save_load_is_isomorphic() {
    let (_dir, store) = store();
    let graph = sample_graph();
    store.save_graph(&graph).unwrap();

    let reloaded = store.load_graph().unwrap();
    assert_eq!(reloaded.vertex_count(), 2);

    let object = reloaded.find_target("foo.o").unwrap();
    let all = reloaded.find_target("all").unwrap();
    assert_eq!(reloaded.leaves(), vec![object]);

    // The task still depends on the object file.
    let pruned = reloaded.prune_to(all);
    assert_eq!(pruned.vertex_count(), 2);

    match reloaded.rule(all) {
        Some(Rule::Task(task)) => assert_eq!(task.real_sources, vec![PathBuf::from("foo.o")]),
        other => panic!("expected the task vertex, got {other:?}"),
    }
}

#[test]
fn env_save_load_discards_old_state_and_stamps() {
    let (_dir, store) = store();

    let mut table = EnvTable::new();
    table.put("CC", "clang");
    table.list_append("CFLAGS", "-Wall").unwrap();
    store.save_env(&mut table).unwrap();
    assert!(table.get("EXMAKE_STAMP").unwrap().is_some());

    let mut other = EnvTable::new();
    other.put("LEFTOVER", "stale value");
    store.load_env(&mut other).unwrap();

    assert_eq!(other.get("LEFTOVER").unwrap(), None);
    assert_eq!(other.get("CC").unwrap(), Some("clang".to_string()));
    assert_eq!(
        other.list_get("CFLAGS").unwrap(),
        Some(vec!["-Wall".to_string()])
    );
}

#[test]
fn env_saves_differ_across_invocations() {
    let (dir, store) = store();

    let mut table = EnvTable::new();
    store.save_env(&mut table).unwrap();
    let first = std::fs::read(dir.path().join(".exmake/table.env")).unwrap();

    store.save_env(&mut table).unwrap();
    let second = std::fs::read(dir.path().join(".exmake/table.env")).unwrap();

    assert_ne!(first, second);
}

#[test]
fn fallbacks_roundtrip() {
    let (_dir, store) = store();
    let fallbacks = vec![Fallback {
        recipe: recipe_ref(RecipeSlot::Fallback, 0),
        directory: PathBuf::from("."),
    }];
    store.save_fallbacks(&fallbacks).unwrap();

    let reloaded = store.load_fallbacks().unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0].recipe, fallbacks[0].recipe);
}

#[test]
fn manifest_appends_deduplicate_and_end_with_newline() {
    let (dir, store) = store();

    store
        .append_manifest(&[PathBuf::from("Exmakefile"), PathBuf::from("sub/Exmakefile")])
        .unwrap();
    store
        .append_manifest(&[PathBuf::from("Exmakefile"), PathBuf::from("extra.cfg")])
        .unwrap();

    let entries = store.manifest_list().unwrap();
    assert_eq!(
        entries,
        vec![
            PathBuf::from("Exmakefile"),
            PathBuf::from("sub/Exmakefile"),
            PathBuf::from("extra.cfg"),
        ]
    );

    let text = std::fs::read_to_string(dir.path().join(".exmake/manifest.lst")).unwrap();
    assert!(text.ends_with('\n'));
}

#[test]
fn config_snapshot_keeps_only_present_variables() {
    let (_dir, store) = store();
    std::env::set_var("EXMAKE_CACHE_TEST_SET", "value");

    store
        .save_config(
            &["--flavor".to_string(), "debug".to_string()],
            &[
                "EXMAKE_CACHE_TEST_SET".to_string(),
                "EXMAKE_CACHE_TEST_UNSET".to_string(),
            ],
        )
        .unwrap();
    assert!(store.has_config());

    let (args, vars) = store.load_config().unwrap();
    assert_eq!(args, vec!["--flavor".to_string(), "debug".to_string()]);
    assert_eq!(
        vars.get("EXMAKE_CACHE_TEST_SET").map(String::as_str),
        Some("value")
    );
    assert!(!vars.contains_key("EXMAKE_CACHE_TEST_UNSET"));
}

#[test]
fn staleness_follows_manifest_timestamps() {
    let (dir, store) = store();

    // No manifest at all: stale.
    assert!(store.is_stale());

    // Write the input first, then a complete cache: fresh.
    let input = dir.path().join("Exmakefile");
    std::fs::write(&input, "# input\n").unwrap();

    store.save_graph(&sample_graph()).unwrap();
    store.save_env(&mut EnvTable::new()).unwrap();
    store.save_fallbacks(&[]).unwrap();
    store.save_config(&[], &[]).unwrap();
    store.append_manifest(&[input.clone()]).unwrap();
    assert!(!store.is_stale());

    // Touch the input: stale again.
    std::thread::sleep(Duration::from_millis(120));
    std::fs::write(&input, "# modified input\n").unwrap();
    assert!(store.is_stale());
}

#[test]
fn clear_removes_every_cache_file() {
    let (dir, store) = store();
    store.save_graph(&sample_graph()).unwrap();
    store.save_env(&mut EnvTable::new()).unwrap();

    store.clear().unwrap();

    let remaining: Vec<_> = std::fs::read_dir(dir.path().join(".exmake"))
        .map(|entries| entries.filter_map(|e| e.ok()).collect())
        .unwrap_or_default();
    assert!(remaining.is_empty());
    assert!(store.is_stale());

    // Clearing a cache that never existed is fine too.
    let absent = CacheStore::new(dir.path().join("no-such-cache"));
    absent.clear().unwrap();
}

#[test]
fn compiled_modules_roundtrip_through_the_evaluator() {
    let (dir, store) = store();

    let evaluator = StaticEvaluator::new();
    let module = ScriptModule::new("Cache.Exmakefile").task("all", [] as [&str; 0], |_, _, _| Ok(()));
    evaluator.register_script(".", "Exmakefile", vec![module]);

    let loaded = evaluator
        .load_script(std::path::Path::new("."), "Exmakefile")
        .unwrap();
    let record = ScriptRecord {
        directory: PathBuf::from("."),
        file_name: "Exmakefile".to_string(),
        module: loaded[0].module.clone(),
        artifact: loaded[0].artifact.clone(),
        rules: vec![],
        tasks: vec![],
        fallbacks: vec![],
        manifest_entries: vec![],
        sub_scripts: vec![],
        libraries: vec![],
    };
    store.save_mods(&evaluator, &[record]).unwrap();

    let artifact = dir.path().join(".exmake/Cache.Exmakefile.mod");
    assert!(artifact.is_file());

    // A fresh evaluator with the same registrations restores from the
    // artifact files alone.
    let restored = StaticEvaluator::new();
    restored.register_script(
        ".",
        "Exmakefile",
        vec![ScriptModule::new("Cache.Exmakefile").task("all", [] as [&str; 0], |_, _, _| Ok(()))],
    );
    store.load_mods(&restored).unwrap();

    let recipe = restored.resolve_recipe(&recipe_ref(RecipeSlot::Task, 0));
    assert!(recipe.is_some());
}
