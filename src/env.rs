// src/env.rs

//! The script-authored environment table.
//!
//! A process-scoped mapping from string keys to either a single string or an
//! ordered list of strings. Recipes and libraries communicate through it, and
//! the cache store persists it across runs. Typed operations fail with an
//! `EnvError` when the existing value has the wrong shape; `put` always
//! overwrites.
//!
//! Shell-style expansion (`${KEY}`) over arbitrary text is a single
//! left-to-right pass and is not recursive; list values join with one space.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{ExMakeError, Result};

/// A value in the environment table: a string or an ordered list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Str(String),
    List(Vec<String>),
}

impl EnvValue {
    /// Render the value the way expansion sees it: lists join with a space.
    pub fn render(&self) -> String {
        match self {
            EnvValue::Str(s) => s.clone(),
            EnvValue::List(items) => items.join(" "),
        }
    }
}

/// The environment table proper.
///
/// The engine owns one global instance (see [`global`]); unit tests build
/// local tables.
#[derive(Debug, Default)]
pub struct EnvTable {
    entries: HashMap<String, EnvValue>,
}

impl EnvTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Set a string value, overwriting any previous value of either shape.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .insert(key.into(), EnvValue::Str(value.into()));
    }

    /// Fetch a string value. Fails if the key holds a list.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(EnvValue::Str(s)) => Ok(Some(s.clone())),
            Some(EnvValue::List(_)) => Err(ExMakeError::Env(format!(
                "'{key}' holds a list; use the list operations"
            ))),
        }
    }

    /// Remove a key of either shape.
    pub fn delete(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Append an element to a list value, creating the list if absent.
    pub fn list_append(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        match self.entries.entry(key.clone()).or_insert_with(|| EnvValue::List(Vec::new())) {
            EnvValue::List(items) => {
                items.push(value.into());
                Ok(())
            }
            EnvValue::Str(_) => Err(ExMakeError::Env(format!(
                "'{key}' holds a string; cannot append"
            ))),
        }
    }

    /// Prepend an element to a list value, creating the list if absent.
    pub fn list_prepend(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        match self.entries.entry(key.clone()).or_insert_with(|| EnvValue::List(Vec::new())) {
            EnvValue::List(items) => {
                items.insert(0, value.into());
                Ok(())
            }
            EnvValue::Str(_) => Err(ExMakeError::Env(format!(
                "'{key}' holds a string; cannot prepend"
            ))),
        }
    }

    /// Fetch a list value. Fails if the key holds a string.
    pub fn list_get(&self, key: &str) -> Result<Option<Vec<String>>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(EnvValue::List(items)) => Ok(Some(items.clone())),
            Some(EnvValue::Str(_)) => Err(ExMakeError::Env(format!(
                "'{key}' holds a string; use get"
            ))),
        }
    }

    /// Remove every element equal to `value` from a list.
    pub fn list_delete(&mut self, key: &str, value: &str) -> Result<()> {
        match self.entries.get_mut(key) {
            None => Ok(()),
            Some(EnvValue::List(items)) => {
                items.retain(|item| item != value);
                Ok(())
            }
            Some(EnvValue::Str(_)) => Err(ExMakeError::Env(format!(
                "'{key}' holds a string; cannot delete elements"
            ))),
        }
    }

    /// Remove every element matching `pattern` from a list.
    pub fn list_delete_regex(&mut self, key: &str, pattern: &str) -> Result<()> {
        let re = Regex::new(pattern)
            .map_err(|e| ExMakeError::Env(format!("invalid pattern '{pattern}': {e}")))?;
        match self.entries.get_mut(key) {
            None => Ok(()),
            Some(EnvValue::List(items)) => {
                items.retain(|item| !re.is_match(item));
                Ok(())
            }
            Some(EnvValue::Str(_)) => Err(ExMakeError::Env(format!(
                "'{key}' holds a string; cannot delete elements"
            ))),
        }
    }

    /// Fold over all entries. This is also what exposes the table to the
    /// shell expansion in [`EnvTable::expand`].
    pub fn reduce<T, F>(&self, init: T, mut f: F) -> T
    where
        F: FnMut(T, &str, &EnvValue) -> T,
    {
        let mut acc = init;
        for (key, value) in &self.entries {
            acc = f(acc, key, value);
        }
        acc
    }

    /// Expand every `${NAME}` occurrence whose `NAME` is a key in the table.
    ///
    /// One pass, left to right, not recursive; unknown names stay verbatim.
    pub fn expand(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.entries.get(name) {
                        Some(value) => out.push_str(&value.render()),
                        None => {
                            out.push_str("${");
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    // Unterminated reference; keep the remainder literally.
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }

        out.push_str(rest);
        out
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Owned copy of all entries, used by the cache store.
    pub fn snapshot(&self) -> HashMap<String, EnvValue> {
        self.entries.clone()
    }

    /// Replace the table contents wholesale, used by the cache store.
    pub fn restore(&mut self, entries: HashMap<String, EnvValue>) {
        self.entries = entries;
    }
}

static GLOBAL: OnceLock<RwLock<EnvTable>> = OnceLock::new();

/// The process-wide environment table shared by recipes, libraries and the
/// cache store. The table lives for the whole process.
pub fn global() -> &'static RwLock<EnvTable> {
    GLOBAL.get_or_init(|| RwLock::new(EnvTable::new()))
}

/// Expand `${KEY}` references in `text` against the global table.
pub fn expand(text: &str) -> String {
    global()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .expand(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip_and_delete() {
        let mut table = EnvTable::new();
        table.put("CC", "clang");
        assert_eq!(table.get("CC").unwrap(), Some("clang".to_string()));

        table.delete("CC");
        assert_eq!(table.get("CC").unwrap(), None);
    }

    #[test]
    fn typed_ops_reject_wrong_shape() {
        let mut table = EnvTable::new();
        table.put("CC", "clang");
        assert!(matches!(
            table.list_append("CC", "-O2"),
            Err(ExMakeError::Env(_))
        ));

        table.list_append("CFLAGS", "-Wall").unwrap();
        assert!(matches!(table.get("CFLAGS"), Err(ExMakeError::Env(_))));
    }

    #[test]
    fn list_append_prepend_order() {
        let mut table = EnvTable::new();
        table.list_append("CFLAGS", "-Wall").unwrap();
        table.list_append("CFLAGS", "-O2").unwrap();
        table.list_prepend("CFLAGS", "-g").unwrap();

        assert_eq!(
            table.list_get("CFLAGS").unwrap(),
            Some(vec!["-g".into(), "-Wall".into(), "-O2".into()])
        );
    }

    #[test]
    fn list_delete_by_value_and_regex() {
        let mut table = EnvTable::new();
        for flag in ["-Wall", "-Wextra", "-O2"] {
            table.list_append("CFLAGS", flag).unwrap();
        }

        table.list_delete("CFLAGS", "-O2").unwrap();
        table.list_delete_regex("CFLAGS", "^-Wex").unwrap();

        assert_eq!(
            table.list_get("CFLAGS").unwrap(),
            Some(vec!["-Wall".to_string()])
        );
    }

    #[test]
    fn expansion_joins_lists_and_keeps_unknown_keys() {
        let mut table = EnvTable::new();
        table.put("CC", "cc");
        table.list_append("CFLAGS", "-Wall").unwrap();
        table.list_append("CFLAGS", "-O2").unwrap();

        let out = table.expand("${CC} ${CFLAGS} -o ${OUT}");
        assert_eq!(out, "cc -Wall -O2 -o ${OUT}");
    }

    #[test]
    fn expansion_is_single_pass_and_not_recursive() {
        let mut table = EnvTable::new();
        table.put("A", "${B}");
        table.put("B", "deep");

        // `${A}` expands to the literal text `${B}`; no second pass runs.
        assert_eq!(table.expand("${A}"), "${B}");
    }

    #[test]
    fn expansion_keeps_unterminated_reference() {
        let table = EnvTable::new();
        assert_eq!(table.expand("tail ${OPEN"), "tail ${OPEN");
    }

    #[test]
    fn reduce_visits_every_entry() {
        let mut table = EnvTable::new();
        table.put("A", "1");
        table.list_append("B", "2").unwrap();

        let mut keys = table.reduce(Vec::new(), |mut acc, key, _| {
            acc.push(key.to_string());
            acc
        });
        keys.sort();
        assert_eq!(keys, vec!["A".to_string(), "B".to_string()]);
    }
}
