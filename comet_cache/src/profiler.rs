//! Cache profiling bookkeeping.
//!
//! When enabled, the coordinator records every PUT/PUT_GPU/GET in two
//! structures: a nested counter keyed function → parameter → kind tag →
//! key, and a per-function append-only list of keys accessed on GET, used
//! to infer reuse patterns. Profiling state persists across evictions.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

type KindCounts = HashMap<String, HashMap<String, u64>>;

/// Profiling state owned by the coordinator.
#[derive(Debug, Default)]
pub struct Profiler {
    /// function → parameter → kind tag → key → count
    operations: HashMap<String, HashMap<String, KindCounts>>,
    /// function → keys accessed, in order
    access_log: HashMap<String, Vec<String>>,
}

impl Profiler {
    /// Fresh, empty profiler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an insertion.
    pub fn record_put(&mut self, function: &str, parameter: &str, kind_tag: &str, key: &str) {
        self.bump(function, parameter, kind_tag, key);
    }

    /// Record a retrieval, including the per-function access list.
    pub fn record_get(&mut self, function: &str, parameter: &str, kind_tag: &str, key: &str) {
        self.bump(function, parameter, kind_tag, key);
        self.access_log
            .entry(function.to_string())
            .or_default()
            .push(key.to_string());
    }

    fn bump(&mut self, function: &str, parameter: &str, kind_tag: &str, key: &str) {
        let count = self
            .operations
            .entry(function.to_string())
            .or_default()
            .entry(parameter.to_string())
            .or_default()
            .entry(kind_tag.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert(0);
        *count += 1;
    }

    /// Recorded count for a specific cell, zero when absent.
    pub fn count(&self, function: &str, parameter: &str, kind_tag: &str, key: &str) -> u64 {
        self.operations
            .get(function)
            .and_then(|p| p.get(parameter))
            .and_then(|k| k.get(kind_tag))
            .and_then(|c| c.get(key))
            .copied()
            .unwrap_or(0)
    }

    /// Ordered key accesses recorded for a function.
    pub fn accesses(&self, function: &str) -> &[String] {
        self.access_log
            .get(function)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Human-readable summary of the recorded counters.
    pub fn report(&self) -> String {
        let mut out = String::from("cache profiler report\n");
        let mut functions: Vec<_> = self.operations.keys().collect();
        functions.sort();
        for function in functions {
            out.push_str(&format!("function {function}\n"));
            let parameters = &self.operations[function];
            let mut parameter_names: Vec<_> = parameters.keys().collect();
            parameter_names.sort();
            for parameter in parameter_names {
                for (kind, keys) in &parameters[parameter] {
                    let mut key_names: Vec<_> = keys.keys().collect();
                    key_names.sort();
                    for key in key_names {
                        out.push_str(&format!(
                            "  {parameter} {kind} {key}: {}\n",
                            keys[key]
                        ));
                    }
                }
            }
            let accesses = self.accesses(function);
            if !accesses.is_empty() {
                out.push_str(&format!("  access order: {}\n", accesses.join(" ")));
            }
        }
        out
    }

    /// Write the report into the log directory. Returns the file path.
    pub fn write_report(&self, log_dir: &Path) -> std::io::Result<PathBuf> {
        let path = log_dir.join("cache_profiler.txt");
        let mut file = std::fs::File::create(&path)?;
        file.write_all(self.report().as_bytes())?;
        Ok(path)
    }
}
