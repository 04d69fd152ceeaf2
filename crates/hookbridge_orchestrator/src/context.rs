//! Context merging (§4.7.5): the three strategies a Plan declares for
//! folding a Phase's emitted Context into the one its successor sees.

use chrono::Utc;
use hookbridge_protocol::{Context, MergeStrategy};
use std::collections::HashMap;

/// Merge `next` into `base` per `strategy`, returning the Context the
/// following Phase (or Loop iteration, or Chain step) will see.
pub fn merge(strategy: MergeStrategy, base: &Context, next: &Context) -> Context {
    match strategy {
        MergeStrategy::Sequential => merge_sequential(base, next),
        MergeStrategy::Cumulative => merge_cumulative(base, next),
        MergeStrategy::Selective => merge_selective(base, next),
    }
}

fn merge_sequential(base: &Context, next: &Context) -> Context {
    let mut metadata = base.metadata.clone();
    for (k, v) in &next.metadata {
        metadata.insert(k.clone(), v.clone());
    }
    let flags = union(&base.flags, &next.flags);
    let scope = union(&base.scope, &next.scope);
    Context {
        command: next.command.clone(),
        flags,
        scope,
        metadata,
        timestamp: base.timestamp.max(next.timestamp),
    }
}

fn merge_cumulative(base: &Context, next: &Context) -> Context {
    let flags = union(&base.flags, &next.flags);
    let scope = union(&base.scope, &next.scope);
    let mut metadata = base.metadata.clone();
    for (k, v) in &next.metadata {
        metadata.insert(k.clone(), v.clone());
    }
    Context {
        command: next.command.clone(),
        flags,
        scope,
        metadata,
        timestamp: Utc::now(),
    }
}

fn merge_selective(base: &Context, next: &Context) -> Context {
    let mut flags = base.flags.clone();
    for f in &next.flags {
        if f.contains("critical") || f.contains("important") {
            if !flags.contains(f) {
                flags.push(f.clone());
            }
        }
    }
    let mut metadata: HashMap<String, serde_json::Value> = base.metadata.clone();
    for (k, v) in &next.metadata {
        if k.contains("result") || k.contains("status") || k.contains("metric") {
            metadata.insert(k.clone(), v.clone());
        }
    }
    Context {
        command: next.command.clone(),
        flags,
        scope: base.scope.clone(),
        metadata,
        timestamp: base.timestamp.max(next.timestamp),
    }
}

fn union(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = a.to_vec();
    for item in b {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// Bounded history of Context snapshots for a Plan (default cap 100),
/// restorable by snapshot id (§4.7.5).
pub struct ContextHistory {
    snapshots: Vec<Context>,
    cap: usize,
}

impl Default for ContextHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ContextHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            snapshots: Vec::new(),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, context: Context) -> usize {
        if self.snapshots.len() >= self.cap {
            self.snapshots.remove(0);
        }
        self.snapshots.push(context);
        self.snapshots.len() - 1
    }

    pub fn get(&self, id: usize) -> Option<&Context> {
        self.snapshots.get(id)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(command: &str, flags: &[&str], metadata: &[(&str, serde_json::Value)]) -> Context {
        Context {
            command: command.to_string(),
            flags: flags.iter().map(|s| s.to_string()).collect(),
            scope: vec![],
            metadata: metadata.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn sequential_overwrites_metadata_and_unions_flags() {
        let base = ctx("scan", &["a"], &[("x", serde_json::json!(1))]);
        let next = ctx("scan", &["b"], &[("x", serde_json::json!(2))]);
        let merged = merge(MergeStrategy::Sequential, &base, &next);
        assert_eq!(merged.metadata.get("x"), Some(&serde_json::json!(2)));
        assert_eq!(merged.flags, vec!["a", "b"]);
    }

    #[test]
    fn cumulative_unions_across_every_context() {
        let base = ctx("scan", &["a", "b"], &[]);
        let next = ctx("scan", &["b", "c"], &[]);
        let merged = merge(MergeStrategy::Cumulative, &base, &next);
        assert_eq!(merged.flags, vec!["a", "b", "c"]);
    }

    #[test]
    fn selective_keeps_only_critical_flags_and_result_metadata() {
        let base = ctx("scan", &[], &[]);
        let next = ctx(
            "scan",
            &["critical_path", "debug_noisy"],
            &[("result_code", serde_json::json!(0)), ("scratch_buffer", serde_json::json!("x"))],
        );
        let merged = merge(MergeStrategy::Selective, &base, &next);
        assert_eq!(merged.flags, vec!["critical_path"]);
        assert!(merged.metadata.contains_key("result_code"));
        assert!(!merged.metadata.contains_key("scratch_buffer"));
    }

    #[test]
    fn history_bounds_to_capacity() {
        let mut history = ContextHistory::new(3);
        for i in 0..5 {
            history.push(ctx(&format!("cmd{i}"), &[], &[]));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.get(0).unwrap().command, "cmd2");
    }
}
