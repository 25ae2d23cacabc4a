//! Execution-context registry: metadata about created contexts plus a
//! bounded history of cleanup operations.
//!
//! The registry is independent of the run path. One-shot contexts remove
//! themselves after a clean teardown, so anything left here points at a
//! context that outlived its invocation (crashed process, interrupted
//! teardown) and is a candidate for force-cleanup.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Cleanup operations retained for inspection.
const MAX_CLEANUP_OPS: usize = 100;

/// Metadata for one created execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRecord {
    /// Registry id; the container name is derived from it.
    pub id: String,
    /// Free-form label supplied by the caller (empty when unlabeled).
    pub label: String,
    /// Image the context was created from.
    pub image: String,
    pub created_at: DateTime<Utc>,
}

/// One recorded force-cleanup pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupOp {
    pub requested_at: DateTime<Utc>,
    /// Human-readable description of the filter that was applied.
    pub filter: String,
    /// Ids removed by this pass.
    pub removed: Vec<String>,
}

#[derive(Default)]
struct RegistryInner {
    contexts: Vec<ContextRecord>,
    cleanup_ops: VecDeque<CleanupOp>,
}

/// In-memory registry of execution contexts.
#[derive(Default)]
pub struct ContextRegistry {
    inner: RwLock<RegistryInner>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly created context.
    pub fn record(&self, record: ContextRecord) {
        self.inner.write().contexts.push(record);
    }

    /// Drop a context after clean teardown. Returns whether it was present.
    pub fn forget(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        let before = inner.contexts.len();
        inner.contexts.retain(|c| c.id != id);
        inner.contexts.len() < before
    }

    /// List contexts, optionally restricted to a label.
    pub fn list(&self, label: Option<&str>) -> Vec<ContextRecord> {
        let inner = self.inner.read();
        inner
            .contexts
            .iter()
            .filter(|c| label.is_none_or(|l| c.label == l))
            .cloned()
            .collect()
    }

    /// Remove every context matching the filter and return the removed ids.
    pub fn remove_matching(&self, label: Option<&str>, older_than: Option<Duration>) -> Vec<String> {
        let cutoff = older_than.and_then(|age| {
            Utc::now().checked_sub_signed(chrono::Duration::from_std(age).ok()?)
        });
        let mut inner = self.inner.write();
        let mut removed = Vec::new();
        inner.contexts.retain(|c| {
            let label_hit = label.is_none_or(|l| c.label == l);
            let age_hit = cutoff.is_none_or(|cut| c.created_at < cut);
            if label_hit && age_hit {
                removed.push(c.id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Append a cleanup operation, keeping the history bounded.
    pub fn log_cleanup(&self, op: CleanupOp) {
        let mut inner = self.inner.write();
        inner.cleanup_ops.push_back(op);
        while inner.cleanup_ops.len() > MAX_CLEANUP_OPS {
            inner.cleanup_ops.pop_front();
        }
    }

    /// Recorded cleanup operations, oldest first.
    pub fn cleanup_history(&self) -> Vec<CleanupOp> {
        self.inner.read().cleanup_ops.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
