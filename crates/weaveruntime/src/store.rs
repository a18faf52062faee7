//! In-memory execution history with optional JSON snapshots.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use weavecore::{Execution, ExecutionId, LogEntry, LogLevel, StoreError, WorkflowId};

const INTERRUPTED: &str = "Execution interrupted before completion";

/// Execution history and per-execution logs.
///
/// A single lock serializes every write, so concurrent node completions on
/// the same execution cannot lose updates.
pub struct ExecutionStore {
    inner: RwLock<StoreInner>,
    max_history: Option<usize>,
}

#[derive(Default, Serialize, Deserialize)]
struct StoreInner {
    /// Insertion order of execution ids
    order: Vec<ExecutionId>,
    executions: HashMap<ExecutionId, Execution>,
    logs: HashMap<ExecutionId, Vec<LogEntry>>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            max_history: None,
        }
    }

    /// Keep at most `max` executions, evicting the oldest first
    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = Some(max.max(1));
        self
    }

    /// Insert or update an execution.
    ///
    /// A record that already reached a terminal state is never replaced.
    pub async fn save(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        match inner.executions.get(&execution.id) {
            Some(existing) if existing.status.is_terminal() => {
                return Err(StoreError::TerminalExecution(execution.id));
            }
            Some(_) => {}
            None => inner.order.push(execution.id),
        }
        inner.executions.insert(execution.id, execution.clone());

        if let Some(max) = self.max_history {
            while inner.order.len() > max {
                let evicted = inner.order.remove(0);
                inner.executions.remove(&evicted);
                inner.logs.remove(&evicted);
                tracing::debug!("Evicted execution {} from history", evicted);
            }
        }
        Ok(())
    }

    pub async fn get(&self, id: ExecutionId) -> Result<Execution, StoreError> {
        self.inner
            .read()
            .await
            .executions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    /// All executions in insertion order
    pub async fn list_all(&self) -> Vec<Execution> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.executions.get(id).cloned())
            .collect()
    }

    pub async fn list_by_workflow(&self, workflow_id: WorkflowId) -> Vec<Execution> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.executions.get(id))
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every execution and log. Returns how many executions were removed.
    pub async fn clear_history(&self) -> usize {
        let mut inner = self.inner.write().await;
        let removed = inner.order.len();
        *inner = StoreInner::default();
        removed
    }

    /// Append to an execution's log. Ids that are no longer in the history
    /// (evicted or cleared mid-run) are ignored.
    pub async fn append_log(&self, execution_id: ExecutionId, entry: LogEntry) {
        let mut inner = self.inner.write().await;
        if !inner.executions.contains_key(&execution_id) {
            return;
        }
        inner.logs.entry(execution_id).or_default().push(entry);
    }

    pub async fn get_logs(&self, execution_id: ExecutionId) -> Result<Vec<LogEntry>, StoreError> {
        let inner = self.inner.read().await;
        if !inner.executions.contains_key(&execution_id) {
            return Err(StoreError::NotFound(execution_id));
        }
        Ok(inner.logs.get(&execution_id).cloned().unwrap_or_default())
    }

    /// Write the whole history to `path` as JSON
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let json = {
            let inner = self.inner.read().await;
            serde_json::to_vec_pretty(&*inner)?
        };
        tokio::fs::write(path.as_ref(), json).await?;
        tracing::info!("Saved execution history to {}", path.as_ref().display());
        Ok(())
    }

    /// Replace the in-memory history with the snapshot at `path`.
    ///
    /// Runs that were still pending or running when the snapshot was taken
    /// have no engine behind them after a reload; they come back `failed`.
    pub async fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<usize, StoreError> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let mut loaded: StoreInner = serde_json::from_slice(&bytes)?;
        let StoreInner {
            executions, logs, ..
        } = &mut loaded;
        for execution in executions.values_mut() {
            if execution.status.is_terminal() {
                continue;
            }
            execution.interrupt(INTERRUPTED);
            logs.entry(execution.id)
                .or_default()
                .push(LogEntry::new(LogLevel::Error, INTERRUPTED));
            tracing::warn!("Execution {} was interrupted before completing", execution.id);
        }
        let count = loaded.order.len();
        *self.inner.write().await = loaded;
        tracing::info!("Loaded {} executions from {}", count, path.as_ref().display());
        Ok(count)
    }
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use weavecore::{ExecutionStatus, ValueMap};

    fn execution(workflow_id: WorkflowId) -> Execution {
        Execution::new(workflow_id, ValueMap::new(), "tester")
    }

    #[tokio::test]
    async fn get_returns_what_was_saved() {
        let store = ExecutionStore::new();
        let mut exec = execution(Uuid::new_v4());
        exec.mark_running();
        exec.finish(ExecutionStatus::Completed, None);

        store.save(&exec).await.unwrap();
        assert_eq!(store.get(exec.id).await.unwrap(), exec);
    }

    #[tokio::test]
    async fn terminal_records_are_not_overwritten() {
        let store = ExecutionStore::new();
        let mut exec = execution(Uuid::new_v4());
        exec.finish(ExecutionStatus::Failed, Some("boom".into()));
        store.save(&exec).await.unwrap();

        let mut changed = exec.clone();
        changed.error_message = Some("rewritten".into());
        assert!(matches!(
            store.save(&changed).await,
            Err(StoreError::TerminalExecution(id)) if id == exec.id
        ));
        assert_eq!(
            store.get(exec.id).await.unwrap().error_message.as_deref(),
            Some("boom")
        );
    }

    #[tokio::test]
    async fn listing_keeps_insertion_order_and_filters() {
        let store = ExecutionStore::new();
        let wf_a = Uuid::new_v4();
        let wf_b = Uuid::new_v4();
        let first = execution(wf_a);
        let second = execution(wf_b);
        let third = execution(wf_a);
        for e in [&first, &second, &third] {
            store.save(e).await.unwrap();
        }

        let ids: Vec<_> = store.list_all().await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);

        let for_a: Vec<_> = store.list_by_workflow(wf_a).await.into_iter().map(|e| e.id).collect();
        assert_eq!(for_a, vec![first.id, third.id]);

        assert_eq!(store.clear_history().await, 3);
        assert!(store.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn retention_evicts_oldest() {
        let store = ExecutionStore::new().with_max_history(2);
        let wf = Uuid::new_v4();
        let oldest = execution(wf);
        store.save(&oldest).await.unwrap();
        store.save(&execution(wf)).await.unwrap();
        store.save(&execution(wf)).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert!(matches!(store.get(oldest.id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn logs_require_known_execution() {
        let store = ExecutionStore::new();
        let exec = execution(Uuid::new_v4());
        store.save(&exec).await.unwrap();
        store
            .append_log(exec.id, LogEntry::new(LogLevel::Info, "started"))
            .await;

        let logs = store.get_logs(exec.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "started");
        assert!(store.get_logs(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn logs_for_cleared_executions_are_dropped() {
        let store = ExecutionStore::new();
        let exec = execution(Uuid::new_v4());
        store.save(&exec).await.unwrap();
        store.clear_history().await;

        store
            .append_log(exec.id, LogEntry::new(LogLevel::Info, "late"))
            .await;
        assert!(store.inner.read().await.logs.is_empty());
    }

    #[tokio::test]
    async fn logs_for_evicted_executions_are_dropped() {
        let store = ExecutionStore::new().with_max_history(1);
        let wf = Uuid::new_v4();
        let evicted = execution(wf);
        store.save(&evicted).await.unwrap();
        store.save(&execution(wf)).await.unwrap();

        store
            .append_log(evicted.id, LogEntry::new(LogLevel::Info, "late"))
            .await;
        assert!(!store.inner.read().await.logs.contains_key(&evicted.id));
    }
}
