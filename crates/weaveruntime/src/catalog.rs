use std::collections::HashMap;
use tokio::sync::RwLock;
use weavecore::{Workflow, WorkflowId};

/// Registered workflow definitions, shared by the runtime and webhook ingress
#[derive(Default)]
pub struct WorkflowCatalog {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a workflow. Returns the previous definition, if any.
    pub async fn insert(&self, workflow: Workflow) -> Option<Workflow> {
        self.workflows.write().await.insert(workflow.id, workflow)
    }

    pub async fn get(&self, id: WorkflowId) -> Option<Workflow> {
        self.workflows.read().await.get(&id).cloned()
    }

    /// All workflows, sorted by name
    pub async fn list(&self) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> = self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        workflows
    }

    pub async fn remove(&self, id: WorkflowId) -> Option<Workflow> {
        self.workflows.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.workflows.read().await.len()
    }
}
