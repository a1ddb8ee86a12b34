use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use taskrelay_utils::StoreError;

use crate::model::{
    IterationOutput, IterationReview, IterationRun, WorkItem, WorkItemStatus, WorkItemUpdate,
};

/// Persistence for work items. Each call is one atomic write.
#[async_trait]
pub trait WorkItemStore: Send + Sync {
    async fn save_work_item(&self, item: &WorkItem) -> Result<(), StoreError>;

    /// Transition an item and return the updated record.
    ///
    /// Rejects transitions out of a terminal status.
    async fn update_work_item_status(
        &self,
        id: &str,
        status: WorkItemStatus,
        update: WorkItemUpdate,
    ) -> Result<WorkItem, StoreError>;
}

/// Persistence for iteration runs and their append-only outputs and reviews.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save_run(&self, run: &IterationRun) -> Result<(), StoreError>;

    /// Replace a run record. A run that is already terminal cannot change.
    async fn update_run(&self, run: &IterationRun) -> Result<(), StoreError>;

    async fn append_output(&self, output: &IterationOutput) -> Result<(), StoreError>;

    /// Fails with [`StoreError::Duplicate`] if `(run_id, iteration)` already has a review.
    async fn append_review(&self, review: &IterationReview) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    work_items: HashMap<String, WorkItem>,
    runs: HashMap<String, IterationRun>,
    outputs: Vec<IterationOutput>,
    reviews: Vec<IterationReview>,
}

/// In-process store used by the CLI and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    #[must_use]
    pub fn work_item(&self, id: &str) -> Option<WorkItem> {
        self.lock().ok()?.work_items.get(id).cloned()
    }

    /// All work items, oldest first.
    #[must_use]
    pub fn work_items(&self) -> Vec<WorkItem> {
        let mut items: Vec<WorkItem> = self
            .lock()
            .map(|state| state.work_items.values().cloned().collect())
            .unwrap_or_default();
        items.sort_by_key(|item| item.created_at);
        items
    }

    #[must_use]
    pub fn run(&self, id: &str) -> Option<IterationRun> {
        self.lock().ok()?.runs.get(id).cloned()
    }

    /// All runs, oldest first.
    #[must_use]
    pub fn runs(&self) -> Vec<IterationRun> {
        let mut runs: Vec<IterationRun> = self
            .lock()
            .map(|state| state.runs.values().cloned().collect())
            .unwrap_or_default();
        runs.sort_by_key(|run| run.started_at);
        runs
    }

    #[must_use]
    pub fn outputs(&self, run_id: &str) -> Vec<IterationOutput> {
        self.lock()
            .map(|state| {
                state
                    .outputs
                    .iter()
                    .filter(|o| o.run_id == run_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn reviews(&self, run_id: &str) -> Vec<IterationReview> {
        self.lock()
            .map(|state| {
                state
                    .reviews
                    .iter()
                    .filter(|r| r.run_id == run_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl WorkItemStore for MemoryStore {
    async fn save_work_item(&self, item: &WorkItem) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.work_items.contains_key(&item.id) {
            return Err(StoreError::Duplicate(item.id.clone()));
        }
        state.work_items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn update_work_item_status(
        &self,
        id: &str,
        status: WorkItemStatus,
        update: WorkItemUpdate,
    ) -> Result<WorkItem, StoreError> {
        let mut state = self.lock()?;
        let item = state
            .work_items
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if !item.status.can_transition_to(status) {
            return Err(StoreError::IllegalTransition {
                id: id.to_string(),
                from: item.status.to_string(),
                to: status.to_string(),
            });
        }

        item.apply(status, update);
        Ok(item.clone())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn save_run(&self, run: &IterationRun) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.runs.contains_key(&run.id) {
            return Err(StoreError::Duplicate(run.id.clone()));
        }
        state.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &IterationRun) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let existing = state
            .runs
            .get_mut(&run.id)
            .ok_or_else(|| StoreError::NotFound(run.id.clone()))?;

        if existing.status.is_terminal() {
            return Err(StoreError::IllegalTransition {
                id: run.id.clone(),
                from: existing.status.to_string(),
                to: run.status.to_string(),
            });
        }

        *existing = run.clone();
        Ok(())
    }

    async fn append_output(&self, output: &IterationOutput) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if !state.runs.contains_key(&output.run_id) {
            return Err(StoreError::NotFound(output.run_id.clone()));
        }
        if state.outputs.iter().any(|o| {
            o.run_id == output.run_id && o.iteration == output.iteration && o.role == output.role
        }) {
            return Err(StoreError::Duplicate(format!(
                "{} iteration {} {}",
                output.run_id,
                output.iteration,
                output.role.as_str()
            )));
        }
        state.outputs.push(output.clone());
        Ok(())
    }

    async fn append_review(&self, review: &IterationReview) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if !state.runs.contains_key(&review.run_id) {
            return Err(StoreError::NotFound(review.run_id.clone()));
        }
        if state
            .reviews
            .iter()
            .any(|r| r.run_id == review.run_id && r.iteration == review.iteration)
        {
            return Err(StoreError::Duplicate(format!(
                "{} iteration {} review",
                review.run_id, review.iteration
            )));
        }
        state.reviews.push(review.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OutputRole, RunStatus};
    use chrono::Utc;

    fn run(id: &str) -> IterationRun {
        IterationRun {
            id: id.to_string(),
            task: "write a haiku".to_string(),
            working_directory: None,
            worker_provider: "local".to_string(),
            worker_model: None,
            reviewer_provider: "claude".to_string(),
            reviewer_model: None,
            max_iterations: 3,
            iterations_used: None,
            session_key: None,
            status: RunStatus::Running,
            final_output: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn review(run_id: &str, iteration: u32) -> IterationReview {
        IterationReview {
            run_id: run_id.to_string(),
            iteration,
            approved: false,
            feedback: "more".to_string(),
            score: None,
            model: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_work_item_lifecycle() {
        let store = MemoryStore::new();
        let item = WorkItem::new("ollama", Some("llama3".into()), "hello");
        store.save_work_item(&item).await.unwrap();

        store
            .update_work_item_status(&item.id, WorkItemStatus::Processing, WorkItemUpdate::default())
            .await
            .unwrap();
        let done = store
            .update_work_item_status(
                &item.id,
                WorkItemStatus::Completed,
                WorkItemUpdate::completed("hi", 5),
            )
            .await
            .unwrap();
        assert_eq!(done.status, WorkItemStatus::Completed);
        assert_eq!(store.work_item(&item.id).unwrap().response.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_terminal_work_item_is_immutable() {
        let store = MemoryStore::new();
        let item = WorkItem::new("ollama", None, "hello");
        store.save_work_item(&item).await.unwrap();
        store
            .update_work_item_status(&item.id, WorkItemStatus::Processing, WorkItemUpdate::default())
            .await
            .unwrap();
        store
            .update_work_item_status(&item.id, WorkItemStatus::Completed, WorkItemUpdate::default())
            .await
            .unwrap();

        let result = store
            .update_work_item_status(&item.id, WorkItemStatus::Failed, WorkItemUpdate::default())
            .await;
        match result {
            Err(StoreError::IllegalTransition { from, to, .. }) => {
                assert_eq!(from, "completed");
                assert_eq!(to, "failed");
            }
            other => panic!("Expected IllegalTransition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_unknown_item() {
        let store = MemoryStore::new();
        let result = store
            .update_work_item_status("nope", WorkItemStatus::Processing, WorkItemUpdate::default())
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_review_unique_per_iteration() {
        let store = MemoryStore::new();
        store.save_run(&run("r1")).await.unwrap();

        store.append_review(&review("r1", 1)).await.unwrap();
        store.append_review(&review("r1", 2)).await.unwrap();
        let dup = store.append_review(&review("r1", 1)).await;
        assert!(matches!(dup, Err(StoreError::Duplicate(_))));
        assert_eq!(store.reviews("r1").len(), 2);
    }

    #[tokio::test]
    async fn test_output_one_per_role_per_iteration() {
        let store = MemoryStore::new();
        store.save_run(&run("r1")).await.unwrap();
        let output = IterationOutput {
            run_id: "r1".to_string(),
            iteration: 1,
            role: OutputRole::Worker,
            content: "draft".to_string(),
            model: None,
            tokens_used: 3,
            created_at: Utc::now(),
        };
        store.append_output(&output).await.unwrap();
        store
            .append_output(&IterationOutput {
                role: OutputRole::Reviewer,
                ..output.clone()
            })
            .await
            .unwrap();
        assert!(matches!(
            store.append_output(&output).await,
            Err(StoreError::Duplicate(_))
        ));
        assert_eq!(store.outputs("r1").len(), 2);
    }

    #[tokio::test]
    async fn test_run_has_single_terminal_transition() {
        let store = MemoryStore::new();
        let mut r = run("r1");
        store.save_run(&r).await.unwrap();

        r.finish(RunStatus::Completed, 1, Some("done".into()), None);
        store.update_run(&r).await.unwrap();

        r.status = RunStatus::Failed;
        assert!(matches!(
            store.update_run(&r).await,
            Err(StoreError::IllegalTransition { .. })
        ));
        assert_eq!(store.run("r1").unwrap().status, RunStatus::Completed);
    }
}
