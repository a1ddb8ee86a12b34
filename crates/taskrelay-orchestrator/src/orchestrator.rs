use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use taskrelay_config::DEFAULT_MAX_ITERATIONS;
use taskrelay_dispatch::{DispatchError, DispatchOptions, Dispatcher};
use taskrelay_records::{
    IterationOutput, IterationReview, IterationRun, OutputRole, RunStatus, RunStore, WorkItem,
};
use taskrelay_utils::{EventSink, LifecycleEvent, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RunError;
use crate::prompts::{fitted_review_prompt, worker_prompt};
use crate::review::{ReviewVerdict, parse_review};

/// What to iterate on, and with whom.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationTask {
    pub task: String,
    pub working_directory: Option<PathBuf>,
    pub worker_provider: String,
    pub worker_model: Option<String>,
    pub reviewer_provider: String,
    pub reviewer_model: Option<String>,
    pub max_iterations: u32,
    /// Opaque key grouping worker calls into one provider-side session
    pub session_key: Option<String>,
}

impl IterationTask {
    #[must_use]
    pub fn new(
        task: impl Into<String>,
        worker_provider: impl Into<String>,
        reviewer_provider: impl Into<String>,
    ) -> Self {
        Self {
            task: task.into(),
            working_directory: None,
            worker_provider: worker_provider.into(),
            worker_model: None,
            reviewer_provider: reviewer_provider.into(),
            reviewer_model: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            session_key: None,
        }
    }

    #[must_use]
    pub fn with_models(mut self, worker: Option<String>, reviewer: Option<String>) -> Self {
        self.worker_model = worker;
        self.reviewer_model = reviewer;
        self
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub fn with_working_directory(mut self, dir: Option<PathBuf>) -> Self {
        self.working_directory = dir;
        self
    }

    #[must_use]
    pub fn with_session_key(mut self, key: Option<String>) -> Self {
        self.session_key = key;
        self
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cancel: Option<CancellationToken>,
    /// Dispatch to unhealthy providers instead of failing the run
    pub allow_unhealthy: bool,
}

impl RunOptions {
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Drives the bounded worker/reviewer loop.
///
/// Steps inside a run are strictly sequential: the reviewer sees the
/// worker's output and the next worker call sees the reviewer's feedback.
pub struct Orchestrator {
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn RunStore>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Mutable state of one run
struct RunState {
    run: IterationRun,
    feedback: Option<String>,
    last_output: Option<String>,
}

impl Orchestrator {
    /// Lifecycle events go to the dispatcher's sink.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, store: Arc<dyn RunStore>) -> Self {
        let events = dispatcher.events();
        Self {
            dispatcher,
            store,
            events,
        }
    }

    /// Run the loop until approval or `max_iterations`.
    ///
    /// Returns the run in state `Completed` or `MaxIterationsReached`.
    ///
    /// # Errors
    ///
    /// - [`RunError::InvalidTask`] for an empty task or `max_iterations == 0`
    /// - [`RunError::Failed`] when a worker or reviewer dispatch fails
    ///   (including cancellation); the run is stored as `Failed` first
    /// - [`RunError::Store`] when the run store rejects a write
    pub async fn run(&self, task: IterationTask, opts: &RunOptions) -> Result<IterationRun, RunError> {
        if task.task.trim().is_empty() {
            return Err(RunError::InvalidTask("task is empty".to_string()));
        }
        if task.max_iterations == 0 {
            return Err(RunError::InvalidTask(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        let run = IterationRun {
            id: uuid::Uuid::new_v4().to_string(),
            task: task.task.clone(),
            working_directory: task.working_directory.clone(),
            worker_provider: task.worker_provider.clone(),
            worker_model: task.worker_model.clone(),
            reviewer_provider: task.reviewer_provider.clone(),
            reviewer_model: task.reviewer_model.clone(),
            max_iterations: task.max_iterations,
            iterations_used: None,
            session_key: task.session_key.clone(),
            status: RunStatus::Running,
            final_output: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.store.save_run(&run).await?;
        self.events.emit(LifecycleEvent::RunStarted {
            run_id: run.id.clone(),
            max_iterations: task.max_iterations,
        });

        let mut state = RunState {
            run,
            feedback: None,
            last_output: None,
        };

        for iteration in 1..=task.max_iterations {
            match self.iterate(&task, opts, &mut state, iteration).await {
                Ok(verdict) if verdict.approved => {
                    let output = state.last_output.take();
                    return self
                        .finish(state.run, RunStatus::Completed, iteration, output)
                        .await;
                }
                Ok(verdict) => state.feedback = Some(verdict.feedback),
                Err(IterationFailure::Dispatch(source)) => {
                    return Err(self.fail(state.run, iteration, source).await);
                }
                Err(IterationFailure::Store(e)) => {
                    return Err(self.abort_on_store(state.run, iteration, e).await);
                }
            }
        }

        let output = state.last_output.take();
        self.finish(
            state.run,
            RunStatus::MaxIterationsReached,
            task.max_iterations,
            output,
        )
        .await
    }

    /// One worker → reviewer → verdict step.
    async fn iterate(
        &self,
        task: &IterationTask,
        opts: &RunOptions,
        state: &mut RunState,
        iteration: u32,
    ) -> Result<ReviewVerdict, IterationFailure> {
        let run_id = state.run.id.clone();
        self.events.emit(LifecycleEvent::IterationStarted {
            run_id: run_id.clone(),
            iteration,
        });

        let prompt = worker_prompt(&task.task, state.feedback.as_deref());
        let worker = self
            .dispatcher
            .dispatch(
                &task.worker_provider,
                &prompt,
                task.worker_model.as_deref(),
                &self.dispatch_options(task, opts, &run_id, iteration, OutputRole::Worker),
            )
            .await
            .map_err(IterationFailure::Dispatch)?;

        let output = worker.response.clone().unwrap_or_default();
        self.record_output(&run_id, iteration, OutputRole::Worker, &worker, &prompt)
            .await?;
        state.last_output = Some(output.clone());

        let reviewer_hint = task
            .reviewer_model
            .as_deref()
            .unwrap_or(task.reviewer_provider.as_str());
        let review_prompt =
            fitted_review_prompt(self.dispatcher.tokens(), reviewer_hint, &task.task, &output);
        let reviewer = self
            .dispatcher
            .dispatch(
                &task.reviewer_provider,
                &review_prompt,
                task.reviewer_model.as_deref(),
                &self.dispatch_options(task, opts, &run_id, iteration, OutputRole::Reviewer),
            )
            .await
            .map_err(IterationFailure::Dispatch)?;

        self.record_output(&run_id, iteration, OutputRole::Reviewer, &reviewer, &review_prompt)
            .await?;

        let verdict = parse_review(reviewer.response.as_deref().unwrap_or_default());
        self.store
            .append_review(&IterationReview {
                run_id: run_id.clone(),
                iteration,
                approved: verdict.approved,
                feedback: verdict.feedback.clone(),
                score: verdict.score,
                model: reviewer.model.clone(),
                created_at: Utc::now(),
            })
            .await?;

        self.events.emit(LifecycleEvent::ReviewParsed {
            run_id,
            iteration,
            approved: verdict.approved,
            score: verdict.score,
            source: verdict.source.as_str().to_string(),
        });
        debug!(iteration, approved = verdict.approved, score = ?verdict.score, "Review verdict");

        Ok(verdict)
    }

    fn dispatch_options(
        &self,
        task: &IterationTask,
        opts: &RunOptions,
        run_id: &str,
        iteration: u32,
        role: OutputRole,
    ) -> DispatchOptions {
        let mut dispatch = DispatchOptions::new()
            .with_metadata("run_id", run_id)
            .with_metadata("iteration", iteration)
            .with_metadata("role", role.as_str())
            .with_working_dir(task.working_directory.clone());
        if let Some(key) = &task.session_key {
            dispatch = dispatch.with_metadata("session_key", key.as_str());
        }
        if let Some(token) = &opts.cancel {
            dispatch = dispatch.with_cancel(token.clone());
        }
        dispatch.allow_unhealthy = opts.allow_unhealthy;
        dispatch
    }

    async fn record_output(
        &self,
        run_id: &str,
        iteration: u32,
        role: OutputRole,
        item: &WorkItem,
        prompt: &str,
    ) -> Result<(), IterationFailure> {
        let content = item.response.clone().unwrap_or_default();
        let tokens_used = self.tokens_used(item, prompt, &content);
        self.store
            .append_output(&IterationOutput {
                run_id: run_id.to_string(),
                iteration,
                role,
                content,
                model: item.model.clone(),
                tokens_used,
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    /// Provider-reported usage when present, otherwise the estimate for
    /// prompt plus response.
    fn tokens_used(&self, item: &WorkItem, prompt: &str, response: &str) -> u64 {
        let reported = ["tokens_input", "tokens_output"]
            .iter()
            .filter_map(|key| item.metadata.get(*key).and_then(Value::as_u64))
            .reduce(|a, b| a + b);
        if let Some(total) = reported {
            return total;
        }

        let hint = item.model.as_deref().unwrap_or(item.provider.as_str());
        let tokens = self.dispatcher.tokens();
        (tokens.count(prompt, hint) + tokens.count(response, hint)) as u64
    }

    async fn finish(
        &self,
        mut run: IterationRun,
        status: RunStatus,
        iterations_used: u32,
        final_output: Option<String>,
    ) -> Result<IterationRun, RunError> {
        run.finish(status, iterations_used, final_output, None);
        if let Err(e) = self.store.update_run(&run).await {
            return Err(self.abort_on_store(run, iterations_used, e).await);
        }
        info!(run_id = %run.id, status = status.as_str(), iterations_used, "Run finished");
        self.events.emit(LifecycleEvent::RunFinished {
            run_id: run.id.clone(),
            status: status.as_str().to_string(),
            iterations_used,
        });
        Ok(run)
    }

    async fn fail(&self, mut run: IterationRun, iteration: u32, source: DispatchError) -> RunError {
        warn!(run_id = %run.id, iteration, error = %source, "Run aborted");
        run.finish(RunStatus::Failed, iteration, None, Some(source.to_string()));
        if let Err(e) = self.store.update_run(&run).await {
            return RunError::Store(e);
        }
        self.events.emit(LifecycleEvent::RunFinished {
            run_id: run.id.clone(),
            status: RunStatus::Failed.as_str().to_string(),
            iterations_used: iteration,
        });
        RunError::Failed {
            run: Box::new(run),
            iteration,
            source,
        }
    }

    /// Best-effort move to `Failed` after a run-store write was rejected.
    /// The original store error is what the caller sees.
    async fn abort_on_store(&self, mut run: IterationRun, iteration: u32, error: StoreError) -> RunError {
        warn!(run_id = %run.id, iteration, error = %error, "Run store write failed");
        run.finish(
            RunStatus::Failed,
            iteration,
            None,
            Some(format!("run store failed: {error}")),
        );
        match self.store.update_run(&run).await {
            Ok(()) => self.events.emit(LifecycleEvent::RunFinished {
                run_id: run.id.clone(),
                status: RunStatus::Failed.as_str().to_string(),
                iterations_used: iteration,
            }),
            Err(e) => warn!(run_id = %run.id, error = %e, "Could not mark run as failed"),
        }
        RunError::Store(error)
    }
}

enum IterationFailure {
    Dispatch(DispatchError),
    Store(StoreError),
}

impl From<StoreError> for IterationFailure {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use taskrelay_health::testing::StaticProbe;
    use taskrelay_health::{HealthProbe, HealthStatus};
    use taskrelay_llm::testing::ScriptedUnit;
    use taskrelay_llm::{ProviderRegistry, RetryPolicy, UnitOutput};
    use taskrelay_records::{MemoryStore, WorkItemStore};
    use taskrelay_utils::{ErrorKind, ProviderError, RecordingEventSink};

    const APPROVE: &str = "```json\n{\"approved\": true, \"score\": 9, \"feedback\": \"Ship it.\"}\n```";
    const REJECT: &str = "```json\n{\"approved\": false, \"score\": 4, \"feedback\": \"Add error handling.\"}\n```";

    struct Setup {
        orchestrator: Orchestrator,
        store: Arc<MemoryStore>,
        events: Arc<RecordingEventSink>,
    }

    fn setup(worker: Arc<ScriptedUnit>, reviewer: Arc<ScriptedUnit>) -> Setup {
        setup_with_run_store(worker, reviewer, |store| store as Arc<dyn RunStore>)
    }

    fn setup_with_run_store(
        worker: Arc<ScriptedUnit>,
        reviewer: Arc<ScriptedUnit>,
        run_store: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn RunStore>,
    ) -> Setup {
        let policy = RetryPolicy::new(1, Duration::from_secs(30), vec![Duration::from_secs(1)]);
        let mut registry = ProviderRegistry::new();
        registry.register("worker", worker, policy.clone(), Some("worker-model".into()));
        registry.register("reviewer", reviewer, policy, Some("reviewer-model".into()));

        let mut health = HealthProbe::new(Duration::from_secs(60), Duration::from_secs(5));
        health.register("worker", Arc::new(StaticProbe::new(HealthStatus::Healthy)));
        health.register("reviewer", Arc::new(StaticProbe::new(HealthStatus::Healthy)));

        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(RecordingEventSink::new());
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Arc::new(health),
            Arc::clone(&store) as Arc<dyn WorkItemStore>,
        )
        .with_events(Arc::clone(&events) as Arc<dyn EventSink>);

        Setup {
            orchestrator: Orchestrator::new(Arc::new(dispatcher), run_store(Arc::clone(&store))),
            store,
            events,
        }
    }

    /// Run store that rejects the first `failures` calls to one operation.
    struct FlakyRunStore {
        inner: Arc<MemoryStore>,
        operation: &'static str,
        failures: AtomicUsize,
    }

    impl FlakyRunStore {
        fn new(inner: Arc<MemoryStore>, operation: &'static str, failures: usize) -> Self {
            Self {
                inner,
                operation,
                failures: AtomicUsize::new(failures),
            }
        }

        fn check(&self, operation: &str) -> Result<(), StoreError> {
            if operation == self.operation
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(StoreError::Backend("disk full".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl RunStore for FlakyRunStore {
        async fn save_run(&self, run: &IterationRun) -> Result<(), StoreError> {
            self.check("save_run")?;
            self.inner.save_run(run).await
        }

        async fn update_run(&self, run: &IterationRun) -> Result<(), StoreError> {
            self.check("update_run")?;
            self.inner.update_run(run).await
        }

        async fn append_output(&self, output: &IterationOutput) -> Result<(), StoreError> {
            self.check("append_output")?;
            self.inner.append_output(output).await
        }

        async fn append_review(&self, review: &IterationReview) -> Result<(), StoreError> {
            self.check("append_review")?;
            self.inner.append_review(review).await
        }
    }

    fn task(max_iterations: u32) -> IterationTask {
        IterationTask::new("write a sorting function", "worker", "reviewer")
            .with_max_iterations(max_iterations)
    }

    #[tokio::test]
    async fn test_approval_on_first_iteration() {
        let worker = Arc::new(ScriptedUnit::texts("worker", ["fn sort() {}"]));
        let reviewer = Arc::new(ScriptedUnit::texts("reviewer", [APPROVE]));
        let s = setup(Arc::clone(&worker), Arc::clone(&reviewer));

        let run = s.orchestrator.run(task(3), &RunOptions::default()).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.iterations_used, Some(1));
        assert_eq!(run.final_output.as_deref(), Some("fn sort() {}"));
        assert!(run.completed_at.is_some());
        assert_eq!(worker.calls(), 1);
        assert_eq!(reviewer.calls(), 1);

        assert_eq!(s.store.run(&run.id).unwrap(), run);
        let outputs = s.store.outputs(&run.id);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].role, OutputRole::Worker);
        assert_eq!(outputs[1].role, OutputRole::Reviewer);
        assert!(outputs.iter().all(|o| o.tokens_used > 0));

        let reviews = s.store.reviews(&run.id);
        assert_eq!(reviews.len(), 1);
        assert!(reviews[0].approved);
        assert_eq!(reviews[0].score, Some(9));
        assert_eq!(reviews[0].feedback, "Ship it.");
    }

    #[tokio::test]
    async fn test_feedback_is_carried_into_next_worker_prompt() {
        let worker = Arc::new(ScriptedUnit::texts("worker", ["draft one", "draft two"]));
        let reviewer = Arc::new(ScriptedUnit::texts("reviewer", [REJECT, APPROVE]));
        let s = setup(Arc::clone(&worker), Arc::clone(&reviewer));

        let run = s.orchestrator.run(task(3), &RunOptions::default()).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.iterations_used, Some(2));
        assert_eq!(run.final_output.as_deref(), Some("draft two"));

        let prompts: Vec<String> = worker.invocations().iter().map(|i| i.prompt_text()).collect();
        assert_eq!(prompts[0], "write a sorting function");
        assert!(prompts[1].starts_with("write a sorting function"));
        assert!(prompts[1].contains("Add error handling."));

        let review_prompt = reviewer.invocations()[0].prompt_text();
        assert!(review_prompt.contains("draft one"));
    }

    #[tokio::test]
    async fn test_max_iterations_reached_keeps_last_output() {
        let worker = Arc::new(ScriptedUnit::texts("worker", ["v1", "v2"]));
        let reviewer = Arc::new(ScriptedUnit::texts("reviewer", [REJECT]));
        let s = setup(Arc::clone(&worker), Arc::clone(&reviewer));

        let run = s.orchestrator.run(task(2), &RunOptions::default()).await.unwrap();

        assert_eq!(run.status, RunStatus::MaxIterationsReached);
        assert_eq!(run.iterations_used, Some(2));
        assert_eq!(run.final_output.as_deref(), Some("v2"));
        assert_eq!(worker.calls(), 2);
        assert_eq!(reviewer.calls(), 2);
        assert_eq!(s.store.outputs(&run.id).len(), 4);
        assert_eq!(s.store.reviews(&run.id).len(), 2);
    }

    #[tokio::test]
    async fn test_worker_failure_fails_run_without_review() {
        let worker = Arc::new(ScriptedUnit::failing(
            "worker",
            ProviderError::new(ErrorKind::Authentication, "bad key"),
        ));
        let reviewer = Arc::new(ScriptedUnit::texts("reviewer", [APPROVE]));
        let s = setup(Arc::clone(&worker), Arc::clone(&reviewer));

        let err = s.orchestrator.run(task(3), &RunOptions::default()).await.unwrap_err();

        match &err {
            RunError::Failed { run, iteration, .. } => {
                assert_eq!(*iteration, 1);
                assert_eq!(run.status, RunStatus::Failed);
                assert_eq!(run.iterations_used, Some(1));
                assert!(run.error_message.as_deref().unwrap().contains("bad key"));
                assert!(s.store.reviews(&run.id).is_empty());
                assert!(s.store.outputs(&run.id).is_empty());
                assert_eq!(s.store.run(&run.id).unwrap().status, RunStatus::Failed);
            }
            other => panic!("Expected RunError::Failed, got {other:?}"),
        }
        assert_eq!(err.kind(), Some(ErrorKind::Authentication));
        assert_eq!(reviewer.calls(), 0);
    }

    #[tokio::test]
    async fn test_reviewer_failure_keeps_worker_output() {
        let worker = Arc::new(ScriptedUnit::texts("worker", ["draft"]));
        let reviewer = Arc::new(ScriptedUnit::failing(
            "reviewer",
            ProviderError::new(ErrorKind::InvalidRequest, "bad request"),
        ));
        let s = setup(Arc::clone(&worker), Arc::clone(&reviewer));

        let err = s.orchestrator.run(task(3), &RunOptions::default()).await.unwrap_err();
        let run = err.run().cloned().unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        let outputs = s.store.outputs(&run.id);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].role, OutputRole::Worker);
        assert!(s.store.reviews(&run.id).is_empty());
    }

    #[tokio::test]
    async fn test_reported_usage_wins_over_estimate() {
        let worker = Arc::new(ScriptedUnit::new(
            "worker",
            vec![Ok(UnitOutput::new("done", "worker").with_tokens(120, 30))],
        ));
        let reviewer = Arc::new(ScriptedUnit::texts("reviewer", [APPROVE]));
        let s = setup(worker, reviewer);

        let run = s.orchestrator.run(task(1), &RunOptions::default()).await.unwrap();
        let outputs = s.store.outputs(&run.id);
        assert_eq!(outputs[0].tokens_used, 150);
    }

    #[tokio::test]
    async fn test_unparseable_review_requests_changes() {
        let worker = Arc::new(ScriptedUnit::texts("worker", ["v1"]));
        let reviewer = Arc::new(ScriptedUnit::texts("reviewer", ["Hmm, interesting approach."]));
        let s = setup(worker, reviewer);

        let run = s.orchestrator.run(task(1), &RunOptions::default()).await.unwrap();
        assert_eq!(run.status, RunStatus::MaxIterationsReached);

        let review = &s.store.reviews(&run.id)[0];
        assert!(!review.approved);
        assert_eq!(review.score, None);
        assert_eq!(review.feedback, "Hmm, interesting approach.");
    }

    #[tokio::test]
    async fn test_invalid_tasks_are_rejected_before_any_work() {
        let worker = Arc::new(ScriptedUnit::texts("worker", ["v1"]));
        let reviewer = Arc::new(ScriptedUnit::texts("reviewer", [APPROVE]));
        let s = setup(Arc::clone(&worker), reviewer);

        let zero = s.orchestrator.run(task(0), &RunOptions::default()).await;
        assert!(matches!(zero, Err(RunError::InvalidTask(_))));

        let empty = IterationTask::new("  ", "worker", "reviewer");
        match s.orchestrator.run(empty, &RunOptions::default()).await {
            Err(e) => assert_eq!(e.kind(), Some(ErrorKind::InvalidArgument)),
            Ok(_) => panic!("Expected InvalidTask"),
        }
        assert_eq!(worker.calls(), 0);
        assert!(s.events.events().is_empty());
    }

    #[tokio::test]
    async fn test_run_metadata_reaches_work_items() {
        let worker = Arc::new(ScriptedUnit::texts("worker", ["v1"]));
        let reviewer = Arc::new(ScriptedUnit::texts("reviewer", [APPROVE]));
        let s = setup(worker, reviewer);

        let run = s
            .orchestrator
            .run(task(2).with_session_key(Some("sess-1".into())), &RunOptions::default())
            .await
            .unwrap();

        let items = s.store.work_items();
        assert_eq!(items.len(), 2);
        for item in &items {
            assert_eq!(item.metadata["run_id"], run.id.as_str());
            assert_eq!(item.metadata["iteration"], 1);
            assert_eq!(item.metadata["session_key"], "sess-1");
        }
        let roles: Vec<&str> = items
            .iter()
            .filter_map(|i| i.metadata["role"].as_str())
            .collect();
        assert!(roles.contains(&"worker"));
        assert!(roles.contains(&"reviewer"));
    }

    #[tokio::test]
    async fn test_lifecycle_events_in_order() {
        let worker = Arc::new(ScriptedUnit::texts("worker", ["v1"]));
        let reviewer = Arc::new(ScriptedUnit::texts("reviewer", [APPROVE]));
        let s = setup(worker, reviewer);

        s.orchestrator.run(task(3), &RunOptions::default()).await.unwrap();

        let run_events: Vec<LifecycleEvent> = s
            .events
            .events()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    LifecycleEvent::RunStarted { .. }
                        | LifecycleEvent::IterationStarted { .. }
                        | LifecycleEvent::ReviewParsed { .. }
                        | LifecycleEvent::RunFinished { .. }
                )
            })
            .collect();
        assert_eq!(run_events.len(), 4);
        assert!(matches!(run_events[0], LifecycleEvent::RunStarted { max_iterations: 3, .. }));
        assert!(matches!(run_events[1], LifecycleEvent::IterationStarted { iteration: 1, .. }));
        match &run_events[2] {
            LifecycleEvent::ReviewParsed { approved, score, source, .. } => {
                assert!(approved);
                assert_eq!(*score, Some(9));
                assert_eq!(source, "fenced_json");
            }
            other => panic!("Expected ReviewParsed, got {other:?}"),
        }
        match &run_events[3] {
            LifecycleEvent::RunFinished { status, iterations_used, .. } => {
                assert_eq!(status, "completed");
                assert_eq!(*iterations_used, 1);
            }
            other => panic!("Expected RunFinished, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_fails_run() {
        let worker = Arc::new(ScriptedUnit::texts("worker", ["slow"]).with_delay(Duration::from_secs(60)));
        let reviewer = Arc::new(ScriptedUnit::texts("reviewer", [APPROVE]));
        let s = setup(worker, Arc::clone(&reviewer));

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = s
            .orchestrator
            .run(task(3), &RunOptions::default().with_cancel(token))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::Cancelled));
        assert_eq!(err.run().unwrap().status, RunStatus::Failed);
        assert_eq!(reviewer.calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_review_write_marks_run_failed() {
        let worker = Arc::new(ScriptedUnit::texts("worker", ["draft"]));
        let reviewer = Arc::new(ScriptedUnit::texts("reviewer", [APPROVE]));
        let s = setup_with_run_store(worker, reviewer, |store| {
            Arc::new(FlakyRunStore::new(store, "append_review", usize::MAX)) as Arc<dyn RunStore>
        });

        let err = s
            .orchestrator
            .run(task(3), &RunOptions::default())
            .await
            .unwrap_err();

        match err {
            RunError::Store(StoreError::Backend(ref msg)) => assert_eq!(msg, "disk full"),
            other => panic!("Expected backend store error, got {other:?}"),
        }

        let runs: Vec<_> = s.store.runs();
        assert_eq!(runs.len(), 1);
        let stored = &runs[0];
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.iterations_used, Some(1));
        assert!(stored.completed_at.is_some());
        assert!(stored.error_message.as_deref().unwrap().contains("disk full"));
        assert!(s.store.reviews(&stored.id).is_empty());
    }

    #[tokio::test]
    async fn test_rejected_terminal_write_falls_back_to_failed() {
        let worker = Arc::new(ScriptedUnit::texts("worker", ["draft"]));
        let reviewer = Arc::new(ScriptedUnit::texts("reviewer", [APPROVE]));
        let s = setup_with_run_store(worker, reviewer, |store| {
            Arc::new(FlakyRunStore::new(store, "update_run", 1)) as Arc<dyn RunStore>
        });

        let err = s
            .orchestrator
            .run(task(3), &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Store(_)));

        let runs = s.store.runs();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].final_output.is_none());

        let finished: Vec<_> = s
            .events
            .events()
            .into_iter()
            .filter(|e| matches!(e, LifecycleEvent::RunFinished { .. }))
            .collect();
        match finished.as_slice() {
            [LifecycleEvent::RunFinished { status, .. }] => assert_eq!(status, "failed"),
            other => panic!("Expected one failed RunFinished event, got {other:?}"),
        }
    }
}
