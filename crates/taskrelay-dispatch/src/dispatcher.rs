use std::future::Future;
use std::sync::Arc;
use taskrelay_health::{HealthProbe, HealthStatus};
use taskrelay_llm::{Invocation, ProviderRegistry, RegisteredProvider, UnitOutput};
use taskrelay_records::{WorkItem, WorkItemStatus, WorkItemStore, WorkItemUpdate};
use taskrelay_tokens::TokenCounter;
use taskrelay_utils::{
    ErrorKind, EventSink, LifecycleEvent, Message, ProviderError, StoreError, TracingEventSink,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::options::DispatchOptions;

/// Metadata key naming the provider a fallback dispatch replaced
pub const FALLBACK_FROM_KEY: &str = "fallback_from";

/// Routes prompts to providers through the health gate, with retries.
///
/// Every dispatch that passes the gate leaves a [`WorkItem`] in the store in
/// a terminal state, including failed and cancelled ones.
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthProbe>,
    store: Arc<dyn WorkItemStore>,
    events: Arc<dyn EventSink>,
    tokens: TokenCounter,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        health: Arc<HealthProbe>,
        store: Arc<dyn WorkItemStore>,
    ) -> Self {
        Self {
            registry,
            health,
            store,
            events: Arc::new(TracingEventSink),
            tokens: TokenCounter::default(),
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_token_counter(mut self, tokens: TokenCounter) -> Self {
        self.tokens = tokens;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    #[must_use]
    pub fn health(&self) -> &HealthProbe {
        &self.health
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenCounter {
        &self.tokens
    }

    #[must_use]
    pub fn events(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.events)
    }

    /// Run `prompt` on `provider` and return the completed work item.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an unknown provider (no work item created)
    /// - `ServiceUnavailable` when the provider is unhealthy and
    ///   `allow_unhealthy` is unset (no work item created)
    /// - the last provider error once retries are exhausted, with the failed
    ///   work item attached
    pub async fn dispatch(
        &self,
        provider: &str,
        prompt: &str,
        model: Option<&str>,
        opts: &DispatchOptions,
    ) -> Result<WorkItem, DispatchError> {
        let entry = self
            .registry
            .get(provider)
            .map_err(|e| DispatchError::provider(e, None))?;

        if !opts.skip_health_check {
            self.gate(provider, opts).await?;
        }

        let model = model
            .map(str::to_string)
            .or_else(|| entry.default_model.clone());

        let mut item = WorkItem::new(provider, model.clone(), prompt);
        item.metadata.extend(opts.metadata.clone());
        self.store.save_work_item(&item).await?;

        if let Err(e) = self
            .store
            .update_work_item_status(&item.id, WorkItemStatus::Processing, WorkItemUpdate::default())
            .await
        {
            return Err(self.abandon(&item.id, provider, e, None).await);
        }
        self.events.emit(LifecycleEvent::JobStarted {
            work_item_id: item.id.clone(),
            provider: provider.to_string(),
        });

        let (invocation, dropped) = self.build_invocation(entry, prompt, model, opts);
        let started = Instant::now();
        let (result, attempts) = self
            .run_with_retries(&item.id, provider, entry, invocation, opts.cancel.as_ref())
            .await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(output) => {
                let mut update =
                    WorkItemUpdate::completed(output.text.clone(), duration_ms)
                        .with_metadata("attempts", attempts);
                update.metadata.extend(output.meta());
                if dropped > 0 {
                    update = update.with_metadata("history_dropped", dropped);
                }

                let completed = match self
                    .store
                    .update_work_item_status(&item.id, WorkItemStatus::Completed, update)
                    .await
                {
                    Ok(completed) => completed,
                    Err(e) => return Err(self.abandon(&item.id, provider, e, Some(duration_ms)).await),
                };
                self.events.emit(LifecycleEvent::JobCompleted {
                    work_item_id: completed.id.clone(),
                    provider: provider.to_string(),
                    duration_ms,
                });
                Ok(completed)
            }
            Err(error) => {
                let error = match error.provider {
                    Some(_) => error,
                    None => error.with_provider(provider),
                };
                let update =
                    WorkItemUpdate::failed(error.kind, error.message.clone(), Some(duration_ms))
                        .with_metadata("attempts", attempts);

                let failed = self
                    .store
                    .update_work_item_status(&item.id, WorkItemStatus::Failed, update)
                    .await?;
                self.events.emit(LifecycleEvent::JobFailed {
                    work_item_id: failed.id.clone(),
                    provider: provider.to_string(),
                    error_kind: error.kind.to_string(),
                    message: error.message.clone(),
                });
                Err(DispatchError::provider(error, Some(failed)))
            }
        }
    }

    /// Dispatch to `provider`, then on any failure to the first healthy
    /// provider in `fallback_chain`.
    ///
    /// The fallback runs with the candidate's default model and carries
    /// `fallback_from = provider` in its metadata. Cancellation is never
    /// retried on a fallback.
    ///
    /// # Errors
    ///
    /// The fallback's own error when it fails, or `ServiceUnavailable`
    /// ("no healthy fallback providers found") when no candidate is healthy.
    pub async fn dispatch_with_fallback(
        &self,
        provider: &str,
        prompt: &str,
        model: Option<&str>,
        opts: &DispatchOptions,
        fallback_chain: &[String],
    ) -> Result<WorkItem, DispatchError> {
        let original = match self.dispatch(provider, prompt, model, opts).await {
            Ok(item) => return Ok(item),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => e,
        };

        warn!(provider, error = %original, "Primary provider failed, walking fallback chain");

        let cancelled = |original: &DispatchError| {
            DispatchError::provider(
                ProviderError::cancelled().with_provider(provider),
                original.work_item().cloned(),
            )
        };

        for candidate in fallback_chain {
            if opts.is_cancelled() {
                return Err(cancelled(&original));
            }
            if candidate == provider {
                continue;
            }
            if !self.health.is_healthy(candidate).await {
                debug!(provider = %candidate, "Skipping unhealthy fallback candidate");
                continue;
            }

            self.events.emit(LifecycleEvent::FallbackUsed {
                from: provider.to_string(),
                to: candidate.clone(),
            });
            let fallback_opts = DispatchOptions {
                skip_health_check: true,
                ..opts.clone()
            }
            .with_metadata(FALLBACK_FROM_KEY, provider);

            return self
                .dispatch(candidate, prompt, None, &fallback_opts)
                .await;
        }

        if opts.is_cancelled() {
            return Err(cancelled(&original));
        }

        let error = ProviderError::service_unavailable("no healthy fallback providers found")
            .with_provider(provider)
            .with_context("original_error", original.to_string())
            .with_context("fallback_chain", fallback_chain.join(", "));
        let work_item = original.work_item().cloned();
        Err(DispatchError::provider(error, work_item))
    }

    /// Best-effort move to `failed` after the store rejected a lifecycle
    /// write, so the item is not left `pending` or `processing`. The
    /// original store error is returned.
    async fn abandon(
        &self,
        id: &str,
        provider: &str,
        error: StoreError,
        duration_ms: Option<u64>,
    ) -> DispatchError {
        warn!(work_item_id = id, provider, error = %error, "Work item store write failed");
        let message = format!("work item store failed: {error}");
        let update = WorkItemUpdate {
            error: Some(message.clone()),
            duration_ms,
            ..WorkItemUpdate::default()
        };
        match self
            .store
            .update_work_item_status(id, WorkItemStatus::Failed, update)
            .await
        {
            Ok(_) => self.events.emit(LifecycleEvent::JobFailed {
                work_item_id: id.to_string(),
                provider: provider.to_string(),
                error_kind: "store".to_string(),
                message,
            }),
            Err(e) => warn!(work_item_id = id, error = %e, "Could not mark work item as failed"),
        }
        DispatchError::Store(error)
    }

    /// First candidate whose cached health is `healthy`.
    pub async fn find_healthy_provider(&self, candidates: &[String]) -> Option<String> {
        for candidate in candidates {
            if self.health.is_healthy(candidate).await {
                return Some(candidate.clone());
            }
        }
        None
    }

    async fn gate(&self, provider: &str, opts: &DispatchOptions) -> Result<(), DispatchError> {
        let health = self.health.check_cached(provider).await;
        match health.status {
            HealthStatus::Healthy => Ok(()),
            HealthStatus::Degraded => {
                self.health_warning(provider, health.status, &health.message);
                Ok(())
            }
            HealthStatus::Unhealthy if opts.allow_unhealthy => {
                self.health_warning(provider, health.status, &health.message);
                Ok(())
            }
            HealthStatus::Unhealthy => {
                info!(provider, message = %health.message, "Dispatch rejected by health check");
                let error = ProviderError::service_unavailable(format!(
                    "provider '{provider}' is unhealthy: {}",
                    health.message
                ))
                .with_provider(provider)
                .with_context("health_status", health.status.as_str());
                Err(DispatchError::provider(error, None))
            }
        }
    }

    fn health_warning(&self, provider: &str, status: HealthStatus, message: &str) {
        self.events.emit(LifecycleEvent::HealthWarning {
            provider: provider.to_string(),
            status: status.to_string(),
            message: message.to_string(),
        });
    }

    /// History plus the prompt, truncated to the model's safe limit.
    ///
    /// Returns the invocation and how many history messages were dropped.
    fn build_invocation(
        &self,
        entry: &RegisteredProvider,
        prompt: &str,
        model: Option<String>,
        opts: &DispatchOptions,
    ) -> (Invocation, usize) {
        let mut messages: Vec<Message> = opts.history.clone();
        messages.push(Message::user(prompt));

        let hint = model.as_deref().unwrap_or_else(|| entry.unit.provider());
        let limit = self.tokens.safe_limit(hint);
        let kept = self.tokens.truncate(&messages, hint, limit);
        let dropped = messages.len() - kept.len();
        if dropped > 0 {
            debug!(dropped, limit, model = hint, "Truncated conversation history");
        }

        let mut invocation = Invocation::new(kept, entry.policy.timeout)
            .with_model(model)
            .with_cwd(opts.working_dir.clone());
        invocation.options = opts.options.clone();
        (invocation, dropped)
    }

    async fn run_with_retries(
        &self,
        work_item_id: &str,
        provider: &str,
        entry: &RegisteredProvider,
        invocation: Invocation,
        cancel: Option<&CancellationToken>,
    ) -> (Result<UnitOutput, ProviderError>, u32) {
        let policy = &entry.policy;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(work_item_id, provider, attempt, tries = policy.tries, "Executing attempt");

            let error = match cancellable(cancel, entry.unit.run(invocation.clone())).await {
                Ok(output) => return (Ok(output), attempt),
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= policy.tries {
                return (Err(error), attempt);
            }

            let delay = match error.retry_after {
                Some(hint) => policy.delay_for(attempt).max(hint),
                None => policy.delay_for(attempt),
            };
            self.events.emit(LifecycleEvent::JobRetrying {
                work_item_id: work_item_id.to_string(),
                provider: provider.to_string(),
                attempt,
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error: error.to_string(),
            });

            if let Err(cancelled) = cancellable(cancel, async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await
            {
                return (Err(cancelled.with_context("last_error", error.to_string())), attempt);
            }
        }
    }
}

/// Race `fut` against the cancellation token. Dropping the losing future
/// abandons an HTTP call or kills a child process.
async fn cancellable<T, F>(cancel: Option<&CancellationToken>, fut: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match cancel {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => Err(ProviderError::cancelled()),
            result = fut => result,
        },
        None => fut.await,
    }
}
