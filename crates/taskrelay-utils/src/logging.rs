//! Logging and observability infrastructure for taskrelay
//!
//! Two layers live here:
//! - [`init_tracing`] installs the process-wide `tracing` subscriber (binary only).
//! - [`EventSink`] is the lifecycle event collaborator the dispatcher and
//!   orchestrator report to. Emission is synchronous, infallible, and must not
//!   block; the default [`TracingEventSink`] turns events into structured logs.

use serde::Serialize;
use std::io::IsTerminal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Check if colored output should be used.
fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `taskrelay=debug` in verbose mode and
/// `taskrelay=info` by default. Logs go to stderr so stdout stays machine-readable.
pub fn init_tracing(verbose: bool, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("taskrelay=debug,info")
            } else {
                EnvFilter::try_new("taskrelay=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(false),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(use_color())
                    .with_target(verbose)
                    .with_thread_ids(false)
                    .with_line_number(false)
                    .with_file(false)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

/// Lifecycle events reported by the dispatch and orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    JobStarted {
        work_item_id: String,
        provider: String,
    },
    JobRetrying {
        work_item_id: String,
        provider: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    JobCompleted {
        work_item_id: String,
        provider: String,
        duration_ms: u64,
    },
    JobFailed {
        work_item_id: String,
        provider: String,
        error_kind: String,
        message: String,
    },
    HealthWarning {
        provider: String,
        status: String,
        message: String,
    },
    FallbackUsed {
        from: String,
        to: String,
    },
    RunStarted {
        run_id: String,
        max_iterations: u32,
    },
    IterationStarted {
        run_id: String,
        iteration: u32,
    },
    ReviewParsed {
        run_id: String,
        iteration: u32,
        approved: bool,
        score: Option<u8>,
        source: String,
    },
    RunFinished {
        run_id: String,
        status: String,
        iterations_used: u32,
    },
}

/// Fire-and-forget receiver of lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// Default sink: structured `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::JobStarted {
                work_item_id,
                provider,
            } => info!(%work_item_id, %provider, "Job started"),
            LifecycleEvent::JobRetrying {
                work_item_id,
                provider,
                attempt,
                delay_ms,
                error,
            } => warn!(%work_item_id, %provider, attempt, delay_ms, %error, "Job attempt failed, will retry"),
            LifecycleEvent::JobCompleted {
                work_item_id,
                provider,
                duration_ms,
            } => info!(%work_item_id, %provider, duration_ms, "Job completed"),
            LifecycleEvent::JobFailed {
                work_item_id,
                provider,
                error_kind,
                message,
            } => error!(%work_item_id, %provider, %error_kind, %message, "Job failed"),
            LifecycleEvent::HealthWarning {
                provider,
                status,
                message,
            } => warn!(%provider, %status, %message, "Health check warning"),
            LifecycleEvent::FallbackUsed { from, to } => {
                warn!(%from, %to, "Dispatching to fallback provider")
            }
            LifecycleEvent::RunStarted {
                run_id,
                max_iterations,
            } => info!(%run_id, max_iterations, "Iteration run started"),
            LifecycleEvent::IterationStarted { run_id, iteration } => {
                info!(%run_id, iteration, "Iteration started")
            }
            LifecycleEvent::ReviewParsed {
                run_id,
                iteration,
                approved,
                score,
                source,
            } => info!(%run_id, iteration, approved, ?score, %source, "Review parsed"),
            LifecycleEvent::RunFinished {
                run_id,
                status,
                iterations_used,
            } => info!(%run_id, %status, iterations_used, "Iteration run finished"),
        }
    }
}

/// Sink that keeps every event in memory, for assertions in tests.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: std::sync::Mutex<Vec<LifecycleEvent>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events emitted so far.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl EventSink for RecordingEventSink {
    fn emit(&self, event: LifecycleEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingEventSink::new();
        sink.emit(LifecycleEvent::RunStarted {
            run_id: "r1".into(),
            max_iterations: 3,
        });
        sink.emit(LifecycleEvent::IterationStarted {
            run_id: "r1".into(),
            iteration: 1,
        });
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], LifecycleEvent::IterationStarted { iteration: 1, .. }));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let value = serde_json::to_value(LifecycleEvent::HealthWarning {
            provider: "ollama".into(),
            status: "degraded".into(),
            message: "no models loaded".into(),
        })
        .unwrap();
        assert_eq!(value["event"], "health_warning");
        assert_eq!(value["provider"], "ollama");
    }

    #[test]
    fn test_tracing_sink_does_not_panic_without_subscriber() {
        TracingEventSink.emit(LifecycleEvent::JobCompleted {
            work_item_id: "w".into(),
            provider: "local".into(),
            duration_ms: 12,
        });
    }
}
