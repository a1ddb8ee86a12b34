//! Command implementations
//!
//! Every command prints its result as pretty JSON on stdout and reports
//! failures on stderr; the returned [`ExitCode`] is all `run()` needs.

use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use taskrelay_config::Config;
use taskrelay_dispatch::{DispatchError, DispatchOptions, Dispatcher};
use taskrelay_health::HealthProbe;
use taskrelay_llm::ProviderRegistry;
use taskrelay_orchestrator::{IterationTask, Orchestrator, RunError, RunOptions};
use taskrelay_records::{
    IterationOutput, IterationReview, IterationRun, MemoryStore, RunStore, WorkItemStore,
};
use taskrelay_utils::redaction::redact_error_message;
use taskrelay_utils::{ProviderError, UserFriendlyError};

use crate::exit_codes::ExitCode;

/// Arguments of `taskrelay dispatch` after config resolution
#[derive(Debug)]
pub struct DispatchArgs {
    pub prompt: Option<String>,
    pub fallback: Vec<String>,
    pub allow_unhealthy: bool,
    pub skip_health_check: bool,
    pub cwd: Option<PathBuf>,
}

/// Arguments of `taskrelay iterate` after config resolution
#[derive(Debug)]
pub struct IterateArgs {
    pub task: Option<String>,
    pub worker: Option<String>,
    pub worker_model: Option<String>,
    pub reviewer: Option<String>,
    pub reviewer_model: Option<String>,
    pub cwd: Option<PathBuf>,
    pub session_key: Option<String>,
    pub allow_unhealthy: bool,
}

/// Everything persisted for one iteration run
#[derive(Debug, Serialize)]
struct RunReport {
    run: IterationRun,
    outputs: Vec<IterationOutput>,
    reviews: Vec<IterationReview>,
}

struct Services {
    dispatcher: Arc<Dispatcher>,
    store: Arc<MemoryStore>,
}

fn build_services(config: &Config) -> Result<Services, ProviderError> {
    let registry = ProviderRegistry::from_config(config)?;
    let health = HealthProbe::from_config(config)?;
    let store = Arc::new(MemoryStore::new());
    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        Arc::new(health),
        Arc::clone(&store) as Arc<dyn WorkItemStore>,
    );
    Ok(Services {
        dispatcher: Arc::new(dispatcher),
        store,
    })
}

pub async fn execute_dispatch(config: &Config, args: DispatchArgs) -> Result<(), ExitCode> {
    let prompt = read_input(args.prompt, "prompt")?;
    let Some(provider) = config.defaults.provider.clone() else {
        return Err(invalid(
            "no provider selected; pass --provider or set [defaults].provider",
        ));
    };
    let services = build_services(config).map_err(|e| report_provider_error(&e))?;

    let mut opts = DispatchOptions::new()
        .with_working_dir(args.cwd)
        .with_cancel(cancel_on_ctrl_c());
    opts.allow_unhealthy = args.allow_unhealthy;
    opts.skip_health_check = args.skip_health_check;

    let model = config.defaults.model.as_deref();
    let result = if args.fallback.is_empty() {
        services
            .dispatcher
            .dispatch(&provider, &prompt, model, &opts)
            .await
    } else {
        services
            .dispatcher
            .dispatch_with_fallback(&provider, &prompt, model, &opts, &args.fallback)
            .await
    };

    match result {
        Ok(item) => print_json(&item),
        Err(err) => {
            if let Some(item) = err.work_item() {
                print_json(item)?;
            }
            Err(report_dispatch_error(&err))
        }
    }
}

pub async fn execute_iterate(config: &Config, args: IterateArgs) -> Result<(), ExitCode> {
    let task = read_input(args.task, "task")?;
    let Some(worker) = args
        .worker
        .or_else(|| config.orchestrator.worker_provider.clone())
        .or_else(|| config.defaults.provider.clone())
    else {
        return Err(invalid(
            "no worker provider selected; pass --worker or set [orchestrator].worker_provider",
        ));
    };
    let reviewer = args
        .reviewer
        .or_else(|| config.orchestrator.reviewer_provider.clone())
        .unwrap_or_else(|| worker.clone());

    let services = build_services(config).map_err(|e| report_provider_error(&e))?;
    let orchestrator = Orchestrator::new(
        Arc::clone(&services.dispatcher),
        Arc::clone(&services.store) as Arc<dyn RunStore>,
    );

    let iteration_task = IterationTask::new(task, worker, reviewer)
        .with_models(
            args.worker_model
                .or_else(|| config.orchestrator.worker_model.clone()),
            args.reviewer_model
                .or_else(|| config.orchestrator.reviewer_model.clone()),
        )
        .with_max_iterations(config.orchestrator.max_iterations())
        .with_working_directory(args.cwd)
        .with_session_key(args.session_key);
    let opts = RunOptions {
        cancel: Some(cancel_on_ctrl_c()),
        allow_unhealthy: args.allow_unhealthy,
    };

    match orchestrator.run(iteration_task, &opts).await {
        Ok(run) => print_json(&run_report(&services.store, run)),
        Err(err) => {
            if let Some(run) = err.run() {
                print_json(&run_report(&services.store, run.clone()))?;
            }
            Err(report_run_error(&err))
        }
    }
}

pub async fn execute_health(config: &Config, providers: Vec<String>) -> Result<(), ExitCode> {
    let health = HealthProbe::from_config(config).map_err(|e| report_provider_error(&e))?;

    let results = if providers.is_empty() {
        health.check_all().await
    } else {
        let known = health.provider_names();
        if let Some(unknown) = providers.iter().find(|p| !known.contains(p)) {
            return Err(report_provider_error(&ProviderError::invalid_argument(
                format!("unknown provider '{unknown}'. Valid providers: {}", known.join(", ")),
            )));
        }
        let mut results = Vec::with_capacity(providers.len());
        for provider in &providers {
            results.push(health.check(provider).await);
        }
        results
    };

    for result in &results {
        debug!(provider = %result.provider, status = %result.status, "Health probe result");
    }
    print_json(&results)
}

fn run_report(store: &MemoryStore, run: IterationRun) -> RunReport {
    RunReport {
        outputs: store.outputs(&run.id),
        reviews: store.reviews(&run.id),
        run,
    }
}

/// Cancellation token fired by the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            trigger.cancel();
        }
    });
    token
}

fn read_input(arg: Option<String>, what: &str) -> Result<String, ExitCode> {
    let text = match arg {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).map_err(|e| {
                eprintln!("✗ Failed to read {what} from stdin: {e}");
                ExitCode::INTERNAL
            })?;
            buf
        }
    };
    if text.trim().is_empty() {
        return Err(invalid(&format!("{what} is empty")));
    }
    Ok(text)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), ExitCode> {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Failed to serialize output: {e}");
            Err(ExitCode::INTERNAL)
        }
    }
}

fn invalid(message: &str) -> ExitCode {
    eprintln!("✗ {message}");
    ExitCode::INVALID
}

/// Print a user-facing report with context and suggestions.
pub(crate) fn report(err: &dyn UserFriendlyError) {
    eprintln!("✗ {}", redact_error_message(&err.user_message()));
    if let Some(context) = err.context() {
        eprintln!("  {}", redact_error_message(&context));
    }
    let suggestions = err.suggestions();
    if !suggestions.is_empty() {
        eprintln!("\n  Suggestions:");
        for suggestion in suggestions {
            eprintln!("    - {suggestion}");
        }
    }
}

fn report_provider_error(err: &ProviderError) -> ExitCode {
    report(err);
    ExitCode::from_provider_error(err)
}

fn report_dispatch_error(err: &DispatchError) -> ExitCode {
    match err.provider_error() {
        Some(provider_error) => report(provider_error),
        None => eprintln!("✗ {}", redact_error_message(&err.to_string())),
    }
    ExitCode::from_dispatch_error(err)
}

fn report_run_error(err: &RunError) -> ExitCode {
    match err {
        RunError::Failed { source, .. } => {
            report_dispatch_error(source);
        }
        other => eprintln!("✗ {}", redact_error_message(&other.to_string())),
    }
    ExitCode::from_run_error(err)
}
