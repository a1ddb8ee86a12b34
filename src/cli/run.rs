//! CLI entry point and dispatch logic
//!
//! `run()` parses arguments, discovers the configuration, initialises
//! tracing, builds the tokio runtime and hands off to the command handlers.
//! It prints every error itself; `main` only maps the code to the process
//! exit status.

use clap::Parser;

use taskrelay_config::{CliArgs, Config};
use taskrelay_utils::logging::init_tracing;

use super::args::{Cli, Commands};
use super::commands::{self, DispatchArgs, IterateArgs};
use crate::exit_codes::ExitCode;

pub fn run() -> Result<(), ExitCode> {
    run_with(Cli::parse())
}

/// Run an already-parsed command line.
pub fn run_with(cli: Cli) -> Result<(), ExitCode> {
    let cli_args = cli_args(&cli);

    let config = match Config::discover(&cli_args) {
        Ok(config) => config,
        Err(err) => {
            match err.downcast_ref::<taskrelay_utils::ConfigError>() {
                Some(config_err) => commands::report(config_err),
                None => eprintln!("✗ {err:#}"),
            }
            return Err(ExitCode::INVALID);
        }
    };

    let verbose = config.defaults.verbose.unwrap_or(false);
    if let Err(e) = init_tracing(verbose, cli.log_json) {
        eprintln!("✗ Failed to initialise logging: {e}");
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    rt.block_on(async {
        match cli.command {
            Commands::Dispatch {
                prompt,
                fallback,
                allow_unhealthy,
                skip_health_check,
                cwd,
                ..
            } => {
                let args = DispatchArgs {
                    prompt,
                    fallback,
                    allow_unhealthy,
                    skip_health_check,
                    cwd,
                };
                commands::execute_dispatch(&config, args).await
            }
            Commands::Iterate {
                task,
                worker,
                worker_model,
                reviewer,
                reviewer_model,
                cwd,
                session_key,
                allow_unhealthy,
                ..
            } => {
                let args = IterateArgs {
                    task,
                    worker,
                    worker_model,
                    reviewer,
                    reviewer_model,
                    cwd,
                    session_key,
                    allow_unhealthy,
                };
                commands::execute_iterate(&config, args).await
            }
            Commands::Health { providers } => commands::execute_health(&config, providers).await,
        }
    })
}

/// Configuration overrides carried by the command line
fn cli_args(cli: &Cli) -> CliArgs {
    let mut args = CliArgs {
        config_path: cli.config.clone(),
        verbose: cli.verbose.then_some(true),
        cache_ttl_secs: cli.cache_ttl,
        ..CliArgs::default()
    };
    match &cli.command {
        Commands::Dispatch { provider, model, .. } => {
            args.provider = provider.clone();
            args.model = model.clone();
        }
        Commands::Iterate { max_iterations, .. } => {
            args.max_iterations = *max_iterations;
        }
        Commands::Health { .. } => {}
    }
    args
}
