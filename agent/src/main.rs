//! Host-Resident Telemetry Agent
//!
//! The agent is a lightweight service that executes monitoring tasks on the
//! local host and reports usage/status/log observations to a remote
//! message bus, raising alerts when observations cross operator-declared
//! thresholds. It runs built-in resource/process/log/service monitors plus
//! any declarative `.mon` monitors found in the configured directory.
// This is the main entry point for the agent binary. It is responsible for:
// - Initializing logging and configuration.
// - Parsing command-line arguments and applying overrides.
// - Handing everything else off to the Controller.
// - Handling signals for graceful shutdown.

// Use jemalloc as the global allocator for better performance.
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod cli;

use clap::Parser;
use tracing::{error, info};

use cli::CliArgs;
use monitor_core::{AgentConfig, Controller};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli_args = CliArgs::parse();

    // Initialize the logging framework (`tracing`): a daily-rolling JSON
    // appender with an env-overridable default filter.
    let file_appender = tracing_appender::rolling::daily(&cli_args.log_dir, "agent.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("agent=info,monitor_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    info!("host-resident telemetry agent starting up");
    info!(config_file = %cli_args.config_file.display(), "loading configuration");

    let mut config = match AgentConfig::load(&cli_args.config_file).await {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration, aborting startup");
            std::process::exit(1);
        }
    };

    config.apply_cli_overrides(
        cli_args.ca_bundle_path,
        cli_args.disable_ssl_verification,
        cli_args.external_monitors_dir,
        cli_args.local_only,
    );

    let fqdn = monitor_core::sysinfo_provider::fqdn();
    info!(%fqdn, "resolved host identity");

    let mut controller = Controller::new(config, fqdn);
    let cancellation_token = controller.cancellation_token();

    if let Err(err) = controller.start().await {
        error!(error = %err, "fatal error during startup");
        let code = err.exit_code().unwrap_or(1);
        std::process::exit(code);
    }

    info!("agent running; entering main loop");

    let shutdown_signal = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
            info!("received Ctrl+C");
        }
    };

    tokio::select! {
        _ = cancellation_token.cancelled() => {
            info!("scheduler cancelled internally");
        }
        _ = shutdown_signal => {
            info!("shutdown signal received");
        }
    }

    controller.shutdown().await;
    info!("agent shutdown complete");
    Ok(())
}
