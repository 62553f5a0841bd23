use clap::{Args, Parser};
use collector::metrics_defs::{ALL_METRICS, KongMetric};
use collector::sink::{JsonLinesSink, RecorderSink};
use collector::{Collector, CollectorError, CycleError, Engine};
use config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod config;

#[derive(Parser)]
#[command(name = "kongstat", version, about = "Reports gateway traffic metrics")]
enum CliCommand {
    /// Poll the status endpoint until interrupted
    Run(ConfigArgs),
    /// Validate the configuration and print the effective reporting scope
    CheckConfig(ConfigArgs),
    /// Run a single cycle and print each record as a JSON line
    PollOnce(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Scope(#[from] collector::scope::ConfigError),
    #[error(transparent)]
    Collector(#[from] CollectorError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "exiting");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: CliCommand) -> Result<(), CliError> {
    match cli {
        CliCommand::Run(args) => {
            let config = Config::from_file(&args.config)?;
            let _sentry = init_logging(config.common.logging.as_ref());
            if let Some(metrics) = &config.common.metrics {
                init_statsd(metrics)?;
            }
            collector::run(&config.collector, RecorderSink)?;
        }
        CliCommand::CheckConfig(args) => {
            let config = Config::from_file(&args.config)?;
            let engine = Engine::new(&config.collector)?;
            println!("{}", engine.policy());
        }
        CliCommand::PollOnce(args) => {
            let config = Config::from_file(&args.config)?;
            let _sentry = init_logging(config.common.logging.as_ref());
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            rt.block_on(async {
                let sink = JsonLinesSink::new(std::io::stdout().lock());
                let mut collector = Collector::new(&config.collector, sink)?;
                collector.poll_once().await?;
                Ok::<(), CliError>(())
            })?;
        }
    }
    Ok(())
}

/// Installs the global subscriber. The returned guard flushes sentry events
/// on drop and must outlive the collector.
fn init_logging(config: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let default = LoggingConfig::default();
    let config = config.unwrap_or(&default);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = guard
        .is_some()
        .then(sentry::integrations::tracing::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

fn init_statsd(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(config.prefix.as_deref())
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    shared::metrics_defs::describe_all(ALL_METRICS);
    shared::metrics_defs::describe_all(&KongMetric::ALL.map(|m| m.def()));
    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd exporter installed"
    );
    Ok(())
}
