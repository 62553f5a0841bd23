pub mod client;
pub mod config;
pub mod grouper;
pub mod metrics_defs;
pub mod patterns;
pub mod reporter;
pub mod scope;
pub mod sink;
pub mod snapshot;

#[cfg(test)]
mod testutils;

use crate::client::{ClientError, StatusClient};
use crate::config::Config;
use crate::grouper::Grouper;
use crate::metrics_defs::{CONTEXTS, CYCLE_DURATION, CYCLE_FAILURES, RECORDS_EMITTED};
use crate::reporter::{OutputMetric, ReportError, Reporter};
use crate::scope::{ConfigError, ScopePolicy};
use crate::sink::{MetricSink, SinkError};
use crate::snapshot::{DecodeError, Decoder, StatusView};
use shared::{counter, gauge, histogram};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

#[derive(thiserror::Error, Debug)]
pub enum CollectorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Why a cycle emitted nothing.
#[derive(thiserror::Error, Debug)]
pub enum CycleError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] ClientError),
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("invariant violated while reporting: {0}")]
    Report(#[from] ReportError),
    #[error("emit failed: {0}")]
    Emit(#[from] SinkError),
}

impl CycleError {
    pub fn stage(&self) -> &'static str {
        match self {
            CycleError::Fetch(_) => "fetch",
            CycleError::Decode(_) => "decode",
            CycleError::Report(_) => "report",
            CycleError::Emit(_) => "emit",
        }
    }
}

/// Turns status views into records.
///
/// Owns the state that outlives a cycle: the context decode cache, the scope
/// policy with its pattern memoization and the reporter's status bucket
/// cache. None of it is ever evicted.
pub struct Engine {
    decoder: Decoder,
    policy: ScopePolicy,
    reporter: Reporter,
}

impl Engine {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Ok(Engine {
            decoder: Decoder::new(),
            policy: ScopePolicy::from_config(config)?,
            reporter: Reporter::new(config),
        })
    }

    pub fn policy(&self) -> &ScopePolicy {
        &self.policy
    }

    /// Decodes, groups and aggregates one view. Nothing is returned unless
    /// every stage succeeds.
    pub fn process(&mut self, view: &StatusView) -> Result<Vec<OutputMetric>, CycleError> {
        let state = self.decoder.decode(view)?;
        let groups = Grouper::new(&state, &self.policy).groups();
        tracing::debug!(
            contexts = state.contexts.len(),
            cached_contexts = self.decoder.cached_contexts(),
            groups = groups.len(),
            "grouped contexts"
        );
        gauge!(CONTEXTS).set(state.contexts.len() as f64);

        let records = self.reporter.report(&state, &self.policy, &groups)?;
        Ok(records)
    }
}

/// Polls the gateway and hands each cycle's records to a sink.
pub struct Collector<S> {
    name: String,
    interval: Duration,
    client: StatusClient,
    engine: Engine,
    sink: S,
}

impl<S: MetricSink> Collector<S> {
    pub fn new(config: &Config, sink: S) -> Result<Self, CollectorError> {
        Ok(Collector {
            name: config.name.clone(),
            interval: config.interval(),
            engine: Engine::new(config)?,
            client: StatusClient::new(config)?,
            sink,
        })
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Runs one fetch, decode, group, aggregate and emit cycle. Returns the
    /// number of records emitted.
    pub async fn poll_once(&mut self) -> Result<usize, CycleError> {
        let start = Instant::now();
        let result = self.cycle().await;
        histogram!(CYCLE_DURATION).record(start.elapsed().as_secs_f64());

        match &result {
            Ok(emitted) => {
                counter!(RECORDS_EMITTED).increment(*emitted as u64);
                tracing::debug!(
                    collector = %self.name,
                    emitted,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "cycle complete"
                );
            }
            Err(e) => {
                counter!(CYCLE_FAILURES, &[("stage", e.stage())]).increment(1);
                tracing::error!(collector = %self.name, stage = e.stage(), error = %e, "cycle failed");
            }
        }
        result
    }

    async fn cycle(&mut self) -> Result<usize, CycleError> {
        let view = self.client.fetch().await?;
        let records = self.engine.process(&view)?;
        self.sink.emit(&records)?;
        Ok(records.len())
    }

    /// Polls on a fixed interval until interrupted. A cycle always finishes
    /// before the next one starts; ticks missed meanwhile are delayed.
    pub async fn run(&mut self) {
        tracing::info!(
            collector = %self.name,
            url = %self.client.url(),
            interval_secs = self.interval.as_secs(),
            "starting collector"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(collector = %self.name, "shutting down");
                    break;
                }
                _ = interval.tick() => {
                    // Failures are logged and counted; the next tick starts fresh.
                    let _ = self.poll_once().await;
                }
            }
        }
    }
}

/// Polls forever on a current-thread runtime.
pub fn run<S: MetricSink>(config: &Config, sink: S) -> Result<(), CollectorError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(async {
        let mut collector = Collector::new(config, sink)?;
        collector.run().await;
        Ok::<(), CollectorError>(())
    })
}
