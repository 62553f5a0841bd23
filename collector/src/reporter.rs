//! Aggregation of group counters into output records.

use crate::config::Config;
use crate::grouper::Group;
use crate::metrics_defs::{KongMetric, MetricSource};
use crate::scope::{Dimension, ScopePolicy, StatusScope};
use crate::snapshot::{ContextId, KongState, ResourceContext, StatusCounters};
use indexmap::IndexMap;
use serde::Serialize;
use shared::metrics_defs::MetricType;
use std::collections::HashMap;
use thiserror::Error;

/// Grouping produced a group the reporter cannot aggregate. These indicate a
/// defect in grouping, not bad input.
#[derive(Error, Debug, PartialEq)]
pub enum ReportError {
    #[error("empty group")]
    EmptyGroup,

    #[error("group member {0} is missing from the decoded state")]
    UnknownContext(ContextId),
}

/// One emitted observation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutputMetric {
    pub name: &'static str,
    pub kind: MetricType,
    pub value: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub dimensions: IndexMap<String, String>,
}

/// The status dimension value a status code is reported under.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StatusBucket {
    Exact(String),
    /// Leading-digit class, e.g. `4xx`
    Class(String),
    Miss,
}

impl StatusBucket {
    pub fn dimension_value(&self) -> Option<&str> {
        match self {
            StatusBucket::Exact(code) | StatusBucket::Class(code) => Some(code),
            StatusBucket::Miss => None,
        }
    }
}

pub struct Reporter {
    host: Option<String>,
    extra_dimensions: IndexMap<String, String>,
    enabled: Vec<KongMetric>,
    status_buckets: HashMap<String, StatusBucket>,
}

impl Reporter {
    pub fn new(config: &Config) -> Self {
        Reporter {
            host: config.host.clone(),
            extra_dimensions: config.extra_dimensions.clone(),
            enabled: KongMetric::ALL
                .into_iter()
                .filter(|m| config.metric_enabled(*m))
                .collect(),
            status_buckets: HashMap::new(),
        }
    }

    /// Enabled metrics summed per group without a status split.
    pub fn http_metrics(&self, policy: &ScopePolicy) -> Vec<KongMetric> {
        let split_by_status = policy.will_report(Dimension::StatusCode);
        self.enabled_from(|source| match source {
            MetricSource::HttpScoped => true,
            MetricSource::StatusScoped => !split_by_status,
            _ => false,
        })
    }

    /// Enabled metrics summed per group and status bucket.
    pub fn status_metrics(&self, policy: &ScopePolicy) -> Vec<KongMetric> {
        if !policy.will_report(Dimension::StatusCode) {
            return Vec::new();
        }
        self.enabled_from(|source| source == MetricSource::StatusScoped)
    }

    fn enabled_from(&self, accept: impl Fn(MetricSource) -> bool) -> Vec<KongMetric> {
        self.enabled
            .iter()
            .copied()
            .filter(|m| accept(m.source()))
            .collect()
    }

    /// Builds every record of one cycle: per group metrics first, then the
    /// server and database metrics.
    pub fn report(
        &mut self,
        state: &KongState,
        policy: &ScopePolicy,
        groups: &[Group],
    ) -> Result<Vec<OutputMetric>, ReportError> {
        let http_metrics = self.http_metrics(policy);
        let status_metrics = self.status_metrics(policy);

        let mut records = Vec::new();
        for group in groups {
            let representative = representative(state, group)?;
            let dimensions = self.dimensions(policy, representative);

            for metric in &http_metrics {
                let mut value = 0u64;
                for id in group {
                    let metrics = state
                        .metrics
                        .get(id)
                        .ok_or_else(|| ReportError::UnknownContext(id.clone()))?;
                    value = value.saturating_add(metrics.get(*metric).unwrap_or_default());
                }
                records.push(self.record(*metric, value, dimensions.clone()));
            }

            if status_metrics.is_empty() {
                continue;
            }
            let buckets = self.bucket_counters(state, &policy.status_codes, group)?;
            for (bucket, counters) in &buckets {
                let mut dimensions = dimensions.clone();
                if let Some(status) = bucket.dimension_value() {
                    dimensions.insert(Dimension::StatusCode.to_string(), status.to_string());
                }
                for metric in &status_metrics {
                    let value = counters.get(*metric).unwrap_or_default();
                    records.push(self.record(*metric, value, dimensions.clone()));
                }
            }
        }

        records.extend(self.flat_records(&state.server_metrics, MetricSource::Server));
        records.extend(self.flat_records(&state.database_metrics, MetricSource::Database));
        Ok(records)
    }

    fn bucket_counters(
        &mut self,
        state: &KongState,
        scope: &StatusScope,
        group: &Group,
    ) -> Result<IndexMap<StatusBucket, StatusCounters>, ReportError> {
        let mut buckets: IndexMap<StatusBucket, StatusCounters> = IndexMap::new();
        for id in group {
            let metrics = state
                .metrics
                .get(id)
                .ok_or_else(|| ReportError::UnknownContext(id.clone()))?;
            for (code, counters) in &metrics.status_codes {
                let sum = buckets.entry(self.classify(scope, code)).or_default();
                sum.response_count = sum.response_count.saturating_add(counters.response_count);
                sum.upstream_latency =
                    sum.upstream_latency.saturating_add(counters.upstream_latency);
                sum.request_size = sum.request_size.saturating_add(counters.request_size);
                sum.response_size = sum.response_size.saturating_add(counters.response_size);
            }
        }
        Ok(buckets)
    }

    /// Classification is cached per code for the lifetime of the reporter.
    pub fn classify(&mut self, scope: &StatusScope, code: &str) -> StatusBucket {
        if let Some(bucket) = self.status_buckets.get(code) {
            return bucket.clone();
        }
        let hit = scope.codes.admits(code);
        let bucket = if scope.report_groups && !hit {
            let class: String = code.chars().take(1).collect();
            StatusBucket::Class(format!("{class}xx"))
        } else if !hit {
            StatusBucket::Miss
        } else {
            StatusBucket::Exact(code.to_string())
        };
        self.status_buckets.insert(code.to_string(), bucket.clone());
        bucket
    }

    fn dimensions(&self, policy: &ScopePolicy, context: &ResourceContext) -> IndexMap<String, String> {
        let mut dimensions = self.extra_dimensions.clone();
        for dimension in Dimension::CONTEXT {
            if !policy.will_report(dimension) {
                continue;
            }
            if let Some(value) = context.value(dimension)
                && policy.scope(dimension).admits(value)
            {
                dimensions.insert(dimension.to_string(), value.to_string());
            }
        }
        dimensions
    }

    fn flat_records(
        &self,
        values: &IndexMap<KongMetric, u64>,
        source: MetricSource,
    ) -> Vec<OutputMetric> {
        self.enabled
            .iter()
            .filter(|m| m.source() == source)
            .filter_map(|m| values.get(m).map(|v| (*m, *v)))
            .map(|(metric, value)| self.record(metric, value, self.extra_dimensions.clone()))
            .collect()
    }

    fn record(
        &self,
        metric: KongMetric,
        value: u64,
        dimensions: IndexMap<String, String>,
    ) -> OutputMetric {
        let def = metric.def();
        OutputMetric {
            name: def.name,
            kind: def.metric_type,
            value,
            host: self.host.clone(),
            dimensions,
        }
    }

    #[cfg(test)]
    fn cached_statuses(&self) -> usize {
        self.status_buckets.len()
    }
}

/// Any member describes the group's reported dimensions. Every member must be
/// present in the state.
fn representative<'s>(state: &'s KongState, group: &Group) -> Result<&'s ResourceContext, ReportError> {
    let first = group.first().ok_or(ReportError::EmptyGroup)?;
    for id in group {
        if !state.contexts.contains_key(id) || !state.metrics.contains_key(id) {
            return Err(ReportError::UnknownContext(id.clone()));
        }
    }
    state
        .context(first)
        .ok_or_else(|| ReportError::UnknownContext(first.clone()))
}
