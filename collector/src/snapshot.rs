//! Decoding of the gateway status view into resource records and dimension
//! indices.
//!
//! Each traffic context is reported by the gateway as an encoded context string
//! (identity fields joined by `0x1f`, `0x00` standing for "no value", first
//! field the encoding version) mapped to an encoded counter string (comma
//! separated counters followed by `code:count:upstream_latency:request_size:response_size`
//! status records).

use crate::metrics_defs::{KongMetric, MetricSource};
use crate::scope::Dimension;
use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

const FIELD_SEPARATOR: char = '\x1f';
const NO_VALUE: &str = "\x00";
const COUNTER_SEPARATOR: char = ',';
const STATUS_SEPARATOR: char = ':';

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Context fields following the version token, per encoding version.
const CONTEXT_FIELDS_V1: [Dimension; 6] = Dimension::CONTEXT;

const COUNTERS_V1: [KongMetric; 6] = [
    KongMetric::ResponseCount,
    KongMetric::RequestLatency,
    KongMetric::KongLatency,
    KongMetric::UpstreamLatency,
    KongMetric::RequestSize,
    KongMetric::ResponseSize,
];

const STATUS_COUNTERS_V1: [KongMetric; 4] = [
    KongMetric::ResponseCount,
    KongMetric::UpstreamLatency,
    KongMetric::RequestSize,
    KongMetric::ResponseSize,
];

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
    #[error("invalid encoding version {version:?} in context {context:?}")]
    InvalidVersion { context: String, version: String },

    #[error("unsupported encoding version {version} in context {context:?}")]
    UnsupportedVersion { context: String, version: u32 },

    #[error("context {context:?} has {found} fields, expected {expected}")]
    MissingContextFields {
        context: String,
        found: usize,
        expected: usize,
    },

    #[error("malformed counters {counters:?} for context {context}: {reason}")]
    MalformedCounters {
        context: ContextId,
        counters: String,
        reason: String,
    },

    #[error("invalid {key} value {value}")]
    InvalidFlatCounter { key: &'static str, value: String },
}

/// Stable identifier of an encoded context string (hex SHA-256 of the raw
/// string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(Arc<str>);

impl ContextId {
    pub fn from_raw(raw: &str) -> Self {
        let digest = Sha256::digest(raw.as_bytes());
        ContextId(format!("{digest:x}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one traffic context. `None` means the resource class does not
/// apply (health checks have no API or service).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceContext {
    pub id: ContextId,
    pub version: u32,
    pub api_id: Option<String>,
    pub api_name: Option<String>,
    pub service_id: Option<String>,
    pub service_name: Option<String>,
    pub route_id: Option<String>,
    pub http_method: Option<String>,
}

impl ResourceContext {
    pub fn parse(raw: &str) -> Result<Self, DecodeError> {
        let mut tokens = raw.split(FIELD_SEPARATOR);
        let version_token = tokens.next().unwrap_or_default();
        let version: u32 = version_token
            .parse()
            .map_err(|_| DecodeError::InvalidVersion {
                context: raw.to_string(),
                version: version_token.to_string(),
            })?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(DecodeError::UnsupportedVersion {
                context: raw.to_string(),
                version,
            });
        }

        let fields: Vec<Option<String>> = tokens
            .take(CONTEXT_FIELDS_V1.len())
            .map(|token| (token != NO_VALUE).then(|| token.to_string()))
            .collect();
        let [api_id, api_name, service_id, service_name, route_id, http_method] =
            <[Option<String>; 6]>::try_from(fields).map_err(|fields| {
                DecodeError::MissingContextFields {
                    context: raw.to_string(),
                    found: fields.len(),
                    expected: CONTEXT_FIELDS_V1.len(),
                }
            })?;

        Ok(ResourceContext {
            id: ContextId::from_raw(raw),
            version,
            api_id,
            api_name,
            service_id,
            service_name,
            route_id,
            http_method,
        })
    }

    pub fn value(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::ApiId => self.api_id.as_deref(),
            Dimension::ApiName => self.api_name.as_deref(),
            Dimension::ServiceId => self.service_id.as_deref(),
            Dimension::ServiceName => self.service_name.as_deref(),
            Dimension::RouteId => self.route_id.as_deref(),
            Dimension::HttpMethod => self.http_method.as_deref(),
            Dimension::StatusCode => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusCounters {
    pub response_count: u64,
    pub upstream_latency: u64,
    pub request_size: u64,
    pub response_size: u64,
}

impl StatusCounters {
    pub fn get(&self, metric: KongMetric) -> Option<u64> {
        match metric {
            KongMetric::ResponseCount => Some(self.response_count),
            KongMetric::UpstreamLatency => Some(self.upstream_latency),
            KongMetric::RequestSize => Some(self.request_size),
            KongMetric::ResponseSize => Some(self.response_size),
            _ => None,
        }
    }

    fn set(&mut self, metric: KongMetric, value: u64) {
        match metric {
            KongMetric::ResponseCount => self.response_count = value,
            KongMetric::UpstreamLatency => self.upstream_latency = value,
            KongMetric::RequestSize => self.request_size = value,
            KongMetric::ResponseSize => self.response_size = value,
            _ => {}
        }
    }
}

/// Cumulative counters of one context at the time of the poll.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceMetrics {
    pub response_count: u64,
    pub request_latency: u64,
    pub kong_latency: u64,
    pub upstream_latency: u64,
    pub request_size: u64,
    pub response_size: u64,
    pub status_codes: IndexMap<String, StatusCounters>,
}

impl ResourceMetrics {
    pub fn parse(context: &ResourceContext, encoded: &str) -> Result<Self, DecodeError> {
        let malformed = |reason: String| DecodeError::MalformedCounters {
            context: context.id.clone(),
            counters: encoded.to_string(),
            reason,
        };

        let tokens: Vec<&str> = encoded.split(COUNTER_SEPARATOR).collect();
        if tokens.len() < COUNTERS_V1.len() {
            return Err(malformed(format!(
                "expected at least {} counters, found {}",
                COUNTERS_V1.len(),
                tokens.len()
            )));
        }
        let (counters, statuses) = tokens.split_at(COUNTERS_V1.len());

        let mut metrics = ResourceMetrics::default();
        for (metric, token) in COUNTERS_V1.iter().zip(counters) {
            let value = parse_counter(token)
                .ok_or_else(|| malformed(format!("invalid {} {token:?}", metric.key())))?;
            metrics.set(*metric, value);
        }

        for record in statuses {
            let mut parts = record.split(STATUS_SEPARATOR);
            let code = parts.next().unwrap_or_default();
            if code.is_empty() {
                return Err(malformed(format!("status record {record:?} has no code")));
            }
            let mut status = StatusCounters::default();
            for metric in STATUS_COUNTERS_V1 {
                let token = parts.next().ok_or_else(|| {
                    malformed(format!("status record {record:?} is missing {}", metric.key()))
                })?;
                let value = parse_counter(token).ok_or_else(|| {
                    malformed(format!("invalid {} {token:?} for status {code}", metric.key()))
                })?;
                status.set(metric, value);
            }
            metrics.status_codes.insert(code.to_string(), status);
        }

        Ok(metrics)
    }

    pub fn get(&self, metric: KongMetric) -> Option<u64> {
        match metric {
            KongMetric::ResponseCount => Some(self.response_count),
            KongMetric::RequestLatency => Some(self.request_latency),
            KongMetric::KongLatency => Some(self.kong_latency),
            KongMetric::UpstreamLatency => Some(self.upstream_latency),
            KongMetric::RequestSize => Some(self.request_size),
            KongMetric::ResponseSize => Some(self.response_size),
            _ => None,
        }
    }

    fn set(&mut self, metric: KongMetric, value: u64) {
        match metric {
            KongMetric::ResponseCount => self.response_count = value,
            KongMetric::RequestLatency => self.request_latency = value,
            KongMetric::KongLatency => self.kong_latency = value,
            KongMetric::UpstreamLatency => self.upstream_latency = value,
            KongMetric::RequestSize => self.request_size = value,
            KongMetric::ResponseSize => self.response_size = value,
            _ => {}
        }
    }
}

fn parse_counter(token: &str) -> Option<u64> {
    token.trim().parse().ok()
}

/// Maps each value of one dimension, including "no value", to the contexts
/// carrying it. Values keep their discovery order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DimensionIndex {
    unset: IndexSet<ContextId>,
    values: IndexMap<String, IndexSet<ContextId>>,
}

impl DimensionIndex {
    pub fn insert(&mut self, value: Option<&str>, id: ContextId) {
        match value {
            None => {
                self.unset.insert(id);
            }
            Some(value) => {
                self.values.entry(value.to_string()).or_default().insert(id);
            }
        }
    }

    pub fn get(&self, value: Option<&str>) -> Option<&IndexSet<ContextId>> {
        match value {
            None => (!self.unset.is_empty()).then_some(&self.unset),
            Some(value) => self.values.get(value),
        }
    }

    /// Contexts without a value for this dimension.
    pub fn unset(&self) -> &IndexSet<ContextId> {
        &self.unset
    }

    /// Non-null values, in discovery order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexSet<ContextId>)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every context carrying some value for this dimension.
    pub fn with_value(&self) -> IndexSet<ContextId> {
        self.values.values().flatten().cloned().collect()
    }

    /// Number of distinct keys, counting "no value" when present.
    pub fn len(&self) -> usize {
        self.values.len() + usize::from(!self.unset.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Indices {
    pub api_ids: DimensionIndex,
    pub api_names: DimensionIndex,
    pub service_ids: DimensionIndex,
    pub service_names: DimensionIndex,
    pub route_ids: DimensionIndex,
    pub http_methods: DimensionIndex,
    pub status_codes: DimensionIndex,
}

impl Indices {
    pub fn get(&self, dimension: Dimension) -> &DimensionIndex {
        match dimension {
            Dimension::ApiId => &self.api_ids,
            Dimension::ApiName => &self.api_names,
            Dimension::ServiceId => &self.service_ids,
            Dimension::ServiceName => &self.service_names,
            Dimension::RouteId => &self.route_ids,
            Dimension::HttpMethod => &self.http_methods,
            Dimension::StatusCode => &self.status_codes,
        }
    }

    fn get_mut(&mut self, dimension: Dimension) -> &mut DimensionIndex {
        match dimension {
            Dimension::ApiId => &mut self.api_ids,
            Dimension::ApiName => &mut self.api_names,
            Dimension::ServiceId => &mut self.service_ids,
            Dimension::ServiceName => &mut self.service_names,
            Dimension::RouteId => &mut self.route_ids,
            Dimension::HttpMethod => &mut self.http_methods,
            Dimension::StatusCode => &mut self.status_codes,
        }
    }

    fn add_context(&mut self, context: &ResourceContext) {
        for dimension in Dimension::CONTEXT {
            self.get_mut(dimension)
                .insert(context.value(dimension), context.id.clone());
        }
    }

    fn add_statuses(&mut self, id: &ContextId, metrics: &ResourceMetrics) {
        for code in metrics.status_codes.keys() {
            self.status_codes.insert(Some(code), id.clone());
        }
    }
}

/// The status view served by the gateway.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct StatusView {
    /// Encoded context string to encoded counter string
    pub signalfx: IndexMap<String, String>,
    #[serde(default)]
    pub server: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub database: IndexMap<String, serde_json::Value>,
}

/// Everything decoded from one poll.
#[derive(Clone, Debug, Default)]
pub struct KongState {
    pub contexts: IndexMap<ContextId, Arc<ResourceContext>>,
    pub metrics: IndexMap<ContextId, ResourceMetrics>,
    pub indices: Indices,
    pub server_metrics: IndexMap<KongMetric, u64>,
    pub database_metrics: IndexMap<KongMetric, u64>,
}

impl KongState {
    pub fn context(&self, id: &ContextId) -> Option<&ResourceContext> {
        self.contexts.get(id).map(Arc::as_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Decodes status views, caching parsed context strings for the lifetime of
/// the decoder.
///
/// The gateway re-emits the same context strings on every poll. The cache is
/// never evicted and grows with the number of distinct contexts ever seen,
/// which stays small for a stable set of routes.
#[derive(Debug, Default)]
pub struct Decoder {
    contexts: HashMap<String, Arc<ResourceContext>>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_contexts(&self) -> usize {
        self.contexts.len()
    }

    pub fn decode(&mut self, view: &StatusView) -> Result<KongState, DecodeError> {
        let mut state = KongState::default();

        for (raw_context, encoded_metrics) in &view.signalfx {
            let context = self.load_context(raw_context)?;
            let metrics = ResourceMetrics::parse(&context, encoded_metrics)?;

            state.indices.add_context(&context);
            state.indices.add_statuses(&context.id, &metrics);
            state.metrics.insert(context.id.clone(), metrics);
            state.contexts.insert(context.id.clone(), context);
        }

        state.server_metrics = decode_flat(&view.server, MetricSource::Server)?;
        state.database_metrics = decode_flat(&view.database, MetricSource::Database)?;

        Ok(state)
    }

    fn load_context(&mut self, raw: &str) -> Result<Arc<ResourceContext>, DecodeError> {
        if let Some(context) = self.contexts.get(raw) {
            return Ok(context.clone());
        }
        let context = Arc::new(ResourceContext::parse(raw)?);
        self.contexts.insert(raw.to_string(), context.clone());
        Ok(context)
    }
}

/// Reads the known keys of a flat section. Absent keys are omitted and
/// negative values read as zero.
fn decode_flat(
    section: &IndexMap<String, serde_json::Value>,
    source: MetricSource,
) -> Result<IndexMap<KongMetric, u64>, DecodeError> {
    let mut decoded = IndexMap::new();
    for metric in KongMetric::ALL.iter().filter(|m| m.source() == source) {
        let Some(value) = section.get(metric.key()) else {
            continue;
        };
        let invalid = || DecodeError::InvalidFlatCounter {
            key: metric.key(),
            value: value.to_string(),
        };
        let value = match value {
            serde_json::Value::Bool(b) => u64::from(*b),
            serde_json::Value::Number(n) => match (n.as_u64(), n.as_i64(), n.as_f64()) {
                (Some(v), _, _) => v,
                (None, Some(_), _) => 0,
                (None, None, Some(f)) if f.is_finite() => f.max(0.0).trunc() as u64,
                _ => return Err(invalid()),
            },
            serde_json::Value::String(s) => {
                let s = s.trim();
                match s.parse::<u64>() {
                    Ok(v) => v,
                    Err(_) => s.parse::<i64>().map(|_| 0).map_err(|_| invalid())?,
                }
            }
            _ => return Err(invalid()),
        };
        decoded.insert(*metric, value);
    }
    Ok(decoded)
}
