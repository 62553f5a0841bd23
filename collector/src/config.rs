use crate::metrics_defs::KongMetric;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_URL: &str = "http://localhost:8001/signalfx";
const DEFAULT_INTERVAL_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("interval_secs cannot be 0")]
    InvalidInterval,

    #[error("invalid status endpoint URL {0:?}: {1}")]
    InvalidUrl(String, url::ParseError),

    #[error("client_cert_key is set but client_cert is not")]
    ClientKeyWithoutCert,

    #[error("empty auth header name")]
    EmptyAuthHeader,
}

/// Collector configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Instance name, attached to log output
    #[serde(default = "default_name")]
    pub name: String,
    /// Host attached to every emitted record
    pub host: Option<String>,
    /// Gateway status endpoint
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    pub auth_header: Option<AuthHeader>,
    #[serde(default = "default_true")]
    pub verify_certs: bool,
    /// PEM bundle of additional trusted roots
    pub ca_bundle: Option<PathBuf>,
    /// PEM client certificate. May also hold the private key when
    /// `client_cert_key` is unset.
    pub client_cert: Option<PathBuf>,
    pub client_cert_key: Option<PathBuf>,
    /// Static dimensions added to every record
    #[serde(default)]
    pub extra_dimensions: IndexMap<String, String>,
    /// Per-metric overrides of the default enable flags
    #[serde(default)]
    pub metrics: HashMap<KongMetric, bool>,
    #[serde(default)]
    pub scope: ScopeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: default_name(),
            host: None,
            url: default_url(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            auth_header: None,
            verify_certs: true,
            ca_bundle: None,
            client_cert: None,
            client_cert_key: None,
            extra_dimensions: IndexMap::new(),
            metrics: HashMap::new(),
            scope: ScopeConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_secs == 0 {
            return Err(ValidationError::InvalidInterval);
        }

        Url::parse(&self.url).map_err(|e| ValidationError::InvalidUrl(self.url.clone(), e))?;

        if self.client_cert_key.is_some() && self.client_cert.is_none() {
            return Err(ValidationError::ClientKeyWithoutCert);
        }

        if let Some(header) = &self.auth_header
            && header.name.is_empty()
        {
            return Err(ValidationError::EmptyAuthHeader);
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn metric_enabled(&self, metric: KongMetric) -> bool {
        self.metrics
            .get(&metric)
            .copied()
            .unwrap_or_else(|| metric.enabled_by_default())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AuthHeader {
    pub name: String,
    pub value: String,
}

/// A pattern list entry. Numbers are accepted so status codes can be written
/// bare.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PatternValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl PatternValue {
    /// Renders the entry as written, so `1.5` stays `1.5` and `2.0` stays
    /// `2.0`.
    pub fn to_pattern(&self) -> String {
        match self {
            PatternValue::Integer(i) => i.to_string(),
            PatternValue::Float(f) => format!("{f:?}"),
            PatternValue::Text(s) => s.clone(),
        }
    }

    /// Status codes are integers, so a float entry is truncated: `404.0`
    /// matches `404`.
    pub fn to_status_pattern(&self) -> String {
        match self {
            PatternValue::Float(f) => (f.trunc() as i64).to_string(),
            _ => self.to_pattern(),
        }
    }
}

impl From<&str> for PatternValue {
    fn from(s: &str) -> Self {
        PatternValue::Text(s.to_string())
    }
}

/// Reporting scope of one dimension
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DimensionConfig {
    #[serde(default = "default_true")]
    pub report: bool,
    #[serde(default)]
    pub whitelist: Vec<PatternValue>,
    #[serde(default)]
    pub blacklist: Vec<PatternValue>,
}

impl Default for DimensionConfig {
    fn default() -> Self {
        DimensionConfig {
            report: true,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}

impl DimensionConfig {
    pub fn disabled() -> Self {
        DimensionConfig {
            report: false,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StatusCodeConfig {
    /// Report exact status codes
    #[serde(default)]
    pub report: bool,
    /// Report leading-digit classes (`2xx`, `4xx`, ...) for codes that are
    /// not reported exactly
    #[serde(default = "default_true")]
    pub report_groups: bool,
    #[serde(default)]
    pub whitelist: Vec<PatternValue>,
    #[serde(default)]
    pub blacklist: Vec<PatternValue>,
}

impl Default for StatusCodeConfig {
    fn default() -> Self {
        StatusCodeConfig {
            report: false,
            report_groups: true,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScopeConfig {
    pub http_methods: DimensionConfig,
    pub status_codes: StatusCodeConfig,
    pub api_ids: DimensionConfig,
    pub api_names: DimensionConfig,
    pub service_ids: DimensionConfig,
    pub service_names: DimensionConfig,
    pub route_ids: DimensionConfig,
}

impl ScopeConfig {
    /// Reports no dimension at all, including status codes.
    pub fn unscoped() -> Self {
        ScopeConfig {
            http_methods: DimensionConfig::disabled(),
            status_codes: StatusCodeConfig {
                report_groups: false,
                ..Default::default()
            },
            api_ids: DimensionConfig::disabled(),
            api_names: DimensionConfig::disabled(),
            service_ids: DimensionConfig::disabled(),
            service_names: DimensionConfig::disabled(),
            route_ids: DimensionConfig::disabled(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_name() -> String {
    "kong".into()
}

fn default_url() -> String {
    DEFAULT_URL.into()
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}
