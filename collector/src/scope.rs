//! Reporting scope derived once from configuration.

use crate::config::{Config, DimensionConfig, PatternValue, StatusCodeConfig, ValidationError};
use crate::patterns::{PatternError, PatternList, filter_by_pattern_lists};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "cannot report status codes and status code groups simultaneously; \
         list the desired codes in the status_codes whitelist and keep report_groups \
         to report the rest by class"
    )]
    ConflictingStatusCodeModes,

    #[error("{dimension} {list}: {source}")]
    InvalidPattern {
        dimension: Dimension,
        list: &'static str,
        #[source]
        source: PatternError,
    },

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
}

/// A reportable dimension key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    ApiId,
    ApiName,
    ServiceId,
    ServiceName,
    RouteId,
    HttpMethod,
    StatusCode,
}

impl Dimension {
    /// The dimensions read from a resource context, in emission order.
    pub const CONTEXT: [Dimension; 6] = [
        Dimension::ApiId,
        Dimension::ApiName,
        Dimension::ServiceId,
        Dimension::ServiceName,
        Dimension::RouteId,
        Dimension::HttpMethod,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Dimension::ApiId => "api_id",
            Dimension::ApiName => "api_name",
            Dimension::ServiceId => "service_id",
            Dimension::ServiceName => "service_name",
            Dimension::RouteId => "route_id",
            Dimension::HttpMethod => "http_method",
            Dimension::StatusCode => "status_code",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct DimensionScope {
    pub whitelist: PatternList,
    pub blacklist: PatternList,
}

impl DimensionScope {
    fn from_lists(
        dimension: Dimension,
        report: bool,
        whitelist: &[PatternValue],
        blacklist: &[PatternValue],
    ) -> Result<Self, ConfigError> {
        let render = match dimension {
            Dimension::StatusCode => PatternValue::to_status_pattern,
            _ => PatternValue::to_pattern,
        };
        let compile = |list: &'static str, values: &[PatternValue]| {
            PatternList::new(values.iter().map(render)).map_err(|source| {
                ConfigError::InvalidPattern {
                    dimension,
                    list,
                    source,
                }
            })
        };

        let mut scope = DimensionScope {
            whitelist: compile("whitelist", whitelist)?,
            blacklist: compile("blacklist", blacklist)?,
        };
        // Reporting without an explicit whitelist means reporting every value.
        if report && scope.whitelist.is_empty() {
            scope
                .whitelist
                .update(["*"])
                .map_err(|source| ConfigError::InvalidPattern {
                    dimension,
                    list: "whitelist",
                    source,
                })?;
        }
        Ok(scope)
    }

    fn from_config(dimension: Dimension, config: &DimensionConfig) -> Result<Self, ConfigError> {
        Self::from_lists(dimension, config.report, &config.whitelist, &config.blacklist)
    }

    pub fn will_report(&self) -> bool {
        !self.whitelist.is_empty()
    }

    pub fn filter<'a, I>(&self, candidates: I) -> (Vec<&'a str>, Vec<&'a str>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        filter_by_pattern_lists(candidates, &self.whitelist, &self.blacklist)
    }

    /// Whether a single value is whitelisted and not blacklisted.
    pub fn admits(&self, value: &str) -> bool {
        self.whitelist.is_match(value) && !self.blacklist.is_match(value)
    }
}

#[derive(Debug)]
pub struct StatusScope {
    pub codes: DimensionScope,
    pub report_codes: bool,
    pub report_groups: bool,
}

impl StatusScope {
    fn from_config(config: &StatusCodeConfig) -> Result<Self, ConfigError> {
        if config.report && config.report_groups {
            return Err(ConfigError::ConflictingStatusCodeModes);
        }
        Ok(StatusScope {
            codes: DimensionScope::from_lists(
                Dimension::StatusCode,
                config.report,
                &config.whitelist,
                &config.blacklist,
            )?,
            report_codes: config.report,
            report_groups: config.report_groups,
        })
    }

    pub fn will_report(&self) -> bool {
        self.report_codes || self.report_groups || self.codes.will_report()
    }
}

/// Per-dimension report flags and pattern lists.
#[derive(Debug)]
pub struct ScopePolicy {
    pub api_ids: DimensionScope,
    pub api_names: DimensionScope,
    pub service_ids: DimensionScope,
    pub service_names: DimensionScope,
    pub route_ids: DimensionScope,
    pub http_methods: DimensionScope,
    pub status_codes: StatusScope,
}

impl ScopePolicy {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let scope = &config.scope;
        Ok(ScopePolicy {
            api_ids: DimensionScope::from_config(Dimension::ApiId, &scope.api_ids)?,
            api_names: DimensionScope::from_config(Dimension::ApiName, &scope.api_names)?,
            service_ids: DimensionScope::from_config(Dimension::ServiceId, &scope.service_ids)?,
            service_names: DimensionScope::from_config(
                Dimension::ServiceName,
                &scope.service_names,
            )?,
            route_ids: DimensionScope::from_config(Dimension::RouteId, &scope.route_ids)?,
            http_methods: DimensionScope::from_config(Dimension::HttpMethod, &scope.http_methods)?,
            status_codes: StatusScope::from_config(&scope.status_codes)?,
        })
    }

    pub fn scope(&self, dimension: Dimension) -> &DimensionScope {
        match dimension {
            Dimension::ApiId => &self.api_ids,
            Dimension::ApiName => &self.api_names,
            Dimension::ServiceId => &self.service_ids,
            Dimension::ServiceName => &self.service_names,
            Dimension::RouteId => &self.route_ids,
            Dimension::HttpMethod => &self.http_methods,
            Dimension::StatusCode => &self.status_codes.codes,
        }
    }

    pub fn will_report(&self, dimension: Dimension) -> bool {
        match dimension {
            Dimension::StatusCode => self.status_codes.will_report(),
            other => self.scope(other).will_report(),
        }
    }
}

impl fmt::Display for ScopePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dimension in Dimension::CONTEXT.iter().chain([&Dimension::StatusCode]) {
            let scope = self.scope(*dimension);
            writeln!(
                f,
                "{dimension}: will_report={} whitelist={:?} blacklist={:?}",
                self.will_report(*dimension),
                scope.whitelist,
                scope.blacklist,
            )?;
        }
        write!(
            f,
            "status_code modes: exact={} groups={}",
            self.status_codes.report_codes, self.status_codes.report_groups
        )
    }
}
