//! Metrics definitions for the collector.
//!
//! `KongMetric` is the table of observations re-emitted from the gateway status
//! view. The plain `MetricDef` constants describe the collector itself.

use serde::Deserialize;
use shared::metrics_defs::{MetricDef, MetricType};

/// Where a gateway metric's value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricSource {
    /// Summed per group; split by status bucket when status codes are reported.
    StatusScoped,
    /// Summed per group, never split by status.
    HttpScoped,
    Server,
    Database,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KongMetric {
    ResponseCount,
    ResponseSize,
    RequestSize,
    KongLatency,
    UpstreamLatency,
    RequestLatency,
    TotalRequests,
    ConnectionsHandled,
    ConnectionsAccepted,
    ConnectionsWaiting,
    ConnectionsActive,
    ConnectionsReading,
    ConnectionsWriting,
    DatabaseReachable,
}

impl KongMetric {
    pub const ALL: [KongMetric; 14] = [
        KongMetric::ResponseCount,
        KongMetric::ResponseSize,
        KongMetric::RequestSize,
        KongMetric::KongLatency,
        KongMetric::UpstreamLatency,
        KongMetric::RequestLatency,
        KongMetric::TotalRequests,
        KongMetric::ConnectionsHandled,
        KongMetric::ConnectionsAccepted,
        KongMetric::ConnectionsWaiting,
        KongMetric::ConnectionsActive,
        KongMetric::ConnectionsReading,
        KongMetric::ConnectionsWriting,
        KongMetric::DatabaseReachable,
    ];

    /// Token name used in the status view and in configuration.
    pub const fn key(&self) -> &'static str {
        match self {
            KongMetric::ResponseCount => "response_count",
            KongMetric::ResponseSize => "response_size",
            KongMetric::RequestSize => "request_size",
            KongMetric::KongLatency => "kong_latency",
            KongMetric::UpstreamLatency => "upstream_latency",
            KongMetric::RequestLatency => "request_latency",
            KongMetric::TotalRequests => "total_requests",
            KongMetric::ConnectionsHandled => "connections_handled",
            KongMetric::ConnectionsAccepted => "connections_accepted",
            KongMetric::ConnectionsWaiting => "connections_waiting",
            KongMetric::ConnectionsActive => "connections_active",
            KongMetric::ConnectionsReading => "connections_reading",
            KongMetric::ConnectionsWriting => "connections_writing",
            KongMetric::DatabaseReachable => "database_reachable",
        }
    }

    pub const fn def(&self) -> MetricDef {
        match self {
            KongMetric::ResponseCount => RESPONSES_COUNT,
            KongMetric::ResponseSize => RESPONSES_SIZE,
            KongMetric::RequestSize => REQUESTS_SIZE,
            KongMetric::KongLatency => KONG_LATENCY,
            KongMetric::UpstreamLatency => UPSTREAM_LATENCY,
            KongMetric::RequestLatency => REQUESTS_LATENCY,
            KongMetric::TotalRequests => REQUESTS_COUNT,
            KongMetric::ConnectionsHandled => CONNECTIONS_HANDLED,
            KongMetric::ConnectionsAccepted => CONNECTIONS_ACCEPTED,
            KongMetric::ConnectionsWaiting => CONNECTIONS_WAITING,
            KongMetric::ConnectionsActive => CONNECTIONS_ACTIVE,
            KongMetric::ConnectionsReading => CONNECTIONS_READING,
            KongMetric::ConnectionsWriting => CONNECTIONS_WRITING,
            KongMetric::DatabaseReachable => DATABASE_REACHABLE,
        }
    }

    pub const fn enabled_by_default(&self) -> bool {
        matches!(
            self,
            KongMetric::ResponseCount
                | KongMetric::ResponseSize
                | KongMetric::RequestSize
                | KongMetric::UpstreamLatency
                | KongMetric::TotalRequests
        )
    }

    pub const fn source(&self) -> MetricSource {
        match self {
            KongMetric::ResponseCount
            | KongMetric::ResponseSize
            | KongMetric::RequestSize
            | KongMetric::UpstreamLatency => MetricSource::StatusScoped,
            KongMetric::KongLatency | KongMetric::RequestLatency => MetricSource::HttpScoped,
            KongMetric::DatabaseReachable => MetricSource::Database,
            _ => MetricSource::Server,
        }
    }
}

pub const RESPONSES_COUNT: MetricDef = MetricDef {
    name: "kong.responses.count",
    metric_type: MetricType::Counter,
    description: "Responses sent by the gateway",
};

pub const RESPONSES_SIZE: MetricDef = MetricDef {
    name: "kong.responses.size",
    metric_type: MetricType::Counter,
    description: "Total response bytes sent by the gateway",
};

pub const REQUESTS_SIZE: MetricDef = MetricDef {
    name: "kong.requests.size",
    metric_type: MetricType::Counter,
    description: "Total request bytes received by the gateway",
};

pub const KONG_LATENCY: MetricDef = MetricDef {
    name: "kong.kong.latency",
    metric_type: MetricType::Counter,
    description: "Cumulative time spent in the gateway itself, in milliseconds",
};

pub const UPSTREAM_LATENCY: MetricDef = MetricDef {
    name: "kong.upstream.latency",
    metric_type: MetricType::Counter,
    description: "Cumulative upstream response time, in milliseconds",
};

pub const REQUESTS_LATENCY: MetricDef = MetricDef {
    name: "kong.requests.latency",
    metric_type: MetricType::Counter,
    description: "Cumulative total request time, in milliseconds",
};

pub const REQUESTS_COUNT: MetricDef = MetricDef {
    name: "kong.requests.count",
    metric_type: MetricType::Counter,
    description: "Client requests handled by the server",
};

pub const CONNECTIONS_HANDLED: MetricDef = MetricDef {
    name: "kong.connections.handled",
    metric_type: MetricType::Counter,
    description: "Client connections handled by the server",
};

pub const CONNECTIONS_ACCEPTED: MetricDef = MetricDef {
    name: "kong.connections.accepted",
    metric_type: MetricType::Counter,
    description: "Client connections accepted by the server",
};

pub const CONNECTIONS_WAITING: MetricDef = MetricDef {
    name: "kong.connections.waiting",
    metric_type: MetricType::Gauge,
    description: "Idle client connections waiting for a request",
};

pub const CONNECTIONS_ACTIVE: MetricDef = MetricDef {
    name: "kong.connections.active",
    metric_type: MetricType::Gauge,
    description: "Active client connections, including waiting ones",
};

pub const CONNECTIONS_READING: MetricDef = MetricDef {
    name: "kong.connections.reading",
    metric_type: MetricType::Gauge,
    description: "Connections where the server is reading the request header",
};

pub const CONNECTIONS_WRITING: MetricDef = MetricDef {
    name: "kong.connections.writing",
    metric_type: MetricType::Gauge,
    description: "Connections where the server is writing the response",
};

pub const DATABASE_REACHABLE: MetricDef = MetricDef {
    name: "kong.database.reachable",
    metric_type: MetricType::Gauge,
    description: "1 when the gateway can reach its datastore, 0 otherwise",
};

pub const CYCLE_DURATION: MetricDef = MetricDef {
    name: "collector.cycle.duration",
    metric_type: MetricType::Histogram,
    description: "Time to fetch, decode, group and emit one status snapshot, in seconds",
};

pub const CYCLE_FAILURES: MetricDef = MetricDef {
    name: "collector.cycle.failures",
    metric_type: MetricType::Counter,
    description: "Poll cycles aborted without emitting. Tagged with stage.",
};

pub const CONTEXTS: MetricDef = MetricDef {
    name: "collector.contexts",
    metric_type: MetricType::Gauge,
    description: "Resource contexts decoded in the last cycle",
};

pub const RECORDS_EMITTED: MetricDef = MetricDef {
    name: "collector.records.emitted",
    metric_type: MetricType::Counter,
    description: "Metric records handed to the sink",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CYCLE_DURATION,
    CYCLE_FAILURES,
    CONTEXTS,
    RECORDS_EMITTED,
];
