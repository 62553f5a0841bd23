use crate::config::{Config, ScopeConfig};
use crate::scope::ScopePolicy;
use crate::snapshot::{Decoder, KongState, StatusView};
use indexmap::IndexMap;
use std::net::SocketAddr;

/// Encodes a version 1 context string.
pub fn encode_context(
    api_id: Option<&str>,
    api_name: Option<&str>,
    service_id: Option<&str>,
    service_name: Option<&str>,
    route_id: Option<&str>,
    http_method: Option<&str>,
) -> String {
    let fields = [api_id, api_name, service_id, service_name, route_id, http_method];
    let mut encoded = String::from("1");
    for field in fields {
        encoded.push('\x1f');
        encoded.push_str(field.unwrap_or("\x00"));
    }
    encoded
}

/// Encodes a counter string from per-status response counts. For a status
/// with `n` responses the status record is `n:n*10:n*100:n*1000`; the flat
/// counters are derived from the total so that status sums always add up.
pub fn counters(statuses: &[(&str, u64)]) -> String {
    let total: u64 = statuses.iter().map(|(_, n)| n).sum();
    let mut encoded = format!(
        "{},{},{},{},{},{}",
        total,
        total * 20,
        total * 2,
        total * 10,
        total * 100,
        total * 1000
    );
    for (code, n) in statuses {
        encoded.push_str(&format!(",{code}:{n}:{}:{}:{}", n * 10, n * 100, n * 1000));
    }
    encoded
}

pub fn api(id: &str, name: &str, method: Option<&str>) -> String {
    encode_context(Some(id), Some(name), None, None, None, method)
}

pub fn service(id: &str, name: &str, route: &str, method: Option<&str>) -> String {
    encode_context(None, None, Some(id), Some(name), Some(route), method)
}

pub fn unscoped(method: Option<&str>) -> String {
    encode_context(None, None, None, None, None, method)
}

pub fn view(entries: Vec<(String, String)>) -> StatusView {
    StatusView {
        signalfx: entries.into_iter().collect(),
        ..Default::default()
    }
}

/// Two APIs, two services with three routes and two unscoped contexts.
pub fn fixture_entries() -> Vec<(String, String)> {
    vec![
        (api("a1", "aOne", Some("GET")), counters(&[("200", 8), ("404", 2)])),
        (api("a1", "aOne", Some("POST")), counters(&[("201", 5)])),
        (api("a2", "aTwo", Some("GET")), counters(&[("200", 3), ("500", 1)])),
        (
            service("s1", "sOne", "r1", Some("GET")),
            counters(&[("200", 6)]),
        ),
        (
            service("s1", "sOne", "r2", Some("DELETE")),
            counters(&[("204", 2), ("404", 1)]),
        ),
        (
            service("s2", "sTwo", "r3", Some("PATCH")),
            counters(&[("200", 4)]),
        ),
        (unscoped(Some("GET")), counters(&[("200", 7)])),
        (unscoped(None), counters(&[("200", 1)])),
    ]
}

pub fn fixture_view() -> StatusView {
    let mut view = view(fixture_entries());
    view.server = IndexMap::from([
        ("connections_handled".to_string(), 120.into()),
        ("connections_accepted".to_string(), 121.into()),
        ("connections_waiting".to_string(), 3.into()),
        ("connections_active".to_string(), 5.into()),
        ("connections_reading".to_string(), 0.into()),
        ("connections_writing".to_string(), 2.into()),
        ("total_requests".to_string(), 400.into()),
    ]);
    view.database = IndexMap::from([("database_reachable".to_string(), true.into())]);
    view
}

/// The fixture as served by the gateway.
pub fn fixture_view_json() -> serde_json::Value {
    let view = fixture_view();
    serde_json::json!({
        "signalfx": view.signalfx,
        "server": view.server,
        "database": view.database,
    })
}

/// One API observed under two names in the same poll.
pub fn renamed_view() -> StatusView {
    view(vec![
        (api("a1", "before", Some("GET")), counters(&[("200", 3)])),
        (api("a1", "after", Some("GET")), counters(&[("200", 4)])),
    ])
}

/// GET, POST, PATCH and DELETE traffic, each on one API and one service.
pub fn methods_view() -> StatusView {
    let mut entries = Vec::new();
    for (i, method) in ["GET", "POST", "PATCH", "DELETE"].into_iter().enumerate() {
        let n = i as u64 + 1;
        entries.push((api("a1", "aOne", Some(method)), counters(&[("200", n)])));
        entries.push((
            service("s1", "sOne", "r1", Some(method)),
            counters(&[("200", n * 10)]),
        ));
    }
    view(entries)
}

pub fn decode(view: &StatusView) -> KongState {
    Decoder::new().decode(view).unwrap()
}

pub fn policy(scope: ScopeConfig) -> ScopePolicy {
    ScopePolicy::from_config(&Config {
        scope,
        ..Default::default()
    })
    .unwrap()
}

/// Serves `router` on an ephemeral local port.
pub async fn serve(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}
