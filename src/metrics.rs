//! Prometheus metrics for switchboard.
//!
//! Exposed on the HTTP API's `/metrics` endpoint. Recording helpers are
//! no-ops until `init()` runs, so unit tests never need the registry.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Currently connected clients.
static CONNECTED_CLIENTS: OnceLock<IntGauge> = OnceLock::new();

/// Total connections accepted over the process lifetime.
static CONNECTIONS_TOTAL: OnceLock<IntCounter> = OnceLock::new();

/// Events routed, by event type.
static EVENTS_ROUTED: OnceLock<IntCounterVec> = OnceLock::new();

/// Events dropped on hand-off (offline target, full or closed queue).
static EVENTS_DROPPED: OnceLock<IntCounter> = OnceLock::new();

/// Rejected upgrade attempts.
static AUTH_FAILURES: OnceLock<IntCounter> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    register!(
        CONNECTED_CLIENTS,
        IntGauge::new("switchboard_connected_clients", "Currently connected clients")
    );
    register!(
        CONNECTIONS_TOTAL,
        IntCounter::new("switchboard_connections_total", "Connections accepted")
    );
    register!(
        EVENTS_ROUTED,
        IntCounterVec::new(
            Opts::new("switchboard_events_routed_total", "Events routed by type"),
            &["type"]
        )
    );
    register!(
        EVENTS_DROPPED,
        IntCounter::new(
            "switchboard_events_dropped_total",
            "Events dropped on outbound hand-off"
        )
    );
    register!(
        AUTH_FAILURES,
        IntCounter::new(
            "switchboard_auth_failures_total",
            "Rejected upgrade attempts"
        )
    );
}

/// Gather all metrics in Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn connection_opened() {
    if let Some(c) = CONNECTIONS_TOTAL.get() {
        c.inc();
    }
    if let Some(g) = CONNECTED_CLIENTS.get() {
        g.inc();
    }
}

pub fn connection_closed() {
    if let Some(g) = CONNECTED_CLIENTS.get() {
        g.dec();
    }
}

pub fn event_routed(event_type: &str) {
    if let Some(c) = EVENTS_ROUTED.get() {
        c.with_label_values(&[event_type]).inc();
    }
}

pub fn event_dropped() {
    if let Some(c) = EVENTS_DROPPED.get() {
        c.inc();
    }
}

pub fn auth_failure() {
    if let Some(c) = AUTH_FAILURES.get() {
        c.inc();
    }
}
