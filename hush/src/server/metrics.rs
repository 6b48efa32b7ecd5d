use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, histogram};

/// 服务器运行时指标（进程内计数），便于对接外部导出或调试。
///
/// 注意：计数为近似值，使用 `Relaxed` 语义。
#[derive(Debug, Default)]
pub struct ServerMetrics {
    pub accept_ok: AtomicU64,
    pub accept_err: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub handler_ok: AtomicU64,
    pub handler_err: AtomicU64,
    pub rate_limited: AtomicU64,
    pub graceful_shutdowns: AtomicU64,
    pub forced_shutdowns: AtomicU64,
}

static METRICS: OnceLock<ServerMetrics> = OnceLock::new();

pub fn server_metrics() -> &'static ServerMetrics {
    METRICS.get_or_init(ServerMetrics::default)
}

fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_accept_ok() {
    inc(&server_metrics().accept_ok);

    counter!("hush.server.accept.ok").increment(1);
}

pub fn record_accept_err() {
    inc(&server_metrics().accept_err);

    counter!("hush.server.accept.err").increment(1);
}

pub fn record_connection_rejected() {
    inc(&server_metrics().connections_rejected);

    counter!("hush.server.connection.rejected").increment(1);
}

pub fn record_handler_ok() {
    inc(&server_metrics().handler_ok);

    counter!("hush.server.handler.ok").increment(1);
}

pub fn record_handler_err() {
    inc(&server_metrics().handler_err);

    counter!("hush.server.handler.err").increment(1);
}

pub fn record_rate_limited() {
    inc(&server_metrics().rate_limited);

    counter!("hush.server.ratelimit.rejected").increment(1);
}

pub fn record_graceful_shutdown() {
    inc(&server_metrics().graceful_shutdowns);

    counter!("hush.server.shutdown.graceful").increment(1);
}

pub fn record_forced_shutdown() {
    inc(&server_metrics().forced_shutdowns);

    counter!("hush.server.shutdown.forced").increment(1);
}

pub fn record_handler_duration(handle_ns: u64) {
    histogram!("hush.server.handler.duration_ns").record(handle_ns as f64);
}
