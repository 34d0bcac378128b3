//! 追踪、会话 ID 与基础计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 基础指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub registers_forwarded: u64,
    pub registers_rejected: u64,
    pub readings_accepted: u64,
    pub readings_unrouted: u64,
    pub readings_preprocess_failed: u64,
    pub malformed_commands: u64,
    pub forward_failures: u64,
    pub flush_deliveries: u64,
    pub flush_failures: u64,
    pub readings_flushed: u64,
    pub readings_dropped: u64,
    pub readings_requeued: u64,
    pub state_updates: u64,
}

/// 基础指标。
pub struct TelemetryMetrics {
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    registers_forwarded: AtomicU64,
    registers_rejected: AtomicU64,
    readings_accepted: AtomicU64,
    readings_unrouted: AtomicU64,
    readings_preprocess_failed: AtomicU64,
    malformed_commands: AtomicU64,
    forward_failures: AtomicU64,
    flush_deliveries: AtomicU64,
    flush_failures: AtomicU64,
    readings_flushed: AtomicU64,
    readings_dropped: AtomicU64,
    readings_requeued: AtomicU64,
    state_updates: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            registers_forwarded: AtomicU64::new(0),
            registers_rejected: AtomicU64::new(0),
            readings_accepted: AtomicU64::new(0),
            readings_unrouted: AtomicU64::new(0),
            readings_preprocess_failed: AtomicU64::new(0),
            malformed_commands: AtomicU64::new(0),
            forward_failures: AtomicU64::new(0),
            flush_deliveries: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            readings_flushed: AtomicU64::new(0),
            readings_dropped: AtomicU64::new(0),
            readings_requeued: AtomicU64::new(0),
            state_updates: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            registers_forwarded: self.registers_forwarded.load(Ordering::Relaxed),
            registers_rejected: self.registers_rejected.load(Ordering::Relaxed),
            readings_accepted: self.readings_accepted.load(Ordering::Relaxed),
            readings_unrouted: self.readings_unrouted.load(Ordering::Relaxed),
            readings_preprocess_failed: self.readings_preprocess_failed.load(Ordering::Relaxed),
            malformed_commands: self.malformed_commands.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
            flush_deliveries: self.flush_deliveries.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            readings_flushed: self.readings_flushed.load(Ordering::Relaxed),
            readings_dropped: self.readings_dropped.load(Ordering::Relaxed),
            readings_requeued: self.readings_requeued.load(Ordering::Relaxed),
            state_updates: self.state_updates.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的设备会话 ID。
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn record_session_opened() {
    metrics().sessions_opened.fetch_add(1, Ordering::Relaxed);
}

pub fn record_session_closed() {
    metrics().sessions_closed.fetch_add(1, Ordering::Relaxed);
}

/// 记录 REGISTER 成功转发次数。
pub fn record_register_forwarded() {
    metrics().registers_forwarded.fetch_add(1, Ordering::Relaxed);
}

/// 记录 REGISTER 被拒（未关联或状态阻断）次数。
pub fn record_register_rejected() {
    metrics().registers_rejected.fetch_add(1, Ordering::Relaxed);
}

pub fn record_reading_accepted() {
    metrics().readings_accepted.fetch_add(1, Ordering::Relaxed);
}

/// 记录无路由规则的读数次数。
pub fn record_reading_unrouted() {
    metrics().readings_unrouted.fetch_add(1, Ordering::Relaxed);
}

/// 记录预处理失败的读数次数。
pub fn record_reading_preprocess_failed() {
    metrics()
        .readings_preprocess_failed
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_malformed_command() {
    metrics().malformed_commands.fetch_add(1, Ordering::Relaxed);
}

/// 记录转发往返失败次数（连接、写入、读取或超时）。
pub fn record_forward_failure() {
    metrics().forward_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次成功的刷新投递及其读数数量。
pub fn record_flush_delivered(count: u64) {
    let metrics = metrics();
    metrics.flush_deliveries.fetch_add(1, Ordering::Relaxed);
    metrics.readings_flushed.fetch_add(count, Ordering::Relaxed);
}

pub fn record_flush_failure() {
    metrics().flush_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录投递失败后被丢弃的读数数量。
pub fn record_readings_dropped(count: u64) {
    metrics().readings_dropped.fetch_add(count, Ordering::Relaxed);
}

/// 记录投递失败后回填缓冲的读数数量。
pub fn record_readings_requeued(count: u64) {
    metrics().readings_requeued.fetch_add(count, Ordering::Relaxed);
}

pub fn record_state_update() {
    metrics().state_updates.fetch_add(1, Ordering::Relaxed);
}
