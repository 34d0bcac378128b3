//! 批量缓冲与刷新投递。
//!
//! 读数先进入 `BatchBuffer`，由定时器（或停机、设备 QUIT）触发 `Pipeline::flush`：
//! 在刷新时刻统一打时间戳，作为一次逻辑投递交给 `BatchSink`。

mod buffer;
mod scheduler;
mod sink;

pub use buffer::BatchBuffer;
pub use scheduler::spawn_flush_scheduler;
pub use sink::{
    BatchSink, DeliveryFailure, InlineForwardSink, STAGING_HEADER, StagingFileSink,
    render_staging,
};

use domain::{CollectedReading, Destination, PendingReading, Reading};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use wavy_config::FlushFailurePolicy;
use wavy_protocol::ProtocolError;

/// 刷新时间戳格式（本地时间）。
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Pipeline 处理错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("staging write failed: {0}")]
    Staging(#[from] std::io::Error),
    #[error("forward failed: {0}")]
    Forward(#[from] ProtocolError),
    #[error("unexpected server response: {0}")]
    Rejected(String),
}

/// Pipeline 参数。
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub failure_policy: FlushFailurePolicy,
    /// 回填时缓冲总量上限
    pub max_buffered: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            failure_policy: FlushFailurePolicy::Drop,
            max_buffered: 100_000,
        }
    }
}

/// 一次刷新的结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub dropped: usize,
    pub requeued: usize,
}

struct PipelineInner {
    buffer: BatchBuffer,
    sink: Arc<dyn BatchSink>,
    config: PipelineConfig,
    /// 串行化刷新（定时器、停机、QUIT 可能同时触发）
    flush_lock: Mutex<()>,
}

/// Pipeline 入口。
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub fn new(sink: Arc<dyn BatchSink>) -> Self {
        Self::with_config(sink, PipelineConfig::default())
    }

    pub fn with_config(sink: Arc<dyn BatchSink>, config: PipelineConfig) -> Self {
        let inner = PipelineInner {
            buffer: BatchBuffer::new(),
            sink,
            config,
            flush_lock: Mutex::new(()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// 追加一条已通过校验的读数。
    pub async fn append(&self, reading: Reading, destination: Destination) -> u64 {
        self.inner.buffer.append(reading, destination).await
    }

    /// 当前待刷新读数数量。
    pub async fn pending(&self) -> usize {
        self.inner.buffer.len().await
    }

    /// 刷新：空缓冲不投递；失败按策略丢弃或回填，并记录错误。
    pub async fn flush(&self) -> FlushReport {
        let _guard = self.inner.flush_lock.lock().await;

        let batch = self.inner.buffer.drain().await;
        if batch.is_empty() {
            debug!(target: "wavy.pipeline", "flush_skipped_empty");
            return FlushReport::default();
        }

        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        let collected: Vec<CollectedReading> = batch
            .iter()
            .map(|pending| materialize(pending, &timestamp))
            .collect();

        let failures = match self.inner.sink.deliver(&collected).await {
            Ok(()) => Vec::new(),
            Err(failures) => failures,
        };

        let mut failed = vec![false; batch.len()];
        for failure in &failures {
            wavy_telemetry::record_flush_failure();
            error!(
                target: "wavy.pipeline",
                readings = failure.undelivered.len(),
                error = %failure.error,
                "flush_delivery_failed"
            );
            for &index in &failure.undelivered {
                if let Some(slot) = failed.get_mut(index) {
                    *slot = true;
                }
            }
        }

        let mut undelivered = Vec::new();
        let mut delivered = 0usize;
        for (pending, is_failed) in batch.into_iter().zip(failed) {
            if is_failed {
                undelivered.push(pending);
            } else {
                delivered += 1;
            }
        }

        let mut report = FlushReport {
            delivered,
            ..FlushReport::default()
        };
        if delivered > 0 {
            wavy_telemetry::record_flush_delivered(delivered as u64);
            info!(target: "wavy.pipeline", readings = delivered, timestamp = %timestamp, "flush_delivered");
        }
        if undelivered.is_empty() {
            return report;
        }

        let count = undelivered.len();
        match self.inner.config.failure_policy {
            FlushFailurePolicy::Drop => {
                report.dropped = count;
            }
            FlushFailurePolicy::Requeue => {
                match self
                    .inner
                    .buffer
                    .requeue(undelivered, self.inner.config.max_buffered)
                    .await
                {
                    Ok(()) => {
                        report.requeued = count;
                        wavy_telemetry::record_readings_requeued(count as u64);
                        warn!(target: "wavy.pipeline", readings = count, "flush_requeued");
                        return report;
                    }
                    Err(_) => {
                        error!(
                            target: "wavy.pipeline",
                            readings = count,
                            max_buffered = self.inner.config.max_buffered,
                            "requeue_over_capacity"
                        );
                        report.dropped = count;
                    }
                }
            }
        }
        wavy_telemetry::record_readings_dropped(count as u64);
        error!(target: "wavy.pipeline", readings = count, "flush_readings_dropped");
        report
    }
}

fn materialize(pending: &PendingReading, timestamp: &str) -> CollectedReading {
    CollectedReading {
        timestamp: timestamp.to_string(),
        device_id: pending.reading.device_id.clone(),
        metric_type: pending.reading.metric_type.clone(),
        value: pending.reading.value.clone(),
        destination: pending.destination.clone(),
    }
}
