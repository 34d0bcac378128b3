//! 停机编排
//!
//! 顺序固定：停止接受设备连接 → 通知会话在当前命令后关闭并等待宽限期
//! → 刷新缓冲 → 向服务器发送 `FORWARD QUIT` → 完成。
//! 控制通道、Ctrl-C 触发的是同一个流程，且只执行一次。
//!
//! 宽限期内未结束的会话仍可能在刷新后写入缓冲，这些读数记为丢弃。

use domain::Destination;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use wavy_pipeline::{FlushReport, Pipeline};
use wavy_protocol::{Forwarder, ListenerHandle, ServerRequest};

/// 一次停机的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub flush: FlushReport,
    /// 撤出通知的服务器应答；转发失败为 `None`
    pub withdrawal_response: Option<String>,
    /// 所有会话是否在宽限期内结束
    pub sessions_drained: bool,
    /// 撤出后仍留在缓冲中的读数
    pub abandoned: usize,
}

pub struct ShutdownCoordinator {
    listener: Arc<ListenerHandle>,
    pipeline: Pipeline,
    forwarder: Arc<dyn Forwarder>,
    server: Destination,
    grace: Duration,
    /// 后台任务（定时刷新、控制监听、控制台）的取消令牌
    background: CancellationToken,
    started: AtomicBool,
    done: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(
        listener: Arc<ListenerHandle>,
        pipeline: Pipeline,
        forwarder: Arc<dyn Forwarder>,
        server: Destination,
        grace: Duration,
    ) -> Self {
        Self {
            listener,
            pipeline,
            forwarder,
            server,
            grace,
            background: CancellationToken::new(),
            started: AtomicBool::new(false),
            done: CancellationToken::new(),
        }
    }

    /// 后台任务应监听的令牌；停机开始后被取消。
    pub fn background_token(&self) -> CancellationToken {
        self.background.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn active_sessions(&self) -> usize {
        self.listener.active_sessions()
    }

    /// 在后台执行停机，立即返回。
    pub fn trigger(self: &Arc<Self>, origin: &'static str) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.run(origin).await;
        });
    }

    /// 执行停机；只有第一次调用真正执行，之后的调用返回 `None`。
    pub async fn run(&self, origin: &'static str) -> Option<ShutdownReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            info!(target: "wavy.control", origin, "shutdown_already_in_progress");
            return None;
        }
        info!(target: "wavy.control", origin, "shutdown_started");

        self.listener.stop_accepting().await;
        self.background.cancel();

        self.listener.cancel_sessions();
        let sessions_drained = self.listener.wait_sessions(self.grace).await;
        if !sessions_drained {
            warn!(target: "wavy.control", grace_secs = self.grace.as_secs(), "shutdown_grace_elapsed");
        }

        let flush = self.pipeline.flush().await;
        info!(
            target: "wavy.control",
            delivered = flush.delivered,
            dropped = flush.dropped,
            requeued = flush.requeued,
            "shutdown_flush_done"
        );

        let withdrawal_response = match self
            .forwarder
            .forward(&ServerRequest::Quit, &self.server)
            .await
        {
            Ok(response) => {
                info!(target: "wavy.control", server = %self.server, response = %response, "withdrawal_sent");
                Some(response)
            }
            Err(e) => {
                wavy_telemetry::record_forward_failure();
                error!(target: "wavy.control", server = %self.server, error = %e, "withdrawal_failed");
                None
            }
        };

        let abandoned = self.pipeline.pending().await;
        if abandoned > 0 {
            wavy_telemetry::record_readings_dropped(abandoned as u64);
            error!(target: "wavy.control", count = abandoned, "readings_abandoned_at_shutdown");
        }

        self.done.cancel();
        info!(target: "wavy.control", "shutdown_complete");
        Some(ShutdownReport {
            flush,
            withdrawal_response,
            sessions_drained,
            abandoned,
        })
    }

    /// 等待停机流程完成。
    pub async fn wait(&self) {
        self.done.cancelled().await;
    }
}
