use crate::Pipeline;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 定时刷新：单一计时器，首次触发在启动后一个完整周期。
///
/// 取消后不再触发；正在进行的刷新会完成。
pub fn spawn_flush_scheduler(
    pipeline: Pipeline,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(target: "wavy.pipeline", period_secs = period.as_secs_f64(), "flush_scheduler_started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = pipeline.flush().await;
                    debug!(
                        target: "wavy.pipeline",
                        delivered = report.delivered,
                        dropped = report.dropped,
                        requeued = report.requeued,
                        "scheduled_flush_done"
                    );
                }
            }
        }
        info!(target: "wavy.pipeline", "flush_scheduler_stopped");
    })
}
