//! 设备命令分派。
//!
//! `DeviceCommandHandler` 实现会话循环的 `SessionHandler`：
//! - `REGISTER`：查设备状态表，`operating` 才转发到固定服务器并回传应答
//! - `DATA`：查路由表、按需预处理，批量模式入缓冲，即时模式转发到规则目标
//! - `QUIT`：立即刷新缓冲，回 `400 BYE` 并结束本会话
//!
//! 拒绝都是可恢复的：给设备回编码应答，不关闭连接。

use async_trait::async_trait;
use domain::{Destination, Reading, is_operating};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wavy_config::ForwardMode;
use wavy_pipeline::Pipeline;
use wavy_preprocess::{PreprocessError, Preprocessor};
use wavy_protocol::{
    DeviceCommand, Forwarder, ProtocolError, Reply, ServerRequest, SessionHandler,
    SessionOutcome,
};
use wavy_storage::{RoutingRule, StateRegistry};

/// 命令处理失败原因，每种对应一个设备应答。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("device not associated: {0}")]
    NotAssociated(String),
    #[error("device {device_id} blocked in state {state}")]
    Blocked { device_id: String, state: String },
    #[error("no routing rule for {device_id}/{metric_type}")]
    RoutingNotFound {
        device_id: String,
        metric_type: String,
    },
    #[error("preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("forward failed: {0}")]
    Forward(#[from] ProtocolError),
}

impl IngestError {
    pub fn reply(&self) -> Reply {
        match self {
            Self::NotAssociated(_) => Reply::NotAssociated,
            Self::Blocked { state, .. } => Reply::BlockedState(state.clone()),
            Self::RoutingNotFound { .. } => Reply::RoutingNotFound,
            Self::Preprocess(_) => Reply::PreprocessingFailed,
            Self::Forward(_) => Reply::ServerUnavailable,
        }
    }
}

/// 连接处理器依赖与参数。
#[derive(Clone)]
pub struct DeviceCommandHandler {
    registry: Arc<StateRegistry>,
    pipeline: Pipeline,
    forwarder: Arc<dyn Forwarder>,
    preprocessor: Preprocessor,
    /// 注册转发的固定服务器
    server: Destination,
    mode: ForwardMode,
}

impl DeviceCommandHandler {
    pub fn new(
        registry: Arc<StateRegistry>,
        pipeline: Pipeline,
        forwarder: Arc<dyn Forwarder>,
        server: Destination,
        mode: ForwardMode,
    ) -> Self {
        Self {
            registry,
            pipeline,
            forwarder,
            preprocessor: Preprocessor::new(),
            server,
            mode,
        }
    }

    /// 注册：返回服务器应答。
    pub async fn register(&self, line: &str, device_id: &str) -> Result<String, IngestError> {
        let state = match self.registry.device_state(device_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(target: "wavy.ingest", device_id, error = %e, "device_state_lookup_failed");
                None
            }
        };
        let Some(state) = state else {
            return Err(IngestError::NotAssociated(device_id.to_string()));
        };
        if !is_operating(&state) {
            return Err(IngestError::Blocked {
                device_id: device_id.to_string(),
                state,
            });
        }
        let response = self
            .forwarder
            .forward(&ServerRequest::forward(line), &self.server)
            .await?;
        Ok(response)
    }

    /// 读数：通过后入缓冲（返回 `None`）或即时转发（返回服务器应答）。
    pub async fn submit(&self, line: &str, reading: Reading) -> Result<Option<String>, IngestError> {
        let rule = self.route(&reading).await?;
        self.preprocessor
            .apply(rule.requires_preprocessing, &reading)?;

        match self.mode {
            ForwardMode::Batch => {
                let sequence = self.pipeline.append(reading, rule.destination).await;
                debug!(target: "wavy.ingest", sequence, "reading_buffered");
                Ok(None)
            }
            ForwardMode::Immediate => {
                let response = self
                    .forwarder
                    .forward(&ServerRequest::forward(line), &rule.destination)
                    .await?;
                Ok(Some(response))
            }
        }
    }

    async fn route(&self, reading: &Reading) -> Result<RoutingRule, IngestError> {
        let rule = match self
            .registry
            .routing_rule(&reading.device_id, &reading.metric_type)
            .await
        {
            Ok(rule) => rule,
            Err(e) => {
                warn!(target: "wavy.ingest", error = %e, "routing_lookup_failed");
                None
            }
        };
        rule.ok_or_else(|| IngestError::RoutingNotFound {
            device_id: reading.device_id.clone(),
            metric_type: reading.metric_type.clone(),
        })
    }

    async fn on_register(&self, line: &str, device_id: &str) -> SessionOutcome {
        match self.register(line, device_id).await {
            Ok(response) => {
                wavy_telemetry::record_register_forwarded();
                info!(target: "wavy.ingest", device_id, response = %response, "register_forwarded");
                SessionOutcome::reply(Reply::Relayed(response))
            }
            Err(err) => {
                match &err {
                    IngestError::Forward(_) => wavy_telemetry::record_forward_failure(),
                    _ => wavy_telemetry::record_register_rejected(),
                }
                warn!(target: "wavy.ingest", device_id, error = %err, "register_rejected");
                SessionOutcome::reply(err.reply())
            }
        }
    }

    async fn on_data(&self, line: &str, reading: Reading) -> SessionOutcome {
        let device_id = reading.device_id.clone();
        match self.submit(line, reading).await {
            Ok(response) => {
                wavy_telemetry::record_reading_accepted();
                match response {
                    Some(response) => SessionOutcome::reply(Reply::Relayed(response)),
                    None => SessionOutcome::silent(),
                }
            }
            Err(err) => {
                match &err {
                    IngestError::RoutingNotFound { .. } => {
                        wavy_telemetry::record_reading_unrouted()
                    }
                    IngestError::Preprocess(_) => {
                        wavy_telemetry::record_reading_preprocess_failed()
                    }
                    IngestError::Forward(_) => wavy_telemetry::record_forward_failure(),
                    _ => {}
                }
                warn!(target: "wavy.ingest", device_id = %device_id, error = %err, "data_rejected");
                SessionOutcome::reply(err.reply())
            }
        }
    }

    async fn on_quit(&self) -> SessionOutcome {
        let report = self.pipeline.flush().await;
        info!(
            target: "wavy.ingest",
            delivered = report.delivered,
            dropped = report.dropped,
            requeued = report.requeued,
            "quit_flush_done"
        );
        SessionOutcome::reply_and_close(Reply::Bye)
    }
}

#[async_trait]
impl SessionHandler for DeviceCommandHandler {
    async fn handle(&self, line: &str, command: DeviceCommand) -> SessionOutcome {
        match command {
            DeviceCommand::Register { device_id } => self.on_register(line, &device_id).await,
            DeviceCommand::Data(reading) => self.on_data(line, reading).await,
            DeviceCommand::Quit => self.on_quit().await,
        }
    }
}
