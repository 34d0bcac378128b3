//! 运维控制通道。
//!
//! 控制命令（每行一条，动词区分大小写）：
//!
//! ```text
//! SET_STATE <id> <state>   → OK <id> <state> | 404 NOT FOUND
//! RELOAD                   → OK devices=<n> rules=<m>
//! STATUS                   → OK pending=<n> devices=<n> rules=<m> sessions=<k>
//! SHUTDOWN | FORWARD_QUIT  → OK SHUTTING DOWN
//! 其他                      → 400 INVALID COMMAND
//! ```
//!
//! 本地 TCP 管理端口与标准输入控制台共用同一个 `ControlService`。

mod listener;
mod shutdown;

pub use listener::{ControlListener, run_console, spawn_console};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};

use std::sync::Arc;
use tracing::{error, info, warn};
use wavy_pipeline::Pipeline;
use wavy_storage::{LoadSummary, SetStateOutcome, StateRegistry, StorageError};

/// 控制链路错误。
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 控制命令。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    SetState { device_id: String, state: String },
    Reload,
    Status,
    Shutdown,
}

impl ControlCommand {
    pub fn parse(line: &str) -> Result<Self, ControlError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["SET_STATE", device_id, state] => Ok(Self::SetState {
                device_id: device_id.to_string(),
                state: state.to_string(),
            }),
            ["RELOAD"] => Ok(Self::Reload),
            ["STATUS"] => Ok(Self::Status),
            ["SHUTDOWN"] | ["FORWARD_QUIT"] => Ok(Self::Shutdown),
            _ => Err(ControlError::InvalidCommand(line.trim().to_string())),
        }
    }
}

/// 运行状态快照。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub pending: usize,
    pub devices: usize,
    pub rules: usize,
    pub sessions: usize,
}

/// 控制服务：把控制命令落到与请求路径相同的状态接口上。
#[derive(Clone)]
pub struct ControlService {
    registry: Arc<StateRegistry>,
    pipeline: Pipeline,
    shutdown: Arc<ShutdownCoordinator>,
}

impl ControlService {
    pub fn new(
        registry: Arc<StateRegistry>,
        pipeline: Pipeline,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            registry,
            pipeline,
            shutdown,
        }
    }

    /// 修改设备状态并写回外部源；未知设备不新建。
    pub async fn set_state(
        &self,
        device_id: &str,
        state: &str,
    ) -> Result<SetStateOutcome, ControlError> {
        let outcome = self.registry.set_state(device_id, state).await?;
        if let SetStateOutcome::Updated(record) = &outcome {
            wavy_telemetry::record_state_update();
            info!(
                target: "wavy.control",
                device_id = %record.device_id,
                state = %record.state,
                "device_state_updated"
            );
        }
        Ok(outcome)
    }

    pub async fn reload(&self) -> Result<LoadSummary, ControlError> {
        Ok(self.registry.reload().await?)
    }

    pub async fn status(&self) -> Result<StatusReport, ControlError> {
        let counts = self.registry.counts().await?;
        Ok(StatusReport {
            pending: self.pipeline.pending().await,
            devices: counts.devices,
            rules: counts.rules,
            sessions: self.shutdown.active_sessions(),
        })
    }

    /// 触发停机（后台执行）。
    pub fn shutdown(&self) {
        self.shutdown.trigger("control");
    }

    /// 执行一行控制命令，返回应答行（不含换行）。
    pub async fn handle_line(&self, line: &str) -> String {
        let command = match ControlCommand::parse(line) {
            Ok(command) => command,
            Err(e) => {
                warn!(target: "wavy.control", error = %e, "control_command_invalid");
                return "400 INVALID COMMAND".to_string();
            }
        };
        match command {
            ControlCommand::SetState { device_id, state } => {
                match self.set_state(&device_id, &state).await {
                    Ok(SetStateOutcome::Updated(record)) => {
                        format!("OK {} {}", record.device_id, record.state)
                    }
                    Ok(SetStateOutcome::NotFound) => {
                        warn!(target: "wavy.control", device_id = %device_id, "device_state_not_found");
                        "404 NOT FOUND".to_string()
                    }
                    Err(e) => store_failure("set_state", e),
                }
            }
            ControlCommand::Reload => match self.reload().await {
                Ok(summary) => format!("OK devices={} rules={}", summary.devices, summary.rules),
                Err(e) => store_failure("reload", e),
            },
            ControlCommand::Status => match self.status().await {
                Ok(status) => format!(
                    "OK pending={} devices={} rules={} sessions={}",
                    status.pending, status.devices, status.rules, status.sessions
                ),
                Err(e) => store_failure("status", e),
            },
            ControlCommand::Shutdown => {
                self.shutdown();
                "OK SHUTTING DOWN".to_string()
            }
        }
    }
}

fn store_failure(operation: &'static str, e: ControlError) -> String {
    error!(target: "wavy.control", operation, error = %e, "control_store_failed");
    format!("500 STORE ERROR: {}", e)
}
