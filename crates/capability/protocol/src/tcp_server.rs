//! 设备监听器与会话循环
//!
//! 每个设备连接在独立的 tokio 任务中运行，由 `TaskTracker` 追踪，
//! 停机时先停止 accept，再通知会话在当前命令结束后关闭。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let server = DeviceServer::bind(TcpServerConfig::new("0.0.0.0:5000")).await?;
//! let handle = server.spawn(handler)?;
//! // ...
//! handle.stop_accepting().await;
//! handle.close_sessions(Duration::from_secs(5)).await;
//! ```

use crate::command::{DeviceCommand, Reply, SessionOutcome};
use crate::error::ProtocolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// 命令处理器：会话循环把每条解析成功的命令交给它。
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// `line` 为去除首尾空白的原始命令行。
    async fn handle(&self, line: &str, command: DeviceCommand) -> SessionOutcome;
}

/// 设备监听器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpServerConfig {
    /// 监听地址，如 `0.0.0.0:5000`
    pub listen_addr: String,
    /// 单行最大字节数（含换行），超出视为非法命令并关闭会话
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

fn default_max_line_bytes() -> usize {
    4096
}

impl TcpServerConfig {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            max_line_bytes: default_max_line_bytes(),
        }
    }

    /// 从 JSON 配置字符串解析
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::ConfigParse(e.to_string()))
    }
}

/// 已绑定但尚未开始 accept 的设备监听器
pub struct DeviceServer {
    listener: TcpListener,
    config: TcpServerConfig,
}

impl DeviceServer {
    pub async fn bind(config: TcpServerConfig) -> Result<Self, ProtocolError> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProtocolError> {
        Ok(self.listener.local_addr()?)
    }

    /// 启动 accept 循环，返回控制句柄。
    pub fn spawn(self, handler: Arc<dyn SessionHandler>) -> Result<ListenerHandle, ProtocolError> {
        let local_addr = self.local_addr()?;
        let accept_cancel = CancellationToken::new();
        let session_cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        info!(target: "wavy.protocol", addr = %local_addr, "device_listener_started");

        let join = tokio::spawn(accept_loop(
            self.listener,
            handler,
            self.config.max_line_bytes.max(1),
            accept_cancel.clone(),
            session_cancel.clone(),
            tracker.clone(),
        ));

        Ok(ListenerHandle {
            local_addr,
            accept_cancel,
            session_cancel,
            tracker,
            join: Mutex::new(Some(join)),
        })
    }
}

/// 运行中的监听器句柄
pub struct ListenerHandle {
    local_addr: SocketAddr,
    accept_cancel: CancellationToken,
    session_cancel: CancellationToken,
    tracker: TaskTracker,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 当前在途会话数。
    pub fn active_sessions(&self) -> usize {
        self.tracker.len()
    }

    /// 停止 accept；返回时监听套接字已关闭，新连接被拒绝。可重复调用。
    pub async fn stop_accepting(&self) {
        self.accept_cancel.cancel();
        let join = self.join.lock().await.take();
        if let Some(join) = join {
            if let Err(e) = join.await {
                error!(target: "wavy.protocol", error = %e, "accept_loop_join_failed");
            }
        }
    }

    /// 通知所有会话：正在分派的命令照常完成，之后不再读取新命令。
    pub fn cancel_sessions(&self) {
        self.session_cancel.cancel();
        self.tracker.close();
    }

    /// 等待所有会话结束，最多 `grace`；全部结束时返回 true。
    pub async fn wait_sessions(&self, grace: Duration) -> bool {
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    target: "wavy.protocol",
                    remaining = self.tracker.len(),
                    "sessions_still_open_after_grace"
                );
                false
            }
        }
    }

    /// `cancel_sessions` 后 `wait_sessions`。
    pub async fn close_sessions(&self, grace: Duration) -> bool {
        self.cancel_sessions();
        self.wait_sessions(grace).await
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn SessionHandler>,
    max_line_bytes: usize,
    accept_cancel: CancellationToken,
    session_cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            _ = accept_cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracker.spawn(run_session(
                        stream,
                        peer,
                        Arc::clone(&handler),
                        max_line_bytes,
                        session_cancel.clone(),
                    ));
                }
                Err(e) => {
                    warn!(target: "wavy.protocol", error = %e, "accept_failed");
                }
            },
        }
    }
    info!(target: "wavy.protocol", "device_listener_stopped");
}

async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn SessionHandler>,
    max_line_bytes: usize,
    cancel: CancellationToken,
) {
    let session_id = wavy_telemetry::new_session_id();
    let span = info_span!("session", session_id = %session_id, peer = %peer);
    session_loop(stream, handler, max_line_bytes, cancel)
        .instrument(span)
        .await;
}

/// 会话状态机：AwaitingCommand → Dispatching → AwaitingCommand | Closed。
async fn session_loop(
    stream: TcpStream,
    handler: Arc<dyn SessionHandler>,
    max_line_bytes: usize,
    cancel: CancellationToken,
) {
    wavy_telemetry::record_session_opened();
    info!(target: "wavy.protocol", "session_opened");

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);

    let reason = loop {
        // AwaitingCommand
        buf.clear();
        let mut limited = (&mut reader).take(max_line_bytes as u64);
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break "shutdown",
            read = limited.read_until(b'\n', &mut buf) => read,
        };
        let n = match read {
            Ok(0) => break "peer_closed",
            Ok(n) => n,
            Err(e) => {
                warn!(target: "wavy.protocol", error = %e, "session_read_failed");
                break "read_error";
            }
        };

        if n >= max_line_bytes && buf.last() != Some(&b'\n') {
            wavy_telemetry::record_malformed_command();
            warn!(target: "wavy.protocol", limit = max_line_bytes, "line_too_long");
            let _ = write_reply(&mut writer, &Reply::InvalidCommand).await;
            break "line_too_long";
        }

        let text = String::from_utf8_lossy(&buf);
        let line = text.trim();

        // Dispatching
        let outcome = match DeviceCommand::parse(line) {
            Ok(command) => {
                debug!(target: "wavy.protocol", verb = command.verb(), "command_received");
                handler.handle(line, command).await
            }
            Err(e) => {
                wavy_telemetry::record_malformed_command();
                warn!(target: "wavy.protocol", error = %e, "malformed_command");
                SessionOutcome::reply(Reply::InvalidCommand)
            }
        };

        if let Some(reply) = outcome.reply.as_ref() {
            if let Err(e) = write_reply(&mut writer, reply).await {
                warn!(target: "wavy.protocol", error = %e, "session_write_failed");
                break "write_error";
            }
        }
        if outcome.close {
            break "quit";
        }
    };

    // Closed
    let _ = writer.shutdown().await;
    wavy_telemetry::record_session_closed();
    info!(target: "wavy.protocol", reason, "session_closed");
}

async fn write_reply(writer: &mut OwnedWriteHalf, reply: &Reply) -> Result<(), ProtocolError> {
    let mut payload = reply.to_string();
    payload.push('\n');
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
