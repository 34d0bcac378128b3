//! 上游转发器
//!
//! 每次调用新建一个出站连接（不复用），写入一个请求，读取恰好一行应答后关闭。
//! 调用内不重试；连接与读写各有超时，避免单个不可达目标无限期阻塞调用方。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let forwarder = TcpForwarder::new(ForwarderConfig::default());
//! let reply = forwarder
//!     .forward(&ServerRequest::forward("REGISTER W1"), &server)
//!     .await?;
//! ```

use crate::command::ServerRequest;
use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::Destination;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// 转发器抽象。
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// 一次往返：返回服务器应答（去除行尾换行）。
    async fn forward(
        &self,
        request: &ServerRequest,
        destination: &Destination,
    ) -> Result<String, ProtocolError>;
}

/// TCP 转发器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// 写入 + 读取应答超时（毫秒）
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_io_timeout() -> u64 {
    5000
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            io_timeout_ms: default_io_timeout(),
        }
    }
}

/// 基于 TCP 的一次性转发器
#[derive(Debug, Clone)]
pub struct TcpForwarder {
    config: ForwarderConfig,
}

impl TcpForwarder {
    pub fn new(config: ForwarderConfig) -> Self {
        Self { config }
    }

    /// 从 JSON 配置字符串解析
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        let config: ForwarderConfig = serde_json::from_str(json)
            .map_err(|e| ProtocolError::ConfigParse(e.to_string()))?;
        Ok(Self::new(config))
    }

    async fn round_trip(
        &self,
        stream: TcpStream,
        payload: &str,
    ) -> Result<String, ProtocolError> {
        let (reader, mut writer) = stream.into_split();
        writer.write_all(payload.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        let mut response = String::new();
        let n = reader.read_line(&mut response).await?;
        if n == 0 {
            return Err(ProtocolError::Connection(
                "closed without response".to_string(),
            ));
        }
        Ok(response.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[async_trait]
impl Forwarder for TcpForwarder {
    async fn forward(
        &self,
        request: &ServerRequest,
        destination: &Destination,
    ) -> Result<String, ProtocolError> {
        let addr = destination.to_string();
        let stream = timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| ProtocolError::Timeout(format!("connect {}", addr)))?
        .map_err(|e| ProtocolError::Connection(format!("{}: {}", addr, e)))?;

        let payload = request.encode();
        debug!(target: "wavy.protocol", destination = %addr, request = %payload, "forward_sent");

        let response = timeout(
            Duration::from_millis(self.config.io_timeout_ms),
            self.round_trip(stream, &payload),
        )
        .await
        .map_err(|_| ProtocolError::Timeout(format!("response from {}", addr)))??;

        debug!(target: "wavy.protocol", destination = %addr, response = %response, "forward_response");
        Ok(response)
    }
}

/// 记录型转发器（用于接线与测试）。
///
/// 记录每次请求；应答为 `None` 时模拟不可达。
#[derive(Debug, Default)]
pub struct RecordingForwarder {
    sent: Mutex<Vec<(ServerRequest, Destination)>>,
    response: Mutex<Option<String>>,
}

impl RecordingForwarder {
    /// 对每个请求都返回固定应答。
    pub fn replying(response: impl Into<String>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            response: Mutex::new(Some(response.into())),
        }
    }

    /// 每次调用都失败。
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn set_response(&self, response: Option<String>) {
        if let Ok(mut current) = self.response.lock() {
            *current = response;
        }
    }

    /// 已发送的请求（含失败的尝试）。
    pub fn sent(&self) -> Vec<(ServerRequest, Destination)> {
        self.sent.lock().map(|items| items.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn forward(
        &self,
        request: &ServerRequest,
        destination: &Destination,
    ) -> Result<String, ProtocolError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((request.clone(), destination.clone()));
        }
        let response = self.response.lock().ok().and_then(|current| current.clone());
        response.ok_or_else(|| ProtocolError::Connection(format!("{}: unreachable", destination)))
    }
}
