//! # 协议能力模块
//!
//! 聚合器两跳网络的线协议与传输：
//! - **设备 ↔ 聚合器**：长连接、按行分隔的文本命令（`REGISTER` / `DATA` / `QUIT`）
//! - **聚合器 ↔ 服务器**：一次性连接，一个请求、恰好一个应答
//!
//! ## 架构设计
//!
//! ```text
//! DeviceServer (accept loop)
//!       │  每个连接一个 tokio 任务（TaskTracker 追踪）
//!       ▼
//! session loop: AwaitingCommand → Dispatching → AwaitingCommand | Closed
//!       │
//!       ▼
//! SessionHandler (ingest 实现)
//!       │
//!       ▼
//! Forwarder (TcpForwarder: connect → write → read one line → close)
//! ```
//!
//! ## 线格式
//!
//! ```text
//! 设备 → 聚合器:  REGISTER <id> | DATA <id> <metric> <value> | QUIT
//! 聚合器 → 设备:  403 NOT ASSOCIATED | 403 BLOCKED STATE: <state> | 404 ROUTING NOT FOUND
//!                 422 PREPROCESSING FAILED | 400 BYE | 400 INVALID COMMAND
//!                 503 SERVER UNAVAILABLE | <服务器应答原样转回>
//! 聚合器 → 服务器: FORWARD REGISTER <id> | FORWARD DATA <id> <metric> <value>
//!                 FORWARD FILE <path> | FORWARD BATCH <n> + n 行 | FORWARD QUIT
//! ```

mod command;
mod error;
mod forwarder;
mod tcp_server;

pub use command::{
    ACK_REGISTERED, DeviceCommand, OK, Reply, SERVER_BYE, ServerRequest, SessionOutcome,
};
pub use error::ProtocolError;
pub use forwarder::{Forwarder, ForwarderConfig, RecordingForwarder, TcpForwarder};
pub use tcp_server::{DeviceServer, ListenerHandle, SessionHandler, TcpServerConfig};
