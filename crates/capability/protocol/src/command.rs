//! 线协议：设备命令、设备应答、上游请求。

use crate::error::ProtocolError;
use domain::Reading;
use std::fmt;

/// 服务器对 `FORWARD REGISTER` 的应答。
pub const ACK_REGISTERED: &str = "ACK REGISTERED";
/// 服务器对数据投递的应答。
pub const OK: &str = "100 OK";
/// 服务器对 `FORWARD QUIT` 的应答。
pub const SERVER_BYE: &str = "400 BYE";

/// 设备发来的命令。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    Register { device_id: String },
    /// 额外参数被忽略
    Data(Reading),
    Quit,
}

impl DeviceCommand {
    /// 解析一行命令（已去除行尾换行）。动词区分大小写。
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut parts = line.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| ProtocolError::Malformed("empty line".to_string()))?;
        match verb {
            "REGISTER" => {
                let device_id = parts
                    .next()
                    .ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
                Ok(Self::Register {
                    device_id: device_id.to_string(),
                })
            }
            "DATA" => match (parts.next(), parts.next(), parts.next()) {
                (Some(device_id), Some(metric_type), Some(value)) => {
                    Ok(Self::Data(Reading::new(device_id, metric_type, value)))
                }
                _ => Err(ProtocolError::Malformed(line.to_string())),
            },
            "QUIT" if parts.next().is_none() => Ok(Self::Quit),
            _ => Err(ProtocolError::Malformed(line.to_string())),
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Register { .. } => "REGISTER",
            Self::Data(_) => "DATA",
            Self::Quit => "QUIT",
        }
    }
}

/// 聚合器写回设备的应答。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    NotAssociated,
    BlockedState(String),
    RoutingNotFound,
    PreprocessingFailed,
    Bye,
    InvalidCommand,
    /// 转发往返失败（连接、写入、读取或超时）
    ServerUnavailable,
    /// 服务器应答原样转回
    Relayed(String),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAssociated => f.write_str("403 NOT ASSOCIATED"),
            Self::BlockedState(state) => write!(f, "403 BLOCKED STATE: {}", state),
            Self::RoutingNotFound => f.write_str("404 ROUTING NOT FOUND"),
            Self::PreprocessingFailed => f.write_str("422 PREPROCESSING FAILED"),
            Self::Bye => f.write_str("400 BYE"),
            Self::InvalidCommand => f.write_str("400 INVALID COMMAND"),
            Self::ServerUnavailable => f.write_str("503 SERVER UNAVAILABLE"),
            Self::Relayed(response) => f.write_str(response),
        }
    }
}

/// 一条命令的处理结果：可选应答，以及是否结束会话。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionOutcome {
    pub reply: Option<Reply>,
    pub close: bool,
}

impl SessionOutcome {
    pub fn reply(reply: Reply) -> Self {
        Self {
            reply: Some(reply),
            close: false,
        }
    }

    /// 无应答（批量模式下被接受的 DATA）。
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn reply_and_close(reply: Reply) -> Self {
        Self {
            reply: Some(reply),
            close: true,
        }
    }
}

/// 发往服务器的请求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerRequest {
    /// 设备原始命令加 `FORWARD ` 前缀
    Forward(String),
    /// 暂存文件引用
    File(String),
    /// 内联批次，每项为一行 `timestamp,device,metric,value`
    Batch(Vec<String>),
    /// 聚合器撤出通知
    Quit,
}

impl ServerRequest {
    /// 包装设备原始命令行。
    pub fn forward(line: &str) -> Self {
        Self::Forward(line.trim().to_string())
    }

    /// 编码为线格式（不含末尾换行）。
    pub fn encode(&self) -> String {
        match self {
            Self::Forward(line) => format!("FORWARD {}", line),
            Self::File(path) => format!("FORWARD FILE {}", path),
            Self::Batch(rows) => {
                let mut out = format!("FORWARD BATCH {}", rows.len());
                for row in rows {
                    out.push('\n');
                    out.push_str(row);
                }
                out
            }
            Self::Quit => "FORWARD QUIT".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_register_and_data() {
        assert_eq!(
            DeviceCommand::parse("REGISTER W1").expect("register"),
            DeviceCommand::Register {
                device_id: "W1".to_string()
            }
        );
        assert_eq!(
            DeviceCommand::parse("DATA W1 TEMP 25 extra").expect("data"),
            DeviceCommand::Data(Reading::new("W1", "TEMP", "25"))
        );
        assert_eq!(DeviceCommand::parse("QUIT").expect("quit"), DeviceCommand::Quit);
    }

    #[test]
    fn parse_rejects_malformed() {
        for line in ["", "REGISTER", "DATA W1 TEMP", "HELLO", "register W1", "QUIT now"] {
            assert!(
                matches!(DeviceCommand::parse(line), Err(ProtocolError::Malformed(_))),
                "{line:?} should be malformed"
            );
        }
    }

    #[test]
    fn reply_codes() {
        assert_eq!(Reply::NotAssociated.to_string(), "403 NOT ASSOCIATED");
        assert_eq!(
            Reply::BlockedState("manutencao".to_string()).to_string(),
            "403 BLOCKED STATE: manutencao"
        );
        assert_eq!(Reply::RoutingNotFound.to_string(), "404 ROUTING NOT FOUND");
        assert_eq!(Reply::PreprocessingFailed.to_string(), "422 PREPROCESSING FAILED");
        assert_eq!(Reply::Bye.to_string(), "400 BYE");
        assert_eq!(Reply::Relayed(ACK_REGISTERED.to_string()).to_string(), ACK_REGISTERED);
    }

    #[test]
    fn encode_server_requests() {
        assert_eq!(
            ServerRequest::forward("REGISTER W1 ").encode(),
            "FORWARD REGISTER W1"
        );
        assert_eq!(
            ServerRequest::File("collected_data.csv".to_string()).encode(),
            "FORWARD FILE collected_data.csv"
        );
        assert_eq!(
            ServerRequest::Batch(vec!["a".to_string(), "b".to_string()]).encode(),
            "FORWARD BATCH 2\na\nb"
        );
        assert_eq!(ServerRequest::Quit.encode(), "FORWARD QUIT");
    }
}
