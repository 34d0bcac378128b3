pub mod data;

pub use data::{CollectedReading, PendingReading, Reading};

use std::fmt;
use std::str::FromStr;

/// 设备允许注册的唯一状态值；其它任意状态均视为阻断。
pub const OPERATING_STATE: &str = "operating";

/// 判断设备状态是否允许注册。
pub fn is_operating(state: &str) -> bool {
    state == OPERATING_STATE
}

/// 规范化设备状态（去空白并转小写），加载与更新共用同一规则。
pub fn normalize_state(state: &str) -> String {
    state.trim().to_ascii_lowercase()
}

/// 转发目标地址（host + port）。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 目标地址解析错误。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationParseError(String);

impl fmt::Display for DestinationParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid destination: {}", self.0)
    }
}

impl std::error::Error for DestinationParseError {}

impl FromStr for Destination {
    type Err = DestinationParseError;

    /// 解析 `host:port` 形式的地址。
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let (host, port) = value
            .rsplit_once(':')
            .ok_or_else(|| DestinationParseError(value.to_string()))?;
        if host.is_empty() {
            return Err(DestinationParseError(value.to_string()));
        }
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| DestinationParseError(value.to_string()))?;
        Ok(Self::new(host.trim(), port))
    }
}
