//! 聚合器运行配置加载。

use domain::Destination;
use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// DATA 处理方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// 缓冲后定时批量投递（默认）。
    Batch,
    /// 每条读数同步转发并回传服务器应答。
    Immediate,
}

/// 批次投递方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// 写暂存 CSV，再发送 `FORWARD FILE <path>`。
    File,
    /// 按目标地址分组，批次内容随请求发送。
    Inline,
}

/// 刷新投递失败后的处理策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushFailurePolicy {
    Drop,
    Requeue,
}

/// 聚合器运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    pub control_addr: String,
    pub console_enabled: bool,
    pub server: Destination,
    pub devices_path: String,
    pub routing_path: String,
    pub staging_path: String,
    pub flush_interval_secs: u64,
    pub forward_mode: ForwardMode,
    pub delivery_mode: DeliveryMode,
    pub flush_failure: FlushFailurePolicy,
    pub max_buffered: usize,
    pub forward_connect_timeout_ms: u64,
    pub forward_read_timeout_ms: u64,
    pub shutdown_grace_secs: u64,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr =
            env::var("WAVY_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string());
        let control_addr =
            env::var("WAVY_CONTROL_ADDR").unwrap_or_else(|_| "127.0.0.1:5002".to_string());
        let console_enabled = read_bool_with_default("WAVY_CONSOLE", true);
        let server = read_destination_with_default("WAVY_SERVER_ADDR", "127.0.0.1:5001")?;
        let devices_path =
            env::var("WAVY_DEVICES_PATH").unwrap_or_else(|_| "waves.csv".to_string());
        let routing_path =
            env::var("WAVY_ROUTING_PATH").unwrap_or_else(|_| "routing.csv".to_string());
        let staging_path =
            env::var("WAVY_STAGING_PATH").unwrap_or_else(|_| "collected_data.csv".to_string());
        let flush_interval_secs = read_u64_with_default("WAVY_FLUSH_INTERVAL_SECS", 40)?;
        if flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "WAVY_FLUSH_INTERVAL_SECS".to_string(),
                "0".to_string(),
            ));
        }
        let forward_mode = match read_choice("WAVY_FORWARD_MODE", "batch", &["batch", "immediate"])?
            .as_str()
        {
            "immediate" => ForwardMode::Immediate,
            _ => ForwardMode::Batch,
        };
        let delivery_mode = match read_choice("WAVY_DELIVERY", "file", &["file", "inline"])?.as_str()
        {
            "inline" => DeliveryMode::Inline,
            _ => DeliveryMode::File,
        };
        let flush_failure =
            match read_choice("WAVY_FLUSH_FAILURE", "drop", &["drop", "requeue"])?.as_str() {
                "requeue" => FlushFailurePolicy::Requeue,
                _ => FlushFailurePolicy::Drop,
            };
        let max_buffered = read_u64_with_default("WAVY_MAX_BUFFERED", 100_000)? as usize;
        let forward_connect_timeout_ms =
            read_u64_with_default("WAVY_FORWARD_CONNECT_TIMEOUT_MS", 5000)?;
        let forward_read_timeout_ms = read_u64_with_default("WAVY_FORWARD_READ_TIMEOUT_MS", 5000)?;
        let shutdown_grace_secs = read_u64_with_default("WAVY_SHUTDOWN_GRACE_SECS", 5)?;

        Ok(Self {
            listen_addr,
            control_addr,
            console_enabled,
            server,
            devices_path,
            routing_path,
            staging_path,
            flush_interval_secs,
            forward_mode,
            delivery_mode,
            flush_failure,
            max_buffered,
            forward_connect_timeout_ms,
            forward_read_timeout_ms,
            shutdown_grace_secs,
        })
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}

fn read_destination_with_default(key: &str, default: &str) -> Result<Destination, ConfigError> {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<Destination>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

/// 读取枚举型取值（大小写不敏感），不在候选内即报错。
fn read_choice(key: &str, default: &str, allowed: &[&str]) -> Result<String, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value.trim().to_ascii_lowercase(),
        Err(_) => return Ok(default.to_string()),
    };
    if allowed.contains(&value.as_str()) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid(key.to_string(), value))
    }
}
