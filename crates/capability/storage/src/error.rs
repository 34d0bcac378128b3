//! 存储层错误类型
//!
//! 本 crate 产生的错误只有三类，统一为 `StorageError` 的消息：
//! - CSV 外部源读取失败（文件存在但不可读）
//! - 内存表 `RwLock` 中毒
//! - `set_state` 写回设备表失败（临时文件写入或 rename），此时内存值已更新

#[derive(Debug)]
pub struct StorageError {
    message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}
