//! 存储接口 Trait 定义
//!
//! - DeviceStateStore：设备状态表
//! - RoutingStore：路由表
//! - TableSource：外部数据源（加载两张表、回写设备表）

use crate::error::StorageError;
use crate::models::{DeviceRecord, RoutingRule};
use async_trait::async_trait;

/// 设备状态表接口
#[async_trait]
pub trait DeviceStateStore: Send + Sync {
    /// 查询设备状态
    async fn find_state(&self, device_id: &str) -> Result<Option<String>, StorageError>;

    /// 覆盖已有设备的状态；设备不存在时返回 `None`，不新建记录
    async fn update_state(
        &self,
        device_id: &str,
        state: &str,
    ) -> Result<Option<DeviceRecord>, StorageError>;

    /// 按设备 ID 排序列出全部记录
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, StorageError>;

    /// 整表替换
    async fn replace_devices(&self, records: Vec<DeviceRecord>) -> Result<(), StorageError>;
}

/// 路由表接口
#[async_trait]
pub trait RoutingStore: Send + Sync {
    /// 按 (device_id, metric_type) 精确查找
    async fn find_rule(
        &self,
        device_id: &str,
        metric_type: &str,
    ) -> Result<Option<RoutingRule>, StorageError>;

    async fn list_rules(&self) -> Result<Vec<RoutingRule>, StorageError>;

    /// 整表替换
    async fn replace_rules(&self, rules: Vec<RoutingRule>) -> Result<(), StorageError>;
}

/// 外部表数据源
#[async_trait]
pub trait TableSource: Send + Sync {
    async fn load_devices(&self) -> Result<Vec<DeviceRecord>, StorageError>;

    /// 回写完整设备表
    async fn save_devices(&self, records: &[DeviceRecord]) -> Result<(), StorageError>;

    async fn load_rules(&self) -> Result<Vec<RoutingRule>, StorageError>;
}
