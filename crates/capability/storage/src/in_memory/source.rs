//! 静态外部源（测试与演示用）。
//!
//! 回写内容保存在内存中，可通过 `saved_devices` 检查写穿结果。

use crate::error::StorageError;
use crate::models::{DeviceRecord, RoutingRule};
use crate::traits::TableSource;
use std::sync::RwLock;

pub struct StaticTableSource {
    devices: RwLock<Vec<DeviceRecord>>,
    rules: RwLock<Vec<RoutingRule>>,
    saves: RwLock<u64>,
}

impl StaticTableSource {
    pub fn new(devices: Vec<DeviceRecord>, rules: Vec<RoutingRule>) -> Self {
        Self {
            devices: RwLock::new(devices),
            rules: RwLock::new(rules),
            saves: RwLock::new(0),
        }
    }

    /// 空源：模拟外部配置缺失。
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// 最近一次回写（或初始）的设备表。
    pub fn saved_devices(&self) -> Vec<DeviceRecord> {
        self.devices
            .read()
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    /// 回写次数。
    pub fn save_count(&self) -> u64 {
        self.saves.read().map(|count| *count).unwrap_or_default()
    }

    /// 替换路由表内容（模拟外部修改后重载）。
    pub fn set_rules(&self, rules: Vec<RoutingRule>) {
        if let Ok(mut items) = self.rules.write() {
            *items = rules;
        }
    }
}

#[async_trait::async_trait]
impl TableSource for StaticTableSource {
    async fn load_devices(&self) -> Result<Vec<DeviceRecord>, StorageError> {
        let items = self
            .devices
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(items.clone())
    }

    async fn save_devices(&self, records: &[DeviceRecord]) -> Result<(), StorageError> {
        let mut items = self
            .devices
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        *items = records.to_vec();
        let mut saves = self
            .saves
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        *saves += 1;
        Ok(())
    }

    async fn load_rules(&self) -> Result<Vec<RoutingRule>, StorageError> {
        let items = self
            .rules
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(items.clone())
    }
}
