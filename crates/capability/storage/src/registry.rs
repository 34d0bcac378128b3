//! 配置/状态存储门面
//!
//! 所有连接处理器与控制通道都经由 `StateRegistry` 读写两张表。
//! 设备状态的单点更新先落内存、再整表写穿到外部源；写穿串行化，
//! 保证外部源最终内容与最后一次更新一致。

use crate::error::StorageError;
use crate::in_memory::{InMemoryDeviceStateStore, InMemoryRoutingStore};
use crate::models::{DeviceRecord, RoutingRule};
use crate::traits::{DeviceStateStore, RoutingStore, TableSource};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// 一次加载/重载的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub devices: usize,
    pub rules: usize,
}

/// 设备状态更新结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetStateOutcome {
    Updated(DeviceRecord),
    NotFound,
}

pub struct StateRegistry {
    devices: Arc<dyn DeviceStateStore>,
    routes: Arc<dyn RoutingStore>,
    source: Arc<dyn TableSource>,
    write_through: Mutex<()>,
}

impl StateRegistry {
    pub fn new(
        devices: Arc<dyn DeviceStateStore>,
        routes: Arc<dyn RoutingStore>,
        source: Arc<dyn TableSource>,
    ) -> Self {
        Self {
            devices,
            routes,
            source,
            write_through: Mutex::new(()),
        }
    }

    /// 以空的内存表创建，需调用 `reload` 填充。
    pub fn in_memory(source: Arc<dyn TableSource>) -> Self {
        Self::new(
            Arc::new(InMemoryDeviceStateStore::new()),
            Arc::new(InMemoryRoutingStore::new()),
            source,
        )
    }

    /// 从外部源整体重载两张表。
    ///
    /// 两张表都读成功后才替换；任一读取失败则保留当前内容。
    pub async fn reload(&self) -> Result<LoadSummary, StorageError> {
        let devices = self.source.load_devices().await?;
        let rules = self.source.load_rules().await?;
        let summary = LoadSummary {
            devices: devices.len(),
            rules: rules.len(),
        };
        let _guard = self.write_through.lock().await;
        self.devices.replace_devices(devices).await?;
        self.routes.replace_rules(rules).await?;
        info!(
            target: "wavy.storage",
            devices = summary.devices,
            rules = summary.rules,
            "tables_reloaded"
        );
        Ok(summary)
    }

    pub async fn device_state(&self, device_id: &str) -> Result<Option<String>, StorageError> {
        self.devices.find_state(device_id).await
    }

    pub async fn routing_rule(
        &self,
        device_id: &str,
        metric_type: &str,
    ) -> Result<Option<RoutingRule>, StorageError> {
        self.routes.find_rule(device_id, metric_type).await
    }

    /// 覆盖已有设备状态并写穿；未知设备返回 `NotFound`，不新建。
    ///
    /// 写穿失败时内存中的新状态保留，错误返回给调用方。
    pub async fn set_state(
        &self,
        device_id: &str,
        state: &str,
    ) -> Result<SetStateOutcome, StorageError> {
        let _guard = self.write_through.lock().await;
        let Some(record) = self.devices.update_state(device_id, state).await? else {
            return Ok(SetStateOutcome::NotFound);
        };
        let snapshot = self.devices.list_devices().await?;
        self.source.save_devices(&snapshot).await?;
        Ok(SetStateOutcome::Updated(record))
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>, StorageError> {
        self.devices.list_devices().await
    }

    pub async fn list_rules(&self) -> Result<Vec<RoutingRule>, StorageError> {
        self.routes.list_rules().await
    }

    /// 当前两张表的规模。
    pub async fn counts(&self) -> Result<LoadSummary, StorageError> {
        Ok(LoadSummary {
            devices: self.devices.list_devices().await?.len(),
            rules: self.routes.list_rules().await?.len(),
        })
    }
}
