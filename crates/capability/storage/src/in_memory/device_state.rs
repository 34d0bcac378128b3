//! 设备状态内存存储实现

use crate::error::StorageError;
use crate::models::DeviceRecord;
use crate::traits::DeviceStateStore;
use std::collections::HashMap;
use std::sync::RwLock;

/// 设备状态内存存储
///
/// 使用 RwLock + HashMap 提供线程安全的内存存储。
pub struct InMemoryDeviceStateStore {
    devices: RwLock<HashMap<String, DeviceRecord>>,
}

impl InMemoryDeviceStateStore {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// 使用初始记录创建存储
    pub fn with_records(records: Vec<DeviceRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|record| (record.device_id.clone(), record))
            .collect();
        Self {
            devices: RwLock::new(map),
        }
    }
}

impl Default for InMemoryDeviceStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DeviceStateStore for InMemoryDeviceStateStore {
    async fn find_state(&self, device_id: &str) -> Result<Option<String>, StorageError> {
        let map = self
            .devices
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(map.get(device_id).map(|record| record.state.clone()))
    }

    async fn update_state(
        &self,
        device_id: &str,
        state: &str,
    ) -> Result<Option<DeviceRecord>, StorageError> {
        let mut map = self
            .devices
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let record = match map.get_mut(device_id) {
            Some(record) => record,
            None => return Ok(None),
        };
        *record = DeviceRecord::new(device_id, state);
        Ok(Some(record.clone()))
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, StorageError> {
        let map = self
            .devices
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<DeviceRecord> = map.values().cloned().collect();
        items.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(items)
    }

    async fn replace_devices(&self, records: Vec<DeviceRecord>) -> Result<(), StorageError> {
        let next: HashMap<String, DeviceRecord> = records
            .into_iter()
            .map(|record| (record.device_id.clone(), record))
            .collect();
        let mut map = self
            .devices
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        *map = next;
        Ok(())
    }
}
