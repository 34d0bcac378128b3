//! 数据模型
//!
//! - 设备状态记录：DeviceRecord
//! - 路由规则：RoutingRule（键为 device_id + metric_type）

use domain::Destination;

/// 设备状态记录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device_id: String,
    pub state: String,
}

impl DeviceRecord {
    /// 构造记录，状态按统一规则规范化。
    pub fn new(device_id: impl Into<String>, state: &str) -> Self {
        Self {
            device_id: device_id.into(),
            state: domain::normalize_state(state),
        }
    }
}

/// 路由规则：决定某设备某指标是否需要预处理以及转发目标。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    pub device_id: String,
    pub metric_type: String,
    pub requires_preprocessing: bool,
    pub destination: Destination,
}

impl RoutingRule {
    pub fn new(
        device_id: impl Into<String>,
        metric_type: impl Into<String>,
        requires_preprocessing: bool,
        destination: Destination,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            metric_type: metric_type.into(),
            requires_preprocessing,
            destination,
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.device_id.clone(), self.metric_type.clone())
    }
}
