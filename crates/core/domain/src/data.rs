/// 设备上报的一条读数（未落入缓冲前的形态）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub device_id: String,
    pub metric_type: String,
    pub value: String,
}

impl Reading {
    pub fn new(
        device_id: impl Into<String>,
        metric_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            metric_type: metric_type.into(),
            value: value.into(),
        }
    }
}

/// 已通过校验、等待刷新的读数。
///
/// 追加后不再修改；`sequence` 为进入缓冲的全局序号，`destination`
/// 为路由规则给出的下游地址（内联投递时按它分组）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReading {
    pub sequence: u64,
    pub reading: Reading,
    pub destination: crate::Destination,
}

/// 刷新时物化的读数：时间戳在刷新时刻赋值，而非到达时刻。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedReading {
    pub timestamp: String,
    pub device_id: String,
    pub metric_type: String,
    pub value: String,
    pub destination: crate::Destination,
}

impl CollectedReading {
    /// 暂存文件/内联批次中的一行：`timestamp,deviceId,metricType,value`。
    pub fn to_row(&self) -> String {
        format!(
            "{},{},{},{}",
            self.timestamp, self.device_id, self.metric_type, self.value
        )
    }
}
