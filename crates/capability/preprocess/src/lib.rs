//! 读数预处理。
//!
//! 只有路由规则标记 `requires_preprocessing` 时才会调用；对不认识的指标类型
//! 一律放行，拒绝只可能来自本模块明确理解的类型。

use domain::Reading;
use tracing::debug;

/// 温度读数的合法闭区间。
pub const TEMP_RANGE: (f64, f64) = (0.0, 40.0);

/// 预处理拒绝原因。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PreprocessError {
    #[error("{metric} value is not a number: {value}")]
    Unparsable { metric: String, value: String },
    #[error("{metric} value out of range: {value}")]
    OutOfRange { metric: String, value: f64 },
}

/// 校验单个读数值，返回拒绝原因。
pub fn check(metric_type: &str, raw_value: &str) -> Result<(), PreprocessError> {
    match metric_type {
        "TEMP" => {
            let value = raw_value
                .trim()
                .parse::<f64>()
                .map_err(|_| PreprocessError::Unparsable {
                    metric: metric_type.to_string(),
                    value: raw_value.to_string(),
                })?;
            let (min, max) = TEMP_RANGE;
            // NaN 不满足区间比较，同样被拒绝
            if value >= min && value <= max {
                Ok(())
            } else {
                Err(PreprocessError::OutOfRange {
                    metric: metric_type.to_string(),
                    value,
                })
            }
        }
        _ => Ok(()),
    }
}

/// `check` 的布尔形式。
pub fn validate(metric_type: &str, raw_value: &str) -> bool {
    check(metric_type, raw_value).is_ok()
}

/// 按路由规则决定是否预处理的包装。
#[derive(Debug, Clone, Copy, Default)]
pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// 规则不要求预处理时直接放行。
    pub fn apply(&self, requires_preprocessing: bool, reading: &Reading) -> Result<(), PreprocessError> {
        if !requires_preprocessing {
            return Ok(());
        }
        let result = check(&reading.metric_type, &reading.value);
        debug!(
            target: "wavy.preprocess",
            device_id = %reading.device_id,
            metric_type = %reading.metric_type,
            value = %reading.value,
            accepted = result.is_ok(),
            "preprocess_checked"
        );
        result
    }
}
