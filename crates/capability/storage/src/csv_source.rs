//! CSV 外部源
//!
//! 设备表：`wavy_id,state`；路由表：`wavy_id,data_type,preprocess,ip,port`。
//! 以 `wavy_id` 开头的行视为表头。文件缺失时返回空表，坏行跳过并告警。

use crate::error::StorageError;
use crate::models::{DeviceRecord, RoutingRule};
use crate::traits::TableSource;
use domain::Destination;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const HEADER_PREFIX: &str = "wavy_id";
const DEVICES_HEADER: &str = "wavy_id,state";

/// 基于 CSV 文件的外部源。
#[derive(Debug, Clone)]
pub struct CsvTableSource {
    devices_path: PathBuf,
    routing_path: PathBuf,
}

impl CsvTableSource {
    pub fn new(devices_path: impl Into<PathBuf>, routing_path: impl Into<PathBuf>) -> Self {
        Self {
            devices_path: devices_path.into(),
            routing_path: routing_path.into(),
        }
    }
}

/// 读取文件；不存在时返回 `None`。
async fn read_optional(path: &Path) -> Result<Option<String>, StorageError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!(target: "wavy.storage", path = %path.display(), "table_source_missing");
            Ok(None)
        }
        Err(err) => Err(StorageError::new(format!(
            "read {} failed: {}",
            path.display(),
            err
        ))),
    }
}

fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with(HEADER_PREFIX))
}

/// 解析设备表文本。
pub fn parse_devices(text: &str) -> Vec<DeviceRecord> {
    let mut records = Vec::new();
    for (line_no, line) in data_lines(text) {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < 2 || parts[0].trim().is_empty() {
            warn!(target: "wavy.storage", line_no, line, "device_row_skipped");
            continue;
        }
        records.push(DeviceRecord::new(parts[0].trim(), parts[1]));
    }
    records
}

/// 解析路由表文本。
pub fn parse_rules(text: &str) -> Vec<RoutingRule> {
    let mut rules = Vec::new();
    for (line_no, line) in data_lines(text) {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 5 || parts[0].is_empty() || parts[1].is_empty() {
            warn!(target: "wavy.storage", line_no, line, "routing_row_skipped");
            continue;
        }
        let Ok(port) = parts[4].parse::<u16>() else {
            warn!(target: "wavy.storage", line_no, line, "routing_row_invalid_port");
            continue;
        };
        let requires_preprocessing = parts[2].eq_ignore_ascii_case("true");
        rules.push(RoutingRule::new(
            parts[0],
            parts[1],
            requires_preprocessing,
            Destination::new(parts[3], port),
        ));
    }
    rules
}

/// 渲染设备表文本（含表头）。
pub fn render_devices(records: &[DeviceRecord]) -> String {
    let mut out = String::from(DEVICES_HEADER);
    out.push('\n');
    for record in records {
        out.push_str(&record.device_id);
        out.push(',');
        out.push_str(&record.state);
        out.push('\n');
    }
    out
}

#[async_trait::async_trait]
impl TableSource for CsvTableSource {
    async fn load_devices(&self) -> Result<Vec<DeviceRecord>, StorageError> {
        let Some(text) = read_optional(&self.devices_path).await? else {
            return Ok(Vec::new());
        };
        let records = parse_devices(&text);
        info!(
            target: "wavy.storage",
            path = %self.devices_path.display(),
            count = records.len(),
            "devices_loaded"
        );
        Ok(records)
    }

    /// 先写临时文件再重命名，读者不会看到半写的表。
    async fn save_devices(&self, records: &[DeviceRecord]) -> Result<(), StorageError> {
        let mut tmp = self.devices_path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, render_devices(records)).await?;
        tokio::fs::rename(&tmp, &self.devices_path).await?;
        Ok(())
    }

    async fn load_rules(&self) -> Result<Vec<RoutingRule>, StorageError> {
        let Some(text) = read_optional(&self.routing_path).await? else {
            return Ok(Vec::new());
        };
        let rules = parse_rules(&text);
        info!(
            target: "wavy.storage",
            path = %self.routing_path.display(),
            count = rules.len(),
            "routing_rules_loaded"
        );
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_devices_skips_header_and_normalizes() {
        let text = "wavy_id,estado\nW1, Operating \n\nbroken\nW2,manutencao\n";
        let records = parse_devices(text);
        assert_eq!(
            records,
            vec![
                DeviceRecord::new("W1", "operating"),
                DeviceRecord::new("W2", "manutencao"),
            ]
        );
    }

    #[test]
    fn parse_rules_skips_bad_rows() {
        let text = "wavy_id,data_type,preprocess,ip,port\n\
                    W1,TEMP,TRUE,127.0.0.1,6001\n\
                    W1,HUM,false,127.0.0.1,notaport\n\
                    W2,TEMP,true\n\
                    W2,WIND,no,10.0.0.5,6002\n";
        let rules = parse_rules(text);
        assert_eq!(rules.len(), 2);
        assert!(rules[0].requires_preprocessing);
        assert_eq!(rules[0].destination, Destination::new("127.0.0.1", 6001));
        assert_eq!(rules[1].metric_type, "WIND");
        assert!(!rules[1].requires_preprocessing);
    }

    #[test]
    fn render_devices_round_trips_through_parser() {
        let records = vec![
            DeviceRecord::new("W1", "operating"),
            DeviceRecord::new("W2", "manutencao"),
        ];
        assert_eq!(parse_devices(&render_devices(&records)), records);
    }
}
