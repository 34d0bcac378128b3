//! 批次下沉：暂存文件引用 / 内联批次。

use crate::PipelineError;
use async_trait::async_trait;
use domain::{CollectedReading, Destination};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use wavy_protocol::{Forwarder, OK, ServerRequest};

/// 暂存文件表头。
pub const STAGING_HEADER: &str = "Timestamp,WavyId,DataType,Value";

/// 一组未送达的读数（下标指向本次批次）及原因。
#[derive(Debug)]
pub struct DeliveryFailure {
    pub undelivered: Vec<usize>,
    pub error: PipelineError,
}

/// 批次投递抽象：一次刷新即一次逻辑投递。
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// 全部送达返回 `Ok`；否则返回各组失败。
    async fn deliver(&self, batch: &[CollectedReading]) -> Result<(), Vec<DeliveryFailure>>;
}

/// 渲染暂存文件内容。
pub fn render_staging(batch: &[CollectedReading]) -> String {
    let mut out = String::from(STAGING_HEADER);
    out.push('\n');
    for reading in batch {
        out.push_str(&reading.to_row());
        out.push('\n');
    }
    out
}

/// 暂存文件下沉：覆盖写暂存 CSV，再向服务器发送 `FORWARD FILE <path>`。
///
/// 服务器对文件引用的应答内容不做约束，只要求在超时内收到一行。
pub struct StagingFileSink {
    path: PathBuf,
    server: Destination,
    forwarder: Arc<dyn Forwarder>,
}

impl StagingFileSink {
    pub fn new(path: impl Into<PathBuf>, server: Destination, forwarder: Arc<dyn Forwarder>) -> Self {
        Self {
            path: path.into(),
            server,
            forwarder,
        }
    }

    async fn write_and_notify(&self, batch: &[CollectedReading]) -> Result<(), PipelineError> {
        tokio::fs::write(&self.path, render_staging(batch)).await?;
        debug!(target: "wavy.pipeline", path = %self.path.display(), rows = batch.len(), "staging_written");

        let request = ServerRequest::File(self.path.display().to_string());
        let response = self.forwarder.forward(&request, &self.server).await?;
        info!(
            target: "wavy.pipeline",
            server = %self.server,
            response = %response,
            "staging_reference_forwarded"
        );
        Ok(())
    }
}

#[async_trait]
impl BatchSink for StagingFileSink {
    async fn deliver(&self, batch: &[CollectedReading]) -> Result<(), Vec<DeliveryFailure>> {
        self.write_and_notify(batch).await.map_err(|error| {
            vec![DeliveryFailure {
                undelivered: (0..batch.len()).collect(),
                error,
            }]
        })
    }
}

/// 内联下沉：按目标地址分组（首次出现顺序），每组一次 `FORWARD BATCH` 往返，期望 `100 OK`。
pub struct InlineForwardSink {
    forwarder: Arc<dyn Forwarder>,
}

impl InlineForwardSink {
    pub fn new(forwarder: Arc<dyn Forwarder>) -> Self {
        Self { forwarder }
    }
}

/// 按目标分组，保持组间首次出现顺序与组内接受顺序。
fn group_by_destination(batch: &[CollectedReading]) -> Vec<(Destination, Vec<usize>)> {
    let mut groups: Vec<(Destination, Vec<usize>)> = Vec::new();
    for (index, reading) in batch.iter().enumerate() {
        match groups
            .iter_mut()
            .find(|(destination, _)| *destination == reading.destination)
        {
            Some((_, indices)) => indices.push(index),
            None => groups.push((reading.destination.clone(), vec![index])),
        }
    }
    groups
}

#[async_trait]
impl BatchSink for InlineForwardSink {
    async fn deliver(&self, batch: &[CollectedReading]) -> Result<(), Vec<DeliveryFailure>> {
        let mut failures = Vec::new();
        for (destination, indices) in group_by_destination(batch) {
            let rows = indices.iter().map(|&i| batch[i].to_row()).collect();
            let outcome = match self
                .forwarder
                .forward(&ServerRequest::Batch(rows), &destination)
                .await
            {
                Ok(response) if response == OK => Ok(()),
                Ok(response) => Err(PipelineError::Rejected(response)),
                Err(e) => Err(PipelineError::Forward(e)),
            };
            match outcome {
                Ok(()) => {
                    debug!(target: "wavy.pipeline", destination = %destination, rows = indices.len(), "batch_group_delivered");
                }
                Err(error) => failures.push(DeliveryFailure {
                    undelivered: indices,
                    error,
                }),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collected(device: &str, port: u16) -> CollectedReading {
        CollectedReading {
            timestamp: "2025-01-01 00:00:00".to_string(),
            device_id: device.to_string(),
            metric_type: "TEMP".to_string(),
            value: "20".to_string(),
            destination: Destination::new("127.0.0.1", port),
        }
    }

    #[test]
    fn staging_has_header_and_rows() {
        let rendered = render_staging(&[collected("W1", 1), collected("W2", 1)]);
        assert_eq!(
            rendered,
            "Timestamp,WavyId,DataType,Value\n\
             2025-01-01 00:00:00,W1,TEMP,20\n\
             2025-01-01 00:00:00,W2,TEMP,20\n"
        );
    }

    #[test]
    fn groups_keep_first_seen_order() {
        let batch = [
            collected("W1", 2),
            collected("W2", 1),
            collected("W3", 2),
        ];
        let groups = group_by_destination(&batch);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.port, 2);
        assert_eq!(groups[0].1, vec![0, 2]);
        assert_eq!(groups[1].1, vec![1]);
    }
}
