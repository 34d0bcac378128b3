use domain::{Destination, PendingReading, Reading};
use tokio::sync::Mutex;

struct BufferState {
    items: Vec<PendingReading>,
    next_sequence: u64,
}

/// 批量缓冲：按接受顺序保存待刷新读数，多会话并发追加。
pub struct BatchBuffer {
    state: Mutex<BufferState>,
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BufferState {
                items: Vec::new(),
                next_sequence: 0,
            }),
        }
    }

    /// 追加一条读数，返回其序号。
    pub async fn append(&self, reading: Reading, destination: Destination) -> u64 {
        let mut state = self.state.lock().await;
        let sequence = state.next_sequence;
        state.next_sequence = state.next_sequence.saturating_add(1);
        state.items.push(PendingReading {
            sequence,
            reading,
            destination,
        });
        sequence
    }

    /// 原子地取走全部读数并清空缓冲；之后的追加进入下一批。
    pub async fn drain(&self) -> Vec<PendingReading> {
        let mut state = self.state.lock().await;
        let mut batch = Vec::new();
        std::mem::swap(&mut state.items, &mut batch);
        batch
    }

    /// 把投递失败的读数放回缓冲最前面（排在更新的读数之前）。
    ///
    /// 放回后总量超过 `max_buffered` 时不放回，原样返回。
    pub async fn requeue(
        &self,
        mut batch: Vec<PendingReading>,
        max_buffered: usize,
    ) -> Result<(), Vec<PendingReading>> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if state.items.len() + batch.len() > max_buffered {
            return Err(batch);
        }
        batch.append(&mut state.items);
        state.items = batch;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for BatchBuffer {
    fn default() -> Self {
        Self::new()
    }
}
