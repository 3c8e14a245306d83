//! 批次队列
//!
//! 按优先级排序的批次列表。优先级数值越小越先派发，优先级相同的批次
//! 保持创建顺序。同一批次内的请求共享相同的模型链和优先级。

use super::ticket::PendingRequest;
use crate::translation::registry::model::chain_key;
use crate::translation::registry::resolver::ModelChain;
use crate::translation::types::ModelKey;

/// 一组一起派发的请求
#[derive(Debug)]
pub struct Batch {
    pub id: u64,
    /// 模型链键，例如 `es:en>en:de`
    pub key: String,
    pub priority: i32,
    pub models: ModelChain,
    pub requests: Vec<PendingRequest>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn model_keys(&self) -> Vec<ModelKey> {
        self.models.iter().map(|model| model.key()).collect()
    }
}

/// 排队中批次的只读视图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSnapshot {
    pub id: u64,
    pub key: String,
    pub priority: i32,
    pub len: usize,
}

/// 批次队列
#[derive(Debug)]
pub struct BatchQueue {
    batch_size: usize,
    serial: u64,
    batches: Vec<Batch>,
}

impl BatchQueue {
    /// `batch_size` 至少为 1
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            serial: 0,
            batches: Vec::new(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 放入请求，返回所在批次的 id
    ///
    /// 优先放入模型链和优先级相同且未满的批次；没有时创建新批次，
    /// 插入到第一个优先级数值更大的批次之前。
    pub fn enqueue(&mut self, models: ModelChain, entry: PendingRequest) -> u64 {
        let key = chain_key(&models);
        let priority = entry.request().priority;
        let batch_size = self.batch_size;

        if let Some(batch) = self.batches.iter_mut().find(|batch| {
            batch.key == key && batch.priority == priority && batch.requests.len() < batch_size
        }) {
            batch.requests.push(entry);
            return batch.id;
        }

        self.serial += 1;
        let id = self.serial;
        let position = self
            .batches
            .iter()
            .position(|batch| batch.priority > priority)
            .unwrap_or(self.batches.len());

        self.batches.insert(
            position,
            Batch {
                id,
                key,
                priority,
                models,
                requests: vec![entry],
            },
        );
        id
    }

    /// 取出队首批次
    pub fn pop_front(&mut self) -> Option<Batch> {
        if self.batches.is_empty() {
            None
        } else {
            Some(self.batches.remove(0))
        }
    }

    /// 取出全部批次
    pub fn drain(&mut self) -> Vec<Batch> {
        std::mem::take(&mut self.batches)
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// 批次数量
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// 排队中的请求总数
    pub fn pending_requests(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    pub fn snapshot(&self) -> Vec<BatchSnapshot> {
        self.batches
            .iter()
            .map(|batch| BatchSnapshot {
                id: batch.id,
                key: batch.key.clone(),
                priority: batch.priority,
                len: batch.len(),
            })
            .collect()
    }
}
