//! 吞吐量优先的批量调度器
//!
//! 请求按 (模型链, 优先级) 合并成容量有限的批次，按优先级派发给执行单元池。
//! 每个请求经历 `排队 → 入批 → 派发 → 结算` 四个状态。
//!
//! ## 同步区
//! 队列和执行单元池只在持有 `state` 锁的同步代码中修改，锁从不跨越 `.await`。
//! 下载、模型加载和翻译调用都在锁外进行。
//!
//! ## 失败语义
//! 批次失败是原子的：模型加载或翻译调用失败时，批次中的每个请求都以同一个错误拒绝。
//! 调度器自身从不重试。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::context::{TranslatorBuilder, TranslatorContext};
use super::queue::{Batch, BatchQueue, BatchSnapshot};
use super::ticket::{PendingRequest, TranslationTicket};
use crate::translation::config::TranslatorConfig;
use crate::translation::error::{helpers, TranslationError, TranslationResult};
use crate::translation::registry::resolver::ModelChain;
use crate::translation::storage::CacheStats;
use crate::translation::types::{ModelKey, TextInput, TranslationRequest};
use crate::translation::worker::{EngineFactory, ExecutionUnit};
use crate::utils::lock;

struct WorkerSlot {
    unit: Arc<ExecutionUnit>,
    idle: bool,
}

struct BatchState {
    queue: BatchQueue,
    /// 模型链尚未解析的请求，按提交顺序
    resolving: HashMap<ModelKey, Vec<PendingRequest>>,
    units: Vec<WorkerSlot>,
    /// 正在创建的执行单元数量
    starting: usize,
    /// 上一次创建失败后暂停扩容，直到有执行单元空闲或有新请求入队
    spawn_blocked: bool,
    closed: bool,
}

impl BatchState {
    fn enqueue(&mut self, models: ModelChain, entry: PendingRequest) {
        let batch = self.queue.enqueue(models, entry);
        self.spawn_blocked = false;
        tracing::debug!("请求加入批次 {}", batch);
    }
}

enum Admission {
    Queued,
    Waiting,
    Resolve(ModelKey),
    Rejected(PendingRequest),
}

enum Dispatch {
    Consume(Arc<ExecutionUnit>, Batch),
    Spawn,
}

struct Inner {
    context: TranslatorContext,
    state: Mutex<BatchState>,
}

/// 批量调度器
///
/// 克隆得到的句柄共享同一个调度器。所有公开方法都不阻塞，
/// 必须在 tokio 运行时中调用。
#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<Inner>,
}

impl BatchScheduler {
    /// 使用配置和引擎工厂创建调度器，注册表从 `registry_url` 下载
    pub fn open(config: TranslatorConfig, factory: Arc<dyn EngineFactory>) -> TranslationResult<Self> {
        TranslatorBuilder::new()
            .config(config)
            .engine_factory(factory)
            .build_batch()
    }

    pub fn builder() -> TranslatorBuilder {
        TranslatorBuilder::new()
    }

    pub(crate) fn from_context(context: TranslatorContext) -> Self {
        let batch_size = context.config().batch_size;
        Self {
            inner: Arc::new(Inner {
                context,
                state: Mutex::new(BatchState {
                    queue: BatchQueue::new(batch_size),
                    resolving: HashMap::new(),
                    units: Vec::new(),
                    starting: 0,
                    spawn_blocked: false,
                    closed: false,
                }),
            }),
        }
    }

    /// 提交翻译请求
    ///
    /// 模型链已经解析过时，请求在本次调用中同步入队；否则按提交顺序等待
    /// 同一语言对的解析完成后依次入队。
    pub fn translate(&self, request: TranslationRequest) -> TranslationTicket {
        let (entry, ticket) = PendingRequest::new(request);
        let key = entry.request().model_key();

        let admission = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                Admission::Rejected(entry)
            } else if let Some(waiting) = state.resolving.get_mut(&key) {
                waiting.push(entry);
                Admission::Waiting
            } else {
                match self.inner.context.resolver().peek(&key) {
                    Some(Ok(models)) => {
                        state.enqueue(models, entry);
                        Admission::Queued
                    }
                    _ => {
                        state.resolving.insert(key.clone(), vec![entry]);
                        Admission::Resolve(key)
                    }
                }
            }
        };

        match admission {
            Admission::Queued => self.inner.notify(),
            Admission::Waiting => {}
            Admission::Resolve(key) => {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move { inner.resolve_waiting(key).await });
            }
            Admission::Rejected(entry) => entry.reject(TranslationError::Closed),
        }

        ticket
    }

    /// 解析语言对需要的模型链
    pub async fn get_models(&self, from: &str, to: &str) -> TranslationResult<ModelChain> {
        self.inner.context.get_models(from, to).await
    }

    /// 移除排队中满足过滤条件的请求，以 `Removed` 拒绝，返回移除数量
    ///
    /// 其余请求按原有的模型链和优先级重新入批。已派发的请求不受影响。
    pub fn remove<F>(&self, filter: F) -> usize
    where
        F: Fn(&TranslationRequest) -> bool,
    {
        let removed = {
            let mut state = lock(&self.inner.state);
            let mut removed = Vec::new();
            for batch in state.queue.drain() {
                for entry in batch.requests {
                    if filter(entry.request()) {
                        removed.push(entry);
                    } else {
                        state.queue.enqueue(Arc::clone(&batch.models), entry);
                    }
                }
            }
            for waiting in state.resolving.values_mut() {
                let (matched, kept): (Vec<_>, Vec<_>) = std::mem::take(waiting)
                    .into_iter()
                    .partition(|entry| filter(entry.request()));
                *waiting = kept;
                removed.extend(matched);
            }
            removed
        };

        let count = removed.len();
        for entry in removed {
            entry.remove();
        }
        if count > 0 {
            tracing::debug!("移除了 {} 个排队中的请求", count);
        }
        count
    }

    /// 触发派发，可以随时重复调用
    pub fn notify(&self) {
        self.inner.notify();
    }

    /// 排队中批次的快照，按派发顺序
    pub fn queue_snapshot(&self) -> Vec<BatchSnapshot> {
        lock(&self.inner.state).queue.snapshot()
    }

    /// 池中执行单元的数量
    pub fn pool_size(&self) -> usize {
        lock(&self.inner.state).units.len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.context.cache().stats()
    }

    pub fn config(&self) -> &TranslatorConfig {
        self.inner.context.config()
    }

    /// 关闭调度器：拒绝排队中的请求、终止执行单元并清空资源缓存
    pub fn delete(&self) {
        let (batches, waiting, units) = {
            let mut state = lock(&self.inner.state);
            state.closed = true;
            let units: Vec<_> = state.units.drain(..).map(|slot| slot.unit).collect();
            let waiting: Vec<_> = state.resolving.drain().flat_map(|(_, list)| list).collect();
            (state.queue.drain(), waiting, units)
        };

        for entry in batches
            .into_iter()
            .flat_map(|batch| batch.requests)
            .chain(waiting)
        {
            entry.remove();
        }
        for unit in units {
            unit.terminate();
        }
        self.inner.context.cache().clear();
        tracing::info!("批量调度器已关闭");
    }

    /// [`BatchScheduler::delete`] 的别名
    pub fn close(&self) {
        self.delete();
    }
}

impl Inner {
    /// 解析语言对，并把等待中的请求按提交顺序一次性放入队列
    async fn resolve_waiting(self: Arc<Self>, key: ModelKey) {
        let resolved = self.context.get_models(&key.from, &key.to).await;

        let failed = {
            let mut state = lock(&self.state);
            let waiting = state.resolving.remove(&key).unwrap_or_default();
            match resolved {
                Ok(models) => {
                    for entry in waiting {
                        state.enqueue(Arc::clone(&models), entry);
                    }
                    None
                }
                Err(error) => Some((waiting, error)),
            }
        };

        match failed {
            Some((waiting, error)) => {
                for entry in waiting {
                    entry.reject(error.clone());
                }
            }
            None => self.notify(),
        }
    }

    /// 同步区：为空闲执行单元分配批次，必要时创建新的执行单元
    fn notify(self: &Arc<Self>) {
        loop {
            let dispatch = {
                let mut state = lock(&self.state);
                if state.closed || state.queue.is_empty() {
                    return;
                }

                state.units.retain(|slot| !(slot.idle && slot.unit.is_dead()));

                if let Some(index) = state.units.iter().position(|slot| slot.idle) {
                    match state.queue.pop_front() {
                        Some(batch) => {
                            state.units[index].idle = false;
                            Dispatch::Consume(Arc::clone(&state.units[index].unit), batch)
                        }
                        None => return,
                    }
                } else if !state.spawn_blocked
                    && state.units.len() + state.starting < self.context.config().workers
                {
                    state.starting += 1;
                    Dispatch::Spawn
                } else {
                    return;
                }
            };

            match dispatch {
                Dispatch::Consume(unit, batch) => {
                    let inner = Arc::clone(self);
                    tokio::spawn(async move {
                        inner.consume_batch(&unit, batch).await;
                        inner.release(&unit);
                    });
                }
                Dispatch::Spawn => {
                    let inner = Arc::clone(self);
                    tokio::spawn(async move { inner.add_unit().await });
                }
            }
        }
    }

    async fn add_unit(self: Arc<Self>) {
        let spawned = self.context.spawn_unit().await;

        let stranded = {
            let mut state = lock(&self.state);
            state.starting -= 1;
            match spawned {
                Ok(unit) if !state.closed => {
                    state.units.push(WorkerSlot { unit, idle: true });
                    None
                }
                Ok(unit) => {
                    unit.terminate();
                    None
                }
                // 没有任何可用的执行单元时，排队中的请求无法完成
                Err(error) if state.units.is_empty() && state.starting == 0 => {
                    Some((state.queue.drain(), error))
                }
                // 其它执行单元仍可处理队列，不立即重试创建
                Err(_) => {
                    state.spawn_blocked = true;
                    None
                }
            }
        };

        if let Some((batches, error)) = stranded {
            for entry in batches.into_iter().flat_map(|batch| batch.requests) {
                entry.reject(error.clone());
            }
            return;
        }

        self.notify();
    }

    fn release(self: &Arc<Self>, unit: &Arc<ExecutionUnit>) {
        {
            let mut state = lock(&self.state);
            state.spawn_blocked = false;
            if unit.is_dead() {
                tracing::warn!("执行单元 {} 已失效，移出调度池", unit.id());
                state.units.retain(|slot| !Arc::ptr_eq(&slot.unit, unit));
            } else if let Some(slot) = state
                .units
                .iter_mut()
                .find(|slot| Arc::ptr_eq(&slot.unit, unit))
            {
                slot.idle = true;
            }
        }
        self.notify();
    }

    async fn consume_batch(&self, unit: &ExecutionUnit, batch: Batch) {
        let keys = batch.model_keys();
        let Batch {
            id,
            models,
            requests,
            ..
        } = batch;

        let (cancelled, live): (Vec<_>, Vec<_>) =
            requests.into_iter().partition(PendingRequest::is_cancelled);
        for entry in cancelled {
            entry.remove();
        }
        if live.is_empty() {
            return;
        }

        tracing::debug!(
            "执行单元 {} 处理批次 {}，共 {} 个请求",
            unit.id(),
            id,
            live.len()
        );

        let texts: Vec<TextInput> = live.iter().map(|entry| entry.request().to_input()).collect();

        let result = async {
            self.context.ensure_models_loaded(unit, &models).await?;
            unit.translate(keys, texts).await
        }
        .await;

        match result {
            Ok(responses) => {
                for (entry, response) in live.into_iter().zip(responses) {
                    entry.resolve(response);
                }
            }
            Err(error) => {
                helpers::log_error(&error);
                for entry in live {
                    entry.reject(error.clone());
                }
            }
        }
    }
}
