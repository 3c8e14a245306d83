//! 延迟优先的单飞调度器
//!
//! 最多持有一个待处理请求和一个执行单元。新请求到达时，尚未派发的旧请求
//! 以 `Superseded` 拒绝，只有最新的请求会被处理。

use std::sync::{Arc, Mutex};

use super::context::{TranslatorBuilder, TranslatorContext};
use super::ticket::{PendingRequest, TranslationTicket};
use crate::translation::config::TranslatorConfig;
use crate::translation::error::{helpers, TranslationError, TranslationResult};
use crate::translation::registry::resolver::ModelChain;
use crate::translation::types::{Response, TranslationRequest};
use crate::translation::worker::{EngineFactory, ExecutionUnit};
use crate::utils::lock;

/// 单槽待处理请求
///
/// 放入新请求时，被替换的请求以 [`TranslationError::Superseded`] 拒绝。
#[derive(Debug, Default)]
pub struct PendingSlot {
    pending: Option<PendingRequest>,
}

impl PendingSlot {
    pub fn supersede_with(&mut self, next: PendingRequest) {
        if let Some(previous) = self.pending.replace(next) {
            tracing::debug!("请求被取代: {}", previous.request().model_key());
            previous.reject(TranslationError::Superseded);
        }
    }

    pub fn take(&mut self) -> Option<PendingRequest> {
        self.pending.take()
    }

    pub fn is_occupied(&self) -> bool {
        self.pending.is_some()
    }
}

struct LatencyState {
    slot: PendingSlot,
    unit: Option<Arc<ExecutionUnit>>,
    busy: bool,
    closed: bool,
}

struct Inner {
    context: TranslatorContext,
    state: Mutex<LatencyState>,
}

/// 延迟优先调度器
#[derive(Clone)]
pub struct LatencyScheduler {
    inner: Arc<Inner>,
}

impl LatencyScheduler {
    pub fn open(config: TranslatorConfig, factory: Arc<dyn EngineFactory>) -> TranslationResult<Self> {
        TranslatorBuilder::new()
            .config(config)
            .engine_factory(factory)
            .build_latency()
    }

    pub fn builder() -> TranslatorBuilder {
        TranslatorBuilder::new()
    }

    pub(crate) fn from_context(context: TranslatorContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                context,
                state: Mutex::new(LatencyState {
                    slot: PendingSlot::default(),
                    unit: None,
                    busy: false,
                    closed: false,
                }),
            }),
        }
    }

    /// 提交翻译请求，取代尚未派发的旧请求
    pub fn translate(&self, request: TranslationRequest) -> TranslationTicket {
        let (entry, ticket) = PendingRequest::new(request);
        {
            let mut state = lock(&self.inner.state);
            if state.closed {
                drop(state);
                entry.reject(TranslationError::Closed);
                return ticket;
            }
            state.slot.supersede_with(entry);
        }
        self.inner.notify();
        ticket
    }

    pub async fn get_models(&self, from: &str, to: &str) -> TranslationResult<ModelChain> {
        self.inner.context.get_models(from, to).await
    }

    /// 是否有请求在等待派发
    pub fn has_pending(&self) -> bool {
        lock(&self.inner.state).slot.is_occupied()
    }

    /// 关闭调度器：拒绝待处理请求、终止执行单元并清空资源缓存
    pub fn delete(&self) {
        let (pending, unit) = {
            let mut state = lock(&self.inner.state);
            state.closed = true;
            (state.slot.take(), state.unit.take())
        };

        if let Some(entry) = pending {
            entry.remove();
        }
        if let Some(unit) = unit {
            unit.terminate();
        }
        self.inner.context.cache().clear();
        tracing::info!("延迟调度器已关闭");
    }

    /// [`LatencyScheduler::delete`] 的别名
    pub fn close(&self) {
        self.delete();
    }
}

impl Inner {
    fn notify(self: &Arc<Self>) {
        {
            let mut state = lock(&self.state);
            if state.busy || state.closed || !state.slot.is_occupied() {
                return;
            }
            state.busy = true;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.run().await });
    }

    /// 依次处理槽中的请求，直到槽为空
    async fn run(self: Arc<Self>) {
        loop {
            let (entry, unit) = {
                let mut state = lock(&self.state);
                match state.slot.take() {
                    Some(entry) if !state.closed => (entry, state.unit.clone()),
                    Some(entry) => {
                        state.busy = false;
                        drop(state);
                        entry.reject(TranslationError::Closed);
                        return;
                    }
                    None => {
                        state.busy = false;
                        return;
                    }
                }
            };

            if entry.is_cancelled() {
                entry.remove();
                continue;
            }

            let unit = match unit {
                Some(unit) if !unit.is_dead() => unit,
                _ => match self.context.spawn_unit().await {
                    Ok(unit) => {
                        let mut state = lock(&self.state);
                        if state.closed {
                            state.busy = false;
                            drop(state);
                            unit.terminate();
                            entry.reject(TranslationError::Closed);
                            return;
                        }
                        state.unit = Some(Arc::clone(&unit));
                        unit
                    }
                    Err(error) => {
                        entry.reject(error);
                        continue;
                    }
                },
            };

            match self.translate_one(&unit, entry.request()).await {
                Ok(response) => entry.resolve(response),
                Err(error) => {
                    helpers::log_error(&error);
                    entry.reject(error);
                }
            }
        }
    }

    async fn translate_one(
        &self,
        unit: &ExecutionUnit,
        request: &TranslationRequest,
    ) -> TranslationResult<Response> {
        let models = self.context.get_models(&request.from, &request.to).await?;
        self.context.ensure_models_loaded(unit, &models).await?;

        let keys = models.iter().map(|model| model.key()).collect();
        unit.translate(keys, vec![request.to_input()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| helpers::internal_error("执行单元没有返回翻译结果"))
    }
}
