//! 执行单元代理
//!
//! 把一个独立的执行单元包装成带类型的异步方法表。每次调用被封装成
//! 携带唯一关联 id 的消息；回复读取任务按 id 找到对应的等待者并结算。
//! 收到无法匹配的 id 属于协议错误，执行单元随即被标记为失效。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use super::engine::{EngineFactory, EngineOptions};
use super::host::{spawn_host, HostChannels};
use super::protocol::{WorkerCall, WorkerReply, WorkerRequest, WorkerValue};
use crate::translation::error::{helpers, ErrorHook, TranslationError, TranslationResult};
use crate::translation::storage::ResourceBundle;
use crate::translation::types::{ModelKey, Response, TextInput};
use crate::utils::lock;

type Waiter = oneshot::Sender<TranslationResult<WorkerValue>>;
type PendingCalls = Arc<Mutex<HashMap<u64, Waiter>>>;

/// 执行单元
pub struct ExecutionUnit {
    id: usize,
    sender: Mutex<Option<mpsc::UnboundedSender<WorkerRequest>>>,
    pending: PendingCalls,
    serial: AtomicU64,
    dead: Arc<AtomicBool>,
    loaded: Mutex<HashSet<ModelKey>>,
    on_error: ErrorHook,
}

impl ExecutionUnit {
    /// 创建执行单元：启动宿主线程、创建引擎并连接消息通道
    pub async fn spawn(
        id: usize,
        factory: Arc<dyn EngineFactory>,
        options: EngineOptions,
        on_error: ErrorHook,
    ) -> TranslationResult<Self> {
        let channels = spawn_host(id, factory, options).await?;
        tracing::info!("执行单元 {} 已启动", id);
        Ok(Self::connect(id, channels, on_error))
    }

    /// 连接到已有的消息通道
    ///
    /// 必须在 tokio 运行时内调用，回复读取任务在这里启动。
    pub fn connect(id: usize, channels: HostChannels, on_error: ErrorHook) -> Self {
        let (sender, replies) = channels;
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let dead = Arc::new(AtomicBool::new(false));

        tokio::spawn(route_replies(
            id,
            replies,
            Arc::clone(&pending),
            Arc::clone(&dead),
            Arc::clone(&on_error),
        ));

        Self {
            id,
            sender: Mutex::new(Some(sender)),
            pending,
            serial: AtomicU64::new(0),
            dead,
            loaded: Mutex::new(HashSet::new()),
            on_error,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// 执行单元是否已失效（协议错误、线程退出或已终止）
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// 本地记录的已加载模型
    pub fn loaded_models(&self) -> Vec<ModelKey> {
        let mut keys: Vec<_> = lock(&self.loaded).iter().cloned().collect();
        keys.sort();
        keys
    }

    /// 询问执行单元是否持有模型
    pub async fn has_model(&self, key: &ModelKey) -> TranslationResult<bool> {
        match self.call(WorkerCall::HasModel(key.clone())).await? {
            WorkerValue::Flag(present) => {
                if present {
                    lock(&self.loaded).insert(key.clone());
                }
                Ok(present)
            }
            other => Err(self.protocol_violation(format!("hasTranslationModel 返回了 {:?}", other))),
        }
    }

    /// 加载模型
    pub async fn load_model(&self, key: &ModelKey, bundle: Arc<ResourceBundle>) -> TranslationResult<()> {
        let call = WorkerCall::LoadModel {
            key: key.clone(),
            bundle,
        };
        match self.call(call).await? {
            WorkerValue::Done => {
                lock(&self.loaded).insert(key.clone());
                tracing::debug!("执行单元 {} 已加载模型 {}", self.id, key);
                Ok(())
            }
            other => Err(self.protocol_violation(format!("loadTranslationModel 返回了 {:?}", other))),
        }
    }

    /// 释放模型
    pub async fn free_model(&self, key: &ModelKey) -> TranslationResult<()> {
        match self.call(WorkerCall::FreeModel(key.clone())).await? {
            WorkerValue::Done => {
                lock(&self.loaded).remove(key);
                Ok(())
            }
            other => Err(self.protocol_violation(format!("freeTranslationModel 返回了 {:?}", other))),
        }
    }

    /// 翻译一批文本；模型必须已经加载
    ///
    /// 返回的响应数量与输入一一对应，否则视为协议错误。
    pub async fn translate(
        &self,
        models: Vec<ModelKey>,
        texts: Vec<TextInput>,
    ) -> TranslationResult<Vec<Response>> {
        let expected = texts.len();
        match self.call(WorkerCall::Translate { models, texts }).await? {
            WorkerValue::Responses(responses) if responses.len() == expected => Ok(responses),
            WorkerValue::Responses(responses) => Err(self.protocol_violation(format!(
                "请求 {} 条翻译，收到 {} 条",
                expected,
                responses.len()
            ))),
            other => Err(self.protocol_violation(format!("translate 返回了 {:?}", other))),
        }
    }

    /// 终止执行单元，拒绝所有未完成的调用
    pub fn terminate(&self) {
        self.dead.store(true, Ordering::SeqCst);
        lock(&self.sender).take();
        fail_all(&self.pending, &TranslationError::Closed);
        tracing::info!("执行单元 {} 已终止", self.id);
    }

    async fn call(&self, call: WorkerCall) -> TranslationResult<WorkerValue> {
        if self.is_dead() {
            return Err(self.unavailable());
        }

        let id = self.serial.fetch_add(1, Ordering::Relaxed) + 1;
        let method = call.method();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        // 读取任务在置位失效标志之后才清空等待表
        if self.is_dead() {
            lock(&self.pending).remove(&id);
            return Err(self.unavailable());
        }

        let sent = lock(&self.sender)
            .as_ref()
            .map_or(false, |sender| sender.send(WorkerRequest { id, call }).is_ok());
        if !sent {
            lock(&self.pending).remove(&id);
            return Err(self.unavailable());
        }

        tracing::debug!("执行单元 {} 调用 {} (#{})", self.id, method, id);
        rx.await.unwrap_or_else(|_| Err(self.unavailable()))
    }

    fn unavailable(&self) -> TranslationError {
        TranslationError::WorkerUnavailable(format!("执行单元 {} 已失效", self.id))
    }

    /// 协议错误：标记失效、通知错误回调并拒绝其它未完成的调用
    fn protocol_violation(&self, message: String) -> TranslationError {
        let error = helpers::protocol_error(self.id, message);
        self.dead.store(true, Ordering::SeqCst);
        helpers::log_error(&error);
        (self.on_error)(&error);
        fail_all(&self.pending, &error);
        error
    }
}

impl Drop for ExecutionUnit {
    fn drop(&mut self) {
        self.dead.store(true, Ordering::SeqCst);
        fail_all(&self.pending, &TranslationError::Closed);
    }
}

async fn route_replies(
    id: usize,
    mut replies: mpsc::UnboundedReceiver<WorkerReply>,
    pending: PendingCalls,
    dead: Arc<AtomicBool>,
    on_error: ErrorHook,
) {
    while let Some(reply) = replies.recv().await {
        let waiter = lock(&pending).remove(&reply.id);
        match waiter {
            Some(waiter) => {
                let outcome = reply.outcome.map_err(|error| TranslationError::Worker {
                    name: error.name,
                    message: error.message,
                });
                let _ = waiter.send(outcome);
            }
            None => {
                let error = helpers::protocol_error(id, format!("收到未知关联 id {} 的回复", reply.id));
                dead.store(true, Ordering::SeqCst);
                helpers::log_error(&error);
                on_error(&error);
                fail_all(&pending, &error);
                return;
            }
        }
    }

    // 宿主线程已退出
    if !dead.swap(true, Ordering::SeqCst) {
        tracing::warn!("执行单元 {} 的回复通道已关闭", id);
    }
    fail_all(
        &pending,
        &TranslationError::WorkerUnavailable(format!("执行单元 {} 已退出", id)),
    );
}

fn fail_all(pending: &PendingCalls, error: &TranslationError) {
    let waiters: Vec<Waiter> = lock(pending).drain().map(|(_, waiter)| waiter).collect();
    for waiter in waiters {
        let _ = waiter.send(Err(error.clone()));
    }
}
