//! 执行单元的宿主端
//!
//! 在独立线程上持有一个翻译引擎，按顺序处理请求并回复。
//! 与调度器之间除了消息通道没有任何共享的可变状态。

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::engine::{EngineFactory, EngineOptions, ModelMemory, TranslationEngine};
use super::protocol::{RemoteError, WorkerCall, WorkerReply, WorkerRequest, WorkerValue};
use crate::translation::error::{TranslationError, TranslationResult};
use crate::translation::storage::ResourceBundle;

const DEFAULT_MODEL_CONFIG: &[(&str, &str)] = &[
    ("beam-size", "1"),
    ("normalize", "1.0"),
    ("word-penalty", "0"),
    ("cpu-threads", "0"),
    ("gemm-precision", "int8shiftAlphaAll"),
    ("skip-cost", "true"),
];

const FORCED_MODEL_CONFIG: &[(&str, &str)] = &[
    ("alignment", "soft"),
    ("quiet", "true"),
    ("quiet-translation", "true"),
    ("max-length-break", "128"),
    ("mini-batch-words", "1024"),
    ("workspace", "128"),
    ("max-length-factor", "2.0"),
];

/// 渲染传给引擎的模型配置
///
/// 依次应用：默认值、资源包覆盖、`int8` 改写为 `int8shiftAll`、强制值。
pub fn model_config(bundle: &ResourceBundle) -> String {
    let mut config: Vec<(String, String)> = DEFAULT_MODEL_CONFIG
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for (key, value) in &bundle.config {
        set_option(&mut config, key, value);
    }

    // 引擎只支持 shifted 的 int8 实现
    if config
        .iter()
        .any(|(k, v)| k == "gemm-precision" && v == "int8")
    {
        set_option(&mut config, "gemm-precision", "int8shiftAll");
    }

    for (key, value) in FORCED_MODEL_CONFIG {
        set_option(&mut config, key, value);
    }

    config
        .iter()
        .map(|(k, v)| format!("{}: {}\n", k, v))
        .collect()
}

fn set_option(config: &mut Vec<(String, String)>, key: &str, value: &str) {
    match config.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value.to_string(),
        None => config.push((key.to_string(), value.to_string())),
    }
}

/// 引擎宿主
pub struct WorkerHost {
    id: usize,
    engine: Box<dyn TranslationEngine>,
}

impl WorkerHost {
    pub fn new(id: usize, engine: Box<dyn TranslationEngine>) -> Self {
        Self { id, engine }
    }

    /// 执行一次调用
    pub fn handle(&mut self, call: WorkerCall) -> Result<WorkerValue, RemoteError> {
        match call {
            WorkerCall::HasModel(key) => Ok(WorkerValue::Flag(self.engine.has_translation_model(&key))),
            WorkerCall::LoadModel { key, bundle } => {
                let config = model_config(&bundle);
                let memory = ModelMemory {
                    model: Arc::clone(&bundle.model),
                    shortlist: Arc::clone(&bundle.shortlist),
                    vocabs: bundle.unique_vocabs(),
                    quality_model: bundle.quality_model.clone(),
                };
                self.engine.load_translation_model(&key, &config, memory)?;
                Ok(WorkerValue::Done)
            }
            WorkerCall::FreeModel(key) => {
                self.engine.free_translation_model(&key)?;
                Ok(WorkerValue::Done)
            }
            WorkerCall::Translate { models, texts } => {
                let responses = match models.as_slice() {
                    [model] => self.engine.translate(model, &texts)?,
                    [first, second] => self.engine.translate_via_pivoting(first, second, &texts)?,
                    _ => {
                        return Err(RemoteError::new(
                            "TypeError",
                            format!("不支持长度为 {} 的模型链", models.len()),
                        ))
                    }
                };
                Ok(WorkerValue::Responses(responses))
            }
        }
    }

    /// 消息循环，请求通道关闭时退出
    pub fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
        replies: mpsc::UnboundedSender<WorkerReply>,
    ) {
        while let Some(request) = requests.blocking_recv() {
            let method = request.call.method();
            let outcome = self.handle(request.call);
            if let Err(error) = &outcome {
                tracing::debug!("执行单元 {} 的 {} 调用失败: {}", self.id, method, error);
            }
            if replies
                .send(WorkerReply {
                    id: request.id,
                    outcome,
                })
                .is_err()
            {
                break;
            }
        }
        tracing::debug!("执行单元 {} 的线程退出", self.id);
    }
}

/// 请求发送端和回复接收端
pub type HostChannels = (
    mpsc::UnboundedSender<WorkerRequest>,
    mpsc::UnboundedReceiver<WorkerReply>,
);

/// 在新线程上创建引擎并启动消息循环
///
/// 引擎创建成功后才返回；创建失败返回 `WorkerUnavailable`。
pub async fn spawn_host(
    id: usize,
    factory: Arc<dyn EngineFactory>,
    options: EngineOptions,
) -> TranslationResult<HostChannels> {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();

    std::thread::Builder::new()
        .name(format!("bergamot-worker-{}", id))
        .spawn(move || match factory.create_engine(&options) {
            Ok(engine) => {
                let _ = ready_tx.send(Ok(()));
                WorkerHost::new(id, engine).run(request_rx, reply_tx);
            }
            Err(error) => {
                let _ = ready_tx.send(Err(error));
            }
        })
        .map_err(|e| {
            TranslationError::WorkerUnavailable(format!("无法创建执行单元 {} 的线程: {}", id, e))
        })?;

    match ready_rx.await {
        Ok(Ok(())) => Ok((request_tx, reply_rx)),
        Ok(Err(error)) => Err(TranslationError::WorkerUnavailable(format!(
            "执行单元 {} 的引擎创建失败: {}",
            id, error
        ))),
        Err(_) => Err(TranslationError::WorkerUnavailable(format!(
            "执行单元 {} 在初始化时退出",
            id
        ))),
    }
}
