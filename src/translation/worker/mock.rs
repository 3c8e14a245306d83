//! 用于测试的确定性翻译引擎
//!
//! 不加载任何真实模型，只记录调用并按模式生成可预测的译文。

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::engine::{EngineFactory, EngineOptions, EngineResult, ModelMemory, TranslationEngine};
use super::protocol::RemoteError;
use crate::translation::types::{
    ByteRange, ModelKey, Response, SentenceQuality, TextInput, TextSegment, WordScore,
};
use crate::utils::lock;

/// 模拟引擎的行为模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMode {
    /// 在原文后追加 ` [目标语言]`，中转时追加两次
    Suffix,
    /// 转换为大写
    Upper,
    /// 所有翻译调用失败
    Fail,
    /// 与 `Suffix` 相同，但少返回最后一条译文
    Short,
}

/// 模拟引擎收到的调用
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Created(EngineOptions),
    Load {
        key: ModelKey,
        config: String,
        vocabs: usize,
        quality_model: bool,
    },
    Free(ModelKey),
    Translate {
        model: ModelKey,
        texts: usize,
    },
    Pivot {
        first: ModelKey,
        second: ModelKey,
        texts: usize,
    },
}

/// 在所有模拟引擎之间共享的调用记录
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<MockCall>>>,
    texts: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn record(&self, call: MockCall) {
        lock(&self.calls).push(call);
    }

    fn record_inputs(&self, inputs: &[TextInput]) {
        lock(&self.texts).extend(inputs.iter().map(|input| input.text.clone()));
    }

    /// 引擎收到的原文，按翻译顺序
    pub fn translated_texts(&self) -> Vec<String> {
        lock(&self.texts).clone()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// 模型加载次数
    pub fn loads(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Load { .. }))
    }

    /// 中转翻译调用次数
    pub fn pivots(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Pivot { .. }))
    }

    /// 每次翻译调用（直接或中转）携带的文本数，按调用顺序
    pub fn batch_sizes(&self) -> Vec<usize> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                MockCall::Translate { texts, .. } | MockCall::Pivot { texts, .. } => Some(*texts),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|call| predicate(call)).count()
    }
}

/// 模拟引擎
pub struct MockEngine {
    mode: Arc<Mutex<MockMode>>,
    delay: Option<Duration>,
    models: HashSet<ModelKey>,
    log: CallLog,
}

impl MockEngine {
    pub fn new(mode: MockMode) -> Self {
        Self {
            mode: Arc::new(Mutex::new(mode)),
            delay: None,
            models: HashSet::new(),
            log: CallLog::default(),
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    fn render(&self, text: &str, targets: &[&ModelKey]) -> EngineResult<String> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        match *lock(&self.mode) {
            MockMode::Suffix | MockMode::Short => Ok(targets
                .iter()
                .fold(text.to_string(), |acc, key| format!("{} [{}]", acc, key.to))),
            MockMode::Upper => Ok(text.to_uppercase()),
            MockMode::Fail => Err(RemoteError::new("MockError", "模拟的翻译失败")),
        }
    }

    fn respond(&self, inputs: &[TextInput], models: &[&ModelKey]) -> EngineResult<Vec<Response>> {
        for key in models {
            if !self.models.contains(*key) {
                return Err(RemoteError::new("Error", format!("模型 {} 尚未加载", key)));
            }
        }

        let mut responses = inputs
            .iter()
            .map(|input| {
                let translated = self.render(&input.text, models)?;
                let quality = input.quality_scores.then(|| {
                    vec![SentenceQuality {
                        score: -0.5,
                        words: vec![WordScore {
                            range: whole(&translated),
                            score: -0.5,
                        }],
                    }]
                });
                Ok(Response {
                    source: segment(&input.text),
                    target: segment(&translated),
                    quality,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;

        if *lock(&self.mode) == MockMode::Short {
            responses.pop();
        }
        Ok(responses)
    }
}

fn whole(text: &str) -> ByteRange {
    ByteRange {
        begin: 0,
        end: text.len(),
    }
}

fn segment(text: &str) -> TextSegment {
    TextSegment {
        text: text.to_string(),
        sentences: vec![whole(text)],
    }
}

impl TranslationEngine for MockEngine {
    fn has_translation_model(&self, key: &ModelKey) -> bool {
        self.models.contains(key)
    }

    fn load_translation_model(
        &mut self,
        key: &ModelKey,
        config: &str,
        memory: ModelMemory,
    ) -> EngineResult<()> {
        self.log.record(MockCall::Load {
            key: key.clone(),
            config: config.to_string(),
            vocabs: memory.vocabs.len(),
            quality_model: memory.quality_model.is_some(),
        });
        self.models.insert(key.clone());
        Ok(())
    }

    fn free_translation_model(&mut self, key: &ModelKey) -> EngineResult<()> {
        self.log.record(MockCall::Free(key.clone()));
        self.models.remove(key);
        Ok(())
    }

    fn translate(&mut self, model: &ModelKey, inputs: &[TextInput]) -> EngineResult<Vec<Response>> {
        self.log.record(MockCall::Translate {
            model: model.clone(),
            texts: inputs.len(),
        });
        self.log.record_inputs(inputs);
        self.respond(inputs, &[model])
    }

    fn translate_via_pivoting(
        &mut self,
        first: &ModelKey,
        second: &ModelKey,
        inputs: &[TextInput],
    ) -> EngineResult<Vec<Response>> {
        self.log.record(MockCall::Pivot {
            first: first.clone(),
            second: second.clone(),
            texts: inputs.len(),
        });
        self.log.record_inputs(inputs);
        self.respond(inputs, &[first, second])
    }
}

/// 创建模拟引擎的工厂，所有引擎共享模式和调用记录
#[derive(Debug, Clone)]
pub struct MockEngineFactory {
    mode: Arc<Mutex<MockMode>>,
    delay: Option<Duration>,
    log: CallLog,
    created: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
    limit: Option<usize>,
}

impl MockEngineFactory {
    pub fn new(mode: MockMode) -> Self {
        Self {
            mode: Arc::new(Mutex::new(mode)),
            delay: None,
            log: CallLog::default(),
            created: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
            limit: None,
        }
    }

    /// 每条文本的翻译耗时
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 拒绝创建引擎
    pub fn refusing(self) -> Self {
        self.with_limit(0)
    }

    /// 最多创建 `limit` 个引擎，之后的创建请求被拒绝
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// 修改所有已创建和将要创建的引擎的模式
    pub fn set_mode(&self, mode: MockMode) {
        *lock(&self.mode) = mode;
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// 已创建的引擎数量
    pub fn engines_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// 创建引擎的尝试次数，包括被拒绝的
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl EngineFactory for MockEngineFactory {
    fn create_engine(&self, options: &EngineOptions) -> EngineResult<Box<dyn TranslationEngine>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let limit = self.limit.unwrap_or(usize::MAX);
        if self
            .created
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < limit).then_some(n + 1))
            .is_err()
        {
            return Err(RemoteError::new("MockError", "引擎创建被拒绝"));
        }
        self.log.record(MockCall::Created(*options));
        Ok(Box::new(MockEngine {
            mode: Arc::clone(&self.mode),
            delay: self.delay,
            models: HashSet::new(),
            log: self.log.clone(),
        }))
    }
}
