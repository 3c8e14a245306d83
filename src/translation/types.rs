//! 调度器对外的数据类型
//!
//! 请求、响应以及在调度器和执行单元之间传递的文本结构。

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// 默认优先级。未设置优先级与显式设置为 0 等价。
pub const DEFAULT_PRIORITY: i32 = 0;

/// 语言对，同时也是模型在注册表、资源缓存和执行单元中的键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub from: String,
    pub to: String,
}

impl ModelKey {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.from, self.to)
    }
}

/// 请求取消信号
///
/// 只影响仍在队列中的请求；已经派发给执行单元的调用不会被打断。
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// 翻译请求
///
/// 每次调用创建一个，创建后不再修改。
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub from: String,
    pub to: String,
    pub text: String,
    /// 文本是否为 HTML（标记处理由引擎负责）
    pub html: bool,
    /// 是否需要逐词质量分数
    pub quality_scores: bool,
    /// 类似 `nice`：数值越小越先处理
    pub priority: i32,
    pub cancellation: Option<CancellationSignal>,
}

impl TranslationRequest {
    pub fn new(from: impl Into<String>, to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            text: text.into(),
            html: false,
            quality_scores: false,
            priority: DEFAULT_PRIORITY,
            cancellation: None,
        }
    }

    pub fn with_html(mut self, html: bool) -> Self {
        self.html = html;
        self
    }

    pub fn with_quality_scores(mut self, quality_scores: bool) -> Self {
        self.quality_scores = quality_scores;
        self
    }

    /// 设置优先级；`None` 映射到默认优先级
    pub fn with_priority(mut self, priority: impl Into<Option<i32>>) -> Self {
        self.priority = priority.into().unwrap_or(DEFAULT_PRIORITY);
        self
    }

    pub fn with_cancellation(mut self, signal: CancellationSignal) -> Self {
        self.cancellation = Some(signal);
        self
    }

    pub fn model_key(&self) -> ModelKey {
        ModelKey::new(self.from.clone(), self.to.clone())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .map_or(false, CancellationSignal::is_cancelled)
    }

    /// 发送给执行单元的部分
    pub fn to_input(&self) -> TextInput {
        TextInput {
            text: self.text.clone(),
            html: self.html,
            quality_scores: self.quality_scores,
        }
    }
}

/// 发送给执行单元的单条文本及其选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextInput {
    pub text: String,
    pub html: bool,
    pub quality_scores: bool,
}

/// UTF-8 字节区间 `[begin, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub begin: usize,
    pub end: usize,
}

/// 单词级质量分数，按字节偏移定位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordScore {
    pub range: ByteRange,
    pub score: f32,
}

/// 句子级质量分数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceQuality {
    pub score: f32,
    pub words: Vec<WordScore>,
}

/// 原文或译文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSegment {
    pub text: String,
    /// 每个句子在 `text` 中的字节区间
    #[serde(default)]
    pub sentences: Vec<ByteRange>,
}

impl TextSegment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sentences: Vec::new(),
        }
    }
}

/// 执行单元返回的单条翻译结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub source: TextSegment,
    pub target: TextSegment,
    #[serde(default)]
    pub quality: Option<Vec<SentenceQuality>>,
}

/// 交给调用方的翻译结果，附带原始请求以便关联
#[derive(Debug, Clone)]
pub struct TranslationResponse {
    pub request: TranslationRequest,
    pub source: TextSegment,
    pub target: TextSegment,
    pub quality: Option<Vec<SentenceQuality>>,
}

impl TranslationResponse {
    pub fn new(request: TranslationRequest, response: Response) -> Self {
        Self {
            request,
            source: response.source,
            target: response.target,
            quality: response.quality,
        }
    }

    pub fn text(&self) -> &str {
        &self.target.text
    }
}
