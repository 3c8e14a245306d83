//! 翻译调度统一错误处理
//!
//! 提供结构化错误类型和错误处理机制。错误类型实现了 `Clone`，
//! 因为同一个失败的下载或批次需要同时通知多个等待者。

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::translation::types::TranslationRequest;

/// 翻译错误类型
#[derive(Error, Debug, Clone)]
pub enum TranslationError {
    /// 注册表中没有可用的模型路径（直接或经由中转语言）
    #[error("没有可用的模型从 '{from}' 翻译到 '{to}'")]
    NoRoute { from: String, to: String },

    /// 资源下载失败或校验和不匹配
    #[error("无法获取文件 {file}: {reason}")]
    Fetch { file: String, reason: String },

    /// 资源下载超时
    #[error("下载文件 {file} 超时（{after:?}）")]
    Timeout { file: String, after: Duration },

    /// 待处理请求被更新的请求取代（不是真正的失败）
    #[error("请求已被更新的请求取代")]
    Superseded,

    /// 请求被 `remove` 过滤器移除
    #[error("请求已被过滤器移除")]
    Removed { request: Box<TranslationRequest> },

    /// 执行单元返回了格式错误或无法匹配的消息
    #[error("执行单元 {unit} 协议错误: {message}")]
    Protocol { unit: usize, message: String },

    /// 执行单元内部抛出的错误
    #[error("执行单元错误 {name}: {message}")]
    Worker { name: String, message: String },

    /// 无法创建执行单元
    #[error("执行单元不可用: {0}")]
    WorkerUnavailable(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 模型注册表错误
    #[error("模型注册表错误: {0}")]
    RegistryError(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 调度器已关闭
    #[error("调度器已关闭")]
    Closed,

    /// 内部错误
    #[error("内部错误: {0}")]
    InternalError(String),
}

impl TranslationError {
    /// 检查错误是否值得由调用方重试
    ///
    /// 调度器本身从不自动重试，这里只是给调用方的提示。
    pub fn is_retryable(&self) -> bool {
        match self {
            TranslationError::Fetch { .. } => true,
            TranslationError::Timeout { .. } => true,
            TranslationError::Worker { .. } => true,
            TranslationError::WorkerUnavailable(_) => true,
            TranslationError::Protocol { .. } => true,
            TranslationError::NoRoute { .. } => false,
            TranslationError::Superseded => false,
            TranslationError::Removed { .. } => false,
            TranslationError::ConfigError(_) => false,
            TranslationError::RegistryError(_) => false,
            TranslationError::SerializationError(_) => false,
            TranslationError::Closed => false,
            TranslationError::InternalError(_) => false,
        }
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TranslationError::Superseded => ErrorSeverity::Info,
            TranslationError::Removed { .. } => ErrorSeverity::Info,
            TranslationError::Closed => ErrorSeverity::Info,
            TranslationError::NoRoute { .. } => ErrorSeverity::Warning,
            TranslationError::Fetch { .. } => ErrorSeverity::Warning,
            TranslationError::Timeout { .. } => ErrorSeverity::Warning,
            TranslationError::Worker { .. } => ErrorSeverity::Error,
            TranslationError::WorkerUnavailable(_) => ErrorSeverity::Error,
            TranslationError::RegistryError(_) => ErrorSeverity::Error,
            TranslationError::SerializationError(_) => ErrorSeverity::Error,
            TranslationError::Protocol { .. } => ErrorSeverity::Critical,
            TranslationError::ConfigError(_) => ErrorSeverity::Critical,
            TranslationError::InternalError(_) => ErrorSeverity::Critical,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            TranslationError::NoRoute { .. } => ErrorCategory::Routing,
            TranslationError::Fetch { .. } => ErrorCategory::Network,
            TranslationError::Timeout { .. } => ErrorCategory::Timeout,
            TranslationError::Superseded => ErrorCategory::Cancellation,
            TranslationError::Removed { .. } => ErrorCategory::Cancellation,
            TranslationError::Closed => ErrorCategory::Cancellation,
            TranslationError::Protocol { .. } => ErrorCategory::Protocol,
            TranslationError::Worker { .. } => ErrorCategory::Worker,
            TranslationError::WorkerUnavailable(_) => ErrorCategory::Worker,
            TranslationError::ConfigError(_) => ErrorCategory::Configuration,
            TranslationError::RegistryError(_) => ErrorCategory::Configuration,
            TranslationError::SerializationError(_) => ErrorCategory::Serialization,
            TranslationError::InternalError(_) => ErrorCategory::Internal,
        }
    }

    /// 是否为"被取代"信号。调用方应当忽略这类错误，不向用户展示。
    pub fn is_superseded(&self) -> bool {
        matches!(self, TranslationError::Superseded)
    }

    /// 被 `remove` 移除的原始请求
    pub fn removed_request(&self) -> Option<&TranslationRequest> {
        match self {
            TranslationError::Removed { request } => Some(request),
            _ => None,
        }
    }

    /// 创建带上下文的错误
    pub fn with_context<T: fmt::Display>(mut self, context: T) -> Self {
        match &mut self {
            TranslationError::Fetch { reason, .. } => {
                *reason = format!("{} (上下文: {})", reason, context);
            }
            TranslationError::Protocol { message, .. }
            | TranslationError::Worker { message, .. } => {
                *message = format!("{} (上下文: {})", message, context);
            }
            TranslationError::WorkerUnavailable(msg)
            | TranslationError::ConfigError(msg)
            | TranslationError::RegistryError(msg)
            | TranslationError::SerializationError(msg)
            | TranslationError::InternalError(msg) => {
                *msg = format!("{} (上下文: {})", msg, context);
            }
            TranslationError::NoRoute { .. }
            | TranslationError::Timeout { .. }
            | TranslationError::Superseded
            | TranslationError::Removed { .. }
            | TranslationError::Closed => {}
        }

        self
    }
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Routing,
    Network,
    Timeout,
    Cancellation,
    Protocol,
    Worker,
    Configuration,
    Serialization,
    Internal,
}

impl From<std::io::Error> for TranslationError {
    fn from(error: std::io::Error) -> Self {
        TranslationError::InternalError(format!("IO错误: {}", error))
    }
}

impl From<serde_json::Error> for TranslationError {
    fn from(error: serde_json::Error) -> Self {
        TranslationError::SerializationError(format!("JSON序列化错误: {}", error))
    }
}

impl From<config::ConfigError> for TranslationError {
    fn from(error: config::ConfigError) -> Self {
        TranslationError::ConfigError(format!("配置错误: {}", error))
    }
}

impl From<url::ParseError> for TranslationError {
    fn from(error: url::ParseError) -> Self {
        TranslationError::ConfigError(format!("URL解析错误: {}", error))
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TranslationError {
    fn from(error: reqwest::Error) -> Self {
        let file = error
            .url()
            .map(|url| url.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        TranslationError::Fetch {
            file,
            reason: error.to_string(),
        }
    }
}

/// 错误结果类型别名
pub type TranslationResult<T> = Result<T, TranslationError>;

/// 与具体请求无关的错误回调，例如执行单元创建失败或协议错误
pub type ErrorHook = std::sync::Arc<dyn Fn(&TranslationError) + Send + Sync>;

/// 错误处理助手函数
pub mod helpers {
    use super::*;

    /// 按严重程度记录错误
    pub fn log_error(error: &TranslationError) {
        match error.severity() {
            ErrorSeverity::Info => tracing::debug!("翻译信息: {}", error),
            ErrorSeverity::Warning => tracing::warn!("翻译警告: {}", error),
            ErrorSeverity::Error => tracing::error!("翻译错误: {}", error),
            ErrorSeverity::Critical => tracing::error!("翻译严重错误: {}", error),
        }
    }

    /// 默认的错误回调：写入日志
    pub fn default_error_hook() -> ErrorHook {
        std::sync::Arc::new(|error: &TranslationError| {
            tracing::error!("执行单元错误: {}", error);
        })
    }

    /// 创建下载错误
    pub fn fetch_error<F: fmt::Display, R: fmt::Display>(file: F, reason: R) -> TranslationError {
        TranslationError::Fetch {
            file: file.to_string(),
            reason: reason.to_string(),
        }
    }

    /// 创建协议错误
    pub fn protocol_error<T: fmt::Display>(unit: usize, msg: T) -> TranslationError {
        TranslationError::Protocol {
            unit,
            message: msg.to_string(),
        }
    }

    /// 创建配置错误
    pub fn config_error<T: fmt::Display>(msg: T) -> TranslationError {
        TranslationError::ConfigError(msg.to_string())
    }

    /// 创建注册表错误
    pub fn registry_error<T: fmt::Display>(msg: T) -> TranslationError {
        TranslationError::RegistryError(msg.to_string())
    }

    /// 创建内部错误
    pub fn internal_error<T: fmt::Display>(msg: T) -> TranslationError {
        TranslationError::InternalError(msg.to_string())
    }
}
