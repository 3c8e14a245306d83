//! 翻译请求调度模块
//!
//! 位于“翻译这段文本”的调用方和一组独立执行单元之间：
//! - **registry**: 模型注册表与路径解析（直接或经由中转语言）
//! - **storage**: 模型资源的下载、校验与缓存
//! - **worker**: 执行单元、消息协议和引擎边界
//! - **core**: 批量调度器和延迟调度器
//! - **config**: 配置管理
//! - **error**: 错误处理
//!
//! # 基本用法
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bergamot_scheduler::translation::{BatchScheduler, TranslationRequest, TranslatorConfig};
//! use bergamot_scheduler::translation::worker::{MockEngineFactory, MockMode};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = Arc::new(MockEngineFactory::new(MockMode::Suffix));
//! let scheduler = BatchScheduler::open(TranslatorConfig::default(), factory)?;
//!
//! let response = scheduler
//!     .translate(TranslationRequest::new("en", "de", "Hello world"))
//!     .await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

// ============================================================================
// 子模块声明
// ============================================================================

/// 配置管理模块
///
/// 注册表地址、中转语言、下载超时、执行单元数量和批次大小
pub mod config;

/// 调度核心模块
///
/// 批量调度器、延迟调度器以及它们共享的上下文
pub mod core;

/// 错误处理模块 - 统一的错误类型和处理机制
pub mod error;

/// 模型注册表与路径解析
pub mod registry;

/// 模型资源存储
pub mod storage;

/// 请求、响应等数据类型
pub mod types;

/// 执行单元
pub mod worker;

// ============================================================================
// 核心API导出
// ============================================================================

pub use self::core::{
    BatchScheduler, BatchSnapshot, LatencyScheduler, TranslationTicket, TranslatorBuilder,
};

pub use config::{constants, ConfigManager, TranslatorConfig};

pub use error::{ErrorCategory, ErrorHook, ErrorSeverity, TranslationError, TranslationResult};

pub use registry::{ModelDescriptor, ModelFile, ModelRegistry, ModelResolver};

pub use storage::{CacheStats, ResourceBundle, ResourceCache, ResourceFetcher};

pub use types::{
    CancellationSignal, ModelKey, Response, TextSegment, TranslationRequest, TranslationResponse,
};

// ============================================================================
// 便利函数
// ============================================================================

/// 按配置文件和环境变量创建批量调度器
///
/// 配置加载失败时使用默认配置。
pub fn open_batch_scheduler(
    factory: std::sync::Arc<dyn worker::EngineFactory>,
) -> TranslationResult<BatchScheduler> {
    BatchScheduler::open(config::load_translator_config(), factory)
}
