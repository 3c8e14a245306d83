//! # Bergamot Scheduler
//!
//! 客户端翻译请求调度器：把“翻译这段文本”的请求分配给一组独立的翻译执行单元。
//!
//! ## 模块组织
//!
//! - `translation` - 模型解析、资源缓存、执行单元和两种调度策略
//! - `env` - 类型安全的环境变量
//! - `utils` - 日志初始化等工具函数

pub mod env;
pub mod translation;
pub mod utils;

// Re-export commonly used items for convenience
pub use translation::{
    BatchScheduler, LatencyScheduler, TranslationError, TranslationRequest, TranslationResponse,
    TranslationResult, TranslatorConfig,
};
pub use utils::init_tracing;
