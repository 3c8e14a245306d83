//! 翻译引擎边界
//!
//! 执行单元内部托管一个翻译引擎实例。引擎本身是不透明的计算组件，
//! 调度器只通过这里定义的窄接口使用它。
//!
//! ## 主要约定
//! - **模型加载**: 接收 `key: value` 形式的文本配置，以及模型权重、短名单、
//!   一到两个词表和可选的质量估计权重
//! - **直接翻译**: 单个模型，输入顺序与输出顺序一一对应
//! - **中转翻译**: 两个模型串联，由引擎内部完成中间结果的传递
//! - **线程模型**: 引擎只在所属执行单元的线程上使用，因此只要求 `Send`
//!
//! ## 使用示例
//! ```rust,ignore
//! use bergamot_scheduler::translation::worker::{EngineFactory, EngineOptions};
//!
//! let factory = |options: &EngineOptions| -> Result<Box<dyn TranslationEngine>, RemoteError> {
//!     Ok(Box::new(MyEngine::new(options.cache_size)))
//! };
//! ```

use super::protocol::RemoteError;
use crate::translation::storage::Buffer;
use crate::translation::types::{ModelKey, Response, TextInput};

/// 引擎结果类型，错误会原样转发给调度器
pub type EngineResult<T> = Result<T, RemoteError>;

/// 加载一个模型所需的内存块
///
/// 词表已经去重：共享词表只出现一次。
#[derive(Debug, Clone)]
pub struct ModelMemory {
    pub model: Buffer,
    pub shortlist: Buffer,
    pub vocabs: Vec<Buffer>,
    pub quality_model: Option<Buffer>,
}

/// 执行单元创建引擎时使用的选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineOptions {
    /// 引擎内部翻译缓存的大小，0 表示禁用
    pub cache_size: usize,
    /// 是否使用原生整数矩阵乘法实现
    pub use_native_int_gemm: bool,
}

/// 翻译引擎
///
/// 所有方法都在执行单元自己的线程上同步调用，一次只有一个调用在进行。
pub trait TranslationEngine: Send {
    /// 是否已加载指定模型
    fn has_translation_model(&self, key: &ModelKey) -> bool;

    /// 加载模型
    ///
    /// # 参数
    /// - `key`: 模型的语言对
    /// - `config`: 渲染后的模型配置，每行一个 `key: value`
    /// - `memory`: 模型的二进制资源
    fn load_translation_model(
        &mut self,
        key: &ModelKey,
        config: &str,
        memory: ModelMemory,
    ) -> EngineResult<()>;

    /// 释放模型；模型不存在时什么也不做
    fn free_translation_model(&mut self, key: &ModelKey) -> EngineResult<()>;

    /// 使用单个模型翻译
    fn translate(&mut self, model: &ModelKey, inputs: &[TextInput]) -> EngineResult<Vec<Response>>;

    /// 经由中转语言串联两个模型翻译
    fn translate_via_pivoting(
        &mut self,
        first: &ModelKey,
        second: &ModelKey,
        inputs: &[TextInput],
    ) -> EngineResult<Vec<Response>>;
}

/// 引擎工厂，每个执行单元创建时调用一次
pub trait EngineFactory: Send + Sync {
    fn create_engine(&self, options: &EngineOptions) -> EngineResult<Box<dyn TranslationEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn(&EngineOptions) -> EngineResult<Box<dyn TranslationEngine>> + Send + Sync,
{
    fn create_engine(&self, options: &EngineOptions) -> EngineResult<Box<dyn TranslationEngine>> {
        self(options)
    }
}
