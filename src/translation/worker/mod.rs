//! 执行单元
//!
//! 每个执行单元在独立线程上托管一个翻译引擎实例，调度器只通过带关联 id
//! 的消息与它交互。

pub mod engine;
pub mod host;
pub mod mock;
pub mod protocol;
pub mod unit;

pub use engine::{EngineFactory, EngineOptions, EngineResult, ModelMemory, TranslationEngine};
pub use host::{model_config, spawn_host, HostChannels, WorkerHost};
pub use mock::{CallLog, MockCall, MockEngine, MockEngineFactory, MockMode};
pub use protocol::{RemoteError, WorkerCall, WorkerReply, WorkerRequest, WorkerValue};
pub use unit::ExecutionUnit;
