//! 请求调度核心
//!
//! - [`BatchScheduler`]: 吞吐量优先，按模型链和优先级合批
//! - [`LatencyScheduler`]: 延迟优先，只处理最新的请求
//!
//! 两种调度器共享同一个 [`TranslatorContext`]：路径解析、资源缓存和执行单元创建。

pub mod batch;
pub mod context;
pub mod latency;
pub mod queue;
pub mod ticket;

pub use batch::BatchScheduler;
pub use context::{TranslatorBuilder, TranslatorContext};
pub use latency::{LatencyScheduler, PendingSlot};
pub use queue::{Batch, BatchQueue, BatchSnapshot};
pub use ticket::{PendingRequest, TranslationTicket};
