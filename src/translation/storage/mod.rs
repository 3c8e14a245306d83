//! 存储模块
//!
//! 模型资源的下载、校验与缓存。

pub mod bundle;
pub mod cache;
pub mod fetch;

#[cfg(feature = "http")]
pub use fetch::HttpFetcher;
pub use bundle::{Buffer, ResourceBundle};
pub use cache::{CacheStats, ResourceCache};
pub use fetch::{check_integrity, integrity_from_hex, sha256_hex, ResourceFetcher};
