//! # 工具模块
//!
//! - 日志初始化
//! - 锁的获取（忽略中毒）

use std::sync::{Mutex, MutexGuard};

use tracing_subscriber::EnvFilter;

use crate::env::{core::LogLevel, EnvVar};

/// 安装全局日志订阅者
///
/// 过滤规则优先取 `RUST_LOG`，否则使用 `BERGAMOT_LOG_LEVEL`（默认 `info`）。
/// 重复调用是安全的，已安装时直接返回。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(LogLevel::get_or_default("info".to_string())));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// 获取互斥锁；持锁线程 panic 时仍然返回内部数据
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice() {
        init_tracing();
        init_tracing();
    }

    #[test]
    fn test_lock_survives_poison() {
        let mutex = std::sync::Arc::new(Mutex::new(1));
        let poisoned = std::sync::Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = poisoned.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert_eq!(*lock(&mutex), 1);
    }
}
