//! 调度器配置管理模块
//!
//! 提供简化的配置管理，支持环境变量、配置文件和默认值

pub mod manager;

// 重新导出主要类型
pub use manager::{ConfigManager, TranslatorConfig};

/// 配置常量
pub mod constants {
    // 模型注册表
    pub const DEFAULT_REGISTRY_URL: &str =
        "https://storage.googleapis.com/bergamot-models-sandbox/0.3.3/registry.json";
    pub const DEFAULT_PIVOT_LANGUAGE: &str = "en";

    // 下载
    pub const DEFAULT_DOWNLOAD_TIMEOUT_MS: u64 = 60_000;

    // 调度
    pub const DEFAULT_WORKERS: usize = 1;
    pub const DEFAULT_BATCH_SIZE: usize = 8;

    // 引擎选项
    pub const DEFAULT_CACHE_SIZE: usize = 0;

    // 配置文件搜索路径
    pub const CONFIG_PATHS: &[&str] = &[
        "bergamot.toml",
        "bergamot.json",
        ".bergamot.toml",
        "~/.config/bergamot/scheduler.toml",
        "/etc/bergamot/scheduler.toml",
    ];
}

/// 便利函数
pub fn config_file_exists() -> bool {
    constants::CONFIG_PATHS
        .iter()
        .any(|path| std::path::Path::new(shellexpand::tilde(path).as_ref()).exists())
}

/// 加载配置，失败时回退到默认配置
pub fn load_translator_config() -> TranslatorConfig {
    match ConfigManager::new() {
        Ok(manager) => manager.get_config().clone(),
        Err(e) => {
            tracing::warn!("配置加载失败，使用默认配置: {}", e);
            TranslatorConfig::default()
        }
    }
}
