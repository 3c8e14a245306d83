//! 简化的配置管理器
//!
//! 提供统一的配置接口，支持文件配置、环境变量和默认值

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::constants;
use crate::env::{is_language_code, timeout_from_millis};
use crate::translation::error::{TranslationError, TranslationResult};
use crate::translation::worker::EngineOptions;

/// 调度器配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TranslatorConfig {
    // 模型来源
    pub registry_url: String,
    /// `None` 时只使用直接模型
    pub pivot_language: Option<String>,
    /// 单个文件的下载超时，0 表示不限制
    pub download_timeout_ms: u64,

    // 调度配置
    pub workers: usize,
    pub batch_size: usize,

    // 引擎选项
    pub cache_size: usize,
    pub use_native_int_gemm: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            registry_url: constants::DEFAULT_REGISTRY_URL.to_string(),
            pivot_language: Some(constants::DEFAULT_PIVOT_LANGUAGE.to_string()),
            download_timeout_ms: constants::DEFAULT_DOWNLOAD_TIMEOUT_MS,
            workers: constants::DEFAULT_WORKERS,
            batch_size: constants::DEFAULT_BATCH_SIZE,
            cache_size: constants::DEFAULT_CACHE_SIZE,
            use_native_int_gemm: false,
        }
    }
}

impl TranslatorConfig {
    /// 验证配置
    pub fn validate(&self) -> TranslationResult<()> {
        if self.registry_url.trim().is_empty() {
            return Err(TranslationError::ConfigError("注册表地址不能为空".to_string()));
        }

        url::Url::parse(&self.registry_url).map_err(|e| {
            TranslationError::ConfigError(format!("注册表地址无效 '{}': {}", self.registry_url, e))
        })?;

        if let Some(pivot) = &self.pivot_language {
            if !is_language_code(pivot) {
                return Err(TranslationError::ConfigError(format!(
                    "中转语言代码无效: '{}'",
                    pivot
                )));
            }
        }

        Ok(())
    }

    /// 把执行单元数量和批次大小限制为至少 1
    pub fn normalized(mut self) -> Self {
        self.workers = self.workers.max(1);
        self.batch_size = self.batch_size.max(1);
        self
    }

    /// 应用环境变量覆盖（只覆盖显式设置的变量）
    pub fn apply_env_overrides(&mut self) {
        use crate::env::{scheduler, EnvError, EnvVar};

        fn ignore<T>(result: Result<Option<T>, EnvError>) -> Option<T> {
            result.unwrap_or_else(|e| {
                tracing::warn!("忽略无效的环境变量: {}", e);
                None
            })
        }

        if let Some(url) = ignore(scheduler::RegistryUrl::lookup()) {
            self.registry_url = url;
            tracing::info!("环境变量覆盖注册表地址: {}", self.registry_url);
        }

        if let Some(pivot) = ignore(scheduler::PivotLanguage::lookup()) {
            self.pivot_language = pivot;
        }

        if let Some(timeout) = ignore(scheduler::DownloadTimeout::lookup()) {
            self.download_timeout_ms = timeout.map_or(0, |t| t.as_millis() as u64);
        }

        if let Some(workers) = ignore(scheduler::Workers::lookup()) {
            self.workers = workers;
        }

        if let Some(batch_size) = ignore(scheduler::BatchSize::lookup()) {
            self.batch_size = batch_size;
        }

        if let Some(cache_size) = ignore(scheduler::CacheSize::lookup()) {
            self.cache_size = cache_size;
        }

        if let Some(native) = ignore(scheduler::NativeIntGemm::lookup()) {
            self.use_native_int_gemm = native;
        }
    }

    /// 下载超时；`None` 表示不限制
    pub fn download_timeout(&self) -> Option<Duration> {
        timeout_from_millis(self.download_timeout_ms)
    }

    /// 创建执行单元时发送的引擎选项
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            cache_size: self.cache_size,
            use_native_int_gemm: self.use_native_int_gemm,
        }
    }
}

/// 简化的配置管理器
pub struct ConfigManager {
    config: TranslatorConfig,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new() -> TranslationResult<Self> {
        let mut config = Self::load_config()?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(Self {
            config: config.normalized(),
        })
    }

    /// 从指定文件创建，仍然应用环境变量覆盖
    pub fn from_file<P: AsRef<Path>>(path: P) -> TranslationResult<Self> {
        let path = path.as_ref();
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate().map_err(|e| e.with_context(path.display()))?;

        Ok(Self {
            config: config.normalized(),
        })
    }

    /// 获取配置
    pub fn get_config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// 取出配置
    pub fn into_config(self) -> TranslatorConfig {
        self.config
    }

    /// 从文件加载配置
    fn load_config() -> TranslationResult<TranslatorConfig> {
        // 首先尝试加载 .env 文件
        Self::load_dotenv();

        // 查找配置文件
        for path in constants::CONFIG_PATHS {
            let expanded_path = shellexpand::tilde(path);
            let candidate = Path::new(expanded_path.as_ref());
            if candidate.exists() {
                tracing::info!("加载配置文件: {}", expanded_path);
                return Self::load_from_file(candidate);
            }
        }

        tracing::info!("未找到配置文件，使用默认配置");
        Ok(TranslatorConfig::default())
    }

    /// 从指定文件加载配置，格式由扩展名决定（toml、json、yaml）
    fn load_from_file(path: &Path) -> TranslationResult<TranslatorConfig> {
        if !path.exists() {
            return Err(TranslationError::ConfigError(format!(
                "配置文件不存在: {}",
                path.display()
            )));
        }

        config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|settings| settings.try_deserialize::<TranslatorConfig>())
            .map_err(|e| TranslationError::from(e).with_context(path.display()))
    }

    /// 加载 .env 文件
    fn load_dotenv() {
        let env_files = [".env.local", ".env.development", ".env.production", ".env"];

        for env_file in &env_files {
            if Path::new(env_file).exists() && dotenv::from_filename(env_file).is_ok() {
                tracing::info!("已加载环境变量文件: {}", env_file);
                break;
            }
        }
    }

    /// 生成示例配置文件
    pub fn generate_example_config<P: AsRef<Path>>(path: P) -> TranslationResult<()> {
        let config = TranslatorConfig::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| TranslationError::ConfigError(format!("序列化配置失败: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| TranslationError::ConfigError(format!("写入配置文件失败: {}", e)))?;

        Ok(())
    }
}
