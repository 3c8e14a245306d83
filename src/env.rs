//! 统一的环境变量管理系统
//!
//! 提供类型安全、可验证的环境变量管理

use std::env;
use std::fmt;
use std::time::Duration;

/// 环境变量解析错误
#[derive(Debug, Clone)]
pub struct EnvError {
    pub variable: String,
    pub message: String,
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment variable '{}': {}", self.variable, self.message)
    }
}

impl std::error::Error for EnvError {}

pub type EnvResult<T> = Result<T, EnvError>;

/// 环境变量访问器特性
pub trait EnvVar<T> {
    const NAME: &'static str;
    const DEFAULT: Option<T>;
    const DESCRIPTION: &'static str;

    fn parse(value: &str) -> EnvResult<T>;

    fn get() -> EnvResult<T> {
        match env::var(Self::NAME) {
            Ok(value) => Self::parse(&value),
            Err(_) => {
                if let Some(default) = Self::DEFAULT {
                    Ok(default)
                } else {
                    Err(EnvError {
                        variable: Self::NAME.to_string(),
                        message: "Required environment variable not set".to_string(),
                    })
                }
            }
        }
    }

    /// 只读取显式设置的值；未设置时返回 `Ok(None)`，不使用默认值
    fn lookup() -> EnvResult<Option<T>> {
        match env::var(Self::NAME) {
            Ok(value) => Self::parse(&value).map(Some),
            Err(_) => Ok(None),
        }
    }

    fn get_or_default(default: T) -> T {
        Self::get().unwrap_or(default)
    }
}

/// 核心环境变量定义
pub mod core {
    use super::*;

    /// 日志级别
    pub struct LogLevel;
    impl EnvVar<String> for LogLevel {
        const NAME: &'static str = "BERGAMOT_LOG_LEVEL";
        const DEFAULT: Option<String> = None;

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("info".to_string()),
            }
        }
        const DESCRIPTION: &'static str = "Log level: trace, debug, info, warn, error";

        fn parse(value: &str) -> EnvResult<String> {
            match value.to_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => Ok(value.to_lowercase()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!("Invalid log level '{}'. Use: trace, debug, info, warn, error", value),
                }),
            }
        }
    }
}

/// 调度器相关环境变量
pub mod scheduler {
    use super::*;

    /// 模型注册表地址
    pub struct RegistryUrl;
    impl EnvVar<String> for RegistryUrl {
        const NAME: &'static str = "BERGAMOT_REGISTRY_URL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "URL of the model registry JSON document";

        fn parse(value: &str) -> EnvResult<String> {
            let url = value.trim();
            if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("file://") {
                Ok(url.to_string())
            } else {
                Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Registry URL must start with http://, https:// or file://".to_string(),
                })
            }
        }
    }

    /// 中转语言；`none` 或空字符串禁用中转
    pub struct PivotLanguage;
    impl EnvVar<Option<String>> for PivotLanguage {
        const NAME: &'static str = "BERGAMOT_PIVOT_LANGUAGE";
        const DEFAULT: Option<Option<String>> = None;

        fn get() -> EnvResult<Option<String>> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok(Some("en".to_string())),
            }
        }
        const DESCRIPTION: &'static str = "Pivot language code used to chain two models, or 'none'";

        fn parse(value: &str) -> EnvResult<Option<String>> {
            let code = value.trim().to_lowercase();
            match code.as_str() {
                "" | "none" | "off" => Ok(None),
                _ if is_language_code(&code) => Ok(Some(code)),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!("Invalid language code '{}'", value),
                }),
            }
        }
    }

    /// 单个文件的下载超时（毫秒），0 表示不限制
    pub struct DownloadTimeout;
    impl EnvVar<Option<Duration>> for DownloadTimeout {
        const NAME: &'static str = "BERGAMOT_DOWNLOAD_TIMEOUT_MS";
        const DEFAULT: Option<Option<Duration>> = Some(Some(Duration::from_millis(60_000)));
        const DESCRIPTION: &'static str = "Per-file download timeout in milliseconds, 0 disables it";

        fn parse(value: &str) -> EnvResult<Option<Duration>> {
            let millis: u64 = value.trim().parse().map_err(|_| EnvError {
                variable: Self::NAME.to_string(),
                message: "Must be a valid number of milliseconds".to_string(),
            })?;
            Ok(timeout_from_millis(millis))
        }
    }

    /// 批量调度器的执行单元数量
    pub struct Workers;
    impl EnvVar<usize> for Workers {
        const NAME: &'static str = "BERGAMOT_WORKERS";
        const DEFAULT: Option<usize> = Some(1);
        const DESCRIPTION: &'static str = "Maximum number of execution units in the batch pool";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 1, 64)
        }
    }

    /// 批次大小
    pub struct BatchSize;
    impl EnvVar<usize> for BatchSize {
        const NAME: &'static str = "BERGAMOT_BATCH_SIZE";
        const DEFAULT: Option<usize> = Some(8);
        const DESCRIPTION: &'static str = "Maximum number of requests per batch";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 1, 1024)
        }
    }

    /// 引擎内部翻译缓存大小
    pub struct CacheSize;
    impl EnvVar<usize> for CacheSize {
        const NAME: &'static str = "BERGAMOT_CACHE_SIZE";
        const DEFAULT: Option<usize> = Some(0);
        const DESCRIPTION: &'static str = "Engine-side translation cache size, 0 disables it";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 0, usize::MAX)
        }
    }

    /// 使用原生整数矩阵乘法
    pub struct NativeIntGemm;
    impl EnvVar<bool> for NativeIntGemm {
        const NAME: &'static str = "BERGAMOT_NATIVE_INT_GEMM";
        const DEFAULT: Option<bool> = Some(false);
        const DESCRIPTION: &'static str = "Use the native integer GEMM implementation";

        fn parse(value: &str) -> EnvResult<bool> {
            parse_bool(value, Self::NAME)
        }
    }
}

/// 两到三个小写字母的语言代码
pub fn is_language_code(code: &str) -> bool {
    (2..=3).contains(&code.len()) && code.chars().all(|c| c.is_ascii_lowercase())
}

/// 毫秒转换为超时，0 表示不限制
pub fn timeout_from_millis(millis: u64) -> Option<Duration> {
    if millis == 0 {
        None
    } else {
        Some(Duration::from_millis(millis))
    }
}

/// 辅助函数
fn parse_bool(value: &str, var_name: &str) -> EnvResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => Ok(true),
        "false" | "0" | "no" | "off" | "disabled" => Ok(false),
        _ => Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Invalid boolean value '{}'. Use: true/false, 1/0, yes/no, on/off, enabled/disabled", value),
        }),
    }
}

fn parse_positive_usize(value: &str, var_name: &str, min: usize, max: usize) -> EnvResult<usize> {
    let num: usize = value.trim().parse().map_err(|_| EnvError {
        variable: var_name.to_string(),
        message: "Must be a valid positive number".to_string(),
    })?;

    if num < min {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} is below minimum {}", num, min),
        });
    }

    if num > max {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} exceeds maximum {}", num, max),
        });
    }

    Ok(num)
}

/// 环境变量配置汇总
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub log_level: String,
    pub registry_url: Option<String>,
    pub pivot_language: Option<String>,
    pub download_timeout: Option<Duration>,
    pub workers: usize,
    pub batch_size: usize,
    pub cache_size: usize,
    pub use_native_int_gemm: bool,
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> EnvResult<Self> {
        Ok(Self {
            log_level: core::LogLevel::get()?,
            registry_url: scheduler::RegistryUrl::get().ok(),
            pivot_language: scheduler::PivotLanguage::get()?,
            download_timeout: scheduler::DownloadTimeout::get()?,
            workers: scheduler::Workers::get()?,
            batch_size: scheduler::BatchSize::get()?,
            cache_size: scheduler::CacheSize::get()?,
            use_native_int_gemm: scheduler::NativeIntGemm::get()?,
        })
    }

    /// 打印配置摘要
    pub fn print_summary(&self) {
        println!("Environment Configuration Summary:");
        println!("  Log Level: {}", self.log_level);
        println!(
            "  Registry: {}",
            self.registry_url.as_deref().unwrap_or("[default]")
        );
        println!(
            "  Pivot: {}",
            self.pivot_language.as_deref().unwrap_or("[disabled]")
        );
        println!("  Workers: {}, Batch Size: {}", self.workers, self.batch_size);
    }
}

/// 环境变量文档生成器
pub fn generate_env_docs() -> String {
    let mut docs = String::new();
    docs.push_str("# Environment Variables Documentation\n\n");

    docs.push_str("## Core Configuration\n\n");
    docs.push_str(&format!("- `{}`: {} (default: {:?})\n",
        core::LogLevel::NAME, core::LogLevel::DESCRIPTION, "info"));

    docs.push_str("\n## Scheduler Configuration\n\n");
    docs.push_str(&format!("- `{}`: {} (default: {:?})\n",
        scheduler::RegistryUrl::NAME, scheduler::RegistryUrl::DESCRIPTION, scheduler::RegistryUrl::DEFAULT));
    docs.push_str(&format!("- `{}`: {} (default: {:?})\n",
        scheduler::PivotLanguage::NAME, scheduler::PivotLanguage::DESCRIPTION, "en"));
    docs.push_str(&format!("- `{}`: {} (default: {:?})\n",
        scheduler::DownloadTimeout::NAME, scheduler::DownloadTimeout::DESCRIPTION, scheduler::DownloadTimeout::DEFAULT));
    docs.push_str(&format!("- `{}`: {} (default: {:?})\n",
        scheduler::Workers::NAME, scheduler::Workers::DESCRIPTION, scheduler::Workers::DEFAULT));
    docs.push_str(&format!("- `{}`: {} (default: {:?})\n",
        scheduler::BatchSize::NAME, scheduler::BatchSize::DESCRIPTION, scheduler::BatchSize::DEFAULT));
    docs.push_str(&format!("- `{}`: {} (default: {:?})\n",
        scheduler::CacheSize::NAME, scheduler::CacheSize::DESCRIPTION, scheduler::CacheSize::DEFAULT));
    docs.push_str(&format!("- `{}`: {} (default: {:?})\n",
        scheduler::NativeIntGemm::NAME, scheduler::NativeIntGemm::DESCRIPTION, scheduler::NativeIntGemm::DEFAULT));

    docs
}
