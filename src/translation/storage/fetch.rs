//! 资源下载与完整性校验

use async_trait::async_trait;
use base64::prelude::*;
use sha2::{Digest, Sha256, Sha384, Sha512};
use url::Url;

use crate::translation::error::TranslationResult;

/// 资源下载器
///
/// 生产环境使用 [`HttpFetcher`]；测试可以提供内存中的实现。
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// 下载整个资源
    async fn fetch(&self, url: &Url) -> TranslationResult<Vec<u8>>;
}

/// 基于 reqwest 的 HTTP 下载器
#[cfg(feature = "http")]
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> TranslationResult<Vec<u8>> {
        tracing::debug!("下载 {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// 把注册表中的十六进制 SHA-256 转换为子资源完整性字符串 `sha256-<base64>`
///
/// 十六进制无效时返回 `None`。
pub fn integrity_from_hex(hex: &str) -> Option<String> {
    let hex = hex.trim();
    if hex.is_empty() || hex.len() % 2 != 0 {
        return None;
    }

    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;

    Some(format!("sha256-{}", BASE64_STANDARD.encode(bytes)))
}

/// 验证资源数据的完整性
///
/// 支持 SHA-256、SHA-384 和 SHA-512，格式遵循子资源完整性（SRI）规范。
/// 哈希不匹配或格式不支持时返回 `false`。
pub fn check_integrity(data: &[u8], integrity: &str) -> bool {
    if let Some(hash_value) = integrity.strip_prefix("sha256-") {
        let mut hasher = Sha256::new();
        hasher.update(data);
        BASE64_STANDARD.encode(hasher.finalize()) == hash_value
    } else if let Some(hash_value) = integrity.strip_prefix("sha384-") {
        let mut hasher = Sha384::new();
        hasher.update(data);
        BASE64_STANDARD.encode(hasher.finalize()) == hash_value
    } else if let Some(hash_value) = integrity.strip_prefix("sha512-") {
        let mut hasher = Sha512::new();
        hasher.update(data);
        BASE64_STANDARD.encode(hasher.finalize()) == hash_value
    } else {
        false
    }
}

/// 计算数据的十六进制 SHA-256，与注册表中的格式一致
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}
