//! 模型注册表
//!
//! 注册表文档把四个字母的语言对键（如 `enes`）映射到文件表：
//!
//! ```json
//! {
//!   "enes": {
//!     "model": {"name": "model.enes.intgemm.alphas.bin", "size": 17140899, "expectedSha256Hash": "..."},
//!     "lex":   {"name": "lex.50.50.enes.s2t.bin", "size": 3860888, "expectedSha256Hash": "..."},
//!     "vocab": {"name": "vocab.esen.spm", "size": 825463, "expectedSha256Hash": "..."}
//!   }
//! }
//! ```
//!
//! 注册表只在启动时加载一次，之后只读。

pub mod model;
pub mod resolver;

use std::collections::BTreeMap;

use url::Url;

use crate::translation::error::{helpers, TranslationResult};
use crate::translation::storage::fetch::ResourceFetcher;

pub use model::{chain_key, ModelDescriptor, ModelFile};
pub use resolver::ModelResolver;

/// 可用模型列表
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
}

impl ModelRegistry {
    /// 从已有的描述创建注册表
    pub fn from_descriptors(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    /// 解析注册表 JSON 文档
    pub fn from_json(document: &str) -> TranslationResult<Self> {
        let raw: BTreeMap<String, BTreeMap<String, ModelFile>> = serde_json::from_str(document)?;

        let models = raw
            .into_iter()
            .map(|(key, files)| {
                let (from, to) = split_pair_key(&key)?;
                Ok(ModelDescriptor::new(from, to, files))
            })
            .collect::<TranslationResult<Vec<_>>>()?;

        Ok(Self { models })
    }

    /// 下载并解析注册表
    pub async fn load(fetcher: &dyn ResourceFetcher, url: &Url) -> TranslationResult<Self> {
        tracing::info!("加载模型注册表: {}", url);
        let bytes = fetcher.fetch(url).await?;
        let document = String::from_utf8(bytes)
            .map_err(|e| helpers::registry_error(format!("注册表不是有效的UTF-8: {}", e)))?;
        let registry = Self::from_json(&document).map_err(|e| e.with_context(url))?;
        tracing::info!("注册表包含 {} 个模型", registry.len());
        Ok(registry)
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// 查找精确匹配的模型
    pub fn find(&self, from: &str, to: &str) -> Option<&ModelDescriptor> {
        self.models
            .iter()
            .find(|model| model.from == from && model.to == to)
    }
}

/// `enes` → (`en`, `es`)
fn split_pair_key(key: &str) -> TranslationResult<(String, String)> {
    if key.len() != 4 || !key.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(helpers::registry_error(format!(
            "无效的语言对键 '{}'，应为四个字母",
            key
        )));
    }
    Ok((key[0..2].to_string(), key[2..4].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"{
        "enes": {
            "model": {"name": "model.enes.intgemm.alphas.bin", "size": 10, "expectedSha256Hash": "aa"},
            "lex": {"name": "lex.50.50.enes.s2t.bin", "size": 5, "expectedSha256Hash": "bb"},
            "vocab": {"name": "vocab.esen.spm", "size": 3, "expectedSha256Hash": "cc"}
        },
        "esen": {
            "model": {"name": "model.esen.intgemm.alphas.bin", "size": 10, "expectedSha256Hash": "dd"},
            "lex": {"name": "lex.50.50.esen.s2t.bin", "size": 5, "expectedSha256Hash": "ee"},
            "vocab": {"name": "vocab.esen.spm", "size": 3, "expectedSha256Hash": "cc"}
        }
    }"#;

    #[test]
    fn test_parse_registry() {
        let registry = ModelRegistry::from_json(REGISTRY).unwrap();
        assert_eq!(registry.len(), 2);

        let enes = registry.find("en", "es").expect("en->es 应存在");
        assert_eq!(enes.files["lex"].name, "lex.50.50.enes.s2t.bin");
        assert_eq!(enes.files["model"].expected_sha256_hash, "aa");
        assert!(registry.find("es", "de").is_none());
    }

    #[test]
    fn test_reject_malformed_key() {
        let result = ModelRegistry::from_json(r#"{"english": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_json_is_serialization_error() {
        use crate::translation::error::TranslationError;

        let error = ModelRegistry::from_json("{\"enes\": [").unwrap_err();
        assert!(matches!(error, TranslationError::SerializationError(_)));

        let located = error.with_context("https://models.example.com/registry.json");
        assert!(located.to_string().contains("models.example.com"));
    }

    #[test]
    fn test_split_pair_key() {
        assert_eq!(
            split_pair_key("deen").unwrap(),
            ("de".to_string(), "en".to_string())
        );
        assert!(split_pair_key("de-en").is_err());
    }
}
