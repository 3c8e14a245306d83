//! 模型描述
//!
//! 注册表中的每一项描述一个语言对模型以及它所需的文件。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::translation::types::ModelKey;

/// 模型文件的组成部分名称
pub mod parts {
    pub const MODEL: &str = "model";
    pub const LEX: &str = "lex";
    pub const SHORTLIST: &str = "shortlist";
    pub const VOCAB: &str = "vocab";
    pub const SRC_VOCAB: &str = "srcvocab";
    pub const TRG_VOCAB: &str = "trgvocab";
    pub const QUALITY_MODEL: &str = "qualityModel";
}

/// 注册表中记录的单个文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFile {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    /// 十六进制 SHA-256
    #[serde(rename = "expectedSha256Hash")]
    pub expected_sha256_hash: String,
}

/// 模型描述，从注册表加载后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub from: String,
    pub to: String,
    pub files: BTreeMap<String, ModelFile>,
}

impl ModelDescriptor {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        files: BTreeMap<String, ModelFile>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            files,
        }
    }

    pub fn key(&self) -> ModelKey {
        ModelKey::new(self.from.clone(), self.to.clone())
    }

    pub fn file(&self, part: &str) -> Option<&ModelFile> {
        self.files.get(part)
    }

    /// 词表部件：共享词表返回一个，分离词表按 `[源, 目标]` 返回两个
    pub fn vocab_parts(&self) -> Option<Vec<&'static str>> {
        if self.files.contains_key(parts::VOCAB) {
            Some(vec![parts::VOCAB])
        } else if self.files.contains_key(parts::SRC_VOCAB) && self.files.contains_key(parts::TRG_VOCAB) {
            Some(vec![parts::SRC_VOCAB, parts::TRG_VOCAB])
        } else {
            None
        }
    }

    /// 短名单部件，`lex` 优先于 `shortlist`
    pub fn shortlist_part(&self) -> Option<&'static str> {
        [parts::LEX, parts::SHORTLIST]
            .into_iter()
            .find(|part| self.files.contains_key(*part))
    }
}

/// 把模型链序列化为批次键，例如 `es:en>en:de`
pub fn chain_key(models: &[ModelDescriptor]) -> String {
    models
        .iter()
        .map(|model| model.key().to_string())
        .collect::<Vec<_>>()
        .join(">")
}
