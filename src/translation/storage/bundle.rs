//! 模型资源包
//!
//! 一个语言对模型加载所需的全部二进制文件。资源包创建后不再修改，
//! 由资源缓存独占持有，以只读方式共享给加载它的执行单元。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::translation::error::{helpers, TranslationResult};
use crate::translation::registry::model::parts;
use crate::translation::registry::ModelDescriptor;

/// 只读共享的字节缓冲区
pub type Buffer = Arc<Vec<u8>>;

/// 模型资源包
#[derive(Debug, Clone)]
pub struct ResourceBundle {
    pub model: Buffer,
    pub shortlist: Buffer,
    /// 共享词表一个，分离词表按 `[源, 目标]` 两个
    pub vocabs: Vec<Buffer>,
    pub quality_model: Option<Buffer>,
    /// 覆盖执行单元默认模型配置的键值
    pub config: BTreeMap<String, String>,
}

impl ResourceBundle {
    /// 根据模型描述和已下载的部件组装资源包
    pub fn assemble(
        descriptor: &ModelDescriptor,
        mut buffers: HashMap<String, Buffer>,
    ) -> TranslationResult<Self> {
        let missing = |part: &str| {
            helpers::registry_error(format!(
                "{}->{} 模型缺少 {} 文件",
                descriptor.from, descriptor.to, part
            ))
        };

        let model = buffers
            .remove(parts::MODEL)
            .ok_or_else(|| missing(parts::MODEL))?;

        let shortlist_part = descriptor
            .shortlist_part()
            .ok_or_else(|| missing(parts::LEX))?;
        let shortlist = buffers
            .remove(shortlist_part)
            .ok_or_else(|| missing(shortlist_part))?;

        let vocab_parts = descriptor.vocab_parts().ok_or_else(|| {
            helpers::registry_error(format!(
                "无法识别 {}->{} 模型的词表文件，现有部件: {}",
                descriptor.from,
                descriptor.to,
                descriptor.files.keys().cloned().collect::<Vec<_>>().join(" ")
            ))
        })?;
        let vocabs = vocab_parts
            .iter()
            .map(|part| buffers.remove(*part).ok_or_else(|| missing(*part)))
            .collect::<TranslationResult<Vec<_>>>()?;

        let quality_model = buffers.remove(parts::QUALITY_MODEL);

        Ok(Self {
            model,
            shortlist,
            vocabs,
            quality_model,
            config: Self::config_overrides(descriptor),
        })
    }

    /// 模型相关的配置覆盖
    fn config_overrides(descriptor: &ModelDescriptor) -> BTreeMap<String, String> {
        let mut config = BTreeMap::new();

        if descriptor
            .file(parts::MODEL)
            .map_or(false, |file| file.name.ends_with("intgemm8.bin"))
        {
            config.insert("gemm-precision".to_string(), "int8shiftAll".to_string());
        }

        // 启用质量估计时必须关闭 skip-cost
        if descriptor.file(parts::QUALITY_MODEL).is_some() {
            config.insert("skip-cost".to_string(), "false".to_string());
        }

        config
    }

    /// 去重后的词表，按首次出现顺序
    ///
    /// 源词表和目标词表相同时只传递一份。
    pub fn unique_vocabs(&self) -> Vec<Buffer> {
        let mut unique: Vec<Buffer> = Vec::with_capacity(self.vocabs.len());
        for vocab in &self.vocabs {
            if !unique
                .iter()
                .any(|seen| Arc::ptr_eq(seen, vocab) || seen.as_slice() == vocab.as_slice())
            {
                unique.push(Arc::clone(vocab));
            }
        }
        unique
    }

    /// 资源包总字节数
    pub fn total_bytes(&self) -> usize {
        self.model.len()
            + self.shortlist.len()
            + self.unique_vocabs().iter().map(|v| v.len()).sum::<usize>()
            + self.quality_model.as_ref().map_or(0, |q| q.len())
    }
}
