// 集成测试公共模块
//
// 提供内存中的资源下载器、注册表构造和调度器构建辅助

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use bergamot_scheduler::translation::error::{helpers, TranslationResult};
use bergamot_scheduler::translation::storage::{sha256_hex, ResourceFetcher};
use bergamot_scheduler::translation::worker::{MockEngineFactory, MockMode};
use bergamot_scheduler::translation::{
    ModelDescriptor, ModelFile, ModelRegistry, TranslatorBuilder, TranslatorConfig,
};

/// 测试用注册表地址，模型文件位于同一目录下
pub const REGISTRY_URL: &str = "https://models.example.com/v1/registry.json";

/// 内存中的资源下载器
///
/// 按完整 URL 返回预先放入的字节，记录每一次下载。
#[derive(Default)]
pub struct MemoryFetcher {
    files: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, url: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(url.to_string(), bytes);
    }

    pub fn remove(&self, url: &str) {
        self.files.lock().unwrap().remove(url);
    }

    /// 每次下载前等待
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// 以 `suffix` 结尾的 URL 被下载的次数
    pub fn fetches_of(&self, suffix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.ends_with(suffix))
            .count()
    }
}

#[async_trait]
impl ResourceFetcher for MemoryFetcher {
    async fn fetch(&self, url: &Url) -> TranslationResult<Vec<u8>> {
        self.calls.lock().unwrap().push(url.to_string());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let found = self.files.lock().unwrap().get(url.as_str()).cloned();
        found.ok_or_else(|| helpers::fetch_error(url, "HTTP 404"))
    }
}

/// 模型文件所在的 URL
pub fn file_url(from: &str, to: &str, name: &str) -> String {
    format!("https://models.example.com/v1/{}{}/{}", from, to, name)
}

fn model_file(name: &str, bytes: &[u8]) -> ModelFile {
    ModelFile {
        name: name.to_string(),
        size: bytes.len() as u64,
        expected_sha256_hash: sha256_hex(bytes),
    }
}

/// 构造一个共享词表的模型，并把文件放入下载器
pub fn publish_model(fetcher: &MemoryFetcher, from: &str, to: &str) -> ModelDescriptor {
    let pair = format!("{}{}", from, to);
    let parts = [
        ("model", format!("model.{}.intgemm.alphas.bin", pair)),
        ("lex", format!("lex.50.50.{}.s2t.bin", pair)),
        ("vocab", format!("vocab.{}.spm", pair)),
    ];

    let mut files = BTreeMap::new();
    for (part, name) in parts {
        let bytes = format!("{}:{}", pair, part).into_bytes();
        fetcher.put(&file_url(from, to, &name), bytes.clone());
        files.insert(part.to_string(), model_file(&name, &bytes));
    }

    ModelDescriptor::new(from, to, files)
}

/// 构造一个源词表和目标词表为同一文件的分离词表模型
pub fn publish_split_vocab_model(fetcher: &MemoryFetcher, from: &str, to: &str) -> ModelDescriptor {
    let pair = format!("{}{}", from, to);
    let vocab_name = format!("vocab.{}.spm", pair);
    let vocab = b"shared vocabulary".to_vec();

    let mut files = BTreeMap::new();
    for (part, name, bytes) in [
        ("model", format!("model.{}.intgemm8.bin", pair), b"weights".to_vec()),
        ("lex", format!("lex.{}.bin", pair), b"shortlist".to_vec()),
        ("srcvocab", vocab_name.clone(), vocab.clone()),
        ("trgvocab", vocab_name.clone(), vocab.clone()),
    ] {
        fetcher.put(&file_url(from, to, &name), bytes.clone());
        files.insert(part.to_string(), model_file(&name, &bytes));
    }

    ModelDescriptor::new(from, to, files)
}

/// 注册表 JSON 文档
pub fn registry_json(models: &[ModelDescriptor]) -> String {
    let document: BTreeMap<String, &BTreeMap<String, ModelFile>> = models
        .iter()
        .map(|model| (format!("{}{}", model.from, model.to), &model.files))
        .collect();
    serde_json::to_string(&document).unwrap()
}

/// 测试配置：测试注册表地址，给定批次大小和执行单元数量
pub fn test_config(batch_size: usize, workers: usize) -> TranslatorConfig {
    TranslatorConfig {
        registry_url: REGISTRY_URL.to_string(),
        batch_size,
        workers,
        download_timeout_ms: 5_000,
        ..Default::default()
    }
}

/// 已发布若干语言对的测试环境
pub struct TestEnvironment {
    pub fetcher: Arc<MemoryFetcher>,
    pub models: Vec<ModelDescriptor>,
    pub factory: MockEngineFactory,
}

impl TestEnvironment {
    pub fn new(pairs: &[(&str, &str)], mode: MockMode) -> Self {
        let fetcher = Arc::new(MemoryFetcher::new());
        let models = pairs
            .iter()
            .map(|(from, to)| publish_model(&fetcher, from, to))
            .collect();
        Self {
            fetcher,
            models,
            factory: MockEngineFactory::new(mode),
        }
    }

    pub fn with_factory(mut self, factory: MockEngineFactory) -> Self {
        self.factory = factory;
        self
    }

    /// 使用内联注册表的调度器构建器
    pub fn builder(&self, config: TranslatorConfig) -> TranslatorBuilder {
        TranslatorBuilder::new()
            .config(config)
            .fetcher(self.fetcher.clone())
            .registry(ModelRegistry::from_descriptors(self.models.clone()))
            .engine_factory(Arc::new(self.factory.clone()))
    }
}
