//! 资源缓存
//!
//! 按语言对下载并记住模型资源包。同一语言对的并发请求共享同一次下载，
//! 成功的结果在缓存的生命周期内一直保留，没有淘汰策略。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{try_join_all, BoxFuture, FutureExt, Shared};
use url::Url;

use super::bundle::{Buffer, ResourceBundle};
use super::fetch::{check_integrity, integrity_from_hex, ResourceFetcher};
use crate::translation::error::{helpers, TranslationError, TranslationResult};
use crate::translation::registry::{ModelDescriptor, ModelFile};
use crate::translation::types::ModelKey;

type SharedBundle = Shared<BoxFuture<'static, TranslationResult<Arc<ResourceBundle>>>>;

/// 文件在一次下载中的身份：名称加校验和
type FileIdentity = (String, String);

/// 缓存统计信息
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// 实际发出的文件下载次数
    pub downloads: u64,
    pub bytes_downloaded: u64,
    pub total_entries: usize,
}

impl CacheStats {
    /// 计算缓存命中率
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    downloads: AtomicU64,
    bytes_downloaded: AtomicU64,
}

/// 模型资源缓存
pub struct ResourceCache {
    fetcher: Arc<dyn ResourceFetcher>,
    base_url: Url,
    timeout: Option<Duration>,
    entries: DashMap<ModelKey, SharedBundle>,
    counters: Arc<Counters>,
}

impl ResourceCache {
    /// 文件地址为 `<base_url 所在目录>/<from><to>/<文件名>`
    ///
    /// `timeout` 为 `None` 时不限制下载时间。
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, base_url: Url, timeout: Option<Duration>) -> Self {
        Self {
            fetcher,
            base_url,
            timeout,
            entries: DashMap::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// 获取语言对的资源包，必要时下载
    ///
    /// 失败的下载不会被记住，之后的调用会重新下载。
    pub async fn get(&self, descriptor: &ModelDescriptor) -> TranslationResult<Arc<ResourceBundle>> {
        let key = descriptor.key();
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);

        let pending = match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) => {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("开始下载 {} 的模型资源", key);
                let download = self.download(descriptor.clone()).boxed().shared();
                entry.insert(download.clone());
                download
            }
        };

        let result = pending.await;
        if let Err(error) = &result {
            tracing::warn!("{} 的模型资源获取失败: {}", key, error);
            self.entries
                .remove_if(&key, |_, entry| matches!(entry.peek(), Some(Err(_))));
        }
        result
    }

    /// 直接放入一个已准备好的资源包
    pub fn insert(&self, key: ModelKey, bundle: Arc<ResourceBundle>) {
        let ready = futures::future::ready(Ok(bundle)).boxed().shared();
        self.entries.insert(key, ready);
    }

    /// 是否已有（进行中或已完成的）条目
    pub fn contains(&self, key: &ModelKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 清空缓存
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// 获取统计信息
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            downloads: self.counters.downloads.load(Ordering::Relaxed),
            bytes_downloaded: self.counters.bytes_downloaded.load(Ordering::Relaxed),
            total_entries: self.entries.len(),
        }
    }

    fn download(
        &self,
        descriptor: ModelDescriptor,
    ) -> impl std::future::Future<Output = TranslationResult<Arc<ResourceBundle>>> + Send + 'static {
        let fetcher = Arc::clone(&self.fetcher);
        let base_url = self.base_url.clone();
        let timeout = self.timeout;
        let counters = Arc::clone(&self.counters);

        async move {
            let directory = base_url.join(&format!("{}{}/", descriptor.from, descriptor.to))?;

            // 同名且校验和相同的文件（例如共享词表）只下载一次
            let mut unique: Vec<&ModelFile> = Vec::new();
            for file in descriptor.files.values() {
                if !unique.iter().any(|seen| same_file(seen, file)) {
                    unique.push(file);
                }
            }

            let downloads = unique
                .iter()
                .map(|file| fetch_file(fetcher.as_ref(), &directory, file, timeout, &counters));
            let fetched: HashMap<FileIdentity, Buffer> =
                try_join_all(downloads).await?.into_iter().collect();

            let mut buffers = HashMap::with_capacity(descriptor.files.len());
            for (part, file) in &descriptor.files {
                let buffer = fetched.get(&identity(file)).ok_or_else(|| {
                    helpers::internal_error(format!("下载结果中缺少 {}", file.name))
                })?;
                buffers.insert(part.clone(), Arc::clone(buffer));
            }

            let bundle = ResourceBundle::assemble(&descriptor, buffers)?;
            tracing::info!(
                "{}->{} 模型资源就绪，共 {} 字节",
                descriptor.from,
                descriptor.to,
                bundle.total_bytes()
            );
            Ok(Arc::new(bundle))
        }
    }
}

fn identity(file: &ModelFile) -> FileIdentity {
    (file.name.clone(), file.expected_sha256_hash.clone())
}

fn same_file(a: &ModelFile, b: &ModelFile) -> bool {
    a.name == b.name && a.expected_sha256_hash == b.expected_sha256_hash
}

async fn fetch_file(
    fetcher: &dyn ResourceFetcher,
    directory: &Url,
    file: &ModelFile,
    timeout: Option<Duration>,
    counters: &Counters,
) -> TranslationResult<(FileIdentity, Buffer)> {
    let url = directory.join(&file.name)?;

    let fetched = match timeout {
        Some(after) => match tokio::time::timeout(after, fetcher.fetch(&url)).await {
            Ok(result) => result,
            Err(_) => {
                return Err(TranslationError::Timeout {
                    file: file.name.clone(),
                    after,
                })
            }
        },
        None => fetcher.fetch(&url).await,
    };

    let bytes = fetched.map_err(|error| match error {
        TranslationError::Fetch { reason, .. } => helpers::fetch_error(&file.name, reason),
        TranslationError::Timeout { .. } => error,
        other => helpers::fetch_error(&file.name, other),
    })?;

    let integrity = integrity_from_hex(&file.expected_sha256_hash)
        .ok_or_else(|| helpers::fetch_error(&file.name, "注册表中的校验和无效"))?;
    if !check_integrity(&bytes, &integrity) {
        return Err(helpers::fetch_error(&file.name, "校验和不匹配"));
    }

    counters.downloads.fetch_add(1, Ordering::Relaxed);
    counters
        .bytes_downloaded
        .fetch_add(bytes.len() as u64, Ordering::Relaxed);

    Ok((identity(file), Arc::new(bytes)))
}
