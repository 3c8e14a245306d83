//! 模型路径解析
//!
//! 给定 (from, to)，返回需要依次执行的模型链：直接模型优先，
//! 否则经由中转语言串联两个模型。解析结果按语言对记忆，
//! 并发调用共享同一个进行中的解析。

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use url::Url;

use super::{ModelDescriptor, ModelRegistry};
use crate::translation::error::{TranslationError, TranslationResult};
use crate::translation::storage::fetch::ResourceFetcher;
use crate::translation::types::ModelKey;

/// 按执行顺序排列的模型链，长度为 1 或 2
pub type ModelChain = Arc<Vec<ModelDescriptor>>;

type SharedRegistry = Shared<BoxFuture<'static, TranslationResult<Arc<ModelRegistry>>>>;
type SharedChain = Shared<BoxFuture<'static, TranslationResult<ModelChain>>>;

/// 注册表来源
#[derive(Clone)]
pub enum RegistrySource {
    /// 已在内存中的注册表
    Inline(Arc<ModelRegistry>),
    /// 首次使用时下载
    Remote {
        url: Url,
        fetcher: Arc<dyn ResourceFetcher>,
    },
}

/// 模型路径解析器
pub struct ModelResolver {
    source: RegistrySource,
    registry: Mutex<Option<SharedRegistry>>,
    pivot: Option<String>,
    routes: DashMap<ModelKey, SharedChain>,
}

impl ModelResolver {
    /// `pivot` 为 `None` 时只接受直接模型
    pub fn new(source: RegistrySource, pivot: Option<String>) -> Self {
        Self {
            source,
            registry: Mutex::new(None),
            pivot,
            routes: DashMap::new(),
        }
    }

    pub fn pivot(&self) -> Option<&str> {
        self.pivot.as_deref()
    }

    /// 注册表加载只进行一次；失败后下一次调用会重新加载
    fn registry_future(&self) -> SharedRegistry {
        let mut slot = self
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = slot.as_ref() {
            if !matches!(existing.peek(), Some(Err(_))) {
                return existing.clone();
            }
        }

        let loading = match &self.source {
            RegistrySource::Inline(registry) => future::ready(Ok(Arc::clone(registry))).boxed(),
            RegistrySource::Remote { url, fetcher } => {
                let url = url.clone();
                let fetcher = Arc::clone(fetcher);
                async move { ModelRegistry::load(fetcher.as_ref(), &url).await.map(Arc::new) }.boxed()
            }
        }
        .shared();

        *slot = Some(loading.clone());
        loading
    }

    /// 获取（必要时加载）注册表
    pub async fn registry(&self) -> TranslationResult<Arc<ModelRegistry>> {
        self.registry_future().await
    }

    /// 解析语言对的模型链
    pub async fn resolve(&self, from: &str, to: &str) -> TranslationResult<ModelChain> {
        let key = ModelKey::new(from, to);

        let route = self
            .routes
            .entry(key.clone())
            .or_insert_with(|| {
                let registry = self.registry_future();
                let pivot = self.pivot.clone();
                let key = key.clone();
                async move {
                    let registry = registry.await?;
                    find_route(&registry, &key.from, &key.to, pivot.as_deref()).map(Arc::new)
                }
                .boxed()
                .shared()
            })
            .clone();

        let result = route.await;

        // 注册表不会变化，所以"无路径"可以记住；其它失败允许重试
        if let Err(error) = &result {
            if !matches!(error, TranslationError::NoRoute { .. }) {
                self.routes
                    .remove_if(&key, |_, route| matches!(route.peek(), Some(Err(_))));
            }
        }

        result
    }

    /// 不等待地查看已完成的解析结果
    pub fn peek(&self, key: &ModelKey) -> Option<TranslationResult<ModelChain>> {
        self.routes.get(key).and_then(|route| route.peek().cloned())
    }
}

/// 在注册表中寻找从 `from` 到 `to` 的模型链
pub fn find_route(
    registry: &ModelRegistry,
    from: &str,
    to: &str,
    pivot: Option<&str>,
) -> TranslationResult<Vec<ModelDescriptor>> {
    if let Some(direct) = registry.find(from, to) {
        return Ok(vec![direct.clone()]);
    }

    if let Some(pivot) = pivot {
        let outbound = registry.find(from, pivot);
        let inbound = registry.find(pivot, to);
        if let (Some(outbound), Some(inbound)) = (outbound, inbound) {
            tracing::debug!("{} -> {} 经由 {} 中转", from, to, pivot);
            return Ok(vec![outbound.clone(), inbound.clone()]);
        }
    }

    Err(TranslationError::NoRoute {
        from: from.to_string(),
        to: to.to_string(),
    })
}
