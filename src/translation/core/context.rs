//! 调度器共享的上下文
//!
//! 注册表、路径解析器、资源缓存和引擎工厂都是调度器实例自己的字段，
//! 不存在进程级的全局状态，多个调度器可以在同一进程中独立运行。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use url::Url;

use super::batch::BatchScheduler;
use super::latency::LatencyScheduler;
use crate::translation::config::TranslatorConfig;
use crate::translation::error::{helpers, ErrorHook, TranslationError, TranslationResult};
use crate::translation::registry::resolver::{ModelChain, RegistrySource};
use crate::translation::registry::{ModelDescriptor, ModelRegistry, ModelResolver};
use crate::translation::storage::{ResourceCache, ResourceFetcher};
use crate::translation::worker::{EngineFactory, ExecutionUnit};

/// 调度器上下文
pub struct TranslatorContext {
    config: TranslatorConfig,
    resolver: ModelResolver,
    cache: ResourceCache,
    factory: Arc<dyn EngineFactory>,
    on_error: ErrorHook,
    unit_serial: AtomicUsize,
}

impl TranslatorContext {
    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    pub fn resolver(&self) -> &ModelResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// 解析语言对的模型链
    pub async fn get_models(&self, from: &str, to: &str) -> TranslationResult<ModelChain> {
        self.resolver.resolve(from, to).await
    }

    /// 创建新的执行单元；失败时通知错误回调
    pub async fn spawn_unit(&self) -> TranslationResult<Arc<ExecutionUnit>> {
        let id = self.unit_serial.fetch_add(1, Ordering::Relaxed);
        let spawned = ExecutionUnit::spawn(
            id,
            Arc::clone(&self.factory),
            self.config.engine_options(),
            Arc::clone(&self.on_error),
        )
        .await;

        match spawned {
            Ok(unit) => Ok(Arc::new(unit)),
            Err(error) => {
                self.report_error(&error);
                Err(error)
            }
        }
    }

    /// 确保执行单元持有模型链中的每个模型
    ///
    /// 不同的模型并行处理：先询问执行单元，缺少时通过资源缓存获取并加载。
    pub async fn ensure_models_loaded(
        &self,
        unit: &ExecutionUnit,
        models: &[ModelDescriptor],
    ) -> TranslationResult<()> {
        let mut distinct: Vec<&ModelDescriptor> = Vec::with_capacity(models.len());
        for model in models {
            if !distinct.iter().any(|seen| seen.key() == model.key()) {
                distinct.push(model);
            }
        }

        try_join_all(
            distinct
                .into_iter()
                .map(|model| self.ensure_model_loaded(unit, model)),
        )
        .await?;
        Ok(())
    }

    async fn ensure_model_loaded(
        &self,
        unit: &ExecutionUnit,
        model: &ModelDescriptor,
    ) -> TranslationResult<()> {
        let key = model.key();
        if unit.has_model(&key).await? {
            return Ok(());
        }

        let bundle = self.cache.get(model).await?;
        unit.load_model(&key, bundle).await
    }

    /// 通知与具体请求无关的错误
    pub fn report_error(&self, error: &TranslationError) {
        (self.on_error)(error);
    }
}

/// 调度器构建器
#[derive(Default)]
pub struct TranslatorBuilder {
    config: TranslatorConfig,
    fetcher: Option<Arc<dyn ResourceFetcher>>,
    registry: Option<Arc<ModelRegistry>>,
    factory: Option<Arc<dyn EngineFactory>>,
    on_error: Option<ErrorHook>,
}

impl TranslatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: TranslatorConfig) -> Self {
        self.config = config;
        self
    }

    /// 资源下载器，默认使用 HTTP
    pub fn fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// 直接提供注册表，不再从 `registry_url` 下载
    pub fn registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    pub fn engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// 执行单元级错误的回调，默认写入日志
    pub fn on_error(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    pub fn build_batch(self) -> TranslationResult<BatchScheduler> {
        Ok(BatchScheduler::from_context(self.build_context()?))
    }

    pub fn build_latency(self) -> TranslationResult<LatencyScheduler> {
        Ok(LatencyScheduler::from_context(self.build_context()?))
    }

    fn build_context(self) -> TranslationResult<TranslatorContext> {
        let config = self.config.normalized();
        config.validate()?;

        let factory = self
            .factory
            .ok_or_else(|| helpers::config_error("缺少引擎工厂"))?;
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => default_fetcher()?,
        };

        let base_url = Url::parse(&config.registry_url)?;
        let source = match self.registry {
            Some(registry) => RegistrySource::Inline(registry),
            None => RegistrySource::Remote {
                url: base_url.clone(),
                fetcher: Arc::clone(&fetcher),
            },
        };

        let resolver = ModelResolver::new(source, config.pivot_language.clone());
        let cache = ResourceCache::new(fetcher, base_url, config.download_timeout());

        Ok(TranslatorContext {
            config,
            resolver,
            cache,
            factory,
            on_error: self.on_error.unwrap_or_else(helpers::default_error_hook),
            unit_serial: AtomicUsize::new(0),
        })
    }
}

#[cfg(feature = "http")]
fn default_fetcher() -> TranslationResult<Arc<dyn ResourceFetcher>> {
    Ok(Arc::new(crate::translation::storage::HttpFetcher::new()))
}

#[cfg(not(feature = "http"))]
fn default_fetcher() -> TranslationResult<Arc<dyn ResourceFetcher>> {
    Err(helpers::config_error("未启用 http 特性时必须提供资源下载器"))
}
