//! 资源缓存集成测试
//!
//! 验证下载去重、校验和检查、超时以及失败后的重试

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use std::sync::Arc;
use std::time::Duration;

use bergamot_scheduler::translation::{ResourceCache, TranslationError};
use common::*;
use url::Url;

fn cache(fetcher: &Arc<MemoryFetcher>, timeout: Option<Duration>) -> ResourceCache {
    let base_url = Url::parse(REGISTRY_URL).expect("测试注册表地址应有效");
    ResourceCache::new(fetcher.clone(), base_url, timeout)
}

#[tokio::test]
async fn test_concurrent_gets_share_one_download() {
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.set_delay(Some(Duration::from_millis(20)));
    let model = publish_model(&fetcher, "en", "es");
    let cache = cache(&fetcher, None);

    let (a, b, c) = tokio::join!(cache.get(&model), cache.get(&model), cache.get(&model));
    let a = a.expect("第一次获取应成功");
    let b = b.expect("第二次获取应成功");
    let c = c.expect("第三次获取应成功");

    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&b, &c));

    // 模型、短名单和词表各下载一次
    assert_eq!(fetcher.fetch_count(), 3);
    assert_eq!(fetcher.fetches_of("vocab.enes.spm"), 1);

    let stats = cache.stats();
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.cache_hits, 2);
    assert_eq!(stats.downloads, 3);
    assert_eq!(stats.total_entries, 1);
}

#[tokio::test]
async fn test_files_are_fetched_from_pair_directory() {
    let fetcher = Arc::new(MemoryFetcher::new());
    let model = publish_model(&fetcher, "en", "de");
    let cache = cache(&fetcher, Some(Duration::from_secs(5)));

    cache.get(&model).await.expect("下载应成功");

    let mut calls = fetcher.calls();
    calls.sort();
    assert_eq!(
        calls,
        vec![
            file_url("en", "de", "lex.50.50.ende.s2t.bin"),
            file_url("en", "de", "model.ende.intgemm.alphas.bin"),
            file_url("en", "de", "vocab.ende.spm"),
        ]
    );
}

#[tokio::test]
async fn test_shared_vocab_downloaded_once() {
    let fetcher = Arc::new(MemoryFetcher::new());
    let model = publish_split_vocab_model(&fetcher, "en", "uk");
    let cache = cache(&fetcher, None);

    let bundle = cache.get(&model).await.expect("下载应成功");

    assert_eq!(fetcher.fetches_of("vocab.enuk.spm"), 1);
    assert_eq!(bundle.vocabs.len(), 2);
    assert!(Arc::ptr_eq(&bundle.vocabs[0], &bundle.vocabs[1]));
    assert_eq!(bundle.unique_vocabs().len(), 1);
    assert_eq!(bundle.config["gemm-precision"], "int8shiftAll");
}

#[tokio::test]
async fn test_checksum_mismatch_names_file_and_allows_retry() {
    let fetcher = Arc::new(MemoryFetcher::new());
    let model = publish_model(&fetcher, "en", "fr");
    let lex_url = file_url("en", "fr", "lex.50.50.enfr.s2t.bin");
    let original = b"enfr:lex".to_vec();
    fetcher.put(&lex_url, b"corrupted".to_vec());

    let cache = cache(&fetcher, None);
    let error = cache.get(&model).await.expect_err("校验和不匹配应失败");
    match &error {
        TranslationError::Fetch { file, .. } => assert_eq!(file, "lex.50.50.enfr.s2t.bin"),
        other => panic!("期望 Fetch 错误，得到 {:?}", other),
    }

    // 失败的结果不会被记住
    assert!(cache.is_empty());

    fetcher.put(&lex_url, original);
    let bundle = cache.get(&model).await.expect("修复后应能重新下载");
    assert_eq!(bundle.shortlist.as_slice(), b"enfr:lex");
    assert_eq!(cache.stats().cache_misses, 2);
}

#[tokio::test]
async fn test_missing_file_is_fetch_error() {
    let fetcher = Arc::new(MemoryFetcher::new());
    let model = publish_model(&fetcher, "en", "it");
    fetcher.remove(&file_url("en", "it", "model.enit.intgemm.alphas.bin"));

    let cache = cache(&fetcher, None);
    let error = cache.get(&model).await.expect_err("缺少文件应失败");
    match error {
        TranslationError::Fetch { file, reason } => {
            assert_eq!(file, "model.enit.intgemm.alphas.bin");
            assert!(reason.contains("404"));
        }
        other => panic!("期望 Fetch 错误，得到 {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_download_times_out() {
    let fetcher = Arc::new(MemoryFetcher::new());
    let model = publish_model(&fetcher, "en", "pl");
    fetcher.set_delay(Some(Duration::from_millis(500)));

    let cache = cache(&fetcher, Some(Duration::from_millis(50)));
    let error = cache.get(&model).await.expect_err("应当超时");
    match error {
        TranslationError::Timeout { file, after } => {
            assert!(file.contains("enpl"));
            assert_eq!(after, Duration::from_millis(50));
        }
        other => panic!("期望 Timeout 错误，得到 {:?}", other),
    }
    assert!(!cache.contains(&model.key()));
}

#[tokio::test]
async fn test_no_timeout_waits_for_slow_download() {
    let fetcher = Arc::new(MemoryFetcher::new());
    let model = publish_model(&fetcher, "en", "cs");
    fetcher.set_delay(Some(Duration::from_millis(100)));

    let cache = cache(&fetcher, None);
    let bundle = cache.get(&model).await.expect("不限制超时时应成功");
    assert_eq!(bundle.model.as_slice(), b"encs:model");
}

#[tokio::test]
async fn test_clear_forces_new_download() {
    let fetcher = Arc::new(MemoryFetcher::new());
    let model = publish_model(&fetcher, "en", "et");
    let cache = cache(&fetcher, None);

    cache.get(&model).await.expect("首次下载应成功");
    cache.get(&model).await.expect("缓存命中应成功");
    assert_eq!(fetcher.fetch_count(), 3);

    cache.clear();
    cache.get(&model).await.expect("清空后应重新下载");
    assert_eq!(fetcher.fetch_count(), 6);
    assert_eq!(cache.stats().bytes_downloaded, 2 * ("enet:model".len() + "enet:lex".len() + "enet:vocab".len()) as u64);
}
