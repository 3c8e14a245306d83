//! 批量调度器集成测试
//!
//! 覆盖合批、优先级、中转翻译、移除、取消、关闭和执行单元失败

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bergamot_scheduler::translation::worker::{MockCall, MockEngineFactory, MockMode};
use bergamot_scheduler::translation::{
    BatchScheduler, CancellationSignal, ErrorHook, ModelKey, TranslationError, TranslationRequest,
};
use common::*;

fn scheduler(env: &TestEnvironment, batch_size: usize, workers: usize) -> BatchScheduler {
    env.builder(test_config(batch_size, workers))
        .build_batch()
        .expect("调度器应创建成功")
}

fn request(text: &str) -> TranslationRequest {
    TranslationRequest::new("en", "de", text)
}

#[tokio::test]
async fn test_requests_grouped_into_batches_of_configured_size() {
    let env = TestEnvironment::new(&[("en", "de")], MockMode::Suffix);
    let scheduler = scheduler(&env, 2, 1);
    scheduler.get_models("en", "de").await.expect("路径应存在");

    let tickets: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|text| scheduler.translate(request(text)))
        .collect();

    let shape: Vec<_> = scheduler
        .queue_snapshot()
        .iter()
        .map(|batch| (batch.id, batch.len))
        .collect();
    assert_eq!(shape, vec![(1, 2), (2, 1)]);

    let mut texts = Vec::new();
    for ticket in tickets {
        texts.push(ticket.await.expect("翻译应成功").text().to_string());
    }
    assert_eq!(texts, vec!["a [de]", "b [de]", "c [de]"]);

    let log = env.factory.log();
    assert_eq!(log.batch_sizes(), vec![2, 1]);
    // 第二个批次复用已加载的模型
    assert_eq!(log.loads(), 1);
    assert!(scheduler.queue_snapshot().is_empty());
    assert_eq!(scheduler.pool_size(), 1);
}

#[tokio::test]
async fn test_pivot_translation_end_to_end() {
    let env = TestEnvironment::new(&[("en", "es"), ("es", "en"), ("en", "de")], MockMode::Suffix);
    let scheduler = scheduler(&env, 8, 1);

    let response = scheduler
        .translate(TranslationRequest::new("es", "de", "hola"))
        .await
        .expect("中转翻译应成功");

    assert_eq!(response.text(), "hola [en] [de]");
    assert_eq!(response.request.from, "es");
    assert_eq!(response.source.text, "hola");

    let log = env.factory.log();
    assert_eq!(log.pivots(), 1);
    assert_eq!(log.loads(), 2);
    assert!(log.calls().contains(&MockCall::Pivot {
        first: ModelKey::new("es", "en"),
        second: ModelKey::new("en", "de"),
        texts: 1,
    }));

    // 两个模型各下载三个文件
    assert_eq!(scheduler.cache_stats().downloads, 6);
}

#[tokio::test]
async fn test_lower_priority_value_dispatched_first() {
    let env = TestEnvironment::new(&[("en", "de")], MockMode::Upper);
    let scheduler = scheduler(&env, 4, 1);
    scheduler.get_models("en", "de").await.expect("路径应存在");

    let low = scheduler.translate(request("low").with_priority(5));
    let high = scheduler.translate(request("high").with_priority(-1));
    let normal = scheduler.translate(request("normal"));

    let priorities: Vec<_> = scheduler
        .queue_snapshot()
        .iter()
        .map(|batch| batch.priority)
        .collect();
    assert_eq!(priorities, vec![-1, 0, 5]);

    assert_eq!(high.await.expect("高优先级应成功").text(), "HIGH");
    assert_eq!(normal.await.expect("默认优先级应成功").text(), "NORMAL");
    assert_eq!(low.await.expect("低优先级应成功").text(), "LOW");
}

#[tokio::test]
async fn test_unset_and_zero_priority_share_batch() {
    let env = TestEnvironment::new(&[("en", "de")], MockMode::Upper);
    let scheduler = scheduler(&env, 4, 1);
    scheduler.get_models("en", "de").await.expect("路径应存在");

    let a = scheduler.translate(request("a").with_priority(None));
    let b = scheduler.translate(request("b").with_priority(0));

    let snapshot = scheduler.queue_snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].len, 2);
    assert_eq!(snapshot[0].key, "en:de");

    a.await.expect("翻译应成功");
    b.await.expect("翻译应成功");
    assert_eq!(env.factory.log().batch_sizes(), vec![2]);
}

#[tokio::test]
async fn test_remove_rejects_matching_requests() {
    let env = TestEnvironment::new(&[("en", "de")], MockMode::Suffix);
    let scheduler = scheduler(&env, 8, 1);
    scheduler.get_models("en", "de").await.expect("路径应存在");

    let keep_first = scheduler.translate(request("keep 1"));
    let stale = scheduler.translate(request("stale"));
    let keep_second = scheduler.translate(request("keep 2"));

    assert_eq!(scheduler.remove(|r| r.text == "stale"), 1);
    assert_eq!(scheduler.remove(|r| r.text == "missing"), 0);

    let snapshot = scheduler.queue_snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!((snapshot[0].key.as_str(), snapshot[0].priority, snapshot[0].len), ("en:de", 0, 2));

    let error = stale.await.expect_err("被移除的请求应失败");
    assert_eq!(error.removed_request().map(|r| r.text.as_str()), Some("stale"));

    assert_eq!(keep_first.await.expect("保留的请求应成功").text(), "keep 1 [de]");
    assert_eq!(keep_second.await.expect("保留的请求应成功").text(), "keep 2 [de]");
    assert_eq!(env.factory.log().batch_sizes(), vec![2]);
}

#[tokio::test]
async fn test_batch_failure_rejects_every_request() {
    let env = TestEnvironment::new(&[("en", "de")], MockMode::Fail);
    let scheduler = scheduler(&env, 8, 1);
    scheduler.get_models("en", "de").await.expect("路径应存在");

    let first = scheduler.translate(request("one"));
    let second = scheduler.translate(request("two"));

    for ticket in [first, second] {
        match ticket.await {
            Err(TranslationError::Worker { name, .. }) => assert_eq!(name, "MockError"),
            other => panic!("期望 Worker 错误，得到 {:?}", other.map(|r| r.target.text)),
        }
    }

    // 引擎恢复后同一个执行单元继续工作
    env.factory.set_mode(MockMode::Upper);
    let recovered = scheduler.translate(request("three")).await.expect("恢复后应成功");
    assert_eq!(recovered.text(), "THREE");
    assert_eq!(env.factory.engines_created(), 1);
}

#[tokio::test]
async fn test_unknown_pair_rejected_with_no_route() {
    let env = TestEnvironment::new(&[("en", "de")], MockMode::Suffix);
    let scheduler = scheduler(&env, 8, 1);

    let error = scheduler
        .translate(TranslationRequest::new("xx", "yy", "text"))
        .await
        .expect_err("未知语言对应失败");
    assert!(matches!(error, TranslationError::NoRoute { .. }));
    assert_eq!(env.factory.engines_created(), 0);
}

#[tokio::test]
async fn test_cancelled_request_removed_at_dispatch() {
    let env = TestEnvironment::new(&[("en", "de")], MockMode::Suffix);
    let scheduler = scheduler(&env, 8, 1);
    scheduler.get_models("en", "de").await.expect("路径应存在");

    let signal = CancellationSignal::new();
    let cancelled = scheduler.translate(request("never").with_cancellation(signal.clone()));
    let kept = scheduler.translate(request("kept"));
    signal.cancel();

    let error = cancelled.await.expect_err("已取消的请求应失败");
    assert_eq!(error.removed_request().map(|r| r.text.as_str()), Some("never"));
    assert_eq!(kept.await.expect("未取消的请求应成功").text(), "kept [de]");
    assert_eq!(env.factory.log().batch_sizes(), vec![1]);
}

#[tokio::test]
async fn test_delete_rejects_queued_and_later_requests() {
    let env = TestEnvironment::new(&[("en", "de")], MockMode::Suffix);
    let scheduler = scheduler(&env, 8, 1);
    scheduler.get_models("en", "de").await.expect("路径应存在");

    let queued = scheduler.translate(request("queued"));
    scheduler.delete();

    let error = queued.await.expect_err("关闭时排队中的请求应失败");
    assert!(error.removed_request().is_some());

    let late = scheduler.translate(request("late")).await;
    assert!(matches!(late, Err(TranslationError::Closed)));
    assert!(scheduler.queue_snapshot().is_empty());
    assert_eq!(scheduler.pool_size(), 0);
}

#[tokio::test]
async fn test_worker_creation_failure_reported() {
    let failures = Arc::new(AtomicUsize::new(0));
    let hook: ErrorHook = {
        let failures = Arc::clone(&failures);
        Arc::new(move |error: &TranslationError| {
            assert!(matches!(error, TranslationError::WorkerUnavailable(_)));
            failures.fetch_add(1, Ordering::SeqCst);
        })
    };

    let env = TestEnvironment::new(&[("en", "de")], MockMode::Suffix)
        .with_factory(MockEngineFactory::new(MockMode::Suffix).refusing());
    let scheduler = env
        .builder(test_config(8, 1))
        .on_error(hook)
        .build_batch()
        .expect("调度器应创建成功");

    let error = scheduler
        .translate(request("hello"))
        .await
        .expect_err("没有执行单元时应失败");
    assert!(matches!(error, TranslationError::WorkerUnavailable(_)));
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.pool_size(), 0);
}

#[tokio::test]
async fn test_pool_grows_up_to_worker_limit() {
    let env = TestEnvironment::new(&[("en", "de")], MockMode::Suffix);
    let scheduler = scheduler(&env, 1, 2);
    scheduler.get_models("en", "de").await.expect("路径应存在");

    let tickets: Vec<_> = (0..4)
        .map(|i| scheduler.translate(request(&format!("text {}", i))))
        .collect();
    assert_eq!(scheduler.queue_snapshot().len(), 4);

    for ticket in tickets {
        ticket.await.expect("翻译应成功");
    }

    assert_eq!(env.factory.engines_created(), 2);
    assert_eq!(scheduler.pool_size(), 2);
    assert_eq!(env.factory.log().batch_sizes(), vec![1, 1, 1, 1]);
}

#[tokio::test]
async fn test_quality_scores_returned_when_requested() {
    let env = TestEnvironment::new(&[("en", "de")], MockMode::Suffix);
    let scheduler = scheduler(&env, 8, 1);

    let response = scheduler
        .translate(request("score me").with_quality_scores(true))
        .await
        .expect("翻译应成功");
    let quality = response.quality.expect("应返回质量分数");
    assert_eq!(quality.len(), 1);
    assert!(response.request.quality_scores);
}

#[tokio::test]
async fn test_failed_spawn_not_retried_while_unit_busy() {
    let failures = Arc::new(AtomicUsize::new(0));
    let hook: ErrorHook = {
        let failures = Arc::clone(&failures);
        Arc::new(move |_: &TranslationError| {
            failures.fetch_add(1, Ordering::SeqCst);
        })
    };

    // 只允许创建一个引擎，第二个执行单元始终创建失败
    let factory = MockEngineFactory::new(MockMode::Suffix)
        .with_limit(1)
        .with_delay(Duration::from_millis(100));
    let env = TestEnvironment::new(&[("en", "de")], MockMode::Suffix).with_factory(factory);
    let scheduler = env
        .builder(test_config(1, 2))
        .on_error(hook)
        .build_batch()
        .expect("调度器应创建成功");
    scheduler.get_models("en", "de").await.expect("路径应存在");

    let first = scheduler.translate(request("first"));
    let second = scheduler.translate(request("second"));

    assert_eq!(first.await.expect("第一个请求应成功").text(), "first [de]");
    assert_eq!(second.await.expect("第二个请求应成功").text(), "second [de]");

    // 失败后不在忙碌期间反复重建执行单元
    assert_eq!(env.factory.attempts(), 2);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.pool_size(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unresolved_requests_dispatched_in_submission_order() {
    let env = TestEnvironment::new(&[("en", "de")], MockMode::Suffix);
    let scheduler = scheduler(&env, 1, 1);

    let texts: Vec<String> = (0..40).map(|i| format!("{:02}", i)).collect();
    let tickets: Vec<_> = texts
        .iter()
        .map(|text| scheduler.translate(request(text)))
        .collect();

    for (ticket, text) in tickets.into_iter().zip(&texts) {
        let response = ticket.await.expect("翻译应成功");
        assert_eq!(response.text(), format!("{} [de]", text));
    }

    // 同优先级的请求按提交顺序送达引擎
    assert_eq!(env.factory.log().translated_texts(), texts);
    assert_eq!(env.factory.engines_created(), 1);
}

#[tokio::test]
async fn test_short_reply_kills_unit_and_pool_replaces_it() {
    let env = TestEnvironment::new(&[("en", "de")], MockMode::Short);
    let scheduler = scheduler(&env, 2, 1);
    scheduler.get_models("en", "de").await.expect("路径应存在");

    let first = scheduler.translate(request("one"));
    let second = scheduler.translate(request("two"));

    for ticket in [first, second] {
        let error = ticket.await.expect_err("回复数量不符时应失败");
        assert!(matches!(error, TranslationError::Protocol { .. }), "{:?}", error);
    }
    // 失效的执行单元被移出调度池
    assert_eq!(scheduler.pool_size(), 0);

    env.factory.set_mode(MockMode::Suffix);
    let recovered = scheduler
        .translate(request("three"))
        .await
        .expect("新的执行单元应完成翻译");
    assert_eq!(recovered.text(), "three [de]");
    assert_eq!(env.factory.engines_created(), 2);
    assert_eq!(scheduler.pool_size(), 1);
}
