use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use flipper_core::service::keys;
use flipper_core::{CacheStore, FetchResult, PageFetcher, WebPage, put_json};
use flipper_data::MemoryStore;
use flipper_events::{Event, EventBus, TaskState};
use flipper_tasks::{
    CacheMode, EngineDeps, EngineOptions, PageSink, PageTask, PageTaskEngine, SinkError,
    TaskKind, TaskRequest, UrlErrorKind, UrlStatus,
};
use flipper_telemetry::Metrics;
use flipper_test_support::fetcher::ScriptedFetcher;
use tokio::sync::Notify;
use tokio::time::timeout;

struct Harness {
    tasks: Arc<MemoryStore>,
    pages: Arc<MemoryStore>,
    events: EventBus,
    metrics: Metrics,
}

impl Harness {
    fn new() -> Self {
        Self {
            tasks: Arc::new(MemoryStore::new()),
            pages: Arc::new(MemoryStore::new()),
            events: EventBus::with_capacity(256),
            metrics: Metrics::new().expect("metrics"),
        }
    }

    fn engine(&self, fetcher: Arc<dyn PageFetcher>) -> PageTaskEngine {
        self.engine_with_sink(fetcher, None)
    }

    fn engine_with_sink(
        &self,
        fetcher: Arc<dyn PageFetcher>,
        sink: Option<Arc<dyn PageSink>>,
    ) -> PageTaskEngine {
        PageTaskEngine::new(
            EngineDeps {
                task_store: self.tasks.clone(),
                page_cache: self.pages.clone(),
                fetcher,
                sink,
                events: self.events.clone(),
                metrics: self.metrics.clone(),
            },
            EngineOptions {
                worker_count: 2,
                retry_backoff: Duration::ZERO,
            },
        )
    }
}

fn urls(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("https://upstream.test/page/{i}"))
        .collect()
}

async fn settle(handle: &flipper_tasks::TaskHandle) -> Result<PageTask> {
    timeout(Duration::from_secs(5), handle.wait())
        .await
        .context("task did not settle in time")
}

#[tokio::test]
async fn one_permanent_failure_yields_partial_failure_and_resume_is_a_no_op() -> Result<()> {
    let harness = Harness::new();
    let targets = urls(10);
    let broken = targets[4].clone();
    let fetcher = Arc::new(ScriptedFetcher::new().broken(&broken));
    let engine = harness.engine(fetcher.clone());

    let request = TaskRequest::new(TaskKind::Generic, "ten pages", targets.clone())
        .sub_task_size(3)
        .max_retries(3);
    let handle = engine.submit(request).await?;
    let task = settle(&handle).await?;

    assert_eq!(task.state, TaskState::PartiallyFailed);
    assert_eq!(task.count(UrlStatus::Done), 9);
    assert_eq!(task.count(UrlStatus::Failed), 1);
    let failed = task
        .entries
        .iter()
        .find(|entry| entry.status == UrlStatus::Failed)
        .context("failed entry")?;
    assert_eq!(failed.url, broken);
    assert_eq!(failed.attempts, 4);
    assert_eq!(failed.last_error_kind, Some(UrlErrorKind::FetchFailed));
    assert_eq!(fetcher.calls(&broken), 4);
    assert_eq!(fetcher.total_calls(), 13);

    // Simulated restart: a fresh engine over the same task store.
    let restarted = harness.engine(fetcher.clone());
    let resumed = restarted.resume(task.id).await?;
    let after = settle(&resumed).await?;
    assert_eq!(after, task);
    assert_eq!(fetcher.total_calls(), 13);
    assert!(restarted.list_unfinished().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn cache_only_on_unfetched_url_fails_with_cache_miss() -> Result<()> {
    let harness = Harness::new();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let engine = harness.engine(fetcher.clone());

    let request = TaskRequest::new(TaskKind::Generic, "cache only", urls(1))
        .cache_mode(CacheMode::CacheOnly);
    let task = settle(&engine.submit(request).await?).await?;

    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.entries[0].status, UrlStatus::Failed);
    assert_eq!(task.entries[0].last_error_kind, Some(UrlErrorKind::CacheMiss));
    assert_eq!(task.entries[0].attempts, 1);
    assert_eq!(fetcher.total_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn resuming_a_succeeded_task_twice_changes_nothing() -> Result<()> {
    let harness = Harness::new();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let engine = harness.engine(fetcher.clone());

    let task = settle(&engine.submit(TaskRequest::new(TaskKind::Generic, "ok", urls(3))).await?)
        .await?;
    assert_eq!(task.state, TaskState::Succeeded);
    let row_before = harness
        .tasks
        .get(&keys::page_task(task.id))
        .await?
        .context("persisted task")?;

    for _ in 0..2 {
        let handle = engine.resume(task.id).await?;
        assert!(handle.is_settled());
        assert_eq!(handle.status(), task);
    }

    let row_after = harness
        .tasks
        .get(&keys::page_task(task.id))
        .await?
        .context("persisted task")?;
    assert_eq!(row_before, row_after);
    assert_eq!(fetcher.total_calls(), 3);
    Ok(())
}

#[tokio::test]
async fn transient_failures_are_retried() -> Result<()> {
    let harness = Harness::new();
    let targets = urls(2);
    let fetcher = Arc::new(ScriptedFetcher::new().failing(&targets[0], 2));
    let engine = harness.engine(fetcher.clone());

    let task = settle(&engine.submit(TaskRequest::new(TaskKind::Generic, "flaky", targets.clone())).await?)
        .await?;
    assert_eq!(task.state, TaskState::Succeeded);
    assert_eq!(task.entries[0].attempts, 3);
    assert_eq!(task.entries[0].last_error, None);
    assert_eq!(fetcher.calls(&targets[0]), 3);
    Ok(())
}

#[tokio::test]
async fn interrupted_task_resumes_without_refetching_done_urls() -> Result<()> {
    let harness = Harness::new();
    let targets = urls(5);
    let mut task = PageTask::from_request(
        TaskRequest::new(TaskKind::Generic, "interrupted", targets.clone()).sub_task_size(2),
    );
    task.state = TaskState::Running;
    task.entries[0].status = UrlStatus::Done;
    task.entries[1].status = UrlStatus::Done;
    task.entries[2].status = UrlStatus::Fetching;
    task.entries[3].status = UrlStatus::RetryQueued;
    put_json(harness.tasks.as_ref(), &keys::page_task(task.id), &task).await?;

    let fetcher = Arc::new(ScriptedFetcher::new());
    let engine = harness.engine(fetcher.clone());
    let unfinished = engine.list_unfinished().await?;
    assert_eq!(unfinished.len(), 1);

    let resumed = settle(&engine.resume(task.id).await?).await?;
    assert_eq!(resumed.state, TaskState::Succeeded);
    assert!(resumed.resumed_at.is_some());
    assert_eq!(fetcher.calls(&targets[0]), 0);
    assert_eq!(fetcher.calls(&targets[1]), 0);
    assert_eq!(fetcher.total_calls(), 3);
    Ok(())
}

#[tokio::test]
async fn cached_pages_are_reused_until_forced_refresh() -> Result<()> {
    let harness = Harness::new();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let engine = harness.engine(fetcher.clone());
    let targets = urls(2);

    settle(&engine.submit(TaskRequest::new(TaskKind::Generic, "warm", targets.clone())).await?)
        .await?;
    settle(&engine.submit(TaskRequest::new(TaskKind::Generic, "again", targets.clone())).await?)
        .await?;
    assert_eq!(fetcher.total_calls(), 2);

    let refresh = TaskRequest::new(TaskKind::Generic, "refresh", targets.clone())
        .cache_mode(CacheMode::ForceRefresh);
    settle(&engine.submit(refresh).await?).await?;
    assert_eq!(fetcher.total_calls(), 4);

    let cutoff = chrono::Utc::now() + chrono::Duration::seconds(60);
    let dated = TaskRequest::new(TaskKind::Generic, "dated", targets.clone())
        .forced_cutoff(cutoff, true);
    settle(&engine.submit(dated).await?).await?;
    assert_eq!(fetcher.total_calls(), 6);

    let kept = TaskRequest::new(TaskKind::Generic, "kept", targets).forced_cutoff(cutoff, false);
    settle(&engine.submit(kept).await?).await?;
    assert_eq!(fetcher.total_calls(), 6);

    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.pages_from_network, 6);
    assert_eq!(snapshot.pages_from_cache, 4);
    Ok(())
}

struct GatedFetcher {
    gate: Notify,
    blocking: AtomicBool,
    calls: AtomicU32,
}

#[async_trait]
impl PageFetcher for GatedFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.blocking.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        Ok(format!("body:{url}"))
    }
}

#[tokio::test]
async fn cancel_finishes_the_running_fetch_and_keeps_the_rest_queued() -> Result<()> {
    let harness = Harness::new();
    let fetcher = Arc::new(GatedFetcher {
        gate: Notify::new(),
        blocking: AtomicBool::new(true),
        calls: AtomicU32::new(0),
    });
    let engine = harness.engine(fetcher.clone());

    let request = TaskRequest::new(TaskKind::Generic, "slow", urls(4)).sub_task_size(4);
    let handle = engine.submit(request).await?;
    timeout(Duration::from_secs(5), async {
        while fetcher.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .context("fetch never started")?;

    assert!(engine.cancel(handle.id()).await?);
    assert!(!handle.is_settled());
    fetcher.blocking.store(false, Ordering::SeqCst);
    fetcher.gate.notify_one();

    let cancelled = settle(&handle).await?;
    assert_eq!(cancelled.state, TaskState::Cancelled);
    assert!(cancelled.cancelled);
    assert_eq!(cancelled.entries[0].status, UrlStatus::Done);
    assert_eq!(cancelled.entries[0].attempts, 1);
    assert_eq!(cancelled.count(UrlStatus::Queued), 3);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert!(!engine.cancel(handle.id()).await?);

    let resumed = settle(&engine.resume(handle.id()).await?).await?;
    assert_eq!(resumed.state, TaskState::Succeeded);
    assert!(!resumed.cancelled);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);
    Ok(())
}

#[tokio::test]
async fn shutdown_leaves_tasks_pending_for_the_next_start() -> Result<()> {
    let harness = Harness::new();
    let fetcher = Arc::new(GatedFetcher {
        gate: Notify::new(),
        blocking: AtomicBool::new(true),
        calls: AtomicU32::new(0),
    });
    let engine = harness.engine(fetcher.clone());

    let mut ids = Vec::new();
    for name in ["first", "second"] {
        let request = TaskRequest::new(TaskKind::Generic, name, urls(3)).sub_task_size(3);
        ids.push(engine.submit(request).await?.id());
    }
    timeout(Duration::from_secs(5), async {
        while fetcher.calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .context("fetches never started")?;

    fetcher.blocking.store(false, Ordering::SeqCst);
    let shutdown = engine.shutdown();
    tokio::pin!(shutdown);
    let stopped = timeout(Duration::from_secs(5), async {
        loop {
            tokio::select! {
                stopped = &mut shutdown => return stopped,
                () = tokio::time::sleep(Duration::from_millis(5)) => fetcher.gate.notify_waiters(),
            }
        }
    })
    .await
    .context("shutdown did not finish")?;
    assert_eq!(stopped, 2);

    let unfinished = engine.list_unfinished().await?;
    assert_eq!(unfinished.len(), 2);
    for task in &unfinished {
        assert_eq!(task.state, TaskState::Pending);
        assert!(!task.cancelled);
        assert_eq!(task.count(UrlStatus::Done), 1);
        assert_eq!(task.count(UrlStatus::Queued), 2);
    }

    let restarted = harness.engine(fetcher.clone());
    for id in ids {
        let task = settle(&restarted.resume(id).await?).await?;
        assert_eq!(task.state, TaskState::Succeeded);
    }
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 6);
    Ok(())
}

struct RejectingSink {
    rejections: AtomicU32,
}

#[async_trait]
impl PageSink for RejectingSink {
    async fn accept(&self, _kind: TaskKind, page: &WebPage) -> Result<(), SinkError> {
        if self.rejections.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(SinkError {
                url: page.url.clone(),
                reason: "unparsable page".into(),
            });
        }
        Ok(())
    }
}

#[tokio::test]
async fn sink_rejections_count_as_retryable_failures() -> Result<()> {
    let harness = Harness::new();
    let sink = Arc::new(RejectingSink {
        rejections: AtomicU32::new(0),
    });
    let engine = harness.engine_with_sink(Arc::new(ScriptedFetcher::new()), Some(sink.clone()));

    let task = settle(&engine.submit(TaskRequest::new(TaskKind::Fandom, "parse", urls(1))).await?)
        .await?;
    assert_eq!(task.state, TaskState::Succeeded);
    assert_eq!(task.entries[0].attempts, 2);
    assert_eq!(sink.rejections.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn progress_and_state_events_are_published() -> Result<()> {
    let harness = Harness::new();
    let mut stream = harness.events.subscribe(None);
    let engine = harness.engine(Arc::new(ScriptedFetcher::new()));

    let task = settle(&engine.submit(TaskRequest::new(TaskKind::Generic, "events", urls(2))).await?)
        .await?;

    let mut kinds = Vec::new();
    let mut last_percent = None;
    while kinds.last() != Some(&TaskState::Succeeded) {
        let envelope = timeout(Duration::from_secs(5), stream.next())
            .await
            .context("event stream stalled")?
            .context("event stream closed")?;
        if let Some(percent) = envelope.event.percent() {
            last_percent = Some(percent);
        }
        if let Event::TaskStateChanged { task_id, state } = &envelope.event {
            assert_eq!(*task_id, task.id);
            kinds.push(*state);
        }
    }
    assert_eq!(kinds, [TaskState::Running, TaskState::Succeeded]);
    assert_eq!(last_percent, Some(100));
    Ok(())
}

#[tokio::test]
async fn purge_only_removes_finished_tasks() -> Result<()> {
    let harness = Harness::new();
    let engine = harness.engine(Arc::new(ScriptedFetcher::new()));
    let task = settle(&engine.submit(TaskRequest::new(TaskKind::Generic, "purge", urls(1))).await?)
        .await?;

    assert!(engine.purge(task.id).await?);
    assert!(engine.get(task.id).await?.is_none());
    assert!(!engine.purge(task.id).await?);

    let pending = PageTask::from_request(TaskRequest::new(TaskKind::Generic, "pending", urls(1)));
    put_json(harness.tasks.as_ref(), &keys::page_task(pending.id), &pending).await?;
    assert!(engine.purge(pending.id).await.is_err());
    Ok(())
}

#[tokio::test]
async fn zero_sub_task_size_is_rejected() {
    let harness = Harness::new();
    let engine = harness.engine(Arc::new(ScriptedFetcher::new()));
    let request = TaskRequest::new(TaskKind::Generic, "bad", urls(1)).sub_task_size(0);
    assert!(engine.submit(request).await.is_err());
}
