//! Worker pool, task lifecycle and handles.
//!
//! # Design
//! - Each task is split into sub-tasks of `sub_task_size` URLs; sub-tasks run
//!   concurrently, bounded by a shared semaphore, and fetch their URLs in order.
//! - Task state lives behind a per-task async mutex; every transition is
//!   persisted and published on a watch channel before the lock is released.
//! - Cancellation is cooperative: a fetch already under way runs to
//!   completion, and the token is checked only before starting a URL or a
//!   retry. URLs not yet started stay queued for a later resume.
//! - Every task token is a child of the engine's shutdown token. A task
//!   stopped by [`PageTaskEngine::shutdown`] is left pending, not cancelled,
//!   so the next process resumes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use flipper_core::service::keys;
use flipper_core::{CacheStore, PageFetcher, WebPage, get_json, list_json, put_json};
use flipper_events::{Event, EventBus, TaskState};
use flipper_telemetry::{FetchOrigin, Metrics};
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CachePolicy, PageCache, resolve};
use crate::error::{SinkError, TaskError, TaskResult, UrlError};
use crate::model::{PageTask, TaskKind, TaskRequest, UrlErrorKind, UrlStatus};

/// Receives every page a task obtains, before the URL is marked done.
#[async_trait]
pub trait PageSink: Send + Sync {
    /// Ingest a page; an error fails the attempt like a network error.
    async fn accept(&self, kind: TaskKind, page: &WebPage) -> Result<(), SinkError>;
}

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Sub-tasks executing at the same time.
    pub worker_count: usize,
    /// Delay before retrying a failed URL.
    pub retry_backoff: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            worker_count: 4,
            retry_backoff: Duration::ZERO,
        }
    }
}

/// Collaborators the engine is built from.
pub struct EngineDeps {
    /// Store persisting task state.
    pub task_store: Arc<dyn CacheStore>,
    /// Store holding cached pages.
    pub page_cache: Arc<dyn CacheStore>,
    /// Upstream fetcher.
    pub fetcher: Arc<dyn PageFetcher>,
    /// Optional page consumer.
    pub sink: Option<Arc<dyn PageSink>>,
    /// Notification bus.
    pub events: EventBus,
    /// Metrics registry.
    pub metrics: Metrics,
}

/// Handle to a submitted or resumed task.
#[derive(Clone)]
pub struct TaskHandle {
    id: Uuid,
    status: watch::Receiver<PageTask>,
    token: CancellationToken,
}

impl TaskHandle {
    fn settled(task: PageTask) -> Self {
        let id = task.id;
        let (_, status) = watch::channel(task);
        Self {
            id,
            status,
            token: CancellationToken::new(),
        }
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Latest task snapshot.
    #[must_use]
    pub fn status(&self) -> PageTask {
        self.status.borrow().clone()
    }

    /// Whether the task has stopped.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.status.borrow().is_settled()
    }

    /// Wait until the task stops and return its final snapshot.
    pub async fn wait(&self) -> PageTask {
        let mut status = self.status.clone();
        if let Ok(task) = status.wait_for(PageTask::is_settled).await {
            return task.clone();
        }
        status.borrow().clone()
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// Resumable crawl-and-cache engine.
#[derive(Clone)]
pub struct PageTaskEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    tasks: Arc<dyn CacheStore>,
    cache: PageCache,
    fetcher: Arc<dyn PageFetcher>,
    sink: Option<Arc<dyn PageSink>>,
    events: EventBus,
    metrics: Metrics,
    workers: Arc<Semaphore>,
    retry_backoff: Duration,
    running: StdMutex<HashMap<Uuid, TaskHandle>>,
    shutdown: CancellationToken,
}

impl PageTaskEngine {
    /// Build an engine.
    #[must_use]
    pub fn new(deps: EngineDeps, options: EngineOptions) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                tasks: deps.task_store,
                cache: PageCache::new(deps.page_cache),
                fetcher: deps.fetcher,
                sink: deps.sink,
                events: deps.events,
                metrics: deps.metrics,
                workers: Arc::new(Semaphore::new(options.worker_count.max(1))),
                retry_backoff: options.retry_backoff,
                running: StdMutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Persist a new task and start executing it.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero sub-task size or when the task cannot be persisted.
    pub async fn submit(&self, request: TaskRequest) -> TaskResult<TaskHandle> {
        if request.sub_task_size == 0 {
            return Err(TaskError::InvalidRequest {
                reason: "sub_task_size_zero",
            });
        }
        let task = PageTask::from_request(request);
        self.persist(&task, "submit").await?;
        info!(
            task_id = %task.id,
            urls = task.entries.len(),
            sub_task_size = task.sub_task_size,
            cache_mode = ?task.cache_mode,
            "page task submitted"
        );
        self.inner.events.publish(Event::TaskSubmitted {
            task_id: task.id,
            comment: task.comment.clone(),
            total: task.entries.len(),
        });
        Ok(self.launch(task))
    }

    /// Continue a persisted task; finished URLs are never fetched again.
    ///
    /// Resuming a task in a final state returns a settled handle and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] for unknown tasks and store errors.
    pub async fn resume(&self, task_id: Uuid) -> TaskResult<TaskHandle> {
        if let Some(handle) = self.running_handle(task_id) {
            return Ok(handle);
        }
        let mut task = self
            .load(task_id)
            .await?
            .ok_or(TaskError::NotFound { task_id })?;
        if task.state.is_terminal() {
            debug!(task_id = %task_id, state = task.state.as_str(), "resume of finished task ignored");
            return Ok(TaskHandle::settled(task));
        }

        let requeued = task.requeue_interrupted();
        task.cancelled = false;
        task.state = TaskState::Pending;
        task.resumed_at = Some(Utc::now());
        self.persist(&task, "resume").await?;
        info!(
            task_id = %task_id,
            requeued,
            remaining = task.count(UrlStatus::Queued),
            "page task resumed"
        );
        self.inner.events.publish(Event::TaskSubmitted {
            task_id,
            comment: task.comment.clone(),
            total: task.entries.len(),
        });
        Ok(self.launch(task))
    }

    /// Cancel a task; queued URLs stay queued for a later resume.
    ///
    /// Returns `false` when the task had already stopped.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] for unknown tasks and store errors.
    pub async fn cancel(&self, task_id: Uuid) -> TaskResult<bool> {
        if let Some(handle) = self.running_handle(task_id) {
            handle.cancel();
            return Ok(true);
        }
        let mut task = self
            .load(task_id)
            .await?
            .ok_or(TaskError::NotFound { task_id })?;
        if task.is_settled() {
            return Ok(false);
        }
        task.requeue_interrupted();
        task.cancelled = true;
        task.state = TaskState::Cancelled;
        self.persist(&task, "cancel").await?;
        self.inner.events.publish(Event::TaskStateChanged {
            task_id,
            state: TaskState::Cancelled,
        });
        Ok(true)
    }

    /// Stop every running task and wait for fetches already under way.
    ///
    /// Interrupted tasks are persisted as pending with their unstarted URLs
    /// queued, so they are picked up by the next `list_unfinished`. Returns
    /// the number of tasks interrupted.
    pub async fn shutdown(&self) -> usize {
        let running: Vec<TaskHandle> = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|handle| !handle.is_settled())
            .cloned()
            .collect();
        self.inner.shutdown.cancel();
        for handle in &running {
            handle.wait().await;
        }
        info!(tasks = running.len(), "page task engine stopped");
        running.len()
    }

    /// Latest snapshot of a task.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get(&self, task_id: Uuid) -> TaskResult<Option<PageTask>> {
        if let Some(handle) = self.running_handle(task_id) {
            return Ok(Some(handle.status()));
        }
        self.load(task_id).await
    }

    /// Persisted tasks that have not reached a final state, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_unfinished(&self) -> TaskResult<Vec<PageTask>> {
        let mut tasks: Vec<PageTask> =
            list_json(self.inner.tasks.as_ref(), keys::PAGE_TASK_PREFIX)
                .await
                .map_err(|source| TaskError::Store {
                    operation: "list_unfinished",
                    source,
                })?;
        tasks.retain(|task| !task.state.is_terminal());
        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }

    /// Delete a finished task's record.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidState`] for tasks that have not finished
    /// and propagates store failures.
    pub async fn purge(&self, task_id: Uuid) -> TaskResult<bool> {
        let Some(task) = self.load(task_id).await? else {
            return Ok(false);
        };
        if !task.state.is_terminal() {
            return Err(TaskError::InvalidState {
                operation: "purge",
                task_id,
            });
        }
        self.inner
            .tasks
            .delete(&keys::page_task(task_id))
            .await
            .map_err(|source| TaskError::Store {
                operation: "purge",
                source,
            })
    }

    fn running_handle(&self, task_id: Uuid) -> Option<TaskHandle> {
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task_id)
            .filter(|handle| !handle.is_settled())
            .cloned()
    }

    async fn load(&self, task_id: Uuid) -> TaskResult<Option<PageTask>> {
        get_json(self.inner.tasks.as_ref(), &keys::page_task(task_id))
            .await
            .map_err(|source| TaskError::Store {
                operation: "load",
                source,
            })
    }

    async fn persist(&self, task: &PageTask, operation: &'static str) -> TaskResult<()> {
        put_json(self.inner.tasks.as_ref(), &keys::page_task(task.id), task)
            .await
            .map_err(|source| TaskError::Store { operation, source })
    }

    fn launch(&self, task: PageTask) -> TaskHandle {
        let token = self.inner.shutdown.child_token();
        let (sender, receiver) = watch::channel(task.clone());
        let handle = TaskHandle {
            id: task.id,
            status: receiver,
            token: token.clone(),
        };
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.id, handle.clone());
        tokio::spawn(run_task(Arc::clone(&self.inner), task, token, sender));
        handle
    }
}

struct TaskCell {
    task: Mutex<PageTask>,
    status: watch::Sender<PageTask>,
    store: Arc<dyn CacheStore>,
}

impl TaskCell {
    async fn update<R>(&self, apply: impl FnOnce(&mut PageTask) -> R) -> R {
        let mut task = self.task.lock().await;
        let result = apply(&mut task);
        if let Err(err) = put_json(self.store.as_ref(), &keys::page_task(task.id), &*task).await {
            warn!(task_id = %task.id, error = %err, "failed to persist page task state");
        }
        self.status.send_replace(task.clone());
        result
    }

    async fn read<R>(&self, view: impl FnOnce(&PageTask) -> R) -> R {
        let task = self.task.lock().await;
        view(&task)
    }
}

struct UrlJob {
    index: usize,
    url: String,
    policy: CachePolicy,
    kind: TaskKind,
    max_retries: u32,
    task_id: Uuid,
}

async fn run_task(
    inner: Arc<EngineInner>,
    task: PageTask,
    token: CancellationToken,
    status: watch::Sender<PageTask>,
) {
    let task_id = task.id;
    inner.metrics.task_started();
    let cell = Arc::new(TaskCell {
        task: Mutex::new(task),
        status,
        store: Arc::clone(&inner.tasks),
    });

    let (pending, sub_task_size) = cell
        .update(|task| {
            task.state = TaskState::Running;
            let pending: Vec<usize> = task
                .entries
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.status == UrlStatus::Queued)
                .map(|(index, _)| index)
                .collect();
            (pending, task.sub_task_size.max(1))
        })
        .await;
    inner.events.publish(Event::TaskStateChanged {
        task_id,
        state: TaskState::Running,
    });

    let mut sub_tasks = JoinSet::new();
    for chunk in pending.chunks(sub_task_size) {
        sub_tasks.spawn(run_sub_task(
            Arc::clone(&inner),
            Arc::clone(&cell),
            chunk.to_vec(),
            token.clone(),
        ));
    }
    while let Some(joined) = sub_tasks.join_next().await {
        if let Err(err) = joined {
            warn!(task_id = %task_id, error = %err, "sub-task aborted");
        }
    }

    let stopped = token.is_cancelled();
    let interrupted = inner.shutdown.is_cancelled();
    let (state, done, failed) = cell
        .update(|task| {
            let unfinished = task.entries.iter().any(|entry| !entry.status.is_terminal());
            if stopped && unfinished {
                task.requeue_interrupted();
                if interrupted {
                    task.state = TaskState::Pending;
                } else {
                    task.cancelled = true;
                    task.state = TaskState::Cancelled;
                }
            } else {
                task.state = task.outcome();
                task.finished_at = Some(Utc::now());
            }
            (
                task.state,
                task.count(UrlStatus::Done),
                task.count(UrlStatus::Failed),
            )
        })
        .await;

    info!(task_id = %task_id, state = state.as_str(), done, failed, "page task stopped");
    if state != TaskState::Pending {
        inner.metrics.inc_task_finished(state.as_str());
    }
    inner.metrics.task_stopped();
    inner
        .events
        .publish(Event::TaskStateChanged { task_id, state });
    // A resume may already have registered a fresh handle for this id.
    let mut running = inner.running.lock().unwrap_or_else(PoisonError::into_inner);
    if interrupted || running.get(&task_id).is_some_and(TaskHandle::is_settled) {
        running.remove(&task_id);
    }
}

async fn run_sub_task(
    inner: Arc<EngineInner>,
    cell: Arc<TaskCell>,
    indices: Vec<usize>,
    token: CancellationToken,
) {
    let permit = tokio::select! {
        biased;
        () = token.cancelled() => return,
        permit = Arc::clone(&inner.workers).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };

    for index in indices {
        if token.is_cancelled() {
            break;
        }
        let job = cell
            .read(|task| {
                task.entries.get(index).map(|entry| UrlJob {
                    index,
                    url: entry.url.clone(),
                    policy: CachePolicy::of(task),
                    kind: task.kind,
                    max_retries: task.max_retries,
                    task_id: task.id,
                })
            })
            .await;
        if let Some(job) = job {
            process_url(&inner, &cell, &job, &token).await;
        }
    }
    drop(permit);
}

async fn process_url(inner: &EngineInner, cell: &TaskCell, job: &UrlJob, token: &CancellationToken) {
    let index = job.index;
    loop {
        let attempts = cell
            .update(|task| {
                task.entries.get_mut(index).map_or(0, |entry| {
                    entry.status = UrlStatus::Fetching;
                    entry.attempts += 1;
                    entry.attempts
                })
            })
            .await;

        match fetch_and_ingest(inner, job).await {
            Ok(origin) => {
                inner.metrics.inc_page_fetched(origin);
                let (finished, total) = cell
                    .update(|task| {
                        if let Some(entry) = task.entries.get_mut(index) {
                            entry.status = UrlStatus::Done;
                            entry.last_error = None;
                            entry.last_error_kind = None;
                        }
                        (task.finished_count(), task.entries.len())
                    })
                    .await;
                inner.events.publish(Event::TaskProgress {
                    task_id: job.task_id,
                    finished,
                    total,
                });
                return;
            }
            Err(err) => {
                let kind = err.kind();
                let reason = err.describe();
                inner.metrics.inc_fetch_failure(kind.as_str());
                let retry = kind == UrlErrorKind::FetchFailed && attempts <= job.max_retries;
                let status = if retry {
                    UrlStatus::RetryQueued
                } else {
                    UrlStatus::Failed
                };
                let (finished, total) = cell
                    .update(|task| {
                        if let Some(entry) = task.entries.get_mut(index) {
                            entry.status = status;
                            entry.last_error_kind = Some(kind);
                            entry.last_error = Some(reason.clone());
                        }
                        (task.finished_count(), task.entries.len())
                    })
                    .await;

                if retry {
                    debug!(task_id = %job.task_id, url = %job.url, attempts, "retrying page fetch");
                    if !inner.retry_backoff.is_zero() {
                        tokio::select! {
                            biased;
                            () = token.cancelled() => return,
                            () = tokio::time::sleep(inner.retry_backoff) => {}
                        }
                    }
                    if token.is_cancelled() {
                        return;
                    }
                    continue;
                }

                warn!(
                    task_id = %job.task_id,
                    url = %job.url,
                    attempts,
                    kind = kind.as_str(),
                    reason = %reason,
                    "page fetch failed"
                );
                inner.events.publish(Event::UrlFailed {
                    task_id: job.task_id,
                    url: job.url.clone(),
                    reason,
                });
                inner.events.publish(Event::TaskProgress {
                    task_id: job.task_id,
                    finished,
                    total,
                });
                return;
            }
        }
    }
}

async fn fetch_and_ingest(inner: &EngineInner, job: &UrlJob) -> Result<FetchOrigin, UrlError> {
    let (page, origin) = resolve(&inner.cache, inner.fetcher.as_ref(), &job.url, job.policy).await?;
    if let Some(sink) = &inner.sink {
        sink.accept(job.kind, &page)
            .await
            .map_err(UrlError::Rejected)?;
    }
    Ok(origin)
}
