//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters/gauges relevant to the crawl engine and retrieval.

use std::sync::Arc;

use prometheus::{
    Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder, core::Collector,
};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Where a fetched page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    /// Served from the page cache.
    Cache,
    /// Fetched from upstream.
    Network,
}

impl FetchOrigin {
    const fn label(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Network => "network",
        }
    }
}

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    pages_fetched_total: IntCounterVec,
    fetch_failures_total: IntCounterVec,
    tasks_finished_total: IntCounterVec,
    retrievals_total: IntCounterVec,
    active_tasks: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Pages served from the cache.
    pub pages_from_cache: u64,
    /// Pages fetched from upstream.
    pub pages_from_network: u64,
    /// Page tasks currently executing.
    pub active_tasks: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let pages_fetched_total = counter_vec(
            "flipper_pages_fetched_total",
            "Pages delivered to page tasks by origin",
            &["origin"],
        )?;
        let fetch_failures_total = counter_vec(
            "flipper_fetch_failures_total",
            "Per-URL fetch failures by kind",
            &["kind"],
        )?;
        let tasks_finished_total = counter_vec(
            "flipper_tasks_finished_total",
            "Page tasks reaching a final state",
            &["state"],
        )?;
        let retrievals_total = counter_vec(
            "flipper_retrievals_total",
            "Retrieval calls by operation and outcome",
            &["operation", "outcome"],
        )?;
        let active_tasks = IntGauge::with_opts(Opts::new(
            "flipper_active_tasks",
            "Page tasks currently executing",
        ))
        .map_err(|source| TelemetryError::Collector {
            name: "flipper_active_tasks",
            source,
        })?;

        register(&registry, "flipper_pages_fetched_total", &pages_fetched_total)?;
        register(&registry, "flipper_fetch_failures_total", &fetch_failures_total)?;
        register(&registry, "flipper_tasks_finished_total", &tasks_finished_total)?;
        register(&registry, "flipper_retrievals_total", &retrievals_total)?;
        register(&registry, "flipper_active_tasks", &active_tasks)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                pages_fetched_total,
                fetch_failures_total,
                tasks_finished_total,
                retrievals_total,
                active_tasks,
            }),
        })
    }

    /// Count a page delivered to a task.
    pub fn inc_page_fetched(&self, origin: FetchOrigin) {
        self.inner
            .pages_fetched_total
            .with_label_values(&[origin.label()])
            .inc();
    }

    /// Count a failed fetch attempt.
    pub fn inc_fetch_failure(&self, kind: &str) {
        self.inner
            .fetch_failures_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Count a task reaching a final state.
    pub fn inc_task_finished(&self, state: &str) {
        self.inner
            .tasks_finished_total
            .with_label_values(&[state])
            .inc();
    }

    /// Count a retrieval call.
    pub fn inc_retrieval(&self, operation: &str, outcome: &str) {
        self.inner
            .retrievals_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    /// Track a task starting execution.
    pub fn task_started(&self) {
        self.inner.active_tasks.inc();
    }

    /// Track a task leaving execution.
    pub fn task_stopped(&self) {
        self.inner.active_tasks.dec();
    }

    /// Capture a snapshot of the most relevant metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let fetched = &self.inner.pages_fetched_total;
        MetricsSnapshot {
            pages_from_cache: fetched.with_label_values(&["cache"]).get(),
            pages_from_network: fetched.with_label_values(&["network"]).get(),
            active_tasks: self.inner.active_tasks.get(),
        }
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn render(&self) -> Result<String> {
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::Exposition { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::ExpositionUtf8 { source })
    }
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::Collector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::Register { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_render_and_snapshot() {
        let metrics = Metrics::new().unwrap();
        metrics.inc_page_fetched(FetchOrigin::Cache);
        metrics.inc_page_fetched(FetchOrigin::Network);
        metrics.inc_page_fetched(FetchOrigin::Network);
        metrics.inc_fetch_failure("fetch_failed");
        metrics.inc_task_finished("succeeded");
        metrics.inc_retrieval("fetch_data", "ok");
        metrics.task_started();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pages_from_cache, 1);
        assert_eq!(snapshot.pages_from_network, 2);
        assert_eq!(snapshot.active_tasks, 1);

        metrics.task_stopped();
        let rendered = metrics.render().unwrap();
        assert!(rendered.contains("flipper_pages_fetched_total"));
        assert!(rendered.contains("origin=\"network\""));
        assert!(rendered.contains("flipper_fetch_failures_total"));
        assert!(rendered.contains("flipper_active_tasks 0"));
    }
}
