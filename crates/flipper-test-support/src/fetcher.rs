//! Scripted upstream used to drive the page task engine in tests.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use flipper_core::{FetchError, FetchResult, PageFetcher};

#[derive(Debug, Clone, Copy)]
enum Script {
    FailTimes(u32),
    AlwaysFail,
}

/// Fetcher that serves `body:<url>` unless a URL is scripted to fail.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, u32>>,
    bodies: Mutex<HashMap<String, String>>,
}

impl ScriptedFetcher {
    /// Fetcher where every URL succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `url` for its first `times` requests.
    #[must_use]
    pub fn failing(self, url: &str, times: u32) -> Self {
        self.script(url, Script::FailTimes(times));
        self
    }

    /// Fail every request for `url`.
    #[must_use]
    pub fn broken(self, url: &str) -> Self {
        self.script(url, Script::AlwaysFail);
        self
    }

    /// Serve `body` for `url` instead of the default body.
    #[must_use]
    pub fn with_body(self, url: &str, body: impl Into<String>) -> Self {
        self.set_body(url, body);
        self
    }

    /// Change the body served for `url` from now on.
    pub fn set_body(&self, url: &str, body: impl Into<String>) {
        self.bodies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_owned(), body.into());
    }

    /// Number of requests made for `url`.
    #[must_use]
    pub fn calls(&self, url: &str) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Number of requests made across every URL.
    #[must_use]
    pub fn total_calls(&self) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    fn script(&self, url: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_owned(), script);
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<String> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = calls.entry(url.to_owned()).or_insert(0);
            *entry += 1;
            *entry
        };
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied();
        let fail = match script {
            Some(Script::AlwaysFail) => true,
            Some(Script::FailTimes(times)) => attempt <= times,
            None => false,
        };
        if fail {
            return Err(FetchError::Status {
                url: url.to_owned(),
                status: 503,
            });
        }
        let body = self
            .bodies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .unwrap_or_else(|| format!("body:{url}"));
        Ok(body)
    }
}
