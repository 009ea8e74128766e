//! Routes pages fetched by page tasks into the corpus store.

use std::sync::Arc;

use async_trait::async_trait;
use flipper_core::service::keys;
use flipper_core::{CacheStore, PageParser, WebPage, put_json};
use flipper_tasks::{PageSink, SinkError, TaskKind};
use tracing::debug;

/// [`PageSink`] that parses fandom and author pages and stores the records.
pub struct CorpusSink {
    corpus: Arc<dyn CacheStore>,
    parser: Arc<dyn PageParser>,
}

impl CorpusSink {
    /// Sink writing into `corpus`.
    #[must_use]
    pub fn new(corpus: Arc<dyn CacheStore>, parser: Arc<dyn PageParser>) -> Self {
        Self { corpus, parser }
    }

    fn rejected(page: &WebPage, err: &impl std::error::Error) -> SinkError {
        let reason = std::error::Error::source(err)
            .map_or_else(|| err.to_string(), |cause| format!("{err}: {cause}"));
        SinkError {
            url: page.url.clone(),
            reason,
        }
    }
}

#[async_trait]
impl PageSink for CorpusSink {
    async fn accept(&self, kind: TaskKind, page: &WebPage) -> Result<(), SinkError> {
        match kind {
            TaskKind::Fandom => {
                let listing = self
                    .parser
                    .parse_fandom_page(page)
                    .map_err(|err| Self::rejected(page, &err))?;
                for story in &listing.stories {
                    put_json(self.corpus.as_ref(), &keys::story(story.id), story)
                        .await
                        .map_err(|err| Self::rejected(page, &err))?;
                }
                debug!(url = %page.url, stories = listing.stories.len(), "fandom page stored");
            }
            TaskKind::Author => {
                let mut author = self
                    .parser
                    .parse_author_page(page)
                    .map_err(|err| Self::rejected(page, &err))?;
                author.last_update = Some(page.fetched_at);
                put_json(self.corpus.as_ref(), &keys::author(author.id), &author)
                    .await
                    .map_err(|err| Self::rejected(page, &err))?;
                debug!(url = %page.url, author_id = author.id, "author page stored");
            }
            TaskKind::Generic => {}
        }
        Ok(())
    }
}
