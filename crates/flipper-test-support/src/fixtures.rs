//! Corpus builders shared by unit and integration tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use flipper_core::service::keys;
use flipper_core::{Author, AuthorId, CacheStore, FandomId, StoryId, StoreResult, Story, put_json};

/// Fixed instant used as "now" by fixtures.
#[must_use]
pub fn reference_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Builder for corpus stories with sensible defaults.
#[derive(Debug, Clone)]
pub struct StoryBuilder {
    story: Story,
}

impl StoryBuilder {
    /// Complete, single-fandom, non-slash story updated a week before [`reference_time`].
    #[must_use]
    pub fn new(id: StoryId) -> Self {
        let updated = reference_time() - Duration::days(7);
        Self {
            story: Story {
                id,
                title: format!("Story {id}"),
                url: format!("https://upstream.test/s/{id}/1/"),
                author_id: id * 100,
                fandom_ids: vec![1],
                words: 10_000,
                published: updated - Duration::days(30),
                updated,
                complete: true,
                slash_level: 0,
                recommendations: 1,
            },
        }
    }

    /// Set the author.
    #[must_use]
    pub const fn author(mut self, author_id: AuthorId) -> Self {
        self.story.author_id = author_id;
        self
    }

    /// Set the fandoms; more than one makes a crossover.
    #[must_use]
    pub fn fandoms(mut self, fandoms: &[FandomId]) -> Self {
        self.story.fandom_ids = fandoms.to_vec();
        self
    }

    /// Set the word count.
    #[must_use]
    pub const fn words(mut self, words: u32) -> Self {
        self.story.words = words;
        self
    }

    /// Set the corpus recommendation count.
    #[must_use]
    pub const fn recommendations(mut self, recommendations: u32) -> Self {
        self.story.recommendations = recommendations;
        self
    }

    /// Set the slash rating.
    #[must_use]
    pub const fn slash(mut self, level: u8) -> Self {
        self.story.slash_level = level;
        self
    }

    /// Mark as incomplete, last updated `days` before [`reference_time`].
    #[must_use]
    pub fn in_progress(mut self, days: i64) -> Self {
        self.story.complete = false;
        self.story.updated = reference_time() - Duration::days(days);
        self
    }

    /// Set the publication time to `days` before [`reference_time`].
    #[must_use]
    pub fn published_days_ago(mut self, days: i64) -> Self {
        self.story.published = reference_time() - Duration::days(days);
        self
    }

    /// Finish the story.
    #[must_use]
    pub fn build(self) -> Story {
        self.story
    }
}

/// Author favouriting the given stories.
#[must_use]
pub fn author(id: AuthorId, favourites: &[StoryId]) -> Author {
    Author {
        id,
        name: format!("author-{id}"),
        url: format!("https://upstream.test/u/{id}/"),
        favourites: favourites.iter().copied().collect(),
        last_update: None,
    }
}

/// `count` stories with ids `1..=count` and descending recommendation counts.
#[must_use]
pub fn numbered_stories(count: i64) -> Vec<Story> {
    (1..=count)
        .map(|id| {
            let recommendations = u32::try_from(count - id + 1).unwrap_or(0);
            StoryBuilder::new(id).recommendations(recommendations).build()
        })
        .collect()
}

/// Write stories and authors into a corpus store.
///
/// # Errors
///
/// Propagates store failures.
pub async fn seed_corpus(
    store: &dyn CacheStore,
    stories: &[Story],
    authors: &[Author],
) -> StoreResult<()> {
    for story in stories {
        put_json(store, &keys::story(story.id), story).await?;
    }
    for author in authors {
        put_json(store, &keys::author(author.id), author).await?;
    }
    Ok(())
}
