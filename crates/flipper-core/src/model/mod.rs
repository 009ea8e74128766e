//! Corpus records, fetched pages, and user preference snapshots.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::SlashFilter;

/// Identifier of a story in the corpus.
pub type StoryId = i64;
/// Identifier of a fandom in the corpus.
pub type FandomId = i64;
/// Identifier of an author in the corpus.
pub type AuthorId = i64;

/// A story record as stored in the corpus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Story {
    /// Corpus identifier.
    pub id: StoryId,
    /// Display title.
    pub title: String,
    /// Upstream URL of the story.
    pub url: String,
    /// Author identifier.
    pub author_id: AuthorId,
    /// Fandoms the story belongs to; more than one marks a crossover.
    pub fandom_ids: Vec<FandomId>,
    /// Word count.
    pub words: u32,
    /// Publication time.
    pub published: DateTime<Utc>,
    /// Time of the last update.
    pub updated: DateTime<Utc>,
    /// Whether the story is marked complete.
    pub complete: bool,
    /// Slash rating: 0 for none, higher values for stronger signals.
    #[serde(default)]
    pub slash_level: u8,
    /// Number of times the story was recommended across the corpus.
    #[serde(default)]
    pub recommendations: u32,
}

impl Story {
    /// Whether the story spans more than one fandom.
    #[must_use]
    pub fn is_crossover(&self) -> bool {
        self.fandom_ids.len() > 1
    }

    /// Whether the story belongs to the given fandom.
    #[must_use]
    pub fn in_fandom(&self, fandom: FandomId) -> bool {
        self.fandom_ids.contains(&fandom)
    }
}

/// A story together with the score it was ranked by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoredStory {
    /// Story record.
    pub story: Story,
    /// Match count from the user's recommendations, or the corpus recommendation count.
    pub score: u32,
}

/// A fandom record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fandom {
    /// Corpus identifier.
    pub id: FandomId,
    /// Display name.
    pub name: String,
    /// Listing URL crawled to refresh the fandom.
    pub url: String,
    /// Whether the fandom is refreshed by tracked-fandom crawls.
    #[serde(default)]
    pub tracked: bool,
    /// Last time the listing was crawled.
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

/// An author record with the stories they favourited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    /// Corpus identifier.
    pub id: AuthorId,
    /// Display name.
    pub name: String,
    /// Profile URL.
    pub url: String,
    /// Stories the author marked as favourites.
    #[serde(default)]
    pub favourites: BTreeSet<StoryId>,
    /// Last time the profile was crawled.
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

/// Stories extracted from a fandom listing page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FandomPage {
    /// Stories listed on the page.
    pub stories: Vec<Story>,
}

/// A fetched upstream page handed to parsers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebPage {
    /// Page URL.
    pub url: String,
    /// Raw body.
    pub content: String,
    /// When the body was fetched from upstream.
    pub fetched_at: DateTime<Utc>,
    /// Whether the body was served from the page cache.
    pub from_cache: bool,
}

/// Page cache row payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedPage {
    /// Page URL.
    pub url: String,
    /// Raw body.
    pub content: String,
    /// When the body was fetched from upstream.
    pub fetched_at: DateTime<Utc>,
}

impl CachedPage {
    /// Convert into a [`WebPage`] marked as served from cache.
    #[must_use]
    pub fn into_page(self) -> WebPage {
        WebPage {
            url: self.url,
            content: self.content,
            fetched_at: self.fetched_at,
            from_cache: true,
        }
    }
}

/// Parameters steering how a recommendation list is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationParams {
    /// List name; also the storage key.
    pub name: String,
    /// Minimum number of source fics an author must share to be considered.
    pub min_tag_count_match: u32,
    /// Authors sharing at least this many source fics are always picked.
    pub always_pick_at: u32,
    /// Maximum favourites-to-matches ratio for authors below the always-pick threshold.
    pub pick_ratio: f64,
    /// Source fics the list is derived from.
    pub sources: BTreeSet<StoryId>,
}

impl RecommendationParams {
    /// Parameters with the default pick thresholds.
    #[must_use]
    pub fn new(name: impl Into<String>, sources: BTreeSet<StoryId>) -> Self {
        Self {
            name: name.into(),
            min_tag_count_match: 1,
            always_pick_at: 5,
            pick_ratio: 50.0,
            sources,
        }
    }
}

/// A persisted recommendation list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationList {
    /// Parameters the list was built with.
    pub params: RecommendationParams,
    /// Story id to match count.
    pub matches: std::collections::BTreeMap<StoryId, u32>,
    /// Authors that contributed to the list.
    pub authors: BTreeSet<AuthorId>,
    /// When the list was last rebuilt.
    pub built_at: DateTime<Utc>,
}

/// A fandom reference inside a user's filter or ignore list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FandomToken {
    /// Fandom identifier.
    pub id: FandomId,
    /// Whether crossovers involving the fandom are covered too.
    pub include_crossovers: bool,
}

/// Ordered set of fandom tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FandomFilter {
    /// Tokens in the order the user added them.
    pub tokens: Vec<FandomToken>,
}

impl FandomFilter {
    /// Whether the filter references the fandom.
    #[must_use]
    pub fn contains(&self, id: FandomId) -> bool {
        self.tokens.iter().any(|token| token.id == id)
    }

    /// Whether the filter has no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Word count bounds chosen by the user.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordcountFilter {
    /// Lower bound, inclusive.
    pub min: Option<u32>,
    /// Upper bound, inclusive.
    pub max: Option<u32>,
}

/// A recommended story with the number of the user's sources pointing at it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FicMatch {
    /// Story identifier.
    pub id: StoryId,
    /// Match count.
    pub matches: u32,
}

/// The user's current recommendation results.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserFicList {
    /// Recommended stories with match counts.
    pub fics: Vec<FicMatch>,
    /// Stories the recommendations were derived from; never displayed as candidates.
    pub source_fics: BTreeSet<StoryId>,
}

/// Default page size for display retrievals.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Snapshot of the preferences a front end keeps for one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserPreferences {
    /// Stable user identifier.
    pub user_id: String,
    /// Zero-based page the user is looking at.
    pub current_page: u32,
    /// Records per display page.
    pub page_size: u32,
    /// Word count bounds.
    pub wordcount: WordcountFilter,
    /// Days without an update after which an incomplete story counts as dead.
    pub dead_fic_days: Option<u32>,
    /// Sort by publication date instead of score.
    pub sort_fresh_first: bool,
    /// Hide stories matched by a single source when listing.
    pub strict_fresh_sort: bool,
    /// Fandoms the results are restricted to (at most two are honoured).
    pub fandom_filter: FandomFilter,
    /// Fandoms the user never wants to see.
    pub ignored_fandoms: FandomFilter,
    /// Stories the user tagged as ignored.
    pub ignored_fics: BTreeSet<StoryId>,
    /// Restrict results to authors of the user's source fics.
    pub use_liked_authors_only: bool,
    /// Show only complete stories.
    pub show_complete_only: bool,
    /// Hide dead stories.
    pub hide_dead: bool,
    /// A reset of the random sequence is pending.
    pub rng_bust_scheduled: bool,
    /// Slash content policy.
    pub slash: SlashFilter,
    /// Current recommendation results.
    pub fic_list: UserFicList,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            current_page: 0,
            page_size: DEFAULT_PAGE_SIZE,
            wordcount: WordcountFilter::default(),
            dead_fic_days: None,
            sort_fresh_first: false,
            strict_fresh_sort: false,
            fandom_filter: FandomFilter::default(),
            ignored_fandoms: FandomFilter::default(),
            ignored_fics: BTreeSet::new(),
            use_liked_authors_only: false,
            show_complete_only: false,
            hide_dead: false,
            rng_bust_scheduled: false,
            slash: SlashFilter::default(),
            fic_list: UserFicList::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn crossover_detection() {
        let at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let story = Story {
            id: 1,
            title: "t".into(),
            url: "https://example.test/s/1".into(),
            author_id: 9,
            fandom_ids: vec![3, 4],
            words: 1_000,
            published: at,
            updated: at,
            complete: false,
            slash_level: 0,
            recommendations: 0,
        };
        assert!(story.is_crossover());
        assert!(story.in_fandom(4));
        assert!(!story.in_fandom(5));
    }

    #[test]
    fn preferences_deserialize_with_defaults() {
        let prefs: UserPreferences =
            serde_json::from_str(r#"{"user_id":"u-1","hide_dead":true}"#).unwrap();
        assert_eq!(prefs.user_id, "u-1");
        assert!(prefs.hide_dead);
        assert_eq!(prefs.page_size, DEFAULT_PAGE_SIZE);
        assert!(prefs.slash.enabled);
    }
}
