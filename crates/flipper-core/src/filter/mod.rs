//! Canonical retrieval filter and its side-channel.
//!
//! # Design
//! - A `Filter` is a plain value: identical fields must yield identical
//!   results for the same corpus snapshot, so nothing in here reads clocks or
//!   global state. The reference instant for "days since update" is a field.
//! - `UserData` only narrows the candidate set; it never changes scores.

pub mod builder;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SourceError, SourceResult};
use crate::model::{FandomId, StoryId};

/// Result ordering requested by a filter.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    /// Highest score first.
    #[default]
    Score,
    /// Most recently published first.
    PublishDate,
    /// Most recently updated first.
    UpdateDate,
    /// Longest first.
    WordCount,
}

/// Slash content policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SlashFilter {
    /// Whether the policy applies at all.
    pub enabled: bool,
    /// Drop stories rated at or above `level`.
    pub exclude_slash: bool,
    /// Keep only stories rated at or above `level`.
    pub include_slash: bool,
    /// Rating threshold.
    pub level: u8,
}

impl Default for SlashFilter {
    fn default() -> Self {
        Self {
            enabled: true,
            exclude_slash: true,
            include_slash: false,
            level: 1,
        }
    }
}

impl SlashFilter {
    /// Whether a story with the given slash rating passes the policy.
    #[must_use]
    pub const fn admits(&self, slash_level: u8) -> bool {
        if !self.enabled {
            return true;
        }
        if self.exclude_slash && slash_level >= self.level {
            return false;
        }
        if self.include_slash && slash_level < self.level {
            return false;
        }
        true
    }
}

/// Reason reported for a non-positive record limit.
pub const REASON_RECORD_LIMIT: &str = "record_limit_not_positive";
/// Reason reported when fandoms are to be ignored but none are known.
pub const REASON_NOTHING_TO_IGNORE: &str = "ignore_fandoms_without_fandoms";
/// Reason reported for a second fandom without a primary one.
pub const REASON_SECOND_WITHOUT_PRIMARY: &str = "second_fandom_without_primary";

/// Map a reason string received over the wire back to its constant.
#[must_use]
pub fn known_reason(reason: &str) -> &'static str {
    [
        REASON_RECORD_LIMIT,
        REASON_NOTHING_TO_IGNORE,
        REASON_SECOND_WITHOUT_PRIMARY,
    ]
    .into_iter()
    .find(|known| *known == reason)
    .unwrap_or("unrecognized")
}

/// Default dead-story window used when the user enables "active only"
/// without choosing a window.
pub const DEFAULT_DEAD_FIC_DAYS: u32 = 365;

/// Canonical, self-describing retrieval request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Filter {
    /// Result ordering.
    pub sort_mode: SortMode,
    /// Minimum score a story needs to be listed.
    pub min_recommendations: u32,
    /// Lower word-count bound, inclusive.
    pub min_words: Option<u32>,
    /// Upper word-count bound, inclusive.
    pub max_words: Option<u32>,
    /// Days without an update after which an incomplete story is dead.
    pub dead_fic_days: Option<u32>,
    /// Primary fandom.
    pub fandom: Option<FandomId>,
    /// Second fandom; requires crossovers of both.
    pub second_fandom: Option<FandomId>,
    /// Crossover handling for a single fandom; `None` leaves crossovers in.
    pub include_crossovers: Option<bool>,
    /// Exclude fandoms listed in the accompanying `UserData`.
    pub ignore_fandoms: bool,
    /// Slash content policy.
    pub slash: SlashFilter,
    /// Only complete stories.
    pub ensure_completed: bool,
    /// Only stories that are complete or updated within the dead window.
    pub ensure_active: bool,
    /// Zero-based page index.
    pub page: u32,
    /// Records per page; must be positive.
    pub record_limit: i32,
    /// Order results by a reproducible shuffle instead of the sort key.
    pub randomize: bool,
    /// User owning the random sequence.
    pub rng_owner: String,
    /// Value seeding the reproducible shuffle.
    pub rng_disambiguator: String,
    /// Start a new random sequence before serving this request.
    ///
    /// The reset happens on every request carrying the flag, so resending
    /// such a filter reshuffles again. Requests without the flag are
    /// reproducible for a fixed filter and sequence.
    pub wipe_rng_sequence: bool,
    /// Present the results as an open, fresh-first list.
    pub list_open_mode: bool,
    /// Restrict results to authors of the source fics in `UserData`.
    pub tags_are_used_for_authors: bool,
    /// Story id to the user's match count; non-empty means only these stories are candidates.
    pub recs_hash: BTreeMap<StoryId, u32>,
    /// Instant the dead-story window is measured from.
    pub reference_time: DateTime<Utc>,
}

impl Filter {
    /// A filter with every restriction disabled, one record per page.
    #[must_use]
    pub fn unrestricted(reference_time: DateTime<Utc>) -> Self {
        Self {
            sort_mode: SortMode::Score,
            min_recommendations: 0,
            min_words: None,
            max_words: None,
            dead_fic_days: None,
            fandom: None,
            second_fandom: None,
            include_crossovers: None,
            ignore_fandoms: false,
            slash: SlashFilter {
                enabled: false,
                ..SlashFilter::default()
            },
            ensure_completed: false,
            ensure_active: false,
            page: 0,
            record_limit: 1,
            randomize: false,
            rng_owner: String::new(),
            rng_disambiguator: String::new(),
            wipe_rng_sequence: false,
            list_open_mode: false,
            tags_are_used_for_authors: false,
            recs_hash: BTreeMap::new(),
            reference_time,
        }
    }

    /// Reject contradictory or out-of-range requests before any I/O.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidFilter`] when the record limit is not
    /// positive, or when fandoms are to be ignored while neither a fandom
    /// scope nor an ignore list is present.
    pub fn validate(&self, user_data: &UserData) -> SourceResult<()> {
        if self.record_limit <= 0 {
            return Err(SourceError::InvalidFilter {
                reason: REASON_RECORD_LIMIT,
            });
        }
        if self.ignore_fandoms
            && self.fandom.is_none()
            && self.second_fandom.is_none()
            && user_data.ignored_fandoms.is_empty()
        {
            return Err(SourceError::InvalidFilter {
                reason: REASON_NOTHING_TO_IGNORE,
            });
        }
        if self.second_fandom.is_some() && self.fandom.is_none() {
            return Err(SourceError::InvalidFilter {
                reason: REASON_SECOND_WITHOUT_PRIMARY,
            });
        }
        Ok(())
    }

    /// Records per page as an unsigned size; zero for invalid limits.
    #[must_use]
    pub fn limit(&self) -> usize {
        usize::try_from(self.record_limit).unwrap_or(0)
    }

    /// Index of the first record of the requested page.
    #[must_use]
    pub fn offset(&self) -> usize {
        usize::try_from(self.page)
            .unwrap_or(usize::MAX)
            .saturating_mul(self.limit())
    }

    /// Effective dead-story window in days.
    #[must_use]
    pub fn dead_window_days(&self) -> u32 {
        self.dead_fic_days.unwrap_or(DEFAULT_DEAD_FIC_DAYS)
    }
}

/// Exclusion and allow-list data accompanying a `Filter`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserData {
    /// Ignored fandom id to "crossovers are ignored too".
    pub ignored_fandoms: BTreeMap<FandomId, bool>,
    /// Stories the user already tagged; always excluded.
    pub all_tagged_fics: BTreeSet<StoryId>,
    /// Source fics whose authors form the allow-list.
    pub fic_ids_for_active_tags: BTreeSet<StoryId>,
}
