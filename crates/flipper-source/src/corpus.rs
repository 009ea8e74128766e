//! Immutable corpus snapshot and filter evaluation.
//!
//! # Design
//! - A snapshot is built once per reload and shared behind an `Arc`; readers
//!   never block a reload and a reload never mutates a snapshot in use.
//! - Evaluation is split into candidate admission and ordering so
//!   counts never clone stories.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use flipper_core::{AuthorId, Filter, ScoredStory, SortMode, Story, StoryId, UserData};

/// Stories visible to a local source at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusSnapshot {
    stories: BTreeMap<StoryId, Story>,
    loaded_at: Option<DateTime<Utc>>,
}

/// A story admitted by a filter, with the score it is ranked by.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate<'a> {
    pub(crate) story: &'a Story,
    pub(crate) score: u32,
}

impl CorpusSnapshot {
    /// Snapshot over `stories`; later duplicates replace earlier ones.
    #[must_use]
    pub fn new(stories: impl IntoIterator<Item = Story>, loaded_at: DateTime<Utc>) -> Self {
        Self {
            stories: stories.into_iter().map(|story| (story.id, story)).collect(),
            loaded_at: Some(loaded_at),
        }
    }

    /// Number of stories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stories.len()
    }

    /// Whether the snapshot holds no stories.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }

    /// When the snapshot was loaded.
    #[must_use]
    pub const fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    /// Story by id.
    #[must_use]
    pub fn story(&self, id: StoryId) -> Option<&Story> {
        self.stories.get(&id)
    }

    /// Number of stories `filter` selects, ignoring paging.
    #[must_use]
    pub fn count(&self, filter: &Filter, user_data: &UserData) -> usize {
        let scope = Scope::new(self, filter, user_data);
        self.candidates(filter)
            .filter(|candidate| scope.admits(candidate))
            .count()
    }

    /// Every story `filter` selects, in the filter's sort order.
    pub(crate) fn select(&self, filter: &Filter, user_data: &UserData) -> Vec<Candidate<'_>> {
        let scope = Scope::new(self, filter, user_data);
        let mut selected: Vec<Candidate<'_>> = self
            .candidates(filter)
            .filter(|candidate| scope.admits(candidate))
            .collect();
        selected.sort_by(|a, b| compare(filter, a, b));
        selected
    }

    /// Candidate universe: the user's recommendations when present, otherwise
    /// the whole corpus scored by its recommendation count.
    fn candidates<'s: 'f, 'f>(
        &'s self,
        filter: &'f Filter,
    ) -> Box<dyn Iterator<Item = Candidate<'s>> + 'f> {
        if filter.recs_hash.is_empty() {
            Box::new(self.stories.values().map(|story| Candidate {
                story,
                score: story.recommendations,
            }))
        } else {
            Box::new(filter.recs_hash.iter().filter_map(|(id, matches)| {
                self.stories.get(id).map(|story| Candidate {
                    story,
                    score: *matches,
                })
            }))
        }
    }
}

/// Per-call state derived from a filter and its side-channel.
struct Scope<'a> {
    filter: &'a Filter,
    user_data: &'a UserData,
    liked_authors: Option<BTreeSet<AuthorId>>,
    dead_before: DateTime<Utc>,
}

impl<'a> Scope<'a> {
    fn new(snapshot: &CorpusSnapshot, filter: &'a Filter, user_data: &'a UserData) -> Self {
        let liked_authors = filter.tags_are_used_for_authors.then(|| {
            user_data
                .fic_ids_for_active_tags
                .iter()
                .filter_map(|id| snapshot.story(*id))
                .map(|story| story.author_id)
                .collect()
        });
        let dead_before = filter
            .reference_time
            .checked_sub_signed(Duration::days(i64::from(filter.dead_window_days())))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self {
            filter,
            user_data,
            liked_authors,
            dead_before,
        }
    }

    fn admits(&self, candidate: &Candidate<'_>) -> bool {
        let filter = self.filter;
        let story = candidate.story;

        if self.user_data.all_tagged_fics.contains(&story.id) {
            return false;
        }
        if candidate.score < filter.min_recommendations {
            return false;
        }
        if filter.min_words.is_some_and(|min| story.words < min)
            || filter.max_words.is_some_and(|max| story.words > max)
        {
            return false;
        }
        if filter.ensure_completed && !story.complete {
            return false;
        }
        if filter.ensure_active && !story.complete && story.updated < self.dead_before {
            return false;
        }
        if !self.fandom_scope_admits(story) {
            return false;
        }
        if filter.ignore_fandoms && self.ignored(story) {
            return false;
        }
        if let Some(authors) = &self.liked_authors
            && !authors.contains(&story.author_id)
        {
            return false;
        }
        filter.slash.admits(story.slash_level)
    }

    fn fandom_scope_admits(&self, story: &Story) -> bool {
        let Some(primary) = self.filter.fandom else {
            return true;
        };
        if !story.in_fandom(primary) {
            return false;
        }
        if let Some(second) = self.filter.second_fandom {
            return story.in_fandom(second);
        }
        self.filter.include_crossovers != Some(false) || !story.is_crossover()
    }

    /// An ignored fandom hides its own stories; crossovers only when flagged.
    fn ignored(&self, story: &Story) -> bool {
        story.fandom_ids.iter().any(|fandom| {
            self.user_data
                .ignored_fandoms
                .get(fandom)
                .is_some_and(|crossovers_too| *crossovers_too || !story.is_crossover())
        })
    }
}

fn compare(filter: &Filter, a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    let primary = match filter.sort_mode {
        SortMode::Score => b.score.cmp(&a.score),
        SortMode::PublishDate => b.story.published.cmp(&a.story.published),
        SortMode::UpdateDate => b.story.updated.cmp(&a.story.updated),
        SortMode::WordCount => b.story.words.cmp(&a.story.words),
    };
    let fresh = if filter.list_open_mode {
        b.story.published.cmp(&a.story.published)
    } else {
        Ordering::Equal
    };
    primary.then(fresh).then(a.story.id.cmp(&b.story.id))
}

impl Candidate<'_> {
    pub(crate) fn to_scored(self) -> ScoredStory {
        ScoredStory {
            story: self.story.clone(),
            score: self.score,
        }
    }
}
