//! Translation of a preference snapshot into a `Filter` + `UserData` pair.
//!
//! Every builder is pure: the only input besides the snapshot is the
//! reference instant captured when the builder is constructed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::{Filter, SortMode, UserData};
use crate::model::{StoryId, UserPreferences};

/// Builds canonical filters for the three retrieval intents.
#[derive(Debug, Clone, Copy)]
pub struct FilterBuilder {
    reference_time: DateTime<Utc>,
}

impl FilterBuilder {
    /// Builder pinned to a fixed reference instant.
    #[must_use]
    pub const fn new(reference_time: DateTime<Utc>) -> Self {
        Self { reference_time }
    }

    /// Builder pinned to the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// Filter for a paged listing of the user's results.
    #[must_use]
    pub fn build_display_filter(&self, prefs: &UserPreferences) -> (Filter, UserData) {
        let (mut filter, user_data) = self.common(prefs);
        filter.record_limit = clamp_limit(prefs.page_size);
        filter.recs_hash = display_recs_hash(prefs);
        if prefs.sort_fresh_first {
            filter.sort_mode = SortMode::PublishDate;
            filter.list_open_mode = true;
        }
        (filter, user_data)
    }

    /// Filter for a reproducible random sample gated by match quality.
    #[must_use]
    pub fn build_random_sample_filter(
        &self,
        prefs: &UserPreferences,
        sample_size: u32,
        quality_cutoff: u32,
    ) -> (Filter, UserData) {
        let (mut filter, user_data) = self.common(prefs);
        filter.record_limit = clamp_limit(sample_size);
        filter.recs_hash = prefs
            .fic_list
            .fics
            .iter()
            .filter(|fic| !prefs.fic_list.source_fics.contains(&fic.id))
            .filter(|fic| fic.matches >= quality_cutoff)
            .map(|fic| (fic.id, fic.matches))
            .collect();
        filter.min_recommendations = quality_cutoff;
        filter.sort_mode = SortMode::Score;
        filter.list_open_mode = true;
        filter.randomize = true;
        filter.rng_owner.clone_from(&prefs.user_id);
        filter.rng_disambiguator = format!("random-sample:{}", prefs.user_id);
        filter.wipe_rng_sequence = prefs.rng_bust_scheduled;

        if filter.second_fandom.is_none()
            && let Some(token) = prefs.fandom_filter.tokens.first()
        {
            filter.include_crossovers = Some(token.include_crossovers);
        }
        (filter, user_data)
    }

    /// Filter used to count the user's results for page estimation.
    #[must_use]
    pub fn build_count_estimate_filter(
        &self,
        prefs: &UserPreferences,
        page_size: u32,
    ) -> (Filter, UserData) {
        let (mut filter, user_data) = self.build_display_filter(prefs);
        filter.record_limit = clamp_limit(page_size);
        filter.page = 0;
        (filter, user_data)
    }

    /// Number of full pages a result count spans, as front ends display it.
    #[must_use]
    pub const fn page_count(total: usize, page_size: u32) -> usize {
        if page_size == 0 {
            return 0;
        }
        total / page_size as usize
    }

    fn common(&self, prefs: &UserPreferences) -> (Filter, UserData) {
        let mut filter = Filter::unrestricted(self.reference_time);
        let mut user_data = UserData::default();

        let (min, max) = match (prefs.wordcount.min, prefs.wordcount.max) {
            (Some(min), Some(max)) if min > max => (Some(max), Some(min)),
            bounds => bounds,
        };
        filter.min_words = min;
        filter.max_words = max;
        filter.dead_fic_days = prefs.dead_fic_days;
        filter.slash = prefs.slash;
        filter.ensure_completed = prefs.show_complete_only;
        filter.ensure_active = prefs.hide_dead;
        filter.page = prefs.current_page;

        let mut tokens = prefs.fandom_filter.tokens.iter();
        filter.fandom = tokens.next().map(|token| token.id);
        filter.second_fandom = tokens.next().map(|token| token.id);
        if filter.second_fandom.is_some() {
            filter.include_crossovers = Some(true);
        }

        for token in &prefs.ignored_fandoms.tokens {
            if prefs.fandom_filter.contains(token.id) {
                continue;
            }
            user_data
                .ignored_fandoms
                .insert(token.id, token.include_crossovers);
        }
        filter.ignore_fandoms = !user_data.ignored_fandoms.is_empty();

        user_data.all_tagged_fics = prefs.ignored_fics.clone();
        if prefs.use_liked_authors_only {
            user_data.fic_ids_for_active_tags = prefs.fic_list.source_fics.clone();
            filter.tags_are_used_for_authors = true;
        }

        (filter, user_data)
    }
}

fn display_recs_hash(prefs: &UserPreferences) -> BTreeMap<StoryId, u32> {
    prefs
        .fic_list
        .fics
        .iter()
        .filter(|fic| !prefs.fic_list.source_fics.contains(&fic.id))
        .filter(|fic| fic.matches > 1 || !prefs.strict_fresh_sort)
        .map(|fic| (fic.id, fic.matches))
        .collect()
}

fn clamp_limit(size: u32) -> i32 {
    i32::try_from(size).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FandomFilter, FandomToken, FicMatch, UserFicList, WordcountFilter};
    use chrono::TimeZone;

    const A: StoryId = 1;
    const B: StoryId = 2;
    const C: StoryId = 3;

    fn builder() -> FilterBuilder {
        FilterBuilder::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
    }

    fn prefs_with_matches() -> UserPreferences {
        UserPreferences {
            user_id: "reader-1".into(),
            fic_list: UserFicList {
                fics: vec![
                    FicMatch { id: A, matches: 1 },
                    FicMatch { id: B, matches: 3 },
                    FicMatch { id: C, matches: 2 },
                ],
                source_fics: [A].into_iter().collect(),
            },
            ..UserPreferences::default()
        }
    }

    #[test]
    fn display_filter_excludes_sources_only() {
        let (filter, _) = builder().build_display_filter(&prefs_with_matches());
        let expected: BTreeMap<_, _> = [(B, 3), (C, 2)].into_iter().collect();
        assert_eq!(filter.recs_hash, expected);
        assert_eq!(filter.sort_mode, SortMode::Score);
        assert!(!filter.randomize);
    }

    #[test]
    fn strict_freshness_drops_single_matches() {
        let mut prefs = prefs_with_matches();
        prefs.fic_list.source_fics.clear();
        let (relaxed, _) = builder().build_display_filter(&prefs);
        assert!(relaxed.recs_hash.contains_key(&A));

        prefs.strict_fresh_sort = true;
        let (strict, _) = builder().build_display_filter(&prefs);
        assert!(!strict.recs_hash.contains_key(&A));
        assert_eq!(strict.recs_hash.len(), 2);
    }

    #[test]
    fn random_sample_honours_quality_cutoff() {
        let prefs = prefs_with_matches();
        let (at_two, _) = builder().build_random_sample_filter(&prefs, 5, 2);
        let expected: BTreeMap<_, _> = [(B, 3), (C, 2)].into_iter().collect();
        assert_eq!(at_two.recs_hash, expected);

        let (at_three, _) = builder().build_random_sample_filter(&prefs, 5, 3);
        let expected: BTreeMap<_, _> = [(B, 3)].into_iter().collect();
        assert_eq!(at_three.recs_hash, expected);
        assert!(at_three.randomize);
        assert!(at_three.list_open_mode);
        assert_eq!(at_three.rng_owner, "reader-1");
        assert_eq!(at_three.record_limit, 5);
    }

    #[test]
    fn word_bounds_are_ordered() {
        let mut prefs = UserPreferences {
            wordcount: WordcountFilter {
                min: Some(90_000),
                max: Some(10_000),
            },
            ..UserPreferences::default()
        };
        let b = builder();
        for (filter, _) in [
            b.build_display_filter(&prefs),
            b.build_random_sample_filter(&prefs, 10, 1),
        ] {
            assert_eq!(filter.min_words, Some(10_000));
            assert_eq!(filter.max_words, Some(90_000));
        }

        prefs.wordcount.max = None;
        let (only_min, _) = b.build_display_filter(&prefs);
        assert_eq!(only_min.min_words, Some(90_000));
        assert_eq!(only_min.max_words, None);
    }

    #[test]
    fn fandom_scope_and_crossovers() {
        let mut prefs = UserPreferences {
            fandom_filter: FandomFilter {
                tokens: vec![FandomToken {
                    id: 10,
                    include_crossovers: false,
                }],
            },
            ..UserPreferences::default()
        };
        let (display, _) = builder().build_display_filter(&prefs);
        assert_eq!(display.fandom, Some(10));
        assert_eq!(display.include_crossovers, None);

        let (random, _) = builder().build_random_sample_filter(&prefs, 3, 0);
        assert_eq!(random.include_crossovers, Some(false));

        prefs.fandom_filter.tokens.push(FandomToken {
            id: 11,
            include_crossovers: false,
        });
        let (pair, _) = builder().build_display_filter(&prefs);
        assert_eq!(pair.second_fandom, Some(11));
        assert_eq!(pair.include_crossovers, Some(true));
    }

    #[test]
    fn ignored_fandoms_skip_active_tokens() {
        let prefs = UserPreferences {
            fandom_filter: FandomFilter {
                tokens: vec![FandomToken {
                    id: 10,
                    include_crossovers: true,
                }],
            },
            ignored_fandoms: FandomFilter {
                tokens: vec![
                    FandomToken {
                        id: 10,
                        include_crossovers: true,
                    },
                    FandomToken {
                        id: 20,
                        include_crossovers: false,
                    },
                ],
            },
            ..UserPreferences::default()
        };
        let (filter, data) = builder().build_display_filter(&prefs);
        assert!(filter.ignore_fandoms);
        assert_eq!(data.ignored_fandoms.len(), 1);
        assert_eq!(data.ignored_fandoms.get(&20), Some(&false));
    }

    #[test]
    fn flags_are_never_on_by_default() {
        let (filter, data) = builder().build_display_filter(&UserPreferences::default());
        assert!(!filter.ensure_completed);
        assert!(!filter.ensure_active);
        assert!(!filter.ignore_fandoms);
        assert!(!filter.tags_are_used_for_authors);
        assert!(data.fic_ids_for_active_tags.is_empty());
    }

    #[test]
    fn liked_authors_populate_source_set() {
        let mut prefs = prefs_with_matches();
        prefs.use_liked_authors_only = true;
        let (filter, data) = builder().build_display_filter(&prefs);
        assert!(filter.tags_are_used_for_authors);
        assert!(data.fic_ids_for_active_tags.contains(&A));
    }

    #[test]
    fn bust_flag_and_page_count() {
        let prefs = UserPreferences {
            rng_bust_scheduled: true,
            ..UserPreferences::default()
        };
        let (filter, _) = builder().build_random_sample_filter(&prefs, 4, 0);
        assert!(filter.wipe_rng_sequence);

        let (count, _) = builder().build_count_estimate_filter(&prefs, 25);
        assert_eq!(count.record_limit, 25);
        assert_eq!(FilterBuilder::page_count(99, 25), 3);
        assert_eq!(FilterBuilder::page_count(99, 0), 0);
    }
}
