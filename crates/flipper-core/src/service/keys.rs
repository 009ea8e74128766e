//! Row key layout shared by every store consumer.

use crate::model::{AuthorId, FandomId, StoryId};

/// Prefix of corpus story rows.
pub const STORY_PREFIX: &str = "story:";
/// Prefix of corpus fandom rows.
pub const FANDOM_PREFIX: &str = "fandom:";
/// Prefix of corpus author rows.
pub const AUTHOR_PREFIX: &str = "author:";
/// Prefix of persisted recommendation lists.
pub const RECLIST_PREFIX: &str = "reclist:";
/// Prefix of page cache rows.
pub const PAGE_PREFIX: &str = "page:";
/// Prefix of persisted page tasks.
pub const PAGE_TASK_PREFIX: &str = "page_task:";
/// Key of the persisted random sequence tokens.
pub const RNG_STATE_KEY: &str = "rng:tokens";
/// Key of the users whose next remote random page must start a new sequence.
pub const RNG_PENDING_RESETS_KEY: &str = "rng:pending_resets";

/// Key of a story row.
#[must_use]
pub fn story(id: StoryId) -> String {
    format!("{STORY_PREFIX}{id}")
}

/// Key of a fandom row.
#[must_use]
pub fn fandom(id: FandomId) -> String {
    format!("{FANDOM_PREFIX}{id}")
}

/// Key of an author row.
#[must_use]
pub fn author(id: AuthorId) -> String {
    format!("{AUTHOR_PREFIX}{id}")
}

/// Key of a recommendation list.
#[must_use]
pub fn reclist(name: &str) -> String {
    format!("{RECLIST_PREFIX}{name}")
}

/// Key of a cached page.
#[must_use]
pub fn page(url: &str) -> String {
    format!("{PAGE_PREFIX}{url}")
}

/// Key of a page task.
#[must_use]
pub fn page_task(id: impl std::fmt::Display) -> String {
    format!("{PAGE_TASK_PREFIX}{id}")
}
