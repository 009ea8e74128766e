//! Plain-text recommendation source lists.

use std::collections::BTreeSet;

use flipper_core::StoryId;

/// Parsed source list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceList {
    /// Story ids found in the list.
    pub ids: BTreeSet<StoryId>,
    /// Lines that were neither ids nor story URLs.
    pub rejected: Vec<String>,
}

/// Parse one source per line: a numeric story id or a `.../s/<id>/...` URL.
///
/// Blank lines and lines starting with `#` are skipped.
#[must_use]
pub fn parse_source_list(text: &str) -> SourceList {
    let mut list = SourceList::default();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match story_id(line) {
            Some(id) => {
                list.ids.insert(id);
            }
            None => list.rejected.push(line.to_owned()),
        }
    }
    list
}

fn story_id(line: &str) -> Option<StoryId> {
    if let Ok(id) = line.parse::<StoryId>() {
        return (id > 0).then_some(id);
    }
    let (_, rest) = line.split_once("/s/")?;
    let digits = rest.split(['/', '?', '#']).next()?;
    digits.parse::<StoryId>().ok().filter(|id| *id > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_and_urls_are_accepted() {
        let list = parse_source_list(
            "# favourites\n\
             12345\n\
             \n\
             https://www.fanfiction.net/s/777/1/Some-Title\n\
             https://www.fanfiction.net/s/888\n\
             https://www.fanfiction.net/u/42/author\n\
             -3\n\
             twelve\n",
        );
        assert_eq!(list.ids.into_iter().collect::<Vec<_>>(), [777, 888, 12345]);
        assert_eq!(
            list.rejected,
            [
                "https://www.fanfiction.net/u/42/author",
                "-3",
                "twelve"
            ]
        );
    }

    #[test]
    fn duplicates_collapse() {
        let list = parse_source_list("5\n/s/5/\n5");
        assert_eq!(list.ids.len(), 1);
        assert!(list.rejected.is_empty());
    }
}
