//! Default page parser for upstream mirrors that serve corpus records as JSON.

use flipper_core::{Author, FandomPage, ParseError, ParseResult, PageParser, WebPage};
use serde::de::DeserializeOwned;

/// Parses fandom listings as [`FandomPage`] JSON and author pages as [`Author`] JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPageParser;

fn decode<T: DeserializeOwned>(page: &WebPage) -> ParseResult<T> {
    serde_json::from_str(&page.content).map_err(|err| ParseError::Malformed {
        url: page.url.clone(),
        reason: err.to_string(),
    })
}

impl PageParser for JsonPageParser {
    fn parse_fandom_page(&self, page: &WebPage) -> ParseResult<FandomPage> {
        decode(page)
    }

    fn parse_author_page(&self, page: &WebPage) -> ParseResult<Author> {
        let mut author: Author = decode(page)?;
        if author.url.is_empty() {
            author.url.clone_from(&page.url);
        }
        Ok(author)
    }
}
