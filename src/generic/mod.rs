//! Declarative, selector-driven scraping for built-in sites.
//!
//! A site is described by a [`Configuration`]: where to search, how politely
//! to fetch, and three [`Extractor`]s that turn matched document nodes into
//! mangas, chapters and pages.

pub mod extract;
mod source;

use scraper::ElementRef;
use std::time::Duration;

pub use source::GenericSource;

/// Reads one field out of one matched node. An empty string means absent.
pub type FieldFn = fn(&ElementRef<'_>) -> String;

/// Builds the search page URL from the site's base URL and the user query.
pub type SearchUrlFn = fn(base_url: &str, query: &str) -> String;

fn blank(_: &ElementRef<'_>) -> String {
    String::new()
}

/// Links to further documents whose matches are appended after the root's.
#[derive(Clone, Copy)]
pub struct Follow {
    pub selector: &'static str,
    pub url: FieldFn,
}

#[derive(Clone)]
pub struct Extractor {
    /// Selects one node per entity, in document order.
    pub selector: &'static str,
    pub name: FieldFn,
    pub url: FieldFn,
    pub volume: FieldFn,
    pub cover: FieldFn,
    pub follow: Option<Follow>,
}

impl Extractor {
    pub fn new(selector: &'static str, url: FieldFn) -> Self {
        Self {
            selector,
            name: blank,
            url,
            volume: blank,
            cover: blank,
            follow: None,
        }
    }

    pub fn name(mut self, name: FieldFn) -> Self {
        self.name = name;
        self
    }

    pub fn volume(mut self, volume: FieldFn) -> Self {
        self.volume = volume;
        self
    }

    pub fn cover(mut self, cover: FieldFn) -> Self {
        self.cover = cover;
        self
    }

    pub fn follow(mut self, selector: &'static str, url: FieldFn) -> Self {
        self.follow = Some(Follow { selector, url });
        self
    }
}

#[derive(Clone)]
pub struct Configuration {
    pub name: String,
    pub base_url: String,
    pub search_url: SearchUrlFn,
    /// Minimum spacing between two request dispatches to the site.
    pub delay: Duration,
    /// Maximum number of requests in flight to the site.
    pub parallelism: usize,
    /// The site lists newest chapters first.
    pub reverse_chapters: bool,
    pub manga_extractor: Extractor,
    pub chapter_extractor: Extractor,
    pub page_extractor: Extractor,
}

impl Configuration {
    pub fn id(&self) -> String {
        crate::utils::source_id(&self.name)
    }
}
