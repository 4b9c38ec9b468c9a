use crate::error::Result;
use crate::models::{Chapter, Manga, Page};

/// A provider of manga search, chapter and page data.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    /// Display name, e.g. "Mangapill"
    fn name(&self) -> &str;

    /// Stable identifier stamped into every produced manga.
    fn id(&self) -> &str;

    /// Search the catalog, in site relevance order without duplicate URLs.
    async fn search(&self, query: &str) -> Result<Vec<Manga>>;

    /// List the chapters of `manga`, each linked back to it.
    async fn chapters_of(&self, manga: &Manga) -> Result<Vec<Chapter>>;

    /// Resolve a chapter to its page images, indexed from 0 by position.
    async fn pages_of(&self, chapter: &Chapter) -> Result<Vec<Page>>;
}

/// The HTTP fetch capability sources depend on.
#[async_trait::async_trait]
pub trait Fetch: Send + Sync {
    /// Fetch `url` and return the response body as text.
    async fn fetch(&self, url: &str) -> Result<String>;
}
