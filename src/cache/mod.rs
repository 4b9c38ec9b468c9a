//! Per-source memoization of search results and chapter listings.
//!
//! Page listings are never cached: image URLs are consumed right away and
//! frequently expire. Writes are best-effort; a failed write is logged and
//! the surrounding operation still succeeds.

pub mod store;

use crate::error::Result;
use crate::models::{Chapter, Manga, Page};
use crate::traits::Source;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

pub use store::{CacheStore, FileStore, MemoryStore};

/// The two key spaces owned by one source: `query -> mangas` and `manga url -> chapters`.
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    mangas_ns: String,
    chapters_ns: String,
}

impl ResultCache {
    pub fn new(source_id: &str, store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            mangas_ns: format!("{source_id}/mangas"),
            chapters_ns: format!("{source_id}/chapters"),
        }
    }

    /// Cached search results, re-stamped with `source_id`.
    pub async fn mangas(&self, query: &str, source_id: &str) -> Option<Vec<Manga>> {
        let mut mangas: Vec<Manga> = self.load(&self.mangas_ns, query).await?;
        for manga in &mut mangas {
            manga.source = source_id.to_string();
        }
        Some(mangas)
    }

    pub async fn set_mangas(&self, query: &str, mangas: &[Manga]) {
        self.save(&self.mangas_ns, query, mangas).await;
    }

    /// Cached chapters of `manga`, rebound to the caller's manga.
    pub async fn chapters(&self, manga: &Manga) -> Option<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = self.load(&self.chapters_ns, &manga.url).await?;
        for chapter in &mut chapters {
            chapter.rebind(manga);
        }
        Some(chapters)
    }

    pub async fn set_chapters(&self, manga: &Manga, chapters: &[Chapter]) {
        self.save(&self.chapters_ns, &manga.url, chapters).await;
    }

    async fn load<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let value = self.store.get(namespace, key).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => {
                debug!("[CACHE] Hit {} {:?}", namespace, key);
                Some(decoded)
            }
            Err(e) => {
                debug!("[CACHE] Discarding undecodable entry {} {:?}: {}", namespace, key, e);
                None
            }
        }
    }

    async fn save<T: Serialize + ?Sized>(&self, namespace: &str, key: &str, value: &T) {
        let encoded = match serde_json::to_value(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("[CACHE] Failed to encode {} {:?}: {}", namespace, key, e);
                return;
            }
        };
        if let Err(e) = self.store.set(namespace, key, encoded).await {
            warn!("[CACHE] Failed to write {} {:?}: {}", namespace, key, e);
        }
    }
}

/// Wraps any source with a [`ResultCache`].
pub struct Cached<S> {
    inner: S,
    cache: ResultCache,
}

impl<S: Source> Cached<S> {
    pub fn new(inner: S, store: Arc<dyn CacheStore>) -> Self {
        let cache = ResultCache::new(inner.id(), store);
        Self { inner, cache }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait::async_trait]
impl<S: Source> Source for Cached<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn search(&self, query: &str) -> Result<Vec<Manga>> {
        if let Some(mangas) = self.cache.mangas(query, self.id()).await {
            return Ok(mangas);
        }

        let mangas = self.inner.search(query).await?;
        self.cache.set_mangas(query, &mangas).await;
        Ok(mangas)
    }

    async fn chapters_of(&self, manga: &Manga) -> Result<Vec<Chapter>> {
        if let Some(chapters) = self.cache.chapters(manga).await {
            return Ok(chapters);
        }

        let chapters = self.inner.chapters_of(manga).await?;
        self.cache.set_chapters(manga, &chapters).await;
        Ok(chapters)
    }

    async fn pages_of(&self, chapter: &Chapter) -> Result<Vec<Page>> {
        self.inner.pages_of(chapter).await
    }
}
