use super::extract::compile;
use super::{Configuration, Extractor};
use crate::error::{KageError, Result};
use crate::models::{dedup_by_url, index_at, non_empty, Chapter, Manga, Page};
use crate::traits::{Fetch, Source};
use crate::utils::{cancellable, resolve_url};
use futures::stream::{self, StreamExt, TryStreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use scraper::Html;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Fields of one matched node before they become an entity.
#[derive(Debug)]
struct RawEntity {
    name: String,
    url: String,
    volume: String,
    cover: String,
}

/// A [`Source`] driven entirely by a [`Configuration`].
pub struct GenericSource {
    config: Configuration,
    id: String,
    fetcher: Arc<dyn Fetch>,
    gate: Arc<Semaphore>,
    throttle: Option<DefaultDirectRateLimiter>,
    cancel: CancellationToken,
}

impl GenericSource {
    pub fn new(config: Configuration, fetcher: Arc<dyn Fetch>) -> Result<Self> {
        for extractor in [
            &config.manga_extractor,
            &config.chapter_extractor,
            &config.page_extractor,
        ] {
            compile(extractor.selector)?;
            if let Some(follow) = &extractor.follow {
                compile(follow.selector)?;
            }
        }

        let parallelism = config.parallelism.max(1);
        let throttle = Quota::with_period(config.delay).map(RateLimiter::direct);

        Ok(Self {
            id: config.id(),
            gate: Arc::new(Semaphore::new(parallelism)),
            throttle,
            fetcher,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Abort outstanding and future fetches once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    async fn fetch(&self, link: &str) -> Result<String> {
        let url = resolve_url(&self.config.base_url, link)?;
        cancellable(&self.cancel, &url, async {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| KageError::cancelled(format!("{} admission gate closed", self.config.name)))?;
            if let Some(throttle) = &self.throttle {
                throttle.until_ready().await;
            }
            debug!("[GENERIC] {} fetching {}", self.config.name, url);
            self.fetcher.fetch(&url).await
        })
        .await
    }

    /// Fetch every link, at most `parallelism` at a time, returning bodies in link order.
    async fn fetch_all(&self, links: Vec<String>) -> Result<Vec<String>> {
        stream::iter(links)
            .map(|link| async move { self.fetch(&link).await })
            .buffered(self.config.parallelism.max(1))
            .try_collect()
            .await
    }

    /// Apply `extractor` to the document at `url` and to every document it follows.
    async fn collect(&self, url: &str, extractor: &Extractor) -> Result<Vec<RawEntity>> {
        let body = self.fetch(url).await?;
        let (mut entities, links) = extract_document(&body, extractor)?;

        if !links.is_empty() {
            debug!(
                "[GENERIC] {} following {} linked documents from {}",
                self.config.name,
                links.len(),
                url
            );
            for body in self.fetch_all(links).await? {
                let (more, _) = extract_document(&body, extractor)?;
                entities.extend(more);
            }
        }

        Ok(entities)
    }

    fn require_url(&self, function: &str, entity: &RawEntity, position: usize) -> Result<()> {
        if entity.url.is_empty() {
            return Err(KageError::contract(
                &self.config.name,
                function,
                format!(
                    "node {position} matched by the extractor has no url (name: {:?})",
                    entity.name
                ),
            ));
        }
        Ok(())
    }
}

/// Run the extractor over one document. Synchronous: the parsed tree never crosses an await.
fn extract_document(body: &str, extractor: &Extractor) -> Result<(Vec<RawEntity>, Vec<String>)> {
    let document = Html::parse_document(body);
    let root = document.root_element();

    let selector = compile(extractor.selector)?;
    let entities = root
        .select(&selector)
        .map(|node| RawEntity {
            name: (extractor.name)(&node).trim().to_string(),
            url: (extractor.url)(&node).trim().to_string(),
            volume: (extractor.volume)(&node),
            cover: (extractor.cover)(&node),
        })
        .collect();

    let links = match &extractor.follow {
        Some(follow) => {
            let selector = compile(follow.selector)?;
            root.select(&selector)
                .map(|node| (follow.url)(&node).trim().to_string())
                .filter(|link| !link.is_empty())
                .collect()
        }
        None => Vec::new(),
    };

    Ok((entities, links))
}

#[async_trait::async_trait]
impl Source for GenericSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn id(&self) -> &str {
        &self.id
    }

    async fn search(&self, query: &str) -> Result<Vec<Manga>> {
        let url = (self.config.search_url)(&self.config.base_url, query);
        info!("[GENERIC] {} searching {:?} at {}", self.config.name, query, url);

        let raw = self.collect(&url, &self.config.manga_extractor).await?;
        for (position, entity) in raw.iter().enumerate() {
            self.require_url("search", entity, position)?;
        }

        let raw = dedup_by_url(raw, |e| e.url.as_str());
        let mut mangas = Vec::with_capacity(raw.len());
        for (position, entity) in raw.into_iter().enumerate() {
            mangas.push(Manga {
                name: entity.name,
                url: entity.url,
                index: index_at(position)?,
                cover: non_empty(entity.cover),
                volume: non_empty(entity.volume),
                source: self.id.clone(),
            });
        }

        info!("[GENERIC] {} found {} mangas for {:?}", self.config.name, mangas.len(), query);
        Ok(mangas)
    }

    async fn chapters_of(&self, manga: &Manga) -> Result<Vec<Chapter>> {
        info!("[GENERIC] {} listing chapters of {}", self.config.name, manga.url);

        let mut raw = self.collect(&manga.url, &self.config.chapter_extractor).await?;
        for (position, entity) in raw.iter().enumerate() {
            self.require_url("chapters_of", entity, position)?;
        }
        if self.config.reverse_chapters {
            raw.reverse();
        }

        let raw = dedup_by_url(raw, |e| e.url.as_str());
        if raw.is_empty() {
            return Err(KageError::not_found(format!(
                "no chapters for {} on {}",
                manga.url, self.config.name
            )));
        }

        let mut chapters = Vec::with_capacity(raw.len());
        for (position, entity) in raw.into_iter().enumerate() {
            let mut chapter = Chapter::new(entity.name, entity.url, index_at(position)?, manga);
            chapter.volume = non_empty(entity.volume);
            chapters.push(chapter);
        }

        info!("[GENERIC] {} found {} chapters for {}", self.config.name, chapters.len(), manga.name);
        Ok(chapters)
    }

    async fn pages_of(&self, chapter: &Chapter) -> Result<Vec<Page>> {
        info!("[GENERIC] {} resolving pages of {}", self.config.name, chapter.url);

        let raw = self.collect(&chapter.url, &self.config.page_extractor).await?;
        for (position, entity) in raw.iter().enumerate() {
            self.require_url("pages_of", entity, position)?;
        }
        if raw.is_empty() {
            return Err(KageError::not_found(format!(
                "no pages for {} on {}",
                chapter.url, self.config.name
            )));
        }

        let mut pages = Vec::with_capacity(raw.len());
        for (position, entity) in raw.into_iter().enumerate() {
            pages.push(Page::new(entity.url, index_at(position)?, chapter));
        }

        debug!("[GENERIC] {} found {} pages for {}", self.config.name, pages.len(), chapter.name);
        Ok(pages)
    }
}
