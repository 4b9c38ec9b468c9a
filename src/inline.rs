//! Non-interactive search for scripting: pick mangas and chapters by
//! selector and emit the result as JSON.

use crate::error::{KageError, Result};
use crate::models::{Chapter, Manga, Page};
use crate::traits::Source;
use futures::future::try_join_all;
use serde::Serialize;
use serde_json::json;
use std::str::FromStr;
use tracing::{debug, info};

/// Which manga of a source's search result to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MangaPicker {
    First,
    Last,
    /// Position in the result, from 0.
    Index(usize),
}

impl FromStr for MangaPicker {
    type Err = KageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            _ => s
                .parse()
                .map(Self::Index)
                .map_err(|_| KageError::parse(format!("invalid manga selector {s:?}"))),
        }
    }
}

impl MangaPicker {
    pub fn pick<'a>(&self, mangas: &'a [Manga]) -> Option<&'a Manga> {
        match self {
            Self::First => mangas.first(),
            Self::Last => mangas.last(),
            Self::Index(i) => mangas.get(*i),
        }
    }
}

/// Which chapters of a manga to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterFilter {
    First,
    Last,
    All,
    Index(usize),
    /// Inclusive range of positions.
    Range(usize, usize),
    /// Chapters whose name contains the text.
    Name(String),
}

impl FromStr for ChapterFilter {
    type Err = KageError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || KageError::parse(format!("invalid chapter selector {s:?}"));

        match s {
            "first" => return Ok(Self::First),
            "last" => return Ok(Self::Last),
            "all" => return Ok(Self::All),
            _ => {}
        }

        if let Some(name) = s.strip_prefix('@').and_then(|rest| rest.strip_suffix('@')) {
            return Ok(Self::Name(name.to_string()));
        }

        if let Some((from, to)) = s.split_once('-') {
            let from: usize = from.trim().parse().map_err(|_| invalid())?;
            let to: usize = to.trim().parse().map_err(|_| invalid())?;
            if from > to {
                return Err(invalid());
            }
            return Ok(Self::Range(from, to));
        }

        s.parse().map(Self::Index).map_err(|_| invalid())
    }
}

impl ChapterFilter {
    pub fn apply(&self, mut chapters: Vec<Chapter>) -> Vec<Chapter> {
        match self {
            Self::All => chapters,
            Self::First => chapters.into_iter().take(1).collect(),
            Self::Last => chapters.pop().into_iter().collect(),
            Self::Index(i) => chapters.into_iter().nth(*i).into_iter().collect(),
            Self::Range(from, to) => chapters
                .into_iter()
                .skip(*from)
                .take((to - from).saturating_add(1))
                .collect(),
            Self::Name(part) => chapters
                .into_iter()
                .filter(|c| c.name.contains(part.as_str()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub query: String,
    /// `None` keeps every manga.
    pub manga: Option<MangaPicker>,
    /// `None` skips chapter listing.
    pub chapters: Option<ChapterFilter>,
    pub populate_pages: bool,
}

#[derive(Debug, Serialize)]
pub struct Output {
    pub query: String,
    pub result: Vec<SourceResult>,
}

#[derive(Debug, Serialize)]
pub struct SourceResult {
    pub source: String,
    pub mangas: Vec<MangaResult>,
}

#[derive(Debug, Serialize)]
pub struct MangaResult {
    pub manga: Manga,
    pub chapters: Vec<ChapterResult>,
}

#[derive(Debug, Serialize)]
pub struct ChapterResult {
    #[serde(flatten)]
    pub chapter: Chapter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<Page>>,
}

/// Query every source and assemble the output, in source order.
pub async fn run(sources: &[Box<dyn Source>], options: &Options) -> Result<Output> {
    info!("Running inline query {:?} over {} sources", options.query, sources.len());
    let result = try_join_all(sources.iter().map(|source| run_source(source.as_ref(), options))).await?;

    Ok(Output {
        query: options.query.clone(),
        result,
    })
}

async fn run_source(source: &dyn Source, options: &Options) -> Result<SourceResult> {
    let found = source.search(&options.query).await?;
    let picked: Vec<Manga> = match &options.manga {
        Some(picker) => picker.pick(&found).cloned().into_iter().collect(),
        None => found,
    };
    debug!("{} picked {} mangas", source.name(), picked.len());

    let mut mangas = Vec::with_capacity(picked.len());
    for manga in picked {
        let chapters = match &options.chapters {
            Some(filter) => {
                let chapters = filter.apply(source.chapters_of(&manga).await?);
                let mut results = Vec::with_capacity(chapters.len());
                for chapter in chapters {
                    let pages = if options.populate_pages {
                        Some(source.pages_of(&chapter).await?)
                    } else {
                        None
                    };
                    results.push(ChapterResult { chapter, pages });
                }
                results
            }
            None => Vec::new(),
        };
        mangas.push(MangaResult { manga, chapters });
    }

    Ok(SourceResult {
        source: source.name().to_string(),
        mangas,
    })
}

/// The JSON document printed in place of an output when a run fails.
pub fn error_payload(kind: &str, message: &str) -> serde_json::Value {
    json!({ "error": { "kind": kind, "message": message } })
}
