//! Sources implemented as user-supplied Lua scripts.
//!
//! Each script runs in its own restricted interpreter and must define the
//! global functions [`SEARCH_MANGA_FN`], [`MANGA_CHAPTERS_FN`] and
//! [`CHAPTER_PAGES_FN`]. Each takes a string (query or URL) and returns a
//! table keyed by index whose values are entity tables.

mod libs;
mod marshal;
mod sandbox;
pub mod template;

use crate::config::Settings;
use crate::error::{KageError, Result};
use crate::models::{dedup_by_url, index_at, Chapter, Manga, Page};
use crate::traits::Source;
use crate::utils::{source_id, HttpClient};
use marshal::EntityFields;
use sandbox::{Sandbox, SandboxOptions};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const SEARCH_MANGA_FN: &str = "SearchManga";
pub const MANGA_CHAPTERS_FN: &str = "MangaChapters";
pub const CHAPTER_PAGES_FN: &str = "ChapterPages";

pub const ENTRY_POINTS: [&str; 3] = [SEARCH_MANGA_FN, MANGA_CHAPTERS_FN, CHAPTER_PAGES_FN];

/// File extension of source scripts.
pub const EXTENSION: &str = "lua";

/// Suffix that keeps script ids apart from built-in ids.
const ID_SUFFIX: &str = "-lua";

/// Extra wait on top of the script budget before the caller gives up.
const GRACE: Duration = Duration::from_secs(1);

/// Source name of a script file: its file stem.
pub fn source_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Every `*.lua` file directly inside `dir`, sorted by path. A missing directory holds none.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut scripts = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == EXTENSION) {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

/// Path of the script for source `name` inside `dir`. Names that would leave `dir` are refused.
pub fn script_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || name.contains(['/', '\\']) {
        return Err(KageError::source_not_found(name));
    }
    Ok(dir.join(format!("{name}.{EXTENSION}")))
}

/// A [`Source`] backed by one script file.
///
/// Calls are serialized: the interpreter is single-threaded. A call that
/// times out or is cancelled discards the interpreter and the next call
/// starts from a freshly loaded script.
pub struct LuaSource {
    name: String,
    id: String,
    path: PathBuf,
    options: Arc<SandboxOptions>,
    slot: Mutex<Slot>,
    cancel: CancellationToken,
}

/// The interpreter in use. A call that never returns keeps its slot locked,
/// so an abandoned slot is swapped out rather than waited on.
type Slot = Arc<Mutex<Option<Sandbox>>>;

impl LuaSource {
    /// Load the script at `path`, running its top level once.
    pub async fn load(
        path: PathBuf,
        settings: &Settings,
        http: HttpClient,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let name = source_name(&path);
        let options = Arc::new(SandboxOptions {
            lenient: settings.lenient_scripts,
            timeout: settings.script_timeout(),
            memory_limit: settings.script_memory_limit_mb.saturating_mul(1024 * 1024),
            http,
            cancel: cancel.clone(),
        });

        let sandbox = {
            let (path, script, options) = (path.clone(), name.clone(), options.clone());
            tokio::task::spawn_blocking(move || Sandbox::load(&path, &script, &options))
                .await
                .map_err(|e| KageError::script(&name, e))??
        };
        info!("[LUA] Loaded custom source {} from {}", name, path.display());

        Ok(Self {
            id: format!("{}{}", source_id(&name), ID_SUFFIX),
            name,
            path,
            options,
            slot: Mutex::new(Arc::new(Mutex::new(Some(sandbox)))),
            cancel,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn call(&self, function: &'static str, argument: &str) -> Result<Vec<EntityFields>> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let options = self.options.clone();
        let (path, name, argument) = (self.path.clone(), self.name.clone(), argument.to_string());

        debug!("[LUA] {} calling {}({:?})", self.name, function, argument);
        let task = tokio::task::spawn_blocking(move || {
            let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                debug!("[LUA] Reloading {} after an interrupted call", name);
                *slot = Some(Sandbox::load(&path, &name, &options)?);
            }
            let sandbox = slot
                .as_ref()
                .ok_or_else(|| KageError::script(&name, "interpreter unavailable"))?;

            let result = sandbox.invoke(function, &argument);
            if matches!(result, Err(KageError::Timeout(_)) | Err(KageError::Cancelled(_))) {
                *slot = None;
            }
            result
        });

        let deadline = self.options.timeout + GRACE;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.abandon();
                Err(KageError::cancelled(format!("{}::{}", self.name, function)))
            }
            joined = tokio::time::timeout(deadline, task) => match joined {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(KageError::script(&self.name, e)),
                Err(_) => {
                    warn!("[LUA] {}::{} did not yield within {:?}", self.name, function, deadline);
                    self.abandon();
                    Err(KageError::timeout(format!("{}::{} exceeded {:?}", self.name, function, deadline)))
                }
            },
        }
    }

    /// Leave the running interpreter to its blocking thread; the next call reloads the script.
    fn abandon(&self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Arc::new(Mutex::new(None));
    }
}

#[async_trait::async_trait]
impl Source for LuaSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> &str {
        &self.id
    }

    async fn search(&self, query: &str) -> Result<Vec<Manga>> {
        info!("[LUA] {} searching {:?}", self.name, query);
        let entities = self.call(SEARCH_MANGA_FN, query).await?;

        let mangas: Vec<Manga> = dedup_by_url(entities, |e| e.url.as_str())
            .into_iter()
            .map(|e| Manga {
                name: e.name.unwrap_or_default(),
                url: e.url,
                index: e.index,
                cover: e.cover,
                volume: e.volume,
                source: self.id.clone(),
            })
            .collect();

        info!("[LUA] {} found {} mangas for {:?}", self.name, mangas.len(), query);
        Ok(mangas)
    }

    async fn chapters_of(&self, manga: &Manga) -> Result<Vec<Chapter>> {
        info!("[LUA] {} listing chapters of {}", self.name, manga.url);
        let entities = self.call(MANGA_CHAPTERS_FN, &manga.url).await?;

        let entities = dedup_by_url(entities, |e| e.url.as_str());
        if entities.is_empty() {
            return Err(KageError::not_found(format!(
                "no chapters for {} on {}",
                manga.url, self.name
            )));
        }

        Ok(entities
            .into_iter()
            .map(|e| {
                let mut chapter = Chapter::new(e.name.unwrap_or_default(), e.url, e.index, manga);
                chapter.volume = e.volume;
                chapter
            })
            .collect())
    }

    async fn pages_of(&self, chapter: &Chapter) -> Result<Vec<Page>> {
        info!("[LUA] {} resolving pages of {}", self.name, chapter.url);
        let entities = self.call(CHAPTER_PAGES_FN, &chapter.url).await?;
        if entities.is_empty() {
            return Err(KageError::not_found(format!(
                "no pages for {} on {}",
                chapter.url, self.name
            )));
        }

        let mut pages = Vec::with_capacity(entities.len());
        for (position, entity) in entities.into_iter().enumerate() {
            pages.push(Page::new(entity.url, index_at(position)?, chapter));
        }
        Ok(pages)
    }
}
