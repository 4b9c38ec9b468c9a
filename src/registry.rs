use crate::cache::{CacheStore, Cached};
use crate::config::Settings;
use crate::custom::{self, LuaSource};
use crate::error::{KageError, Result};
use crate::generic::{Configuration, GenericSource};
use crate::providers;
use crate::traits::Source;
use crate::utils::{source_id, HttpClient};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Builtin,
    Custom,
}

enum Origin {
    Builtin(Configuration),
    Custom(PathBuf),
}

/// A source that can be constructed on demand.
pub struct Provider {
    pub id: String,
    pub name: String,
    origin: Origin,
}

impl Provider {
    fn builtin(config: Configuration) -> Self {
        Self {
            id: config.id(),
            name: config.name.clone(),
            origin: Origin::Builtin(config),
        }
    }

    fn custom(path: PathBuf) -> Self {
        let name = custom::source_name(&path);
        Self {
            id: format!("{}-lua", source_id(&name)),
            name,
            origin: Origin::Custom(path),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self.origin {
            Origin::Builtin(_) => ProviderKind::Builtin,
            Origin::Custom(_) => ProviderKind::Custom,
        }
    }
}

/// Registry of built-in and custom providers
pub struct ProviderRegistry {
    providers: Vec<Provider>,
    settings: Settings,
    http: HttpClient,
    store: Arc<dyn CacheStore>,
    cancel: CancellationToken,
}

impl ProviderRegistry {
    /// Register the built-in sites and every script found in the sources directory.
    pub fn new(
        settings: Settings,
        http: HttpClient,
        store: Arc<dyn CacheStore>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut registry = Self {
            providers: Vec::new(),
            settings,
            http,
            store,
            cancel,
        };

        for config in providers::configurations() {
            registry.register(Provider::builtin(config));
        }
        for path in custom::discover(&registry.settings.sources_dir)? {
            registry.register(Provider::custom(path));
        }

        debug!("[REGISTRY] {} providers registered", registry.providers.len());
        Ok(registry)
    }

    fn register(&mut self, provider: Provider) {
        if self.get(&provider.name).is_some() {
            warn!(
                "[REGISTRY] Ignoring {:?} provider {}: the name is already taken",
                provider.kind(),
                provider.name
            );
            return;
        }
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn builtins(&self) -> impl Iterator<Item = &Provider> {
        self.providers
            .iter()
            .filter(|p| p.kind() == ProviderKind::Builtin)
    }

    pub fn customs(&self) -> impl Iterator<Item = &Provider> {
        self.providers
            .iter()
            .filter(|p| p.kind() == ProviderKind::Custom)
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name.as_str()).collect()
    }

    /// Construct the named source, wrapped in the shared result cache.
    pub async fn create(&self, name: &str) -> Result<Box<dyn Source>> {
        let provider = self
            .get(name)
            .ok_or_else(|| KageError::source_not_found(name))?;

        info!("[REGISTRY] Creating source {}", provider.name);
        let source: Box<dyn Source> = match &provider.origin {
            Origin::Builtin(config) => {
                let source = GenericSource::new(config.clone(), Arc::new(self.http.clone()))?
                    .with_cancellation(self.cancel.clone());
                Box::new(Cached::new(source, self.store.clone()))
            }
            Origin::Custom(path) => {
                let source = LuaSource::load(
                    path.clone(),
                    &self.settings,
                    self.http.clone(),
                    self.cancel.clone(),
                )
                .await?;
                Box::new(Cached::new(source, self.store.clone()))
            }
        };
        Ok(source)
    }

    /// Construct every named source, failing on the first unknown or broken one.
    pub async fn create_all(&self, names: &[String]) -> Result<Vec<Box<dyn Source>>> {
        let mut sources = Vec::with_capacity(names.len());
        for name in names {
            sources.push(self.create(name).await?);
        }
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use std::fs;
    use tempfile::TempDir;

    const SCRIPT: &str = r#"
        function SearchManga(q) return {} end
        function MangaChapters(u) return {} end
        function ChapterPages(u) return {} end
    "#;

    fn registry(dir: &TempDir) -> ProviderRegistry {
        let settings = Settings {
            sources_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let http = HttpClient::new(&settings.http).unwrap();
        ProviderRegistry::new(settings, http, Arc::new(MemoryStore::new()), CancellationToken::new()).unwrap()
    }

    #[test]
    fn lists_builtins_then_customs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Manga Site.lua"), SCRIPT).unwrap();
        fs::write(dir.path().join("readme.md"), "").unwrap();

        let registry = registry(&dir);
        assert_eq!(registry.names(), vec!["Mangapill", "Manga Site"]);

        let builtin: Vec<_> = registry.builtins().map(|p| p.id.as_str()).collect();
        assert_eq!(builtin, vec!["mangapill"]);
        let customs: Vec<_> = registry.customs().map(|p| p.id.as_str()).collect();
        assert_eq!(customs, vec!["manga-site-lua"]);
    }

    #[test]
    fn custom_cannot_shadow_builtin() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Mangapill.lua"), SCRIPT).unwrap();

        let registry = registry(&dir);
        assert_eq!(registry.customs().count(), 0);
        assert_eq!(registry.get("Mangapill").map(Provider::kind), Some(ProviderKind::Builtin));
    }

    #[tokio::test]
    async fn creates_sources_by_name() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("local.lua"), SCRIPT).unwrap();
        let registry = registry(&dir);

        let builtin = registry.create("Mangapill").await.unwrap();
        assert_eq!(builtin.id(), "mangapill");

        let custom = registry.create("local").await.unwrap();
        assert_eq!(custom.id(), "local-lua");
        assert!(custom.search("anything").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_source_is_reported() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        assert!(registry.get("mangapill").is_none());
        let err = registry
            .create_all(&["Mangapill".to_string(), "Nowhere".to_string()])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, KageError::SourceNotFound(ref name) if name == "Nowhere"));
    }
}
