use crate::error::{KageError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "kage";
pub const ENV_PREFIX: &str = "KAGE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory scanned for custom `.lua` sources.
    pub sources_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub cache_ttl_hours: u64,
    /// Load scripts that lack some entry points instead of refusing them.
    pub lenient_scripts: bool,
    pub script_timeout_secs: u64,
    pub script_memory_limit_mb: usize,
    /// Source names used by inline mode when none are given.
    pub default_sources: Vec<String>,
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
}

impl Settings {
    /// Defaults, then the TOML file at `path` if it exists, then `KAGE_*` variables.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("default_sources"),
            )
            .build()?
            .try_deserialize::<Settings>()?;

        Ok(settings)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| KageError::parse(format!("failed to encode settings: {e}")))?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        // Capped at roughly a century; chrono panics on out-of-range durations.
        chrono::Duration::hours(self.cache_ttl_hours.min(876_000) as i64)
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            sources_dir: config_dir().join("sources"),
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_NAME),
            cache_ttl_hours: 24,
            lenient_scripts: false,
            script_timeout_secs: 30,
            script_memory_limit_mb: 64,
            default_sources: vec!["Mangapill".to_string()],
            http: HttpSettings::default(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            connect_timeout_secs: 10,
            timeout_secs: 120,
            pool_max_idle_per_host: 100,
            user_agent: format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.cache_ttl_hours, 24);
        assert_eq!(settings.default_sources, vec!["Mangapill".to_string()]);
        assert!(!settings.lenient_scripts);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "lenient_scripts = true\nscript_timeout_secs = 5\n\n[http]\ntimeout_secs = 9\n",
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert!(settings.lenient_scripts);
        assert_eq!(settings.script_timeout(), Duration::from_secs(5));
        assert_eq!(settings.http.timeout_secs, 9);
        assert_eq!(settings.http.connect_timeout_secs, 10);
    }

    #[test]
    fn save_then_load_keeps_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let settings = Settings {
            cache_ttl_hours: 2,
            ..Settings::default()
        };
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.cache_ttl_hours, 2);
    }
}
