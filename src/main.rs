use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use kage::cache::{CacheStore, FileStore};
use kage::config::Settings;
use kage::custom::{self, template};
use kage::inline::{self, ChapterFilter, MangaPicker};
use kage::registry::ProviderRegistry;
use kage::utils::HttpClient;
use kage::KageError;

#[derive(Parser)]
#[command(name = "kage")]
#[command(about = "Search manga sites, list chapters and resolve page images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search non-interactively and print the result as JSON
    ///
    /// Manga selectors: first, last, <index>. Omitted means every manga.
    /// Chapter selectors: first, last, all, <index>, <from>-<to>, @<substring>@.
    Inline {
        /// Query to search for
        #[arg(short, long)]
        query: String,
        /// Manga selector
        #[arg(short, long)]
        manga: Option<String>,
        /// Chapter selector
        #[arg(short, long)]
        chapters: Option<String>,
        /// Resolve the pages of every selected chapter
        #[arg(short, long, requires = "chapters")]
        populate_pages: bool,
        /// Source to search, repeatable (defaults to `default_sources`)
        #[arg(short, long = "source")]
        sources: Vec<String>,
        /// Write the JSON to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Manage manga sources
    Sources {
        #[command(subcommand)]
        command: SourcesCommand,
    },
    /// Show where kage keeps its files
    #[command(group(ArgGroup::new("target").multiple(false)))]
    Where {
        /// Configuration file path
        #[arg(long = "config-file", group = "target")]
        config_file: bool,
        /// Custom sources directory
        #[arg(long, group = "target")]
        sources: bool,
        /// Cache directory
        #[arg(long, group = "target")]
        cache: bool,
    },
    /// Remove cached data
    Clear {
        /// Drop every cached search and chapter listing
        #[arg(long, required = true)]
        cache: bool,
    },
}

#[derive(Subcommand)]
enum SourcesCommand {
    /// List available sources
    List {
        /// Only built-in sources
        #[arg(short, long, conflicts_with = "custom")]
        builtin: bool,
        /// Only custom sources
        #[arg(short, long)]
        custom: bool,
        /// Do not print headers
        #[arg(short, long)]
        raw: bool,
    },
    /// Generate a Lua source template in the sources directory
    Gen {
        /// Name of the source
        #[arg(short, long)]
        name: String,
        /// URL of the website
        #[arg(short, long)]
        url: String,
    },
    /// Remove custom sources
    Remove {
        /// Name of the source to remove, repeatable
        #[arg(short, long, required = true)]
        name: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let settings = Settings::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;
    debug!("Loaded settings from {}", config_path.display());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling outstanding work");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Inline {
            query,
            manga,
            chapters,
            populate_pages,
            sources,
            output,
        } => {
            let request = InlineRequest {
                query,
                manga,
                chapters,
                populate_pages,
                sources,
            };
            match run_inline(&settings, cancel, request).await {
                Ok(json) => write_output(output.as_deref(), &json)?,
                Err(e) => {
                    let payload = inline::error_payload(e.kind(), &e.to_string());
                    println!("{}", serde_json::to_string_pretty(&payload)?);
                    std::process::exit(1);
                }
            }
        }
        Commands::Sources { command } => match command {
            SourcesCommand::List { builtin, custom, raw } => {
                list_sources(&settings, cancel, builtin, custom, raw)?;
            }
            SourcesCommand::Gen { name, url } => {
                let path = generate_source(&settings, &name, &url)?;
                println!("{}", path.display());
            }
            SourcesCommand::Remove { name } => {
                for name in name {
                    remove_source(&settings, &name)?;
                    println!("Removed {}", name);
                }
            }
        },
        Commands::Where {
            config_file,
            sources,
            cache,
        } => {
            show_where(&config_path, &settings, config_file, sources, cache);
        }
        Commands::Clear { cache } => {
            if cache {
                info!("Clearing cache at {}", settings.cache_dir.display());
                FileStore::new(settings.cache_dir.clone(), settings.cache_ttl())
                    .clear()
                    .await?;
                println!("Cleared {}", settings.cache_dir.display());
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kage={}", level)));

    // stdout carries command output, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn build_registry(settings: &Settings, cancel: CancellationToken) -> kage::Result<ProviderRegistry> {
    let http = HttpClient::new(&settings.http)?;
    let store: Arc<dyn CacheStore> = Arc::new(FileStore::new(settings.cache_dir.clone(), settings.cache_ttl()));
    ProviderRegistry::new(settings.clone(), http, store, cancel)
}

struct InlineRequest {
    query: String,
    manga: Option<String>,
    chapters: Option<String>,
    populate_pages: bool,
    sources: Vec<String>,
}

async fn run_inline(
    settings: &Settings,
    cancel: CancellationToken,
    request: InlineRequest,
) -> kage::Result<String> {
    let options = inline::Options {
        query: request.query,
        manga: request.manga.as_deref().map(str::parse::<MangaPicker>).transpose()?,
        chapters: request.chapters.as_deref().map(str::parse::<ChapterFilter>).transpose()?,
        populate_pages: request.populate_pages,
    };

    let names = if request.sources.is_empty() {
        settings.default_sources.clone()
    } else {
        request.sources
    };
    if names.is_empty() {
        return Err(KageError::Config(config::ConfigError::Message(
            "no source selected and default_sources is empty".to_string(),
        )));
    }

    let registry = build_registry(settings, cancel)?;
    let sources = registry.create_all(&names).await?;
    let output = inline::run(&sources, &options).await?;
    Ok(serde_json::to_string_pretty(&output)?)
}

fn write_output(path: Option<&Path>, json: &str) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
            info!("Wrote inline output to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn list_sources(settings: &Settings, cancel: CancellationToken, builtin: bool, custom: bool, raw: bool) -> Result<()> {
    let registry = build_registry(settings, cancel)?;
    let header = |title: &str| {
        if !raw {
            println!("{}", title);
        }
    };

    if !custom {
        header("Builtin:");
        for provider in registry.builtins() {
            println!("{}", provider.name);
        }
    }
    if !builtin && !custom && !raw {
        println!();
    }
    if !builtin {
        header("Custom:");
        for provider in registry.customs() {
            println!("{}", provider.name);
        }
    }

    Ok(())
}

fn generate_source(settings: &Settings, name: &str, url: &str) -> Result<PathBuf> {
    let path = settings.sources_dir.join(template::file_name(name)?);
    if path.exists() {
        bail!("{} already exists", path.display());
    }

    std::fs::create_dir_all(&settings.sources_dir)
        .with_context(|| format!("failed to create {}", settings.sources_dir.display()))?;
    std::fs::write(&path, template::render(name, url, &template::default_author()))
        .with_context(|| format!("failed to write {}", path.display()))?;

    info!("Generated source template {}", path.display());
    Ok(path)
}

fn remove_source(settings: &Settings, name: &str) -> Result<()> {
    let path = custom::script_path(&settings.sources_dir, name)?;
    std::fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(())
}

fn show_where(config_path: &Path, settings: &Settings, config_file: bool, sources: bool, cache: bool) {
    let targets = [
        ("Config", "--config-file", config_path, config_file),
        ("Sources", "--sources", settings.sources_dir.as_path(), sources),
        ("Cache", "--cache", settings.cache_dir.as_path(), cache),
    ];

    if let Some((_, _, path, _)) = targets.iter().find(|(_, _, _, selected)| *selected) {
        println!("{}", path.display());
        return;
    }

    for (i, (name, flag, path, _)) in targets.iter().enumerate() {
        println!("{}? {}", name, flag);
        println!("{}", path.display());
        if i < targets.len() - 1 {
            println!();
        }
    }
}
