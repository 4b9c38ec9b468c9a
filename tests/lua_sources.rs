use kage::cache::{Cached, MemoryStore};
use kage::config::Settings;
use kage::custom::{template, LuaSource};
use kage::registry::ProviderRegistry;
use kage::utils::HttpClient;
use kage::{KageError, Source};
use mockito::Server;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::assert_err;
use tokio_util::sync::CancellationToken;

const LISTING: &str = r#"
<ul>
  <li class="manga"><a href="/m/alpha">Alpha</a></li>
  <li class="manga"><a href="/m/beta">Beta</a></li>
</ul>"#;

fn script(base_url: &str) -> String {
    format!(
        r#"
local base = "{base_url}"

function SearchManga(query)
    local mangas = {{}}
    for i, node in ipairs(html.select(http.get(base .. "/list"), "li.manga a")) do
        if string.find(string.lower(node.text), query, 1, true) then
            mangas[#mangas + 1] = {{ url = node.attrs.href, name = node.text }}
        end
    end
    return mangas
end

function MangaChapters(url)
    return {{ {{ url = url .. "/1", name = "Chapter 1" }}, {{ url = url .. "/2", name = "Chapter 2" }} }}
end

function ChapterPages(url)
    return {{ {{ url = url .. "/01.png" }} }}
end
"#
    )
}

fn settings(dir: &TempDir) -> Settings {
    Settings {
        sources_dir: dir.path().to_path_buf(),
        script_timeout_secs: 5,
        ..Settings::default()
    }
}

fn write(dir: &TempDir, name: &str, code: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, code).unwrap();
    path
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn script_scrapes_through_host_modules() {
    let mut server = Server::new_async().await;
    let listing = server
        .mock("GET", "/list")
        .with_body(LISTING)
        .expect(1)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let path = write(&dir, "Fixture.lua", &script(&server.url()));
    let http = HttpClient::new(&settings.http).unwrap();
    let source = LuaSource::load(path, &settings, http, CancellationToken::new())
        .await
        .unwrap();
    let source = Cached::new(source, Arc::new(MemoryStore::new()));

    let mangas = source.search("alp").await.unwrap();
    assert_eq!(mangas.len(), 1);
    assert_eq!(mangas[0].name, "Alpha");
    assert_eq!(mangas[0].url, "/m/alpha");
    assert_eq!(mangas[0].source, "fixture-lua");

    // Served from cache: the listing is requested once.
    assert_eq!(source.search("alp").await.unwrap(), mangas);

    let chapters = source.chapters_of(&mangas[0]).await.unwrap();
    assert_eq!(chapters.len(), 2);
    assert_eq!(chapters[1].index, 2);
    assert_eq!(chapters[1].manga.source, "fixture-lua");

    let pages = source.pages_of(&chapters[1]).await.unwrap();
    assert_eq!(pages[0].index, 0);
    assert_eq!(pages[0].url, "/m/alpha/2/01.png");

    listing.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_host_fetch_keeps_its_error_class() {
    let mut server = Server::new_async().await;
    let _gone = server
        .mock("GET", "/list")
        .with_status(404)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let path = write(&dir, "gone.lua", &script(&server.url()));
    let http = HttpClient::new(&settings.http).unwrap();
    let source = LuaSource::load(path, &settings, http, CancellationToken::new())
        .await
        .unwrap();

    let err = assert_err!(source.search("alpha").await);
    assert!(matches!(err, KageError::Fetch { ref url, .. } if url.ends_with("/list")), "{err}");
    assert!(err.to_string().contains("404"), "{err}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn generated_template_loads_as_a_source() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let file = template::file_name("New Site").unwrap();
    write(&dir, &file, &template::render("New Site", "https://new.example", "tester"));

    let http = HttpClient::new(&settings.http).unwrap();
    let registry =
        ProviderRegistry::new(settings, http, Arc::new(MemoryStore::new()), CancellationToken::new()).unwrap();
    assert!(registry.names().contains(&"New Site"));

    let source = registry.create("New Site").await.unwrap();
    assert_eq!(source.id(), "new-site-lua");
    assert!(source.search("anything").await.unwrap().is_empty());

    let manga = kage::Manga::new("X", "/x", 0);
    let err = source.chapters_of(&manga).await.unwrap_err();
    assert!(matches!(err, KageError::NotFound(_)));
}
