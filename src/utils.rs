use crate::config::HttpSettings;
use crate::error::{KageError, Result};
use crate::traits::Fetch;
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Process-wide HTTP transport. Clones share one connection pool.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(30))
            .user_agent(settings.user_agent.as_str())
            .build()
            .map_err(|e| KageError::fetch("", format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    pub async fn get(&self, url: &str) -> Result<String> {
        debug!("[HTTP] GET {}", url);
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(KageError::fetch(url, format!("unexpected status {status}")));
        }

        let text = response.text().await?;
        Ok(text)
    }
}

#[async_trait::async_trait]
impl Fetch for HttpClient {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.get(url).await
    }
}

/// Run `fut` unless `token` fires first, in which case it is dropped.
pub async fn cancellable<T, F>(token: &CancellationToken, context: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(KageError::cancelled(context)),
        result = fut => result,
    }
}

/// Resolve a link found in a document against the site it came from.
pub fn resolve_url(base_url: &str, link: &str) -> Result<String> {
    if link.starts_with("http://") || link.starts_with("https://") {
        return Ok(link.to_string());
    }
    if let Some(rest) = link.strip_prefix("//") {
        return Ok(format!("https://{rest}"));
    }
    let base = Url::parse(base_url)?;
    Ok(base.join(link)?.to_string())
}

/// Make `name` safe to use as a file name.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('.')
        .trim_matches(' ')
        .to_string()
}

/// Derive a source id from its display name: "Manga Pill" -> "manga-pill".
pub fn source_id(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_links() {
        assert_eq!(
            resolve_url("https://mangapill.com", "/manga/1/alpha").unwrap(),
            "https://mangapill.com/manga/1/alpha"
        );
        assert_eq!(
            resolve_url("https://mangapill.com", "https://cdn.example/p.jpg").unwrap(),
            "https://cdn.example/p.jpg"
        );
        assert_eq!(
            resolve_url("https://mangapill.com", "//cdn.example/p.jpg").unwrap(),
            "https://cdn.example/p.jpg"
        );
    }

    #[test]
    fn sanitizes_filenames() {
        assert_eq!(sanitize_filename("My: Site?"), "My_ Site_");
        assert_eq!(sanitize_filename("..hidden.."), "hidden");
    }

    #[test]
    fn source_ids_are_lowercase_and_dashed() {
        assert_eq!(source_id("Mangapill"), "mangapill");
        assert_eq!(source_id("Manga  Pill"), "manga-pill");
    }

    #[tokio::test]
    async fn cancelled_token_wins() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<()> = cancellable(&token, "search", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(KageError::Cancelled(_))));
    }
}
