use crate::generic::extract::{attr, find_attr, find_text, text};
use crate::generic::{Configuration, Extractor};
use std::time::Duration;
use url::form_urlencoded;

pub const NAME: &str = "Mangapill";
pub const BASE_URL: &str = "https://mangapill.com";

fn search_url(base_url: &str, query: &str) -> String {
    let query = query.trim().to_lowercase();
    let query: String = form_urlencoded::byte_serialize(query.as_bytes()).collect();
    format!("{base_url}/search?q={query}&type=&status=")
}

pub fn configuration() -> Configuration {
    Configuration {
        name: NAME.to_string(),
        base_url: BASE_URL.to_string(),
        search_url,
        delay: Duration::from_millis(50),
        parallelism: 50,
        // Chapters are listed newest first.
        reverse_chapters: true,
        manga_extractor: Extractor::new("div.my-3.grid.justify-end.gap-3.grid-cols-2 > div", |node| {
            find_attr(node, "div a:first-child", "href")
        })
        .name(|node| find_text(node, "div a div.leading-tight"))
        .cover(|node| find_attr(node, "img", "data-src")),
        chapter_extractor: Extractor::new("div[data-filter-list] a", |node| attr(node, "href"))
            .name(text),
        page_extractor: Extractor::new("picture img", |node| attr(node, "data-src")),
    }
}
