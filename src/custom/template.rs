//! Starter script written by `kage sources gen`.

use super::{CHAPTER_PAGES_FN, EXTENSION, MANGA_CHAPTERS_FN, SEARCH_MANGA_FN};
use crate::error::{KageError, Result};
use crate::utils::sanitize_filename;
use regex::Regex;

const TEMPLATE: &str = r#"--------------------------------
-- @name    {name}
-- @url     {url}
-- @author  {author}
--------------------------------

-- Available modules:
--   http.get(url)                  -> response body as a string
--   html.select(document, selector) -> array of { text, html, attrs }

local base = "{url}"

--- Search for mangas matching `query`.
-- Return a table keyed by index: { [1] = { url = ..., name = ..., cover = ... }, ... }
function {search}(query)
    local mangas = {}

    -- local page = http.get(base .. "/search?q=" .. query)
    -- for i, node in ipairs(html.select(page, ".manga a")) do
    --     mangas[i] = { url = node.attrs.href, name = node.text }
    -- end

    return mangas
end

--- List the chapters of the manga at `mangaURL`.
-- Return a table keyed by index: { [1] = { url = ..., name = ..., volume = ... }, ... }
function {chapters}(mangaURL)
    local chapters = {}

    return chapters
end

--- List the page images of the chapter at `chapterURL`.
-- Return a table keyed by index: { [1] = { url = ... }, ... }
function {pages}(chapterURL)
    local pages = {}

    return pages
end
"#;

/// Render the starter script for a site.
pub fn render(name: &str, url: &str, author: &str) -> String {
    TEMPLATE
        .replace("{name}", name)
        .replace("{url}", url)
        .replace("{author}", author)
        .replace("{search}", SEARCH_MANGA_FN)
        .replace("{chapters}", MANGA_CHAPTERS_FN)
        .replace("{pages}", CHAPTER_PAGES_FN)
}

/// File name for a generated script: whitespace runs collapsed, unsafe characters replaced.
pub fn file_name(name: &str) -> Result<String> {
    let spaces = Regex::new(r"\s+").map_err(|e| KageError::parse(e.to_string()))?;
    let stem = sanitize_filename(&spaces.replace_all(name.trim(), " "));
    if stem.is_empty() {
        return Err(KageError::parse(format!("{name:?} is not a usable source name")));
    }
    Ok(format!("{stem}.{EXTENSION}"))
}

/// Author recorded in generated scripts.
pub fn default_author() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "Anonymous".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::{Lua, Value};

    #[test]
    fn rendered_template_defines_every_entry_point() {
        let code = render("My Site", "https://example.com", "tester");
        assert!(code.contains("@url     https://example.com"));

        let lua = Lua::new();
        lua.load(&code).exec().unwrap();
        for function in super::super::ENTRY_POINTS {
            assert!(
                matches!(lua.globals().get::<Value>(function).unwrap(), Value::Function(_)),
                "{function} missing"
            );
        }
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(file_name("My   Site").unwrap(), "My Site.lua");
        assert_eq!(file_name("a/b: c").unwrap(), "a_b_ c.lua");
        assert!(file_name("  ..  ").is_err());
    }
}
