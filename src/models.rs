use serde::{Deserialize, Serialize};

use crate::error::{KageError, Result};

/// A title found by a source search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manga {
    pub name: String,
    /// Unique within one search result of one source.
    pub url: String,
    /// Rank in the result set it was discovered in.
    pub index: u16,
    pub cover: Option<String>,
    pub volume: Option<String>,
    /// Id of the source that produced this manga.
    #[serde(default)]
    pub source: String,
}

/// Non-owning link from a chapter back to its manga.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MangaRef {
    pub name: String,
    pub url: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub name: String,
    /// Unique within one manga.
    pub url: String,
    pub index: u16,
    pub volume: Option<String>,
    #[serde(default)]
    pub manga: MangaRef,
}

/// Non-owning link from a page back to its chapter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChapterRef {
    pub name: String,
    pub url: String,
    pub index: u16,
    pub manga: MangaRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Image location.
    pub url: String,
    /// Position in the chapter, assigned from the returned order.
    pub index: u16,
    #[serde(default)]
    pub chapter: ChapterRef,
}

impl Manga {
    pub fn new(name: impl Into<String>, url: impl Into<String>, index: u16) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            index,
            cover: None,
            volume: None,
            source: String::new(),
        }
    }

    pub fn to_ref(&self) -> MangaRef {
        MangaRef {
            name: self.name.clone(),
            url: self.url.clone(),
            source: self.source.clone(),
        }
    }
}

impl Chapter {
    pub fn new(name: impl Into<String>, url: impl Into<String>, index: u16, manga: &Manga) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            index,
            volume: None,
            manga: manga.to_ref(),
        }
    }

    pub fn to_ref(&self) -> ChapterRef {
        ChapterRef {
            name: self.name.clone(),
            url: self.url.clone(),
            index: self.index,
            manga: self.manga.clone(),
        }
    }

    /// Point this chapter at `manga`, replacing whatever it was attached to.
    pub fn rebind(&mut self, manga: &Manga) {
        self.manga = manga.to_ref();
    }
}

impl Page {
    pub fn new(url: impl Into<String>, index: u16, chapter: &Chapter) -> Self {
        Self {
            url: url.into(),
            index,
            chapter: chapter.to_ref(),
        }
    }
}

/// Convert a collection position into an entity index.
pub fn index_at(position: usize) -> Result<u16> {
    u16::try_from(position)
        .map_err(|_| KageError::parse(format!("collection position {position} exceeds {}", u16::MAX)))
}

/// Treat an empty extracted string as an absent optional field.
pub fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Drop entries whose URL was already seen, keeping the first occurrence.
pub fn dedup_by_url<T>(items: Vec<T>, url: impl Fn(&T) -> &str) -> Vec<T> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(url(item).to_string()))
        .collect()
}

impl std::fmt::Display for Manga {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl std::fmt::Display for Chapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.volume {
            Some(volume) => write!(f, "{} ({})", self.name, volume),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebind_replaces_manga_reference() {
        let first = Manga::new("Alpha", "/a", 0);
        let mut other = Manga::new("Alpha", "/a", 3);
        other.source = "mirror".to_string();

        let mut chapter = Chapter::new("Chapter 1", "/a/1", 0, &first);
        chapter.rebind(&other);

        assert_eq!(chapter.manga.source, "mirror");
        assert_eq!(chapter.manga.url, "/a");
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let items = vec![
            Manga::new("Alpha", "/a", 0),
            Manga::new("Alpha again", "/a", 1),
            Manga::new("Beta", "/b", 2),
        ];
        let unique = dedup_by_url(items, |m| m.url.as_str());
        let names: Vec<_> = unique.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);
    }

    #[test]
    fn empty_strings_are_absent() {
        assert_eq!(non_empty("  ".to_string()), None);
        assert_eq!(non_empty(" Vol. 2 ".to_string()), Some("Vol. 2".to_string()));
    }

    #[test]
    fn index_at_rejects_overflow() {
        assert_eq!(index_at(7).ok(), Some(7));
        assert!(index_at(usize::from(u16::MAX) + 1).is_err());
    }
}
