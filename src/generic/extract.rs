//! Small node accessors used by site configurations.

use crate::error::{KageError, Result};
use scraper::{ElementRef, Selector};

pub fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| KageError::parse(format!("invalid selector {selector:?}: {e:?}")))
}

/// Trimmed text content of the node.
pub fn text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

pub fn attr(element: &ElementRef<'_>, name: &str) -> String {
    element.value().attr(name).unwrap_or_default().to_string()
}

/// Trimmed text of the first descendant matching `selector`.
pub fn find_text(element: &ElementRef<'_>, selector: &str) -> String {
    find(element, selector).map(|el| text(&el)).unwrap_or_default()
}

/// Attribute of the first descendant matching `selector`.
pub fn find_attr(element: &ElementRef<'_>, selector: &str, name: &str) -> String {
    find(element, selector)
        .map(|el| attr(&el, name))
        .unwrap_or_default()
}

fn find<'a>(element: &ElementRef<'a>, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    element.select(&selector).next()
}
