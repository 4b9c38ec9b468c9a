//! Manga content acquisition: search sites, list chapters and resolve page
//! images through built-in scrapers or user-supplied Lua scripts.

pub mod cache;
pub mod config;
pub mod custom;
pub mod error;
pub mod generic;
pub mod inline;
pub mod models;
pub mod providers;
pub mod registry;
pub mod traits;
pub mod utils;

pub use error::{KageError, Result};
pub use models::{Chapter, Manga, Page};
pub use traits::Source;
