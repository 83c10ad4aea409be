//! Expanding a shared playlist link into an ordered list of items.

pub mod command;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ResolveError;
use crate::worker::WorkItem;

pub use command::CommandResolver;

/// One entry of a resolved playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedItem {
    pub locator: String,
    pub title: Option<String>,
    pub uploader: Option<String>,
}

impl ResolvedItem {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            title: None,
            uploader: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = Some(uploader.into());
        self
    }

    /// Best-effort human name: `uploader - title`, title alone, or the locator.
    pub fn display_name(&self) -> String {
        match (non_empty(&self.uploader), non_empty(&self.title)) {
            (Some(uploader), Some(title)) => format!("{} - {}", uploader, title),
            (None, Some(title)) => title.to_string(),
            _ => self.locator.clone(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPlaylist {
    pub title: Option<String>,
    pub items: Vec<ResolvedItem>,
}

#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, locator: &str) -> Result<ResolvedPlaylist, ResolveError>;
}

/// Only absolute http(s) URLs with a host are accepted as source locators.
pub fn validate_locator(locator: &str) -> Result<(), ResolveError> {
    let trimmed = locator.trim();
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .ok_or_else(|| ResolveError::UnsupportedLocator(locator.to_string()))?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return Err(ResolveError::UnsupportedLocator(locator.to_string()));
    }
    Ok(())
}

/// Turn a resolved playlist into 1-based work items, keeping at most
/// `max_items` entries.
pub fn build_items(playlist: &ResolvedPlaylist, max_items: usize) -> Vec<WorkItem> {
    if playlist.items.len() > max_items {
        log::warn!(
            "Playlist has {} items, keeping the first {}",
            playlist.items.len(),
            max_items
        );
    }

    playlist
        .items
        .iter()
        .take(max_items)
        .enumerate()
        .map(|(i, item)| WorkItem::new(i + 1, item.locator.clone(), item.display_name()))
        .collect()
}

/// Resolver that always returns a fixed playlist. Useful for embedding and tests.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    playlist: ResolvedPlaylist,
}

impl StaticResolver {
    pub fn new(playlist: ResolvedPlaylist) -> Self {
        Self { playlist }
    }
}

#[async_trait]
impl SourceResolver for StaticResolver {
    async fn resolve(&self, locator: &str) -> Result<ResolvedPlaylist, ResolveError> {
        validate_locator(locator)?;
        if self.playlist.items.is_empty() {
            return Err(ResolveError::Empty);
        }
        Ok(self.playlist.clone())
    }
}
