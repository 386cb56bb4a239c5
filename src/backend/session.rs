use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::error::Result;
use super::mangadex::ChapterSource;

/// Which image bucket of an at-home session to read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageQuality {
    Data,
    DataSaver,
}

impl PageQuality {
    pub fn path_segment(self) -> &'static str {
        match self {
            PageQuality::Data => "data",
            PageQuality::DataSaver => "data-saver",
        }
    }
}

/// A short-lived image-serving session for one chapter.
///
/// Sessions are never mutated: a refresh produces a new value that replaces
/// the old one wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterPageSession {
    pub chapter_id: String,
    pub base_url: String,
    pub hash: String,
    pub quality: PageQuality,
    pub page_filenames: Vec<String>,
    pub issued_at: Instant,
}

impl ChapterPageSession {
    pub fn len(&self) -> usize {
        self.page_filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.page_filenames.is_empty()
    }

    pub fn page_url(&self, index: usize) -> Option<String> {
        self.page_filenames.get(index).map(|filename| {
            format!(
                "{}/{}/{}/{}",
                self.base_url.trim_end_matches('/'),
                self.quality.path_segment(),
                self.hash,
                filename
            )
        })
    }

    pub fn page_urls(&self) -> Vec<String> {
        (0..self.len()).filter_map(|i| self.page_url(i)).collect()
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.issued_at)
    }

    /// Valid only while `now - issued_at < threshold`.
    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        self.age(now) >= threshold
    }

    /// True when `other` serves the same pages, so per-page data can be kept.
    pub fn same_pages(&self, other: &ChapterPageSession) -> bool {
        self.chapter_id == other.chapter_id && self.page_filenames == other.page_filenames
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub refresh_threshold: Duration,
    pub check_interval: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            refresh_threshold: Duration::from_secs(10 * 60),
            check_interval: Duration::from_secs(60),
        }
    }
}

/// Opens and refreshes page sessions. Holds no session state of its own.
#[derive(Clone)]
pub struct PageSessionManager {
    source: Arc<dyn ChapterSource>,
}

impl PageSessionManager {
    pub fn new(source: Arc<dyn ChapterSource>) -> Self {
        Self { source }
    }

    pub async fn open_session(&self, chapter_id: &str) -> Result<ChapterPageSession> {
        let session = self.source.fetch_page_session(chapter_id).await?;
        log::debug!(
            "opened session for chapter {} ({} pages)",
            chapter_id,
            session.len()
        );
        Ok(session)
    }

    pub async fn refresh_session(&self, chapter_id: &str) -> Result<ChapterPageSession> {
        log::info!("refreshing page session for chapter {chapter_id}");
        self.open_session(chapter_id).await
    }
}
