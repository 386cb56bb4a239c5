//! Incremental, deduplicated chapter list for one manga.
//!
//! The catalog never talks to the network itself. `begin_next` hands out a
//! [`BatchRequest`] and the caller feeds the outcome back through `apply`,
//! which keeps at most one batch outstanding at a time.

use std::collections::HashSet;

use super::error::ReaderError;
use super::mangadex::{ChapterCatalogPage, ChapterSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogState {
    Idle,
    Loading,
    Loaded,
    LoadFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    /// Bumped by `reset`, so batches started before it are dropped.
    pub epoch: u64,
    pub manga_id: String,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug)]
pub struct ChapterCatalog {
    epoch: u64,
    manga_id: String,
    limit: usize,
    chapters: Vec<ChapterSummary>,
    seen: HashSet<String>,
    next_offset: usize,
    has_more: bool,
    state: CatalogState,
}

impl ChapterCatalog {
    pub fn new(manga_id: impl Into<String>, limit: usize) -> Self {
        Self {
            epoch: 0,
            manga_id: manga_id.into(),
            limit: limit.max(1),
            chapters: Vec::new(),
            seen: HashSet::new(),
            next_offset: 0,
            has_more: true,
            state: CatalogState::Idle,
        }
    }

    pub fn manga_id(&self) -> &str {
        &self.manga_id
    }

    pub fn chapters(&self) -> &[ChapterSummary] {
        &self.chapters
    }

    pub fn get(&self, index: usize) -> Option<&ChapterSummary> {
        self.chapters.get(index)
    }

    pub fn position(&self, chapter_id: &str) -> Option<usize> {
        self.chapters.iter().position(|c| c.id == chapter_id)
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    #[cfg(test)]
    pub fn next_offset(&self) -> usize {
        self.next_offset
    }

    pub fn state(&self) -> &CatalogState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == CatalogState::Loading
    }

    /// Claims the next batch. `None` while a batch is in flight or once the
    /// feed is exhausted.
    pub fn begin_next(&mut self) -> Option<BatchRequest> {
        if self.is_loading() || !self.has_more {
            return None;
        }
        self.state = CatalogState::Loading;
        Some(BatchRequest {
            epoch: self.epoch,
            manga_id: self.manga_id.clone(),
            offset: self.next_offset,
            limit: self.limit,
        })
    }

    /// Re-requests the offset that failed.
    pub fn retry(&mut self) -> Option<BatchRequest> {
        if !matches!(self.state, CatalogState::LoadFailed(_)) {
            return None;
        }
        self.state = CatalogState::Idle;
        self.begin_next()
    }

    /// Applies a batch outcome. Returns `false` when the result belongs to a
    /// different manga or offset and was dropped.
    pub fn apply(
        &mut self,
        request: &BatchRequest,
        result: Result<ChapterCatalogPage, ReaderError>,
    ) -> bool {
        if request.epoch != self.epoch
            || request.manga_id != self.manga_id
            || request.offset != self.next_offset
            || !self.is_loading()
        {
            log::debug!(
                "dropping chapter batch for {} at offset {}",
                request.manga_id,
                request.offset
            );
            return false;
        }

        match result {
            Ok(page) => {
                self.next_offset += page.raw_count;
                self.has_more = page.has_more();
                let added = self.merge(page.chapters);
                log::debug!(
                    "chapter batch for {} at offset {}: {} new, {} total, more: {}",
                    page.manga_id,
                    request.offset,
                    added,
                    self.chapters.len(),
                    self.has_more
                );
                self.state = CatalogState::Loaded;
            }
            Err(e) => {
                log::warn!(
                    "chapter batch for {} at offset {} failed: {e}",
                    request.manga_id,
                    request.offset
                );
                self.state = CatalogState::LoadFailed(e.user_message());
            }
        }
        true
    }

    /// Appends unseen chapters, keeping every id at its first position.
    fn merge(&mut self, batch: Vec<ChapterSummary>) -> usize {
        let before = self.chapters.len();
        for chapter in batch {
            if self.seen.insert(chapter.id.clone()) {
                self.chapters.push(chapter);
            }
        }
        self.chapters.len() - before
    }

    /// Discards every loaded chapter and starts over for `manga_id`. A batch
    /// still in flight is dropped when it lands.
    pub fn reset(&mut self, manga_id: impl Into<String>) {
        self.epoch += 1;
        self.manga_id = manga_id.into();
        self.chapters.clear();
        self.seen.clear();
        self.next_offset = 0;
        self.has_more = true;
        self.state = CatalogState::Idle;
    }
}
