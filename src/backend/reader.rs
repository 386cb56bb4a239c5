//! Reader orchestration: which chapter is open, which session is active,
//! and which async results are still allowed to land.
//!
//! Every chapter selection is stamped with a fresh [`ChapterTicket`]. Async
//! work carries the ticket it was started for and its result is discarded
//! unless that ticket is still current, so a late response for a chapter the
//! user already left can never replace the active session.

use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::catalog::{BatchRequest, CatalogState, ChapterCatalog};
use super::dimensions::PageDimension;
use super::error::ReaderError;
use super::mangadex::ChapterCatalogPage;
use super::session::{ChapterPageSession, SessionPolicy};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ReadingMode {
    /// One page at a time.
    Horizontal,
    /// Continuous column of pages.
    #[default]
    Vertical,
}

impl ReadingMode {
    pub fn toggled(self) -> Self {
        match self {
            ReadingMode::Horizontal => ReadingMode::Vertical,
            ReadingMode::Vertical => ReadingMode::Horizontal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChapterTicket {
    pub generation: u64,
    pub chapter_id: String,
}

/// A snapshot handed to the dimension resolver.
#[derive(Debug, Clone)]
pub struct DimensionJob {
    pub ticket: ChapterTicket,
    /// Session serial the job measured; results for an older serial are dropped.
    pub serial: u64,
    pub session: ChapterPageSession,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderState {
    BrowsingChapters,
    CatalogLoadFailed { message: String },
    LoadingChapter { chapter_id: String },
    ChapterLoadFailed { chapter_id: String, message: String },
    Reading { mode: ReadingMode },
}

/// Abort handles for work tied to the open chapter.
#[derive(Default)]
struct ChapterTasks {
    handles: Vec<AbortHandle>,
}

impl ChapterTasks {
    fn push(&mut self, handle: AbortHandle) {
        self.handles.retain(|h| !h.is_finished());
        self.handles.push(handle);
    }

    fn abort_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for ChapterTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

pub struct ReaderSession {
    state: ReaderState,
    catalog: ChapterCatalog,
    catalog_alert_dismissed: bool,
    mode: ReadingMode,
    policy: SessionPolicy,
    generation: u64,
    current: Option<ChapterTicket>,
    session: Option<ChapterPageSession>,
    session_serial: u64,
    dimensions: Option<Vec<PageDimension>>,
    dimensions_pending: bool,
    refresh_in_flight: bool,
    last_refresh_error: Option<String>,
    current_page: usize,
    tasks: ChapterTasks,
}

impl ReaderSession {
    pub fn new(catalog: ChapterCatalog, mode: ReadingMode, policy: SessionPolicy) -> Self {
        Self {
            state: ReaderState::BrowsingChapters,
            catalog,
            catalog_alert_dismissed: false,
            mode,
            policy,
            generation: 0,
            current: None,
            session: None,
            session_serial: 0,
            dimensions: None,
            dimensions_pending: false,
            refresh_in_flight: false,
            last_refresh_error: None,
            current_page: 0,
            tasks: ChapterTasks::default(),
        }
    }

    pub fn state(&self) -> &ReaderState {
        &self.state
    }

    pub fn catalog(&self) -> &ChapterCatalog {
        &self.catalog
    }

    pub fn mode(&self) -> ReadingMode {
        self.mode
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    pub fn current_ticket(&self) -> Option<&ChapterTicket> {
        self.current.as_ref()
    }

    pub fn session(&self) -> Option<&ChapterPageSession> {
        self.session.as_ref()
    }

    /// Bumped every time a session is installed, including refreshes.
    pub fn session_serial(&self) -> u64 {
        self.session_serial
    }

    pub fn dimensions(&self) -> Option<&[PageDimension]> {
        self.dimensions.as_deref()
    }

    pub fn dimensions_pending(&self) -> bool {
        self.dimensions_pending
    }

    pub fn refresh_in_flight(&self) -> bool {
        self.refresh_in_flight
    }

    pub fn last_refresh_error(&self) -> Option<&str> {
        self.last_refresh_error.as_deref()
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn page_count(&self) -> usize {
        self.session.as_ref().map_or(0, ChapterPageSession::len)
    }

    pub fn is_current(&self, ticket: &ChapterTicket) -> bool {
        self.current.as_ref() == Some(ticket)
    }

    /// Registers a task belonging to `ticket`'s chapter. Tasks for a chapter
    /// that is no longer open are aborted straight away.
    pub fn track_task(&mut self, ticket: &ChapterTicket, handle: AbortHandle) {
        if self.is_current(ticket) {
            self.tasks.push(handle);
        } else {
            handle.abort();
        }
    }

    pub fn request_more_chapters(&mut self) -> Option<BatchRequest> {
        if matches!(self.state, ReaderState::CatalogLoadFailed { .. }) {
            return None;
        }
        self.catalog.begin_next()
    }

    pub fn apply_chapter_batch(
        &mut self,
        request: &BatchRequest,
        result: Result<ChapterCatalogPage, ReaderError>,
    ) -> bool {
        if !self.catalog.apply(request, result) {
            return false;
        }
        self.catalog_alert_dismissed = false;
        if self.state == ReaderState::BrowsingChapters {
            self.surface_catalog_failure();
        }
        true
    }

    pub fn retry_catalog(&mut self) -> Option<BatchRequest> {
        if matches!(self.state, ReaderState::CatalogLoadFailed { .. }) {
            self.state = ReaderState::BrowsingChapters;
        }
        self.catalog.retry()
    }

    /// Returns to the chapters already loaded without retrying. The failed
    /// offset is requested again the next time more chapters are wanted.
    pub fn dismiss_catalog_error(&mut self) {
        if matches!(self.state, ReaderState::CatalogLoadFailed { .. }) {
            self.catalog_alert_dismissed = true;
            self.state = ReaderState::BrowsingChapters;
        }
    }

    /// Drops the chapter list and starts loading it again from offset zero.
    /// Only allowed from the list screens.
    pub fn reload_catalog(&mut self) -> Option<BatchRequest> {
        if !matches!(
            self.state,
            ReaderState::BrowsingChapters | ReaderState::CatalogLoadFailed { .. }
        ) {
            return None;
        }
        let manga_id = self.catalog.manga_id().to_string();
        log::info!("reloading chapter list for {manga_id}");
        self.catalog.reset(manga_id);
        self.catalog_alert_dismissed = false;
        self.state = ReaderState::BrowsingChapters;
        self.catalog.begin_next()
    }

    fn surface_catalog_failure(&mut self) {
        if self.catalog_alert_dismissed {
            return;
        }
        if let CatalogState::LoadFailed(message) = self.catalog.state() {
            self.state = ReaderState::CatalogLoadFailed {
                message: message.clone(),
            };
        }
    }

    /// Opens a chapter, abandoning whatever chapter was open before.
    pub fn select_chapter(&mut self, chapter_id: &str) -> ChapterTicket {
        self.discard_chapter();
        self.generation += 1;
        let ticket = ChapterTicket {
            generation: self.generation,
            chapter_id: chapter_id.to_string(),
        };
        self.current = Some(ticket.clone());
        self.state = ReaderState::LoadingChapter {
            chapter_id: chapter_id.to_string(),
        };
        log::info!(
            "loading chapter {chapter_id} (generation {})",
            ticket.generation
        );
        ticket
    }

    pub fn close_chapter(&mut self) {
        self.discard_chapter();
        self.generation += 1;
        self.current = None;
        self.state = ReaderState::BrowsingChapters;
        self.surface_catalog_failure();
    }

    /// Acknowledges a chapter load failure and returns to the chapter list.
    pub fn dismiss_error(&mut self) {
        if matches!(self.state, ReaderState::ChapterLoadFailed { .. }) {
            self.close_chapter();
        }
    }

    fn discard_chapter(&mut self) {
        self.tasks.abort_all();
        self.session = None;
        self.dimensions = None;
        self.dimensions_pending = false;
        self.refresh_in_flight = false;
        self.last_refresh_error = None;
        self.current_page = 0;
    }

    fn install_session(&mut self, session: ChapterPageSession) -> Option<DimensionJob> {
        let keep_dimensions = self
            .session
            .as_ref()
            .is_some_and(|old| old.same_pages(&session))
            && self.dimensions.is_some();
        if !keep_dimensions {
            self.dimensions = None;
            self.dimensions_pending = false;
        }

        self.current_page = self.current_page.min(session.len().saturating_sub(1));
        self.session = Some(session);
        self.session_serial += 1;
        self.dimension_job()
    }

    fn dimension_job(&mut self) -> Option<DimensionJob> {
        if self.mode != ReadingMode::Vertical
            || self.dimensions.is_some()
            || self.dimensions_pending
        {
            return None;
        }
        let ticket = self.current.clone()?;
        let session = self.session.clone()?;
        self.dimensions_pending = true;
        Some(DimensionJob {
            ticket,
            serial: self.session_serial,
            session,
        })
    }

    /// Applies the result of opening `ticket`'s chapter.
    pub fn apply_session(
        &mut self,
        ticket: &ChapterTicket,
        result: Result<ChapterPageSession, ReaderError>,
    ) -> Option<DimensionJob> {
        if !self.is_current(ticket) || self.session.is_some() {
            log::debug!(
                "dropping session for chapter {} (generation {})",
                ticket.chapter_id,
                ticket.generation
            );
            return None;
        }

        match result {
            Ok(session) => {
                self.current_page = 0;
                self.state = ReaderState::Reading { mode: self.mode };
                self.install_session(session)
            }
            Err(e) => {
                log::warn!("could not load chapter {}: {e}", ticket.chapter_id);
                self.tasks.abort_all();
                self.state = ReaderState::ChapterLoadFailed {
                    chapter_id: ticket.chapter_id.clone(),
                    message: e.user_message(),
                };
                None
            }
        }
    }

    /// Called by the periodic staleness check. Returns the ticket to refresh
    /// when the active session has aged past the threshold.
    pub fn on_staleness_tick(
        &mut self,
        ticket: &ChapterTicket,
        now: Instant,
    ) -> Option<ChapterTicket> {
        if !self.is_current(ticket) || self.refresh_in_flight {
            return None;
        }
        let session = self.session.as_ref()?;
        if !session.is_stale(now, self.policy.refresh_threshold) {
            return None;
        }
        log::debug!(
            "session for chapter {} is {:?} old",
            ticket.chapter_id,
            session.age(now)
        );
        self.refresh_in_flight = true;
        Some(ticket.clone())
    }

    /// Replaces the active session with a refreshed one. A failed refresh
    /// keeps the old session; the next stale tick tries again.
    pub fn apply_refresh(
        &mut self,
        ticket: &ChapterTicket,
        result: Result<ChapterPageSession, ReaderError>,
    ) -> Option<DimensionJob> {
        if !self.is_current(ticket) || self.session.is_none() {
            log::debug!(
                "dropping refresh for chapter {} (generation {})",
                ticket.chapter_id,
                ticket.generation
            );
            return None;
        }
        self.refresh_in_flight = false;

        match result {
            Ok(session) => {
                self.last_refresh_error = None;
                self.install_session(session)
            }
            Err(e) => {
                log::warn!("refresh of chapter {} failed: {e}", ticket.chapter_id);
                self.last_refresh_error = Some(e.user_message());
                None
            }
        }
    }

    pub fn apply_dimensions(
        &mut self,
        ticket: &ChapterTicket,
        serial: u64,
        dimensions: Vec<PageDimension>,
    ) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        if serial != self.session_serial {
            log::debug!(
                "dropping dimensions for session {serial}, current is {}",
                self.session_serial
            );
            return false;
        }
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        if dimensions.len() != session.len() {
            log::debug!(
                "dropping {} dimensions for a {}-page session",
                dimensions.len(),
                session.len()
            );
            self.dimensions_pending = false;
            return false;
        }
        self.dimensions = Some(dimensions);
        self.dimensions_pending = false;
        true
    }

    /// Switches layout without refetching the session.
    pub fn set_mode(&mut self, mode: ReadingMode) -> Option<DimensionJob> {
        self.mode = mode;
        if let ReaderState::Reading { .. } = self.state {
            self.state = ReaderState::Reading { mode };
        }
        self.dimension_job()
    }

    pub fn toggle_mode(&mut self) -> Option<DimensionJob> {
        self.set_mode(self.mode.toggled())
    }

    pub fn set_current_page(&mut self, index: usize) {
        self.current_page = index.min(self.page_count().saturating_sub(1));
    }

    pub fn next_page(&mut self) -> bool {
        if self.current_page + 1 < self.page_count() {
            self.current_page += 1;
            true
        } else {
            false
        }
    }

    pub fn prev_page(&mut self) -> bool {
        if self.current_page > 0 {
            self.current_page -= 1;
            true
        } else {
            false
        }
    }

    /// The chapter after the open one in reading order. The catalog is
    /// newest first, so that is the entry above it.
    pub fn next_chapter_id(&self) -> Option<String> {
        let index = self.open_chapter_index()?;
        let next = index.checked_sub(1)?;
        self.catalog.get(next).map(|c| c.id.clone())
    }

    pub fn previous_chapter_id(&self) -> Option<String> {
        let index = self.open_chapter_index()?;
        self.catalog.get(index + 1).map(|c| c.id.clone())
    }

    fn open_chapter_index(&self) -> Option<usize> {
        let ticket = self.current.as_ref()?;
        self.catalog.position(&ticket.chapter_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dimensions::tests::session_with_pages;
    use crate::backend::mangadex::ChapterSummary;
    use std::time::Duration;

    fn reader(mode: ReadingMode) -> ReaderSession {
        ReaderSession::new(ChapterCatalog::new("m", 50), mode, SessionPolicy::default())
    }

    fn dims(n: usize) -> Vec<PageDimension> {
        vec![
            PageDimension {
                width: 100,
                height: 150
            };
            n
        ]
    }

    fn load_catalog(reader: &mut ReaderSession, ids: &[&str]) {
        let request = reader.request_more_chapters().unwrap();
        let page = ChapterCatalogPage {
            manga_id: request.manga_id.clone(),
            offset: request.offset,
            limit: request.limit,
            chapters: ids
                .iter()
                .map(|id| ChapterSummary {
                    id: id.to_string(),
                    number: id.to_string(),
                    title: None,
                    volume: None,
                    pages: 5,
                })
                .collect(),
            raw_count: ids.len(),
            total: None,
        };
        assert!(reader.apply_chapter_batch(&request, Ok(page)));
    }

    #[test]
    fn test_select_then_session_enters_reading() {
        let mut reader = reader(ReadingMode::Vertical);
        let ticket = reader.select_chapter("a");
        assert_eq!(
            reader.state(),
            &ReaderState::LoadingChapter {
                chapter_id: "a".to_string()
            }
        );

        let job = reader.apply_session(&ticket, Ok(session_with_pages("a", 4)));
        assert_eq!(
            reader.state(),
            &ReaderState::Reading {
                mode: ReadingMode::Vertical
            }
        );
        let job = job.expect("vertical mode resolves dimensions");
        assert_eq!(job.ticket, ticket);
        assert!(reader.dimensions_pending());

        assert!(reader.apply_dimensions(&ticket, job.serial, dims(4)));
        assert_eq!(reader.dimensions().unwrap().len(), 4);
    }

    #[test]
    fn test_horizontal_mode_skips_dimensions() {
        let mut reader = reader(ReadingMode::Horizontal);
        let ticket = reader.select_chapter("a");
        assert!(
            reader
                .apply_session(&ticket, Ok(session_with_pages("a", 4)))
                .is_none()
        );
        assert!(!reader.dimensions_pending());
    }

    #[test]
    fn test_late_session_for_previous_chapter_is_ignored() {
        let mut reader = reader(ReadingMode::Horizontal);
        let x = reader.select_chapter("x");
        let y = reader.select_chapter("y");

        reader.apply_session(&y, Ok(session_with_pages("y", 3)));
        reader.apply_session(&x, Ok(session_with_pages("x", 9)));

        assert_eq!(reader.session().unwrap().chapter_id, "y");
        assert_eq!(reader.page_count(), 3);
    }

    #[test]
    fn test_late_session_before_current_resolves_is_ignored() {
        let mut reader = reader(ReadingMode::Horizontal);
        let x = reader.select_chapter("x");
        let _y = reader.select_chapter("y");

        reader.apply_session(&x, Ok(session_with_pages("x", 9)));
        assert!(reader.session().is_none());
        assert_eq!(
            reader.state(),
            &ReaderState::LoadingChapter {
                chapter_id: "y".to_string()
            }
        );
    }

    #[test]
    fn test_stale_chapter_refresh_is_suppressed() {
        let mut reader = reader(ReadingMode::Horizontal);
        let a = reader.select_chapter("a");
        let old = session_with_pages("a", 3);
        let later = old.issued_at + Duration::from_secs(700);
        reader.apply_session(&a, Ok(old));

        let refresh = reader.on_staleness_tick(&a, later);
        assert_eq!(refresh, Some(a.clone()));

        let b = reader.select_chapter("b");
        reader.apply_session(&b, Ok(session_with_pages("b", 5)));
        let b_session = reader.session().cloned();

        reader.apply_refresh(&a, Ok(session_with_pages("a", 3)));
        assert_eq!(reader.session().cloned(), b_session);
        assert!(!reader.refresh_in_flight());
    }

    #[test]
    fn test_fresh_session_does_not_refresh() {
        let mut reader = reader(ReadingMode::Horizontal);
        let a = reader.select_chapter("a");
        let session = session_with_pages("a", 3);
        let t0 = session.issued_at;
        reader.apply_session(&a, Ok(session));

        assert_eq!(reader.on_staleness_tick(&a, t0 + Duration::from_secs(599)), None);
        assert!(reader.on_staleness_tick(&a, t0 + Duration::from_secs(600)).is_some());
        // Only one refresh at a time.
        assert_eq!(reader.on_staleness_tick(&a, t0 + Duration::from_secs(660)), None);
    }

    #[test]
    fn test_refresh_replaces_session_and_keeps_page() {
        let mut reader = reader(ReadingMode::Vertical);
        let a = reader.select_chapter("a");
        let old = session_with_pages("a", 5);
        let later = old.issued_at + Duration::from_secs(900);
        reader.apply_session(&a, Ok(old));
        reader.apply_dimensions(&a, reader.session_serial(), dims(5));
        reader.set_current_page(3);
        let serial = reader.session_serial();

        reader.on_staleness_tick(&a, later).unwrap();
        let mut fresh = session_with_pages("a", 5);
        fresh.hash = "new-hash".to_string();
        let job = reader.apply_refresh(&a, Ok(fresh));

        assert!(job.is_none(), "same pages keep their dimensions");
        assert_eq!(reader.session().unwrap().hash, "new-hash");
        assert_eq!(reader.current_page(), 3);
        assert_eq!(reader.session_serial(), serial + 1);
        assert!(reader.dimensions().is_some());
    }

    #[test]
    fn test_refresh_with_different_pages_re_resolves() {
        let mut reader = reader(ReadingMode::Vertical);
        let a = reader.select_chapter("a");
        reader.apply_session(&a, Ok(session_with_pages("a", 5)));
        reader.apply_dimensions(&a, reader.session_serial(), dims(5));

        let job = reader.apply_refresh(&a, Ok(session_with_pages("a", 6)));
        assert!(job.is_some());
        assert!(reader.dimensions().is_none());
    }

    #[test]
    fn test_failed_refresh_keeps_session() {
        let mut reader = reader(ReadingMode::Horizontal);
        let a = reader.select_chapter("a");
        reader.apply_session(&a, Ok(session_with_pages("a", 2)));
        let before = reader.session().cloned();

        reader.apply_refresh(&a, Err(ReaderError::Http { status: 503 }));
        assert_eq!(reader.session().cloned(), before);
        assert!(reader.last_refresh_error().is_some());
        assert!(!reader.refresh_in_flight());
    }

    #[test]
    fn test_session_failure_then_dismiss_returns_to_list() {
        let mut reader = reader(ReadingMode::Vertical);
        let a = reader.select_chapter("a");
        reader.apply_session(&a, Err(ReaderError::not_available("a")));

        match reader.state() {
            ReaderState::ChapterLoadFailed { chapter_id, .. } => assert_eq!(chapter_id, "a"),
            other => panic!("unexpected state {other:?}"),
        }
        reader.dismiss_error();
        assert_eq!(reader.state(), &ReaderState::BrowsingChapters);
        assert!(reader.current_ticket().is_none());
    }

    #[test]
    fn test_toggle_into_vertical_resolves_once() {
        let mut reader = reader(ReadingMode::Horizontal);
        let a = reader.select_chapter("a");
        reader.apply_session(&a, Ok(session_with_pages("a", 3)));
        let serial = reader.session_serial();

        let job = reader.toggle_mode();
        assert!(job.is_some());
        assert_eq!(
            reader.state(),
            &ReaderState::Reading {
                mode: ReadingMode::Vertical
            }
        );
        reader.apply_dimensions(&a, reader.session_serial(), dims(3));

        assert!(reader.toggle_mode().is_none());
        assert!(reader.toggle_mode().is_none(), "dimensions already known");
        assert_eq!(reader.session_serial(), serial, "no refetch on toggle");
    }

    #[test]
    fn test_mismatched_dimensions_are_dropped() {
        let mut reader = reader(ReadingMode::Vertical);
        let a = reader.select_chapter("a");
        reader.apply_session(&a, Ok(session_with_pages("a", 3)));

        assert!(!reader.apply_dimensions(&a, reader.session_serial(), dims(2)));
        assert!(reader.dimensions().is_none());
    }

    #[test]
    fn test_page_index_resets_and_clamps() {
        let mut reader = reader(ReadingMode::Horizontal);
        let a = reader.select_chapter("a");
        reader.apply_session(&a, Ok(session_with_pages("a", 3)));

        assert!(!reader.prev_page());
        assert!(reader.next_page());
        assert!(reader.next_page());
        assert!(!reader.next_page());
        assert_eq!(reader.current_page(), 2);
        reader.set_current_page(40);
        assert_eq!(reader.current_page(), 2);

        let b = reader.select_chapter("b");
        assert_eq!(reader.current_page(), 0);
        reader.apply_session(&b, Ok(session_with_pages("b", 8)));
        assert_eq!(reader.current_page(), 0);
    }

    #[test]
    fn test_catalog_failure_surfaces_and_retries() {
        let mut reader = reader(ReadingMode::Vertical);
        let request = reader.request_more_chapters().unwrap();
        reader.apply_chapter_batch(&request, Err(ReaderError::Http { status: 500 }));

        assert!(matches!(
            reader.state(),
            ReaderState::CatalogLoadFailed { .. }
        ));
        assert_eq!(reader.request_more_chapters(), None);

        let retry = reader.retry_catalog().unwrap();
        assert_eq!(retry.offset, request.offset);
        assert_eq!(reader.state(), &ReaderState::BrowsingChapters);
    }

    #[test]
    fn test_catalog_failure_can_be_dismissed_back_to_list() {
        let mut reader = ReaderSession::new(
            ChapterCatalog::new("m", 2),
            ReadingMode::Vertical,
            SessionPolicy::default(),
        );
        load_catalog(&mut reader, &["c9", "c8"]);
        let second = reader.request_more_chapters().unwrap();
        reader.apply_chapter_batch(&second, Err(ReaderError::Http { status: 500 }));
        assert!(matches!(
            reader.state(),
            ReaderState::CatalogLoadFailed { .. }
        ));

        reader.dismiss_catalog_error();
        assert_eq!(reader.state(), &ReaderState::BrowsingChapters);
        assert_eq!(reader.catalog().len(), 2);

        // Reading and leaving a chapter does not bring the alert back.
        let a = reader.select_chapter("c9");
        reader.apply_session(&a, Ok(session_with_pages("c9", 2)));
        reader.close_chapter();
        assert_eq!(reader.state(), &ReaderState::BrowsingChapters);

        // Scrolling on asks for the same offset again.
        let again = reader.request_more_chapters().unwrap();
        assert_eq!(again.offset, second.offset);

        reader.apply_chapter_batch(&again, Err(ReaderError::Http { status: 500 }));
        assert!(matches!(
            reader.state(),
            ReaderState::CatalogLoadFailed { .. }
        ));
    }

    #[test]
    fn test_reload_catalog_starts_over() {
        let mut reader = ReaderSession::new(
            ChapterCatalog::new("m", 2),
            ReadingMode::Vertical,
            SessionPolicy::default(),
        );
        load_catalog(&mut reader, &["c9", "c8"]);
        let in_flight = reader.request_more_chapters().unwrap();

        let fresh = reader.reload_catalog().unwrap();
        assert_eq!(fresh.offset, 0);
        assert!(reader.catalog().is_empty());
        assert!(!reader.apply_chapter_batch(
            &in_flight,
            Err(ReaderError::Http { status: 500 })
        ));
        assert_eq!(reader.state(), &ReaderState::BrowsingChapters);

        reader.select_chapter("c9");
        assert_eq!(reader.reload_catalog(), None, "not while a chapter is open");
    }

    #[test]
    fn test_dimensions_for_replaced_session_are_dropped() {
        let mut reader = reader(ReadingMode::Vertical);
        let a = reader.select_chapter("a");
        let first = reader
            .apply_session(&a, Ok(session_with_pages("a", 4)))
            .unwrap();

        let mut renamed = session_with_pages("a", 4);
        renamed.page_filenames[0] = "cover.png".to_string();
        let second = reader.apply_refresh(&a, Ok(renamed)).unwrap();
        assert_ne!(first.serial, second.serial);

        assert!(!reader.apply_dimensions(&a, first.serial, dims(4)));
        assert!(reader.dimensions().is_none());
        assert!(reader.dimensions_pending());

        assert!(reader.apply_dimensions(&a, second.serial, dims(4)));
        assert_eq!(reader.dimensions().unwrap().len(), 4);
    }

    #[test]
    fn test_adjacent_chapters_follow_catalog_order() {
        let mut reader = reader(ReadingMode::Horizontal);
        load_catalog(&mut reader, &["c3", "c2", "c1"]);

        reader.select_chapter("c2");
        assert_eq!(reader.next_chapter_id().as_deref(), Some("c3"));
        assert_eq!(reader.previous_chapter_id().as_deref(), Some("c1"));

        reader.select_chapter("c3");
        assert_eq!(reader.next_chapter_id(), None);
    }

    #[tokio::test]
    async fn test_switching_chapters_aborts_tracked_tasks() {
        let mut reader = reader(ReadingMode::Vertical);
        let a = reader.select_chapter("a");
        let task = tokio::spawn(std::future::pending::<()>());
        reader.track_task(&a, task.abort_handle());

        reader.select_chapter("b");
        let err = task.await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_tracking_for_old_ticket_aborts_immediately() {
        let mut reader = reader(ReadingMode::Vertical);
        let a = reader.select_chapter("a");
        reader.select_chapter("b");

        let task = tokio::spawn(std::future::pending::<()>());
        reader.track_task(&a, task.abort_handle());
        assert!(task.await.unwrap_err().is_cancelled());
    }
}
