use image::DynamicImage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::Instant;

use super::cache::PageCache;
use super::dimensions::{DimensionResolver, ImageLoader, PageDimension};
use super::mangadex::ChapterSource;
use super::reader::{ChapterTicket, DimensionJob, ReaderSession, ReaderState};
use super::session::PageSessionManager;
use super::tasks::{
    BackgroundTask, PageLoadRequest, TaskSender, spawn_chapter_batch, spawn_dimension_resolver,
    spawn_page_loader, spawn_session_open, spawn_session_refresh, spawn_staleness_watch,
};

pub struct Services {
    pub source: Arc<dyn ChapterSource>,
    pub images: Arc<dyn ImageLoader>,
}

pub struct LoadedPage {
    pub index: usize,
    pub image: DynamicImage,
}

/// Owns the reader state and turns user intents and background results
/// into state transitions plus follow-up tasks.
pub struct ReaderController {
    reader: ReaderSession,
    source: Arc<dyn ChapterSource>,
    images: Arc<dyn ImageLoader>,
    sessions: PageSessionManager,
    resolver: DimensionResolver,
    cache: PageCache,
    tx: TaskSender,
    pending_pages: HashSet<usize>,
    /// Page index -> session serial the load failed under.
    failed_pages: HashMap<usize, u64>,
}

impl ReaderController {
    pub fn new(
        reader: ReaderSession,
        services: Services,
        fallback: PageDimension,
        cache: PageCache,
        tx: TaskSender,
    ) -> Self {
        let sessions = PageSessionManager::new(Arc::clone(&services.source));
        let resolver = DimensionResolver::new(Arc::clone(&services.images), fallback);

        Self {
            reader,
            source: services.source,
            images: services.images,
            sessions,
            resolver,
            cache,
            tx,
            pending_pages: HashSet::new(),
            failed_pages: HashMap::new(),
        }
    }

    pub fn reader(&self) -> &ReaderSession {
        &self.reader
    }

    pub fn fallback_dimension(&self) -> PageDimension {
        self.resolver.fallback()
    }

    pub fn load_more_chapters(&mut self) -> bool {
        match self.reader.request_more_chapters() {
            Some(request) => {
                spawn_chapter_batch(Arc::clone(&self.source), request, self.tx.clone());
                true
            }
            None => false,
        }
    }

    pub fn retry_catalog(&mut self) -> bool {
        match self.reader.retry_catalog() {
            Some(request) => {
                spawn_chapter_batch(Arc::clone(&self.source), request, self.tx.clone());
                true
            }
            None => false,
        }
    }

    pub fn select_chapter(&mut self, chapter_id: &str) -> ChapterTicket {
        self.forget_pages();
        let ticket = self.reader.select_chapter(chapter_id);
        let handle = spawn_session_open(self.sessions.clone(), ticket.clone(), self.tx.clone());
        self.reader.track_task(&ticket, handle);
        ticket
    }

    pub fn open_next_chapter(&mut self) -> bool {
        match self.reader.next_chapter_id() {
            Some(id) => {
                self.select_chapter(&id);
                true
            }
            None => false,
        }
    }

    pub fn open_previous_chapter(&mut self) -> bool {
        match self.reader.previous_chapter_id() {
            Some(id) => {
                self.select_chapter(&id);
                true
            }
            None => false,
        }
    }

    pub fn close_chapter(&mut self) {
        self.forget_pages();
        self.reader.close_chapter();
    }

    pub fn dismiss_catalog_error(&mut self) {
        self.reader.dismiss_catalog_error();
    }

    pub fn reload_catalog(&mut self) -> bool {
        match self.reader.reload_catalog() {
            Some(request) => {
                spawn_chapter_batch(Arc::clone(&self.source), request, self.tx.clone());
                true
            }
            None => false,
        }
    }

    pub fn dismiss_error(&mut self) {
        self.forget_pages();
        self.reader.dismiss_error();
    }

    pub fn toggle_mode(&mut self) {
        if let Some(job) = self.reader.toggle_mode() {
            self.start_dimension_job(job);
        }
    }

    pub fn next_page(&mut self) -> bool {
        self.reader.next_page()
    }

    pub fn prev_page(&mut self) -> bool {
        self.reader.prev_page()
    }

    pub fn set_current_page(&mut self, index: usize) {
        self.reader.set_current_page(index);
    }

    /// Starts loading a page image unless it is already loading, or it
    /// failed under the current session and no refresh has happened since.
    pub fn request_page(&mut self, index: usize) -> bool {
        let Some(ticket) = self.reader.current_ticket().cloned() else {
            return false;
        };
        let Some(url) = self.reader.session().and_then(|s| s.page_url(index)) else {
            return false;
        };
        let serial = self.reader.session_serial();
        if self.pending_pages.contains(&index) || self.failed_pages.get(&index) == Some(&serial) {
            return false;
        }

        self.pending_pages.insert(index);
        let request = PageLoadRequest {
            ticket: ticket.clone(),
            index,
            serial,
            url,
        };
        let handle = spawn_page_loader(
            Arc::clone(&self.images),
            self.cache.clone(),
            request,
            self.tx.clone(),
        );
        self.reader.track_task(&ticket, handle);
        true
    }

    pub async fn clear_cache(&mut self) {
        self.cache.clear().await;
        self.failed_pages.clear();
    }

    fn forget_pages(&mut self) {
        self.pending_pages.clear();
        self.failed_pages.clear();
    }

    fn start_dimension_job(&mut self, job: DimensionJob) {
        let ticket = job.ticket.clone();
        let handle = spawn_dimension_resolver(self.resolver.clone(), job, self.tx.clone());
        self.reader.track_task(&ticket, handle);
    }

    fn start_staleness_watch(&mut self, ticket: &ChapterTicket) {
        let period = self.reader.policy().check_interval;
        let handle = spawn_staleness_watch(ticket.clone(), period, self.tx.clone());
        self.reader.track_task(ticket, handle);
    }

    /// Applies one background result. Returns a page image when one arrived
    /// for the open chapter.
    pub fn handle(&mut self, task: BackgroundTask) -> Option<LoadedPage> {
        match task {
            BackgroundTask::ChapterBatch { request, result } => {
                self.reader.apply_chapter_batch(&request, result);
                None
            }
            BackgroundTask::SessionOpened { ticket, result } => {
                let awaiting = self.reader.is_current(&ticket) && self.reader.session().is_none();
                let job = self.reader.apply_session(&ticket, result);
                if awaiting && matches!(self.reader.state(), ReaderState::Reading { .. }) {
                    self.start_staleness_watch(&ticket);
                }
                if let Some(job) = job {
                    self.start_dimension_job(job);
                }
                None
            }
            BackgroundTask::SessionRefreshed { ticket, result } => {
                if let Some(job) = self.reader.apply_refresh(&ticket, result) {
                    self.start_dimension_job(job);
                }
                None
            }
            BackgroundTask::DimensionsResolved {
                ticket,
                serial,
                dimensions,
            } => {
                self.reader.apply_dimensions(&ticket, serial, dimensions);
                None
            }
            BackgroundTask::StalenessTick { ticket } => {
                if let Some(ticket) = self.reader.on_staleness_tick(&ticket, Instant::now()) {
                    let handle = spawn_session_refresh(
                        self.sessions.clone(),
                        ticket.clone(),
                        self.tx.clone(),
                    );
                    self.reader.track_task(&ticket, handle);
                }
                None
            }
            BackgroundTask::PageLoaded {
                ticket,
                index,
                serial,
                result,
            } => {
                if !self.reader.is_current(&ticket) {
                    return None;
                }
                self.pending_pages.remove(&index);
                match result {
                    Ok(image) => {
                        self.failed_pages.remove(&index);
                        Some(LoadedPage { index, image })
                    }
                    Err(e) if e.is_retryable() => {
                        log::debug!("page {index} of {} failed: {e}", ticket.chapter_id);
                        self.failed_pages.insert(index, serial);
                        None
                    }
                    Err(e) => {
                        log::warn!("page {index} of {} is unreadable: {e}", ticket.chapter_id);
                        self.failed_pages.insert(index, serial);
                        None
                    }
                }
            }
        }
    }
}
