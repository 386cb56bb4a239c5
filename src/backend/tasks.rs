use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::cache::{PageCache, PageKey};
use super::catalog::BatchRequest;
use super::dimensions::{DimensionResolver, ImageLoader, PageDimension};
use super::error::ReaderError;
use super::mangadex::{ChapterCatalogPage, ChapterSource};
use super::reader::{ChapterTicket, DimensionJob};
use super::session::{ChapterPageSession, PageSessionManager};

/// Results delivered from spawned work back to the event loop.
pub enum BackgroundTask {
    ChapterBatch {
        request: BatchRequest,
        result: Result<ChapterCatalogPage, ReaderError>,
    },
    SessionOpened {
        ticket: ChapterTicket,
        result: Result<ChapterPageSession, ReaderError>,
    },
    SessionRefreshed {
        ticket: ChapterTicket,
        result: Result<ChapterPageSession, ReaderError>,
    },
    DimensionsResolved {
        ticket: ChapterTicket,
        serial: u64,
        dimensions: Vec<PageDimension>,
    },
    StalenessTick {
        ticket: ChapterTicket,
    },
    PageLoaded {
        ticket: ChapterTicket,
        index: usize,
        serial: u64,
        result: Result<DynamicImage, ReaderError>,
    },
}

pub type TaskSender = mpsc::UnboundedSender<BackgroundTask>;

pub fn spawn_chapter_batch(
    source: Arc<dyn ChapterSource>,
    request: BatchRequest,
    tx: TaskSender,
) -> AbortHandle {
    tokio::spawn(async move {
        let result = source
            .fetch_chapter_batch(&request.manga_id, request.offset, request.limit)
            .await;
        let _ = tx.send(BackgroundTask::ChapterBatch { request, result });
    })
    .abort_handle()
}

pub fn spawn_session_open(
    sessions: PageSessionManager,
    ticket: ChapterTicket,
    tx: TaskSender,
) -> AbortHandle {
    tokio::spawn(async move {
        let result = sessions.open_session(&ticket.chapter_id).await;
        let _ = tx.send(BackgroundTask::SessionOpened { ticket, result });
    })
    .abort_handle()
}

pub fn spawn_session_refresh(
    sessions: PageSessionManager,
    ticket: ChapterTicket,
    tx: TaskSender,
) -> AbortHandle {
    tokio::spawn(async move {
        let result = sessions.refresh_session(&ticket.chapter_id).await;
        let _ = tx.send(BackgroundTask::SessionRefreshed { ticket, result });
    })
    .abort_handle()
}

pub fn spawn_dimension_resolver(
    resolver: DimensionResolver,
    job: DimensionJob,
    tx: TaskSender,
) -> AbortHandle {
    tokio::spawn(async move {
        let dimensions = resolver.resolve_dimensions(&job.session).await;
        let _ = tx.send(BackgroundTask::DimensionsResolved {
            ticket: job.ticket,
            serial: job.serial,
            dimensions,
        });
    })
    .abort_handle()
}

/// Ticks every `period` until aborted or the receiver goes away. The first
/// tick comes one full period after the watch starts.
pub fn spawn_staleness_watch(
    ticket: ChapterTicket,
    period: Duration,
    tx: TaskSender,
) -> AbortHandle {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let tick = BackgroundTask::StalenessTick {
                ticket: ticket.clone(),
            };
            if tx.send(tick).is_err() {
                break;
            }
        }
    })
    .abort_handle()
}

pub struct PageLoadRequest {
    pub ticket: ChapterTicket,
    pub index: usize,
    pub serial: u64,
    pub url: String,
}

pub fn spawn_page_loader(
    loader: Arc<dyn ImageLoader>,
    cache: PageCache,
    request: PageLoadRequest,
    tx: TaskSender,
) -> AbortHandle {
    tokio::spawn(async move {
        let key = PageKey::new(request.ticket.chapter_id.clone(), request.index);
        let result = match cache.get_page(&key).await {
            Some(image) => Ok(image),
            None => match loader.load_image(&request.url).await {
                Ok(image) => {
                    cache.insert_page(key, image.clone()).await;
                    Ok(image)
                }
                Err(e) => Err(e),
            },
        };
        let _ = tx.send(BackgroundTask::PageLoaded {
            ticket: request.ticket,
            index: request.index,
            serial: request.serial,
            result,
        });
    })
    .abort_handle()
}
