use async_trait::async_trait;
use futures::future::join_all;
use image::DynamicImage;
use std::sync::Arc;

use super::error::Result;
use super::session::ChapterPageSession;

/// Natural pixel size of one page image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDimension {
    pub width: u32,
    pub height: u32,
}

/// Fetches page images, or just their headers.
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load_image(&self, url: &str) -> Result<DynamicImage>;

    async fn probe(&self, url: &str) -> Result<PageDimension> {
        let image = self.load_image(url).await?;
        Ok(PageDimension {
            width: image.width(),
            height: image.height(),
        })
    }
}

/// Resolves the size of every page of a session before the continuous
/// column is laid out.
#[derive(Clone)]
pub struct DimensionResolver {
    loader: Arc<dyn ImageLoader>,
    fallback: PageDimension,
}

impl DimensionResolver {
    pub fn new(loader: Arc<dyn ImageLoader>, fallback: PageDimension) -> Self {
        Self { loader, fallback }
    }

    pub fn fallback(&self) -> PageDimension {
        self.fallback
    }

    /// One entry per filename, in order. Failed probes get the fallback size.
    pub async fn resolve_dimensions(&self, session: &ChapterPageSession) -> Vec<PageDimension> {
        if session.is_empty() {
            return Vec::new();
        }
        let probes = session.page_urls().into_iter().map(|url| {
            let loader = Arc::clone(&self.loader);
            async move {
                match loader.probe(&url).await {
                    Ok(dim) if dim.width > 0 && dim.height > 0 => dim,
                    Ok(dim) => {
                        log::warn!("degenerate size {}x{} for {url}", dim.width, dim.height);
                        self.fallback
                    }
                    Err(e) => {
                        log::warn!("failed to get image size for {url}: {e}");
                        self.fallback
                    }
                }
            }
        });

        join_all(probes).await
    }
}

/// Height a page occupies when scaled to `width`.
pub fn scaled_height(dim: PageDimension, width: u32, fallback_height: u32) -> u32 {
    if dim.width == 0 {
        return fallback_height;
    }
    let height = u64::from(width) * u64::from(dim.height) / u64::from(dim.width);
    u32::try_from(height).unwrap_or(u32::MAX)
}

/// Top offset of each page in a continuous column, plus the total height.
pub fn column_layout(dims: &[PageDimension], width: u32, fallback_height: u32) -> (Vec<u32>, u32) {
    let mut offsets = Vec::with_capacity(dims.len());
    let mut y: u32 = 0;
    for dim in dims {
        offsets.push(y);
        y = y.saturating_add(scaled_height(*dim, width, fallback_height));
    }
    (offsets, y)
}
