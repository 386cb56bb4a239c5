use image::DynamicImage;
use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::config::CacheConfig;

/// Identifies a page independently of the session serving it, so cached
/// images survive a session refresh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub chapter_id: String,
    pub index: usize,
}

impl PageKey {
    pub fn new(chapter_id: impl Into<String>, index: usize) -> Self {
        Self {
            chapter_id: chapter_id.into(),
            index,
        }
    }
}

/// Decoded page images, kept in memory (LRU) and on disk.
///
/// Owned by the reader screen; nothing in here is global.
#[derive(Clone)]
pub struct PageCache {
    inner: Arc<RwLock<PageCacheInner>>,
}

struct PageCacheInner {
    pages: HashMap<PageKey, DynamicImage>,
    access_order: Vec<PageKey>,
    cache_dir: PathBuf,
    max_memory_pages: usize,
    max_disk_bytes: u64,
}

impl PageCache {
    pub fn new(cache_dir: PathBuf, config: &CacheConfig) -> Self {
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            log::warn!(
                "failed to create cache directory {}: {}",
                cache_dir.display(),
                e
            );
        }

        Self {
            inner: Arc::new(RwLock::new(PageCacheInner {
                pages: HashMap::new(),
                access_order: Vec::new(),
                cache_dir,
                max_memory_pages: config.max_memory_pages.max(1),
                max_disk_bytes: config.max_disk_mb * 1024 * 1024,
            })),
        }
    }

    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("manga-reader")
            .join("pages")
    }

    pub async fn get_page(&self, key: &PageKey) -> Option<DynamicImage> {
        let mut inner = self.inner.write().await;

        if let Some(image) = inner.pages.get(key).cloned() {
            inner.touch(key);
            return Some(image);
        }

        if let Some(image) = inner.load_from_disk(key) {
            inner.insert_memory(key.clone(), image.clone());
            return Some(image);
        }

        None
    }

    pub async fn insert_page(&self, key: PageKey, image: DynamicImage) {
        let mut inner = self.inner.write().await;
        inner.save_to_disk(&key, &image);
        inner.insert_memory(key, image);
    }

    #[cfg(test)]
    async fn has_page(&self, key: &PageKey) -> bool {
        let inner = self.inner.read().await;
        inner.pages.contains_key(key) || inner.page_path(key).exists()
    }

    #[cfg(test)]
    async fn memory_len(&self) -> usize {
        self.inner.read().await.pages.len()
    }

    /// Drops every cached page, in memory and on disk.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.pages.clear();
        inner.access_order.clear();
        if inner.cache_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&inner.cache_dir) {
                log::warn!("failed to clear page cache: {e}");
            }
        }
        if let Err(e) = fs::create_dir_all(&inner.cache_dir) {
            log::warn!("failed to recreate cache directory: {e}");
        }
        log::info!("page cache cleared");
    }
}

impl PageCacheInner {
    fn touch(&mut self, key: &PageKey) {
        self.access_order.retain(|k| k != key);
        self.access_order.push(key.clone());
    }

    fn insert_memory(&mut self, key: PageKey, image: DynamicImage) {
        if !self.pages.contains_key(&key) && self.pages.len() >= self.max_memory_pages {
            if let Some(oldest) = self.access_order.first().cloned() {
                self.pages.remove(&oldest);
                self.access_order.remove(0);
            }
        }

        self.touch(&key);
        self.pages.insert(key, image);
    }

    fn page_path(&self, key: &PageKey) -> PathBuf {
        self.cache_dir
            .join(urlencoding::encode(&key.chapter_id).as_ref())
            .join(format!("{}.jpg", key.index))
    }

    fn load_from_disk(&self, key: &PageKey) -> Option<DynamicImage> {
        let bytes = fs::read(self.page_path(key)).ok()?;
        image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()?
            .decode()
            .ok()
    }

    fn save_to_disk(&self, key: &PageKey, image: &DynamicImage) {
        self.cleanup_old_cache();

        let path = self.page_path(key);
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::warn!("failed to create {}: {}", parent.display(), e);
                return;
            }
        }
        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        if let Err(e) = rgb.save_with_format(&path, image::ImageFormat::Jpeg) {
            log::warn!("failed to write {}: {}", path.display(), e);
        }
    }

    fn cleanup_old_cache(&self) {
        let mut entries: Vec<_> = fs::read_dir(&self.cache_dir)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .flat_map(|chapter_dir| fs::read_dir(chapter_dir.path()).into_iter().flatten())
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                let modified = meta.modified().ok()?;
                Some((e.path(), meta.len(), modified))
            })
            .collect();

        let total_size: u64 = entries.iter().map(|(_, size, _)| size).sum();
        if total_size <= self.max_disk_bytes {
            return;
        }

        entries.sort_by_key(|(_, _, modified)| *modified);
        let mut current_size = total_size;
        for (path, size, _) in entries {
            if current_size <= self.max_disk_bytes * 80 / 100 {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                current_size -= size;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn page(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 10, 10])))
    }

    fn cache(dir: &TempDir, max_memory_pages: usize) -> PageCache {
        PageCache::new(
            dir.path().join("pages"),
            &CacheConfig {
                max_memory_pages,
                max_disk_mb: 10,
            },
        )
    }

    #[tokio::test]
    async fn test_insert_then_get_from_memory() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir, 4);
        let key = PageKey::new("ch-1", 0);

        cache.insert_page(key.clone(), page(8, 12)).await;
        let image = cache.get_page(&key).await.unwrap();
        assert_eq!((image.width(), image.height()), (8, 12));
        assert!(cache.has_page(&key).await);
    }

    #[tokio::test]
    async fn test_memory_is_bounded_and_disk_backs_evicted_pages() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir, 2);

        for i in 0..3 {
            cache.insert_page(PageKey::new("ch-1", i), page(4, 4)).await;
        }
        assert_eq!(cache.memory_len().await, 2);

        // Page 0 was evicted from memory but is still on disk.
        let reloaded = cache.get_page(&PageKey::new("ch-1", 0)).await;
        assert!(reloaded.is_some());
        assert_eq!(cache.memory_len().await, 2);
    }

    #[tokio::test]
    async fn test_clear_empties_memory_and_disk() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir, 4);
        let key = PageKey::new("ch-1", 2);
        cache.insert_page(key.clone(), page(4, 4)).await;

        cache.clear().await;
        assert!(!cache.has_page(&key).await);
        assert!(cache.get_page(&key).await.is_none());
        assert!(dir.path().join("pages").exists());
    }

    #[tokio::test]
    async fn test_missing_page_is_none() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir, 4);
        assert!(cache.get_page(&PageKey::new("nope", 9)).await.is_none());
    }
}
