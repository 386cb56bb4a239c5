use async_trait::async_trait;
use image::DynamicImage;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::io::Cursor;
use tokio::time::Instant;
use urlencoding::encode;

use super::config::Config;
use super::dimensions::{ImageLoader, PageDimension};
use super::error::{ReaderError, Result};
use super::session::{ChapterPageSession, PageQuality};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterSummary {
    pub id: String,
    /// Decimal string, may be fractional ("10.5").
    pub number: String,
    pub title: Option<String>,
    pub volume: Option<String>,
    pub pages: usize,
}

impl ChapterSummary {
    pub fn label(&self) -> String {
        match &self.title {
            Some(title) => format!("Chapter {} - {}", self.number, title),
            None => format!("Chapter {}", self.number),
        }
    }
}

/// One bounded fetch of the chapter feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterCatalogPage {
    pub manga_id: String,
    pub offset: usize,
    pub limit: usize,
    pub chapters: Vec<ChapterSummary>,
    /// Entries the server returned before client-side filtering.
    pub raw_count: usize,
    pub total: Option<usize>,
}

impl ChapterCatalogPage {
    pub fn is_full(&self) -> bool {
        self.raw_count >= self.limit
    }

    pub fn has_more(&self) -> bool {
        if self.raw_count == 0 || !self.is_full() {
            return false;
        }
        match self.total {
            Some(total) => self.offset + self.raw_count < total,
            None => true,
        }
    }
}

/// Where chapter lists and page sessions come from.
#[async_trait]
pub trait ChapterSource: Send + Sync {
    async fn fetch_chapter_batch(
        &self,
        manga_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<ChapterCatalogPage>;

    async fn fetch_page_session(&self, chapter_id: &str) -> Result<ChapterPageSession>;
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    result: String,
    data: Vec<ChapterData>,
    total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ChapterData {
    id: String,
    attributes: ChapterAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterAttributes {
    chapter: Option<String>,
    title: Option<String>,
    volume: Option<String>,
    #[serde(default)]
    pages: usize,
    translated_language: String,
    external_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHomeResponse {
    result: String,
    base_url: String,
    chapter: AtHomeChapter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHomeChapter {
    hash: String,
    data: Vec<String>,
    data_saver: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MangaEnvelope {
    data: MangaData,
}

#[derive(Debug, Deserialize)]
struct MangaData {
    attributes: MangaAttributes,
}

#[derive(Debug, Deserialize)]
struct MangaAttributes {
    title: HashMap<String, String>,
}

fn chapter_batch_from_feed(
    response: FeedResponse,
    manga_id: &str,
    offset: usize,
    limit: usize,
    language: &str,
) -> Result<ChapterCatalogPage> {
    if response.result != "ok" {
        return Err(ReaderError::malformed(format!(
            "feed for {manga_id} returned result '{}'",
            response.result
        )));
    }

    let raw_count = response.data.len();
    let chapters = response
        .data
        .into_iter()
        .filter(|c| c.attributes.translated_language == language)
        .filter(|c| c.attributes.external_url.is_none())
        .map(|c| ChapterSummary {
            id: c.id,
            number: c.attributes.chapter.unwrap_or_else(|| "0".to_string()),
            title: c.attributes.title.filter(|t| !t.trim().is_empty()),
            volume: c.attributes.volume,
            pages: c.attributes.pages,
        })
        .collect();

    Ok(ChapterCatalogPage {
        manga_id: manga_id.to_string(),
        offset,
        limit,
        chapters,
        raw_count,
        total: response.total,
    })
}

fn session_from_at_home(
    response: AtHomeResponse,
    chapter_id: &str,
    quality: PageQuality,
    issued_at: Instant,
) -> Result<ChapterPageSession> {
    if response.result != "ok" {
        return Err(ReaderError::malformed(format!(
            "at-home for {chapter_id} returned result '{}'",
            response.result
        )));
    }

    let page_filenames = match quality {
        PageQuality::Data => response.chapter.data,
        PageQuality::DataSaver => response.chapter.data_saver,
    };
    if page_filenames.is_empty() {
        return Err(ReaderError::not_available(chapter_id));
    }

    Ok(ChapterPageSession {
        chapter_id: chapter_id.to_string(),
        base_url: response.base_url,
        hash: response.chapter.hash,
        quality,
        page_filenames,
        issued_at,
    })
}

fn preferred_title(titles: &HashMap<String, String>) -> Option<String> {
    titles
        .get("en")
        .or_else(|| titles.values().next())
        .cloned()
}

pub struct MangaDexClient {
    client: reqwest::Client,
    base_url: String,
    language: String,
    quality: PageQuality,
}

impl MangaDexClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.api.user_agent.as_str())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            language: config.api.language.clone(),
            quality: config.page_quality(),
        })
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReaderError::Http {
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let bytes = self.get_bytes(url).await?;
        serde_json::from_slice(&bytes).map_err(|e| ReaderError::malformed(format!("{url}: {e}")))
    }

    pub async fn fetch_manga_title(&self, manga_id: &str) -> Result<String> {
        let url = format!("{}/manga/{}", self.base_url, encode(manga_id));
        let response: MangaEnvelope = self.get_json(&url).await?;

        preferred_title(&response.data.attributes.title)
            .ok_or_else(|| ReaderError::malformed(format!("manga {manga_id} has no title")))
    }

    pub async fn fetch_page_image(&self, page_url: &str) -> Result<DynamicImage> {
        let bytes = self.get_bytes(page_url).await?;
        let image = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .decode()?;
        Ok(image)
    }
}

#[async_trait]
impl ChapterSource for MangaDexClient {
    async fn fetch_chapter_batch(
        &self,
        manga_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<ChapterCatalogPage> {
        let url = format!(
            "{}/manga/{}/feed?limit={}&offset={}&order[volume]=desc&order[chapter]=desc&translatedLanguage[]={}&includeExternalUrl=0",
            self.base_url,
            encode(manga_id),
            limit,
            offset,
            encode(&self.language)
        );
        log::debug!("fetching chapter batch: {url}");

        let response: FeedResponse = self.get_json(&url).await?;
        chapter_batch_from_feed(response, manga_id, offset, limit, &self.language)
    }

    async fn fetch_page_session(&self, chapter_id: &str) -> Result<ChapterPageSession> {
        let url = format!("{}/at-home/server/{}", self.base_url, encode(chapter_id));

        let response: AtHomeResponse = match self.get_json(&url).await {
            Ok(response) => response,
            Err(ReaderError::Http { status })
                if status == StatusCode::NOT_FOUND.as_u16()
                    || status == StatusCode::FORBIDDEN.as_u16()
                    || status == StatusCode::GONE.as_u16() =>
            {
                return Err(ReaderError::not_available(chapter_id));
            }
            Err(e) => return Err(e),
        };

        session_from_at_home(response, chapter_id, self.quality, Instant::now())
    }
}

#[async_trait]
impl ImageLoader for MangaDexClient {
    async fn load_image(&self, url: &str) -> Result<DynamicImage> {
        self.fetch_page_image(url).await
    }

    async fn probe(&self, url: &str) -> Result<PageDimension> {
        let bytes = self.get_bytes(url).await?;
        let (width, height) = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .into_dimensions()?;
        Ok(PageDimension { width, height })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"{
        "result": "ok",
        "response": "collection",
        "data": [
            {"id": "c3", "type": "chapter", "attributes": {"volume": "2", "chapter": "10.5", "title": "Interlude", "translatedLanguage": "en", "externalUrl": null, "pages": 18}},
            {"id": "c2", "type": "chapter", "attributes": {"volume": "2", "chapter": "10", "title": "", "translatedLanguage": "en", "externalUrl": "https://elsewhere.example/10", "pages": 0}},
            {"id": "c1", "type": "chapter", "attributes": {"volume": null, "chapter": null, "title": null, "translatedLanguage": "en", "externalUrl": null, "pages": 7}}
        ],
        "limit": 3,
        "offset": 0,
        "total": 40
    }"#;

    const AT_HOME: &str = r#"{
        "result": "ok",
        "baseUrl": "https://node.example.org",
        "chapter": {
            "hash": "deadbeef",
            "data": ["x1.png", "x2.png"],
            "dataSaver": ["s1.jpg", "s2.jpg"]
        }
    }"#;

    #[test]
    fn test_feed_drops_external_chapters_but_counts_them() {
        let response: FeedResponse = serde_json::from_str(FEED).unwrap();
        let page = chapter_batch_from_feed(response, "m1", 0, 3, "en").unwrap();

        assert_eq!(page.raw_count, 3);
        assert_eq!(page.total, Some(40));
        assert!(page.has_more());
        let ids: Vec<_> = page.chapters.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c1"]);
        assert_eq!(page.chapters[0].number, "10.5");
        assert_eq!(page.chapters[0].label(), "Chapter 10.5 - Interlude");
        assert_eq!(page.chapters[1].number, "0");
        assert_eq!(page.chapters[1].title, None);
        assert_eq!(page.manga_id, "m1");
        assert_eq!(page.chapters[0].pages, 18);
        assert_eq!(page.chapters[1].pages, 7);
    }

    #[test]
    fn test_feed_error_result_is_malformed() {
        let response: FeedResponse =
            serde_json::from_str(r#"{"result": "error", "data": []}"#).unwrap();
        let err = chapter_batch_from_feed(response, "m1", 0, 50, "en").unwrap_err();
        assert!(matches!(err, ReaderError::MalformedResponse(_)));
    }

    #[test]
    fn test_feed_shape_mismatch_fails_to_parse() {
        let parsed = serde_json::from_str::<FeedResponse>(r#"{"result": "ok", "data": {}}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_short_batch_has_no_more() {
        let page = ChapterCatalogPage {
            manga_id: "m".to_string(),
            offset: 50,
            limit: 50,
            chapters: Vec::new(),
            raw_count: 12,
            total: None,
        };
        assert!(!page.has_more());
    }

    #[test]
    fn test_full_batch_reaching_total_has_no_more() {
        let page = ChapterCatalogPage {
            manga_id: "m".to_string(),
            offset: 50,
            limit: 50,
            chapters: Vec::new(),
            raw_count: 50,
            total: Some(100),
        };
        assert!(!page.has_more());
    }

    #[test]
    fn test_at_home_selects_quality_bucket() {
        let now = Instant::now();
        let response: AtHomeResponse = serde_json::from_str(AT_HOME).unwrap();
        let session = session_from_at_home(response, "c1", PageQuality::DataSaver, now).unwrap();

        assert_eq!(session.hash, "deadbeef");
        assert_eq!(session.page_filenames, vec!["s1.jpg", "s2.jpg"]);
        assert_eq!(
            session.page_url(0).unwrap(),
            "https://node.example.org/data-saver/deadbeef/s1.jpg"
        );

        let response: AtHomeResponse = serde_json::from_str(AT_HOME).unwrap();
        let session = session_from_at_home(response, "c1", PageQuality::Data, now).unwrap();
        assert_eq!(session.page_filenames, vec!["x1.png", "x2.png"]);
    }

    #[test]
    fn test_at_home_without_pages_is_not_available() {
        let response: AtHomeResponse = serde_json::from_str(
            r#"{"result": "ok", "baseUrl": "https://n", "chapter": {"hash": "h", "data": [], "dataSaver": []}}"#,
        )
        .unwrap();
        let err = session_from_at_home(response, "c9", PageQuality::DataSaver, Instant::now())
            .unwrap_err();
        assert!(matches!(err, ReaderError::NotAvailable { chapter_id } if chapter_id == "c9"));
    }

    #[test]
    fn test_preferred_title_falls_back_to_any_language() {
        let mut titles = HashMap::new();
        titles.insert("ja-ro".to_string(), "Shingeki no Kyojin".to_string());
        assert_eq!(preferred_title(&titles).as_deref(), Some("Shingeki no Kyojin"));

        titles.insert("en".to_string(), "Attack on Titan".to_string());
        assert_eq!(preferred_title(&titles).as_deref(), Some("Attack on Titan"));
    }
}
