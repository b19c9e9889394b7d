//! Cached book-search client over a Google-Books-shaped volumes API.
//!
//! A thin REST GET wrapper with a 5-minute in-memory cache keyed by
//! `(query, max_results)`. Search failures are surfaced as errors; the
//! caller decides whether to degrade gracefully (the CLI does).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use crate::config::AppConfig;
use crate::net::FetchError;

/// How long a cached search result stays fresh.
pub const CACHE_TTL: Duration = Duration::from_secs(300);

/// Longest description carried on a [`BookSummary`], in characters.
const DESCRIPTION_MAX_CHARS: usize = 150;

/// A search hit from the volumes catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSummary {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub authors: Vec<String>,
    pub publisher: String,
    pub published_date: String,
    /// ISBN-13 when available, else ISBN-10, else empty.
    pub isbn: String,
    /// Plain-text description, truncated.
    pub description: String,
    /// Best-quality cover image URL available.
    pub thumbnail_url: String,
    pub categories: Vec<String>,
    pub page_count: u32,
    pub language: String,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    books: Vec<BookSummary>,
    stored: Instant,
}

/// Book-search client with an in-memory result cache.
///
/// Explicitly constructed and owned by whoever needs search; multiple
/// independent instances keep tests isolated.
#[derive(Clone)]
pub struct BookSearchClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    cache: Arc<Mutex<HashMap<(String, u32), CacheEntry>>>,
}

impl BookSearchClient {
    pub fn new(config: &AppConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent("folio/0.3")
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.books_base_url.clone(),
            api_key: config.books_api_key.clone(),
            cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Search the catalog. Results are cached for five minutes per
    /// `(query, max_results)` pair; queries under two characters return
    /// empty without a network call.
    pub async fn search(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<BookSummary>, FetchError> {
        let query = query.trim();
        if query.chars().count() < 2 {
            return Ok(Vec::new());
        }

        let key = (query.to_string(), max_results);
        if let Some(cached) = self.cache_get(&key) {
            debug!("book search cache hit for {query:?}");
            return Ok(cached);
        }

        let response = self
            .http
            .get(self.search_url(query, max_results))
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::http(status.as_u16(), body));
        }

        let parsed: VolumesResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Transport(format!("failed to parse catalog response: {e}")))?;
        let books = parse_books(parsed.items.unwrap_or_default(), max_results as usize);

        self.cache_put(key, books.clone());
        Ok(books)
    }

    fn search_url(&self, query: &str, max_results: u32) -> String {
        let mut url = format!(
            "{}?q={}&maxResults={max_results}&orderBy=relevance",
            self.base_url,
            urlencoding::encode(query)
        );
        if let Some(key) = &self.api_key {
            url.push_str("&key=");
            url.push_str(&urlencoding::encode(key));
        }
        url
    }

    pub fn clear_cache(&self) {
        self.lock().clear();
    }

    pub fn cache_size(&self) -> usize {
        self.lock().len()
    }

    fn cache_get(&self, key: &(String, u32)) -> Option<Vec<BookSummary>> {
        let mut cache = self.lock();
        match cache.get(key) {
            Some(entry) if entry.stored.elapsed() < CACHE_TTL => Some(entry.books.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn cache_put(&self, key: (String, u32), books: Vec<BookSummary>) {
        self.lock().insert(
            key,
            CacheEntry {
                books,
                stored: Instant::now(),
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, u32), CacheEntry>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Catalog response shapes ────────────────────────────────────────

#[derive(Deserialize, Debug, Default)]
struct VolumesResponse {
    items: Option<Vec<Volume>>,
}

#[derive(Deserialize, Debug)]
struct Volume {
    id: Option<String>,
    #[serde(rename = "volumeInfo")]
    volume_info: Option<VolumeInfo>,
}

#[derive(Deserialize, Debug, Default)]
struct VolumeInfo {
    title: Option<String>,
    subtitle: Option<String>,
    authors: Option<Vec<String>>,
    publisher: Option<String>,
    #[serde(rename = "publishedDate")]
    published_date: Option<String>,
    #[serde(rename = "industryIdentifiers")]
    industry_identifiers: Option<Vec<IndustryIdentifier>>,
    description: Option<String>,
    #[serde(rename = "imageLinks")]
    image_links: Option<ImageLinks>,
    categories: Option<Vec<String>>,
    #[serde(rename = "pageCount")]
    page_count: Option<u32>,
    language: Option<String>,
}

#[derive(Deserialize, Debug)]
struct IndustryIdentifier {
    #[serde(rename = "type")]
    id_type: Option<String>,
    identifier: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ImageLinks {
    large: Option<String>,
    medium: Option<String>,
    small: Option<String>,
    thumbnail: Option<String>,
    #[serde(rename = "smallThumbnail")]
    small_thumbnail: Option<String>,
}

fn parse_books(items: Vec<Volume>, max_results: usize) -> Vec<BookSummary> {
    items
        .into_iter()
        .filter_map(|item| {
            let info = item.volume_info.unwrap_or_default();
            // Hits without a title are useless to the caller.
            let title = info.title?;
            Some(BookSummary {
                id: item.id.unwrap_or_default(),
                title,
                subtitle: info.subtitle.unwrap_or_default(),
                authors: info
                    .authors
                    .unwrap_or_else(|| vec!["Unknown author".to_string()]),
                publisher: info.publisher.unwrap_or_default(),
                published_date: info.published_date.unwrap_or_default(),
                isbn: extract_isbn(&info.industry_identifiers.unwrap_or_default()),
                description: truncate_description(&info.description.unwrap_or_default()),
                thumbnail_url: best_thumbnail(info.image_links.unwrap_or_default()),
                categories: info.categories.unwrap_or_default(),
                page_count: info.page_count.unwrap_or(0),
                language: info.language.unwrap_or_default(),
            })
        })
        .take(max_results)
        .collect()
}

/// Prefer ISBN-13, fall back to ISBN-10.
fn extract_isbn(identifiers: &[IndustryIdentifier]) -> String {
    let find = |wanted: &str| {
        identifiers
            .iter()
            .find(|id| id.id_type.as_deref() == Some(wanted))
            .and_then(|id| id.identifier.clone())
    };
    find("ISBN_13").or_else(|| find("ISBN_10")).unwrap_or_default()
}

/// Highest-quality image available.
fn best_thumbnail(links: ImageLinks) -> String {
    links
        .large
        .or(links.medium)
        .or(links.small)
        .or(links.thumbnail)
        .or(links.small_thumbnail)
        .unwrap_or_default()
}

/// Strip HTML tags and cap the description length.
fn truncate_description(description: &str) -> String {
    let mut plain = String::with_capacity(description.len());
    let mut in_tag = false;
    for c in description.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => plain.push(c),
            _ => {}
        }
    }

    if plain.chars().count() > DESCRIPTION_MAX_CHARS {
        let truncated: String = plain.chars().take(DESCRIPTION_MAX_CHARS).collect();
        format!("{truncated}...")
    } else {
        plain
    }
}
