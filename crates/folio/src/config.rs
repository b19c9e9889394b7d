//! Environment-based configuration.
//!
//! All settings come from `FOLIO_*` environment variables. The report
//! backend key is required; everything else has a default.

/// Default report backend when `FOLIO_API_BASE` is unset.
pub const DEFAULT_API_BASE: &str = "https://booktok-newapi.onrender.com";

/// Default volumes catalog endpoint for book search.
pub const DEFAULT_BOOKS_BASE: &str = "https://www.googleapis.com/books/v1/volumes";

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Report backend base URL (`FOLIO_API_BASE`).
    pub api_base_url: String,
    /// Bearer token for the report backend (`FOLIO_API_KEY`, required).
    pub api_key: String,
    /// Volumes catalog base URL (`FOLIO_BOOKS_API_BASE`).
    pub books_base_url: String,
    /// Optional catalog API key (`FOLIO_BOOKS_API_KEY`).
    pub books_api_key: Option<String>,
    /// Model identifier (`FOLIO_MODEL`).
    pub model: String,
}

impl AppConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, String> {
        let api_key = std::env::var("FOLIO_API_KEY")
            .map_err(|_| "FOLIO_API_KEY not set".to_string())?;
        Ok(Self {
            api_base_url: std::env::var("FOLIO_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            api_key,
            books_base_url: std::env::var("FOLIO_BOOKS_API_BASE")
                .unwrap_or_else(|_| DEFAULT_BOOKS_BASE.to_string()),
            books_api_key: std::env::var("FOLIO_BOOKS_API_KEY").ok(),
            model: std::env::var("FOLIO_MODEL")
                .unwrap_or_else(|_| crate::DEFAULT_MODEL.to_string()),
        })
    }
}
