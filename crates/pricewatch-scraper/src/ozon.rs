//! Ozon scraper over the composer page-JSON API.

use async_trait::async_trait;
use pricewatch_core::config::ScraperConfig;
use pricewatch_core::error::{PriceWatchError, Result, ScrapeError};
use pricewatch_core::traits::Scraper;
use pricewatch_core::types::ProductInfo;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER};

use crate::extract;

pub struct OzonScraper {
    client: reqwest::Client,
    api_base: String,
}

impl OzonScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(REFERER, HeaderValue::from_static("https://www.ozon.ru/"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language)
                .map_err(|e| PriceWatchError::Config(format!("scraper.accept_language: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .cookie_store(true)
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| PriceWatchError::Http(format!("Client error: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
        })
    }
}

fn request_error(e: reqwest::Error) -> ScrapeError {
    if e.is_timeout() {
        ScrapeError::Timeout
    } else {
        ScrapeError::Network(e.to_string())
    }
}

#[async_trait]
impl Scraper for OzonScraper {
    fn name(&self) -> &str {
        "ozon"
    }

    async fn fetch(&self, location: &str) -> std::result::Result<ProductInfo, ScrapeError> {
        if !extract::is_product_url(location) {
            return Err(ScrapeError::InvalidLocation(location.to_string()));
        }
        let page_path = extract::api_path(&extract::to_www(location.trim()));
        tracing::debug!("🌐 GET {} url={page_path}", self.api_base);

        let response = self
            .client
            .get(&self.api_base)
            .query(&[("url", page_path.as_str())])
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(ScrapeError::Blocked(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(ScrapeError::Status(status.as_u16()));
        }

        // Anti-bot interstitials come back as HTML with a 200.
        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScrapeError::Timeout
                } else {
                    ScrapeError::Blocked(format!("non-JSON answer: {e}"))
                }
            })?;

        extract::extract_product(&data)
    }
}
