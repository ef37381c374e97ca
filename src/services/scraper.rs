//! Listing page scraper.
//!
//! The poll loop only depends on [`ListingSource`]; [`HtmlListingScraper`]
//! is the default source, extracting listing cards with configured CSS
//! selectors.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Listing, Price, ScraperConfig, SelectorConfig};
use crate::utils::http::create_async_client;
use crate::utils::{extract_listing_id, resolve_url};

/// Producer of structured listing records.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch the listings currently on the page.
    async fn fetch(&self) -> Result<Vec<Listing>>;

    /// Name of the source, for logs.
    fn source_name(&self) -> &str;
}

/// Parsed selectors for one listing card.
#[derive(Debug, Clone)]
struct CardSelectors {
    item: Selector,
    title: Selector,
    price: Selector,
    link: Selector,
    image: Selector,
    id_attr: Option<String>,
}

impl CardSelectors {
    fn parse(config: &SelectorConfig) -> Result<Self> {
        Ok(Self {
            item: parse_selector(&config.item)?,
            title: parse_selector(&config.title)?,
            price: parse_selector(&config.price)?,
            link: parse_selector(&config.link)?,
            image: parse_selector(&config.image)?,
            id_attr: config.id_attr.clone(),
        })
    }
}

/// Scraper for a single product listing page.
pub struct HtmlListingScraper {
    page_url: String,
    base_url: Url,
    client: Client,
    selectors: CardSelectors,
}

impl HtmlListingScraper {
    /// Create a scraper with the given configuration.
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let client = create_async_client(&config.user_agent, config.timeout())?;
        Self::with_client(config, client)
    }

    /// Create a scraper that reuses an existing HTTP client.
    pub fn with_client(config: &ScraperConfig, client: Client) -> Result<Self> {
        let base_url = Url::parse(config.base_url.as_deref().unwrap_or(&config.url))?;
        Ok(Self {
            page_url: config.url.clone(),
            base_url,
            client,
            selectors: CardSelectors::parse(&config.selectors)?,
        })
    }

    /// Extract listings from a page's HTML.
    pub fn parse_listings(&self, html: &str) -> Vec<Listing> {
        let document = Html::parse_document(html);
        let mut listings = Vec::new();

        for card in document.select(&self.selectors.item) {
            match self.parse_card(&card) {
                Some(listing) => listings.push(listing),
                None => log::debug!("Skipping listing card without a title"),
            }
        }
        listings
    }

    fn parse_card(&self, card: &ElementRef) -> Option<Listing> {
        let title = card
            .select(&self.selectors.title)
            .next()
            .map(|el| normalize_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())?;

        let url = card
            .select(&self.selectors.link)
            .next()
            .or_else(|| (card.value().name() == "a").then_some(*card))
            .and_then(|el| el.value().attr("href"))
            .and_then(|href| {
                let resolved = resolve_url(&self.base_url, href);
                if resolved.is_none() {
                    log::warn!("Listing '{}' has unusable link '{}'", title, href);
                }
                resolved
            })
            .unwrap_or_default();

        let price = card
            .select(&self.selectors.price)
            .next()
            .and_then(|el| Price::parse(&el.text().collect::<String>()));

        let image_url = card.select(&self.selectors.image).next().and_then(|el| {
            el.value()
                .attr("src")
                .or_else(|| el.value().attr("data-src"))
                .and_then(|src| resolve_url(&self.base_url, src))
        });

        let id = self
            .selectors
            .id_attr
            .as_deref()
            .and_then(|attr| card.value().attr(attr))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| extract_listing_id(&url));

        Some(Listing {
            url,
            id,
            title,
            price,
            image_url,
            scraped_at: Utc::now(),
        })
    }
}

#[async_trait]
impl ListingSource for HtmlListingScraper {
    async fn fetch(&self) -> Result<Vec<Listing>> {
        let response = self.client.get(&self.page_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = format!("GET {} returned {}", self.page_url, status);
            return if status.is_server_error() || status.as_u16() == 429 {
                Err(AppError::scrape(message))
            } else {
                Err(AppError::scrape_rejected(status.as_u16(), message))
            };
        }

        let body = response.text().await?;
        let listings = self.parse_listings(&body);
        log::debug!("Extracted {} listings from {}", listings.len(), self.page_url);
        Ok(listings)
    }

    fn source_name(&self) -> &str {
        &self.page_url
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
