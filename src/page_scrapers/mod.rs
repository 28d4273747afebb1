use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use scraper::{Html, Selector};
use url::Url;

use crate::config::TargetConfig;

pub(crate) use self::chrome::ChromeSource;
pub(crate) use self::extract::{parse_price, parse_stock};

mod chrome;
mod extract;


/// One observation of the product page.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reading {
    pub(crate) url: Url,
    /// Non-negative amount shown on the page.
    pub(crate) price: f64,
    /// Units available. Zero when the page did not say.
    pub(crate) stock: u32,
    /// When the page was read. Only used for display, the store stamps its own time.
    pub(crate) checked_at: DateTime<Local>,
}


/// What a browser hands back after visiting the product page.
pub(crate) struct LoadedPage {
    /// The rendered DOM, serialized.
    pub(crate) html: String,
    /// PNG capture of the page, if one could be taken.
    pub(crate) screenshot: Option<Vec<u8>>,
}


pub(crate) trait PageSource: Send + Sync {
    /// Visits `url` and returns the rendered page.
    ///
    /// This blocks for as long as the page needs to load and settle, so callers
    /// should keep it off the async runtime.
    fn load(&self, url: &Url) -> anyhow::Result<LoadedPage>;
}


/// Reads price and stock off the configured product page.
pub(crate) struct PageScraper {
    url: Url,
    price_selector: Selector,
    stock_selector: Selector,
    stock_prefix: String,
    stock_suffix: String,
    screenshot_path: PathBuf,
    source: Arc<dyn PageSource>,
}


fn parse_selector(selector: &str) -> anyhow::Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("Invalid CSS selector '{selector}': {e:?}"))
}


impl PageScraper {
    pub(crate) fn new(target: &TargetConfig, screenshot_path: PathBuf, source: Arc<dyn PageSource>) -> anyhow::Result<Self> {
        Ok(Self {
            url: target.url.clone(),
            price_selector: parse_selector(&target.price_selector)?,
            stock_selector: parse_selector(&target.stock_selector)?,
            stock_prefix: target.stock_prefix.clone(),
            stock_suffix: target.stock_suffix.clone(),
            screenshot_path,
            source,
        })
    }

    pub(crate) async fn scrape(&self) -> anyhow::Result<Reading> {
        let source = self.source.clone();
        let url = self.url.clone();
        info!("Loading {url}");
        let page = tokio_rayon::spawn(move || source.load(&url))
            .await
            .with_context(|| format!("Failed to load {}", self.url))?;
        let checked_at = Local::now();

        match &page.screenshot {
            Some(png) => match tokio::fs::write(&self.screenshot_path, png).await {
                Ok(()) => debug!("Saved screenshot to {}", self.screenshot_path.display()),
                Err(e) => warn!("Failed to save screenshot to {}: {e}", self.screenshot_path.display()),
            },
            None => warn!("No screenshot was captured"),
        }

        let (price, stock) = self.read_fields(&page.html)?;
        info!("Read price {price} with {stock} in stock");

        Ok(Reading { url: self.url.clone(), price, stock, checked_at })
    }

    /// Pulls price and stock out of the rendered page.
    ///
    /// A missing or unreadable price is an error since every later step depends on it.
    /// The stock flag is often absent on sold out pages, so it falls back to zero.
    fn read_fields(&self, html: &str) -> anyhow::Result<(f64, u32)> {
        let document = Html::parse_document(html);
        let text_of = |selector: &Selector| {
            document
                .select(selector)
                .next()
                .map(|element| element.text().collect::<String>())
        };

        let price_text = text_of(&self.price_selector)
            .ok_or_else(|| anyhow!("No element matched the price selector"))?;
        let price = parse_price(&price_text)
            .ok_or_else(|| anyhow!("Could not read a price from '{}'", price_text.trim()))?;

        let stock = match text_of(&self.stock_selector) {
            Some(text) => parse_stock(&text, &self.stock_prefix, &self.stock_suffix).unwrap_or_else(|| {
                warn!("Could not read stock from '{}', assuming 0", text.trim());
                0
            }),
            None => {
                warn!("No element matched the stock selector, assuming 0");
                0
            }
        };

        Ok((price, stock))
    }
}
