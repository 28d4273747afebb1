use std::time::Duration;

use anyhow::{anyhow, Context};
use headless_chrome::{protocol::cdp::Page::CaptureScreenshotFormatOption, Browser, LaunchOptions};
use log::{debug, warn};
use url::Url;

use super::{LoadedPage, PageSource};


/// Loads pages in a fresh headless Chrome for every visit.
pub(crate) struct ChromeSource {
    /// Time given to late scripts after navigation finishes.
    settle: Duration,
}


impl ChromeSource {
    pub(crate) fn new(settle: Duration) -> Self {
        Self { settle }
    }
}


impl PageSource for ChromeSource {
    fn load(&self, url: &Url) -> anyhow::Result<LoadedPage> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .build()
            .map_err(|e| anyhow!("Invalid browser launch options: {e}"))?;
        let browser = Browser::new(options).context("Failed to launch Chrome. Is it installed?")?;
        let tab = browser.new_tab().context("Failed to open a browser tab")?;

        tab
            .navigate_to(url.as_str())?
            .wait_until_navigated()
            .with_context(|| format!("Navigation to {url} did not finish"))?;

        let screenshot = match tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true) {
            Ok(png) => Some(png),
            Err(e) => {
                warn!("Failed to capture a screenshot of {url}: {e}");
                None
            }
        };
        let html = tab.get_content().context("Failed to read the page content")?;

        std::thread::sleep(self.settle);
        debug!("Closing browser");
        drop(tab);
        drop(browser);

        Ok(LoadedPage { html, screenshot })
    }
}
