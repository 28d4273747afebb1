use std::{
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use anyhow::Context;
use chrono::Local;
use log::info;
use regex::{Captures, Regex};
use tokio::fs::DirBuilder;

use crate::{
    config::Config,
    formatter::Formatter,
    page_scrapers::Reading,
    store::{LatestReading, MinimumPrice},
};

const DEFAULT_REPORT_MD: &str = include_str!("default_template.md");
const NOT_AVAILABLE: &str = "N/A";


#[derive(Clone)]
pub(super) enum ReportTemplate {
    Custom(Arc<String>),
    Default,
}


impl ReportTemplate {
    fn body(&self) -> &str {
        match self {
            ReportTemplate::Custom(template) => template.as_str(),
            ReportTemplate::Default => DEFAULT_REPORT_MD,
        }
    }
}


/// Matches `<placeholder>` tags. Tags the report does not know are left alone so
/// templates can carry plain html.
fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("<([a-z][a-z-]*)>").expect("placeholder pattern should be a valid regex"))
}


/// The cells of the status table, already formatted.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct ReportFields {
    pub(super) lowest_price: String,
    pub(super) lowest_price_date: String,
    pub(super) last_checked: String,
    pub(super) previous_price: String,
    pub(super) current_price: String,
    /// Previous minus current, so a positive change is a price drop.
    pub(super) change: String,
    /// How far the current price sits above the lowest one.
    pub(super) over_min: String,
    pub(super) stock: String,
}


impl ReportFields {
    /// Cells that need history the table does not have yet read `N/A`.
    pub(super) fn compute(
        formatter: &Formatter,
        new: &Reading,
        previous: Option<&LatestReading>,
        minimum: Option<&MinimumPrice>,
    ) -> Self {
        let or_na = |value: Option<String>| value.unwrap_or_else(|| NOT_AVAILABLE.into());

        Self {
            lowest_price: or_na(minimum.map(|m| formatter.currency(m.price))),
            lowest_price_date: or_na(minimum.map(|m| formatter.timestamp(&m.created_at.with_timezone(&Local)))),
            last_checked: formatter.timestamp(&new.checked_at),
            previous_price: or_na(previous.map(|p| formatter.currency(p.price))),
            current_price: formatter.currency(new.price),
            change: or_na(previous.map(|p| formatter.currency(p.price - new.price))),
            over_min: or_na(minimum.map(|m| formatter.currency(new.price - m.price))),
            stock: new.stock.to_string(),
        }
    }
}


/// Writes the markdown status page after every run.
pub(super) struct Reporter {
    template: ReportTemplate,
    formatter: Formatter,
    title: String,
    badge: Option<String>,
    /// Screenshot location as seen from the report.
    screenshot_link: String,
    output: PathBuf,
}


impl Reporter {
    pub(super) async fn new(config: &Config) -> anyhow::Result<Self> {
        let template = match &config.paths.report_template {
            Some(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read report template {}", path.display()))?;
                ReportTemplate::Custom(Arc::new(text))
            }
            None => ReportTemplate::Default,
        };

        Ok(Self {
            template,
            formatter: Formatter::new(&config.format),
            title: config.report.title.clone(),
            badge: config.report.badge.clone(),
            screenshot_link: screenshot_link(&config.paths.report, &config.paths.screenshot),
            output: config.paths.report.clone(),
        })
    }

    /// Produces the whole document. Same inputs always give the same text.
    pub(super) fn render(
        &self,
        new: &Reading,
        previous: Option<&LatestReading>,
        minimum: Option<&MinimumPrice>,
    ) -> String {
        let fields = ReportFields::compute(&self.formatter, new, previous, minimum);
        let badge = self.badge.as_ref().map(|b| format!("{}\n\n", b.trim_end())).unwrap_or_default();

        placeholder_pattern()
            .replace_all(self.template.body(), |c: &Captures| {
                let value = match &c[1] {
                    "title" => &self.title,
                    "badge" => &badge,
                    "screenshot" => &self.screenshot_link,
                    "lowest-price" => &fields.lowest_price,
                    "lowest-price-date" => &fields.lowest_price_date,
                    "last-checked" => &fields.last_checked,
                    "previous-price" => &fields.previous_price,
                    "current-price" => &fields.current_price,
                    "change" => &fields.change,
                    "over-min" => &fields.over_min,
                    "stock" => &fields.stock,
                    _ => return c[0].to_string(),
                };
                value.clone()
            })
            .into_owned()
    }

    /// Replaces whatever report was there before.
    pub(super) async fn persist(&self, document: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            DirBuilder::new()
                .recursive(true)
                .create(parent)
                .await
                .with_context(|| format!("Failed to create report directory {}. Do we have permissions?", parent.display()))?;
        }
        tokio::fs::write(&self.output, document)
            .await
            .with_context(|| format!("Failed to write report to {}", self.output.display()))?;
        info!("Report written to {}", self.output.display());
        Ok(())
    }
}


/// Links the screenshot by file name when it sits next to the report.
fn screenshot_link(report: &Path, screenshot: &Path) -> String {
    let same_dir = report.parent().unwrap_or(Path::new("")) == screenshot.parent().unwrap_or(Path::new(""));
    match screenshot.file_name() {
        Some(name) if same_dir => name.to_string_lossy().into_owned(),
        _ => screenshot.to_string_lossy().replace('\\', "/"),
    }
}
