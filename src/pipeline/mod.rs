use std::{path::PathBuf, sync::Arc};

use log::{debug, error, info};
use tokio::task::JoinHandle;

use crate::{
    config::{AlertsConfig, Config},
    notifier::Notifier,
    page_scrapers::{PageScraper, PageSource, Reading},
    report_gen::Reporter,
    store::Store,
};


/// The alert conditions a new reading meets.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct Triggers {
    /// Cheaper than anything stored before this run.
    pub(super) new_low: bool,
    /// Cheaper than the previous reading.
    pub(super) price_drop: bool,
    /// Stock at or below the configured threshold.
    pub(super) low_stock: bool,
    /// Price below the configured threshold.
    pub(super) below_threshold: bool,
}


impl Triggers {
    /// History that does not exist yet and thresholds that are not set never trigger.
    pub(super) fn evaluate(
        new_price: f64,
        previous_min: Option<f64>,
        previous_price: Option<f64>,
        new_stock: u32,
        stock_threshold: Option<u32>,
        price_threshold: Option<f64>,
    ) -> Self {
        Self {
            new_low: previous_min.is_some_and(|min| new_price < min),
            price_drop: previous_price.is_some_and(|price| new_price < price),
            low_stock: stock_threshold.is_some_and(|threshold| new_stock <= threshold),
            below_threshold: price_threshold.is_some_and(|threshold| new_price < threshold),
        }
    }

    pub(super) fn any(&self) -> bool {
        self.new_low || self.price_drop || self.low_stock || self.below_threshold
    }

    fn names(&self) -> Vec<&'static str> {
        [
            (self.new_low, "new lowest price"),
            (self.price_drop, "price dropped"),
            (self.low_stock, "low stock"),
            (self.below_threshold, "below price threshold"),
        ]
        .into_iter()
        .filter_map(|(fired, name)| fired.then_some(name))
        .collect()
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RunOutcome {
    /// At least one trigger fired and the alert call was placed.
    Notified,
    /// At least one trigger fired but calls are disabled, so only the log knows.
    Triggered,
    /// The reading was recorded and nothing was worth a call.
    Quiet,
    /// The run stopped early. The cause has been logged.
    Failed,
}


/// Runs the scrape, record, report and alert cycle once.
pub(super) struct Watcher {
    scraper: PageScraper,
    reporter: Reporter,
    notifier: Notifier,
    alerts: AlertsConfig,
    database: PathBuf,
}


impl Watcher {
    pub(super) async fn new(config: &Config, source: Arc<dyn PageSource>, notifier: Notifier) -> anyhow::Result<Self> {
        Ok(Self {
            scraper: PageScraper::new(&config.target, config.paths.screenshot.clone(), source)?,
            reporter: Reporter::new(config).await?,
            notifier,
            alerts: config.alerts.clone(),
            database: config.paths.database.clone(),
        })
    }

    /// Never fails. Whatever goes wrong is logged, and the database is closed on every path.
    pub(super) async fn run(&self) -> RunOutcome {
        let store = match Store::open(&self.database) {
            Ok(store) => store,
            Err(e) => {
                error!("{e:#}");
                return RunOutcome::Failed;
            }
        };

        let result = self.run_with(&store).await;
        store.close();

        match result {
            Ok((triggers, call)) => match call {
                Some(call) => {
                    if let Err(e) = call.await {
                        error!("Alert call task did not finish: {e}");
                    }
                    RunOutcome::Notified
                }
                None if triggers.any() => RunOutcome::Triggered,
                None => RunOutcome::Quiet,
            },
            Err(e) => {
                error!("Run failed: {e:#}");
                RunOutcome::Failed
            }
        }
    }

    async fn run_with(&self, store: &Store) -> anyhow::Result<(Triggers, Option<JoinHandle<()>>)> {
        let reading = self.scraper.scrape().await?;
        let triggers = self.record(store, &reading).await?;

        if !triggers.any() {
            info!("Nothing to report");
            return Ok((triggers, None));
        }
        info!("Alert: {}", triggers.names().join(", "));
        Ok((triggers, self.notifier.notify()))
    }

    /// Stores `reading`, rewrites the report and works out which triggers fired.
    async fn record(&self, store: &Store, reading: &Reading) -> anyhow::Result<Triggers> {
        if let Err(e) = store.ensure_schema() {
            error!("{e:#}");
        }

        // history has to be read before the new row lands
        let previous_min = store.minimum_price()?;
        let previous = store.latest_reading()?;
        if let Some(previous) = &previous {
            debug!(
                "Previous reading: price {} stock {} at {}",
                previous.price, previous.stock, previous.created_at
            );
        }

        store.insert(reading)?;
        let minimum = store.minimum_price()?;
        info!("{} readings stored", store.count()?);

        let document = self.reporter.render(reading, previous.as_ref(), minimum.as_ref());
        self.reporter.persist(&document).await?;

        Ok(Triggers::evaluate(
            reading.price,
            previous_min.map(|m| m.price),
            previous.map(|p| p.price),
            reading.stock,
            self.alerts.stock_threshold,
            self.alerts.price_threshold,
        ))
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use url::Url;

    use super::*;
    use crate::{config::TwilioConfig, page_scrapers::LoadedPage};

    #[test]
    fn new_low_below_threshold_notifies() {
        let triggers = Triggers::evaluate(99.0, Some(120.0), Some(110.0), 5, Some(3), Some(150.0));
        assert!(triggers.new_low);
        assert!(triggers.price_drop);
        assert!(!triggers.low_stock);
        assert!(triggers.below_threshold);
        assert!(triggers.any());
    }

    #[test]
    fn unchanged_expensive_reading_is_quiet() {
        let triggers = Triggers::evaluate(130.0, Some(100.0), Some(130.0), 50, Some(3), Some(50.0));
        assert_eq!(triggers, Triggers::default());
        assert!(!triggers.any());
    }

    #[test]
    fn price_drop_alone_notifies() {
        let triggers = Triggers::evaluate(105.0, Some(100.0), Some(110.0), 50, Some(3), None);
        assert!(triggers.price_drop);
        assert!(!triggers.new_low);
        assert!(!triggers.low_stock);
        assert!(!triggers.below_threshold);
        assert!(triggers.any());
        assert_eq!(triggers.names(), vec!["price dropped"]);
    }

    #[test]
    fn low_stock_alone_notifies() {
        let triggers = Triggers::evaluate(130.0, Some(100.0), Some(130.0), 3, Some(3), None);
        assert!(triggers.low_stock);
        assert!(triggers.any());
        assert_eq!(triggers.names(), vec!["low stock"]);
    }

    #[test]
    fn first_run_only_checks_thresholds() {
        assert!(!Triggers::evaluate(10.0, None, None, 100, Some(3), Some(5.0)).any());
        assert!(Triggers::evaluate(10.0, None, None, 100, Some(3), Some(50.0)).below_threshold);
    }

    #[test]
    fn unset_thresholds_never_fire() {
        assert!(!Triggers::evaluate(0.0, None, None, 0, None, None).any());
    }

    /// Serves a queue of pages, one per visit.
    struct Pages(Mutex<Vec<String>>);

    impl Pages {
        fn new(prices: &[(&str, u32)]) -> Self {
            let pages = prices
                .iter()
                .rev()
                .map(|(price, stock)| {
                    format!(
                        r#"<div class="oldPrice"><cp-ar>{price}</cp-ar></div><span class="stockFlag">Disponibles: {stock} pzas.</span>"#
                    )
                })
                .collect();
            Self(Mutex::new(pages))
        }
    }

    impl PageSource for Pages {
        fn load(&self, _url: &Url) -> anyhow::Result<LoadedPage> {
            let html = self.0.lock().unwrap().pop().ok_or_else(|| anyhow!("no more pages"))?;
            Ok(LoadedPage { html, screenshot: None })
        }
    }

    async fn watcher(dir: &tempfile::TempDir, pages: Pages, alerts: &str) -> (Watcher, Config) {
        watcher_with(dir, pages, alerts, Notifier::disabled()).await
    }

    async fn watcher_with(dir: &tempfile::TempDir, pages: Pages, alerts: &str, notifier: Notifier) -> (Watcher, Config) {
        let text = format!(
            r#"
                [target]
                url = "https://example.com/p/1"

                [paths]
                database = "{db}"
                report = "{report}"
                screenshot = "{shot}"

                [alerts]
                {alerts}
            "#,
            db = dir.path().join("data.db").display(),
            report = dir.path().join("README.md").display(),
            shot = dir.path().join("screenshot.png").display(),
        );
        let config = Config::from_toml(&text, |_| None).unwrap();
        let watcher = Watcher::new(&config, Arc::new(pages), notifier).await.unwrap();
        (watcher, config)
    }

    fn stored_count(config: &Config) -> u64 {
        let store = Store::open(&config.paths.database).unwrap();
        let count = store.count().unwrap();
        store.close();
        count
    }

    #[tokio::test]
    async fn runs_record_history_and_alert_on_drops() {
        let dir = tempfile::tempdir().unwrap();
        let pages = Pages::new(&[("$1,300.00", 10), ("$1,300.00", 10), ("$1,100.00", 9), ("$1,200.00", 9)]);
        let (watcher, config) = watcher(&dir, pages, "stock_threshold = 3").await;

        assert_eq!(watcher.run().await, RunOutcome::Quiet);
        let report = std::fs::read_to_string(&config.paths.report).unwrap();
        assert!(report.contains("| $1,300.00 |"));
        assert!(report.contains("| N/A |"));

        // identical reading: no new low, no drop
        assert_eq!(watcher.run().await, RunOutcome::Quiet);
        assert_eq!(watcher.run().await, RunOutcome::Triggered);
        let report = std::fs::read_to_string(&config.paths.report).unwrap();
        assert!(report.contains("| $1,300.00 | $1,100.00 | $200.00 | $0.00 | 9 |"));

        // pricier than last time and above the low
        assert_eq!(watcher.run().await, RunOutcome::Quiet);
        assert_eq!(stored_count(&config), 4);
    }

    #[tokio::test]
    async fn failed_scrape_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let pages = Pages::new(&[("Agotado", 0)]);
        let (watcher, config) = watcher(&dir, pages, "").await;

        assert_eq!(watcher.run().await, RunOutcome::Failed);
        assert!(!config.paths.report.exists());
        assert_eq!(watcher.run().await, RunOutcome::Failed);

        let store = Store::open(&config.paths.database).unwrap();
        store.ensure_schema().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        store.close();
    }

    #[tokio::test]
    async fn low_stock_triggers_on_repeat_runs() {
        let dir = tempfile::tempdir().unwrap();
        let pages = Pages::new(&[("$500.00", 2), ("$500.00", 2)]);
        let (watcher, config) = watcher(&dir, pages, "stock_threshold = 2").await;

        assert_eq!(watcher.run().await, RunOutcome::Triggered);
        assert_eq!(watcher.run().await, RunOutcome::Triggered);
        assert_eq!(stored_count(&config), 2);
    }

    #[tokio::test]
    async fn enabled_notifier_places_the_call() {
        let dir = tempfile::tempdir().unwrap();
        let pages = Pages::new(&[("$500.00", 2), ("$500.00", 20)]);
        // nothing listens on the discard port, the failed call only gets logged
        let twilio = TwilioConfig {
            account_sid: "AC123".into(),
            auth_token: "secret".into(),
            from: "+12015550123".into(),
            to: "+12015550123".into(),
            api_base: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..TwilioConfig::default()
        };
        let notifier = Notifier::new(Some(&twilio)).unwrap();
        let (watcher, _config) = watcher_with(&dir, pages, "stock_threshold = 2", notifier).await;

        assert_eq!(watcher.run().await, RunOutcome::Notified);
        assert_eq!(watcher.run().await, RunOutcome::Quiet);
    }
}
