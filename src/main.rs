use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use log::info;

use crate::{
    config::Config,
    notifier::Notifier,
    page_scrapers::ChromeSource,
    pipeline::Watcher,
};

mod config;
mod formatter;
mod notifier;
mod page_scrapers;
mod pipeline;
mod report_gen;
mod store;


/// Checks the product page once, records the reading and calls you if it got cheaper.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file to read
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Log alerts instead of placing the phone call
    #[arg(long)]
    no_call: bool,
}


#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let notifier = if cli.no_call {
        Notifier::disabled()
    } else {
        Notifier::new(config.twilio.as_ref())?
    };
    info!(
        "Watching {} (alert calls {})",
        config.target.url,
        if notifier.is_enabled() { "on" } else { "off" }
    );

    let source = Arc::new(ChromeSource::new(Duration::from_millis(config.target.settle_ms)));
    let watcher = Watcher::new(&config, source, notifier).await?;

    let outcome = watcher.run().await;
    info!("Run finished: {outcome:?}");
    Ok(())
}
