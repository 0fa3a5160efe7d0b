//! Scrapes every artwork of a Hermitage collection search.
//!
//! Starts geckodriver (or chromedriver) from `PATH` unless told to connect
//! to a running one.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin scrape -- \
//!     "https://www.hermitagemuseum.org/wps/portal/hermitage/woa-search/?lng=en#meta_author=Hau%2C%20Edward.%201807-1887" \
//!     --output out
//! ```

use std::{error::Error, path::PathBuf};

use clap::{Parser, ValueEnum};
use hermitage_scrape::{PartialPolicy, Settings, config::Browser, telemetry};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BrowserArg {
    Firefox,
    Chrome,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PartialArg {
    Store,
    Skip,
}

#[derive(Parser, Debug)]
#[command(version, about = "Scrape artwork records from a Hermitage collection search")]
struct Args {
    /// Search-results URL with the encoded query
    search_url: String,

    /// Directory the records are written to
    #[arg(short, long)]
    output: PathBuf,

    /// Settings file (defaults to ./hermitage-scrape.{toml,yaml,json} if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Remove the output directory before scraping
    #[arg(long)]
    clean: bool,

    #[arg(long, value_enum)]
    browser: Option<BrowserArg>,

    /// Connect to this WebDriver instead of the configured one
    #[arg(long)]
    webdriver_url: Option<Url>,

    /// Expect a running driver instead of launching one
    #[arg(long)]
    no_spawn_driver: bool,

    /// Show the browser window
    #[arg(long)]
    headful: bool,

    /// What to do with records missing required fields
    #[arg(long, value_enum)]
    partial: Option<PartialArg>,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(browser) = self.browser {
            settings.webdriver.browser = match browser {
                BrowserArg::Firefox => Browser::Firefox,
                BrowserArg::Chrome => Browser::Chrome,
            };
        }
        if let Some(url) = &self.webdriver_url {
            settings.webdriver.url = url.clone();
        }
        if self.no_spawn_driver {
            settings.webdriver.spawn_driver = false;
        }
        if self.headful {
            settings.webdriver.headless = false;
        }
        if let Some(partial) = self.partial {
            settings.records.partial_policy = match partial {
                PartialArg::Store => PartialPolicy::Store,
                PartialArg::Skip => PartialPolicy::Skip,
            };
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    telemetry::init(args.log_level.as_str());

    let mut settings = Settings::load(args.config.as_deref())?;
    args.apply(&mut settings);
    info!(
        search = %args.search_url,
        output = %args.output.display(),
        clean = args.clean,
        "starting scrape"
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, closing the browser");
            on_interrupt.cancel();
        }
    });

    let summary =
        hermitage_scrape::run(&args.search_url, &args.output, settings, args.clean, cancel).await?;
    println!("{summary}");

    Ok(())
}
