//! # Hermitage Scrape
//!
//! Collects artwork records from the State Hermitage Museum's online
//! collection, whose search results are paginated with JavaScript.
//!
//! A run loads a search-results URL in a Selenium-driven browser, walks every
//! result page, and for each artwork fetches the detail page and its image.
//! Each record is stored as `<TYPE>_<NUMBER>.json` and `<TYPE>_<NUMBER>.jpg`,
//! named after the detail URL `.../digital-collection/<TYPE>/<NUMBER>`.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use hermitage_scrape::{Settings, run};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load(None)?;
//!     let summary = run(
//!         "https://www.hermitagemuseum.org/wps/portal/hermitage/woa-search/?lng=en#meta_author=Hau",
//!         Path::new("out"),
//!         settings,
//!         false,
//!         CancellationToken::new(),
//!     )
//!     .await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

use std::{error::Error, net::SocketAddr, path::Path};

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::info;

pub mod config;
pub mod detail;
pub mod enumerator;
pub mod error;
pub mod identifier;
pub mod orchestrator;
pub mod renderer;
pub mod storage;
pub mod telemetry;
pub mod webdriver;

pub use config::{PartialPolicy, Settings};
pub use detail::{ArtworkRecord, DetailFetcher};
pub use enumerator::ResultEnumerator;
pub use error::{ConfigError, RecordError, RenderError, ScrapeError};
pub use identifier::RecordId;
pub use orchestrator::{RunState, RunSummary, Scraper};
pub use renderer::{Advance, PageRenderer, ReplayRenderer};
pub use storage::StorageWriter;
pub use webdriver::WebDriverRenderer;

/// Scrapes every result of `search_url` into `output_dir` with a real browser.
///
/// The search URL is validated before anything else happens. Only then is
/// `output_dir` removed when `clean` is set, and the browser started.
///
/// # Errors
///
/// Returns [`ScrapeError::Environment`] if the webdriver cannot be found,
/// started or reached. Per-record failures are reported in the summary.
pub async fn run(
    search_url: &str,
    output_dir: &Path,
    settings: Settings,
    clean: bool,
    cancel: CancellationToken,
) -> Result<RunSummary, ScrapeError> {
    settings.search_url(search_url)?;
    let fetcher = DetailFetcher::new(&settings)?;

    if clean {
        StorageWriter::clean(output_dir)
            .await
            .map_err(|source| ScrapeError::Output {
                path: output_dir.display().to_string(),
                source,
            })?;
    }

    let renderer = WebDriverRenderer::launch(&settings)
        .await
        .map_err(ScrapeError::Environment)?;

    let mut scraper = Scraper::with_fetcher(renderer, fetcher, settings).with_cancellation(cancel);
    scraper.run(search_url, output_dir).await
}

/// Serves a run's output directory for browsing.
///
/// # Arguments
///
/// * `dir` - The output directory of a previous run
/// * `port` - The port to listen on
pub async fn serve(dir: &Path, port: u16) -> Result<(), Box<dyn Error>> {
    let app = Router::new().fallback_service(ServeDir::new(dir));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Serving {} at http://{addr}", dir.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
