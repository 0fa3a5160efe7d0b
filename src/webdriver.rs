//! Browser-backed [`PageRenderer`] using Selenium WebDriver.
//!
//! Optionally launches the driver binary (geckodriver or chromedriver) found
//! on `PATH`. The child process is killed when the renderer is closed or
//! dropped.

use std::process::Stdio;

use async_trait::async_trait;
use thirtyfour::{By, Capabilities, ChromiumLikeCapabilities, DesiredCapabilities, WebDriver};
use tokio::{
    process::{Child, Command},
    time::{Instant, sleep},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::{Browser, PaginationSettings, Selectors, Settings, WebDriverSettings},
    error::RenderError,
    renderer::{Advance, PageRenderer, ResultSelectors},
};

/// A live browser session on the search page.
pub struct WebDriverRenderer {
    driver: Option<WebDriver>,
    process: Option<Child>,
    selectors: Selectors,
    results: ResultSelectors,
    pagination: PaginationSettings,
    page: usize,
}

impl WebDriverRenderer {
    /// Starts (or connects to) the driver and opens a browser session.
    ///
    /// # Errors
    ///
    /// Fails if the driver binary cannot be found or started, or if no
    /// session is accepted within `webdriver.startup_timeout_secs`.
    pub async fn launch(settings: &Settings) -> Result<Self, RenderError> {
        let results = ResultSelectors::new(&settings.selectors)?;

        let process = if settings.webdriver.spawn_driver {
            Some(spawn_driver(&settings.webdriver)?)
        } else {
            None
        };

        let driver = connect(&settings.webdriver).await?;
        info!(browser = ?settings.webdriver.browser, "browser session started");

        Ok(Self {
            driver: Some(driver),
            process,
            selectors: settings.selectors.clone(),
            results,
            pagination: settings.pagination.clone(),
            page: 0,
        })
    }

    fn driver(&self) -> Result<&WebDriver, RenderError> {
        self.driver.as_ref().ok_or(RenderError::SessionClosed)
    }

    async fn current_links(&self) -> Result<Vec<Url>, RenderError> {
        let driver = self.driver()?;
        let base = driver.current_url().await?;
        let source = driver.source().await?;
        Ok(self.results.extract(&source, &base))
    }
}

fn spawn_driver(settings: &WebDriverSettings) -> Result<Child, RenderError> {
    let binary = settings.driver_binary();
    let path = which::which(binary).map_err(|source| RenderError::DriverNotFound {
        binary: binary.to_string(),
        source,
    })?;
    let port = settings.url.port_or_known_default().unwrap_or(4444);

    debug!(path = %path.display(), port, "starting webdriver");
    Command::new(&path)
        .arg(format!("--port={port}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| RenderError::DriverSpawn {
            binary: binary.to_string(),
            source,
        })
}

fn capabilities(settings: &WebDriverSettings) -> Result<Capabilities, RenderError> {
    Ok(match settings.browser {
        Browser::Firefox => {
            let mut caps = DesiredCapabilities::firefox();
            if settings.headless {
                caps.set_headless()?;
            }
            caps.into()
        }
        Browser::Chrome => {
            let mut caps = DesiredCapabilities::chrome();
            if settings.headless {
                caps.set_headless()?;
            }
            caps.into()
        }
    })
}

/// Retries session creation until the driver answers or the startup timeout passes.
async fn connect(settings: &WebDriverSettings) -> Result<WebDriver, RenderError> {
    let caps = capabilities(settings)?;
    let deadline = Instant::now() + settings.startup_timeout();

    loop {
        match WebDriver::new(settings.url.as_str(), caps.clone()).await {
            Ok(driver) => return Ok(driver),
            Err(e) if Instant::now() >= deadline => {
                return Err(RenderError::DriverUnreachable {
                    url: settings.url.to_string(),
                    secs: settings.startup_timeout_secs,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                debug!("webdriver not ready yet: {e}");
                sleep(std::time::Duration::from_millis(200)).await;
            }
        }
    }
}

#[async_trait]
impl PageRenderer for WebDriverRenderer {
    async fn load(&mut self, search: &Url) -> Result<(), RenderError> {
        info!("Loading search page {search}");
        self.driver()?.goto(search.as_str()).await?;
        self.page = 1;

        let deadline = Instant::now() + self.pagination.timeout();
        loop {
            let rows = self
                .driver()?
                .find_all(By::Css(self.selectors.result_row.as_str()))
                .await?;
            if !rows.is_empty() {
                debug!("{} result rows rendered", rows.len());
                return Ok(());
            }
            if Instant::now() >= deadline {
                info!("no result rows rendered within {:?}", self.pagination.timeout());
                return Ok(());
            }
            sleep(self.pagination.poll_interval()).await;
        }
    }

    async fn visible_links(&mut self) -> Result<Vec<Url>, RenderError> {
        self.current_links().await
    }

    async fn advance(&mut self) -> Result<Advance, RenderError> {
        let next = self.page + 1;
        let driver = self.driver()?;

        let mut target = None;
        for pager in driver
            .find_all(By::Css(self.selectors.pagination.as_str()))
            .await?
        {
            for item in pager
                .find_all(By::Css(self.selectors.page_item.as_str()))
                .await?
            {
                if item.text().await?.trim().parse::<usize>().ok() == Some(next) {
                    target = Some(item);
                    break;
                }
            }
            if target.is_some() {
                break;
            }
        }

        let Some(item) = target else {
            debug!("no page item {next}, results exhausted");
            return Ok(Advance::Exhausted);
        };

        let before = self.current_links().await?;
        item.click().await?;

        let deadline = Instant::now() + self.pagination.timeout();
        loop {
            sleep(self.pagination.poll_interval()).await;

            // The results list is replaced while rendering; stale reads are retried.
            match self.current_links().await {
                Ok(links) if !links.is_empty() && links != before => {
                    self.page = next;
                    debug!("page {next} rendered with {} results", links.len());
                    return Ok(Advance::More);
                }
                Ok(_) => {}
                Err(e) => debug!("page {next} not readable yet: {e}"),
            }

            if Instant::now() >= deadline {
                warn!(
                    "page {next} rendered no new results within {:?}, stopping",
                    self.pagination.timeout()
                );
                return Ok(Advance::Exhausted);
            }
        }
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        let quit = match self.driver.take() {
            Some(driver) => driver.quit().await.map_err(RenderError::from),
            None => Ok(()),
        };

        if let Some(mut child) = self.process.take()
            && let Err(e) = child.kill().await
        {
            warn!("failed to stop webdriver process: {e}");
        }

        info!("browser session closed");
        quit
    }
}
