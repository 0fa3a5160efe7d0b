//! Layered settings: built-in defaults, an optional settings file, then
//! `HERMITAGE_SCRAPE__*` environment variables.

use std::{path::Path, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

const DEFAULT_FILE: &str = "hermitage-scrape";
const ENV_PREFIX: &str = "HERMITAGE_SCRAPE";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub site: SiteSettings,
    pub webdriver: WebDriverSettings,
    pub pagination: PaginationSettings,
    pub selectors: Selectors,
    pub fetch: FetchSettings,
    pub records: RecordSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteSettings {
    /// Search URLs must be on this host; relative references resolve against it.
    pub base_url: Url,
    /// Base for canonical detail URLs, ending in `digital-collection/`.
    pub collection_url: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Firefox,
    Chrome,
}

impl Browser {
    pub fn default_driver(self) -> &'static str {
        match self {
            Browser::Firefox => "geckodriver",
            Browser::Chrome => "chromedriver",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebDriverSettings {
    pub browser: Browser,
    pub url: Url,
    /// Launch the driver found on `PATH` instead of expecting one at `url`.
    pub spawn_driver: bool,
    pub driver_binary: Option<String>,
    pub headless: bool,
    pub startup_timeout_secs: u64,
}

impl WebDriverSettings {
    pub fn driver_binary(&self) -> &str {
        self.driver_binary
            .as_deref()
            .unwrap_or_else(|| self.browser.default_driver())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationSettings {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub max_pages: Option<usize>,
    /// Consecutive pages without new links after which enumeration stops.
    pub max_idle_pages: usize,
}

impl PaginationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// CSS selectors for the search and detail pages.
#[derive(Debug, Clone, Deserialize)]
pub struct Selectors {
    pub result_row: String,
    pub result_link: String,
    pub pagination: String,
    pub page_item: String,
    pub data_table: String,
    pub image: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub user_agent: String,
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// What to do with a record that lacks required fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialPolicy {
    /// Write it anyway and list it as partial in the summary.
    Store,
    /// Report it as a failure and write nothing.
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordSettings {
    pub required_fields: Vec<String>,
    pub partial_policy: PartialPolicy,
}

impl Settings {
    /// Loads settings from `path` if given, otherwise from an optional
    /// `hermitage-scrape.*` file in the working directory.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };

        let settings: Settings = Self::builder()?
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Built-in defaults only, ignoring files and environment.
    pub fn defaults() -> Result<Self, ConfigError> {
        Ok(Self::builder()?.build()?.try_deserialize()?)
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let builder = Config::builder()
            .set_default("site.base_url", "https://www.hermitagemuseum.org/")?
            .set_default(
                "site.collection_url",
                "https://www.hermitagemuseum.org/wps/portal/hermitage/digital-collection/",
            )?
            .set_default("webdriver.browser", "firefox")?
            .set_default("webdriver.url", "http://127.0.0.1:4444")?
            .set_default("webdriver.spawn_driver", true)?
            .set_default("webdriver.headless", true)?
            .set_default("webdriver.startup_timeout_secs", 10)?
            .set_default("pagination.timeout_secs", 5)?
            .set_default("pagination.poll_interval_ms", 250)?
            .set_default("pagination.max_idle_pages", 3)?
            .set_default("selectors.result_row", ".her-search-results-row")?
            .set_default("selectors.result_link", "a")?
            .set_default("selectors.pagination", ".her-pagination")?
            .set_default("selectors.page_item", "li")?
            .set_default("selectors.data_table", "section.her-data-table")?
            .set_default("selectors.image", "section:not(.her-data-table) img[src]")?
            .set_default("fetch.timeout_secs", 30)?
            .set_default("fetch.retries", 2)?
            .set_default("fetch.retry_delay_ms", 1000)?
            .set_default(
                "fetch.user_agent",
                concat!("hermitage-scrape/", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("records.required_fields", vec!["title", "inventory_nr"])?
            .set_default("records.partial_policy", "store")?;
        Ok(builder)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.site.collection_url.path().ends_with("digital-collection/") {
            return Err(ConfigError::Invalid {
                key: "site.collection_url",
                reason: "must end with `digital-collection/`".into(),
            });
        }
        if self.pagination.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "pagination.poll_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.pagination.max_idle_pages == 0 {
            return Err(ConfigError::Invalid {
                key: "pagination.max_idle_pages",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Checks that `raw` is a search URL on the configured site.
    pub fn search_url(&self, raw: &str) -> Result<Url, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidSearchUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if url.host_str() != self.site.base_url.host_str() {
            return Err(invalid(&format!(
                "host must be {}",
                self.site.base_url.host_str().unwrap_or_default()
            )));
        }
        Ok(url)
    }
}
