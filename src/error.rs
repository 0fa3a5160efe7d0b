//! Error types for a scrape run.
//!
//! Only [`ScrapeError`] aborts a run. Everything that can go wrong with a
//! single artwork is a [`RecordError`], collected into the run summary.

use std::{fmt, io};

use thiserror::Error;

/// Settings could not be loaded or the search URL is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid search URL `{url}`: {reason}")]
    InvalidSearchUrl { url: String, reason: String },

    #[error("invalid CSS selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Failures of the browser session driving the search page.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("webdriver binary `{binary}` not found on PATH")]
    DriverNotFound {
        binary: String,
        #[source]
        source: which::Error,
    },

    #[error("failed to start webdriver `{binary}`: {source}")]
    DriverSpawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("webdriver at {url} did not accept a session within {secs}s: {reason}")]
    DriverUnreachable { url: String, secs: u64, reason: String },

    #[error("webdriver: {0}")]
    WebDriver(#[from] thirtyfour::error::WebDriverError),

    #[error("no search page loaded")]
    NotLoaded,

    #[error("browser session already closed")]
    SessionClosed,

    #[error("{0}")]
    Config(#[from] ConfigError),
}

/// The URL of a detail page does not end in `digital-collection/<TYPE>/<NUMBER>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid URL shape `{url}`: {reason}")]
pub struct IdentifierError {
    pub url: String,
    pub reason: &'static str,
}

/// Which of the two output files of a record failed to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputHalf {
    Metadata,
    Image,
    Both,
}

impl fmt::Display for OutputHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputHalf::Metadata => "metadata",
            OutputHalf::Image => "image",
            OutputHalf::Both => "metadata and image",
        })
    }
}

/// A failure confined to one artwork. The run continues.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    InvalidUrlShape(#[from] IdentifierError),

    #[error("fetch failed for {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("record {id} is missing fields: {}", missing.join(", "))]
    PartialRecord { id: String, missing: Vec<String> },

    #[error("writing {half} of {id} failed: {reason}")]
    WriteFailed {
        id: String,
        half: OutputHalf,
        reason: String,
    },
}

impl RecordError {
    pub(crate) fn fetch(url: impl fmt::Display, reason: impl fmt::Display) -> Self {
        RecordError::FetchFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short name of the error class, as shown in summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            RecordError::InvalidUrlShape(_) => "InvalidURLShape",
            RecordError::FetchFailed { .. } => "FetchFailed",
            RecordError::PartialRecord { .. } => "PartialRecord",
            RecordError::WriteFailed { .. } => "WriteFailed",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RecordError::FetchFailed { .. })
    }
}

/// Errors that end a run before any record is processed.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("environment failure: {0}")]
    Environment(#[source] RenderError),

    #[error("cannot prepare output directory {path}: {source}")]
    Output {
        path: String,
        #[source]
        source: io::Error,
    },
}
