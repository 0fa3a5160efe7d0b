//! Page rendering abstraction over the JavaScript-driven search page.
//!
//! [`WebDriverRenderer`](crate::webdriver::WebDriverRenderer) drives a real
//! browser; [`ReplayRenderer`] replays canned HTML pages so pagination can be
//! exercised without one.

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::Selectors,
    error::{ConfigError, RenderError},
};

/// Result of asking the renderer for the next page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// A new page has been rendered.
    More,
    /// There is no further page.
    Exhausted,
}

/// A browser session positioned on a page of search results.
#[async_trait]
pub trait PageRenderer: Send {
    /// Loads the search page and waits for its first batch of results.
    ///
    /// An empty result set is not an error.
    async fn load(&mut self, search: &Url) -> Result<(), RenderError>;

    /// Detail links of the result entries currently rendered.
    async fn visible_links(&mut self) -> Result<Vec<Url>, RenderError>;

    /// Moves to the next page, waiting a bounded time for it to render.
    async fn advance(&mut self) -> Result<Advance, RenderError>;

    /// Ends the session. Safe to call more than once.
    async fn close(&mut self) -> Result<(), RenderError>;
}

pub(crate) fn compile(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Compiled selectors locating result links in a rendered page.
#[derive(Debug, Clone)]
pub(crate) struct ResultSelectors {
    row: Selector,
    link: Selector,
}

impl ResultSelectors {
    pub(crate) fn new(selectors: &Selectors) -> Result<Self, ConfigError> {
        Ok(Self {
            row: compile(&selectors.result_row)?,
            link: compile(&selectors.result_link)?,
        })
    }

    /// Extracts the first link of every result row, resolved against `base`.
    pub(crate) fn extract(&self, html: &str, base: &Url) -> Vec<Url> {
        let document = Html::parse_document(html);
        let mut links = Vec::new();

        for row in document.select(&self.row) {
            let Some(href) = row
                .select(&self.link)
                .next()
                .and_then(|a| a.value().attr("href"))
            else {
                debug!("result row without a link");
                continue;
            };

            match base.join(href.trim()) {
                Ok(url) => links.push(url),
                Err(e) => warn!("skipping result link `{href}`: {e}"),
            }
        }

        links
    }
}

/// Replays a fixed sequence of HTML result pages.
///
/// Each call to [`advance`](PageRenderer::advance) moves to the next page
/// until the sequence ends.
pub struct ReplayRenderer {
    pages: Vec<String>,
    current: Option<usize>,
    base: Option<Url>,
    selectors: ResultSelectors,
    advances: usize,
    closed: bool,
}

impl ReplayRenderer {
    pub fn new<I, S>(pages: I, selectors: &Selectors) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            pages: pages.into_iter().map(Into::into).collect(),
            current: None,
            base: None,
            selectors: ResultSelectors::new(selectors)?,
            advances: 0,
            closed: false,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of times `advance` was called.
    pub fn advances(&self) -> usize {
        self.advances
    }

    fn base(&self) -> Result<&Url, RenderError> {
        if self.closed {
            return Err(RenderError::SessionClosed);
        }
        self.base.as_ref().ok_or(RenderError::NotLoaded)
    }
}

#[async_trait]
impl PageRenderer for ReplayRenderer {
    async fn load(&mut self, search: &Url) -> Result<(), RenderError> {
        if self.closed {
            return Err(RenderError::SessionClosed);
        }
        self.base = Some(search.clone());
        self.current = (!self.pages.is_empty()).then_some(0);
        Ok(())
    }

    async fn visible_links(&mut self) -> Result<Vec<Url>, RenderError> {
        let base = self.base()?;
        Ok(match self.current {
            Some(index) => self.selectors.extract(&self.pages[index], base),
            None => Vec::new(),
        })
    }

    async fn advance(&mut self) -> Result<Advance, RenderError> {
        self.base()?;
        self.advances += 1;
        match self.current {
            Some(index) if index + 1 < self.pages.len() => {
                self.current = Some(index + 1);
                Ok(Advance::More)
            }
            _ => Ok(Advance::Exhausted),
        }
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        self.closed = true;
        Ok(())
    }
}
