//! Lazy walk over every result link of a loaded search.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::PaginationSettings,
    error::RenderError,
    renderer::{Advance, PageRenderer},
};

/// Yields each detail link of the current search exactly once, advancing
/// the renderer page by page as the buffer drains.
pub struct ResultEnumerator<'r, R: ?Sized> {
    renderer: &'r mut R,
    seen: HashSet<Url>,
    pending: VecDeque<Url>,
    pages_read: usize,
    idle_pages: usize,
    max_pages: Option<usize>,
    max_idle_pages: usize,
    done: bool,
}

impl<'r, R: PageRenderer + ?Sized> ResultEnumerator<'r, R> {
    /// `renderer` must already have loaded the search page.
    pub fn new(renderer: &'r mut R, pagination: &PaginationSettings) -> Self {
        Self {
            renderer,
            seen: HashSet::new(),
            pending: VecDeque::new(),
            pages_read: 0,
            idle_pages: 0,
            max_pages: pagination.max_pages,
            max_idle_pages: pagination.max_idle_pages.max(1),
            done: false,
        }
    }

    /// Next unseen link, or `None` once the results are exhausted.
    ///
    /// After an error the enumeration is over and further calls return `None`.
    pub async fn next(&mut self) -> Result<Option<Url>, RenderError> {
        loop {
            if let Some(link) = self.pending.pop_front() {
                return Ok(Some(link));
            }
            if self.done {
                return Ok(None);
            }

            if self.pages_read > 0 && !self.advance().await? {
                self.done = true;
                continue;
            }

            let links = match self.renderer.visible_links().await {
                Ok(links) => links,
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            };
            self.pages_read += 1;
            self.buffer(links);
        }
    }

    /// Returns whether a new page is available to read.
    async fn advance(&mut self) -> Result<bool, RenderError> {
        if self.max_pages.is_some_and(|max| self.pages_read >= max) {
            info!("reached page limit of {}", self.pages_read);
            return Ok(false);
        }
        if self.idle_pages >= self.max_idle_pages {
            warn!(
                "{} consecutive pages without new results, stopping",
                self.idle_pages
            );
            return Ok(false);
        }

        match self.renderer.advance().await {
            Ok(Advance::More) => Ok(true),
            Ok(Advance::Exhausted) => {
                debug!("results exhausted after {} pages", self.pages_read);
                Ok(false)
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    fn buffer(&mut self, links: Vec<Url>) {
        let before = self.pending.len();
        for link in links {
            if self.seen.insert(link.clone()) {
                self.pending.push_back(link);
            }
        }

        let fresh = self.pending.len() - before;
        debug!("page {}: {fresh} new links", self.pages_read);
        if fresh == 0 && self.pages_read > 1 {
            self.idle_pages += 1;
        } else {
            self.idle_pages = 0;
        }
    }

    pub fn pages_read(&self) -> usize {
        self.pages_read
    }

    /// Distinct links discovered so far.
    pub fn links_seen(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{config::Settings, renderer::ReplayRenderer};

    fn page(hrefs: &[&str]) -> String {
        hrefs
            .iter()
            .map(|h| format!(r#"<div class="her-search-results-row"><a href="{h}">x</a></div>"#))
            .collect()
    }

    async fn collect(pages: Vec<String>, pagination: &PaginationSettings) -> (Vec<String>, usize) {
        let settings = Settings::defaults().unwrap();
        let mut renderer = ReplayRenderer::new(pages, &settings.selectors).unwrap();
        renderer
            .load(&Url::parse("https://www.hermitagemuseum.org/search").unwrap())
            .await
            .unwrap();

        let mut links = ResultEnumerator::new(&mut renderer, pagination);
        let mut out = Vec::new();
        while let Some(link) = links.next().await.unwrap() {
            out.push(link.path().to_string());
        }
        (out, renderer.advances())
    }

    fn pagination() -> PaginationSettings {
        Settings::defaults().unwrap().pagination
    }

    #[tokio::test]
    async fn test_yields_every_link_once_in_order() {
        let pages = vec![page(&["/a", "/b"]), page(&["/b", "/c"]), page(&["/d"])];
        let (links, advances) = collect(pages, &pagination()).await;
        assert_eq!(links, vec!["/a", "/b", "/c", "/d"]);
        assert_eq!(advances, 3);
    }

    #[tokio::test]
    async fn test_empty_search_is_empty_sequence() {
        let (links, _) = collect(vec![page(&[])], &pagination()).await;
        assert!(links.is_empty());

        let (links, _) = collect(vec![], &pagination()).await;
        assert!(links.is_empty());
    }

    #[tokio::test]
    async fn test_terminates_when_final_page_adds_nothing() {
        let pages = vec![page(&["/a"]), page(&["/a"])];
        let (links, advances) = collect(pages, &pagination()).await;
        assert_eq!(links, vec!["/a"]);
        assert_eq!(advances, 2);
    }

    #[tokio::test]
    async fn test_stops_after_idle_pages() {
        let mut pages = vec![page(&["/a"])];
        pages.extend(std::iter::repeat_n(page(&["/a"]), 10));
        pages.push(page(&["/never"]));

        let mut pagination = pagination();
        pagination.max_idle_pages = 2;
        let (links, advances) = collect(pages, &pagination).await;
        assert_eq!(links, vec!["/a"]);
        assert_eq!(advances, 2);
    }

    #[tokio::test]
    async fn test_respects_page_limit() {
        let pages = vec![page(&["/a"]), page(&["/b"]), page(&["/c"])];
        let mut pagination = pagination();
        pagination.max_pages = Some(2);
        let (links, _) = collect(pages, &pagination).await;
        assert_eq!(links, vec!["/a", "/b"]);
    }

    /// Claims there is always more content but never renders anything new.
    struct EndlessRenderer {
        advances: usize,
    }

    #[async_trait]
    impl PageRenderer for EndlessRenderer {
        async fn load(&mut self, _: &Url) -> Result<(), RenderError> {
            Ok(())
        }

        async fn visible_links(&mut self) -> Result<Vec<Url>, RenderError> {
            Ok(vec![Url::parse("https://example.com/a").unwrap()])
        }

        async fn advance(&mut self) -> Result<Advance, RenderError> {
            self.advances += 1;
            if self.advances > 1000 {
                return Err(RenderError::SessionClosed);
            }
            Ok(Advance::More)
        }

        async fn close(&mut self) -> Result<(), RenderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_endless_renderer_terminates() {
        let mut renderer = EndlessRenderer { advances: 0 };
        let mut links = ResultEnumerator::new(&mut renderer, &pagination());
        assert!(links.next().await.unwrap().is_some());
        assert!(links.next().await.unwrap().is_none());
        assert_eq!(links.pages_read(), 4);
        assert_eq!(links.links_seen(), 1);
    }

    struct FailingRenderer;

    #[async_trait]
    impl PageRenderer for FailingRenderer {
        async fn load(&mut self, _: &Url) -> Result<(), RenderError> {
            Ok(())
        }

        async fn visible_links(&mut self) -> Result<Vec<Url>, RenderError> {
            Ok(vec![Url::parse("https://example.com/a").unwrap()])
        }

        async fn advance(&mut self) -> Result<Advance, RenderError> {
            Err(RenderError::NotLoaded)
        }

        async fn close(&mut self) -> Result<(), RenderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_error_ends_enumeration() {
        let mut renderer = FailingRenderer;
        let mut links = ResultEnumerator::new(&mut renderer, &pagination());
        assert!(links.next().await.unwrap().is_some());
        assert!(links.next().await.is_err());
        assert!(links.next().await.unwrap().is_none());
    }
}
