//! Drives one scrape run: render the search, enumerate results, fetch and
//! write each record.
//!
//! Per-record failures are collected into the [`RunSummary`]; only failing
//! to bring up the search page aborts the run. The renderer is closed on
//! every exit path.

use std::{fmt, path::Path};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::{PartialPolicy, RecordSettings, Settings},
    detail::DetailFetcher,
    enumerator::ResultEnumerator,
    error::{ConfigError, RecordError, ScrapeError},
    identifier::RecordId,
    renderer::PageRenderer,
    storage::StorageWriter,
};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Rendering,
    Enumerating,
    FetchingOne,
    Writing,
    Done,
    Failed,
}

impl RunState {
    fn enter(&mut self, next: RunState) {
        debug!("{self:?} -> {next:?}");
        *self = next;
    }
}

/// A record that could not be stored.
#[derive(Debug)]
pub struct RecordFailure {
    pub url: Url,
    pub error: RecordError,
}

/// A record stored with some required fields missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialEntry {
    pub id: RecordId,
    pub missing: Vec<String>,
}

/// Outcome of a completed run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Distinct result links discovered.
    pub links_found: usize,
    /// Records whose two files were written.
    pub written: Vec<RecordId>,
    /// Written records that lack required fields.
    pub partial: Vec<PartialEntry>,
    pub failures: Vec<RecordFailure>,
    /// Set when the browser failed after the first page was loaded.
    pub enumeration_error: Option<String>,
    pub cancelled: bool,
}

impl RunSummary {
    /// Failures of the given kind, e.g. `"FetchFailed"`.
    pub fn failures_of(&self, kind: &str) -> impl Iterator<Item = &RecordFailure> {
        self.failures.iter().filter(move |f| f.error.kind() == kind)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} links found, {} records written, {} partial, {} failed",
            self.links_found,
            self.written.len(),
            self.partial.len(),
            self.failures.len()
        )?;
        for entry in &self.partial {
            writeln!(f, "  partial {}: missing {}", entry.id, entry.missing.join(", "))?;
        }
        for failure in &self.failures {
            writeln!(f, "  {} {}: {}", failure.error.kind(), failure.url, failure.error)?;
        }
        if let Some(e) = &self.enumeration_error {
            writeln!(f, "  enumeration stopped early: {e}")?;
        }
        if self.cancelled {
            writeln!(f, "  run cancelled")?;
        }
        Ok(())
    }
}

/// Scrapes a search through one browser session.
pub struct Scraper<R> {
    renderer: R,
    fetcher: DetailFetcher,
    settings: Settings,
    cancel: CancellationToken,
    state: RunState,
}

impl<R: PageRenderer> Scraper<R> {
    pub fn new(renderer: R, settings: Settings) -> Result<Self, ConfigError> {
        let fetcher = DetailFetcher::new(&settings)?;
        Ok(Self::with_fetcher(renderer, fetcher, settings))
    }

    pub fn with_fetcher(renderer: R, fetcher: DetailFetcher, settings: Settings) -> Self {
        Self {
            renderer,
            fetcher,
            settings,
            cancel: CancellationToken::new(),
            state: RunState::Idle,
        }
    }

    /// Stops the run between records (or mid-fetch) once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Scrapes every result of `search_url` into `output_dir`.
    ///
    /// # Errors
    ///
    /// Only a bad search URL, an unusable output directory or a browser
    /// failure while loading the search page are returned as errors.
    pub async fn run(
        &mut self,
        search_url: &str,
        output_dir: &Path,
    ) -> Result<RunSummary, ScrapeError> {
        let result = self.drive(search_url, output_dir).await;

        if let Err(e) = self.renderer.close().await {
            warn!("closing browser session failed: {e}");
        }

        match &result {
            Ok(summary) => {
                self.state.enter(RunState::Done);
                info!(
                    written = summary.written.len(),
                    partial = summary.partial.len(),
                    failed = summary.failures.len(),
                    "run finished"
                );
            }
            Err(e) => {
                self.state.enter(RunState::Failed);
                error!("run failed: {e}");
            }
        }
        result
    }

    async fn drive(
        &mut self,
        search_url: &str,
        output_dir: &Path,
    ) -> Result<RunSummary, ScrapeError> {
        let Self {
            renderer,
            fetcher,
            settings,
            cancel,
            state,
        } = self;

        state.enter(RunState::Rendering);
        let search = settings.search_url(search_url)?;
        let writer =
            StorageWriter::create(output_dir)
                .await
                .map_err(|source| ScrapeError::Output {
                    path: output_dir.display().to_string(),
                    source,
                })?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(RunSummary { cancelled: true, ..RunSummary::default() });
            }
            loaded = renderer.load(&search) => loaded.map_err(ScrapeError::Environment)?,
        }

        state.enter(RunState::Enumerating);
        let mut summary = RunSummary::default();
        let mut links = ResultEnumerator::new(renderer, &settings.pagination);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                next = links.next() => next,
            };

            let link = match next {
                Ok(Some(link)) => link,
                Ok(None) => break,
                Err(e) => {
                    error!("enumeration stopped: {e}");
                    summary.enumeration_error = Some(e.to_string());
                    break;
                }
            };

            state.enter(RunState::FetchingOne);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                outcome = process(fetcher, &writer, &settings.records, &link, state) => outcome,
            };

            match outcome {
                Ok((id, missing)) => {
                    info!("stored {id}");
                    if !missing.is_empty() {
                        warn!("{id} stored without {}", missing.join(", "));
                        summary.partial.push(PartialEntry {
                            id: id.clone(),
                            missing,
                        });
                    }
                    summary.written.push(id);
                }
                Err(error) => {
                    warn!("{}: {error}", link);
                    summary.failures.push(RecordFailure { url: link, error });
                }
            }
            state.enter(RunState::Enumerating);
        }
        summary.links_found = links.links_seen();

        if summary.cancelled {
            info!("run cancelled");
        }

        let report = summary
            .failures
            .iter()
            .map(|f| (f.url.as_str(), f.error.to_string()));
        if let Err(e) = writer.write_failures(report).await {
            warn!("failed to write failure report: {e}");
        }
        if let Err(e) = writer.write_annotations(&summary.written).await {
            warn!("failed to write annotation sheet: {e}");
        }

        Ok(summary)
    }
}

/// Fetches and stores one record, applying the partial-record policy.
async fn process(
    fetcher: &DetailFetcher,
    writer: &StorageWriter,
    records: &RecordSettings,
    link: &Url,
    state: &mut RunState,
) -> Result<(RecordId, Vec<String>), RecordError> {
    let record = fetcher.fetch(link).await?;

    let missing = record.missing_fields(&records.required_fields);
    if !missing.is_empty() && records.partial_policy == PartialPolicy::Skip {
        return Err(RecordError::PartialRecord {
            id: record.id().to_string(),
            missing,
        });
    }

    state.enter(RunState::Writing);
    writer.write(&record).await?;
    Ok((record.id().clone(), missing))
}
