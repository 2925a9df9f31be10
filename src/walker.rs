use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::extract::{self, DEFAULT_FIELD_TIMEOUT};
use crate::job::{ExtractionJob, Record, RunResult};
use crate::session::{PageSession, SessionError, SessionLauncher, SessionOptions, WaitUntil};

pub const DEFAULT_NEXT_PAGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub session: SessionOptions,
    pub field_timeout: Duration,
    pub next_page_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            field_timeout: DEFAULT_FIELD_TIMEOUT,
            next_page_timeout: DEFAULT_NEXT_PAGE_TIMEOUT,
        }
    }
}

/// Where a fatal run failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SessionLaunch,
    InitialNavigation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::SessionLaunch => "session-launch",
            Stage::InitialNavigation => "initial-navigation",
        })
    }
}

#[derive(Debug, Error)]
#[error("{stage} failed for {url}: {source}")]
pub struct RunError {
    pub stage: Stage,
    pub url: String,
    #[source]
    pub source: SessionError,
}

impl RunError {
    fn new(stage: Stage, url: &str, source: SessionError) -> Self {
        Self {
            stage,
            url: url.to_string(),
            source,
        }
    }
}

/// Why the walker stopped visiting pages. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Pagination disabled or without a next-page selector.
    SinglePage,
    DepthReached,
    /// The next-page control never appeared or could not be located.
    NextUnavailable,
    /// Clicking the next-page control did not complete a navigation.
    NavigationFailed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::SinglePage => "single_page",
            StopReason::DepthReached => "depth_reached",
            StopReason::NextUnavailable => "next_unavailable",
            StopReason::NavigationFailed => "navigation_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub records: RunResult,
    pub pages_visited: usize,
    /// Degraded failures absorbed during the run.
    pub warnings: usize,
    pub stop: StopReason,
}

pub struct Walker<L> {
    launcher: L,
    options: EngineOptions,
}

impl<L: SessionLauncher> Walker<L> {
    pub fn new(launcher: L) -> Self {
        Self::with_options(launcher, EngineOptions::default())
    }

    pub fn with_options(launcher: L, options: EngineOptions) -> Self {
        Self { launcher, options }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Runs `job` and returns its records in page-visit order.
    pub async fn run(&self, job: &ExtractionJob) -> Result<RunResult, RunError> {
        Ok(self.run_report(job).await?.records)
    }

    /// Like [`Walker::run`], with visit counts and the stop reason.
    pub async fn run_report(&self, job: &ExtractionJob) -> Result<RunReport, RunError> {
        let session = self
            .launcher
            .launch(&self.options.session)
            .await
            .map_err(|e| RunError::new(Stage::SessionLaunch, &job.target_url, e))?;

        let outcome = self.walk(&session, job).await;

        if let Err(e) = session.close().await {
            warn!("Failed to close session for {}: {}", job.target_url, e);
        }
        outcome
    }

    async fn walk(&self, session: &L::Session, job: &ExtractionJob) -> Result<RunReport, RunError> {
        info!("Loading {}", job.target_url);
        session
            .navigate(&job.target_url, WaitUntil::NetworkIdle)
            .await
            .map_err(|e| RunError::new(Stage::InitialNavigation, &job.target_url, e))?;

        let max_pages = job.pagination.effective_max_pages();
        let mut records: Vec<Record> = Vec::new();
        let mut warnings = 0usize;
        let mut page_index = 1usize;

        let stop = loop {
            let page = extract::extract(session, &job.fields, self.options.field_timeout).await;
            warnings += page.warnings.len();
            match page.record {
                Some(record) => records.push(record),
                None => info!("Page {} yielded no data", page_index),
            }

            let Some(next) = job.pagination.active_next_selector() else {
                break StopReason::SinglePage;
            };
            if page_index >= max_pages {
                debug!("Reached page limit of {}", max_pages);
                break StopReason::DepthReached;
            }

            if let Err(reason) = self.advance(session, next).await {
                warnings += 1;
                break reason;
            }
            page_index += 1;
            info!("Advanced to page {}", page_index);
        };

        info!(
            "Visited {} page(s), {} record(s), stopped: {:?}",
            page_index,
            records.len(),
            stop
        );
        Ok(RunReport {
            records,
            pages_visited: page_index,
            warnings,
            stop,
        })
    }

    /// Clicks the next-page control and waits for the resulting page.
    async fn advance(&self, session: &L::Session, selector: &str) -> Result<(), StopReason> {
        let wait = self.options.next_page_timeout;
        if let Err(e) = session.wait_for_selector(selector, wait).await {
            warn!("Next-page control `{}` unavailable: {}", selector, e);
            return Err(StopReason::NextUnavailable);
        }

        // Both futures are polled together so the navigation wait is
        // registered before the click can complete it.
        let navigation_timeout = self.options.session.navigation_timeout;
        let transition = futures::future::try_join(
            session.click(selector),
            session.await_navigation(WaitUntil::NetworkIdle),
        );
        match tokio::time::timeout(navigation_timeout, transition).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(SessionError::NotFound(_))) => {
                warn!("Next-page control `{}` could not be located", selector);
                Err(StopReason::NextUnavailable)
            }
            Ok(Err(e)) => {
                warn!("Navigation via `{}` failed: {}", selector, e);
                Err(StopReason::NavigationFailed)
            }
            Err(_) => {
                warn!(
                    "Navigation via `{}` timed out after {:?}",
                    selector, navigation_timeout
                );
                Err(StopReason::NavigationFailed)
            }
        }
    }
}
