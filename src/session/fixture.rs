use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{html, PageSession, SessionError, SessionLauncher, SessionOptions, WaitUntil};

#[derive(Default)]
pub struct FixtureState {
    pub pages: Vec<String>,
    pub fail_launch: bool,
    pub fail_navigation: bool,
    /// Clicking while on this page index fails.
    pub fail_click_on: Option<usize>,
    /// `query_text` errors for this selector even when it matches.
    pub broken_text: Option<String>,
    pub visits: AtomicUsize,
    pub closes: AtomicUsize,
    pub launched: Mutex<Option<SessionOptions>>,
}

impl FixtureState {
    pub fn with_pages<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pages: pages.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn visits(&self) -> usize {
        self.visits.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct FixtureLauncher {
    pub state: Arc<FixtureState>,
}

impl FixtureLauncher {
    pub fn new(state: FixtureState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }
}

#[async_trait]
impl SessionLauncher for FixtureLauncher {
    type Session = FixtureSession;

    async fn launch(&self, options: &SessionOptions) -> Result<FixtureSession, SessionError> {
        if self.state.fail_launch {
            return Err(SessionError::Launch("browser binary missing".to_string()));
        }
        if let Ok(mut launched) = self.state.launched.lock() {
            *launched = Some(options.clone());
        }
        Ok(FixtureSession::new(Arc::clone(&self.state)))
    }
}

pub struct FixtureSession {
    state: Arc<FixtureState>,
    current: Mutex<Option<usize>>,
    navigations: watch::Sender<u64>,
    seen: AtomicU64,
    closed: AtomicBool,
}

impl FixtureSession {
    pub fn new(state: Arc<FixtureState>) -> Self {
        let (navigations, _) = watch::channel(0);
        Self {
            state,
            current: Mutex::new(None),
            navigations,
            seen: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn current_index(&self) -> Result<usize, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let current = *self
            .current
            .lock()
            .map_err(|_| SessionError::Backend("poisoned".to_string()))?;
        current.ok_or_else(|| SessionError::Backend("no page loaded".to_string()))
    }

    fn current_html(&self) -> Result<&str, SessionError> {
        let index = self.current_index()?;
        Ok(self.state.pages[index].as_str())
    }

    fn load(&self, index: usize) -> Result<u64, SessionError> {
        *self
            .current
            .lock()
            .map_err(|_| SessionError::Backend("poisoned".to_string()))? = Some(index);
        self.state.visits.fetch_add(1, Ordering::SeqCst);
        let mut generation = 0;
        self.navigations.send_modify(|g| {
            *g += 1;
            generation = *g;
        });
        Ok(generation)
    }
}

#[async_trait]
impl PageSession for FixtureSession {
    async fn navigate(&self, url: &str, _wait: WaitUntil) -> Result<(), SessionError> {
        if self.state.fail_navigation || self.state.pages.is_empty() {
            return Err(SessionError::Navigation(format!("{}: connection refused", url)));
        }
        let generation = self.load(0)?;
        self.seen.store(generation, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        if html::matches(self.current_html()?, selector)? {
            Ok(())
        } else {
            Err(SessionError::Timeout(timeout))
        }
    }

    async fn query_text(&self, selector: &str) -> Result<Option<String>, SessionError> {
        if self.state.broken_text.as_deref() == Some(selector) {
            return Err(SessionError::Backend("node detached".to_string()));
        }
        html::first_text(self.current_html()?, selector)
    }

    async fn click(&self, selector: &str) -> Result<(), SessionError> {
        let index = self.current_index()?;
        if !html::matches(self.current_html()?, selector)? {
            return Err(SessionError::NotFound(selector.to_string()));
        }
        if self.state.fail_click_on == Some(index) || index + 1 >= self.state.pages.len() {
            return Err(SessionError::Navigation("target page did not load".to_string()));
        }
        // Let the paired navigation wait register first.
        tokio::task::yield_now().await;
        self.load(index + 1)?;
        Ok(())
    }

    async fn await_navigation(&self, _wait: WaitUntil) -> Result<(), SessionError> {
        let seen = self.seen.load(Ordering::SeqCst);
        let mut rx = self.navigations.subscribe();
        let generation = *rx
            .wait_for(|g| *g > seen)
            .await
            .map_err(|_| SessionError::Closed)?;
        self.seen.store(generation, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
