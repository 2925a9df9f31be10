#[cfg(feature = "browser")]
pub mod browser;
#[cfg(test)]
pub(crate) mod fixture;
pub(crate) mod html;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// When a navigation counts as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitUntil {
    /// The load event fired.
    Load,
    /// The page stopped issuing network requests.
    #[default]
    NetworkIdle,
}

/// How a launcher configures the session it hands out.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub user_agent: String,
    pub navigation_timeout: Duration,
    /// Upper bound for any single non-navigation operation.
    pub operation_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to launch session: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("no element matches `{0}`")]
    NotFound(String),
    #[error("invalid selector `{0}`")]
    Selector(String),
    #[error("session is closed")]
    Closed,
    #[error("{0}")]
    Backend(String),
}

/// One controllable page context.
///
/// Methods take `&self` so a click and the wait for the navigation it
/// triggers can be polled together.
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn navigate(&self, url: &str, wait: WaitUntil) -> Result<(), SessionError>;

    /// Resolves once at least one element matches `selector`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
        -> Result<(), SessionError>;

    /// Text content of the first element matching `selector`, `None` if
    /// nothing matches.
    async fn query_text(&self, selector: &str) -> Result<Option<String>, SessionError>;

    async fn click(&self, selector: &str) -> Result<(), SessionError>;

    /// Resolves when the next navigation after the last observed one
    /// completes.
    async fn await_navigation(&self, wait: WaitUntil) -> Result<(), SessionError>;

    /// Releases the underlying resources. Calling it again is a no-op.
    async fn close(&self) -> Result<(), SessionError>;
}

/// Acquires a configured [`PageSession`] for one run.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    type Session: PageSession;

    async fn launch(&self, options: &SessionOptions) -> Result<Self::Session, SessionError>;
}
