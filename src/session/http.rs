use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::{watch, RwLock};
use tracing::debug;
use url::Url;

use super::{html, PageSession, SessionError, SessionLauncher, SessionOptions, WaitUntil};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Hands out [`HttpSession`]s built from the run's [`SessionOptions`].
#[derive(Debug, Clone, Default)]
pub struct HttpLauncher;

#[async_trait]
impl SessionLauncher for HttpLauncher {
    type Session = HttpSession;

    async fn launch(&self, options: &SessionOptions) -> Result<HttpSession, SessionError> {
        let client = Client::builder()
            .user_agent(&options.user_agent)
            .timeout(options.navigation_timeout)
            .connect_timeout(options.operation_timeout)
            .build()
            .map_err(|e| SessionError::Launch(e.to_string()))?;
        Ok(HttpSession::new(client, options.operation_timeout))
    }
}

struct LoadedPage {
    url: Url,
    html: String,
}

/// Static-HTML page context. A navigation is a GET whose body has been
/// fully received; clicking follows the matched element's `href`.
pub struct HttpSession {
    client: Client,
    operation_timeout: Duration,
    page: RwLock<Option<LoadedPage>>,
    /// Bumped after every completed navigation.
    navigations: watch::Sender<u64>,
    /// Last navigation generation a caller has observed.
    seen: AtomicU64,
    closed: AtomicBool,
}

impl HttpSession {
    pub fn new(client: Client, operation_timeout: Duration) -> Self {
        let (navigations, _) = watch::channel(0);
        Self {
            client,
            operation_timeout,
            page: RwLock::new(None),
            navigations,
            seen: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    async fn load(&self, url: Url) -> Result<u64, SessionError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SessionError::Navigation(format!("{}: {}", url, e)))?;
        let final_url = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|e| SessionError::Navigation(format!("{}: {}", url, e)))?;

        self.ensure_open()?;
        *self.page.write().await = Some(LoadedPage {
            url: final_url,
            html,
        });

        let mut generation = 0;
        self.navigations.send_modify(|g| {
            *g += 1;
            generation = *g;
        });
        Ok(generation)
    }

    async fn with_page<T>(
        &self,
        f: impl FnOnce(&LoadedPage) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        self.ensure_open()?;
        let guard = self.page.read().await;
        match guard.as_ref() {
            Some(page) => f(page),
            None => Err(SessionError::Backend("no page loaded".to_string())),
        }
    }
}

#[async_trait]
impl PageSession for HttpSession {
    async fn navigate(&self, url: &str, _wait: WaitUntil) -> Result<(), SessionError> {
        self.ensure_open()?;
        let url = Url::parse(url).map_err(|e| SessionError::Navigation(format!("{}: {}", url, e)))?;
        let generation = self.load(url).await?;
        self.seen.store(generation, Ordering::Release);
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let poll = async {
            loop {
                if self.with_page(|p| html::matches(&p.html, selector)).await? {
                    return Ok(());
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        let limit = timeout.min(self.operation_timeout);
        tokio::time::timeout(limit, poll)
            .await
            .map_err(|_| SessionError::Timeout(limit))?
    }

    async fn query_text(&self, selector: &str) -> Result<Option<String>, SessionError> {
        self.with_page(|p| html::first_text(&p.html, selector)).await
    }

    async fn click(&self, selector: &str) -> Result<(), SessionError> {
        let target = self
            .with_page(|p| {
                let href = html::first_attr(&p.html, selector, "href")?
                    .ok_or_else(|| SessionError::NotFound(selector.to_string()))?
                    .ok_or_else(|| {
                        SessionError::Navigation(format!("`{}` has no href to follow", selector))
                    })?;
                let target = p
                    .url
                    .join(&href)
                    .map_err(|e| SessionError::Navigation(format!("{}: {}", href, e)))?;
                if same_document(&target, &p.url) {
                    return Err(SessionError::Navigation(format!(
                        "`{}` does not leave the current document",
                        href
                    )));
                }
                Ok(target)
            })
            .await?;
        self.load(target).await?;
        Ok(())
    }

    async fn await_navigation(&self, _wait: WaitUntil) -> Result<(), SessionError> {
        self.ensure_open()?;
        let seen = self.seen.load(Ordering::Acquire);
        let mut rx = self.navigations.subscribe();
        let generation = *rx
            .wait_for(|g| *g > seen)
            .await
            .map_err(|_| SessionError::Closed)?;
        self.seen.store(generation, Ordering::Release);
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.page.write().await.take();
        debug!("HTTP session closed");
        Ok(())
    }
}

fn same_document(a: &Url, b: &Url) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    a.set_fragment(None);
    b.set_fragment(None);
    a == b
}
