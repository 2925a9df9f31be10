use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{PageSession, SessionError, SessionLauncher, SessionOptions, WaitUntil};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Quiet period after the load event before the page counts as idle.
const IDLE_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    pub headless: bool,
    pub executable: Option<PathBuf>,
}

impl Default for BrowserLauncher {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
        }
    }
}

#[async_trait]
impl SessionLauncher for BrowserLauncher {
    type Session = BrowserSession;

    async fn launch(&self, options: &SessionOptions) -> Result<BrowserSession, SessionError> {
        let mut builder = BrowserConfig::builder().request_timeout(options.operation_timeout);
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(SessionError::Launch)?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match open_page(&browser, &options.user_agent).await {
            Ok(page) => page,
            Err(e) => {
                shutdown(&mut browser).await;
                handler_task.abort();
                return Err(e);
            }
        };

        debug!("Browser session launched");
        Ok(BrowserSession {
            page,
            browser: Mutex::new(Some(browser)),
            handler: Mutex::new(Some(handler_task)),
            navigation_timeout: options.navigation_timeout,
            closed: AtomicBool::new(false),
        })
    }
}

async fn open_page(browser: &Browser, user_agent: &str) -> Result<Page, SessionError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| SessionError::Launch(e.to_string()))?;
    page.set_user_agent(SetUserAgentOverrideParams::new(user_agent))
        .await
        .map_err(|e| SessionError::Launch(e.to_string()))?;
    Ok(page)
}

async fn shutdown(browser: &mut Browser) {
    if let Err(e) = browser.close().await {
        warn!("Failed to close browser: {}", e);
    }
    if let Err(e) = browser.wait().await {
        warn!("Browser process did not exit cleanly: {}", e);
    }
}

pub struct BrowserSession {
    page: Page,
    browser: Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    navigation_timeout: Duration,
    closed: AtomicBool,
}

impl BrowserSession {
    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    async fn settle(&self, wait: WaitUntil) {
        if wait == WaitUntil::NetworkIdle {
            tokio::time::sleep(IDLE_SETTLE).await;
        }
    }
}

#[async_trait]
impl PageSession for BrowserSession {
    async fn navigate(&self, url: &str, wait: WaitUntil) -> Result<(), SessionError> {
        self.ensure_open()?;
        tokio::time::timeout(self.navigation_timeout, self.page.goto(url))
            .await
            .map_err(|_| SessionError::Timeout(self.navigation_timeout))?
            .map_err(|e| SessionError::Navigation(format!("{}: {}", url, e)))?;
        self.settle(wait).await;
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        let poll = async {
            loop {
                if self.page.find_element(selector).await.is_ok() {
                    return;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| SessionError::Timeout(timeout))
    }

    async fn query_text(&self, selector: &str) -> Result<Option<String>, SessionError> {
        self.ensure_open()?;
        let element = match self.page.find_element(selector).await {
            Ok(element) => element,
            Err(e) => {
                debug!("find_element({}) failed: {}", selector, e);
                return Ok(None);
            }
        };
        element
            .inner_text()
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))
    }

    async fn click(&self, selector: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| SessionError::NotFound(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn await_navigation(&self, wait: WaitUntil) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| SessionError::Navigation(e.to_string()))?;
        self.settle(wait).await;
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.page.clone().close().await {
            warn!("Failed to close page: {}", e);
        }
        if let Some(mut browser) = self.browser.lock().await.take() {
            shutdown(&mut browser).await;
        }
        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }
        debug!("Browser session closed");
        Ok(())
    }
}
