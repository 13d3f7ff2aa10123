//! Chrome DevTools Protocol driver backed by `chromiumoxide`.
//!
//! One launched browser owns one page; the handler event stream runs on a
//! background task for the lifetime of the browser. Selector waits poll the
//! DOM on a short interval because CDP has no built-in wait primitive.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{PageDriver, SelectorState};
use crate::errors::DriverError;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Launched Chromium instance plus its event-handler task.
pub struct CdpBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl CdpBrowser {
    pub async fn launch(
        headless: bool,
        request_timeout: Duration,
        viewport: (u32, u32),
    ) -> Result<Self, DriverError> {
        let mut builder = BrowserConfigBuilder::default()
            .request_timeout(request_timeout)
            .window_size(viewport.0, viewport.1)
            .arg(format!("--user-agent={USER_AGENT}"))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox");

        builder = if headless {
            builder.headless_mode(HeadlessMode::default())
        } else {
            builder.with_head()
        };

        let config = builder.build().map_err(DriverError::Launch)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| DriverError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    warn!("browser handler error: {err}");
                }
            }
            debug!("browser handler stream ended");
        });

        info!("browser started (headless={headless})");
        Ok(Self {
            browser,
            handler_task,
        })
    }

    pub async fn new_page(&self) -> Result<CdpDriver, DriverError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))?;
        Ok(CdpDriver { page })
    }

    pub async fn close(mut self) {
        if let Err(err) = self.browser.close().await {
            warn!("failed to close browser: {err}");
        }
        if let Err(err) = self.browser.wait().await {
            warn!("error waiting for browser shutdown: {err}");
        }
        self.handler_task.abort();
        info!("browser closed");
    }
}

/// [`PageDriver`] implementation over one CDP page.
pub struct CdpDriver {
    page: Page,
}

impl CdpDriver {
    /// Probe the selector's state without waiting.
    async fn probe_selector(
        &self,
        selector: &str,
        state: SelectorState,
    ) -> Result<bool, DriverError> {
        let literal = js_string(selector)?;
        let script = match state {
            SelectorState::Attached => {
                format!("document.querySelector({literal}) !== null")
            }
            SelectorState::Visible => format!(
                "(() => {{ const el = document.querySelector({literal}); \
                 return !!el && el.getClientRects().length > 0; }})()"
            ),
        };
        let result = self.evaluate(&script).await?;
        Ok(result.as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl PageDriver for CdpDriver {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), DriverError> {
        let navigation = async {
            self.page
                .goto(url)
                .await
                .map_err(|err| DriverError::Navigation {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|err| DriverError::Navigation {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;
            Ok(())
        };

        tokio::time::timeout(timeout, navigation)
            .await
            .map_err(|_| DriverError::Timeout {
                what: format!("navigation to {url}"),
                timeout_ms: timeout.as_millis() as u64,
            })?
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let started = Instant::now();
        loop {
            if self.probe_selector(selector, state).await? {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(DriverError::Timeout {
                    what: format!("selector '{selector}'"),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))?;
        element
            .scroll_into_view()
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))?;
        element
            .click()
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))?;
        // Clear any pre-filled value before typing.
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))?;
        element
            .type_str(text)
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))?;
        element
            .scroll_into_view()
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))?;
        element
            .click()
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))?;
        Ok(())
    }

    async fn press(&self, selector: &str, key: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))?;
        element
            .press_key(key)
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|err| DriverError::Evaluate(err.to_string()))?;
        result
            .into_value()
            .map_err(|err| DriverError::Evaluate(err.to_string()))
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> Result<(), DriverError> {
        let params = CaptureScreenshotParams {
            format: Some(CaptureScreenshotFormat::Png),
            capture_beyond_viewport: Some(full_page),
            ..Default::default()
        };
        let bytes = self
            .page
            .screenshot(params)
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let url = self
            .page
            .url()
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))?;
        Ok(url.unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn content(&self) -> Result<String, DriverError> {
        self.page
            .content()
            .await
            .map_err(|err| DriverError::Protocol(err.to_string()))
    }
}

/// Render a string as a JS string literal for embedding in page scripts.
fn js_string(raw: &str) -> Result<String, DriverError> {
    serde_json::to_string(raw).map_err(|err| DriverError::Evaluate(err.to_string()))
}
