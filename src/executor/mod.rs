//! Action executor: translates the closed action vocabulary into page
//! primitives.
//!
//! Every handler returns an [`ActionResult`]; driver-level failures are
//! converted to `failed` results after invalidating the UI cache for the
//! current URL, so the recovery path always observes a fresh analysis.

pub mod extract;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::actions::{Action, ActionResult, BestCriteria, ScrollDirection};
use crate::analyzer::{PageAnalysis, PageAnalyzer};
use crate::browser::{PageDriver, SelectorState};
use crate::cache::{CacheStats, UiCache};
use crate::credentials::CredentialStore;
use crate::errors::DriverError;

use extract::{
    cheapest, extraction_script, ExtractedItem, ExtractionBatch, FALLBACK_SELECTORS,
    MIN_CONTAINER_MATCHES,
};

const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(15);
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(3);
const CART_TIMEOUT: Duration = Duration::from_secs(5);
const LOGIN_SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Fallback chain for `type` when the planned selector never appears.
const TYPE_FALLBACKS: &[&str] = &[
    "input[type='search']",
    "input[name='q']",
    "input[name*='search']",
    "#search",
    "input[type='text']",
];

/// Add-to-cart selectors, most specific first.
const CART_SELECTORS: &[&str] = &[
    "#add-to-cart-button",
    "button[name='submit.add-to-cart']",
    "[id*='add-to-cart']",
];

pub struct ActionExecutor {
    driver: Arc<dyn PageDriver>,
    analyzer: PageAnalyzer,
    cache: UiCache,
    credentials: CredentialStore,
    action_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(
        driver: Arc<dyn PageDriver>,
        analyzer: PageAnalyzer,
        cache: UiCache,
        credentials: CredentialStore,
        action_timeout: Duration,
    ) -> Self {
        Self {
            driver,
            analyzer,
            cache,
            credentials,
            action_timeout,
        }
    }

    /// Capture the current page context, consulting the UI cache unless
    /// `force_fresh` is set.
    pub async fn page_context(&mut self, force_fresh: bool) -> PageAnalysis {
        self.analyzer
            .analyze(self.driver.as_ref(), &mut self.cache, force_fresh)
            .await
    }

    pub async fn current_url(&self) -> String {
        self.driver.current_url().await.unwrap_or_default()
    }

    /// Drop the cache entry for the page currently loaded.
    pub async fn invalidate_current(&mut self) {
        let url = self.current_url().await;
        if !url.is_empty() {
            self.cache.invalidate(&url);
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn save_credentials(&mut self, domain: &str, username: &str, password: &str) {
        self.credentials.set(domain, username, password);
    }

    /// Flush persistent state; called at task teardown.
    pub fn shutdown(&self) {
        self.cache.save();
    }

    /// Execute one action. Never raises: a driver error invalidates the
    /// cache for the current URL and comes back as a failed result.
    pub async fn execute(&mut self, action: &Action) -> ActionResult {
        info!("executing: {}", action.kind());
        match self.dispatch(action).await {
            Ok(result) => result,
            Err(err) => {
                warn!("{} failed at the page layer: {err}", action.kind());
                self.invalidate_current().await;
                ActionResult::failed(format!("{} failed: {err}", action.kind()))
            }
        }
    }

    async fn dispatch(&mut self, action: &Action) -> Result<ActionResult, DriverError> {
        match action {
            Action::Navigate { url } => self.navigate(url).await,
            Action::Type {
                selector,
                text,
                press_enter,
            } => self.type_text(selector, text, *press_enter).await,
            Action::Click { selector } => self.click(selector).await,
            Action::Scroll { direction, amount } => self.scroll(*direction, *amount).await,
            Action::Wait { selector, timeout } => self.wait(selector, *timeout).await,
            Action::Extract { strategy, top_n } => self.extract(strategy, *top_n).await,
            Action::FindBest { criteria } => self.find_best(*criteria).await,
            Action::AddToCart => self.add_to_cart().await,
            Action::AutoLogin {
                username_selector,
                password_selector,
                submit_selector,
            } => {
                self.auto_login(
                    username_selector.as_deref(),
                    password_selector.as_deref(),
                    submit_selector.as_deref(),
                )
                .await
            }
            Action::HumanPause { message } => self.human_pause(message).await,
            Action::Screenshot { path } => self.screenshot(path.as_deref()).await,
        }
    }

    async fn navigate(&self, url: &str) -> Result<ActionResult, DriverError> {
        self.driver.goto(url, self.action_timeout).await?;
        // Give script-driven rendering a moment after DOM ready.
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok(ActionResult::success_with(json!({ "url": url })))
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        press_enter: bool,
    ) -> Result<ActionResult, DriverError> {
        if self
            .try_fill(selector, text, press_enter, VISIBILITY_TIMEOUT)
            .await
            .is_ok()
        {
            return Ok(ActionResult::success_with(json!({ "selector": selector })));
        }

        for fallback in TYPE_FALLBACKS {
            if self
                .try_fill(fallback, text, press_enter, FALLBACK_TIMEOUT)
                .await
                .is_ok()
            {
                info!("used fallback input selector: {fallback}");
                return Ok(ActionResult::success_with(json!({ "selector": fallback })));
            }
        }

        Ok(ActionResult::failed(format!(
            "could not find input: {selector}"
        )))
    }

    async fn try_fill(
        &self,
        selector: &str,
        text: &str,
        press_enter: bool,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        self.driver
            .wait_for_selector(selector, SelectorState::Visible, timeout)
            .await?;
        self.driver.fill(selector, text).await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        if press_enter {
            self.driver.press(selector, "Enter").await?;
            // Let the triggered search render its results.
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<ActionResult, DriverError> {
        self.driver
            .wait_for_selector(selector, SelectorState::Visible, VISIBILITY_TIMEOUT)
            .await?;
        self.driver.click(selector).await?;
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok(ActionResult::success_with(json!({ "selector": selector })))
    }

    async fn scroll(
        &self,
        direction: ScrollDirection,
        amount: u32,
    ) -> Result<ActionResult, DriverError> {
        let pixels = i64::from(amount) * 400;
        let delta = match direction {
            ScrollDirection::Down => pixels,
            ScrollDirection::Up => -pixels,
        };
        self.driver
            .evaluate(&format!("window.scrollBy(0, {delta})"))
            .await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(ActionResult::success())
    }

    async fn wait(&self, selector: &str, timeout_secs: u64) -> Result<ActionResult, DriverError> {
        let timeout = Duration::from_secs(timeout_secs);
        match self
            .driver
            .wait_for_selector(selector, SelectorState::Attached, timeout)
            .await
        {
            Ok(()) => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(ActionResult::success_with(json!({ "selector": selector })))
            }
            Err(err) => {
                // Pages often render content under unpredictable selectors;
                // a populated body still counts as progress.
                let body_len = self
                    .driver
                    .evaluate("document.body ? document.body.innerText.length : 0")
                    .await?
                    .as_u64()
                    .unwrap_or(0);
                if body_len > 100 {
                    warn!("selector {selector} not found but page has content, continuing");
                    return Ok(ActionResult::success_with(json!({ "selector": selector }))
                        .with_note("selector not found but page has content"));
                }
                Err(err)
            }
        }
    }

    async fn extract(
        &mut self,
        _strategy: &str,
        top_n: usize,
    ) -> Result<ActionResult, DriverError> {
        tokio::time::sleep(Duration::from_secs(3)).await;
        let items = self.extract_items(top_n).await?;
        if items.is_empty() {
            return Ok(ActionResult::failed("no results extracted"));
        }
        for (idx, item) in items.iter().enumerate() {
            info!(
                "extracted {}: {} {}",
                idx + 1,
                item.title,
                item.price.as_deref().unwrap_or("")
            );
        }
        let count = items.len();
        Ok(ActionResult::success_with(json!({
            "results": items,
            "count": count,
        })))
    }

    /// Try analyzer-discovered container selectors first, then the fixed
    /// fallback ladder. The first selector with at least two raw matches
    /// wins.
    async fn extract_items(&mut self, top_n: usize) -> Result<Vec<ExtractedItem>, DriverError> {
        let context = self.page_context(false).await;

        let mut candidates: Vec<String> = context
            .containers
            .iter()
            .take(3)
            .filter_map(|c| {
                c.class_name
                    .split_whitespace()
                    .next()
                    .map(|token| format!(".{token}"))
            })
            .collect();
        candidates.extend(FALLBACK_SELECTORS.iter().map(|s| s.to_string()));

        for selector in &candidates {
            let value = match self
                .driver
                .evaluate(&extraction_script(selector, top_n))
                .await
            {
                Ok(value) => value,
                Err(err) => {
                    warn!("extraction selector {selector} failed: {err}");
                    continue;
                }
            };
            let batch: ExtractionBatch = serde_json::from_value(value).unwrap_or_default();
            if batch.count >= MIN_CONTAINER_MATCHES && !batch.items.is_empty() {
                info!(
                    "using container selector {selector} ({} matches)",
                    batch.count
                );
                return Ok(batch.items);
            }
        }

        Ok(Vec::new())
    }

    async fn find_best(&mut self, criteria: BestCriteria) -> Result<ActionResult, DriverError> {
        let items = self.extract_items(20).await?;
        if items.is_empty() {
            return Ok(ActionResult::failed("no items found"));
        }

        let best = match criteria {
            BestCriteria::Cheapest => cheapest(&items),
            // Rating metadata is not extracted; first result is the
            // engine's own relevance ranking.
            BestCriteria::HighestRated => items.first(),
        };

        let Some(best) = best else {
            return Ok(ActionResult::failed("could not find suitable item"));
        };
        let Some(link) = best.link.clone() else {
            return Ok(ActionResult::failed("selected item has no link"));
        };

        info!(
            "selected: {} (price: {})",
            best.title,
            best.price.as_deref().unwrap_or("N/A")
        );
        let payload = json!({ "item": best });
        self.driver.goto(&link, self.action_timeout).await?;
        tokio::time::sleep(Duration::from_secs(4)).await;
        Ok(ActionResult::success_with(payload))
    }

    async fn add_to_cart(&self) -> Result<ActionResult, DriverError> {
        for selector in CART_SELECTORS {
            if self
                .driver
                .wait_for_selector(selector, SelectorState::Attached, CART_TIMEOUT)
                .await
                .is_ok()
                && self.driver.click(selector).await.is_ok()
            {
                tokio::time::sleep(Duration::from_secs(4)).await;
                info!("added to cart via {selector}");
                return Ok(ActionResult::success_with(json!({ "selector": selector })));
            }
        }

        // Last resort: click the first button whose visible text mentions
        // adding to cart.
        let clicked = self
            .driver
            .evaluate(
                "(() => { \
                   const buttons = Array.from(document.querySelectorAll('button')); \
                   const target = buttons.find((el) => \
                     (el.innerText || '').includes('Add to Cart')); \
                   if (target) { target.click(); return true; } \
                   return false; \
                 })()",
            )
            .await?
            .as_bool()
            .unwrap_or(false);
        if clicked {
            tokio::time::sleep(Duration::from_secs(4)).await;
            return Ok(ActionResult::success());
        }

        Ok(ActionResult::failed("add to cart button not found"))
    }

    async fn auto_login(
        &mut self,
        username_selector: Option<&str>,
        password_selector: Option<&str>,
        submit_selector: Option<&str>,
    ) -> Result<ActionResult, DriverError> {
        let url = self.current_url().await;
        let Some(domain) = CredentialStore::domain_of(&url) else {
            return Ok(ActionResult::failed(format!(
                "cannot determine domain from '{url}'"
            )));
        };
        let Some(record) = self.credentials.get(&domain).cloned() else {
            return Ok(ActionResult::failed(format!(
                "no credentials on file for {domain}"
            )));
        };

        let u_sel = username_selector.unwrap_or("input[type='email'], input[type='text']");
        let p_sel = password_selector.unwrap_or("input[type='password']");
        let s_sel = submit_selector.unwrap_or("button[type='submit']");

        let login = async {
            self.driver.fill(u_sel, &record.username).await?;
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.driver.fill(p_sel, &record.password).await?;
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.driver.click(s_sel).await?;
            self.wait_for_ready(LOGIN_SETTLE_TIMEOUT).await;
            Ok::<(), DriverError>(())
        };

        match login.await {
            Ok(()) => Ok(ActionResult::success_with(json!({ "domain": domain }))),
            Err(err) => Ok(ActionResult::failed(format!("auto-login failed: {err}"))),
        }
    }

    /// Poll document readiness as a stand-in for a network-idle wait.
    async fn wait_for_ready(&self, timeout: Duration) {
        let started = std::time::Instant::now();
        while started.elapsed() < timeout {
            let ready = self
                .driver
                .evaluate("document.readyState === 'complete'")
                .await
                .map(|v| v.as_bool().unwrap_or(false))
                .unwrap_or(false);
            if ready {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    async fn human_pause(&self, message: &str) -> Result<ActionResult, DriverError> {
        println!();
        println!("{}", "=".repeat(70));
        println!("HUMAN INPUT REQUIRED");
        println!("{}", "=".repeat(70));
        println!();
        println!("{message}");
        println!();
        println!("Press ENTER when done...");
        println!("{}", "=".repeat(70));

        let _ = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            let _ = std::io::stdin().lock().read_line(&mut line);
        })
        .await;

        println!("Resuming...");
        Ok(ActionResult::success())
    }

    async fn screenshot(&self, path: Option<&str>) -> Result<ActionResult, DriverError> {
        let path: PathBuf = match path {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from(format!(
                "screenshot_{}.png",
                Utc::now().format("%Y%m%dT%H%M%S")
            )),
        };
        self.driver.screenshot(Path::new(&path), true).await?;
        Ok(ActionResult::success_with(json!({
            "path": path.display().to_string()
        })))
    }
}
