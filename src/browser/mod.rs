//! Page-control capability surface.
//!
//! The executor speaks to the browser exclusively through [`PageDriver`];
//! the CDP-backed implementation lives in [`cdp`], and tests substitute a
//! scripted driver.

pub mod cdp;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::DriverError;

/// How far a selector must progress before a wait is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    /// Present in the DOM.
    Attached,
    /// Present and rendered (non-empty client rects).
    Visible,
}

/// Contract between the executor and whatever controls the live page.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Load `url` and wait for the DOM to be ready.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// Replace the field's value with `text`.
    async fn fill(&self, selector: &str, text: &str) -> Result<(), DriverError>;

    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    /// Send a key (e.g. "Enter") to the element.
    async fn press(&self, selector: &str, key: &str) -> Result<(), DriverError>;

    /// Run a script in the page and return its JSON result.
    async fn evaluate(&self, script: &str) -> Result<Value, DriverError>;

    async fn screenshot(&self, path: &Path, full_page: bool) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// Full HTML content of the page.
    async fn content(&self) -> Result<String, DriverError>;
}
