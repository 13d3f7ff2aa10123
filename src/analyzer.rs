//! Page-context analyzer.
//!
//! One in-page script collects a bounded snapshot of the DOM; everything
//! after that (selector derivation, recommendations, hashing, rendering the
//! prompt-ready summary) is pure Rust over the snapshot, so the whole
//! pipeline is testable without a browser. The rendered `ui_text` block is
//! the planner's ground truth; its stability matters more than verbosity.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::browser::PageDriver;
use crate::cache::UiCache;

/// Bounded single-pass DOM collection. Element counts are capped in-script
/// so an unbounded DOM can never reach the planner.
const SNAPSHOT_SCRIPT: &str = r#"(() => {
  const describe = (el) => ({
    tag: el.tagName.toLowerCase(),
    id: el.id || '',
    classes: typeof el.className === 'string' ? el.className : '',
    text: (el.innerText || '').trim().substring(0, 50),
    type: el.type || '',
    name: el.name || '',
    placeholder: el.placeholder || ''
  });
  return {
    title: document.title,
    url: window.location.href,
    bodyText: document.body ? document.body.innerText : '',
    inputs: Array.from(document.querySelectorAll('input'))
      .slice(0, 20).map(describe),
    buttons: Array.from(document.querySelectorAll(
        "button, input[type='submit'], input[type='button']"))
      .slice(0, 20).map(describe),
    links: Array.from(document.querySelectorAll('a[href]'))
      .slice(0, 20).map((el) => ({
        text: (el.innerText || '').trim().substring(0, 50),
        href: el.href,
        id: el.id || ''
      })),
    forms: Array.from(document.querySelectorAll('form'))
      .slice(0, 10).map((form, i) => ({
        id: form.id || ('form-' + i),
        action: form.getAttribute('action') || '',
        fields: Array.from(form.querySelectorAll('input, select, textarea'))
          .slice(0, 10).map(describe)
      })),
    containers: Array.from(document.querySelectorAll(
        "[data-component-type], [class*='result'], [class*='product'], [class*='item']"))
      .slice(0, 10).map((el) => ({
        className: typeof el.className === 'string' ? el.className : '',
        dataAttrs: Array.from(el.attributes)
          .filter((a) => a.name.startsWith('data-'))
          .map((a) => a.name),
        text: (el.innerText || '').trim().substring(0, 100)
      })),
    headings: Array.from(document.querySelectorAll('h1, h2, h3'))
      .slice(0, 10).map((h) => (h.innerText || '').trim()).filter(Boolean),
    hasResults: !!document.querySelector(
      "[class*='result'], [class*='product'], article, [data-component-type]"),
    hasCart: !!document.querySelector(
      "[href*='cart'], [id*='cart'], [class*='cart']"),
    hasLogin: !!document.querySelector(
      "input[type='password'], [href*='login'], [href*='signin']"),
    hasCheckout: !!document.querySelector(
      "[href*='checkout'], [class*='checkout']")
  };
})()"#;

const BODY_EXCERPT_CHARS: usize = 1000;

/// Raw element record as produced by the in-page script.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawElement {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub classes: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, rename = "type")]
    pub input_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub placeholder: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLink {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub href: String,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawForm {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub fields: Vec<RawElement>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawContainer {
    #[serde(default, rename = "className")]
    pub class_name: String,
    #[serde(default, rename = "dataAttrs")]
    pub data_attrs: Vec<String>,
    #[serde(default)]
    pub text: String,
}

/// Everything the snapshot script reports in one traversal.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSnapshot {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub body_text: String,
    #[serde(default)]
    pub inputs: Vec<RawElement>,
    #[serde(default)]
    pub buttons: Vec<RawElement>,
    #[serde(default)]
    pub links: Vec<RawLink>,
    #[serde(default)]
    pub forms: Vec<RawForm>,
    #[serde(default)]
    pub containers: Vec<RawContainer>,
    #[serde(default)]
    pub headings: Vec<String>,
    #[serde(default)]
    pub has_results: bool,
    #[serde(default)]
    pub has_cart: bool,
    #[serde(default)]
    pub has_login: bool,
    #[serde(default)]
    pub has_checkout: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub tag: String,
    pub id: String,
    pub classes: Vec<String>,
    pub name: String,
    pub input_type: String,
    pub placeholder: String,
    pub text: String,
    pub selector: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub text: String,
    pub href: String,
    pub selector: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormInfo {
    pub id: String,
    pub action: String,
    pub fields: Vec<ElementInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub class_name: String,
    pub data_attrs: Vec<String>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFlags {
    pub has_results: bool,
    pub has_cart: bool,
    pub has_login: bool,
    pub has_checkout: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendedSelectors {
    pub search: String,
    pub submit: String,
    pub results: String,
}

/// Structured description of the current page plus the rendered summary the
/// planner consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub url: String,
    pub title: String,
    pub inputs: Vec<ElementInfo>,
    pub buttons: Vec<ElementInfo>,
    pub links: Vec<LinkInfo>,
    pub forms: Vec<FormInfo>,
    pub containers: Vec<ContainerInfo>,
    pub headings: Vec<String>,
    pub state: StateFlags,
    pub recommended: RecommendedSelectors,
    pub body_text: String,
    pub content_hash: String,
    pub ui_text: String,
    #[serde(default)]
    pub cached: bool,
}

/// Derived selector, priority: id > name attribute > class chain > tag.
pub fn derive_selector(tag: &str, id: &str, name: &str, classes: &str) -> String {
    if !id.is_empty() {
        return format!("#{id}");
    }
    if !name.is_empty() {
        return format!("[name=\"{name}\"]");
    }
    let chain: Vec<&str> = classes.split_whitespace().collect();
    if !chain.is_empty() {
        return format!(".{}", chain.join("."));
    }
    tag.to_string()
}

/// SHA-256 of the visible body text, hex encoded.
pub fn content_hash(body_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body_text.as_bytes());
    hex::encode(hasher.finalize())
}

fn convert_element(raw: &RawElement) -> ElementInfo {
    ElementInfo {
        selector: derive_selector(&raw.tag, &raw.id, &raw.name, &raw.classes),
        tag: raw.tag.clone(),
        id: raw.id.clone(),
        classes: raw.classes.split_whitespace().map(str::to_string).collect(),
        name: raw.name.clone(),
        input_type: raw.input_type.clone(),
        placeholder: raw.placeholder.clone(),
        text: raw.text.clone(),
    }
}

fn convert_link(raw: &RawLink) -> LinkInfo {
    let selector = if !raw.id.is_empty() {
        format!("#{}", raw.id)
    } else {
        format!("a[href='{}']", raw.href)
    };
    LinkInfo {
        text: raw.text.clone(),
        href: raw.href.clone(),
        selector,
    }
}

fn recommend_search(inputs: &[ElementInfo]) -> String {
    for input in inputs {
        if input.name.to_lowercase().contains("search")
            || input.id.to_lowercase().contains("search")
        {
            return input.selector.clone();
        }
    }
    for input in inputs {
        if input.input_type == "search" {
            return input.selector.clone();
        }
    }
    "input[type='search'], input[name*='search'], input[name='q']".to_string()
}

fn recommend_submit(buttons: &[ElementInfo]) -> String {
    for button in buttons {
        let text = button.text.to_lowercase();
        if ["search", "go", "submit"].iter().any(|w| text.contains(w)) {
            return button.selector.clone();
        }
    }
    "button[type='submit'], input[type='submit']".to_string()
}

fn recommend_results(containers: &[ContainerInfo]) -> String {
    for container in containers {
        let lowered = container.class_name.to_lowercase();
        if ["result", "product", "item"].iter().any(|w| lowered.contains(w)) {
            if let Some(first) = container.class_name.split_whitespace().next() {
                return format!(".{first}");
            }
        }
    }
    "[class*='result'], [class*='product'], article".to_string()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn bulleted<I: IntoIterator<Item = String>>(lines: I) -> String {
    let joined: Vec<String> = lines.into_iter().map(|line| format!("  - {line}")).collect();
    if joined.is_empty() {
        "  (none)".to_string()
    } else {
        joined.join("\n")
    }
}

/// Build the full analysis from a raw snapshot. Pure; the same snapshot
/// always yields the same hash and the same `ui_text`.
pub fn build_analysis(raw: &RawSnapshot) -> PageAnalysis {
    let inputs: Vec<ElementInfo> = raw.inputs.iter().take(20).map(convert_element).collect();
    let buttons: Vec<ElementInfo> = raw.buttons.iter().take(20).map(convert_element).collect();
    let links: Vec<LinkInfo> = raw.links.iter().take(20).map(convert_link).collect();
    let forms: Vec<FormInfo> = raw
        .forms
        .iter()
        .take(10)
        .map(|form| FormInfo {
            id: form.id.clone(),
            action: form.action.clone(),
            fields: form.fields.iter().take(10).map(convert_element).collect(),
        })
        .collect();
    let containers: Vec<ContainerInfo> = raw
        .containers
        .iter()
        .take(10)
        .map(|c| ContainerInfo {
            class_name: c.class_name.clone(),
            data_attrs: c.data_attrs.clone(),
            text: c.text.clone(),
        })
        .collect();
    let headings: Vec<String> = raw.headings.iter().take(10).cloned().collect();

    let state = StateFlags {
        has_results: raw.has_results,
        has_cart: raw.has_cart,
        has_login: raw.has_login,
        has_checkout: raw.has_checkout,
    };
    let recommended = RecommendedSelectors {
        search: recommend_search(&inputs),
        submit: recommend_submit(&buttons),
        results: recommend_results(&containers),
    };

    let inputs_block = bulleted(inputs.iter().take(10).map(|inp| {
        format!(
            "{} (type={}, name={}, placeholder={}) -> {}",
            inp.tag, inp.input_type, inp.name, inp.placeholder, inp.selector
        )
    }));
    let buttons_block = bulleted(buttons.iter().take(10).map(|btn| {
        let label = if btn.text.is_empty() {
            btn.input_type.clone()
        } else {
            truncate_chars(&btn.text, 30)
        };
        format!("{label} -> {}", btn.selector)
    }));
    let links_block = bulleted(
        links
            .iter()
            .take(10)
            .map(|link| format!("{} -> {}", truncate_chars(&link.text, 40), link.selector)),
    );
    let containers_block = bulleted(containers.iter().take(5).map(|c| {
        format!(
            ".{} (data: {:?})",
            truncate_chars(&c.class_name, 50),
            c.data_attrs
        )
    }));
    let headings_block = bulleted(headings.iter().take(5).cloned());

    let ui_text = format!(
        "=== PAGE ANALYSIS ===\n\
         Title: {title}\n\
         URL: {url}\n\
         \n\
         === PAGE STATE ===\n\
         Has Results/Products: {has_results}\n\
         Has Cart: {has_cart}\n\
         Has Login Form: {has_login}\n\
         Has Checkout: {has_checkout}\n\
         \n\
         === HEADINGS ===\n{headings_block}\n\
         \n\
         === INPUT FIELDS ===\n{inputs_block}\n\
         \n\
         === BUTTONS ===\n{buttons_block}\n\
         \n\
         === LINKS ===\n{links_block}\n\
         \n\
         === RESULT CONTAINERS ===\n{containers_block}\n\
         \n\
         === VISIBLE TEXT (excerpt) ===\n{excerpt}\n\
         \n\
         === SELECTOR RECOMMENDATIONS ===\n\
         For search input: {search}\n\
         For submit button: {submit}\n\
         For results: {results}\n",
        title = raw.title,
        url = raw.url,
        has_results = state.has_results,
        has_cart = state.has_cart,
        has_login = state.has_login,
        has_checkout = state.has_checkout,
        excerpt = truncate_chars(&raw.body_text, BODY_EXCERPT_CHARS),
        search = recommended.search,
        submit = recommended.submit,
        results = recommended.results,
    );

    PageAnalysis {
        url: UiCache::normalize_url(&raw.url),
        title: raw.title.clone(),
        inputs,
        buttons,
        links,
        forms,
        containers,
        headings,
        state,
        recommended,
        body_text: truncate_chars(&raw.body_text, BODY_EXCERPT_CHARS),
        content_hash: content_hash(&raw.body_text),
        ui_text,
        cached: false,
    }
}

/// Drives snapshot collection against a live page, consulting the cache.
#[derive(Debug, Clone)]
pub struct PageAnalyzer {
    stabilization: Duration,
}

impl Default for PageAnalyzer {
    fn default() -> Self {
        Self {
            stabilization: Duration::from_secs(2),
        }
    }
}

impl PageAnalyzer {
    pub fn new(stabilization: Duration) -> Self {
        Self { stabilization }
    }

    /// Capture the current page context. `force_fresh` bypasses the cache
    /// lookup; the fresh result is still written back to the cache.
    pub async fn analyze(
        &self,
        driver: &dyn PageDriver,
        cache: &mut UiCache,
        force_fresh: bool,
    ) -> PageAnalysis {
        // Let dynamic content settle before snapshotting.
        tokio::time::sleep(self.stabilization).await;

        let value = match driver.evaluate(SNAPSHOT_SCRIPT).await {
            Ok(value) => value,
            Err(err) => {
                warn!("failed to capture page context: {err}");
                return self.error_analysis(driver, &err.to_string()).await;
            }
        };

        let raw: RawSnapshot = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("page snapshot did not match expected shape: {err}");
                return self.error_analysis(driver, &err.to_string()).await;
            }
        };

        let hash = content_hash(&raw.body_text);
        if !force_fresh {
            if let Some(cached) = cache.get(&raw.url, &hash) {
                debug!("serving cached analysis for {}", cached.url);
                return cached;
            }
        }

        let analysis = build_analysis(&raw);
        cache.set(&raw.url, &hash, analysis.clone());
        analysis
    }

    /// Minimal analysis for a page that could not be inspected. Never
    /// cached: the caller may still act, and the next analysis retries.
    async fn error_analysis(&self, driver: &dyn PageDriver, error: &str) -> PageAnalysis {
        let url = driver.current_url().await.unwrap_or_default();
        PageAnalysis {
            url: UiCache::normalize_url(&url),
            ui_text: format!("Error: page analysis failed: {error}"),
            ..PageAnalysis::default()
        }
    }
}
