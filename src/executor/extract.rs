//! Result extraction and price parsing.
//!
//! Extraction runs entirely in-page: one script per candidate selector
//! returns the raw match count plus up to `top_n` structured items. The
//! first selector matching at least two elements wins; anchors come back
//! already absolutized by the browser.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Fallback container selectors, tried in order after the selectors
/// discovered by the analyzer.
pub const FALLBACK_SELECTORS: &[&str] = &[
    "div[data-component-type='s-search-result']",
    "[data-asin]:not([data-asin=''])",
    "[class*='result']",
    "[class*='product']",
    "article",
    "li",
];

/// Minimum raw matches for a container selector to be trusted.
pub const MIN_CONTAINER_MATCHES: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Response shape of the in-page extraction script.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionBatch {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub items: Vec<ExtractedItem>,
}

/// In-page script extracting items under `selector`. Title comes from the
/// first of h2/h3/[class*='title']/a, price from .a-price-whole or
/// [class*='price'], link from the first anchor.
pub fn extraction_script(selector: &str, top_n: usize) -> String {
    let literal = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(() => {{
  const matched = Array.from(document.querySelectorAll({literal}));
  const items = matched.slice(0, {top_n}).map((item) => {{
    let title = null;
    for (const sel of ['h2', 'h3', '[class*="title"]', 'a']) {{
      const el = item.querySelector(sel);
      if (el && el.innerText && el.innerText.trim()) {{
        title = el.innerText.trim().substring(0, 200);
        break;
      }}
    }}
    let price = null;
    for (const sel of ['.a-price-whole', '[class*="price"]']) {{
      const el = item.querySelector(sel);
      if (el && el.innerText && el.innerText.trim()) {{
        price = el.innerText.trim();
        break;
      }}
    }}
    let link = null;
    const anchor = item.querySelector('a[href]');
    if (anchor) {{ link = anchor.href; }}
    return {{ title, price, link }};
  }}).filter((it) => it.title);
  return {{ count: matched.length, items }};
}})()"#
    )
}

static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\d,]+\.?\d*").expect("price pattern compiles")
});

/// Parse a displayed price into a comparable number. Unparsable prices sort
/// last as +infinity so "Free"/"Out of stock" never win a cheapest search.
pub fn parse_price(raw: &str) -> f64 {
    let cleaned = raw.replace(',', "");
    PRICE_RE
        .find(&cleaned)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(f64::INFINITY)
}

/// First item with the lowest parsed price; ties and equal prices keep the
/// earliest appearance.
pub fn cheapest<'a>(items: &'a [ExtractedItem]) -> Option<&'a ExtractedItem> {
    items
        .iter()
        .filter(|item| item.price.is_some())
        .fold(None::<(&ExtractedItem, f64)>, |best, item| {
            let price = parse_price(item.price.as_deref().unwrap_or_default());
            match best {
                Some((_, best_price)) if best_price <= price => best,
                _ => Some((item, price)),
            }
        })
        .map(|(item, _)| item)
}
