//! The closed action vocabulary and plan container.
//!
//! Every plan the planner oracle emits is a JSON array of tagged records;
//! the `action` field selects the variant. Anything outside the vocabulary
//! is a validation error, never a dispatchable step.

use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PlanError;

/// Actions whose side effects the operator might regret. Plans containing
/// any of these require approval when approval is enabled.
pub static RISKY_ACTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "submit_form",
        "proceed_to_checkout",
        "auto_login",
        "delete",
        "confirm_purchase",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BestCriteria {
    Cheapest,
    HighestRated,
}

/// One atomic operation the executor can perform against the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Navigate {
        url: String,
    },
    Type {
        selector: String,
        text: String,
        #[serde(default)]
        press_enter: bool,
    },
    Click {
        selector: String,
    },
    Scroll {
        #[serde(default = "default_scroll_direction")]
        direction: ScrollDirection,
        #[serde(default = "default_scroll_amount")]
        amount: u32,
    },
    Wait {
        selector: String,
        /// Seconds, not milliseconds; matches the planner protocol.
        #[serde(default = "default_wait_timeout")]
        timeout: u64,
    },
    Extract {
        #[serde(default = "default_strategy")]
        strategy: String,
        #[serde(default = "default_top_n")]
        top_n: usize,
    },
    FindBest {
        #[serde(default = "default_criteria")]
        criteria: BestCriteria,
    },
    AddToCart,
    AutoLogin {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username_selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password_selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        submit_selector: Option<String>,
    },
    HumanPause {
        #[serde(default = "default_pause_message")]
        message: String,
    },
    Screenshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

fn default_scroll_direction() -> ScrollDirection {
    ScrollDirection::Down
}

fn default_scroll_amount() -> u32 {
    3
}

fn default_wait_timeout() -> u64 {
    15
}

fn default_strategy() -> String {
    "auto".to_string()
}

fn default_top_n() -> usize {
    5
}

fn default_criteria() -> BestCriteria {
    BestCriteria::Cheapest
}

fn default_pause_message() -> String {
    "Complete manual steps".to_string()
}

impl Action {
    /// The wire discriminator for this action.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "navigate",
            Action::Type { .. } => "type",
            Action::Click { .. } => "click",
            Action::Scroll { .. } => "scroll",
            Action::Wait { .. } => "wait",
            Action::Extract { .. } => "extract",
            Action::FindBest { .. } => "find_best",
            Action::AddToCart => "add_to_cart",
            Action::AutoLogin { .. } => "auto_login",
            Action::HumanPause { .. } => "human_pause",
            Action::Screenshot { .. } => "screenshot",
        }
    }

    pub fn is_risky(&self) -> bool {
        RISKY_ACTIONS.contains(self.kind())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Navigate { url } => write!(f, "navigate to {url}"),
            Action::Type {
                selector,
                text,
                press_enter,
            } => {
                let truncated: String = text.chars().take(30).collect();
                write!(f, "type '{truncated}' into {selector}")?;
                if *press_enter {
                    write!(f, " and press Enter")?;
                }
                Ok(())
            }
            Action::Click { selector } => write!(f, "click {selector}"),
            Action::Scroll { direction, amount } => {
                let dir = match direction {
                    ScrollDirection::Up => "up",
                    ScrollDirection::Down => "down",
                };
                write!(f, "scroll {dir} by {amount}")
            }
            Action::Wait { selector, timeout } => {
                write!(f, "wait for {selector} ({timeout}s)")
            }
            Action::Extract { strategy, top_n } => {
                write!(f, "extract top {top_n} ({strategy})")
            }
            Action::FindBest { criteria } => {
                let which = match criteria {
                    BestCriteria::Cheapest => "cheapest",
                    BestCriteria::HighestRated => "highest rated",
                };
                write!(f, "find the {which} item")
            }
            Action::AddToCart => write!(f, "add to cart"),
            Action::AutoLogin { .. } => write!(f, "auto-login with stored credentials"),
            Action::HumanPause { message } => write!(f, "pause for operator: {message}"),
            Action::Screenshot { path } => match path {
                Some(p) => write!(f, "screenshot to {p}"),
                None => write!(f, "screenshot"),
            },
        }
    }
}

/// A finite ordered sequence of actions. Immutable after validation;
/// replaced wholesale on recovery, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    actions: Vec<Action>,
}

impl Plan {
    /// Validate a raw JSON value into a plan. Checks shape, vocabulary
    /// membership, and per-type required fields before deserializing, so
    /// error messages name the offending step.
    pub fn from_value(value: Value) -> Result<Self, PlanError> {
        let steps = value
            .as_array()
            .ok_or_else(|| PlanError::Validation("plan must be a JSON array".into()))?;
        if steps.is_empty() {
            return Err(PlanError::Validation("plan cannot be empty".into()));
        }

        for (idx, step) in steps.iter().enumerate() {
            let obj = step.as_object().ok_or_else(|| {
                PlanError::Validation(format!("step {idx}: must be an object"))
            })?;
            let kind = obj
                .get("action")
                .and_then(Value::as_str)
                .ok_or_else(|| PlanError::Validation(format!("step {idx}: missing 'action'")))?;
            validate_required_fields(idx, kind, obj)?;
        }

        let actions: Vec<Action> = serde_json::from_value(value)
            .map_err(|err| PlanError::Validation(err.to_string()))?;
        Ok(Self { actions })
    }

    pub fn from_actions(actions: Vec<Action>) -> Result<Self, PlanError> {
        if actions.is_empty() {
            return Err(PlanError::Validation("plan cannot be empty".into()));
        }
        Ok(Self { actions })
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Action> {
        self.actions.get(index)
    }

    /// Steps at and after `index`, for building recovery context.
    pub fn remaining_from(&self, index: usize) -> &[Action] {
        let start = index.min(self.actions.len());
        &self.actions[start..]
    }

    pub fn requires_approval(&self) -> bool {
        self.actions.iter().any(Action::is_risky)
    }

    /// Numbered one-line-per-step rendering for banners and approval
    /// prompts.
    pub fn summarize(&self) -> Vec<String> {
        self.actions
            .iter()
            .enumerate()
            .map(|(idx, action)| format!("{}. {}", idx + 1, action))
            .collect()
    }
}

const VALID_ACTIONS: &[&str] = &[
    "navigate",
    "type",
    "click",
    "scroll",
    "wait",
    "extract",
    "find_best",
    "add_to_cart",
    "auto_login",
    "human_pause",
    "screenshot",
];

fn validate_required_fields(
    idx: usize,
    kind: &str,
    obj: &serde_json::Map<String, Value>,
) -> Result<(), PlanError> {
    if !VALID_ACTIONS.contains(&kind) {
        return Err(PlanError::Validation(format!(
            "step {idx}: unknown action '{kind}'"
        )));
    }

    let has_str = |field: &str| obj.get(field).and_then(Value::as_str).is_some();
    let missing = |field: &str| {
        PlanError::Validation(format!("step {idx}: {kind} requires '{field}'"))
    };

    match kind {
        "navigate" if !has_str("url") => Err(missing("url")),
        "type" if !has_str("selector") => Err(missing("selector")),
        "type" if !has_str("text") => Err(missing("text")),
        "click" if !has_str("selector") => Err(missing("selector")),
        "wait" if !has_str("selector") => Err(missing("selector")),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Failed,
}

/// Outcome of one executed action. Handlers report failure as data; they
/// never raise across the agent boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ActionResult {
    pub fn success() -> Self {
        Self {
            status: ActionStatus::Success,
            error: None,
            payload: None,
            note: None,
        }
    }

    pub fn success_with(payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::success()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Failed,
            error: Some(error.into()),
            payload: None,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tagged_actions_from_plan_json() {
        let plan = Plan::from_value(json!([
            {"action": "navigate", "url": "https://duckduckgo.com"},
            {"action": "wait", "selector": "input[name='q']", "timeout": 10},
            {"action": "type", "selector": "input[name='q']", "text": "rust", "press_enter": true},
            {"action": "extract", "top_n": 5}
        ]))
        .expect("valid plan");

        assert_eq!(plan.len(), 4);
        assert_eq!(plan.actions()[0].kind(), "navigate");
        match &plan.actions()[2] {
            Action::Type { press_enter, .. } => assert!(press_enter),
            other => panic!("expected type action, got {other:?}"),
        }
        match &plan.actions()[3] {
            Action::Extract { strategy, top_n } => {
                assert_eq!(strategy, "auto");
                assert_eq!(*top_n, 5);
            }
            other => panic!("expected extract action, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_discriminator() {
        let err = Plan::from_value(json!([{"action": "wait_for_text", "text": "hi"}]))
            .expect_err("unknown action must fail");
        assert!(err.to_string().contains("wait_for_text"));
    }

    #[test]
    fn rejects_empty_plan() {
        assert!(Plan::from_value(json!([])).is_err());
    }

    #[test]
    fn rejects_missing_required_fields() {
        let err = Plan::from_value(json!([{"action": "navigate"}])).unwrap_err();
        assert!(err.to_string().contains("url"));

        let err = Plan::from_value(json!([{"action": "click"}])).unwrap_err();
        assert!(err.to_string().contains("selector"));
    }

    #[test]
    fn auto_login_marks_plan_as_risky() {
        let plan = Plan::from_value(json!([
            {"action": "navigate", "url": "https://example.com/login"},
            {"action": "auto_login"}
        ]))
        .unwrap();
        assert!(plan.requires_approval());

        let safe = Plan::from_value(json!([{"action": "screenshot"}])).unwrap();
        assert!(!safe.requires_approval());
    }

    #[test]
    fn wait_defaults_to_fifteen_seconds() {
        let plan = Plan::from_value(json!([{"action": "wait", "selector": "#x"}])).unwrap();
        match &plan.actions()[0] {
            Action::Wait { timeout, .. } => assert_eq!(*timeout, 15),
            other => panic!("expected wait, got {other:?}"),
        }
    }

    #[test]
    fn plan_serializes_back_to_tagged_array() {
        let plan = Plan::from_actions(vec![
            Action::Navigate {
                url: "https://example.com".into(),
            },
            Action::AddToCart,
        ])
        .unwrap();
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value[0]["action"], "navigate");
        assert_eq!(value[1]["action"], "add_to_cart");
    }
}
