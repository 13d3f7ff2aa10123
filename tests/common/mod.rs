//! Shared test doubles: a scripted page driver and a scripted planner.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use taskpilot::actions::{Action, Plan};
use taskpilot::browser::{PageDriver, SelectorState};
use taskpilot::errors::{DriverError, PlanError};
use taskpilot::llm::{ErrorContext, Planner};

/// One synthetic page: the snapshot the analyzer script would report, the
/// selectors considered present, and the extraction batch result pages
/// respond with.
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub title: String,
    pub body_text: String,
    pub selectors: HashSet<String>,
    pub extraction: Option<Value>,
    pub snapshot_extras: Value,
}

impl FakePage {
    pub fn new(title: &str, body_text: &str) -> Self {
        Self {
            title: title.to_string(),
            body_text: body_text.to_string(),
            ..Self::default()
        }
    }

    pub fn with_selectors(mut self, selectors: &[&str]) -> Self {
        self.selectors = selectors.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_extraction(mut self, extraction: Value) -> Self {
        self.extraction = Some(extraction);
        self
    }

    /// Extra top-level fields merged into the snapshot (inputs, buttons...).
    pub fn with_snapshot_extras(mut self, extras: Value) -> Self {
        self.snapshot_extras = extras;
        self
    }

    fn snapshot(&self, url: &str) -> Value {
        let mut snapshot = json!({
            "title": self.title,
            "url": url,
            "bodyText": self.body_text,
        });
        if let (Some(base), Some(extras)) =
            (snapshot.as_object_mut(), self.snapshot_extras.as_object())
        {
            for (key, value) in extras {
                base.insert(key.clone(), value.clone());
            }
        }
        snapshot
    }
}

/// Deterministic [`PageDriver`] over a set of [`FakePage`]s keyed by URL.
/// Selector waits resolve immediately; absent selectors time out at once.
pub struct FakeDriver {
    pages: HashMap<String, FakePage>,
    current: Mutex<String>,
    pub navigations: Mutex<Vec<String>>,
}

impl FakeDriver {
    pub fn new(start_url: &str, pages: Vec<(&str, FakePage)>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|(url, page)| (url.to_string(), page))
                .collect(),
            current: Mutex::new(start_url.to_string()),
            navigations: Mutex::new(Vec::new()),
        }
    }

    fn current_page(&self) -> FakePage {
        let url = self.current.lock().unwrap().clone();
        self.pages.get(&url).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl PageDriver for FakeDriver {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<(), DriverError> {
        self.navigations.lock().unwrap().push(url.to_string());
        *self.current.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _state: SelectorState,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        if self.current_page().selectors.contains(selector) {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                what: format!("selector '{selector}'"),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    async fn fill(&self, selector: &str, _text: &str) -> Result<(), DriverError> {
        if self.current_page().selectors.contains(selector) {
            Ok(())
        } else {
            Err(DriverError::Protocol(format!("no element for {selector}")))
        }
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        if self.current_page().selectors.contains(selector) {
            Ok(())
        } else {
            Err(DriverError::Protocol(format!("no element for {selector}")))
        }
    }

    async fn press(&self, selector: &str, _key: &str) -> Result<(), DriverError> {
        if self.current_page().selectors.contains(selector) {
            Ok(())
        } else {
            Err(DriverError::Protocol(format!("no element for {selector}")))
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        let page = self.current_page();
        if script.contains("bodyText") {
            let url = self.current.lock().unwrap().clone();
            return Ok(page.snapshot(&url));
        }
        if script.contains("const matched") {
            return Ok(page
                .extraction
                .unwrap_or_else(|| json!({ "count": 0, "items": [] })));
        }
        if script.contains("innerText.length") {
            return Ok(json!(page.body_text.len()));
        }
        if script.contains("readyState") {
            return Ok(json!(true));
        }
        if script.contains("Add to Cart") {
            return Ok(json!(false));
        }
        if script.contains("scrollBy") {
            return Ok(Value::Null);
        }
        Ok(Value::Null)
    }

    async fn screenshot(&self, _path: &Path, _full_page: bool) -> Result<(), DriverError> {
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn content(&self) -> Result<String, DriverError> {
        Ok(self.current_page().body_text)
    }
}

/// What the scripted planner saw on each call.
#[derive(Debug, Clone)]
pub struct PlannerCall {
    pub goal: String,
    pub ui_summary: String,
    pub error_message: Option<String>,
    pub failed_action: Option<Action>,
}

/// Planner that replays a queue of canned plans and records every request.
/// When the queue runs dry it keeps replaying the last plan.
pub struct ScriptedPlanner {
    plans: Mutex<VecDeque<Plan>>,
    last: Mutex<Option<Plan>>,
    pub calls: Mutex<Vec<PlannerCall>>,
}

impl ScriptedPlanner {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self {
            plans: Mutex::new(plans.into_iter().collect()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<PlannerCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(
        &self,
        goal: &str,
        ui_summary: &str,
        error_context: Option<&ErrorContext>,
    ) -> Result<Plan, PlanError> {
        self.calls.lock().unwrap().push(PlannerCall {
            goal: goal.to_string(),
            ui_summary: ui_summary.to_string(),
            error_message: error_context.map(|ctx| ctx.error_message.clone()),
            failed_action: error_context.and_then(|ctx| ctx.failed_action.clone()),
        });

        let next = self.plans.lock().unwrap().pop_front();
        match next {
            Some(plan) => {
                *self.last.lock().unwrap() = Some(plan.clone());
                Ok(plan)
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or(PlanError::Exhausted { attempts: 0 }),
        }
    }
}

/// Plan builder shorthand for tests.
pub fn plan_of(actions: Vec<Action>) -> Plan {
    Plan::from_actions(actions).expect("non-empty test plan")
}
