//! Planner oracle: turns (goal, UI summary, optional error context) into an
//! ordered plan of actions.
//!
//! The oracle is a fallible black box. Its output is accepted only as a
//! JSON array of known actions; malformed output gets two light repairs and
//! a bounded number of retries with prompt reinforcement, then the call
//! fails as a planning error.

pub mod ollama;
pub mod openai;
pub mod prompt;

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::actions::{Action, Plan};
use crate::errors::PlanError;
use crate::fsm::ExecutedStep;

/// Context assembled for a recovery planning call: what failed, what
/// already ran, where the browser is, and what the dead plan still wanted.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub error_message: String,
    pub failed_action: Option<Action>,
    pub executed_steps: Vec<ExecutedStep>,
    pub current_url: String,
    pub remaining_steps: Vec<Action>,
}

/// Stateless transformer from goal + UI summary to a validated plan.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        goal: &str,
        ui_summary: &str,
        error_context: Option<&ErrorContext>,
    ) -> Result<Plan, PlanError>;
}

/// Chat-style text oracle a planner implementation talks to.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, system: &str, user: &str) -> Result<String, PlanError>;
}

/// Retry/parse/validate loop shared by every chat backend.
pub struct LlmPlanner<B> {
    backend: B,
    max_retries: u32,
    site_hints: Option<String>,
}

impl<B: ChatBackend> LlmPlanner<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            max_retries: 3,
            site_hints: None,
        }
    }

    /// Free-text site hints appended to every planning prompt.
    pub fn with_site_hints(mut self, hints: Option<String>) -> Self {
        self.site_hints = hints;
        self
    }
}

#[async_trait]
impl<B: ChatBackend> Planner for LlmPlanner<B> {
    async fn plan(
        &self,
        goal: &str,
        ui_summary: &str,
        error_context: Option<&ErrorContext>,
    ) -> Result<Plan, PlanError> {
        let system = prompt::system_prompt();
        let mut user = match error_context {
            Some(ctx) => prompt::recovery_prompt(goal, ui_summary, ctx),
            None => prompt::planning_prompt(goal, ui_summary),
        };
        if let Some(hints) = &self.site_hints {
            user.push_str("\n\nSITE HINTS:\n");
            user.push_str(hints);
        }

        let mut last_error = None;
        for attempt in 1..=self.max_retries {
            match self.backend.chat(system, &user).await {
                Ok(text) => match parse_plan_response(&text) {
                    Ok(plan) => {
                        debug!("planner produced {} steps (attempt {attempt})", plan.len());
                        return Ok(plan);
                    }
                    Err(err) => {
                        warn!("planner output rejected (attempt {attempt}): {err}");
                        user.push_str(
                            "\n\nREMINDER: Return ONLY a valid JSON array, \
                             no explanations or markdown.",
                        );
                        last_error = Some(err);
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                },
                Err(err) => {
                    warn!("planner call failed (attempt {attempt}): {err}");
                    if attempt == self.max_retries {
                        return Err(err);
                    }
                    last_error = Some(err);
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                }
            }
        }

        Err(last_error.unwrap_or(PlanError::Exhausted {
            attempts: self.max_retries,
        }))
    }
}

static CODE_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?").expect("fence pattern compiles"));
static TRAILING_COMMA_OBJ_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*\}").expect("pattern compiles"));
static TRAILING_COMMA_ARR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*\]").expect("pattern compiles"));

/// Extract and validate the JSON plan array from raw model output.
pub fn parse_plan_response(text: &str) -> Result<Plan, PlanError> {
    let stripped = CODE_FENCE_RE.replace_all(text, "");
    let stripped = stripped.trim();

    let start = stripped
        .find('[')
        .ok_or_else(|| PlanError::Parse("no JSON array in response".into()))?;
    let end = stripped
        .rfind(']')
        .ok_or_else(|| PlanError::Parse("unterminated JSON array in response".into()))?;
    if end < start {
        return Err(PlanError::Parse("malformed JSON array bounds".into()));
    }
    let json_str = &stripped[start..=end];

    let value = match serde_json::from_str(json_str) {
        Ok(value) => value,
        Err(_) => {
            // Two light repairs for common model mistakes, then one re-parse.
            let repaired = json_str.replace('\'', "\"");
            let repaired = TRAILING_COMMA_OBJ_RE.replace_all(&repaired, "}");
            let repaired = TRAILING_COMMA_ARR_RE.replace_all(&repaired, "]");
            serde_json::from_str(&repaired)
                .map_err(|err| PlanError::Parse(err.to_string()))?
        }
    };

    Plan::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedBackend {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn chat(&self, _system: &str, _user: &str) -> Result<String, PlanError> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or(PlanError::Exhausted { attempts: 0 })
        }
    }

    #[test]
    fn parses_plain_array() {
        let plan = parse_plan_response(
            r#"[{"action": "navigate", "url": "https://example.com"}]"#,
        )
        .unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn strips_markdown_fences_and_prose() {
        let text = "Here is the plan:\n```json\n[\n  {\"action\": \"add_to_cart\"}\n]\n```\nDone.";
        let plan = parse_plan_response(text).unwrap();
        assert_eq!(plan.actions()[0].kind(), "add_to_cart");
    }

    #[test]
    fn repairs_single_quotes_and_trailing_commas() {
        let text = "[{'action': 'click', 'selector': '#go',},]";
        let plan = parse_plan_response(text).unwrap();
        assert_eq!(plan.actions()[0].kind(), "click");
    }

    #[test]
    fn rejects_output_without_an_array() {
        assert!(matches!(
            parse_plan_response("I could not produce a plan."),
            Err(PlanError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn retries_until_valid_json_appears() {
        let planner = LlmPlanner::new(ScriptedBackend::new(vec![
            "not json at all",
            r#"[{"action": "screenshot"}]"#,
        ]));
        let plan = planner.plan("goal", "ui", None).await.unwrap();
        assert_eq!(plan.actions()[0].kind(), "screenshot");
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let planner = LlmPlanner::new(ScriptedBackend::new(vec![
            "nope",
            "still nope",
            "never json",
        ]));
        assert!(planner.plan("goal", "ui", None).await.is_err());
    }
}
