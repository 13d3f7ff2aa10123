//! Prompt assembly for the planner oracle.
//!
//! Two modes: initial planning and recovery. Both carry the original goal
//! verbatim; recovery additionally carries the failure, the progress so
//! far, and a keyword-derived list of work that still looks outstanding.

use crate::actions::ActionStatus;

use super::ErrorContext;

const SYSTEM_PROMPT: &str = r##"You are an expert browser automation planner. You turn a user goal plus a structured page analysis into an ordered JSON array of actions.

## PRINCIPLES
1. UI-DRIVEN: the page analysis lists the ACTUAL inputs, buttons, and selectors on the page. Prefer them over invented selectors.
2. GOAL-ORIENTED: always produce a plan that completes the user's original goal, especially when recovering from an error.
3. COMPLETE PLANS: emit ALL remaining steps needed to finish the task, never just a fix for the immediate problem.
4. ROBUST: insert a wait on a result container before any extract or find_best step.

## AVAILABLE ACTIONS
- {"action": "navigate", "url": "https://example.com"}
- {"action": "type", "selector": "CSS", "text": "value", "press_enter": true}
- {"action": "click", "selector": "CSS"}
- {"action": "scroll", "direction": "down", "amount": 3}
- {"action": "wait", "selector": "CSS", "timeout": 15}
- {"action": "extract", "strategy": "auto", "top_n": 5}
- {"action": "find_best", "criteria": "cheapest"}
- {"action": "add_to_cart"}
- {"action": "auto_login"}
- {"action": "human_pause", "message": "Complete CAPTCHA/payment"}
- {"action": "screenshot"}

Use ONLY these actions. Anything else is rejected. "timeout" is in seconds.

## SELECTOR RECOMMENDATIONS
The page analysis ends with recommended selectors for the search input, the submit button, and result containers. They were measured from the live page; use them first.

## RECOVERY
When the prompt includes a failed action, you must:
1. Fix the immediate problem using selectors from the fresh page analysis.
2. Continue with every remaining step until the original goal is complete.

## OUTPUT FORMAT
Return ONLY a JSON array of action objects. No prose, no markdown fences.

## EXAMPLE (initial search)
Goal: "Search for Python tutorials on DuckDuckGo" with input [name="q"]:
[
  {"action": "navigate", "url": "https://duckduckgo.com"},
  {"action": "wait", "selector": "input[name='q']", "timeout": 10},
  {"action": "type", "selector": "input[name='q']", "text": "Python tutorials", "press_enter": true},
  {"action": "wait", "selector": "article", "timeout": 15},
  {"action": "extract", "strategy": "auto", "top_n": 5}
]

## EXAMPLE (recovery completing a purchase)
Goal: "Buy cheapest wireless mouse", failed click on a stale button, fresh page shows #add-to-cart-button:
[
  {"action": "wait", "selector": "#add-to-cart-button", "timeout": 10},
  {"action": "add_to_cart"},
  {"action": "wait", "selector": "[href*='cart']", "timeout": 10},
  {"action": "click", "selector": "[href*='cart']"},
  {"action": "human_pause", "message": "Please complete login and payment"}
]"##;

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

pub fn planning_prompt(goal: &str, ui_summary: &str) -> String {
    format!(
        "## PLANNING MODE\n\
         \n\
         USER GOAL: {goal}\n\
         \n\
         CURRENT PAGE ANALYSIS:\n{ui_summary}\n\
         \n\
         Generate a complete action plan to accomplish: \"{goal}\"\n\
         Start with a navigate step if the current page is not useful, use \
         exact selectors from the page analysis, and include wait steps \
         before interacting with dynamic content.\n\
         \n\
         Return the complete plan as a JSON array:"
    )
}

pub fn recovery_prompt(goal: &str, ui_summary: &str, ctx: &ErrorContext) -> String {
    let failed_action = ctx
        .failed_action
        .as_ref()
        .and_then(|action| serde_json::to_string_pretty(action).ok())
        .unwrap_or_else(|| "(unknown)".to_string());

    format!(
        "## RECOVERY MODE - COMPLETE THE ORIGINAL GOAL\n\
         \n\
         ORIGINAL USER GOAL: {goal}\n\
         \n\
         You MUST generate a plan that completes the entire original goal, \
         not just a fix for the error.\n\
         \n\
         WHAT FAILED:\n\
         - Failed action: {failed_action}\n\
         - Error: {error}\n\
         - Current URL: {url}\n\
         \n\
         PROGRESS SO FAR ({step_count} steps attempted):\n{progress}\n\
         \n\
         CURRENT PAGE ANALYSIS (use these selectors!):\n{ui_summary}\n\
         \n\
         WHAT STILL NEEDS TO BE DONE:\n{outstanding}\n\
         \n\
         Analyze the current page, fix the immediate problem with correct \
         selectors, then continue with ALL remaining steps to complete: \
         \"{goal}\"\n\
         \n\
         Return the complete recovery plan as a JSON array:",
        error = ctx.error_message,
        url = ctx.current_url,
        step_count = ctx.executed_steps.len(),
        progress = summarize_progress(ctx),
        outstanding = outstanding_tasks(goal, ctx),
    )
}

/// Last five attempted steps, one line each.
fn summarize_progress(ctx: &ErrorContext) -> String {
    if ctx.executed_steps.is_empty() {
        return "Nothing completed yet".to_string();
    }
    let total = ctx.executed_steps.len();
    ctx.executed_steps
        .iter()
        .enumerate()
        .skip(total.saturating_sub(5))
        .map(|(idx, step)| {
            let mark = match step.result.status {
                ActionStatus::Success => "ok",
                ActionStatus::Failed => "FAILED",
            };
            format!("- step {}: {} ({mark})", idx + 1, step.action.kind())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keyword heuristic over the goal: which canonical sub-tasks have not
/// produced a successful step yet.
fn outstanding_tasks(goal: &str, ctx: &ErrorContext) -> String {
    let goal_lower = goal.to_lowercase();
    let done: Vec<&str> = ctx
        .executed_steps
        .iter()
        .filter(|step| step.result.is_success())
        .map(|step| step.action.kind())
        .collect();
    let did = |kind: &str| done.contains(&kind);

    let mut remaining = Vec::new();
    if goal_lower.contains("search") || goal_lower.contains("find") {
        if !did("navigate") {
            remaining.push("- Navigate to the search site");
        }
        if !did("type") {
            remaining.push("- Enter the search query");
        }
        if !did("extract") && !did("find_best") {
            remaining.push("- Extract and review the results");
        }
    }
    if goal_lower.contains("buy")
        || goal_lower.contains("purchase")
        || goal_lower.contains("add to cart")
    {
        if !did("find_best") {
            remaining.push("- Find and open the product to buy");
        }
        if !did("add_to_cart") {
            remaining.push("- Add the product to the cart");
        }
        if !did("human_pause") {
            remaining.push("- Pause for checkout completion");
        }
    }
    if (goal_lower.contains("cheapest") || goal_lower.contains("best"))
        && !did("extract")
        && !did("find_best")
    {
        remaining.push("- Compare items and select the best one");
    }

    if remaining.is_empty() {
        "Goal appears complete - verify and finalize if needed".to_string()
    } else {
        remaining.join("\n")
    }
}
