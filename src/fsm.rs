//! Agent lifecycle state machine.
//!
//! The run loop only moves along the edges listed in `allowed_targets`;
//! anything else is a programming error and is rejected, not patched over.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::actions::{Action, ActionResult, Plan};
use crate::errors::{AgentError, AgentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Planning,
    AwaitingApproval,
    Executing,
    Error,
    SelfHealing,
    Completed,
    Cancelled,
}

impl AgentState {
    fn allowed_targets(self) -> &'static [AgentState] {
        use AgentState::*;
        match self {
            Idle => &[Planning],
            Planning => &[AwaitingApproval, Executing, Error],
            AwaitingApproval => &[Executing, Cancelled, Error],
            Executing => &[Completed, Error],
            Error => &[SelfHealing, Completed],
            SelfHealing => &[Executing, Error, Completed],
            Completed | Cancelled => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AgentState::Completed | AgentState::Cancelled)
    }

    pub fn can_transition_to(self, target: AgentState) -> bool {
        self.allowed_targets().contains(&target)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentState::Idle => "idle",
            AgentState::Planning => "planning",
            AgentState::AwaitingApproval => "awaiting_approval",
            AgentState::Executing => "executing",
            AgentState::Error => "error",
            AgentState::SelfHealing => "self_healing",
            AgentState::Completed => "completed",
            AgentState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One attempted action and its outcome, appended to the audit log in
/// execution order across the original plan and every recovery plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedStep {
    pub action: Action,
    pub result: ActionResult,
    pub timestamp: DateTime<Utc>,
}

/// Transient state of one task, created at task start and dropped at a
/// terminal state. The goal is immutable for the whole lifetime.
#[derive(Debug)]
pub struct ExecutionContext {
    goal: String,
    pub state: AgentState,
    pub plan: Option<Plan>,
    pub step_index: usize,
    pub executed_steps: Vec<ExecutedStep>,
    pub last_error: Option<String>,
    pub recovery_attempts: u32,
    pub max_recovery_attempts: u32,
    pub approval_required: bool,
    start_time: Instant,
}

impl ExecutionContext {
    pub fn new(goal: impl Into<String>, max_recovery_attempts: u32) -> Self {
        Self {
            goal: goal.into(),
            state: AgentState::Idle,
            plan: None,
            step_index: 0,
            executed_steps: Vec::new(),
            last_error: None,
            recovery_attempts: 0,
            max_recovery_attempts,
            approval_required: false,
            start_time: Instant::now(),
        }
    }

    /// The original user request. No mutator exists; recovery plans target
    /// the same goal for the whole task.
    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn transition(&mut self, to: AgentState) -> AgentResult<()> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(AgentError::InvalidTransition { from, to });
        }
        self.state = to;
        info!("[{:.1}s] {} -> {}", self.elapsed_secs(), from, to);
        Ok(())
    }

    pub fn record_step(&mut self, action: Action, result: ActionResult) {
        self.executed_steps.push(ExecutedStep {
            action,
            result,
            timestamp: Utc::now(),
        });
    }

    pub fn can_recover(&self) -> bool {
        self.recovery_attempts < self.max_recovery_attempts
    }

    /// Install a recovery plan: complete replacement, executed from the top.
    pub fn adopt_recovery_plan(&mut self, plan: Plan) {
        self.plan = Some(plan);
        self.step_index = 0;
        self.last_error = None;
        self.recovery_attempts += 1;
    }

    pub fn success_rate(&self) -> f64 {
        if self.executed_steps.is_empty() {
            return 0.0;
        }
        let successful = self
            .executed_steps
            .iter()
            .filter(|step| step.result.is_success())
            .count();
        successful as f64 / self.executed_steps.len() as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_happy_path_is_a_valid_walk() {
        let mut ctx = ExecutionContext::new("demo", 2);
        ctx.transition(AgentState::Planning).unwrap();
        ctx.transition(AgentState::AwaitingApproval).unwrap();
        ctx.transition(AgentState::Executing).unwrap();
        ctx.transition(AgentState::Completed).unwrap();
        assert!(ctx.state.is_terminal());
    }

    #[test]
    fn recovery_cycle_is_a_valid_walk() {
        let mut ctx = ExecutionContext::new("demo", 2);
        ctx.transition(AgentState::Planning).unwrap();
        ctx.transition(AgentState::Executing).unwrap();
        ctx.transition(AgentState::Error).unwrap();
        ctx.transition(AgentState::SelfHealing).unwrap();
        ctx.transition(AgentState::Executing).unwrap();
        ctx.transition(AgentState::Completed).unwrap();
    }

    #[test]
    fn rejects_edges_outside_the_table() {
        let mut ctx = ExecutionContext::new("demo", 2);
        let err = ctx.transition(AgentState::Executing).unwrap_err();
        assert!(matches!(err, AgentError::InvalidTransition { .. }));
        assert_eq!(ctx.state, AgentState::Idle);

        ctx.transition(AgentState::Planning).unwrap();
        ctx.transition(AgentState::Executing).unwrap();
        ctx.transition(AgentState::Completed).unwrap();
        assert!(ctx.transition(AgentState::Planning).is_err());
    }

    #[test]
    fn terminal_states_have_no_exits() {
        assert!(AgentState::Completed.allowed_targets().is_empty());
        assert!(AgentState::Cancelled.allowed_targets().is_empty());
    }

    #[test]
    fn recovery_counter_is_bounded() {
        let mut ctx = ExecutionContext::new("demo", 2);
        assert!(ctx.can_recover());
        ctx.adopt_recovery_plan(
            Plan::from_actions(vec![Action::AddToCart]).unwrap(),
        );
        assert_eq!(ctx.recovery_attempts, 1);
        assert!(ctx.can_recover());
        ctx.adopt_recovery_plan(
            Plan::from_actions(vec![Action::AddToCart]).unwrap(),
        );
        assert_eq!(ctx.recovery_attempts, 2);
        assert!(!ctx.can_recover());
    }

    #[test]
    fn adopting_a_recovery_plan_resets_progress() {
        let mut ctx = ExecutionContext::new("demo", 2);
        ctx.step_index = 3;
        ctx.last_error = Some("timeout".into());
        ctx.adopt_recovery_plan(
            Plan::from_actions(vec![Action::AddToCart]).unwrap(),
        );
        assert_eq!(ctx.step_index, 0);
        assert!(ctx.last_error.is_none());
    }

    #[test]
    fn success_rate_counts_only_successes() {
        let mut ctx = ExecutionContext::new("demo", 2);
        ctx.record_step(Action::AddToCart, ActionResult::success());
        ctx.record_step(Action::AddToCart, ActionResult::failed("nope"));
        assert!((ctx.success_rate() - 50.0).abs() < f64::EPSILON);
    }
}
