//! Adaptive task agent: plan, approve, execute, recover.
//!
//! The agent owns one execution context per task and drives it through the
//! lifecycle state machine. Recovery never rewrites the goal and never
//! patches a plan: it re-analyzes the page, hands the planner the failure
//! context, and adopts a complete replacement plan executed from the top.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::actions::Plan;
use crate::cache::CacheStats;
use crate::errors::{AgentError, AgentResult};
use crate::executor::ActionExecutor;
use crate::fsm::{AgentState, ExecutionContext};
use crate::llm::{ErrorContext, Planner};

pub type ApprovalCallback = Box<dyn Fn(&Plan) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Error,
    Cancelled,
}

/// Structured end-of-task summary.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub goal: String,
    pub status: TaskStatus,
    pub final_state: AgentState,
    pub steps_planned: usize,
    pub steps_executed: usize,
    pub success_rate: f64,
    pub elapsed_secs: f64,
    pub recovery_attempts: u32,
    pub error: Option<String>,
    pub cache: CacheStats,
}

pub struct TaskAgent {
    executor: ActionExecutor,
    planner: Arc<dyn Planner>,
    require_approval: bool,
    max_recovery_attempts: u32,
    approval: Option<ApprovalCallback>,
}

impl TaskAgent {
    pub fn new(
        executor: ActionExecutor,
        planner: Arc<dyn Planner>,
        require_approval: bool,
        max_recovery_attempts: u32,
    ) -> Self {
        Self {
            executor,
            planner,
            require_approval,
            max_recovery_attempts,
            approval: None,
        }
    }

    pub fn set_approval_callback(&mut self, callback: ApprovalCallback) {
        self.approval = Some(callback);
    }

    /// Store credentials so future auto-login actions can use them.
    pub fn save_credentials(&mut self, domain: &str, username: &str, password: &str) {
        self.executor.save_credentials(domain, username, password);
    }

    /// Run one task to a terminal state and report the outcome.
    pub async fn run(&mut self, goal: &str) -> TaskReport {
        let mut ctx = ExecutionContext::new(goal, self.max_recovery_attempts);
        let outcome = self.drive(&mut ctx).await;
        self.executor.shutdown();

        let (status, error) = match outcome {
            Ok(()) => (TaskStatus::Success, None),
            Err(AgentError::Cancelled) => (TaskStatus::Cancelled, None),
            Err(err) => (TaskStatus::Error, Some(err.to_string())),
        };

        TaskReport {
            goal: ctx.goal().to_string(),
            status,
            final_state: ctx.state,
            steps_planned: ctx.plan.as_ref().map(Plan::len).unwrap_or(0),
            steps_executed: ctx.executed_steps.len(),
            success_rate: ctx.success_rate(),
            elapsed_secs: ctx.elapsed_secs(),
            recovery_attempts: ctx.recovery_attempts,
            error,
            cache: self.executor.cache_stats(),
        }
    }

    async fn drive(&mut self, ctx: &mut ExecutionContext) -> AgentResult<()> {
        ctx.transition(AgentState::Planning)?;
        let plan = match self.initial_plan(ctx).await {
            Ok(plan) => plan,
            Err(err) => {
                ctx.last_error = Some(err.to_string());
                ctx.transition(AgentState::Error)?;
                ctx.transition(AgentState::Completed)?;
                return Err(err);
            }
        };
        info!("generated plan with {} steps", plan.len());
        ctx.plan = Some(plan);

        self.approval_phase(ctx).await?;

        ctx.transition(AgentState::Executing)?;
        loop {
            match self.execute_plan(ctx).await {
                Ok(()) => {
                    ctx.transition(AgentState::Completed)?;
                    return Ok(());
                }
                Err(err) => {
                    let message = err.to_string();
                    warn!("execution failed: {message}");
                    ctx.last_error = Some(message.clone());
                    ctx.transition(AgentState::Error)?;

                    if !ctx.can_recover() {
                        let attempts = ctx.recovery_attempts;
                        ctx.transition(AgentState::Completed)?;
                        return Err(AgentError::RecoveryExhausted {
                            attempts,
                            last_error: message,
                        });
                    }

                    ctx.transition(AgentState::SelfHealing)?;
                    match self.recovery_plan(ctx).await {
                        Ok(plan) => {
                            print_recovery_banner(&plan);
                            ctx.adopt_recovery_plan(plan);
                            ctx.transition(AgentState::Executing)?;
                        }
                        Err(err) => {
                            ctx.transition(AgentState::Error)?;
                            ctx.transition(AgentState::Completed)?;
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    /// Phase 1: plan against the current page context (cache allowed).
    async fn initial_plan(&mut self, ctx: &mut ExecutionContext) -> AgentResult<Plan> {
        let context = self.executor.page_context(false).await;
        info!(
            "planning with {} UI context ({} chars)",
            if context.cached { "cached" } else { "fresh" },
            context.ui_text.len()
        );
        let plan = self
            .planner
            .plan(ctx.goal(), &context.ui_text, None)
            .await?;
        Ok(plan)
    }

    /// Phase 2: gate risky plans behind the approval callback.
    async fn approval_phase(&mut self, ctx: &mut ExecutionContext) -> AgentResult<()> {
        let needs_approval = self.require_approval
            && ctx.plan.as_ref().is_some_and(Plan::requires_approval);
        if !needs_approval {
            return Ok(());
        }

        warn!("plan contains high-risk actions");
        ctx.approval_required = true;
        ctx.transition(AgentState::AwaitingApproval)?;

        let approved = match (&self.approval, ctx.plan.as_ref()) {
            (Some(callback), Some(plan)) => callback(plan),
            _ => {
                warn!("no approval callback set, auto-approving");
                true
            }
        };
        if !approved {
            ctx.transition(AgentState::Cancelled)?;
            return Err(AgentError::Cancelled);
        }
        info!("plan approved for execution");
        Ok(())
    }

    /// Phase 3: run the plan from `step_index`; the first failure stops it.
    async fn execute_plan(&mut self, ctx: &mut ExecutionContext) -> AgentResult<()> {
        let Some(plan) = ctx.plan.clone() else {
            return Err(AgentError::StepFailed {
                step: 0,
                message: "no plan to execute".to_string(),
            });
        };

        while ctx.step_index < plan.len() {
            let idx = ctx.step_index;
            let Some(action) = plan.get(idx) else {
                break;
            };
            info!("step {}/{}: {}", idx + 1, plan.len(), action.kind());

            let result = self.executor.execute(action).await;
            ctx.record_step(action.clone(), result.clone());

            if !result.is_success() {
                let message = result
                    .error
                    .unwrap_or_else(|| "unknown error".to_string());
                return Err(AgentError::StepFailed {
                    step: idx + 1,
                    message,
                });
            }
            ctx.step_index = idx + 1;
        }

        info!("all {} steps completed", plan.len());
        Ok(())
    }

    /// Phase 4: force a fresh analysis and ask for a complete new plan that
    /// still targets the original goal.
    async fn recovery_plan(&mut self, ctx: &mut ExecutionContext) -> AgentResult<Plan> {
        info!(
            "adaptive recovery attempt {} for goal: {}",
            ctx.recovery_attempts + 1,
            ctx.goal()
        );

        self.executor.invalidate_current().await;
        let fresh = self.executor.page_context(true).await;
        info!(
            "captured fresh UI: {} chars from {}",
            fresh.ui_text.len(),
            fresh.url
        );

        let error_context = ErrorContext {
            error_message: ctx.last_error.clone().unwrap_or_default(),
            failed_action: ctx
                .plan
                .as_ref()
                .and_then(|plan| plan.get(ctx.step_index))
                .cloned(),
            executed_steps: ctx.executed_steps.clone(),
            current_url: fresh.url.clone(),
            remaining_steps: ctx
                .plan
                .as_ref()
                .map(|plan| plan.remaining_from(ctx.step_index + 1).to_vec())
                .unwrap_or_default(),
        };

        let plan = self
            .planner
            .plan(ctx.goal(), &fresh.ui_text, Some(&error_context))
            .await?;
        info!("generated recovery plan with {} steps", plan.len());
        Ok(plan)
    }
}

fn print_recovery_banner(plan: &Plan) {
    println!();
    println!("{}", "=".repeat(70));
    println!("RECOVERY PLAN");
    println!("{}", "=".repeat(70));
    for line in plan.summarize() {
        println!("{line}");
    }
    println!("{}", "=".repeat(70));
    println!();
}
