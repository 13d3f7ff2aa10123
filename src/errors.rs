//! Error taxonomy for the agent core.
//!
//! Handlers inside the executor report failures as data (`ActionResult`);
//! these enums cover the layers that do propagate: the browser driver, the
//! planner, and the agent state machine itself.

use thiserror::Error;

use crate::fsm::AgentState;

/// Failures raised by the page-control layer.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("timed out after {timeout_ms}ms waiting for '{what}'")]
    Timeout { what: String, timeout_ms: u64 },
    #[error("navigation to '{url}' failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("browser protocol error: {0}")]
    Protocol(String),
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("page script evaluation failed: {0}")]
    Evaluate(String),
}

/// Failures raised by the planner oracle.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("planner endpoint unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("planner returned malformed output: {0}")]
    Parse(String),
    #[error("plan failed validation: {0}")]
    Validation(String),
    #[error("planner gave no usable plan after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Top-level agent failures surfaced to the CLI.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: AgentState, to: AgentState },
    #[error("planning failed: {0}")]
    Planning(#[from] PlanError),
    #[error("step {step} failed: {message}")]
    StepFailed { step: usize, message: String },
    #[error("recovery exhausted after {attempts} attempts: {last_error}")]
    RecoveryExhausted { attempts: u32, last_error: String },
    #[error("plan rejected by operator")]
    Cancelled,
}

pub type AgentResult<T> = Result<T, AgentError>;
