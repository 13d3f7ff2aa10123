//! Terminal output helpers: banner, approval prompt, final summary.

use std::io::{self, BufRead, Write};

use crate::actions::Plan;
use crate::agent::{TaskReport, TaskStatus};

pub fn print_banner() {
    println!("{}", "=".repeat(60));
    println!("  taskpilot - natural language browser automation");
    println!("{}", "=".repeat(60));
}

/// Interactive plan approval. Lists every step, flags the risky ones, and
/// reads a yes/no from stdin.
pub fn prompt_approval(plan: &Plan) -> bool {
    println!();
    println!("{}", "=".repeat(70));
    println!("ACTION PLAN APPROVAL REQUIRED");
    println!("{}", "=".repeat(70));
    for (line, action) in plan.summarize().iter().zip(plan.actions()) {
        if action.is_risky() {
            println!("{line}  [high-risk]");
        } else {
            println!("{line}");
        }
    }
    println!("{}", "=".repeat(70));
    print!("\nApprove this plan? (yes/no): ");
    let _ = io::stdout().flush();

    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

pub fn print_report(report: &TaskReport) {
    println!();
    println!("{}", "=".repeat(44));
    println!("  EXECUTION RESULT");
    println!("{}", "=".repeat(44));

    let status = match report.status {
        TaskStatus::Success => "success",
        TaskStatus::Error => "error",
        TaskStatus::Cancelled => "cancelled",
    };
    println!("  Status: {status}");
    println!("  Request: {}", report.goal);
    println!("  Final state: {}", report.final_state);
    println!("  Steps planned: {}", report.steps_planned);
    println!("  Steps executed: {}", report.steps_executed);
    println!("  Success rate: {:.1}%", report.success_rate);
    println!("  Elapsed time: {:.2}s", report.elapsed_secs);
    if report.recovery_attempts > 0 {
        println!("  Recovery attempts: {}", report.recovery_attempts);
    }
    println!(
        "  Cache: {} entries, {} hits",
        report.cache.entries, report.cache.total_hits
    );
    if let Some(error) = &report.error {
        println!("  Error: {error}");
    }
}
