//! Prompt text handed to the remote agents.

use super::types::WorkflowRecord;

pub(crate) const EMPTY_PLAN_PLACEHOLDER: &str = "(the planner finished without producing a plan)";

/// Context shown to the user before any planning happens.
pub fn enriched_context(repository: &str, branch: &str, model_name: &str, prompt: &str) -> String {
    let mut parts = Vec::new();
    parts.push(format!("## Request\n{}\n", prompt.trim()));
    parts.push(format!("## Repository: {}\n", repository));
    parts.push(format!("## Base branch: {}\n", branch));
    parts.push(format!("## Model: {}\n", model_name));
    parts.join("\n")
}

/// Prompt for a planning pass. `feedback` is set for revision passes.
pub fn planner_prompt(record: &WorkflowRecord, feedback: Option<&str>) -> String {
    let mut parts = Vec::new();
    parts.push(
        "# PLANNING TASK\nProduce an implementation plan for the request below. \
         Do NOT modify any files. Reply with the plan only.\n"
            .to_string(),
    );
    parts.push(enriched_context(
        &record.repository,
        &record.branch,
        &record.model_name,
        &record.prompt,
    ));

    if let Some(feedback) = feedback {
        if let Some(previous) = record.plan_text.as_deref() {
            parts.push(format!("## Previous plan\n{}\n", previous));
        }
        parts.push(format!(
            "## Reviewer feedback (revision {})\n{}\n",
            record.iteration_count,
            feedback.trim()
        ));
    }

    parts.join("\n")
}

/// Prompt for the implementation job, built from the latest plan.
pub fn implementer_prompt(record: &WorkflowRecord) -> String {
    let mut parts = Vec::new();
    parts.push(format!("# IMPLEMENTATION TASK\n{}\n", record.prompt.trim()));
    parts.push(format!(
        "## Repository: {}\n## Base branch: {}\n",
        record.repository, record.branch
    ));
    match record.plan_text.as_deref() {
        Some(plan) if plan != EMPTY_PLAN_PLACEHOLDER => {
            parts.push(format!("## Approved plan\nFollow this plan:\n{}\n", plan));
        }
        _ => {}
    }
    parts.join("\n")
}
