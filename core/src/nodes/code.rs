//! Code generation and auto-fix nodes.

use crate::errors::ServiceResult;
use crate::state::{
    ApprovalStatus, ArtifactStatus, CodeArtifact, StateUpdate, WorkflowStage, WorkflowState,
};

use super::NodeContext;

/// Generate the backend codebase from the approved specs.
pub async fn generate(state: &WorkflowState, ctx: &NodeContext<'_>) -> ServiceResult<StateUpdate> {
    let approved: Vec<_> = state
        .specs
        .iter()
        .filter(|s| s.status == ApprovalStatus::Approved)
        .cloned()
        .collect();

    if approved.is_empty() {
        return Ok(StateUpdate::failed(
            "No approved specs available for code generation",
        ));
    }

    tracing::info!(run_id = state.run_id, specs = approved.len(), "generating code");

    let mut files = ctx
        .generation
        .generate_code(&approved, &state.product_request)
        .await?;

    if files.is_empty() {
        return Ok(StateUpdate::failed("Code generation returned no files"));
    }

    // Models routinely forget the dependency manifest.
    if !files.contains_key("requirements.txt") {
        files.insert(
            "requirements.txt".to_string(),
            "fastapi\nuvicorn[standard]\npydantic\npytest\nhttpx\n".to_string(),
        );
    }

    // Early syntax pass so obviously broken output is visible in the
    // logs before the validation stage runs the full suite.
    match ctx.validation.check_syntax(&files).await {
        Ok(issues) if !issues.is_empty() => {
            tracing::warn!(
                run_id = state.run_id,
                issues = issues.len(),
                "generated code contains syntax errors"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(run_id = state.run_id, error = %e, "syntax pre-check failed");
        }
    }

    let spec_ids = approved.iter().map(|s| s.id).collect();
    let artifact = CodeArtifact::draft(spec_ids, files);

    Ok(StateUpdate {
        code_artifacts: Some(vec![artifact]),
        current_stage: Some(WorkflowStage::Validation),
        validation_passed: Some(false),
        validation_errors: Some(Vec::new()),
        ..StateUpdate::default()
    })
}

/// Repair a failing artifact using the recorded validation errors,
/// then send it back through validation.
pub async fn auto_fix(state: &WorkflowState, ctx: &NodeContext<'_>) -> ServiceResult<StateUpdate> {
    let Some(artifact) = state.code_artifacts.first() else {
        return Ok(StateUpdate::failed("No code artifacts to fix"));
    };

    // Budget exhaustion is handled by the validation node; routing
    // only reaches here with attempts remaining.
    tracing::info!(
        run_id = state.run_id,
        attempt = artifact.fix_attempts + 1,
        errors = state.validation_errors.len(),
        "attempting code fix"
    );

    let fixed = ctx
        .generation
        .fix_code(&artifact.files, &state.validation_errors)
        .await?;

    // Quick syntax sanity pass over only the files that changed, so
    // an obviously broken fix shows up in the logs before the full
    // validation round.
    if !fixed.is_empty() {
        match ctx.validation.check_syntax(&fixed).await {
            Ok(issues) if !issues.is_empty() => {
                tracing::warn!(
                    run_id = state.run_id,
                    issues = issues.len(),
                    "fixed files still contain syntax errors"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(run_id = state.run_id, error = %e, "syntax pre-check failed");
            }
        }
    }

    let mut updated = artifact.clone();
    for (path, content) in fixed {
        updated.files.insert(path, content);
    }
    updated.fix_attempts += 1;
    updated.status = ArtifactStatus::Draft;

    Ok(StateUpdate {
        code_artifacts: Some(vec![updated]),
        current_stage: Some(WorkflowStage::Validation),
        ..StateUpdate::default()
    })
}
