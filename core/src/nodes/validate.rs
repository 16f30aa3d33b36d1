//! Validation node: syntax, lint, and test checks over the generated
//! artifact.

use crate::errors::ServiceResult;
use crate::state::{
    ArtifactStatus, StateUpdate, ValidationReport, WorkflowStage, WorkflowState,
};

use super::NodeContext;

pub async fn run(state: &WorkflowState, ctx: &NodeContext<'_>) -> ServiceResult<StateUpdate> {
    let Some(artifact) = state.code_artifacts.first() else {
        return Ok(StateUpdate::failed("No code artifacts to validate"));
    };

    tracing::info!(
        run_id = state.run_id,
        files = artifact.files.len(),
        fix_attempts = artifact.fix_attempts,
        "validating code artifact"
    );

    let syntax_errors = ctx.validation.check_syntax(&artifact.files).await?;
    let lint_errors = ctx.validation.lint(&artifact.files).await?;

    // Tests run only against syntactically valid code.
    let test_results = if syntax_errors.is_empty() {
        ctx.validation.run_tests(&artifact.files).await?
    } else {
        Vec::new()
    };

    let mut errors = Vec::new();
    for issue in &syntax_errors {
        errors.push(format!("Syntax: {}:{} - {}", issue.file, issue.line, issue.message));
    }
    for issue in &lint_errors {
        errors.push(format!("Lint: {}:{} - {}", issue.file, issue.line, issue.message));
    }
    for result in &test_results {
        if !result.passed {
            errors.push(format!(
                "Test: {} - {}",
                result.test_name,
                result.error_message.as_deref().unwrap_or("failed")
            ));
        }
    }

    let passed = errors.is_empty();
    let mut updated = artifact.clone();
    updated.validation_report = ValidationReport {
        syntax_errors,
        lint_errors,
        test_results,
        overall_passed: passed,
    };
    updated.status = if passed {
        ArtifactStatus::Valid
    } else {
        ArtifactStatus::Invalid
    };

    if passed {
        tracing::info!(run_id = state.run_id, "validation passed, workflow complete");
        return Ok(StateUpdate {
            code_artifacts: Some(vec![updated]),
            validation_passed: Some(true),
            validation_errors: Some(Vec::new()),
            current_stage: Some(WorkflowStage::Completed),
            ..StateUpdate::default()
        });
    }

    // Out of fix budget: terminal failure, with the report preserved.
    if updated.fix_attempts >= state.max_retries {
        tracing::warn!(
            run_id = state.run_id,
            errors = errors.len(),
            "validation failed with no fix attempts remaining"
        );
        return Ok(StateUpdate {
            code_artifacts: Some(vec![updated]),
            validation_passed: Some(false),
            validation_errors: Some(errors),
            current_stage: Some(WorkflowStage::Failed),
            error_message: Some(Some(format!(
                "Failed to fix code after {} attempts",
                state.max_retries
            ))),
            ..StateUpdate::default()
        });
    }

    tracing::info!(
        run_id = state.run_id,
        errors = errors.len(),
        "validation failed, routing to auto-fix"
    );
    Ok(StateUpdate {
        code_artifacts: Some(vec![updated]),
        validation_passed: Some(false),
        validation_errors: Some(errors),
        ..StateUpdate::default()
    })
}
