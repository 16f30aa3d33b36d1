//! Research node: gather findings about the product request before
//! any generation happens.

use crate::errors::ServiceResult;
use crate::state::{StateUpdate, WorkflowStage, WorkflowState};

use super::NodeContext;

pub async fn run(state: &WorkflowState, ctx: &NodeContext<'_>) -> ServiceResult<StateUpdate> {
    tracing::info!(
        run_id = state.run_id,
        attempt = state.retry_count + 1,
        "researching product request"
    );

    let artifact = ctx
        .generation
        .research(&state.product_request, state.constraints.as_deref())
        .await?;

    if artifact.findings.is_empty() {
        let attempts = state.retry_count + 1;
        if attempts >= state.max_retries {
            return Ok(StateUpdate::failed(format!(
                "Research produced no findings after {} attempts",
                attempts
            )));
        }
        tracing::warn!(run_id = state.run_id, attempts, "research returned no findings, retrying");
        return Ok(StateUpdate {
            research_artifact: Some(artifact),
            retry_count: Some(attempts),
            ..StateUpdate::default()
        });
    }

    Ok(StateUpdate {
        research_artifact: Some(artifact),
        current_stage: Some(WorkflowStage::EpicGeneration),
        ..StateUpdate::default()
    })
}
