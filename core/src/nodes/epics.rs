//! Epic generation node.

use crate::errors::ServiceResult;
use crate::state::{ApprovalStatus, StateUpdate, WorkflowStage, WorkflowState};

use super::NodeContext;

pub async fn run(state: &WorkflowState, ctx: &NodeContext<'_>) -> ServiceResult<StateUpdate> {
    let Some(research) = state.research_artifact.as_ref() else {
        return Ok(StateUpdate::failed(
            "No research findings available for epic generation",
        ));
    };

    tracing::info!(
        run_id = state.run_id,
        regenerating = state.user_feedback.is_some(),
        "generating epics"
    );

    let batch = ctx
        .generation
        .generate_epics(
            &state.product_request,
            state.constraints.as_deref(),
            research,
            state.user_feedback.as_deref(),
        )
        .await?;

    if batch.epics.is_empty() {
        return Ok(StateUpdate::failed("Epic generation returned no epics"));
    }

    // Reindex and reset review bookkeeping so a regeneration round
    // starts with a clean slate.
    let mut epics = batch.epics;
    for (i, epic) in epics.iter_mut().enumerate() {
        epic.index = i;
        epic.status = ApprovalStatus::Pending;
        epic.feedback = None;
    }
    let approval_ids = (0..epics.len()).collect();

    Ok(StateUpdate {
        epics: Some(epics),
        epic_dependency_graph: Some(batch.dependency_graph),
        current_stage: Some(WorkflowStage::EpicReview),
        approval_ids: Some(approval_ids),
        user_feedback: Some(None),
        ..StateUpdate::default()
    })
}
