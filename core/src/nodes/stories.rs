//! Story generation node: approved epics become user stories.

use crate::errors::ServiceResult;
use crate::state::{ApprovalStatus, StateUpdate, WorkflowStage, WorkflowState};

use super::NodeContext;

pub async fn run(state: &WorkflowState, ctx: &NodeContext<'_>) -> ServiceResult<StateUpdate> {
    let approved: Vec<_> = state
        .epics
        .iter()
        .filter(|e| e.status == ApprovalStatus::Approved)
        .cloned()
        .collect();

    if approved.is_empty() {
        return Ok(StateUpdate::failed(
            "No approved epics available for story generation",
        ));
    }

    tracing::info!(
        run_id = state.run_id,
        epics = approved.len(),
        regenerating = state.user_feedback.is_some(),
        "generating stories"
    );

    let mut stories = ctx
        .generation
        .generate_stories(&approved, &state.product_request, state.user_feedback.as_deref())
        .await?;

    if stories.is_empty() {
        return Ok(StateUpdate::failed("Story generation returned no stories"));
    }

    for story in stories.iter_mut() {
        story.status = ApprovalStatus::Pending;
        story.feedback = None;
    }
    let approval_ids = (0..stories.len()).collect();

    Ok(StateUpdate {
        stories: Some(stories),
        current_stage: Some(WorkflowStage::StoryReview),
        approval_ids: Some(approval_ids),
        user_feedback: Some(None),
        ..StateUpdate::default()
    })
}
