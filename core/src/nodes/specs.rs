//! Spec generation node: one technical specification per approved
//! story, with optional Mermaid diagram enrichment.

use crate::errors::ServiceResult;
use crate::state::{ApprovalStatus, StateUpdate, WorkflowStage, WorkflowState};

use super::NodeContext;

pub async fn run(state: &WorkflowState, ctx: &NodeContext<'_>) -> ServiceResult<StateUpdate> {
    let approved: Vec<_> = state
        .stories
        .iter()
        .filter(|s| s.status == ApprovalStatus::Approved)
        .cloned()
        .collect();

    if approved.is_empty() {
        return Ok(StateUpdate::failed(
            "No approved stories available for spec generation",
        ));
    }

    let research_summary = state
        .research_artifact
        .as_ref()
        .map(|a| a.findings.summary.as_str())
        .unwrap_or("");

    tracing::info!(
        run_id = state.run_id,
        stories = approved.len(),
        regenerating = state.user_feedback.is_some(),
        "generating specs"
    );

    let mut specs = Vec::with_capacity(approved.len());
    for (i, story) in approved.iter().enumerate() {
        let mut spec = ctx
            .generation
            .generate_spec(
                story,
                &state.product_request,
                research_summary,
                state.user_feedback.as_deref(),
            )
            .await?;
        spec.story_index = i;
        spec.story_title = story.title.clone();
        spec.status = ApprovalStatus::Pending;
        spec.feedback = None;

        // Diagrams are enrichment only. A failure here is logged and
        // the spec ships without them.
        match ctx.generation.generate_diagrams(&spec).await {
            Ok(diagrams) => spec.diagrams = diagrams,
            Err(e) => {
                tracing::warn!(
                    run_id = state.run_id,
                    story = %story.title,
                    error = %e,
                    "diagram generation failed, continuing without diagrams"
                );
            }
        }

        specs.push(spec);
    }

    let approval_ids = (0..specs.len()).collect();

    Ok(StateUpdate {
        specs: Some(specs),
        current_stage: Some(WorkflowStage::SpecReview),
        approval_ids: Some(approval_ids),
        user_feedback: Some(None),
        ..StateUpdate::default()
    })
}
