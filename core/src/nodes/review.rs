//! Review gate node, shared by all three HITL checkpoints.
//!
//! A gate examines the statuses of the items under review:
//!   - all approved: advance to the next generation stage
//!   - any rejected: collect feedback and return to regeneration
//!   - otherwise (first visit, or a partial decision): suspend by
//!     raising `awaiting_approval`
//!
//! The gate is pure; approvals themselves are recorded by the runner
//! before the loop re-enters here.

use crate::state::{ApprovalKind, ApprovalStatus, StateUpdate, WorkflowState};

pub fn run(state: &WorkflowState, kind: ApprovalKind) -> StateUpdate {
    let decisions: Vec<(String, ApprovalStatus, Option<String>)> = match kind {
        ApprovalKind::Epic => state
            .epics
            .iter()
            .map(|e| (e.title.clone(), e.status, e.feedback.clone()))
            .collect(),
        ApprovalKind::Story => state
            .stories
            .iter()
            .map(|s| (s.title.clone(), s.status, s.feedback.clone()))
            .collect(),
        ApprovalKind::Spec => state
            .specs
            .iter()
            .map(|s| (s.story_title.clone(), s.status, s.feedback.clone()))
            .collect(),
    };

    let rejected: Vec<_> = decisions
        .iter()
        .filter(|(_, status, _)| *status == ApprovalStatus::Rejected)
        .collect();
    let all_approved = !decisions.is_empty()
        && decisions
            .iter()
            .all(|(_, status, _)| *status == ApprovalStatus::Approved);

    if all_approved {
        tracing::info!(run_id = state.run_id, kind = %kind, "all items approved, advancing");
        return StateUpdate {
            current_stage: Some(kind.next_stage()),
            awaiting_approval: Some(false),
            approval_type: Some(None),
            approval_ids: Some(Vec::new()),
            ..StateUpdate::default()
        };
    }

    if !rejected.is_empty() {
        let feedback = rejected
            .iter()
            .map(|(title, _, fb)| {
                format!(
                    "- {}: {}",
                    title,
                    fb.as_deref().unwrap_or("No specific feedback")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        tracing::info!(
            run_id = state.run_id,
            kind = %kind,
            rejected = rejected.len(),
            "items rejected, returning for regeneration"
        );
        return StateUpdate {
            current_stage: Some(kind.regen_stage()),
            awaiting_approval: Some(false),
            approval_type: Some(None),
            approval_ids: Some(Vec::new()),
            user_feedback: Some(Some(feedback)),
            ..StateUpdate::default()
        };
    }

    // First visit or an incomplete decision: park until approvals
    // arrive for every item.
    tracing::info!(run_id = state.run_id, kind = %kind, "awaiting approval");
    StateUpdate {
        awaiting_approval: Some(true),
        approval_type: Some(Some(kind)),
        ..StateUpdate::default()
    }
}
