//! Pipeline nodes.
//!
//! Every node reads the current state and returns a [`StateUpdate`];
//! it never mutates state in place. Service errors are absorbed here:
//! a failed node becomes a `failed` stage with an error message, never
//! a panic or an error surfaced to the loop.

mod code;
mod epics;
mod research;
mod review;
mod specs;
mod stories;
mod validate;

use crate::errors::ServiceResult;
use crate::graph::NodeName;
use crate::state::{ApprovalKind, StateUpdate, WorkflowState};
use crate::traits::{GenerationService, ValidationService};

/// Dependencies handed to every node.
pub struct NodeContext<'a> {
    pub generation: &'a dyn GenerationService,
    pub validation: &'a dyn ValidationService,
}

/// Run one node. Any service error is converted into a terminal
/// failure update so the loop always gets a routable state back.
pub async fn execute(node: NodeName, state: &WorkflowState, ctx: &NodeContext<'_>) -> StateUpdate {
    let result: ServiceResult<StateUpdate> = match node {
        NodeName::Research => research::run(state, ctx).await,
        NodeName::EpicGeneration => epics::run(state, ctx).await,
        NodeName::EpicReview => Ok(review::run(state, ApprovalKind::Epic)),
        NodeName::StoryGeneration => stories::run(state, ctx).await,
        NodeName::StoryReview => Ok(review::run(state, ApprovalKind::Story)),
        NodeName::SpecGeneration => specs::run(state, ctx).await,
        NodeName::SpecReview => Ok(review::run(state, ApprovalKind::Spec)),
        NodeName::CodeGeneration => code::generate(state, ctx).await,
        NodeName::Validation => validate::run(state, ctx).await,
        NodeName::AutoFix => code::auto_fix(state, ctx).await,
    };

    match result {
        Ok(update) => update,
        Err(e) => {
            tracing::error!(run_id = state.run_id, node = ?node, error = %e, "node failed");
            StateUpdate::failed(format!("{:?} failed: {}", node, e))
        }
    }
}
