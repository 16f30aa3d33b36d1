//! Workflow graph topology and routing.
//!
//! The graph is a fixed table: each node declares the successors it
//! may route to, and [`next_node`] picks among them from the current
//! state alone. Routing never mutates state; nodes own all stage
//! transitions.

use crate::errors::{WorkflowError, WorkflowResult};
use crate::state::{ApprovalKind, WorkflowStage, WorkflowState};

/// Executable nodes in the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeName {
    Research,
    EpicGeneration,
    EpicReview,
    StoryGeneration,
    StoryReview,
    SpecGeneration,
    SpecReview,
    CodeGeneration,
    Validation,
    AutoFix,
}

impl NodeName {
    pub const ALL: [NodeName; 10] = [
        NodeName::Research,
        NodeName::EpicGeneration,
        NodeName::EpicReview,
        NodeName::StoryGeneration,
        NodeName::StoryReview,
        NodeName::SpecGeneration,
        NodeName::SpecReview,
        NodeName::CodeGeneration,
        NodeName::Validation,
        NodeName::AutoFix,
    ];
}

/// Where the loop goes after a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Node(NodeName),
    /// Stop driving the loop: terminal stage reached or the run is
    /// suspended awaiting approval.
    End,
}

/// Routing decision after the research node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResearchOutcome {
    Retry,
    Continue,
    Fail,
}

/// Routing decision after a review gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
    Approved,
    Rejected,
    Pending,
}

/// Routing decision after the validation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Complete,
    Retry,
    Fail,
}

/// Successors each node is allowed to route to. [`next_node`] must
/// only ever pick from this table; `validate_topology` checks the
/// table itself is closed and connected.
pub fn topology() -> &'static [(NodeName, &'static [NodeName])] {
    &[
        (NodeName::Research, &[NodeName::Research, NodeName::EpicGeneration]),
        (NodeName::EpicGeneration, &[NodeName::EpicReview]),
        (NodeName::EpicReview, &[NodeName::StoryGeneration, NodeName::EpicGeneration]),
        (NodeName::StoryGeneration, &[NodeName::StoryReview]),
        (NodeName::StoryReview, &[NodeName::SpecGeneration, NodeName::StoryGeneration]),
        (NodeName::SpecGeneration, &[NodeName::SpecReview]),
        (NodeName::SpecReview, &[NodeName::CodeGeneration, NodeName::SpecGeneration]),
        (NodeName::CodeGeneration, &[NodeName::Validation]),
        (NodeName::Validation, &[NodeName::AutoFix]),
        (NodeName::AutoFix, &[NodeName::Validation]),
    ]
}

/// Check the topology table is well formed: every node listed exactly
/// once, every successor declared, and every node reachable from the
/// research entry point.
pub fn validate_topology() -> WorkflowResult<()> {
    let table = topology();

    for node in NodeName::ALL {
        let count = table.iter().filter(|(n, _)| *n == node).count();
        if count != 1 {
            return Err(WorkflowError::InvalidTopology(format!(
                "node {:?} listed {} times",
                node, count
            )));
        }
    }

    for (node, successors) in table {
        for succ in *successors {
            if !table.iter().any(|(n, _)| n == succ) {
                return Err(WorkflowError::InvalidTopology(format!(
                    "node {:?} routes to undeclared node {:?}",
                    node, succ
                )));
            }
        }
    }

    // Reachability from the entry node.
    let mut reached = vec![NodeName::Research];
    let mut frontier = vec![NodeName::Research];
    while let Some(node) = frontier.pop() {
        let (_, successors) = table.iter().find(|(n, _)| *n == node).unwrap();
        for succ in *successors {
            if !reached.contains(succ) {
                reached.push(*succ);
                frontier.push(*succ);
            }
        }
    }
    for node in NodeName::ALL {
        if !reached.contains(&node) {
            return Err(WorkflowError::InvalidTopology(format!(
                "node {:?} unreachable from research",
                node
            )));
        }
    }

    Ok(())
}

/// Node to execute when (re)entering the loop at a given stage.
/// Terminal stages have no entry node.
pub fn entry_node(stage: WorkflowStage) -> Option<NodeName> {
    match stage {
        WorkflowStage::Research => Some(NodeName::Research),
        WorkflowStage::EpicGeneration => Some(NodeName::EpicGeneration),
        WorkflowStage::EpicReview => Some(NodeName::EpicReview),
        WorkflowStage::StoryGeneration => Some(NodeName::StoryGeneration),
        WorkflowStage::StoryReview => Some(NodeName::StoryReview),
        WorkflowStage::SpecGeneration => Some(NodeName::SpecGeneration),
        WorkflowStage::SpecReview => Some(NodeName::SpecReview),
        WorkflowStage::CodeGeneration => Some(NodeName::CodeGeneration),
        WorkflowStage::Validation => Some(NodeName::Validation),
        WorkflowStage::Completed | WorkflowStage::Failed => None,
    }
}

/// Research router: retry on empty findings until the retry budget
/// runs out. The node marks the run failed itself; the router only
/// observes.
pub fn route_research(state: &WorkflowState) -> ResearchOutcome {
    if state.current_stage == WorkflowStage::Failed {
        return ResearchOutcome::Fail;
    }
    let empty = state
        .research_artifact
        .as_ref()
        .map(|a| a.findings.is_empty())
        .unwrap_or(true);
    if empty {
        ResearchOutcome::Retry
    } else {
        ResearchOutcome::Continue
    }
}

/// Review router: a gate node advances the stage when the human
/// decided, or leaves `awaiting_approval` set when it is still
/// waiting.
pub fn route_review(state: &WorkflowState, kind: ApprovalKind) -> ReviewOutcome {
    if !state.awaiting_approval && state.current_stage == kind.next_stage() {
        ReviewOutcome::Approved
    } else if !state.awaiting_approval && state.current_stage == kind.regen_stage() {
        ReviewOutcome::Rejected
    } else {
        ReviewOutcome::Pending
    }
}

/// Validation router: done, fixable, or out of fix budget.
pub fn route_validation(state: &WorkflowState) -> ValidationOutcome {
    if state.validation_passed {
        return ValidationOutcome::Complete;
    }
    let Some(artifact) = state.code_artifacts.first() else {
        return ValidationOutcome::Fail;
    };
    if artifact.fix_attempts < state.max_retries {
        ValidationOutcome::Retry
    } else {
        ValidationOutcome::Fail
    }
}

/// Pick the next node after `node` ran, from state alone.
pub fn next_node(node: NodeName, state: &WorkflowState) -> Next {
    // A node that failed the run always ends the loop.
    if state.current_stage.is_terminal() {
        return Next::End;
    }

    match node {
        NodeName::Research => match route_research(state) {
            ResearchOutcome::Retry => Next::Node(NodeName::Research),
            ResearchOutcome::Continue => Next::Node(NodeName::EpicGeneration),
            ResearchOutcome::Fail => Next::End,
        },
        NodeName::EpicGeneration => Next::Node(NodeName::EpicReview),
        NodeName::StoryGeneration => Next::Node(NodeName::StoryReview),
        NodeName::SpecGeneration => Next::Node(NodeName::SpecReview),
        NodeName::EpicReview => route_gate(state, ApprovalKind::Epic),
        NodeName::StoryReview => route_gate(state, ApprovalKind::Story),
        NodeName::SpecReview => route_gate(state, ApprovalKind::Spec),
        NodeName::CodeGeneration => Next::Node(NodeName::Validation),
        NodeName::Validation => match route_validation(state) {
            ValidationOutcome::Complete | ValidationOutcome::Fail => Next::End,
            ValidationOutcome::Retry => Next::Node(NodeName::AutoFix),
        },
        NodeName::AutoFix => Next::Node(NodeName::Validation),
    }
}

fn route_gate(state: &WorkflowState, kind: ApprovalKind) -> Next {
    match route_review(state, kind) {
        ReviewOutcome::Approved => match kind.next_stage() {
            WorkflowStage::StoryGeneration => Next::Node(NodeName::StoryGeneration),
            WorkflowStage::SpecGeneration => Next::Node(NodeName::SpecGeneration),
            _ => Next::Node(NodeName::CodeGeneration),
        },
        ReviewOutcome::Rejected => match kind.regen_stage() {
            WorkflowStage::EpicGeneration => Next::Node(NodeName::EpicGeneration),
            WorkflowStage::StoryGeneration => Next::Node(NodeName::StoryGeneration),
            _ => Next::Node(NodeName::SpecGeneration),
        },
        // Suspend: the run parks here until approvals arrive.
        ReviewOutcome::Pending => Next::End,
    }
}
