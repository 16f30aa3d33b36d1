//! Workflow runner: the public entry point for starting, resuming,
//! inspecting, and approving runs.
//!
//! The runner owns the drive loop. After every node it merges the
//! node's update, checkpoints the full state, then consults the graph
//! for the next node. The loop ends on a terminal stage or when a
//! review gate suspends the run.

use std::sync::Arc;

use crate::checkpoint::Checkpointer;
use crate::config::WorkflowConfig;
use crate::errors::{WorkflowError, WorkflowResult};
use crate::graph::{self, Next, NodeName};
use crate::nodes::{self, NodeContext};
use crate::state::{ApprovalKind, ApprovalStatus, StateUpdate, WorkflowState};
use crate::traits::{GenerationService, ValidationService};

/// Inputs for a new workflow run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: i64,
    pub project_id: i64,
    pub user_id: i64,
    pub product_request: String,
    pub constraints: Option<String>,
}

/// One human decision on one item under review.
#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    /// Index of the item in its list (epics, stories, or specs).
    pub index: usize,
    pub approved: bool,
    pub feedback: Option<String>,
}

pub struct WorkflowRunner {
    generation: Arc<dyn GenerationService>,
    validation: Arc<dyn ValidationService>,
    checkpointer: Arc<dyn Checkpointer>,
    config: WorkflowConfig,
}

impl WorkflowRunner {
    /// Build a runner. Fails if the routing table is malformed, so a
    /// broken topology is caught at startup rather than mid-run.
    pub fn new(
        generation: Arc<dyn GenerationService>,
        validation: Arc<dyn ValidationService>,
        checkpointer: Arc<dyn Checkpointer>,
        config: WorkflowConfig,
    ) -> WorkflowResult<Self> {
        graph::validate_topology()?;
        Ok(Self {
            generation,
            validation,
            checkpointer,
            config,
        })
    }

    /// Start a fresh run and drive it until it completes, fails, or
    /// suspends at a review gate.
    pub async fn start(&self, request: RunRequest) -> WorkflowResult<WorkflowState> {
        if self.checkpointer.load(request.run_id).await?.is_some() {
            return Err(WorkflowError::RunAlreadyExists(request.run_id));
        }

        let state = WorkflowState::initial(
            request.run_id,
            request.project_id,
            request.user_id,
            request.product_request,
            request.constraints,
            self.config.max_retries,
        );
        self.checkpointer.save(&state).await?;

        tracing::info!(run_id = state.run_id, "starting workflow run");
        self.drive(state, NodeName::Research).await
    }

    /// Resume a checkpointed run from its current stage, optionally
    /// merging caller-supplied updates into the checkpoint first. A
    /// run that is still awaiting approval after the merge, or
    /// already terminal, is returned unchanged.
    pub async fn resume(
        &self,
        run_id: i64,
        updates: Option<StateUpdate>,
    ) -> WorkflowResult<WorkflowState> {
        let mut state = self.load(run_id).await?;

        if let Some(update) = updates {
            update.apply(&mut state);
            state.validate_approval_invariant()?;
            self.checkpointer.save(&state).await?;
        }

        if state.awaiting_approval {
            tracing::info!(run_id, "run is awaiting approval, nothing to resume");
            return Ok(state);
        }
        let Some(entry) = graph::entry_node(state.current_stage) else {
            return Ok(state);
        };

        tracing::info!(run_id, stage = %state.current_stage, "resuming workflow run");
        self.drive(state, entry).await
    }

    /// Latest checkpointed state for a run.
    pub async fn get_state(&self, run_id: i64) -> WorkflowResult<WorkflowState> {
        self.load(run_id).await
    }

    /// Run ids with a stored checkpoint.
    pub async fn list_runs(&self) -> WorkflowResult<Vec<i64>> {
        Ok(self.checkpointer.list_runs().await?)
    }

    /// Record human decisions on the items under review, then resume
    /// the run through its gate. Every decision must target an item
    /// the run actually put up for review.
    pub async fn approve_items(
        &self,
        run_id: i64,
        kind: ApprovalKind,
        decisions: &[ApprovalDecision],
    ) -> WorkflowResult<WorkflowState> {
        let mut state = self.load(run_id).await?;

        if !state.awaiting_approval {
            return Err(WorkflowError::InvalidApproval(format!(
                "run {} is not awaiting approval",
                run_id
            )));
        }
        let expected = state.approval_type.ok_or_else(|| {
            WorkflowError::InvalidApproval(format!(
                "run {} is awaiting approval without an approval type",
                run_id
            ))
        })?;
        if kind != expected {
            return Err(WorkflowError::InvalidApproval(format!(
                "run {} is awaiting {} approval, not {}",
                run_id, expected, kind
            )));
        }
        for decision in decisions {
            if !state.approval_ids.contains(&decision.index) {
                return Err(WorkflowError::InvalidApproval(format!(
                    "{} {} is not under review",
                    kind, decision.index
                )));
            }
        }

        for decision in decisions {
            let status = if decision.approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Rejected
            };
            match kind {
                ApprovalKind::Epic => {
                    let item = &mut state.epics[decision.index];
                    item.status = status;
                    item.feedback = decision.feedback.clone();
                }
                ApprovalKind::Story => {
                    let item = &mut state.stories[decision.index];
                    item.status = status;
                    item.feedback = decision.feedback.clone();
                }
                ApprovalKind::Spec => {
                    let item = &mut state.specs[decision.index];
                    item.status = status;
                    item.feedback = decision.feedback.clone();
                }
            }
        }

        // Clear the suspension so the gate re-evaluates the decisions.
        state.awaiting_approval = false;
        self.checkpointer.save(&state).await?;

        let entry = graph::entry_node(state.current_stage).ok_or_else(|| {
            WorkflowError::InvalidApproval(format!(
                "run {} is in terminal stage {}",
                run_id, state.current_stage
            ))
        })?;

        tracing::info!(
            run_id,
            kind = %kind,
            decisions = decisions.len(),
            "recorded approvals, resuming through gate"
        );
        self.drive(state, entry).await
    }

    async fn load(&self, run_id: i64) -> WorkflowResult<WorkflowState> {
        self.checkpointer
            .load(run_id)
            .await?
            .ok_or(WorkflowError::RunNotFound(run_id))
    }

    /// Core loop: execute, merge, checkpoint, route. Bounded by
    /// `max_steps` so a routing bug can never spin forever.
    async fn drive(
        &self,
        mut state: WorkflowState,
        entry: NodeName,
    ) -> WorkflowResult<WorkflowState> {
        let ctx = NodeContext {
            generation: self.generation.as_ref(),
            validation: self.validation.as_ref(),
        };

        let mut node = entry;
        for _ in 0..self.config.max_steps {
            tracing::debug!(run_id = state.run_id, node = ?node, "executing node");
            let update = nodes::execute(node, &state, &ctx).await;
            update.apply(&mut state);
            state.validate_approval_invariant()?;
            self.checkpointer.save(&state).await?;

            match graph::next_node(node, &state) {
                Next::Node(next) => node = next,
                Next::End => {
                    tracing::info!(
                        run_id = state.run_id,
                        stage = %state.current_stage,
                        awaiting = state.awaiting_approval,
                        "workflow loop ended"
                    );
                    return Ok(state);
                }
            }
        }

        StateUpdate::failed(format!(
            "Workflow exceeded {} node transitions",
            self.config.max_steps
        ))
        .apply(&mut state);
        self.checkpointer.save(&state).await?;
        Ok(state)
    }
}
