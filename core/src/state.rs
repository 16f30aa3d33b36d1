//! Workflow state shared across every pipeline stage.
//!
//! The original dynamic, dict-shaped state is rendered here as an
//! explicit record: every field present, options for the genuinely
//! optional ones, and a closed enum for the current stage. Nodes never
//! mutate state directly; they return a [`StateUpdate`] that the
//! runner merges.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{WorkflowError, WorkflowResult};

/// Pipeline stage tracked in `current_stage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Research,
    EpicGeneration,
    EpicReview,
    StoryGeneration,
    StoryReview,
    SpecGeneration,
    SpecReview,
    CodeGeneration,
    Validation,
    Completed,
    Failed,
}

impl WorkflowStage {
    /// Check if this is a terminal stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStage::Completed | WorkflowStage::Failed)
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowStage::Research => "research",
            WorkflowStage::EpicGeneration => "epic_generation",
            WorkflowStage::EpicReview => "epic_review",
            WorkflowStage::StoryGeneration => "story_generation",
            WorkflowStage::StoryReview => "story_review",
            WorkflowStage::SpecGeneration => "spec_generation",
            WorkflowStage::SpecReview => "spec_review",
            WorkflowStage::CodeGeneration => "code_generation",
            WorkflowStage::Validation => "validation",
            WorkflowStage::Completed => "completed",
            WorkflowStage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Approval status for items passing through HITL gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl Default for ApprovalStatus {
    fn default() -> Self {
        ApprovalStatus::Pending
    }
}

/// The three item kinds a human can approve or reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Epic,
    Story,
    Spec,
}

impl ApprovalKind {
    /// Stage the run advances to when every item is approved.
    pub fn next_stage(&self) -> WorkflowStage {
        match self {
            ApprovalKind::Epic => WorkflowStage::StoryGeneration,
            ApprovalKind::Story => WorkflowStage::SpecGeneration,
            ApprovalKind::Spec => WorkflowStage::CodeGeneration,
        }
    }

    /// Stage the run returns to when any item is rejected.
    pub fn regen_stage(&self) -> WorkflowStage {
        match self {
            ApprovalKind::Epic => WorkflowStage::EpicGeneration,
            ApprovalKind::Story => WorkflowStage::StoryGeneration,
            ApprovalKind::Spec => WorkflowStage::SpecGeneration,
        }
    }

    /// Stage the review gate for this kind belongs to.
    pub fn review_stage(&self) -> WorkflowStage {
        match self {
            ApprovalKind::Epic => WorkflowStage::EpicReview,
            ApprovalKind::Story => WorkflowStage::StoryReview,
            ApprovalKind::Spec => WorkflowStage::SpecReview,
        }
    }
}

impl fmt::Display for ApprovalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalKind::Epic => write!(f, "epic"),
            ApprovalKind::Story => write!(f, "story"),
            ApprovalKind::Spec => write!(f, "spec"),
        }
    }
}

/// Priority level attached to epics and stories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Structured findings produced by the research stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchFindings {
    #[serde(default)]
    pub key_technologies: Vec<String>,
    #[serde(default)]
    pub architecture_patterns: Vec<String>,
    #[serde(default)]
    pub security_considerations: Vec<String>,
    #[serde(default)]
    pub data_model_hints: Vec<String>,
    #[serde(default)]
    pub api_design_hints: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

impl ResearchFindings {
    /// No substantive findings at all. Drives the research retry loop.
    pub fn is_empty(&self) -> bool {
        self.key_technologies.is_empty()
            && self.architecture_patterns.is_empty()
            && self.security_considerations.is_empty()
            && self.data_model_hints.is_empty()
            && self.api_design_hints.is_empty()
            && self.summary.is_empty()
    }
}

/// Research artifact data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchArtifact {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default)]
    pub findings: ResearchFindings,
    #[serde(default)]
    pub summary: String,
}

/// An epic generated from the product request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    /// Database id, assigned when the surrounding layer persists it.
    pub id: Option<i64>,
    /// Position in the epics list; this is the approval index.
    pub index: usize,
    pub title: String,
    pub goal: String,
    pub scope: String,
    #[serde(default)]
    pub priority: Priority,
    /// Indices of epics this epic depends on.
    #[serde(default)]
    pub dependencies: Vec<usize>,
    #[serde(default)]
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// Given/When/Then acceptance criterion on a story.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    #[serde(default)]
    pub given: String,
    #[serde(default)]
    pub when: String,
    #[serde(default)]
    pub then: String,
}

/// A user story generated from an approved epic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: Option<i64>,
    /// Index of the parent epic in the epics list.
    pub epic_index: usize,
    pub epic_title: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story_points: Option<u32>,
    #[serde(default)]
    pub edge_cases: Vec<String>,
    #[serde(default)]
    pub technical_notes: String,
    #[serde(default)]
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// A technical specification generated from an approved story.
///
/// The structured sections (requirements, api_design, data_model,
/// security_requirements, test_plan) are opaque LLM payloads and stay
/// as raw JSON values; the core only routes them, never interprets
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecDoc {
    pub id: Option<i64>,
    /// Index of the source story in the stories list.
    pub story_index: usize,
    pub story_title: String,
    /// Full specification document (markdown).
    pub content: String,
    #[serde(default)]
    pub requirements: Value,
    #[serde(default)]
    pub api_design: Value,
    #[serde(default)]
    pub data_model: Value,
    #[serde(default)]
    pub security_requirements: Value,
    #[serde(default)]
    pub test_plan: Value,
    /// Optional Mermaid diagrams keyed by diagram name. Enrichment
    /// only; generation failures leave this empty.
    #[serde(default)]
    pub diagrams: BTreeMap<String, String>,
    #[serde(default)]
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// Lifecycle status of a generated code artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Draft,
    Valid,
    Invalid,
}

/// A file-level issue reported by syntax or lint checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIssue {
    pub file: String,
    #[serde(default)]
    pub line: u32,
    pub message: String,
}

/// Outcome of one test case (or the whole suite when the sandbox only
/// reports an aggregate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Aggregated validation results for a code artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    #[serde(default)]
    pub syntax_errors: Vec<FileIssue>,
    #[serde(default)]
    pub lint_errors: Vec<FileIssue>,
    #[serde(default)]
    pub test_results: Vec<TestResult>,
    #[serde(default)]
    pub overall_passed: bool,
}

/// Generated code bundle: a file map plus validation bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub id: Option<i64>,
    /// Ids of the specs this artifact was generated from.
    #[serde(default)]
    pub spec_ids: Vec<Option<i64>>,
    /// Relative path -> full file contents.
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub validation_report: ValidationReport,
    pub status: ArtifactStatus,
    #[serde(default)]
    pub fix_attempts: u32,
}

impl CodeArtifact {
    pub fn draft(spec_ids: Vec<Option<i64>>, files: BTreeMap<String, String>) -> Self {
        Self {
            id: None,
            spec_ids,
            files,
            validation_report: ValidationReport::default(),
            status: ArtifactStatus::Draft,
            fix_attempts: 0,
        }
    }
}

/// The single mutable record threaded through every node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    // Run identification (immutable after creation)
    pub run_id: i64,
    pub project_id: i64,
    pub user_id: i64,

    // Input
    pub product_request: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,

    // Control
    pub current_stage: WorkflowStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    // Per-stage artifacts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research_artifact: Option<ResearchArtifact>,
    #[serde(default)]
    pub epics: Vec<Epic>,
    /// Mermaid diagram of epic dependencies.
    #[serde(default)]
    pub epic_dependency_graph: String,
    #[serde(default)]
    pub stories: Vec<Story>,
    #[serde(default)]
    pub specs: Vec<SpecDoc>,
    /// At most one artifact in this workflow's usage.
    #[serde(default)]
    pub code_artifacts: Vec<CodeArtifact>,

    // Validation
    #[serde(default)]
    pub validation_passed: bool,
    #[serde(default)]
    pub validation_errors: Vec<String>,

    // HITL gates
    #[serde(default)]
    pub awaiting_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_type: Option<ApprovalKind>,
    #[serde(default)]
    pub approval_ids: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_feedback: Option<String>,

    // Retry tracking
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
}

impl WorkflowState {
    /// Create the initial workflow state for a fresh run.
    pub fn initial(
        run_id: i64,
        project_id: i64,
        user_id: i64,
        product_request: impl Into<String>,
        constraints: Option<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            run_id,
            project_id,
            user_id,
            product_request: product_request.into(),
            constraints,
            current_stage: WorkflowStage::Research,
            error_message: None,
            research_artifact: None,
            epics: Vec::new(),
            epic_dependency_graph: String::new(),
            stories: Vec::new(),
            specs: Vec::new(),
            code_artifacts: Vec::new(),
            validation_passed: false,
            validation_errors: Vec::new(),
            awaiting_approval: false,
            approval_type: None,
            approval_ids: Vec::new(),
            user_feedback: None,
            retry_count: 0,
            max_retries,
        }
    }

    /// Serialize for checkpoint storage. Enums become their string
    /// values on the wire.
    pub fn to_snapshot(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Restore from a checkpoint snapshot.
    pub fn from_snapshot(snapshot: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(snapshot)
    }

    /// Number of items in the list addressed by an approval kind.
    pub fn item_count(&self, kind: ApprovalKind) -> usize {
        match kind {
            ApprovalKind::Epic => self.epics.len(),
            ApprovalKind::Story => self.stories.len(),
            ApprovalKind::Spec => self.specs.len(),
        }
    }

    /// Enforce the pause invariant: a suspended run must name an
    /// approval kind, and its approval ids must index valid entries in
    /// the matching list.
    pub fn validate_approval_invariant(&self) -> WorkflowResult<()> {
        if !self.awaiting_approval {
            return Ok(());
        }
        let kind = self.approval_type.ok_or_else(|| {
            WorkflowError::InvalidApproval("awaiting approval without an approval type".into())
        })?;
        let len = self.item_count(kind);
        if let Some(bad) = self.approval_ids.iter().find(|&&i| i >= len) {
            return Err(WorkflowError::InvalidApproval(format!(
                "approval index {} out of range for {} {} item(s)",
                bad, len, kind
            )));
        }
        Ok(())
    }
}

/// Partial state update returned by a node and merged by the runner.
///
/// `None` leaves a field untouched. The doubly-optional fields
/// (`error_message`, `user_feedback`, `approval_type`) distinguish
/// "leave alone" from "clear".
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub current_stage: Option<WorkflowStage>,
    pub error_message: Option<Option<String>>,
    pub research_artifact: Option<ResearchArtifact>,
    pub epics: Option<Vec<Epic>>,
    pub epic_dependency_graph: Option<String>,
    pub stories: Option<Vec<Story>>,
    pub specs: Option<Vec<SpecDoc>>,
    pub code_artifacts: Option<Vec<CodeArtifact>>,
    pub validation_passed: Option<bool>,
    pub validation_errors: Option<Vec<String>>,
    pub awaiting_approval: Option<bool>,
    pub approval_type: Option<Option<ApprovalKind>>,
    pub approval_ids: Option<Vec<usize>>,
    pub user_feedback: Option<Option<String>>,
    pub retry_count: Option<u32>,
}

impl StateUpdate {
    /// Update that fails the run with an explanatory message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            current_stage: Some(WorkflowStage::Failed),
            error_message: Some(Some(message.into())),
            ..Self::default()
        }
    }

    /// Merge this update into the full state. Only the runner calls
    /// this.
    pub fn apply(self, state: &mut WorkflowState) {
        if let Some(stage) = self.current_stage {
            state.current_stage = stage;
        }
        if let Some(msg) = self.error_message {
            state.error_message = msg;
        }
        if let Some(artifact) = self.research_artifact {
            state.research_artifact = Some(artifact);
        }
        if let Some(epics) = self.epics {
            state.epics = epics;
        }
        if let Some(graph) = self.epic_dependency_graph {
            state.epic_dependency_graph = graph;
        }
        if let Some(stories) = self.stories {
            state.stories = stories;
        }
        if let Some(specs) = self.specs {
            state.specs = specs;
        }
        if let Some(artifacts) = self.code_artifacts {
            state.code_artifacts = artifacts;
        }
        if let Some(passed) = self.validation_passed {
            state.validation_passed = passed;
        }
        if let Some(errors) = self.validation_errors {
            state.validation_errors = errors;
        }
        if let Some(awaiting) = self.awaiting_approval {
            state.awaiting_approval = awaiting;
        }
        if let Some(kind) = self.approval_type {
            state.approval_type = kind;
        }
        if let Some(ids) = self.approval_ids {
            state.approval_ids = ids;
        }
        if let Some(feedback) = self.user_feedback {
            state.user_feedback = feedback;
        }
        if let Some(count) = self.retry_count {
            state.retry_count = count;
        }
    }
}
