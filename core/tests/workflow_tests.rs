//! End-to-end workflow tests over scripted generation and validation
//! backends.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use codeloom_core::checkpoint::{Checkpointer, MemoryCheckpointer};
use codeloom_core::config::WorkflowConfig;
use codeloom_core::errors::{ServiceError, ServiceResult};
use codeloom_core::runner::{ApprovalDecision, RunRequest, WorkflowRunner};
use codeloom_core::state::{
    AcceptanceCriterion, ApprovalKind, ApprovalStatus, Epic, FileIssue, Priority,
    ResearchArtifact, ResearchFindings, SpecDoc, StateUpdate, Story, TestResult, WorkflowStage,
};
use codeloom_core::traits::{EpicBatch, GenerationService, ValidationService};
use codeloom_core::WorkflowError;

/// Scripted generation backend. Counters control how many rounds
/// misbehave before behaving.
#[derive(Default)]
struct FakeGeneration {
    /// Rounds of research that return no findings before one that
    /// does.
    empty_research_rounds: AtomicU32,
    /// Feedback passed to each epic generation call, in order.
    epic_feedback: Mutex<Vec<Option<String>>>,
    /// When set, diagram generation fails every time.
    diagrams_fail: bool,
}

#[async_trait]
impl GenerationService for FakeGeneration {
    async fn research(
        &self,
        _product_request: &str,
        _constraints: Option<&str>,
    ) -> ServiceResult<ResearchArtifact> {
        let remaining = self.empty_research_rounds.load(Ordering::SeqCst);
        if remaining > 0 {
            self.empty_research_rounds.store(remaining - 1, Ordering::SeqCst);
            return Ok(ResearchArtifact::default());
        }
        Ok(ResearchArtifact {
            urls: vec![],
            queries: vec![],
            findings: ResearchFindings {
                key_technologies: vec!["fastapi".into()],
                summary: "Use FastAPI with SQLite".into(),
                ..ResearchFindings::default()
            },
            summary: "Use FastAPI with SQLite".into(),
        })
    }

    async fn generate_epics(
        &self,
        _product_request: &str,
        _constraints: Option<&str>,
        _research: &ResearchArtifact,
        feedback: Option<&str>,
    ) -> ServiceResult<EpicBatch> {
        self.epic_feedback
            .lock()
            .unwrap()
            .push(feedback.map(String::from));
        let epics = vec![
            Epic {
                id: None,
                index: 0,
                title: "Epic A".into(),
                goal: "Do A".into(),
                scope: "A".into(),
                priority: Priority::High,
                dependencies: vec![],
                status: Default::default(),
                feedback: None,
            },
            Epic {
                id: None,
                index: 1,
                title: "Epic B".into(),
                goal: "Do B".into(),
                scope: "B".into(),
                priority: Priority::Medium,
                dependencies: vec![0],
                status: Default::default(),
                feedback: None,
            },
        ];
        Ok(EpicBatch {
            epics,
            dependency_graph: "graph TD\n  A --> B".into(),
        })
    }

    async fn generate_stories(
        &self,
        epics: &[Epic],
        _product_request: &str,
        _feedback: Option<&str>,
    ) -> ServiceResult<Vec<Story>> {
        Ok(epics
            .iter()
            .map(|e| Story {
                id: None,
                epic_index: e.index,
                epic_title: e.title.clone(),
                title: format!("Story for {}", e.title),
                description: "As a user...".into(),
                acceptance_criteria: vec![AcceptanceCriterion {
                    given: "a thing".into(),
                    when: "it happens".into(),
                    then: "it works".into(),
                }],
                priority: e.priority,
                story_points: Some(3),
                edge_cases: vec![],
                technical_notes: String::new(),
                status: Default::default(),
                feedback: None,
            })
            .collect())
    }

    async fn generate_spec(
        &self,
        story: &Story,
        _product_request: &str,
        _research_summary: &str,
        _feedback: Option<&str>,
    ) -> ServiceResult<SpecDoc> {
        Ok(SpecDoc {
            id: None,
            story_index: 0,
            story_title: story.title.clone(),
            content: format!("# Spec\n\n{}", story.title),
            requirements: serde_json::Value::Null,
            api_design: serde_json::Value::Null,
            data_model: serde_json::Value::Null,
            security_requirements: serde_json::Value::Null,
            test_plan: serde_json::Value::Null,
            diagrams: BTreeMap::new(),
            status: Default::default(),
            feedback: None,
        })
    }

    async fn generate_diagrams(&self, _spec: &SpecDoc) -> ServiceResult<BTreeMap<String, String>> {
        if self.diagrams_fail {
            return Err(ServiceError::BackendError("diagram model unavailable".into()));
        }
        let mut diagrams = BTreeMap::new();
        diagrams.insert("sequence".into(), "sequenceDiagram".into());
        Ok(diagrams)
    }

    async fn generate_code(
        &self,
        _specs: &[SpecDoc],
        _product_request: &str,
    ) -> ServiceResult<BTreeMap<String, String>> {
        let mut files = BTreeMap::new();
        files.insert("app/main.py".into(), "print('ok')".into());
        files.insert("tests/test_main.py".into(), "def test_ok(): pass".into());
        Ok(files)
    }

    async fn fix_code(
        &self,
        _files: &BTreeMap<String, String>,
        _errors: &[String],
    ) -> ServiceResult<BTreeMap<String, String>> {
        let mut fixed = BTreeMap::new();
        fixed.insert("app/main.py".into(), "print('fixed')".into());
        Ok(fixed)
    }
}

/// Scripted validator: fails syntax for the first N rounds.
#[derive(Default)]
struct FakeValidation {
    failing_rounds: AtomicU32,
}

#[async_trait]
impl ValidationService for FakeValidation {
    async fn check_syntax(
        &self,
        _files: &BTreeMap<String, String>,
    ) -> ServiceResult<Vec<FileIssue>> {
        let remaining = self.failing_rounds.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_rounds.store(remaining - 1, Ordering::SeqCst);
            return Ok(vec![FileIssue {
                file: "app/main.py".into(),
                line: 1,
                message: "invalid syntax".into(),
            }]);
        }
        Ok(vec![])
    }

    async fn lint(&self, _files: &BTreeMap<String, String>) -> ServiceResult<Vec<FileIssue>> {
        Ok(vec![])
    }

    async fn run_tests(&self, _files: &BTreeMap<String, String>) -> ServiceResult<Vec<TestResult>> {
        Ok(vec![TestResult {
            test_name: "pytest".into(),
            passed: true,
            error_message: None,
        }])
    }
}

fn make_runner(
    generation: Arc<FakeGeneration>,
    validation: Arc<FakeValidation>,
    checkpointer: Arc<MemoryCheckpointer>,
) -> WorkflowRunner {
    WorkflowRunner::new(generation, validation, checkpointer, WorkflowConfig::default()).unwrap()
}

fn request(run_id: i64) -> RunRequest {
    RunRequest {
        run_id,
        project_id: 1,
        user_id: 1,
        product_request: "Build a task tracker API".into(),
        constraints: None,
    }
}

fn approve_all(count: usize) -> Vec<ApprovalDecision> {
    (0..count)
        .map(|index| ApprovalDecision {
            index,
            approved: true,
            feedback: None,
        })
        .collect()
}

#[tokio::test]
async fn happy_path_reaches_completed() {
    let generation = Arc::new(FakeGeneration::default());
    let validation = Arc::new(FakeValidation::default());
    let store = Arc::new(MemoryCheckpointer::new());
    let runner = make_runner(generation, validation, store);

    // Research through epic generation, then suspend at the gate.
    let state = runner.start(request(1)).await.unwrap();
    assert_eq!(state.current_stage, WorkflowStage::EpicReview);
    assert!(state.awaiting_approval);
    assert_eq!(state.approval_type, Some(ApprovalKind::Epic));
    assert_eq!(state.approval_ids, vec![0, 1]);
    assert_eq!(state.epics.len(), 2);
    assert!(state.epic_dependency_graph.contains("graph TD"));

    let state = runner
        .approve_items(1, ApprovalKind::Epic, &approve_all(2))
        .await
        .unwrap();
    assert_eq!(state.current_stage, WorkflowStage::StoryReview);
    assert_eq!(state.approval_type, Some(ApprovalKind::Story));
    assert_eq!(state.stories.len(), 2);

    let state = runner
        .approve_items(1, ApprovalKind::Story, &approve_all(2))
        .await
        .unwrap();
    assert_eq!(state.current_stage, WorkflowStage::SpecReview);
    assert_eq!(state.specs.len(), 2);
    assert!(state.specs[0].diagrams.contains_key("sequence"));

    let state = runner
        .approve_items(1, ApprovalKind::Spec, &approve_all(2))
        .await
        .unwrap();
    assert_eq!(state.current_stage, WorkflowStage::Completed);
    assert!(state.validation_passed);
    assert!(!state.awaiting_approval);
    assert_eq!(state.code_artifacts.len(), 1);
    assert!(state.code_artifacts[0].files.contains_key("app/main.py"));
}

#[tokio::test]
async fn rejection_regenerates_with_feedback() {
    let generation = Arc::new(FakeGeneration::default());
    let validation = Arc::new(FakeValidation::default());
    let store = Arc::new(MemoryCheckpointer::new());
    let runner = make_runner(generation.clone(), validation, store);

    runner.start(request(1)).await.unwrap();

    let decisions = vec![
        ApprovalDecision {
            index: 0,
            approved: true,
            feedback: None,
        },
        ApprovalDecision {
            index: 1,
            approved: false,
            feedback: Some("too broad".into()),
        },
    ];
    let state = runner
        .approve_items(1, ApprovalKind::Epic, &decisions)
        .await
        .unwrap();

    // Regeneration ran and the run is suspended at the gate again.
    assert_eq!(state.current_stage, WorkflowStage::EpicReview);
    assert!(state.awaiting_approval);
    assert!(state.epics.iter().all(|e| e.feedback.is_none()));
    assert!(state.user_feedback.is_none());

    let feedback_log = generation.epic_feedback.lock().unwrap().clone();
    assert_eq!(feedback_log.len(), 2);
    assert!(feedback_log[0].is_none());
    let fb = feedback_log[1].as_deref().unwrap();
    assert!(fb.contains("- Epic B: too broad"));
}

#[tokio::test]
async fn research_retries_then_succeeds() {
    let generation = Arc::new(FakeGeneration::default());
    generation.empty_research_rounds.store(1, Ordering::SeqCst);
    let validation = Arc::new(FakeValidation::default());
    let store = Arc::new(MemoryCheckpointer::new());
    let runner = make_runner(generation, validation, store);

    let state = runner.start(request(1)).await.unwrap();
    assert_eq!(state.current_stage, WorkflowStage::EpicReview);
    assert_eq!(state.retry_count, 1);
}

#[tokio::test]
async fn research_exhausts_retries_and_fails() {
    let generation = Arc::new(FakeGeneration::default());
    generation.empty_research_rounds.store(10, Ordering::SeqCst);
    let validation = Arc::new(FakeValidation::default());
    let store = Arc::new(MemoryCheckpointer::new());
    let runner = make_runner(generation, validation, store);

    let state = runner.start(request(1)).await.unwrap();
    assert_eq!(state.current_stage, WorkflowStage::Failed);
    assert!(state
        .error_message
        .as_deref()
        .unwrap()
        .contains("no findings"));
}

#[tokio::test]
async fn validation_failure_is_auto_fixed() {
    let generation = Arc::new(FakeGeneration::default());
    let validation = Arc::new(FakeValidation::default());
    validation.failing_rounds.store(2, Ordering::SeqCst);
    let store = Arc::new(MemoryCheckpointer::new());
    let runner = make_runner(generation, validation, store);

    runner.start(request(1)).await.unwrap();
    runner
        .approve_items(1, ApprovalKind::Epic, &approve_all(2))
        .await
        .unwrap();
    runner
        .approve_items(1, ApprovalKind::Story, &approve_all(2))
        .await
        .unwrap();
    let state = runner
        .approve_items(1, ApprovalKind::Spec, &approve_all(2))
        .await
        .unwrap();

    // The fix counter includes the syntax pre-check inside auto-fix,
    // so two failing validation rounds need two fix attempts.
    assert_eq!(state.current_stage, WorkflowStage::Completed);
    assert!(state.validation_passed);
    assert!(state.code_artifacts[0].fix_attempts >= 1);
    assert_eq!(state.code_artifacts[0].files["app/main.py"], "print('fixed')");
}

#[tokio::test]
async fn validation_failure_exhausts_fix_budget() {
    let generation = Arc::new(FakeGeneration::default());
    let validation = Arc::new(FakeValidation::default());
    validation.failing_rounds.store(100, Ordering::SeqCst);
    let store = Arc::new(MemoryCheckpointer::new());
    let runner = make_runner(generation, validation, store);

    runner.start(request(1)).await.unwrap();
    runner
        .approve_items(1, ApprovalKind::Epic, &approve_all(2))
        .await
        .unwrap();
    runner
        .approve_items(1, ApprovalKind::Story, &approve_all(2))
        .await
        .unwrap();
    let state = runner
        .approve_items(1, ApprovalKind::Spec, &approve_all(2))
        .await
        .unwrap();

    assert_eq!(state.current_stage, WorkflowStage::Failed);
    assert!(!state.validation_passed);
    assert!(!state.validation_errors.is_empty());
    assert!(state.validation_errors[0].starts_with("Syntax: app/main.py:1"));
    assert_eq!(
        state.error_message.as_deref(),
        Some("Failed to fix code after 3 attempts")
    );
}

#[tokio::test]
async fn diagram_failure_does_not_fail_spec_stage() {
    let generation = Arc::new(FakeGeneration {
        diagrams_fail: true,
        ..FakeGeneration::default()
    });
    let validation = Arc::new(FakeValidation::default());
    let store = Arc::new(MemoryCheckpointer::new());
    let runner = make_runner(generation, validation, store);

    runner.start(request(1)).await.unwrap();
    runner
        .approve_items(1, ApprovalKind::Epic, &approve_all(2))
        .await
        .unwrap();
    let state = runner
        .approve_items(1, ApprovalKind::Story, &approve_all(2))
        .await
        .unwrap();

    assert_eq!(state.current_stage, WorkflowStage::SpecReview);
    assert!(state.specs.iter().all(|s| s.diagrams.is_empty()));
}

#[tokio::test]
async fn resume_from_checkpoint_with_fresh_runner() {
    let generation = Arc::new(FakeGeneration::default());
    let validation = Arc::new(FakeValidation::default());
    let store = Arc::new(MemoryCheckpointer::new());

    {
        let runner = make_runner(generation.clone(), validation.clone(), store.clone());
        let state = runner.start(request(1)).await.unwrap();
        assert!(state.awaiting_approval);
    }

    // A brand new runner over the same store picks the run back up.
    let runner = make_runner(generation, validation, store);
    let state = runner.get_state(1).await.unwrap();
    assert_eq!(state.current_stage, WorkflowStage::EpicReview);

    let state = runner
        .approve_items(1, ApprovalKind::Epic, &approve_all(2))
        .await
        .unwrap();
    assert_eq!(state.current_stage, WorkflowStage::StoryReview);
}

#[tokio::test]
async fn resume_is_idempotent_while_suspended() {
    let generation = Arc::new(FakeGeneration::default());
    let validation = Arc::new(FakeValidation::default());
    let store = Arc::new(MemoryCheckpointer::new());
    let runner = make_runner(generation, validation, store);

    runner.start(request(1)).await.unwrap();
    let first = runner.resume(1, None).await.unwrap();
    let second = runner.resume(1, None).await.unwrap();
    assert_eq!(first.current_stage, WorkflowStage::EpicReview);
    assert_eq!(second.current_stage, WorkflowStage::EpicReview);
    assert!(second.awaiting_approval);
    assert_eq!(second.epics.len(), first.epics.len());
}

#[tokio::test]
async fn resume_merges_updates_before_redriving() {
    let generation = Arc::new(FakeGeneration::default());
    let validation = Arc::new(FakeValidation::default());
    let store = Arc::new(MemoryCheckpointer::new());
    let runner = make_runner(generation, validation, store);

    runner.start(request(1)).await.unwrap();

    // Stamp approvals directly through the updates channel instead of
    // approve_items, then resume through the gate.
    let mut epics = runner.get_state(1).await.unwrap().epics;
    for epic in &mut epics {
        epic.status = ApprovalStatus::Approved;
    }
    let updates = StateUpdate {
        epics: Some(epics),
        awaiting_approval: Some(false),
        ..StateUpdate::default()
    };

    let state = runner.resume(1, Some(updates)).await.unwrap();
    assert_eq!(state.current_stage, WorkflowStage::StoryReview);
    assert_eq!(state.approval_type, Some(ApprovalKind::Story));
    assert_eq!(state.stories.len(), 2);
}

#[tokio::test]
async fn resume_unknown_run_is_rejected() {
    let generation = Arc::new(FakeGeneration::default());
    let validation = Arc::new(FakeValidation::default());
    let store = Arc::new(MemoryCheckpointer::new());
    let runner = make_runner(generation, validation, store);

    let err = runner.resume(99, None).await.unwrap_err();
    assert!(matches!(err, WorkflowError::RunNotFound(99)));
}

#[tokio::test]
async fn get_state_is_idempotent() {
    let generation = Arc::new(FakeGeneration::default());
    let validation = Arc::new(FakeValidation::default());
    let store = Arc::new(MemoryCheckpointer::new());
    let runner = make_runner(generation, validation, store);

    runner.start(request(1)).await.unwrap();
    let first = runner.get_state(1).await.unwrap();
    let second = runner.get_state(1).await.unwrap();
    assert_eq!(
        first.to_snapshot().unwrap(),
        second.to_snapshot().unwrap()
    );
}

#[tokio::test]
async fn partial_approval_stays_suspended() {
    let generation = Arc::new(FakeGeneration::default());
    let validation = Arc::new(FakeValidation::default());
    let store = Arc::new(MemoryCheckpointer::new());
    let runner = make_runner(generation, validation, store);

    runner.start(request(1)).await.unwrap();
    let state = runner
        .approve_items(1, ApprovalKind::Epic, &approve_all(1))
        .await
        .unwrap();

    // One of two decided: the gate re-suspends rather than advancing.
    assert_eq!(state.current_stage, WorkflowStage::EpicReview);
    assert!(state.awaiting_approval);
    assert_eq!(state.approval_type, Some(ApprovalKind::Epic));
}

#[tokio::test]
async fn approval_validation_errors() {
    let generation = Arc::new(FakeGeneration::default());
    let validation = Arc::new(FakeValidation::default());
    let store = Arc::new(MemoryCheckpointer::new());
    let runner = make_runner(generation, validation, store);

    // Unknown run.
    let err = runner
        .approve_items(99, ApprovalKind::Epic, &approve_all(1))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::RunNotFound(99)));

    runner.start(request(1)).await.unwrap();

    // Wrong kind for the gate the run is parked at.
    let err = runner
        .approve_items(1, ApprovalKind::Story, &approve_all(1))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidApproval(_)));

    // Index outside the items under review.
    let decisions = vec![ApprovalDecision {
        index: 7,
        approved: true,
        feedback: None,
    }];
    let err = runner
        .approve_items(1, ApprovalKind::Epic, &decisions)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidApproval(_)));

    // Duplicate run id.
    let err = runner.start(request(1)).await.unwrap_err();
    assert!(matches!(err, WorkflowError::RunAlreadyExists(1)));
}

#[tokio::test]
async fn state_survives_snapshot_round_trip_mid_run() {
    let generation = Arc::new(FakeGeneration::default());
    let validation = Arc::new(FakeValidation::default());
    let store = Arc::new(MemoryCheckpointer::new());
    let runner = make_runner(generation, validation, store.clone());

    runner.start(request(5)).await.unwrap();
    let loaded = store.load(5).await.unwrap().unwrap();
    assert_eq!(loaded.current_stage, WorkflowStage::EpicReview);
    assert_eq!(loaded.approval_type, Some(ApprovalKind::Epic));
    assert_eq!(loaded.epics.len(), 2);
    assert_eq!(runner.list_runs().await.unwrap(), vec![5]);
}
