//! Service traits the workflow nodes depend on.
//!
//! The runner is handed implementations of these at construction, so
//! tests can script outcomes without a network or a Python toolchain.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::errors::ServiceResult;
use crate::state::{Epic, FileIssue, ResearchArtifact, SpecDoc, Story, TestResult};

/// Epics plus the Mermaid dependency graph produced alongside them.
#[derive(Debug, Clone, Default)]
pub struct EpicBatch {
    pub epics: Vec<Epic>,
    pub dependency_graph: String,
}

/// LLM-backed content generation for every pipeline stage.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Research the product request: technologies, patterns, security
    /// considerations, data model and API hints.
    async fn research(
        &self,
        product_request: &str,
        constraints: Option<&str>,
    ) -> ServiceResult<ResearchArtifact>;

    /// Break the product request into epics. `feedback` carries
    /// rejection notes from a previous review round.
    async fn generate_epics(
        &self,
        product_request: &str,
        constraints: Option<&str>,
        research: &ResearchArtifact,
        feedback: Option<&str>,
    ) -> ServiceResult<EpicBatch>;

    /// Expand approved epics into user stories.
    async fn generate_stories(
        &self,
        epics: &[Epic],
        product_request: &str,
        feedback: Option<&str>,
    ) -> ServiceResult<Vec<Story>>;

    /// Write a technical specification for one approved story.
    async fn generate_spec(
        &self,
        story: &Story,
        product_request: &str,
        research_summary: &str,
        feedback: Option<&str>,
    ) -> ServiceResult<SpecDoc>;

    /// Optional Mermaid diagrams for a spec. Failures here never fail
    /// the stage; callers drop the error and continue.
    async fn generate_diagrams(&self, spec: &SpecDoc) -> ServiceResult<BTreeMap<String, String>>;

    /// Generate the backend codebase from approved specs. Returns a
    /// map of relative path to file contents.
    async fn generate_code(
        &self,
        specs: &[SpecDoc],
        product_request: &str,
    ) -> ServiceResult<BTreeMap<String, String>>;

    /// Repair code that failed validation. Returns only the files
    /// that changed; the caller merges them over the artifact.
    async fn fix_code(
        &self,
        files: &BTreeMap<String, String>,
        errors: &[String],
    ) -> ServiceResult<BTreeMap<String, String>>;
}

/// Sandboxed checks run against a generated file map.
#[async_trait]
pub trait ValidationService: Send + Sync {
    /// Per-file syntax check.
    async fn check_syntax(
        &self,
        files: &BTreeMap<String, String>,
    ) -> ServiceResult<Vec<FileIssue>>;

    /// Lint pass over the whole file map.
    async fn lint(&self, files: &BTreeMap<String, String>) -> ServiceResult<Vec<FileIssue>>;

    /// Execute the artifact's own tests.
    async fn run_tests(&self, files: &BTreeMap<String, String>) -> ServiceResult<Vec<TestResult>>;
}
