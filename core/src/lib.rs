//! Codeloom core: a checkpointed workflow engine that turns a product
//! request into generated backend code through research, epic, story,
//! and spec stages, with human approval gates between them and a
//! validation/auto-fix loop at the end.

pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod graph;
pub mod nodes;
pub mod providers;
pub mod runner;
pub mod state;
pub mod traits;
pub mod validators;

pub use checkpoint::{Checkpointer, MemoryCheckpointer, SqliteCheckpointer};
pub use config::Config;
pub use errors::{
    CheckpointError, CheckpointResult, ServiceError, ServiceResult, WorkflowError, WorkflowResult,
};
pub use providers::OpenAiGenerator;
pub use runner::{ApprovalDecision, RunRequest, WorkflowRunner};
pub use state::{ApprovalKind, ApprovalStatus, StateUpdate, WorkflowStage, WorkflowState};
pub use traits::{GenerationService, ValidationService};
pub use validators::PythonToolchainValidator;
