use extract::AnalysisKind;
use store::StoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("manuscript {0} not found")]
    ManuscriptNotFound(Uuid),

    #[error("manuscript {0} has no extracted text to analyze")]
    MissingText(Uuid),

    #[error("a {kind} analysis is already running for manuscript {manuscript_id}")]
    AlreadyRunning {
        manuscript_id: Uuid,
        kind: AnalysisKind,
    },

    /// The run reached `failed`; `message` is what was recorded on it.
    #[error("analysis run {run_id} failed: {message}")]
    RunFailed { run_id: Uuid, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
