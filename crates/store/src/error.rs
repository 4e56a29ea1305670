use thiserror::Error;
use uuid::Uuid;

use crate::models::RunStatus;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode results: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("analysis run {0} not found")]
    RunNotFound(Uuid),

    #[error("analysis run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: Uuid,
        from: RunStatus,
        to: RunStatus,
    },
}

/// Column value the store wrote itself but can no longer interpret
#[derive(Debug, Error)]
#[error("unrecognised value {0:?}")]
pub(crate) struct UnknownValue(pub String);
