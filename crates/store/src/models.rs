use chrono::{DateTime, Utc};
use extract::AnalysisKind;
use ingest::{ManuscriptFormat, UploadType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Lifecycle of an analysis run.
///
/// `Pending -> InProgress -> {Completed, Failed}`; the last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manuscript {
    pub id: Uuid,
    pub file_name: String,
    pub file_path: String,
    pub format: ManuscriptFormat,
    pub word_count: usize,
    pub upload_type: UploadType,
    pub extracted_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Manuscript {
    /// The text to analyse, if there is any beyond whitespace.
    pub fn analyzable_text(&self) -> Option<&str> {
        self.extracted_text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct NewManuscript {
    pub file_name: String,
    pub file_path: String,
    pub format: ManuscriptFormat,
    pub word_count: usize,
    pub upload_type: UploadType,
    pub extracted_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: Uuid,
    pub manuscript_id: Uuid,
    #[serde(rename = "analysis_type")]
    pub kind: AnalysisKind,
    pub status: RunStatus,
    pub results: Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPovSegment {
    pub character_name: String,
    pub start_position: usize,
    pub end_position: usize,
    pub word_count: usize,
    pub confidence: f64,
    pub chapter: Option<String>,
    pub section: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PovSegmentRecord {
    pub id: i64,
    pub analysis_run_id: Uuid,
    pub manuscript_id: Uuid,
    pub character_name: String,
    pub start_position: usize,
    pub end_position: usize,
    pub word_count: usize,
    pub confidence: f64,
    pub chapter: Option<String>,
    pub section: Option<String>,
    pub created_at: DateTime<Utc>,
}
