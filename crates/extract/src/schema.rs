use crate::lenient;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// The four manuscript analyses a run can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    PovDistribution,
    CharacterAnalysis,
    Pacing,
    Consistency,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 4] = [
        AnalysisKind::PovDistribution,
        AnalysisKind::CharacterAnalysis,
        AnalysisKind::Pacing,
        AnalysisKind::Consistency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PovDistribution => "pov_distribution",
            Self::CharacterAnalysis => "character_analysis",
            Self::Pacing => "pacing",
            Self::Consistency => "consistency",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown analysis type: {0}")]
pub struct UnknownAnalysisKind(pub String);

impl FromStr for AnalysisKind {
    type Err = UnknownAnalysisKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownAnalysisKind(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// pov_distribution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PovChunkResult {
    #[serde(default, deserialize_with = "lenient::items")]
    pub segments: Vec<PovSegmentClaim>,
}

/// A span the model attributes to one narrator. Positions are relative to the
/// chunk until the aggregator shifts them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PovSegmentClaim {
    #[serde(default, deserialize_with = "lenient::text")]
    pub character: String,
    #[serde(rename = "startPosition", default, deserialize_with = "lenient::count")]
    pub start_position: usize,
    #[serde(rename = "endPosition", default, deserialize_with = "lenient::count")]
    pub end_position: usize,
    #[serde(rename = "wordCount", default, deserialize_with = "lenient::count")]
    pub word_count: usize,
    #[serde(default, deserialize_with = "lenient::number")]
    pub confidence: f64,
    #[serde(
        default,
        deserialize_with = "lenient::opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub chapter: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub section: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub text_snippet: String,
}

// ---------------------------------------------------------------------------
// character_analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterChunkResult {
    #[serde(default, deserialize_with = "lenient::items")]
    pub characters: Vec<CharacterSighting>,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub main_characters: Vec<String>,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub supporting_characters: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterSighting {
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub traits: Vec<String>,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub relationships: Vec<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub development_arc: Option<String>,
    #[serde(default, alias = "scenes_appeared", deserialize_with = "lenient::count")]
    pub scenes_appeared_in_chunk: usize,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub significance: Option<String>,
}

// ---------------------------------------------------------------------------
// pacing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PacingChunkResult {
    #[serde(
        default,
        deserialize_with = "lenient::or_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub chunk_metrics: Option<ChunkMetrics>,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub pacing_notes: Vec<String>,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub momentum_points: Vec<String>,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub issues: Vec<String>,
    /// Anything else the model returned, kept for display
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetrics {
    #[serde(default, deserialize_with = "lenient::opt_count")]
    pub chunk_number: Option<usize>,
    #[serde(default, deserialize_with = "lenient::opt_count")]
    pub word_count: Option<usize>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub action_percentage: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub dialogue_percentage: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub description_percentage: f64,
    #[serde(default, deserialize_with = "lenient::opt_number")]
    pub average_tension: Option<f64>,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub tension_changes: Vec<String>,
}

// ---------------------------------------------------------------------------
// consistency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyChunkResult {
    #[serde(default, deserialize_with = "lenient::strings")]
    pub character_names: Vec<String>,
    #[serde(default, deserialize_with = "lenient::items")]
    pub issues: Vec<ConsistencyIssue>,
    #[serde(default, deserialize_with = "lenient::items")]
    pub timeline_events: Vec<TimelineEvent>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub chunk_summary: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Value")]
pub enum Severity {
    #[default]
    Minor,
    Moderate,
    Major,
}

/// Anything the model labels outside the three known levels is read as minor.
impl From<Value> for Severity {
    fn from(value: Value) -> Self {
        match value.as_str().map(|s| s.trim().to_lowercase()).as_deref() {
            Some("major") => Severity::Major,
            Some("moderate") => Severity::Moderate,
            _ => Severity::Minor,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyIssue {
    #[serde(rename = "type", default, deserialize_with = "lenient::text")]
    pub issue_type: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, deserialize_with = "lenient::text")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub location: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub suggestion: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    #[serde(default, deserialize_with = "lenient::text")]
    pub event: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub when: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub location: String,
}
