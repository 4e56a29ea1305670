mod lenient;
pub mod json;
pub mod llm;
pub mod prompt;
pub mod schema;

pub use json::{ExtractionError, extract_partial, extract_structured};
pub use llm::{AnthropicClient, ModelInvoker, OllamaClient};
pub use prompt::build_analysis_prompt;
pub use schema::{
    AnalysisKind, ChunkMetrics, CharacterChunkResult, CharacterSighting, ConsistencyChunkResult,
    ConsistencyIssue, PacingChunkResult, PovChunkResult, PovSegmentClaim, Severity, TimelineEvent,
    UnknownAnalysisKind,
};
