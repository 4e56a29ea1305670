pub mod aggregator;
pub mod characters;
pub mod consistency;
pub mod error;
pub mod orchestrator;
pub mod pacing;
pub mod pov;

pub use aggregator::Aggregator;
pub use characters::{CharacterAggregator, CharacterAnalysis, CharacterProfile};
pub use consistency::{ConsistencyAggregator, ConsistencyReport, TaggedEvent, TaggedIssue};
pub use error::AnalysisError;
pub use orchestrator::{AnalysisOrchestrator, AnalysisOutcome, RunHandle};
pub use pacing::{PacingAggregator, PacingAnalysis};
pub use pov::{NarratorShare, PovAggregator, PovDistribution};
