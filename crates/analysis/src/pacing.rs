use crate::aggregator::{Aggregator, mean};
use extract::{ChunkMetrics, PacingChunkResult};
use ingest::Chunk;
use serde::Serialize;

/// One chunk's entry. Chunks whose answer held no usable JSON keep the raw
/// answer under `analysis` and carry no metrics.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkPacing {
    pub chunk: usize,
    #[serde(flatten)]
    pub result: Option<PacingChunkResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallPacing {
    pub total_words: usize,
    pub action_percentage: f64,
    pub dialogue_percentage: f64,
    pub description_percentage: f64,
    pub pacing_issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PacingAnalysis {
    pub overall_metrics: OverallPacing,
    pub chunk_analyses: Vec<ChunkPacing>,
    pub summary: String,
}

pub struct PacingAggregator {
    total_words: usize,
    total_chunks: usize,
    chunk_analyses: Vec<ChunkPacing>,
    pacing_issues: Vec<String>,
}

impl PacingAggregator {
    pub fn new(total_words: usize, total_chunks: usize) -> Self {
        Self {
            total_words,
            total_chunks,
            chunk_analyses: Vec::new(),
            pacing_issues: Vec::new(),
        }
    }
}

impl Aggregator for PacingAggregator {
    type Partial = PacingChunkResult;
    type Output = PacingAnalysis;

    fn absorb(&mut self, chunk: &Chunk, _total_chunks: usize, partial: PacingChunkResult) {
        self.pacing_issues.extend(partial.issues.iter().cloned());
        self.chunk_analyses.push(ChunkPacing {
            chunk: chunk.number(),
            result: Some(partial),
            analysis: None,
        });
    }

    fn record_unparseable(&mut self, chunk: &Chunk, _total_chunks: usize, raw: &str) {
        self.chunk_analyses.push(ChunkPacing {
            chunk: chunk.number(),
            result: None,
            analysis: Some(raw.to_string()),
        });
    }

    fn finish(self) -> PacingAnalysis {
        let measured: Vec<&ChunkMetrics> = self
            .chunk_analyses
            .iter()
            .filter_map(|entry| entry.result.as_ref()?.chunk_metrics.as_ref())
            .collect();

        let average = |pick: fn(&ChunkMetrics) -> f64| {
            let values: Vec<f64> = measured.iter().map(|metrics| pick(metrics)).collect();
            mean(&values)
        };

        let overall = OverallPacing {
            total_words: self.total_words,
            action_percentage: average(|m: &ChunkMetrics| m.action_percentage),
            dialogue_percentage: average(|m: &ChunkMetrics| m.dialogue_percentage),
            description_percentage: average(|m: &ChunkMetrics| m.description_percentage),
            pacing_issues: self.pacing_issues,
        };

        let summary = format!(
            "Analyzed {} chunks totaling {} words. Average composition: {:.0}% action, {:.0}% dialogue, {:.0}% description.",
            self.total_chunks,
            overall.total_words,
            overall.action_percentage,
            overall.dialogue_percentage,
            overall.description_percentage,
        );

        PacingAnalysis {
            overall_metrics: overall,
            chunk_analyses: self.chunk_analyses,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::chunk_at;
    use serde_json::json;

    fn partial(value: serde_json::Value) -> PacingChunkResult {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_means_skip_chunks_without_metrics() {
        let mut aggregator = PacingAggregator::new(900, 3);
        aggregator.absorb(
            &chunk_at(0, "a", 0),
            3,
            partial(json!({
                "chunk_metrics": {"action_percentage": 40, "dialogue_percentage": 30, "description_percentage": 30},
                "issues": ["slow opening"]
            })),
        );
        aggregator.absorb(
            &chunk_at(1, "b", 2),
            3,
            partial(json!({"pacing_notes": ["no metrics here"], "issues": ["slow opening"]})),
        );
        aggregator.absorb(
            &chunk_at(2, "c", 4),
            3,
            partial(json!({
                "chunk_metrics": {"action_percentage": 20, "dialogue_percentage": 50, "description_percentage": 30}
            })),
        );

        let result = aggregator.finish();
        let overall = &result.overall_metrics;
        assert_eq!(overall.action_percentage, 30.0);
        assert_eq!(overall.dialogue_percentage, 40.0);
        assert_eq!(overall.description_percentage, 30.0);
        // concatenated, not deduplicated
        assert_eq!(overall.pacing_issues, vec!["slow opening", "slow opening"]);

        let chunks: Vec<usize> = result.chunk_analyses.iter().map(|c| c.chunk).collect();
        assert_eq!(chunks, vec![1, 2, 3]);
        assert_eq!(
            result.summary,
            "Analyzed 3 chunks totaling 900 words. Average composition: 30% action, 40% dialogue, 30% description."
        );
    }

    #[test]
    fn test_failed_chunks_are_not_zeroes() {
        // chunk 1 never arrives
        let mut aggregator = PacingAggregator::new(100, 2);
        aggregator.absorb(
            &chunk_at(1, "b", 2),
            2,
            partial(json!({"chunk_metrics": {"action_percentage": 80}})),
        );

        let result = aggregator.finish();
        assert_eq!(result.overall_metrics.action_percentage, 80.0);
        assert_eq!(result.chunk_analyses.len(), 1);
    }

    #[test]
    fn test_extra_fields_survive() {
        let mut aggregator = PacingAggregator::new(10, 1);
        aggregator.absorb(
            &chunk_at(0, "a", 0),
            1,
            partial(json!({"tension_trend": "rising"})),
        );

        let value = serde_json::to_value(aggregator.finish()).unwrap();
        assert_eq!(value["chunk_analyses"][0]["tension_trend"], json!("rising"));
        assert_eq!(value["chunk_analyses"][0]["chunk"], json!(1));
        assert_eq!(value["overall_metrics"]["action_percentage"], json!(0.0));
    }

    #[test]
    fn test_unparseable_answers_are_listed_without_metrics() {
        let mut aggregator = PacingAggregator::new(50, 2);
        aggregator.record_unparseable(&chunk_at(0, "a", 0), 2, "The pacing feels brisk.");
        aggregator.absorb(
            &chunk_at(1, "b", 2),
            2,
            partial(json!({"chunk_metrics": {"action_percentage": 60}})),
        );

        let result = aggregator.finish();
        assert_eq!(result.overall_metrics.action_percentage, 60.0);
        assert_eq!(result.chunk_analyses.len(), 2);

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value["chunk_analyses"][0],
            json!({"chunk": 1, "analysis": "The pacing feels brisk."})
        );
        assert!(value["chunk_analyses"][1].get("analysis").is_none());
    }
}
