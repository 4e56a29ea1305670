use crate::aggregator::Aggregator;
use extract::{PovChunkResult, PovSegmentClaim};
use ingest::Chunk;
use serde::Serialize;
use std::collections::HashMap;
use store::NewPovSegment;

/// Per-narrator totals across the manuscript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarratorShare {
    pub name: String,
    pub word_count: usize,
    pub percentage: f64,
    pub segments: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PovSummary {
    pub total_words: usize,
    pub characters_detected: Vec<NarratorShare>,
    pub pov_switches: usize,
    pub average_segment_length: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PovDistribution {
    /// Segments with positions absolute in the manuscript
    pub segments: Vec<PovSegmentClaim>,
    pub summary: PovSummary,
}

impl PovDistribution {
    pub fn segment_records(&self) -> Vec<NewPovSegment> {
        self.segments
            .iter()
            .map(|segment| NewPovSegment {
                character_name: segment.character.clone(),
                start_position: segment.start_position,
                end_position: segment.end_position,
                word_count: segment.word_count,
                confidence: segment.confidence,
                chapter: segment.chapter.clone(),
                section: segment.section.clone(),
            })
            .collect()
    }
}

pub struct PovAggregator {
    total_words: usize,
    segments: Vec<PovSegmentClaim>,
    // (name, word_count, segments) in first-seen order
    narrators: Vec<(String, usize, usize)>,
    by_name: HashMap<String, usize>,
}

impl PovAggregator {
    /// `total_words` is the whitespace word count of the whole manuscript.
    pub fn new(total_words: usize) -> Self {
        Self {
            total_words,
            segments: Vec::new(),
            narrators: Vec::new(),
            by_name: HashMap::new(),
        }
    }
}

impl Aggregator for PovAggregator {
    type Partial = PovChunkResult;
    type Output = PovDistribution;

    fn absorb(&mut self, chunk: &Chunk, _total_chunks: usize, partial: PovChunkResult) {
        for mut segment in partial.segments {
            if segment.character.trim().is_empty() {
                continue;
            }
            // Positions and counts come from the model and may be absurd.
            segment.start_position = segment.start_position.saturating_add(chunk.offset);
            segment.end_position = segment.end_position.saturating_add(chunk.offset);

            let slot = match self.by_name.get(&segment.character) {
                Some(&slot) => slot,
                None => {
                    self.narrators.push((segment.character.clone(), 0, 0));
                    self.by_name
                        .insert(segment.character.clone(), self.narrators.len() - 1);
                    self.narrators.len() - 1
                }
            };
            let (_, words, count) = &mut self.narrators[slot];
            *words = words.saturating_add(segment.word_count);
            *count += 1;

            self.segments.push(segment);
        }
    }

    fn finish(self) -> PovDistribution {
        let total_words = self.total_words;
        let characters_detected = self
            .narrators
            .into_iter()
            .map(|(name, word_count, segments)| NarratorShare {
                name,
                word_count,
                percentage: if total_words == 0 {
                    0.0
                } else {
                    word_count as f64 / total_words as f64 * 100.0
                },
                segments,
            })
            .collect();

        let lengths: Vec<f64> = self.segments.iter().map(|s| s.word_count as f64).collect();

        PovDistribution {
            summary: PovSummary {
                total_words,
                characters_detected,
                pov_switches: self.segments.len().saturating_sub(1),
                average_segment_length: crate::aggregator::mean(&lengths),
            },
            segments: self.segments,
        }
    }
}
