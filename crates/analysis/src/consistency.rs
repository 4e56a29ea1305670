use crate::aggregator::Aggregator;
use extract::{ConsistencyChunkResult, ConsistencyIssue, Severity, TimelineEvent};
use ingest::Chunk;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedIssue {
    #[serde(flatten)]
    pub issue: ConsistencyIssue,
    pub chunk: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedEvent {
    #[serde(flatten)]
    pub event: TimelineEvent,
    pub chunk: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencySummary {
    pub total_chunks_analyzed: usize,
    pub total_issues: usize,
    pub major_issues: usize,
    pub moderate_issues: usize,
    pub minor_issues: usize,
    pub unique_characters: Vec<String>,
    pub timeline_events: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IssuesBySeverity {
    pub major: Vec<TaggedIssue>,
    pub moderate: Vec<TaggedIssue>,
    pub minor: Vec<TaggedIssue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub summary: ConsistencySummary,
    pub issues_by_severity: IssuesBySeverity,
    pub all_issues: Vec<TaggedIssue>,
    pub character_names: Vec<String>,
    pub timeline_events: Vec<TaggedEvent>,
}

pub struct ConsistencyAggregator {
    total_chunks: usize,
    character_names: BTreeSet<String>,
    issues: Vec<TaggedIssue>,
    timeline_events: Vec<TaggedEvent>,
}

impl ConsistencyAggregator {
    pub fn new(total_chunks: usize) -> Self {
        Self {
            total_chunks,
            character_names: BTreeSet::new(),
            issues: Vec::new(),
            timeline_events: Vec::new(),
        }
    }
}

impl Aggregator for ConsistencyAggregator {
    type Partial = ConsistencyChunkResult;
    type Output = ConsistencyReport;

    fn absorb(&mut self, chunk: &Chunk, total_chunks: usize, partial: ConsistencyChunkResult) {
        let number = chunk.number();

        self.character_names.extend(partial.character_names);
        self.issues
            .extend(partial.issues.into_iter().map(|issue| TaggedIssue {
                issue,
                chunk: number,
                total_chunks,
            }));
        self.timeline_events
            .extend(partial.timeline_events.into_iter().map(|event| TaggedEvent {
                event,
                chunk: number,
            }));
    }

    /// The model's raw answer is kept as a minor issue so the writer can
    /// still read it. Chunks the model never answered leave no trace.
    fn record_unparseable(&mut self, chunk: &Chunk, total_chunks: usize, raw: &str) {
        let number = chunk.number();
        self.issues.push(TaggedIssue {
            issue: ConsistencyIssue {
                issue_type: "analysis".to_string(),
                severity: Severity::Minor,
                description: format!("Raw analysis for chunk {number}"),
                location: format!("Chunk {number}"),
                suggestion: raw.to_string(),
            },
            chunk: number,
            total_chunks,
        });
    }

    fn finish(self) -> ConsistencyReport {
        let mut by_severity = IssuesBySeverity::default();
        for tagged in &self.issues {
            let bucket = match tagged.issue.severity {
                Severity::Major => &mut by_severity.major,
                Severity::Moderate => &mut by_severity.moderate,
                Severity::Minor => &mut by_severity.minor,
            };
            bucket.push(tagged.clone());
        }

        let character_names: Vec<String> = self.character_names.into_iter().collect();

        ConsistencyReport {
            summary: ConsistencySummary {
                total_chunks_analyzed: self.total_chunks,
                total_issues: self.issues.len(),
                major_issues: by_severity.major.len(),
                moderate_issues: by_severity.moderate.len(),
                minor_issues: by_severity.minor.len(),
                unique_characters: character_names.clone(),
                timeline_events: self.timeline_events.len(),
            },
            issues_by_severity: by_severity,
            all_issues: self.issues,
            character_names,
            timeline_events: self.timeline_events,
        }
    }
}
