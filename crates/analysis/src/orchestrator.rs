use crate::aggregator::Aggregator;
use crate::characters::CharacterAggregator;
use crate::consistency::ConsistencyAggregator;
use crate::error::AnalysisError;
use crate::pacing::PacingAggregator;
use crate::pov::PovAggregator;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use extract::{AnalysisKind, ModelInvoker, build_analysis_prompt, extract_partial};
use ingest::{Chunk, Chunker, ChunkerConfig};
use serde_json::Value;
use std::sync::Arc;
use store::{AnalysisRun, NewPovSegment, Store};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type RunKey = (Uuid, AnalysisKind);

/// What a finished run looked like from the chunk loop's side.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub run: AnalysisRun,
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    pub chunks_failed: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct ChunkTally {
    succeeded: usize,
    failed: usize,
}

/// Drives analysis runs: one manuscript, one kind, chunk by chunk.
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    store: Store,
    invoker: Arc<dyn ModelInvoker>,
    chunker: Chunker,
    in_flight: Arc<DashMap<RunKey, Uuid>>,
}

/// Holds a `(manuscript, kind)` slot until dropped.
struct InFlightGuard {
    in_flight: Arc<DashMap<RunKey, Uuid>>,
    key: RunKey,
}

impl InFlightGuard {
    fn bind(&self, run_id: Uuid) {
        self.in_flight.insert(self.key, run_id);
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// A run that has been accepted and is being processed.
pub struct RunHandle {
    run_id: Uuid,
    kind: AnalysisKind,
    store: Store,
    task: JoinHandle<Result<AnalysisOutcome, AnalysisError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Wait for the run to reach a terminal state.
    pub async fn finish(self) -> Result<AnalysisOutcome, AnalysisError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                let message = format!("Analysis task ended abnormally: {e}");
                Err(record_failure(&self.store, self.run_id, self.kind, message).await)
            }
        }
    }
}

async fn record_failure(store: &Store, run_id: Uuid, kind: AnalysisKind, message: String) -> AnalysisError {
    error!(run_id = %run_id, kind = %kind, error = %message, "Analysis failed");
    if let Err(e) = store.fail_run(run_id, &message).await {
        error!(run_id = %run_id, error = %e, "Could not record run failure");
    }
    AnalysisError::RunFailed { run_id, message }
}

impl AnalysisOrchestrator {
    pub fn new(store: Store, invoker: Arc<dyn ModelInvoker>, chunker: ChunkerConfig) -> Self {
        Self {
            store,
            invoker,
            chunker: Chunker::new(chunker),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run ids currently being processed.
    pub fn running(&self) -> Vec<Uuid> {
        self.in_flight.iter().map(|entry| *entry.value()).collect()
    }

    /// Run one analysis to a terminal state.
    pub async fn run(
        &self,
        manuscript_id: Uuid,
        kind: AnalysisKind,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        self.start(manuscript_id, kind).await?.finish().await
    }

    /// Validate the request, open an `in_progress` run and hand the chunk
    /// loop to its own task.
    ///
    /// Input problems are reported before any run is created. The task owns
    /// the in-flight slot and drives the run to `completed` or `failed` even
    /// if the returned handle is dropped.
    pub async fn start(&self, manuscript_id: Uuid, kind: AnalysisKind) -> Result<RunHandle, AnalysisError> {
        let manuscript = self
            .store
            .get_manuscript(manuscript_id)
            .await?
            .ok_or(AnalysisError::ManuscriptNotFound(manuscript_id))?;
        let text = manuscript
            .analyzable_text()
            .ok_or(AnalysisError::MissingText(manuscript_id))?
            .to_string();

        let guard = self.acquire(manuscript_id, kind)?;

        let run = self.store.start_run(manuscript_id, kind).await?;
        guard.bind(run.id);
        let run_id = run.id;

        let worker = self.clone();
        let task = tokio::spawn(async move {
            let _slot = guard;
            worker.execute(run, kind, &text).await
        });

        Ok(RunHandle {
            run_id,
            kind,
            store: self.store.clone(),
            task,
        })
    }

    async fn execute(
        &self,
        run: AnalysisRun,
        kind: AnalysisKind,
        text: &str,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let chunks = self.chunker.chunk_text(text);
        let total_words = ingest::count_words(text);
        info!(
            run_id = %run.id,
            manuscript_id = %run.manuscript_id,
            kind = %kind,
            chunks = chunks.len(),
            words = total_words,
            "Analysis started"
        );

        let mut tally = ChunkTally::default();
        let aggregate = match kind {
            AnalysisKind::PovDistribution => {
                let result = self
                    .drive(PovAggregator::new(total_words), &chunks, run.id, kind, &mut tally)
                    .await;
                let segments = result.segment_records();
                serde_json::to_value(&result).map(|value| (value, segments))
            }
            AnalysisKind::CharacterAnalysis => {
                let result = self
                    .drive(CharacterAggregator::new(), &chunks, run.id, kind, &mut tally)
                    .await;
                serde_json::to_value(&result).map(|value| (value, Vec::new()))
            }
            AnalysisKind::Pacing => {
                let aggregator = PacingAggregator::new(total_words, chunks.len());
                let result = self.drive(aggregator, &chunks, run.id, kind, &mut tally).await;
                serde_json::to_value(&result).map(|value| (value, Vec::new()))
            }
            AnalysisKind::Consistency => {
                let aggregator = ConsistencyAggregator::new(chunks.len());
                let result = self.drive(aggregator, &chunks, run.id, kind, &mut tally).await;
                serde_json::to_value(&result).map(|value| (value, Vec::new()))
            }
        };

        match self.persist(run.id, aggregate).await {
            Ok(run) => {
                info!(
                    run_id = %run.id,
                    kind = %kind,
                    succeeded = tally.succeeded,
                    failed = tally.failed,
                    "Analysis completed"
                );
                Ok(AnalysisOutcome {
                    run,
                    chunks_total: chunks.len(),
                    chunks_succeeded: tally.succeeded,
                    chunks_failed: tally.failed,
                })
            }
            Err(message) => Err(record_failure(&self.store, run.id, kind, message).await),
        }
    }

    /// All runs for a manuscript, newest first.
    pub async fn list_runs(&self, manuscript_id: Uuid) -> Result<Vec<AnalysisRun>, AnalysisError> {
        if self.store.get_manuscript(manuscript_id).await?.is_none() {
            return Err(AnalysisError::ManuscriptNotFound(manuscript_id));
        }
        Ok(self.store.list_runs(manuscript_id).await?)
    }

    /// Returns false when no such run belongs to the manuscript.
    pub async fn delete_run(&self, manuscript_id: Uuid, run_id: Uuid) -> Result<bool, AnalysisError> {
        let deleted = self.store.delete_run(manuscript_id, run_id).await?;
        if deleted {
            info!(run_id = %run_id, manuscript_id = %manuscript_id, "Analysis run deleted");
        }
        Ok(deleted)
    }

    fn acquire(&self, manuscript_id: Uuid, kind: AnalysisKind) -> Result<InFlightGuard, AnalysisError> {
        let key = (manuscript_id, kind);
        match self.in_flight.entry(key) {
            Entry::Occupied(_) => {
                warn!(manuscript_id = %manuscript_id, kind = %kind, "Analysis already running");
                Err(AnalysisError::AlreadyRunning {
                    manuscript_id,
                    kind,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(Uuid::nil());
                Ok(InFlightGuard {
                    in_flight: Arc::clone(&self.in_flight),
                    key,
                })
            }
        }
    }

    /// Feed every chunk through the model in order.
    async fn drive<A>(
        &self,
        mut aggregator: A,
        chunks: &[Chunk],
        run_id: Uuid,
        kind: AnalysisKind,
        tally: &mut ChunkTally,
    ) -> A::Output
    where
        A: Aggregator + Send,
    {
        let total = chunks.len();

        for chunk in chunks {
            let prompt = build_analysis_prompt(kind, chunk.index, total, &chunk.text);
            debug!(
                run_id = %run_id,
                chunk = chunk.number(),
                prompt_chars = prompt.len(),
                model = self.invoker.name(),
                "Invoking model"
            );

            let raw = match self.invoker.invoke(&prompt).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(run_id = %run_id, chunk = chunk.number(), error = %e, "Model call failed, skipping chunk");
                    tally.failed += 1;
                    continue;
                }
            };

            match extract_partial::<A::Partial>(&raw) {
                Ok(partial) => {
                    aggregator.absorb(chunk, total, partial);
                    tally.succeeded += 1;
                }
                Err(e) => {
                    warn!(run_id = %run_id, chunk = chunk.number(), error = %e, "Unusable model output, skipping chunk");
                    aggregator.record_unparseable(chunk, total, &raw);
                    tally.failed += 1;
                }
            }
        }

        aggregator.finish()
    }

    async fn persist(
        &self,
        run_id: Uuid,
        aggregate: Result<(Value, Vec<NewPovSegment>), serde_json::Error>,
    ) -> Result<AnalysisRun, String> {
        let (results, segments) = aggregate.map_err(|e| format!("Failed to encode results: {e}"))?;
        self.store
            .complete_run(run_id, &results, &segments)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use ingest::{ManuscriptFormat, UploadType};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use store::{NewManuscript, RunStatus};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Replays canned answers in order and remembers the prompts it saw.
    struct ScriptedInvoker {
        replies: Mutex<VecDeque<anyhow::Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedInvoker {
        fn new(replies: Vec<anyhow::Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelInvoker for ScriptedInvoker {
        async fn invoke(&self, prompt: &str) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("script exhausted")))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Blocks every call until released.
    struct GatedInvoker {
        entered: Notify,
        release: Notify,
        reply: String,
    }

    #[async_trait]
    impl ModelInvoker for GatedInvoker {
        async fn invoke(&self, _prompt: &str) -> anyhow::Result<String> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(self.reply.clone())
        }

        fn name(&self) -> &str {
            "gated"
        }
    }

    async fn store_with(text: Option<&str>) -> (Store, Uuid) {
        let store = Store::open_in_memory().unwrap();
        let manuscript = store
            .insert_manuscript(NewManuscript {
                file_name: "draft.txt".to_string(),
                file_path: "/tmp/draft.txt".to_string(),
                format: ManuscriptFormat::Text,
                word_count: text.map(ingest::count_words).unwrap_or(0),
                upload_type: UploadType::SingleChapter,
                extracted_text: text.map(str::to_string),
            })
            .await
            .unwrap();
        (store, manuscript.id)
    }

    fn orchestrator_for(store: Store, invoker: Arc<dyn ModelInvoker>, max_chars: usize) -> AnalysisOrchestrator {
        AnalysisOrchestrator::new(store, invoker, ChunkerConfig { max_chars })
    }

    #[tokio::test]
    async fn test_pov_run_end_to_end() {
        let (store, manuscript_id) = store_with(Some("Alice said hi. Bob said bye.")).await;
        let invoker = ScriptedInvoker::new(vec![Ok(
            r#"Here is the analysis:
{"segments":[{"character":"Alice","startPosition":0,"endPosition":15,"wordCount":3,"confidence":0.9}]}
Hope this helps."#
                .to_string(),
        )]);
        let orchestrator = orchestrator_for(store.clone(), invoker.clone(), 80_000);

        let outcome = orchestrator
            .run(manuscript_id, AnalysisKind::PovDistribution)
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Completed);
        assert_eq!(outcome.chunks_total, 1);
        assert_eq!(outcome.chunks_succeeded, 1);

        let summary = &outcome.run.results["summary"];
        assert_eq!(
            summary["characters_detected"],
            json!([{"name": "Alice", "word_count": 3, "percentage": 50.0, "segments": 1}])
        );
        assert_eq!(summary["pov_switches"], json!(0));
        assert_eq!(summary["total_words"], json!(6));

        let segments = store.list_pov_segments(manuscript_id).await.unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].analysis_run_id, outcome.run.id);
        assert_eq!(segments[0].end_position, 15);

        let prompts = invoker.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Alice said hi. Bob said bye."));
    }

    #[tokio::test]
    async fn test_failed_model_call_skips_chunk() {
        // budget 9 gives three chunks: "one two", "three", "four five"
        let (store, manuscript_id) = store_with(Some("one two three four five")).await;
        let invoker = ScriptedInvoker::new(vec![
            Ok(r#"{"segments":[{"character":"Ann","startPosition":0,"endPosition":7,"wordCount":2}]}"#.to_string()),
            Err(anyhow!("connection reset")),
            Ok(r#"{"segments":[{"character":"Ben","startPosition":0,"endPosition":9,"wordCount":2}]}"#.to_string()),
        ]);
        let orchestrator = orchestrator_for(store.clone(), invoker, 9);

        let outcome = orchestrator
            .run(manuscript_id, AnalysisKind::PovDistribution)
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Completed);
        assert_eq!(outcome.chunks_total, 3);
        assert_eq!(outcome.chunks_succeeded, 2);
        assert_eq!(outcome.chunks_failed, 1);

        let segments = store.list_pov_segments(manuscript_id).await.unwrap();
        let spans: Vec<(&str, usize)> = segments
            .iter()
            .map(|s| (s.character_name.as_str(), s.start_position))
            .collect();
        // third chunk starts after "one two three " (14 chars)
        assert_eq!(spans, vec![("Ann", 0), ("Ben", 14)]);
    }

    #[tokio::test]
    async fn test_missing_text_creates_no_run() {
        for text in [None, Some("  \n ")] {
            let (store, manuscript_id) = store_with(text).await;
            let invoker = ScriptedInvoker::new(vec![]);
            let orchestrator = orchestrator_for(store.clone(), invoker.clone(), 80_000);

            let err = orchestrator
                .run(manuscript_id, AnalysisKind::Consistency)
                .await
                .unwrap_err();
            assert!(matches!(err, AnalysisError::MissingText(id) if id == manuscript_id));
            assert!(store.list_runs(manuscript_id).await.unwrap().is_empty());
            assert!(invoker.prompts().is_empty());
        }
    }

    #[tokio::test]
    async fn test_unknown_manuscript() {
        let store = Store::open_in_memory().unwrap();
        let orchestrator = orchestrator_for(store, ScriptedInvoker::new(vec![]), 80_000);

        let err = orchestrator
            .run(Uuid::new_v4(), AnalysisKind::Pacing)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ManuscriptNotFound(_)));

        let err = orchestrator.list_runs(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::ManuscriptNotFound(_)));
    }

    #[tokio::test]
    async fn test_consistency_records_unparseable_but_not_unreachable() {
        let (store, manuscript_id) = store_with(Some("one two three four five")).await;
        let invoker = ScriptedInvoker::new(vec![
            Ok("Everything looks consistent to me.".to_string()),
            Err(anyhow!("timeout")),
            Ok(r#"{"character_names":["Ann"],"issues":[{"type":"character","severity":"major","description":"name changes"}]}"#.to_string()),
        ]);
        let orchestrator = orchestrator_for(store, invoker, 9);

        let outcome = orchestrator
            .run(manuscript_id, AnalysisKind::Consistency)
            .await
            .unwrap();
        assert_eq!(outcome.chunks_failed, 2);

        let results = &outcome.run.results;
        assert_eq!(results["summary"]["total_chunks_analyzed"], json!(3));
        assert_eq!(results["summary"]["total_issues"], json!(2));

        let chunks: Vec<u64> = results["all_issues"]
            .as_array()
            .unwrap()
            .iter()
            .map(|issue| issue["chunk"].as_u64().unwrap())
            .collect();
        assert_eq!(chunks, vec![1, 3]);
        assert_eq!(results["all_issues"][0]["type"], json!("analysis"));
        assert_eq!(
            results["all_issues"][0]["suggestion"],
            json!("Everything looks consistent to me.")
        );
        assert_eq!(results["issues_by_severity"]["major"][0]["chunk"], json!(3));
    }

    #[tokio::test]
    async fn test_all_chunks_failing_still_completes() {
        let (store, manuscript_id) = store_with(Some("a short chapter")).await;
        let invoker = ScriptedInvoker::new(vec![Ok("no json at all".to_string())]);
        let orchestrator = orchestrator_for(store, invoker, 80_000);

        let outcome = orchestrator
            .run(manuscript_id, AnalysisKind::CharacterAnalysis)
            .await
            .unwrap();
        assert_eq!(outcome.run.status, RunStatus::Completed);
        assert_eq!(outcome.run.results["characters"], json!([]));
    }

    #[tokio::test]
    async fn test_persistence_failure_fails_run() {
        // The manuscript disappears mid-run, so completion finds no row
        struct DeletingInvoker {
            store: Store,
            manuscript_id: Uuid,
        }

        #[async_trait]
        impl ModelInvoker for DeletingInvoker {
            async fn invoke(&self, _prompt: &str) -> anyhow::Result<String> {
                self.store.delete_manuscript(self.manuscript_id).await?;
                Ok("{}".to_string())
            }

            fn name(&self) -> &str {
                "deleting"
            }
        }

        let (store, manuscript_id) = store_with(Some("short text")).await;
        let invoker = Arc::new(DeletingInvoker {
            store: store.clone(),
            manuscript_id,
        });
        let orchestrator = orchestrator_for(store, invoker, 80_000);

        let err = orchestrator
            .run(manuscript_id, AnalysisKind::Pacing)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::RunFailed { .. }));
        assert!(orchestrator.running().is_empty());
    }

    #[tokio::test]
    async fn test_same_kind_cannot_run_twice() {
        let (store, manuscript_id) = store_with(Some("quiet night")).await;
        let invoker = Arc::new(GatedInvoker {
            entered: Notify::new(),
            release: Notify::new(),
            reply: r#"{"characters":[]}"#.to_string(),
        });
        let orchestrator = Arc::new(orchestrator_for(store, invoker.clone(), 80_000));

        let first = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                orchestrator
                    .run(manuscript_id, AnalysisKind::CharacterAnalysis)
                    .await
            }
        });
        invoker.entered.notified().await;
        assert_eq!(orchestrator.running().len(), 1);

        let err = orchestrator
            .run(manuscript_id, AnalysisKind::CharacterAnalysis)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::AlreadyRunning { .. }));

        invoker.release.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome.run.status, RunStatus::Completed);
        assert!(orchestrator.running().is_empty());

        // the slot is free again once the first run ends
        invoker.release.notify_one();
        let again = orchestrator
            .run(manuscript_id, AnalysisKind::CharacterAnalysis)
            .await
            .unwrap();
        assert_ne!(again.run.id, outcome.run.id);

        let runs = orchestrator.list_runs(manuscript_id).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, again.run.id);

        assert!(orchestrator.delete_run(manuscript_id, outcome.run.id).await.unwrap());
        assert!(!orchestrator.delete_run(manuscript_id, outcome.run.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_null_fields_do_not_discard_chunk() {
        let (store, manuscript_id) = store_with(Some("Alice said hi. Bob said bye.")).await;
        let invoker = ScriptedInvoker::new(vec![Ok(
            r#"{"segments":[{"character":"Alice","startPosition":0,"endPosition":15,"wordCount":3.0,"confidence":0.8,"chapter":null,"text_snippet":null}]}"#
                .to_string(),
        )]);
        let orchestrator = orchestrator_for(store, invoker, 80_000);

        let outcome = orchestrator
            .run(manuscript_id, AnalysisKind::PovDistribution)
            .await
            .unwrap();
        assert_eq!(outcome.chunks_succeeded, 1);
        assert_eq!(outcome.chunks_failed, 0);
        assert_eq!(
            outcome.run.results["summary"]["characters_detected"][0]["name"],
            json!("Alice")
        );

        let (store, manuscript_id) = store_with(Some("Ann left at dawn.")).await;
        let invoker = ScriptedInvoker::new(vec![Ok(
            r#"{"issues":[{"type":"timeline","severity":"major","description":"Ann leaves twice","location":null,"suggestion":null}],"timeline_events":null}"#
                .to_string(),
        )]);
        let orchestrator = orchestrator_for(store, invoker, 80_000);

        let outcome = orchestrator
            .run(manuscript_id, AnalysisKind::Consistency)
            .await
            .unwrap();
        let results = &outcome.run.results;
        assert_eq!(results["summary"]["major_issues"], json!(1));
        assert_eq!(results["all_issues"][0]["type"], json!("timeline"));
    }

    #[tokio::test]
    async fn test_oversized_positions_complete_the_run() {
        let (store, manuscript_id) = store_with(Some("one two three four five")).await;
        let invoker = ScriptedInvoker::new(vec![
            Ok(r#"{"segments":[{"character":"Ann","startPosition":0,"endPosition":7,"wordCount":2}]}"#.to_string()),
            Ok(r#"{"segments":[{"character":"Ann","startPosition":18446744073709551615,"endPosition":18446744073709551615,"wordCount":1}]}"#.to_string()),
            Ok(r#"{"segments":[]}"#.to_string()),
        ]);
        let orchestrator = orchestrator_for(store, invoker, 9);

        let outcome = orchestrator
            .run(manuscript_id, AnalysisKind::PovDistribution)
            .await
            .unwrap();
        assert_eq!(outcome.run.status, RunStatus::Completed);
        assert_eq!(outcome.chunks_succeeded, 3);
        assert_eq!(
            outcome.run.results["summary"]["characters_detected"][0]["word_count"],
            json!(3)
        );
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_strand_run() {
        let (store, manuscript_id) = store_with(Some("quiet night")).await;
        let invoker = Arc::new(GatedInvoker {
            entered: Notify::new(),
            release: Notify::new(),
            reply: r#"{"chunk_metrics":{"action_percentage":10}}"#.to_string(),
        });
        let orchestrator = Arc::new(orchestrator_for(store.clone(), invoker.clone(), 80_000));

        let caller = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.run(manuscript_id, AnalysisKind::Pacing).await }
        });
        invoker.entered.notified().await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        // the run keeps its slot and finishes on its own
        assert_eq!(orchestrator.running().len(), 1);
        invoker.release.notify_one();
        for _ in 0..200 {
            if orchestrator.running().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(orchestrator.running().is_empty());

        let runs = store.list_runs(manuscript_id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_handle_reports_run_id_before_finishing() {
        let (store, manuscript_id) = store_with(Some("quiet night")).await;
        let invoker = ScriptedInvoker::new(vec![Ok(r#"{"characters":[]}"#.to_string())]);
        let orchestrator = orchestrator_for(store.clone(), invoker, 80_000);

        let handle = orchestrator
            .start(manuscript_id, AnalysisKind::CharacterAnalysis)
            .await
            .unwrap();
        let run_id = handle.run_id();
        let outcome = handle.finish().await.unwrap();
        assert_eq!(outcome.run.id, run_id);
        assert_eq!(store.get_run(run_id).await.unwrap().unwrap().status, RunStatus::Completed);
    }
}
