//! SQLite persistence for manuscripts, analysis runs and POV segments.
//!
//! Every write is a single statement or a single transaction, and run status
//! changes are checked against [`RunStatus::can_transition_to`] inside the
//! statement that applies them.

pub mod error;
pub mod models;

pub use error::{Result, StoreError};
pub use models::{
    AnalysisRun, Manuscript, NewManuscript, NewPovSegment, PovSegmentRecord, RunStatus,
};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use error::UnknownValue;
use extract::AnalysisKind;
use ingest::{ManuscriptFormat, UploadType};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const MANUSCRIPT_COLUMNS: &str =
    "id, file_name, file_path, format, word_count, upload_type, extracted_text, created_at";
const RUN_COLUMNS: &str =
    "id, manuscript_id, analysis_type, status, results, error, created_at, updated_at";
const SEGMENT_COLUMNS: &str = "id, analysis_run_id, manuscript_id, character_name, start_position, \
     end_position, word_count, confidence, chapter, section, created_at";

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;

        let store = Self::init(conn)?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // cascades only fire with foreign keys enabled on the connection
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // manuscripts
    // -----------------------------------------------------------------------

    pub async fn insert_manuscript(&self, new: NewManuscript) -> Result<Manuscript> {
        let manuscript = Manuscript {
            id: Uuid::new_v4(),
            file_name: new.file_name,
            file_path: new.file_path,
            format: new.format,
            word_count: new.word_count,
            upload_type: new.upload_type,
            extracted_text: new.extracted_text,
            created_at: now(),
        };

        let conn = self.conn.lock().await;
        conn.execute(
            &format!("INSERT INTO manuscripts ({MANUSCRIPT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                manuscript.id.to_string(),
                manuscript.file_name,
                manuscript.file_path,
                manuscript.format.as_str(),
                manuscript.word_count as i64,
                manuscript.upload_type.as_str(),
                manuscript.extracted_text,
                timestamp(&manuscript.created_at),
            ],
        )?;

        debug!(manuscript_id = %manuscript.id, file = %manuscript.file_name, "Inserted manuscript");
        Ok(manuscript)
    }

    pub async fn get_manuscript(&self, id: Uuid) -> Result<Option<Manuscript>> {
        let conn = self.conn.lock().await;
        let manuscript = conn
            .query_row(
                &format!("SELECT {MANUSCRIPT_COLUMNS} FROM manuscripts WHERE id = ?1"),
                params![id.to_string()],
                manuscript_from_row,
            )
            .optional()?;
        Ok(manuscript)
    }

    /// Delete a manuscript together with its runs and segments.
    pub async fn delete_manuscript(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM manuscripts WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    // -----------------------------------------------------------------------
    // analysis runs
    // -----------------------------------------------------------------------

    pub async fn create_run(&self, manuscript_id: Uuid, kind: AnalysisKind) -> Result<AnalysisRun> {
        let conn = self.conn.lock().await;
        insert_run(&conn, manuscript_id, kind)
    }

    /// Create a run and move it to `in_progress` in one transaction, so no
    /// run is ever left behind in `pending`.
    pub async fn start_run(&self, manuscript_id: Uuid, kind: AnalysisKind) -> Result<AnalysisRun> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let run = insert_run(&tx, manuscript_id, kind)?;
        apply_transition(&tx, run.id, RunStatus::InProgress, None, None)?;
        let run = fetch_run(&tx, run.id)?;
        tx.commit()?;

        debug!(run_id = %run.id, kind = %kind, "Run started");
        Ok(run)
    }

    /// Move a run to `to` without touching its results or error.
    pub async fn transition_run(&self, run_id: Uuid, to: RunStatus) -> Result<AnalysisRun> {
        let conn = self.conn.lock().await;
        apply_transition(&conn, run_id, to, None, None)?;
        fetch_run(&conn, run_id)
    }

    /// Mark a run completed with its aggregate, inserting any POV segments in
    /// the same transaction. The bulk insert runs on the blocking pool.
    pub async fn complete_run(
        &self,
        run_id: Uuid,
        results: &Value,
        segments: &[NewPovSegment],
    ) -> Result<AnalysisRun> {
        let results_json = serde_json::to_string(results)?;
        let segments = segments.to_vec();
        let count = segments.len();

        let mut conn = Arc::clone(&self.conn).lock_owned().await;
        let run = tokio::task::spawn_blocking(move || {
            complete_in_tx(&mut conn, run_id, &results_json, &segments)
        })
        .await??;

        debug!(run_id = %run_id, segments = count, "Run completed");
        Ok(run)
    }

    pub async fn fail_run(&self, run_id: Uuid, message: &str) -> Result<AnalysisRun> {
        let conn = self.conn.lock().await;
        apply_transition(&conn, run_id, RunStatus::Failed, None, Some(message))?;
        fetch_run(&conn, run_id)
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Option<AnalysisRun>> {
        let conn = self.conn.lock().await;
        let run = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM analysis_runs WHERE id = ?1"),
                params![run_id.to_string()],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    /// All runs for a manuscript, newest first.
    pub async fn list_runs(&self, manuscript_id: Uuid) -> Result<Vec<AnalysisRun>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM analysis_runs WHERE manuscript_id = ?1 \
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let runs = stmt
            .query_map(params![manuscript_id.to_string()], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    /// Delete one run, only if it belongs to `manuscript_id`.
    pub async fn delete_run(&self, manuscript_id: Uuid, run_id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM analysis_runs WHERE id = ?1 AND manuscript_id = ?2",
            params![run_id.to_string(), manuscript_id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    // -----------------------------------------------------------------------
    // pov segments
    // -----------------------------------------------------------------------

    /// Segments from the most recently completed POV run of a manuscript.
    /// Earlier runs keep their rows but are superseded.
    pub async fn list_pov_segments(&self, manuscript_id: Uuid) -> Result<Vec<PovSegmentRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SEGMENT_COLUMNS} FROM pov_segments WHERE analysis_run_id = ( \
                 SELECT id FROM analysis_runs \
                 WHERE manuscript_id = ?1 AND analysis_type = ?2 AND status = ?3 \
                 ORDER BY updated_at DESC, rowid DESC LIMIT 1) \
             ORDER BY start_position, id"
        ))?;
        let segments = stmt
            .query_map(
                params![
                    manuscript_id.to_string(),
                    AnalysisKind::PovDistribution.as_str(),
                    RunStatus::Completed.as_str(),
                ],
                segment_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(segments)
    }

    /// Segments written by one run.
    pub async fn list_run_pov_segments(&self, run_id: Uuid) -> Result<Vec<PovSegmentRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SEGMENT_COLUMNS} FROM pov_segments WHERE analysis_run_id = ?1 \
             ORDER BY start_position, id"
        ))?;
        let segments = stmt
            .query_map(params![run_id.to_string()], segment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(segments)
    }
}

fn insert_run(conn: &Connection, manuscript_id: Uuid, kind: AnalysisKind) -> Result<AnalysisRun> {
    let created_at = now();
    let run = AnalysisRun {
        id: Uuid::new_v4(),
        manuscript_id,
        kind,
        status: RunStatus::Pending,
        results: Value::Object(Default::default()),
        error: None,
        created_at,
        updated_at: created_at,
    };

    conn.execute(
        &format!("INSERT INTO analysis_runs ({RUN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, '{{}}', NULL, ?5, ?5)"),
        params![
            run.id.to_string(),
            manuscript_id.to_string(),
            kind.as_str(),
            run.status.as_str(),
            timestamp(&created_at),
        ],
    )?;

    Ok(run)
}

fn complete_in_tx(
    conn: &mut Connection,
    run_id: Uuid,
    results_json: &str,
    segments: &[NewPovSegment],
) -> Result<AnalysisRun> {
    let tx = conn.transaction()?;

    apply_transition(&tx, run_id, RunStatus::Completed, Some(results_json), None)?;

    if !segments.is_empty() {
        let manuscript_id: String = tx.query_row(
            "SELECT manuscript_id FROM analysis_runs WHERE id = ?1",
            params![run_id.to_string()],
            |row| row.get(0),
        )?;
        let created_at = timestamp(&now());

        let mut stmt = tx.prepare(
            "INSERT INTO pov_segments (analysis_run_id, manuscript_id, character_name, \
             start_position, end_position, word_count, confidence, chapter, section, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for segment in segments {
            stmt.execute(params![
                run_id.to_string(),
                manuscript_id,
                segment.character_name,
                sql_int(segment.start_position),
                sql_int(segment.end_position),
                sql_int(segment.word_count),
                segment.confidence,
                segment.chapter,
                segment.section,
                created_at,
            ])?;
        }
    }

    let run = fetch_run(&tx, run_id)?;
    tx.commit()?;
    Ok(run)
}

/// SQLite integers are signed; larger values are clamped.
fn sql_int(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn apply_transition(
    conn: &Connection,
    run_id: Uuid,
    to: RunStatus,
    results: Option<&str>,
    error: Option<&str>,
) -> Result<()> {
    let from = conn
        .query_row(
            "SELECT status FROM analysis_runs WHERE id = ?1",
            params![run_id.to_string()],
            |row| status_at(row, 0),
        )
        .optional()?
        .ok_or(StoreError::RunNotFound(run_id))?;

    if !from.can_transition_to(to) {
        return Err(StoreError::InvalidTransition { run_id, from, to });
    }

    let updated = conn.execute(
        "UPDATE analysis_runs SET status = ?2, results = COALESCE(?3, results), \
         error = COALESCE(?4, error), updated_at = ?5 WHERE id = ?1 AND status = ?6",
        params![
            run_id.to_string(),
            to.as_str(),
            results,
            error,
            timestamp(&now()),
            from.as_str(),
        ],
    )?;

    if updated == 0 {
        return Err(StoreError::InvalidTransition { run_id, from, to });
    }
    Ok(())
}

fn fetch_run(conn: &Connection, run_id: Uuid) -> Result<AnalysisRun> {
    conn.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM analysis_runs WHERE id = ?1"),
        params![run_id.to_string()],
        run_from_row,
    )
    .optional()?
    .ok_or(StoreError::RunNotFound(run_id))
}

/// Microsecond precision, so values survive the round trip through TEXT
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn status_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<RunStatus> {
    let raw: String = row.get(idx)?;
    RunStatus::parse(&raw).ok_or_else(|| conversion_error(idx, UnknownValue(raw)))
}

fn manuscript_from_row(row: &Row<'_>) -> rusqlite::Result<Manuscript> {
    let format: String = row.get(3)?;
    let upload_type: String = row.get(5)?;

    Ok(Manuscript {
        id: uuid_at(row, 0)?,
        file_name: row.get(1)?,
        file_path: row.get(2)?,
        format: ManuscriptFormat::parse(&format)
            .ok_or_else(|| conversion_error(3, UnknownValue(format.clone())))?,
        word_count: row.get::<_, i64>(4)? as usize,
        upload_type: UploadType::parse(&upload_type)
            .ok_or_else(|| conversion_error(5, UnknownValue(upload_type.clone())))?,
        extracted_text: row.get(6)?,
        created_at: timestamp_at(row, 7)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<AnalysisRun> {
    let kind: String = row.get(2)?;
    let results: String = row.get(4)?;

    Ok(AnalysisRun {
        id: uuid_at(row, 0)?,
        manuscript_id: uuid_at(row, 1)?,
        kind: kind
            .parse::<AnalysisKind>()
            .map_err(|e| conversion_error(2, e))?,
        status: status_at(row, 3)?,
        results: serde_json::from_str(&results).map_err(|e| conversion_error(4, e))?,
        error: row.get(5)?,
        created_at: timestamp_at(row, 6)?,
        updated_at: timestamp_at(row, 7)?,
    })
}

fn segment_from_row(row: &Row<'_>) -> rusqlite::Result<PovSegmentRecord> {
    Ok(PovSegmentRecord {
        id: row.get(0)?,
        analysis_run_id: uuid_at(row, 1)?,
        manuscript_id: uuid_at(row, 2)?,
        character_name: row.get(3)?,
        start_position: row.get::<_, i64>(4)? as usize,
        end_position: row.get::<_, i64>(5)? as usize,
        word_count: row.get::<_, i64>(6)? as usize,
        confidence: row.get(7)?,
        chapter: row.get(8)?,
        section: row.get(9)?,
        created_at: timestamp_at(row, 10)?,
    })
}
