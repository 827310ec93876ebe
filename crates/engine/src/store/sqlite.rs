//! SQLite-backed persistent store for jobs and all child entities.
//!
//! A single connection behind a `tokio::sync::Mutex`, WAL mode, and an
//! in-memory constructor for tests. Every status transition goes through
//! `update_status`, a compare-and-set `UPDATE … WHERE status = ?`, so
//! concurrent workers racing on the same job have exactly one winner.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

use super::entities::*;
use crate::config::JobConfig;
use crate::graph::SemanticGraph;
use crate::types::*;

/// Serialize a timestamp in fixed-width RFC3339 (nanoseconds, Z offset) so
/// stored strings compare in chronological order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("timestamp: {e}")))
}

fn to_json<T: serde::Serialize>(v: &T) -> Result<String, StoreError> {
    serde_json::to_string(v).map_err(Into::into)
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_str(s).map_err(Into::into)
}

/// Input shape for a hypothesis about to be persisted.
#[derive(Debug, Clone)]
pub struct NewHypothesis {
    pub source: String,
    pub target: String,
    pub path: Vec<String>,
    pub predicates: Vec<String>,
    pub explanation: String,
    pub confidence: i64,
    pub mode: ReasoningMode,
    pub passed_filter: bool,
    pub filter_reason: Option<BTreeMap<String, String>>,
    pub triple_ids: Vec<TripleId>,
    pub source_ids: Vec<SourceId>,
    pub block_ids: Vec<BlockId>,
    pub domain: Option<String>,
}

/// The engine's persistent store.
pub struct SqliteStore {
    conn: tokio::sync::Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Sqlite(format!("create dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StoreError::Sqlite(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    /// Open an in-memory store (used by tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id       INTEGER NOT NULL,
                mode          TEXT NOT NULL,
                status        TEXT NOT NULL,
                config_json   TEXT NOT NULL,
                seed_text     TEXT,
                verify_json   TEXT,
                result_json   TEXT,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversation_messages (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id        INTEGER NOT NULL,
                role          TEXT NOT NULL,
                message_type  TEXT NOT NULL,
                content       TEXT NOT NULL,
                created_at    TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS files (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id            INTEGER NOT NULL,
                paper_id          INTEGER,
                origin            TEXT NOT NULL,
                stored_path       TEXT NOT NULL,
                file_type         TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                created_at        TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS ingestion_sources (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id       INTEGER NOT NULL,
                source_type  TEXT NOT NULL,
                source_ref   TEXT NOT NULL,
                raw_text     TEXT NOT NULL DEFAULT '',
                processed    INTEGER NOT NULL DEFAULT 0,
                created_at   TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS text_blocks (
                id                    INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id                INTEGER NOT NULL,
                source_id             INTEGER NOT NULL,
                block_text            TEXT NOT NULL,
                block_order           INTEGER NOT NULL,
                segmentation_strategy TEXT NOT NULL,
                triples_extracted     INTEGER NOT NULL DEFAULT 0,
                created_at            TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS triples (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id         INTEGER NOT NULL,
                block_id       INTEGER NOT NULL,
                source_id      INTEGER NOT NULL,
                subject        TEXT NOT NULL,
                predicate      TEXT NOT NULL,
                object         TEXT NOT NULL,
                extractor_name TEXT NOT NULL,
                created_at     TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS semantic_graphs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id      INTEGER NOT NULL,
                graph_json  TEXT NOT NULL,
                node_count  INTEGER NOT NULL,
                edge_count  INTEGER NOT NULL,
                version     INTEGER NOT NULL,
                is_active   INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS hypotheses (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id             INTEGER NOT NULL,
                source             TEXT NOT NULL,
                target             TEXT NOT NULL,
                path_json          TEXT NOT NULL,
                predicates_json    TEXT NOT NULL,
                explanation        TEXT NOT NULL,
                confidence         INTEGER NOT NULL,
                mode               TEXT NOT NULL,
                passed_filter      INTEGER NOT NULL,
                filter_reason_json TEXT,
                triple_ids_json    TEXT NOT NULL,
                source_ids_json    TEXT NOT NULL,
                block_ids_json     TEXT NOT NULL,
                domain             TEXT,
                is_active          INTEGER NOT NULL DEFAULT 1,
                version            INTEGER NOT NULL,
                created_at         TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS papers (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                title          TEXT NOT NULL,
                abstract_text  TEXT,
                authors_json   TEXT NOT NULL,
                year           INTEGER,
                venue          TEXT,
                doi            TEXT UNIQUE,
                external_json  TEXT NOT NULL,
                fingerprint    TEXT NOT NULL UNIQUE,
                pdf_url        TEXT,
                source         TEXT NOT NULL,
                created_at     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_paper_evidence (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id          INTEGER NOT NULL,
                paper_id        INTEGER NOT NULL,
                run_id          INTEGER,
                evaluated       INTEGER NOT NULL DEFAULT 0,
                impact_score    REAL NOT NULL DEFAULT 0,
                hypo_ref_count  INTEGER NOT NULL DEFAULT 0,
                cumulative_conf REAL NOT NULL DEFAULT 0,
                entity_density  INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                UNIQUE (job_id, paper_id),
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS search_queries (
                id                   INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id               INTEGER NOT NULL,
                hypothesis_signature TEXT NOT NULL,
                query_text           TEXT NOT NULL,
                resolved_domain      TEXT,
                status               TEXT NOT NULL,
                reputation_score     INTEGER NOT NULL,
                config_json          TEXT NOT NULL,
                created_at           TEXT NOT NULL,
                updated_at           TEXT NOT NULL,
                UNIQUE (job_id, hypothesis_signature),
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS search_query_runs (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                search_query_id INTEGER NOT NULL,
                job_id          INTEGER NOT NULL,
                provider_used   TEXT NOT NULL,
                reason          TEXT NOT NULL,
                fetched_json    TEXT NOT NULL,
                accepted_json   TEXT NOT NULL,
                rejected_json   TEXT NOT NULL,
                signal_delta    INTEGER,
                created_at      TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS decision_results (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id          INTEGER NOT NULL,
                decision_label  TEXT NOT NULL,
                provider_used   TEXT NOT NULL,
                snapshot_json   TEXT NOT NULL,
                fallback_used   INTEGER NOT NULL DEFAULT 0,
                fallback_reason TEXT,
                created_at      TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS verification_results (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id           INTEGER NOT NULL,
                source           TEXT NOT NULL,
                target           TEXT NOT NULL,
                connection_found INTEGER,
                connection_type  TEXT,
                path_json        TEXT NOT NULL,
                explanation      TEXT NOT NULL,
                supporting_json  TEXT NOT NULL,
                created_at       TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS work_queue (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id      INTEGER NOT NULL,
                enqueued_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sources_job ON ingestion_sources(job_id, processed);
            CREATE INDEX IF NOT EXISTS idx_blocks_job ON text_blocks(job_id, triples_extracted);
            CREATE INDEX IF NOT EXISTS idx_triples_job ON triples(job_id);
            CREATE INDEX IF NOT EXISTS idx_graphs_job ON semantic_graphs(job_id, is_active);
            CREATE INDEX IF NOT EXISTS idx_hyps_job ON hypotheses(job_id);
            CREATE INDEX IF NOT EXISTS idx_evidence_job ON job_paper_evidence(job_id, evaluated);
            CREATE INDEX IF NOT EXISTS idx_runs_job ON search_query_runs(job_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_decisions_job ON decision_results(job_id, created_at);",
        )?;
        Ok(())
    }

    /// Run `f` inside a single transaction. Nested use is not supported;
    /// callers compose store methods instead.
    pub async fn transactionally<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute_batch("BEGIN")?;
        match f(&conn) {
            Ok(v) => {
                conn.execute_batch("COMMIT")?;
                Ok(v)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    // ── Jobs ────────────────────────────────────────────────────────

    pub async fn create_job(
        &self,
        user_id: UserId,
        mode: JobMode,
        config: &JobConfig,
        seed_text: Option<&str>,
        verification_pair: Option<(&str, &str)>,
    ) -> Result<Job, StoreError> {
        let now = Utc::now();
        let verify_json = verification_pair
            .map(|(s, t)| to_json(&(s, t)))
            .transpose()?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO jobs (user_id, mode, status, config_json, seed_text, verify_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user_id.0,
                mode.to_string(),
                JobStatus::Created.as_str(),
                to_json(config)?,
                seed_text,
                verify_json,
                ts(now),
                ts(now),
            ],
        )?;
        let id = JobId(conn.last_insert_rowid());
        drop(conn);
        self.load_job(id).await
    }

    pub async fn load_job(&self, id: JobId) -> Result<Job, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, user_id, mode, status, config_json, seed_text, verify_json, result_json, created_at, updated_at
                 FROM jobs WHERE id = ?1",
                params![id.0],
                row_to_job,
            )
            .optional()?;
        match row {
            Some(result) => result,
            None => Err(StoreError::JobNotFound(id)),
        }
    }

    /// Compare-and-set the job status. Returns `false` when the status
    /// already moved; the caller drops or re-enqueues.
    pub async fn update_status(
        &self,
        id: JobId,
        expected_old: JobStatus,
        new: JobStatus,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![new.as_str(), ts(Utc::now()), id.0, expected_old.as_str()],
        )?;
        Ok(rows == 1)
    }

    /// Unconditional status write, used by input handlers before the
    /// pipeline owns the job. Stage transitions use `update_status`.
    pub async fn set_status(&self, id: JobId, status: JobStatus) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), ts(Utc::now()), id.0],
        )?;
        if rows == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }

    pub async fn set_job_result(
        &self,
        id: JobId,
        result: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE jobs SET result_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![to_json(result)?, ts(Utc::now()), id.0],
        )?;
        if rows == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }

    /// Rewrite the per-job config. Only input handlers call this, before the
    /// pipeline starts; stages treat the config as frozen.
    pub async fn update_job_config(&self, id: JobId, config: &JobConfig) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE jobs SET config_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![to_json(config)?, ts(Utc::now()), id.0],
        )?;
        if rows == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }

    pub async fn set_seed_text(&self, id: JobId, seed: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE jobs SET seed_text = ?1, updated_at = ?2 WHERE id = ?3",
            params![seed, ts(Utc::now()), id.0],
        )?;
        if rows == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }

    // ── Conversation log ────────────────────────────────────────────

    pub async fn append_message(
        &self,
        job_id: JobId,
        role: MessageRole,
        message_type: MessageType,
        content: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO conversation_messages (job_id, role, message_type, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job_id.0,
                role.as_str(),
                message_type.as_str(),
                content,
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub async fn list_messages(&self, job_id: JobId) -> Result<Vec<ConversationMessage>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, role, message_type, content, created_at
             FROM conversation_messages WHERE job_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![job_id.0], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, job_id, role, mtype, content, created) = row?;
            out.push(ConversationMessage {
                id,
                job_id: JobId(job_id),
                role: MessageRole::parse(&role)
                    .ok_or_else(|| StoreError::Serialization(format!("role: {role}")))?,
                message_type: MessageType::parse(&mtype)
                    .ok_or_else(|| StoreError::Serialization(format!("message_type: {mtype}")))?,
                content,
                created_at: parse_ts(&created)?,
            });
        }
        Ok(out)
    }

    // ── Files ───────────────────────────────────────────────────────

    pub async fn create_file(
        &self,
        job_id: JobId,
        paper_id: Option<PaperId>,
        origin: FileOrigin,
        stored_path: &str,
        file_type: &str,
        original_filename: &str,
    ) -> Result<FileRecord, StoreError> {
        let now = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO files (job_id, paper_id, origin, stored_path, file_type, original_filename, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job_id.0,
                paper_id.map(|p| p.0),
                origin.as_str(),
                stored_path,
                file_type,
                original_filename,
                ts(now),
            ],
        )?;
        Ok(FileRecord {
            id: FileId(conn.last_insert_rowid()),
            job_id,
            paper_id,
            origin,
            stored_path: stored_path.to_string(),
            file_type: file_type.to_string(),
            original_filename: original_filename.to_string(),
            created_at: now,
        })
    }

    pub async fn list_files(&self, job_id: JobId) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, paper_id, origin, stored_path, file_type, original_filename, created_at
             FROM files WHERE job_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![job_id.0], row_to_file)?;
        collect(rows)
    }

    pub async fn get_file(&self, id: FileId) -> Result<Option<FileRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, job_id, paper_id, origin, stored_path, file_type, original_filename, created_at
                 FROM files WHERE id = ?1",
                params![id.0],
                row_to_file,
            )
            .optional()?;
        row.transpose()
    }

    // ── Ingestion sources ───────────────────────────────────────────

    pub async fn create_source(
        &self,
        job_id: JobId,
        source_type: SourceType,
        source_ref: &str,
        raw_text: &str,
    ) -> Result<IngestionSource, StoreError> {
        let now = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO ingestion_sources (job_id, source_type, source_ref, raw_text, processed, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![job_id.0, source_type.as_str(), source_ref, raw_text, ts(now)],
        )?;
        Ok(IngestionSource {
            id: SourceId(conn.last_insert_rowid()),
            job_id,
            source_type,
            source_ref: source_ref.to_string(),
            raw_text: raw_text.to_string(),
            processed: false,
            created_at: now,
        })
    }

    pub async fn unprocessed_sources(&self, job_id: JobId) -> Result<Vec<IngestionSource>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, source_type, source_ref, raw_text, processed, created_at
             FROM ingestion_sources WHERE job_id = ?1 AND processed = 0 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![job_id.0], row_to_source)?;
        collect(rows)
    }

    pub async fn sources_by_ids(&self, ids: &[SourceId]) -> Result<Vec<IngestionSource>, StoreError> {
        let conn = self.conn.lock().await;
        let mut out = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, source_type, source_ref, raw_text, processed, created_at
             FROM ingestion_sources WHERE id = ?1",
        )?;
        for id in ids {
            if let Some(row) = stmt.query_row(params![id.0], row_to_source).optional()? {
                out.push(row?);
            }
        }
        Ok(out)
    }

    pub async fn update_source_text(&self, id: SourceId, text: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE ingestion_sources SET raw_text = ?1 WHERE id = ?2",
            params![text, id.0],
        )?;
        if rows == 0 {
            return Err(StoreError::SourceNotFound(id));
        }
        Ok(())
    }

    /// Monotone: once processed a source never flips back.
    pub async fn mark_source_processed(&self, id: SourceId) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE ingestion_sources SET processed = 1 WHERE id = ?1",
            params![id.0],
        )?;
        Ok(())
    }

    pub async fn count_sources(&self, job_id: JobId) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM ingestion_sources WHERE job_id = ?1",
            params![job_id.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Text blocks ─────────────────────────────────────────────────

    pub async fn create_block(
        &self,
        job_id: JobId,
        source_id: SourceId,
        block_text: &str,
        block_order: i64,
        segmentation_strategy: &str,
    ) -> Result<BlockId, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO text_blocks (job_id, source_id, block_text, block_order, segmentation_strategy, triples_extracted, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                job_id.0,
                source_id.0,
                block_text,
                block_order,
                segmentation_strategy,
                ts(Utc::now()),
            ],
        )?;
        Ok(BlockId(conn.last_insert_rowid()))
    }

    pub async fn unextracted_blocks(&self, job_id: JobId) -> Result<Vec<TextBlock>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, source_id, block_text, block_order, segmentation_strategy, triples_extracted, created_at
             FROM text_blocks WHERE job_id = ?1 AND triples_extracted = 0 ORDER BY source_id, block_order",
        )?;
        let rows = stmt.query_map(params![job_id.0], row_to_block)?;
        collect(rows)
    }

    pub async fn blocks_for_job(&self, job_id: JobId) -> Result<Vec<TextBlock>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, source_id, block_text, block_order, segmentation_strategy, triples_extracted, created_at
             FROM text_blocks WHERE job_id = ?1 ORDER BY source_id, block_order",
        )?;
        let rows = stmt.query_map(params![job_id.0], row_to_block)?;
        collect(rows)
    }

    /// Monotone true-once regardless of extraction outcome.
    pub async fn mark_block_extracted(&self, id: BlockId) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE text_blocks SET triples_extracted = 1 WHERE id = ?1",
            params![id.0],
        )?;
        Ok(())
    }

    // ── Triples ─────────────────────────────────────────────────────

    pub async fn insert_triples(
        &self,
        job_id: JobId,
        block_id: BlockId,
        source_id: SourceId,
        triples: &[(String, String, String)],
        extractor_name: &str,
    ) -> Result<usize, StoreError> {
        let now = ts(Utc::now());
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "INSERT INTO triples (job_id, block_id, source_id, subject, predicate, object, extractor_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for (s, p, o) in triples {
            stmt.execute(params![
                job_id.0,
                block_id.0,
                source_id.0,
                s,
                p,
                o,
                extractor_name,
                now,
            ])?;
        }
        Ok(triples.len())
    }

    pub async fn triples_for_job(&self, job_id: JobId) -> Result<Vec<Triple>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, block_id, source_id, subject, predicate, object, extractor_name, created_at
             FROM triples WHERE job_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![job_id.0], row_to_triple)?;
        collect(rows)
    }

    pub async fn triples_by_ids(&self, ids: &[TripleId]) -> Result<Vec<Triple>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, block_id, source_id, subject, predicate, object, extractor_name, created_at
             FROM triples WHERE id = ?1",
        )?;
        let mut out = Vec::new();
        for id in ids {
            if let Some(row) = stmt.query_row(params![id.0], row_to_triple).optional()? {
                out.push(row?);
            }
        }
        Ok(out)
    }

    // ── Semantic graphs ─────────────────────────────────────────────

    /// Persist a new active graph version, deactivating the prior one.
    /// Old versions are retained for audit.
    pub async fn persist_semantic_graph(
        &self,
        job_id: JobId,
        graph: &SemanticGraph,
    ) -> Result<SemanticGraphRecord, StoreError> {
        let now = Utc::now();
        let graph_json = to_json(graph)?;
        let conn = self.conn.lock().await;
        conn.execute_batch("BEGIN")?;
        let result = (|| -> Result<SemanticGraphRecord, StoreError> {
            let prev_version: i64 = conn.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM semantic_graphs WHERE job_id = ?1",
                params![job_id.0],
                |row| row.get(0),
            )?;
            conn.execute(
                "UPDATE semantic_graphs SET is_active = 0 WHERE job_id = ?1 AND is_active = 1",
                params![job_id.0],
            )?;
            conn.execute(
                "INSERT INTO semantic_graphs (job_id, graph_json, node_count, edge_count, version, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
                params![
                    job_id.0,
                    graph_json,
                    graph.node_count() as i64,
                    graph.edge_count() as i64,
                    prev_version + 1,
                    ts(now),
                ],
            )?;
            Ok(SemanticGraphRecord {
                id: GraphId(conn.last_insert_rowid()),
                job_id,
                graph: graph.clone(),
                node_count: graph.node_count() as i64,
                edge_count: graph.edge_count() as i64,
                version: prev_version + 1,
                is_active: true,
                created_at: now,
            })
        })();
        match result {
            Ok(record) => {
                conn.execute_batch("COMMIT")?;
                Ok(record)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    pub async fn active_semantic_graph(
        &self,
        job_id: JobId,
    ) -> Result<Option<SemanticGraphRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, job_id, graph_json, node_count, edge_count, version, is_active, created_at
                 FROM semantic_graphs WHERE job_id = ?1 AND is_active = 1",
                params![job_id.0],
                row_to_graph,
            )
            .optional()?;
        row.transpose()
    }

    pub async fn count_active_graphs(&self, job_id: JobId) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM semantic_graphs WHERE job_id = ?1 AND is_active = 1",
            params![job_id.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Hypotheses ──────────────────────────────────────────────────

    /// Replace the active hypothesis set: the previous set is deleted and a
    /// fresh one inserted with a bumped version.
    pub async fn replace_hypotheses(
        &self,
        job_id: JobId,
        hypotheses: &[NewHypothesis],
    ) -> Result<usize, StoreError> {
        let now = ts(Utc::now());
        let conn = self.conn.lock().await;
        conn.execute_batch("BEGIN")?;
        let result = (|| -> Result<usize, StoreError> {
            let prev_version: i64 = conn.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM hypotheses WHERE job_id = ?1",
                params![job_id.0],
                |row| row.get(0),
            )?;
            conn.execute("DELETE FROM hypotheses WHERE job_id = ?1", params![job_id.0])?;
            let mut stmt = conn.prepare(
                "INSERT INTO hypotheses
                    (job_id, source, target, path_json, predicates_json, explanation, confidence,
                     mode, passed_filter, filter_reason_json, triple_ids_json, source_ids_json,
                     block_ids_json, domain, is_active, version, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,1,?15,?16)",
            )?;
            for h in hypotheses {
                stmt.execute(params![
                    job_id.0,
                    h.source,
                    h.target,
                    to_json(&h.path)?,
                    to_json(&h.predicates)?,
                    h.explanation,
                    h.confidence,
                    h.mode.as_str(),
                    h.passed_filter as i64,
                    h.filter_reason.as_ref().map(to_json).transpose()?,
                    to_json(&h.triple_ids)?,
                    to_json(&h.source_ids)?,
                    to_json(&h.block_ids)?,
                    h.domain,
                    prev_version + 1,
                    now,
                ])?;
            }
            Ok(hypotheses.len())
        })();
        match result {
            Ok(count) => {
                conn.execute_batch("COMMIT")?;
                Ok(count)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    pub async fn active_hypotheses(&self, job_id: JobId) -> Result<Vec<Hypothesis>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, source, target, path_json, predicates_json, explanation, confidence,
                    mode, passed_filter, filter_reason_json, triple_ids_json, source_ids_json,
                    block_ids_json, domain, is_active, version, created_at
             FROM hypotheses WHERE job_id = ?1 AND is_active = 1
             ORDER BY confidence DESC, source, target",
        )?;
        let rows = stmt.query_map(params![job_id.0], row_to_hypothesis)?;
        collect(rows)
    }

    // ── Papers ──────────────────────────────────────────────────────

    pub async fn insert_paper(
        &self,
        candidate: &PaperCandidate,
        fingerprint: &str,
    ) -> Result<Paper, StoreError> {
        let now = Utc::now();
        let doi = candidate
            .doi
            .as_ref()
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty());
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT INTO papers (title, abstract_text, authors_json, year, venue, doi, external_json, fingerprint, pdf_url, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                candidate.title,
                candidate.abstract_text,
                to_json(&candidate.authors)?,
                candidate.year,
                candidate.venue,
                doi,
                to_json(&candidate.external_ids)?,
                fingerprint,
                candidate.pdf_url,
                candidate.source,
                ts(now),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, msg))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::DuplicatePaper {
                    reason: msg.unwrap_or_else(|| "unique constraint".to_string()),
                });
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Paper {
            id: PaperId(conn.last_insert_rowid()),
            title: candidate.title.clone(),
            abstract_text: candidate.abstract_text.clone(),
            authors: candidate.authors.clone(),
            year: candidate.year,
            venue: candidate.venue.clone(),
            doi,
            external_ids: candidate.external_ids.clone(),
            fingerprint: fingerprint.to_string(),
            pdf_url: candidate.pdf_url.clone(),
            source: candidate.source.clone(),
            created_at: now,
        })
    }

    pub async fn get_paper(&self, id: PaperId) -> Result<Option<Paper>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, title, abstract_text, authors_json, year, venue, doi, external_json, fingerprint, pdf_url, source, created_at
                 FROM papers WHERE id = ?1",
                params![id.0],
                row_to_paper,
            )
            .optional()?;
        row.transpose()
    }

    pub async fn find_paper_by_doi(&self, doi: &str) -> Result<Option<Paper>, StoreError> {
        let normalized = doi.trim().to_lowercase();
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, title, abstract_text, authors_json, year, venue, doi, external_json, fingerprint, pdf_url, source, created_at
                 FROM papers WHERE doi = ?1",
                params![normalized],
                row_to_paper,
            )
            .optional()?;
        row.transpose()
    }

    pub async fn find_paper_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Paper>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, title, abstract_text, authors_json, year, venue, doi, external_json, fingerprint, pdf_url, source, created_at
                 FROM papers WHERE fingerprint = ?1",
                params![fingerprint],
                row_to_paper,
            )
            .optional()?;
        row.transpose()
    }

    /// All (paper id, external_ids) pairs, for external-id duplicate scans.
    pub async fn paper_external_ids(
        &self,
    ) -> Result<Vec<(PaperId, BTreeMap<String, String>)>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT id, external_json FROM papers")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, json) = row?;
            out.push((PaperId(id), from_json(&json)?));
        }
        Ok(out)
    }

    /// All (paper id, fingerprint) pairs, for near-duplicate scans.
    pub async fn paper_fingerprints(&self) -> Result<Vec<(PaperId, String)>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT id, fingerprint FROM papers")?;
        let rows = stmt.query_map([], |row| {
            Ok((PaperId(row.get::<_, i64>(0)?), row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ── Strategic ledger ────────────────────────────────────────────

    /// Insert a ledger row unless the (job, paper) pair already exists.
    pub async fn upsert_evidence(
        &self,
        job_id: JobId,
        paper_id: PaperId,
        run_id: Option<SearchRunId>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO job_paper_evidence (job_id, paper_id, run_id, evaluated, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![job_id.0, paper_id.0, run_id.map(|r| r.0), ts(Utc::now())],
        )?;
        Ok(())
    }

    pub async fn evidence_for_job(&self, job_id: JobId) -> Result<Vec<JobPaperEvidence>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, paper_id, run_id, evaluated, impact_score, hypo_ref_count, cumulative_conf, entity_density, created_at
             FROM job_paper_evidence WHERE job_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![job_id.0], row_to_evidence)?;
        collect(rows)
    }

    pub async fn count_evidence(&self, job_id: JobId) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM job_paper_evidence WHERE job_id = ?1",
            params![job_id.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub async fn count_unevaluated_evidence(&self, job_id: JobId) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM job_paper_evidence WHERE job_id = ?1 AND evaluated = 0",
            params![job_id.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Unevaluated ledger rows, highest impact first (download order).
    pub async fn unevaluated_evidence_by_impact(
        &self,
        job_id: JobId,
    ) -> Result<Vec<JobPaperEvidence>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, paper_id, run_id, evaluated, impact_score, hypo_ref_count, cumulative_conf, entity_density, created_at
             FROM job_paper_evidence WHERE job_id = ?1 AND evaluated = 0
             ORDER BY impact_score DESC, id",
        )?;
        let rows = stmt.query_map(params![job_id.0], row_to_evidence)?;
        collect(rows)
    }

    /// Monotone: `evaluated` flips to true exactly once.
    pub async fn mark_evidence_evaluated(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE job_paper_evidence SET evaluated = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub async fn update_evidence_scores(
        &self,
        id: i64,
        impact_score: f64,
        hypo_ref_count: i64,
        cumulative_conf: f64,
        entity_density: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE job_paper_evidence
             SET impact_score = ?1, hypo_ref_count = ?2, cumulative_conf = ?3, entity_density = ?4
             WHERE id = ?5",
            params![impact_score, hypo_ref_count, cumulative_conf, entity_density, id],
        )?;
        Ok(())
    }

    // ── Search queries and runs ─────────────────────────────────────

    pub async fn find_search_query(
        &self,
        job_id: JobId,
        signature: &str,
    ) -> Result<Option<SearchQuery>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, job_id, hypothesis_signature, query_text, resolved_domain, status, reputation_score, config_json, created_at, updated_at
                 FROM search_queries WHERE job_id = ?1 AND hypothesis_signature = ?2",
                params![job_id.0, signature],
                row_to_query,
            )
            .optional()?;
        row.transpose()
    }

    pub async fn create_search_query(
        &self,
        job_id: JobId,
        signature: &str,
        query_text: &str,
        resolved_domain: Option<&str>,
        initial_reputation: i64,
        config_snapshot: &serde_json::Value,
    ) -> Result<SearchQuery, StoreError> {
        let now = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO search_queries (job_id, hypothesis_signature, query_text, resolved_domain, status, reputation_score, config_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job_id.0,
                signature,
                query_text,
                resolved_domain,
                SearchQueryStatus::New.as_str(),
                initial_reputation,
                to_json(config_snapshot)?,
                ts(now),
                ts(now),
            ],
        )?;
        Ok(SearchQuery {
            id: SearchQueryId(conn.last_insert_rowid()),
            job_id,
            hypothesis_signature: signature.to_string(),
            query_text: query_text.to_string(),
            resolved_domain: resolved_domain.map(|d| d.to_string()),
            status: SearchQueryStatus::New,
            reputation_score: initial_reputation,
            config_snapshot: config_snapshot.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_search_query(
        &self,
        id: SearchQueryId,
    ) -> Result<Option<SearchQuery>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, job_id, hypothesis_signature, query_text, resolved_domain, status, reputation_score, config_json, created_at, updated_at
                 FROM search_queries WHERE id = ?1",
                params![id.0],
                row_to_query,
            )
            .optional()?;
        row.transpose()
    }

    pub async fn queries_for_job(&self, job_id: JobId) -> Result<Vec<SearchQuery>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, hypothesis_signature, query_text, resolved_domain, status, reputation_score, config_json, created_at, updated_at
             FROM search_queries WHERE job_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![job_id.0], row_to_query)?;
        collect(rows)
    }

    pub async fn count_queries_with_status(
        &self,
        job_id: JobId,
        status: SearchQueryStatus,
    ) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM search_queries WHERE job_id = ?1 AND status = ?2",
            params![job_id.0, status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub async fn update_query_learning_state(
        &self,
        id: SearchQueryId,
        status: SearchQueryStatus,
        reputation_score: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE search_queries SET status = ?1, reputation_score = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), reputation_score, ts(Utc::now()), id.0],
        )?;
        if rows == 0 {
            return Err(StoreError::QueryNotFound(id));
        }
        Ok(())
    }

    pub async fn count_runs_for_query(&self, id: SearchQueryId) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM search_query_runs WHERE search_query_id = ?1",
            params![id.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub async fn record_search_run(
        &self,
        search_query_id: SearchQueryId,
        job_id: JobId,
        provider_used: &str,
        reason: &str,
        fetched: &[PaperId],
        accepted: &[PaperId],
        rejected: &[PaperId],
    ) -> Result<SearchQueryRun, StoreError> {
        let now = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO search_query_runs (search_query_id, job_id, provider_used, reason, fetched_json, accepted_json, rejected_json, signal_delta, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8)",
            params![
                search_query_id.0,
                job_id.0,
                provider_used,
                reason,
                to_json(&fetched)?,
                to_json(&accepted)?,
                to_json(&rejected)?,
                ts(now),
            ],
        )?;
        Ok(SearchQueryRun {
            id: SearchRunId(conn.last_insert_rowid()),
            search_query_id,
            job_id,
            provider_used: provider_used.to_string(),
            reason: reason.to_string(),
            fetched_paper_ids: fetched.to_vec(),
            accepted_paper_ids: accepted.to_vec(),
            rejected_paper_ids: rejected.to_vec(),
            signal_delta: None,
            created_at: now,
        })
    }

    pub async fn runs_for_job(&self, job_id: JobId) -> Result<Vec<SearchQueryRun>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, search_query_id, job_id, provider_used, reason, fetched_json, accepted_json, rejected_json, signal_delta, created_at
             FROM search_query_runs WHERE job_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![job_id.0], row_to_run)?;
        collect(rows)
    }

    /// Runs strictly inside the (previous decision, current decision) window
    /// with no signal applied yet.
    pub async fn pending_runs_between(
        &self,
        job_id: JobId,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<SearchQueryRun>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, search_query_id, job_id, provider_used, reason, fetched_json, accepted_json, rejected_json, signal_delta, created_at
             FROM search_query_runs
             WHERE job_id = ?1 AND created_at > ?2 AND created_at < ?3 AND signal_delta IS NULL
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![job_id.0, ts(after), ts(before)], row_to_run)?;
        collect(rows)
    }

    /// Set-once: writes the delta only while it is still NULL. Returns
    /// whether this call performed the write.
    pub async fn set_run_signal_delta(
        &self,
        id: SearchRunId,
        delta: i64,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE search_query_runs SET signal_delta = ?1 WHERE id = ?2 AND signal_delta IS NULL",
            params![delta, id.0],
        )?;
        Ok(rows == 1)
    }

    /// Union of `fetched_paper_ids` across all runs of a job.
    pub async fn all_fetched_paper_ids(&self, job_id: JobId) -> Result<Vec<PaperId>, StoreError> {
        let runs = self.runs_for_job(job_id).await?;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for run in runs {
            for id in run.fetched_paper_ids {
                if seen.insert(id) {
                    out.push(id);
                }
            }
        }
        Ok(out)
    }

    // ── Decision results ────────────────────────────────────────────

    pub async fn record_decision(
        &self,
        job_id: JobId,
        label: DecisionLabel,
        provider_used: &str,
        measurements_snapshot: &serde_json::Value,
        fallback_used: bool,
        fallback_reason: Option<&str>,
    ) -> Result<DecisionResult, StoreError> {
        let now = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO decision_results (job_id, decision_label, provider_used, snapshot_json, fallback_used, fallback_reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job_id.0,
                label.as_str(),
                provider_used,
                to_json(measurements_snapshot)?,
                fallback_used as i64,
                fallback_reason,
                ts(now),
            ],
        )?;
        Ok(DecisionResult {
            id: DecisionId(conn.last_insert_rowid()),
            job_id,
            decision_label: label,
            provider_used: provider_used.to_string(),
            measurements_snapshot: measurements_snapshot.clone(),
            fallback_used,
            fallback_reason: fallback_reason.map(|s| s.to_string()),
            created_at: now,
        })
    }

    /// The most recent decision for a job, if any.
    pub async fn latest_decision(&self, job_id: JobId) -> Result<Option<DecisionResult>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, job_id, decision_label, provider_used, snapshot_json, fallback_used, fallback_reason, created_at
                 FROM decision_results WHERE job_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![job_id.0],
                row_to_decision,
            )
            .optional()?;
        row.transpose()
    }

    /// The decision strictly before the given timestamp.
    pub async fn decision_before(
        &self,
        job_id: JobId,
        before: DateTime<Utc>,
    ) -> Result<Option<DecisionResult>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, job_id, decision_label, provider_used, snapshot_json, fallback_used, fallback_reason, created_at
                 FROM decision_results WHERE job_id = ?1 AND created_at < ?2
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![job_id.0, ts(before)],
                row_to_decision,
            )
            .optional()?;
        row.transpose()
    }

    pub async fn decisions_for_job(&self, job_id: JobId) -> Result<Vec<DecisionResult>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, decision_label, provider_used, snapshot_json, fallback_used, fallback_reason, created_at
             FROM decision_results WHERE job_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![job_id.0], row_to_decision)?;
        collect(rows)
    }

    // ── Verification results ────────────────────────────────────────

    pub async fn insert_verification(
        &self,
        job_id: JobId,
        source: &str,
        target: &str,
        connection_found: Option<bool>,
        connection_type: Option<&str>,
        path: &[String],
        explanation: &str,
        supporting_papers: &[PaperId],
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO verification_results (job_id, source, target, connection_found, connection_type, path_json, explanation, supporting_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job_id.0,
                source,
                target,
                connection_found.map(|b| b as i64),
                connection_type,
                to_json(&path)?,
                explanation,
                to_json(&supporting_papers)?,
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub async fn verification_for_job(
        &self,
        job_id: JobId,
    ) -> Result<Option<VerificationRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, job_id, source, target, connection_found, connection_type, path_json, explanation, supporting_json, created_at
                 FROM verification_results WHERE job_id = ?1 ORDER BY id DESC LIMIT 1",
                params![job_id.0],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, String>(9)?,
                    ))
                },
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((id, job_id, source, target, found, ctype, path, explanation, supporting, created)) => {
                Ok(Some(VerificationRecord {
                    id,
                    job_id: JobId(job_id),
                    source,
                    target,
                    connection_found: found.map(|v| v != 0),
                    connection_type: ctype,
                    path: from_json(&path)?,
                    explanation,
                    supporting_papers: from_json(&supporting)?,
                    created_at: parse_ts(&created)?,
                }))
            }
        }
    }

    // ── Work queue ──────────────────────────────────────────────────

    pub async fn queue_push(&self, job_id: JobId) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO work_queue (job_id, enqueued_at) VALUES (?1, ?2)",
            params![job_id.0, ts(Utc::now())],
        )?;
        Ok(())
    }

    /// Pop the oldest queued job id, if any.
    pub async fn queue_pop(&self) -> Result<Option<JobId>, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute_batch("BEGIN")?;
        let result = (|| -> Result<Option<JobId>, StoreError> {
            let head: Option<(i64, i64)> = conn
                .query_row(
                    "SELECT id, job_id FROM work_queue ORDER BY id LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match head {
                Some((id, job_id)) => {
                    conn.execute("DELETE FROM work_queue WHERE id = ?1", params![id])?;
                    Ok(Some(JobId(job_id)))
                }
                None => Ok(None),
            }
        })();
        match result {
            Ok(v) => {
                conn.execute_batch("COMMIT")?;
                Ok(v)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    pub async fn queue_len(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM work_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// ── Row-mapping helpers ─────────────────────────────────────────────

type MappedRow<T> = rusqlite::Result<Result<T, StoreError>>;

fn collect<T>(
    rows: impl Iterator<Item = rusqlite::Result<Result<T, StoreError>>>,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(StoreError::from)??);
    }
    Ok(out)
}

fn row_to_job(row: &rusqlite::Row<'_>) -> MappedRow<Job> {
    let id: i64 = row.get(0)?;
    let user_id: i64 = row.get(1)?;
    let mode: String = row.get(2)?;
    let status: String = row.get(3)?;
    let config_json: String = row.get(4)?;
    let seed_text: Option<String> = row.get(5)?;
    let verify_json: Option<String> = row.get(6)?;
    let result_json: Option<String> = row.get(7)?;
    let created: String = row.get(8)?;
    let updated: String = row.get(9)?;

    Ok((|| -> Result<Job, StoreError> {
        let mode = match mode.as_str() {
            "discovery" => JobMode::Discovery,
            "verification" => JobMode::Verification,
            other => return Err(StoreError::Serialization(format!("mode: {other}"))),
        };
        let status = JobStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("status: {status}")))?;
        Ok(Job {
            id: JobId(id),
            user_id: UserId(user_id),
            mode,
            status,
            config: from_json(&config_json)?,
            seed_text,
            verification_pair: verify_json.as_deref().map(from_json).transpose()?,
            result: result_json.as_deref().map(from_json).transpose()?,
            created_at: parse_ts(&created)?,
            updated_at: parse_ts(&updated)?,
        })
    })())
}

fn row_to_file(row: &rusqlite::Row<'_>) -> MappedRow<FileRecord> {
    let id: i64 = row.get(0)?;
    let job_id: i64 = row.get(1)?;
    let paper_id: Option<i64> = row.get(2)?;
    let origin: String = row.get(3)?;
    let stored_path: String = row.get(4)?;
    let file_type: String = row.get(5)?;
    let original_filename: String = row.get(6)?;
    let created: String = row.get(7)?;

    Ok((|| -> Result<FileRecord, StoreError> {
        Ok(FileRecord {
            id: FileId(id),
            job_id: JobId(job_id),
            paper_id: paper_id.map(PaperId),
            origin: FileOrigin::parse(&origin)
                .ok_or_else(|| StoreError::Serialization(format!("origin: {origin}")))?,
            stored_path,
            file_type,
            original_filename,
            created_at: parse_ts(&created)?,
        })
    })())
}

fn row_to_source(row: &rusqlite::Row<'_>) -> MappedRow<IngestionSource> {
    let id: i64 = row.get(0)?;
    let job_id: i64 = row.get(1)?;
    let source_type: String = row.get(2)?;
    let source_ref: String = row.get(3)?;
    let raw_text: String = row.get(4)?;
    let processed: i64 = row.get(5)?;
    let created: String = row.get(6)?;

    Ok((|| -> Result<IngestionSource, StoreError> {
        Ok(IngestionSource {
            id: SourceId(id),
            job_id: JobId(job_id),
            source_type: SourceType::parse(&source_type)
                .ok_or_else(|| StoreError::Serialization(format!("source_type: {source_type}")))?,
            source_ref,
            raw_text,
            processed: processed != 0,
            created_at: parse_ts(&created)?,
        })
    })())
}

fn row_to_block(row: &rusqlite::Row<'_>) -> MappedRow<TextBlock> {
    let id: i64 = row.get(0)?;
    let job_id: i64 = row.get(1)?;
    let source_id: i64 = row.get(2)?;
    let block_text: String = row.get(3)?;
    let block_order: i64 = row.get(4)?;
    let strategy: String = row.get(5)?;
    let extracted: i64 = row.get(6)?;
    let created: String = row.get(7)?;

    Ok((|| -> Result<TextBlock, StoreError> {
        Ok(TextBlock {
            id: BlockId(id),
            job_id: JobId(job_id),
            source_id: SourceId(source_id),
            block_text,
            block_order,
            segmentation_strategy: strategy,
            triples_extracted: extracted != 0,
            created_at: parse_ts(&created)?,
        })
    })())
}

fn row_to_triple(row: &rusqlite::Row<'_>) -> MappedRow<Triple> {
    let id: i64 = row.get(0)?;
    let job_id: i64 = row.get(1)?;
    let block_id: i64 = row.get(2)?;
    let source_id: i64 = row.get(3)?;
    let subject: String = row.get(4)?;
    let predicate: String = row.get(5)?;
    let object: String = row.get(6)?;
    let extractor_name: String = row.get(7)?;
    let created: String = row.get(8)?;

    Ok((|| -> Result<Triple, StoreError> {
        Ok(Triple {
            id: TripleId(id),
            job_id: JobId(job_id),
            block_id: BlockId(block_id),
            source_id: SourceId(source_id),
            subject,
            predicate,
            object,
            extractor_name,
            created_at: parse_ts(&created)?,
        })
    })())
}

fn row_to_graph(row: &rusqlite::Row<'_>) -> MappedRow<SemanticGraphRecord> {
    let id: i64 = row.get(0)?;
    let job_id: i64 = row.get(1)?;
    let graph_json: String = row.get(2)?;
    let node_count: i64 = row.get(3)?;
    let edge_count: i64 = row.get(4)?;
    let version: i64 = row.get(5)?;
    let is_active: i64 = row.get(6)?;
    let created: String = row.get(7)?;

    Ok((|| -> Result<SemanticGraphRecord, StoreError> {
        Ok(SemanticGraphRecord {
            id: GraphId(id),
            job_id: JobId(job_id),
            graph: from_json(&graph_json)?,
            node_count,
            edge_count,
            version,
            is_active: is_active != 0,
            created_at: parse_ts(&created)?,
        })
    })())
}

fn row_to_hypothesis(row: &rusqlite::Row<'_>) -> MappedRow<Hypothesis> {
    let id: i64 = row.get(0)?;
    let job_id: i64 = row.get(1)?;
    let source: String = row.get(2)?;
    let target: String = row.get(3)?;
    let path_json: String = row.get(4)?;
    let predicates_json: String = row.get(5)?;
    let explanation: String = row.get(6)?;
    let confidence: i64 = row.get(7)?;
    let mode: String = row.get(8)?;
    let passed_filter: i64 = row.get(9)?;
    let filter_reason_json: Option<String> = row.get(10)?;
    let triple_ids_json: String = row.get(11)?;
    let source_ids_json: String = row.get(12)?;
    let block_ids_json: String = row.get(13)?;
    let domain: Option<String> = row.get(14)?;
    let is_active: i64 = row.get(15)?;
    let version: i64 = row.get(16)?;
    let created: String = row.get(17)?;

    Ok((|| -> Result<Hypothesis, StoreError> {
        let mode = match mode.as_str() {
            "explore" => ReasoningMode::Explore,
            "query" => ReasoningMode::Query,
            other => return Err(StoreError::Serialization(format!("mode: {other}"))),
        };
        Ok(Hypothesis {
            id: HypothesisId(id),
            job_id: JobId(job_id),
            source,
            target,
            path: from_json(&path_json)?,
            predicates: from_json(&predicates_json)?,
            explanation,
            confidence,
            mode,
            passed_filter: passed_filter != 0,
            filter_reason: filter_reason_json.as_deref().map(from_json).transpose()?,
            triple_ids: from_json(&triple_ids_json)?,
            source_ids: from_json(&source_ids_json)?,
            block_ids: from_json(&block_ids_json)?,
            domain,
            is_active: is_active != 0,
            version,
            created_at: parse_ts(&created)?,
        })
    })())
}

fn row_to_paper(row: &rusqlite::Row<'_>) -> MappedRow<Paper> {
    let id: i64 = row.get(0)?;
    let title: String = row.get(1)?;
    let abstract_text: Option<String> = row.get(2)?;
    let authors_json: String = row.get(3)?;
    let year: Option<i64> = row.get(4)?;
    let venue: Option<String> = row.get(5)?;
    let doi: Option<String> = row.get(6)?;
    let external_json: String = row.get(7)?;
    let fingerprint: String = row.get(8)?;
    let pdf_url: Option<String> = row.get(9)?;
    let source: String = row.get(10)?;
    let created: String = row.get(11)?;

    Ok((|| -> Result<Paper, StoreError> {
        Ok(Paper {
            id: PaperId(id),
            title,
            abstract_text,
            authors: from_json(&authors_json)?,
            year,
            venue,
            doi,
            external_ids: from_json(&external_json)?,
            fingerprint,
            pdf_url,
            source,
            created_at: parse_ts(&created)?,
        })
    })())
}

fn row_to_evidence(row: &rusqlite::Row<'_>) -> MappedRow<JobPaperEvidence> {
    let id: i64 = row.get(0)?;
    let job_id: i64 = row.get(1)?;
    let paper_id: i64 = row.get(2)?;
    let run_id: Option<i64> = row.get(3)?;
    let evaluated: i64 = row.get(4)?;
    let impact_score: f64 = row.get(5)?;
    let hypo_ref_count: i64 = row.get(6)?;
    let cumulative_conf: f64 = row.get(7)?;
    let entity_density: i64 = row.get(8)?;
    let created: String = row.get(9)?;

    Ok((|| -> Result<JobPaperEvidence, StoreError> {
        Ok(JobPaperEvidence {
            id,
            job_id: JobId(job_id),
            paper_id: PaperId(paper_id),
            run_id: run_id.map(SearchRunId),
            evaluated: evaluated != 0,
            impact_score,
            hypo_ref_count,
            cumulative_conf,
            entity_density,
            created_at: parse_ts(&created)?,
        })
    })())
}

fn row_to_query(row: &rusqlite::Row<'_>) -> MappedRow<SearchQuery> {
    let id: i64 = row.get(0)?;
    let job_id: i64 = row.get(1)?;
    let signature: String = row.get(2)?;
    let query_text: String = row.get(3)?;
    let resolved_domain: Option<String> = row.get(4)?;
    let status: String = row.get(5)?;
    let reputation: i64 = row.get(6)?;
    let config_json: String = row.get(7)?;
    let created: String = row.get(8)?;
    let updated: String = row.get(9)?;

    Ok((|| -> Result<SearchQuery, StoreError> {
        Ok(SearchQuery {
            id: SearchQueryId(id),
            job_id: JobId(job_id),
            hypothesis_signature: signature,
            query_text,
            resolved_domain,
            status: SearchQueryStatus::parse(&status)
                .ok_or_else(|| StoreError::Serialization(format!("query status: {status}")))?,
            reputation_score: reputation,
            config_snapshot: from_json(&config_json)?,
            created_at: parse_ts(&created)?,
            updated_at: parse_ts(&updated)?,
        })
    })())
}

fn row_to_run(row: &rusqlite::Row<'_>) -> MappedRow<SearchQueryRun> {
    let id: i64 = row.get(0)?;
    let search_query_id: i64 = row.get(1)?;
    let job_id: i64 = row.get(2)?;
    let provider_used: String = row.get(3)?;
    let reason: String = row.get(4)?;
    let fetched_json: String = row.get(5)?;
    let accepted_json: String = row.get(6)?;
    let rejected_json: String = row.get(7)?;
    let signal_delta: Option<i64> = row.get(8)?;
    let created: String = row.get(9)?;

    Ok((|| -> Result<SearchQueryRun, StoreError> {
        Ok(SearchQueryRun {
            id: SearchRunId(id),
            search_query_id: SearchQueryId(search_query_id),
            job_id: JobId(job_id),
            provider_used,
            reason,
            fetched_paper_ids: from_json(&fetched_json)?,
            accepted_paper_ids: from_json(&accepted_json)?,
            rejected_paper_ids: from_json(&rejected_json)?,
            signal_delta,
            created_at: parse_ts(&created)?,
        })
    })())
}

fn row_to_decision(row: &rusqlite::Row<'_>) -> MappedRow<DecisionResult> {
    let id: i64 = row.get(0)?;
    let job_id: i64 = row.get(1)?;
    let label: String = row.get(2)?;
    let provider_used: String = row.get(3)?;
    let snapshot_json: String = row.get(4)?;
    let fallback_used: i64 = row.get(5)?;
    let fallback_reason: Option<String> = row.get(6)?;
    let created: String = row.get(7)?;

    Ok((|| -> Result<DecisionResult, StoreError> {
        Ok(DecisionResult {
            id: DecisionId(id),
            job_id: JobId(job_id),
            decision_label: DecisionLabel::parse(&label)
                .ok_or_else(|| StoreError::Serialization(format!("decision: {label}")))?,
            provider_used,
            measurements_snapshot: from_json(&snapshot_json)?,
            fallback_used: fallback_used != 0,
            fallback_reason,
            created_at: parse_ts(&created)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_job() -> (SqliteStore, JobId) {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = store
            .create_job(UserId(1), JobMode::Discovery, &JobConfig::default(), None, None)
            .await
            .unwrap();
        (store, job.id)
    }

    #[tokio::test]
    async fn create_and_load_job() {
        let (store, job_id) = store_with_job().await;
        let job = store.load_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.mode, JobMode::Discovery);
        assert!(store.load_job(JobId(999)).await.is_err());
    }

    #[tokio::test]
    async fn status_cas_has_exactly_one_winner() {
        let (store, job_id) = store_with_job().await;
        let first = store
            .update_status(job_id, JobStatus::Created, JobStatus::ReadyToIngest)
            .await
            .unwrap();
        let second = store
            .update_status(job_id, JobStatus::Created, JobStatus::ReadyToIngest)
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(
            store.load_job(job_id).await.unwrap().status,
            JobStatus::ReadyToIngest
        );
    }

    #[tokio::test]
    async fn source_and_block_lifecycle() {
        let (store, job_id) = store_with_job().await;
        let src = store
            .create_source(job_id, SourceType::UserText, "user_text_1", "CRISPR edits genes.")
            .await
            .unwrap();
        assert_eq!(store.unprocessed_sources(job_id).await.unwrap().len(), 1);

        let block_id = store
            .create_block(job_id, src.id, "CRISPR edits genes.", 1, "sentences")
            .await
            .unwrap();
        store.mark_source_processed(src.id).await.unwrap();
        assert!(store.unprocessed_sources(job_id).await.unwrap().is_empty());

        assert_eq!(store.unextracted_blocks(job_id).await.unwrap().len(), 1);
        store.mark_block_extracted(block_id).await.unwrap();
        assert!(store.unextracted_blocks(job_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn graph_versions_keep_single_active() {
        let (store, job_id) = store_with_job().await;
        let graph = SemanticGraph::default();
        let v1 = store.persist_semantic_graph(job_id, &graph).await.unwrap();
        let v2 = store.persist_semantic_graph(job_id, &graph).await.unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(store.count_active_graphs(job_id).await.unwrap(), 1);
        let active = store.active_semantic_graph(job_id).await.unwrap().unwrap();
        assert_eq!(active.version, 2);
    }

    #[tokio::test]
    async fn hypotheses_replace_previous_set() {
        let (store, job_id) = store_with_job().await;
        let hyp = NewHypothesis {
            source: "a".into(),
            target: "c".into(),
            path: vec!["a".into(), "b".into(), "c".into()],
            predicates: vec!["inhibits".into()],
            explanation: "a -[inhibits]-> b then b -> c".into(),
            confidence: 3,
            mode: ReasoningMode::Explore,
            passed_filter: true,
            filter_reason: None,
            triple_ids: vec![TripleId(1)],
            source_ids: vec![],
            block_ids: vec![],
            domain: None,
        };
        store.replace_hypotheses(job_id, &[hyp.clone(), hyp.clone()]).await.unwrap();
        assert_eq!(store.active_hypotheses(job_id).await.unwrap().len(), 2);

        store.replace_hypotheses(job_id, &[hyp]).await.unwrap();
        let active = store.active_hypotheses(job_id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version, 2);
    }

    #[tokio::test]
    async fn papers_reject_duplicate_doi_and_fingerprint() {
        let store = SqliteStore::open_in_memory().unwrap();
        let candidate = PaperCandidate {
            title: "CRISPR and neural development".into(),
            doi: Some("10.1000/xyz".into()),
            source: "semantic_scholar".into(),
            ..Default::default()
        };
        store.insert_paper(&candidate, "fp-1").await.unwrap();
        // Same fingerprint → constraint violation.
        assert!(matches!(
            store.insert_paper(&candidate, "fp-1").await,
            Err(StoreError::DuplicatePaper { .. })
        ));
        // Same DOI, different fingerprint → still rejected.
        assert!(matches!(
            store.insert_paper(&candidate, "fp-2").await,
            Err(StoreError::DuplicatePaper { .. })
        ));
    }

    #[tokio::test]
    async fn evidence_is_unique_per_job_paper() {
        let (store, job_id) = store_with_job().await;
        let paper = store
            .insert_paper(
                &PaperCandidate {
                    title: "p".into(),
                    source: "arxiv".into(),
                    ..Default::default()
                },
                "fp",
            )
            .await
            .unwrap();
        store.upsert_evidence(job_id, paper.id, None).await.unwrap();
        store.upsert_evidence(job_id, paper.id, None).await.unwrap();
        assert_eq!(store.count_evidence(job_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_signal_delta_is_set_once() {
        let (store, job_id) = store_with_job().await;
        let query = store
            .create_search_query(job_id, "sig", "q", None, 0, &serde_json::json!({}))
            .await
            .unwrap();
        let run = store
            .record_search_run(query.id, job_id, "semantic_scholar", "initial_attempt", &[], &[], &[])
            .await
            .unwrap();
        assert!(store.set_run_signal_delta(run.id, 1).await.unwrap());
        assert!(!store.set_run_signal_delta(run.id, -1).await.unwrap());
        let runs = store.runs_for_job(job_id).await.unwrap();
        assert_eq!(runs[0].signal_delta, Some(1));
    }

    #[tokio::test]
    async fn decision_window_queries() {
        let (store, job_id) = store_with_job().await;
        let snapshot = serde_json::json!({"passed_hypothesis_count": 4});
        let d1 = store
            .record_decision(job_id, DecisionLabel::FetchMoreLiterature, "rule_based", &snapshot, false, None)
            .await
            .unwrap();
        let query = store
            .create_search_query(job_id, "sig", "q", None, 0, &serde_json::json!({}))
            .await
            .unwrap();
        let run = store
            .record_search_run(query.id, job_id, "semantic_scholar", "initial_attempt", &[], &[], &[])
            .await
            .unwrap();
        let d2 = store
            .record_decision(job_id, DecisionLabel::HaltConfident, "rule_based", &snapshot, false, None)
            .await
            .unwrap();

        let pending = store
            .pending_runs_between(job_id, d1.created_at, d2.created_at)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, run.id);

        let prev = store.decision_before(job_id, d2.created_at).await.unwrap().unwrap();
        assert_eq!(prev.id, d1.id);
        let latest = store.latest_decision(job_id).await.unwrap().unwrap();
        assert_eq!(latest.id, d2.id);
    }

    #[tokio::test]
    async fn work_queue_is_fifo() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.queue_push(JobId(1)).await.unwrap();
        store.queue_push(JobId(2)).await.unwrap();
        assert_eq!(store.queue_pop().await.unwrap(), Some(JobId(1)));
        assert_eq!(store.queue_pop().await.unwrap(), Some(JobId(2)));
        assert_eq!(store.queue_pop().await.unwrap(), None);
    }
}
