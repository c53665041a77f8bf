//! SQLite Storage Implementation
//!
//! Core persistence layer. One writer connection behind a mutex matches the
//! embedded engine's single-writer model; reads go through a separate
//! connection. Every multi-row write on the critical path runs inside a
//! single transaction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};

use crate::causal::{Hyperedge, RelationType};
use crate::learning::{MemrlQueryRecord, PatternWeight, Trajectory, WeightCheckpoint};
use crate::memory::{Entry, EntrySource, MemoryStats};
use crate::provenance::ProvenanceRecord;

use super::migrations::{self, SUPPORTED_SCHEMA_VERSION};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
    /// Store was created by a newer build
    #[error("Schema version {found} is newer than supported {supported}")]
    SchemaTooNew {
        /// Version found on disk
        found: u32,
        /// Newest version this build understands
        supported: u32,
    },
    /// Write attempted on a read-only store
    #[error("Store is opened read-only")]
    ReadOnly,
    /// Constraint violated (duplicate label, cyclic provenance)
    #[error("Constraint violation: {0}")]
    Constraint(String),
    /// Serialization of a persisted JSON column failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Outcome of a cascading entry delete
#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    /// False when the entry did not exist
    pub existed: bool,
    /// Vector label freed, if the entry was indexed
    pub label: Option<u64>,
    /// Causal edge ids removed because they touched the entry
    pub removed_causal_ids: Vec<String>,
}

// ============================================================================
// STORAGE
// ============================================================================

/// Main storage struct
///
/// Uses separate reader/writer connections for interior mutability. All
/// methods take `&self`, making Storage `Send + Sync` so the facade can hand
/// out `Arc<Storage>` to the subsystems.
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    read_only: bool,
    path: PathBuf,
}

impl Storage {
    /// Apply PRAGMAs and optional encryption to a connection
    fn configure_connection(conn: &Connection, read_only: bool) -> Result<()> {
        // Apply encryption key if SQLCipher is enabled and key is provided
        #[cfg(feature = "encryption")]
        {
            if let Ok(key) = std::env::var("MNEMON_ENCRYPTION_KEY") {
                if !key.is_empty() {
                    conn.pragma_update(None, "key", &key)?;
                }
            }
        }

        if read_only {
            conn.execute_batch(
                "PRAGMA query_only = ON;
                 PRAGMA busy_timeout = 5000;",
            )?;
            return Ok(());
        }

        // Configure SQLite for performance
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;

        Ok(())
    }

    fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("ai", "mnemon", "core").ok_or_else(|| {
            StorageError::Init("Could not determine project directories".to_string())
        })?;
        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        Ok(data_dir.join("mnemon.db"))
    }

    /// Create or open a store, applying pending migrations
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => {
                if let Some(parent) = p.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                p
            }
            None => Self::default_path()?,
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn, false)?;

        // Refuse stores written by a newer build before touching them
        let found = migrations::get_current_version(&writer_conn)?;
        if found > SUPPORTED_SCHEMA_VERSION {
            return Err(StorageError::SchemaTooNew {
                found,
                supported: SUPPORTED_SCHEMA_VERSION,
            });
        }

        migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn, false)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            read_only: false,
            path,
        })
    }

    /// Open another instance's store without ever writing to it
    pub fn open_read_only(path: PathBuf) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let writer_conn = Connection::open_with_flags(&path, flags)?;
        Self::configure_connection(&writer_conn, true)?;

        let found = migrations::get_current_version(&writer_conn)?;
        if found > SUPPORTED_SCHEMA_VERSION {
            return Err(StorageError::SchemaTooNew {
                found,
                supported: SUPPORTED_SCHEMA_VERSION,
            });
        }

        let reader_conn = Connection::open_with_flags(&path, flags)?;
        Self::configure_connection(&reader_conn, true)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            read_only: true,
            path,
        })
    }

    /// Path of the underlying database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when opened through `open_read_only`
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Current schema version
    pub fn schema_version(&self) -> Result<u32> {
        let reader = self.read_lock()?;
        Ok(migrations::get_current_version(&reader)?)
    }

    fn read_lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StorageError::Init("Reader lock poisoned".into()))
    }

    fn write_lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        self.writer
            .lock()
            .map_err(|_| StorageError::Init("Writer lock poisoned".into()))
    }

    // ========================================================================
    // ENTRIES
    // ========================================================================

    /// Insert an entry with its tags and provenance in one transaction
    ///
    /// Parents must already exist; the entry starts with
    /// `pending_embedding` as carried on the struct.
    pub fn store_entry(&self, entry: &Entry, provenance: &ProvenanceRecord) -> Result<()> {
        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;

        for parent in provenance.live_parents() {
            let exists: Option<i64> = tx
                .query_row("SELECT 1 FROM entries WHERE id = ?1", params![parent], |r| {
                    r.get(0)
                })
                .optional()?;
            if exists.is_none() {
                return Err(StorageError::NotFound(format!("parent entry {parent}")));
            }
        }

        tx.execute(
            "INSERT INTO entries (
                id, content, source, importance, confidence,
                created_at, updated_at, session_id, agent_id, context,
                q_value, pending_embedding, embedding_attempts
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0)",
            params![
                entry.id,
                entry.content,
                entry.source.as_str(),
                entry.importance,
                entry.confidence,
                entry.created_at.to_rfc3339(),
                entry.updated_at.to_rfc3339(),
                entry.session_id,
                entry.agent_id,
                entry.context.as_ref().map(|c| c.to_string()),
                entry.q_value,
                entry.pending_embedding as i64,
            ],
        )?;

        for tag in &entry.tags {
            tx.execute(
                "INSERT OR IGNORE INTO tags (entry_id, tag) VALUES (?1, ?2)",
                params![entry.id, tag],
            )?;
        }

        tx.execute(
            "INSERT INTO provenance (entry_id, confidence, relevance, lineage_depth, l_score)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id,
                provenance.confidence,
                provenance.relevance,
                provenance.lineage_depth,
                provenance.l_score,
            ],
        )?;

        for (order_index, parent) in provenance.parent_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO provenance_parents (entry_id, parent_id, order_index)
                 VALUES (?1, ?2, ?3)",
                params![entry.id, parent, order_index as i64],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn map_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
        let created: String = row.get(5)?;
        let updated: String = row.get(6)?;
        let context: Option<String> = row.get(9)?;
        let source: String = row.get(2)?;
        Ok(Entry {
            id: row.get(0)?,
            content: row.get(1)?,
            source: EntrySource::parse_name(&source),
            importance: row.get(3)?,
            confidence: row.get(4)?,
            tags: vec![],
            created_at: parse_ts(&created),
            updated_at: parse_ts(&updated),
            session_id: row.get(7)?,
            agent_id: row.get(8)?,
            context: context.and_then(|c| serde_json::from_str(&c).ok()),
            q_value: row.get(10)?,
            pending_embedding: row.get::<_, i64>(11)? != 0,
        })
    }

    const ENTRY_COLUMNS: &'static str = "id, content, source, importance, confidence, \
         created_at, updated_at, session_id, agent_id, context, q_value, pending_embedding";

    /// Fetch a single entry with its tags
    pub fn get_entry(&self, id: &str) -> Result<Option<Entry>> {
        let reader = self.read_lock()?;
        let entry = reader
            .query_row(
                &format!("SELECT {} FROM entries WHERE id = ?1", Self::ENTRY_COLUMNS),
                params![id],
                Self::map_entry_row,
            )
            .optional()?;

        let Some(mut entry) = entry else {
            return Ok(None);
        };

        let mut stmt = reader.prepare("SELECT tag FROM tags WHERE entry_id = ?1 ORDER BY tag")?;
        entry.tags = stmt
            .query_map(params![id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(Some(entry))
    }

    /// Batch-fetch entries, preserving the input order; missing ids skipped
    pub fn get_batch_entries(&self, ids: &[String]) -> Result<Vec<Entry>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let reader = self.read_lock()?;
        let placeholders = placeholders(ids.len());

        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM entries WHERE id IN ({placeholders})",
            Self::ENTRY_COLUMNS
        ))?;
        let mut by_id: HashMap<String, Entry> = stmt
            .query_map(params_from_iter(ids.iter()), Self::map_entry_row)?
            .filter_map(|r| r.ok())
            .map(|e| (e.id.clone(), e))
            .collect();

        let mut stmt = reader.prepare(&format!(
            "SELECT entry_id, tag FROM tags WHERE entry_id IN ({placeholders}) ORDER BY tag"
        ))?;
        let tag_rows: Vec<(String, String)> = stmt
            .query_map(params_from_iter(ids.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        for (entry_id, tag) in tag_rows {
            if let Some(entry) = by_id.get_mut(&entry_id) {
                entry.tags.push(tag);
            }
        }

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Update an entry's mutable fields and replace its tag set
    ///
    /// The provenance row's confidence follows the entry's so L-Score
    /// recomputation sees the fresh value.
    pub fn update_entry(&self, entry: &Entry) -> Result<()> {
        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;

        let changed = tx.execute(
            "UPDATE entries SET content = ?2, importance = ?3, confidence = ?4,
                 context = ?5, updated_at = ?6, pending_embedding = ?7
             WHERE id = ?1",
            params![
                entry.id,
                entry.content,
                entry.importance,
                entry.confidence,
                entry.context.as_ref().map(|c| c.to_string()),
                entry.updated_at.to_rfc3339(),
                entry.pending_embedding as i64,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("entry {}", entry.id)));
        }

        tx.execute("DELETE FROM tags WHERE entry_id = ?1", params![entry.id])?;
        for tag in &entry.tags {
            tx.execute(
                "INSERT OR IGNORE INTO tags (entry_id, tag) VALUES (?1, ?2)",
                params![entry.id, tag],
            )?;
        }

        tx.execute(
            "UPDATE provenance SET confidence = ?2 WHERE entry_id = ?1",
            params![entry.id, entry.confidence],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Delete an entry with full cascade in one transaction
    ///
    /// Cascades: tags and provenance rows (FK), vector mapping and raw
    /// vector, causal edges touching the entry, trajectory references, and
    /// children's parent slots re-pointed to NULL.
    pub fn delete_entry(&self, id: &str) -> Result<DeleteOutcome> {
        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;

        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM entries WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Ok(DeleteOutcome::default());
        }

        let label: Option<u64> = tx
            .query_row(
                "SELECT label FROM vector_mappings WHERE entry_id = ?1",
                params![id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .map(|l| l as u64);

        // Causal edges touching the entry on either side
        let needle = format!("%\"{id}\"%");
        let mut removed_causal_ids: Vec<String> = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT id, source_ids, target_ids FROM causal_edges
                 WHERE source_ids LIKE ?1 OR target_ids LIKE ?1",
            )?;
            let candidates: Vec<(String, String, String)> = stmt
                .query_map(params![needle], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .filter_map(|r| r.ok())
                .collect();
            for (edge_id, sources, targets) in candidates {
                let sources: Vec<String> = serde_json::from_str(&sources)?;
                let targets: Vec<String> = serde_json::from_str(&targets)?;
                if sources.iter().any(|s| s == id) || targets.iter().any(|t| t == id) {
                    removed_causal_ids.push(edge_id);
                }
            }
        }
        for edge_id in &removed_causal_ids {
            tx.execute("DELETE FROM causal_edges WHERE id = ?1", params![edge_id])?;
        }

        // Children keep their provenance row; the vanished parent slot
        // becomes NULL (roots of children re-parented to null)
        tx.execute(
            "UPDATE provenance_parents SET parent_id = NULL WHERE parent_id = ?1",
            params![id],
        )?;

        // Scrub trajectory references, keeping scores aligned
        {
            let mut stmt = tx.prepare(
                "SELECT id, matched_entry_ids, match_scores FROM trajectories
                 WHERE matched_entry_ids LIKE ?1",
            )?;
            let rows: Vec<(String, String, String)> = stmt
                .query_map(params![needle], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .filter_map(|r| r.ok())
                .collect();
            for (traj_id, matched, scores) in rows {
                let matched: Vec<String> = serde_json::from_str(&matched)?;
                let scores: Vec<f64> = serde_json::from_str(&scores)?;
                let kept: Vec<(String, f64)> = matched
                    .into_iter()
                    .zip(scores)
                    .filter(|(m, _)| m != id)
                    .collect();
                let (ids, kept_scores): (Vec<String>, Vec<f64>) = kept.into_iter().unzip();
                tx.execute(
                    "UPDATE trajectories SET matched_entry_ids = ?2, match_scores = ?3
                     WHERE id = ?1",
                    params![
                        traj_id,
                        serde_json::to_string(&ids)?,
                        serde_json::to_string(&kept_scores)?,
                    ],
                )?;
            }
        }

        if let Some(label) = label {
            tx.execute("DELETE FROM vectors WHERE label = ?1", params![label as i64])?;
        }
        tx.execute(
            "DELETE FROM vector_mappings WHERE entry_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM entries WHERE id = ?1", params![id])?;

        tx.commit()?;
        Ok(DeleteOutcome {
            existed: true,
            label,
            removed_causal_ids,
        })
    }

    // ========================================================================
    // PROVENANCE
    // ========================================================================

    fn provenance_for(conn: &Connection, id: &str) -> Result<Option<ProvenanceRecord>> {
        let base = conn
            .query_row(
                "SELECT confidence, relevance, lineage_depth, l_score
                 FROM provenance WHERE entry_id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, f64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((confidence, relevance, lineage_depth, l_score)) = base else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT parent_id FROM provenance_parents
             WHERE entry_id = ?1 ORDER BY order_index",
        )?;
        let parent_ids: Vec<Option<String>> = stmt
            .query_map(params![id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(Some(ProvenanceRecord {
            entry_id: id.to_string(),
            parent_ids,
            confidence,
            relevance,
            lineage_depth,
            l_score,
        }))
    }

    /// Fetch one entry's provenance record
    pub fn get_provenance(&self, id: &str) -> Result<Option<ProvenanceRecord>> {
        let reader = self.read_lock()?;
        Self::provenance_for(&reader, id)
    }

    /// Batch-fetch provenance records; missing ids skipped
    pub fn get_batch_provenance(&self, ids: &[String]) -> Result<Vec<ProvenanceRecord>> {
        let reader = self.read_lock()?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = Self::provenance_for(&reader, id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Live parent ids in order
    pub fn get_parent_ids(&self, id: &str) -> Result<Vec<String>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare(
            "SELECT parent_id FROM provenance_parents
             WHERE entry_id = ?1 AND parent_id IS NOT NULL ORDER BY order_index",
        )?;
        Ok(stmt
            .query_map(params![id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect())
    }

    /// Ids of entries that list this entry as a parent
    pub fn get_child_ids(&self, id: &str) -> Result<Vec<String>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare(
            "SELECT DISTINCT entry_id FROM provenance_parents
             WHERE parent_id = ?1 ORDER BY entry_id",
        )?;
        Ok(stmt
            .query_map(params![id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect())
    }

    /// All transitive ancestors via one recursive query, nearest first
    pub fn get_lineage_entry_ids(&self, id: &str, max_depth: i64) -> Result<Vec<String>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare(
            "WITH RECURSIVE lineage(id, depth) AS (
                 SELECT parent_id, 1 FROM provenance_parents
                 WHERE entry_id = ?1 AND parent_id IS NOT NULL
                 UNION
                 SELECT pp.parent_id, l.depth + 1
                 FROM provenance_parents pp
                 JOIN lineage l ON pp.entry_id = l.id
                 WHERE pp.parent_id IS NOT NULL AND l.depth < ?2
             )
             SELECT id, MIN(depth) AS d FROM lineage GROUP BY id ORDER BY d, id",
        )?;
        Ok(stmt
            .query_map(params![id, max_depth], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect())
    }

    /// All transitive descendants via one recursive query, nearest first
    pub fn get_descendant_entry_ids(&self, id: &str, max_depth: i64) -> Result<Vec<String>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare(
            "WITH RECURSIVE descendants(id, depth) AS (
                 SELECT entry_id, 1 FROM provenance_parents WHERE parent_id = ?1
                 UNION
                 SELECT pp.entry_id, d.depth + 1
                 FROM provenance_parents pp
                 JOIN descendants d ON pp.parent_id = d.id
                 WHERE d.depth < ?2
             )
             SELECT id, MIN(depth) AS d FROM descendants GROUP BY id ORDER BY d, id",
        )?;
        Ok(stmt
            .query_map(params![id, max_depth], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect())
    }

    /// Persist a recomputed L-Score
    pub fn update_l_score(&self, id: &str, value: f64) -> Result<()> {
        let writer = self.write_lock()?;
        let changed = writer.execute(
            "UPDATE provenance SET l_score = ?2 WHERE entry_id = ?1",
            params![id, value.clamp(0.0, 1.0)],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("provenance for {id}")));
        }
        Ok(())
    }

    // ========================================================================
    // CAUSAL EDGES
    // ========================================================================

    /// Persist a hyperedge; every referenced entry must exist
    pub fn store_causal(&self, edge: &Hyperedge) -> Result<()> {
        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;

        for entry_id in edge.source_ids.iter().chain(edge.target_ids.iter()) {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM entries WHERE id = ?1",
                    params![entry_id],
                    |r| r.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StorageError::NotFound(format!("entry {entry_id}")));
            }
        }

        tx.execute(
            "INSERT INTO causal_edges
                 (id, edge_type, source_ids, target_ids, strength, created_at, ttl_ms, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                edge.id,
                edge.relation.as_str(),
                serde_json::to_string(&edge.source_ids)?,
                serde_json::to_string(&edge.target_ids)?,
                edge.strength,
                edge.created_at.to_rfc3339(),
                edge.ttl_ms,
                edge.expires_at.map(|t| t.to_rfc3339()),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn map_causal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Hyperedge, bool)> {
        let relation: String = row.get(1)?;
        let sources: String = row.get(2)?;
        let targets: String = row.get(3)?;
        let created: String = row.get(5)?;
        let expires: Option<String> = row.get(7)?;

        let parsed_relation = RelationType::parse_name(&relation);
        let edge = Hyperedge {
            id: row.get(0)?,
            relation: parsed_relation.unwrap_or(RelationType::Correlates),
            source_ids: serde_json::from_str(&sources).unwrap_or_default(),
            target_ids: serde_json::from_str(&targets).unwrap_or_default(),
            strength: row.get(4)?,
            created_at: parse_ts(&created),
            ttl_ms: row.get(6)?,
            expires_at: expires.map(|t| parse_ts(&t)),
        };
        Ok((edge, parsed_relation.is_some()))
    }

    fn causal_where(&self, clause: &str) -> Result<Vec<Hyperedge>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT id, edge_type, source_ids, target_ids, strength, created_at, ttl_ms, expires_at
             FROM causal_edges WHERE {clause} ORDER BY created_at, id"
        ))?;
        let now = Utc::now().to_rfc3339();
        Ok(stmt
            .query_map(params![now], Self::map_causal_row)?
            .filter_map(|r| r.ok())
            .filter_map(|(edge, valid)| {
                if !valid {
                    tracing::warn!("Skipping causal edge {} with unknown type", edge.id);
                    return None;
                }
                Some(edge)
            })
            .collect())
    }

    /// All edges whose TTL has not lapsed
    pub fn get_active_causal(&self) -> Result<Vec<Hyperedge>> {
        self.causal_where("expires_at IS NULL OR expires_at > ?1")
    }

    /// All edges past their TTL, awaiting cleanup
    pub fn get_expired_causal(&self) -> Result<Vec<Hyperedge>> {
        self.causal_where("expires_at IS NOT NULL AND expires_at <= ?1")
    }

    /// Remove every expired edge in one transaction; returns the removed ids
    pub fn delete_expired_causal(&self) -> Result<Vec<String>> {
        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;
        let now = Utc::now().to_rfc3339();

        let ids: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM causal_edges
                 WHERE expires_at IS NOT NULL AND expires_at <= ?1 ORDER BY id",
            )?;
            stmt.query_map(params![now], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        };

        for id in &ids {
            tx.execute("DELETE FROM causal_edges WHERE id = ?1", params![id])?;
        }

        tx.commit()?;
        Ok(ids)
    }

    // ========================================================================
    // TRAJECTORIES & FEEDBACK
    // ========================================================================

    /// Persist an opened trajectory
    pub fn store_trajectory(&self, trajectory: &Trajectory) -> Result<()> {
        let writer = self.write_lock()?;
        writer.execute(
            "INSERT INTO trajectories
                 (id, query_text, matched_entry_ids, match_scores, embedding, route, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                trajectory.id,
                trajectory.query_text,
                serde_json::to_string(&trajectory.matched_entry_ids)?,
                serde_json::to_string(&trajectory.match_scores)?,
                trajectory
                    .embedding
                    .as_ref()
                    .map(|v| v.iter().flat_map(|f| f.to_le_bytes()).collect::<Vec<u8>>()),
                trajectory.route,
                trajectory.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn map_trajectory_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Trajectory> {
        let matched: String = row.get(2)?;
        let scores: String = row.get(3)?;
        let embedding: Option<Vec<u8>> = row.get(4)?;
        let created: String = row.get(6)?;
        Ok(Trajectory {
            id: row.get(0)?,
            query_text: row.get(1)?,
            matched_entry_ids: serde_json::from_str(&matched).unwrap_or_default(),
            match_scores: serde_json::from_str(&scores).unwrap_or_default(),
            embedding: embedding.map(|bytes| {
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect()
            }),
            route: row.get(5)?,
            created_at: parse_ts(&created),
            feedback: row.get(7)?,
        })
    }

    const TRAJECTORY_COLUMNS: &'static str =
        "t.id, t.query_text, t.matched_entry_ids, t.match_scores, t.embedding, t.route, \
         t.created_at, f.quality";

    /// Fetch a trajectory with its feedback, if any
    pub fn get_trajectory(&self, id: &str) -> Result<Option<Trajectory>> {
        let reader = self.read_lock()?;
        Ok(reader
            .query_row(
                &format!(
                    "SELECT {} FROM trajectories t
                     LEFT JOIN feedback f ON f.trajectory_id = t.id
                     WHERE t.id = ?1",
                    Self::TRAJECTORY_COLUMNS
                ),
                params![id],
                Self::map_trajectory_row,
            )
            .optional()?)
    }

    /// Record feedback for a trajectory exactly once
    ///
    /// Returns false if feedback already existed (benign duplicate).
    pub fn store_feedback(&self, trajectory_id: &str, quality: f64) -> Result<bool> {
        let writer = self.write_lock()?;
        let exists: Option<i64> = writer
            .query_row(
                "SELECT 1 FROM trajectories WHERE id = ?1",
                params![trajectory_id],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StorageError::NotFound(format!(
                "trajectory {trajectory_id}"
            )));
        }

        let inserted = writer.execute(
            "INSERT OR IGNORE INTO feedback (trajectory_id, quality, created_at)
             VALUES (?1, ?2, ?3)",
            params![trajectory_id, quality, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted == 1)
    }

    /// Oldest-first trajectories still awaiting feedback
    pub fn get_pending_feedback(&self, limit: usize) -> Result<Vec<Trajectory>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM trajectories t
             LEFT JOIN feedback f ON f.trajectory_id = t.id
             WHERE f.trajectory_id IS NULL
             ORDER BY t.created_at, t.id LIMIT ?1",
            Self::TRAJECTORY_COLUMNS
        ))?;
        Ok(stmt
            .query_map(params![limit as i64], Self::map_trajectory_row)?
            .filter_map(|r| r.ok())
            .collect())
    }

    /// Age out trajectories created before the cutoff
    pub fn prune_trajectories_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let writer = self.write_lock()?;
        let removed = writer.execute(
            "DELETE FROM trajectories WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }

    // ========================================================================
    // Q-VALUES
    // ========================================================================

    /// Batch-fetch entry Q-values
    pub fn get_q_values_batch(&self, ids: &[String]) -> Result<HashMap<String, f64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT id, q_value FROM entries WHERE id IN ({})",
            placeholders(ids.len())
        ))?;
        Ok(stmt
            .query_map(params_from_iter(ids.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect())
    }

    /// Apply the EMA rule `q += α (r − q)` to a batch, atomically
    ///
    /// Either every listed entry's Q-value advances or none do. Returns the
    /// number of rows updated.
    pub fn update_q_values_batch(
        &self,
        updates: &[(String, f64)],
        alpha: f64,
        min_q: f64,
        max_q: f64,
    ) -> Result<usize> {
        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;
        let mut updated = 0usize;
        for (id, reward) in updates {
            updated += tx.execute(
                "UPDATE entries
                 SET q_value = MIN(?4, MAX(?3, q_value + ?2 * (?5 - q_value)))
                 WHERE id = ?1",
                params![id, alpha, min_q, max_q, reward],
            )?;
        }
        tx.commit()?;
        Ok(updated)
    }

    // ========================================================================
    // MEMRL QUERIES
    // ========================================================================

    /// Persist a two-phase ranking snapshot
    pub fn store_memrl_query(&self, record: &MemrlQueryRecord) -> Result<()> {
        let writer = self.write_lock()?;
        writer.execute(
            "INSERT INTO memrl_queries
                 (id, query_text, entry_ids, similarities, q_values, delta, lambda,
                  created_at, feedback_applied)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                record.id,
                record.query_text,
                serde_json::to_string(&record.entry_ids)?,
                serde_json::to_string(&record.similarities)?,
                serde_json::to_string(&record.q_values)?,
                record.delta,
                record.lambda,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a persisted ranking snapshot
    pub fn get_memrl_query(&self, id: &str) -> Result<Option<MemrlQueryRecord>> {
        let reader = self.read_lock()?;
        Ok(reader
            .query_row(
                "SELECT id, query_text, entry_ids, similarities, q_values, delta, lambda,
                        created_at, feedback_applied
                 FROM memrl_queries WHERE id = ?1",
                params![id],
                |row| {
                    let entry_ids: String = row.get(2)?;
                    let similarities: String = row.get(3)?;
                    let q_values: String = row.get(4)?;
                    let created: String = row.get(7)?;
                    Ok(MemrlQueryRecord {
                        id: row.get(0)?,
                        query_text: row.get(1)?,
                        entry_ids: serde_json::from_str(&entry_ids).unwrap_or_default(),
                        similarities: serde_json::from_str(&similarities).unwrap_or_default(),
                        q_values: serde_json::from_str(&q_values).unwrap_or_default(),
                        delta: row.get(5)?,
                        lambda: row.get(6)?,
                        created_at: parse_ts(&created),
                        feedback_applied: row.get::<_, i64>(8)? != 0,
                    })
                },
            )
            .optional()?)
    }

    /// Mark a MemRL query's feedback as applied; false if already marked
    pub fn mark_memrl_query_feedback(&self, id: &str) -> Result<bool> {
        let writer = self.write_lock()?;
        let changed = writer.execute(
            "UPDATE memrl_queries SET feedback_applied = 1
             WHERE id = ?1 AND feedback_applied = 0",
            params![id],
        )?;
        Ok(changed == 1)
    }

    /// Mark feedback and advance Q-values in one transaction
    ///
    /// Returns `None` when feedback was already applied; otherwise the
    /// number of entries whose Q-value advanced.
    pub fn apply_memrl_feedback(
        &self,
        query_id: &str,
        updates: &[(String, f64)],
        alpha: f64,
        min_q: f64,
        max_q: f64,
    ) -> Result<Option<usize>> {
        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;

        let marked = tx.execute(
            "UPDATE memrl_queries SET feedback_applied = 1
             WHERE id = ?1 AND feedback_applied = 0",
            params![query_id],
        )?;
        if marked == 0 {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM memrl_queries WHERE id = ?1",
                    params![query_id],
                    |r| r.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StorageError::NotFound(format!("memrl query {query_id}")));
            }
            return Ok(None);
        }

        let mut updated = 0usize;
        for (id, reward) in updates {
            updated += tx.execute(
                "UPDATE entries
                 SET q_value = MIN(?4, MAX(?3, q_value + ?2 * (?5 - q_value)))
                 WHERE id = ?1",
                params![id, alpha, min_q, max_q, reward],
            )?;
        }

        tx.commit()?;
        Ok(Some(updated))
    }

    // ========================================================================
    // PATTERN WEIGHTS
    // ========================================================================

    fn map_weight_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PatternWeight> {
        let updated: String = row.get(5)?;
        Ok(PatternWeight {
            pattern_id: row.get(0)?,
            weight: row.get(1)?,
            importance: row.get(2)?,
            use_count: row.get(3)?,
            success_count: row.get(4)?,
            last_update: parse_ts(&updated),
        })
    }

    /// Batch-fetch pattern weights; absent patterns are simply missing
    pub fn get_pattern_weights(&self, ids: &[String]) -> Result<HashMap<String, PatternWeight>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT pattern_id, weight, importance, use_count, success_count, last_update
             FROM pattern_weights WHERE pattern_id IN ({})",
            placeholders(ids.len())
        ))?;
        Ok(stmt
            .query_map(params_from_iter(ids.iter()), Self::map_weight_row)?
            .filter_map(|r| r.ok())
            .map(|w| (w.pattern_id.clone(), w))
            .collect())
    }

    /// Every tracked pattern weight
    pub fn get_all_pattern_weights(&self) -> Result<HashMap<String, PatternWeight>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare(
            "SELECT pattern_id, weight, importance, use_count, success_count, last_update
             FROM pattern_weights",
        )?;
        Ok(stmt
            .query_map([], Self::map_weight_row)?
            .filter_map(|r| r.ok())
            .map(|w| (w.pattern_id.clone(), w))
            .collect())
    }

    /// Upsert a batch of pattern weights in one transaction
    pub fn upsert_pattern_weights(&self, weights: &[PatternWeight]) -> Result<()> {
        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;
        for w in weights {
            tx.execute(
                "INSERT INTO pattern_weights
                     (pattern_id, weight, importance, use_count, success_count, last_update)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(pattern_id) DO UPDATE SET
                     weight = excluded.weight,
                     importance = excluded.importance,
                     use_count = excluded.use_count,
                     success_count = excluded.success_count,
                     last_update = excluded.last_update",
                params![
                    w.pattern_id,
                    w.weight,
                    w.importance,
                    w.use_count,
                    w.success_count,
                    w.last_update.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Drop a pattern entirely (auto-prune)
    pub fn delete_pattern_weight(&self, pattern_id: &str) -> Result<bool> {
        let writer = self.write_lock()?;
        let removed = writer.execute(
            "DELETE FROM pattern_weights WHERE pattern_id = ?1",
            params![pattern_id],
        )?;
        Ok(removed == 1)
    }

    /// Restore weights to a checkpoint snapshot in one transaction
    ///
    /// Patterns absent from the snapshot did not exist at capture time and
    /// are removed; surviving patterns keep their counters.
    pub fn restore_pattern_weights(&self, snapshot: &HashMap<String, f64>) -> Result<()> {
        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;
        let now = Utc::now().to_rfc3339();

        let existing: Vec<String> = {
            let mut stmt = tx.prepare("SELECT pattern_id FROM pattern_weights")?;
            stmt.query_map([], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        };
        for pattern_id in &existing {
            if !snapshot.contains_key(pattern_id) {
                tx.execute(
                    "DELETE FROM pattern_weights WHERE pattern_id = ?1",
                    params![pattern_id],
                )?;
            }
        }

        for (pattern_id, weight) in snapshot {
            tx.execute(
                "INSERT INTO pattern_weights
                     (pattern_id, weight, importance, use_count, success_count, last_update)
                 VALUES (?1, ?2, 0.0, 0, 0, ?3)
                 ON CONFLICT(pattern_id) DO UPDATE SET
                     weight = excluded.weight,
                     last_update = excluded.last_update",
                params![pattern_id, weight, now],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // ========================================================================
    // WEIGHT CHECKPOINTS & BASELINE
    // ========================================================================

    /// Persist an immutable weight checkpoint
    pub fn store_weight_checkpoint(&self, checkpoint: &WeightCheckpoint) -> Result<()> {
        let writer = self.write_lock()?;
        writer.execute(
            "INSERT INTO weight_checkpoints (id, weights, drift, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                checkpoint.id,
                serde_json::to_string(&checkpoint.weights)?,
                checkpoint.drift,
                checkpoint.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent checkpoint, if any
    pub fn get_latest_checkpoint(&self) -> Result<Option<WeightCheckpoint>> {
        let reader = self.read_lock()?;
        Ok(reader
            .query_row(
                "SELECT id, weights, drift, created_at FROM weight_checkpoints
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                [],
                |row| {
                    let weights: String = row.get(1)?;
                    let created: String = row.get(3)?;
                    Ok(WeightCheckpoint {
                        id: row.get(0)?,
                        weights: serde_json::from_str(&weights).unwrap_or_default(),
                        drift: row.get(2)?,
                        created_at: parse_ts(&created),
                    })
                },
            )
            .optional()?)
    }

    /// The drift baseline snapshot, if captured
    pub fn get_sona_baseline(&self) -> Result<Option<HashMap<String, f64>>> {
        let reader = self.read_lock()?;
        let weights: Option<String> = reader
            .query_row("SELECT weights FROM sona_baseline WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        match weights {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Capture or replace the drift baseline
    pub fn set_sona_baseline(&self, weights: &HashMap<String, f64>) -> Result<()> {
        let writer = self.write_lock()?;
        writer.execute(
            "INSERT INTO sona_baseline (id, weights, captured_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                 weights = excluded.weights,
                 captured_at = excluded.captured_at",
            params![serde_json::to_string(weights)?, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ========================================================================
    // VECTORS
    // ========================================================================

    /// Attach a raw vector to an entry in one transaction
    ///
    /// Allocates a fresh label on first attach (re-using the existing label
    /// on re-embed), stores the blob, and clears the pending flag. Returns
    /// the label.
    pub fn attach_vector(&self, entry_id: &str, embedding: &[u8], dimensions: usize) -> Result<u64> {
        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT label FROM vector_mappings WHERE entry_id = ?1",
                params![entry_id],
                |r| r.get(0),
            )
            .optional()?;

        let label = match existing {
            Some(label) => {
                tx.execute(
                    "UPDATE vectors SET embedding = ?2, dimensions = ?3 WHERE label = ?1",
                    params![label, embedding, dimensions as i64],
                )?;
                label
            }
            None => {
                tx.execute(
                    "INSERT INTO vector_mappings (entry_id) VALUES (?1)",
                    params![entry_id],
                )?;
                let label = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO vectors (label, embedding, dimensions) VALUES (?1, ?2, ?3)",
                    params![label, embedding, dimensions as i64],
                )?;
                label
            }
        };

        let changed = tx.execute(
            "UPDATE entries SET pending_embedding = 0, embedding_attempts = 0 WHERE id = ?1",
            params![entry_id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("entry {entry_id}")));
        }

        tx.commit()?;
        Ok(label as u64)
    }

    /// Label mapped to an entry, if any
    pub fn get_vector_label(&self, entry_id: &str) -> Result<Option<u64>> {
        let reader = self.read_lock()?;
        Ok(reader
            .query_row(
                "SELECT label FROM vector_mappings WHERE entry_id = ?1",
                params![entry_id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .map(|l| l as u64))
    }

    /// Batch-resolve labels back to entry ids
    pub fn get_entry_ids_for_labels(&self, labels: &[u64]) -> Result<HashMap<u64, String>> {
        if labels.is_empty() {
            return Ok(HashMap::new());
        }
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT label, entry_id FROM vector_mappings WHERE label IN ({})",
            placeholders(labels.len())
        ))?;
        Ok(stmt
            .query_map(params_from_iter(labels.iter().map(|l| *l as i64)), |row| {
                Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect())
    }

    /// Every stored raw vector, for index rebuilds
    pub fn get_all_vectors(&self) -> Result<Vec<(u64, Vec<u8>, usize)>> {
        let reader = self.read_lock()?;
        let mut stmt =
            reader.prepare("SELECT label, embedding, dimensions FROM vectors ORDER BY label")?;
        Ok(stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)? as u64,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, i64>(2)? as usize,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect())
    }

    /// Number of stored raw vectors
    pub fn count_vectors(&self) -> Result<i64> {
        let reader = self.read_lock()?;
        Ok(reader.query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0))?)
    }

    /// Entries still pending embedding, under the attempt cap, oldest first
    pub fn get_pending_entries(&self, limit: usize, max_attempts: i64) -> Result<Vec<Entry>> {
        let reader = self.read_lock()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM entries
             WHERE pending_embedding = 1 AND embedding_attempts < ?1
             ORDER BY created_at, id LIMIT ?2",
            Self::ENTRY_COLUMNS
        ))?;
        Ok(stmt
            .query_map(params![max_attempts, limit as i64], Self::map_entry_row)?
            .filter_map(|r| r.ok())
            .collect())
    }

    /// Increment an entry's embedding attempt counter; returns the new count
    pub fn bump_embedding_attempts(&self, entry_id: &str) -> Result<i64> {
        let writer = self.write_lock()?;
        writer.execute(
            "UPDATE entries SET embedding_attempts = embedding_attempts + 1 WHERE id = ?1",
            params![entry_id],
        )?;
        Ok(writer.query_row(
            "SELECT embedding_attempts FROM entries WHERE id = ?1",
            params![entry_id],
            |r| r.get(0),
        )?)
    }

    /// Set or clear an entry's pending flag
    pub fn mark_pending(&self, entry_id: &str, pending: bool) -> Result<()> {
        let writer = self.write_lock()?;
        let changed = writer.execute(
            "UPDATE entries SET pending_embedding = ?2 WHERE id = ?1",
            params![entry_id, pending as i64],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("entry {entry_id}")));
        }
        Ok(())
    }

    // ========================================================================
    // STATS
    // ========================================================================

    /// Aggregate database-derived statistics
    pub fn stats(&self) -> Result<MemoryStats> {
        let reader = self.read_lock()?;
        let now = Utc::now().to_rfc3339();

        let (total_entries, pending, avg_q): (i64, i64, Option<f64>) = reader.query_row(
            "SELECT COUNT(*), COALESCE(SUM(pending_embedding), 0), AVG(q_value) FROM entries",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
        let avg_l: Option<f64> =
            reader.query_row("SELECT AVG(l_score) FROM provenance", [], |r| r.get(0))?;
        let active_causal: i64 = reader.query_row(
            "SELECT COUNT(*) FROM causal_edges WHERE expires_at IS NULL OR expires_at > ?1",
            params![now],
            |r| r.get(0),
        )?;
        let expired_causal: i64 = reader.query_row(
            "SELECT COUNT(*) FROM causal_edges WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
            |r| r.get(0),
        )?;
        let trajectories: i64 =
            reader.query_row("SELECT COUNT(*) FROM trajectories", [], |r| r.get(0))?;
        let awaiting: i64 = reader.query_row(
            "SELECT COUNT(*) FROM trajectories t
             LEFT JOIN feedback f ON f.trajectory_id = t.id
             WHERE f.trajectory_id IS NULL",
            [],
            |r| r.get(0),
        )?;
        let patterns: i64 =
            reader.query_row("SELECT COUNT(*) FROM pattern_weights", [], |r| r.get(0))?;
        let indexed: i64 = reader.query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0))?;
        let (oldest, newest): (Option<String>, Option<String>) = reader.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM entries",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        Ok(MemoryStats {
            total_entries,
            pending_embeddings: pending,
            indexed_vectors: indexed,
            active_causal_edges: active_causal,
            expired_causal_edges: expired_causal,
            trajectories,
            trajectories_awaiting_feedback: awaiting,
            tracked_patterns: patterns,
            average_q_value: avg_q.unwrap_or(0.0),
            average_l_score: avg_l.unwrap_or(0.0),
            oldest_entry: oldest.map(|t| parse_ts(&t)),
            newest_entry: newest.map(|t| parse_ts(&t)),
        })
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Comma-separated `?` placeholders for an IN clause
fn placeholders(n: usize) -> String {
    let mut out = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

/// Parse a stored RFC 3339 timestamp, falling back to now on corruption
fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// TESTS
// ============================================================================
