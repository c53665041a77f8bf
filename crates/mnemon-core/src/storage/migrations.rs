//! Database Migrations
//!
//! Schema migration definitions for the storage layer.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Core schema: entries, tags, provenance, causal edges, vectors",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Learning tables: trajectories, pattern weights, MemRL queries",
        up: MIGRATION_V2_UP,
    },
];

/// Newest schema this build understands; stores created by a newer build are
/// refused at open
pub const SUPPORTED_SCHEMA_VERSION: u32 = 2;

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Core schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'user',
    importance REAL NOT NULL DEFAULT 0.5,
    confidence REAL NOT NULL DEFAULT 1.0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    session_id TEXT,
    agent_id TEXT,
    context TEXT,

    -- Entry-level Q-value (neutral 0.5)
    q_value REAL NOT NULL DEFAULT 0.5,

    -- Degraded-ingest state
    pending_embedding INTEGER NOT NULL DEFAULT 0,
    embedding_attempts INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_entries_created ON entries(created_at);
CREATE INDEX IF NOT EXISTS idx_entries_pending ON entries(pending_embedding);
CREATE INDEX IF NOT EXISTS idx_entries_session ON entries(session_id);

CREATE TABLE IF NOT EXISTS tags (
    entry_id TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (entry_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag, entry_id);

-- Per-entry provenance record; parents live in provenance_parents
CREATE TABLE IF NOT EXISTS provenance (
    entry_id TEXT PRIMARY KEY REFERENCES entries(id) ON DELETE CASCADE,
    confidence REAL NOT NULL DEFAULT 1.0,
    relevance REAL NOT NULL DEFAULT 1.0,
    lineage_depth INTEGER NOT NULL DEFAULT 0,
    l_score REAL NOT NULL DEFAULT 1.0
);

-- Ordered parent set; parent_id NULL marks a re-parented orphan slot
CREATE TABLE IF NOT EXISTS provenance_parents (
    entry_id TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    parent_id TEXT,
    order_index INTEGER NOT NULL,
    PRIMARY KEY (entry_id, order_index)
);

CREATE INDEX IF NOT EXISTS idx_parents_parent ON provenance_parents(parent_id);

-- Typed causal hyperedges; source/target id sets as JSON arrays
CREATE TABLE IF NOT EXISTS causal_edges (
    id TEXT PRIMARY KEY,
    edge_type TEXT NOT NULL,
    source_ids TEXT NOT NULL,
    target_ids TEXT NOT NULL,
    strength REAL NOT NULL DEFAULT 1.0,
    created_at TEXT NOT NULL,
    ttl_ms INTEGER,
    expires_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_causal_expires ON causal_edges(expires_at);

-- entry_id <-> integer label bijection over non-pending entries
CREATE TABLE IF NOT EXISTS vector_mappings (
    label INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id TEXT NOT NULL UNIQUE REFERENCES entries(id) ON DELETE CASCADE
);

-- Raw unit vectors, keyed by the same label space as the companion index
CREATE TABLE IF NOT EXISTS vectors (
    label INTEGER PRIMARY KEY,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL
);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Learning tables
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS trajectories (
    id TEXT PRIMARY KEY,
    query_text TEXT NOT NULL,
    matched_entry_ids TEXT NOT NULL,
    match_scores TEXT NOT NULL,
    embedding BLOB,
    route TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trajectories_created ON trajectories(created_at);

-- At most one feedback row per trajectory
CREATE TABLE IF NOT EXISTS feedback (
    trajectory_id TEXT PRIMARY KEY REFERENCES trajectories(id) ON DELETE CASCADE,
    quality REAL NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pattern_weights (
    pattern_id TEXT PRIMARY KEY,
    weight REAL NOT NULL DEFAULT 0.5,
    importance REAL NOT NULL DEFAULT 0.0,
    use_count INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,
    last_update TEXT NOT NULL
);

-- Immutable snapshots of all pattern weights
CREATE TABLE IF NOT EXISTS weight_checkpoints (
    id TEXT PRIMARY KEY,
    weights TEXT NOT NULL,
    drift REAL NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_created ON weight_checkpoints(created_at);

-- Single-row drift baseline
CREATE TABLE IF NOT EXISTS sona_baseline (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    weights TEXT NOT NULL,
    captured_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memrl_queries (
    id TEXT PRIMARY KEY,
    query_text TEXT NOT NULL,
    entry_ids TEXT NOT NULL,
    similarities TEXT NOT NULL,
    q_values TEXT NOT NULL,
    delta REAL NOT NULL,
    lambda REAL NOT NULL,
    created_at TEXT NOT NULL,
    feedback_applied INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_memrl_created ON memrl_queries(created_at);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // execute_batch handles the multi-statement blocks
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}
