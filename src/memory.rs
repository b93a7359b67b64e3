//! Long-term fact store backed by SQLite full-text search.
//!
//! A single FTS5 virtual table `general_facts(content, timestamp, source)`
//! holds free-form facts inserted by the memory skill and queried by the
//! chat path. Databases created by older builds used a plain table; those
//! are detected at startup and rebuilt in place, leaving any unrelated
//! tables untouched.

use crate::error::{AssistantError, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

/// DDL for the fact table. `IF NOT EXISTS` keeps it idempotent.
const SCHEMA_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS general_facts USING fts5(
    content,
    timestamp UNINDEXED,
    source UNINDEXED
);
"#;

/// Full-text indexed store of free-form facts.
pub struct FactStore {
    conn: Mutex<Connection>,
}

impl FactStore {
    /// Open (or create) the store at `path`.
    ///
    /// Parent directories are created as needed. A legacy non-FTS
    /// `general_facts` table is dropped and recreated.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| AssistantError::Memory(format!("cannot open {}: {e}", path.display())))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (tests and tools).
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AssistantError::Memory(format!("cannot open in-memory db: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.busy_timeout(std::time::Duration::from_secs(2))
            .map_err(|e| AssistantError::Memory(format!("busy timeout: {e}")))?;
        migrate_legacy_table(&conn)?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| AssistantError::Memory(format!("schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append a fact.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn store_fact(&self, content: &str, source: &str) -> Result<()> {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO general_facts (content, timestamp, source) VALUES (?1, ?2, ?3)",
            rusqlite::params![content, timestamp, source],
        )
        .map_err(|e| AssistantError::Memory(format!("insert fact: {e}")))?;
        info!("stored fact from {source}: \"{content}\"");
        Ok(())
    }

    /// Full-text search for the `top_n` facts most relevant to `query`.
    ///
    /// Returns an empty list for queries with no searchable tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn retrieve_relevant_facts(&self, query: &str, top_n: usize) -> Result<Vec<String>> {
        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT content FROM general_facts WHERE general_facts MATCH ?1 \
                 ORDER BY rank LIMIT ?2",
            )
            .map_err(|e| AssistantError::Memory(format!("prepare: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params![match_expr, top_n as i64], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| AssistantError::Memory(format!("query: {e}")))?;
        let mut facts = Vec::new();
        for row in rows {
            facts.push(row.map_err(|e| AssistantError::Memory(format!("row: {e}")))?);
        }
        Ok(facts)
    }

    /// All stored facts, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_all_facts(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT content FROM general_facts ORDER BY timestamp DESC")
            .map_err(|e| AssistantError::Memory(format!("prepare: {e}")))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| AssistantError::Memory(format!("query: {e}")))?;
        let mut facts = Vec::new();
        for row in rows {
            facts.push(row.map_err(|e| AssistantError::Memory(format!("row: {e}")))?);
        }
        Ok(facts)
    }

    /// Delete the fact most relevant to `query` and return its content.
    ///
    /// Returns `Ok(None)` when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup or delete fails.
    pub fn find_and_delete_fact(&self, query: &str) -> Result<Option<String>> {
        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(None);
        };
        let conn = self.lock()?;
        let found: Option<(i64, String)> = conn
            .query_row(
                "SELECT rowid, content FROM general_facts WHERE general_facts MATCH ?1 \
                 ORDER BY rank LIMIT 1",
                rusqlite::params![match_expr],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(AssistantError::Memory(format!("lookup: {other}"))),
            })?;
        let Some((rowid, content)) = found else {
            return Ok(None);
        };
        conn.execute(
            "DELETE FROM general_facts WHERE rowid = ?1",
            rusqlite::params![rowid],
        )
        .map_err(|e| AssistantError::Memory(format!("delete fact: {e}")))?;
        info!("deleted fact: \"{content}\"");
        Ok(Some(content))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AssistantError::Memory("fact store lock poisoned".to_owned()))
    }
}

/// Drop a `general_facts` table created by a pre-FTS build.
fn migrate_legacy_table(conn: &Connection) -> Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'general_facts'",
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(AssistantError::Memory(format!("schema probe: {other}"))),
        })?;

    if let Some(sql) = existing
        && !sql.to_lowercase().contains("fts5")
    {
        warn!("general_facts uses a pre-FTS schema; rebuilding");
        conn.execute_batch("DROP TABLE general_facts;")
            .map_err(|e| AssistantError::Memory(format!("drop legacy table: {e}")))?;
    }
    Ok(())
}

/// Build an FTS5 MATCH expression from free text.
///
/// Each token is double-quoted to neutralize FTS operators in user input;
/// tokens are OR-ed so any overlap ranks. Returns `None` when the query has
/// no usable tokens.
fn fts_match_expression(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}
