//! SQLite backend
//!
//! A single writer connection behind a mutex. Batches run in one
//! transaction; supersession is derived in SQL from `parent_id`.

use crate::backend::{overlaps_any, GraphBackend, StoreError, StoreResult};
use crate::record::IntentRecord;
use concord_contract::{Intent, InterfaceSpec};
use concord_matching::{Matcher, StructuralMatcher};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS intents (
        id          TEXT PRIMARY KEY,
        agent_id    TEXT NOT NULL,
        timestamp   TEXT NOT NULL,
        intent      TEXT NOT NULL,
        provides    TEXT NOT NULL DEFAULT '[]',
        requires    TEXT NOT NULL DEFAULT '[]',
        constraints TEXT NOT NULL DEFAULT '[]',
        evidence    TEXT NOT NULL DEFAULT '[]',
        stability   REAL NOT NULL DEFAULT 0.0,
        parent_id   TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_intents_agent ON intents(agent_id);
    CREATE INDEX IF NOT EXISTS idx_intents_parent ON intents(parent_id);
    CREATE INDEX IF NOT EXISTS idx_intents_stability ON intents(stability);
";

const COLUMNS: &str =
    "i.id, i.agent_id, i.timestamp, i.intent, i.provides, i.requires, i.constraints, i.evidence, i.stability, i.parent_id";

const LIVE: &str = "NOT EXISTS (SELECT 1 FROM intents c WHERE c.parent_id = i.id)";

/// SQLite-backed graph store using the persisted record shape
pub struct SqliteBackend {
    conn: Mutex<Option<Connection>>,
    matcher: Arc<dyn Matcher>,
}

impl SqliteBackend {
    /// Open (or create) a database file
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or migrated.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Self::initialize(conn)
    }

    /// Private in-memory database
    ///
    /// # Errors
    /// Returns error if the schema cannot be created.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            matcher: Arc::new(StructuralMatcher::new()),
        })
    }

    /// Use a different matcher for [`GraphBackend::find_overlapping`]
    #[inline]
    #[must_use]
    pub fn with_matcher(mut self, matcher: Arc<dyn Matcher>) -> Self {
        self.matcher = matcher;
        self
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        f(conn)
    }

    fn select(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<Intent>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {COLUMNS} FROM intents i WHERE {filter} ORDER BY i.rowid");
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(params, read_record)?
                .collect::<Result<Vec<_>, _>>()?;
            records.into_iter().map(IntentRecord::into_intent).collect()
        })
    }
}

impl fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("open", &self.conn.lock().is_some())
            .field("matcher", &self.matcher.name())
            .finish()
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<IntentRecord> {
    Ok(IntentRecord {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        timestamp: row.get(2)?,
        intent: row.get(3)?,
        provides: row.get(4)?,
        requires: row.get(5)?,
        constraints: row.get(6)?,
        evidence: row.get(7)?,
        stability: row.get(8)?,
        parent_id: row.get(9)?,
    })
}

fn insert(conn: &Connection, intent: &Intent) -> StoreResult<f64> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM intents WHERE id = ?1", [&intent.id], |r| r.get(0))
        .optional()?;
    if exists.is_some() {
        return Err(StoreError::DuplicateId(intent.id.clone()));
    }
    let r = IntentRecord::from_intent(intent)?;
    conn.execute(
        "INSERT INTO intents
            (id, agent_id, timestamp, intent, provides, requires, constraints, evidence, stability, parent_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            r.id,
            r.agent_id,
            r.timestamp,
            r.intent,
            r.provides,
            r.requires,
            r.constraints,
            r.evidence,
            r.stability,
            r.parent_id
        ],
    )?;
    Ok(r.stability)
}

impl GraphBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn publish(&self, intent: &Intent) -> StoreResult<f64> {
        let stability = self.with_conn(|conn| insert(conn, intent))?;
        tracing::debug!(intent_id = %intent.id, agent_id = %intent.agent_id, stability, "stored intent");
        Ok(stability)
    }

    fn publish_batch(&self, intents: &[Intent]) -> StoreResult<Vec<f64>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let stabilities = intents
                .iter()
                .map(|intent| insert(&tx, intent))
                .collect::<StoreResult<Vec<_>>>()?;
            tx.commit()?;
            tracing::debug!(count = intents.len(), "stored intent batch");
            Ok(stabilities)
        })
    }

    fn get(&self, id: &str) -> StoreResult<Option<Intent>> {
        let mut found = self.select("i.id = ?1", [id])?;
        Ok(found.pop())
    }

    fn query_all(&self, min_stability: Option<f64>) -> StoreResult<Vec<Intent>> {
        self.select("i.stability >= ?1", [min_stability.unwrap_or(0.0)])
    }

    fn query_live(&self, min_stability: Option<f64>) -> StoreResult<Vec<Intent>> {
        self.select(
            &format!("i.stability >= ?1 AND {LIVE}"),
            [min_stability.unwrap_or(0.0)],
        )
    }

    fn query_by_agent(&self, agent_id: &str) -> StoreResult<Vec<Intent>> {
        self.select("i.agent_id = ?1", [agent_id])
    }

    fn find_overlapping(
        &self,
        specs: &[InterfaceSpec],
        exclude_agent: &str,
        min_stability: f64,
    ) -> StoreResult<Vec<Intent>> {
        let candidates = self.select(
            &format!("i.stability >= ?1 AND i.agent_id <> ?2 AND {LIVE}"),
            params![min_stability, exclude_agent],
        )?;
        Ok(candidates
            .into_iter()
            .filter(|i| overlaps_any(self.matcher.as_ref(), specs, i))
            .collect())
    }

    fn count(&self) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM intents", [], |r| r.get(0))?;
            Ok(usize::try_from(n).unwrap_or_default())
        })
    }

    fn close(&self) -> StoreResult<()> {
        if let Some(conn) = self.conn.lock().take() {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        }
        Ok(())
    }
}
