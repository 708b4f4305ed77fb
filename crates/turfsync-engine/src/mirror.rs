//! The local mirror: a durable, queryable replica of the authorized
//! catalog subset.
//!
//! One logical table per entity type plus a single-row `sync_metadata`
//! record. Entity tables are replaced wholesale per sync — never merged —
//! inside one SQLite transaction, so a reader can never observe new areas
//! next to stale precincts. A commit that fails mid-way rolls back entirely
//! and the previous mirror stays authoritative.
//!
//! # Writers and readers
//!
//! The sync orchestrator is the only writer (enforced by its single-flight
//! rule); UI/query code holds read-only methods. No locking beyond the
//! transactional commit is needed.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};
use turfsync_core::model::{
    Area, AreaId, County, CountyId, FilteredCatalog, Group, GroupId, Precinct, PrecinctId,
};

use crate::error::SyncError;

/// Mirror schema. Parent-ID columns are indexed for the "children of X"
/// read paths.
const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS counties (
        id   TEXT PRIMARY KEY,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS areas (
        id        TEXT PRIMARY KEY,
        county_id TEXT NOT NULL,
        name      TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_areas_county ON areas(county_id);

    CREATE TABLE IF NOT EXISTS precincts (
        id      TEXT PRIMARY KEY,
        area_id TEXT NOT NULL,
        name    TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_precincts_area ON precincts(area_id);

    CREATE TABLE IF NOT EXISTS \"groups\" (
        id   TEXT PRIMARY KEY,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sync_metadata (
        id                   INTEGER PRIMARY KEY CHECK (id = 1),
        status               TEXT NOT NULL,
        last_sync_attempt    TEXT,
        last_successful_sync TEXT,
        last_error           TEXT,
        generation           INTEGER NOT NULL
    );

    INSERT OR IGNORE INTO sync_metadata (id, status, generation)
    VALUES (1, 'idle', 0);
";

/// Sync state machine status, persisted in `sync_metadata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// No sync in flight; mirror reflects the last successful sync.
    Idle,
    /// A sync pass is running.
    Syncing,
    /// The last sync attempt failed; mirror holds last-known-good data.
    Error,
}

impl SyncStatus {
    /// Persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
        }
    }

    fn parse(s: &str) -> Result<Self, SyncError> {
        match s {
            "idle" => Ok(Self::Idle),
            "syncing" => Ok(Self::Syncing),
            "error" => Ok(Self::Error),
            other => Err(SyncError::Storage {
                detail: format!("corrupt sync status: {other:?}"),
            }),
        }
    }
}

/// The `sync_metadata` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMetadata {
    /// Current status.
    pub status: SyncStatus,
    /// When the most recent sync attempt started.
    pub last_sync_attempt: Option<DateTime<Utc>>,
    /// When the most recent sync attempt committed successfully.
    pub last_successful_sync: Option<DateTime<Utc>>,
    /// Description of the most recent failure, if the status is `Error`.
    pub last_error: Option<String>,
    /// Monotonic data generation; bumped by every committed replace and
    /// every clear.
    pub generation: u64,
}

/// Ordered full dump of the mirror's entity tables.
///
/// Used by tests to assert atomicity (a failed replace leaves the snapshot
/// identical) and idempotence (two syncs of the same scope produce equal
/// snapshots). Metadata is deliberately excluded: attempt timestamps move
/// even when the data does not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorSnapshot {
    /// All counties, in ID order.
    pub counties: Vec<County>,
    /// All areas, in ID order.
    pub areas: Vec<Area>,
    /// All precincts, in ID order.
    pub precincts: Vec<Precinct>,
    /// All groups, in ID order.
    pub groups: Vec<Group>,
}

/// SQLite-backed local mirror.
pub struct LocalMirror {
    conn: Arc<Mutex<Connection>>,
}

impl LocalMirror {
    /// Opens an in-memory mirror (session-lifetime only).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if schema initialization fails.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Opens (or creates) an on-disk mirror at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the file cannot be opened or
    /// schema initialization fails.
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        Self::init(Connection::open(path)?)
    }

    fn init(conn: Connection) -> Result<Self, SyncError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SyncError> {
        self.conn.lock().map_err(|e| SyncError::Storage {
            detail: format!("mirror mutex poisoned: {e}"),
        })
    }

    /// Starts a replace transaction. Staged rows are buffered in memory
    /// and applied atomically by [`ReplaceTransaction::commit`]; dropping
    /// the transaction without committing discards them.
    #[must_use]
    pub fn begin_replace(&self) -> ReplaceTransaction<'_> {
        ReplaceTransaction {
            mirror: self,
            staged: MirrorSnapshot::default(),
        }
    }

    /// Records that a sync attempt has started.
    ///
    /// Metadata-only write; entity tables are untouched.
    pub fn mark_syncing(&self) -> Result<(), SyncError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_metadata SET status = 'syncing', last_sync_attempt = ?1 WHERE id = 1",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Resets the status to idle without touching entity tables, the
    /// generation, or the error record. Used when an in-flight pass is
    /// discarded (cancelled) rather than failed.
    pub fn mark_idle(&self) -> Result<(), SyncError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_metadata SET status = 'idle' WHERE id = 1",
            [],
        )?;
        Ok(())
    }

    /// Records a failed sync attempt.
    ///
    /// Metadata-only write; the prior mirror contents remain authoritative.
    pub fn mark_error(&self, detail: &str) -> Result<(), SyncError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_metadata SET status = 'error', last_error = ?1 WHERE id = 1",
            params![detail],
        )?;
        Ok(())
    }

    /// Wipes all entity tables and resets metadata to idle, in one
    /// transaction. Used on sign-out so a departed user's data never
    /// outlives their session.
    ///
    /// Returns the new data generation.
    pub fn clear(&self) -> Result<u64, SyncError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM counties;
             DELETE FROM areas;
             DELETE FROM precincts;
             DELETE FROM \"groups\";",
        )?;
        tx.execute(
            "UPDATE sync_metadata
             SET status = 'idle', last_error = NULL, last_successful_sync = NULL,
                 generation = generation + 1
             WHERE id = 1",
            [],
        )?;
        let generation = read_generation(&tx)?;
        tx.commit()?;
        info!(generation, "mirror cleared");
        Ok(generation)
    }

    /// All counties, in ID order.
    pub fn get_counties(&self) -> Result<Vec<County>, SyncError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name FROM counties ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(County {
                id: CountyId::new(row.get::<_, String>(0)?),
                name: row.get(1)?,
            })
        })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Areas whose parent is `county_id`, in ID order.
    pub fn get_areas_by_county(&self, county_id: &CountyId) -> Result<Vec<Area>, SyncError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, county_id, name FROM areas WHERE county_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![county_id.as_str()], |row| {
            Ok(Area {
                id: AreaId::new(row.get::<_, String>(0)?),
                county_id: CountyId::new(row.get::<_, String>(1)?),
                name: row.get(2)?,
            })
        })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Precincts whose parent is `area_id`, in ID order.
    pub fn get_precincts_by_area(&self, area_id: &AreaId) -> Result<Vec<Precinct>, SyncError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, area_id, name FROM precincts WHERE area_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![area_id.as_str()], |row| {
            Ok(Precinct {
                id: PrecinctId::new(row.get::<_, String>(0)?),
                area_id: AreaId::new(row.get::<_, String>(1)?),
                name: row.get(2)?,
            })
        })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// All groups, in ID order.
    pub fn get_groups(&self) -> Result<Vec<Group>, SyncError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name FROM \"groups\" ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Group {
                id: GroupId::new(row.get::<_, String>(0)?),
                name: row.get(1)?,
            })
        })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Looks up one county by key.
    pub fn get_county(&self, id: &CountyId) -> Result<Option<County>, SyncError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name FROM counties WHERE id = ?1",
            params![id.as_str()],
            |row| {
                Ok(County {
                    id: CountyId::new(row.get::<_, String>(0)?),
                    name: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Looks up one area by key.
    pub fn get_area(&self, id: &AreaId) -> Result<Option<Area>, SyncError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, county_id, name FROM areas WHERE id = ?1",
            params![id.as_str()],
            |row| {
                Ok(Area {
                    id: AreaId::new(row.get::<_, String>(0)?),
                    county_id: CountyId::new(row.get::<_, String>(1)?),
                    name: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Looks up one precinct by key.
    pub fn get_precinct(&self, id: &PrecinctId) -> Result<Option<Precinct>, SyncError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, area_id, name FROM precincts WHERE id = ?1",
            params![id.as_str()],
            |row| {
                Ok(Precinct {
                    id: PrecinctId::new(row.get::<_, String>(0)?),
                    area_id: AreaId::new(row.get::<_, String>(1)?),
                    name: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Current sync status.
    pub fn sync_status(&self) -> Result<SyncStatus, SyncError> {
        Ok(self.metadata()?.status)
    }

    /// Current data generation.
    pub fn generation(&self) -> Result<u64, SyncError> {
        let conn = self.lock()?;
        read_generation(&conn)
    }

    /// Full `sync_metadata` record.
    pub fn metadata(&self) -> Result<SyncMetadata, SyncError> {
        let conn = self.lock()?;
        let (status, attempt, success, error, generation) = conn.query_row(
            "SELECT status, last_sync_attempt, last_successful_sync, last_error, generation
             FROM sync_metadata WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )?;
        Ok(SyncMetadata {
            status: SyncStatus::parse(&status)?,
            last_sync_attempt: parse_timestamp(attempt.as_deref())?,
            last_successful_sync: parse_timestamp(success.as_deref())?,
            last_error: error,
            generation: u64::try_from(generation).map_err(|_| SyncError::Storage {
                detail: format!("corrupt generation: {generation}"),
            })?,
        })
    }

    /// Ordered dump of all entity tables.
    pub fn snapshot(&self) -> Result<MirrorSnapshot, SyncError> {
        Ok(MirrorSnapshot {
            counties: self.get_counties()?,
            areas: self.all_areas()?,
            precincts: self.all_precincts()?,
            groups: self.get_groups()?,
        })
    }

    fn all_areas(&self) -> Result<Vec<Area>, SyncError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, county_id, name FROM areas ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Area {
                id: AreaId::new(row.get::<_, String>(0)?),
                county_id: CountyId::new(row.get::<_, String>(1)?),
                name: row.get(2)?,
            })
        })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    fn all_precincts(&self) -> Result<Vec<Precinct>, SyncError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, area_id, name FROM precincts ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Precinct {
                id: PrecinctId::new(row.get::<_, String>(0)?),
                area_id: AreaId::new(row.get::<_, String>(1)?),
                name: row.get(2)?,
            })
        })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }
}

/// A staged wholesale replace of every entity table.
///
/// Rows are buffered in memory; [`commit`](Self::commit) applies the clear
/// and the inserts in a single SQLite transaction together with the
/// metadata update (status → idle, success timestamp, generation bump).
/// Dropping the value without committing is a rollback.
pub struct ReplaceTransaction<'m> {
    mirror: &'m LocalMirror,
    staged: MirrorSnapshot,
}

impl ReplaceTransaction<'_> {
    /// Stages counties for the replace.
    pub fn put_counties(&mut self, items: impl IntoIterator<Item = County>) {
        self.staged.counties.extend(items);
    }

    /// Stages areas for the replace.
    pub fn put_areas(&mut self, items: impl IntoIterator<Item = Area>) {
        self.staged.areas.extend(items);
    }

    /// Stages precincts for the replace.
    pub fn put_precincts(&mut self, items: impl IntoIterator<Item = Precinct>) {
        self.staged.precincts.extend(items);
    }

    /// Stages groups for the replace.
    pub fn put_groups(&mut self, items: impl IntoIterator<Item = Group>) {
        self.staged.groups.extend(items);
    }

    /// Stages a whole filtered catalog.
    pub fn stage_catalog(&mut self, catalog: &FilteredCatalog) {
        self.put_counties(catalog.counties.values().cloned());
        self.put_areas(catalog.areas.values().cloned());
        self.put_precincts(catalog.precincts.values().cloned());
        self.put_groups(catalog.groups.values().cloned());
    }

    /// Atomically replaces the mirror contents with the staged rows.
    ///
    /// Returns the new data generation.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the transaction fails for any
    /// reason; in that case nothing was applied and the previous mirror
    /// state remains authoritative.
    pub fn commit(self) -> Result<u64, SyncError> {
        let mut conn = self.mirror.lock()?;
        let tx = conn.transaction()?;

        tx.execute_batch(
            "DELETE FROM counties;
             DELETE FROM areas;
             DELETE FROM precincts;
             DELETE FROM \"groups\";",
        )?;

        {
            let mut stmt = tx.prepare("INSERT INTO counties (id, name) VALUES (?1, ?2)")?;
            for county in &self.staged.counties {
                stmt.execute(params![county.id.as_str(), county.name])?;
            }

            let mut stmt =
                tx.prepare("INSERT INTO areas (id, county_id, name) VALUES (?1, ?2, ?3)")?;
            for area in &self.staged.areas {
                stmt.execute(params![area.id.as_str(), area.county_id.as_str(), area.name])?;
            }

            let mut stmt =
                tx.prepare("INSERT INTO precincts (id, area_id, name) VALUES (?1, ?2, ?3)")?;
            for precinct in &self.staged.precincts {
                stmt.execute(params![
                    precinct.id.as_str(),
                    precinct.area_id.as_str(),
                    precinct.name
                ])?;
            }

            let mut stmt = tx.prepare("INSERT INTO \"groups\" (id, name) VALUES (?1, ?2)")?;
            for group in &self.staged.groups {
                stmt.execute(params![group.id.as_str(), group.name])?;
            }
        }

        tx.execute(
            "UPDATE sync_metadata
             SET status = 'idle', last_successful_sync = ?1, last_error = NULL,
                 generation = generation + 1
             WHERE id = 1",
            params![Utc::now().to_rfc3339()],
        )?;
        let generation = read_generation(&tx)?;
        tx.commit()?;

        debug!(
            generation,
            counties = self.staged.counties.len(),
            areas = self.staged.areas.len(),
            precincts = self.staged.precincts.len(),
            groups = self.staged.groups.len(),
            "mirror replaced"
        );
        Ok(generation)
    }

    /// Discards the staged rows without touching the mirror.
    pub fn rollback(self) {
        debug!("replace transaction rolled back");
    }
}

fn read_generation(conn: &Connection) -> Result<u64, SyncError> {
    let generation: i64 =
        conn.query_row("SELECT generation FROM sync_metadata WHERE id = 1", [], |row| {
            row.get(0)
        })?;
    u64::try_from(generation).map_err(|_| SyncError::Storage {
        detail: format!("corrupt generation: {generation}"),
    })
}

fn parse_timestamp(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, SyncError> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SyncError::Storage {
                detail: format!("corrupt timestamp {s:?}: {e}"),
            })
    })
    .transpose()
}
