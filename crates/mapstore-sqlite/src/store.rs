//! Connection lifecycle of a map store.
//!
//! A [`MapStore`] only exists while connected: [`MapStore::connect`] builds
//! it and [`MapStore::disconnect`] (or `Drop`) consumes it.  In mirrored
//! mode (`StoreConfig::in_memory`) all work happens on an in-memory database
//! that is restored from the backing file on connect and backed up to it on
//! disconnect.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rusqlite::{Connection, DatabaseName, OptionalExtension, params};
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::dialect::Dialect;
use crate::error::StoreError;
use crate::version::SchemaVersion;

/// DDL applied verbatim to every newly created store.
const BASELINE_SCHEMA: &str = include_str!("schema.sql");

/// One row of the `Statistics` table, the watermark used by
/// [`MapStore::load_last_batch`] and [`MapStore::load_dictionary`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsRecord {
    pub stm_size: i32,
    pub last_sign_added: i32,
    pub process_mem_used: i64,
    pub database_mem_used: i64,
    pub dictionary_size: i32,
}

/// A connected map store.
pub struct MapStore {
    /// `None` only after [`MapStore::shutdown`].
    conn: Option<Connection>,
    url: PathBuf,
    config: StoreConfig,
    version: String,
    dialect: Dialect,
}

impl std::fmt::Debug for MapStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapStore")
            .field("url", &self.url)
            .field("version", &self.version)
            .field("in_memory", &self.config.in_memory)
            .finish()
    }
}

impl MapStore {
    /// Open (or create) the store at `path`.
    ///
    /// With `overwrite`, an existing file is deleted first.  A store created
    /// by this call receives the baseline schema.
    pub fn connect(
        path: impl AsRef<Path>,
        overwrite: bool,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        let url = path.as_ref().to_path_buf();
        if url.as_os_str().is_empty() {
            return Err(StoreError::EmptyPath);
        }

        if overwrite && url.exists() {
            info!(path = %url.display(), "deleting existing database");
            fs::remove_file(&url)?;
        }
        let existed = url.exists();

        let conn = if config.in_memory {
            let mut conn = Connection::open_in_memory()?;
            if existed {
                let start = Instant::now();
                conn.restore(
                    DatabaseName::Main,
                    &url,
                    None::<fn(rusqlite::backup::Progress)>,
                )
                .map_err(|source| StoreError::Mirror {
                    direction: "from",
                    path: url.clone(),
                    source,
                })?;
                info!(
                    path = %url.display(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "loaded database into memory"
                );
            }
            conn
        } else {
            Connection::open(&url)?
        };

        if !existed {
            info!(path = %url.display(), "creating database");
            conn.execute_batch(BASELINE_SCHEMA)
                .map_err(StoreError::Schema)?;
        }

        apply_tuning(&conn, &config)?;

        let version = read_version(&conn)?;
        let dialect = Dialect::select(SchemaVersion::parse_or_legacy(&version));
        info!(
            path = %url.display(),
            version = %version,
            in_memory = config.in_memory,
            "database connected"
        );

        Ok(Self {
            conn: Some(conn),
            url,
            config,
            version,
            dialect,
        })
    }

    /// Finalize cached statements, mirror to disk in memory mode, and close.
    pub fn disconnect(mut self) -> Result<(), StoreError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), StoreError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        conn.flush_prepared_statement_cache();

        if self.config.in_memory {
            let start = Instant::now();
            conn.backup(DatabaseName::Main, &self.url, None)
                .map_err(|source| StoreError::Mirror {
                    direction: "to",
                    path: self.url.clone(),
                    source,
                })?;
            info!(
                path = %self.url.display(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "saved in-memory database to file"
            );
        }

        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        info!(path = %self.url.display(), "database disconnected");
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("MapStore used after shutdown"),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn url(&self) -> &Path {
        &self.url
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Version string stored in the `Admin` table, `"0.0.0"` when absent.
    pub fn get_version(&self) -> &str {
        &self.version
    }

    pub fn schema_version(&self) -> SchemaVersion {
        self.dialect.version()
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn is_in_memory(&self) -> bool {
        self.config.in_memory
    }

    /// Bytes used by the database: page usage in memory mode, the file size
    /// otherwise.
    ///
    /// In memory mode this approximates the store's own allocation by the
    /// pages its database occupies.  SQLite's allocator counter is shared by
    /// every connection in the process and would count other stores too.
    pub fn get_memory_footprint(&self) -> Result<u64, StoreError> {
        if self.config.in_memory {
            let pages: i64 = self
                .conn()
                .pragma_query_value(None, "page_count", |row| row.get(0))?;
            let page_size: i64 = self
                .conn()
                .pragma_query_value(None, "page_size", |row| row.get(0))?;
            Ok((pages * page_size).max(0) as u64)
        } else {
            match fs::metadata(&self.url) {
                Ok(meta) => Ok(meta.len()),
                Err(e) => {
                    warn!(path = %self.url.display(), error = %e, "cannot read database file size");
                    Ok(0)
                }
            }
        }
    }

    // ── Tuning ──────────────────────────────────────────────────────────────

    pub fn set_cache_size(&mut self, pages: u32) -> Result<(), StoreError> {
        self.config.cache_size = pages;
        self.conn().pragma_update(None, "cache_size", pages)?;
        Ok(())
    }

    /// Returns `false` when `value` is out of range; the previous mode stays.
    pub fn set_journal_mode(&mut self, value: i32) -> Result<bool, StoreError> {
        if !self.config.set_journal_mode(value) {
            return Ok(false);
        }
        set_journal_pragma(self.conn(), &self.config)?;
        Ok(true)
    }

    pub fn set_synchronous(&mut self, value: i32) -> Result<bool, StoreError> {
        if !self.config.set_synchronous(value) {
            return Ok(false);
        }
        self.conn()
            .pragma_update(None, "synchronous", self.config.synchronous().pragma_value())?;
        Ok(true)
    }

    pub fn set_temp_store(&mut self, value: i32) -> Result<bool, StoreError> {
        if !self.config.set_temp_store(value) {
            return Ok(false);
        }
        self.conn()
            .pragma_update(None, "temp_store", self.config.temp_store().pragma_value())?;
        Ok(true)
    }

    /// Switch between mirrored-memory and disk mode.  The store is
    /// disconnected (mirroring out if needed) and reconnected to the same
    /// file in the new mode.
    pub fn set_in_memory(mut self, in_memory: bool) -> Result<Self, StoreError> {
        if self.config.in_memory == in_memory {
            return Ok(self);
        }
        self.shutdown()?;
        let mut config = self.config.clone();
        config.in_memory = in_memory;
        MapStore::connect(&self.url, false, config)
    }

    // ── Raw statements ──────────────────────────────────────────────────────

    /// Run one or more statements that produce no rows.
    pub fn execute_no_result(&self, sql: &str) -> Result<(), StoreError> {
        let start = Instant::now();
        self.conn().execute_batch(sql)?;
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, sql, "executed");
        Ok(())
    }

    pub fn begin_transaction(&self) -> Result<(), StoreError> {
        self.execute_no_result("BEGIN TRANSACTION;")
    }

    pub fn commit(&self) -> Result<(), StoreError> {
        self.execute_no_result("COMMIT;")
    }

    /// Record a statistics row; its entry time becomes the new watermark.
    pub fn add_statistics(&self, stats: &StatisticsRecord) -> Result<(), StoreError> {
        let mut stmt = self.conn().prepare_cached(
            "INSERT INTO Statistics(STM_size, last_sign_added, process_mem_used, \
             database_mem_used, dictionary_size) VALUES(?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![
            stats.stm_size,
            stats.last_sign_added,
            stats.process_mem_used,
            stats.database_mem_used,
            stats.dictionary_size
        ])?;
        Ok(())
    }
}

impl Drop for MapStore {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, path = %self.url.display(), "failed to close database");
        }
    }
}

fn apply_tuning(conn: &Connection, config: &StoreConfig) -> Result<(), StoreError> {
    conn.pragma_update(None, "cache_size", config.cache_size)?;
    set_journal_pragma(conn, config)?;
    conn.pragma_update(None, "synchronous", config.synchronous().pragma_value())?;
    conn.pragma_update(None, "temp_store", config.temp_store().pragma_value())?;
    Ok(())
}

/// `journal_mode` answers with the mode in effect, which can differ from the
/// one requested (in-memory databases only accept `MEMORY` or `OFF`).
fn set_journal_pragma(conn: &Connection, config: &StoreConfig) -> Result<(), StoreError> {
    let requested = config.journal_mode().pragma_value();
    let applied: String = conn.pragma_update_and_check(None, "journal_mode", requested, |row| {
        row.get(0)
    })?;
    if !applied.eq_ignore_ascii_case(requested) {
        debug!(requested, applied = %applied, "journal mode not applied as requested");
    }
    Ok(())
}

fn read_version(conn: &Connection) -> Result<String, StoreError> {
    let has_admin: bool = conn
        .prepare_cached(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'Admin'",
        )?
        .query_row([], |row| row.get(0))?;
    if !has_admin {
        return Ok(SchemaVersion::LEGACY.to_string());
    }
    let version: Option<String> = conn
        .prepare_cached("SELECT version FROM Admin")?
        .query_row([], |row| row.get(0))
        .optional()?;
    Ok(version.unwrap_or_else(|| SchemaVersion::LEGACY.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> StoreConfig {
        StoreConfig {
            in_memory: true,
            ..StoreConfig::default()
        }
    }

    #[test]
    fn new_store_gets_latest_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = MapStore::connect(dir.path().join("new.db"), false, StoreConfig::default())
            .unwrap();
        assert_eq!(store.get_version(), "0.10.1");
        assert_eq!(store.schema_version(), SchemaVersion::LATEST);
        store.disconnect().unwrap();
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = MapStore::connect("", false, StoreConfig::default()).unwrap_err();
        assert!(matches!(err, StoreError::EmptyPath));
    }

    #[test]
    fn missing_admin_table_reads_as_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE Node (id INTEGER PRIMARY KEY);")
                .unwrap();
        }
        let store = MapStore::connect(&path, false, StoreConfig::default()).unwrap();
        assert_eq!(store.get_version(), "0.0.0");
        assert_eq!(store.schema_version(), SchemaVersion::LEGACY);
    }

    #[test]
    fn empty_admin_table_reads_as_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty_admin.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE Admin (version TEXT);").unwrap();
        }
        let store = MapStore::connect(&path, false, StoreConfig::default()).unwrap();
        assert_eq!(store.get_version(), "0.0.0");
    }

    #[test]
    fn overwrite_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE Admin (version TEXT); INSERT INTO Admin VALUES('0.7.0');")
                .unwrap();
        }
        let store = MapStore::connect(&path, true, StoreConfig::default()).unwrap();
        assert_eq!(store.get_version(), "0.10.1");
    }

    #[test]
    fn invalid_tuning_values_keep_previous() {
        let dir = tempfile::tempdir().unwrap();
        let mut store =
            MapStore::connect(dir.path().join("t.db"), false, StoreConfig::default()).unwrap();
        assert!(store.set_synchronous(2).unwrap());
        assert!(!store.set_synchronous(7).unwrap());
        assert_eq!(store.config().synchronous, 2);
        assert!(!store.set_temp_store(-1).unwrap());
        assert_eq!(store.config().temp_store, 2);
        assert!(store.set_journal_mode(0).unwrap());
        assert!(!store.set_journal_mode(9).unwrap());
        assert_eq!(store.config().journal_mode, 0);
        store.set_cache_size(500).unwrap();
        let pages: i64 = store
            .conn()
            .pragma_query_value(None, "cache_size", |row| row.get(0))
            .unwrap();
        assert_eq!(pages, 500);
    }

    #[test]
    fn memory_footprint_tracks_page_usage() {
        let dir = tempfile::tempdir().unwrap();
        let store = MapStore::connect(dir.path().join("pages.db"), false, memory_config()).unwrap();
        let before = store.get_memory_footprint().unwrap();
        store
            .execute_no_result(
                "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 200)
                 INSERT INTO Word(id, descriptor_size, descriptor)
                 SELECT i, 1024, zeroblob(1024) FROM n;",
            )
            .unwrap();
        let after = store.get_memory_footprint().unwrap();
        assert!(after > before + 100 * 1024);

        let page_size: i64 = store
            .conn()
            .pragma_query_value(None, "page_size", |row| row.get(0))
            .unwrap();
        assert_eq!(after % page_size as u64, 0);
    }

    #[test]
    fn memory_mode_mirrors_to_file_on_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.db");
        let store = MapStore::connect(&path, false, memory_config()).unwrap();
        assert!(!path.exists());
        assert!(store.get_memory_footprint().unwrap() > 0);
        store
            .execute_no_result("INSERT INTO Word(id, descriptor_size, descriptor) VALUES(3, 1, x'07');")
            .unwrap();
        store.disconnect().unwrap();
        assert!(path.exists());

        let store = MapStore::connect(&path, false, StoreConfig::default()).unwrap();
        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM Word", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.get_memory_footprint().unwrap(), fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn switching_modes_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switch.db");
        let store = MapStore::connect(&path, false, StoreConfig::default()).unwrap();
        store
            .add_statistics(&StatisticsRecord {
                stm_size: 4,
                ..StatisticsRecord::default()
            })
            .unwrap();

        let store = store.set_in_memory(true).unwrap();
        assert!(store.is_in_memory());
        store
            .add_statistics(&StatisticsRecord::default())
            .unwrap();

        let store = store.set_in_memory(false).unwrap();
        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM Statistics", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn drop_mirrors_like_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drop.db");
        {
            let _store = MapStore::connect(&path, false, memory_config()).unwrap();
        }
        let store = MapStore::connect(&path, false, StoreConfig::default()).unwrap();
        assert_eq!(store.get_version(), "0.10.1");
    }
}
