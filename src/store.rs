//! The SQLite store a build run writes.
//!
//! A run is built in a staging file beside the target and only renamed over it
//! by [`StoreWriter::finalize`]. A writer dropped before that point removes the
//! staging file, so readers keep seeing the previous store.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, params};
use serde::Serialize;
use tempfile::TempPath;

use crate::domain::{Record, SnapshotKind};
use crate::error::CivicError;
use crate::fs_util;

const VARIANT_SCHEMA: &str = "CREATE TABLE civic (
    id INTEGER NOT NULL,
    chromosome TEXT NOT NULL,
    start INTEGER NOT NULL,
    reference_build TEXT NOT NULL,
    reference_base TEXT NOT NULL,
    variant_base TEXT NOT NULL,
    description TEXT,
    molecular_profile_score REAL,
    diseases TEXT NOT NULL
)";

const GENE_SCHEMA: &str = "CREATE TABLE civic_gene (
    id INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    aliases TEXT NOT NULL
)";

const INSERT_VARIANT: &str = "INSERT INTO civic (
    id, chromosome, start, reference_build, reference_base, variant_base,
    description, molecular_profile_score, diseases
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const INSERT_GENE: &str =
    "INSERT INTO civic_gene (id, name, description, aliases) VALUES (?1, ?2, ?3, ?4)";

fn schema(kind: SnapshotKind) -> &'static str {
    match kind {
        SnapshotKind::Variant => VARIANT_SCHEMA,
        SnapshotKind::Gene => GENE_SCHEMA,
    }
}

fn index_sql(kind: SnapshotKind) -> String {
    let columns = match kind {
        SnapshotKind::Variant => "start, reference_base, variant_base",
        SnapshotKind::Gene => "name",
    };
    format!(
        "CREATE INDEX {} ON {} ({columns})",
        kind.index_name(),
        kind.table_name()
    )
}

fn fatal(message: impl Into<String>) -> CivicError {
    CivicError::Store {
        message: message.into(),
        fatal: true,
    }
}

/// Exclusive claim on a store path for the lifetime of one run.
#[derive(Debug)]
struct RunLock {
    path: Utf8PathBuf,
}

impl RunLock {
    fn acquire(target: &Utf8Path) -> Result<Self, CivicError> {
        let path = Utf8PathBuf::from(format!("{target}.lock"));
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(CivicError::StoreLocked(target.as_std_path().to_path_buf()));
            }
            Err(err) => return Err(fatal(format!("cannot create lock {path}: {err}"))),
        };
        // the pid only helps whoever finds a stale lock
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path, error = %err, "failed to remove store lock");
        }
    }
}

#[derive(Debug)]
struct ActiveRun {
    kind: SnapshotKind,
    // declared before `staging` so the connection closes before the file is removed
    conn: Connection,
    staging: TempPath,
    inserted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub path: String,
    pub table: String,
    pub rows: u64,
}

#[derive(Debug)]
pub struct StoreWriter {
    target: Utf8PathBuf,
    run: Option<ActiveRun>,
    _lock: RunLock,
}

impl StoreWriter {
    /// Claims `target` for one run. Fails with [`CivicError::StoreLocked`] if
    /// another run holds it.
    pub fn open(target: impl Into<Utf8PathBuf>) -> Result<Self, CivicError> {
        let target = target.into();
        fs_util::ensure_parent(target.as_std_path())
            .map_err(|err| fatal(format!("cannot create store directory: {err}")))?;
        let lock = RunLock::acquire(&target)?;
        Ok(Self {
            target,
            run: None,
            _lock: lock,
        })
    }

    pub fn target(&self) -> &Utf8Path {
        &self.target
    }

    /// Starts a fresh staging copy with an empty table for `kind`.
    pub fn begin_run(&mut self, kind: SnapshotKind) -> Result<(), CivicError> {
        if self.run.is_some() {
            return Err(fatal("a run is already in progress on this writer"));
        }
        let parent = self
            .target
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let staging = tempfile::Builder::new()
            .prefix(".civic-kb-staging")
            .suffix(".sqlite")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| fatal(format!("cannot create staging store: {err}")))?
            .into_temp_path();

        if self.target.as_std_path().exists() {
            fs::copy(self.target.as_std_path(), &staging)
                .map_err(|err| fatal(format!("cannot copy existing store: {err}")))?;
        }

        let conn = Connection::open(&staging)
            .map_err(|err| fatal(format!("cannot open staging store: {err}")))?;
        let table = kind.table_name();
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = MEMORY;
             PRAGMA synchronous = FULL;
             BEGIN EXCLUSIVE;
             DROP TABLE IF EXISTS {table};
             {};",
            schema(kind)
        ))
        .map_err(|err| fatal(format!("cannot create table {table}: {err}")))?;

        tracing::info!(store = %self.target, table, "store run started");
        self.run = Some(ActiveRun {
            kind,
            conn,
            staging,
            inserted: 0,
        });
        Ok(())
    }

    /// Appends one row. Constraint failures come back as non-fatal store errors
    /// so the caller can count them and carry on.
    pub fn insert(&mut self, record: &Record) -> Result<(), CivicError> {
        let run = self
            .run
            .as_mut()
            .ok_or_else(|| fatal("insert called before begin_run"))?;
        if record.kind() != run.kind {
            return Err(CivicError::Store {
                message: format!("cannot insert a {} into the {} table", record.kind(), run.kind),
                fatal: false,
            });
        }

        match record {
            Record::Variant(variant) => {
                run.conn.prepare_cached(INSERT_VARIANT)?.execute(params![
                    variant.id.get(),
                    variant.chromosome,
                    variant.start,
                    variant.reference_build,
                    variant.reference_base,
                    variant.variant_base,
                    variant.description,
                    variant.molecular_profile_score,
                    variant.diseases,
                ])?;
            }
            Record::Gene(gene) => {
                run.conn.prepare_cached(INSERT_GENE)?.execute(params![
                    gene.id.get(),
                    gene.name,
                    gene.description,
                    gene.aliases,
                ])?;
            }
        }
        run.inserted += 1;
        Ok(())
    }

    pub fn inserted(&self) -> u64 {
        self.run.as_ref().map(|run| run.inserted).unwrap_or(0)
    }

    /// Builds the lookup index, commits, and swaps the staging file into place.
    /// Consumes the writer, so a run is finalized at most once.
    pub fn finalize(mut self) -> Result<StoreStats, CivicError> {
        let run = self
            .run
            .take()
            .ok_or_else(|| fatal("finalize called before begin_run"))?;
        let table = run.kind.table_name();
        if run.inserted == 0 {
            tracing::warn!(table, "building index on an empty table");
        }

        run.conn
            .execute_batch(&format!("{}; COMMIT;", index_sql(run.kind)))
            .map_err(|err| fatal(format!("cannot build index on {table}: {err}")))?;
        run.conn
            .close()
            .map_err(|(_, err)| fatal(format!("cannot close staging store: {err}")))?;
        // the staging data must be on disk before the rename publishes it
        fs_util::sync_file(&run.staging).map_err(|err| fatal(err.to_string()))?;
        run.staging
            .persist(self.target.as_std_path())
            .map_err(|err| fatal(format!("cannot replace {}: {}", self.target, err.error)))?;
        fs_util::sync_parent(self.target.as_std_path()).map_err(|err| fatal(err.to_string()))?;

        tracing::info!(store = %self.target, table, rows = run.inserted, "store finalized");
        Ok(StoreStats {
            path: self.target.to_string(),
            table: table.to_string(),
            rows: run.inserted,
        })
    }
}
