//! The build run: snapshot, per-row enrichment, extraction and store writes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate};
use serde::Serialize;

use crate::domain::{EntityId, SnapshotKind};
use crate::enrichment::{EnrichmentClient, EnrichmentResult};
use crate::error::CivicError;
use crate::extract::{self, Extraction, SkipReason};
use crate::normalize::CoordinateNormalizer;
use crate::snapshot::{self, Snapshot, SnapshotRow, SnapshotSource};
use crate::store::{StoreStats, StoreWriter};

const PROGRESS_EVERY: u64 = 250;

/// The per-kind capabilities of a build: which column keys a row, which query
/// enriches it, and how the pair becomes a record.
pub trait RecordPipeline: Send + Sync {
    fn kind(&self) -> SnapshotKind;
    fn required_columns(&self) -> &'static [&'static str];
    fn row_key(&self, row: &SnapshotRow) -> Result<EntityId, CivicError>;
    fn enrich(
        &self,
        client: &dyn EnrichmentClient,
        id: EntityId,
    ) -> Result<EnrichmentResult, CivicError>;
    fn map(&self, id: EntityId, row: &SnapshotRow, enrichment: &EnrichmentResult) -> Extraction;
}

fn key_from(row: &SnapshotRow, column: &str) -> Result<EntityId, CivicError> {
    row.get(column)
        .ok_or_else(|| CivicError::MissingColumn(column.to_string()))?
        .parse()
}

pub struct VariantPipeline {
    normalizer: CoordinateNormalizer,
}

impl VariantPipeline {
    pub fn new(normalizer: CoordinateNormalizer) -> Self {
        Self { normalizer }
    }
}

impl RecordPipeline for VariantPipeline {
    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Variant
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["variant_id"]
    }

    fn row_key(&self, row: &SnapshotRow) -> Result<EntityId, CivicError> {
        key_from(row, "variant_id")
    }

    fn enrich(
        &self,
        client: &dyn EnrichmentClient,
        id: EntityId,
    ) -> Result<EnrichmentResult, CivicError> {
        client.fetch_variant(id)
    }

    fn map(&self, id: EntityId, _row: &SnapshotRow, enrichment: &EnrichmentResult) -> Extraction {
        extract::extract_variant(id, enrichment, &self.normalizer)
    }
}

pub struct GenePipeline;

impl RecordPipeline for GenePipeline {
    fn kind(&self) -> SnapshotKind {
        SnapshotKind::Gene
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["gene_id", "name", "description"]
    }

    fn row_key(&self, row: &SnapshotRow) -> Result<EntityId, CivicError> {
        key_from(row, "gene_id")
    }

    fn enrich(
        &self,
        client: &dyn EnrichmentClient,
        id: EntityId,
    ) -> Result<EnrichmentResult, CivicError> {
        client.fetch_gene(id)
    }

    fn map(&self, id: EntityId, row: &SnapshotRow, enrichment: &EnrichmentResult) -> Extraction {
        extract::extract_gene(id, row, enrichment)
    }
}

/// Run-level cancellation, optionally with a deadline. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .deadline
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Idle,
    FetchingSnapshot,
    EnrichingRow,
    ExtractingRow,
    InsertingRow,
    Indexing,
    Done,
    Failed,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Idle => "idle",
            BuildState::FetchingSnapshot => "fetching_snapshot",
            BuildState::EnrichingRow => "enriching_row",
            BuildState::ExtractingRow => "extracting_row",
            BuildState::InsertingRow => "inserting_row",
            BuildState::Indexing => "indexing",
            BuildState::Done => "done",
            BuildState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub seen: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub errored: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub kind: SnapshotKind,
    pub snapshot_url: Option<String>,
    pub store: String,
    pub started_at: String,
    pub finished_at: String,
    pub elapsed_secs: f64,
    #[serde(flatten)]
    pub counters: RunCounters,
    pub state: BuildState,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub workers: usize,
    pub snapshot_date: NaiveDate,
    pub cancel: CancelToken,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            snapshot_date: snapshot::snapshot_date(&Local::now()),
            cancel: CancelToken::new(),
        }
    }
}

struct RunContext {
    state: BuildState,
    counters: RunCounters,
    snapshot_url: Option<String>,
}

impl RunContext {
    fn enter(&mut self, next: BuildState) {
        if self.state != next {
            tracing::trace!(from = %self.state, to = %next, "build state");
            self.state = next;
        }
    }

    fn progress(&self) {
        if self.counters.seen > 0 && self.counters.seen % PROGRESS_EVERY == 0 {
            tracing::info!(
                seen = self.counters.seen,
                inserted = self.counters.inserted,
                skipped = self.counters.skipped,
                errored = self.counters.errored,
                "progress"
            );
        }
    }
}

pub struct Builder<S: SnapshotSource, E: EnrichmentClient> {
    snapshot: S,
    enrichment: E,
    options: BuildOptions,
}

impl<S: SnapshotSource, E: EnrichmentClient> Builder<S, E> {
    pub fn new(snapshot: S, enrichment: E, options: BuildOptions) -> Self {
        Self {
            snapshot,
            enrichment,
            options,
        }
    }

    /// Runs one complete build into `store`. Succeeds only when the store was
    /// finalized; on any error the previous store is left as it was.
    pub fn run(
        &self,
        pipeline: &dyn RecordPipeline,
        store: StoreWriter,
    ) -> Result<RunSummary, CivicError> {
        let kind = pipeline.kind();
        let store_path = store.target().to_string();
        let started_at = Local::now();
        let clock = Instant::now();
        tracing::info!(
            "CIViC {kind} build started: {}",
            started_at.format("%a %b %e %H:%M:%S %Y")
        );

        let mut ctx = RunContext {
            state: BuildState::Idle,
            counters: RunCounters::default(),
            snapshot_url: None,
        };
        let outcome = self.execute(pipeline, store, &mut ctx);

        let finished_at = Local::now();
        let elapsed = clock.elapsed().as_secs_f64();
        let error = match &outcome {
            Ok(_) => {
                ctx.enter(BuildState::Done);
                None
            }
            Err(err) => {
                ctx.enter(BuildState::Failed);
                tracing::error!(error = %err, "CIViC {kind} build failed");
                Some(err.to_string())
            }
        };

        tracing::info!("Finished: {}", finished_at.format("%a %b %e %H:%M:%S %Y"));
        tracing::info!("Runtime: {elapsed:6.3} s");
        tracing::info!("Records inserted: {}", ctx.counters.inserted);
        tracing::info!(
            state = %ctx.state,
            "rows seen={} inserted={} skipped={} errored={}",
            ctx.counters.seen,
            ctx.counters.inserted,
            ctx.counters.skipped,
            ctx.counters.errored
        );

        let summary = RunSummary {
            kind,
            snapshot_url: ctx.snapshot_url,
            store: store_path,
            started_at: started_at.to_rfc3339(),
            finished_at: finished_at.to_rfc3339(),
            elapsed_secs: elapsed,
            counters: ctx.counters,
            state: ctx.state,
            error,
        };
        outcome.map(|_| summary)
    }

    fn execute(
        &self,
        pipeline: &dyn RecordPipeline,
        mut store: StoreWriter,
        ctx: &mut RunContext,
    ) -> Result<StoreStats, CivicError> {
        let kind = pipeline.kind();

        ctx.enter(BuildState::FetchingSnapshot);
        let snapshot = self.snapshot.fetch(kind, self.options.snapshot_date)?;
        tracing::info!(url = %snapshot.url, rows = snapshot.rows.len(), "snapshot loaded");
        ctx.snapshot_url = Some(snapshot.url.clone());
        snapshot.columns.require(pipeline.required_columns())?;

        ctx.counters.seen += snapshot.malformed as u64;
        ctx.counters.errored += snapshot.malformed as u64;

        store.begin_run(kind)?;

        if self.options.workers > 1 {
            self.process_pooled(pipeline, &snapshot, &mut store, ctx)?;
        } else {
            self.process_sequential(pipeline, &snapshot, &mut store, ctx)?;
        }

        if self.options.cancel.is_cancelled() {
            return Err(CivicError::Cancelled);
        }

        ctx.enter(BuildState::Indexing);
        store.finalize()
    }

    fn process_sequential(
        &self,
        pipeline: &dyn RecordPipeline,
        snapshot: &Snapshot,
        store: &mut StoreWriter,
        ctx: &mut RunContext,
    ) -> Result<(), CivicError> {
        for row in &snapshot.rows {
            if self.options.cancel.is_cancelled() {
                return Err(CivicError::Cancelled);
            }
            let Some(id) = self.key_row(pipeline, row, ctx) else {
                continue;
            };
            ctx.enter(BuildState::EnrichingRow);
            let enriched = pipeline.enrich(&self.enrichment, id);
            self.complete_row(pipeline, row, id, enriched, store, ctx)?;
        }
        Ok(())
    }

    /// Enrichment fans out over `workers` threads; extraction and inserts stay
    /// on this thread, which is the store's only writer.
    fn process_pooled(
        &self,
        pipeline: &dyn RecordPipeline,
        snapshot: &Snapshot,
        store: &mut StoreWriter,
        ctx: &mut RunContext,
    ) -> Result<(), CivicError> {
        let workers = self.options.workers;
        let cancel = &self.options.cancel;
        let enrichment: &dyn EnrichmentClient = &self.enrichment;

        let mut jobs = Vec::with_capacity(snapshot.rows.len());
        for (index, row) in snapshot.rows.iter().enumerate() {
            if let Some(id) = self.key_row(pipeline, row, ctx) {
                jobs.push((index, id));
            }
        }

        let stop = AtomicBool::new(false);
        let stop = &stop;
        let (job_tx, job_rx) = mpsc::sync_channel::<(usize, EntityId)>(workers * 2);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, result_rx) = mpsc::sync_channel(workers * 2);

        thread::scope(move |scope| {
            scope.spawn(move || {
                for job in jobs {
                    if stop.load(Ordering::SeqCst) || cancel.is_cancelled() {
                        break;
                    }
                    if job_tx.send(job).is_err() {
                        break;
                    }
                }
            });

            // the workers own the job receiver, so the feeder unblocks once they exit
            for _ in 0..workers {
                let job_rx = Arc::clone(&job_rx);
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    loop {
                        let job = match job_rx.lock() {
                            Ok(receiver) => receiver.recv(),
                            Err(_) => break,
                        };
                        let Ok((index, id)) = job else {
                            break;
                        };
                        if stop.load(Ordering::SeqCst) || cancel.is_cancelled() {
                            break;
                        }
                        let enriched = pipeline.enrich(enrichment, id);
                        if result_tx.send((index, id, enriched)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(result_tx);

            ctx.enter(BuildState::EnrichingRow);
            for (index, id, enriched) in result_rx {
                if cancel.is_cancelled() {
                    stop.store(true, Ordering::SeqCst);
                    return Err(CivicError::Cancelled);
                }
                let row = &snapshot.rows[index];
                if let Err(err) = self.complete_row(pipeline, row, id, enriched, store, ctx) {
                    stop.store(true, Ordering::SeqCst);
                    return Err(err);
                }
            }
            if cancel.is_cancelled() {
                return Err(CivicError::Cancelled);
            }
            Ok(())
        })
    }

    fn key_row(
        &self,
        pipeline: &dyn RecordPipeline,
        row: &SnapshotRow,
        ctx: &mut RunContext,
    ) -> Option<EntityId> {
        ctx.counters.seen += 1;
        match pipeline.row_key(row) {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(line = row.line(), error = %err, "snapshot row has no usable id");
                ctx.counters.errored += 1;
                ctx.progress();
                None
            }
        }
    }

    /// Extracts and stores one enriched row. Only fatal store errors escape;
    /// everything else is logged against the row id and counted.
    fn complete_row(
        &self,
        pipeline: &dyn RecordPipeline,
        row: &SnapshotRow,
        id: EntityId,
        enriched: Result<EnrichmentResult, CivicError>,
        store: &mut StoreWriter,
        ctx: &mut RunContext,
    ) -> Result<(), CivicError> {
        let result = self.store_row(pipeline, row, id, enriched, store, ctx);
        ctx.progress();
        result
    }

    fn store_row(
        &self,
        pipeline: &dyn RecordPipeline,
        row: &SnapshotRow,
        id: EntityId,
        enriched: Result<EnrichmentResult, CivicError>,
        store: &mut StoreWriter,
        ctx: &mut RunContext,
    ) -> Result<(), CivicError> {
        let enrichment = match enriched {
            Ok(enrichment) => enrichment,
            Err(err) => {
                tracing::warn!(
                    %id,
                    error = %err,
                    transport = err.is_transport(),
                    "enrichment failed"
                );
                ctx.counters.errored += 1;
                return Ok(());
            }
        };
        if let Some(parse_error) = enrichment.parse_error() {
            tracing::warn!(%id, error = parse_error, "enrichment response is not JSON");
        }
        for message in enrichment.errors() {
            tracing::warn!(%id, message, "enrichment reported an error");
        }

        ctx.enter(BuildState::ExtractingRow);
        let record = match pipeline.map(id, row, &enrichment) {
            Extraction::Record(record) => record,
            Extraction::Skip(reason) => {
                ctx.counters.skipped += 1;
                match &reason {
                    SkipReason::Normalization(_) => {
                        tracing::warn!(%id, reason = %reason, "row skipped")
                    }
                    _ => tracing::debug!(%id, reason = %reason, "row skipped"),
                }
                return Ok(());
            }
        };

        ctx.enter(BuildState::InsertingRow);
        match store.insert(&record) {
            Ok(()) => {
                ctx.counters.inserted += 1;
                tracing::debug!(?record, "inserted");
                Ok(())
            }
            Err(err) if err.is_fatal_store() => Err(err),
            Err(err) => {
                tracing::warn!(%id, error = %err, "insert failed");
                ctx.counters.errored += 1;
                Ok(())
            }
        }
    }
}

/// Picks the pipeline for `kind`. Only variants need the normalizer.
pub fn pipeline_for(kind: SnapshotKind, normalizer: CoordinateNormalizer) -> Box<dyn RecordPipeline> {
    match kind {
        SnapshotKind::Variant => Box::new(VariantPipeline::new(normalizer)),
        SnapshotKind::Gene => Box::new(GenePipeline),
    }
}
