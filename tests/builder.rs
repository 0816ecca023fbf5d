use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use serde_json::{Value, json};

use civic_kb::builder::{
    BuildOptions, BuildState, Builder, CancelToken, GenePipeline, RecordPipeline, RunCounters,
    VariantPipeline,
};
use civic_kb::domain::{EntityId, SnapshotKind};
use civic_kb::enrichment::{EnrichmentClient, EnrichmentResult};
use civic_kb::error::CivicError;
use civic_kb::liftover::ChainFile;
use civic_kb::lookup::LookupService;
use civic_kb::normalize::CoordinateNormalizer;
use civic_kb::snapshot::{self, Snapshot, SnapshotSource};
use civic_kb::store::StoreWriter;

const VARIANT_TSV: &str = include_str!("fixtures/variant_summaries.tsv");
const GENE_TSV: &str = include_str!("fixtures/gene_summaries.tsv");
const VARIANT_101: &str = include_str!("fixtures/variant_101.json");
const CHAIN: &str = include_str!("fixtures/hg19_chr7.chain");

struct MockSnapshots {
    text: Option<String>,
}

impl SnapshotSource for MockSnapshots {
    fn fetch(&self, kind: SnapshotKind, date: NaiveDate) -> Result<Snapshot, CivicError> {
        let url = snapshot::snapshot_url("mem://downloads", kind, date);
        match &self.text {
            Some(text) => snapshot::parse_snapshot(&url, text),
            None => Err(CivicError::SnapshotStatus {
                status: 404,
                message: "not found".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct MockEnrichment {
    variants: HashMap<i64, Value>,
    genes: HashMap<i64, Value>,
}

impl MockEnrichment {
    fn lookup(map: &HashMap<i64, Value>, id: EntityId) -> Result<EnrichmentResult, CivicError> {
        map.get(&id.get())
            .cloned()
            .map(EnrichmentResult::new)
            .ok_or_else(|| CivicError::EnrichmentHttp("connection reset".to_string()))
    }
}

impl EnrichmentClient for MockEnrichment {
    fn fetch_variant(&self, id: EntityId) -> Result<EnrichmentResult, CivicError> {
        Self::lookup(&self.variants, id)
    }

    fn fetch_gene(&self, id: EntityId) -> Result<EnrichmentResult, CivicError> {
        Self::lookup(&self.genes, id)
    }
}

/// Answers every variant with the same payload and cancels the run once
/// `after` calls have been made.
struct CancellingEnrichment {
    cancel: CancelToken,
    after: usize,
    calls: Arc<AtomicUsize>,
    response: Value,
}

impl EnrichmentClient for CancellingEnrichment {
    fn fetch_variant(&self, _id: EntityId) -> Result<EnrichmentResult, CivicError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.cancel.cancel();
        }
        Ok(EnrichmentResult::new(self.response.clone()))
    }

    fn fetch_gene(&self, _id: EntityId) -> Result<EnrichmentResult, CivicError> {
        Err(CivicError::EnrichmentHttp("no genes here".to_string()))
    }
}

fn large_variant_tsv(rows: usize) -> String {
    let mut text = String::from("gene\tvariant\tvariant_id\tsummary\tvariant_types\n");
    for id in 1..=rows {
        text.push_str(&format!("BRAF\tV600E\t{id}\t\tmissense_variant\n"));
    }
    text
}

fn variant_enrichment() -> MockEnrichment {
    let scenario_a: Value = serde_json::from_str(VARIANT_101).unwrap();

    let mut legacy = scenario_a.clone();
    legacy["data"]["variant"]["referenceBuild"] = json!("GRCH37");
    legacy["data"]["variant"]["primaryCoordinates"]["start"] = json!(140753336);

    let mut structural = scenario_a.clone();
    structural["data"]["variant"]["referenceBases"] = Value::Null;
    structural["data"]["variant"]["variantBases"] = Value::Null;

    let mut variants = HashMap::new();
    variants.insert(101, scenario_a);
    variants.insert(102, legacy);
    variants.insert(103, structural);
    // 104 is absent and fails like a dropped connection
    MockEnrichment {
        variants,
        ..Default::default()
    }
}

fn gene_enrichment() -> MockEnrichment {
    let mut genes = HashMap::new();
    genes.insert(
        5,
        json!({ "data": { "gene": { "id": 5, "geneAliases": ["BRAF1", "B-RAF1", "NS7"] } } }),
    );
    genes.insert(30, json!({ "data": { "gene": { "id": 30, "geneAliases": [] } } }));
    genes.insert(31, json!({ "data": { "gene": null } }));
    MockEnrichment {
        genes,
        ..Default::default()
    }
}

fn normalizer() -> CoordinateNormalizer {
    CoordinateNormalizer::new(Arc::new(ChainFile::parse(CHAIN.as_bytes()).unwrap()))
}

fn options(workers: usize) -> BuildOptions {
    BuildOptions {
        workers,
        snapshot_date: NaiveDate::from_ymd_opt(2023, 3, 1).unwrap(),
        cancel: CancelToken::new(),
    }
}

fn store_path(dir: &tempfile::TempDir, kind: SnapshotKind) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join(kind.default_store_file())).unwrap()
}

fn run_variants(target: &Utf8Path, workers: usize) -> Result<civic_kb::builder::RunSummary, CivicError> {
    let builder = Builder::new(
        MockSnapshots {
            text: Some(VARIANT_TSV.to_string()),
        },
        variant_enrichment(),
        options(workers),
    );
    let pipeline = VariantPipeline::new(normalizer());
    builder.run(&pipeline, StoreWriter::open(target)?)
}

#[test]
fn variant_build_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let target = store_path(&dir, SnapshotKind::Variant);

    let summary = run_variants(&target, 1).unwrap();
    assert_eq!(summary.state, BuildState::Done);
    assert_eq!(
        summary.snapshot_url.as_deref(),
        Some("mem://downloads/01-Mar-2023/01-Mar-2023-VariantSummaries.tsv")
    );
    assert_eq!(
        summary.counters,
        RunCounters {
            seen: 5,
            inserted: 2,
            skipped: 1,
            errored: 2,
        }
    );

    let service = LookupService::open(&target).unwrap();
    let hits = service.variants("7", 140453136, "A", "T").unwrap();
    assert_eq!(hits.len(), 2);

    // current-build row is stored as delivered
    let current = &hits[0];
    assert_eq!(current.id, 101);
    assert_eq!(current.chromosome, "7");
    assert_eq!(current.reference_build, "GRCH38");
    assert_eq!(current.description.as_deref(), Some("BRAF V600E"));
    assert_eq!(current.molecular_profile_score, Some(452.5));
    assert_eq!(current.diseases, "Melanoma");
    assert_eq!(current.disease_count, 1);

    // legacy-build row is lifted onto the current assembly
    let lifted = &hits[1];
    assert_eq!(lifted.id, 102);
    assert_eq!(lifted.reference_build, "hg38");
    assert_eq!(lifted.chromosome, "7");
    assert_eq!(lifted.start, 140453136);

    assert!(service.variants("7", 140753336, "A", "T").unwrap().is_empty());
}

#[test]
fn pooled_enrichment_matches_sequential() {
    let dir = tempfile::tempdir().unwrap();
    let target = store_path(&dir, SnapshotKind::Variant);

    let summary = run_variants(&target, 4).unwrap();
    assert_eq!(summary.state, BuildState::Done);
    assert_eq!(summary.counters.seen, 5);
    assert_eq!(summary.counters.inserted, 2);
    assert_eq!(summary.counters.skipped, 1);
    assert_eq!(summary.counters.errored, 2);

    let service = LookupService::open(&target).unwrap();
    let ids: Vec<i64> = service
        .variants("7", 140453136, "A", "T")
        .unwrap()
        .into_iter()
        .map(|hit| hit.id)
        .collect();
    assert_eq!(ids, vec![101, 102]);
}

#[test]
fn gene_build_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let target = store_path(&dir, SnapshotKind::Gene);

    let builder = Builder::new(
        MockSnapshots {
            text: Some(GENE_TSV.to_string()),
        },
        gene_enrichment(),
        options(1),
    );
    let summary = builder
        .run(&GenePipeline, StoreWriter::open(&target).unwrap())
        .unwrap();
    assert_eq!(
        summary.counters,
        RunCounters {
            seen: 3,
            inserted: 2,
            skipped: 1,
            errored: 0,
        }
    );

    let service = LookupService::open(&target).unwrap();
    let braf = service.genes("BRAF").unwrap();
    assert_eq!(braf.len(), 1);
    assert_eq!(braf[0].id, 5);
    assert_eq!(
        braf[0].description.as_deref(),
        Some("BRAF mutations are found in melanoma.")
    );
    assert_eq!(braf[0].aliases, vec!["BRAF1", "B-RAF1", "NS7"]);

    let kras = service.genes("KRAS").unwrap();
    assert_eq!(kras[0].description, None);
    assert!(kras[0].aliases.is_empty());
}

#[test]
fn failed_snapshot_keeps_previous_store() {
    let dir = tempfile::tempdir().unwrap();
    let target = store_path(&dir, SnapshotKind::Variant);
    run_variants(&target, 1).unwrap();

    let enrichment = variant_enrichment();
    let builder = Builder::new(MockSnapshots { text: None }, enrichment, options(1));
    let pipeline = VariantPipeline::new(normalizer());
    let err = builder
        .run(&pipeline, StoreWriter::open(&target).unwrap())
        .unwrap_err();
    assert_matches!(err, CivicError::SnapshotStatus { status: 404, .. });

    let service = LookupService::open(&target).unwrap();
    assert_eq!(service.variants("7", 140453136, "A", "T").unwrap().len(), 2);
}

#[test]
fn missing_key_column_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let target = store_path(&dir, SnapshotKind::Variant);
    let builder = Builder::new(
        MockSnapshots {
            text: Some(GENE_TSV.to_string()),
        },
        variant_enrichment(),
        options(1),
    );
    let pipeline = VariantPipeline::new(normalizer());
    let err = builder
        .run(&pipeline, StoreWriter::open(&target).unwrap())
        .unwrap_err();
    assert_matches!(err, CivicError::MissingColumn(column) if column == "variant_id");
    assert!(!target.exists());
}

#[test]
fn cancelled_run_is_not_finalized() {
    let dir = tempfile::tempdir().unwrap();
    let target = store_path(&dir, SnapshotKind::Variant);

    let mut opts = options(1);
    let cancel = CancelToken::new();
    cancel.cancel();
    opts.cancel = cancel;

    let enrichment = variant_enrichment();
    let builder = Builder::new(
        MockSnapshots {
            text: Some(VARIANT_TSV.to_string()),
        },
        enrichment,
        opts,
    );
    let pipeline = VariantPipeline::new(normalizer());
    let err = builder
        .run(&pipeline, StoreWriter::open(&target).unwrap())
        .unwrap_err();
    assert_matches!(err, CivicError::Cancelled);
    assert!(!target.exists());
    assert!(!Utf8PathBuf::from(format!("{target}.lock")).exists());
}

#[test]
fn empty_snapshot_still_builds_index() {
    let dir = tempfile::tempdir().unwrap();
    let target = store_path(&dir, SnapshotKind::Variant);
    let enrichment = variant_enrichment();
    let builder = Builder::new(
        MockSnapshots {
            text: Some("gene\tvariant_id\n".to_string()),
        },
        enrichment,
        options(1),
    );
    let pipeline = VariantPipeline::new(normalizer());
    let summary = builder
        .run(&pipeline, StoreWriter::open(&target).unwrap())
        .unwrap();
    assert_eq!(summary.counters, RunCounters::default());
    assert!(
        LookupService::open(&target)
            .unwrap()
            .variants("7", 1, "A", "T")
            .unwrap()
            .is_empty()
    );
}

#[test]
fn pipelines_report_their_columns() {
    let variant = VariantPipeline::new(normalizer());
    assert_eq!(variant.kind(), SnapshotKind::Variant);
    assert_eq!(variant.required_columns(), &["variant_id"]);
    assert_eq!(GenePipeline.kind(), SnapshotKind::Gene);
    assert_eq!(
        GenePipeline.required_columns(),
        &["gene_id", "name", "description"]
    );
}

fn cancel_during_enrichment(workers: usize) {
    let dir = tempfile::tempdir().unwrap();
    let target = store_path(&dir, SnapshotKind::Variant);

    let cancel = CancelToken::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let enrichment = CancellingEnrichment {
        cancel: cancel.clone(),
        after: 50,
        calls: Arc::clone(&calls),
        response: serde_json::from_str(VARIANT_101).unwrap(),
    };
    let mut opts = options(workers);
    opts.cancel = cancel;

    let builder = Builder::new(
        MockSnapshots {
            text: Some(large_variant_tsv(2000)),
        },
        enrichment,
        opts,
    );
    let pipeline = VariantPipeline::new(normalizer());
    let err = builder
        .run(&pipeline, StoreWriter::open(&target).unwrap())
        .unwrap_err();
    assert_matches!(err, CivicError::Cancelled);
    assert!(calls.load(Ordering::SeqCst) < 2000);
    assert!(!target.exists());
    assert!(!Utf8PathBuf::from(format!("{target}.lock")).exists());
}

#[test]
fn cancel_mid_run_stops_sequential_build() {
    cancel_during_enrichment(1);
}

#[test]
fn cancel_mid_run_stops_pooled_build() {
    cancel_during_enrichment(4);
}

#[test]
fn failed_index_keeps_previous_store() {
    let dir = tempfile::tempdir().unwrap();
    let target = store_path(&dir, SnapshotKind::Variant);

    // a previous store whose index name is already taken by another table
    let conn = rusqlite::Connection::open(target.as_std_path()).unwrap();
    conn.execute_batch(
        "CREATE TABLE civic (
            id INTEGER NOT NULL,
            chromosome TEXT NOT NULL,
            start INTEGER NOT NULL,
            reference_build TEXT NOT NULL,
            reference_base TEXT NOT NULL,
            variant_base TEXT NOT NULL,
            description TEXT,
            molecular_profile_score REAL,
            diseases TEXT NOT NULL
        );
        INSERT INTO civic VALUES (900, '7', 140453136, 'GRCH38', 'A', 'T', 'old', NULL, 'Melanoma');
        CREATE TABLE other (x INTEGER);
        CREATE INDEX civic_index ON other (x);",
    )
    .unwrap();
    conn.close().unwrap();

    let err = run_variants(&target, 1).unwrap_err();
    assert_matches!(err, CivicError::Store { fatal: true, .. });

    let service = LookupService::open(&target).unwrap();
    let ids: Vec<i64> = service
        .variants("7", 140453136, "A", "T")
        .unwrap()
        .into_iter()
        .map(|hit| hit.id)
        .collect();
    assert_eq!(ids, vec![900]);

    assert!(!Utf8PathBuf::from(format!("{target}.lock")).exists());
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().contains("staging"))
        .count();
    assert_eq!(leftovers, 0);
}
