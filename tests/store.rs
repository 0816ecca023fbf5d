use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use civic_kb::domain::{EntityId, GeneRecord, Record, SnapshotKind, VariantRecord};
use civic_kb::error::CivicError;
use civic_kb::lookup::LookupService;
use civic_kb::store::StoreWriter;

fn variant(id: i64, start: i64, diseases: &str) -> Record {
    Record::Variant(VariantRecord {
        id: EntityId::new(id),
        chromosome: "12".to_string(),
        start,
        reference_build: "GRCH38".to_string(),
        reference_base: "C".to_string(),
        variant_base: "A".to_string(),
        description: None,
        molecular_profile_score: None,
        diseases: diseases.to_string(),
    })
}

fn target(dir: &tempfile::TempDir, kind: SnapshotKind) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join(kind.default_store_file())).unwrap()
}

#[test]
fn written_rows_are_found_by_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir, SnapshotKind::Variant);

    let mut writer = StoreWriter::open(&path).unwrap();
    writer.begin_run(SnapshotKind::Variant).unwrap();
    writer
        .insert(&variant(12, 25245351, "Lung Non-small Cell Carcinoma, Colorectal Cancer"))
        .unwrap();
    writer.insert(&variant(13, 25245350, "")).unwrap();
    assert_eq!(writer.inserted(), 2);
    writer.finalize().unwrap();

    let service = LookupService::open(&path).unwrap();
    let hits = service.variants("12", 25245351, "C", "A").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, 12);
    assert_eq!(hits[0].disease_count, 2);
    assert_eq!(hits[0].description, None);
    assert!(service.variants("12", 25245351, "C", "T").unwrap().is_empty());
    assert!(service.variants("1", 25245351, "C", "A").unwrap().is_empty());
}

#[test]
fn rebuild_replaces_table_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir, SnapshotKind::Gene);

    for names in [vec!["BRAF", "KRAS"], vec!["EGFR"]] {
        let mut writer = StoreWriter::open(&path).unwrap();
        writer.begin_run(SnapshotKind::Gene).unwrap();
        for (offset, name) in names.iter().enumerate() {
            writer
                .insert(&Record::Gene(GeneRecord {
                    id: EntityId::new(offset as i64 + 1),
                    name: name.to_string(),
                    description: None,
                    aliases: String::new(),
                }))
                .unwrap();
        }
        writer.finalize().unwrap();
    }

    let service = LookupService::open(&path).unwrap();
    assert!(service.genes("BRAF").unwrap().is_empty());
    assert_eq!(service.genes("EGFR").unwrap().len(), 1);
}

#[test]
fn gene_and_variant_tables_share_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("civic_all.sqlite")).unwrap();

    let mut writer = StoreWriter::open(&path).unwrap();
    writer.begin_run(SnapshotKind::Variant).unwrap();
    writer.insert(&variant(12, 25245351, "")).unwrap();
    writer.finalize().unwrap();

    let mut writer = StoreWriter::open(&path).unwrap();
    writer.begin_run(SnapshotKind::Gene).unwrap();
    writer
        .insert(&Record::Gene(GeneRecord {
            id: EntityId::new(30),
            name: "KRAS".to_string(),
            description: Some("KRAS is a GTPase.".to_string()),
            aliases: "KRAS2,RASK2".to_string(),
        }))
        .unwrap();
    writer.finalize().unwrap();

    let service = LookupService::open(&path).unwrap();
    assert_eq!(service.variants("12", 25245351, "C", "A").unwrap().len(), 1);
    let kras = service.genes("KRAS").unwrap();
    assert_eq!(kras[0].aliases, vec!["KRAS2", "RASK2"]);
}

#[test]
fn lookup_without_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir, SnapshotKind::Variant);
    assert_matches!(
        LookupService::open(&path),
        Err(CivicError::NotFound { kind: "store", .. })
    );
}

#[test]
fn insert_before_begin_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = StoreWriter::open(target(&dir, SnapshotKind::Variant)).unwrap();
    let err = writer.insert(&variant(1, 1, "")).unwrap_err();
    assert!(err.is_fatal_store());
}
