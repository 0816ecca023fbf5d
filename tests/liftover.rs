use std::io::Write;

use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::GzEncoder;

use civic_kb::liftover::{ChainFile, Liftover};
use civic_kb::normalize::CoordinateNormalizer;

const CHAIN: &str = include_str!("fixtures/hg19_chr7.chain");

#[test]
fn braf_hotspot_lifts_to_current_assembly() {
    let chains = ChainFile::parse(CHAIN.as_bytes()).unwrap();
    assert_eq!(chains.chain_count(), 1);
    assert_eq!(
        chains.convert("chr7", 140753336),
        vec![("chr7".to_string(), 140453136)]
    );
    assert!(chains.convert("chr7", 1).is_empty());
    assert!(chains.convert("chr8", 140753336).is_empty());
}

#[test]
fn gzipped_chain_file_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("hg19ToHg38.over.chain.gz")).unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(CHAIN.as_bytes()).unwrap();
    std::fs::write(&path, encoder.finish().unwrap()).unwrap();

    let chains = ChainFile::from_path(&path).unwrap();
    let normalizer = CoordinateNormalizer::new(std::sync::Arc::new(chains));
    let coordinate = normalizer.normalize("hg19", "chr7", "140753336").unwrap();
    assert_eq!(coordinate.assembly, "hg38");
    assert_eq!(coordinate.chromosome, "7");
    assert_eq!(coordinate.position, 140453136);
}
