//! Joins a snapshot row with its enrichment response into a storable record.

use std::fmt;

use serde_json::Value;

use crate::domain::{EntityId, GeneRecord, INDEL_PLACEHOLDER, Record, VariantRecord};
use crate::enrichment::EnrichmentResult;
use crate::evidence;
use crate::normalize::{CoordinateNormalizer, NormalizationFailure};
use crate::snapshot::SnapshotRow;

const VARIANT: &str = "variant";
const PROFILE: &str = "singleVariantMolecularProfile";
const COORDINATES: &str = "primaryCoordinates";

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MissingLocation,
    StructuralVariant,
    Normalization(NormalizationFailure),
    MissingName,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingLocation => write!(f, "missing chromosome or start"),
            SkipReason::StructuralVariant => write!(f, "no reference or variant bases"),
            SkipReason::Normalization(failure) => write!(f, "{failure}"),
            SkipReason::MissingName => write!(f, "missing gene name"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Record(Record),
    Skip(SkipReason),
}

pub fn extract_variant(
    id: EntityId,
    enrichment: &EnrichmentResult,
    normalizer: &CoordinateNormalizer,
) -> Extraction {
    let chromosome = enrichment.text_at(&["data", VARIANT, COORDINATES, "chromosome"]);
    let start = enrichment.text_at(&["data", VARIANT, COORDINATES, "start"]);
    let (Some(chromosome), Some(start)) = (chromosome, start) else {
        return Extraction::Skip(SkipReason::MissingLocation);
    };

    let reference_base = enrichment.str_at(&["data", VARIANT, "referenceBases"]);
    let variant_base = enrichment.str_at(&["data", VARIANT, "variantBases"]);
    let (reference_base, variant_base) = match (reference_base, variant_base) {
        (None, None) => return Extraction::Skip(SkipReason::StructuralVariant),
        (reference, variant) => (
            reference.unwrap_or(INDEL_PLACEHOLDER).to_string(),
            variant.unwrap_or(INDEL_PLACEHOLDER).to_string(),
        ),
    };

    let build = enrichment
        .str_at(&["data", VARIANT, "referenceBuild"])
        .unwrap_or_default();
    let coordinate = match normalizer.normalize(build, &chromosome, &start) {
        Ok(coordinate) => coordinate,
        Err(failure) => return Extraction::Skip(SkipReason::Normalization(failure)),
    };

    let molecular_profile_score =
        enrichment.float_at(&["data", VARIANT, PROFILE, "molecularProfileScore"]);
    let description = enrichment
        .str_at(&["data", VARIANT, PROFILE, "description"])
        .map(str::to_string);
    let diseases = enrichment
        .array_at(&["data", VARIANT, PROFILE, "evidenceItems", "nodes"])
        .map(evidence::aggregate)
        .unwrap_or_default();

    Extraction::Record(Record::Variant(VariantRecord {
        id,
        chromosome: coordinate.chromosome,
        start: coordinate.position,
        reference_build: coordinate.assembly,
        reference_base,
        variant_base,
        description,
        molecular_profile_score,
        diseases,
    }))
}

pub fn extract_gene(id: EntityId, row: &SnapshotRow, enrichment: &EnrichmentResult) -> Extraction {
    let Some(name) = row.non_empty("name") else {
        return Extraction::Skip(SkipReason::MissingName);
    };
    let description = row.non_empty("description").map(str::to_string);
    let aliases = enrichment
        .array_at(&["data", "gene", "geneAliases"])
        .map(|aliases| {
            aliases
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();

    Extraction::Record(Record::Gene(GeneRecord {
        id,
        name: name.to_string(),
        description,
        aliases,
    }))
}
