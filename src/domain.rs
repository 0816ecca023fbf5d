use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CivicError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    #[value(alias = "variants")]
    Variant,
    #[value(alias = "genes")]
    Gene,
}

impl SnapshotKind {
    /// File name stem used by the monthly download directory.
    pub fn summary_name(&self) -> &'static str {
        match self {
            SnapshotKind::Variant => "VariantSummaries",
            SnapshotKind::Gene => "GeneSummaries",
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            SnapshotKind::Variant => "civic",
            SnapshotKind::Gene => "civic_gene",
        }
    }

    pub fn index_name(&self) -> &'static str {
        match self {
            SnapshotKind::Variant => "civic_index",
            SnapshotKind::Gene => "civic_gene_index",
        }
    }

    pub fn default_store_file(&self) -> &'static str {
        match self {
            SnapshotKind::Variant => "civic.sqlite",
            SnapshotKind::Gene => "civic_gene.sqlite",
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotKind::Variant => write!(f, "variant"),
            SnapshotKind::Gene => write!(f, "gene"),
        }
    }
}

impl FromStr for SnapshotKind {
    type Err = CivicError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "variant" | "variants" => Ok(SnapshotKind::Variant),
            "gene" | "genes" => Ok(SnapshotKind::Gene),
            _ => Err(CivicError::InvalidKind(value.to_string())),
        }
    }
}

/// Primary key of a CIViC variant or gene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(i64);

impl EntityId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = CivicError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed.parse::<i64>() {
            Ok(id) if id >= 0 => Ok(Self(id)),
            _ => Err(CivicError::InvalidEntityId(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceBuild {
    Current,
    Legacy,
    Unknown,
}

impl ReferenceBuild {
    pub const CURRENT_SPELLINGS: [&'static str; 2] = ["GRCH38", "hg38"];
    pub const LEGACY_SPELLINGS: [&'static str; 2] = ["GRCH37", "hg19"];
    pub const LIFTED_LABEL: &'static str = "hg38";

    pub fn classify(value: &str) -> Self {
        let value = value.trim();
        if Self::CURRENT_SPELLINGS
            .iter()
            .any(|name| name.eq_ignore_ascii_case(value))
        {
            ReferenceBuild::Current
        } else if Self::LEGACY_SPELLINGS
            .iter()
            .any(|name| name.eq_ignore_ascii_case(value))
        {
            ReferenceBuild::Legacy
        } else {
            ReferenceBuild::Unknown
        }
    }
}

/// A resolved genomic position. Only the normalizer builds these, and it never
/// builds one with an unknown build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Coordinate {
    pub build: ReferenceBuild,
    pub assembly: String,
    pub chromosome: String,
    pub position: i64,
}

pub const INDEL_PLACEHOLDER: &str = "-";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantRecord {
    pub id: EntityId,
    pub chromosome: String,
    pub start: i64,
    pub reference_build: String,
    pub reference_base: String,
    pub variant_base: String,
    pub description: Option<String>,
    pub molecular_profile_score: Option<f64>,
    pub diseases: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneRecord {
    pub id: EntityId,
    pub name: String,
    pub description: Option<String>,
    pub aliases: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Variant(VariantRecord),
    Gene(GeneRecord),
}

impl Record {
    pub fn id(&self) -> EntityId {
        match self {
            Record::Variant(record) => record.id,
            Record::Gene(record) => record.id,
        }
    }

    pub fn kind(&self) -> SnapshotKind {
        match self {
            Record::Variant(_) => SnapshotKind::Variant,
            Record::Gene(_) => SnapshotKind::Gene,
        }
    }
}
