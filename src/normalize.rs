use std::fmt;
use std::sync::Arc;

use crate::domain::{Coordinate, ReferenceBuild};
use crate::liftover::{Liftover, NoLiftover};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizationFailure {
    UnknownBuild(String),
    InvalidPosition(String),
    Unmapped { chromosome: String, position: i64 },
}

impl fmt::Display for NormalizationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationFailure::UnknownBuild(build) => {
                write!(f, "unrecognized reference build {build:?}")
            }
            NormalizationFailure::InvalidPosition(position) => {
                write!(f, "invalid position {position:?}")
            }
            NormalizationFailure::Unmapped {
                chromosome,
                position,
            } => write!(f, "no liftover mapping for chr{chromosome}:{position}"),
        }
    }
}

/// Resolves coordinates onto the current assembly. Holds only shared,
/// read-only liftover data, so clones are cheap and safe across threads.
#[derive(Clone)]
pub struct CoordinateNormalizer {
    liftover: Arc<dyn Liftover>,
}

impl CoordinateNormalizer {
    pub fn new(liftover: Arc<dyn Liftover>) -> Self {
        Self { liftover }
    }

    /// A normalizer that passes current coordinates through and fails every
    /// legacy one.
    pub fn without_liftover() -> Self {
        Self::new(Arc::new(NoLiftover))
    }

    pub fn normalize(
        &self,
        build: &str,
        chromosome: &str,
        position: &str,
    ) -> Result<Coordinate, NormalizationFailure> {
        let classified = ReferenceBuild::classify(build);
        if classified == ReferenceBuild::Unknown {
            return Err(NormalizationFailure::UnknownBuild(build.to_string()));
        }

        let parsed = position
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|value| *value > 0)
            .ok_or_else(|| NormalizationFailure::InvalidPosition(position.to_string()))?;

        if classified == ReferenceBuild::Current {
            return Ok(Coordinate {
                build: ReferenceBuild::Current,
                assembly: build.trim().to_string(),
                chromosome: chromosome.to_string(),
                position: parsed,
            });
        }

        let source = format!("chr{}", strip_chr(chromosome));
        let mapped = self.liftover.convert(&source, parsed);
        match mapped.into_iter().next() {
            Some((target_chromosome, target_position)) => Ok(Coordinate {
                build: ReferenceBuild::Current,
                assembly: ReferenceBuild::LIFTED_LABEL.to_string(),
                chromosome: strip_chr(&target_chromosome).to_string(),
                position: target_position,
            }),
            None => Err(NormalizationFailure::Unmapped {
                chromosome: strip_chr(chromosome).to_string(),
                position: parsed,
            }),
        }
    }
}

fn strip_chr(chromosome: &str) -> &str {
    chromosome.strip_prefix("chr").unwrap_or(chromosome)
}
