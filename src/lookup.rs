//! Read side of the store, as consumed by the annotator.

use camino::Utf8Path;
use rusqlite::{Connection, OpenFlags, params};
use serde::Serialize;

use crate::error::CivicError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantHit {
    pub id: i64,
    pub chromosome: String,
    pub start: i64,
    pub reference_build: String,
    pub reference_base: String,
    pub variant_base: String,
    pub description: Option<String>,
    pub molecular_profile_score: Option<f64>,
    pub diseases: String,
    pub disease_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneHit {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub aliases: Vec<String>,
}

#[derive(Debug)]
pub struct LookupService {
    conn: Connection,
}

impl LookupService {
    pub fn open(path: &Utf8Path) -> Result<Self, CivicError> {
        if !path.as_std_path().exists() {
            return Err(CivicError::NotFound {
                kind: "store",
                key: path.to_string(),
            });
        }
        let conn = Connection::open_with_flags(
            path.as_std_path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Exact match on the indexed key. `chromosome` must already be in store
    /// form, without a `chr` prefix.
    pub fn variants(
        &self,
        chromosome: &str,
        position: i64,
        reference_base: &str,
        variant_base: &str,
    ) -> Result<Vec<VariantHit>, CivicError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, chromosome, start, reference_build, reference_base, variant_base,
                    description, molecular_profile_score, diseases
             FROM civic
             WHERE start = ?1 AND reference_base = ?2 AND variant_base = ?3 AND chromosome = ?4
             ORDER BY id",
        )?;
        let rows = stmt.query_map(
            params![position, reference_base, variant_base, chromosome],
            |row| {
                let diseases: String = row.get(8)?;
                Ok(VariantHit {
                    id: row.get(0)?,
                    chromosome: row.get(1)?,
                    start: row.get(2)?,
                    reference_build: row.get(3)?,
                    reference_base: row.get(4)?,
                    variant_base: row.get(5)?,
                    description: row.get(6)?,
                    molecular_profile_score: row.get(7)?,
                    disease_count: count_diseases(&diseases),
                    diseases,
                })
            },
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn genes(&self, name: &str) -> Result<Vec<GeneHit>, CivicError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, name, description, aliases FROM civic_gene WHERE name = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![name], |row| {
            let aliases: String = row.get(3)?;
            Ok(GeneHit {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                aliases: aliases
                    .split(',')
                    .filter(|alias| !alias.is_empty())
                    .map(str::to_string)
                    .collect(),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Callers hand coordinates over as `chr7`; the store keeps `7`.
pub fn strip_chr_prefix(chromosome: &str) -> &str {
    chromosome.strip_prefix("chr").unwrap_or(chromosome)
}

fn count_diseases(diseases: &str) -> usize {
    if diseases.is_empty() {
        0
    } else {
        diseases.split(", ").count()
    }
}
