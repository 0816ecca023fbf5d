//! hg19 to hg38 coordinate conversion backed by a UCSC chain file.
//!
//! Chain headers name the source assembly as "target" and the destination as
//! "query". Blocks are ungapped alignments followed by the gap to the next
//! block on each side.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use reqwest::blocking::Client;

use crate::error::CivicError;
use crate::fs_util;
use crate::http;

/// Converts a 1-based position on the legacy assembly to zero or more 1-based
/// positions on the current assembly, best mapping first.
pub trait Liftover: Send + Sync {
    fn convert(&self, chromosome: &str, position: i64) -> Vec<(String, i64)>;
}

/// Used when no chain data is available: every legacy coordinate is unmapped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLiftover;

impl Liftover for NoLiftover {
    fn convert(&self, _chromosome: &str, _position: i64) -> Vec<(String, i64)> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Plus,
    Minus,
}

#[derive(Debug, Clone)]
pub struct Chain {
    pub score: u64,
    pub target_name: String,
    pub target_start: u64,
    pub target_end: u64,
    pub query_name: String,
    pub query_size: u64,
    pub query_strand: Strand,
    pub query_start: u64,
    pub blocks: Vec<ChainBlock>,
}

#[derive(Debug, Clone, Copy)]
pub struct ChainBlock {
    pub size: u64,
    pub target_gap: u64,
    pub query_gap: u64,
}

impl Chain {
    pub fn contains_target_pos(&self, pos: u64) -> bool {
        pos >= self.target_start && pos < self.target_end
    }

    /// Lifts a 0-based target position; `None` when it falls in a gap.
    pub fn lift_position(&self, target_pos: u64) -> Option<u64> {
        if !self.contains_target_pos(target_pos) {
            return None;
        }

        let mut t_pos = self.target_start;
        let mut q_pos = self.query_start;

        for block in &self.blocks {
            let block_end = t_pos + block.size;
            if target_pos < block_end {
                let offset = target_pos - t_pos;
                return match self.query_strand {
                    Strand::Plus => Some(q_pos + offset),
                    Strand::Minus => self.query_size.checked_sub(q_pos + offset + 1),
                };
            }

            t_pos = block_end + block.target_gap;
            q_pos += block.size + block.query_gap;
            if target_pos < t_pos {
                return None;
            }
        }

        None
    }
}

/// Chains indexed by source contig name.
#[derive(Debug, Clone, Default)]
pub struct ChainFile {
    chains: HashMap<String, Vec<Chain>>,
}

impl ChainFile {
    pub fn from_path(path: &Utf8Path) -> Result<Self, CivicError> {
        let reader = fs_util::open_maybe_gz(path.as_std_path())?;
        let chains = Self::parse(reader)?;
        tracing::info!(path = %path, chains = chains.chain_count(), "loaded chain file");
        Ok(chains)
    }

    pub fn parse<R: Read>(reader: R) -> Result<Self, CivicError> {
        let reader = BufReader::new(reader);
        let mut chains = ChainFile::default();
        let mut current: Option<Chain> = None;

        for (index, line) in reader.lines().enumerate() {
            let line_num = index + 1;
            let line = line.map_err(|err| {
                CivicError::ChainParse(format!("failed to read line {line_num}: {err}"))
            })?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with("chain") {
                if let Some(chain) = current.take() {
                    chains.add_chain(chain);
                }
                current = Some(parse_header(line, line_num)?);
            } else if let Some(chain) = current.as_mut() {
                chain.blocks.push(parse_block(line, line_num)?);
            } else {
                return Err(CivicError::ChainParse(format!(
                    "alignment data before any chain header at line {line_num}"
                )));
            }
        }

        if let Some(chain) = current {
            chains.add_chain(chain);
        }
        Ok(chains)
    }

    pub fn add_chain(&mut self, chain: Chain) {
        self.chains
            .entry(chain.target_name.clone())
            .or_default()
            .push(chain);
    }

    pub fn chain_count(&self) -> usize {
        self.chains.values().map(|chains| chains.len()).sum()
    }
}

impl Liftover for ChainFile {
    fn convert(&self, chromosome: &str, position: i64) -> Vec<(String, i64)> {
        let Some(pos0) = u64::try_from(position).ok().and_then(|p| p.checked_sub(1)) else {
            return Vec::new();
        };
        let Some(candidates) = self.chains.get(chromosome) else {
            return Vec::new();
        };

        let mut covering: Vec<&Chain> = candidates
            .iter()
            .filter(|chain| chain.contains_target_pos(pos0))
            .collect();
        covering.sort_by(|a, b| b.score.cmp(&a.score));

        covering
            .into_iter()
            .filter_map(|chain| {
                let lifted = chain.lift_position(pos0)?;
                let lifted = i64::try_from(lifted + 1).ok()?;
                Some((chain.query_name.clone(), lifted))
            })
            .collect()
    }
}

fn parse_u64(value: &str, what: &str, line_num: usize) -> Result<u64, CivicError> {
    value
        .parse::<u64>()
        .map_err(|_| CivicError::ChainParse(format!("invalid {what} {value:?} at line {line_num}")))
}

fn parse_strand(value: &str, line_num: usize) -> Result<Strand, CivicError> {
    match value {
        "+" => Ok(Strand::Plus),
        "-" => Ok(Strand::Minus),
        other => Err(CivicError::ChainParse(format!(
            "invalid strand {other:?} at line {line_num}"
        ))),
    }
}

/// `chain score tName tSize tStrand tStart tEnd qName qSize qStrand qStart qEnd id`
fn parse_header(line: &str, line_num: usize) -> Result<Chain, CivicError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 12 {
        return Err(CivicError::ChainParse(format!(
            "expected 12+ header fields at line {line_num}, got {}",
            parts.len()
        )));
    }
    if parse_strand(parts[4], line_num)? != Strand::Plus {
        return Err(CivicError::ChainParse(format!(
            "source strand must be '+' at line {line_num}"
        )));
    }

    Ok(Chain {
        score: parse_u64(parts[1], "score", line_num)?,
        target_name: parts[2].to_string(),
        target_start: parse_u64(parts[5], "source start", line_num)?,
        target_end: parse_u64(parts[6], "source end", line_num)?,
        query_name: parts[7].to_string(),
        query_size: parse_u64(parts[8], "destination size", line_num)?,
        query_strand: parse_strand(parts[9], line_num)?,
        query_start: parse_u64(parts[10], "destination start", line_num)?,
        blocks: Vec::new(),
    })
}

fn parse_block(line: &str, line_num: usize) -> Result<ChainBlock, CivicError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let size = parse_u64(parts[0], "block size", line_num)?;
    // the final block of a chain carries no gaps
    let (target_gap, query_gap) = match parts.len() {
        1 => (0, 0),
        3 => (
            parse_u64(parts[1], "source gap", line_num)?,
            parse_u64(parts[2], "destination gap", line_num)?,
        ),
        n => {
            return Err(CivicError::ChainParse(format!(
                "expected 1 or 3 block fields at line {line_num}, got {n}"
            )));
        }
    };
    Ok(ChainBlock {
        size,
        target_gap,
        query_gap,
    })
}

/// Default location of the downloaded chain file in the user cache.
pub fn default_chain_path() -> Result<Utf8PathBuf, CivicError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(
                dirs.cache_dir()
                    .join("civic-kb")
                    .join("hg19ToHg38.over.chain.gz"),
            )
            .ok()
        })
        .ok_or_else(|| CivicError::Filesystem("unable to resolve cache directory".to_string()))
}

/// Downloads the chain file to `destination` unless it is already there.
pub fn ensure_chain_file(
    client: &Client,
    url: &str,
    destination: &Utf8Path,
) -> Result<(), CivicError> {
    if destination.as_std_path().exists() {
        return Ok(());
    }
    tracing::info!(%url, destination = %destination, "downloading chain file");
    let response = http::send_with_retries(|| client.get(url), CivicError::LiftoverHttp)?;
    let response = http::check_status(response, "chain file request failed").map_err(
        |(status, message)| CivicError::LiftoverHttp(format!("status {status}: {message}")),
    )?;
    let bytes = response
        .bytes()
        .map_err(|err| CivicError::LiftoverHttp(err.to_string()))?;
    fs_util::write_bytes_atomic(destination.as_std_path(), &bytes)
}
