use std::io::{self, Write};

use serde::Serialize;

use crate::builder::RunSummary;
use crate::lookup::{GeneHit, VariantHit};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_variants(hits: &[VariantHit]) -> io::Result<()> {
        Self::print_json(&hits)
    }

    pub fn print_genes(hits: &[GeneHit]) -> io::Result<()> {
        Self::print_json(&hits)
    }

    pub fn print_url(kind: &str, url: &str) -> io::Result<()> {
        #[derive(Serialize)]
        struct UrlOutput<'a> {
            kind: &'a str,
            url: &'a str,
        }
        Self::print_json(&UrlOutput { kind, url })
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "{} build {}", summary.kind, summary.state)?;
        if let Some(url) = &summary.snapshot_url {
            writeln!(stdout, "  snapshot: {url}")?;
        }
        writeln!(stdout, "  store:    {}", summary.store)?;
        writeln!(
            stdout,
            "  rows:     {} seen, {} inserted, {} skipped, {} errored",
            summary.counters.seen,
            summary.counters.inserted,
            summary.counters.skipped,
            summary.counters.errored
        )?;
        writeln!(stdout, "  runtime:  {:.3} s", summary.elapsed_secs)?;
        Ok(())
    }

    pub fn print_variants(hits: &[VariantHit]) -> io::Result<()> {
        let mut stdout = io::stdout();
        for hit in hits {
            writeln!(
                stdout,
                "{}\t{}:{}\t{}>{}\t{}\t{}\t{}",
                hit.id,
                hit.chromosome,
                hit.start,
                hit.reference_base,
                hit.variant_base,
                hit.description.as_deref().unwrap_or("-"),
                hit.molecular_profile_score
                    .map(|score| score.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                hit.diseases
            )?;
        }
        Ok(())
    }

    pub fn print_genes(hits: &[GeneHit]) -> io::Result<()> {
        let mut stdout = io::stdout();
        for hit in hits {
            writeln!(
                stdout,
                "{}\t{}\t{}\t{}",
                hit.id,
                hit.name,
                hit.description.as_deref().unwrap_or("-"),
                hit.aliases.join(",")
            )?;
        }
        Ok(())
    }
}
