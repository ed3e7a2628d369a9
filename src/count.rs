//! Per-gene (and per-cell) deduplicated molecule counting.
//!
//! Drives the clusterer over every bundle produced from the BAM and
//! writes the resulting count table. One output shape per mode: a
//! two-column gene table, a three-column gene/cell table, or a wide
//! table with one row per gene and one column per cell.

use failure::Error;
use log::{info, warn};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::bundles::{build_bundles, unit_bundles, BundleStatus, Metrics};
use crate::config::{Barcode, READ_REPORT_INTERVAL};
use crate::locus::Locus;
use crate::network::UmiClusterer;

pub struct CountRow {
    pub gene: String,
    pub cell: Option<String>,
    pub count: u64,
}

pub struct CountSummary {
    pub n_units: usize,
    pub n_skipped_units: usize,
    pub n_input_reads: u64,
    pub n_molecules: u64,
}

/// Count deduplicated molecules per unit and write `counts.tsv` into
/// `out_dir`. Units flagged single-read count as one molecule without
/// touching the clusterer; units with inconsistent UMI lengths are
/// logged and skipped rather than aborting the run.
pub fn count_wrapper(
    bam_file: &Path,
    out_dir: &str,
    locus: Option<&Locus>,
    method: &str,
    threshold: u32,
    gene_tag: &[u8],
    per_cell: bool,
    wide_format: bool,
    whitelist: Option<&HashMap<Barcode, u32>>,
) -> Result<CountSummary, Error> {
    let clusterer = UmiClusterer::new(method)?;

    let (bundle_map, metrics) = build_bundles(bam_file, locus, gene_tag, per_cell, whitelist)?;
    log_metrics(&metrics, per_cell);

    let mut rows: Vec<CountRow> = Vec::new();
    let mut n_input_reads: u64 = 0;
    let mut reads_reported: u64 = 0;
    let mut n_molecules: u64 = 0;
    let mut n_skipped_units = 0;

    for bundle in unit_bundles(bundle_map) {
        let total: u64 = bundle.counts.values().sum();
        n_input_reads += total;
        while n_input_reads >= reads_reported + READ_REPORT_INTERVAL {
            reads_reported += READ_REPORT_INTERVAL;
            info!("Parsed {} input reads", reads_reported);
        }

        let n_groups = match bundle.status {
            BundleStatus::SingleRead => 1,
            BundleStatus::Bundled => match clusterer.cluster(&bundle.counts, threshold) {
                Ok(groups) => groups.len() as u64,
                Err(e) => {
                    warn!(
                        "Skipping unit {}: {}",
                        String::from_utf8_lossy(&bundle.key.gene),
                        e
                    );
                    n_skipped_units += 1;
                    continue;
                }
            },
        };

        n_molecules += n_groups;
        rows.push(CountRow {
            gene: String::from_utf8_lossy(&bundle.key.gene).into_owned(),
            cell: bundle
                .key
                .cell
                .map(|c| String::from_utf8_lossy(&c).into_owned()),
            count: n_groups,
        });
    }

    let out_path: PathBuf = [out_dir, "counts.tsv"].iter().collect();
    let mut out = BufWriter::new(File::create(&out_path)?);
    if per_cell && wide_format {
        write_wide(&mut out, &rows)?;
    } else if per_cell {
        write_per_cell(&mut out, &rows)?;
    } else {
        write_per_gene(&mut out, &rows)?;
    }
    info!("Wrote count table to {:?}", out_path);

    Ok(CountSummary {
        n_units: rows.len(),
        n_skipped_units,
        n_input_reads,
        n_molecules,
    })
}

fn log_metrics(metrics: &Metrics, per_cell: bool) {
    info!("Number of alignments evaluated: {}", metrics.num_reads);
    info!(
        "Number of alignments skipped due to not being primary: {}",
        metrics.num_non_primary
    );
    info!(
        "Number of alignments skipped due to being unmapped: {}",
        metrics.num_unmapped
    );
    info!(
        "Number of alignments skipped due to a missing gene tag: {}",
        metrics.num_no_gene
    );
    info!(
        "Number of alignments skipped due to a missing UMI tag: {}",
        metrics.num_no_umi
    );
    if per_cell {
        info!(
            "Number of alignments skipped due to a missing cell barcode tag: {}",
            metrics.num_no_cell
        );
        info!(
            "Number of alignments skipped due to a cell barcode outside the list provided: {}",
            metrics.num_not_cell_bc
        );
    }
}

fn write_per_gene(out: &mut impl Write, rows: &[CountRow]) -> Result<(), Error> {
    writeln!(out, "gene\tcount")?;
    for row in rows {
        writeln!(out, "{}\t{}", row.gene, row.count)?;
    }
    Ok(())
}

fn write_per_cell(out: &mut impl Write, rows: &[CountRow]) -> Result<(), Error> {
    writeln!(out, "gene\tcell\tcount")?;
    for row in rows {
        writeln!(
            out,
            "{}\t{}\t{}",
            row.gene,
            row.cell.as_ref().map(String::as_str).unwrap_or(""),
            row.count
        )?;
    }
    Ok(())
}

/// Pivot the per-cell counts into a genes x cells table, absent entries
/// filled with 0.
fn write_wide(out: &mut impl Write, rows: &[CountRow]) -> Result<(), Error> {
    let mut cells: BTreeSet<&str> = BTreeSet::new();
    let mut table: BTreeMap<&str, BTreeMap<&str, u64>> = BTreeMap::new();
    for row in rows {
        let cell = row.cell.as_ref().map(String::as_str).unwrap_or("");
        cells.insert(cell);
        table
            .entry(row.gene.as_str())
            .or_insert_with(BTreeMap::new)
            .insert(cell, row.count);
    }

    write!(out, "gene")?;
    for cell in &cells {
        write!(out, "\t{}", cell)?;
    }
    writeln!(out)?;

    for (gene, counts) in &table {
        write!(out, "{}", gene)?;
        for cell in &cells {
            write!(out, "\t{}", counts.get(cell).cloned().unwrap_or(0))?;
        }
        writeln!(out)?;
    }
    Ok(())
}
