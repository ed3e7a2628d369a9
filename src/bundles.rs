//! Groups BAM reads into per-unit UMI bundles.
//!
//! A unit is a gene (from an alignment tag, e.g. cellranger's `XT`),
//! optionally combined with a cell barcode (`CB`). Each unit's bundle
//! maps the UMIs (`UB`) seen there to their read counts; clustering is
//! run independently per bundle downstream.

use failure::{format_err, Error};
use rust_htslib::bam::{self, Read, Record};

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::config::{Barcode, Umi, PROC_BC_SEQ_TAG, PROC_UMI_SEQ_TAG};
use crate::locus::Locus;

/// The grouping key of one bundle: gene, plus the cell barcode when
/// counting per cell.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct BundleKey {
    pub gene: Vec<u8>,
    pub cell: Option<Barcode>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BundleStatus {
    /// The unit holds a single read; clustering is pointless and the
    /// unit must bypass graph construction entirely.
    SingleRead,
    Bundled,
}

pub struct UnitBundle {
    pub key: BundleKey,
    pub counts: HashMap<Umi, u64>,
    pub status: BundleStatus,
}

/// Read-level accounting over the BAM scan.
#[derive(Clone, Copy, Default)]
pub struct Metrics {
    pub num_reads: usize,
    pub num_non_primary: usize,
    pub num_unmapped: usize,
    pub num_no_gene: usize,
    pub num_no_umi: usize,
    pub num_no_cell: usize,
    pub num_not_cell_bc: usize,
}

enum BamReader {
    Plain(bam::Reader),
    Indexed(bam::IndexedReader),
}

/// Scan a BAM (a region of it when `locus` is given, which requires an
/// index) and accumulate UMI counts per unit. Records that are
/// secondary, supplementary, unmapped, or missing the required tags are
/// skipped and tallied in `Metrics`. With `per_cell`, reads whose cell
/// barcode is absent from the whitelist (when one is supplied) are
/// skipped as well.
pub fn build_bundles(
    bam_file: &Path,
    locus: Option<&Locus>,
    gene_tag: &[u8],
    per_cell: bool,
    whitelist: Option<&HashMap<Barcode, u32>>,
) -> Result<(BTreeMap<BundleKey, HashMap<Umi, u64>>, Metrics), Error> {
    let mut reader = match locus {
        Some(l) => {
            let mut indexed = bam::IndexedReader::from_path(bam_file)?;
            let tid = indexed
                .header()
                .tid(l.chrom.as_bytes())
                .ok_or_else(|| format_err!("Chromosome {} not found in BAM header", l.chrom))?;
            indexed
                .fetch(tid, l.start, l.end)
                .map_err(|e| format_err!("Failed to fetch region {}: {}", l, e))?;
            BamReader::Indexed(indexed)
        }
        None => BamReader::Plain(bam::Reader::from_path(bam_file)?),
    };

    let mut bundles: BTreeMap<BundleKey, HashMap<Umi, u64>> = BTreeMap::new();
    let mut metrics = Metrics::default();
    let mut tmp_record = Record::new();

    loop {
        let r = match &mut reader {
            BamReader::Plain(rd) => rd.read(&mut tmp_record),
            BamReader::Indexed(rd) => rd.read(&mut tmp_record),
        };
        if let Err(e) = r {
            if e.is_eof() {
                break;
            }
            return Err(e.into());
        }
        metrics.num_reads += 1;

        if tmp_record.is_secondary() || tmp_record.is_supplementary() {
            metrics.num_non_primary += 1;
            continue;
        }
        if tmp_record.is_unmapped() {
            metrics.num_unmapped += 1;
            continue;
        }

        let gene = match tmp_record.aux(gene_tag).map(|x| x.string().to_vec()) {
            Some(g) => g,
            None => {
                metrics.num_no_gene += 1;
                continue;
            }
        };

        let umi = match tmp_record
            .aux(PROC_UMI_SEQ_TAG)
            .map(|x| Umi::from_slice(x.string()))
        {
            Some(u) => u,
            None => {
                metrics.num_no_umi += 1;
                continue;
            }
        };

        let cell = if per_cell {
            match tmp_record
                .aux(PROC_BC_SEQ_TAG)
                .map(|x| Barcode::from_slice(x.string()))
            {
                Some(cb) => {
                    if let Some(wl) = whitelist {
                        if !wl.contains_key(&cb) {
                            metrics.num_not_cell_bc += 1;
                            continue;
                        }
                    }
                    Some(cb)
                }
                None => {
                    metrics.num_no_cell += 1;
                    continue;
                }
            }
        } else {
            None
        };

        let counts = bundles
            .entry(BundleKey { gene, cell })
            .or_insert_with(HashMap::new);
        *counts.entry(umi).or_insert(0) += 1;
    }

    Ok((bundles, metrics))
}

/// Flatten the bundle map into per-unit bundles, tagging trivial
/// single-read units. `BTreeMap` order makes the output deterministic.
pub fn unit_bundles(
    bundles: BTreeMap<BundleKey, HashMap<Umi, u64>>,
) -> impl Iterator<Item = UnitBundle> {
    bundles.into_iter().map(|(key, counts)| {
        let total: u64 = counts.values().sum();
        let status = if total == 1 {
            BundleStatus::SingleRead
        } else {
            BundleStatus::Bundled
        };
        UnitBundle {
            key,
            counts,
            status,
        }
    })
}
