//! Applies UMI clustering to bundles of reads.
//!
//! A bundle is the UMI -> {count, read} map for one genomic unit. The
//! read handle is opaque: it is carried through to the output but never
//! inspected, so the same adapter serves BAM records, read names, or
//! anything else the caller bundles.

use failure::Error;

use std::collections::HashMap;

use crate::config::Umi;
use crate::network::UmiClusterer;

pub struct BundleEntry<R> {
    pub count: u64,
    pub read: R,
}

/// One genomic unit's reads, keyed by UMI.
pub type Bundle<R> = HashMap<Umi, BundleEntry<R>>;

/// One deduplicated molecule: the representative read, the
/// representative UMI, and the merged read count of the whole group.
pub struct DedupedRead<R> {
    pub read: R,
    pub umi: Umi,
    pub count: u64,
}

/// Wraps `UmiClusterer` for read bundles.
pub struct ReadClusterer {
    clusterer: UmiClusterer,
}

impl ReadClusterer {
    pub fn new(method: &str) -> Result<ReadClusterer, Error> {
        Ok(ReadClusterer {
            clusterer: UmiClusterer::new(method)?,
        })
    }

    /// Collapse a bundle down to one read per molecule. The
    /// representative read is the one attached to the group's first
    /// (highest-count) UMI; its reported count is the sum over the
    /// whole group.
    pub fn deduplicate<R: Clone>(
        &self,
        bundle: &Bundle<R>,
        threshold: u32,
    ) -> Result<Vec<DedupedRead<R>>, Error> {
        let groups = self.cluster_bundle(bundle, threshold)?;

        let mut deduped = Vec::with_capacity(groups.len());
        for group in groups {
            let merged: u64 = group.iter().map(|umi| bundle[umi].count).sum();
            let representative = &group[0];
            deduped.push(DedupedRead {
                read: bundle[representative].read.clone(),
                umi: representative.clone(),
                count: merged,
            });
        }
        Ok(deduped)
    }

    /// Compute groups without discarding anything: the caller gets the
    /// untouched bundle back alongside the group memberships, so reads
    /// can be tagged with their molecule rather than dropped.
    pub fn annotate<'a, R>(
        &self,
        bundle: &'a Bundle<R>,
        threshold: u32,
    ) -> Result<(&'a Bundle<R>, Vec<Vec<Umi>>), Error> {
        let groups = self.cluster_bundle(bundle, threshold)?;
        Ok((bundle, groups))
    }

    fn cluster_bundle<R>(&self, bundle: &Bundle<R>, threshold: u32) -> Result<Vec<Vec<Umi>>, Error> {
        let counts: HashMap<Umi, u64> = bundle
            .iter()
            .map(|(umi, entry)| (umi.clone(), entry.count))
            .collect();
        self.clusterer.cluster(&counts, threshold)
    }
}
