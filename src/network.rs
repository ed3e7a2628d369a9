//! Network-based clustering of UMIs.
//!
//! Collapses the UMIs observed at one genomic unit (gene, or gene+cell)
//! into molecule-level groups. Sequencing and PCR errors mean the number
//! of distinct UMI strings overstates the number of original molecules;
//! the clustering methods here merge likely error-derived UMIs into the
//! group of their parent.

use failure::{Error, Fail};
use itertools::Itertools;

use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;

use crate::config::{Umi, PERCENTILE_DIVISOR};

#[derive(Debug, Fail)]
pub enum ClusterError {
    #[fail(display = "unknown clustering method: {}", _0)]
    UnknownMethod(String),
    #[fail(display = "UMIs are not all the same length: {} vs {}", _0, _1)]
    InconsistentUmiLength(usize, usize),
}

/// The clustering methods. Each one fixes a graph rule, a component
/// search, a representative-selection policy and a grouping rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterMethod {
    /// Every distinct UMI is its own molecule. No graph is built.
    Unique,
    /// No graph either; discard UMIs whose count falls below 1% of the
    /// median count at this unit, then report the survivors singly.
    Percentile,
    /// Undirected edges between UMIs within the distance threshold; one
    /// group per connected component.
    Cluster,
    /// Like `Cluster`, but each component is split among a greedy
    /// minimum set of high-count UMIs that accounts for all members.
    Adjacency,
    /// Edge from a to b only if a's count is at least 2b-1, i.e. b is
    /// plausibly an amplified sequencing error of a; one group per
    /// connected component.
    Directional,
}

impl FromStr for ClusterMethod {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<ClusterMethod, ClusterError> {
        match s {
            "unique" => Ok(ClusterMethod::Unique),
            "percentile" => Ok(ClusterMethod::Percentile),
            "cluster" => Ok(ClusterMethod::Cluster),
            "adjacency" => Ok(ClusterMethod::Adjacency),
            "directional" => Ok(ClusterMethod::Directional),
            other => Err(ClusterError::UnknownMethod(other.to_string())),
        }
    }
}

/// Clusters the UMI->count map of one genomic unit into groups.
///
/// The first UMI of each group is its representative. Stateless apart
/// from the method choice, so one instance can serve every unit in a
/// run. All UMIs passed to a single `cluster` call must have the same
/// length.
#[derive(Debug)]
pub struct UmiClusterer {
    method: ClusterMethod,
}

impl UmiClusterer {
    pub fn new(method: &str) -> Result<UmiClusterer, Error> {
        let method = method.parse::<ClusterMethod>()?;
        Ok(UmiClusterer { method })
    }

    /// Group the UMIs of one unit. Returns one `Vec<Umi>` per group,
    /// members ordered by count descending (ties broken
    /// lexicographically), representative first.
    pub fn cluster(
        &self,
        counts: &HashMap<Umi, u64>,
        threshold: u32,
    ) -> Result<Vec<Vec<Umi>>, Error> {
        if counts.is_empty() {
            return Ok(Vec::new());
        }
        check_umi_lengths(counts)?;

        let umis = order_by_abundance(counts);
        let cvec: Vec<u64> = umis.iter().map(|u| counts[u]).collect();

        let groups = match self.method {
            ClusterMethod::Unique => (0..umis.len()).map(|i| vec![i]).collect(),
            ClusterMethod::Percentile => percentile_retained(&cvec)
                .into_iter()
                .map(|i| vec![i])
                .collect(),
            ClusterMethod::Cluster => {
                connected_components(&adjacency_edges(&umis, threshold))
            }
            ClusterMethod::Directional => {
                connected_components(&directional_edges(&umis, &cvec, threshold))
            }
            ClusterMethod::Adjacency => {
                let adj = adjacency_edges(&umis, threshold);
                let components = connected_components(&adj);
                group_by_lead_umis(&components, &adj)
            }
        };

        Ok(groups
            .into_iter()
            .map(|group| group.into_iter().map(|i| umis[i].clone()).collect())
            .collect())
    }
}

/// Substitution (Hamming) distance between two equal-length sequences.
#[inline]
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    debug_assert_eq!(a.len(), b.len(), "UMI sequences must be the same length");
    a.iter().zip(b.iter()).filter(|(x, y)| x != y).count() as u32
}

/// Hamming comparison with early exit once the threshold is exceeded.
/// This runs for every UMI pair at a unit, so it must not allocate.
#[inline]
fn within_distance(a: &[u8], b: &[u8], threshold: u32) -> bool {
    let mut mismatches = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        if x != y {
            mismatches += 1;
            if mismatches > threshold {
                return false;
            }
        }
    }
    true
}

fn check_umi_lengths(counts: &HashMap<Umi, u64>) -> Result<(), Error> {
    let mut expected = None;
    for umi in counts.keys() {
        match expected {
            None => expected = Some(umi.len()),
            Some(len) if umi.len() != len => {
                return Err(ClusterError::InconsistentUmiLength(len, umi.len()).into());
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Fix the iteration order for the whole clustering pass: count
/// descending, ties lexicographic. Every downstream tie-break falls out
/// of this single sort, which keeps results reproducible across runs.
fn order_by_abundance(counts: &HashMap<Umi, u64>) -> Vec<Umi> {
    let mut umis: Vec<Umi> = counts.keys().cloned().collect();
    umis.sort_by(|a, b| counts[b].cmp(&counts[a]).then_with(|| a.cmp(b)));
    umis
}

/// Undirected edges between all UMI pairs within the distance threshold.
fn adjacency_edges(umis: &[Umi], threshold: u32) -> Vec<Vec<usize>> {
    let mut adj = vec![Vec::new(); umis.len()];
    for (i, j) in (0..umis.len()).tuple_combinations::<(usize, usize)>() {
        if within_distance(&umis[i], &umis[j], threshold) {
            adj[i].push(j);
            adj[j].push(i);
        }
    }
    adj
}

/// Directed edges a -> b for UMI pairs within the distance threshold
/// where count(a) >= 2*count(b) - 1. Each direction is tested
/// independently, so the result can be asymmetric.
fn directional_edges(umis: &[Umi], counts: &[u64], threshold: u32) -> Vec<Vec<usize>> {
    let mut adj = vec![Vec::new(); umis.len()];
    for (i, j) in (0..umis.len()).tuple_combinations::<(usize, usize)>() {
        if within_distance(&umis[i], &umis[j], threshold) {
            // count(a) >= 2*count(b) - 1, rearranged to avoid underflow
            if counts[i] + 1 >= 2 * counts[j] {
                adj[i].push(j);
            }
            if counts[j] + 1 >= 2 * counts[i] {
                adj[j].push(i);
            }
        }
    }
    adj
}

/// Partition nodes into connected components by iterative breadth-first
/// search. Edges are treated as undirected for reachability, so every
/// node lands in exactly one component even when the edge list is
/// asymmetric. Components come back with members sorted in abundance
/// order, seeded from the most abundant unvisited node.
fn connected_components(adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adj.len();
    let mut undirected = vec![Vec::new(); n];
    for (i, neighbors) in adj.iter().enumerate() {
        for &j in neighbors {
            undirected[i].push(j);
            undirected[j].push(i);
        }
    }
    for neighbors in undirected.iter_mut() {
        neighbors.sort_unstable();
        neighbors.dedup();
    }

    let mut seen = vec![false; n];
    let mut queue = VecDeque::new();
    let mut components = Vec::new();

    for start in 0..n {
        if seen[start] {
            continue;
        }
        seen[start] = true;
        queue.push_back(start);
        let mut component = Vec::new();
        while let Some(node) = queue.pop_front() {
            component.push(node);
            for &neighbor in &undirected[node] {
                if !seen[neighbor] {
                    seen[neighbor] = true;
                    queue.push_back(neighbor);
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }

    components
}

/// Greedy approximation to the minimum set of UMIs accounting for a
/// component: walk the members most-abundant-first, and stop at the
/// shortest prefix whose members plus their direct neighbors cover the
/// whole component. Not an exact dominating set, and does not need to
/// be.
fn min_account(component: &[usize], adj: &[Vec<usize>]) -> Vec<usize> {
    if component.len() == 1 {
        return component.to_vec();
    }
    let mut covered: HashSet<usize> = HashSet::new();
    for (i, &lead) in component.iter().enumerate() {
        covered.insert(lead);
        covered.extend(adj[lead].iter().cloned());
        if component.iter().all(|member| covered.contains(member)) {
            return component[..=i].to_vec();
        }
    }
    component.to_vec()
}

/// Grouping rule for the adjacency method: each component is split
/// among its `min_account` lead UMIs. Leads claim their direct
/// neighbors in abundance order; a neighbor already claimed by an
/// earlier lead stays where it is, so one component can yield several
/// groups while every member appears exactly once.
fn group_by_lead_umis(components: &[Vec<usize>], adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut groups = Vec::new();
    for component in components {
        if component.len() == 1 {
            groups.push(component.clone());
            continue;
        }
        let leads = min_account(component, adj);
        let mut claimed: HashSet<usize> = leads.iter().cloned().collect();
        for &lead in &leads {
            let mut group = vec![lead];
            for &neighbor in &adj[lead] {
                if claimed.insert(neighbor) {
                    group.push(neighbor);
                }
            }
            groups.push(group);
        }
    }
    groups
}

/// Indices of UMIs retained by the percentile method: count strictly
/// above median/100, where the median is over all counts supplied for
/// the call.
fn percentile_retained(counts: &[u64]) -> Vec<usize> {
    let cutoff = median(counts) / PERCENTILE_DIVISOR;
    (0..counts.len())
        .filter(|&i| counts[i] as f64 > cutoff)
        .collect()
}

fn median(counts: &[u64]) -> f64 {
    let mut sorted = counts.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    } else {
        sorted[mid] as f64
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ALL_METHODS: &[&str] = &["unique", "percentile", "cluster", "adjacency", "directional"];

    fn counts(pairs: &[(&str, u64)]) -> HashMap<Umi, u64> {
        pairs
            .iter()
            .map(|(s, c)| (Umi::from_slice(s.as_bytes()), *c))
            .collect()
    }

    fn as_strings(groups: &[Vec<Umi>]) -> Vec<Vec<String>> {
        groups
            .iter()
            .map(|g| {
                g.iter()
                    .map(|u| String::from_utf8(u.to_vec()).unwrap())
                    .collect()
            })
            .collect()
    }

    fn run(method: &str, pairs: &[(&str, u64)], threshold: u32) -> Vec<Vec<String>> {
        let clusterer = UmiClusterer::new(method).unwrap();
        let groups = clusterer.cluster(&counts(pairs), threshold).unwrap();
        as_strings(&groups)
    }

    #[test]
    fn hamming_symmetry_and_bounds() {
        assert_eq!(hamming(b"AAAA", b"AAAA"), 0);
        assert_eq!(hamming(b"AAAA", b"AAAT"), hamming(b"AAAT", b"AAAA"));
        assert_eq!(hamming(b"AAAA", b"TTTT"), 4);
        assert_eq!(hamming(b"ACGT", b"TGCA"), 4);
        assert_eq!(hamming(b"ACGT", b"ACGA"), 1);
    }

    #[test]
    fn unknown_method_rejected() {
        let err = UmiClusterer::new("nearest").unwrap_err();
        match err.downcast_ref::<ClusterError>() {
            Some(ClusterError::UnknownMethod(name)) => assert_eq!(name, "nearest"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn mismatched_lengths_rejected() {
        for method in ALL_METHODS {
            let clusterer = UmiClusterer::new(method).unwrap();
            let err = clusterer
                .cluster(&counts(&[("AAA", 1), ("AAAA", 1)]), 1)
                .unwrap_err();
            match err.downcast_ref::<ClusterError>() {
                Some(ClusterError::InconsistentUmiLength(_, _)) => {}
                other => panic!("unexpected error for {}: {:?}", method, other),
            }
        }
    }

    #[test]
    fn empty_input_yields_no_groups() {
        for method in ALL_METHODS {
            let clusterer = UmiClusterer::new(method).unwrap();
            assert!(clusterer.cluster(&HashMap::new(), 1).unwrap().is_empty());
        }
    }

    #[test]
    fn singleton_input_yields_one_group() {
        for method in ALL_METHODS {
            let groups = run(method, &[("AAAA", 1)], 0);
            assert_eq!(groups, vec![vec!["AAAA".to_string()]], "method {}", method);
        }
    }

    // AAAA at 5 copies dominates AAAT at 1 copy (5 >= 2*1 - 1).
    #[test]
    fn directional_collapses_error_child() {
        let groups = run("directional", &[("AAAA", 5), ("AAAT", 1)], 1);
        assert_eq!(groups, vec![vec!["AAAA".to_string(), "AAAT".to_string()]]);
    }

    // Neither of two balanced UMIs passes the 2n-1 test against the
    // other, so they stay separate molecules.
    #[test]
    fn directional_keeps_balanced_pair() {
        let mut groups = run("directional", &[("AAAA", 2), ("AAAT", 2)], 1);
        groups.sort();
        assert_eq!(
            groups,
            vec![vec!["AAAA".to_string()], vec!["AAAT".to_string()]]
        );
    }

    // Two high-count parents share a low-count error UMI but are not
    // within the threshold of each other. Reachability is undirected,
    // so all three still form a single component and the shared child
    // is not counted twice.
    #[test]
    fn directional_shared_child_joins_one_component() {
        let groups = run(
            "directional",
            &[("AAAA", 10), ("AACT", 9), ("AAAT", 1)],
            1,
        );
        assert_eq!(
            groups,
            vec![vec![
                "AAAA".to_string(),
                "AACT".to_string(),
                "AAAT".to_string()
            ]]
        );
    }

    #[test]
    fn unique_is_identity() {
        let groups = run("unique", &[("AAAA", 5), ("AAAT", 1), ("CCCC", 2)], 1);
        assert_eq!(groups.len(), 3);
        for group in &groups {
            assert_eq!(group.len(), 1);
        }
    }

    #[test]
    fn cluster_merges_chain_into_one_group() {
        let groups = run("cluster", &[("AAAA", 10), ("AAAT", 5), ("AATT", 2)], 1);
        assert_eq!(
            groups,
            vec![vec![
                "AAAA".to_string(),
                "AAAT".to_string(),
                "AATT".to_string()
            ]]
        );
    }

    // AATT is adjacent to AAAT but not to AAAA, so AAAA alone cannot
    // account for the component and the adjacency method emits two
    // groups from one component.
    #[test]
    fn adjacency_splits_component_across_leads() {
        let groups = run("adjacency", &[("AAAA", 10), ("AAAT", 5), ("AATT", 2)], 1);
        assert_eq!(
            groups,
            vec![
                vec!["AAAA".to_string()],
                vec!["AAAT".to_string(), "AATT".to_string()]
            ]
        );
    }

    #[test]
    fn percentile_discards_low_tail() {
        // median is 200, cutoff 2.0; the single-copy UMI goes.
        let groups = run(
            "percentile",
            &[("AAAA", 1000), ("CCCC", 200), ("GGGG", 1)],
            1,
        );
        assert_eq!(
            groups,
            vec![vec!["AAAA".to_string()], vec!["CCCC".to_string()]]
        );
    }

    #[test]
    fn threshold_monotonicity() {
        let pairs = &[("AAAA", 8), ("AATT", 4), ("CCCC", 1)];
        for method in &["directional", "cluster", "adjacency"] {
            let mut previous = usize::max_value();
            for threshold in 0..=4 {
                let n_groups = run(method, pairs, threshold).len();
                assert!(
                    n_groups <= previous,
                    "{}: groups grew from {} to {} at threshold {}",
                    method,
                    previous,
                    n_groups,
                    threshold
                );
                previous = n_groups;
            }
        }
        assert_eq!(run("directional", pairs, 0).len(), 3);
        assert_eq!(run("directional", pairs, 4).len(), 1);
    }

    #[test]
    fn groups_partition_input() {
        let pairs = &[
            ("AAAA", 9),
            ("AAAT", 4),
            ("AATT", 2),
            ("CCCC", 7),
            ("CCCG", 1),
            ("GGGG", 1),
        ];
        for method in &["unique", "cluster", "adjacency", "directional"] {
            let groups = run(method, pairs, 1);
            let mut seen: Vec<String> = groups.iter().flatten().cloned().collect();
            seen.sort();
            let mut expected: Vec<String> =
                pairs.iter().map(|(s, _)| s.to_string()).collect();
            expected.sort();
            assert_eq!(seen, expected, "method {}", method);
        }
    }

    #[test]
    fn tie_break_is_stable() {
        let pairs = &[("AAAT", 10), ("AAAA", 10)];
        let first = run("cluster", pairs, 1);
        let second = run("cluster", pairs, 1);
        // lexicographic tie-break puts AAAA first both times
        assert_eq!(first, vec![vec!["AAAA".to_string(), "AAAT".to_string()]]);
        assert_eq!(first, second);
    }
}
