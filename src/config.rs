/* Constants */
pub const DEFAULT_THRESHOLD: u32 = 1;
pub const DEFAULT_GENE_TAG: &str = "XT";

// Fraction of the median count below which the percentile method
// discards a UMI.
pub const PERCENTILE_DIVISOR: f64 = 100.0;

pub const READ_REPORT_INTERVAL: u64 = 1_000_000;

pub const PROC_BC_SEQ_TAG: &[u8] = b"CB";
pub const PROC_UMI_SEQ_TAG: &[u8] = b"UB";

/* Types */
use smallvec::SmallVec;
pub type Barcode = SmallVec<[u8; 24]>;
pub type Umi = SmallVec<[u8; 16]>;
