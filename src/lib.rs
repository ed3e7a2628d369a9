pub mod bundles;
pub mod config;
pub mod count;
pub mod dedup;
pub mod io;
pub mod locus;
pub mod network;

pub use crate::config::{Barcode, Umi};
pub use crate::dedup::ReadClusterer;
pub use crate::network::{ClusterError, ClusterMethod, UmiClusterer};
