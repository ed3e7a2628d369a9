use failure::{format_err, Error};

use std::fmt;
use std::str::FromStr;

/// A samtools-style genomic interval, `chrom:start-end`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locus {
    pub chrom: String,
    pub start: u32,
    pub end: u32,
}

impl FromStr for Locus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Locus, Error> {
        let mut parts = s.splitn(2, ':');
        let chrom = parts
            .next()
            .ok_or_else(|| format_err!("invalid region string: {}", s))?;
        let range = parts
            .next()
            .ok_or_else(|| format_err!("region {} has no start-end range", s))?;

        let mut range_parts = range.splitn(2, '-');
        let start = range_parts
            .next()
            .ok_or_else(|| format_err!("region {} has no start", s))?;
        let end = range_parts
            .next()
            .ok_or_else(|| format_err!("region {} has no end", s))?;

        // tolerate digit-grouping commas, e.g. 28,510,120
        let start = u32::from_str(&start.replace(',', ""))?;
        let end = u32::from_str(&end.replace(',', ""))?;
        if start >= end {
            return Err(format_err!("region {} is empty or inverted", s));
        }

        Ok(Locus {
            chrom: chrom.to_string(),
            start,
            end,
        })
    }
}

impl fmt::Display for Locus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}
