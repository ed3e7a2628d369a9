use clap::{App, Arg};

use failure::{format_err, Error};
use simplelog::*;
use terminal_size::{terminal_size, Width};

use std::collections::HashMap;
use std::fs::create_dir_all;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use human_panic::setup_panic;
use log::{debug, info, warn};

use umi_count::config::{Barcode, DEFAULT_GENE_TAG};
use umi_count::count::count_wrapper;
use umi_count::io::open_file;
use umi_count::locus::Locus;

fn get_args() -> clap::App<'static, 'static> {
    App::new("umicount")
    .set_term_width(if let Some((Width(w), _)) = terminal_size() { w as usize } else { 120 })
    .version("DEV")
    .about("UMI-aware deduplication and per-gene molecule counting for barcoded sequencing data")
    // Required parameters
    .arg(Arg::with_name("bam")
         .short("b")
         .long("bam")
         .value_name("FILE")
         .help("BAM file with gene and UMI tags (e.g. cellranger output)")
         .required(true))
    // Output parameters (optional)
    .arg(Arg::with_name("out_dir")
         .short("o")
         .long("out-dir")
         .value_name("OUTPUT_DIR")
         .default_value("umi-count-results"))
    // Input parameters (optional)
    .arg(Arg::with_name("cell_barcodes")
         .short("c")
         .long("cell-barcodes")
         .value_name("FILE")
         .help("File with cell barcodes to be evaluated (text or gzip); requires --per-cell"))
    .arg(Arg::with_name("region")
         .short("r")
         .long("region")
         .value_name("STRING")
         .help("Samtools-format region string of reads to use; requires a BAM index"))
    // Configuration parameters (optional)
    .arg(Arg::with_name("method")
         .long("method")
         .possible_values(&["unique", "percentile", "cluster", "adjacency", "directional"])
         .default_value("directional")
         .help("UMI clustering method"))
    .arg(Arg::with_name("threshold")
         .long("threshold")
         .value_name("INT")
         .default_value("1")
         .help("Maximum substitution distance for two UMIs to be linked"))
    .arg(Arg::with_name("gene_tag")
         .long("gene-tag")
         .value_name("TAG")
         .default_value(DEFAULT_GENE_TAG)
         .help("BAM tag holding the gene assignment of a read"))
    .arg(Arg::with_name("per_cell")
         .long("per-cell")
         .help("If specified, will count per gene and cell barcode rather than per gene"))
    .arg(Arg::with_name("wide_format_cell_counts")
         .long("wide-format-cell-counts")
         .help("If specified, will output the cell counts in a wide format (rows=genes, columns=cells)"))
    .arg(Arg::with_name("log_level")
         .long("log-level")
         .possible_values(&["info", "debug", "error"])
         .default_value("error")
         .help("Logging level"))
}

fn main() {
    setup_panic!(); // pretty panics for users
    let mut cli_args = Vec::new();
    for arg in std::env::args_os() {
        cli_args.push(arg.into_string().unwrap());
    }
    let res = _main(cli_args);
    if let Err(e) = res {
        println!("Failed with error: {}", e);
        process::exit(1);
    }
}

// constructing a _main allows for us to run regression tests way more easily
fn _main(cli_args: Vec<String>) -> Result<(), Error> {
    let args = get_args().get_matches_from(cli_args);
    let bam_file = args.value_of("bam").expect("You must provide a BAM file");
    let out_dir = args.value_of("out_dir").unwrap_or_default();
    let cell_barcodes = args.value_of("cell_barcodes");
    let region = args.value_of("region");
    let method = args.value_of("method").unwrap_or_default();
    let threshold = args.value_of("threshold").unwrap_or_default();
    let gene_tag = args.value_of("gene_tag").unwrap_or_default();
    let per_cell = args.is_present("per_cell");
    let wide_format = args.is_present("wide_format_cell_counts");
    let ll = args.value_of("log_level").unwrap();

    let ll = match ll {
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "error" => LevelFilter::Error,
        &_ => {
            return Err(format_err!("Log level must be 'info', 'debug', or 'error'"));
        }
    };
    let _ = SimpleLogger::init(ll, Config::default());

    if cell_barcodes.is_some() && !per_cell {
        return Err(format_err!("--cell-barcodes requires --per-cell"));
    }
    if wide_format && !per_cell {
        return Err(format_err!("--wide-format-cell-counts requires --per-cell"));
    }
    let threshold = u32::from_str(threshold)
        .map_err(|_| format_err!("Threshold must be a non-negative integer"))?;

    check_inputs_exist(bam_file, cell_barcodes, out_dir, region.is_some())?;

    let region: Option<Locus> = match region {
        Some(r) => Some(Locus::from_str(r)?),
        None => None,
    };

    let whitelist = match cell_barcodes {
        Some(path) => Some(load_barcodes(path)?),
        None => None,
    };

    let bam_file = PathBuf::from(bam_file);
    let summary = count_wrapper(
        &bam_file,
        out_dir,
        region.as_ref(),
        method,
        threshold,
        gene_tag.as_bytes(),
        per_cell,
        wide_format,
        whitelist.as_ref(),
    )?;

    info!("Number of units counted: {}", summary.n_units);
    info!("Number of input reads bundled: {}", summary.n_input_reads);
    info!("Number of molecules counted: {}", summary.n_molecules);
    if summary.n_skipped_units > 0 {
        warn!(
            "Skipped {} units with inconsistent UMI lengths",
            summary.n_skipped_units
        );
    }
    Ok(())
}

/* Validate Input/Output Files/Paths */

pub fn check_inputs_exist(
    bam_file: &str,
    cell_barcodes: Option<&str>,
    out_dir: &str,
    need_index: bool,
) -> Result<(), Error> {
    if !Path::new(bam_file).exists() {
        return Err(format_err!("Input {:?} does not exist", bam_file));
    }
    if let Some(path) = cell_barcodes {
        if !Path::new(path).exists() {
            return Err(format_err!("Input {:?} does not exist", path));
        }
    }
    // region fetches go through the BAM/CRAM index
    if need_index {
        let extension = Path::new(bam_file)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match extension {
            "bam" => {
                let bai = bam_file.to_owned() + ".bai";
                if !Path::new(&bai).exists() {
                    return Err(format_err!("BAM index {} does not exist", bai));
                }
            }
            "cram" => {
                let crai = bam_file.to_owned() + ".crai";
                if !Path::new(&crai).exists() {
                    return Err(format_err!("CRAM index {} does not exist", crai));
                }
            }
            &_ => {
                return Err(format_err!(
                    "BAM file did not end in .bam or .cram. Unable to validate"
                ));
            }
        }
    }
    if !Path::new(&out_dir).exists() {
        match create_dir_all(&out_dir) {
            Err(_e) => {
                return Err(format_err!("Couldn't create results directory at {}", out_dir));
            }
            _ => {
                info!("Created output directory at {}", out_dir);
            }
        }
    } else {
        return Err(format_err!(
            "Specified output directory {} already exists",
            out_dir
        ));
    }
    Ok(())
}

/* Helper Functions */

pub fn load_barcodes(filename: impl AsRef<Path>) -> Result<HashMap<Barcode, u32>, Error> {
    let reader = open_file(filename.as_ref())?;

    let mut bc_set = HashMap::new();
    for (i, l) in reader.lines().enumerate() {
        let cb = Barcode::from_slice(l?.as_bytes());
        bc_set.insert(cb, i as u32);
    }
    let num_bcs = bc_set.len();
    if num_bcs == 0 {
        return Err(format_err!(
            "Loaded 0 barcodes. Is your barcode file empty?"
        ));
    }
    debug!("Loaded {} barcodes", num_bcs);
    Ok(bc_set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_barcodes() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("barcodes.tsv");
        std::fs::write(&path, "AAACCTGAGAAACCAT-1\nAAACCTGAGAAACCGC-1\n").unwrap();

        let barcodes = load_barcodes(&path).unwrap();
        assert_eq!(barcodes.len(), 2);
        assert!(barcodes.contains_key(&Barcode::from_slice(b"AAACCTGAGAAACCAT-1")));
    }

    #[test]
    fn test_load_barcodes_empty() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("barcodes.tsv");
        std::fs::write(&path, "").unwrap();
        assert!(load_barcodes(&path).is_err());
    }

    #[test]
    fn test_out_dir_must_not_exist() {
        let tmp_dir = tempdir().unwrap();
        let bam = tmp_dir.path().join("in.bam");
        std::fs::write(&bam, "").unwrap();
        let existing = tmp_dir.path().join("already-there");
        std::fs::create_dir(&existing).unwrap();

        let res = check_inputs_exist(
            bam.to_str().unwrap(),
            None,
            existing.to_str().unwrap(),
            false,
        );
        assert!(res.is_err());
    }
}
