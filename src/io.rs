use failure::{Error, ResultExt};
use std::{
    io::{BufRead, BufReader, Read, Seek},
    path::Path,
};

/// Open a reader for a text or gzip file, sniffed from the magic bytes.
/// Cell barcode whitelists in particular come both ways.
pub fn open_file(p: impl AsRef<Path>) -> Result<Box<dyn BufRead + Send>, Error> {
    let p = p.as_ref();

    let mut file =
        std::fs::File::open(p).with_context(|_| format!("Error opening file: {:?}", p))?;

    let mut buf = [0u8; 2];
    file.read_exact(&mut buf[..])?;
    file.seek(std::io::SeekFrom::Start(0))?;

    if buf == [0x1F, 0x8B] {
        let gz = flate2::read::MultiGzDecoder::new(file);
        Ok(Box::new(BufReader::with_capacity(1 << 17, gz)))
    } else {
        Ok(Box::new(BufReader::with_capacity(32 * 1024, file)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn open_plain_and_gzip() {
        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("barcodes.tsv");
        std::fs::write(&plain, "ACGT\nTGCA\n").unwrap();

        let gzipped = dir.path().join("barcodes.tsv.gz");
        let mut enc =
            GzEncoder::new(std::fs::File::create(&gzipped).unwrap(), Compression::default());
        enc.write_all(b"ACGT\nTGCA\n").unwrap();
        enc.finish().unwrap();

        for path in &[plain, gzipped] {
            let reader = open_file(path).unwrap();
            let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
            assert_eq!(lines, vec!["ACGT", "TGCA"]);
        }
    }
}
