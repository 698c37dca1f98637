use anyhow::{bail, Result};
use model::*;
use std::io::{Read, Write};
use std::path::Path;

pub const HEADER: [&str; 4] = ["timestamp", "x", "y", "z"];

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("write failed: {0}")]
    WriteFailed(#[from] csv::Error),
}

fn builder() -> csv::WriterBuilder {
    let mut b = csv::WriterBuilder::new();
    b.delimiter(b' ').has_headers(false);
    b
}

/// Writes the header and one `timestamp x y z` line per sample, in timestamp order.
/// Returns the number of sample lines.
pub fn write_series<W: Write>(store: &SeriesStore, writer: W) -> Result<usize, ExportError> {
    let mut w = builder().from_writer(writer);
    write_rows(&mut w, store)
}

pub fn export_file(store: &SeriesStore, path: &Path) -> Result<usize, ExportError> {
    let mut w = builder().from_path(path)?;
    write_rows(&mut w, store)
}

fn write_rows<W: Write>(w: &mut csv::Writer<W>, store: &SeriesStore) -> Result<usize, ExportError> {
    w.write_record(HEADER)?;
    let mut lines = 0;
    for s in store.samples() {
        w.write_record(&[
            s.timestamp.to_string(),
            s.x.to_string(),
            s.y.to_string(),
            s.z.to_string(),
        ])?;
        lines += 1;
    }
    w.flush().map_err(csv::Error::from)?;
    Ok(lines)
}

pub fn read_series<R: Read>(reader: R) -> Result<Vec<Sample>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b' ')
        .from_reader(reader);
    if !rdr.headers()?.iter().eq(HEADER) {
        bail!("unexpected header {:?}", rdr.headers()?);
    }
    let mut samples = Vec::new();
    for rec in rdr.deserialize() {
        let s: Sample = rec?;
        samples.push(s);
    }
    Ok(samples)
}

pub fn import_file(path: &Path) -> Result<Vec<Sample>> {
    let f = std::fs::File::open(path)?;
    read_series(std::io::BufReader::new(f))
}
