//! Headerless little-endian `f32` files, as used for volumes and frame dumps

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

type IORes<T> = std::io::Result<T>;

pub fn write(data: impl IntoIterator<Item = f32>, path: &Path) -> IORes<()> {
    let mut buf = BufWriter::new(File::create(path)?);
    for datum in data {
        buf.write_all(&datum.to_le_bytes())?;
    }
    buf.flush()
}

/// Lazily read every value in the file. A trailing partial value is ignored.
pub fn read<'a>(path: &Path) -> IORes<impl Iterator<Item = IORes<f32>> + 'a> {
    let mut buf = BufReader::new(File::open(path)?);
    let mut bytes = [0; 4];

    Ok(std::iter::from_fn(move || {
        use std::io::ErrorKind::UnexpectedEof;
        match buf.read_exact(&mut bytes) {
            Ok(()) => Some(Ok(f32::from_le_bytes(bytes))),
            Err(e) if e.kind() == UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }))
}
