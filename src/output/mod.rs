//! Result presentation: a plain listing or a pickled file list.

pub mod pickle;

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::error::OndiskError;

/// Write one file name per line.
pub fn write_listing<W: Write>(writer: &mut W, files: &BTreeSet<String>) -> std::io::Result<()> {
    for name in files {
        writeln!(writer, "{}", name)?;
    }
    writer.flush()
}

/// Save `files` to `path` as a protocol 2 pickle of UTF-8 byte strings.
pub fn save_file_list(path: &Path, files: &BTreeSet<String>) -> Result<(), OndiskError> {
    let encoded = pickle::encode_bytes_list(files.iter().map(String::as_bytes));

    let write_error = |source| OndiskError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(write_error)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&encoded).map_err(write_error)?;
    writer.flush().map_err(write_error)?;

    debug!(path = %path.display(), bytes = encoded.len(), files = files.len(), "saved file list");
    Ok(())
}

/// Read back a file list written by [`save_file_list`] (or by CPython).
pub fn load_file_list(path: &Path) -> Result<Vec<String>, OndiskError> {
    let data = std::fs::read(path)?;
    pickle::decode_bytes_list(&data)?
        .into_iter()
        .enumerate()
        .map(|(index, bytes)| {
            String::from_utf8(bytes).map_err(|_| OndiskError::InvalidFileName {
                path: path.to_path_buf(),
                index,
            })
        })
        .collect()
}
