//! Matrix interchange formats.
//!
//! - [`binary`]: compact little-endian stream with an element-kind tag
//! - [`document`]: JSON document tree with binary-encoded array blocks
//! - [`coordinate`]: write-only 1-based `i j value` text
//!
//! Readers refuse data whose element kind or block width does not match the
//! requested matrix type.

pub mod binary;
pub mod coordinate;
pub mod document;

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::scalar::ElementKind;
use crate::topology::{PatternError, SparseTopology};

pub use binary::{load_binary, read_binary, save_binary, write_binary};
pub use coordinate::{save_coordinate, write_coordinate};
pub use document::{
    BinaryBlock, Document, DocumentNode, from_document, load_document, read_document,
    save_document, to_document, write_document,
};

pub type Result<T> = std::result::Result<T, InterchangeError>;

#[derive(Error, Debug)]
pub enum InterchangeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("element kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: ElementKind, found: String },

    #[error("block width mismatch: expected {expected}, found {found}")]
    BlockWidthMismatch { expected: usize, found: u64 },

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("invalid sparsity pattern: {0}")]
    Pattern(#[from] PatternError),
}

pub(crate) fn check_kind(expected: ElementKind, code: u32) -> Result<()> {
    if expected.code() == code {
        return Ok(());
    }
    let found = ElementKind::from_code(code)
        .map(|k| k.to_string())
        .unwrap_or_else(|| format!("code {code}"));
    Err(InterchangeError::KindMismatch { expected, found })
}

pub(crate) fn to_usize(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| InterchangeError::Malformed(format!("{what} {value} does not fit in usize")))
}

/// Rebuild a pattern from per-entry row and column indices in row-major order.
pub(crate) fn topology_from_coordinates(
    nrows: usize,
    rows: &[u64],
    cols: &[u64],
) -> Result<SparseTopology> {
    if rows.len() != cols.len() {
        return Err(InterchangeError::Malformed(format!(
            "{} row indices but {} column indices",
            rows.len(),
            cols.len()
        )));
    }
    let len = nrows
        .checked_add(1)
        .ok_or_else(|| InterchangeError::Malformed(format!("row count {nrows} overflows")))?;
    let mut offsets = Vec::new();
    offsets.try_reserve_exact(len).map_err(|_| {
        InterchangeError::Malformed(format!("row count {nrows} exceeds addressable memory"))
    })?;
    offsets.resize(len, 0usize);
    let mut previous = 0usize;
    for &r in rows {
        let r = to_usize(r, "row index")?;
        if r >= nrows {
            return Err(PatternError::RowOutOfRange { row: r, nrows }.into());
        }
        if r < previous {
            return Err(InterchangeError::Malformed(format!(
                "row index {r} follows row {previous}; entries must be row-major"
            )));
        }
        previous = r;
        offsets[r + 1] += 1;
    }
    for i in 0..nrows {
        offsets[i + 1] += offsets[i];
    }
    let indices = cols
        .iter()
        .map(|&c| to_usize(c, "column index"))
        .collect::<Result<Vec<_>>>()?;
    Ok(SparseTopology::from_parts(offsets, indices)?)
}

/// Per-entry row indices of a pattern, the inverse of
/// [`topology_from_coordinates`].
pub(crate) fn row_coordinates(topology: &SparseTopology) -> Vec<u64> {
    let mut rows = Vec::with_capacity(topology.nonzero());
    for i in 0..topology.nrows() {
        rows.extend(std::iter::repeat_n(i as u64, topology.row_range(i).len()));
    }
    rows
}

pub(crate) fn create_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Values as little-endian bytes.
pub(crate) fn values_to_le_bytes<T: crate::Scalar>(values: &[T]) -> Vec<u8> {
    #[allow(unused_mut)]
    let mut bytes = bytemuck::cast_slice::<T, u8>(values).to_vec();
    #[cfg(target_endian = "big")]
    {
        let component = T::KIND.size() / T::PARTS;
        for chunk in bytes.chunks_exact_mut(component) {
            chunk.reverse();
        }
    }
    bytes
}

/// Inverse of [`values_to_le_bytes`].
pub(crate) fn values_from_le_bytes<T: crate::Scalar>(bytes: &[u8]) -> Result<Vec<T>> {
    if bytes.len() % T::KIND.size() != 0 {
        return Err(InterchangeError::Malformed(format!(
            "{} value bytes is not a multiple of the {} element size",
            bytes.len(),
            T::KIND
        )));
    }
    #[cfg(target_endian = "big")]
    let bytes = {
        let component = T::KIND.size() / T::PARTS;
        let mut swapped = bytes.to_vec();
        for chunk in swapped.chunks_exact_mut(component) {
            chunk.reverse();
        }
        swapped
    };
    #[cfg(target_endian = "big")]
    let bytes = &bytes[..];
    Ok(bytemuck::pod_collect_to_vec::<u8, T>(bytes))
}

pub(crate) fn u64s_to_le_bytes(values: &[u64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn u64s_from_le_bytes(bytes: &[u8]) -> Result<Vec<u64>> {
    if bytes.len() % 8 != 0 {
        return Err(InterchangeError::Malformed(format!(
            "{} index bytes is not a multiple of 8",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
}
