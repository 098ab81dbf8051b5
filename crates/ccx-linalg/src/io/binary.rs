//! Binary matrix stream.
//!
//! ```text
//! u32          element kind code
//! u32          block width N
//! u64          sparsity rows
//! u64          columns
//! u64          nonzero count (pattern entries)
//! u64[nnz]     row index of each entry
//! u64[nnz]     column index of each entry
//! T[N * nnz]   values
//! ```
//!
//! Everything is little-endian. Entries appear in row-major order, so a
//! stream written by [`write_binary`] reproduces pattern and values exactly.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::{
    InterchangeError, Result, check_kind, create_parent_dir, row_coordinates, to_usize,
    topology_from_coordinates, u64s_from_le_bytes, u64s_to_le_bytes, values_from_le_bytes,
    values_to_le_bytes,
};
use crate::csr::SparseMatrix;
use crate::scalar::Scalar;

pub fn write_binary<T: Scalar, const N: usize, W: Write>(
    matrix: &SparseMatrix<T, N>,
    mut writer: W,
) -> Result<()> {
    let topology = matrix.topology();
    let cols: Vec<u64> = topology.indices().iter().map(|&c| c as u64).collect();

    writer.write_all(&T::KIND.code().to_le_bytes())?;
    writer.write_all(&(N as u32).to_le_bytes())?;
    writer.write_all(&(topology.nrows() as u64).to_le_bytes())?;
    writer.write_all(&(matrix.ncols() as u64).to_le_bytes())?;
    writer.write_all(&(topology.nonzero() as u64).to_le_bytes())?;
    writer.write_all(&u64s_to_le_bytes(&row_coordinates(topology)))?;
    writer.write_all(&u64s_to_le_bytes(&cols))?;
    writer.write_all(&values_to_le_bytes(matrix.values()))?;
    writer.flush()?;
    Ok(())
}

pub fn read_binary<T: Scalar, const N: usize, R: Read>(mut reader: R) -> Result<SparseMatrix<T, N>> {
    let kind = read_u32(&mut reader)?;
    check_kind(T::KIND, kind)?;
    let width = read_u32(&mut reader)?;
    if width as usize != N {
        return Err(InterchangeError::BlockWidthMismatch {
            expected: N,
            found: width as u64,
        });
    }
    let nrows = to_usize(read_u64(&mut reader)?, "row count")?;
    let ncols = to_usize(read_u64(&mut reader)?, "column count")?;
    let nnz = read_u64(&mut reader)?;

    let index_bytes = nnz
        .checked_mul(8)
        .ok_or_else(|| InterchangeError::Malformed(format!("nonzero count {nnz} overflows")))?;
    let rows = u64s_from_le_bytes(&read_block(&mut reader, index_bytes)?)?;
    let cols = u64s_from_le_bytes(&read_block(&mut reader, index_bytes)?)?;
    let topology = topology_from_coordinates(nrows, &rows, &cols)?;

    let value_bytes = nnz
        .checked_mul((N * T::KIND.size()) as u64)
        .ok_or_else(|| InterchangeError::Malformed(format!("nonzero count {nnz} overflows")))?;
    let values = values_from_le_bytes::<T>(&read_block(&mut reader, value_bytes)?)?;

    Ok(SparseMatrix::from_values(topology, values, ncols))
}

/// Write a matrix to `path`, creating parent directories as needed.
pub fn save_binary<T: Scalar, const N: usize>(
    path: impl AsRef<Path>,
    matrix: &SparseMatrix<T, N>,
) -> Result<()> {
    let path = path.as_ref();
    create_parent_dir(path)?;
    write_binary(matrix, BufWriter::new(File::create(path)?))
}

pub fn load_binary<T: Scalar, const N: usize>(path: impl AsRef<Path>) -> Result<SparseMatrix<T, N>> {
    read_binary(BufReader::new(File::open(path)?))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read exactly `len` bytes without trusting `len` for the allocation.
fn read_block<R: Read>(reader: &mut R, len: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(InterchangeError::Malformed(format!(
            "stream ended after {} of {len} bytes",
            buf.len()
        )));
    }
    Ok(buf)
}
