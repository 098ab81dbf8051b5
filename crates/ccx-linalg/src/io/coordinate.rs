//! Plain-text coordinate output (1-based `i j value` lines).
//!
//! The first line holds `rows columns entries`. Complex values are written
//! as `i j re im`. There is no reader; the format is meant for inspection
//! and for loading into external tools.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::{Result, create_parent_dir};
use crate::csr::SparseMatrix;
use crate::scalar::{ElementKind, Scalar};

fn format_lane(kind: ElementKind, value: f64) -> String {
    match kind {
        // shortest representation of the stored single-precision value
        ElementKind::F32 | ElementKind::C32 => (value as f32).to_string(),
        _ => value.to_string(),
    }
}

/// Write logical entries; with `skip_zeros`, explicitly stored zeros are omitted.
pub fn write_coordinate<T: Scalar, const N: usize, W: Write>(
    matrix: &SparseMatrix<T, N>,
    mut writer: W,
    skip_zeros: bool,
) -> Result<()> {
    let entries: Vec<_> = matrix
        .to_triplets()
        .into_iter()
        .filter(|(_, _, v)| !(skip_zeros && v.is_zero()))
        .collect();

    writeln!(writer, "{} {} {}", matrix.nrows(), matrix.ncols(), entries.len())?;
    for (i, j, v) in entries {
        let lanes = v.to_lanes();
        write!(writer, "{} {}", i + 1, j + 1)?;
        for &lane in &lanes[..T::PARTS] {
            write!(writer, " {}", format_lane(T::KIND, lane))?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn save_coordinate<T: Scalar, const N: usize>(
    path: impl AsRef<Path>,
    matrix: &SparseMatrix<T, N>,
    skip_zeros: bool,
) -> Result<()> {
    let path = path.as_ref();
    create_parent_dir(path)?;
    write_coordinate(matrix, BufWriter::new(File::create(path)?), skip_zeros)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;

    fn render<T: Scalar, const N: usize>(m: &SparseMatrix<T, N>, skip_zeros: bool) -> String {
        let mut buf = Vec::new();
        write_coordinate(m, &mut buf, skip_zeros).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn one_based_triples() {
        let a = SparseMatrix::from_triplets(2, 2, &[(0, 0, 2.5f64), (1, 0, 0.0), (1, 1, -1.0)]);
        assert_eq!(render(&a, false), "2 2 3\n1 1 2.5\n2 1 0\n2 2 -1\n");
        assert_eq!(render(&a, true), "2 2 2\n1 1 2.5\n2 2 -1\n");
    }

    #[test]
    fn single_precision_prints_short_form() {
        let a = SparseMatrix::from_triplets(1, 1, &[(0, 0, 0.1f32)]);
        assert_eq!(render(&a, false), "1 1 1\n1 1 0.1\n");
    }

    #[test]
    fn complex_writes_both_parts() {
        let a = SparseMatrix::from_triplets(1, 2, &[(0, 1, Complex::new(1.0f64, -2.0))]);
        assert_eq!(render(&a, false), "1 2 1\n1 2 1 -2\n");
    }
}
