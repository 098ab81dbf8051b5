//! Structured document interchange.
//!
//! A matrix becomes a small JSON tree: the root node carries the shape as
//! string attributes and three children hold the entry rows, entry columns
//! and values as binary blocks. Blocks store raw little-endian bytes, so a
//! round trip is exact.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{
    InterchangeError, Result, create_parent_dir, row_coordinates, to_usize,
    topology_from_coordinates, u64s_from_le_bytes, u64s_to_le_bytes, values_from_le_bytes,
    values_to_le_bytes,
};
use crate::csr::SparseMatrix;
use crate::scalar::{ElementKind, Scalar};

pub const SCHEMA_VERSION: u32 = 1;

const ROOT: &str = "sparse_matrix";
const ROWS: &str = "rows";
const COLUMNS: &str = "columns";
const VALUES: &str = "values";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub schema_version: u32,
    pub root: DocumentNode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DocumentNode {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<BinaryBlock>,
    #[serde(default)]
    pub children: Vec<DocumentNode>,
}

/// Typed array stored as raw little-endian bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BinaryBlock {
    pub kind: ElementKind,
    pub count: u64,
    pub bytes: Vec<u8>,
}

impl DocumentNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn child(&self, name: &str) -> Option<&DocumentNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn attribute(&self, key: &str) -> Result<&str> {
        self.attributes
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| InterchangeError::Malformed(format!("missing attribute '{key}'")))
    }

    fn u64_attribute(&self, key: &str) -> Result<u64> {
        let raw = self.attribute(key)?;
        raw.parse()
            .map_err(|_| InterchangeError::Malformed(format!("attribute '{key}' = '{raw}' is not an integer")))
    }

    fn block_of(&self, name: &str, kind: ElementKind) -> Result<&BinaryBlock> {
        let block = self
            .child(name)
            .and_then(|c| c.block.as_ref())
            .ok_or_else(|| InterchangeError::Malformed(format!("missing '{name}' block")))?;
        if block.kind != kind {
            return Err(InterchangeError::KindMismatch {
                expected: kind,
                found: block.kind.to_string(),
            });
        }
        let expected = block.count.checked_mul(kind.size() as u64);
        if expected != Some(block.bytes.len() as u64) {
            return Err(InterchangeError::Malformed(format!(
                "'{name}' block declares {} elements but holds {} bytes",
                block.count,
                block.bytes.len()
            )));
        }
        Ok(block)
    }
}

fn block_node(name: &str, kind: ElementKind, count: usize, bytes: Vec<u8>) -> DocumentNode {
    DocumentNode {
        block: Some(BinaryBlock {
            kind,
            count: count as u64,
            bytes,
        }),
        ..DocumentNode::new(name)
    }
}

pub fn to_document<T: Scalar, const N: usize>(matrix: &SparseMatrix<T, N>) -> Document {
    let topology = matrix.topology();
    let nnz = topology.nonzero();
    let cols: Vec<u64> = topology.indices().iter().map(|&c| c as u64).collect();

    let mut root = DocumentNode::new(ROOT);
    let attrs = &mut root.attributes;
    attrs.insert("kind".into(), T::KIND.name().into());
    attrs.insert("block_width".into(), N.to_string());
    attrs.insert("rows".into(), topology.nrows().to_string());
    attrs.insert("columns".into(), matrix.ncols().to_string());
    attrs.insert("nonzero".into(), nnz.to_string());

    root.children = vec![
        block_node(ROWS, ElementKind::U64, nnz, u64s_to_le_bytes(&row_coordinates(topology))),
        block_node(COLUMNS, ElementKind::U64, nnz, u64s_to_le_bytes(&cols)),
        block_node(VALUES, T::KIND, N * nnz, values_to_le_bytes(matrix.values())),
    ];

    Document {
        schema_version: SCHEMA_VERSION,
        root,
    }
}

pub fn from_document<T: Scalar, const N: usize>(document: &Document) -> Result<SparseMatrix<T, N>> {
    if document.schema_version != SCHEMA_VERSION {
        return Err(InterchangeError::Malformed(format!(
            "unsupported schema version {}",
            document.schema_version
        )));
    }
    let root = &document.root;
    if root.name != ROOT {
        return Err(InterchangeError::Malformed(format!("unexpected root node '{}'", root.name)));
    }

    let kind = root.attribute("kind")?;
    if kind != T::KIND.name() {
        return Err(InterchangeError::KindMismatch {
            expected: T::KIND,
            found: kind.to_string(),
        });
    }
    let width = root.u64_attribute("block_width")?;
    if width != N as u64 {
        return Err(InterchangeError::BlockWidthMismatch {
            expected: N,
            found: width,
        });
    }
    let nrows = to_usize(root.u64_attribute("rows")?, "row count")?;
    let ncols = to_usize(root.u64_attribute("columns")?, "column count")?;
    let nnz = root.u64_attribute("nonzero")?;

    let rows = root.block_of(ROWS, ElementKind::U64)?;
    let cols = root.block_of(COLUMNS, ElementKind::U64)?;
    let values = root.block_of(VALUES, T::KIND)?;
    if rows.count != nnz || cols.count != nnz || Some(values.count) != nnz.checked_mul(N as u64) {
        return Err(InterchangeError::Malformed(format!(
            "block sizes {}/{}/{} disagree with nonzero count {nnz}",
            rows.count, cols.count, values.count
        )));
    }

    let topology = topology_from_coordinates(
        nrows,
        &u64s_from_le_bytes(&rows.bytes)?,
        &u64s_from_le_bytes(&cols.bytes)?,
    )?;
    let values = values_from_le_bytes::<T>(&values.bytes)?;
    Ok(SparseMatrix::from_values(topology, values, ncols))
}

pub fn write_document<T: Scalar, const N: usize, W: Write>(
    matrix: &SparseMatrix<T, N>,
    mut writer: W,
) -> Result<()> {
    serde_json::to_writer(&mut writer, &to_document(matrix))?;
    writer.flush()?;
    Ok(())
}

pub fn read_document<T: Scalar, const N: usize, R: Read>(reader: R) -> Result<SparseMatrix<T, N>> {
    let document: Document = serde_json::from_reader(reader)?;
    from_document(&document)
}

pub fn save_document<T: Scalar, const N: usize>(
    path: impl AsRef<Path>,
    matrix: &SparseMatrix<T, N>,
) -> Result<()> {
    let path = path.as_ref();
    create_parent_dir(path)?;
    let bytes = serde_json::to_vec_pretty(&to_document(matrix))?;
    fs::write(path, bytes)?;
    Ok(())
}

pub fn load_document<T: Scalar, const N: usize>(path: impl AsRef<Path>) -> Result<SparseMatrix<T, N>> {
    let bytes = fs::read(path)?;
    let document: Document = serde_json::from_slice(&bytes)?;
    from_document(&document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;

    fn sample() -> SparseMatrix<Complex<f64>> {
        SparseMatrix::from_triplets(
            2,
            3,
            &[
                (0, 0, Complex::new(0.1, -0.2)),
                (0, 2, Complex::new(1.0 / 3.0, 0.0)),
                (1, 1, Complex::new(-5e-310, 7.0)),
            ],
        )
    }

    #[test]
    fn document_attributes_describe_shape() {
        let doc = to_document(&sample());
        assert_eq!(doc.root.attributes["kind"], "c64");
        assert_eq!(doc.root.attributes["rows"], "2");
        assert_eq!(doc.root.attributes["columns"], "3");
        assert_eq!(doc.root.attributes["nonzero"], "3");
        let values = doc.root.child("values").and_then(|c| c.block.as_ref()).unwrap();
        assert_eq!(values.count, 3);
        assert_eq!(values.bytes.len(), 48);
    }

    #[test]
    fn json_roundtrip_is_exact() {
        let a = sample();
        let mut buf = Vec::new();
        write_document(&a, &mut buf).unwrap();
        let b: SparseMatrix<Complex<f64>> = read_document(&buf[..]).unwrap();
        assert_eq!(a.topology(), b.topology());
        for (x, y) in a.values().iter().zip(b.values()) {
            assert_eq!(x.re.to_bits(), y.re.to_bits());
            assert_eq!(x.im.to_bits(), y.im.to_bits());
        }
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let doc = to_document(&sample());
        let err = from_document::<Complex<f32>, 1>(&doc).unwrap_err();
        assert!(matches!(err, InterchangeError::KindMismatch { .. }));
    }

    #[test]
    fn tampered_block_is_rejected() {
        let mut doc = to_document(&sample());
        doc.root.children[2].block.as_mut().unwrap().bytes.pop();
        let err = from_document::<Complex<f64>, 1>(&doc).unwrap_err();
        assert!(matches!(err, InterchangeError::Malformed(_)));

        let mut doc = to_document(&sample());
        doc.root.children.retain(|c| c.name != "columns");
        assert!(from_document::<Complex<f64>, 1>(&doc).is_err());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("k.json");
        let a = sample();
        save_document(&path, &a).unwrap();
        let b: SparseMatrix<Complex<f64>> = load_document(&path).unwrap();
        assert_eq!(a, b);
    }
}
