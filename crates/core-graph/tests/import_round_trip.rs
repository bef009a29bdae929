//! End-to-end import of an on-disk graph directory written by the test.

use core_graph::{Graph, GraphError};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;

const BLOCK_SIZE: u32 = 65536;

fn write_header(dir: &Path) {
    let header = r#"
[metadata]
weighted = false
nverts = 16
ndverts = 1
nedges = 72
nblocks = 4
ndblocks = 2

[block0]
vlo = 0
vup = 8
elo = 0
odg = 4
idg = 20

[block1]
vlo = 8
vup = 8
elo = 4
odg = 3
idg = 4
dense = true

[block2]
vlo = 8
vup = 8
elo = 7
odg = 3
idg = 4
dense = true

[block3]
vlo = 9
vup = 16
elo = 10
odg = 2
idg = 44
"#;
    fs::write(dir.join("header.toml"), header).unwrap();
}

fn le_bytes(value: u64, width: usize) -> Vec<u8> {
    (0..width).map(|i| ((value >> (8 * i)) & 0xff) as u8).collect()
}

fn write_block_files(dir: &Path) {
    // block0: 9 offsets (2 bytes each at this block size), 4 edges.
    let mut offsets = Vec::new();
    for v in [0u64, 4, 8, 300, 301, 302, 303, 304, 305] {
        offsets.extend(le_bytes(v, 2));
    }
    fs::write(dir.join("0_v.bin"), &offsets).unwrap();
    let mut edges = Vec::new();
    for dst in [1u32, 2, 3, 9] {
        edges.extend(dst.to_le_bytes());
    }
    fs::write(dir.join("0_e.bin"), &edges).unwrap();
    // block1 is dense: edges only.
    let mut dense_edges = Vec::new();
    for dst in [0u32, 1, 2] {
        dense_edges.extend(dst.to_le_bytes());
    }
    fs::write(dir.join("1_e.bin"), &dense_edges).unwrap();
}

#[test]
fn import_and_read_blocks() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join(format!("b{BLOCK_SIZE}"));
    fs::create_dir_all(&dir).unwrap();
    write_header(&dir);
    write_block_files(&dir);

    let graph = Graph::import(root.path(), BLOCK_SIZE).unwrap();
    assert_eq!(graph.global().nverts, 16);
    assert_eq!(graph.global().nblocks, 4);
    assert_eq!(graph.global().voffset_size, 2);
    let dvert = graph.dense_vertex_metadata(8).unwrap();
    assert_eq!((dvert.blo, dvert.nblocks, dvert.odg), (1, 2, 6));

    let offsets = graph.read_block_offsets(0).unwrap();
    assert_eq!(offsets.len(), 9);
    assert_eq!(offsets[3], 300);
    let edges = graph.read_block_edges(0).unwrap();
    assert_eq!(edges, vec![1, 2, 3, 9]);
    let dense_edges = graph.read_block_edges(1).unwrap();
    assert_eq!(dense_edges, vec![0, 1, 2]);
    assert!(matches!(
        graph.read_block_offsets(1),
        Err(GraphError::DenseBlock(1))
    ));
}

#[test]
fn truncated_block_file_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join(format!("b{BLOCK_SIZE}"));
    fs::create_dir_all(&dir).unwrap();
    write_header(&dir);
    write_block_files(&dir);
    fs::write(dir.join("0_e.bin"), [0u8; 3]).unwrap();

    let graph = Graph::import(root.path(), BLOCK_SIZE).unwrap();
    let err = graph.read_block_edges(0).unwrap_err();
    assert!(matches!(err, GraphError::BlockFile { .. }));
}

#[test]
fn declared_dense_counts_must_match() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join(format!("b{BLOCK_SIZE}"));
    fs::create_dir_all(&dir).unwrap();
    let header = r#"
[metadata]
nverts = 8
ndverts = 1
nedges = 4
nblocks = 1
ndblocks = 0

[block0]
vlo = 0
vup = 8
elo = 0
odg = 4
idg = 4
"#;
    fs::write(dir.join("header.toml"), header).unwrap();
    let err = Graph::import(root.path(), BLOCK_SIZE).unwrap_err();
    assert!(matches!(err, GraphError::Header(_)));
}
