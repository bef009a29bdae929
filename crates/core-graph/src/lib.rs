//! core-graph: on-flash graph metadata.
//!
//! A partitioned graph lives under `<path>/b<block_size>/`: a
//! `header.toml` with one `[metadata]` section plus one `[blockN]` section
//! per block, and per-block binary files (`N_v.bin` edge-list offsets,
//! `N_e.bin` destination ids). This crate loads the header into block and
//! dense-vertex metadata and exposes the lookups the data path needs:
//! binary block search by vertex, dense-vertex detection, and the block
//! file readers.
//!
//! A vertex whose edge list overflows one block is "dense": it is split
//! across a run of consecutive blocks, each marked `dense = true` with
//! `vlo == vup`, merged here into a single `DenseVertexMetadata` record.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub type Vid = u32;
pub type Eid = u64;
pub type Bid = u32;

/// Bytes per serialized vertex id in the edge files.
pub const VID_BYTES: u32 = 4;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("header: {0}")]
    Header(String),
    #[error("block {0} out of range")]
    BlockOutOfRange(Bid),
    #[error("block {0} is dense and has no offset table")]
    DenseBlock(Bid),
    #[error("block file {path}: {reason}")]
    BlockFile { path: PathBuf, reason: String },
    #[error("graph has no backing directory")]
    NoBackingDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalMetadata {
    pub weighted: bool,
    pub nverts: Vid,
    pub ndverts: Vid,
    pub nedges: Eid,
    pub nblocks: Bid,
    pub ndblocks: Bid,
    pub block_size: u32,
    /// Width in bytes of one entry in a block's offset table.
    pub voffset_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMetadata {
    /// First vertex in the block.
    pub vlo: Vid,
    /// One past the last vertex (`vlo == vup` for dense blocks).
    pub vup: Vid,
    pub elo: Eid,
    pub odg: u32,
    pub idg: Eid,
    pub dense: bool,
    /// Serialized size of the block payload.
    pub bytes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenseVertexMetadata {
    pub elo: Eid,
    pub odg: u32,
    pub idg: Eid,
    /// First block of the dense run.
    pub blo: Bid,
    pub nblocks: Bid,
}

/// One `[blockN]` section of the header.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BlockSpec {
    pub vlo: Vid,
    pub vup: Vid,
    pub elo: Eid,
    pub odg: u32,
    pub idg: Eid,
    #[serde(default)]
    pub dense: bool,
}

#[derive(Debug, Deserialize)]
struct MetadataSection {
    #[serde(default)]
    weighted: bool,
    nverts: Vid,
    ndverts: Vid,
    nedges: Eid,
    nblocks: Bid,
    ndblocks: Bid,
}

#[derive(Debug, Deserialize)]
struct HeaderFile {
    metadata: MetadataSection,
    /// The remaining sections: one `blockN` table per block.
    #[serde(flatten)]
    blocks: HashMap<String, BlockSpec>,
}

#[derive(Debug)]
pub struct Graph {
    dir: Option<PathBuf>,
    global: GlobalMetadata,
    blocks: Vec<BlockMetadata>,
    dverts: HashMap<Vid, DenseVertexMetadata>,
}

impl Graph {
    /// Load `<path>/b<block_size>/header.toml`.
    pub fn import(path: impl AsRef<Path>, block_size: u32) -> Result<Self, GraphError> {
        let dir = path.as_ref().join(format!("b{block_size}"));
        let header_path = dir.join("header.toml");
        let content = fs::read_to_string(&header_path).map_err(|source| GraphError::Io {
            path: header_path.clone(),
            source,
        })?;
        let mut header: HeaderFile =
            toml::from_str(&content).map_err(|source| GraphError::Parse {
                path: header_path.clone(),
                source,
            })?;

        let meta = header.metadata;
        let mut specs = Vec::with_capacity(meta.nblocks as usize);
        for bid in 0..meta.nblocks {
            let spec = header
                .blocks
                .remove(&format!("block{bid}"))
                .ok_or_else(|| GraphError::Header(format!("missing [block{bid}] section")))?;
            specs.push(spec);
        }

        let mut graph = Self::from_parts(meta.weighted, meta.nverts, meta.nedges, block_size, specs)?;
        if graph.global.ndblocks != meta.ndblocks {
            return Err(GraphError::Header(format!(
                "ndblocks declared {} but {} blocks are dense",
                meta.ndblocks, graph.global.ndblocks
            )));
        }
        if graph.global.ndverts != meta.ndverts {
            return Err(GraphError::Header(format!(
                "ndverts declared {} but {} dense vertices found",
                meta.ndverts, graph.global.ndverts
            )));
        }
        graph.dir = Some(dir);
        info!(
            target: "graph",
            nverts = graph.global.nverts,
            nblocks = graph.global.nblocks,
            ndverts = graph.global.ndverts,
            block_size,
            "graph imported"
        );
        Ok(graph)
    }

    /// Assemble a graph from in-memory block specs. Dense runs are merged,
    /// dense/vertex counts derived. No backing directory, so the block
    /// file readers are unavailable.
    pub fn from_parts(
        weighted: bool,
        nverts: Vid,
        nedges: Eid,
        block_size: u32,
        specs: Vec<BlockSpec>,
    ) -> Result<Self, GraphError> {
        if block_size < 2 * VID_BYTES {
            return Err(GraphError::Header(format!(
                "block_size {block_size} too small"
            )));
        }
        let voffset_size =
            ((block_size as f64 / VID_BYTES as f64).log2() / 8.0).ceil() as u32;

        let mut blocks = Vec::with_capacity(specs.len());
        let mut dverts: HashMap<Vid, DenseVertexMetadata> = HashMap::new();
        let mut ndblocks: Bid = 0;

        for (bid, spec) in specs.iter().enumerate() {
            if spec.vlo > spec.vup {
                return Err(GraphError::Header(format!(
                    "block{bid}: vlo {} > vup {}",
                    spec.vlo, spec.vup
                )));
            }
            let bytes = if spec.dense {
                if spec.vlo != spec.vup {
                    return Err(GraphError::Header(format!(
                        "block{bid}: dense block must have vlo == vup"
                    )));
                }
                ndblocks += 1;
                match dverts.get_mut(&spec.vlo) {
                    Some(dvert) => {
                        dvert.odg += spec.odg;
                        dvert.idg += spec.idg;
                        dvert.nblocks += 1;
                    }
                    None => {
                        dverts.insert(
                            spec.vlo,
                            DenseVertexMetadata {
                                elo: spec.elo,
                                odg: spec.odg,
                                idg: spec.idg,
                                blo: bid as Bid,
                                nblocks: 1,
                            },
                        );
                    }
                }
                VID_BYTES * spec.odg
            } else {
                voffset_size * (spec.vup - spec.vlo + 1) + VID_BYTES * spec.odg
            };
            blocks.push(BlockMetadata {
                vlo: spec.vlo,
                vup: spec.vup,
                elo: spec.elo,
                odg: spec.odg,
                idg: spec.idg,
                dense: spec.dense,
                bytes,
            });
        }

        let global = GlobalMetadata {
            weighted,
            nverts,
            ndverts: dverts.len() as Vid,
            nedges,
            nblocks: blocks.len() as Bid,
            ndblocks,
            block_size,
            voffset_size,
        };
        Ok(Self { dir: None, global, blocks, dverts })
    }

    pub fn global(&self) -> &GlobalMetadata {
        &self.global
    }

    pub fn block_metadata(&self, bid: Bid) -> Option<&BlockMetadata> {
        self.blocks.get(bid as usize)
    }

    pub fn is_dense_vertex(&self, vid: Vid) -> bool {
        self.dverts.contains_key(&vid)
    }

    pub fn dense_vertex_metadata(&self, vid: Vid) -> Option<&DenseVertexMetadata> {
        self.dverts.get(&vid)
    }

    pub fn is_vert_in_block(&self, vid: Vid, bid: Bid) -> bool {
        self.blocks
            .get(bid as usize)
            .is_some_and(|b| vid >= b.vlo && vid < b.vup)
    }

    /// First block whose vertex range extends past `vid`. Dense vertices
    /// are not covered by any range and must go through the dense map.
    pub fn binary_search_block(&self, vid: Vid) -> Option<Bid> {
        let idx = self.blocks.partition_point(|b| b.vup <= vid);
        (idx < self.blocks.len()).then_some(idx as Bid)
    }

    /// Edge-list offset table of a non-dense block: `vup - vlo + 1`
    /// little-endian entries of `voffset_size` bytes.
    pub fn read_block_offsets(&self, bid: Bid) -> Result<Vec<u64>, GraphError> {
        let meta = *self
            .block_metadata(bid)
            .ok_or(GraphError::BlockOutOfRange(bid))?;
        if meta.dense {
            return Err(GraphError::DenseBlock(bid));
        }
        let path = self.block_file(bid, "v")?;
        let raw = fs::read(&path).map_err(|source| GraphError::Io {
            path: path.clone(),
            source,
        })?;
        let width = self.global.voffset_size as usize;
        let count = (meta.vup - meta.vlo + 1) as usize;
        if raw.len() != width * count {
            return Err(GraphError::BlockFile {
                path,
                reason: format!("expected {} bytes, found {}", width * count, raw.len()),
            });
        }
        Ok(raw
            .chunks_exact(width)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u64, |acc, (i, &b)| acc | (u64::from(b) << (8 * i)))
            })
            .collect())
    }

    /// Destination ids of a block: `odg` little-endian 4-byte entries.
    pub fn read_block_edges(&self, bid: Bid) -> Result<Vec<Vid>, GraphError> {
        let meta = *self
            .block_metadata(bid)
            .ok_or(GraphError::BlockOutOfRange(bid))?;
        let path = self.block_file(bid, "e")?;
        let raw = fs::read(&path).map_err(|source| GraphError::Io {
            path: path.clone(),
            source,
        })?;
        let count = meta.odg as usize;
        if raw.len() != VID_BYTES as usize * count {
            return Err(GraphError::BlockFile {
                path,
                reason: format!(
                    "expected {} bytes, found {}",
                    VID_BYTES as usize * count,
                    raw.len()
                ),
            });
        }
        Ok(raw
            .chunks_exact(VID_BYTES as usize)
            .map(|chunk| Vid::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    fn block_file(&self, bid: Bid, suffix: &str) -> Result<PathBuf, GraphError> {
        let dir = self.dir.as_ref().ok_or(GraphError::NoBackingDir)?;
        Ok(dir.join(format!("{bid}_{suffix}.bin")))
    }
}
