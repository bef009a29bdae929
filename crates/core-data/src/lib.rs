//! core-data: the data manager and its translation layers.
//!
//! This crate owns the two-stage data movement pipelines of the simulated
//! accelerator: flash array to chip page register, then page register to
//! off-chip DRAM, for two data kinds (graph edge lists on die 0, node
//! feature vectors on die 1). Concurrent requests for the same chunk are
//! coalesced in keyed tables, per-chip page registers are mutually
//! exclusive, the shared transfer buffer applies backpressure, and
//! deferred requests replay automatically when resources free. Everything
//! runs on the single logical clock of the flash controller underneath.

mod compute;
mod manager;
mod translate;
mod types;

pub use compute::{ComputeQueues, PE_ARRAY_WIDTH};
pub use manager::{COMBINER_LANES, DataError, DataManager};
pub use translate::{
    FeatureStats, FeatureTranslation, PageReg, StructureStats, StructureTranslation,
};
pub use types::{Callback, ChunkTag, NodeFeature, VGroupId};
