//! Chunk identity: what a request is asking for, usable as a table key.

use core_graph::{Bid, Vid};

/// Identifier of a vertex group: the set of vertices whose feature
/// vectors share one flash page stripe.
pub type VGroupId = u32;

/// Completion callback of an accepted request. Fires exactly once.
pub type Callback = Box<dyn FnOnce() + 'static>;

/// Descriptor of one node feature vector as the model layers see it.
/// Only input features (layer 0, forward, whole) live on flash; the rest
/// exist in DRAM and never reach the data path here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeFeature {
    pub grad: bool,
    pub partial: bool,
    pub layer: u32,
    pub vid: Vid,
    pub ncomponents: u32,
}

impl NodeFeature {
    /// The layer-0 forward feature of `vid`.
    pub fn input(vid: Vid) -> Self {
        Self { grad: false, partial: false, layer: 0, vid, ncomponents: 0 }
    }

    pub fn is_input(&self) -> bool {
        !self.grad && self.layer == 0 && !self.partial
    }

    pub fn is_partial(&self) -> bool {
        !self.grad && self.partial
    }

    pub fn is_gradient(&self) -> bool {
        self.grad
    }
}

/// Identity of a data chunk in flight, the key of the coalescing tables.
/// Flash reads are keyed at block / group granularity; channel transfers
/// of features are keyed per vertex, so distinct vertices of one group
/// dedup independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkTag {
    EdgeList { bid: Bid },
    NodeFeature { feature: NodeFeature, group: VGroupId },
    NodeFeatureGroup { group: VGroupId },
}
