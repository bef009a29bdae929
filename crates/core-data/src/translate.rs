//! Logical-to-physical translation for both data kinds.
//!
//! Blocks of graph structure stripe across chips round-robin on die 0;
//! node feature groups do the same on die 1, with block/page offsets
//! scaled when one feature spans multiple page stripes. Both layers are
//! pure functions of the device geometry and graph constants, plus the
//! per-chip page register state they carry for the data manager.

use crate::types::VGroupId;
use core_config::DeviceConfig;
use core_flash::{AddrVec, FlashAddress};
use core_graph::{Bid, Vid};
use serde::Serialize;

/// The single staging slot of one chip, for one data kind.
///
/// `curr` is the resident chunk, `next` the chunk being loaded (at most
/// one load per chip at a time), `refs` the number of in-flight transfers
/// out of the resident chunk. A new load may start only when `refs == 0`
/// and no load is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageReg<Id> {
    pub curr: Option<Id>,
    pub next: Option<Id>,
    pub refs: u32,
}

impl<Id: Copy + Eq> PageReg<Id> {
    /// The chunk is loaded and stable: present and not being replaced.
    pub fn resident(&self, id: Id) -> bool {
        self.curr == Some(id) && self.next.is_none()
    }

    pub fn loading(&self) -> bool {
        self.next.is_some()
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct StructureStats {
    pub bytes_loaded: u64,
}

/// Block id to flash address translation (graph structure, die 0).
#[derive(Debug)]
pub struct StructureTranslation {
    device: DeviceConfig,
    nblocks: Bid,
    pub page_regs: Vec<PageReg<Bid>>,
    pub stats: StructureStats,
}

impl StructureTranslation {
    pub fn new(device: DeviceConfig, nblocks: Bid) -> Self {
        Self {
            page_regs: vec![PageReg::default(); device.num_chips() as usize],
            stats: StructureStats::default(),
            device,
            nblocks,
        }
    }

    /// Chip holding `bid`, as chip-major index over (chip, channel).
    pub fn chip_of(&self, bid: Bid) -> u32 {
        bid % self.device.num_chips()
    }

    /// The die-0 plane stripe of one block.
    pub fn block_addrs(&self, bid: Bid) -> AddrVec {
        debug_assert!(bid < self.nblocks, "block {bid} outside the graph");
        let t = self.device.topology;
        let chipid = bid % self.device.num_chips();
        let nloops = bid / self.device.num_chips();
        (0..t.planes_per_die)
            .map(|plane| FlashAddress {
                channel: chipid % t.channels,
                chip: chipid / t.channels,
                die: 0,
                plane,
                block: nloops / t.pages_per_block,
                page: nloops % t.pages_per_block,
            })
            .collect()
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct FeatureStats {
    /// Requests that joined an in-flight read or transfer for their tag.
    pub coalesced_hits: u32,
    pub page_reg_hits: u32,
    pub page_reg_misses: u32,
    pub bytes_loaded_from_flash: u64,
    pub bytes_over_channel_bus: u64,
}

/// Vertex group to flash address translation (node features, die 1).
#[derive(Debug)]
pub struct FeatureTranslation {
    device: DeviceConfig,
    nverts: Vid,
    pub feature_dim: u32,
    /// Bytes of one serialized feature vector (4 bytes per component).
    pub feature_size: u32,
    /// Vertices sharing one page stripe; 0 or 1 means one group per
    /// vertex.
    pub nodes_per_page: u32,
    /// Page stripes per vertex when a feature overflows one stripe.
    pub pages_per_node: u32,
    pub ngroups: VGroupId,
    pub page_regs: Vec<PageReg<VGroupId>>,
    pub stats: FeatureStats,
}

impl FeatureTranslation {
    pub fn new(device: DeviceConfig, nverts: Vid, feature_dim: u32) -> Self {
        assert!(nverts > 0, "graph without vertices");
        let feature_size = 4 * feature_dim;
        let stripe = device.stripe_bytes();
        let nodes_per_page = stripe / feature_size;
        let pages_per_node = (feature_size - 1) / stripe + 1;
        let ngroups = if nodes_per_page > 1 {
            (nverts - 1) / nodes_per_page + 1
        } else {
            nverts
        };
        Self {
            page_regs: vec![PageReg::default(); device.num_chips() as usize],
            stats: FeatureStats::default(),
            device,
            nverts,
            feature_dim,
            feature_size,
            nodes_per_page,
            pages_per_node,
            ngroups,
        }
    }

    pub fn group_of(&self, vid: Vid) -> VGroupId {
        debug_assert!(vid < self.nverts, "vertex {vid} outside the graph");
        if self.nodes_per_page > 1 {
            vid / self.nodes_per_page
        } else {
            vid
        }
    }

    /// Vertices of one group; the last group may be short.
    pub fn group_vids(&self, group: VGroupId) -> std::ops::Range<Vid> {
        debug_assert!(group < self.ngroups, "group {group} out of range");
        if self.nodes_per_page > 1 {
            let lo = group * self.nodes_per_page;
            lo..(lo + self.nodes_per_page).min(self.nverts)
        } else {
            group..group + 1
        }
    }

    pub fn chip_of(&self, group: VGroupId) -> u32 {
        group % self.device.num_chips()
    }

    /// The die-1 plane stripe of one group.
    pub fn group_addrs(&self, group: VGroupId) -> AddrVec {
        debug_assert!(group < self.ngroups, "group {group} out of range");
        let t = self.device.topology;
        let chipid = group % self.device.num_chips();
        let nloops = group / self.device.num_chips();
        (0..t.planes_per_die)
            .map(|plane| FlashAddress {
                channel: chipid % t.channels,
                chip: chipid / t.channels,
                die: 1,
                plane,
                block: (nloops * self.pages_per_node) / t.pages_per_block,
                page: (nloops * self.pages_per_node) % t.pages_per_block,
            })
            .collect()
    }

    pub fn vid_addrs(&self, vid: Vid) -> AddrVec {
        self.group_addrs(self.group_of(vid))
    }
}
