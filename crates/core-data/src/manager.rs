//! The data manager: admission, coalescing, backpressure, and replay for
//! the two-stage load pipelines.
//!
//! Stage 1 moves a chunk from the flash array into its chip's page
//! register (READ_LOCAL, one plane stripe). Stage 2 moves it from the
//! page register to DRAM over the channel bus (PULL), reserving space in
//! the shared transfer buffer for the duration. Admission at each stage
//! either fires synchronously (already resident), joins an in-flight
//! request for the same tag, defers into a pending queue (register busy
//! or buffer full), or issues the device request. Deferred work is a
//! retry record, not a closure, and replays through the same admission
//! path when a stage-2 completion frees resources.

use crate::compute::ComputeQueues;
use crate::translate::{FeatureStats, FeatureTranslation, StructureStats, StructureTranslation};
use crate::types::{Callback, ChunkTag, NodeFeature, VGroupId};
use core_collections::IndexedList;
use core_config::{DeviceConfig, WorkloadConfig};
use core_flash::{FlashController, IoStats, SsdRequest, SsdRequestKind};
use core_graph::{Bid, Graph, Vid};
use core_sim::{Cycle, Module};
use thiserror::Error;
use tracing::{info, trace};

/// Parallel lanes in the combiner unit.
pub const COMBINER_LANES: usize = 2;

#[derive(Debug, Error)]
pub enum DataError {
    #[error(transparent)]
    Config(#[from] core_config::ConfigError),
    #[error("block {0} out of range")]
    BlockOutOfRange(Bid),
    #[error("vertex {0} out of range")]
    VertexOutOfRange(Vid),
    #[error("feature for vertex {vid} is not an input feature")]
    NotInputFeature { vid: Vid },
}

/// What to do when a stage-1 page load lands: fire the caller directly,
/// or continue into the stage-2 transfer carrying the caller's callback.
enum PageRegHook {
    User(Callback),
    EdgeToDram { bid: Bid, cb: Callback },
    FeatureToDram { feature: NodeFeature, cb: Callback },
}

/// What to do when a stage-2 transfer lands. Joiners of an in-flight
/// transfer contribute a ref release ahead of their callback.
enum ChannelHook {
    User(Callback),
    ReleaseEdgeRef { bid: Bid, chip: u32 },
    ReleaseFeatureRef { group: VGroupId, chip: u32 },
}

/// A deferred admission, replayed by the pending-queue drains.
enum PendingHook {
    EdgePageLoad { bid: Bid, after: PageRegHook },
    FeaturePageLoad { feature: NodeFeature, after: PageRegHook },
    EdgePull { bid: Bid, cb: Callback },
    FeaturePull { feature: NodeFeature, cb: Callback },
}

struct ActiveEntry {
    hooks: Vec<PageRegHook>,
}

struct ChannelEntry {
    hooks: Vec<ChannelHook>,
}

struct PendingEntry {
    hooks: Vec<PendingHook>,
}

/// Completion tokens handed to the flash controller; routed back through
/// `dispatch` in completion order.
#[derive(Debug, Clone, Copy)]
enum Completion {
    EdgePageLoad { chip: u32, tag: ChunkTag },
    EdgePull { bid: Bid, chip: u32, tag: ChunkTag },
    FeaturePageLoad { chip: u32, tag: ChunkTag },
    FeaturePull { group: VGroupId, chip: u32, tag: ChunkTag },
}

pub struct DataManager {
    ssd: FlashController<Completion>,
    graph: Graph,
    gstl: StructureTranslation,
    nftl: FeatureTranslation,
    active_flash_reads: Vec<IndexedList<ChunkTag, ActiveEntry>>,
    pending_flash_reads: Vec<IndexedList<ChunkTag, PendingEntry>>,
    active_channel_transfers: IndexedList<ChunkTag, ChannelEntry>,
    pending_channel_transfers: IndexedList<ChunkTag, PendingEntry>,
    buffer_capacity: u64,
    buffer_used: u64,
    compute: ComputeQueues,
}

impl DataManager {
    pub fn new(
        device: DeviceConfig,
        graph: Graph,
        workload: &WorkloadConfig,
    ) -> Result<Self, DataError> {
        device.validate()?;
        workload.validate()?;
        let chips = device.num_chips() as usize;
        let gstl = StructureTranslation::new(device, graph.global().nblocks);
        let nftl = FeatureTranslation::new(
            device,
            graph.global().nverts,
            workload.feature.node_feature_dim,
        );
        Ok(Self {
            ssd: FlashController::new(device),
            gstl,
            nftl,
            active_flash_reads: (0..chips).map(|_| IndexedList::new()).collect(),
            pending_flash_reads: (0..chips).map(|_| IndexedList::new()).collect(),
            active_channel_transfers: IndexedList::new(),
            pending_channel_transfers: IndexedList::new(),
            buffer_capacity: workload.buffers.transfer_capacity,
            buffer_used: 0,
            compute: ComputeQueues::new(
                workload.compute.aggregator_latency,
                workload.compute.pe_latency,
                workload.feature.node_feature_dim,
                COMBINER_LANES,
            ),
            graph,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn buffer_used(&self) -> u64 {
        self.buffer_used
    }

    pub fn buffer_capacity(&self) -> u64 {
        self.buffer_capacity
    }

    pub fn structure_stats(&self) -> &StructureStats {
        &self.gstl.stats
    }

    pub fn feature_stats(&self) -> &FeatureStats {
        &self.nftl.stats
    }

    pub fn io_stats(&self) -> &IoStats {
        self.ssd.epoch_stats()
    }

    // ---------------------------------------------------------------
    // Public load surface
    // ---------------------------------------------------------------

    /// Load the edge lists of `vid` into DRAM. A dense vertex loads all
    /// of its spanning blocks; `cb` is attached to the last one.
    pub fn load_edge_list_to_dram(&mut self, vid: Vid, cb: Callback) -> Result<bool, DataError> {
        if vid >= self.graph.global().nverts {
            return Err(DataError::VertexOutOfRange(vid));
        }
        if let Some(dvert) = self.graph.dense_vertex_metadata(vid).copied() {
            for bid in dvert.blo..dvert.blo + dvert.nblocks - 1 {
                self.load_edge_block_to_dram(bid, Box::new(|| {}))?;
            }
            self.load_edge_block_to_dram(dvert.blo + dvert.nblocks - 1, cb)
        } else {
            let bid = self
                .graph
                .binary_search_block(vid)
                .ok_or(DataError::VertexOutOfRange(vid))?;
            self.load_edge_block_to_dram(bid, cb)
        }
    }

    /// Load one structure block into DRAM through both stages. `true`
    /// means accepted (the callback fires exactly once, possibly before
    /// this returns); `false` means deferred behind the chip's pending
    /// queue, still firing exactly once later.
    pub fn load_edge_block_to_dram(&mut self, bid: Bid, cb: Callback) -> Result<bool, DataError> {
        if bid >= self.graph.global().nblocks {
            return Err(DataError::BlockOutOfRange(bid));
        }
        match self.admit_edge_page_load(bid, PageRegHook::EdgeToDram { bid, cb }, false) {
            Ok(accepted) => Ok(accepted),
            Err(_) => unreachable!("first admission never hands the hook back"),
        }
    }

    /// Load one input feature vector into DRAM through both stages.
    pub fn load_node_feature_to_dram(
        &mut self,
        feature: &NodeFeature,
        cb: Callback,
    ) -> Result<bool, DataError> {
        if !feature.is_input() {
            return Err(DataError::NotInputFeature { vid: feature.vid });
        }
        if feature.vid >= self.graph.global().nverts {
            return Err(DataError::VertexOutOfRange(feature.vid));
        }
        let hook = PageRegHook::FeatureToDram { feature: *feature, cb };
        match self.admit_feature_page_load(*feature, hook, false) {
            Ok(accepted) => Ok(accepted),
            Err(_) => unreachable!("first admission never hands the hook back"),
        }
    }

    pub fn aggregate(&mut self, cb: Callback) {
        let now = self.ssd.cycle();
        self.compute.aggregate(now, cb);
    }

    pub fn combine(&mut self, cb: Callback) {
        let now = self.ssd.cycle();
        self.compute.combine(now, cb);
    }

    // ---------------------------------------------------------------
    // Clock surface
    // ---------------------------------------------------------------

    pub fn next_event_firetime(&self) -> Option<Cycle> {
        match (self.ssd.next_event_firetime(), self.compute.next_firetime()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (device, None) => device,
            (None, compute) => compute,
        }
    }

    /// Jump to one cycle before the next event and tick across it.
    pub fn skip_to_next_event(&mut self) {
        let Some(fire) = self.next_event_firetime() else {
            return;
        };
        self.ssd.set_cycle(fire - 1);
        self.tick();
    }

    pub fn pending_reqs_empty(&self) -> bool {
        self.pending_flash_reads.iter().all(IndexedList::is_empty)
            && self.pending_channel_transfers.is_empty()
    }

    pub fn active_reqs_empty(&self) -> bool {
        self.active_flash_reads.iter().all(IndexedList::is_empty)
            && self.active_channel_transfers.is_empty()
    }

    // ---------------------------------------------------------------
    // Residency queries
    // ---------------------------------------------------------------

    pub fn vid_to_vgroupid(&self, vid: Vid) -> VGroupId {
        self.nftl.group_of(vid)
    }

    pub fn vid_to_chipid(&self, vid: Vid) -> u32 {
        self.nftl.chip_of(self.nftl.group_of(vid))
    }

    /// True when the feature's group page sits stable in its chip's page
    /// register; a load issued now would complete synchronously.
    pub fn node_feature_in_page_reg(&self, feature: &NodeFeature) -> bool {
        if !feature.is_input() {
            return false;
        }
        let group = self.nftl.group_of(feature.vid);
        let chip = self.nftl.chip_of(group);
        self.nftl.page_regs[chip as usize].resident(group)
    }

    /// Log the epoch counters and reset them.
    pub fn end_epoch(&mut self) {
        info!(
            target: "data",
            bytes_loaded = self.gstl.stats.bytes_loaded,
            "epoch structure stats"
        );
        info!(
            target: "data",
            coalesced_hits = self.nftl.stats.coalesced_hits,
            page_reg_hits = self.nftl.stats.page_reg_hits,
            page_reg_misses = self.nftl.stats.page_reg_misses,
            flash_bytes = self.nftl.stats.bytes_loaded_from_flash,
            bus_bytes = self.nftl.stats.bytes_over_channel_bus,
            "epoch feature stats"
        );
        self.gstl.stats = StructureStats::default();
        self.nftl.stats = FeatureStats::default();
        self.ssd.end_epoch();
    }

    // ---------------------------------------------------------------
    // Stage 1: flash array -> page register
    // ---------------------------------------------------------------

    fn admit_edge_page_load(
        &mut self,
        bid: Bid,
        after: PageRegHook,
        re_enter: bool,
    ) -> Result<bool, PageRegHook> {
        let chip = self.gstl.chip_of(bid);
        let tag = ChunkTag::EdgeList { bid };
        let reg = &self.gstl.page_regs[chip as usize];

        if reg.resident(bid) {
            trace!(target: "data", bid, chip, "edge page resident");
            self.run_page_reg_hook(after);
            return Ok(true);
        }
        if let Some(entry) = self.active_flash_reads[chip as usize].get_mut(&tag) {
            trace!(target: "data", bid, chip, "edge page load joined");
            entry.hooks.push(after);
            return Ok(true);
        }
        if reg.refs > 0 || reg.loading() {
            if re_enter {
                return Err(after);
            }
            trace!(target: "data", bid, chip, "edge page load deferred");
            self.enqueue_pending_flash_read(chip, tag, PendingHook::EdgePageLoad { bid, after });
            return Ok(false);
        }

        let addrs = self.gstl.block_addrs(bid);
        let bytes = self.ssd.device().topology.page_capacity;
        self.active_flash_reads[chip as usize].push_back(tag, ActiveEntry { hooks: vec![after] });
        self.gstl.page_regs[chip as usize].next = Some(bid);
        self.ssd.send_req(SsdRequest {
            kind: SsdRequestKind::ReadLocal,
            addrs,
            bytes,
            completion: Completion::EdgePageLoad { chip, tag },
        });
        Ok(true)
    }

    fn admit_feature_page_load(
        &mut self,
        feature: NodeFeature,
        after: PageRegHook,
        re_enter: bool,
    ) -> Result<bool, PageRegHook> {
        debug_assert!(feature.is_input());
        let group = self.nftl.group_of(feature.vid);
        let chip = self.nftl.chip_of(group);
        let tag = ChunkTag::NodeFeatureGroup { group };
        let reg = &self.nftl.page_regs[chip as usize];

        if reg.resident(group) {
            trace!(target: "data", vid = feature.vid, group, chip, "feature page resident");
            self.nftl.stats.page_reg_hits += 1;
            self.run_page_reg_hook(after);
            return Ok(true);
        }
        if let Some(entry) = self.active_flash_reads[chip as usize].get_mut(&tag) {
            trace!(target: "data", vid = feature.vid, group, chip, "feature page load joined");
            self.nftl.stats.coalesced_hits += 1;
            entry.hooks.push(after);
            return Ok(true);
        }
        if reg.refs > 0 || reg.loading() {
            if re_enter {
                return Err(after);
            }
            trace!(target: "data", vid = feature.vid, group, chip, "feature page load deferred");
            self.enqueue_pending_flash_read(
                chip,
                tag,
                PendingHook::FeaturePageLoad { feature, after },
            );
            return Ok(false);
        }

        self.nftl.stats.page_reg_misses += 1;
        let addrs = self.nftl.group_addrs(group);
        let bytes = self.ssd.device().topology.page_capacity;
        self.active_flash_reads[chip as usize].push_back(tag, ActiveEntry { hooks: vec![after] });
        self.nftl.page_regs[chip as usize].next = Some(group);
        self.ssd.send_req(SsdRequest {
            kind: SsdRequestKind::ReadLocal,
            addrs,
            bytes,
            completion: Completion::FeaturePageLoad { chip, tag },
        });
        Ok(true)
    }

    // ---------------------------------------------------------------
    // Stage 2: page register -> DRAM
    // ---------------------------------------------------------------

    fn admit_edge_pull(
        &mut self,
        bid: Bid,
        cb: Callback,
        re_enter: bool,
    ) -> Result<bool, Callback> {
        let chip = self.gstl.chip_of(bid);
        let tag = ChunkTag::EdgeList { bid };
        let reg = &mut self.gstl.page_regs[chip as usize];
        assert!(
            reg.resident(bid),
            "block {bid} left page register {chip} before its transfer"
        );
        if !re_enter {
            reg.refs += 1;
        }
        let block_size = u64::from(self.graph.global().block_size);

        if let Some(entry) = self.active_channel_transfers.get_mut(&tag) {
            trace!(target: "data", bid, chip, "edge transfer joined");
            entry.hooks.push(ChannelHook::ReleaseEdgeRef { bid, chip });
            entry.hooks.push(ChannelHook::User(cb));
            return Ok(true);
        }
        if self.buffer_used + block_size > self.buffer_capacity {
            if re_enter {
                return Err(cb);
            }
            trace!(target: "data", bid, chip, "edge transfer deferred, buffer full");
            self.enqueue_pending_channel_transfer(tag, PendingHook::EdgePull { bid, cb });
            return Ok(false);
        }

        let addrs = self.gstl.block_addrs(bid);
        self.active_channel_transfers
            .push_back(tag, ChannelEntry { hooks: vec![ChannelHook::User(cb)] });
        self.buffer_used += block_size;
        self.ssd.send_req(SsdRequest {
            kind: SsdRequestKind::Pull,
            addrs,
            bytes: block_size as u32,
            completion: Completion::EdgePull { bid, chip, tag },
        });
        Ok(true)
    }

    fn admit_feature_pull(
        &mut self,
        feature: NodeFeature,
        cb: Callback,
        re_enter: bool,
    ) -> Result<bool, Callback> {
        debug_assert!(feature.is_input());
        let group = self.nftl.group_of(feature.vid);
        let chip = self.nftl.chip_of(group);
        let tag = ChunkTag::NodeFeature { feature, group };
        let reg = &mut self.nftl.page_regs[chip as usize];
        // The resident group page must cover the requested vertex.
        assert!(
            reg.resident(group),
            "group {group} left page register {chip} before its transfer"
        );
        if !re_enter {
            reg.refs += 1;
        }
        let size = u64::from(self.nftl.feature_size);

        if let Some(entry) = self.active_channel_transfers.get_mut(&tag) {
            trace!(target: "data", vid = feature.vid, chip, "feature transfer joined");
            self.nftl.stats.coalesced_hits += 1;
            entry.hooks.push(ChannelHook::ReleaseFeatureRef { group, chip });
            entry.hooks.push(ChannelHook::User(cb));
            return Ok(true);
        }
        if self.buffer_used + size > self.buffer_capacity {
            if re_enter {
                return Err(cb);
            }
            trace!(target: "data", vid = feature.vid, chip, "feature transfer deferred, buffer full");
            self.enqueue_pending_channel_transfer(tag, PendingHook::FeaturePull { feature, cb });
            return Ok(false);
        }

        let addrs = self.nftl.group_addrs(group);
        self.active_channel_transfers
            .push_back(tag, ChannelEntry { hooks: vec![ChannelHook::User(cb)] });
        self.buffer_used += size;
        self.ssd.send_req(SsdRequest {
            kind: SsdRequestKind::Pull,
            addrs,
            bytes: size as u32,
            completion: Completion::FeaturePull { group, chip, tag },
        });
        Ok(true)
    }

    // ---------------------------------------------------------------
    // Hook and completion dispatch
    // ---------------------------------------------------------------

    fn run_page_reg_hook(&mut self, hook: PageRegHook) {
        match hook {
            PageRegHook::User(cb) => cb(),
            PageRegHook::EdgeToDram { bid, cb } => {
                if self.admit_edge_pull(bid, cb, false).is_err() {
                    unreachable!("first admission never hands the callback back");
                }
            }
            PageRegHook::FeatureToDram { feature, cb } => {
                if self.admit_feature_pull(feature, cb, false).is_err() {
                    unreachable!("first admission never hands the callback back");
                }
            }
        }
    }

    fn run_channel_hook(&mut self, hook: ChannelHook) {
        match hook {
            ChannelHook::User(cb) => cb(),
            ChannelHook::ReleaseEdgeRef { bid, chip } => self.release_edge_ref(bid, chip),
            ChannelHook::ReleaseFeatureRef { group, chip } => {
                self.release_feature_ref(group, chip)
            }
        }
    }

    fn release_edge_ref(&mut self, bid: Bid, chip: u32) {
        let reg = &mut self.gstl.page_regs[chip as usize];
        assert!(reg.resident(bid), "block {bid} not resident at ref release");
        assert!(reg.refs > 0, "ref underflow on chip {chip}");
        reg.refs -= 1;
    }

    fn release_feature_ref(&mut self, group: VGroupId, chip: u32) {
        let reg = &mut self.nftl.page_regs[chip as usize];
        assert!(reg.resident(group), "group {group} not resident at ref release");
        assert!(reg.refs > 0, "ref underflow on chip {chip}");
        reg.refs -= 1;
    }

    fn dispatch(&mut self, completion: Completion) {
        match completion {
            Completion::EdgePageLoad { chip, tag } => {
                self.gstl.stats.bytes_loaded += u64::from(self.ssd.device().stripe_bytes());
                let reg = &mut self.gstl.page_regs[chip as usize];
                assert!(reg.next.is_some(), "page load landed with no load in progress");
                reg.curr = reg.next.take();
                // Entry comes out before its hooks run: a same-tag load
                // issued from a hook must see the resident register, not
                // a dying entry.
                let entry = self.active_flash_reads[chip as usize]
                    .erase(&tag)
                    .expect("no active entry for a landed page load");
                for hook in entry.hooks {
                    self.run_page_reg_hook(hook);
                }
            }
            Completion::FeaturePageLoad { chip, tag } => {
                self.nftl.stats.bytes_loaded_from_flash +=
                    u64::from(self.ssd.device().stripe_bytes());
                let reg = &mut self.nftl.page_regs[chip as usize];
                assert!(reg.next.is_some(), "page load landed with no load in progress");
                reg.curr = reg.next.take();
                let entry = self.active_flash_reads[chip as usize]
                    .erase(&tag)
                    .expect("no active entry for a landed page load");
                for hook in entry.hooks {
                    self.run_page_reg_hook(hook);
                }
            }
            Completion::EdgePull { bid, chip, tag } => {
                self.buffer_used -= u64::from(self.graph.global().block_size);
                self.release_edge_ref(bid, chip);
                let entry = self
                    .active_channel_transfers
                    .erase(&tag)
                    .expect("no active entry for a landed transfer");
                for hook in entry.hooks {
                    self.run_channel_hook(hook);
                }
                self.flush_pending_channel_transfers();
                self.flush_pending_flash_reads(chip);
            }
            Completion::FeaturePull { group, chip, tag } => {
                let size = u64::from(self.nftl.feature_size);
                self.buffer_used -= size;
                self.nftl.stats.bytes_over_channel_bus += size;
                self.release_feature_ref(group, chip);
                let entry = self
                    .active_channel_transfers
                    .erase(&tag)
                    .expect("no active entry for a landed transfer");
                for hook in entry.hooks {
                    self.run_channel_hook(hook);
                }
                self.flush_pending_channel_transfers();
                self.flush_pending_flash_reads(chip);
            }
        }
    }

    // ---------------------------------------------------------------
    // Pending queues
    // ---------------------------------------------------------------

    fn enqueue_pending_flash_read(&mut self, chip: u32, tag: ChunkTag, hook: PendingHook) {
        match self.pending_flash_reads[chip as usize].get_mut(&tag) {
            Some(entry) => entry.hooks.push(hook),
            None => self.pending_flash_reads[chip as usize]
                .push_back(tag, PendingEntry { hooks: vec![hook] }),
        }
    }

    fn enqueue_pending_channel_transfer(&mut self, tag: ChunkTag, hook: PendingHook) {
        match self.pending_channel_transfers.get_mut(&tag) {
            Some(entry) => entry.hooks.push(hook),
            None => self
                .pending_channel_transfers
                .push_back(tag, PendingEntry { hooks: vec![hook] }),
        }
    }

    fn retry_pending(&mut self, hook: PendingHook) -> Result<(), PendingHook> {
        match hook {
            PendingHook::EdgePageLoad { bid, after } => self
                .admit_edge_page_load(bid, after, true)
                .map(|_| ())
                .map_err(|after| PendingHook::EdgePageLoad { bid, after }),
            PendingHook::FeaturePageLoad { feature, after } => self
                .admit_feature_page_load(feature, after, true)
                .map(|_| ())
                .map_err(|after| PendingHook::FeaturePageLoad { feature, after }),
            PendingHook::EdgePull { bid, cb } => self
                .admit_edge_pull(bid, cb, true)
                .map(|_| ())
                .map_err(|cb| PendingHook::EdgePull { bid, cb }),
            PendingHook::FeaturePull { feature, cb } => self
                .admit_feature_pull(feature, cb, true)
                .map(|_| ())
                .map_err(|cb| PendingHook::FeaturePull { feature, cb }),
        }
    }

    /// Drain one pending queue front to back. Hooks of one entry are all
    /// or nothing: if the leading hook cannot be re-admitted the entry
    /// goes back intact and the drain stops; once one hook succeeds the
    /// rest must too, since the freed resource cannot regress while the
    /// entry drains.
    fn flush_pending_flash_reads(&mut self, chip: u32) {
        loop {
            let Some((tag, entry)) = self.pending_flash_reads[chip as usize].pop_front() else {
                break;
            };
            let total = entry.hooks.len();
            let mut hooks = entry.hooks.into_iter();
            let mut done = 0usize;
            let mut stalled = None;
            for hook in &mut hooks {
                match self.retry_pending(hook) {
                    Ok(()) => done += 1,
                    Err(back) => {
                        stalled = Some(back);
                        break;
                    }
                }
            }
            if done == 0 {
                let hooks: Vec<PendingHook> = stalled.into_iter().chain(hooks).collect();
                self.pending_flash_reads[chip as usize]
                    .push_front(tag, PendingEntry { hooks });
                break;
            }
            assert!(
                done == total && stalled.is_none(),
                "pending flash reads drained partially"
            );
        }
    }

    fn flush_pending_channel_transfers(&mut self) {
        loop {
            let Some((tag, entry)) = self.pending_channel_transfers.pop_front() else {
                break;
            };
            let total = entry.hooks.len();
            let mut hooks = entry.hooks.into_iter();
            let mut done = 0usize;
            let mut stalled = None;
            for hook in &mut hooks {
                match self.retry_pending(hook) {
                    Ok(()) => done += 1,
                    Err(back) => {
                        stalled = Some(back);
                        break;
                    }
                }
            }
            if done == 0 {
                let hooks: Vec<PendingHook> = stalled.into_iter().chain(hooks).collect();
                self.pending_channel_transfers
                    .push_front(tag, PendingEntry { hooks });
                break;
            }
            assert!(
                done == total && stalled.is_none(),
                "pending channel transfers drained partially"
            );
        }
    }

    // ---------------------------------------------------------------
    // Self-checks
    // ---------------------------------------------------------------

    /// Verify the quiescent-point invariants; panics on violation. Meant
    /// for tests and debug harnesses at tick boundaries.
    pub fn check_invariants(&self) {
        for (chip, active) in self.active_flash_reads.iter().enumerate() {
            let mut edge_loads = 0u32;
            let mut group_loads = 0u32;
            for (tag, _) in active.iter() {
                match tag {
                    ChunkTag::EdgeList { bid } => {
                        edge_loads += 1;
                        assert_eq!(
                            self.gstl.page_regs[chip].next,
                            Some(*bid),
                            "active edge read does not match the register"
                        );
                    }
                    ChunkTag::NodeFeatureGroup { group } => {
                        group_loads += 1;
                        assert_eq!(
                            self.nftl.page_regs[chip].next,
                            Some(*group),
                            "active group read does not match the register"
                        );
                    }
                    ChunkTag::NodeFeature { .. } => {
                        panic!("per-vertex tag in a flash read table")
                    }
                }
            }
            assert!(edge_loads <= 1, "two edge reads in flight on chip {chip}");
            assert!(group_loads <= 1, "two group reads in flight on chip {chip}");
            assert_eq!(self.gstl.page_regs[chip].next.is_some(), edge_loads == 1);
            assert_eq!(self.nftl.page_regs[chip].next.is_some(), group_loads == 1);
            for (tag, _) in self.pending_flash_reads[chip].iter() {
                assert!(!active.hit(tag), "tag both active and pending");
            }
        }

        let mut reserved = 0u64;
        for (tag, _) in self.active_channel_transfers.iter() {
            assert!(
                !self.pending_channel_transfers.hit(tag),
                "tag both active and pending"
            );
            reserved += match tag {
                ChunkTag::EdgeList { .. } => u64::from(self.graph.global().block_size),
                ChunkTag::NodeFeature { .. } => u64::from(self.nftl.feature_size),
                ChunkTag::NodeFeatureGroup { .. } => {
                    panic!("group tag in the transfer table")
                }
            };
        }
        assert_eq!(self.buffer_used, reserved, "buffer accounting drifted");
        assert!(self.buffer_used <= self.buffer_capacity, "buffer overcommitted");
    }
}

impl Module for DataManager {
    /// Advance the device one cycle, route its completions, then drain
    /// the compute queues due at the new cycle.
    fn tick(&mut self) {
        self.ssd.tick();
        for completion in self.ssd.take_completions() {
            self.dispatch(completion);
        }
        for cb in self.compute.drain_due(self.ssd.cycle()) {
            cb();
        }
    }

    fn busy(&self) -> bool {
        self.ssd.busy()
            || !self.pending_reqs_empty()
            || !self.active_reqs_empty()
            || !self.compute.is_empty()
    }

    fn cycle(&self) -> Cycle {
        self.ssd.cycle()
    }

    fn set_cycle(&mut self, cycle: Cycle) {
        self.ssd.set_cycle(cycle);
    }
}
