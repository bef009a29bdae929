//! The controller: array transaction scheduling plus the per-channel
//! byte-rate bus model.

use crate::addr::{FlashAddress, SsdRequest, SsdRequestKind};
use crate::stats::IoStats;
use core_config::DeviceConfig;
use core_sim::{Cycle, Engine, Module, ObjectId};
use std::collections::VecDeque;
use tracing::{debug, trace};

const EV_ARRAY: u32 = 0;
const EV_BUS: u32 = 1;

#[derive(Debug)]
enum CtrlEvent {
    FlashDone { slot: u32 },
    ChannelBusy { channel: u32 },
    ChannelIdle { channel: u32 },
}

/// An array transaction in flight; resolved when its end event fires.
struct FlashTrans<C> {
    completion: C,
    channel: u32,
    chip: u32,
    traffic: u64,
    write: bool,
}

/// A PULL/PUSH transfer queued on a channel. `bytes_to_trans` is
/// fractional: a tick may move part of the head transfer and carry the
/// remainder over.
struct BusReq<C> {
    bytes_to_trans: f64,
    board_to_chip: bool,
    completion: C,
}

struct Channel<C> {
    queue: VecDeque<BusReq<C>>,
    /// Raised while an array transaction holds the bus; pauses the drain.
    busy: bool,
    /// Array transfer windows serialize per channel.
    flash_busy_until: Cycle,
    board_to_chip_bytes: f64,
    chip_to_board_bytes: f64,
    object: ObjectId,
}

struct Chip {
    busy_until: Cycle,
    object: ObjectId,
}

pub struct FlashController<C> {
    device: DeviceConfig,
    bytes_per_cycle: f64,
    cycle: Cycle,
    last_cycle: Cycle,
    engine: Engine<CtrlEvent>,
    channels: Vec<Channel<C>>,
    chips: Vec<Chip>,
    flash_slots: Vec<Option<FlashTrans<C>>>,
    flash_free: Vec<u32>,
    completed: Vec<C>,
    epoch: IoStats,
    lifetime: IoStats,
}

impl<C> FlashController<C> {
    pub fn new(device: DeviceConfig) -> Self {
        let mut engine = Engine::new();
        let channels = (0..device.topology.channels)
            .map(|c| Channel {
                queue: VecDeque::new(),
                busy: false,
                flash_busy_until: 0,
                board_to_chip_bytes: 0.0,
                chip_to_board_bytes: 0.0,
                object: engine.add_object(format!("channel{c}")),
            })
            .collect();
        let chips = (0..device.topology.channels)
            .flat_map(|c| (0..device.topology.chips_per_channel).map(move |k| (c, k)))
            .map(|(c, k)| Chip {
                busy_until: 0,
                object: engine.add_object(format!("channel{c}.chip{k}")),
            })
            .collect();
        Self {
            bytes_per_cycle: device.bytes_per_cycle(),
            cycle: 0,
            last_cycle: 0,
            engine,
            channels,
            chips,
            flash_slots: Vec::new(),
            flash_free: Vec::new(),
            completed: Vec::new(),
            epoch: IoStats::new(
                device.topology.channels as usize,
                device.topology.chips_per_channel as usize,
            ),
            lifetime: IoStats::new(
                device.topology.channels as usize,
                device.topology.chips_per_channel as usize,
            ),
            device,
        }
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    pub fn bytes_per_cycle(&self) -> f64 {
        self.bytes_per_cycle
    }

    pub fn check_addr(&self, addr: &FlashAddress) -> bool {
        let t = &self.device.topology;
        addr.channel < t.channels
            && addr.chip < t.chips_per_channel
            && addr.die < t.dies_per_chip
            && addr.plane < t.planes_per_die
            && addr.block < t.blocks_per_plane
            && addr.page < t.pages_per_block
    }

    /// Accept a request. Addresses outside the geometry are a caller bug.
    /// Zero-byte requests complete at the next tick without touching the
    /// device.
    pub fn send_req(&mut self, req: SsdRequest<C>) {
        assert!(!req.addrs.is_empty(), "request without addresses");
        for addr in &req.addrs {
            assert!(self.check_addr(addr), "address out of range: {addr}");
        }
        if req.bytes == 0 {
            self.completed.push(req.completion);
            return;
        }
        if req.kind.is_array_op() {
            self.submit_array(req);
        } else {
            self.submit_bus(req);
        }
    }

    /// Completion tokens of every request resolved so far, in completion
    /// order.
    pub fn take_completions(&mut self) -> Vec<C> {
        std::mem::take(&mut self.completed)
    }

    pub fn is_event_tree_empty(&self) -> bool {
        self.engine.is_event_tree_empty() && self.channels.iter().all(|c| c.queue.is_empty())
    }

    /// Earliest cycle at which anything resolves. Only meaningful at a
    /// tick boundary.
    pub fn next_event_firetime(&self) -> Option<Cycle> {
        assert_eq!(self.cycle, self.last_cycle, "queried mid-tick");
        let mut firetime = self.engine.next_event_firetime();
        for channel in &self.channels {
            if channel.busy {
                continue;
            }
            if let Some(head) = channel.queue.front() {
                let latency = (head.bytes_to_trans / self.bytes_per_cycle).ceil().max(1.0);
                let complete = self.cycle + latency as Cycle;
                firetime = Some(firetime.map_or(complete, |f| f.min(complete)));
            }
        }
        if let Some(fire) = firetime {
            assert!(fire > self.cycle, "stale event in the past");
        }
        firetime
    }

    pub fn epoch_stats(&self) -> &IoStats {
        &self.epoch
    }

    pub fn lifetime_stats(&self) -> &IoStats {
        &self.lifetime
    }

    /// Fold the epoch counters into the lifetime totals, log the epoch
    /// snapshot, and reset for the next epoch.
    pub fn end_epoch(&mut self) {
        self.lifetime.absorb(&self.epoch);
        for (ci, channel) in self.epoch.channels.iter().enumerate() {
            debug!(
                target: "flash",
                channel = ci,
                bus_traffic = channel.bus_traffic,
                reads = channel.chips.iter().map(|c| c.read_count).sum::<u64>(),
                writes = channel.chips.iter().map(|c| c.write_count).sum::<u64>(),
                "epoch channel io"
            );
        }
        self.epoch.reset();
    }

    fn chip_index(&self, channel: u32, chip: u32) -> usize {
        (channel * self.device.topology.chips_per_channel + chip) as usize
    }

    fn alloc_slot(&mut self, trans: FlashTrans<C>) -> u32 {
        match self.flash_free.pop() {
            Some(slot) => {
                self.flash_slots[slot as usize] = Some(trans);
                slot
            }
            None => {
                self.flash_slots.push(Some(trans));
                (self.flash_slots.len() - 1) as u32
            }
        }
    }

    fn submit_array(&mut self, req: SsdRequest<C>) {
        let channel = req.addrs[0].channel;
        let chip = req.addrs[0].chip;
        let write = req.kind.is_write();
        let topo = self.device.topology;
        // Pages per plane; each page row costs one array latency.
        let rows = ((req.bytes - 1) / topo.page_capacity + 1) as u64;
        let per_row = if write {
            self.device.timing.program_latency
        } else {
            self.device.timing.read_latency
        };
        let array_time = rows * per_row;
        let traffic = req.bytes as u64 * req.addrs.len() as u64;

        let slot = self.alloc_slot(FlashTrans {
            completion: req.completion,
            channel,
            chip,
            traffic,
            write,
        });
        let chip_idx = self.chip_index(channel, chip);
        let chip_obj = self.chips[chip_idx].object;
        let chan_obj = self.channels[channel as usize].object;
        let chip_free = self.chips[chip_idx].busy_until.max(self.cycle);

        let done = if req.kind.is_local() {
            let done = chip_free + array_time;
            self.engine
                .register_event(done, chip_obj, EV_ARRAY, CtrlEvent::FlashDone { slot });
            done
        } else {
            let xfer = ((traffic as f64 / self.bytes_per_cycle).ceil() as Cycle).max(1);
            let window_end = self.channels[channel as usize].flash_busy_until;
            let (start, done) = if write {
                // Bus transfer into the chip, then the program.
                let start = chip_free.max(window_end);
                (start, start + xfer + array_time)
            } else {
                // Array read, then the transfer out to the board.
                let start = (chip_free + array_time).max(window_end);
                (start, start + xfer)
            };
            self.channels[channel as usize].flash_busy_until = start + xfer;
            if start > self.cycle {
                self.engine
                    .register_event(start, chan_obj, EV_BUS, CtrlEvent::ChannelBusy { channel });
            } else {
                // The window opens on the current cycle: raise the flag
                // without a detour through the event tree.
                let chan = &mut self.channels[channel as usize];
                assert!(!chan.busy, "channel raised busy twice");
                chan.busy = true;
            }
            self.engine.register_event(
                start + xfer,
                chan_obj,
                EV_BUS,
                CtrlEvent::ChannelIdle { channel },
            );
            self.engine
                .register_event(done, chip_obj, EV_ARRAY, CtrlEvent::FlashDone { slot });
            done
        };
        self.chips[chip_idx].busy_until = done;
        trace!(
            target: "flash",
            channel,
            chip,
            bytes = req.bytes,
            planes = req.addrs.len(),
            write,
            done,
            "array transaction submitted"
        );
    }

    fn submit_bus(&mut self, req: SsdRequest<C>) {
        let channel = req.addrs[0].channel;
        let board_to_chip = req.kind == SsdRequestKind::Push;
        let chan = &mut self.channels[channel as usize];
        if board_to_chip {
            chan.board_to_chip_bytes += req.bytes as f64;
        } else {
            chan.chip_to_board_bytes += req.bytes as f64;
        }
        chan.queue.push_back(BusReq {
            bytes_to_trans: req.bytes as f64,
            board_to_chip,
            completion: req.completion,
        });
        trace!(
            target: "flash",
            channel,
            bytes = req.bytes,
            board_to_chip,
            depth = chan.queue.len(),
            "bus transfer queued"
        );
    }
}

impl<C> Module for FlashController<C> {
    fn tick(&mut self) {
        self.cycle += 1;
        self.engine.set_sim_time(self.cycle);

        for event in self.engine.fire_due() {
            match event.payload {
                CtrlEvent::FlashDone { slot } => {
                    let trans = self.flash_slots[slot as usize]
                        .take()
                        .expect("flash slot already resolved");
                    self.flash_free.push(slot);
                    let stats = &mut self.epoch.channels[trans.channel as usize].chips
                        [trans.chip as usize];
                    if trans.write {
                        stats.write_count += 1;
                        stats.write_traffic += trans.traffic;
                    } else {
                        stats.read_count += 1;
                        stats.read_traffic += trans.traffic;
                    }
                    self.completed.push(trans.completion);
                }
                CtrlEvent::ChannelBusy { channel } => {
                    let chan = &mut self.channels[channel as usize];
                    assert!(!chan.busy, "channel raised busy twice");
                    chan.busy = true;
                }
                CtrlEvent::ChannelIdle { channel } => {
                    let chan = &mut self.channels[channel as usize];
                    assert!(chan.busy, "channel idled while idle");
                    chan.busy = false;
                }
            }
        }

        // Byte-rate drain: credit the whole gap since the last tick to
        // each channel that is not carrying array traffic right now.
        let budget_per_channel = (self.cycle - self.last_cycle) as f64 * self.bytes_per_cycle;
        let epoch = &mut self.epoch;
        let completed = &mut self.completed;
        for (ci, chan) in self.channels.iter_mut().enumerate() {
            if chan.busy {
                continue;
            }
            let mut budget = budget_per_channel;
            while let Some(head) = chan.queue.front_mut() {
                if head.bytes_to_trans <= budget {
                    budget -= head.bytes_to_trans;
                    epoch.channels[ci].bus_traffic += head.bytes_to_trans;
                    if head.board_to_chip {
                        chan.board_to_chip_bytes -= head.bytes_to_trans;
                    } else {
                        chan.chip_to_board_bytes -= head.bytes_to_trans;
                    }
                    let req = chan.queue.pop_front().expect("head vanished");
                    completed.push(req.completion);
                } else {
                    head.bytes_to_trans -= budget;
                    epoch.channels[ci].bus_traffic += budget;
                    if head.board_to_chip {
                        chan.board_to_chip_bytes -= budget;
                    } else {
                        chan.chip_to_board_bytes -= budget;
                    }
                    break;
                }
            }
        }

        self.last_cycle = self.cycle;
    }

    fn busy(&self) -> bool {
        !self.is_event_tree_empty() || !self.completed.is_empty()
    }

    fn cycle(&self) -> Cycle {
        self.cycle
    }

    fn set_cycle(&mut self, cycle: Cycle) {
        assert!(cycle >= self.cycle, "clock moved backwards");
        self.cycle = cycle;
        self.engine.set_sim_time(cycle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::AddrVec;
    use pretty_assertions::assert_eq;

    fn small_device() -> DeviceConfig {
        let mut device = DeviceConfig::default();
        device.topology.channels = 2;
        device.topology.chips_per_channel = 2;
        device.topology.planes_per_die = 2;
        device.topology.pages_per_block = 4;
        device.topology.blocks_per_plane = 8;
        device.topology.page_capacity = 512;
        device.timing.read_latency = 100;
        device.timing.program_latency = 400;
        device
    }

    fn addr(channel: u32, chip: u32, plane: u32) -> FlashAddress {
        FlashAddress { channel, chip, die: 0, plane, block: 0, page: 0 }
    }

    fn stripe(channel: u32, chip: u32) -> AddrVec {
        AddrVec::from_iter([addr(channel, chip, 0), addr(channel, chip, 1)])
    }

    fn drive_to_idle(ctrl: &mut FlashController<u32>) -> Vec<(Cycle, u32)> {
        let mut fired = Vec::new();
        let mut guard = 0;
        loop {
            for token in ctrl.take_completions() {
                fired.push((ctrl.cycle(), token));
            }
            if ctrl.is_event_tree_empty() {
                break;
            }
            if let Some(fire) = ctrl.next_event_firetime() {
                ctrl.set_cycle(fire - 1);
            }
            ctrl.tick();
            guard += 1;
            assert!(guard < 10_000, "controller never went idle");
        }
        fired
    }

    #[test]
    fn local_read_costs_array_latency() {
        let mut ctrl: FlashController<u32> = FlashController::new(small_device());
        ctrl.send_req(SsdRequest {
            kind: SsdRequestKind::ReadLocal,
            addrs: stripe(0, 0),
            bytes: 512,
            completion: 1,
        });
        let fired = drive_to_idle(&mut ctrl);
        assert_eq!(fired, vec![(100, 1)]);
        let chip = &ctrl.epoch_stats().channels[0].chips[0];
        assert_eq!(chip.read_count, 1);
        assert_eq!(chip.read_traffic, 2 * 512);
    }

    #[test]
    fn same_chip_transactions_serialize() {
        let mut ctrl: FlashController<u32> = FlashController::new(small_device());
        for token in 0..2 {
            ctrl.send_req(SsdRequest {
                kind: SsdRequestKind::ReadLocal,
                addrs: stripe(0, 0),
                bytes: 512,
                completion: token,
            });
        }
        let fired = drive_to_idle(&mut ctrl);
        assert_eq!(fired, vec![(100, 0), (200, 1)]);
    }

    #[test]
    fn multi_page_payload_splits_into_rows() {
        let mut ctrl: FlashController<u32> = FlashController::new(small_device());
        // 3 pages per plane.
        ctrl.send_req(SsdRequest {
            kind: SsdRequestKind::ReadLocal,
            addrs: stripe(0, 0),
            bytes: 512 * 2 + 1,
            completion: 9,
        });
        let fired = drive_to_idle(&mut ctrl);
        assert_eq!(fired, vec![(300, 9)]);
    }

    #[test]
    fn pull_drains_at_byte_rate() {
        let mut ctrl: FlashController<u32> = FlashController::new(small_device());
        let bytes = 4096u32;
        ctrl.send_req(SsdRequest {
            kind: SsdRequestKind::Pull,
            addrs: stripe(1, 0),
            bytes,
            completion: 5,
        });
        let expected = (bytes as f64 / ctrl.bytes_per_cycle()).ceil() as Cycle;
        assert_eq!(ctrl.next_event_firetime(), Some(expected));
        let fired = drive_to_idle(&mut ctrl);
        assert_eq!(fired, vec![(expected, 5)]);
        let traffic = ctrl.epoch_stats().channels[1].bus_traffic;
        assert!((traffic - bytes as f64).abs() < 1e-6);
    }

    #[test]
    fn queued_pulls_complete_in_order() {
        let mut ctrl: FlashController<u32> = FlashController::new(small_device());
        for token in 0..3 {
            ctrl.send_req(SsdRequest {
                kind: SsdRequestKind::Pull,
                addrs: stripe(0, 1),
                bytes: 1000,
                completion: token,
            });
        }
        let fired = drive_to_idle(&mut ctrl);
        let order: Vec<u32> = fired.iter().map(|&(_, t)| t).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(fired[0].0 < fired[1].0 && fired[1].0 < fired[2].0);
    }

    #[test]
    fn board_read_occupies_the_channel() {
        let mut ctrl: FlashController<u32> = FlashController::new(small_device());
        // Board-bound read: array first, then a bus window.
        ctrl.send_req(SsdRequest {
            kind: SsdRequestKind::Read,
            addrs: stripe(0, 0),
            bytes: 512,
            completion: 1,
        });
        // A concurrent PULL on the same channel must wait out the window.
        ctrl.send_req(SsdRequest {
            kind: SsdRequestKind::Pull,
            addrs: stripe(0, 1),
            bytes: 64,
            completion: 2,
        });
        let fired = drive_to_idle(&mut ctrl);
        assert_eq!(fired.iter().map(|&(_, t)| t).collect::<Vec<_>>(), vec![1, 2]);
        let read_done = fired[0].0;
        let xfer = ((2.0 * 512.0) / ctrl.bytes_per_cycle()).ceil() as Cycle;
        assert_eq!(read_done, 100 + xfer);
        // The pull drain was paused for the whole bus window.
        assert!(fired[1].0 >= read_done);
    }

    #[test]
    fn write_programs_after_the_transfer() {
        let mut ctrl: FlashController<u32> = FlashController::new(small_device());
        ctrl.send_req(SsdRequest {
            kind: SsdRequestKind::Write,
            addrs: stripe(1, 1),
            bytes: 512,
            completion: 7,
        });
        let fired = drive_to_idle(&mut ctrl);
        let xfer = ((2.0 * 512.0) / ctrl.bytes_per_cycle()).ceil() as Cycle;
        assert_eq!(fired, vec![(xfer + 400, 7)]);
        let chip = &ctrl.epoch_stats().channels[1].chips[1];
        assert_eq!(chip.write_count, 1);
        assert_eq!(chip.write_traffic, 2 * 512);
    }

    #[test]
    fn zero_byte_request_completes_immediately() {
        let mut ctrl: FlashController<u32> = FlashController::new(small_device());
        ctrl.send_req(SsdRequest {
            kind: SsdRequestKind::Pull,
            addrs: stripe(0, 0),
            bytes: 0,
            completion: 3,
        });
        assert!(ctrl.busy());
        assert_eq!(ctrl.take_completions(), vec![3]);
        assert!(!ctrl.busy());
    }

    #[test]
    fn epoch_folds_into_lifetime() {
        let mut ctrl: FlashController<u32> = FlashController::new(small_device());
        ctrl.send_req(SsdRequest {
            kind: SsdRequestKind::ReadLocal,
            addrs: stripe(0, 0),
            bytes: 512,
            completion: 0,
        });
        drive_to_idle(&mut ctrl);
        assert_eq!(ctrl.epoch_stats().total_read_traffic(), 1024);
        ctrl.end_epoch();
        assert_eq!(ctrl.epoch_stats().total_read_traffic(), 0);
        assert_eq!(ctrl.lifetime_stats().total_read_traffic(), 1024);
    }

    #[test]
    #[should_panic(expected = "address out of range")]
    fn invalid_address_is_a_bug() {
        let mut ctrl: FlashController<u32> = FlashController::new(small_device());
        ctrl.send_req(SsdRequest {
            kind: SsdRequestKind::ReadLocal,
            addrs: AddrVec::from_iter([addr(9, 0, 0)]),
            bytes: 512,
            completion: 0,
        });
    }
}
