//! Fixed-latency delay queues for the on-device compute units.
//!
//! Aggregation is fully serialized: one unit, one slot after another.
//! Combination runs on parallel lanes; a new job takes an idle lane at
//! full latency, or overlaps behind the lane that frees up first at the
//! per-element latency. Both queues map completion cycle to callback and
//! are drained by the owner's tick.

use crate::types::Callback;
use core_sim::Cycle;
use std::collections::BTreeMap;

/// Width of the systolic PE array in the combiner.
pub const PE_ARRAY_WIDTH: u64 = 128;

pub struct ComputeQueues {
    aggregations: BTreeMap<Cycle, Callback>,
    lanes: Vec<BTreeMap<Cycle, Callback>>,
    aggregator_latency: u64,
    pe_latency: u64,
    combine_latency: u64,
}

impl ComputeQueues {
    pub fn new(aggregator_latency: u64, pe_latency: u64, feature_dim: u32, lanes: usize) -> Self {
        assert!(lanes > 0, "combiner needs at least one lane");
        assert!(aggregator_latency > 0 && pe_latency > 0, "zero compute latency");
        let tiles = (u64::from(feature_dim) - 1) / PE_ARRAY_WIDTH + 1;
        Self {
            aggregations: BTreeMap::new(),
            lanes: (0..lanes).map(|_| BTreeMap::new()).collect(),
            aggregator_latency,
            pe_latency,
            combine_latency: pe_latency * PE_ARRAY_WIDTH * 2 * tiles * tiles,
        }
    }

    pub fn combine_latency(&self) -> u64 {
        self.combine_latency
    }

    /// Queue one aggregation; slots serialize behind the newest one.
    pub fn aggregate(&mut self, now: Cycle, cb: Callback) {
        let base = match self.aggregations.last_key_value() {
            Some((&last, _)) => last.max(now),
            None => now,
        };
        let prev = self.aggregations.insert(base + self.aggregator_latency, cb);
        assert!(prev.is_none(), "aggregator slot collision");
    }

    /// Queue one combination on the lane minimizing projected completion.
    pub fn combine(&mut self, now: Cycle, cb: Callback) {
        let mut chosen = 0usize;
        let mut finish = Cycle::MAX;
        for (i, lane) in self.lanes.iter().enumerate() {
            match lane.last_key_value() {
                // Idle lane (or one that drains before a fresh job would):
                // full combine latency from now.
                None => {
                    chosen = i;
                    finish = now + self.combine_latency;
                    break;
                }
                Some((&last, _)) if last < now + self.combine_latency => {
                    chosen = i;
                    finish = now + self.combine_latency;
                    break;
                }
                // Overlapped behind the lane tail.
                Some((&last, _)) => {
                    let candidate = last + self.pe_latency;
                    if candidate < finish {
                        chosen = i;
                        finish = candidate;
                    }
                }
            }
        }
        let prev = self.lanes[chosen].insert(finish, cb);
        assert!(prev.is_none(), "combiner slot collision");
    }

    /// All callbacks due at or before `now`, in completion-cycle order.
    pub fn drain_due(&mut self, now: Cycle) -> Vec<Callback> {
        let mut due: Vec<(Cycle, usize, Callback)> = Vec::new();
        while self
            .aggregations
            .first_key_value()
            .is_some_and(|(&at, _)| at <= now)
        {
            if let Some((at, cb)) = self.aggregations.pop_first() {
                due.push((at, 0, cb));
            }
        }
        for (li, lane) in self.lanes.iter_mut().enumerate() {
            while lane.first_key_value().is_some_and(|(&at, _)| at <= now) {
                if let Some((at, cb)) = lane.pop_first() {
                    due.push((at, li + 1, cb));
                }
            }
        }
        due.sort_by_key(|&(at, src, _)| (at, src));
        due.into_iter().map(|(_, _, cb)| cb).collect()
    }

    pub fn next_firetime(&self) -> Option<Cycle> {
        let mut firetime = self.aggregations.first_key_value().map(|(&at, _)| at);
        for lane in &self.lanes {
            if let Some((&at, _)) = lane.first_key_value() {
                firetime = Some(firetime.map_or(at, |f| f.min(at)));
            }
        }
        firetime
    }

    pub fn is_empty(&self) -> bool {
        self.aggregations.is_empty() && self.lanes.iter().all(BTreeMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<u32>>>, impl Fn(u32) -> Callback) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let make = {
            let log = Rc::clone(&log);
            move |id: u32| -> Callback {
                let log = Rc::clone(&log);
                Box::new(move || log.borrow_mut().push(id))
            }
        };
        (log, make)
    }

    #[test]
    fn aggregations_serialize() {
        let (log, cb) = recorder();
        let mut queues = ComputeQueues::new(10, 1, 64, 2);
        queues.aggregate(0, cb(0));
        queues.aggregate(0, cb(1));
        queues.aggregate(0, cb(2));
        assert_eq!(queues.next_firetime(), Some(10));
        assert!(queues.drain_due(9).is_empty());
        for cb in queues.drain_due(20) {
            cb();
        }
        assert_eq!(*log.borrow(), vec![0, 1]);
        for cb in queues.drain_due(30) {
            cb();
        }
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(queues.is_empty());
    }

    #[test]
    fn aggregation_after_idle_gap_restarts_from_now() {
        let (_, cb) = recorder();
        let mut queues = ComputeQueues::new(10, 1, 64, 2);
        queues.aggregate(100, cb(0));
        assert_eq!(queues.next_firetime(), Some(110));
        // Still queued: the next slot chains off the tail even though the
        // clock has moved past it in the meantime.
        queues.aggregate(200, cb(1));
        assert_eq!(queues.drain_due(300).len(), 2);
        assert!(queues.is_empty());
    }

    #[test]
    fn combine_takes_idle_lanes_first() {
        let (_, cb) = recorder();
        let mut queues = ComputeQueues::new(10, 1, 128, 2);
        let latency = queues.combine_latency();
        assert_eq!(latency, 256);
        queues.combine(0, cb(0));
        queues.combine(0, cb(1));
        // Both lanes busy until 256; the third job overlaps at pe latency.
        queues.combine(0, cb(2));
        assert_eq!(queues.next_firetime(), Some(256));
        assert_eq!(queues.drain_due(256).len(), 2);
        assert_eq!(queues.next_firetime(), Some(257));
        assert_eq!(queues.drain_due(257).len(), 1);
    }

    #[test]
    fn drain_is_cycle_ordered_across_queues() {
        let (log, cb) = recorder();
        let mut queues = ComputeQueues::new(300, 1, 128, 2);
        // Combine at 256, aggregate at 300, overlapped combine at 257.
        queues.combine(0, cb(0));
        queues.aggregate(0, cb(1));
        queues.combine(0, cb(2));
        queues.combine(0, cb(3));
        for cb in queues.drain_due(1000) {
            cb();
        }
        assert_eq!(*log.borrow(), vec![0, 2, 3, 1]);
    }

    #[test]
    fn tile_count_scales_combine_latency() {
        let one_tile = ComputeQueues::new(1, 2, 128, 1);
        let three_tiles = ComputeQueues::new(1, 2, 300, 1);
        assert_eq!(one_tile.combine_latency(), 2 * 128 * 2);
        // 300 components round up to 3 tiles of 128.
        assert_eq!(three_tiles.combine_latency(), 2 * 128 * 2 * 9);
    }
}
