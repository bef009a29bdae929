//! core-sim: the discrete event core under the device models.
//!
//! `Engine` keeps logical time and an ordered tree of scheduled events.
//! Dispatch is pull based: `tick` / `fire_due` hand fired events back to
//! the owner, which routes them by target object and payload. Two events
//! scheduled for the same cycle fire in registration order (sequence
//! number tiebreak), and logical time never moves backwards.
//!
//! `Module` is the shared surface of anything driven by the clock: it can
//! be ticked one cycle at a time, reports whether it still has work, and
//! allows the clock to jump forward between event boundaries.

use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// One tick of the logical clock.
pub type Cycle = u64;

/// A clocked simulation component.
pub trait Module {
    /// Advance one logical cycle and process everything due.
    fn tick(&mut self);
    /// True while any work remains in flight.
    fn busy(&self) -> bool;
    fn cycle(&self) -> Cycle;
    /// Jump the clock forward. Must never move backwards.
    fn set_cycle(&mut self, cycle: Cycle);
}

/// Handle for a registered simulated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

/// Handle for a scheduled event, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u64);

#[derive(Debug)]
pub struct Event<P> {
    pub id: EventId,
    pub fire_at: Cycle,
    pub target: ObjectId,
    pub kind: u32,
    pub payload: P,
}

#[derive(Debug)]
pub struct Engine<P> {
    sim_time: Cycle,
    next_seq: u64,
    next_object: u32,
    events: BTreeMap<(Cycle, u64), Event<P>>,
    by_id: HashMap<EventId, (Cycle, u64)>,
    objects: HashMap<ObjectId, String>,
}

impl<P> Default for Engine<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Engine<P> {
    pub fn new() -> Self {
        Self {
            sim_time: 0,
            next_seq: 0,
            next_object: 0,
            events: BTreeMap::new(),
            by_id: HashMap::new(),
            objects: HashMap::new(),
        }
    }

    pub fn sim_time(&self) -> Cycle {
        self.sim_time
    }

    /// Move the clock forward without firing anything.
    pub fn set_sim_time(&mut self, time: Cycle) {
        assert!(time >= self.sim_time, "logical time moved backwards");
        self.sim_time = time;
    }

    pub fn add_object(&mut self, name: impl Into<String>) -> ObjectId {
        let id = ObjectId(self.next_object);
        self.next_object += 1;
        self.objects.insert(id, name.into());
        id
    }

    pub fn get_object(&self, id: ObjectId) -> Option<&str> {
        self.objects.get(&id).map(String::as_str)
    }

    pub fn remove_object(&mut self, id: ObjectId) -> bool {
        self.objects.remove(&id).is_some()
    }

    /// Schedule `payload` for `target` at `fire_at` (>= current time).
    pub fn register_event(
        &mut self,
        fire_at: Cycle,
        target: ObjectId,
        kind: u32,
        payload: P,
    ) -> EventId {
        assert!(fire_at >= self.sim_time, "event scheduled in the past");
        assert!(
            self.objects.contains_key(&target),
            "event target not registered"
        );
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = EventId(seq);
        self.events.insert(
            (fire_at, seq),
            Event { id, fire_at, target, kind, payload },
        );
        self.by_id.insert(id, (fire_at, seq));
        trace!(target: "engine", fire_at, seq, "event registered");
        id
    }

    /// Cancel a previously registered event. Returns false if it already
    /// fired or was cancelled.
    pub fn ignore_event(&mut self, id: EventId) -> bool {
        match self.by_id.remove(&id) {
            Some(key) => self.events.remove(&key).is_some(),
            None => false,
        }
    }

    pub fn is_event_tree_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn next_event_firetime(&self) -> Option<Cycle> {
        self.events.keys().next().map(|&(fire, _)| fire)
    }

    /// Fire everything due at or before the current time, in (fire, seq)
    /// order.
    pub fn fire_due(&mut self) -> Vec<Event<P>> {
        let mut fired = Vec::new();
        while let Some(&key) = self.events.keys().next() {
            if key.0 > self.sim_time {
                break;
            }
            let event = self.events.remove(&key).expect("event tree out of sync");
            self.by_id.remove(&event.id);
            fired.push(event);
        }
        fired
    }

    /// Advance the clock to the next event's fire time, then fire
    /// everything due.
    pub fn tick(&mut self) -> Vec<Event<P>> {
        if let Some(fire) = self.next_event_firetime()
            && fire > self.sim_time
        {
            self.sim_time = fire;
        }
        self.fire_due()
    }
}
