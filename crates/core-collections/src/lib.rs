//! core-collections: the keyed ordered list behind the request tables.
//!
//! `IndexedList` is an insertion-ordered key -> entry map: a slab of doubly
//! linked nodes, a hash index for O(1) expected `hit`/`get`, and a dense
//! vector of live slots so uniform random selection and eviction are O(1)
//! under a seeded PRNG. Iteration order is list order (front to back), and
//! the ordering mutations (`move_to_front`, `move_to_back`, positional
//! insert) relink nodes without touching the index.
//!
//! Duplicate keys are a caller bug: every insert panics if the key is
//! already present. An optional capacity supports eviction-backed tables
//! (`full` + `kickout_rand`); capacity 0 means unbounded.

use ahash::AHashMap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::hash::Hash;

const NIL: u32 = u32::MAX;

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    prev: u32,
    next: u32,
    // Position in `dense`; kept in sync on every removal.
    dense_pos: u32,
}

#[derive(Debug)]
pub struct IndexedList<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<u32>,
    head: u32,
    tail: u32,
    dense: Vec<u32>,
    index: AHashMap<K, u32>,
    capacity: usize,
    rng: SmallRng,
}

impl<K: Eq + Hash + Clone, V> Default for IndexedList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V> IndexedList<K, V> {
    pub fn new() -> Self {
        Self::with_capacity(0, 0)
    }

    /// `capacity` of 0 disables the bound; `seed` fixes the eviction PRNG.
    pub fn with_capacity(capacity: usize, seed: u64) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            dense: Vec::new(),
            index: AHashMap::new(),
            capacity,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.dense.len(), self.index.len());
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn full(&self) -> bool {
        if self.capacity == 0 {
            return false;
        }
        assert!(self.len() <= self.capacity, "indexed list over capacity");
        self.len() == self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
    }

    pub fn hit(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|&id| &self.node(id).value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let id = *self.index.get(key)?;
        Some(&mut self.node_mut(id).value)
    }

    pub fn push_front(&mut self, key: K, value: V) {
        let id = self.alloc(key, value);
        self.link_front(id);
    }

    pub fn push_back(&mut self, key: K, value: V) {
        let id = self.alloc(key, value);
        self.link_back(id);
    }

    /// Insert immediately before `anchor`, which must be present.
    pub fn insert_before(&mut self, anchor: &K, key: K, value: V) {
        let at = *self
            .index
            .get(anchor)
            .expect("insert_before anchor not present");
        let id = self.alloc(key, value);
        let prev = self.node(at).prev;
        self.node_mut(id).prev = prev;
        self.node_mut(id).next = at;
        self.node_mut(at).prev = id;
        if prev == NIL {
            self.head = id;
        } else {
            self.node_mut(prev).next = id;
        }
    }

    pub fn front(&self) -> Option<(&K, &V)> {
        self.pair(self.head)
    }

    pub fn back(&self) -> Option<(&K, &V)> {
        self.pair(self.tail)
    }

    pub fn front_key(&self) -> Option<&K> {
        self.front().map(|(k, _)| k)
    }

    pub fn pop_front(&mut self) -> Option<(K, V)> {
        let id = self.head;
        if id == NIL {
            return None;
        }
        Some(self.remove_slot(id))
    }

    pub fn pop_back(&mut self) -> Option<(K, V)> {
        let id = self.tail;
        if id == NIL {
            return None;
        }
        Some(self.remove_slot(id))
    }

    pub fn move_to_front(&mut self, key: &K) -> bool {
        let Some(&id) = self.index.get(key) else {
            return false;
        };
        if self.head != id {
            self.unlink(id);
            self.link_front(id);
        }
        true
    }

    pub fn move_to_back(&mut self, key: &K) -> bool {
        let Some(&id) = self.index.get(key) else {
            return false;
        };
        if self.tail != id {
            self.unlink(id);
            self.link_back(id);
        }
        true
    }

    pub fn erase(&mut self, key: &K) -> Option<V> {
        let id = *self.index.get(key)?;
        Some(self.remove_slot(id).1)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.dense.clear();
        self.index.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Uniform random entry. Mutable because it advances the PRNG.
    pub fn get_rand(&mut self) -> Option<(&K, &V)> {
        if self.dense.is_empty() {
            return None;
        }
        let id = self.dense[self.rng.random_range(0..self.dense.len())];
        self.pair(id)
    }

    /// Remove and return a uniformly chosen entry.
    pub fn kickout_rand(&mut self) -> Option<(K, V)> {
        if self.dense.is_empty() {
            return None;
        }
        let id = self.dense[self.rng.random_range(0..self.dense.len())];
        Some(self.remove_slot(id))
    }

    /// Front-to-back iteration in insertion (list) order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter { list: self, at: self.head }
    }

    fn node(&self, id: u32) -> &Node<K, V> {
        self.slots[id as usize].as_ref().expect("stale slot id")
    }

    fn node_mut(&mut self, id: u32) -> &mut Node<K, V> {
        self.slots[id as usize].as_mut().expect("stale slot id")
    }

    fn pair(&self, id: u32) -> Option<(&K, &V)> {
        if id == NIL {
            return None;
        }
        let node = self.node(id);
        Some((&node.key, &node.value))
    }

    fn alloc(&mut self, key: K, value: V) -> u32 {
        assert!(
            !self.index.contains_key(&key),
            "duplicate key in indexed list"
        );
        let node = Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
            dense_pos: self.dense.len() as u32,
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id as usize] = Some(node);
                id
            }
            None => {
                self.slots.push(Some(node));
                (self.slots.len() - 1) as u32
            }
        };
        self.dense.push(id);
        self.index.insert(key, id);
        id
    }

    fn link_front(&mut self, id: u32) {
        let old = self.head;
        self.node_mut(id).prev = NIL;
        self.node_mut(id).next = old;
        if old == NIL {
            self.tail = id;
        } else {
            self.node_mut(old).prev = id;
        }
        self.head = id;
    }

    fn link_back(&mut self, id: u32) {
        let old = self.tail;
        self.node_mut(id).prev = old;
        self.node_mut(id).next = NIL;
        if old == NIL {
            self.head = id;
        } else {
            self.node_mut(old).next = id;
        }
        self.tail = id;
    }

    fn unlink(&mut self, id: u32) {
        let (prev, next) = {
            let node = self.node(id);
            (node.prev, node.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.node_mut(prev).next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.node_mut(next).prev = prev;
        }
    }

    fn remove_slot(&mut self, id: u32) -> (K, V) {
        self.unlink(id);
        let node = self.slots[id as usize].take().expect("stale slot id");
        let pos = node.dense_pos as usize;
        self.dense.swap_remove(pos);
        if pos < self.dense.len() {
            let moved = self.dense[pos];
            self.node_mut(moved).dense_pos = pos as u32;
        }
        self.index.remove(&node.key);
        self.free.push(id);
        (node.key, node.value)
    }
}

pub struct Iter<'a, K, V> {
    list: &'a IndexedList<K, V>,
    at: u32,
}

impl<'a, K: Eq + Hash + Clone, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.at == NIL {
            return None;
        }
        let node = self.list.node(self.at);
        self.at = node.next;
        Some((&node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn keys(list: &IndexedList<u32, u32>) -> Vec<u32> {
        list.iter().map(|(k, _)| *k).collect()
    }

    #[test]
    fn push_preserves_order() {
        let mut list = IndexedList::new();
        list.push_back(1, 10);
        list.push_back(2, 20);
        list.push_front(0, 0);
        assert_eq!(keys(&list), vec![0, 1, 2]);
        assert_eq!(list.front(), Some((&0, &0)));
        assert_eq!(list.front_key(), Some(&0));
        assert_eq!(list.back(), Some((&2, &20)));
    }

    #[test]
    fn hit_and_get() {
        let mut list = IndexedList::new();
        assert!(!list.hit(&7));
        list.push_back(7, 70);
        assert!(list.hit(&7));
        assert_eq!(list.get(&7), Some(&70));
        *list.get_mut(&7).unwrap() += 1;
        assert_eq!(list.get(&7), Some(&71));
    }

    #[test]
    #[should_panic(expected = "duplicate key")]
    fn duplicate_push_panics() {
        let mut list = IndexedList::new();
        list.push_back(1, 1);
        list.push_back(1, 2);
    }

    #[test]
    fn insert_before_anchor() {
        let mut list = IndexedList::new();
        list.push_back(1, 1);
        list.push_back(3, 3);
        list.insert_before(&3, 2, 2);
        list.insert_before(&1, 0, 0);
        assert_eq!(keys(&list), vec![0, 1, 2, 3]);
    }

    #[test]
    fn pops_from_both_ends() {
        let mut list = IndexedList::new();
        for k in 0..4u32 {
            list.push_back(k, k);
        }
        assert_eq!(list.pop_front(), Some((0, 0)));
        assert_eq!(list.pop_back(), Some((3, 3)));
        assert_eq!(keys(&list), vec![1, 2]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn move_relinks_without_losing_entries() {
        let mut list = IndexedList::new();
        for k in 0..4u32 {
            list.push_back(k, k);
        }
        assert!(list.move_to_front(&2));
        assert_eq!(keys(&list), vec![2, 0, 1, 3]);
        assert!(list.move_to_back(&0));
        assert_eq!(keys(&list), vec![2, 1, 3, 0]);
        // Already at the target position: no-op.
        assert!(list.move_to_front(&2));
        assert_eq!(keys(&list), vec![2, 1, 3, 0]);
        assert!(!list.move_to_front(&9));
    }

    #[test]
    fn erase_reuses_slots() {
        let mut list = IndexedList::new();
        for k in 0..3u32 {
            list.push_back(k, k);
        }
        assert_eq!(list.erase(&1), Some(1));
        assert_eq!(list.erase(&1), None);
        list.push_back(5, 5);
        assert_eq!(keys(&list), vec![0, 2, 5]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn capacity_and_full() {
        let mut list = IndexedList::with_capacity(2, 0);
        assert!(!list.full());
        list.push_back(1, 1);
        list.push_back(2, 2);
        assert!(list.full());
        list.kickout_rand();
        assert!(!list.full());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn random_selection_is_deterministic_under_seed() {
        let mut a = IndexedList::with_capacity(0, 42);
        let mut b = IndexedList::new();
        b.set_seed(42);
        for k in 0..16u32 {
            a.push_back(k, k);
            b.push_back(k, k);
        }
        for _ in 0..8 {
            let ka = a.kickout_rand().unwrap().0;
            let kb = b.kickout_rand().unwrap().0;
            assert_eq!(ka, kb);
        }
        assert_eq!(keys(&a), keys(&b));
    }

    #[test]
    fn kickout_drains_to_empty() {
        let mut list = IndexedList::with_capacity(0, 7);
        for k in 0..8u32 {
            list.push_back(k, k);
        }
        let mut seen = Vec::new();
        while let Some((k, _)) = list.kickout_rand() {
            seen.push(k);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
        assert!(list.is_empty());
        assert!(list.get_rand().is_none());
    }

    #[test]
    fn clear_resets() {
        let mut list = IndexedList::new();
        for k in 0..4u32 {
            list.push_back(k, k);
        }
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.front(), None);
        list.push_back(1, 1);
        assert_eq!(keys(&list), vec![1]);
    }
}
