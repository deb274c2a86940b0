// Hash part of a Lua table: power-of-two buckets of singly linked chains.
//
// Each node caches the hash of its key so a rehash never needs to revive a
// weak key. Removed entries stay in their chain as dead slots until the next
// rehash drops them.

use std::hash::{Hash, Hasher};

use ahash::RandomState;

use crate::lua_value::LuaValue;

use super::WeakMode;
use super::slot::Slot;

pub(crate) struct Node {
    pub(crate) slot: Slot,
    hash: u64,
    next: Option<Box<Node>>,
}

pub(crate) enum SetOutcome {
    Stored,
    /// The key has no slot; the value is handed back for insertion.
    Missing(LuaValue),
}

pub(crate) struct HashPart {
    buckets: Vec<Option<Box<Node>>>,
    nodes: usize,
    dead: usize,
    hasher: RandomState,
}

// Fixed seeds keep traversal order reproducible between runs.
fn table_hasher() -> RandomState {
    RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
}

struct KeyHash<'a>(&'a LuaValue);

impl Hash for KeyHash<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.0 {
            LuaValue::Nil => 0u8.hash(state),
            LuaValue::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            LuaValue::Integer(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            LuaValue::Float(f) => {
                3u8.hash(state);
                f.to_bits().hash(state);
            }
            LuaValue::String(s) => {
                4u8.hash(state);
                s.as_str().hash(state);
            }
            other => {
                5u8.hash(state);
                other.object_id().unwrap_or(0).hash(state);
            }
        }
    }
}

impl HashPart {
    pub fn new(capacity: usize) -> Self {
        let size = if capacity == 0 {
            0
        } else {
            capacity.next_power_of_two()
        };
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, || None);
        HashPart {
            buckets,
            nodes: 0,
            dead: 0,
            hasher: table_hasher(),
        }
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Nodes in the chains, dead ones included.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes
    }

    #[inline]
    pub fn dead_count(&self) -> usize {
        self.dead
    }

    #[inline]
    fn hash_key(&self, key: &LuaValue) -> u64 {
        self.hasher.hash_one(KeyHash(key))
    }

    #[inline]
    fn bucket_of(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    fn find(&self, key: &LuaValue) -> Option<(usize, &Node)> {
        if self.buckets.is_empty() {
            return None;
        }
        let hash = self.hash_key(key);
        let index = self.bucket_of(hash);
        let mut node = self.buckets[index].as_deref();
        while let Some(n) = node {
            if n.hash == hash && n.slot.holds_key(key) {
                return Some((index, n));
            }
            node = n.next.as_deref();
        }
        None
    }

    /// Live value for `key`. A slot whose weak referent is gone reads as
    /// absent but stays in its chain until the next write through that
    /// chain or a rehash reclaims it.
    pub fn get(&self, key: &LuaValue) -> Option<LuaValue> {
        let (_, node) = self.find(key)?;
        node.slot.first().map(|(_, v)| v)
    }

    /// Update or remove an existing entry. Vanished weak entries met along
    /// the chain are turned into dead slots on the way.
    pub fn set_existing(&mut self, key: &LuaValue, value: LuaValue, mode: WeakMode) -> SetOutcome {
        if self.buckets.is_empty() {
            return SetOutcome::Missing(value);
        }
        let hash = self.hash_key(key);
        let index = self.bucket_of(hash);
        let mut cursor = self.buckets[index].as_deref_mut();
        while let Some(node) = cursor {
            if node.slot.is_vanished() {
                node.slot.kill();
                self.dead += 1;
            }
            if node.hash == hash && node.slot.holds_key(key) {
                if value.is_nil() {
                    if !node.slot.is_dead() {
                        node.slot.kill();
                        self.dead += 1;
                    }
                } else if node.slot.is_dead() {
                    node.slot = Slot::new(key.clone(), value, mode);
                    self.dead -= 1;
                } else {
                    node.slot.set_value(value);
                }
                return SetOutcome::Stored;
            }
            cursor = node.next.as_deref_mut();
        }
        SetOutcome::Missing(value)
    }

    /// Length of the chain `key` would be inserted into.
    pub fn chain_len(&self, key: &LuaValue) -> usize {
        if self.buckets.is_empty() {
            return 0;
        }
        let index = self.bucket_of(self.hash_key(key));
        let mut len = 0;
        let mut node = self.buckets[index].as_deref();
        while let Some(n) = node {
            len += 1;
            node = n.next.as_deref();
        }
        len
    }

    /// Add a key that has no slot yet. Buckets must exist.
    pub fn insert(&mut self, key: LuaValue, value: LuaValue, mode: WeakMode) {
        let hash = self.hash_key(&key);
        let index = self.bucket_of(hash);
        let next = self.buckets[index].take();
        self.buckets[index] = Some(Box::new(Node {
            slot: Slot::new(key, value, mode),
            hash,
            next,
        }));
        self.nodes += 1;
    }

    /// First live entry in traversal order.
    pub fn first(&self) -> Option<(LuaValue, LuaValue)> {
        self.scan(0, None)
    }

    /// Entry following `key`. The outer `None` means `key` has no slot at all
    /// (neither live nor dead).
    pub fn after(&self, key: &LuaValue) -> Option<Option<(LuaValue, LuaValue)>> {
        let (index, node) = self.find(key)?;
        Some(self.scan(index + 1, node.next.as_deref()))
    }

    fn scan<'a>(&'a self, mut bucket: usize, mut node: Option<&'a Node>) -> Option<(LuaValue, LuaValue)> {
        loop {
            while let Some(n) = node {
                if let Some(pair) = n.slot.first() {
                    return Some(pair);
                }
                node = n.next.as_deref();
            }
            node = self.buckets.get(bucket)?.as_deref();
            bucket += 1;
        }
    }

    pub fn iter(&self) -> HashIter<'_> {
        HashIter {
            part: self,
            bucket: 0,
            node: None,
        }
    }

    pub fn live_count(&self) -> usize {
        self.iter().count()
    }

    /// Remove every node, returning the live entries.
    pub fn drain_live(&mut self) -> Vec<(LuaValue, LuaValue)> {
        let mut out = Vec::with_capacity(self.nodes - self.dead.min(self.nodes));
        for bucket in self.buckets.iter_mut() {
            let mut chain = bucket.take();
            while let Some(mut node) = chain {
                if let Some(pair) = node.slot.first() {
                    out.push(pair);
                }
                chain = node.next.take();
            }
        }
        self.nodes = 0;
        self.dead = 0;
        out
    }

    /// Drop all chains and size the bucket array for `capacity` entries.
    pub fn reset(&mut self, capacity: usize) {
        let size = if capacity == 0 {
            0
        } else {
            capacity.next_power_of_two()
        };
        self.buckets.clear();
        self.buckets.resize_with(size, || None);
        self.nodes = 0;
        self.dead = 0;
    }
}

impl Drop for HashPart {
    // Unlink chains iteratively so long chains cannot overflow the stack.
    fn drop(&mut self) {
        for bucket in self.buckets.iter_mut() {
            let mut chain = bucket.take();
            while let Some(mut node) = chain {
                chain = node.next.take();
            }
        }
    }
}

pub(crate) struct HashIter<'a> {
    part: &'a HashPart,
    bucket: usize,
    node: Option<&'a Node>,
}

impl Iterator for HashIter<'_> {
    type Item = (LuaValue, LuaValue);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            while let Some(n) = self.node {
                self.node = n.next.as_deref();
                if let Some(pair) = n.slot.first() {
                    return Some(pair);
                }
            }
            self.node = self.part.buckets.get(self.bucket)?.as_deref();
            self.bucket += 1;
        }
    }
}
