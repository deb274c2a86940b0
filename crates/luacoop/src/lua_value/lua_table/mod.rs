// Lua table: an array part for dense positive integer keys plus a chained
// hash part for everything else.
//
// The array part is resized only when the hash part has to grow, using the
// usual rule: the largest power of two `n` such that more than half of the
// slots `1..=n` would be in use. Weak tables keep their weak entries in the
// hash part; a table with weak values has no array part at all.

mod hash_part;
mod slot;

use std::fmt;

use crate::lua_value::{LuaValue, TableRef};
use crate::lua_vm::lua_limits::{MAX_ARRAY_BITS, MAX_CHAIN_LEN, MIN_HASH_SIZE};

use hash_part::{HashIter, HashPart, SetOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeakMode {
    pub keys: bool,
    pub values: bool,
}

impl WeakMode {
    pub fn parse(mode: &str) -> Self {
        WeakMode {
            keys: mode.contains('k'),
            values: mode.contains('v'),
        }
    }

    /// Mode selected by a metatable's `__mode` field.
    pub fn from_metatable(mt: &LuaTable) -> Self {
        match mt.get_str("__mode") {
            LuaValue::String(s) => WeakMode::parse(&s),
            _ => WeakMode::default(),
        }
    }

    pub fn is_weak(self) -> bool {
        self.keys || self.values
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    NilKey,
    NaNKey,
    InvalidNextKey,
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::NilKey => f.write_str("table index is nil"),
            TableError::NaNKey => f.write_str("table index is NaN"),
            TableError::InvalidNextKey => f.write_str("invalid key to 'next'"),
        }
    }
}

impl std::error::Error for TableError {}

pub struct LuaTable {
    array: Vec<LuaValue>,
    hash: HashPart,
    metatable: Option<TableRef>,
    weak_mode: WeakMode,
}

impl Default for LuaTable {
    fn default() -> Self {
        LuaTable::new(0, 0)
    }
}

impl LuaTable {
    /// Create a table with preallocated array and hash capacity.
    pub fn new(array_size: usize, hash_size: usize) -> Self {
        LuaTable {
            array: vec![LuaValue::Nil; array_size],
            hash: HashPart::new(hash_size),
            metatable: None,
            weak_mode: WeakMode::default(),
        }
    }

    /// Canonical key form: rejects nil and NaN, folds `-0.0` into `0`.
    pub fn normalize_key(key: LuaValue) -> Result<LuaValue, TableError> {
        match key {
            LuaValue::Nil => Err(TableError::NilKey),
            LuaValue::Float(f) if f.is_nan() => Err(TableError::NaNKey),
            LuaValue::Float(f) if f == 0.0 => Ok(LuaValue::Integer(0)),
            other => Ok(other),
        }
    }

    #[inline]
    fn array_slot(&self, key: &LuaValue) -> Option<usize> {
        match key {
            LuaValue::Integer(i) if *i >= 1 && (*i as u64) <= self.array.len() as u64 => {
                Some(*i as usize - 1)
            }
            _ => None,
        }
    }

    /// Primitive lookup; never consults metatables. Missing keys and weak
    /// entries whose referent is gone read as nil. Reads never restructure
    /// the table, vanished slots are reclaimed by writes and `prune`.
    pub fn raw_get(&self, key: &LuaValue) -> LuaValue {
        match key {
            LuaValue::Nil => LuaValue::Nil,
            LuaValue::Integer(i) => self.get_int(*i),
            LuaValue::Float(f) if *f == 0.0 => self.get_int(0),
            LuaValue::Float(f) if f.is_nan() => LuaValue::Nil,
            _ => self.hash.get(key).unwrap_or_default(),
        }
    }

    #[inline]
    pub fn get_int(&self, key: i64) -> LuaValue {
        if key >= 1 && (key as u64) <= self.array.len() as u64 {
            return self.array[key as usize - 1].clone();
        }
        self.hash.get(&LuaValue::Integer(key)).unwrap_or_default()
    }

    pub fn get_str(&self, key: &str) -> LuaValue {
        self.hash.get(&LuaValue::from(key)).unwrap_or_default()
    }

    /// Whether a raw lookup of `key` finds a non-nil value.
    pub fn contains_key(&self, key: &LuaValue) -> bool {
        !self.raw_get(key).is_nil()
    }

    /// Primitive store. Assigning nil removes the key; removed hash entries
    /// stay recognisable to `next` until the next rehash.
    pub fn raw_set(&mut self, key: LuaValue, value: LuaValue) -> Result<(), TableError> {
        let key = Self::normalize_key(key)?;
        if let Some(index) = self.array_slot(&key) {
            self.array[index] = value;
            return Ok(());
        }
        match self.hash.set_existing(&key, value, self.weak_mode) {
            SetOutcome::Stored => {}
            SetOutcome::Missing(value) => {
                if !value.is_nil() {
                    self.insert_new(key, value);
                }
            }
        }
        Ok(())
    }

    pub fn set_int(&mut self, key: i64, value: LuaValue) {
        // integer keys are always valid
        let _ = self.raw_set(LuaValue::Integer(key), value);
    }

    pub fn set_str(&mut self, key: &str, value: LuaValue) {
        let _ = self.raw_set(LuaValue::from(key), value);
    }

    /// Remove `key`, returning its previous value.
    pub fn remove(&mut self, key: &LuaValue) -> LuaValue {
        let old = self.raw_get(key);
        if !old.is_nil() {
            let _ = self.raw_set(key.clone(), LuaValue::Nil);
        }
        old
    }

    /// `t[#t + 1] = value`
    pub fn append(&mut self, value: LuaValue) {
        let n = self.len() as i64;
        self.set_int(n + 1, value);
    }

    fn insert_new(&mut self, key: LuaValue, value: LuaValue) {
        let buckets = self.hash.bucket_count();
        let nodes = self.hash.node_count();
        let grow = buckets == 0
            || nodes >= buckets * 2
            || (nodes >= buckets && self.hash.chain_len(&key) >= MAX_CHAIN_LEN);
        if grow {
            self.rehash(Some(&key));
            if let Some(index) = self.array_slot(&key) {
                self.array[index] = value;
                return;
            }
        }
        self.hash.insert(key, value, self.weak_mode);
    }

    /// Rebuild both parts from the live entries, dropping dead and vanished
    /// slots. `extra` is a key about to be inserted.
    fn rehash(&mut self, extra: Option<&LuaValue>) {
        let mut entries = self.hash.drain_live();

        let mut nums = [0usize; MAX_ARRAY_BITS + 1];
        let mut int_keys = 0;
        for (i, v) in self.array.iter().enumerate() {
            if !v.is_nil() && count_int_key(i as i64 + 1, &mut nums) {
                int_keys += 1;
            }
        }
        for (k, _) in &entries {
            if let LuaValue::Integer(i) = k {
                if count_int_key(*i, &mut nums) {
                    int_keys += 1;
                }
            }
        }
        if let Some(LuaValue::Integer(i)) = extra {
            if count_int_key(*i, &mut nums) {
                int_keys += 1;
            }
        }

        let array_size = if self.weak_mode.values {
            0
        } else {
            compute_array_size(&nums, int_keys)
        };

        if array_size < self.array.len() {
            for (offset, v) in self.array.drain(array_size..).enumerate() {
                if !v.is_nil() {
                    entries.push((LuaValue::Integer((array_size + offset + 1) as i64), v));
                }
            }
        } else {
            self.array.resize(array_size, LuaValue::Nil);
        }

        let mut hash_entries = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            match self.array_slot(&k) {
                Some(index) => self.array[index] = v,
                None => hash_entries.push((k, v)),
            }
        }

        let extra_in_hash = extra.is_some_and(|k| self.array_slot(k).is_none());
        let needed = hash_entries.len() + extra_in_hash as usize;
        self.hash
            .reset(if needed == 0 { 0 } else { needed.max(MIN_HASH_SIZE) });
        for (k, v) in hash_entries {
            self.hash.insert(k, v, self.weak_mode);
        }
    }

    /// Drop dead slots and entries whose weak referents are gone.
    pub fn prune(&mut self) {
        self.rehash(None);
    }

    /// Traversal step: the entry after `key` (`nil` starts the traversal).
    /// Keys removed during the traversal are still accepted.
    pub fn next(&self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, TableError> {
        let start = match key {
            LuaValue::Nil => 0,
            other => {
                let key = Self::normalize_key(other.clone()).map_err(|_| TableError::InvalidNextKey)?;
                match self.array_slot(&key) {
                    Some(index) => index + 1,
                    None => return self.hash.after(&key).ok_or(TableError::InvalidNextKey),
                }
            }
        };
        for (i, v) in self.array.iter().enumerate().skip(start) {
            if !v.is_nil() {
                return Ok(Some((LuaValue::Integer(i as i64 + 1), v.clone())));
            }
        }
        Ok(self.hash.first())
    }

    /// A border: `t[n] ~= nil` and `t[n + 1] == nil` (or 0 if `t[1]` is nil).
    pub fn len(&self) -> usize {
        let mut j = self.array.len();
        if j > 0 && self.array[j - 1].is_nil() {
            let mut i = 0;
            while j - i > 1 {
                let m = (i + j) / 2;
                if self.array[m - 1].is_nil() {
                    j = m;
                } else {
                    i = m;
                }
            }
            return i;
        }
        if self.hash.node_count() == 0 {
            return j;
        }
        self.unbound_search(j)
    }

    fn unbound_search(&self, j: usize) -> usize {
        let mut i = j;
        let mut j = j + 1;
        while !self.get_int(j as i64).is_nil() {
            i = j;
            if j > (i64::MAX / 2) as usize {
                // pathological table: fall back to a linear scan
                let mut k = 1;
                while !self.get_int(k).is_nil() {
                    k += 1;
                }
                return (k - 1) as usize;
            }
            j *= 2;
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if self.get_int(m as i64).is_nil() {
                j = m;
            } else {
                i = m;
            }
        }
        i
    }

    pub fn is_empty(&self) -> bool {
        self.array.iter().all(LuaValue::is_nil) && self.hash.first().is_none()
    }

    /// Capacity of the array part.
    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    /// Number of live entries in the hash part.
    pub fn hash_len(&self) -> usize {
        self.hash.live_count()
    }

    /// Dead slots currently kept for traversal.
    pub fn dead_slots(&self) -> usize {
        self.hash.dead_count()
    }

    /// Live entries: array part first, then the hash part.
    pub fn iter(&self) -> TableIter<'_> {
        TableIter {
            array: self.array.iter().enumerate(),
            hash: self.hash.iter(),
        }
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.clone()
    }

    /// Install a metatable. `mode` is the weak mode read from it beforehand,
    /// since the metatable may be this very table.
    pub fn set_metatable(&mut self, metatable: Option<TableRef>, mode: WeakMode) {
        self.metatable = metatable;
        self.set_weak_mode(mode);
    }

    pub fn weak_mode(&self) -> WeakMode {
        self.weak_mode
    }

    pub fn set_weak_mode(&mut self, mode: WeakMode) {
        if mode != self.weak_mode {
            self.weak_mode = mode;
            self.rehash(None);
        }
    }
}

/// Record a positive integer key in its power-of-two bucket.
fn count_int_key(key: i64, nums: &mut [usize; MAX_ARRAY_BITS + 1]) -> bool {
    if key < 1 || key as u64 > (1u64 << MAX_ARRAY_BITS) {
        return false;
    }
    let bucket = if key == 1 {
        0
    } else {
        (64 - ((key - 1) as u64).leading_zeros()) as usize
    };
    nums[bucket] += 1;
    true
}

fn compute_array_size(nums: &[usize; MAX_ARRAY_BITS + 1], total: usize) -> usize {
    let mut used = 0;
    let mut size = 0;
    let mut two_to_i = 1usize;
    for count in nums.iter() {
        if two_to_i / 2 >= total {
            break;
        }
        used += count;
        if used > two_to_i / 2 {
            size = two_to_i;
        }
        two_to_i *= 2;
    }
    size
}

pub struct TableIter<'a> {
    array: std::iter::Enumerate<std::slice::Iter<'a, LuaValue>>,
    hash: HashIter<'a>,
}

impl Iterator for TableIter<'_> {
    type Item = (LuaValue, LuaValue);

    fn next(&mut self) -> Option<Self::Item> {
        for (i, v) in self.array.by_ref() {
            if !v.is_nil() {
                return Some((LuaValue::Integer(i as i64 + 1), v.clone()));
            }
        }
        self.hash.next()
    }
}

impl fmt::Debug for LuaTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuaTable")
            .field("array_len", &self.array.len())
            .field("hash_len", &self.hash.live_count())
            .field("weak_mode", &self.weak_mode)
            .finish()
    }
}
