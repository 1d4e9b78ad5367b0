//! Ordered dictionary implementation shared by `dict`, `set` and `frozenset`.
//!
//! Entries are kept in insertion order in a dense vector; a probing index table maps hash
//! slots to entry positions. Deleted entries leave a hole that is compacted away the next
//! time a new key needs room.
//!
//! Key comparisons may run arbitrary python code, which may in turn touch the same
//! dictionary, so the table is never borrowed while `__eq__` runs.

use crate::{
    PyObjectRef, PyResult, VirtualMachine,
    builtins::PyStr,
    hash::{self, PyHash},
};
use core::cell::RefCell;
use std::collections::HashMap;

/// index calculated by resolving collision
type HashIndex = PyHash;
/// entry index mapped in indices
type EntryIndex = usize;

pub(crate) struct Dict<T = PyObjectRef> {
    inner: RefCell<DictInner<T>>,
}

struct DictInner<T> {
    used: usize,
    indices: HashMap<HashIndex, EntryIndex>,
    entries: Vec<Option<DictEntry<T>>>,
}

#[derive(Clone)]
struct DictEntry<T> {
    hash: PyHash,
    key: PyObjectRef,
    value: T,
}

/// Snapshot used by iterators to notice a dictionary changing under them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct DictSize {
    used: usize,
    entries_size: usize,
}

impl<T> Default for Dict<T> {
    fn default() -> Self {
        Self {
            inner: RefCell::new(DictInner {
                used: 0,
                indices: HashMap::new(),
                entries: Vec::new(),
            }),
        }
    }
}

impl<T: Clone> Clone for Dict<T> {
    fn clone(&self) -> Self {
        let inner = self.inner.borrow();
        Self {
            inner: RefCell::new(DictInner {
                used: inner.used,
                indices: inner.indices.clone(),
                entries: inner.entries.clone(),
            }),
        }
    }
}

enum LookupResult {
    /// Not found; `hash_index` is the free slot the key would occupy.
    NewIndex { hash: PyHash, hash_index: HashIndex },
    Existing(EntryIndex),
}

fn next_index(perturb: PyHash, hash_index: HashIndex) -> HashIndex {
    hash_index
        .wrapping_mul(5)
        .wrapping_add(perturb)
        .wrapping_add(1)
}

impl<T> DictInner<T> {
    fn free_slot(&self, hash: PyHash) -> HashIndex {
        let mut hash_index = hash;
        while self.indices.contains_key(&hash_index) {
            hash_index = next_index(hash, hash_index);
        }
        hash_index
    }

    /// Drops the holes left by deletions and rebuilds the index table.
    fn compact(&mut self) {
        let entries = core::mem::take(&mut self.entries);
        self.indices = HashMap::with_capacity(self.used);
        self.entries = Vec::with_capacity(self.used);
        for entry in entries.into_iter().flatten() {
            let hash_index = self.free_slot(entry.hash);
            self.indices.insert(hash_index, self.entries.len());
            self.entries.push(Some(entry));
        }
    }
}

impl<T: Clone> Dict<T> {
    fn lookup<K: DictKey + ?Sized>(
        &self,
        vm: &VirtualMachine,
        key: &K,
        hash: PyHash,
    ) -> PyResult<LookupResult> {
        'restart: loop {
            let mut hash_index = hash;
            loop {
                let candidate = {
                    let inner = self.inner.borrow();
                    let Some(&index) = inner.indices.get(&hash_index) else {
                        return Ok(LookupResult::NewIndex { hash, hash_index });
                    };
                    match &inner.entries[index] {
                        Some(entry) if key.key_is(&entry.key) => {
                            return Ok(LookupResult::Existing(index));
                        }
                        Some(entry) if entry.hash == hash => Some((index, entry.key.clone())),
                        // a deleted entry or a different hash, keep probing
                        _ => None,
                    }
                };
                if let Some((index, entry_key)) = candidate {
                    let equal = key.key_eq(vm, &entry_key)?;
                    let inner = self.inner.borrow();
                    let unchanged = matches!(
                        inner.entries.get(index),
                        Some(Some(entry)) if entry.key.is(&entry_key)
                    );
                    if !unchanged {
                        // the comparison mutated the table
                        continue 'restart;
                    }
                    if equal {
                        return Ok(LookupResult::Existing(index));
                    }
                }
                hash_index = next_index(hash, hash_index);
            }
        }
    }

    /// Store a key
    pub(crate) fn insert<K: DictKey + ?Sized>(
        &self,
        vm: &VirtualMachine,
        key: &K,
        value: T,
    ) -> PyResult<()> {
        let hash = key.key_hash(vm)?;
        match self.lookup(vm, key, hash)? {
            LookupResult::Existing(index) => {
                if let Some(entry) = &mut self.inner.borrow_mut().entries[index] {
                    entry.value = value;
                }
            }
            LookupResult::NewIndex { hash, hash_index } => {
                let key = key.to_key_object(vm);
                let mut inner = self.inner.borrow_mut();
                let hash_index = if inner.entries.len() > 8 && inner.entries.len() > 2 * inner.used {
                    inner.compact();
                    inner.free_slot(hash)
                } else {
                    hash_index
                };
                let entry_index = inner.entries.len();
                inner.entries.push(Some(DictEntry { hash, key, value }));
                inner.indices.insert(hash_index, entry_index);
                inner.used += 1;
            }
        }
        Ok(())
    }

    pub(crate) fn contains<K: DictKey + ?Sized>(&self, vm: &VirtualMachine, key: &K) -> PyResult<bool> {
        let hash = key.key_hash(vm)?;
        Ok(matches!(
            self.lookup(vm, key, hash)?,
            LookupResult::Existing(_)
        ))
    }

    /// Retrieve a key
    pub(crate) fn get<K: DictKey + ?Sized>(&self, vm: &VirtualMachine, key: &K) -> PyResult<Option<T>> {
        let hash = key.key_hash(vm)?;
        Ok(match self.lookup(vm, key, hash)? {
            LookupResult::Existing(index) => self.inner.borrow().entries[index]
                .as_ref()
                .map(|entry| entry.value.clone()),
            LookupResult::NewIndex { .. } => None,
        })
    }

    /// Retrieve and delete a key
    pub(crate) fn pop<K: DictKey + ?Sized>(&self, vm: &VirtualMachine, key: &K) -> PyResult<Option<T>> {
        let hash = key.key_hash(vm)?;
        Ok(match self.lookup(vm, key, hash)? {
            LookupResult::Existing(index) => {
                let mut inner = self.inner.borrow_mut();
                let entry = inner.entries[index].take();
                if entry.is_some() {
                    inner.used -= 1;
                }
                entry.map(|entry| entry.value)
            }
            LookupResult::NewIndex { .. } => None,
        })
    }

    pub(crate) fn delete(&self, vm: &VirtualMachine, key: &PyObjectRef) -> PyResult<()> {
        if self.pop(vm, key)?.is_some() {
            Ok(())
        } else {
            Err(vm.new_key_error(key.clone()))
        }
    }

    /// Removes the most recently inserted entry.
    pub(crate) fn pop_back(&self) -> Option<(PyObjectRef, T)> {
        let mut inner = self.inner.borrow_mut();
        let mut popped = None;
        while let Some(last) = inner.entries.pop() {
            if last.is_some() {
                popped = last;
                break;
            }
        }
        if popped.is_some() {
            inner.used -= 1;
        }
        // removing index slots would cut probing chains, rebuild them instead
        inner.compact();
        popped.map(|entry| (entry.key, entry.value))
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.entries.clear();
        inner.indices.clear();
        inner.used = 0;
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.borrow().used
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn size(&self) -> DictSize {
        let inner = self.inner.borrow();
        DictSize {
            used: inner.used,
            entries_size: inner.entries.len(),
        }
    }

    pub(crate) fn has_changed_size(&self, position: &DictSize) -> bool {
        self.size() != *position
    }

    /// The entry at or after `position`, advancing `position` past it.
    pub(crate) fn next_entry(&self, position: &mut EntryIndex) -> Option<(PyObjectRef, T)> {
        let inner = self.inner.borrow();
        while *position < inner.entries.len() {
            let entry = &inner.entries[*position];
            *position += 1;
            if let Some(DictEntry { key, value, .. }) = entry {
                return Some((key.clone(), value.clone()));
            }
        }
        None
    }

    pub(crate) fn keys(&self) -> Vec<PyObjectRef> {
        self.inner
            .borrow()
            .entries
            .iter()
            .flatten()
            .map(|entry| entry.key.clone())
            .collect()
    }

    pub(crate) fn values(&self) -> Vec<T> {
        self.inner
            .borrow()
            .entries
            .iter()
            .flatten()
            .map(|entry| entry.value.clone())
            .collect()
    }

    pub(crate) fn items(&self) -> Vec<(PyObjectRef, T)> {
        self.inner
            .borrow()
            .entries
            .iter()
            .flatten()
            .map(|entry| (entry.key.clone(), entry.value.clone()))
            .collect()
    }

    /// The stored hashes, in entry order.
    pub(crate) fn hashes(&self) -> Vec<PyHash> {
        self.inner
            .borrow()
            .entries
            .iter()
            .flatten()
            .map(|entry| entry.hash)
            .collect()
    }
}

/// Types implementing this trait can be used to index the dictionary:
/// - `PyObjectRef`, an arbitrary python object used as key
/// - `str`, a rust string looked up as if it were a python `str`; used for namespaces
pub(crate) trait DictKey {
    fn key_hash(&self, vm: &VirtualMachine) -> PyResult<PyHash>;
    fn key_is(&self, other: &PyObjectRef) -> bool;
    fn key_eq(&self, vm: &VirtualMachine, other_key: &PyObjectRef) -> PyResult<bool>;
    fn to_key_object(&self, vm: &VirtualMachine) -> PyObjectRef;
}

impl DictKey for PyObjectRef {
    fn key_hash(&self, vm: &VirtualMachine) -> PyResult<PyHash> {
        self.hash(vm)
    }

    fn key_is(&self, other: &PyObjectRef) -> bool {
        self.is(other)
    }

    fn key_eq(&self, vm: &VirtualMachine, other_key: &PyObjectRef) -> PyResult<bool> {
        if let (Some(a), Some(b)) = (self.payload::<PyStr>(), other_key.payload::<PyStr>()) {
            return Ok(a.as_str() == b.as_str());
        }
        vm.identical_or_equal(self, other_key)
    }

    fn to_key_object(&self, _vm: &VirtualMachine) -> PyObjectRef {
        self.clone()
    }
}

impl DictKey for str {
    fn key_hash(&self, _vm: &VirtualMachine) -> PyResult<PyHash> {
        Ok(hash::hash_str(self))
    }

    fn key_is(&self, _other: &PyObjectRef) -> bool {
        // a rust str is never the same object as a stored key
        false
    }

    fn key_eq(&self, _vm: &VirtualMachine, other_key: &PyObjectRef) -> PyResult<bool> {
        Ok(other_key
            .payload::<PyStr>()
            .is_some_and(|s| s.as_str() == self))
    }

    fn to_key_object(&self, vm: &VirtualMachine) -> PyObjectRef {
        vm.ctx.new_str(self).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Interpreter;

    #[test]
    fn insert_delete_and_reinsert() {
        Interpreter::new(Default::default()).enter(|vm| {
            let dict = Dict::default();
            assert_eq!(0, dict.len());

            let key1 = vm.ctx.new_bool(true);
            let value1: PyObjectRef = vm.ctx.new_str("abc").into();
            dict.insert(vm, &key1, value1.clone()).unwrap();
            assert_eq!(1, dict.len());

            let key2: PyObjectRef = vm.ctx.new_str("x").into();
            let value2: PyObjectRef = vm.ctx.new_str("def").into();
            dict.insert(vm, &key2, value2.clone()).unwrap();
            assert_eq!(2, dict.len());

            dict.insert(vm, &key1, value2.clone()).unwrap();
            assert_eq!(2, dict.len());

            dict.delete(vm, &key1).unwrap();
            assert_eq!(1, dict.len());

            dict.insert(vm, &key1, value2.clone()).unwrap();
            assert_eq!(2, dict.len());

            assert!(dict.contains(vm, &key1).unwrap());
            assert!(dict.contains(vm, "x").unwrap());

            let val = dict.get(vm, "x").unwrap().unwrap();
            assert!(val.is(&value2));
        })
    }

    #[test]
    fn numerically_equal_keys_collide() {
        Interpreter::new(Default::default()).enter(|vm| {
            let dict = Dict::default();
            let one: PyObjectRef = vm.ctx.new_int(1).into();
            let one_float: PyObjectRef = vm.ctx.new_float(1.0).into();
            dict.insert(vm, &one, vm.ctx.none()).unwrap();
            dict.insert(vm, &one_float, vm.ctx.none()).unwrap();
            dict.insert(vm, &vm.ctx.new_bool(true), vm.ctx.none()).unwrap();
            assert_eq!(dict.len(), 1);
            // the first key object is kept
            assert!(dict.keys()[0].is(&one));
        })
    }

    #[test]
    fn order_survives_compaction() {
        Interpreter::new(Default::default()).enter(|vm| {
            let dict: Dict = Dict::default();
            let keys = (0..20)
                .map(|i| vm.ctx.new_int(i).into())
                .collect::<Vec<PyObjectRef>>();
            for key in &keys {
                dict.insert(vm, key, key.clone()).unwrap();
            }
            for key in &keys[..15] {
                dict.delete(vm, key).unwrap();
            }
            let fresh: PyObjectRef = vm.ctx.new_int(100).into();
            dict.insert(vm, &fresh, fresh.clone()).unwrap();
            let remaining = dict.keys();
            assert_eq!(remaining.len(), 6);
            assert!(remaining[0].is(&keys[15]));
            assert!(remaining[5].is(&fresh));
            for key in &keys[15..] {
                assert!(dict.contains(vm, key).unwrap());
            }
        })
    }

    #[test]
    fn str_keys_match_str_objects() {
        Interpreter::new(Default::default()).enter(|vm| {
            let dict = Dict::default();
            dict.insert(vm, "name", vm.ctx.none()).unwrap();
            let key: PyObjectRef = vm.ctx.new_str("name").into();
            assert!(dict.contains(vm, &key).unwrap());
            assert_eq!(hash::hash_str("name"), key.hash(vm).unwrap());
        })
    }

    #[test]
    fn pop_back_is_lifo() {
        Interpreter::new(Default::default()).enter(|vm| {
            let dict = Dict::default();
            for name in ["a", "b", "c"] {
                dict.insert(vm, name, vm.ctx.none()).unwrap();
            }
            let (key, _) = dict.pop_back().unwrap();
            assert_eq!(key.str(vm).unwrap().as_str(), "c");
            assert_eq!(dict.len(), 2);
            assert!(dict.contains(vm, "a").unwrap());
            assert!(!dict.contains(vm, "c").unwrap());
        })
    }
}
