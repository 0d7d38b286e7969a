//! Keyed recycling pool for transient runtime entities.
//!
//! Entries live in a slab; per-template-key active lists and free queues
//! hold indices into it. An entry is in exactly one of {active, free} at
//! any time. Releasing transitively releases dependents (child pooled
//! objects parented to the released instance). Full teardown clears the
//! pool outright, since pooled identities do not survive a scene reload.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::warn;

/// A pooled instance's transient-state hooks.
pub trait PoolItem {
    /// Reset transient state before the instance is handed back out.
    fn reset(&mut self);

    /// Move display/position state to the off-screen sentinel on release.
    fn park(&mut self);
}

/// Handle to a pooled instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityId(u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum EntryState {
    Active,
    Free,
}

struct PoolEntry<T> {
    item: T,
    key: String,
    state: EntryState,
    deps: SmallVec<[EntityId; 4]>,
}

/// The pool, keyed per prefab/template identity.
pub struct Pool<T> {
    entries: Vec<PoolEntry<T>>,
    active: FxHashMap<String, Vec<u32>>,
    free: FxHashMap<String, VecDeque<u32>>,
}

impl<T: PoolItem> Pool<T> {
    pub fn new() -> Self {
        Pool {
            entries: Vec::new(),
            active: FxHashMap::default(),
            free: FxHashMap::default(),
        }
    }

    /// Hand out an instance for `key`: reuse from the free queue with
    /// transient state reset, or construct fresh.
    pub fn request(&mut self, key: &str, ctor: impl FnOnce() -> T) -> EntityId {
        if let Some(idx) = self.free.get_mut(key).and_then(VecDeque::pop_front) {
            let entry = &mut self.entries[idx as usize];
            entry.item.reset();
            entry.state = EntryState::Active;
            entry.deps.clear();
            self.active.entry(key.to_owned()).or_default().push(idx);
            return EntityId(idx);
        }
        let idx = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        self.entries.push(PoolEntry {
            item: ctor(),
            key: key.to_owned(),
            state: EntryState::Active,
            deps: SmallVec::new(),
        });
        self.active.entry(key.to_owned()).or_default().push(idx);
        EntityId(idx)
    }

    /// Parent `child` to `parent`: releasing the parent releases the child.
    pub fn attach(&mut self, parent: EntityId, child: EntityId) {
        if let Some(entry) = self.entries.get_mut(parent.0 as usize) {
            entry.deps.push(child);
        }
    }

    /// Release an instance back to its free queue. Releasing an instance
    /// that is not active is a diagnostic, not a fault.
    pub fn release(&mut self, id: EntityId) -> bool {
        let mut stack: SmallVec<[EntityId; 8]> = SmallVec::new();
        stack.push(id);
        let mut released_root = false;
        let mut first = true;
        while let Some(next) = stack.pop() {
            let Some(entry) = self.entries.get_mut(next.0 as usize) else {
                if first {
                    warn!(id = next.0, "release of unknown pool instance");
                }
                first = false;
                continue;
            };
            if entry.state != EntryState::Active {
                if first {
                    warn!(id = next.0, key = %entry.key, "release of non-active pool instance");
                }
                first = false;
                continue;
            }
            entry.item.park();
            entry.state = EntryState::Free;
            let key = entry.key.clone();
            stack.extend(entry.deps.drain(..));
            if let Some(list) = self.active.get_mut(&key) {
                list.retain(|&i| i != next.0);
            }
            self.free.entry(key).or_default().push_back(next.0);
            if first {
                released_root = true;
            }
            first = false;
        }
        released_root
    }

    pub fn is_active(&self, id: EntityId) -> bool {
        self.entries
            .get(id.0 as usize)
            .is_some_and(|e| e.state == EntryState::Active)
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.entries
            .get(id.0 as usize)
            .filter(|e| e.state == EntryState::Active)
            .map(|e| &e.item)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.entries
            .get_mut(id.0 as usize)
            .filter(|e| e.state == EntryState::Active)
            .map(|e| &mut e.item)
    }

    pub fn active_count(&self, key: &str) -> usize {
        self.active.get(key).map_or(0, Vec::len)
    }

    pub fn free_count(&self, key: &str) -> usize {
        self.free.get(key).map_or(0, VecDeque::len)
    }

    /// Active handles for a key, in request order.
    pub fn active_ids(&self, key: &str) -> Vec<EntityId> {
        self.active
            .get(key)
            .map(|v| v.iter().map(|&i| EntityId(i)).collect())
            .unwrap_or_default()
    }

    /// Scene teardown: drop everything. Pooled identities are not expected
    /// to survive a full reload.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.active.clear();
        self.free.clear();
    }
}

impl<T: PoolItem> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}
