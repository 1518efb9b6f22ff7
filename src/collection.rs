// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A bounded-lifetime group of operations tracked together (spec §4.8).
//!
//! Grounded in `original_source/cpp/modest/OperationList.cpp`: add/remove
//! by identity, bulk interrupt/wait-for/prune, and a `Drop` that
//! terminates (interrupts, waits uninterruptibly, then prunes) everything
//! still tracked — so a collection going out of scope can never leak a
//! running operation past its owner's lifetime.
//!
//! Per spec §3's `OperationCollection` state ("ordered list of operation
//! handles, pointer-index for O(1) removal"), `remove` is backed by a
//! `HashMap` keyed on [`Operation::ptr`] rather than a linear scan: the
//! entry's list position is looked up in one hash lookup, the entry is
//! removed with `Vec::swap_remove` (O(1), at the cost of no longer
//! preserving relative order against the element that used to be last),
//! and the index entry for whichever operation got swapped into the
//! vacated slot is patched to match.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, atomic::AtomicBool},
};

use crate::{engine::Engine, error::Result, operation::Operation};

struct State {
    list:  Vec<Operation>,
    index: HashMap<usize, usize>,
}

impl State {
    fn new() -> Self {
        Self {
            list:  Vec::new(),
            index: HashMap::new(),
        }
    }

    fn push(&mut self, op: Operation) {
        let key = op.ptr();
        let pos = self.list.len();
        self.list.push(op);
        self.index.insert(key, pos);
    }

    /// Removes the entry for `key`, if present, in O(1): swap the target
    /// with the last element and patch the displaced element's index.
    fn remove_by_key(&mut self, key: usize) {
        let Some(pos) = self.index.remove(&key) else { return };
        let last = self.list.len() - 1;
        self.list.swap_remove(pos);
        if pos != last {
            let moved_key = self.list[pos].ptr();
            self.index.insert(moved_key, pos);
        }
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (pos, op) in self.list.iter().enumerate() {
            self.index.insert(op.ptr(), pos);
        }
    }
}

/// A group of [`Operation`]s that can be driven together.
pub struct OperationCollection {
    state: Mutex<State>,
}

impl Default for OperationCollection {
    fn default() -> Self { Self::new() }
}

impl OperationCollection {
    #[must_use]
    pub fn new() -> Self { Self { state: Mutex::new(State::new()) } }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn add(&self, op: Operation) { self.lock().push(op); }

    /// Removes `op` by identity, if present. O(1): one hash lookup plus a
    /// `swap_remove`, not a linear scan.
    pub fn remove(&self, op: &Operation) { self.lock().remove_by_key(op.ptr()); }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Operation> { self.lock().list.get(index).cloned() }

    /// Queues every tracked operation onto `engine`.
    pub fn queue_all(&self, engine: &Arc<Engine>) -> Vec<Result<()>> {
        self.lock().list.iter().map(|op| engine.queue(op.clone())).collect()
    }

    /// Interrupts every tracked operation.
    pub fn interrupt(&self) {
        for op in &self.lock().list {
            op.interrupt();
        }
    }

    /// Waits for every tracked operation to stop, in list order. With
    /// `interrupted` set, returns `false` as soon as one wait is
    /// interrupted rather than continuing to the rest of the list.
    pub fn wait_for(&self, interrupted: Option<&AtomicBool>) -> bool {
        let snapshot = self.lock().list.clone();
        for op in &snapshot {
            if !op.wait_for(interrupted) {
                return false;
            }
        }
        true
    }

    /// Removes every operation that has already stopped.
    pub fn prune(&self) {
        let mut g = self.lock();
        g.list.retain(|op| !op.is_stopped());
        g.rebuild_index();
    }

    /// Interrupts, uninterruptibly waits for, then prunes every tracked
    /// operation. Blocks until the list is fully drained.
    pub fn terminate(&self) {
        self.interrupt();
        self.wait_for(None);
        self.prune();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.lock().list.is_empty() }

    pub fn clear(&self) {
        let mut g = self.lock();
        g.list.clear();
        g.index.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize { self.lock().list.len() }

    /// Snapshot of the tracked operations at the time of the call.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Operation> { self.lock().list.clone() }
}

impl Drop for OperationCollection {
    fn drop(&mut self) { self.terminate(); }
}
