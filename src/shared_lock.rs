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

//! Reader/writer lock with recursive exclusive ownership (spec §4.3).
//!
//! Grounded in `original_source/cpp/rt/SharedLock.h`: a thread holding the
//! exclusive lock may take further shared or exclusive locks on the same
//! thread without deadlocking, and must release them in LIFO order. Unlike
//! the C++ original (which worries about thread id `0` being a valid but
//! indistinguishable-from-"no owner" sentinel), `std::thread::ThreadId` has
//! no such collision, so that caveat doesn't carry over.
//!
//! Shared-to-exclusive upgrade is deliberately not provided (spec §4.3):
//! callers release their shared guard before taking an exclusive one.

use std::{
    sync::{Condvar, Mutex},
    thread::ThreadId,
};

struct State {
    owner:           Option<ThreadId>,
    exclusive_depth: u32,
    shared_count:    u32,
}

/// A recursive-exclusive, non-upgrading reader/writer lock.
pub struct SharedLock {
    state: Mutex<State>,
    cond:  Condvar,
}

impl Default for SharedLock {
    fn default() -> Self { Self::new() }
}

impl SharedLock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                owner:           None,
                exclusive_depth: 0,
                shared_count:    0,
            }),
            cond:  Condvar::new(),
        }
    }

    /// Acquires a shared lock. Blocks while an exclusive holder other than
    /// the calling thread exists.
    pub fn lock_shared(&self) -> SharedLockReadGuard<'_> {
        let me = std::thread::current().id();
        let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while matches!(g.owner, Some(owner) if owner != me) {
            g = self.cond.wait(g).unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        g.shared_count += 1;
        drop(g);
        SharedLockReadGuard { lock: self }
    }

    /// Acquires an exclusive lock. Blocks while any holder other than the
    /// calling thread exists (shared or exclusive). Recursive acquisition
    /// by the current exclusive owner succeeds immediately.
    pub fn lock_exclusive(&self) -> SharedLockWriteGuard<'_> {
        let me = std::thread::current().id();
        let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            match g.owner {
                Some(owner) if owner == me => break,
                None if g.shared_count == 0 => break,
                _ => g = self.cond.wait(g).unwrap_or_else(std::sync::PoisonError::into_inner),
            }
        }
        g.owner = Some(me);
        g.exclusive_depth += 1;
        drop(g);
        SharedLockWriteGuard { lock: self }
    }

    fn unlock_shared(&self) {
        let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        g.shared_count -= 1;
        if g.shared_count == 0 {
            drop(g);
            self.cond.notify_all();
        }
    }

    fn unlock_exclusive(&self) {
        let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        g.exclusive_depth -= 1;
        if g.exclusive_depth == 0 {
            g.owner = None;
            drop(g);
            self.cond.notify_all();
        }
    }
}

/// RAII shared-lock guard. Dropping it releases the shared hold.
pub struct SharedLockReadGuard<'a> {
    lock: &'a SharedLock,
}

impl Drop for SharedLockReadGuard<'_> {
    fn drop(&mut self) { self.lock.unlock_shared(); }
}

/// RAII exclusive-lock guard. Dropping it releases one level of exclusive
/// recursion.
pub struct SharedLockWriteGuard<'a> {
    lock: &'a SharedLock,
}

impl Drop for SharedLockWriteGuard<'_> {
    fn drop(&mut self) { self.lock.unlock_exclusive(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Duration};

    #[test]
    fn recursive_exclusive_on_same_thread() {
        let lock = SharedLock::new();
        let g1 = lock.lock_exclusive();
        let g2 = lock.lock_exclusive();
        let g3 = lock.lock_shared();
        drop(g3);
        drop(g2);
        drop(g1);
    }

    #[test]
    fn exclusive_blocks_other_thread() {
        let lock = Arc::new(SharedLock::new());
        let g = lock.lock_exclusive();
        let lock2 = lock.clone();
        let entered = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let entered2 = entered.clone();
        let t = thread::spawn(move || {
            let _g = lock2.lock_exclusive();
            entered2.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(30));
        assert!(!entered.load(std::sync::atomic::Ordering::SeqCst));
        drop(g);
        t.join().unwrap();
        assert!(entered.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn shared_locks_do_not_block_each_other() {
        let lock = Arc::new(SharedLock::new());
        let g1 = lock.lock_shared();
        let lock2 = lock.clone();
        let t = thread::spawn(move || {
            let _g2 = lock2.lock_shared();
        });
        t.join().unwrap();
        drop(g1);
    }
}
