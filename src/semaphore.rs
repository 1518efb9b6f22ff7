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

//! A dynamically resizable counting semaphore (spec §4.4).
//!
//! Grounded in `original_source/cpp/rt/Semaphore.cpp`. The original keeps a
//! `list<Thread*>` of waiters and wakes either the head (fair) or a random
//! entry (unfair), notifying with a broadcast and letting `mustWait` filter
//! who actually proceeds. This port replaces the thread-identity wait list
//! with a ticket queue of per-waiter condition variables so `release` can
//! wake exactly the waiters it intends to, without the broadcast-then-filter
//! indirection the original needs because it has no per-waiter handle.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

struct Ticket {
    ready: Mutex<bool>,
    cond:  Condvar,
}

impl Ticket {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            ready: Mutex::new(false),
            cond:  Condvar::new(),
        })
    }

    fn wake(&self) {
        let mut g = self.ready.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *g = true;
        self.cond.notify_all();
    }
}

struct State {
    maximum:   i64,
    available: i64,
    waiters:   VecDeque<Arc<Ticket>>,
}

/// A counting semaphore with a dynamically resizable maximum.
pub struct Semaphore {
    state: Mutex<State>,
    /// Unfair variant wakes any one blocked acquirer via a broadcast;
    /// fair wakes tickets in arrival order (see `release`).
    fair:  bool,
}

impl Semaphore {
    #[must_use]
    pub fn new(permits: u32, fair: bool) -> Self {
        Self {
            state: Mutex::new(State {
                maximum:   i64::from(permits),
                available: i64::from(permits),
                waiters:   VecDeque::new(),
            }),
            fair,
        }
    }

    /// Blocks until at least `n` permits are available or `interrupted` is
    /// set, then decrements by `n`. Returns `false` if interrupted before
    /// acquiring (in which case no permits were taken).
    pub fn acquire(&self, n: u32, interrupted: &AtomicBool) -> bool {
        let n = i64::from(n);
        let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if g.available >= n && g.waiters.is_empty() {
            g.available -= n;
            return true;
        }

        let ticket = Ticket::new();
        g.waiters.push_back(ticket.clone());
        drop(g);

        loop {
            if interrupted.load(Ordering::Acquire) {
                let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                if let Some(pos) = g.waiters.iter().position(|t| Arc::ptr_eq(t, &ticket)) {
                    g.waiters.remove(pos);
                    // Pass the notification on so no eligible waiter is stranded.
                    if let Some(next) = g.waiters.front() {
                        next.wake();
                    }
                }
                return false;
            }

            let ready = ticket.ready.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let (ready, timeout) = ticket
                .cond
                .wait_timeout(ready, std::time::Duration::from_millis(10))
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if timeout.timed_out() && !*ready {
                continue;
            }
            drop(ready);

            let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if g.waiters.front().is_some_and(|t| Arc::ptr_eq(t, &ticket)) && g.available >= n {
                g.waiters.pop_front();
                g.available -= n;
                return true;
            }
            // Woken but not eligible yet (permits claimed by someone else, or
            // not at the head for the fair variant): go back to waiting.
            let mut ready = ticket.ready.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            *ready = false;
        }
    }

    /// Non-blocking: succeeds only if `n` permits are immediately available.
    pub fn try_acquire(&self, n: u32) -> bool {
        let n = i64::from(n);
        let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if g.waiters.is_empty() && g.available >= n {
            g.available -= n;
            true
        } else {
            false
        }
    }

    /// Releases `n` permits, clamped so `available` never exceeds `maximum`,
    /// and wakes up to `n` waiters.
    pub fn release(&self, n: u32) {
        let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let headroom = g.maximum - g.available;
        let grant = headroom.min(i64::from(n)).max(0);
        g.available += grant;

        // Fair: wake up to `n` tickets in arrival order. Unfair: wake one
        // arbitrary blocked acquirer (the front of the queue is as good an
        // "arbitrary" choice as any, since there is no ordering contract).
        let wake_count = if self.fair { usize::try_from(n).unwrap_or(usize::MAX) } else { usize::from(n > 0) };
        for _ in 0..wake_count {
            let Some(ticket) = g.waiters.front().cloned() else { break };
            ticket.wake();
        }
    }

    /// Updates the maximum. Growing releases the delta; shrinking subtracts
    /// it from `available`, which may drive `available` negative until
    /// enough permits are returned (spec §4.4).
    pub fn set_max_permits(&self, new_max: u32) {
        let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let new_max = i64::from(new_max);
        let delta = new_max - g.maximum;
        g.maximum = new_max;
        g.available += delta;
        if delta > 0 {
            let wake = usize::try_from(delta).unwrap_or(usize::MAX).min(g.waiters.len());
            for ticket in g.waiters.iter().take(wake) {
                ticket.wake();
            }
        }
    }

    #[must_use]
    pub fn available_permits(&self) -> i64 {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).available
    }

    #[must_use]
    pub fn max_permits(&self) -> i64 {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).maximum
    }

    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).waiters.len()
    }

    #[must_use]
    pub fn is_fair(&self) -> bool { self.fair }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::atomic::AtomicBool, thread, time::Duration};

    #[test]
    fn acquire_release_is_idempotent_on_available() {
        let sem = Semaphore::new(3, false);
        let flag = AtomicBool::new(false);
        assert!(sem.acquire(1, &flag));
        assert_eq!(sem.available_permits(), 2);
        sem.release(1);
        assert_eq!(sem.available_permits(), 3);
    }

    #[test]
    fn try_acquire_fails_when_exhausted() {
        let sem = Semaphore::new(1, false);
        assert!(sem.try_acquire(1));
        assert!(!sem.try_acquire(1));
    }

    #[test]
    fn release_never_exceeds_maximum() {
        let sem = Semaphore::new(2, false);
        sem.release(10);
        assert_eq!(sem.available_permits(), 2);
    }

    #[test]
    fn shrinking_max_can_go_negative_then_recover() {
        let sem = Semaphore::new(3, false);
        let flag = AtomicBool::new(false);
        assert!(sem.acquire(3, &flag));
        sem.set_max_permits(1);
        assert_eq!(sem.available_permits(), -2);
        sem.release(1);
        assert_eq!(sem.available_permits(), -1);
        sem.release(1);
        assert_eq!(sem.available_permits(), 0);
        sem.release(1);
        assert_eq!(sem.available_permits(), 1);
    }

    #[test]
    fn fair_semaphore_wakes_in_arrival_order() {
        let sem = Arc::new(Semaphore::new(1, true));
        let flag_a = Arc::new(AtomicBool::new(false));
        let order = Arc::new(Mutex::new(Vec::new()));

        assert!(sem.acquire(1, &flag_a));

        let sem_b = sem.clone();
        let order_b = order.clone();
        let tb = thread::spawn(move || {
            let flag = AtomicBool::new(false);
            assert!(sem_b.acquire(1, &flag));
            order_b.lock().unwrap().push('B');
        });
        thread::sleep(Duration::from_millis(20));

        let sem_c = sem.clone();
        let order_c = order.clone();
        let tc = thread::spawn(move || {
            let flag = AtomicBool::new(false);
            assert!(sem_c.acquire(1, &flag));
            order_c.lock().unwrap().push('C');
        });
        thread::sleep(Duration::from_millis(20));

        sem.release(1);
        thread::sleep(Duration::from_millis(40));
        sem.release(1);
        tb.join().unwrap();
        tc.join().unwrap();

        assert_eq!(*order.lock().unwrap(), vec!['B', 'C']);
    }

    #[test]
    fn interrupt_removes_only_the_interrupted_waiter() {
        let sem = Arc::new(Semaphore::new(1, true));
        let flag_holder = AtomicBool::new(false);
        assert!(sem.acquire(1, &flag_holder));

        let sem2 = sem.clone();
        let interrupted = Arc::new(AtomicBool::new(false));
        let interrupted2 = interrupted.clone();
        let t = thread::spawn(move || sem2.acquire(1, &interrupted2));

        thread::sleep(Duration::from_millis(20));
        interrupted.store(true, Ordering::SeqCst);
        let result = t.join().unwrap();
        assert!(!result);
        assert_eq!(sem.queue_length(), 0);
    }
}
