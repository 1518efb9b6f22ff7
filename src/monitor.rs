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

//! An OS mutex paired with a condition variable (spec §4.2).
//!
//! `lock`/`unlock` are expressed through RAII (`MutexGuard`) rather than a
//! manual pair of calls — Rust has no way to forget the `unlock`, which is
//! strictly stronger than the contract spec §4.2 asks for. `wait` atomically
//! releases the held guard, blocks, and reacquires before returning, exactly
//! matching `std::sync::Condvar::wait`.

use std::{
    sync::{
        Arc, Condvar, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// Poll granularity for interruptible waits. Cancellation is cooperative
/// (spec §1 non-goals: no preemption), so an interrupted wait becomes
/// observable within one tick rather than immediately.
const INTERRUPT_POLL: Duration = Duration::from_millis(10);

/// Why a [`ExclusiveMonitor::wait_bounded`] call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken by `notify_one`/`notify_all` before the deadline or interrupt.
    Notified,
    /// The interrupt flag was observed set.
    Interrupted,
    /// The full timeout elapsed with no notification or interruption.
    TimedOut,
}

/// A monitor guarding a `T`, exposing `lock`/`wait`/`notify_one`/`notify_all`.
pub struct ExclusiveMonitor<T> {
    state: Mutex<T>,
    cond:  Condvar,
}

impl<T> ExclusiveMonitor<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(value),
            cond:  Condvar::new(),
        }
    }

    /// Acquires the monitor's lock, blocking until available.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Atomically releases `guard`, blocks on the condition, and reacquires
    /// before returning.
    pub fn wait<'a>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.cond.wait(guard).unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// As `wait`, but gives up after `timeout` elapses. Returns
    /// `(guard, timed_out)`.
    pub fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> (MutexGuard<'a, T>, bool) {
        let (g, res) = self
            .cond
            .wait_timeout(guard, timeout)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        (g, res.timed_out())
    }

    /// Bounded, interruptible idle wait: returns once a predicate checked by
    /// the caller after each wakeup is satisfied, `interrupted` is set, or
    /// `timeout` has elapsed in total. Returns `(guard, woken_by)`.
    pub fn wait_bounded<'a>(
        &self,
        mut guard: MutexGuard<'a, T>,
        timeout: Duration,
        interrupted: &AtomicBool,
    ) -> (MutexGuard<'a, T>, WaitOutcome) {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if interrupted.load(Ordering::Acquire) {
                return (guard, WaitOutcome::Interrupted);
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return (guard, WaitOutcome::TimedOut);
            }
            let tick = remaining.min(INTERRUPT_POLL);
            let (g, timed_out) = self.wait_timeout(guard, tick);
            guard = g;
            if !timed_out {
                return (guard, WaitOutcome::Notified);
            }
        }
    }

    /// As `wait`, but returns early once `interrupted` is set, polling at
    /// `INTERRUPT_POLL` granularity. Returns `(guard, was_interrupted)`.
    pub fn wait_interruptible<'a>(
        &self,
        mut guard: MutexGuard<'a, T>,
        interrupted: &AtomicBool,
    ) -> (MutexGuard<'a, T>, bool) {
        loop {
            if interrupted.load(Ordering::Acquire) {
                return (guard, true);
            }
            let (g, timeout) = self
                .cond
                .wait_timeout(guard, INTERRUPT_POLL)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard = g;
            if !timeout.timed_out() {
                // Spurious or real wakeup: let the caller re-check its
                // predicate: interruption may or may not have caused it.
                return (guard, interrupted.load(Ordering::Acquire));
            }
        }
    }

    pub fn notify_one(&self) { self.cond.notify_one(); }

    pub fn notify_all(&self) { self.cond.notify_all(); }
}

/// Convenience alias for the common case of sharing a monitor across
/// threads via a `Handle`.
pub type SharedMonitor<T> = Arc<ExclusiveMonitor<T>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Duration};

    #[test]
    fn wait_wakes_on_notify() {
        let m = Arc::new(ExclusiveMonitor::new(false));
        let m2 = m.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let mut g = m2.lock();
            *g = true;
            m2.notify_all();
        });

        let mut g = m.lock();
        while !*g {
            g = m.wait(g);
        }
        assert!(*g);
        t.join().unwrap();
    }

    #[test]
    fn wait_interruptible_returns_on_flag() {
        let m = ExclusiveMonitor::new(());
        let flag = AtomicBool::new(false);
        let f2 = &flag;
        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(15));
                f2.store(true, Ordering::Release);
            });
            let g = m.lock();
            let (_, interrupted) = m.wait_interruptible(g, &flag);
            assert!(interrupted);
        });
    }
}
