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

//! The dedicated dispatcher thread shared by every FIFO-consuming engine
//! (spec §4.7).
//!
//! Grounded in `original_source/rt/cpp/db/rt/JobDispatcher.cpp`'s
//! `run`/`dispatchJobs`/`wakeup` trio: a thread loops calling a dispatch
//! pass while a "should dispatch" flag is set, and otherwise blocks on a
//! monitor until `wakeup` is called. The original re-implements this loop
//! separately in `JobDispatcher` and in `Engine`/`OperationDispatcher`
//! (which both subclass it); this port keeps the one mechanism and has
//! [`crate::engine::Engine`] supply its pass as a closure instead.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{Builder, JoinHandle},
    time::Duration,
};

use crate::monitor::ExclusiveMonitor;

/// Stack size for the dispatcher thread (spec §4.7): the original starts
/// its dispatcher thread with a 128 KiB stack rather than the platform
/// default, since it only ever walks short-lived, shallow call chains.
pub const DISPATCHER_STACK_SIZE: usize = 128 * 1024;

const IDLE_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 100);

/// Drives a single dedicated OS thread that repeatedly calls a caller
/// supplied `pass` closure while "dispatchable", and parks otherwise.
pub struct DispatchLoop {
    dispatch:    ExclusiveMonitor<bool>,
    interrupted: AtomicBool,
    thread:      std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Default for DispatchLoop {
    fn default() -> Self { Self::new() }
}

impl DispatchLoop {
    #[must_use]
    pub fn new() -> Self {
        Self {
            dispatch:    ExclusiveMonitor::new(false),
            interrupted: AtomicBool::new(false),
            thread:      std::sync::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_some()
    }

    /// Spawns the dispatcher thread. `pass` is called whenever the loop is
    /// flagged dispatchable; it should return `true` if it made forward
    /// progress (causing another pass to run immediately) or `false` if it
    /// found nothing to do (causing the loop to park until the next
    /// [`wakeup`](Self::wakeup)). No-op if already running.
    pub fn start(self: &Arc<Self>, thread_name: String, mut pass: impl FnMut() -> bool + Send + 'static) {
        let mut slot = self.thread.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        self.interrupted.store(false, Ordering::Release);

        let me = self.clone();
        let handle = Builder::new()
            .name(thread_name)
            .stack_size(DISPATCHER_STACK_SIZE)
            .spawn(move || {
                loop {
                    if me.interrupted.load(Ordering::Acquire) {
                        break;
                    }

                    let mut g = me.dispatch.lock();
                    if !*g {
                        let (g2, outcome) = me.dispatch.wait_bounded(g, IDLE_WAIT, &me.interrupted);
                        g = g2;
                        if matches!(outcome, crate::monitor::WaitOutcome::Interrupted) {
                            break;
                        }
                        if !*g {
                            continue;
                        }
                    }
                    *g = false;
                    drop(g);

                    if pass() {
                        let mut g = me.dispatch.lock();
                        *g = true;
                    }
                }
            })
            .expect("failed to spawn dispatcher thread");

        *slot = Some(handle);
    }

    /// Flags the loop dispatchable and wakes it if parked.
    pub fn wakeup(&self) {
        let mut g = self.dispatch.lock();
        *g = true;
        drop(g);
        self.dispatch.notify_all();
    }

    /// Interrupts the dispatcher thread and blocks until it has joined.
    pub fn stop(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.dispatch.notify_all();
        let handle = self.thread.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
