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

//! Operations submitted to an [`Engine`](crate::engine::Engine): the work
//! itself, an optional admission guard, and an optional pair of state
//! mutators run around admission (spec §4.6).

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use uuid::Uuid;

use crate::{
    handle::Handle,
    monitor::ExclusiveMonitor,
};

/// The work an operation performs once admitted to the worker pool.
///
/// Implementors observe their own [`Operation`] to check
/// [`Operation::is_interrupted`] at their own suspension points — the
/// engine never preempts a running operation (spec §1 non-goals).
pub trait Runnable: Send + 'static {
    fn run(&self, op: &Operation);
}

impl<F: Fn(&Operation) + Send + 'static> Runnable for F {
    fn run(&self, op: &Operation) { self(op); }
}

/// Admission policy consulted by the engine's dispatch loop for every
/// pending operation, in FIFO order, on every pass (spec §4.8).
pub trait Guard: Send + Sync + 'static {
    /// Returns `true` if `op` may be handed to the worker pool right now.
    fn can_execute(&self, op: &Operation) -> bool;

    /// Returns `true` if `op` should instead be cancelled without ever
    /// running. Checked before `can_execute`. Default: never cancel.
    fn must_cancel(&self, _op: &Operation) -> bool { false }
}

/// A guard that always admits immediately; the default for operations
/// queued without one.
pub struct Unguarded;

impl Guard for Unguarded {
    fn can_execute(&self, _op: &Operation) -> bool { true }
}

/// Hooks run by the engine immediately around admission, under the
/// engine's own lock (spec §4.8, capacity-before-`mutate_pre` ordering).
pub trait StateMutator: Send + Sync + 'static {
    /// Runs after the capacity check succeeds and before the job is handed
    /// to the pool. Runs on the dispatcher thread, so it must be quick.
    fn mutate_pre(&self, _op: &Operation) {}

    /// Runs on the worker thread immediately after `Runnable::run` returns.
    fn mutate_post(&self, _op: &Operation) {}
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OperationId(Uuid);

impl OperationId {
    fn new() -> Self { Self(Uuid::new_v4()) }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

struct Lifecycle {
    admitted: bool,
    stopped:  bool,
}

struct OperationImpl {
    id:          OperationId,
    runnable:    Box<dyn Runnable>,
    guard:       Arc<dyn Guard>,
    mutator:     Option<Arc<dyn StateMutator>>,
    interrupted: AtomicBool,
    lifecycle:   ExclusiveMonitor<Lifecycle>,
    /// Set by whichever engine this operation is currently queued on, so
    /// `interrupt()` can wake its dispatcher to re-evaluate the operation
    /// immediately rather than waiting for an unrelated wake edge (spec
    /// §4.8: "An operation still queued when interrupted is cancelled by
    /// the dispatcher at its next evaluation").
    wakeup: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

/// A handle to a unit of work queued on an engine. Cheap to clone; all
/// clones refer to the same underlying operation (spec §9, intrusive
/// reference counting via [`Handle`]).
#[derive(Clone)]
pub struct Operation(Handle<OperationImpl>);

impl Operation {
    /// Builds an operation around `runnable`, an optional admission
    /// [`Guard`] (defaulting to [`Unguarded`]), and an optional
    /// [`StateMutator`] run around admission.
    #[must_use]
    pub fn new(
        runnable: impl Runnable,
        guard: Option<Arc<dyn Guard>>,
        mutator: Option<Arc<dyn StateMutator>>,
    ) -> Self {
        Self(Handle::new(OperationImpl {
            id:          OperationId::new(),
            runnable:    Box::new(runnable),
            guard:       guard.unwrap_or_else(|| Arc::new(Unguarded)),
            mutator,
            interrupted: AtomicBool::new(false),
            lifecycle:   ExclusiveMonitor::new(Lifecycle {
                admitted: false,
                stopped:  false,
            }),
            wakeup:      Mutex::new(None),
        }))
    }

    #[must_use]
    pub fn id(&self) -> OperationId { self.0.id }

    /// Pointer identity of the underlying allocation, stable for the
    /// lifetime of every clone of this operation. Used by
    /// [`OperationCollection`](crate::collection::OperationCollection) as an
    /// O(1) index key (spec §3: "pointer-index for O(1) removal").
    #[must_use]
    pub(crate) fn ptr(&self) -> usize { Handle::as_ptr(&self.0) as usize }

    #[must_use]
    pub(crate) fn guard(&self) -> Arc<dyn Guard> { self.0.guard.clone() }

    /// Registers `f` to be called on `interrupt()` while this operation is
    /// queued on an engine. Called by `Engine::queue`; cleared once the
    /// dispatcher removes the operation from its FIFO (admitted or
    /// cancelled), so a later `interrupt()` on a running or finished
    /// operation is just a flag set, not a stray wakeup.
    pub(crate) fn attach_wakeup(&self, f: Arc<dyn Fn() + Send + Sync>) {
        *self.0.wakeup.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(f);
    }

    pub(crate) fn clear_wakeup(&self) {
        *self.0.wakeup.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    pub(crate) fn run_mutate_pre(&self) {
        if let Some(m) = &self.0.mutator {
            m.mutate_pre(self);
        }
    }

    fn run_mutate_post(&self) {
        if let Some(m) = &self.0.mutator {
            m.mutate_post(self);
        }
    }

    /// Marks this operation as cooperatively interrupted. Checked by
    /// `is_interrupted` and any blocking wait the running `Runnable`
    /// performs through this operation.
    pub fn interrupt(&self) {
        self.0.interrupted.store(true, Ordering::Release);
        let hook = self.0.wakeup.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        if let Some(f) = hook {
            f();
        }
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool { self.0.interrupted.load(Ordering::Acquire) }

    /// The operation's own interrupt flag, for handing to a blocking
    /// primitive (`Semaphore::acquire`, `ExclusiveMonitor::wait_bounded`)
    /// so the runnable's suspension points notice `interrupt()` directly
    /// instead of polling `is_interrupted()` in a spin loop.
    #[must_use]
    pub fn interrupt_flag(&self) -> &AtomicBool { &self.0.interrupted }

    #[must_use]
    pub fn is_admitted(&self) -> bool { self.0.lifecycle.lock().admitted }

    #[must_use]
    pub fn is_stopped(&self) -> bool { self.0.lifecycle.lock().stopped }

    /// Blocks the caller until the operation has run to completion or been
    /// cancelled. When `interrupted` is given, also returns early (with
    /// `false`) once that flag is observed set; pass `None` for an
    /// uninterruptible wait.
    pub fn wait_for(&self, interrupted: Option<&AtomicBool>) -> bool {
        const UNBOUNDED: std::time::Duration = std::time::Duration::from_secs(60 * 60 * 24 * 365 * 100);

        let mut g = self.0.lifecycle.lock();
        loop {
            if g.stopped {
                return true;
            }
            match interrupted {
                Some(flag) => {
                    let (g2, outcome) = self.0.lifecycle.wait_bounded(g, UNBOUNDED, flag);
                    g = g2;
                    if matches!(outcome, crate::monitor::WaitOutcome::Interrupted) && !g.stopped {
                        return false;
                    }
                }
                None => g = self.0.lifecycle.wait(g),
            }
        }
    }

    /// Runs the underlying work. Called by the engine on the worker thread
    /// with no engine lock held (spec §5: "No lock is held across a
    /// runnable's execution"); pair with [`finish`](Self::finish) to
    /// complete the operation. Never called twice for the same operation.
    pub(crate) fn run_body(&self) {
        {
            let mut g = self.0.lifecycle.lock();
            g.admitted = true;
        }
        self.0.runnable.run(self);
    }

    /// Runs `mutate_post`, marks the operation stopped, and notifies
    /// waiters. Must be called with the owning engine's own lock held, so
    /// that operations completing concurrently on different workers
    /// serialize their `mutate_post` calls through that lock exactly as
    /// `mutate_pre` already does (spec §4.6: both run "under the engine's
    /// lock"; §5: engine lock → ... → operation lock ordering).
    pub(crate) fn finish(&self) {
        self.run_mutate_post();
        let mut g = self.0.lifecycle.lock();
        g.stopped = true;
        drop(g);
        self.0.lifecycle.notify_all();
    }

    /// Runs the operation to completion outside of any engine: `run_body`
    /// immediately followed by `finish`. Used directly by tests and by
    /// callers that don't need engine-serialized `mutate_post`;
    /// engine-admitted operations instead call `run_body` and `finish`
    /// separately so the engine can hold its own lock across `finish`.
    pub(crate) fn execute(&self) {
        self.run_body();
        self.finish();
    }

    /// Marks the operation stopped without ever running it (cancellation
    /// via `Guard::must_cancel`).
    pub(crate) fn cancel(&self) {
        let mut g = self.0.lifecycle.lock();
        g.stopped = true;
        drop(g);
        self.0.lifecycle.notify_all();
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool { self.0 == other.0 }
}

impl Eq for Operation {}
