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

//! A guarded operation engine over a self-sizing, expiring worker pool.
//!
//! The pieces compose bottom-up:
//!
//! - [`handle::Handle`] — a reference-counted owning pointer.
//! - [`monitor::ExclusiveMonitor`], [`shared_lock::SharedLock`],
//!   [`semaphore::Semaphore`] — the blocking primitives everything else is
//!   built from.
//! - [`worker::Worker`], [`pool::WorkerPool`] — a self-expiring executor
//!   and the pool that manages a roster of them.
//! - [`operation::Operation`], [`dispatcher::DispatchLoop`],
//!   [`engine::Engine`] — a unit of guarded work, the generic dispatcher
//!   thread mechanics, and the engine that ties guards, state mutators,
//!   and the pool together.
//! - [`collection::OperationCollection`] — tracking and bulk-driving a
//!   group of operations.
//!
//! Cancellation throughout is cooperative: an interrupt flag is set, and
//! code at its own suspension points is expected to notice it. Nothing in
//! this crate preempts a running thread.

pub mod collection;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod monitor;
pub mod operation;
pub mod pool;
pub mod semaphore;
pub mod shared_lock;
pub mod worker;

pub use collection::OperationCollection;
pub use config::{EngineConfig, PoolConfig};
pub use engine::Engine;
pub use error::{Error, Result};
pub use handle::Handle;
pub use monitor::ExclusiveMonitor;
pub use operation::{Guard, Operation, Runnable, StateMutator, Unguarded};
pub use pool::WorkerPool;
pub use semaphore::Semaphore;
pub use shared_lock::SharedLock;
pub use worker::{Lifecycle as WorkerLifecycle, Worker, WorkerId};
