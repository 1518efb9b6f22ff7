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

//! Error kinds produced at the edges of the scheduler.
//!
//! Blocking primitives (`Semaphore`, `ExclusiveMonitor`, `SharedLock`)
//! report interruption and misuse through return values, not through this
//! type — see spec §7. `Error` only covers the engine-level lifecycle
//! failures that are meaningful to a caller: queuing onto a stopped engine,
//! and invalid configuration.

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// `Engine::queue` was called after `stop()` and before the next
    /// `start()`. The operation is not enqueued.
    #[snafu(display("engine is not running, operation was not queued"))]
    EngineNotRunning {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// A `set_max_permits` / `set_max_workers` call received a value that
    /// cannot be honoured (e.g. permits requested beyond what the type can
    /// represent).
    #[snafu(display("invalid argument: {message}"))]
    InvalidArgument {
        message: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}
