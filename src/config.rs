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

use std::time::Duration;

use bon::Builder;
use smart_default::SmartDefault;

/// Configuration for a [`WorkerPool`](crate::pool::WorkerPool).
#[derive(Debug, Clone, SmartDefault, Builder)]
#[builder(finish_fn = build)]
pub struct PoolConfig {
    /// Maximum number of live workers. `None` means unbounded.
    #[default(None)]
    pub max_workers: Option<usize>,

    /// Idle time after which a worker with no assignment expires.
    #[default(Duration::from_secs(120))]
    #[builder(default = Duration::from_secs(120))]
    pub expire_timeout: Duration,
}

/// Configuration for an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, SmartDefault, Builder)]
#[builder(finish_fn = build)]
pub struct EngineConfig {
    #[default(PoolConfig::builder().build())]
    #[builder(default = PoolConfig::builder().build())]
    pub pool: PoolConfig,

    /// Name used to label this engine's metrics and tracing spans.
    #[default("engine".to_string())]
    #[builder(default = "engine".to_string(), into)]
    pub name: String,

    /// How long `stop()` waits for running operations to notice
    /// interruption and return before the engine considers shutdown
    /// complete.
    #[default(Duration::from_secs(30))]
    #[builder(default = Duration::from_secs(30))]
    pub shutdown_timeout: Duration,
}
