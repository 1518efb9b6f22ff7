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

use lazy_static::lazy_static;
use prometheus::*;

pub const ENGINE_LABEL: &str = "engine";

lazy_static! {
    pub static ref OPERATIONS_QUEUED: IntCounterVec = register_int_counter_vec!(
        "modest_operations_queued_total",
        "Total number of operations queued onto an engine",
        &[ENGINE_LABEL]
    )
    .unwrap();
    pub static ref OPERATIONS_ADMITTED: IntCounterVec = register_int_counter_vec!(
        "modest_operations_admitted_total",
        "Total number of operations admitted to the worker pool",
        &[ENGINE_LABEL]
    )
    .unwrap();
    pub static ref OPERATIONS_CANCELLED: IntCounterVec = register_int_counter_vec!(
        "modest_operations_cancelled_total",
        "Total number of operations cancelled before execution",
        &[ENGINE_LABEL]
    )
    .unwrap();
    pub static ref OPERATIONS_COMPLETED: IntCounterVec = register_int_counter_vec!(
        "modest_operations_completed_total",
        "Total number of operations that ran to completion",
        &[ENGINE_LABEL]
    )
    .unwrap();
    pub static ref QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        "modest_queue_depth",
        "Number of operations currently pending in an engine's FIFO",
        &[ENGINE_LABEL]
    )
    .unwrap();
    pub static ref POOL_WORKERS_LIVE: IntGaugeVec = register_int_gauge_vec!(
        "modest_pool_workers_live",
        "Number of live workers in a pool (assigned + idle)",
        &[ENGINE_LABEL]
    )
    .unwrap();
    pub static ref POOL_WORKERS_EXPIRED: IntCounterVec = register_int_counter_vec!(
        "modest_pool_workers_expired_total",
        "Total number of workers reaped after idle expiry",
        &[ENGINE_LABEL]
    )
    .unwrap();
}
