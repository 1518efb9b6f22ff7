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

//! Queues ten operations onto a four-worker engine and waits for all of
//! them to finish, demonstrating bounded fanout (spec.md scenario S1).

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use rsketch_modest::{Engine, EngineConfig, Operation, PoolConfig};

fn main() {
    tracing_subscriber::fmt::init();

    let engine = Engine::new(
        &EngineConfig::builder()
            .name("fanout-demo")
            .pool(PoolConfig::builder().max_workers(4).expire_timeout(Duration::from_secs(5)).build())
            .build(),
    );
    engine.start();

    let running = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));
    let ops: Vec<Operation> = (0..10)
        .map(|i| {
            let running = running.clone();
            let max_seen = max_seen.clone();
            let order = order.clone();
            Operation::new(
                move |_op: &Operation| {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    order.lock().unwrap().push(i);
                    running.fetch_sub(1, Ordering::SeqCst);
                },
                None,
                None,
            )
        })
        .collect();

    for op in &ops {
        engine.queue(op.clone()).expect("engine is running");
    }
    for op in &ops {
        op.wait_for(None);
    }

    engine.stop();

    let mut seen = order.lock().unwrap().clone();
    seen.sort_unstable();
    tracing::info!(
        max_concurrent = max_seen.load(Ordering::SeqCst),
        completed = seen.len(),
        "fanout demo finished"
    );
    assert!(max_seen.load(Ordering::SeqCst) <= 4);
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}
