// Copyright 2024 Golem Cloud
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

lazy_static! {
    static ref TASKS_EXECUTED: IntCounterVec = register_int_counter_vec!(
        "netpool_tasks_executed_total",
        "Number of executed driver tasks",
        &["op", "outcome"]
    )
    .unwrap();
    static ref BALANCER_RUNS: IntCounter = register_int_counter!(
        "netpool_balancer_runs_total",
        "Number of completed balancer ticks"
    )
    .unwrap();
    static ref RESOURCES_REAPED: IntCounter = register_int_counter!(
        "netpool_resources_reaped_total",
        "Number of terminal resources removed from the store"
    )
    .unwrap();
}

pub fn record_task_executed(op: &str, outcome: &str) {
    TASKS_EXECUTED.with_label_values(&[op, outcome]).inc();
}

pub fn record_balancer_run() {
    BALANCER_RUNS.inc();
}

pub fn record_resource_reaped() {
    RESOURCES_REAPED.inc();
}

/// Force-registers all metrics into the default registry and returns it for
/// the exporter endpoint.
pub fn register_all() -> prometheus::Registry {
    lazy_static::initialize(&TASKS_EXECUTED);
    lazy_static::initialize(&BALANCER_RUNS);
    lazy_static::initialize(&RESOURCES_REAPED);
    prometheus::default_registry().clone()
}
