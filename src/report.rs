/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

use crate::config::{BenchConfig, Profile, RetryMode, TransportPolicy};
use crate::error::StressError;
use crate::pipeline::drain::AbortReason;
use crate::stats::CountersSnapshot;
use human_repr::HumanCount;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// End-of-run report, serializable to JSON for `--output`.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub store: String,
    pub settings: RunSettings,
    pub corpus_generation_secs: f64,
    pub load_phase_secs: f64,
    pub total_secs: f64,
    pub counters: CountersSnapshot,
    pub confirmed_per_sec: f64,
    pub attempts_per_sec: f64,
    pub abort_reason: Option<AbortReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSettings {
    pub corpus_size: usize,
    pub batches: u32,
    pub value_size: usize,
    pub pool_size: usize,
    pub queue_capacity: usize,
    pub completion_capacity: usize,
    pub profile: Profile,
    pub retry_mode: RetryMode,
    pub transport_policy: TransportPolicy,
}

impl RunSettings {
    fn from_config(config: &BenchConfig) -> Self {
        let pipeline = &config.pipeline;
        Self {
            corpus_size: pipeline.corpus_size,
            batches: pipeline.batches,
            value_size: pipeline.value_size,
            pool_size: pipeline.pool_size,
            queue_capacity: pipeline.queue_capacity,
            completion_capacity: pipeline.completion_capacity,
            profile: config.retry.profile,
            retry_mode: config.retry.effective_mode(),
            transport_policy: config.retry.transport,
        }
    }
}

impl BenchmarkReport {
    pub fn build(
        store: &str,
        config: &BenchConfig,
        counters: CountersSnapshot,
        corpus_generation: Duration,
        load_phase: Duration,
        abort_reason: Option<AbortReason>,
    ) -> Self {
        let load_phase_secs = load_phase.as_secs_f64();
        Self {
            store: store.to_owned(),
            settings: RunSettings::from_config(config),
            corpus_generation_secs: corpus_generation.as_secs_f64(),
            load_phase_secs,
            total_secs: (corpus_generation + load_phase).as_secs_f64(),
            confirmed_per_sec: per_sec(counters.confirmed, load_phase_secs),
            attempts_per_sec: per_sec(counters.dispatch_attempts, load_phase_secs),
            counters,
            abort_reason,
        }
    }

    pub fn print_summary(&self) {
        let c = &self.counters;
        let s = &self.settings;
        println!("\n=== WRITE LOAD REPORT ===");
        println!(
            "Store: {} ({} x {} entries of {} B, pool {}, {} profile, {} retries, {} on transport failure)",
            self.store,
            s.batches.human_count_bare(),
            s.corpus_size.human_count_bare(),
            s.value_size,
            s.pool_size,
            s.profile,
            s.retry_mode,
            s.transport_policy
        );
        println!(
            "Duration: {:.1}s (corpus: {:.1}s, load: {:.1}s)",
            self.total_secs, self.corpus_generation_secs, self.load_phase_secs
        );
        println!(
            "Items: {} submitted, {} confirmed, {} failed, {} abandoned",
            c.submitted.human_count_bare(),
            c.confirmed.human_count_bare(),
            c.failed.human_count_bare(),
            c.abandoned.human_count_bare()
        );
        println!(
            "Failures: {} serialization, {} transport, {} timeout, {} retries exhausted",
            c.serialization_failures,
            c.transport_failures,
            c.timeouts,
            c.retries_exhausted
        );
        println!(
            "Dispatch: {} attempts, {} overloaded, {} retries, {} inline",
            c.dispatch_attempts.human_count_bare(),
            c.overloaded.human_count_bare(),
            c.retries.human_count_bare(),
            c.inline_dispatches.human_count_bare()
        );
        println!(
            "Drain: {} handles, {} restarts",
            c.drained.human_count_bare(),
            c.drain_restarts
        );
        println!(
            "Throughput: {:.0} confirmed/s, {:.0} attempts/s",
            self.confirmed_per_sec, self.attempts_per_sec
        );
        match &self.abort_reason {
            Some(reason) => println!("Result: ABORTED ({reason})"),
            None => println!("Result: COMPLETED"),
        }
        println!("=========================\n");
    }

    pub fn write_json(&self, path: &Path) -> Result<(), StressError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| StressError::Io {
            context: format!("serializing report for {}", path.display()),
            source: e.into(),
        })?;
        fs::write(path, json).map_err(|source| StressError::Io {
            context: format!("writing report to {}", path.display()),
            source,
        })
    }
}

fn per_sec(count: u64, secs: f64) -> f64 {
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}
