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

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared progress counters. Written concurrently by the driver, the workers
/// and the drain with relaxed increments; read only for reporting.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    pub submitted: AtomicU64,
    pub dispatch_attempts: AtomicU64,
    pub confirmed: AtomicU64,
    pub failed: AtomicU64,
    pub overloaded: AtomicU64,
    pub retries: AtomicU64,
    pub serialization_failures: AtomicU64,
    pub transport_failures: AtomicU64,
    pub timeouts: AtomicU64,
    pub retries_exhausted: AtomicU64,
    pub abandoned: AtomicU64,
    pub inline_dispatches: AtomicU64,
    pub drained: AtomicU64,
    pub drain_restarts: AtomicU64,
}

impl ProgressCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Items with a terminal outcome.
    pub fn settled(&self) -> u64 {
        self.confirmed.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
            + self.abandoned.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            dispatch_attempts: self.dispatch_attempts.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            overloaded: self.overloaded.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            serialization_failures: self.serialization_failures.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            inline_dispatches: self.inline_dispatches.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            drain_restarts: self.drain_restarts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ProgressCounters`]. Fields are read one by one, so
/// a snapshot taken mid-run is not a consistent cut.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub submitted: u64,
    pub dispatch_attempts: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub overloaded: u64,
    pub retries: u64,
    pub serialization_failures: u64,
    pub transport_failures: u64,
    pub timeouts: u64,
    pub retries_exhausted: u64,
    pub abandoned: u64,
    pub inline_dispatches: u64,
    pub drained: u64,
    pub drain_restarts: u64,
}

impl CountersSnapshot {
    pub const fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.confirmed + self.failed + self.abandoned)
    }
}
