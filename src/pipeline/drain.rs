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

//! Completion draining.
//!
//! Every processed item leaves a [`SubmissionHandle`] in a bounded channel.
//! If nobody consumes them the channel fills up, dispatchers block on it and
//! the whole pipeline stalls. The drain loop consumes handles, the supervisor
//! restarts it when it dies, and the watchdog stops the run when the backlog
//! keeps growing anyway.

use super::dispatch::SubmissionHandle;
use crate::config::DrainConfig;
use crate::stats::ProgressCounters;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Hook invoked for every drained handle before it is discarded.
pub type HandleInspector = Arc<dyn Fn(&SubmissionHandle) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    #[error("completion drain failed after {restarts} restart(s)")]
    DrainFailed { restarts: u32 },
    #[error("completion channel backlog at {depth}/{capacity} handles")]
    CompletionBacklog { depth: usize, capacity: usize },
}

/// Trips once, cancelling the run's stop signal. The first reason wins.
pub struct RunCircuit {
    stop: CancellationToken,
    reason: OnceLock<AbortReason>,
}

impl RunCircuit {
    pub fn new(stop: CancellationToken) -> Self {
        Self {
            stop,
            reason: OnceLock::new(),
        }
    }

    pub fn trip(&self, reason: AbortReason) {
        if self.reason.set(reason).is_ok() {
            error!("Aborting run: {reason}");
        }
        self.stop.cancel();
    }

    pub fn reason(&self) -> Option<AbortReason> {
        self.reason.get().copied()
    }

    pub fn is_tripped(&self) -> bool {
        self.reason.get().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainExit {
    /// Every sender is gone and the channel is empty.
    Disconnected,
    /// Stop signal observed; whatever was already queued has been consumed.
    Stopped,
}

pub async fn drain_loop(
    completions: flume::Receiver<SubmissionHandle>,
    stop: CancellationToken,
    stats: Arc<ProgressCounters>,
    inspector: Option<HandleInspector>,
) -> DrainExit {
    let consume = |handle: SubmissionHandle| {
        ProgressCounters::incr(&stats.drained);
        if let Some(inspect) = &inspector {
            inspect(&handle);
        }
        trace!(
            "Drained {:?} after {} attempt(s)",
            handle.outcome, handle.attempts
        );
    };

    loop {
        tokio::select! {
            biased;
            received = completions.recv_async() => match received {
                Ok(handle) => consume(handle),
                Err(_) => return DrainExit::Disconnected,
            },
            _ = stop.cancelled() => {
                for handle in completions.try_iter() {
                    consume(handle);
                }
                return DrainExit::Stopped;
            }
        }
    }
}

/// Runs [`drain_loop`] in its own task and restarts it if it panics.
pub struct DrainSupervisor {
    completions: flume::Receiver<SubmissionHandle>,
    stop: CancellationToken,
    stats: Arc<ProgressCounters>,
    circuit: Arc<RunCircuit>,
    max_restarts: u32,
    inspector: Option<HandleInspector>,
}

impl DrainSupervisor {
    pub fn new(
        completions: flume::Receiver<SubmissionHandle>,
        stop: CancellationToken,
        stats: Arc<ProgressCounters>,
        circuit: Arc<RunCircuit>,
        max_restarts: u32,
    ) -> Self {
        Self {
            completions,
            stop,
            stats,
            circuit,
            max_restarts,
            inspector: None,
        }
    }

    pub fn with_inspector(mut self, inspector: HandleInspector) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.supervise())
    }

    async fn supervise(self) {
        let mut restarts = 0u32;
        loop {
            let task = tokio::spawn(drain_loop(
                self.completions.clone(),
                self.stop.clone(),
                self.stats.clone(),
                self.inspector.clone(),
            ));

            match task.await {
                Ok(exit) => {
                    debug!("Completion drain finished: {exit:?}");
                    return;
                }
                Err(e) if restarts >= self.max_restarts => {
                    error!("Completion drain failed for good: {e}");
                    self.circuit.trip(AbortReason::DrainFailed { restarts });
                    return;
                }
                Err(e) => {
                    restarts += 1;
                    ProgressCounters::incr(&self.stats.drain_restarts);
                    warn!(
                        "Completion drain died ({e}), restarting ({restarts}/{})",
                        self.max_restarts
                    );
                }
            }
        }
    }
}

/// Samples the completion backlog and trips the run circuit when it stays
/// above the threshold for too many consecutive samples.
pub struct BacklogWatchdog {
    completions: flume::Receiver<SubmissionHandle>,
    capacity: usize,
    limit: usize,
    strikes: u32,
    interval: Duration,
    stop: CancellationToken,
    circuit: Arc<RunCircuit>,
}

impl BacklogWatchdog {
    pub fn new(
        completions: flume::Receiver<SubmissionHandle>,
        capacity: usize,
        config: &DrainConfig,
        stop: CancellationToken,
        circuit: Arc<RunCircuit>,
    ) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let limit = ((capacity as f64) * config.backlog_threshold).ceil() as usize;
        Self {
            completions,
            capacity,
            limit: limit.clamp(1, capacity.max(1)),
            strikes: config.backlog_strikes,
            interval: config.watchdog_interval,
            stop,
            circuit,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut consecutive = 0u32;
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if self.completions.is_disconnected() && self.completions.is_empty() {
                return;
            }

            let depth = self.completions.len();
            if depth < self.limit {
                consecutive = 0;
                continue;
            }

            consecutive += 1;
            warn!(
                "Completion backlog {depth}/{} ({consecutive}/{} strikes)",
                self.capacity, self.strikes
            );
            if consecutive >= self.strikes {
                self.circuit.trip(AbortReason::CompletionBacklog {
                    depth,
                    capacity: self.capacity,
                });
                return;
            }
        }
    }
}
