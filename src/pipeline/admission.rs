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

//! Bounded worker pool with caller-runs admission.
//!
//! Jobs go through a bounded MPMC queue consumed by a fixed set of worker
//! tasks. When the queue is full the submitting task runs the job itself, so
//! the producer can never get ahead of the workers by more than the queue
//! capacity and nothing is ever dropped.

use super::dispatch::{Dispatcher, Job};
use crate::stats::ProgressCounters;
use flume::TrySendError;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a submitted job was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    Inline,
}

pub struct WorkerPool {
    queue: flume::Sender<Job>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<ProgressCounters>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        size: usize,
        queue_capacity: usize,
        dispatcher: Arc<Dispatcher>,
        stats: Arc<ProgressCounters>,
    ) -> Self {
        let (queue, jobs) = flume::bounded(queue_capacity);
        let workers = (0..size)
            .map(|id| tokio::spawn(run_worker(id, jobs.clone(), dispatcher.clone())))
            .collect();
        debug!("Started {size} workers with a queue of {queue_capacity} jobs");
        Self {
            queue,
            dispatcher,
            stats,
            workers,
        }
    }

    /// Hands the job to the pool, or runs it on the calling task when the
    /// queue is full. Returns once the job is queued or, for inline jobs,
    /// once it reached a terminal state.
    pub async fn submit(&self, job: Job) -> Admission {
        match self.queue.try_send(job) {
            Ok(()) => Admission::Queued,
            Err(TrySendError::Full(job)) => {
                ProgressCounters::incr(&self.stats.inline_dispatches);
                self.dispatcher.execute(job).await;
                Admission::Inline
            }
            Err(TrySendError::Disconnected(job)) => {
                warn!("No worker is consuming the queue, running job inline");
                ProgressCounters::incr(&self.stats.inline_dispatches);
                self.dispatcher.execute(job).await;
                Admission::Inline
            }
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Closes the queue and waits for the workers to finish what is queued.
    /// After `grace` the stop signal is cancelled, so pending retries are
    /// abandoned, and the workers are awaited again.
    pub async fn shutdown(self, grace: Duration, stop: &CancellationToken) {
        let Self {
            queue,
            dispatcher,
            workers,
            ..
        } = self;
        drop(queue);
        drop(dispatcher);

        let joined = join_all(workers);
        tokio::pin!(joined);
        let results = match tokio::time::timeout(grace, &mut joined).await {
            Ok(results) => results,
            Err(_) => {
                warn!("Workers still busy after {grace:?}, abandoning pending retries");
                stop.cancel();
                joined.await
            }
        };

        for result in results {
            if let Err(e) = result {
                error!("Worker failed: {e}");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn run_worker(id: usize, jobs: flume::Receiver<Job>, dispatcher: Arc<Dispatcher>) {
    while let Ok(job) = jobs.recv_async().await {
        dispatcher.execute(job).await;
    }
    debug!("Worker {id} exiting, queue closed");
}
