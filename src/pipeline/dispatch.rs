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

use super::retry::RetryPolicy;
use crate::config::{BenchConfig, TransportPolicy};
use crate::corpus::Key;
use crate::stats::ProgressCounters;
use crate::store::{Store, StoreFailure, WriteOutcome};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// One logical write: a key and the value to put under it.
#[derive(Debug, Clone)]
pub struct Job {
    pub key: Key,
    pub value: Bytes,
}

impl Job {
    pub fn new(key: Key, value: Bytes) -> Self {
        Self { key, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    Serialization,
    Transport,
    Timeout,
    RetriesExhausted,
}

/// Terminal state of a logical write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Confirmed,
    Failed(FailureKind),
    /// The run was stopping while the item waited for a slot or a backoff.
    Abandoned,
}

/// Completion signal of one submission, consumed exactly once by the drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionHandle {
    pub outcome: ItemOutcome,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub retry: RetryPolicy,
    pub transport: TransportPolicy,
    pub op_timeout: Duration,
    pub ttl: Option<Duration>,
}

impl DispatchSettings {
    pub fn from_config(config: &BenchConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config.retry),
            transport: config.retry.transport,
            op_timeout: config.pipeline.op_timeout,
            ttl: config.pipeline.write_ttl,
        }
    }
}

/// Runs the per-item state machine
/// `Pending -> Dispatched -> (Retrying -> Dispatched)* -> Confirmed | Failed | Abandoned`.
///
/// Shared by the pool workers and by the driver when it executes a job inline.
/// Every item holds one of `permits` while it is processed, which caps the
/// number of store operations in flight.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    stats: Arc<ProgressCounters>,
    settings: DispatchSettings,
    permits: Arc<Semaphore>,
    completions: flume::Sender<SubmissionHandle>,
    stop: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        stats: Arc<ProgressCounters>,
        settings: DispatchSettings,
        permits: Arc<Semaphore>,
        completions: flume::Sender<SubmissionHandle>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            store,
            stats,
            settings,
            permits,
            completions,
            stop,
        }
    }

    pub async fn execute(&self, job: Job) {
        let permit = tokio::select! {
            biased;
            _ = self.stop.cancelled() => None,
            permit = self.permits.acquire() => permit.ok(),
        };

        let handle = match permit {
            Some(_permit) => self.process(&job).await,
            None => SubmissionHandle {
                outcome: ItemOutcome::Abandoned,
                attempts: 0,
            },
        };

        self.record(handle.outcome);
        self.complete(handle).await;
    }

    async fn process(&self, job: &Job) -> SubmissionHandle {
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            ProgressCounters::incr(&self.stats.dispatch_attempts);

            let dispatched = tokio::time::timeout(
                self.settings.op_timeout,
                self.store
                    .submit_write(&job.key, job.value.clone(), self.settings.ttl),
            )
            .await;

            let failure = match dispatched {
                Ok(WriteOutcome::Accepted) => {
                    return SubmissionHandle {
                        outcome: ItemOutcome::Confirmed,
                        attempts,
                    };
                }
                Ok(WriteOutcome::Overloaded) => {
                    ProgressCounters::incr(&self.stats.overloaded);
                    None
                }
                Ok(WriteOutcome::Failed(StoreFailure::Serialization(reason))) => {
                    trace!("Write of {} rejected: {reason}", job.key);
                    return SubmissionHandle {
                        outcome: ItemOutcome::Failed(FailureKind::Serialization),
                        attempts,
                    };
                }
                Ok(WriteOutcome::Failed(StoreFailure::Transport(reason))) => {
                    trace!("Write of {} failed in transport: {reason}", job.key);
                    Some(FailureKind::Transport)
                }
                Err(_) => Some(FailureKind::Timeout),
            };

            if let Some(kind) = failure
                && self.settings.transport == TransportPolicy::Abandon
            {
                return SubmissionHandle {
                    outcome: ItemOutcome::Failed(kind),
                    attempts,
                };
            }

            let Some(delay) = self.settings.retry.next_delay(attempts) else {
                return SubmissionHandle {
                    outcome: ItemOutcome::Failed(FailureKind::RetriesExhausted),
                    attempts,
                };
            };

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    return SubmissionHandle {
                        outcome: ItemOutcome::Abandoned,
                        attempts,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
            ProgressCounters::incr(&self.stats.retries);
        }
    }

    fn record(&self, outcome: ItemOutcome) {
        let stats = &self.stats;
        match outcome {
            ItemOutcome::Confirmed => ProgressCounters::incr(&stats.confirmed),
            ItemOutcome::Abandoned => ProgressCounters::incr(&stats.abandoned),
            ItemOutcome::Failed(kind) => {
                ProgressCounters::incr(&stats.failed);
                ProgressCounters::incr(match kind {
                    FailureKind::Serialization => &stats.serialization_failures,
                    FailureKind::Transport => &stats.transport_failures,
                    FailureKind::Timeout => &stats.timeouts,
                    FailureKind::RetriesExhausted => &stats.retries_exhausted,
                });
            }
        }
    }

    /// Blocks while the completion channel is full. The drain outlives the
    /// workers, so a handle is only lost once every receiver is gone.
    async fn complete(&self, handle: SubmissionHandle) {
        if self.completions.send_async(handle).await.is_err() {
            trace!("Completion channel closed, dropping handle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{CorpusGenerator, derive_key};
    use crate::store::MockStore;
    use std::sync::atomic::Ordering;

    struct Fixture {
        dispatcher: Dispatcher,
        stats: Arc<ProgressCounters>,
        completions: flume::Receiver<SubmissionHandle>,
        stop: CancellationToken,
    }

    fn settings(retry: RetryPolicy, transport: TransportPolicy) -> DispatchSettings {
        DispatchSettings {
            retry,
            transport,
            op_timeout: Duration::from_secs(1),
            ttl: None,
        }
    }

    fn unbounded() -> RetryPolicy {
        RetryPolicy::Unbounded {
            backoff: Duration::from_millis(1),
        }
    }

    fn fixture(store: MockStore, settings: DispatchSettings) -> Fixture {
        let stats = Arc::new(ProgressCounters::default());
        let (tx, rx) = flume::bounded(16);
        let stop = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            Arc::new(store),
            stats.clone(),
            settings,
            Arc::new(Semaphore::new(1)),
            tx,
            stop.clone(),
        );
        Fixture {
            dispatcher,
            stats,
            completions: rx,
            stop,
        }
    }

    fn job() -> Job {
        let corpus = CorpusGenerator::new(42, 16).generate(1).unwrap();
        Job::new(derive_key(0, &corpus[0]), corpus[0].value())
    }

    #[tokio::test]
    async fn given_accepted_write_should_confirm_on_first_attempt() {
        let mut store = MockStore::new();
        store
            .expect_submit_write()
            .times(1)
            .returning(|_, _, _| WriteOutcome::Accepted);
        let fixture = fixture(store, settings(unbounded(), TransportPolicy::Abandon));

        fixture.dispatcher.execute(job()).await;

        let handle = fixture.completions.try_recv().unwrap();
        assert_eq!(handle.outcome, ItemOutcome::Confirmed);
        assert_eq!(handle.attempts, 1);
        assert_eq!(fixture.stats.confirmed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn given_overload_should_retry_same_key_until_accepted() {
        let expected_key = job().key;
        let mut store = MockStore::new();
        let mut calls = 0;
        store
            .expect_submit_write()
            .withf(move |key, _, _| key.as_str() == expected_key.as_str())
            .times(3)
            .returning(move |_, _, _| {
                calls += 1;
                if calls <= 2 {
                    WriteOutcome::Overloaded
                } else {
                    WriteOutcome::Accepted
                }
            });
        let fixture = fixture(store, settings(unbounded(), TransportPolicy::Abandon));

        fixture.dispatcher.execute(job()).await;

        let handle = fixture.completions.try_recv().unwrap();
        assert_eq!(handle.outcome, ItemOutcome::Confirmed);
        assert_eq!(handle.attempts, 3);
        let snapshot = fixture.stats.snapshot();
        assert_eq!(snapshot.confirmed, 1);
        assert_eq!(snapshot.overloaded, 2);
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.dispatch_attempts, 3);
    }

    #[tokio::test]
    async fn given_serialization_failure_should_not_retry() {
        let mut store = MockStore::new();
        store.expect_submit_write().times(1).returning(|_, _, _| {
            WriteOutcome::Failed(StoreFailure::Serialization("not serializable".into()))
        });
        let fixture = fixture(store, settings(unbounded(), TransportPolicy::Retry));

        fixture.dispatcher.execute(job()).await;

        let handle = fixture.completions.try_recv().unwrap();
        assert_eq!(
            handle.outcome,
            ItemOutcome::Failed(FailureKind::Serialization)
        );
        assert_eq!(fixture.stats.serialization_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn given_transport_failure_with_abandon_policy_should_fail_item() {
        let mut store = MockStore::new();
        store.expect_submit_write().times(1).returning(|_, _, _| {
            WriteOutcome::Failed(StoreFailure::Transport("connection reset".into()))
        });
        let fixture = fixture(store, settings(unbounded(), TransportPolicy::Abandon));

        fixture.dispatcher.execute(job()).await;

        let handle = fixture.completions.try_recv().unwrap();
        assert_eq!(handle.outcome, ItemOutcome::Failed(FailureKind::Transport));
        assert_eq!(fixture.stats.transport_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn given_transport_failure_with_retry_policy_should_exhaust_capped_attempts() {
        let mut store = MockStore::new();
        store.expect_submit_write().times(3).returning(|_, _, _| {
            WriteOutcome::Failed(StoreFailure::Transport("connection reset".into()))
        });
        let capped = RetryPolicy::Capped {
            max_attempts: 3,
            base: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            jitter: false,
        };
        let fixture = fixture(store, settings(capped, TransportPolicy::Retry));

        fixture.dispatcher.execute(job()).await;

        let handle = fixture.completions.try_recv().unwrap();
        assert_eq!(
            handle.outcome,
            ItemOutcome::Failed(FailureKind::RetriesExhausted)
        );
        assert_eq!(handle.attempts, 3);
        assert_eq!(fixture.stats.retries_exhausted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn given_stop_during_backoff_should_abandon_item() {
        let mut store = MockStore::new();
        store
            .expect_submit_write()
            .returning(|_, _, _| WriteOutcome::Overloaded);
        let long_backoff = RetryPolicy::Unbounded {
            backoff: Duration::from_secs(60),
        };
        let fixture = fixture(store, settings(long_backoff, TransportPolicy::Abandon));

        let stop = fixture.stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stop.cancel();
        });
        tokio::time::timeout(Duration::from_secs(5), fixture.dispatcher.execute(job()))
            .await
            .expect("abandon should not wait for the backoff");

        assert_eq!(fixture.stats.abandoned.load(Ordering::Relaxed), 1);
        assert_eq!(fixture.stats.confirmed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn given_stopped_run_should_abandon_without_dispatching() {
        let mut store = MockStore::new();
        store.expect_submit_write().never();
        let fixture = fixture(store, settings(unbounded(), TransportPolicy::Abandon));
        fixture.stop.cancel();

        fixture.dispatcher.execute(job()).await;

        let snapshot = fixture.stats.snapshot();
        assert_eq!(snapshot.abandoned, 1);
        assert_eq!(snapshot.dispatch_attempts, 0);
        let handle = fixture.completions.try_recv().unwrap();
        assert_eq!(handle.outcome, ItemOutcome::Abandoned);
    }
}
