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

use super::{Store, StoreFailure, WriteOutcome};
use crate::config::StoreConfig;
use crate::corpus::Key;
use async_trait::async_trait;
use bytes::Bytes;
use moka::Expiry;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::trace;

#[derive(Debug, Clone)]
struct StoredValue {
    value: Bytes,
    ttl: Option<Duration>,
}

struct WriteTtl;

impl Expiry<String, StoredValue> for WriteTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process store gateway.
///
/// Behaves like an asynchronous client that allows at most
/// `max_concurrent_invocations` requests in flight. A write is accepted as
/// soon as it gets an invocation slot and is applied `latency` later, holding
/// the slot until then. A write arriving while all slots are taken is
/// answered with [`WriteOutcome::Overloaded`] instead of being queued.
///
/// The map holds at most `max_entries` entries, evicting the least recently
/// used ones, and drops entries once their TTL has passed.
pub struct InMemoryStore {
    map_name: String,
    entries: Cache<String, StoredValue>,
    invocations: Arc<Semaphore>,
    invocation_limit: u32,
    latency: Duration,
    max_value_size: Option<usize>,
}

impl InMemoryStore {
    pub fn new(config: &StoreConfig) -> Self {
        let invocation_limit = u32::try_from(config.max_concurrent_invocations).unwrap_or(u32::MAX);
        Self {
            map_name: config.map_name.clone(),
            entries: Cache::builder()
                .max_capacity(config.max_entries)
                .eviction_policy(EvictionPolicy::lru())
                .expire_after(WriteTtl)
                .build(),
            invocations: Arc::new(Semaphore::new(invocation_limit as usize)),
            invocation_limit,
            latency: config.latency,
            max_value_size: config.max_value_size,
        }
    }

    /// Writes accepted but not applied yet.
    pub fn pending(&self) -> usize {
        (self.invocation_limit as usize).saturating_sub(self.invocations.available_permits())
    }

    /// Waits until every accepted write has been applied.
    pub async fn wait_for_pending(&self) {
        if let Ok(all) = self.invocations.acquire_many(self.invocation_limit).await {
            drop(all);
        }
    }

    /// Live entries, after expired and evicted ones were purged.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        self.entries.get(key).await.is_some()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn submit_write(&self, key: &Key, value: Bytes, ttl: Option<Duration>) -> WriteOutcome {
        if let Some(limit) = self.max_value_size
            && value.len() > limit
        {
            return WriteOutcome::Failed(StoreFailure::Serialization(format!(
                "value of {} bytes exceeds the {limit} byte limit",
                value.len()
            )));
        }

        let Ok(invocation) = self.invocations.clone().try_acquire_owned() else {
            trace!("Store '{}' overloaded, rejecting {key}", self.map_name);
            return WriteOutcome::Overloaded;
        };

        let stored = StoredValue { value, ttl };
        if self.latency.is_zero() {
            self.entries.insert(key.to_string(), stored).await;
            return WriteOutcome::Accepted;
        }

        let entries = self.entries.clone();
        let latency = self.latency;
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            entries.insert(key, stored).await;
            drop(invocation);
        });
        WriteOutcome::Accepted
    }

    fn name(&self) -> &str {
        &self.map_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{CorpusGenerator, derive_key};

    fn store_with(config: StoreConfig) -> InMemoryStore {
        InMemoryStore::new(&config)
    }

    fn immediate() -> StoreConfig {
        StoreConfig {
            latency: Duration::ZERO,
            ..StoreConfig::default()
        }
    }

    #[tokio::test]
    async fn given_free_invocation_slot_should_accept_write() {
        let store = store_with(immediate());
        let corpus = CorpusGenerator::new(42, 16).generate(1).unwrap();
        let key = derive_key(0, &corpus[0]);

        let outcome = store.submit_write(&key, corpus[0].value(), None).await;

        assert_eq!(outcome, WriteOutcome::Accepted);
        assert!(store.contains_key(key.as_str()).await);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn given_pending_writes_should_report_overload_until_applied() {
        let store = store_with(StoreConfig {
            max_concurrent_invocations: 2,
            latency: Duration::from_millis(100),
            ..StoreConfig::default()
        });
        let corpus = CorpusGenerator::new(42, 16).generate(3).unwrap();
        let keys: Vec<_> = corpus.iter().map(|entry| derive_key(0, entry)).collect();

        assert_eq!(
            store.submit_write(&keys[0], corpus[0].value(), None).await,
            WriteOutcome::Accepted
        );
        assert_eq!(
            store.submit_write(&keys[1], corpus[1].value(), None).await,
            WriteOutcome::Accepted
        );
        assert_eq!(store.pending(), 2);
        assert!(!store.contains_key(keys[0].as_str()).await);
        assert_eq!(
            store.submit_write(&keys[2], corpus[2].value(), None).await,
            WriteOutcome::Overloaded
        );

        store.wait_for_pending().await;
        assert_eq!(store.pending(), 0);
        assert!(store.contains_key(keys[0].as_str()).await);
        assert!(store.contains_key(keys[1].as_str()).await);
        assert_eq!(
            store.submit_write(&keys[2], corpus[2].value(), None).await,
            WriteOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn given_oversized_value_should_fail_with_serialization_error() {
        let store = store_with(StoreConfig {
            max_value_size: Some(8),
            ..immediate()
        });
        let corpus = CorpusGenerator::new(42, 16).generate(1).unwrap();
        let key = derive_key(0, &corpus[0]);

        let outcome = store.submit_write(&key, corpus[0].value(), None).await;

        assert!(matches!(
            outcome,
            WriteOutcome::Failed(StoreFailure::Serialization(_))
        ));
        assert_eq!(store.pending(), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn given_expired_ttl_should_purge_entries() {
        let store = store_with(immediate());
        let corpus = CorpusGenerator::new(42, 16).generate(500).unwrap();
        for entry in corpus.iter() {
            store
                .submit_write(
                    &derive_key(0, entry),
                    entry.value(),
                    Some(Duration::from_millis(10)),
                )
                .await;
        }
        let first = derive_key(0, &corpus[0]);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!store.contains_key(first.as_str()).await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn given_more_writes_than_capacity_should_evict_entries() {
        let store = store_with(StoreConfig {
            max_entries: 100,
            ..immediate()
        });
        let corpus = CorpusGenerator::new(42, 16).generate(1_000).unwrap();
        for entry in corpus.iter() {
            store
                .submit_write(&derive_key(0, entry), entry.value(), None)
                .await;
        }

        let len = store.len().await;
        assert!(len > 0 && len <= 100, "{len} entries kept");
        let last = derive_key(0, &corpus[999]);
        assert!(store.contains_key(last.as_str()).await);
    }
}
