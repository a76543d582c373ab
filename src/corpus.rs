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

//! Synthetic write corpus and key derivation.
//!
//! The corpus is generated once, before the load phase, and shared read-only
//! by every worker for the whole run. Payloads are drawn from a seeded
//! [`StdRng`], so the same seed always yields the same bytes.

use crate::error::StressError;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// One immutable payload of the corpus.
#[derive(Debug, Clone)]
pub struct Entry {
    id: u64,
    value: Bytes,
}

impl Entry {
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Cheap to clone, the buffer is reference counted.
    pub fn value(&self) -> Bytes {
        self.value.clone()
    }
}

pub type Corpus = Arc<[Entry]>;

/// Store key of one `(batch, entry)` pairing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `"<batch>-<entry id>"`. Both parts are decimal, so the separator keeps the
/// mapping injective.
pub fn derive_key(batch: u32, entry: &Entry) -> Key {
    Key(format!("{batch}-{}", entry.id))
}

/// Produces the corpus. Owns the id counter for its whole lifetime: ids are
/// never reset, so a second `generate` call continues the sequence.
pub struct CorpusGenerator {
    seed: u64,
    value_size: usize,
    next_id: AtomicU64,
}

impl CorpusGenerator {
    pub fn new(seed: u64, value_size: usize) -> Self {
        Self {
            seed,
            value_size,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn generate(&self, count: usize) -> Result<Corpus, StressError> {
        if count == 0 {
            return Err(StressError::Corpus("corpus size must be positive".into()));
        }
        if self.value_size == 0 {
            return Err(StressError::Corpus("value size must be positive".into()));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let mut value = vec![0u8; self.value_size];
            rng.fill_bytes(&mut value);
            entries.push(Entry {
                id: self.next_id(),
                value: Bytes::from(value),
            });
        }
        Ok(entries.into())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}
