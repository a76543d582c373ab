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

pub mod memory;

use crate::config::StoreConfig;
use crate::corpus::Key;
use crate::error::StressError;
use async_trait::async_trait;
use bytes::Bytes;
use memory::InMemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[cfg(test)]
use mockall::automock;

/// Result of one write attempt as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    /// The store cannot take more concurrent work right now. Recoverable.
    Overloaded,
    Failed(StoreFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFailure {
    /// The store rejected the payload itself, retrying cannot help.
    Serialization(String),
    Transport(String),
}

/// Asynchronous write capability of a key/value store.
///
/// Implementations must not block the calling task; the pipeline wraps every
/// call in its own timeout and treats the outcome uniformly.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Store: Send + Sync {
    async fn submit_write(&self, key: &Key, value: Bytes, ttl: Option<Duration>) -> WriteOutcome;

    fn name(&self) -> &str;
}

/// Builds the store gateway from the bootstrap settings. Any failure here is
/// fatal for the run.
pub fn connect(config: &StoreConfig) -> Result<Arc<dyn Store>, StressError> {
    if config.addresses.is_empty() {
        return Err(StressError::Setup("no store addresses configured".into()));
    }
    for address in &config.addresses {
        validate_address(address)?;
    }
    if config.map_name.trim().is_empty() {
        return Err(StressError::Setup("map name must not be empty".into()));
    }
    if config.max_concurrent_invocations == 0 {
        return Err(StressError::Setup(
            "max_concurrent_invocations must be positive".into(),
        ));
    }
    if config.max_entries == 0 {
        return Err(StressError::Setup("max_entries must be positive".into()));
    }
    if config.username.is_some() != config.password.is_some() {
        return Err(StressError::Setup(
            "username and password must be provided together".into(),
        ));
    }

    info!(
        "Connecting to map '{}' via {} node(s): {}",
        config.map_name,
        config.addresses.len(),
        config.addresses.join(", ")
    );
    Ok(Arc::new(InMemoryStore::new(config)))
}

fn validate_address(address: &str) -> Result<(), StressError> {
    let invalid = || StressError::Setup(format!("invalid store address '{address}'"));
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    port.parse::<u16>().map_err(|_| invalid())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn given_default_config_should_connect() {
        let store = connect(&StoreConfig::default()).unwrap();
        assert_eq!(store.name(), "blcacheinmem");
    }

    #[test_case("127.0.0.1"; "missing port")]
    #[test_case(":5701"; "missing host")]
    #[test_case("localhost:port"; "non numeric port")]
    #[test_case("localhost:70000"; "port out of range")]
    fn given_invalid_address_should_fail_setup(address: &str) {
        let config = StoreConfig {
            addresses: vec![address.to_owned()],
            ..StoreConfig::default()
        };
        assert!(matches!(connect(&config), Err(StressError::Setup(_))));
    }

    #[test]
    fn given_no_addresses_should_fail_setup() {
        let config = StoreConfig {
            addresses: Vec::new(),
            ..StoreConfig::default()
        };
        assert!(matches!(connect(&config), Err(StressError::Setup(_))));
    }

    #[test]
    fn given_username_without_password_should_fail_setup() {
        let config = StoreConfig {
            username: Some("dev".to_owned()),
            ..StoreConfig::default()
        };
        assert!(matches!(connect(&config), Err(StressError::Setup(_))));
    }

    #[test]
    fn given_zero_max_entries_should_fail_setup() {
        let config = StoreConfig {
            max_entries: 0,
            ..StoreConfig::default()
        };
        assert!(matches!(connect(&config), Err(StressError::Setup(_))));
    }
}
