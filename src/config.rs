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

//! Run configuration.
//!
//! Layered with figment, lowest priority first: built-in defaults, an optional
//! TOML file, then `STORE_STRESS_*` environment variables (`__` separates
//! nested keys, e.g. `STORE_STRESS_PIPELINE__POOL_SIZE=4`). CLI flags are
//! applied on top by the binary. Durations are human readable strings such as
//! `"100ms"` or `"30s"`.

use crate::error::StressError;
use clap::ValueEnum;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::{Display, EnumString};

pub const ENV_PREFIX: &str = "STORE_STRESS_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Pause before anything else happens, leaves time to attach profilers.
    #[serde(with = "duration_str")]
    pub startup_delay: Duration,
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
    pub drain: DrainConfig,
    pub store: StoreConfig,
    /// Where to write the JSON report, stdout summary only if unset.
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub corpus_size: usize,
    pub batches: u32,
    pub value_size: usize,
    pub seed: u64,
    pub pool_size: usize,
    pub queue_capacity: usize,
    pub completion_capacity: usize,
    #[serde(with = "duration_str")]
    pub op_timeout: Duration,
    #[serde(with = "optional_duration_str")]
    pub write_ttl: Option<Duration>,
    #[serde(with = "duration_str")]
    pub shutdown_grace: Duration,
    #[serde(with = "duration_str")]
    pub report_interval: Duration,
}

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Profile {
    /// Retry overload forever, the point is to find the breaking point.
    #[default]
    Stress,
    /// Capped retries with jittered exponential backoff.
    Load,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RetryMode {
    Unbounded,
    Capped,
}

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransportPolicy {
    /// Transport failures and timeouts are terminal for the item.
    #[default]
    Abandon,
    /// Transport failures and timeouts go through the retry policy, like overload.
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub profile: Profile,
    /// Overrides the mode implied by `profile`.
    pub mode: Option<RetryMode>,
    #[serde(with = "duration_str")]
    pub backoff: Duration,
    #[serde(with = "duration_str")]
    pub max_backoff: Duration,
    pub max_attempts: u32,
    pub jitter: bool,
    pub transport: TransportPolicy,
}

impl RetryConfig {
    pub fn effective_mode(&self) -> RetryMode {
        self.mode.unwrap_or(match self.profile {
            Profile::Stress => RetryMode::Unbounded,
            Profile::Load => RetryMode::Capped,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    pub max_restarts: u32,
    #[serde(with = "duration_str")]
    pub watchdog_interval: Duration,
    /// Fraction of the completion channel capacity treated as a backlog.
    pub backlog_threshold: f64,
    /// Consecutive backlog samples that trip the run circuit.
    pub backlog_strikes: u32,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub addresses: Vec<String>,
    pub map_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_concurrent_invocations: usize,
    /// Time between accepting a write and applying it. An invocation slot
    /// stays taken for that long.
    #[serde(with = "duration_str")]
    pub latency: Duration,
    pub max_value_size: Option<usize>,
    /// Entries kept by the in-memory store before least recently used ones
    /// are evicted.
    pub max_entries: u64,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("addresses", &self.addresses)
            .field("map_name", &self.map_name)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field(
                "max_concurrent_invocations",
                &self.max_concurrent_invocations,
            )
            .field("latency", &self.latency)
            .field("max_value_size", &self.max_value_size)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(10),
            pipeline: PipelineConfig::default(),
            retry: RetryConfig::default(),
            drain: DrainConfig::default(),
            store: StoreConfig::default(),
            output: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            corpus_size: 100_000,
            batches: 10_000,
            value_size: 300,
            seed: 42,
            pool_size: 10,
            queue_capacity: 4096,
            completion_capacity: 4096,
            op_timeout: Duration::from_secs(30),
            write_ttl: None,
            shutdown_grace: Duration::from_secs(30),
            report_interval: Duration::from_secs(5),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Stress,
            mode: None,
            backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            max_attempts: 10,
            jitter: true,
            transport: TransportPolicy::Abandon,
        }
    }
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            watchdog_interval: Duration::from_secs(1),
            backlog_threshold: 0.9,
            backlog_strikes: 5,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            addresses: vec!["127.0.0.1:5701".to_owned(), "127.0.0.2:5701".to_owned()],
            map_name: "blcacheinmem".to_owned(),
            username: None,
            password: None,
            max_concurrent_invocations: 10_000,
            latency: Duration::from_millis(200),
            max_value_size: None,
            max_entries: 1_000_000,
        }
    }
}

impl BenchConfig {
    /// Loads defaults, the optional TOML file and the environment, applies
    /// `overrides` on top and validates the result.
    pub fn load(
        path: Option<&Path>,
        overrides: impl FnOnce(&mut Self),
    ) -> Result<Self, StressError> {
        let mut config = Self::figment(path)?.extract::<Self>()?;
        overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn figment(path: Option<&Path>) -> Result<Figment, StressError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.is_file() {
                return Err(StressError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn validate(&self) -> Result<(), StressError> {
        let pipeline = &self.pipeline;
        ensure(pipeline.corpus_size > 0, "pipeline.corpus_size must be positive")?;
        ensure(pipeline.batches > 0, "pipeline.batches must be positive")?;
        ensure(pipeline.value_size > 0, "pipeline.value_size must be positive")?;
        ensure(pipeline.pool_size > 0, "pipeline.pool_size must be positive")?;
        ensure(
            pipeline.queue_capacity > 0,
            "pipeline.queue_capacity must be positive",
        )?;
        ensure(
            pipeline.completion_capacity > 0,
            "pipeline.completion_capacity must be positive",
        )?;
        ensure(
            !pipeline.op_timeout.is_zero(),
            "pipeline.op_timeout must be positive",
        )?;
        ensure(
            !pipeline.report_interval.is_zero(),
            "pipeline.report_interval must be positive",
        )?;

        if self.retry.effective_mode() == RetryMode::Capped {
            ensure(
                self.retry.max_attempts > 0,
                "retry.max_attempts must be positive in capped mode",
            )?;
            ensure(
                self.retry.backoff <= self.retry.max_backoff,
                "retry.backoff must not exceed retry.max_backoff",
            )?;
        }

        let drain = &self.drain;
        ensure(
            drain.backlog_threshold > 0.0 && drain.backlog_threshold <= 1.0,
            "drain.backlog_threshold must be in (0, 1]",
        )?;
        ensure(
            drain.backlog_strikes > 0,
            "drain.backlog_strikes must be positive",
        )?;
        ensure(
            !drain.watchdog_interval.is_zero(),
            "drain.watchdog_interval must be positive",
        )?;
        Ok(())
    }
}

fn ensure(condition: bool, message: &str) -> Result<(), StressError> {
    if condition {
        Ok(())
    } else {
        Err(StressError::Config(message.to_owned()))
    }
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

mod optional_duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                serializer.serialize_some(&humantime::format_duration(*duration).to_string())
            }
            None => serializer.serialize_none(),
        }
    }

    /// `"0"`, `"none"` and the empty string all mean no TTL.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let Some(raw) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let raw = raw.trim();
        if raw.is_empty() || raw == "0" || raw.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        let duration = humantime::parse_duration(raw).map_err(serde::de::Error::custom)?;
        Ok((!duration.is_zero()).then_some(duration))
    }
}
