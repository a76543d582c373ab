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
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Every option left unset falls back to the config file, then the
/// `STORE_STRESS_*` environment, then the built-in defaults.
#[derive(Parser, Debug, Default)]
#[command(
    name = "store-stress",
    about = "Write-load stress generator for distributed key/value stores"
)]
pub struct StressArgs {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of distinct entries in the generated corpus
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub corpus_size: Option<u64>,

    /// How many times the whole corpus is written
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub batches: Option<u32>,

    /// Payload size in bytes per entry
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub value_size: Option<u64>,

    /// PRNG seed for the payloads
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of worker tasks, also the in-flight limit
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub pool_size: Option<u64>,

    /// Job queue capacity before the driver runs jobs itself
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub queue_capacity: Option<u64>,

    /// Completion channel capacity
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub completion_capacity: Option<u64>,

    /// Timeout of a single store write, e.g. "30s"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub op_timeout: Option<Duration>,

    /// Base backoff between retries of an overloaded write, e.g. "100ms"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub backoff: Option<Duration>,

    /// Retry profile
    #[arg(long)]
    pub profile: Option<Profile>,

    /// Retry mode, overrides the profile's default
    #[arg(long)]
    pub retry_mode: Option<RetryMode>,

    /// Dispatches per item in capped retry mode
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,

    /// What to do with transport failures and timeouts
    #[arg(long)]
    pub transport_policy: Option<TransportPolicy>,

    /// Pause before connecting to the store, e.g. "10s"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub startup_delay: Option<Duration>,

    /// Store node address (host:port), repeatable
    #[arg(long = "address")]
    pub addresses: Vec<String>,

    /// Name of the target map
    #[arg(long)]
    pub map_name: Option<String>,

    /// Concurrent requests the store client accepts before reporting overload
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_concurrent_invocations: Option<u64>,

    /// Simulated store latency per write, e.g. "2ms"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub latency: Option<Duration>,

    /// Largest value the store accepts, in bytes
    #[arg(long)]
    pub max_value_size: Option<u64>,

    /// Entries the in-memory store keeps before evicting
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_entries: Option<u64>,

    /// Time to live of written entries, e.g. "10m"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub ttl: Option<Duration>,

    /// Write the final report as JSON to this file
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl StressArgs {
    /// Overrides `config` with every option given on the command line.
    pub fn apply(&self, config: &mut BenchConfig) {
        let pipeline = &mut config.pipeline;
        set(&mut pipeline.corpus_size, self.corpus_size.map(to_usize));
        set(&mut pipeline.batches, self.batches);
        set(&mut pipeline.value_size, self.value_size.map(to_usize));
        set(&mut pipeline.seed, self.seed);
        set(&mut pipeline.pool_size, self.pool_size.map(to_usize));
        set(&mut pipeline.queue_capacity, self.queue_capacity.map(to_usize));
        set(
            &mut pipeline.completion_capacity,
            self.completion_capacity.map(to_usize),
        );
        set(&mut pipeline.op_timeout, self.op_timeout);
        if self.ttl.is_some() {
            pipeline.write_ttl = self.ttl;
        }

        let retry = &mut config.retry;
        set(&mut retry.backoff, self.backoff);
        set(&mut retry.profile, self.profile);
        if self.retry_mode.is_some() {
            retry.mode = self.retry_mode;
        }
        set(&mut retry.max_attempts, self.max_attempts);
        set(&mut retry.transport, self.transport_policy);
        if retry.backoff > retry.max_backoff {
            retry.max_backoff = retry.backoff;
        }

        let store = &mut config.store;
        if !self.addresses.is_empty() {
            store.addresses.clone_from(&self.addresses);
        }
        set(&mut store.map_name, self.map_name.clone());
        set(
            &mut store.max_concurrent_invocations,
            self.max_concurrent_invocations.map(to_usize),
        );
        set(&mut store.latency, self.latency);
        set(&mut store.max_entries, self.max_entries);
        if let Some(limit) = self.max_value_size {
            store.max_value_size = Some(to_usize(limit));
        }

        set(&mut config.startup_delay, self.startup_delay);
        if self.output.is_some() {
            config.output.clone_from(&self.output);
        }
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn parse(args: &[&str]) -> StressArgs {
        StressArgs::try_parse_from(std::iter::once("store-stress").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn given_no_flags_should_keep_config_untouched() {
        let mut config = BenchConfig::default();
        parse(&[]).apply(&mut config);

        let defaults = BenchConfig::default();
        assert_eq!(config.pipeline.corpus_size, defaults.pipeline.corpus_size);
        assert_eq!(config.store.addresses, defaults.store.addresses);
        assert_eq!(config.retry.mode, None);
        assert_eq!(config.output, None);
    }

    #[test]
    fn given_flags_should_override_config() {
        let mut config = BenchConfig::default();
        parse(&[
            "--corpus-size",
            "5",
            "--batches",
            "2",
            "--pool-size",
            "3",
            "--op-timeout",
            "2s",
            "--profile",
            "load",
            "--transport-policy",
            "retry",
            "--address",
            "10.0.0.1:5701",
            "--address",
            "10.0.0.2:5701",
            "--ttl",
            "10m",
            "--max-entries",
            "500",
            "--output",
            "report.json",
        ])
        .apply(&mut config);

        assert_eq!(config.pipeline.corpus_size, 5);
        assert_eq!(config.pipeline.batches, 2);
        assert_eq!(config.pipeline.pool_size, 3);
        assert_eq!(config.pipeline.op_timeout, Duration::from_secs(2));
        assert_eq!(config.pipeline.write_ttl, Some(Duration::from_secs(600)));
        assert_eq!(config.retry.profile, Profile::Load);
        assert_eq!(config.retry.effective_mode(), RetryMode::Capped);
        assert_eq!(config.retry.transport, TransportPolicy::Retry);
        assert_eq!(config.store.addresses, vec!["10.0.0.1:5701", "10.0.0.2:5701"]);
        assert_eq!(config.store.max_entries, 500);
        assert_eq!(config.output, Some(PathBuf::from("report.json")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn given_backoff_above_max_should_raise_max_backoff() {
        let mut config = BenchConfig::default();
        parse(&["--backoff", "30s", "--retry-mode", "capped"]).apply(&mut config);

        assert_eq!(config.retry.backoff, Duration::from_secs(30));
        assert_eq!(config.retry.max_backoff, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test_case(&["--pool-size", "0"] ; "zero pool size")]
    #[test_case(&["--batches", "0"] ; "zero batches")]
    #[test_case(&["--op-timeout", "soon"] ; "unparsable duration")]
    #[test_case(&["--profile", "chaos"] ; "unknown profile")]
    fn given_invalid_flag_should_fail_to_parse(args: &[&str]) {
        let parsed =
            StressArgs::try_parse_from(std::iter::once("store-stress").chain(args.iter().copied()));
        assert!(parsed.is_err());
    }
}
