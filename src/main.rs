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

use clap::Parser;
use store_stress::args::StressArgs;
use store_stress::benchmark::run_benchmark;
use store_stress::config::BenchConfig;
use store_stress::error::StressError;
use store_stress::shutdown::shutdown_signal;
use store_stress::store;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), StressError> {
    let args = StressArgs::parse();
    init_tracing();

    let result = run(args).await;
    if let Err(e) = &result {
        error!("{e}");
    }
    result
}

async fn run(args: StressArgs) -> Result<(), StressError> {
    let config = BenchConfig::load(args.config.as_deref(), |config| args.apply(config))?;
    info!("Starting with {:?}", config);

    let stop = CancellationToken::new();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received, stopping the run");
            stop.cancel();
        }
    });

    if !config.startup_delay.is_zero() {
        info!("Waiting {:?} before connecting", config.startup_delay);
        tokio::select! {
            _ = tokio::time::sleep(config.startup_delay) => {}
            _ = stop.cancelled() => return Ok(()),
        }
    }

    let store = store::connect(&config.store)?;
    let report = run_benchmark(&config, store, stop).await?;
    report.print_summary();
    if let Some(path) = &config.output {
        report.write_json(path)?;
        info!("Report written to {}", path.display());
    }

    match report.abort_reason {
        Some(reason) => Err(StressError::Aborted(reason)),
        None => Ok(()),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_ansi(true))
        .init();
}
