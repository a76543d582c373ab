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

use crate::config::BenchConfig;
use crate::corpus::{CorpusGenerator, derive_key};
use crate::error::StressError;
use crate::pipeline::admission::WorkerPool;
use crate::pipeline::dispatch::{DispatchSettings, Dispatcher, Job};
use crate::pipeline::drain::{BacklogWatchdog, DrainSupervisor, HandleInspector, RunCircuit};
use crate::progress::{ProgressMarkers, spawn_reporter};
use crate::report::BenchmarkReport;
use crate::stats::ProgressCounters;
use crate::store::Store;
use human_repr::HumanCount;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Generates the corpus and writes it `batches` times through the pipeline.
///
/// Cancelling `stop` ends the run early: no new item is submitted, pending
/// retries are abandoned and the report covers what was done so far. A tripped
/// drain circuit does the same and is recorded in the report's
/// `abort_reason`.
pub async fn run_benchmark(
    config: &BenchConfig,
    store: Arc<dyn Store>,
    stop: CancellationToken,
) -> Result<BenchmarkReport, StressError> {
    run_benchmark_with_inspector(config, store, stop, None).await
}

/// Same as [`run_benchmark`], with `inspector` called on every drained
/// completion handle.
pub async fn run_benchmark_with_inspector(
    config: &BenchConfig,
    store: Arc<dyn Store>,
    stop: CancellationToken,
    inspector: Option<HandleInspector>,
) -> Result<BenchmarkReport, StressError> {
    config.validate()?;
    let pipeline = &config.pipeline;

    info!(
        "Generating corpus of {} entries, {} bytes each",
        pipeline.corpus_size.human_count_bare(),
        pipeline.value_size
    );
    let generation_started = Instant::now();
    let corpus = CorpusGenerator::new(pipeline.seed, pipeline.value_size)
        .generate(pipeline.corpus_size)?;
    let corpus_generation = generation_started.elapsed();
    info!("Corpus generated in {corpus_generation:.2?}");

    let run_stop = stop.child_token();
    // The drain must outlive the workers, it only stops once they are joined.
    let drain_stop = CancellationToken::new();
    let stats = Arc::new(ProgressCounters::default());
    let circuit = Arc::new(RunCircuit::new(run_stop.clone()));
    let (completions, handles) = flume::bounded(pipeline.completion_capacity);

    let mut drain = DrainSupervisor::new(
        handles.clone(),
        drain_stop.clone(),
        stats.clone(),
        circuit.clone(),
        config.drain.max_restarts,
    );
    if let Some(inspector) = inspector {
        drain = drain.with_inspector(inspector);
    }
    let drain = drain.spawn();
    let watchdog = BacklogWatchdog::new(
        handles,
        pipeline.completion_capacity,
        &config.drain,
        run_stop.clone(),
        circuit.clone(),
    )
    .spawn();
    let reporter = spawn_reporter(stats.clone(), pipeline.report_interval, run_stop.clone());

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        stats.clone(),
        DispatchSettings::from_config(config),
        Arc::new(Semaphore::new(pipeline.pool_size)),
        completions,
        run_stop.clone(),
    ));
    let pool = WorkerPool::start(
        pipeline.pool_size,
        pipeline.queue_capacity,
        dispatcher,
        stats.clone(),
    );

    info!(
        "Writing {} batches to '{}' with {} workers",
        pipeline.batches.human_count_bare(),
        store.name(),
        pipeline.pool_size
    );
    let load_started = Instant::now();
    let mut markers = ProgressMarkers::stdout();
    'batches: for batch in 0..pipeline.batches {
        for entry in corpus.iter() {
            if run_stop.is_cancelled() {
                warn!("Stop requested, no more items will be submitted (batch {batch})");
                break 'batches;
            }
            ProgressCounters::incr(&stats.submitted);
            pool.submit(Job::new(derive_key(batch, entry), entry.value()))
                .await;
        }
        markers.batch_done();
        debug!("Batch {batch} dispatched, {} jobs queued", pool.queued());
    }
    markers.finish();

    pool.shutdown(pipeline.shutdown_grace, &run_stop).await;
    run_stop.cancel();
    drain_stop.cancel();
    drain.await?;
    watchdog.await?;
    reporter.await?;
    let load_phase = load_started.elapsed();

    let counters = stats.snapshot();
    if counters.drained != stats.settled() {
        warn!(
            "Drained {} completion handles for {} settled items",
            counters.drained,
            stats.settled()
        );
    }
    info!(
        "Load phase finished in {load_phase:.2?}: {} confirmed, {} failed, {} abandoned",
        counters.confirmed.human_count_bare(),
        counters.failed.human_count_bare(),
        counters.abandoned.human_count_bare()
    );

    Ok(BenchmarkReport::build(
        store.name(),
        config,
        counters,
        corpus_generation,
        load_phase,
        circuit.reason(),
    ))
}
