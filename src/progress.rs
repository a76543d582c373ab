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

use crate::stats::ProgressCounters;
use human_repr::HumanCount;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

const MARKERS_PER_LINE: u32 = 100;

/// Prints one `.` per dispatched batch.
pub struct ProgressMarkers<W: Write> {
    out: W,
    printed: u32,
}

impl ProgressMarkers<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ProgressMarkers<W> {
    pub fn new(out: W) -> Self {
        Self { out, printed: 0 }
    }

    pub fn batch_done(&mut self) {
        self.printed += 1;
        let marker = if self.printed % MARKERS_PER_LINE == 0 {
            ".\n"
        } else {
            "."
        };
        // Progress output is best effort.
        let _ = self.out.write_all(marker.as_bytes());
        let _ = self.out.flush();
    }

    pub fn finish(&mut self) {
        if self.printed % MARKERS_PER_LINE != 0 {
            let _ = self.out.write_all(b"\n");
            let _ = self.out.flush();
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Logs a counters snapshot every `interval` until `stop` is cancelled.
pub fn spawn_reporter(
    stats: Arc<ProgressCounters>,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let snapshot = stats.snapshot();
            info!(
                "Progress: {} submitted, {} confirmed, {} failed, {} abandoned, {} in flight, {} overloaded, {} retries",
                snapshot.submitted.human_count_bare(),
                snapshot.confirmed.human_count_bare(),
                snapshot.failed.human_count_bare(),
                snapshot.abandoned.human_count_bare(),
                snapshot.in_flight().human_count_bare(),
                snapshot.overloaded.human_count_bare(),
                snapshot.retries.human_count_bare(),
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_hundred_batches_should_break_line() {
        let mut markers = ProgressMarkers::new(Vec::new());
        for _ in 0..150 {
            markers.batch_done();
        }
        markers.finish();

        let printed = String::from_utf8(markers.into_inner()).unwrap();
        let lines: Vec<_> = printed.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 100);
        assert_eq!(lines[1].len(), 50);
    }

    #[test]
    fn given_full_line_should_not_add_empty_line_on_finish() {
        let mut markers = ProgressMarkers::new(Vec::new());
        for _ in 0..100 {
            markers.batch_done();
        }
        markers.finish();

        let printed = String::from_utf8(markers.into_inner()).unwrap();
        assert_eq!(printed, format!("{}\n", ".".repeat(100)));
    }

    #[tokio::test]
    async fn given_stop_signal_should_end_reporter() {
        let stop = CancellationToken::new();
        let reporter = spawn_reporter(
            Arc::new(ProgressCounters::default()),
            Duration::from_millis(5),
            stop.clone(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.cancel();
        tokio::time::timeout(Duration::from_secs(5), reporter)
            .await
            .unwrap()
            .unwrap();
    }
}
