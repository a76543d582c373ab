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


use std::future::Future;
use std::io;
use tracing::error;

/// Resolves on Ctrl+C or, on unix, SIGTERM. A listener that cannot be
/// installed never fires.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = listen("Ctrl+C", tokio::signal::ctrl_c()) => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => error!("Failed to register SIGTERM handler: {e}"),
        }
    }
    listen("Ctrl+C", tokio::signal::ctrl_c()).await;
}

async fn listen(name: &str, signal: impl Future<Output = io::Result<()>>) {
    if let Err(e) = signal.await {
        error!("Failed to listen for {name}, ignoring it: {e}");
        std::future::pending::<()>().await;
    }
}
