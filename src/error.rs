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

use crate::pipeline::drain::AbortReason;
use std::io;
use thiserror::Error;

/// Fatal errors. Per-item write failures never surface here, they are counted
/// by the pipeline instead.
#[derive(Debug, Error)]
pub enum StressError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("store setup failed: {0}")]
    Setup(String),
    #[error("corpus generation failed: {0}")]
    Corpus(String),
    #[error("run aborted: {0}")]
    Aborted(AbortReason),
    #[error("I/O error while {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("task join failed: {0}")]
    Join(String),
}

impl From<figment::Error> for StressError {
    fn from(error: figment::Error) -> Self {
        Self::Config(error.to_string())
    }
}

impl From<tokio::task::JoinError> for StressError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Join(error.to_string())
    }
}
