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

//! Write-load stress generator for distributed key/value stores.
//!
//! A deterministic corpus of entries is written to a [`store::Store`] many
//! times over through a bounded worker pool. Writes the store rejects as
//! overloaded are retried with backoff, every item ends up confirmed, failed
//! or abandoned, and the outcome is summarized by [`report::BenchmarkReport`].

pub mod args;
pub mod benchmark;
pub mod config;
pub mod corpus;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod shutdown;
pub mod stats;
pub mod store;
