// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Streaming quantile estimation with the KLL sketch.
//!
//! A [`kll::KllSketch`] consumes an unbounded stream of `f32` or `f64`
//! values in a single pass, retaining a sub-linear sample from which
//! quantiles, ranks, CDFs and PMFs can be estimated with a bounded
//! normalized-rank error at 99% confidence.
//!
//! Sketches can live on the heap, operate in place over an updatable byte
//! region obtained from a [`memory::MemoryProvider`], or wrap a read-only
//! compact byte image without deserializing it.
//!
//! ```rust
//! # use kll_sketch::kll::KllSketch;
//! let mut sketch = KllSketch::<f64>::new(200).unwrap();
//! for i in 0..1000 {
//!     sketch.update(i as f64).unwrap();
//! }
//! let median = sketch.quantile(0.5, true).unwrap();
//! assert!(median >= 0.0 && median <= 999.0);
//! ```

mod codec;
pub mod common;
pub mod error;
pub mod kll;
pub mod memory;
