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

//! KLL sketch implementation for estimating quantiles and ranks.
//!
//! KLL is a compact, streaming quantiles sketch with lazy compaction and
//! near-optimal accuracy per retained item. It supports one-pass updates,
//! approximate quantiles, ranks, PMF, and CDF queries.
//!
//! The sampled stream data is stored in a single items array partitioned
//! into *levels*. Level `i` occupies positions `levels[i]` through
//! `levels[i + 1] - 1` and every item in it represents `2^i` stream items.
//! Level 0 fills from the top down; the space below `levels[0]` is garbage
//! that future updates overwrite. When level 0 fills up, a randomized
//! compaction discards half of a level and promotes the other half upward
//! with doubled weight, which is what gives the sketch its bounded
//! normalized-rank error.
//!
//! A sketch can live on the heap ([`KllSketch::new`]), operate in place
//! over an updatable byte region ([`KllSketch::new_direct`],
//! [`KllSketch::writable_wrap`]), or wrap a read-only compact byte image
//! without copying it ([`KllSketch::wrap_compact`]). All forms share one
//! binary format, described in the serialization section of
//! [`KllSketch::to_compact_bytes`].
//!
//! # Usage
//!
//! ```rust
//! # use kll_sketch::kll::KllSketch;
//! let mut sketch = KllSketch::<f64>::new(200).unwrap();
//! sketch.update(1.0).unwrap();
//! sketch.update(2.0).unwrap();
//! let q = sketch.quantile(0.5, true).unwrap();
//! assert!(q >= 1.0 && q <= 2.0);
//! ```

mod helper;
mod items;
mod iterator;
mod preamble;
mod sketch;
mod sorted_view;

pub use self::helper::k_from_epsilon;
pub use self::helper::normalized_rank_error;
pub use self::iterator::KllSketchIter;
pub use self::sketch::KllSketch;
pub use self::sorted_view::SortedView;

/// Default value of parameter k.
pub const DEFAULT_K: u16 = 200;
/// Default value of parameter m, the minimum level width.
pub const DEFAULT_M: u8 = 8;
/// Minimum value of parameter k.
pub const MIN_K: u16 = DEFAULT_M as u16;
/// Maximum value of parameter k.
pub const MAX_K: u16 = u16::MAX;

/// Valid values of parameter m in serialized images.
pub(crate) const VALID_M: [u8; 4] = [2, 4, 6, 8];
