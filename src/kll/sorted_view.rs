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

//! Sorted (value, cumulative weight) snapshot used to answer queries.

use std::cmp::Ordering;

use super::sketch::KllItem;
use crate::error::Error;

/// An owned, sorted snapshot of the retained items of a sketch.
///
/// Entries are sorted by value; each carries the cumulative weight of all
/// entries up to and including itself, so the last entry's cumulative
/// weight equals the stream length n. The snapshot does not track the
/// sketch it came from: rebuild it after any update or merge.
#[allow(private_bounds)]
#[derive(Debug, Clone)]
pub struct SortedView<T: KllItem> {
    entries: Vec<Entry<T>>,
    total_weight: u64,
}

#[derive(Debug, Clone)]
struct Entry<T> {
    item: T,
    cum_weight: u64,
}

#[allow(private_bounds)]
impl<T: KllItem> SortedView<T> {
    pub(crate) fn new(mut pairs: Vec<(T, u64)>) -> Self {
        pairs.sort_by(|a, b| T::cmp(&a.0, &b.0));
        let mut total_weight = 0u64;
        let entries = pairs
            .into_iter()
            .map(|(item, weight)| {
                total_weight += weight;
                Entry {
                    item,
                    cum_weight: total_weight,
                }
            })
            .collect();
        Self {
            entries,
            total_weight,
        }
    }

    /// Number of distinct retained entries in the view.
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Total weight of the view, equal to the stream length n.
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Normalized rank of the given value.
    ///
    /// Inclusive counts the weight of entries `<=` the value, exclusive
    /// counts entries strictly below it.
    pub fn rank(&self, item: T, inclusive: bool) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }

        let idx = if inclusive {
            upper_bound(&self.entries, &item)
        } else {
            lower_bound(&self.entries, &item)
        };

        if idx == 0 {
            return 0.0;
        }
        self.entries[idx - 1].cum_weight as f64 / self.total_weight as f64
    }

    /// Quantile of the retained items at the given normalized rank.
    pub fn quantile(&self, rank: f64, inclusive: bool) -> Result<T, Error> {
        if self.entries.is_empty() {
            return Err(Error::empty_sketch());
        }
        if !(0.0..=1.0).contains(&rank) {
            return Err(Error::invalid_argument("rank must be in [0.0, 1.0]")
                .with_context("rank", rank));
        }

        let weight = if inclusive {
            (rank * self.total_weight as f64).ceil() as u64
        } else {
            (rank * self.total_weight as f64) as u64
        };

        let idx = if inclusive {
            lower_bound_by_weight(&self.entries, weight)
        } else {
            upper_bound_by_weight(&self.entries, weight)
        };

        if idx >= self.entries.len() {
            return Ok(self.entries[self.entries.len() - 1].item);
        }
        Ok(self.entries[idx].item)
    }

    /// Ranks at each split point, with a trailing 1.0 entry.
    pub fn cdf(&self, split_points: &[T], inclusive: bool) -> Result<Vec<f64>, Error> {
        check_split_points(split_points)?;
        let mut ranks = Vec::with_capacity(split_points.len() + 1);
        for &item in split_points {
            ranks.push(self.rank(item, inclusive));
        }
        ranks.push(1.0);
        Ok(ranks)
    }

    /// Probability masses between consecutive split points, the adjacent
    /// differences of [`Self::cdf`].
    pub fn pmf(&self, split_points: &[T], inclusive: bool) -> Result<Vec<f64>, Error> {
        let mut buckets = self.cdf(split_points, inclusive)?;
        for i in (1..buckets.len()).rev() {
            buckets[i] -= buckets[i - 1];
        }
        Ok(buckets)
    }
}

fn check_split_points<T: KllItem>(split_points: &[T]) -> Result<(), Error> {
    for point in split_points {
        if T::is_nan(point) {
            return Err(Error::invalid_argument(
                "split points must not contain NaN values",
            ));
        }
    }
    for pair in split_points.windows(2) {
        if T::cmp(&pair[0], &pair[1]) != Ordering::Less {
            return Err(Error::invalid_argument(
                "split points must be unique and monotonically increasing",
            ));
        }
    }
    Ok(())
}

fn lower_bound<T: KllItem>(entries: &[Entry<T>], item: &T) -> usize {
    let mut left = 0usize;
    let mut right = entries.len();
    while left < right {
        let mid = left + (right - left) / 2;
        if T::cmp(&entries[mid].item, item) == Ordering::Less {
            left = mid + 1;
        } else {
            right = mid;
        }
    }
    left
}

fn upper_bound<T: KllItem>(entries: &[Entry<T>], item: &T) -> usize {
    let mut left = 0usize;
    let mut right = entries.len();
    while left < right {
        let mid = left + (right - left) / 2;
        if T::cmp(&entries[mid].item, item) == Ordering::Greater {
            right = mid;
        } else {
            left = mid + 1;
        }
    }
    left
}

fn lower_bound_by_weight<T: KllItem>(entries: &[Entry<T>], weight: u64) -> usize {
    let mut left = 0usize;
    let mut right = entries.len();
    while left < right {
        let mid = left + (right - left) / 2;
        if entries[mid].cum_weight < weight {
            left = mid + 1;
        } else {
            right = mid;
        }
    }
    left
}

fn upper_bound_by_weight<T: KllItem>(entries: &[Entry<T>], weight: u64) -> usize {
    let mut left = 0usize;
    let mut right = entries.len();
    while left < right {
        let mid = left + (right - left) / 2;
        if entries[mid].cum_weight > weight {
            right = mid;
        } else {
            left = mid + 1;
        }
    }
    left
}
