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

use super::sketch::KllItem;
use super::sketch::KllSketch;

/// Iterator over the retained (item, weight) pairs of a sketch.
///
/// Traversal is in physical storage order: level 0 first, then ascending
/// levels, each item carrying the weight `2^level`. The output is not
/// sorted by value.
#[allow(private_bounds)]
pub struct KllSketchIter<'s, 'a, T: KllItem> {
    sketch: &'s KllSketch<'a, T>,
    level: usize,
    index: usize,
    weight: u64,
}

impl<'s, 'a, T: KllItem> KllSketchIter<'s, 'a, T> {
    pub(crate) fn new(sketch: &'s KllSketch<'a, T>) -> Self {
        Self {
            sketch,
            level: 0,
            index: sketch.levels_slice()[0],
            weight: 1,
        }
    }
}

impl<T: KllItem> Iterator for KllSketchIter<'_, '_, T> {
    type Item = (T, u64);

    fn next(&mut self) -> Option<(T, u64)> {
        let levels = self.sketch.levels_slice();
        let num_levels = levels.len() - 1;
        while self.level < num_levels {
            if self.index < levels[self.level + 1] {
                let item = self.sketch.read_item(self.index);
                self.index += 1;
                return Some((item, self.weight));
            }
            // levels above zero are contiguous, the cursor carries over
            self.level += 1;
            self.weight <<= 1;
        }
        None
    }
}
