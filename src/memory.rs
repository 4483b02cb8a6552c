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

//! Growth provider for memory-backed sketches.
//!
//! An updatable sketch operates in place over a byte region. When an update
//! or merge needs more room than the region offers, the sketch asks its
//! [`MemoryProvider`] for a larger one. A provider that refuses makes the
//! mutating call fail with `InsufficientSpace` and leaves the sketch
//! unchanged.

use crate::error::Error;

/// Supplies replacement byte regions to memory-backed sketches.
pub trait MemoryProvider {
    /// Returns a region of at least `required_bytes` bytes.
    ///
    /// The contents of `current` must appear at the start of the returned
    /// region. On error the caller keeps using `current`, so the provider
    /// must not invalidate it.
    fn request(&mut self, current: &[u8], required_bytes: usize) -> Result<Vec<u8>, Error>;
}

/// A provider that reallocates on the heap and never refuses.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrowableHeapMemory;

impl MemoryProvider for GrowableHeapMemory {
    fn request(&mut self, current: &[u8], required_bytes: usize) -> Result<Vec<u8>, Error> {
        let mut region = current.to_vec();
        if region.len() < required_bytes {
            region.resize(required_bytes, 0);
        }
        Ok(region)
    }
}
