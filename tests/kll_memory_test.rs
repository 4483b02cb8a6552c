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

use std::cell::Cell;
use std::rc::Rc;

use kll_sketch::error::Error;
use kll_sketch::error::ErrorKind;
use kll_sketch::kll::DEFAULT_K;
use kll_sketch::kll::KllSketch;
use kll_sketch::memory::GrowableHeapMemory;
use kll_sketch::memory::MemoryProvider;

/// A provider that always refuses, for exercising the failure path.
struct DenyingMemory;

impl MemoryProvider for DenyingMemory {
    fn request(&mut self, _current: &[u8], required_bytes: usize) -> Result<Vec<u8>, Error> {
        Err(Error::new(ErrorKind::InsufficientSpace, "memory denied")
            .with_context("required_bytes", required_bytes))
    }
}

/// A provider that counts how often it was consulted.
struct CountingMemory {
    requests: Rc<Cell<usize>>,
}

impl MemoryProvider for CountingMemory {
    fn request(&mut self, current: &[u8], required_bytes: usize) -> Result<Vec<u8>, Error> {
        self.requests.set(self.requests.get() + 1);
        GrowableHeapMemory.request(current, required_bytes)
    }
}

fn growable() -> Option<Box<dyn MemoryProvider>> {
    Some(Box::new(GrowableHeapMemory) as Box<dyn MemoryProvider>)
}

#[test]
fn test_new_direct_initializes_the_region() {
    let sketch = KllSketch::<f64>::new_direct(DEFAULT_K, Vec::new(), growable()).unwrap();
    assert!(sketch.is_empty());
    assert!(!sketch.is_read_only());
    assert!(sketch.has_backing_region());
    assert_eq!(sketch.k(), DEFAULT_K);
    assert_eq!(sketch.n(), 0);

    // the region holds a valid updatable image from the start
    let region = sketch.into_region().unwrap();
    let wrapped = KllSketch::<f64>::writable_wrap(region, None).unwrap();
    assert!(wrapped.is_empty());
    assert_eq!(wrapped.k(), DEFAULT_K);
}

#[test]
fn test_direct_updates_and_queries() {
    let mut sketch = KllSketch::<f64>::new_direct(DEFAULT_K, Vec::new(), growable()).unwrap();
    let n = 100_000;
    for i in 0..n {
        sketch.update(i as f64).unwrap();
    }
    assert_eq!(sketch.n(), n as u64);
    assert_eq!(sketch.min_item().unwrap(), 0.0);
    assert_eq!(sketch.max_item().unwrap(), (n - 1) as f64);
    assert_eq!(
        sketch.iter().map(|(_, w)| w).sum::<u64>(),
        n as u64,
        "iterator weights must sum to n"
    );

    let eps = sketch.normalized_rank_error(false);
    for pct in [10, 50, 90] {
        let rank = pct as f64 / 100.0;
        let quantile = sketch.quantile(rank, true).unwrap();
        let true_value = rank * n as f64;
        assert!(
            (quantile - true_value).abs() <= eps * n as f64,
            "direct sketch quantile off at rank {rank}: {quantile}"
        );
    }
}

#[test]
fn test_direct_growth_fails_without_provider() {
    let k = DEFAULT_K;
    let initial = KllSketch::<f64>::max_serialized_size_bytes(k, 0, true);
    let region = vec![0u8; initial];
    let mut sketch = KllSketch::<f64>::new_direct(k, region, None).unwrap();

    // the initial capacity is exactly k items
    for i in 0..k as usize {
        sketch.update(i as f64).unwrap();
    }
    assert_eq!(sketch.n(), k as u64);

    // the next update needs a level and a bigger region
    let err = sketch.update(12345.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientSpace);

    // the failed update left no partial mutation behind
    assert_eq!(sketch.n(), k as u64);
    assert_eq!(sketch.max_item().unwrap(), (k - 1) as f64);
    assert_eq!(
        sketch.iter().map(|(_, w)| w).sum::<u64>(),
        k as u64
    );
}

#[test]
fn test_direct_growth_fails_when_provider_refuses() {
    let mut sketch = KllSketch::<f64>::new_direct(
        DEFAULT_K,
        Vec::new(),
        Some(Box::new(GrowableHeapMemory) as Box<dyn MemoryProvider>),
    )
    .unwrap();
    for i in 0..DEFAULT_K as usize {
        sketch.update(i as f64).unwrap();
    }
    let compact_before = sketch.to_compact_bytes();

    // re-wrap the same region with a refusing provider
    let region = sketch.into_region().unwrap();
    let mut sketch = KllSketch::<f64>::writable_wrap(
        region,
        Some(Box::new(DenyingMemory) as Box<dyn MemoryProvider>),
    )
    .unwrap();
    let err = sketch.update(12345.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientSpace);
    assert_eq!(sketch.to_compact_bytes(), compact_before);
}

#[test]
fn test_direct_growth_through_provider() {
    let requests = Rc::new(Cell::new(0usize));
    let provider = CountingMemory {
        requests: Rc::clone(&requests),
    };
    let mut sketch = KllSketch::<f64>::new_direct(
        64,
        Vec::new(),
        Some(Box::new(provider) as Box<dyn MemoryProvider>),
    )
    .unwrap();
    for i in 0..10_000 {
        sketch.update(i as f64).unwrap();
    }
    assert_eq!(sketch.n(), 10_000);
    assert!(requests.get() >= 1, "provider was never consulted");
}

#[test]
fn test_merge_into_direct_sketch() {
    let mut target = KllSketch::<f64>::new_direct(DEFAULT_K, Vec::new(), growable()).unwrap();
    for i in 0..1_000 {
        target.update(i as f64).unwrap();
    }
    let mut other = KllSketch::<f64>::with_seed(DEFAULT_K, 31).unwrap();
    for i in 1_000..51_000 {
        other.update(i as f64).unwrap();
    }

    target.merge(&other).unwrap();
    assert_eq!(target.n(), 51_000);
    assert_eq!(target.min_item().unwrap(), 0.0);
    assert_eq!(target.max_item().unwrap(), 50_999.0);
    assert_eq!(target.iter().map(|(_, w)| w).sum::<u64>(), 51_000);

    let eps = target.normalized_rank_error(false);
    let median = target.quantile(0.5, true).unwrap();
    assert!((median - 25_500.0).abs() <= eps * 51_000.0);
}

#[test]
fn test_merge_into_direct_fails_cleanly_without_space() {
    let initial = KllSketch::<f64>::max_serialized_size_bytes(DEFAULT_K, 0, true);
    let region = vec![0u8; initial];
    let mut target = KllSketch::<f64>::new_direct(DEFAULT_K, region, None).unwrap();
    for i in 0..100 {
        target.update(i as f64).unwrap();
    }
    let before = target.to_compact_bytes();

    let mut other = KllSketch::<f64>::with_seed(DEFAULT_K, 32).unwrap();
    for i in 0..50_000 {
        other.update(i as f64).unwrap();
    }

    let err = target.merge(&other).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientSpace);
    // the target is unchanged, merge grows the region before mutating
    assert_eq!(target.to_compact_bytes(), before);
}

#[test]
fn test_direct_state_survives_rewrap() {
    let mut sketch = KllSketch::<f64>::new_direct(DEFAULT_K, Vec::new(), growable()).unwrap();
    for i in 0..25_000 {
        sketch.update(i as f64).unwrap();
    }
    let compact = sketch.to_compact_bytes();
    let region = sketch.into_region().unwrap();

    let mut rewrapped = KllSketch::<f64>::writable_wrap(region, growable()).unwrap();
    assert_eq!(rewrapped.to_compact_bytes(), compact);
    assert_eq!(rewrapped.n(), 25_000);

    // in-place mutation continues where the image left off
    for i in 25_000..30_000 {
        rewrapped.update(i as f64).unwrap();
    }
    assert_eq!(rewrapped.n(), 30_000);
    assert_eq!(rewrapped.max_item().unwrap(), 29_999.0);
    assert_eq!(rewrapped.iter().map(|(_, w)| w).sum::<u64>(), 30_000);
}

#[test]
fn test_direct_reset() {
    let mut sketch = KllSketch::<f64>::new_direct(DEFAULT_K, Vec::new(), growable()).unwrap();
    for i in 0..50_000 {
        sketch.update(i as f64).unwrap();
    }
    sketch.reset().unwrap();
    assert!(sketch.is_empty());
    assert_eq!(sketch.k(), DEFAULT_K);
    assert_eq!(sketch.min_k(), DEFAULT_K);

    sketch.update(7.0).unwrap();
    assert_eq!(sketch.n(), 1);
    assert_eq!(sketch.quantile(0.5, true).unwrap(), 7.0);

    // the region still carries a valid image after reset and reuse
    let region = sketch.into_region().unwrap();
    let wrapped = KllSketch::<f64>::writable_wrap(region, None).unwrap();
    assert_eq!(wrapped.n(), 1);
    assert_eq!(wrapped.quantile(0.5, true).unwrap(), 7.0);
}

#[test]
fn test_direct_and_heap_agree_within_error() {
    let mut direct = KllSketch::<f64>::new_direct(256, Vec::new(), growable()).unwrap();
    let mut heap = KllSketch::<f64>::new(256).unwrap();
    for i in 0..200_000 {
        direct.update(i as f64).unwrap();
        heap.update(i as f64).unwrap();
    }
    assert_eq!(direct.n(), heap.n());
    assert_eq!(direct.min_item().unwrap(), heap.min_item().unwrap());
    assert_eq!(direct.max_item().unwrap(), heap.max_item().unwrap());

    let eps = direct.normalized_rank_error(false);
    for pct in [5, 25, 50, 75, 95] {
        let rank = pct as f64 / 100.0;
        let d = direct.quantile(rank, true).unwrap();
        let h = heap.quantile(rank, true).unwrap();
        assert!(
            (d - h).abs() <= 2.0 * eps * 200_000.0,
            "direct and heap disagree at rank {rank}: {d} vs {h}"
        );
    }
}

#[test]
fn test_undersized_region_with_provider_is_grown_up_front() {
    let sketch = KllSketch::<f64>::new_direct(DEFAULT_K, vec![0u8; 16], growable()).unwrap();
    assert!(sketch.is_empty());
    let region = sketch.into_region().unwrap();
    assert!(region.len() >= KllSketch::<f64>::max_serialized_size_bytes(DEFAULT_K, 0, true));
}

#[test]
fn test_undersized_region_without_provider_is_rejected() {
    let err = KllSketch::<f64>::new_direct(DEFAULT_K, vec![0u8; 16], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientSpace);
}
