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

use kll_sketch::error::ErrorKind;
use kll_sketch::kll::DEFAULT_K;
use kll_sketch::kll::KllSketch;

fn filled_sketch(k: u16, seed: u64, n: usize) -> KllSketch<'static, f64> {
    let mut sketch = KllSketch::<f64>::with_seed(k, seed).unwrap();
    for i in 0..n {
        sketch.update(i as f64).unwrap();
    }
    sketch
}

#[test]
fn test_empty_image_is_eight_bytes() {
    let sketch = KllSketch::<f64>::new(DEFAULT_K).unwrap();
    let bytes = sketch.to_compact_bytes();
    assert_eq!(bytes.len(), 8);
    assert_eq!(sketch.serialized_size_bytes(), 8);

    let heapified = KllSketch::<f64>::heapify(&bytes).unwrap();
    assert!(heapified.is_empty());
    assert_eq!(heapified.k(), DEFAULT_K);
    assert_eq!(
        heapified.quantile(0.5, true).unwrap_err().kind(),
        ErrorKind::EmptySketch
    );
    assert_eq!(
        heapified.rank(0.0, true).unwrap_err().kind(),
        ErrorKind::EmptySketch
    );
    assert_eq!(heapified, sketch);
}

#[test]
fn test_single_item_image() {
    let mut sketch = KllSketch::<f64>::new(DEFAULT_K).unwrap();
    sketch.update(1.0).unwrap();
    let bytes = sketch.to_compact_bytes();
    assert_eq!(bytes.len(), 8 + std::mem::size_of::<f64>());

    let heapified = KllSketch::<f64>::heapify(&bytes).unwrap();
    assert_eq!(heapified.n(), 1);
    assert_eq!(heapified.min_item().unwrap(), 1.0);
    assert_eq!(heapified.max_item().unwrap(), 1.0);
    assert_eq!(heapified.quantile(0.5, true).unwrap(), 1.0);
    assert_eq!(heapified, sketch);
}

#[test]
fn test_single_item_image_f32() {
    let mut sketch = KllSketch::<f32>::new(DEFAULT_K).unwrap();
    sketch.update(1.0).unwrap();
    let bytes = sketch.to_compact_bytes();
    assert_eq!(bytes.len(), 8 + std::mem::size_of::<f32>());
    let heapified = KllSketch::<f32>::heapify(&bytes).unwrap();
    assert_eq!(heapified, sketch);
}

#[test]
fn test_compact_round_trip_exact_mode() {
    let sketch = filled_sketch(DEFAULT_K, 3, 150);
    let bytes = sketch.to_compact_bytes();
    assert_eq!(bytes.len(), sketch.serialized_size_bytes());
    let heapified = KllSketch::<f64>::heapify(&bytes).unwrap();
    assert_eq!(heapified, sketch);
}

#[test]
fn test_compact_round_trip_estimation_mode() {
    let sketch = filled_sketch(DEFAULT_K, 4, 100_000);
    let bytes = sketch.to_compact_bytes();
    assert_eq!(bytes.len(), sketch.serialized_size_bytes());

    let heapified = KllSketch::<f64>::heapify(&bytes).unwrap();
    assert_eq!(heapified, sketch);
    assert_eq!(heapified.n(), sketch.n());
    assert_eq!(heapified.num_retained(), sketch.num_retained());
    assert_eq!(heapified.min_k(), sketch.min_k());
    for pct in [1, 25, 50, 75, 99] {
        let rank = pct as f64 / 100.0;
        assert_eq!(
            heapified.quantile(rank, true).unwrap(),
            sketch.quantile(rank, true).unwrap()
        );
    }
}

#[test]
fn test_updatable_round_trip() {
    let sketch = filled_sketch(DEFAULT_K, 5, 100_000);
    let image = sketch.to_updatable_bytes();
    assert!(image.len() > sketch.to_compact_bytes().len());

    let wrapped = KllSketch::<f64>::writable_wrap(image, None).unwrap();
    assert_eq!(wrapped, sketch);
    assert_eq!(wrapped.to_compact_bytes(), sketch.to_compact_bytes());
}

#[test]
fn test_wrap_compact_reads_in_place() {
    let sketch = filled_sketch(DEFAULT_K, 6, 100_000);
    let bytes = sketch.to_compact_bytes();
    let wrapped = KllSketch::<f64>::wrap_compact(&bytes).unwrap();

    assert!(wrapped.is_read_only());
    assert!(wrapped.has_backing_region());
    assert_eq!(wrapped, sketch);
    for pct in [1, 50, 99] {
        let rank = pct as f64 / 100.0;
        assert_eq!(
            wrapped.quantile(rank, true).unwrap(),
            sketch.quantile(rank, true).unwrap()
        );
    }
    assert_eq!(
        wrapped.iter().map(|(_, w)| w).sum::<u64>(),
        sketch.n()
    );
}

#[test]
fn test_wrap_compact_rejects_mutation() {
    let sketch = filled_sketch(DEFAULT_K, 7, 1_000);
    let bytes = sketch.to_compact_bytes();
    let mut wrapped = KllSketch::<f64>::wrap_compact(&bytes).unwrap();

    assert_eq!(wrapped.update(1.0).unwrap_err().kind(), ErrorKind::ReadOnly);
    let other = filled_sketch(DEFAULT_K, 8, 10);
    assert_eq!(wrapped.merge(&other).unwrap_err().kind(), ErrorKind::ReadOnly);
    assert_eq!(wrapped.reset().unwrap_err().kind(), ErrorKind::ReadOnly);
    // the wrapped state is untouched
    assert_eq!(wrapped.n(), 1_000);
}

#[test]
fn test_wrap_compact_empty_and_single() {
    let empty = KllSketch::<f64>::new(DEFAULT_K).unwrap();
    let empty_bytes = empty.to_compact_bytes();
    let wrapped = KllSketch::<f64>::wrap_compact(&empty_bytes).unwrap();
    assert!(wrapped.is_empty());
    assert!(wrapped.is_read_only());

    let mut single = KllSketch::<f64>::new(DEFAULT_K).unwrap();
    single.update(42.0).unwrap();
    let single_bytes = single.to_compact_bytes();
    let wrapped = KllSketch::<f64>::wrap_compact(&single_bytes).unwrap();
    assert_eq!(wrapped.n(), 1);
    assert_eq!(wrapped.quantile(0.5, true).unwrap(), 42.0);
    assert_eq!(wrapped.iter().collect::<Vec<_>>(), vec![(42.0, 1)]);
}

#[test]
fn test_merge_wrapped_source() {
    let source = filled_sketch(DEFAULT_K, 9, 50_000);
    let bytes = source.to_compact_bytes();
    let wrapped = KllSketch::<f64>::wrap_compact(&bytes).unwrap();

    let mut target = filled_sketch(DEFAULT_K, 10, 1_000);
    target.merge(&wrapped).unwrap();
    assert_eq!(target.n(), 51_000);
    assert_eq!(target.min_item().unwrap(), 0.0);
    assert_eq!(target.max_item().unwrap(), 49_999.0);
}

// With the compaction randomness seeded identically, two sketches fed the
// same stream produce byte-identical compact images.
#[test]
fn test_seeded_sketches_are_byte_identical() {
    let sketch1 = filled_sketch(256, 11, 100_000);
    let sketch2 = filled_sketch(256, 11, 100_000);
    assert_eq!(sketch1.to_compact_bytes(), sketch2.to_compact_bytes());
    assert_eq!(sketch1.to_updatable_bytes(), sketch2.to_updatable_bytes());

    // a different seed drives different compactions
    let sketch3 = filled_sketch(256, 12, 100_000);
    assert_eq!(sketch3.n(), sketch1.n());
    assert_ne!(sketch1.to_compact_bytes(), sketch3.to_compact_bytes());
}

#[test]
fn test_heapify_rejects_wrong_family() {
    let mut bytes = filled_sketch(DEFAULT_K, 13, 100).to_compact_bytes();
    bytes[2] = 16;
    let err = KllSketch::<f64>::heapify(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptImage);
}

#[test]
fn test_heapify_rejects_bad_serial_version() {
    let mut bytes = filled_sketch(DEFAULT_K, 14, 100).to_compact_bytes();
    bytes[1] = 0;
    assert_eq!(
        KllSketch::<f64>::heapify(&bytes).unwrap_err().kind(),
        ErrorKind::CorruptImage
    );
    bytes[1] = 4;
    assert_eq!(
        KllSketch::<f64>::heapify(&bytes).unwrap_err().kind(),
        ErrorKind::CorruptImage
    );
}

#[test]
fn test_heapify_rejects_bad_m() {
    let mut bytes = filled_sketch(DEFAULT_K, 15, 100).to_compact_bytes();
    bytes[6] = 5;
    assert_eq!(
        KllSketch::<f64>::heapify(&bytes).unwrap_err().kind(),
        ErrorKind::CorruptImage
    );
}

#[test]
fn test_heapify_rejects_k_out_of_range() {
    let mut bytes = filled_sketch(DEFAULT_K, 16, 100).to_compact_bytes();
    bytes[4] = 0;
    bytes[5] = 0;
    assert_eq!(
        KllSketch::<f64>::heapify(&bytes).unwrap_err().kind(),
        ErrorKind::CorruptImage
    );
}

#[test]
fn test_heapify_rejects_truncated_images() {
    let bytes = filled_sketch(DEFAULT_K, 17, 10_000).to_compact_bytes();
    assert_eq!(
        KllSketch::<f64>::heapify(&bytes[..7]).unwrap_err().kind(),
        ErrorKind::CorruptImage
    );
    assert_eq!(
        KllSketch::<f64>::heapify(&bytes[..19]).unwrap_err().kind(),
        ErrorKind::CorruptImage
    );
    // a partial item at the tail is rejected
    assert_eq!(
        KllSketch::<f64>::heapify(&bytes[..bytes.len() - 3])
            .unwrap_err()
            .kind(),
        ErrorKind::CorruptImage
    );
}

#[test]
fn test_heapify_rejects_updatable_image() {
    let image = filled_sketch(DEFAULT_K, 18, 10_000).to_updatable_bytes();
    assert_eq!(
        KllSketch::<f64>::heapify(&image).unwrap_err().kind(),
        ErrorKind::CorruptImage
    );
    assert_eq!(
        KllSketch::<f64>::wrap_compact(&image).unwrap_err().kind(),
        ErrorKind::CorruptImage
    );
}

#[test]
fn test_heapify_rejects_type_mismatch() {
    let doubles = filled_sketch(DEFAULT_K, 19, 100).to_compact_bytes();
    assert_eq!(
        KllSketch::<f32>::heapify(&doubles).unwrap_err().kind(),
        ErrorKind::TypeMismatch
    );

    let mut floats = KllSketch::<f32>::with_seed(DEFAULT_K, 20).unwrap();
    for i in 0..100 {
        floats.update(i as f32).unwrap();
    }
    let float_bytes = floats.to_compact_bytes();
    assert_eq!(
        KllSketch::<f64>::heapify(&float_bytes).unwrap_err().kind(),
        ErrorKind::TypeMismatch
    );
}

#[test]
fn test_writable_wrap_rejects_compact_image() {
    let bytes = filled_sketch(DEFAULT_K, 21, 100).to_compact_bytes();
    assert_eq!(
        KllSketch::<f64>::writable_wrap(bytes, None)
            .unwrap_err()
            .kind(),
        ErrorKind::CorruptImage
    );
}

#[test]
fn test_heapify_accepts_unsorted_level_zero() {
    let sketch = filled_sketch(DEFAULT_K, 22, 50);
    let mut bytes = sketch.to_compact_bytes();
    // scramble the level-0 items and clear the sorted flag; the reader
    // must sort during heapify
    let items_start = bytes.len() - 50 * std::mem::size_of::<f64>();
    let (head, items) = bytes.split_at_mut(items_start);
    head[3] &= !0x02;
    let first_item: Vec<u8> = items[..8].to_vec();
    let last_start = items.len() - 8;
    let last_item: Vec<u8> = items[last_start..].to_vec();
    items[..8].copy_from_slice(&last_item);
    items[last_start..].copy_from_slice(&first_item);

    let heapified = KllSketch::<f64>::heapify(&bytes).unwrap();
    assert_eq!(heapified, sketch);
    assert_eq!(heapified.quantile(0.5, true).unwrap(), sketch.quantile(0.5, true).unwrap());
}

#[test]
fn test_max_serialized_size_is_an_upper_bound() {
    for &n in &[0u64, 1, 100, 10_000, 1_000_000] {
        let sketch = filled_sketch(DEFAULT_K, 23, n as usize);
        let bound = KllSketch::<f64>::max_serialized_size_bytes(DEFAULT_K, n, false);
        assert!(
            sketch.to_compact_bytes().len() <= bound,
            "compact size exceeds bound for n={n}"
        );
        let bound = KllSketch::<f64>::max_serialized_size_bytes(DEFAULT_K, n, true);
        assert!(
            sketch.to_updatable_bytes().len() <= bound,
            "updatable size exceeds bound for n={n}"
        );
    }
}

#[test]
fn test_f32_round_trip() {
    let mut sketch = KllSketch::<f32>::with_seed(DEFAULT_K, 24).unwrap();
    for i in 0..50_000 {
        sketch.update(i as f32).unwrap();
    }
    let heapified = KllSketch::<f32>::heapify(&sketch.to_compact_bytes()).unwrap();
    assert_eq!(heapified, sketch);
    let wrapped = KllSketch::<f32>::writable_wrap(sketch.to_updatable_bytes(), None).unwrap();
    assert_eq!(wrapped, sketch);
}
