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

use std::cmp::Ordering;
use std::fmt;

use byteorder::ByteOrder;
use byteorder::LE;

use super::DEFAULT_K;
use super::DEFAULT_M;
use super::MAX_K;
use super::MIN_K;
use super::helper::compute_total_capacity;
use super::helper::level_capacity;
use super::helper::normalized_rank_error;
use super::helper::ub_on_num_levels;
use super::helper::weighted_sum_of_levels;
use super::items::CompactRegion;
use super::items::DirectRegion;
use super::items::Items;
use super::items::compact_image_bytes;
use super::items::compact_items_start;
use super::items::min_item_offset;
use super::items::updatable_image_bytes;
use super::items::updatable_items_start;
use super::iterator::KllSketchIter;
use super::preamble;
use super::preamble::DATA_START;
use super::preamble::DATA_START_SHORT;
use super::preamble::FLAG_DOUBLES_SKETCH;
use super::preamble::FLAG_EMPTY;
use super::preamble::FLAG_LEVEL_ZERO_SORTED;
use super::preamble::FLAG_SINGLE_ITEM;
use super::preamble::FLAG_UPDATABLE;
use super::preamble::PREAMBLE_INTS_FULL;
use super::preamble::PREAMBLE_INTS_SHORT;
use super::preamble::Preamble;
use super::preamble::SERIAL_VERSION_COMPACT;
use super::preamble::SERIAL_VERSION_SINGLE;
use super::preamble::SERIAL_VERSION_UPDATABLE;
use super::sorted_view::SortedView;
use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::common::RandomSource;
use crate::common::XorShift64;
use crate::error::Error;
use crate::memory::MemoryProvider;

/// Trait implemented by item types supported by [`KllSketch`].
pub(crate) trait KllItem: Copy + PartialEq + fmt::Debug {
    /// Serialized size in bytes.
    const SERIALIZED_SIZE: usize;

    /// Filler for garbage regions and work buffers.
    const ZERO: Self;

    /// True for the 64-bit element type; drives the type flag bit.
    const IS_DOUBLE: bool;

    /// Compare two items.
    fn cmp(a: &Self, b: &Self) -> Ordering;

    /// Returns true if the item is NaN.
    fn is_nan(value: &Self) -> bool;

    /// Reads one item from the start of the buffer.
    fn get_le(buf: &[u8]) -> Self;

    /// Writes one item at the start of the buffer.
    fn put_le(buf: &mut [u8], value: Self);

    /// Appends one item to the output.
    fn write_le(value: Self, out: &mut SketchBytes);

    /// Reads one item from the input cursor.
    fn read_le(input: &mut SketchSlice<'_>) -> Result<Self, Error>;
}

/// KLL sketch for estimating quantiles and ranks.
///
/// The retained items live in a single array partitioned into levels by an
/// offsets array; level `i` holds items of weight `2^i`. Storage is either
/// an owned heap buffer, an owned updatable byte region mutated in place,
/// or a borrowed read-only compact byte image. See the
/// [kll module level documentation](crate::kll) for more.
#[allow(private_bounds)]
pub struct KllSketch<'a, T: KllItem> {
    k: u16,
    m: u8,
    min_k: u16,
    n: u64,
    is_level_zero_sorted: bool,
    levels: Vec<usize>,
    min_item: Option<T>,
    max_item: Option<T>,
    items: Items<'a, T>,
    random: XorShift64,
}

impl<'a, T: KllItem> Default for KllSketch<'a, T> {
    fn default() -> Self {
        Self::new(DEFAULT_K).expect("DEFAULT_K is always valid")
    }
}

#[allow(private_bounds)]
impl<'a, T: KllItem> KllSketch<'a, T> {
    /// Creates a new heap sketch with the given value of k.
    ///
    /// Fails with `InvalidArgument` if k is outside `[8, 65535]`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use kll_sketch::kll::KllSketch;
    /// let sketch = KllSketch::<f64>::new(200).unwrap();
    /// assert_eq!(sketch.k(), 200);
    /// ```
    pub fn new(k: u16) -> Result<Self, Error> {
        Self::validate_k(k)?;
        Ok(Self::make_heap(k, XorShift64::default()))
    }

    /// Creates a new heap sketch whose compaction randomness is seeded.
    ///
    /// Two seeded sketches fed the same updates go through identical
    /// compactions and produce byte-identical compact images.
    pub fn with_seed(k: u16, seed: u64) -> Result<Self, Error> {
        Self::validate_k(k)?;
        Ok(Self::make_heap(k, XorShift64::seeded(seed)))
    }

    /// Creates a new sketch operating in place over the given byte region.
    ///
    /// The region is initialized to an updatable image. If it is too small
    /// for the initial capacity, the provider is asked for a larger one;
    /// without a provider the call fails with `InsufficientSpace`.
    pub fn new_direct(
        k: u16,
        mut region: Vec<u8>,
        mut provider: Option<Box<dyn MemoryProvider>>,
    ) -> Result<Self, Error> {
        Self::validate_k(k)?;
        let capacity = k as usize;
        let required = updatable_image_bytes(1, capacity, T::SERIALIZED_SIZE);
        if region.len() < required {
            let Some(p) = provider.as_mut() else {
                return Err(Error::insufficient_space(required, region.len()));
            };
            region = p.request(&region, required)?;
            if region.len() < required {
                return Err(Error::insufficient_space(required, region.len()));
            }
        }
        let levels = vec![capacity, capacity];
        let items = vec![T::ZERO; capacity];
        write_updatable_image::<T>(
            &mut region,
            k,
            DEFAULT_M,
            0,
            k,
            false,
            &levels,
            T::ZERO,
            T::ZERO,
            &items,
        );
        Ok(Self {
            k,
            m: DEFAULT_M,
            min_k: k,
            n: 0,
            is_level_zero_sorted: false,
            levels,
            min_item: None,
            max_item: None,
            items: Items::Updatable(DirectRegion {
                region,
                provider,
                items_start: updatable_items_start(1, T::SERIALIZED_SIZE),
            }),
            random: XorShift64::default(),
        })
    }

    /// Instantiates an on-heap sketch from a compact byte image.
    ///
    /// The resulting sketch keeps no link to the input. Updatable images
    /// are rejected; use [`KllSketch::writable_wrap`] for those. Level 0
    /// is sorted during heapify when the image left it unsorted.
    pub fn heapify(bytes: &[u8]) -> Result<Self, Error> {
        let pre = Preamble::read(bytes)?;
        if pre.ser_ver == SERIAL_VERSION_UPDATABLE {
            return Err(Error::corrupt_image(
                "updatable images cannot be heapified, use writable_wrap",
            ));
        }
        Self::check_item_type(&pre)?;

        if pre.is_empty() {
            if bytes.len() != DATA_START_SHORT {
                return Err(Error::corrupt_image("empty image must be exactly 8 bytes")
                    .with_context("len", bytes.len()));
            }
            let mut sketch = Self::make_heap(pre.k, XorShift64::default());
            sketch.m = pre.m;
            sketch.is_level_zero_sorted = pre.is_level_zero_sorted();
            return Ok(sketch);
        }

        if pre.is_single_item() {
            let expected = DATA_START_SHORT + T::SERIALIZED_SIZE;
            if bytes.len() != expected {
                return Err(Error::corrupt_image("single-item image has the wrong size")
                    .with_context("expected", expected)
                    .with_context("actual", bytes.len()));
            }
            let mut input = SketchSlice::new(&bytes[DATA_START_SHORT..]);
            let item = T::read_le(&mut input)?;
            let capacity = compute_total_capacity(pre.k, pre.m, 1) as usize;
            let mut items = vec![T::ZERO; capacity];
            items[capacity - 1] = item;
            return Ok(Self {
                k: pre.k,
                m: pre.m,
                min_k: pre.k,
                n: 1,
                is_level_zero_sorted: true,
                levels: vec![capacity - 1, capacity],
                min_item: Some(item),
                max_item: Some(item),
                items: Items::Heap(items),
                random: XorShift64::default(),
            });
        }

        let mut input = SketchSlice::new(&bytes[DATA_START..]);
        let (normalized, num_retained) = Self::read_compact_offsets(&pre, &mut input)?;
        let min_item = T::read_le(&mut input)?;
        let max_item = T::read_le(&mut input)?;

        let capacity = compute_total_capacity(pre.k, pre.m, pre.num_levels) as usize;
        let garbage = capacity - num_retained;
        let levels: Vec<usize> = normalized.iter().map(|&offset| offset + garbage).collect();
        let mut items = vec![T::ZERO; capacity];
        for slot in items[garbage..].iter_mut() {
            *slot = T::read_le(&mut input)?;
        }
        // accept unsorted level 0 for interchange compatibility
        if !pre.is_level_zero_sorted() {
            items[levels[0]..levels[1]].sort_by(T::cmp);
        }

        Ok(Self {
            k: pre.k,
            m: pre.m,
            min_k: pre.min_k,
            n: pre.n,
            is_level_zero_sorted: true,
            levels,
            min_item: Some(min_item),
            max_item: Some(max_item),
            items: Items::Heap(items),
            random: XorShift64::default(),
        })
    }

    /// Wraps a compact byte image in place, producing a read-only sketch.
    ///
    /// No item data is copied; the image is read at query time. All
    /// mutating calls fail with `ReadOnly`.
    pub fn wrap_compact(bytes: &'a [u8]) -> Result<Self, Error> {
        let pre = Preamble::read(bytes)?;
        if pre.ser_ver == SERIAL_VERSION_UPDATABLE {
            return Err(Error::corrupt_image(
                "updatable images cannot be wrapped read-only, use writable_wrap",
            ));
        }
        Self::check_item_type(&pre)?;

        if pre.is_empty() {
            if bytes.len() != DATA_START_SHORT {
                return Err(Error::corrupt_image("empty image must be exactly 8 bytes")
                    .with_context("len", bytes.len()));
            }
            return Ok(Self {
                k: pre.k,
                m: pre.m,
                min_k: pre.k,
                n: 0,
                is_level_zero_sorted: pre.is_level_zero_sorted(),
                levels: vec![0, 0],
                min_item: None,
                max_item: None,
                items: Items::Compact(CompactRegion {
                    region: bytes,
                    items_start: DATA_START_SHORT,
                }),
                random: XorShift64::default(),
            });
        }

        if pre.is_single_item() {
            let expected = DATA_START_SHORT + T::SERIALIZED_SIZE;
            if bytes.len() != expected {
                return Err(Error::corrupt_image("single-item image has the wrong size")
                    .with_context("expected", expected)
                    .with_context("actual", bytes.len()));
            }
            let item = T::get_le(&bytes[DATA_START_SHORT..]);
            return Ok(Self {
                k: pre.k,
                m: pre.m,
                min_k: pre.k,
                n: 1,
                is_level_zero_sorted: true,
                levels: vec![0, 1],
                min_item: Some(item),
                max_item: Some(item),
                items: Items::Compact(CompactRegion {
                    region: bytes,
                    items_start: DATA_START_SHORT,
                }),
                random: XorShift64::default(),
            });
        }

        let mut input = SketchSlice::new(&bytes[DATA_START..]);
        let (levels, _) = Self::read_compact_offsets(&pre, &mut input)?;
        let min_item = T::read_le(&mut input)?;
        let max_item = T::read_le(&mut input)?;
        Ok(Self {
            k: pre.k,
            m: pre.m,
            min_k: pre.min_k,
            n: pre.n,
            is_level_zero_sorted: pre.is_level_zero_sorted(),
            levels,
            min_item: Some(min_item),
            max_item: Some(max_item),
            items: Items::Compact(CompactRegion {
                region: bytes,
                items_start: compact_items_start(pre.num_levels, T::SERIALIZED_SIZE),
            }),
            random: XorShift64::default(),
        })
    }

    /// Wraps an updatable byte image for in-place mutation, taking
    /// ownership of the region. Retrieve it back with
    /// [`KllSketch::into_region`].
    pub fn writable_wrap(
        region: Vec<u8>,
        provider: Option<Box<dyn MemoryProvider>>,
    ) -> Result<Self, Error> {
        let pre = Preamble::read(&region)?;
        if pre.ser_ver != SERIAL_VERSION_UPDATABLE {
            return Err(Error::corrupt_image(
                "writable wrap requires an updatable image",
            ));
        }
        Self::check_item_type(&pre)?;

        let num_levels = pre.num_levels;
        let levels_end = DATA_START + (num_levels + 1) * 4;
        if region.len() < levels_end {
            return Err(Error::insufficient_data("levels"));
        }
        let mut levels = Vec::with_capacity(num_levels + 1);
        for i in 0..=num_levels {
            let at = DATA_START + i * 4;
            levels.push(LE::read_u32(&region[at..at + 4]) as usize);
        }
        for pair in levels.windows(2) {
            if pair[1] < pair[0] {
                return Err(Error::corrupt_image("level offsets must be non-decreasing"));
            }
        }
        let capacity = levels[num_levels];
        if capacity != compute_total_capacity(pre.k, pre.m, num_levels) as usize {
            return Err(Error::corrupt_image(
                "capacity does not match k, m and num_levels",
            )
            .with_context("capacity", capacity));
        }
        let required = updatable_image_bytes(num_levels, capacity, T::SERIALIZED_SIZE);
        if region.len() < required {
            return Err(Error::corrupt_image("region too small for declared capacity")
                .with_context("required", required)
                .with_context("actual", region.len()));
        }
        let (min_item, max_item) = if pre.n == 0 {
            (None, None)
        } else {
            let at = min_item_offset(num_levels);
            (
                Some(T::get_le(&region[at..])),
                Some(T::get_le(&region[at + T::SERIALIZED_SIZE..])),
            )
        };
        Ok(Self {
            k: pre.k,
            m: pre.m,
            min_k: pre.min_k,
            n: pre.n,
            is_level_zero_sorted: pre.is_level_zero_sorted(),
            levels,
            min_item,
            max_item,
            items: Items::Updatable(DirectRegion {
                region,
                provider,
                items_start: updatable_items_start(num_levels, T::SERIALIZED_SIZE),
            }),
            random: XorShift64::default(),
        })
    }

    /// Returns parameter k used to configure this sketch.
    pub fn k(&self) -> u16 {
        self.k
    }

    /// Returns parameter m, the minimum level width.
    pub fn m(&self) -> u8 {
        self.m
    }

    /// Returns the minimum k this sketch has seen through merging.
    pub fn min_k(&self) -> u16 {
        self.min_k
    }

    /// Returns total weight of the stream.
    pub fn n(&self) -> u64 {
        self.n
    }

    /// Returns true if the sketch has not seen any data.
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Returns true if the sketch can only be queried.
    pub fn is_read_only(&self) -> bool {
        self.items.is_read_only()
    }

    /// Returns true if the sketch is backed by a byte region rather than
    /// a heap buffer.
    pub fn has_backing_region(&self) -> bool {
        self.items.has_region()
    }

    /// Returns the number of retained items.
    pub fn num_retained(&self) -> usize {
        self.levels[self.num_levels()] - self.levels[0]
    }

    /// Returns the current number of levels.
    pub fn num_levels(&self) -> usize {
        self.levels.len() - 1
    }

    /// Returns true if the sketch has started compacting, which is when
    /// answers become approximate.
    pub fn is_estimation_mode(&self) -> bool {
        self.num_levels() > 1
    }

    /// Returns the exact minimum item of the stream.
    pub fn min_item(&self) -> Result<T, Error> {
        self.min_item.ok_or_else(Error::empty_sketch)
    }

    /// Returns the exact maximum item of the stream.
    pub fn max_item(&self) -> Result<T, Error> {
        self.max_item.ok_or_else(Error::empty_sketch)
    }

    /// Updates the sketch with a new item.
    ///
    /// NaN values are silently ignored and do not count toward n.
    pub fn update(&mut self, item: T) -> Result<(), Error> {
        if T::is_nan(&item) {
            return Ok(());
        }
        if self.is_read_only() {
            return Err(Error::read_only("cannot update a read-only sketch"));
        }
        if self.levels[0] == 0 {
            self.compress_while_updating()?;
        }
        self.update_min_max(item);
        self.set_n(self.n + 1);
        self.set_level_zero_sorted(false);
        let position = self.levels[0] - 1;
        self.set_level_at(0, position);
        self.items.write(position, item)?;
        Ok(())
    }

    /// Merges another sketch into this one.
    ///
    /// Merging with an empty sketch is the identity. A non-empty other
    /// sketch pulls `min_k` down to the smaller of the two, which widens
    /// the reported error bound.
    pub fn merge(&mut self, other: &KllSketch<'_, T>) -> Result<(), Error> {
        if self.is_read_only() {
            return Err(Error::read_only("cannot merge into a read-only sketch"));
        }
        if other.is_empty() {
            return Ok(());
        }
        let final_n = self.n + other.n;

        // Grow a memory-backed target to its worst-case final size up
        // front so nothing can fail after mutation starts.
        if matches!(self.items, Items::Updatable(_)) {
            let ub_levels = ub_on_num_levels(final_n);
            let worst_capacity = compute_total_capacity(self.k, self.m, ub_levels) as usize;
            let required = updatable_image_bytes(ub_levels, worst_capacity, T::SERIALIZED_SIZE);
            self.ensure_region_capacity(required)?;
        }

        for i in other.levels[0]..other.levels[1] {
            self.update(other.read_item(i))?;
        }
        if other.num_levels() >= 2 {
            self.merge_higher_levels(other, final_n)?;
        }

        self.set_n(final_n);
        self.merge_min_max_from(other);
        let new_min_k = self.min_k.min(other.min_k);
        self.set_min_k(new_min_k);
        debug_assert_eq!(
            weighted_sum_of_levels(&self.levels),
            self.n,
            "total weight does not match n"
        );
        Ok(())
    }

    /// Resets the sketch to its initial empty state with the same k.
    pub fn reset(&mut self) -> Result<(), Error> {
        if self.is_read_only() {
            return Err(Error::read_only("cannot reset a read-only sketch"));
        }
        let capacity = self.k as usize;
        let levels = vec![capacity, capacity];
        let items = vec![T::ZERO; capacity];
        self.n = 0;
        self.min_k = self.k;
        self.is_level_zero_sorted = false;
        self.min_item = None;
        self.max_item = None;
        match &mut self.items {
            Items::Heap(buf) => {
                *buf = items;
            }
            Items::Updatable(direct) => {
                write_updatable_image::<T>(
                    &mut direct.region,
                    self.k,
                    self.m,
                    0,
                    self.k,
                    false,
                    &levels,
                    T::ZERO,
                    T::ZERO,
                    &items,
                );
                direct.items_start = updatable_items_start(1, T::SERIALIZED_SIZE);
            }
            Items::Compact(_) => unreachable!("read-only sketches are rejected above"),
        }
        self.levels = levels;
        Ok(())
    }

    /// Returns the normalized rank of the given item.
    pub fn rank(&self, item: T, inclusive: bool) -> Result<f64, Error> {
        if self.is_empty() {
            return Err(Error::empty_sketch());
        }
        Ok(self.build_sorted_view().rank(item, inclusive))
    }

    /// Returns the quantile for the given normalized rank.
    ///
    /// Rank 0 returns the exact stream minimum and rank 1 the exact
    /// maximum. Fails with `InvalidArgument` if rank is outside [0, 1].
    pub fn quantile(&self, rank: f64, inclusive: bool) -> Result<T, Error> {
        if self.is_empty() {
            return Err(Error::empty_sketch());
        }
        if !(0.0..=1.0).contains(&rank) {
            return Err(
                Error::invalid_argument("rank must be in [0.0, 1.0]").with_context("rank", rank)
            );
        }
        if rank == 0.0 {
            return self.min_item();
        }
        if rank == 1.0 {
            return self.max_item();
        }
        self.build_sorted_view().quantile(rank, inclusive)
    }

    /// Returns the approximate CDF at the given split points, with a
    /// trailing 1.0 entry.
    pub fn cdf(&self, split_points: &[T], inclusive: bool) -> Result<Vec<f64>, Error> {
        if self.is_empty() {
            return Err(Error::empty_sketch());
        }
        self.build_sorted_view().cdf(split_points, inclusive)
    }

    /// Returns the approximate PMF over the given split points.
    pub fn pmf(&self, split_points: &[T], inclusive: bool) -> Result<Vec<f64>, Error> {
        if self.is_empty() {
            return Err(Error::empty_sketch());
        }
        self.build_sorted_view().pmf(split_points, inclusive)
    }

    /// Returns an owned sorted snapshot of the retained items.
    ///
    /// The snapshot does not follow later mutations; rebuild it after an
    /// update or merge.
    pub fn sorted_view(&self) -> Result<SortedView<T>, Error> {
        if self.is_empty() {
            return Err(Error::empty_sketch());
        }
        Ok(self.build_sorted_view())
    }

    /// Iterates the retained (item, weight) pairs in physical order.
    pub fn iter(&self) -> KllSketchIter<'_, 'a, T> {
        KllSketchIter::new(self)
    }

    /// Returns normalized rank error of this sketch at 99% confidence,
    /// based on the smallest k seen through merging.
    pub fn normalized_rank_error(&self, pmf: bool) -> f64 {
        normalized_rank_error(self.min_k, pmf)
    }

    /// Lower bound of the rank confidence interval at 99% confidence.
    pub fn rank_lower_bound(&self, rank: f64) -> f64 {
        (rank - self.normalized_rank_error(false)).max(0.0)
    }

    /// Upper bound of the rank confidence interval at 99% confidence.
    pub fn rank_upper_bound(&self, rank: f64) -> f64 {
        (rank + self.normalized_rank_error(false)).min(1.0)
    }

    /// Lower bound of the quantile confidence interval at 99% confidence.
    pub fn quantile_lower_bound(&self, rank: f64) -> Result<T, Error> {
        self.quantile(self.rank_lower_bound(rank), true)
    }

    /// Upper bound of the quantile confidence interval at 99% confidence.
    pub fn quantile_upper_bound(&self, rank: f64) -> Result<T, Error> {
        self.quantile(self.rank_upper_bound(rank), true)
    }

    /// Serializes the sketch to the compact byte format.
    ///
    /// Empty sketches occupy 8 bytes, single-item sketches 8 bytes plus
    /// one item. The general form is the full preamble, `num_levels`
    /// offsets relative to the start of the retained items, min, max, and
    /// the retained items with level 0 sorted.
    pub fn to_compact_bytes(&self) -> Vec<u8> {
        let size = self.compact_size_bytes();
        let mut bytes = SketchBytes::with_capacity(size);

        let is_empty = self.is_empty();
        let is_single = self.n == 1;

        let preamble_ints = if is_empty || is_single {
            PREAMBLE_INTS_SHORT
        } else {
            PREAMBLE_INTS_FULL
        };
        let ser_ver = if is_single {
            SERIAL_VERSION_SINGLE
        } else {
            SERIAL_VERSION_COMPACT
        };
        let mut flags = if T::IS_DOUBLE { FLAG_DOUBLES_SKETCH } else { 0 };
        if is_empty {
            flags |= FLAG_EMPTY;
            if self.is_level_zero_sorted {
                flags |= FLAG_LEVEL_ZERO_SORTED;
            }
        } else if is_single {
            flags |= FLAG_SINGLE_ITEM | FLAG_LEVEL_ZERO_SORTED;
        } else {
            // the writer always emits a sorted level 0
            flags |= FLAG_LEVEL_ZERO_SORTED;
        }

        bytes.write_u8(preamble_ints);
        bytes.write_u8(ser_ver);
        bytes.write_u8(preamble::KLL_FAMILY_ID);
        bytes.write_u8(flags);
        bytes.write_u16_le(self.k);
        bytes.write_u8(self.m);
        bytes.write_u8(0);

        if is_empty {
            return bytes.into_bytes();
        }
        if is_single {
            T::write_le(self.read_item(self.levels[0]), &mut bytes);
            return bytes.into_bytes();
        }

        bytes.write_u64_le(self.n);
        bytes.write_u16_le(self.min_k);
        bytes.write_u16_le(self.num_levels() as u16);
        for level in 0..self.num_levels() {
            bytes.write_u32_le((self.levels[level] - self.levels[0]) as u32);
        }
        if let Some(min_item) = self.min_item {
            T::write_le(min_item, &mut bytes);
        }
        if let Some(max_item) = self.max_item {
            T::write_le(max_item, &mut bytes);
        }

        let mut level_zero = self.load_level(0);
        if !self.is_level_zero_sorted {
            level_zero.sort_by(T::cmp);
        }
        for &item in &level_zero {
            T::write_le(item, &mut bytes);
        }
        for index in self.levels[1]..self.levels[self.num_levels()] {
            T::write_le(self.read_item(index), &mut bytes);
        }

        bytes.into_bytes()
    }

    /// Serializes the sketch to the updatable byte format: full preamble,
    /// `num_levels + 1` absolute offsets, min, max, and the full items
    /// capacity including the leading garbage.
    pub fn to_updatable_bytes(&self) -> Vec<u8> {
        let num_levels = self.num_levels();
        let full_capacity = compute_total_capacity(self.k, self.m, num_levels) as usize;
        let stored_capacity = self.levels[num_levels];
        // compact-wrapped sketches carry no garbage region, re-inflate it
        let pad = full_capacity - stored_capacity;
        let levels: Vec<usize> = self.levels.iter().map(|&offset| offset + pad).collect();
        let mut items = vec![T::ZERO; full_capacity];
        items[pad..].copy_from_slice(&self.items.load(0, stored_capacity));

        let size = updatable_image_bytes(num_levels, full_capacity, T::SERIALIZED_SIZE);
        let mut region = vec![0u8; size];
        write_updatable_image::<T>(
            &mut region,
            self.k,
            self.m,
            self.n,
            self.min_k,
            self.is_level_zero_sorted,
            &levels,
            self.min_item.unwrap_or(T::ZERO),
            self.max_item.unwrap_or(T::ZERO),
            &items,
        );
        region
    }

    /// Returns the number of bytes the sketch occupies in its own
    /// serialized format: updatable for memory-backed updatable sketches,
    /// compact otherwise.
    pub fn serialized_size_bytes(&self) -> usize {
        match &self.items {
            Items::Updatable(_) => updatable_image_bytes(
                self.num_levels(),
                self.levels[self.num_levels()],
                T::SERIALIZED_SIZE,
            ),
            _ => self.compact_size_bytes(),
        }
    }

    /// Upper bound on the serialized size of a sketch with parameter k
    /// after n updates.
    pub fn max_serialized_size_bytes(k: u16, n: u64, updatable: bool) -> usize {
        let num_levels = ub_on_num_levels(n);
        let capacity = compute_total_capacity(k, DEFAULT_M, num_levels) as usize;
        if updatable {
            updatable_image_bytes(num_levels, capacity, T::SERIALIZED_SIZE)
        } else {
            compact_image_bytes(num_levels, capacity, T::SERIALIZED_SIZE)
        }
    }

    /// Consumes the sketch and hands back the updatable byte region, or
    /// None for heap and read-only sketches.
    pub fn into_region(self) -> Option<Vec<u8>> {
        match self.items {
            Items::Updatable(direct) => Some(direct.region),
            _ => None,
        }
    }

    pub(crate) fn levels_slice(&self) -> &[usize] {
        &self.levels
    }

    pub(crate) fn read_item(&self, index: usize) -> T {
        self.items.read(index)
    }

    fn validate_k(k: u16) -> Result<(), Error> {
        if !(MIN_K..=MAX_K).contains(&k) {
            return Err(Error::invalid_argument("k must be in [8, 65535]").with_context("k", k));
        }
        Ok(())
    }

    fn check_item_type(pre: &Preamble) -> Result<(), Error> {
        if pre.is_doubles() != T::IS_DOUBLE {
            return Err(Error::type_mismatch(
                "byte image holds a different element type",
            )
            .with_context("image_is_doubles", pre.is_doubles()));
        }
        Ok(())
    }

    fn make_heap(k: u16, random: XorShift64) -> Self {
        let capacity = k as usize;
        Self {
            k,
            m: DEFAULT_M,
            min_k: k,
            n: 0,
            is_level_zero_sorted: false,
            levels: vec![capacity, capacity],
            min_item: None,
            max_item: None,
            items: Items::Heap(vec![T::ZERO; capacity]),
            random,
        }
    }

    /// Reads and validates the offsets section of a full compact image,
    /// leaving the cursor at the min item. Returns the normalized levels
    /// array, including the implied top offset, and the retained count.
    fn read_compact_offsets(
        pre: &Preamble,
        input: &mut SketchSlice<'_>,
    ) -> Result<(Vec<usize>, usize), Error> {
        let mut offsets = Vec::with_capacity(pre.num_levels + 1);
        for _ in 0..pre.num_levels {
            let offset = input
                .read_u32_le()
                .map_err(|_| Error::insufficient_data("levels"))?;
            offsets.push(offset as usize);
        }
        for pair in offsets.windows(2) {
            if pair[1] < pair[0] {
                return Err(Error::corrupt_image("level offsets must be non-decreasing"));
            }
        }
        let base = offsets[0];
        for offset in &mut offsets {
            *offset -= base;
        }

        let item_bytes = input
            .remaining()
            .checked_sub(2 * T::SERIALIZED_SIZE)
            .ok_or_else(|| Error::insufficient_data("min/max"))?;
        if item_bytes % T::SERIALIZED_SIZE != 0 {
            return Err(Error::corrupt_image(
                "item section is not a whole number of items",
            ));
        }
        let num_retained = item_bytes / T::SERIALIZED_SIZE;
        if num_retained == 0 {
            return Err(Error::corrupt_image("full image with no retained items"));
        }
        if offsets[pre.num_levels - 1] > num_retained {
            return Err(Error::corrupt_image("level offsets exceed retained items"));
        }
        let capacity = compute_total_capacity(pre.k, pre.m, pre.num_levels) as usize;
        if num_retained > capacity {
            return Err(Error::corrupt_image("retained items exceed capacity")
                .with_context("num_retained", num_retained)
                .with_context("capacity", capacity));
        }
        offsets.push(num_retained);
        Ok((offsets, num_retained))
    }

    fn level_size(&self, level: usize) -> usize {
        if level >= self.num_levels() {
            0
        } else {
            self.levels[level + 1] - self.levels[level]
        }
    }

    fn load_level(&self, level: usize) -> Vec<T> {
        self.items.load(self.levels[level], self.level_size(level))
    }

    fn load_all_items(&self) -> Vec<T> {
        self.items.load(0, self.levels[self.num_levels()])
    }

    fn build_sorted_view(&self) -> SortedView<T> {
        let mut pairs: Vec<(T, u64)> = self.iter().collect();
        // the view's extreme entries carry the exact stream min and max,
        // which compaction may have dropped from the sample
        if let (Some(min_item), Some(max_item)) = (self.min_item, self.max_item) {
            if let Some(lowest) = pairs.iter_mut().min_by(|a, b| T::cmp(&a.0, &b.0)) {
                lowest.0 = min_item;
            }
            if let Some(highest) = pairs.iter_mut().max_by(|a, b| T::cmp(&a.0, &b.0)) {
                highest.0 = max_item;
            }
        }
        SortedView::new(pairs)
    }

    fn set_n(&mut self, n: u64) {
        self.n = n;
        if let Items::Updatable(direct) = &mut self.items {
            preamble::set_n(&mut direct.region, n);
        }
    }

    fn set_min_k(&mut self, min_k: u16) {
        self.min_k = min_k;
        if let Items::Updatable(direct) = &mut self.items {
            preamble::set_min_k(&mut direct.region, min_k);
        }
    }

    fn set_level_zero_sorted(&mut self, sorted: bool) {
        self.is_level_zero_sorted = sorted;
        if let Items::Updatable(direct) = &mut self.items {
            preamble::set_level_zero_sorted(&mut direct.region, sorted);
        }
    }

    fn set_level_at(&mut self, index: usize, value: usize) {
        self.levels[index] = value;
        if let Items::Updatable(direct) = &mut self.items {
            direct.set_level_at(index, value);
        }
    }

    fn store_min_max(&mut self) {
        let min_item = self.min_item.unwrap_or(T::ZERO);
        let max_item = self.max_item.unwrap_or(T::ZERO);
        let num_levels = self.num_levels();
        if let Items::Updatable(direct) = &mut self.items {
            direct.set_min_max(num_levels, min_item, max_item);
        }
    }

    fn update_min_max(&mut self, item: T) {
        let mut changed = false;
        match self.min_item {
            None => {
                self.min_item = Some(item);
                self.max_item = Some(item);
                changed = true;
            }
            Some(min) => {
                if T::cmp(&item, &min) == Ordering::Less {
                    self.min_item = Some(item);
                    changed = true;
                }
                if let Some(max) = self.max_item {
                    if T::cmp(&max, &item) == Ordering::Less {
                        self.max_item = Some(item);
                        changed = true;
                    }
                }
            }
        }
        if changed {
            self.store_min_max();
        }
    }

    fn merge_min_max_from(&mut self, other: &KllSketch<'_, T>) {
        match (self.min_item, self.max_item) {
            (Some(min), Some(max)) => {
                if let Some(other_min) = other.min_item {
                    if T::cmp(&other_min, &min) == Ordering::Less {
                        self.min_item = Some(other_min);
                    }
                }
                if let Some(other_max) = other.max_item {
                    if T::cmp(&max, &other_max) == Ordering::Less {
                        self.max_item = Some(other_max);
                    }
                }
            }
            _ => {
                self.min_item = other.min_item;
                self.max_item = other.max_item;
            }
        }
        self.store_min_max();
    }

    fn find_level_to_compact(&self) -> usize {
        let num_levels = self.num_levels();
        for level in 0..num_levels {
            let population = self.levels[level + 1] - self.levels[level];
            let capacity = level_capacity(self.k, num_levels, level, self.m) as usize;
            if population >= capacity {
                return level;
            }
        }
        panic!("no level to compact");
    }

    /// Compacts the lowest over-capacity level, growing the sketch by one
    /// level first when the top level itself is full.
    fn compress_while_updating(&mut self) -> Result<(), Error> {
        let level = self.find_level_to_compact();
        if level == self.num_levels() - 1 {
            self.add_empty_top_level()?;
        }

        let mut levels = self.levels.clone();
        let mut items = self.load_all_items();

        let raw_beg = levels[level];
        let raw_lim = levels[level + 1];
        let raw_pop = raw_lim - raw_beg;
        let pop_above = levels[level + 2] - raw_lim;
        let odd_pop = raw_pop % 2 == 1;
        let adj_beg = raw_beg + usize::from(odd_pop);
        let adj_pop = raw_pop - usize::from(odd_pop);
        let half_adj_pop = adj_pop / 2;

        if level == 0 && !self.is_level_zero_sorted {
            items[adj_beg..adj_beg + adj_pop].sort_by(T::cmp);
        }
        if pop_above == 0 {
            randomly_halve_up(&mut items, adj_beg, adj_pop, &mut self.random);
        } else {
            randomly_halve_down(&mut items, adj_beg, adj_pop, &mut self.random);
            merge_sorted_ranges(
                &mut items,
                adj_beg,
                half_adj_pop,
                raw_lim,
                pop_above,
                adj_beg + half_adj_pop,
            );
        }

        levels[level + 1] -= half_adj_pop;
        if odd_pop {
            // the level keeps its single leftover item
            levels[level] = levels[level + 1] - 1;
            items[levels[level]] = items[raw_beg];
        } else {
            levels[level] = levels[level + 1];
        }
        debug_assert_eq!(levels[level], raw_beg + half_adj_pop);

        // shift the levels below up so the freed space reaches level 0
        if level > 0 {
            let amount = raw_beg - levels[0];
            items.copy_within(levels[0]..levels[0] + amount, levels[0] + half_adj_pop);
            for lower in 0..level {
                levels[lower] += half_adj_pop;
            }
        }

        self.commit_levels_and_items(levels, items)?;
        debug_assert!(self.levels[0] > 0, "compaction must free level-0 space");
        Ok(())
    }

    /// Appends an empty top level: the items array grows by the capacity
    /// of the new bottom level and all existing data shifts up.
    fn add_empty_top_level(&mut self) -> Result<(), Error> {
        let cur_num_levels = self.num_levels();
        let cur_total = self.levels[cur_num_levels];
        let delta_cap = level_capacity(self.k, cur_num_levels + 1, 0, self.m) as usize;
        let new_total = cur_total + delta_cap;

        if matches!(self.items, Items::Updatable(_)) {
            let required =
                updatable_image_bytes(cur_num_levels + 1, new_total, T::SERIALIZED_SIZE);
            self.ensure_region_capacity(required)?;
        }

        let mut new_levels: Vec<usize> = self.levels.iter().map(|&v| v + delta_cap).collect();
        new_levels.push(new_total);
        let old_items = self.load_all_items();
        let mut new_items = vec![T::ZERO; new_total];
        new_items[delta_cap..delta_cap + cur_total].copy_from_slice(&old_items);
        self.commit_levels_and_items(new_levels, new_items)
    }

    fn ensure_region_capacity(&mut self, required: usize) -> Result<(), Error> {
        match &mut self.items {
            Items::Heap(_) => Ok(()),
            Items::Updatable(direct) => {
                if direct.region.len() >= required {
                    return Ok(());
                }
                let Some(provider) = direct.provider.as_mut() else {
                    return Err(Error::insufficient_space(required, direct.region.len()));
                };
                let new_region = provider.request(&direct.region, required)?;
                if new_region.len() < required {
                    return Err(Error::insufficient_space(required, new_region.len()));
                }
                direct.region = new_region;
                Ok(())
            }
            Items::Compact(_) => Err(Error::read_only("items region is read-only")),
        }
    }

    /// Installs a new levels array and items array, keeping the backing
    /// byte region in sync for memory-backed sketches.
    fn commit_levels_and_items(
        &mut self,
        levels: Vec<usize>,
        items: Vec<T>,
    ) -> Result<(), Error> {
        debug_assert_eq!(levels[levels.len() - 1], items.len());
        match &mut self.items {
            Items::Heap(buf) => {
                *buf = items;
            }
            Items::Updatable(direct) => {
                let num_levels = levels.len() - 1;
                preamble::set_num_levels(&mut direct.region, num_levels);
                direct.items_start = updatable_items_start(num_levels, T::SERIALIZED_SIZE);
                direct.write_levels(&levels);
                direct.set_min_max(
                    num_levels,
                    self.min_item.unwrap_or(T::ZERO),
                    self.max_item.unwrap_or(T::ZERO),
                );
                for (i, &item) in items.iter().enumerate() {
                    let at = direct.items_start + i * T::SERIALIZED_SIZE;
                    T::put_le(&mut direct.region[at..], item);
                }
            }
            Items::Compact(_) => return Err(Error::read_only("items region is read-only")),
        }
        self.levels = levels;
        Ok(())
    }

    fn retained_above_level_zero(&self) -> usize {
        self.levels[self.num_levels()] - self.levels[1]
    }

    /// Merges the levels at height 1 and above from both sketches through
    /// a work buffer and compacts the result back to capacity.
    fn merge_higher_levels(&mut self, other: &KllSketch<'_, T>, final_n: u64) -> Result<(), Error> {
        let tmp_space = self.num_retained() + other.retained_above_level_zero();
        let mut workbuf = vec![T::ZERO; tmp_space];
        let ub = ub_on_num_levels(final_n);
        let mut worklevels = vec![0usize; ub + 2];
        let mut outlevels = vec![0usize; ub + 2];
        let provisional_num_levels = self.num_levels().max(other.num_levels());

        self.populate_work_arrays(other, &mut workbuf, &mut worklevels, provisional_num_levels);
        let (new_num_levels, target_items, cur_items) = general_compress(
            self.k,
            self.m,
            provisional_num_levels,
            &mut workbuf,
            &mut worklevels,
            &mut outlevels,
            self.is_level_zero_sorted,
            &mut self.random,
        );
        debug_assert!(new_num_levels <= ub);

        let free_at_bottom = target_items - cur_items;
        let mut new_items = vec![T::ZERO; target_items];
        new_items[free_at_bottom..]
            .copy_from_slice(&workbuf[outlevels[0]..outlevels[0] + cur_items]);
        let shift = free_at_bottom - outlevels[0];
        let new_levels: Vec<usize> = (0..=new_num_levels)
            .map(|level| outlevels[level] + shift)
            .collect();
        self.commit_levels_and_items(new_levels, new_items)
    }

    /// Lays the two sketches out level by level into the work buffer.
    /// Level 0 holds only this sketch's items because the other sketch's
    /// level 0 was already replayed through the update path.
    fn populate_work_arrays(
        &self,
        other: &KllSketch<'_, T>,
        workbuf: &mut [T],
        worklevels: &mut [usize],
        provisional_num_levels: usize,
    ) {
        worklevels[0] = 0;
        let self_pop_zero = self.level_size(0);
        workbuf[..self_pop_zero].copy_from_slice(&self.load_level(0));
        worklevels[1] = self_pop_zero;

        for level in 1..provisional_num_levels {
            let self_pop = self.level_size(level);
            let other_pop = other.level_size(level);
            worklevels[level + 1] = worklevels[level] + self_pop + other_pop;
            let dst = &mut workbuf[worklevels[level]..worklevels[level + 1]];
            if self_pop > 0 && other_pop == 0 {
                dst.copy_from_slice(&self.load_level(level));
            } else if self_pop == 0 && other_pop > 0 {
                dst.copy_from_slice(&other.load_level(level));
            } else if self_pop > 0 && other_pop > 0 {
                merge_into(dst, &self.load_level(level), &other.load_level(level));
            }
        }
    }

    fn compact_size_bytes(&self) -> usize {
        if self.is_empty() {
            return DATA_START_SHORT;
        }
        if self.n == 1 {
            return DATA_START_SHORT + T::SERIALIZED_SIZE;
        }
        compact_image_bytes(self.num_levels(), self.num_retained(), T::SERIALIZED_SIZE)
    }
}

impl<'a, 'b, T: KllItem> PartialEq<KllSketch<'b, T>> for KllSketch<'a, T> {
    /// Compares the logical state of two sketches regardless of storage
    /// variant. Level 0 is compared order-insensitively because compact
    /// images always carry it sorted.
    fn eq(&self, other: &KllSketch<'b, T>) -> bool {
        if self.k != other.k
            || self.m != other.m
            || self.n != other.n
            || self.min_k != other.min_k
            || self.num_levels() != other.num_levels()
            || self.min_item != other.min_item
            || self.max_item != other.max_item
        {
            return false;
        }
        for level in 0..self.num_levels() {
            let mut mine = self.load_level(level);
            let mut theirs = other.load_level(level);
            if level == 0 {
                mine.sort_by(T::cmp);
                theirs.sort_by(T::cmp);
            }
            if mine != theirs {
                return false;
            }
        }
        true
    }
}

impl<T: KllItem> fmt::Debug for KllSketch<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KllSketch")
            .field("k", &self.k)
            .field("m", &self.m)
            .field("n", &self.n)
            .field("min_k", &self.min_k)
            .field("num_levels", &self.num_levels())
            .field("num_retained", &self.num_retained())
            .field("min_item", &self.min_item)
            .field("max_item", &self.max_item)
            .finish_non_exhaustive()
    }
}

/// Keeps every other item of the even-length range, moving the kept half
/// to the upper end of the range. The starting parity is random.
fn randomly_halve_up<T: KllItem>(
    buf: &mut [T],
    start: usize,
    length: usize,
    random: &mut XorShift64,
) {
    debug_assert!(length % 2 == 0, "length must be even");
    let half_length = length / 2;
    let offset = random.next_bit() as usize;
    let mut j = start + length - 1 - offset;
    for i in (start + half_length..start + length).rev() {
        buf[i] = buf[j];
        j = j.saturating_sub(2);
    }
}

/// Keeps every other item of the even-length range, moving the kept half
/// to the lower end of the range. The starting parity is random.
fn randomly_halve_down<T: KllItem>(
    buf: &mut [T],
    start: usize,
    length: usize,
    random: &mut XorShift64,
) {
    debug_assert!(length % 2 == 0, "length must be even");
    let half_length = length / 2;
    let offset = random.next_bit() as usize;
    let mut j = start + offset;
    for i in start..start + half_length {
        buf[i] = buf[j];
        j += 2;
    }
}

/// Merges two sorted ranges of the same buffer into a destination range
/// of the same buffer. The destination must not overtake either source,
/// which holds for the compaction layout where it starts at or below the
/// second source.
fn merge_sorted_ranges<T: KllItem>(
    buf: &mut [T],
    a_start: usize,
    a_len: usize,
    b_start: usize,
    b_len: usize,
    dst_start: usize,
) {
    let mut i = 0;
    let mut j = 0;
    let mut dst = dst_start;
    while i < a_len && j < b_len {
        if T::cmp(&buf[a_start + i], &buf[b_start + j]) != Ordering::Greater {
            buf[dst] = buf[a_start + i];
            i += 1;
        } else {
            buf[dst] = buf[b_start + j];
            j += 1;
        }
        dst += 1;
    }
    while i < a_len {
        buf[dst] = buf[a_start + i];
        i += 1;
        dst += 1;
    }
    while j < b_len {
        buf[dst] = buf[b_start + j];
        j += 1;
        dst += 1;
    }
}

/// Merges two sorted slices into the destination slice.
fn merge_into<T: KllItem>(dst: &mut [T], a: &[T], b: &[T]) {
    debug_assert_eq!(dst.len(), a.len() + b.len());
    let mut i = 0;
    let mut j = 0;
    for slot in dst.iter_mut() {
        if i < a.len() && (j >= b.len() || T::cmp(&a[i], &b[j]) != Ordering::Greater) {
            *slot = a[i];
            i += 1;
        } else {
            *slot = b[j];
            j += 1;
        }
    }
}

/// Compacts a work buffer of levels until every level fits its capacity,
/// appending levels as needed. Input and output share the buffer; data
/// only ever moves downward. Returns the final number of levels, the
/// target capacity, and the retained item count.
#[allow(clippy::too_many_arguments)]
fn general_compress<T: KllItem>(
    k: u16,
    m: u8,
    num_levels_in: usize,
    buf: &mut [T],
    in_levels: &mut [usize],
    out_levels: &mut [usize],
    is_level_zero_sorted: bool,
    random: &mut XorShift64,
) -> (usize, usize, usize) {
    debug_assert!(num_levels_in > 0);
    let mut num_levels = num_levels_in;
    let mut current_item_count = in_levels[num_levels] - in_levels[0];
    let mut target_item_count = compute_total_capacity(k, m, num_levels) as usize;
    out_levels[0] = 0;

    let mut cur_level = 0usize;
    loop {
        // add an empty level above the top for uniform indexing
        if cur_level == num_levels - 1 {
            in_levels[cur_level + 2] = in_levels[cur_level + 1];
        }
        let raw_beg = in_levels[cur_level];
        let raw_lim = in_levels[cur_level + 1];
        let raw_pop = raw_lim - raw_beg;

        if current_item_count < target_item_count
            || raw_pop < level_capacity(k, num_levels, cur_level, m) as usize
        {
            // copy the level through unchanged
            debug_assert!(out_levels[cur_level] <= raw_beg);
            buf.copy_within(raw_beg..raw_lim, out_levels[cur_level]);
            out_levels[cur_level + 1] = out_levels[cur_level] + raw_pop;
        } else {
            // the sketch is too full and so is this level: compact it
            let pop_above = in_levels[cur_level + 2] - raw_lim;
            let odd_pop = raw_pop % 2 == 1;
            let adj_beg = raw_beg + usize::from(odd_pop);
            let adj_pop = raw_pop - usize::from(odd_pop);
            let half_adj_pop = adj_pop / 2;

            if odd_pop {
                buf[out_levels[cur_level]] = buf[raw_beg];
                out_levels[cur_level + 1] = out_levels[cur_level] + 1;
            } else {
                out_levels[cur_level + 1] = out_levels[cur_level];
            }
            if cur_level == 0 && !is_level_zero_sorted {
                buf[adj_beg..adj_beg + adj_pop].sort_by(T::cmp);
            }
            if pop_above == 0 {
                randomly_halve_up(buf, adj_beg, adj_pop, random);
            } else {
                randomly_halve_down(buf, adj_beg, adj_pop, random);
                merge_sorted_ranges(
                    buf,
                    adj_beg,
                    half_adj_pop,
                    raw_lim,
                    pop_above,
                    adj_beg + half_adj_pop,
                );
            }
            current_item_count -= half_adj_pop;
            in_levels[cur_level + 1] = adj_beg + half_adj_pop;

            // compacting the top level creates a new one above it
            if cur_level == num_levels - 1 {
                num_levels += 1;
                target_item_count += level_capacity(k, num_levels, 0, m) as usize;
            }
        }

        if cur_level == num_levels - 1 {
            break;
        }
        cur_level += 1;
    }

    debug_assert_eq!(out_levels[num_levels] - out_levels[0], current_item_count);
    (num_levels, target_item_count, current_item_count)
}

/// Writes a complete updatable image into the region: full preamble,
/// absolute level offsets, min, max, and the full items capacity.
#[allow(clippy::too_many_arguments)]
fn write_updatable_image<T: KllItem>(
    region: &mut [u8],
    k: u16,
    m: u8,
    n: u64,
    min_k: u16,
    is_level_zero_sorted: bool,
    levels: &[usize],
    min_item: T,
    max_item: T,
    items: &[T],
) {
    let num_levels = levels.len() - 1;
    let mut flags = FLAG_UPDATABLE;
    if T::IS_DOUBLE {
        flags |= FLAG_DOUBLES_SKETCH;
    }
    if is_level_zero_sorted {
        flags |= FLAG_LEVEL_ZERO_SORTED;
    }
    let pre = Preamble {
        preamble_ints: PREAMBLE_INTS_FULL,
        ser_ver: SERIAL_VERSION_UPDATABLE,
        flags,
        k,
        m,
        n,
        min_k,
        num_levels,
    };
    pre.write(region);
    for (i, &offset) in levels.iter().enumerate() {
        let at = DATA_START + i * 4;
        LE::write_u32(&mut region[at..at + 4], offset as u32);
    }
    let at = min_item_offset(num_levels);
    T::put_le(&mut region[at..], min_item);
    T::put_le(&mut region[at + T::SERIALIZED_SIZE..], max_item);
    let items_start = updatable_items_start(num_levels, T::SERIALIZED_SIZE);
    for (i, &item) in items.iter().enumerate() {
        T::put_le(&mut region[items_start + i * T::SERIALIZED_SIZE..], item);
    }
}

impl KllItem for f32 {
    const SERIALIZED_SIZE: usize = 4;
    const ZERO: Self = 0.0;
    const IS_DOUBLE: bool = false;

    fn cmp(a: &Self, b: &Self) -> Ordering {
        a.partial_cmp(b).unwrap_or(Ordering::Greater)
    }

    fn is_nan(value: &Self) -> bool {
        value.is_nan()
    }

    fn get_le(buf: &[u8]) -> Self {
        LE::read_f32(buf)
    }

    fn put_le(buf: &mut [u8], value: Self) {
        LE::write_f32(buf, value);
    }

    fn write_le(value: Self, out: &mut SketchBytes) {
        out.write_f32_le(value);
    }

    fn read_le(input: &mut SketchSlice<'_>) -> Result<Self, Error> {
        input
            .read_f32_le()
            .map_err(|_| Error::insufficient_data("f32"))
    }
}

impl KllItem for f64 {
    const SERIALIZED_SIZE: usize = 8;
    const ZERO: Self = 0.0;
    const IS_DOUBLE: bool = true;

    fn cmp(a: &Self, b: &Self) -> Ordering {
        a.partial_cmp(b).unwrap_or(Ordering::Greater)
    }

    fn is_nan(value: &Self) -> bool {
        value.is_nan()
    }

    fn get_le(buf: &[u8]) -> Self {
        LE::read_f64(buf)
    }

    fn put_le(buf: &mut [u8], value: Self) {
        LE::write_f64(buf, value);
    }

    fn write_le(value: Self, out: &mut SketchBytes) {
        out.write_f64_le(value);
    }

    fn read_le(input: &mut SketchSlice<'_>) -> Result<Self, Error> {
        input
            .read_f64_le()
            .map_err(|_| Error::insufficient_data("f64"))
    }
}
