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

//! Backing storage for the items array.
//!
//! Three variants share one capability set: an owned heap buffer, an owned
//! updatable byte region written through in place, and a borrowed compact
//! byte image read in place. Indices are positions in the items array; the
//! on-disk layout is packed little-endian with no padding.

use byteorder::ByteOrder;
use byteorder::LE;

use super::preamble::DATA_START;
use super::sketch::KllItem;
use crate::error::Error;
use crate::memory::MemoryProvider;

/// Owned updatable byte region in the serial-version-3 layout.
pub(crate) struct DirectRegion {
    pub region: Vec<u8>,
    pub provider: Option<Box<dyn MemoryProvider>>,
    /// Byte offset of the items array; moves when the levels array grows.
    pub items_start: usize,
}

/// Borrowed compact byte image, read in place.
pub(crate) struct CompactRegion<'a> {
    pub region: &'a [u8],
    pub items_start: usize,
}

pub(crate) enum Items<'a, T: KllItem> {
    Heap(Vec<T>),
    Updatable(DirectRegion),
    Compact(CompactRegion<'a>),
}

impl<T: KllItem> Items<'_, T> {
    pub fn is_read_only(&self) -> bool {
        matches!(self, Items::Compact(_))
    }

    pub fn has_region(&self) -> bool {
        !matches!(self, Items::Heap(_))
    }

    pub fn read(&self, index: usize) -> T {
        match self {
            Items::Heap(buf) => buf[index],
            Items::Updatable(direct) => {
                T::get_le(&direct.region[direct.items_start + index * T::SERIALIZED_SIZE..])
            }
            Items::Compact(compact) => {
                T::get_le(&compact.region[compact.items_start + index * T::SERIALIZED_SIZE..])
            }
        }
    }

    pub fn write(&mut self, index: usize, item: T) -> Result<(), Error> {
        match self {
            Items::Heap(buf) => {
                buf[index] = item;
                Ok(())
            }
            Items::Updatable(direct) => {
                let offset = direct.items_start + index * T::SERIALIZED_SIZE;
                T::put_le(&mut direct.region[offset..], item);
                Ok(())
            }
            Items::Compact(_) => Err(Error::read_only("items region is read-only")),
        }
    }

    pub fn load(&self, start: usize, len: usize) -> Vec<T> {
        match self {
            Items::Heap(buf) => buf[start..start + len].to_vec(),
            _ => (start..start + len).map(|i| self.read(i)).collect(),
        }
    }
}

impl DirectRegion {
    /// Writes the absolute level offsets at the start of the data section.
    pub fn write_levels(&mut self, levels: &[usize]) {
        for (i, &offset) in levels.iter().enumerate() {
            self.set_level_at(i, offset);
        }
    }

    pub fn set_level_at(&mut self, index: usize, value: usize) {
        let at = DATA_START + index * 4;
        LE::write_u32(&mut self.region[at..at + 4], value as u32);
    }

    /// Writes min and max just past the levels array.
    pub fn set_min_max<T: KllItem>(&mut self, num_levels: usize, min: T, max: T) {
        let at = min_item_offset(num_levels);
        T::put_le(&mut self.region[at..], min);
        T::put_le(&mut self.region[at + T::SERIALIZED_SIZE..], max);
    }
}

/// Byte offset of the min item in an updatable image.
pub(crate) fn min_item_offset(num_levels: usize) -> usize {
    DATA_START + (num_levels + 1) * 4
}

/// Byte offset of the items array in an updatable image.
pub(crate) fn updatable_items_start(num_levels: usize, item_bytes: usize) -> usize {
    DATA_START + (num_levels + 1) * 4 + 2 * item_bytes
}

/// Total size of an updatable image with the given capacity.
pub(crate) fn updatable_image_bytes(num_levels: usize, capacity: usize, item_bytes: usize) -> usize {
    updatable_items_start(num_levels, item_bytes) + capacity * item_bytes
}

/// Byte offset of the items array in a full compact image.
pub(crate) fn compact_items_start(num_levels: usize, item_bytes: usize) -> usize {
    DATA_START + num_levels * 4 + 2 * item_bytes
}

/// Total size of a full compact image with the given retained count.
pub(crate) fn compact_image_bytes(
    num_levels: usize,
    num_retained: usize,
    item_bytes: usize,
) -> usize {
    compact_items_start(num_levels, item_bytes) + num_retained * item_bytes
}
