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

//! Fixed-layout preamble of the KLL byte format.
//!
//! Every byte image starts with this header, little-endian:
//!
//! | offset | bytes | field |
//! |--------|-------|-------|
//! | 0      | 1     | preamble_ints (2 short, 5 full) |
//! | 1      | 1     | ser_ver (1 single-item, 2 compact, 3 updatable) |
//! | 2      | 1     | family (15) |
//! | 3      | 1     | flags |
//! | 4      | 2     | k |
//! | 6      | 1     | m |
//! | 7      | 1     | reserved |
//! | 8      | 8     | n (full preamble only) |
//! | 16     | 2     | min_k (full preamble only) |
//! | 18     | 2     | num_levels (full preamble only) |
//!
//! Data follows at byte 8 (short) or byte 20 (full). All operations here
//! work directly on a borrowed byte region and never allocate.

use byteorder::ByteOrder;
use byteorder::LE;

use super::MAX_K;
use super::VALID_M;
use crate::error::Error;

pub(crate) const KLL_FAMILY_ID: u8 = 15;

pub(crate) const SERIAL_VERSION_SINGLE: u8 = 1;
pub(crate) const SERIAL_VERSION_COMPACT: u8 = 2;
pub(crate) const SERIAL_VERSION_UPDATABLE: u8 = 3;

pub(crate) const PREAMBLE_INTS_SHORT: u8 = 2;
pub(crate) const PREAMBLE_INTS_FULL: u8 = 5;

pub(crate) const FLAG_EMPTY: u8 = 1 << 0;
pub(crate) const FLAG_LEVEL_ZERO_SORTED: u8 = 1 << 1;
pub(crate) const FLAG_SINGLE_ITEM: u8 = 1 << 2;
pub(crate) const FLAG_DOUBLES_SKETCH: u8 = 1 << 3;
pub(crate) const FLAG_UPDATABLE: u8 = 1 << 4;

/// Data offset for empty and single-item images.
pub(crate) const DATA_START_SHORT: usize = 8;
/// Data offset for full-preamble images.
pub(crate) const DATA_START: usize = 20;

const PREAMBLE_INTS_BYTE: usize = 0;
const SER_VER_BYTE: usize = 1;
const FAMILY_BYTE: usize = 2;
const FLAGS_BYTE: usize = 3;
const K_SHORT: usize = 4;
const M_BYTE: usize = 6;
const N_LONG: usize = 8;
const MIN_K_SHORT: usize = 16;
const NUM_LEVELS_SHORT: usize = 18;

// Shifts past 61 would overflow the u64 weight of a level.
const MAX_NUM_LEVELS: usize = 61;

/// Decoded preamble fields of a byte image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Preamble {
    pub preamble_ints: u8,
    pub ser_ver: u8,
    pub flags: u8,
    pub k: u16,
    pub m: u8,
    pub n: u64,
    pub min_k: u16,
    pub num_levels: usize,
}

impl Preamble {
    /// Reads and validates the preamble of a byte image.
    pub fn read(region: &[u8]) -> Result<Self, Error> {
        if region.len() < DATA_START_SHORT {
            return Err(Error::insufficient_data("preamble"));
        }
        let preamble_ints = region[PREAMBLE_INTS_BYTE];
        let ser_ver = region[SER_VER_BYTE];
        let family = region[FAMILY_BYTE];
        let flags = region[FLAGS_BYTE];
        let k = LE::read_u16(&region[K_SHORT..K_SHORT + 2]);
        let m = region[M_BYTE];

        if family != KLL_FAMILY_ID {
            return Err(Error::corrupt_image("unknown sketch family")
                .with_context("expected", KLL_FAMILY_ID)
                .with_context("actual", family));
        }
        if !(SERIAL_VERSION_SINGLE..=SERIAL_VERSION_UPDATABLE).contains(&ser_ver) {
            return Err(
                Error::corrupt_image("unknown serial version").with_context("ser_ver", ser_ver)
            );
        }
        if !VALID_M.contains(&m) {
            return Err(Error::corrupt_image("m must be one of 2, 4, 6, 8")
                .with_context("m", m));
        }
        if !(m as u16..=MAX_K).contains(&k) {
            return Err(Error::corrupt_image("k out of range")
                .with_context("k", k)
                .with_context("m", m));
        }

        let is_empty = flags & FLAG_EMPTY != 0;
        let is_single = flags & FLAG_SINGLE_ITEM != 0;
        let is_updatable = flags & FLAG_UPDATABLE != 0;
        if is_empty && is_single {
            return Err(Error::corrupt_image(
                "empty and single-item flags are mutually exclusive",
            ));
        }
        if is_single != (ser_ver == SERIAL_VERSION_SINGLE) {
            return Err(Error::corrupt_image(
                "single-item flag does not match serial version",
            ));
        }
        if is_updatable != (ser_ver == SERIAL_VERSION_UPDATABLE) {
            return Err(Error::corrupt_image(
                "updatable flag does not match serial version",
            ));
        }

        let expected_ints = if is_empty || is_single {
            PREAMBLE_INTS_SHORT
        } else {
            PREAMBLE_INTS_FULL
        };
        if preamble_ints != expected_ints {
            return Err(Error::corrupt_image("invalid preamble ints")
                .with_context("expected", expected_ints)
                .with_context("actual", preamble_ints));
        }

        let (n, min_k, num_levels) = if is_empty {
            (0u64, k, 1usize)
        } else if is_single {
            (1u64, k, 1usize)
        } else {
            if region.len() < DATA_START {
                return Err(Error::insufficient_data("full preamble"));
            }
            let n = LE::read_u64(&region[N_LONG..N_LONG + 8]);
            let min_k = LE::read_u16(&region[MIN_K_SHORT..MIN_K_SHORT + 2]);
            let num_levels = LE::read_u16(&region[NUM_LEVELS_SHORT..NUM_LEVELS_SHORT + 2]) as usize;
            if min_k < m as u16 || min_k > k {
                return Err(Error::corrupt_image("min_k out of range")
                    .with_context("min_k", min_k)
                    .with_context("k", k));
            }
            if num_levels == 0 || num_levels > MAX_NUM_LEVELS {
                return Err(Error::corrupt_image("num_levels out of range")
                    .with_context("num_levels", num_levels));
            }
            (n, min_k, num_levels)
        };

        Ok(Self {
            preamble_ints,
            ser_ver,
            flags,
            k,
            m,
            n,
            min_k,
            num_levels,
        })
    }

    /// Writes this preamble at the start of a region. The region must hold
    /// at least [`Self::data_start`] bytes.
    pub fn write(&self, region: &mut [u8]) {
        region[PREAMBLE_INTS_BYTE] = self.preamble_ints;
        region[SER_VER_BYTE] = self.ser_ver;
        region[FAMILY_BYTE] = KLL_FAMILY_ID;
        region[FLAGS_BYTE] = self.flags;
        LE::write_u16(&mut region[K_SHORT..K_SHORT + 2], self.k);
        region[M_BYTE] = self.m;
        region[M_BYTE + 1] = 0;
        if self.preamble_ints == PREAMBLE_INTS_FULL {
            LE::write_u64(&mut region[N_LONG..N_LONG + 8], self.n);
            LE::write_u16(&mut region[MIN_K_SHORT..MIN_K_SHORT + 2], self.min_k);
            LE::write_u16(
                &mut region[NUM_LEVELS_SHORT..NUM_LEVELS_SHORT + 2],
                self.num_levels as u16,
            );
        }
    }

    pub fn is_empty(&self) -> bool {
        self.flags & FLAG_EMPTY != 0
    }

    pub fn is_single_item(&self) -> bool {
        self.flags & FLAG_SINGLE_ITEM != 0
    }

    pub fn is_level_zero_sorted(&self) -> bool {
        self.flags & FLAG_LEVEL_ZERO_SORTED != 0
    }

    pub fn is_doubles(&self) -> bool {
        self.flags & FLAG_DOUBLES_SKETCH != 0
    }

    pub fn is_updatable(&self) -> bool {
        self.flags & FLAG_UPDATABLE != 0
    }

    pub fn data_start(&self) -> usize {
        if self.preamble_ints == PREAMBLE_INTS_SHORT {
            DATA_START_SHORT
        } else {
            DATA_START
        }
    }
}

/// Write-through setter for n on an updatable region.
pub(crate) fn set_n(region: &mut [u8], n: u64) {
    LE::write_u64(&mut region[N_LONG..N_LONG + 8], n);
}

/// Write-through setter for min_k on an updatable region.
pub(crate) fn set_min_k(region: &mut [u8], min_k: u16) {
    LE::write_u16(&mut region[MIN_K_SHORT..MIN_K_SHORT + 2], min_k);
}

/// Write-through setter for num_levels on an updatable region.
pub(crate) fn set_num_levels(region: &mut [u8], num_levels: usize) {
    LE::write_u16(
        &mut region[NUM_LEVELS_SHORT..NUM_LEVELS_SHORT + 2],
        num_levels as u16,
    );
}

/// Write-through setter for the level-zero-sorted flag bit.
pub(crate) fn set_level_zero_sorted(region: &mut [u8], sorted: bool) {
    if sorted {
        region[FLAGS_BYTE] |= FLAG_LEVEL_ZERO_SORTED;
    } else {
        region[FLAGS_BYTE] &= !FLAG_LEVEL_ZERO_SORTED;
    }
}
