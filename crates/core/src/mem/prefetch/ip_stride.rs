//! IP-stride prefetcher.
//!
//! Tracks the last block touched by each instruction pointer. Once the same
//! IP produces the same block stride twice in a row, the prefetcher runs
//! ahead of it by `DEGREE` strides.

use crate::common::addr::Address;
use crate::common::{AccessType, LOG2_BLOCK_SIZE};

use super::{PrefetchLine, Prefetcher};

/// Number of strides to run ahead of a confirmed stream.
const DEGREE: i64 = 3;

/// Number of trackers (direct-mapped by IP).
const TABLE_SIZE: usize = 256;

#[derive(Clone, Copy, Default)]
struct Tracker {
    ip: u64,
    last_cline: i64,
    last_stride: i64,
    valid: bool,
}

/// Per-IP stride detector.
pub struct IpStridePrefetcher {
    table: Vec<Tracker>,
}

impl IpStridePrefetcher {
    /// Creates an empty tracker table.
    pub fn new() -> Self {
        Self {
            table: vec![Tracker::default(); TABLE_SIZE],
        }
    }
}

impl Default for IpStridePrefetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Prefetcher for IpStridePrefetcher {
    fn cache_operate(
        &mut self,
        addr: Address,
        ip: Address,
        _hit: bool,
        _useful_prefetch: bool,
        _ty: AccessType,
        metadata_in: u32,
        issue: &mut Vec<PrefetchLine>,
    ) -> u32 {
        let cline = (addr.value() >> LOG2_BLOCK_SIZE) as i64;
        let slot = (ip.value() as usize) % TABLE_SIZE;
        let tracker = &mut self.table[slot];

        if !tracker.valid || tracker.ip != ip.value() {
            *tracker = Tracker {
                ip: ip.value(),
                last_cline: cline,
                last_stride: 0,
                valid: true,
            };
            return metadata_in;
        }

        let stride = cline - tracker.last_cline;
        if stride != 0 && stride == tracker.last_stride {
            for k in 1..=DEGREE {
                let target = cline + stride * k;
                issue.push(PrefetchLine {
                    address: Address::new((target as u64) << LOG2_BLOCK_SIZE),
                    fill_this_level: true,
                    metadata: metadata_in,
                });
            }
        }
        tracker.last_stride = stride;
        tracker.last_cline = cline;

        metadata_in
    }

    fn cache_fill(
        &mut self,
        _addr: Address,
        _set: usize,
        _way: usize,
        _prefetch: bool,
        _evicted: Address,
        metadata_in: u32,
    ) -> u32 {
        metadata_in
    }
}
