//! Next-line prefetcher: on every observed access, request the block after it.

use crate::common::addr::Address;
use crate::common::{AccessType, BLOCK_SIZE};

use super::{PrefetchLine, Prefetcher};

/// Stateless sequential prefetcher.
#[derive(Default)]
pub struct NextLinePrefetcher;

impl NextLinePrefetcher {
    /// Creates a next-line prefetcher.
    pub fn new() -> Self {
        Self
    }
}

impl Prefetcher for NextLinePrefetcher {
    fn cache_operate(
        &mut self,
        addr: Address,
        _ip: Address,
        _hit: bool,
        _useful_prefetch: bool,
        _ty: AccessType,
        metadata_in: u32,
        issue: &mut Vec<PrefetchLine>,
    ) -> u32 {
        issue.push(PrefetchLine {
            address: addr + BLOCK_SIZE as i64,
            fill_this_level: true,
            metadata: metadata_in,
        });
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_following_block() {
        let mut pf = NextLinePrefetcher::new();
        let mut issue = Vec::new();
        pf.cache_operate(
            Address::new(0x1000),
            Address::new(0xcafe),
            false,
            false,
            AccessType::Load,
            0,
            &mut issue,
        );
        assert_eq!(issue.len(), 1);
        assert_eq!(issue[0].address.value(), 0x1040);
        assert!(issue[0].fill_this_level);
    }
}
