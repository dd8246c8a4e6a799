//! Static re-reference interval prediction (SRRIP) replacement.
//!
//! Each block carries a re-reference prediction value (RRPV). Hits promote a
//! block to near-immediate re-reference; fills insert at long re-reference;
//! victim selection takes the first block at the distant-future value, aging
//! the whole set until one appears.

use crate::common::addr::Address;
use crate::common::AccessType;
use crate::mem::cache::Block;

use super::Replacer;

const MAX_RRPV: u8 = 3;

/// SRRIP replacement state.
pub struct SrripReplacer {
    rrpv: Vec<u8>,
    ways: usize,
}

impl SrripReplacer {
    /// Creates state for a cache of `sets × ways`.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            rrpv: vec![MAX_RRPV; sets * ways],
            ways,
        }
    }
}

impl Replacer for SrripReplacer {
    fn find_victim(
        &mut self,
        _cpu: u32,
        _instr_id: u64,
        set: usize,
        _current_set: &[Block],
        _ip: Address,
        _full_addr: Address,
        _ty: AccessType,
    ) -> usize {
        let begin = set * self.ways;
        loop {
            let span = &mut self.rrpv[begin..begin + self.ways];
            if let Some(way) = span.iter().position(|&v| v == MAX_RRPV) {
                return way;
            }
            for value in span {
                *value += 1;
            }
        }
    }

    fn update(
        &mut self,
        _cpu: u32,
        set: usize,
        way: usize,
        _full_addr: Address,
        _ip: Address,
        _victim_addr: Address,
        ty: AccessType,
        hit: bool,
    ) {
        let idx = set * self.ways + way;
        if hit {
            if ty != AccessType::Write {
                self.rrpv[idx] = 0;
            }
        } else {
            self.rrpv[idx] = MAX_RRPV - 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_set_victimizes_way_zero() {
        let mut replacer = SrripReplacer::new(1, 4);
        let victim = replacer.find_victim(
            0,
            0,
            0,
            &[],
            Address::new(0),
            Address::new(0),
            AccessType::Load,
        );
        assert_eq!(victim, 0);
    }

    #[test]
    fn test_hit_protects_block() {
        let mut replacer = SrripReplacer::new(1, 2);
        // Fill both ways, then hit way 0.
        for way in 0..2 {
            replacer.update(
                0,
                0,
                way,
                Address::new(0),
                Address::new(0),
                Address::new(0),
                AccessType::Load,
                false,
            );
        }
        replacer.update(
            0,
            0,
            0,
            Address::new(0),
            Address::new(0),
            Address::new(0),
            AccessType::Load,
            true,
        );
        let victim = replacer.find_victim(
            0,
            0,
            0,
            &[],
            Address::new(0),
            Address::new(0),
            AccessType::Load,
        );
        assert_eq!(victim, 1);
    }
}
