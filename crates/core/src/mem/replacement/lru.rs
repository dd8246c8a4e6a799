//! Least-recently-used replacement.

use crate::common::addr::Address;
use crate::common::AccessType;
use crate::mem::cache::Block;

use super::Replacer;

/// LRU replacement: victimize the way with the most distant last use.
pub struct LruReplacer {
    last_used_cycles: Vec<u64>,
    ways: usize,
    cycle: u64,
}

impl LruReplacer {
    /// Creates state for a cache of `sets × ways`.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            last_used_cycles: vec![0; sets * ways],
            ways,
            cycle: 0,
        }
    }
}

impl Replacer for LruReplacer {
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
        let span = &self.last_used_cycles[begin..begin + self.ways];
        span.iter()
            .enumerate()
            .min_by_key(|(_, &used)| used)
            .map(|(way, _)| way)
            .unwrap()
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
        // Skip writeback hits so they do not refresh recency.
        if !hit || ty != AccessType::Write {
            self.last_used_cycles[set * self.ways + way] = self.cycle;
            self.cycle += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(replacer: &mut LruReplacer, set: usize, way: usize) {
        replacer.update(
            0,
            set,
            way,
            Address::new(0),
            Address::new(0),
            Address::new(0),
            AccessType::Load,
            true,
        );
    }

    #[test]
    fn test_least_recent_way_is_victim() {
        let mut replacer = LruReplacer::new(1, 4);
        for way in 0..4 {
            touch(&mut replacer, 0, way);
        }
        touch(&mut replacer, 0, 0);
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

    #[test]
    fn test_writeback_hit_does_not_refresh() {
        let mut replacer = LruReplacer::new(1, 2);
        touch(&mut replacer, 0, 0);
        touch(&mut replacer, 0, 1);
        replacer.update(
            0,
            0,
            0,
            Address::new(0),
            Address::new(0),
            Address::new(0),
            AccessType::Write,
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
        assert_eq!(victim, 0);
    }
}
