//! Bimodal direction predictor: a table of saturating two-bit counters.

use crate::common::addr::Address;
use crate::common::BranchType;

use super::BranchPredictor;

const TABLE_SIZE: usize = 16384;
const MAX_COUNTER: u8 = 3;

/// Two-bit-counter predictor indexed by the low bits of the IP.
pub struct BimodalPredictor {
    table: Vec<u8>,
}

impl BimodalPredictor {
    /// Creates a predictor with all counters weakly not-taken.
    pub fn new() -> Self {
        Self {
            table: vec![1; TABLE_SIZE],
        }
    }

    fn index(ip: Address) -> usize {
        (ip.value() as usize) % TABLE_SIZE
    }
}

impl Default for BimodalPredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchPredictor for BimodalPredictor {
    fn predict(&mut self, ip: Address) -> bool {
        self.table[Self::index(ip)] > MAX_COUNTER / 2
    }

    fn last_branch_result(&mut self, ip: Address, _target: Address, taken: bool, _ty: BranchType) {
        let counter = &mut self.table[Self::index(ip)];
        if taken {
            *counter = (*counter + 1).min(MAX_COUNTER);
        } else {
            *counter = counter.saturating_sub(1);
        }
    }
}
