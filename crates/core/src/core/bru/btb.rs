//! Basic branch target buffer.
//!
//! Three structures cooperate, split by branch kind:
//! 1. A direct-target table for branches whose target never changes.
//! 2. An indirect-target table indexed by the IP hashed with recent
//!    conditional history, for register branches.
//! 3. A return address stack whose entries are call IPs; predicted return
//!    targets add a per-call instruction size learned from observed returns.

use crate::common::addr::Address;
use crate::common::BranchType;
use crate::mem::lru_table::LruTable;

use super::Btb;

const BTB_SETS: usize = 1024;
const BTB_WAYS: usize = 8;
const INDIRECT_TABLE_SIZE: usize = 4096;
const RAS_SIZE: usize = 64;
const CALL_SIZE_TRACKERS: usize = 1024;
const DEFAULT_CALL_SIZE: u64 = 4;

#[derive(Clone, Copy, Debug)]
struct DirectEntry {
    ip: u64,
    target: u64,
    always_taken: bool,
}

type DirectTable = LruTable<
    DirectEntry,
    Box<dyn Fn(&DirectEntry) -> u64>,
    Box<dyn Fn(&DirectEntry) -> u64>,
>;

/// Direct table + indirect predictor + return stack.
pub struct BasicBtb {
    direct: DirectTable,
    indirect: Vec<u64>,
    conditional_history: u64,
    ras: Vec<u64>,
    call_size: Vec<u64>,
}

impl BasicBtb {
    /// Creates an empty BTB.
    pub fn new() -> Self {
        let set_proj: Box<dyn Fn(&DirectEntry) -> u64> = Box::new(|e: &DirectEntry| e.ip);
        let tag_proj: Box<dyn Fn(&DirectEntry) -> u64> = Box::new(|e: &DirectEntry| e.ip);
        Self {
            direct: LruTable::new(BTB_SETS, BTB_WAYS, set_proj, tag_proj),
            indirect: vec![0; INDIRECT_TABLE_SIZE],
            conditional_history: 0,
            ras: Vec::new(),
            call_size: vec![DEFAULT_CALL_SIZE; CALL_SIZE_TRACKERS],
        }
    }

    fn probe(&self, ip: Address) -> DirectEntry {
        DirectEntry {
            ip: ip.value(),
            target: 0,
            always_taken: false,
        }
    }

    fn indirect_index(&self, ip: Address) -> usize {
        ((ip.value() ^ self.conditional_history) as usize) % INDIRECT_TABLE_SIZE
    }
}

impl Default for BasicBtb {
    fn default() -> Self {
        Self::new()
    }
}

impl Btb for BasicBtb {
    fn predict(&mut self, ip: Address) -> (Address, bool) {
        if let Some(entry) = self.direct.check_hit(&self.probe(ip)) {
            // A known return is recorded as an always-taken entry whose
            // target is zero; the stack supplies the real target.
            if entry.always_taken && entry.target == 0 {
                if let Some(&call_ip) = self.ras.last() {
                    let size = self.call_size[(call_ip as usize) % CALL_SIZE_TRACKERS];
                    return (Address::new(call_ip + size), true);
                }
                return (Address::new(0), false);
            }
            return (Address::new(entry.target), entry.always_taken);
        }

        let target = self.indirect[self.indirect_index(ip)];
        (Address::new(target), false)
    }

    fn update(&mut self, ip: Address, target: Address, taken: bool, ty: BranchType) {
        match ty {
            BranchType::DirectCall | BranchType::IndirectCall => {
                if self.ras.len() >= RAS_SIZE {
                    self.ras.remove(0);
                }
                self.ras.push(ip.value());
            }
            BranchType::Return => {
                if let Some(call_ip) = self.ras.pop() {
                    if target.value() > call_ip {
                        let size = target.value() - call_ip;
                        if size <= 16 {
                            self.call_size[(call_ip as usize) % CALL_SIZE_TRACKERS] = size;
                        }
                    }
                }
                // Remember that this IP is a return (target zero sentinel).
                self.direct.fill(DirectEntry {
                    ip: ip.value(),
                    target: 0,
                    always_taken: true,
                });
                return;
            }
            _ => {}
        }

        if ty == BranchType::Indirect || ty == BranchType::IndirectCall {
            let slot = self.indirect_index(ip);
            self.indirect[slot] = target.value();
        }

        if ty == BranchType::Conditional {
            self.conditional_history = (self.conditional_history << 1) | u64::from(taken);
        }

        if taken && target.value() != 0 {
            let known = self.direct.check_hit(&self.probe(ip));
            let always_taken = match known {
                Some(entry) => entry.always_taken && entry.target == target.value(),
                None => ty != BranchType::Conditional,
            };
            self.direct.fill(DirectEntry {
                ip: ip.value(),
                target: target.value(),
                always_taken,
            });
        } else if !taken {
            if let Some(entry) = self.direct.check_hit(&self.probe(ip)) {
                self.direct.fill(DirectEntry {
                    always_taken: false,
                    ..entry
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learns_direct_target() {
        let mut btb = BasicBtb::new();
        let ip = Address::new(0x1000);
        let target = Address::new(0x4000);
        btb.update(ip, target, true, BranchType::DirectJump);
        let (predicted, taken) = btb.predict(ip);
        assert_eq!(predicted, target);
        assert!(taken);
    }

    #[test]
    fn test_unknown_branch_predicts_not_taken() {
        let mut btb = BasicBtb::new();
        let (target, taken) = btb.predict(Address::new(0x2000));
        assert_eq!(target.value(), 0);
        assert!(!taken);
    }

    #[test]
    fn test_return_stack_calibrates_call_size() {
        let mut btb = BasicBtb::new();
        let call_ip = Address::new(0x1000);
        let return_ip = Address::new(0x8000);
        let return_target = Address::new(0x1005); // five-byte call

        // First round teaches the call size and the return IP.
        btb.update(call_ip, Address::new(0x8000), true, BranchType::DirectCall);
        btb.update(return_ip, return_target, true, BranchType::Return);

        // Second round predicts the calibrated fall-through.
        btb.update(call_ip, Address::new(0x8000), true, BranchType::DirectCall);
        let (predicted, taken) = btb.predict(return_ip);
        assert!(taken);
        assert_eq!(predicted, return_target);
    }

    #[test]
    fn test_conditional_not_taken_clears_always_taken() {
        let mut btb = BasicBtb::new();
        let ip = Address::new(0x3000);
        btb.update(ip, Address::new(0x5000), true, BranchType::Conditional);
        btb.update(ip, Address::new(0x5000), false, BranchType::Conditional);
        let (_, taken) = btb.predict(ip);
        assert!(!taken);
    }
}
