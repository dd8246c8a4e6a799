//! Load and store queue entries.
//!
//! Load-queue slots are sparse: the queue is a vector of optional slots and a
//! load occupies the first empty one from allocation until its data returns
//! (or a store forwards to it). Store-queue entries are always valid from
//! allocation until the store's write is accepted below, which happens only
//! after the store leaves the ROB.

use crate::common::addr::Address;

/// One load- or store-queue entry.
#[derive(Clone, Debug)]
pub struct LsqEntry {
    /// Owning instruction.
    pub instr_id: u64,
    /// Accessed virtual address.
    pub virtual_address: Address,
    /// Program counter of the owning instruction.
    pub ip: Address,
    /// Address-space identifier pair.
    pub asid: [u8; 2],
    /// Earliest cycle this entry may issue.
    pub event_cycle: u64,
    /// Loads: the data-cache read has been issued.
    /// Stores: the store has finished (its value is available to forward).
    pub fetch_issued: bool,
    /// Loads only: the older store this load waits to forward from.
    pub producer_id: Option<u64>,
    /// Stores only: load-queue slots waiting on this store's value.
    pub lq_depend_on_me: Vec<usize>,
}

impl LsqEntry {
    /// Creates an entry for one memory operation.
    pub fn new(instr_id: u64, virtual_address: Address, ip: Address, asid: [u8; 2]) -> Self {
        Self {
            instr_id,
            virtual_address,
            ip,
            asid,
            event_cycle: 0,
            fetch_issued: false,
            producer_id: None,
            lq_depend_on_me: Vec::new(),
        }
    }
}
