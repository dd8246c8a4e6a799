//! Typed request/response channels between hierarchy components.
//!
//! A channel is the only data path between a producer (CPU, upper cache, PTW)
//! and a memory-side consumer. It carries four queues:
//! 1. **RQ:** demand and translation reads.
//! 2. **PQ:** prefetch reads.
//! 3. **WQ:** writes and writebacks.
//! 4. **returned:** responses travelling back to the producer.
//!
//! Producers call `add_rq`/`add_pq`/`add_wq`, which return `false` when the
//! queue is full (back-pressure; the producer retries next tick). The consumer
//! runs `check_collision` once per tick, which coalesces newly arrived
//! requests against queue-resident ones so that at most one request per
//! block-aligned address is outstanding on the channel.
//!
//! Channels live in a harness-owned arena and are addressed by `ChannelId`;
//! components hold ids, never references to each other.

use std::collections::VecDeque;
use std::ops::{Index, IndexMut};

use crate::common::addr::Address;
use crate::common::AccessType;

/// Stable handle to a channel in the harness-owned arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub usize);

/// A request travelling down the hierarchy.
#[derive(Clone, Debug)]
pub struct RequestPacket {
    /// Physical address (meaningful only when `is_translated`).
    pub address: Address,
    /// Virtual address.
    pub v_address: Address,
    /// Data payload handle (the simulator tracks addresses, not bytes).
    pub data: Address,
    /// Program counter of the access.
    pub ip: Address,
    /// Instruction that triggered the access.
    pub instr_id: u64,
    /// Prefetcher metadata carried through the hierarchy.
    pub pf_metadata: u32,
    /// Index of the originating CPU.
    pub cpu: u32,
    /// Access classification.
    pub ty: AccessType,
    /// Address-space identifier pair.
    pub asid: [u8; 2],
    /// Whether `address` holds a valid translation.
    pub is_translated: bool,
    /// Whether the producer expects a response on `returned`.
    pub response_requested: bool,
    /// Instructions whose completion waits on this request (sorted ids).
    pub instr_depend_on_me: Vec<u64>,
    /// Set once the channel has coalesced this packet against residents.
    pub forward_checked: bool,
}

impl Default for RequestPacket {
    fn default() -> Self {
        Self {
            address: Address::new(0),
            v_address: Address::new(0),
            data: Address::new(0),
            ip: Address::new(0),
            instr_id: 0,
            pf_metadata: 0,
            cpu: 0,
            ty: AccessType::Load,
            asid: [u8::MAX, u8::MAX],
            is_translated: true,
            response_requested: true,
            instr_depend_on_me: Vec::new(),
            forward_checked: false,
        }
    }
}

/// A response travelling back up the hierarchy.
#[derive(Clone, Debug)]
pub struct ResponsePacket {
    /// Physical address of the original request.
    pub address: Address,
    /// Virtual address of the original request.
    pub v_address: Address,
    /// Data payload handle.
    pub data: Address,
    /// Prefetcher metadata.
    pub pf_metadata: u32,
    /// Instructions waiting on this response.
    pub instr_depend_on_me: Vec<u64>,
}

/// Occupancy and merge counters for one channel.
#[derive(Clone, Default, Debug)]
pub struct ChannelStats {
    pub rq_access: u64,
    pub rq_merged: u64,
    pub rq_full: u64,
    pub rq_to_cache: u64,
    pub pq_access: u64,
    pub pq_merged: u64,
    pub pq_full: u64,
    pub pq_to_cache: u64,
    pub wq_access: u64,
    pub wq_merged: u64,
    pub wq_full: u64,
    pub wq_to_cache: u64,
    pub wq_forward: u64,
}

/// A bidirectional request/response channel.
pub struct Channel {
    /// Read queue.
    pub rq: VecDeque<RequestPacket>,
    /// Prefetch queue.
    pub pq: VecDeque<RequestPacket>,
    /// Write queue.
    pub wq: VecDeque<RequestPacket>,
    /// Responses awaiting pickup by the producer.
    pub returned: VecDeque<ResponsePacket>,
    /// Statistics for the current phase.
    pub stats: ChannelStats,
    rq_size: usize,
    pq_size: usize,
    wq_size: usize,
    offset_bits: u32,
    match_offset_bits: bool,
}

impl Channel {
    /// Creates a channel with the given queue capacities.
    ///
    /// `offset_bits` selects the block-aligned comparison granularity;
    /// `match_offset_bits` disables block alignment for write coalescing
    /// (used by caches that see sub-block writebacks).
    pub fn new(
        rq_size: usize,
        pq_size: usize,
        wq_size: usize,
        offset_bits: u32,
        match_offset_bits: bool,
    ) -> Self {
        Self {
            rq: VecDeque::new(),
            pq: VecDeque::new(),
            wq: VecDeque::new(),
            returned: VecDeque::new(),
            stats: ChannelStats::default(),
            rq_size,
            pq_size,
            wq_size,
            offset_bits,
            match_offset_bits,
        }
    }

    /// Returns the read queue capacity.
    pub fn rq_size(&self) -> usize {
        self.rq_size
    }

    /// Returns the prefetch queue capacity.
    pub fn pq_size(&self) -> usize {
        self.pq_size
    }

    /// Returns the write queue capacity.
    pub fn wq_size(&self) -> usize {
        self.wq_size
    }

    /// Enqueues a read. Returns `false` when the queue is full.
    pub fn add_rq(&mut self, mut packet: RequestPacket) -> bool {
        self.stats.rq_access += 1;
        if self.rq.len() >= self.rq_size {
            self.stats.rq_full += 1;
            return false;
        }
        self.stats.rq_to_cache += 1;
        packet.forward_checked = false;
        self.rq.push_back(packet);
        true
    }

    /// Enqueues a prefetch. Returns `false` when the queue is full.
    pub fn add_pq(&mut self, mut packet: RequestPacket) -> bool {
        self.stats.pq_access += 1;
        if self.pq.len() >= self.pq_size {
            self.stats.pq_full += 1;
            return false;
        }
        self.stats.pq_to_cache += 1;
        packet.forward_checked = false;
        self.pq.push_back(packet);
        true
    }

    /// Enqueues a write. Returns `false` when the queue is full.
    pub fn add_wq(&mut self, mut packet: RequestPacket) -> bool {
        self.stats.wq_access += 1;
        if self.wq.len() >= self.wq_size {
            self.stats.wq_full += 1;
            return false;
        }
        self.stats.wq_to_cache += 1;
        packet.forward_checked = false;
        self.wq.push_back(packet);
        true
    }

    fn blocks_match(&self, a: Address, b: Address, write: bool) -> bool {
        let shamt = if write && self.match_offset_bits {
            0
        } else {
            self.offset_bits
        };
        a.slice_upper(shamt) == b.slice_upper(shamt)
    }

    /// Coalesces newly arrived requests against queue-resident ones.
    ///
    /// Run by the consumer at the start of its tick, before admitting any
    /// packet. Duplicate writes are dropped, reads matching a queued write are
    /// answered from the write's data, and duplicate reads merge their
    /// dependency lists into the resident entry.
    pub fn check_collision(&mut self) {
        // Writes: a same-block resident write supersedes the new one.
        let mut wq_idx = 0;
        while wq_idx < self.wq.len() {
            if self.wq[wq_idx].forward_checked {
                wq_idx += 1;
                continue;
            }
            let addr = self.wq[wq_idx].address;
            let dup = self
                .wq
                .iter()
                .enumerate()
                .any(|(i, other)| i != wq_idx && self.blocks_match(other.address, addr, true));
            if dup {
                let _ = self.wq.remove(wq_idx);
                self.stats.wq_merged += 1;
            } else {
                self.wq[wq_idx].forward_checked = true;
                wq_idx += 1;
            }
        }

        // Reads: forward from a queued write, else merge into a resident read.
        for queue in [QueueKind::Rq, QueueKind::Pq] {
            let mut idx = 0;
            loop {
                let len = match queue {
                    QueueKind::Rq => self.rq.len(),
                    QueueKind::Pq => self.pq.len(),
                    QueueKind::Wq => unreachable!(),
                };
                if idx >= len {
                    break;
                }
                let (checked, addr) = {
                    let pkt = match queue {
                        QueueKind::Rq => &self.rq[idx],
                        QueueKind::Pq => &self.pq[idx],
                        QueueKind::Wq => unreachable!(),
                    };
                    (pkt.forward_checked, pkt.address)
                };
                if checked {
                    idx += 1;
                    continue;
                }

                let wq_data = self
                    .wq
                    .iter()
                    .find(|w| self.blocks_match(w.address, addr, false))
                    .map(|w| w.data);
                if let Some(data) = wq_data {
                    let pkt = match queue {
                        QueueKind::Rq => self.rq.remove(idx).unwrap(),
                        QueueKind::Pq => self.pq.remove(idx).unwrap(),
                        QueueKind::Wq => unreachable!(),
                    };
                    if pkt.response_requested {
                        self.returned.push_back(ResponsePacket {
                            address: pkt.address,
                            v_address: pkt.v_address,
                            data,
                            pf_metadata: pkt.pf_metadata,
                            instr_depend_on_me: pkt.instr_depend_on_me,
                        });
                    }
                    self.stats.wq_forward += 1;
                    continue;
                }

                let resident = self.find_resident_read(queue, idx, addr);
                if let Some((res_queue, mut res_idx)) = resident {
                    let pkt = match queue {
                        QueueKind::Rq => self.rq.remove(idx).unwrap(),
                        QueueKind::Pq => self.pq.remove(idx).unwrap(),
                        QueueKind::Wq => unreachable!(),
                    };
                    if res_queue == queue && res_idx > idx {
                        res_idx -= 1;
                    }
                    let target = match res_queue {
                        QueueKind::Rq => &mut self.rq[res_idx],
                        QueueKind::Pq => &mut self.pq[res_idx],
                        QueueKind::Wq => unreachable!(),
                    };
                    merge_sorted(&mut target.instr_depend_on_me, &pkt.instr_depend_on_me);
                    target.response_requested |= pkt.response_requested;
                    match queue {
                        QueueKind::Rq => self.stats.rq_merged += 1,
                        QueueKind::Pq => self.stats.pq_merged += 1,
                        QueueKind::Wq => unreachable!(),
                    }
                    continue;
                }

                match queue {
                    QueueKind::Rq => self.rq[idx].forward_checked = true,
                    QueueKind::Pq => self.pq[idx].forward_checked = true,
                    QueueKind::Wq => unreachable!(),
                }
                idx += 1;
            }
        }
    }

    /// Finds a same-block read resident in either read queue, other than the
    /// packet at `(queue, idx)` itself.
    fn find_resident_read(
        &self,
        queue: QueueKind,
        idx: usize,
        addr: Address,
    ) -> Option<(QueueKind, usize)> {
        for (i, pkt) in self.rq.iter().enumerate() {
            if (queue != QueueKind::Rq || i != idx) && self.blocks_match(pkt.address, addr, false) {
                return Some((QueueKind::Rq, i));
            }
        }
        for (i, pkt) in self.pq.iter().enumerate() {
            if (queue != QueueKind::Pq || i != idx) && self.blocks_match(pkt.address, addr, false) {
                return Some((QueueKind::Pq, i));
            }
        }
        None
    }
}

/// Identifies one of the three request queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueKind {
    Rq,
    Pq,
    Wq,
}

/// Merges the sorted id list `src` into the sorted id list `dst` (set union).
pub fn merge_sorted(dst: &mut Vec<u64>, src: &[u64]) {
    for &id in src {
        if let Err(pos) = dst.binary_search(&id) {
            dst.insert(pos, id);
        }
    }
}

/// Merges the sorted channel-id list `src` into `dst` (set union).
pub fn merge_returns(dst: &mut Vec<ChannelId>, src: &[ChannelId]) {
    for &id in src {
        if let Err(pos) = dst.binary_search(&id) {
            dst.insert(pos, id);
        }
    }
}

/// The harness-owned channel arena.
#[derive(Default)]
pub struct Channels {
    slots: Vec<Channel>,
}

impl Channels {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a channel, returning its stable handle.
    pub fn add(&mut self, channel: Channel) -> ChannelId {
        self.slots.push(channel);
        ChannelId(self.slots.len() - 1)
    }

    /// Number of channels in the arena.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the arena holds no channels.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Pushes a response onto every channel in `targets`.
    pub fn push_response(&mut self, targets: &[ChannelId], response: &ResponsePacket) {
        for &id in targets {
            self.slots[id.0].returned.push_back(response.clone());
        }
    }

    /// Clears the phase statistics on every channel.
    pub fn reset_stats(&mut self) {
        for channel in &mut self.slots {
            channel.stats = ChannelStats::default();
        }
    }
}

impl Index<ChannelId> for Channels {
    type Output = Channel;

    fn index(&self, id: ChannelId) -> &Channel {
        &self.slots[id.0]
    }
}

impl IndexMut<ChannelId> for Channels {
    fn index_mut(&mut self, id: ChannelId) -> &mut Channel {
        &mut self.slots[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::LOG2_BLOCK_SIZE;

    fn read(addr: u64, id: u64) -> RequestPacket {
        RequestPacket {
            address: Address::new(addr),
            v_address: Address::new(addr),
            instr_id: id,
            instr_depend_on_me: vec![id],
            ..RequestPacket::default()
        }
    }

    fn channel() -> Channel {
        Channel::new(8, 8, 8, LOG2_BLOCK_SIZE, false)
    }

    #[test]
    fn test_back_pressure() {
        let mut ch = Channel::new(1, 1, 1, LOG2_BLOCK_SIZE, false);
        assert!(ch.add_rq(read(0x1000, 1)));
        assert!(!ch.add_rq(read(0x2000, 2)));
        assert_eq!(ch.stats.rq_full, 1);
    }

    #[test]
    fn test_same_block_reads_merge() {
        let mut ch = channel();
        assert!(ch.add_rq(read(0x1000, 1)));
        assert!(ch.add_rq(read(0x1008, 2)));
        ch.check_collision();
        assert_eq!(ch.rq.len(), 1);
        assert_eq!(ch.rq[0].instr_depend_on_me, vec![1, 2]);
        assert_eq!(ch.stats.rq_merged, 1);
    }

    #[test]
    fn test_distinct_blocks_do_not_merge() {
        let mut ch = channel();
        assert!(ch.add_rq(read(0x1000, 1)));
        assert!(ch.add_rq(read(0x1040, 2)));
        ch.check_collision();
        assert_eq!(ch.rq.len(), 2);
    }

    #[test]
    fn test_read_forwards_from_write() {
        let mut ch = channel();
        let mut write = read(0x1000, 1);
        write.ty = AccessType::Write;
        write.data = Address::new(0xabc);
        assert!(ch.add_wq(write));
        assert!(ch.add_rq(read(0x1010, 2)));
        ch.check_collision();
        assert!(ch.rq.is_empty());
        assert_eq!(ch.returned.len(), 1);
        assert_eq!(ch.returned[0].data.value(), 0xabc);
        assert_eq!(ch.stats.wq_forward, 1);
    }

    #[test]
    fn test_duplicate_writes_drop() {
        let mut ch = channel();
        let mut a = read(0x1000, 1);
        a.ty = AccessType::Write;
        let mut b = read(0x1020, 2);
        b.ty = AccessType::Write;
        assert!(ch.add_wq(a));
        assert!(ch.add_wq(b));
        ch.check_collision();
        assert_eq!(ch.wq.len(), 1);
        assert_eq!(ch.stats.wq_merged, 1);
    }

    #[test]
    fn test_merge_sorted_is_a_set_union() {
        let mut dst = vec![1, 3, 5];
        merge_sorted(&mut dst, &[2, 3, 6]);
        assert_eq!(dst, vec![1, 2, 3, 5, 6]);
    }
}
