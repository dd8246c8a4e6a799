//! Set-associative cache controller.
//!
//! One controller models any level of the hierarchy, including the TLBs (which
//! are caches over page-granular "blocks"). Per tick it:
//! 1. Coalesces newly arrived requests on every upper channel.
//! 2. Drains lower-level returns into their MSHRs, and translation returns
//!    into waiting tag checks.
//! 3. Performs up to `max_fill` fills from returned MSHRs and inflight
//!    writes, evicting victims and issuing writebacks; a refused writeback
//!    aborts the fill with no state change.
//! 4. Admits new tag checks from the translation stash, the upper channels,
//!    and the internal prefetch queue, within the tag bandwidth.
//! 5. Issues address translations for untranslated tag checks and migrates
//!    late untranslated entries to the stash so they do not block younger
//!    ones.
//! 6. Performs up to `max_tag` tag checks: hits answer immediately, missed
//!    writebacks join the inflight-write list, and other misses allocate or
//!    merge into an MSHR and forward below (writes as RFO).
//!
//! Back-pressure from the lower level or a full MSHR array leaves work in
//! place to retry next tick.

use std::collections::VecDeque;

use crate::channel::{
    merge_returns, merge_sorted, ChannelId, Channels, RequestPacket, ResponsePacket,
};
use crate::common::addr::{bitmask, lg2, Address};
use crate::common::{AccessType, BranchType, LOG2_PAGE_SIZE};
use crate::config::CacheConfig;
use crate::mem::prefetch::{PrefetchLine, PrefetcherSet};
use crate::mem::replacement::ReplacerSet;
use crate::stats::CacheStats;

/// One cache block.
#[derive(Clone, Default, Debug)]
pub struct Block {
    /// Whether the block holds data.
    pub valid: bool,
    /// Whether the block was filled by a prefetch and not yet demanded.
    pub prefetch: bool,
    /// Whether the block must be written back on eviction.
    pub dirty: bool,
    /// Physical address of the block.
    pub address: Address,
    /// Virtual address of the block.
    pub v_address: Address,
    /// Data payload handle.
    pub data: Address,
    /// Prefetcher metadata stored with the block.
    pub pf_metadata: u32,
}

/// A request undergoing (or awaiting) a tag check.
#[derive(Clone, Debug)]
pub struct TagCheck {
    pub address: Address,
    pub v_address: Address,
    pub data: Address,
    pub ip: Address,
    pub instr_id: u64,
    pub pf_metadata: u32,
    pub cpu: u32,
    pub ty: AccessType,
    pub asid: [u8; 2],
    /// The prefetch was issued by this cache's own prefetcher.
    pub prefetch_from_this: bool,
    /// Do not fill this level on return (prefetch below only).
    pub skip_fill: bool,
    pub is_translated: bool,
    pub translate_issued: bool,
    pub event_cycle: u64,
    pub instr_depend_on_me: Vec<u64>,
    pub to_return: Vec<ChannelId>,
}

impl TagCheck {
    fn from_request(req: &RequestPacket, local_prefetch: bool, skip_fill: bool) -> Self {
        Self {
            address: req.address,
            v_address: req.v_address,
            data: req.data,
            ip: req.ip,
            instr_id: req.instr_id,
            pf_metadata: req.pf_metadata,
            cpu: req.cpu,
            ty: req.ty,
            asid: req.asid,
            prefetch_from_this: local_prefetch,
            skip_fill,
            is_translated: req.is_translated,
            translate_issued: false,
            event_cycle: 0,
            instr_depend_on_me: req.instr_depend_on_me.clone(),
            to_return: Vec::new(),
        }
    }
}

/// An outstanding miss.
#[derive(Clone, Debug)]
pub struct MshrEntry {
    pub address: Address,
    pub v_address: Address,
    pub data: Address,
    pub ip: Address,
    pub instr_id: u64,
    pub pf_metadata: u32,
    pub cpu: u32,
    pub ty: AccessType,
    pub asid: [u8; 2],
    pub prefetch_from_this: bool,
    pub cycle_enqueued: u64,
    /// `u64::MAX` until the lower level returns, then the fill-ready cycle.
    pub event_cycle: u64,
    pub instr_depend_on_me: Vec<u64>,
    pub to_return: Vec<ChannelId>,
}

impl MshrEntry {
    fn from_tag_check(req: &TagCheck, cycle: u64) -> Self {
        Self {
            address: req.address,
            v_address: req.v_address,
            data: req.data,
            ip: req.ip,
            instr_id: req.instr_id,
            pf_metadata: req.pf_metadata,
            cpu: req.cpu,
            ty: req.ty,
            asid: req.asid,
            prefetch_from_this: req.prefetch_from_this,
            cycle_enqueued: cycle,
            event_cycle: u64::MAX,
            instr_depend_on_me: req.instr_depend_on_me.clone(),
            to_return: req.to_return.clone(),
        }
    }
}

/// A set-associative cache level.
pub struct Cache {
    name: String,
    cpu: u32,
    num_set: usize,
    num_way: usize,
    mshr_size: usize,
    pq_size: usize,
    hit_latency: u64,
    fill_latency: u64,
    max_tag: usize,
    max_fill: usize,
    offset_bits: u32,
    match_offset_bits: bool,
    virtual_prefetch: bool,
    prefetch_as_load: bool,
    pref_activate_mask: Vec<AccessType>,
    upper_levels: Vec<ChannelId>,
    lower_level: ChannelId,
    lower_translate: Option<ChannelId>,
    block: Vec<Block>,
    mshr: VecDeque<MshrEntry>,
    inflight_writes: VecDeque<MshrEntry>,
    inflight_tag_check: VecDeque<TagCheck>,
    translation_stash: Vec<TagCheck>,
    internal_pq: VecDeque<TagCheck>,
    prefetchers: PrefetcherSet,
    replacer: ReplacerSet,
    /// Statistics for the current phase.
    pub stats: CacheStats,
    current_cycle: u64,
    warmup: bool,
}

impl Cache {
    /// Creates a cache level.
    ///
    /// `lower_translate` attaches the translation channel (toward a TLB) for
    /// first-level caches that receive untranslated addresses.
    pub fn new(
        config: &CacheConfig,
        cpu: u32,
        upper_levels: Vec<ChannelId>,
        lower_level: ChannelId,
        lower_translate: Option<ChannelId>,
    ) -> Self {
        assert!(
            config.sets.is_power_of_two(),
            "{}: set count must be a power of two",
            config.name
        );
        Self {
            name: config.name.clone(),
            cpu,
            num_set: config.sets,
            num_way: config.ways,
            mshr_size: config.mshr_size,
            pq_size: config.pq_size,
            hit_latency: config.hit_latency,
            fill_latency: config.fill_latency,
            max_tag: config.max_tag,
            max_fill: config.max_fill,
            offset_bits: config.offset_bits,
            match_offset_bits: config.match_offset_bits,
            virtual_prefetch: config.virtual_prefetch,
            prefetch_as_load: config.prefetch_as_load,
            pref_activate_mask: config.activate_mask(),
            upper_levels,
            lower_level,
            lower_translate,
            block: vec![Block::default(); config.sets * config.ways],
            mshr: VecDeque::new(),
            inflight_writes: VecDeque::new(),
            inflight_tag_check: VecDeque::new(),
            translation_stash: Vec::new(),
            internal_pq: VecDeque::new(),
            prefetchers: PrefetcherSet::build(&[config.prefetcher]),
            replacer: ReplacerSet::build(&[config.replacement], config.sets, config.ways),
            stats: CacheStats::named(&config.name),
            current_cycle: 0,
            warmup: true,
        }
    }

    /// Initializes the attached modules.
    pub fn initialize(&mut self) {
        self.prefetchers.initialize();
        self.replacer.initialize();
    }

    /// Switches warmup mode on or off.
    pub fn set_warmup(&mut self, warmup: bool) {
        self.warmup = warmup;
    }

    /// Clears the phase statistics.
    pub fn begin_phase(&mut self) {
        self.stats = CacheStats::named(&self.name);
    }

    /// The cache's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of outstanding MSHRs.
    pub fn mshr_occupancy(&self) -> usize {
        self.mshr.len()
    }

    /// Capacity of the MSHR array.
    pub fn mshr_size(&self) -> usize {
        self.mshr_size
    }

    /// Number of in-flight tag checks.
    pub fn tag_check_occupancy(&self) -> usize {
        self.inflight_tag_check.len()
    }

    /// Upper bound on in-flight tag checks.
    pub fn tag_check_capacity(&self) -> usize {
        self.max_tag * self.hit_latency.max(1) as usize
    }

    /// Read-only view of the blocks of one set.
    pub fn set_view(&self, set: usize) -> &[Block] {
        &self.block[set * self.num_way..(set + 1) * self.num_way]
    }

    /// Number of sets.
    pub fn num_sets(&self) -> usize {
        self.num_set
    }

    /// Set index for an address.
    pub fn get_set_index(&self, address: Address) -> usize {
        address
            .slice(lg2(self.num_set as u64) + self.offset_bits, self.offset_bits)
            .value() as usize
    }

    fn block_aligned(&self, address: Address) -> Address {
        Address::new(address.value() & !bitmask(self.offset_bits))
    }

    fn blocks_match(&self, a: Address, b: Address) -> bool {
        a.slice_upper(self.offset_bits) == b.slice_upper(self.offset_bits)
    }

    /// Forwards a retired branch to the prefetchers (instruction caches).
    pub fn branch_operate(&mut self, ip: Address, ty: BranchType, target: Address) {
        self.prefetchers.branch_operate(ip, ty, target);
    }

    /// Reports final stats from the attached modules.
    pub fn final_stats(&self) {
        self.prefetchers.final_stats();
        self.replacer.final_stats();
    }

    /// Advances the cache by one tick.
    pub fn operate(&mut self, channels: &mut Channels) -> u64 {
        self.current_cycle += 1;
        let mut progress = 0u64;

        for i in 0..self.upper_levels.len() {
            channels[self.upper_levels[i]].check_collision();
        }

        // Finish returns.
        let returned: Vec<ResponsePacket> =
            channels[self.lower_level].returned.drain(..).collect();
        progress += returned.len() as u64;
        for packet in &returned {
            self.finish_packet(packet);
        }

        // Finish translations.
        if let Some(lt) = self.lower_translate {
            let returned: Vec<ResponsePacket> = channels[lt].returned.drain(..).collect();
            progress += returned.len() as u64;
            for packet in &returned {
                self.finish_translation(packet);
            }
        }

        // Perform fills: returned MSHRs first, then inflight writes.
        let mut fill_bw = self.max_fill;
        progress += self.drain_fills(FillSource::Mshr, &mut fill_bw, channels);
        progress += self.drain_fills(FillSource::InflightWrites, &mut fill_bw, channels);

        // Initiate tag checks.
        progress += self.initiate_tag_checks(channels);

        // Issue translations.
        self.issue_translation(channels);

        // Move late untranslated entries out of the way.
        let mut idx = 0;
        while idx < self.inflight_tag_check.len() {
            let entry = &self.inflight_tag_check[idx];
            if entry.event_cycle < self.current_cycle
                && !entry.is_translated
                && entry.translate_issued
            {
                let entry = self.inflight_tag_check.remove(idx).unwrap();
                self.translation_stash.push(entry);
            } else {
                idx += 1;
            }
        }

        // Perform tag checks.
        let mut checked = 0;
        while checked < self.max_tag {
            let ready = self
                .inflight_tag_check
                .front()
                .is_some_and(|e| e.event_cycle <= self.current_cycle && e.is_translated);
            if !ready {
                break;
            }
            let entry = self.inflight_tag_check.front().unwrap().clone();
            let done = if self.try_hit(&entry, channels) {
                true
            } else if entry.ty == AccessType::Write && !self.match_offset_bits {
                // A writeback arriving from above fills without a tag check.
                self.handle_write(&entry)
            } else {
                self.handle_miss(&entry, channels)
            };
            if !done {
                break;
            }
            self.inflight_tag_check.pop_front();
            checked += 1;
            progress += 1;
        }

        // Prefetcher per-tick hook.
        let mut issue = Vec::new();
        self.prefetchers.cycle_operate(&mut issue);
        for line in issue {
            self.prefetch_line(line);
        }

        progress
    }

    fn drain_fills(
        &mut self,
        source: FillSource,
        fill_bw: &mut usize,
        channels: &mut Channels,
    ) -> u64 {
        let mut progress = 0;
        while *fill_bw > 0 {
            let front = match source {
                FillSource::Mshr => self.mshr.front(),
                FillSource::InflightWrites => self.inflight_writes.front(),
            };
            let ready = front.is_some_and(|e| e.event_cycle <= self.current_cycle);
            if !ready {
                break;
            }
            let entry = front.unwrap().clone();
            if !self.handle_fill(&entry, channels) {
                break;
            }
            match source {
                FillSource::Mshr => self.mshr.pop_front(),
                FillSource::InflightWrites => self.inflight_writes.pop_front(),
            };
            *fill_bw -= 1;
            progress += 1;
        }
        progress
    }

    fn initiate_tag_checks(&mut self, channels: &mut Channels) -> u64 {
        let mut tag_bw = (self.max_tag as i64 * self.hit_latency.max(1) as i64
            - self.inflight_tag_check.len() as i64)
            .clamp(0, self.max_tag as i64) as usize;
        let event_cycle = self.current_cycle + if self.warmup { 0 } else { self.hit_latency };
        let mut progress = 0;

        // Stashed entries whose translation completed go first.
        while tag_bw > 0 {
            let Some(pos) = self.translation_stash.iter().position(|e| e.is_translated) else {
                break;
            };
            let mut entry = self.translation_stash.remove(pos);
            entry.event_cycle = event_cycle;
            self.inflight_tag_check.push_back(entry);
            tag_bw -= 1;
            progress += 1;
        }

        // Upper channels: writes, then reads, then prefetches.
        let stash_avail = self.translation_stash.len() < self.mshr_size;
        for i in 0..self.upper_levels.len() {
            let ul = self.upper_levels[i];
            for queue in [UlQueue::Wq, UlQueue::Rq, UlQueue::Pq] {
                while tag_bw > 0 {
                    let (can_admit, response_requested) = {
                        let chan = &channels[ul];
                        let front = match queue {
                            UlQueue::Wq => chan.wq.front(),
                            UlQueue::Rq => chan.rq.front(),
                            UlQueue::Pq => chan.pq.front(),
                        };
                        match front {
                            Some(pkt) if stash_avail || pkt.is_translated => {
                                (true, pkt.response_requested)
                            }
                            _ => (false, false),
                        }
                    };
                    if !can_admit {
                        break;
                    }
                    let chan = &mut channels[ul];
                    let packet = match queue {
                        UlQueue::Wq => chan.wq.pop_front(),
                        UlQueue::Rq => chan.rq.pop_front(),
                        UlQueue::Pq => chan.pq.pop_front(),
                    }
                    .unwrap();
                    let mut entry = TagCheck::from_request(&packet, false, false);
                    entry.event_cycle = event_cycle;
                    if response_requested {
                        entry.to_return = vec![ul];
                    }
                    self.inflight_tag_check.push_back(entry);
                    tag_bw -= 1;
                    progress += 1;
                }
            }
        }

        // Internal prefetch queue.
        while tag_bw > 0 {
            let admit = self
                .internal_pq
                .front()
                .is_some_and(|e| stash_avail || e.is_translated);
            if !admit {
                break;
            }
            let mut entry = self.internal_pq.pop_front().unwrap();
            entry.event_cycle = event_cycle;
            self.inflight_tag_check.push_back(entry);
            tag_bw -= 1;
            progress += 1;
        }

        progress
    }

    fn issue_translation(&mut self, channels: &mut Channels) {
        let Some(lt) = self.lower_translate else {
            return;
        };
        for entry in self.inflight_tag_check.iter_mut() {
            if entry.translate_issued || entry.is_translated {
                continue;
            }
            let packet = RequestPacket {
                address: entry.address,
                v_address: entry.v_address,
                data: entry.data,
                ip: entry.ip,
                instr_id: entry.instr_id,
                cpu: entry.cpu,
                asid: entry.asid,
                ty: AccessType::Load,
                is_translated: true,
                response_requested: true,
                instr_depend_on_me: entry.instr_depend_on_me.clone(),
                ..RequestPacket::default()
            };
            if channels[lt].add_rq(packet) {
                entry.translate_issued = true;
            }
        }
    }

    /// Answers a tag check that hits; returns whether it hit.
    fn try_hit(&mut self, packet: &TagCheck, channels: &mut Channels) -> bool {
        let set = self.get_set_index(packet.address);
        let begin = set * self.num_way;
        let way = (0..self.num_way).find(|&w| {
            let blk = &self.block[begin + w];
            blk.valid && self.blocks_match(blk.address, packet.address)
        });
        let hit = way.is_some();
        let useful_prefetch = way
            .map(|w| self.block[begin + w].prefetch && !packet.prefetch_from_this)
            .unwrap_or(false);

        let mut metadata_thru = packet.pf_metadata;
        if self.should_activate_prefetcher(packet) {
            let base = if self.virtual_prefetch {
                packet.v_address
            } else {
                packet.address
            };
            let base = if self.match_offset_bits {
                base
            } else {
                self.block_aligned(base)
            };
            let mut issue = Vec::new();
            metadata_thru = self.prefetchers.cache_operate(
                base,
                packet.ip,
                hit,
                useful_prefetch,
                packet.ty,
                metadata_thru,
                &mut issue,
            );
            for line in issue {
                self.prefetch_line(line);
            }
        }

        if let Some(w) = way {
            self.stats.hits[packet.ty.index()] += 1;

            let block_addr = self.block[begin + w].address;
            self.replacer.update(
                packet.cpu,
                set,
                w,
                block_addr,
                packet.ip,
                Address::new(0),
                packet.ty,
                true,
            );

            let response = ResponsePacket {
                address: packet.address,
                v_address: packet.v_address,
                data: self.block[begin + w].data,
                pf_metadata: metadata_thru,
                instr_depend_on_me: packet.instr_depend_on_me.clone(),
            };
            channels.push_response(&packet.to_return, &response);

            if packet.ty == AccessType::Write {
                self.block[begin + w].dirty = true;
            }

            if useful_prefetch {
                self.stats.pf_useful += 1;
                self.block[begin + w].prefetch = false;
            }
        }

        hit
    }

    /// Fills one block from a returned MSHR or an inflight write.
    ///
    /// Returns `false` (no state changed) when the victim's writeback is
    /// refused by the lower level.
    fn handle_fill(&mut self, fill: &MshrEntry, channels: &mut Channels) -> bool {
        let set = self.get_set_index(fill.address);
        let begin = set * self.num_way;
        let way = (0..self.num_way)
            .find(|&w| !self.block[begin + w].valid)
            .unwrap_or_else(|| {
                self.replacer.find_victim(
                    fill.cpu,
                    fill.instr_id,
                    set,
                    &self.block[begin..begin + self.num_way],
                    fill.ip,
                    fill.address,
                    fill.ty,
                )
            });
        assert!(way < self.num_way, "{}: victim way out of range", self.name);

        let victim = self.block[begin + way].clone();
        if victim.valid && victim.dirty {
            let writeback = RequestPacket {
                address: victim.address,
                v_address: victim.v_address,
                data: victim.data,
                instr_id: fill.instr_id,
                pf_metadata: victim.pf_metadata,
                cpu: fill.cpu,
                ty: AccessType::Write,
                is_translated: true,
                response_requested: false,
                ..RequestPacket::default()
            };
            if !channels[self.lower_level].add_wq(writeback) {
                return false;
            }
        }

        let evicting_address = if victim.valid {
            if self.virtual_prefetch {
                victim.v_address
            } else {
                victim.address
            }
        } else {
            Address::new(0)
        };

        let pkt_address = if self.virtual_prefetch {
            fill.v_address
        } else {
            fill.address
        };
        let base = if self.match_offset_bits {
            pkt_address
        } else {
            self.block_aligned(pkt_address)
        };
        let evicting_base = if self.match_offset_bits {
            evicting_address
        } else {
            self.block_aligned(evicting_address)
        };
        let metadata_thru = self.prefetchers.cache_fill(
            base,
            set,
            way,
            fill.ty == AccessType::Prefetch,
            evicting_base,
            fill.pf_metadata,
        );
        self.replacer.update(
            fill.cpu,
            set,
            way,
            fill.address,
            fill.ip,
            evicting_address,
            fill.ty,
            false,
        );

        if victim.valid && victim.prefetch {
            self.stats.pf_useless += 1;
        }
        if fill.ty == AccessType::Prefetch {
            self.stats.pf_fill += 1;
        }

        self.block[begin + way] = Block {
            valid: true,
            prefetch: fill.prefetch_from_this,
            dirty: fill.ty == AccessType::Write,
            address: fill.address,
            v_address: fill.v_address,
            data: fill.data,
            pf_metadata: metadata_thru,
        };

        self.stats.total_miss_latency +=
            self.current_cycle.saturating_sub(fill.cycle_enqueued + 1);

        let response = ResponsePacket {
            address: fill.address,
            v_address: fill.v_address,
            data: fill.data,
            pf_metadata: metadata_thru,
            instr_depend_on_me: fill.instr_depend_on_me.clone(),
        };
        channels.push_response(&fill.to_return, &response);

        true
    }

    /// Allocates or merges an MSHR for a missed tag check.
    ///
    /// Returns `false` (back-pressure) when the MSHR array is full or the
    /// lower level refuses the forwarded request.
    fn handle_miss(&mut self, packet: &TagCheck, channels: &mut Channels) -> bool {
        let existing = self
            .mshr
            .iter()
            .position(|m| self.blocks_match(m.address, packet.address));

        if let Some(idx) = existing {
            let entry = &mut self.mshr[idx];
            merge_sorted(&mut entry.instr_depend_on_me, &packet.instr_depend_on_me);
            merge_returns(&mut entry.to_return, &packet.to_return);

            if entry.ty == AccessType::Prefetch && packet.ty != AccessType::Prefetch {
                // Promote the prefetch to a demand request, preserving the
                // return schedule and the merged waiters.
                if entry.prefetch_from_this {
                    self.stats.pf_useful += 1;
                }
                let prior_event_cycle = entry.event_cycle;
                let deps = std::mem::take(&mut entry.instr_depend_on_me);
                let returns = std::mem::take(&mut entry.to_return);
                *entry = MshrEntry::from_tag_check(packet, self.current_cycle);
                entry.event_cycle = prior_event_cycle;
                entry.instr_depend_on_me = deps;
                entry.to_return = returns;
            }
        } else {
            if self.mshr.len() >= self.mshr_size {
                return false;
            }

            let response_requested = !(packet.prefetch_from_this && packet.skip_fill);
            let forward = RequestPacket {
                address: packet.address,
                v_address: packet.v_address,
                data: packet.data,
                ip: packet.ip,
                instr_id: packet.instr_id,
                pf_metadata: packet.pf_metadata,
                cpu: packet.cpu,
                asid: packet.asid,
                ty: if packet.ty == AccessType::Write {
                    AccessType::Rfo
                } else {
                    packet.ty
                },
                is_translated: true,
                response_requested,
                instr_depend_on_me: packet.instr_depend_on_me.clone(),
                ..RequestPacket::default()
            };

            let send_to_rq = self.prefetch_as_load || packet.ty != AccessType::Prefetch;
            let success = if send_to_rq {
                channels[self.lower_level].add_rq(forward)
            } else {
                channels[self.lower_level].add_pq(forward)
            };
            if !success {
                return false;
            }

            if response_requested {
                self.mshr
                    .push_back(MshrEntry::from_tag_check(packet, self.current_cycle));
            }
        }

        self.stats.misses[packet.ty.index()] += 1;
        true
    }

    /// Queues a writeback arriving from above; it fills like a return.
    fn handle_write(&mut self, packet: &TagCheck) -> bool {
        let mut entry = MshrEntry::from_tag_check(packet, self.current_cycle);
        entry.event_cycle =
            self.current_cycle + if self.warmup { 0 } else { self.fill_latency };
        self.inflight_writes.push_back(entry);
        self.stats.misses[packet.ty.index()] += 1;
        true
    }

    /// Attaches a lower-level return to its MSHR.
    ///
    /// # Panics
    ///
    /// Panics if no MSHR matches the response; a response without a request
    /// is an invariant violation.
    fn finish_packet(&mut self, packet: &ResponsePacket) {
        let idx = self
            .mshr
            .iter()
            .position(|m| self.blocks_match(m.address, packet.address))
            .unwrap_or_else(|| {
                panic!(
                    "[{}_MSHR] no matching entry! address: {} v_address: {}",
                    self.name, packet.address, packet.v_address
                )
            });
        let first_unreturned = self
            .mshr
            .iter()
            .position(|m| m.event_cycle == u64::MAX)
            .unwrap_or(self.mshr.len() - 1);

        let entry = &mut self.mshr[idx];
        entry.data = packet.data;
        entry.pf_metadata = packet.pf_metadata;
        entry.event_cycle =
            self.current_cycle + if self.warmup { 0 } else { self.fill_latency };

        // Keep fills in return order: after already-returned entries, before
        // still-pending ones.
        self.mshr.swap(idx, first_unreturned);
    }

    /// Patches translations onto stashed and in-flight tag checks.
    fn finish_translation(&mut self, packet: &ResponsePacket) {
        let page = packet.v_address.slice_upper(LOG2_PAGE_SIZE);
        let p_page = Address::new(packet.data.value() & !bitmask(LOG2_PAGE_SIZE));

        let mark = |entry: &mut TagCheck| {
            entry.address = p_page.splice(entry.v_address, LOG2_PAGE_SIZE);
            entry.is_translated = true;
        };

        for entry in &mut self.translation_stash {
            if !entry.is_translated && entry.v_address.slice_upper(LOG2_PAGE_SIZE) == page {
                mark(entry);
            }
        }
        for entry in &mut self.inflight_tag_check {
            if !entry.is_translated && entry.v_address.slice_upper(LOG2_PAGE_SIZE) == page {
                mark(entry);
            }
        }
    }

    /// Requests a prefetch of `line`; the request joins the internal queue.
    ///
    /// Returns `false` when the internal queue is full.
    pub fn prefetch_line(&mut self, line: PrefetchLine) -> bool {
        self.stats.pf_requested += 1;
        if self.internal_pq.len() >= self.pq_size {
            return false;
        }

        let entry = TagCheck {
            address: line.address,
            v_address: if self.virtual_prefetch {
                line.address
            } else {
                Address::new(0)
            },
            data: Address::new(0),
            ip: Address::new(0),
            instr_id: 0,
            pf_metadata: line.metadata,
            cpu: self.cpu,
            ty: AccessType::Prefetch,
            asid: [u8::MAX, u8::MAX],
            prefetch_from_this: true,
            skip_fill: !line.fill_this_level,
            is_translated: !self.virtual_prefetch,
            translate_issued: false,
            event_cycle: 0,
            instr_depend_on_me: Vec::new(),
            to_return: Vec::new(),
        };
        self.internal_pq.push_back(entry);
        self.stats.pf_issued += 1;
        true
    }

    /// Invalidates the block holding `address`, if present.
    pub fn invalidate_entry(&mut self, address: Address) -> Option<usize> {
        let set = self.get_set_index(address);
        let begin = set * self.num_way;
        let way = (0..self.num_way).find(|&w| {
            let blk = &self.block[begin + w];
            blk.valid && self.blocks_match(blk.address, address)
        })?;
        self.block[begin + way].valid = false;
        Some(way)
    }

    fn should_activate_prefetcher(&self, packet: &TagCheck) -> bool {
        !packet.prefetch_from_this && self.pref_activate_mask.contains(&packet.ty)
    }

    /// Dumps the MSHRs and upper queues for deadlock diagnosis.
    pub fn print_deadlock(&self, channels: &Channels) {
        if self.mshr.is_empty() {
            println!("{} MSHR empty", self.name);
        } else {
            for (i, entry) in self.mshr.iter().enumerate() {
                println!(
                    "[{}_MSHR] entry: {} instr_id: {} address: {} v_addr: {} type: {} event_cycle: {}",
                    self.name,
                    i,
                    entry.instr_id,
                    entry.address,
                    entry.v_address,
                    entry.ty.name(),
                    entry.event_cycle
                );
            }
        }

        for &ul in &self.upper_levels {
            let chan = &channels[ul];
            for (label, queue) in [("RQ", &chan.rq), ("WQ", &chan.wq), ("PQ", &chan.pq)] {
                if queue.is_empty() {
                    println!("{} {} empty", self.name, label);
                } else {
                    for entry in queue {
                        println!(
                            "[{}_{}] instr_id: {} address: {} v_addr: {} type: {}",
                            self.name,
                            label,
                            entry.instr_id,
                            entry.address,
                            entry.v_address,
                            entry.ty.name()
                        );
                    }
                }
            }
        }
    }
}

#[derive(Clone, Copy)]
enum FillSource {
    Mshr,
    InflightWrites,
}

#[derive(Clone, Copy)]
enum UlQueue {
    Wq,
    Rq,
    Pq,
}
