//! DRAM memory controller with per-bank state machines.
//!
//! Each channel owns fixed-capacity read and write queues, one bank state per
//! (rank, bank) pair, and a single data bus. Per tick a channel:
//! 1. Completes the bus transaction whose return time has arrived.
//! 2. Swaps between read and write mode on queue watermarks, paying the bus
//!    turnaround and rolling back scheduled-but-inactive banks.
//! 3. Advances refresh: a periodic trigger marks every bank, idle banks
//!    refresh, refreshing banks whose timer expired go idle with their row
//!    closed.
//! 4. Promotes the earliest-ready bank onto the bus, recording row-buffer and
//!    congestion statistics.
//! 5. Schedules one queued packet onto its bank, occupying the bank for
//!    `tCAS` plus the row charge delay on a row-buffer miss.
//!
//! Address decomposition, from the LSB: block offset, channel, bank, column,
//! rank, row; each field is `lg2` of its configured count wide.

use crate::channel::{merge_returns, merge_sorted, ChannelId, Channels, RequestPacket, ResponsePacket};
use crate::common::addr::{bitmask, lg2, Address};
use crate::common::{BLOCK_SIZE, LOG2_BLOCK_SIZE};
use crate::config::DramConfig;
use crate::stats::DramChannelStats;

/// Converts a delay in nanoseconds to IO cycles, rounding up.
fn cycles(ns: f64, io_freq: u64) -> u64 {
    (ns * io_freq as f64 / 1000.0).ceil() as u64
}

/// A request resident in a channel's read or write queue.
#[derive(Clone, Debug)]
struct DramRequest {
    address: Address,
    v_address: Address,
    data: Address,
    pf_metadata: u32,
    instr_depend_on_me: Vec<u64>,
    to_return: Vec<ChannelId>,
    event_cycle: u64,
    scheduled: bool,
    forward_checked: bool,
}

impl DramRequest {
    fn from_packet(packet: &RequestPacket, now: u64) -> Self {
        Self {
            address: packet.address,
            v_address: packet.v_address,
            data: packet.data,
            pf_metadata: packet.pf_metadata,
            instr_depend_on_me: packet.instr_depend_on_me.clone(),
            to_return: Vec::new(),
            event_cycle: now,
            scheduled: false,
            forward_checked: false,
        }
    }

    fn response(&self) -> ResponsePacket {
        ResponsePacket {
            address: self.address,
            v_address: self.v_address,
            data: self.data,
            pf_metadata: self.pf_metadata,
            instr_depend_on_me: self.instr_depend_on_me.clone(),
        }
    }
}

/// Which of a channel's two queues a slot index refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Queue {
    Read,
    Write,
}

/// Per-(rank, bank) scheduler state.
#[derive(Clone, Default, Debug)]
struct BankState {
    valid: bool,
    row_buffer_hit: bool,
    under_refresh: bool,
    need_refresh: bool,
    open_row: Option<u64>,
    event_cycle: u64,
    slot: Option<(Queue, usize)>,
}

/// One DRAM channel: queues, banks, and a data bus.
pub struct DramChannel {
    rq: Vec<Option<DramRequest>>,
    wq: Vec<Option<DramRequest>>,
    banks: Vec<BankState>,
    active_bank: Option<usize>,
    write_mode: bool,
    dbus_cycle_available: u64,
    refresh_row: u64,
    t_rp: u64,
    t_rcd: u64,
    t_cas: u64,
    turnaround: u64,
    dbus_return_time: u64,
    refresh_period: u64,
    write_high_wm: usize,
    write_low_wm: usize,
    rows: usize,
    columns: usize,
    ranks: usize,
    bank_count: usize,
    channel_bits: u32,
    current_cycle: u64,
    warmup: bool,
    /// Statistics for the current phase.
    pub stats: DramChannelStats,
}

impl DramChannel {
    fn new(index: usize, config: &DramConfig) -> Self {
        let refresh_period =
            ((config.io_freq as f64 * 1e6 * 0.064) / (config.rows as f64 / 8.0)) as u64;
        Self {
            rq: vec![None; config.rq_size],
            wq: vec![None; config.wq_size],
            banks: vec![BankState::default(); config.ranks * config.banks],
            active_bank: None,
            write_mode: false,
            dbus_cycle_available: 0,
            refresh_row: 0,
            t_rp: cycles(config.t_rp_ns, config.io_freq),
            t_rcd: cycles(config.t_rcd_ns, config.io_freq),
            t_cas: cycles(config.t_cas_ns, config.io_freq),
            turnaround: cycles(config.turnaround_ns, config.io_freq),
            dbus_return_time: BLOCK_SIZE.div_ceil(config.channel_width),
            refresh_period: refresh_period.max(1),
            write_high_wm: config.write_high_wm,
            write_low_wm: config.write_low_wm,
            rows: config.rows,
            columns: config.columns,
            ranks: config.ranks,
            bank_count: config.banks,
            channel_bits: lg2(config.channels.max(1) as u64),
            current_cycle: 0,
            warmup: true,
            stats: DramChannelStats::named(format!("Channel {index}")),
        }
    }

    /// Column-access delay in channel cycles.
    pub fn t_cas(&self) -> u64 {
        self.t_cas
    }

    /// Row-to-column delay in channel cycles.
    pub fn t_rcd(&self) -> u64 {
        self.t_rcd
    }

    /// Precharge delay in channel cycles.
    pub fn t_rp(&self) -> u64 {
        self.t_rp
    }

    fn get_bank(&self, address: Address) -> u64 {
        let shift = self.channel_bits + LOG2_BLOCK_SIZE;
        (address.value() >> shift) & bitmask(lg2(self.bank_count as u64))
    }

    fn get_column(&self, address: Address) -> u64 {
        let shift = lg2(self.bank_count as u64) + self.channel_bits + LOG2_BLOCK_SIZE;
        (address.value() >> shift) & bitmask(lg2(self.columns as u64))
    }

    fn get_rank(&self, address: Address) -> u64 {
        let shift = lg2(self.columns as u64)
            + lg2(self.bank_count as u64)
            + self.channel_bits
            + LOG2_BLOCK_SIZE;
        (address.value() >> shift) & bitmask(lg2(self.ranks as u64))
    }

    fn get_row(&self, address: Address) -> u64 {
        let shift = lg2(self.ranks as u64)
            + lg2(self.columns as u64)
            + lg2(self.bank_count as u64)
            + self.channel_bits
            + LOG2_BLOCK_SIZE;
        (address.value() >> shift) & bitmask(lg2(self.rows as u64))
    }

    fn bank_index(&self, address: Address) -> usize {
        (self.get_rank(address) as usize) * self.bank_count + self.get_bank(address) as usize
    }

    fn queue(&self, kind: Queue) -> &Vec<Option<DramRequest>> {
        match kind {
            Queue::Read => &self.rq,
            Queue::Write => &self.wq,
        }
    }

    fn queue_mut(&mut self, kind: Queue) -> &mut Vec<Option<DramRequest>> {
        match kind {
            Queue::Read => &mut self.rq,
            Queue::Write => &mut self.wq,
        }
    }

    fn blocks_match(a: Address, b: Address) -> bool {
        a.slice_upper(LOG2_BLOCK_SIZE) == b.slice_upper(LOG2_BLOCK_SIZE)
    }

    fn operate(&mut self, channels: &mut Channels) -> u64 {
        self.current_cycle += 1;
        let mut progress = 0u64;

        if self.warmup {
            for slot in &mut self.rq {
                if let Some(entry) = slot.take() {
                    channels.push_response(&entry.to_return, &entry.response());
                    progress += 1;
                }
            }
            for slot in &mut self.wq {
                if slot.take().is_some() {
                    progress += 1;
                }
            }
        }

        self.check_write_collision();
        self.check_read_collision(channels);
        progress += self.finish_dbus_request(channels);
        self.swap_write_mode();
        progress += self.schedule_refresh();
        progress += self.populate_dbus();
        let chosen = self.schedule_packet();
        progress += self.service_packet(chosen);

        progress
    }

    /// Completes the active bus transaction once its return time arrives.
    fn finish_dbus_request(&mut self, channels: &mut Channels) -> u64 {
        let Some(bank_idx) = self.active_bank else {
            return 0;
        };
        if self.banks[bank_idx].event_cycle > self.current_cycle {
            return 0;
        }

        let (kind, slot) = self.banks[bank_idx]
            .slot
            .expect("active bank without a packet");
        let entry = self.queue_mut(kind)[slot]
            .take()
            .expect("active bank points at an empty slot");
        channels.push_response(&entry.to_return, &entry.response());

        self.banks[bank_idx].valid = false;
        self.banks[bank_idx].slot = None;
        self.active_bank = None;
        1
    }

    /// Swaps read/write mode on watermark imbalance, rolling back scheduled
    /// banks and paying the bus turnaround.
    fn swap_write_mode(&mut self) {
        let wq_occu = self.wq.iter().filter(|slot| slot.is_some()).count();
        let rq_occu = self.rq.iter().filter(|slot| slot.is_some()).count();

        let enter_write =
            !self.write_mode && (wq_occu >= self.write_high_wm || (rq_occu == 0 && wq_occu > 0));
        let leave_write =
            self.write_mode && (wq_occu == 0 || (rq_occu > 0 && wq_occu < self.write_low_wm));
        if !enter_write && !leave_write {
            return;
        }

        let now = self.current_cycle;
        let t_cas = self.t_cas;
        for idx in 0..self.banks.len() {
            if Some(idx) == self.active_bank || !self.banks[idx].valid {
                continue;
            }
            // Keep the row charged only if the charge had time to complete.
            if self.banks[idx].event_cycle < now + t_cas {
                self.banks[idx].open_row = None;
            }
            self.banks[idx].valid = false;
            if let Some((kind, slot)) = self.banks[idx].slot.take() {
                if let Some(entry) = self.queue_mut(kind)[slot].as_mut() {
                    entry.scheduled = false;
                    entry.event_cycle = now;
                }
            }
        }

        self.dbus_cycle_available = match self.active_bank {
            Some(idx) => self.banks[idx].event_cycle + self.turnaround,
            None => now + self.turnaround,
        };
        self.write_mode = !self.write_mode;
    }

    /// Advances refresh state machines; a trigger marks every bank.
    fn schedule_refresh(&mut self) -> u64 {
        let mut progress = 0;
        let trigger = self.current_cycle % self.refresh_period == 1;

        if trigger {
            self.refresh_row += 8;
            if self.refresh_row >= self.rows as u64 {
                self.refresh_row = 0;
            }
            self.stats.refresh_cycles += 1;
        }

        for bank in &mut self.banks {
            if trigger {
                bank.need_refresh = true;
            }
            if bank.need_refresh && !bank.valid {
                bank.event_cycle = self.current_cycle + self.t_cas + self.t_rcd;
                bank.need_refresh = false;
                bank.under_refresh = true;
            } else if bank.under_refresh && bank.event_cycle <= self.current_cycle {
                bank.under_refresh = false;
                bank.open_row = None;
                progress += 1;
            }
        }
        progress
    }

    /// Promotes the earliest-ready bank onto the data bus.
    fn populate_dbus(&mut self) -> u64 {
        let next = self
            .banks
            .iter()
            .enumerate()
            .filter(|(_, bank)| bank.valid)
            .min_by_key(|(_, bank)| bank.event_cycle)
            .map(|(idx, _)| idx);
        let Some(idx) = next else {
            return 0;
        };
        if self.banks[idx].event_cycle > self.current_cycle {
            return 0;
        }

        if self.active_bank.is_none() && self.dbus_cycle_available <= self.current_cycle {
            self.active_bank = Some(idx);
            self.banks[idx].event_cycle = self.current_cycle + self.dbus_return_time;

            match (self.banks[idx].row_buffer_hit, self.write_mode) {
                (true, true) => self.stats.wq_row_buffer_hit += 1,
                (true, false) => self.stats.rq_row_buffer_hit += 1,
                (false, true) => self.stats.wq_row_buffer_miss += 1,
                (false, false) => self.stats.rq_row_buffer_miss += 1,
            }
            1
        } else {
            let until_free = match self.active_bank {
                Some(active) => self.banks[active].event_cycle - self.current_cycle,
                None => self.dbus_cycle_available - self.current_cycle,
            };
            self.stats.dbus_cycle_congested += until_free;
            self.stats.dbus_count_congested += 1;
            0
        }
    }

    /// Picks the unscheduled packet whose bank is free, breaking ties by age.
    fn schedule_packet(&self) -> Option<(Queue, usize)> {
        let kind = if self.write_mode {
            Queue::Write
        } else {
            Queue::Read
        };
        let mut best: Option<(usize, bool, u64)> = None;
        for (idx, slot) in self.queue(kind).iter().enumerate() {
            let Some(entry) = slot else { continue };
            if entry.scheduled {
                continue;
            }
            let bank = &self.banks[self.bank_index(entry.address)];
            let ready = !bank.valid && !bank.under_refresh;
            let better = match best {
                None => true,
                Some((_, best_ready, best_cycle)) => {
                    if ready != best_ready {
                        ready
                    } else {
                        entry.event_cycle < best_cycle
                    }
                }
            };
            if better {
                best = Some((idx, ready, entry.event_cycle));
            }
        }
        best.map(|(idx, _, _)| (kind, idx))
    }

    /// Occupies the chosen packet's bank for the access latency.
    fn service_packet(&mut self, chosen: Option<(Queue, usize)>) -> u64 {
        let Some((kind, slot)) = chosen else { return 0 };
        let (address, event_cycle) = match self.queue(kind)[slot].as_ref() {
            Some(entry) => (entry.address, entry.event_cycle),
            None => return 0,
        };
        if event_cycle > self.current_cycle {
            return 0;
        }

        let bank_idx = self.bank_index(address);
        let row = self.get_row(address);
        let bank = &self.banks[bank_idx];
        if bank.valid || bank.under_refresh {
            return 0;
        }

        let row_buffer_hit = bank.open_row == Some(row);
        let charge_delay = if bank.open_row.is_some() {
            self.t_rp + self.t_rcd
        } else {
            self.t_rcd
        };
        self.banks[bank_idx] = BankState {
            valid: true,
            row_buffer_hit,
            under_refresh: false,
            need_refresh: false,
            open_row: Some(row),
            event_cycle: self.current_cycle
                + self.t_cas
                + if row_buffer_hit { 0 } else { charge_delay },
            slot: Some((kind, slot)),
        };
        let entry = self.queue_mut(kind)[slot].as_mut().unwrap();
        entry.scheduled = true;
        entry.event_cycle = u64::MAX;
        1
    }

    /// Drops write-queue duplicates; the newer write supersedes.
    fn check_write_collision(&mut self) {
        for idx in 0..self.wq.len() {
            let Some(entry) = self.wq[idx].as_ref() else {
                continue;
            };
            if entry.forward_checked {
                continue;
            }
            let addr = entry.address;
            let dup = self.wq.iter().enumerate().any(|(other, slot)| {
                other != idx
                    && slot
                        .as_ref()
                        .is_some_and(|pkt| Self::blocks_match(pkt.address, addr))
            });
            if dup {
                self.wq[idx] = None;
            } else {
                self.wq[idx].as_mut().unwrap().forward_checked = true;
            }
        }
    }

    /// Folds read-queue duplicates and answers reads from queued writes.
    fn check_read_collision(&mut self, channels: &mut Channels) {
        for idx in 0..self.rq.len() {
            let Some(entry) = self.rq[idx].as_ref() else {
                continue;
            };
            if entry.forward_checked {
                continue;
            }
            let addr = entry.address;

            let wq_hit = self.wq.iter().flatten().find(|w| Self::blocks_match(w.address, addr));
            if let Some(write) = wq_hit {
                let data = write.data;
                let entry = self.rq[idx].take().unwrap();
                let mut response = entry.response();
                response.data = data;
                channels.push_response(&entry.to_return, &response);
                continue;
            }

            let dup = self.rq.iter().enumerate().find_map(|(other, slot)| {
                if other == idx {
                    return None;
                }
                slot.as_ref()
                    .filter(|pkt| Self::blocks_match(pkt.address, addr))
                    .map(|_| other)
            });
            if let Some(other) = dup {
                let entry = self.rq[idx].take().unwrap();
                let target = self.rq[other].as_mut().unwrap();
                merge_sorted(&mut target.instr_depend_on_me, &entry.instr_depend_on_me);
                merge_returns(&mut target.to_return, &entry.to_return);
            } else {
                self.rq[idx].as_mut().unwrap().forward_checked = true;
            }
        }
    }

    fn print_deadlock(&self) {
        let dump = |label: &str, queue: &Vec<Option<DramRequest>>| {
            let mut empty = true;
            for entry in queue.iter().flatten() {
                println!(
                    "[{label}] address: {} v_addr: {} scheduled: {}",
                    entry.address, entry.v_address, entry.scheduled
                );
                empty = false;
            }
            if empty {
                println!("{label} empty");
            }
        };
        dump("RQ", &self.rq);
        dump("WQ", &self.wq);
    }
}

/// The memory controller: fans requests out to its channels.
pub struct MemController {
    channels_lg2: u32,
    size_bytes: u64,
    upper_levels: Vec<ChannelId>,
    dram: Vec<DramChannel>,
    current_cycle: u64,
}

impl MemController {
    /// Creates a controller with `config.channels` channels.
    pub fn new(config: &DramConfig, upper_levels: Vec<ChannelId>) -> Self {
        let dram = (0..config.channels)
            .map(|i| DramChannel::new(i, config))
            .collect();
        Self {
            channels_lg2: lg2(config.channels.max(1) as u64),
            size_bytes: config.size_bytes(),
            upper_levels,
            dram,
            current_cycle: 0,
        }
    }

    /// Switches warmup mode on or off.
    pub fn set_warmup(&mut self, warmup: bool) {
        for channel in &mut self.dram {
            channel.warmup = warmup;
        }
    }

    /// Clears the phase statistics on every channel.
    pub fn begin_phase(&mut self) {
        for (idx, channel) in self.dram.iter_mut().enumerate() {
            channel.stats = DramChannelStats::named(format!("Channel {idx}"));
        }
    }

    /// Total DRAM capacity in bytes.
    pub fn size(&self) -> u64 {
        self.size_bytes
    }

    /// Per-channel statistics.
    pub fn channel_stats(&self) -> Vec<&DramChannelStats> {
        self.dram.iter().map(|c| &c.stats).collect()
    }

    fn dram_get_channel(&self, address: Address) -> usize {
        ((address.value() >> LOG2_BLOCK_SIZE) & bitmask(self.channels_lg2)) as usize
    }

    /// Advances the controller and every channel by one tick.
    pub fn operate(&mut self, channels: &mut Channels) -> u64 {
        self.current_cycle += 1;
        self.initiate_requests(channels);

        let mut progress = 0;
        for chan in &mut self.dram {
            progress += chan.operate(channels);
        }
        progress
    }

    /// Drains the upper channels into the per-channel queues, in order,
    /// stopping at the first refused packet.
    fn initiate_requests(&mut self, channels: &mut Channels) {
        for i in 0..self.upper_levels.len() {
            let ul = self.upper_levels[i];

            loop {
                let Some(packet) = channels[ul].rq.front().cloned() else {
                    break;
                };
                if !self.add_rq(&packet, ul) {
                    break;
                }
                channels[ul].rq.pop_front();
            }
            loop {
                let Some(packet) = channels[ul].pq.front().cloned() else {
                    break;
                };
                if !self.add_rq(&packet, ul) {
                    break;
                }
                channels[ul].pq.pop_front();
            }
            loop {
                let Some(packet) = channels[ul].wq.front().cloned() else {
                    break;
                };
                if !self.add_wq(&packet) {
                    break;
                }
                channels[ul].wq.pop_front();
            }
        }
    }

    fn add_rq(&mut self, packet: &RequestPacket, ul: ChannelId) -> bool {
        let now = self.current_cycle;
        let chan_idx = self.dram_get_channel(packet.address);
        let channel = &mut self.dram[chan_idx];
        match channel.rq.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                let mut entry = DramRequest::from_packet(packet, now);
                if packet.response_requested {
                    entry.to_return = vec![ul];
                }
                *slot = Some(entry);
                true
            }
            None => false,
        }
    }

    fn add_wq(&mut self, packet: &RequestPacket) -> bool {
        let now = self.current_cycle;
        let chan_idx = self.dram_get_channel(packet.address);
        let channel = &mut self.dram[chan_idx];
        match channel.wq.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(DramRequest::from_packet(packet, now));
                true
            }
            None => {
                channel.stats.wq_full += 1;
                false
            }
        }
    }

    /// Dumps every channel's queues for deadlock diagnosis.
    pub fn print_deadlock(&self) {
        for (idx, chan) in self.dram.iter().enumerate() {
            println!("DRAM Channel {idx}");
            chan.print_deadlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_conversion() {
        // 12.5 ns at 3200 MT/s is 40 cycles.
        assert_eq!(cycles(12.5, 3200), 40);
        assert_eq!(cycles(7.5, 3200), 24);
    }

    #[test]
    fn test_address_decomposition_field_order() {
        let config = DramConfig::default();
        let chan = DramChannel::new(0, &config);
        // One channel: bank field starts right above the block offset.
        let addr = Address::new(0x3 << LOG2_BLOCK_SIZE);
        assert_eq!(chan.get_bank(addr), 3);
        let col_shift = LOG2_BLOCK_SIZE + lg2(config.banks as u64);
        assert_eq!(chan.get_column(Address::new(0x5 << col_shift)), 5);
        let row_shift = col_shift + lg2(config.columns as u64) + lg2(config.ranks as u64);
        assert_eq!(chan.get_row(Address::new(0x7 << row_shift)), 7);
    }

    #[test]
    fn test_row_charge_delays() {
        let config = DramConfig::default();
        let chan = DramChannel::new(0, &config);
        assert_eq!(chan.t_cas(), 40);
        assert_eq!(chan.t_rcd(), 40);
        assert_eq!(chan.t_rp(), 40);
    }
}
