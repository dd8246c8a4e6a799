//! Out-of-order CPU core.
//!
//! The pipeline runs its stages in reverse order each tick, so a younger
//! stage never observes what an older stage produced in the same cycle:
//! retire, complete execution, memory returns, load/store issue, memory
//! scheduling, execute, schedule, dispatch, decode, promote, fetch, DIB
//! check, initialize.
//!
//! Architectural state is dependency-only: registers carry producer and
//! consumer identities, never values. Memory flows through the load and store
//! queues, with exact-address store-to-load forwarding and in-order store
//! release after retirement.

pub mod bru;
pub mod instruction;
pub mod lsq;

use std::collections::VecDeque;

use crate::channel::{ChannelId, Channels, RequestPacket, ResponsePacket};
use crate::common::addr::Address;
use crate::common::{AccessType, BranchType, LOG2_BLOCK_SIZE, STAT_PRINTING_PERIOD};
use crate::config::CpuConfig;
use crate::mem::lru_table::LruTable;
use crate::stats::CpuStats;

use self::bru::{BranchModuleSet, BtbSet};
use self::instruction::{OooInstr, Progress};
use self::lsq::LsqEntry;

type Dib = LruTable<u64, Box<dyn Fn(&u64) -> u64>, Box<dyn Fn(&u64) -> u64>>;

/// The out-of-order core.
pub struct O3Cpu {
    cpu: u32,

    input_queue: VecDeque<OooInstr>,
    ifetch_buffer: VecDeque<OooInstr>,
    decode_buffer: VecDeque<OooInstr>,
    dispatch_buffer: VecDeque<OooInstr>,
    rob: VecDeque<OooInstr>,
    lq: Vec<Option<LsqEntry>>,
    sq: VecDeque<LsqEntry>,

    dib: Dib,
    /// Last in-flight producer of each architectural register.
    reg_producers: Vec<Option<u64>>,

    in_queue_size: usize,
    ifetch_buffer_size: usize,
    decode_buffer_size: usize,
    dispatch_buffer_size: usize,
    rob_size: usize,
    sq_size: usize,
    fetch_width: usize,
    decode_width: usize,
    dispatch_width: usize,
    schedule_width: usize,
    execute_width: usize,
    lq_width: usize,
    sq_width: usize,
    retire_width: usize,
    mispredict_penalty: u64,
    decode_latency: u64,
    dispatch_latency: u64,
    schedule_latency: u64,
    execute_latency: u64,
    l1i_bandwidth: usize,
    l1d_bandwidth: usize,

    l1i_bus: ChannelId,
    l1d_bus: ChannelId,

    branch: BranchModuleSet,
    btb: BtbSet,
    /// Branches observed this tick, for the instruction cache's prefetcher.
    branch_notifications: Vec<(Address, BranchType, Address)>,

    fetch_resume_cycle: u64,
    num_retired: u64,
    current_cycle: u64,
    warmup: bool,
    show_heartbeat: bool,
    next_print_instruction: u64,

    /// Statistics for the current phase.
    pub stats: CpuStats,
}

impl O3Cpu {
    /// Creates a core attached to its instruction and data buses.
    pub fn new(config: &CpuConfig, cpu: u32, l1i_bus: ChannelId, l1d_bus: ChannelId) -> Self {
        let window = config.dib_window.max(1);
        let shamt = crate::common::lg2(window);
        let set_proj: Box<dyn Fn(&u64) -> u64> = Box::new(move |ip: &u64| ip >> shamt);
        let tag_proj: Box<dyn Fn(&u64) -> u64> = Box::new(move |ip: &u64| ip >> shamt);

        Self {
            cpu,
            input_queue: VecDeque::new(),
            ifetch_buffer: VecDeque::new(),
            decode_buffer: VecDeque::new(),
            dispatch_buffer: VecDeque::new(),
            rob: VecDeque::new(),
            lq: (0..config.lq_size).map(|_| None).collect(),
            sq: VecDeque::new(),
            dib: LruTable::new(config.dib_sets, config.dib_ways, set_proj, tag_proj),
            reg_producers: vec![None; crate::common::NUM_REGS],
            in_queue_size: 2 * config.fetch_width,
            ifetch_buffer_size: config.ifetch_buffer_size,
            decode_buffer_size: config.decode_buffer_size,
            dispatch_buffer_size: config.dispatch_buffer_size,
            rob_size: config.rob_size,
            sq_size: config.sq_size,
            fetch_width: config.fetch_width,
            decode_width: config.decode_width,
            dispatch_width: config.dispatch_width,
            schedule_width: config.schedule_width,
            execute_width: config.execute_width,
            lq_width: config.lq_width,
            sq_width: config.sq_width,
            retire_width: config.retire_width,
            mispredict_penalty: config.mispredict_penalty,
            decode_latency: config.decode_latency,
            dispatch_latency: config.dispatch_latency,
            schedule_latency: config.schedule_latency,
            execute_latency: config.execute_latency,
            l1i_bandwidth: config.l1i_bandwidth,
            l1d_bandwidth: config.l1d_bandwidth,
            l1i_bus,
            l1d_bus,
            branch: BranchModuleSet::build(&config.branch_predictors),
            btb: BtbSet::build(&config.btbs),
            branch_notifications: Vec::new(),
            fetch_resume_cycle: 0,
            num_retired: 0,
            current_cycle: 0,
            warmup: true,
            show_heartbeat: true,
            next_print_instruction: STAT_PRINTING_PERIOD,
            stats: CpuStats::default(),
        }
    }

    /// Initializes the attached modules.
    pub fn initialize(&mut self) {
        self.branch.initialize();
        self.btb.initialize();
    }

    /// Switches warmup mode on or off.
    pub fn set_warmup(&mut self, warmup: bool) {
        self.warmup = warmup;
    }

    /// Suppresses the heartbeat print.
    pub fn set_show_heartbeat(&mut self, show: bool) {
        self.show_heartbeat = show;
    }

    /// Instructions retired since construction.
    pub fn num_retired(&self) -> u64 {
        self.num_retired
    }

    /// Cycles elapsed since construction.
    pub fn current_cycle(&self) -> u64 {
        self.current_cycle
    }

    /// Free space in the input queue.
    pub fn input_space(&self) -> usize {
        self.in_queue_size.saturating_sub(self.input_queue.len())
    }

    /// Feeds one trace instruction into the input queue.
    pub fn push_input(&mut self, instr: OooInstr) {
        self.input_queue.push_back(instr);
    }

    /// True once every window and queue has emptied.
    pub fn is_drained(&self) -> bool {
        self.input_queue.is_empty()
            && self.ifetch_buffer.is_empty()
            && self.decode_buffer.is_empty()
            && self.dispatch_buffer.is_empty()
            && self.rob.is_empty()
            && self.sq.is_empty()
            && self.lq.iter().all(|slot| slot.is_none())
    }

    /// Reorder buffer occupancy.
    pub fn rob_occupancy(&self) -> usize {
        self.rob.len()
    }

    /// Instruction ids currently in the ROB, head first.
    pub fn rob_ids(&self) -> Vec<u64> {
        self.rob.iter().map(|instr| instr.instr_id).collect()
    }

    /// Drains the branches observed this tick.
    pub fn take_branch_notifications(&mut self) -> Vec<(Address, BranchType, Address)> {
        std::mem::take(&mut self.branch_notifications)
    }

    /// Snapshots the phase-begin counters and clears the phase stats.
    pub fn begin_phase(&mut self, name: &str) {
        self.stats = CpuStats {
            name: name.to_string(),
            begin_instrs: self.num_retired,
            begin_cycles: self.current_cycle,
            ..CpuStats::default()
        };
    }

    /// Snapshots the phase-end counters.
    pub fn end_phase(&mut self) {
        self.stats.end_instrs = self.num_retired;
        self.stats.end_cycles = self.current_cycle;
    }

    /// Advances the core by one tick.
    pub fn operate(&mut self, channels: &mut Channels) -> u64 {
        self.current_cycle += 1;
        let mut progress = 0u64;

        progress += self.retire_rob();
        progress += self.complete_inflight_instruction();
        progress += self.handle_memory_return(channels);
        progress += self.operate_lsq(channels);
        progress += self.schedule_memory_instruction();
        progress += self.execute_instruction();
        progress += self.schedule_instruction();
        progress += self.dispatch_instruction();
        progress += self.decode_instruction();
        progress += self.promote_to_decode();
        progress += self.fetch_instruction(channels);
        progress += self.check_dib();
        progress += self.initialize_instruction();

        progress
    }

    // ------------------------------------------------------------------
    // front end

    fn initialize_instruction(&mut self) -> u64 {
        let mut to_read = self
            .fetch_width
            .min(self.ifetch_buffer_size.saturating_sub(self.ifetch_buffer.len()));
        let mut progress = 0;

        while to_read > 0 && !self.input_queue.is_empty() {
            if self.fetch_resume_cycle > self.current_cycle {
                break;
            }
            let mut instr = self.input_queue.pop_front().unwrap();
            let stop_fetch = self.do_init_instruction(&mut instr);
            self.ifetch_buffer.push_back(instr);
            to_read -= 1;
            progress += 1;
            if stop_fetch {
                break;
            }
        }
        progress
    }

    /// Resolves dependencies and predicts the branch; returns whether fetch
    /// must stop for the rest of this cycle.
    fn do_init_instruction(&mut self, instr: &mut OooInstr) -> bool {
        instr.event_cycle = self.current_cycle;

        // Register dependencies against the last-producer map.
        for i in 0..instr.source_registers.len() {
            let reg = instr.source_registers[i] as usize;
            let Some(producer_id) = self.reg_producers[reg] else {
                continue;
            };
            let dependent_id = instr.instr_id;
            if let Some(producer) = self.find_instr_mut(producer_id) {
                if producer.executed != Progress::Completed {
                    if let Err(pos) = producer
                        .registers_instrs_depend_on_me
                        .binary_search(&dependent_id)
                    {
                        producer
                            .registers_instrs_depend_on_me
                            .insert(pos, dependent_id);
                        instr.num_reg_dependent += 1;
                    }
                }
            }
        }
        for &reg in &instr.destination_registers {
            self.reg_producers[reg as usize] = Some(instr.instr_id);
        }

        if !instr.is_branch {
            return false;
        }

        self.stats.total_branch_types[instr.branch_type.index()] += 1;
        self.branch_notifications
            .push((instr.ip, instr.branch_type, instr.branch_target));

        let (predicted_target, _btb_taken) = self.btb.predict(instr.ip);
        let predicted_taken = if instr.branch_type == BranchType::Conditional {
            self.branch.predict(instr.ip)
        } else {
            true
        };

        instr.branch_mispredicted = predicted_taken != instr.branch_taken
            || (instr.branch_taken && predicted_target != instr.branch_target);

        self.btb
            .update(instr.ip, instr.branch_target, instr.branch_taken, instr.branch_type);
        self.branch.last_branch_result(
            instr.ip,
            instr.branch_target,
            instr.branch_taken,
            instr.branch_type,
        );

        if instr.branch_mispredicted {
            self.stats.branch_type_misses[instr.branch_type.index()] += 1;
            self.stats.total_rob_occupancy_at_branch_mispredict += self.rob.len() as u64;
            if !self.warmup {
                self.fetch_resume_cycle = self.current_cycle + self.mispredict_penalty;
                return true;
            }
        }
        false
    }

    fn check_dib(&mut self) -> u64 {
        let mut budget = self.fetch_width;
        let mut progress = 0;
        for instr in self.ifetch_buffer.iter_mut() {
            if budget == 0 {
                break;
            }
            if instr.dib_checked {
                continue;
            }
            if self.dib.check_hit(&instr.ip.value()).is_some() {
                instr.dib_hit = true;
            }
            instr.dib_checked = true;
            budget -= 1;
            progress += 1;
        }
        progress
    }

    /// Sends instruction-cache reads, coalesced by cache line.
    fn fetch_instruction(&mut self, channels: &mut Channels) -> u64 {
        let mut bandwidth = self.l1i_bandwidth;
        let mut progress = 0;

        while bandwidth > 0 {
            let Some(pos) = self
                .ifetch_buffer
                .iter()
                .position(|instr| instr.fetched == Progress::NotStarted && !instr.fetch_issued)
            else {
                break;
            };
            let line = self.ifetch_buffer[pos].ip.slice_upper(LOG2_BLOCK_SIZE);
            let ip = self.ifetch_buffer[pos].ip;

            let dependents: Vec<u64> = self
                .ifetch_buffer
                .iter()
                .filter(|instr| {
                    !instr.fetch_issued && instr.ip.slice_upper(LOG2_BLOCK_SIZE) == line
                })
                .map(|instr| instr.instr_id)
                .collect();

            let packet = RequestPacket {
                address: ip,
                v_address: ip,
                ip,
                instr_id: dependents[0],
                cpu: self.cpu,
                ty: AccessType::Load,
                is_translated: false,
                response_requested: true,
                instr_depend_on_me: dependents.clone(),
                ..RequestPacket::default()
            };
            if !channels[self.l1i_bus].add_rq(packet) {
                break;
            }

            for instr in self.ifetch_buffer.iter_mut() {
                if dependents.binary_search(&instr.instr_id).is_ok() {
                    instr.fetch_issued = true;
                    instr.fetched = Progress::Inflight;
                }
            }
            bandwidth -= 1;
            progress += 1;
        }
        progress
    }

    fn promote_to_decode(&mut self) -> u64 {
        let mut budget = self
            .fetch_width
            .min(self.decode_buffer_size.saturating_sub(self.decode_buffer.len()));
        let mut progress = 0;

        while budget > 0 {
            let ready = self.ifetch_buffer.front().is_some_and(|instr| {
                instr.fetched == Progress::Completed && instr.event_cycle <= self.current_cycle
            });
            if !ready {
                break;
            }
            let mut instr = self.ifetch_buffer.pop_front().unwrap();
            instr.event_cycle = self.current_cycle
                + if self.warmup || instr.dib_hit {
                    0
                } else {
                    self.decode_latency
                };
            self.decode_buffer.push_back(instr);
            budget -= 1;
            progress += 1;
        }
        progress
    }

    fn decode_instruction(&mut self) -> u64 {
        let mut budget = self
            .decode_width
            .min(self.dispatch_buffer_size.saturating_sub(self.dispatch_buffer.len()));
        let mut progress = 0;

        while budget > 0 {
            let ready = self
                .decode_buffer
                .front()
                .is_some_and(|instr| instr.event_cycle <= self.current_cycle);
            if !ready {
                break;
            }
            let mut instr = self.decode_buffer.pop_front().unwrap();
            self.dib.fill(instr.ip.value());
            instr.event_cycle = self.current_cycle
                + if self.warmup { 0 } else { self.dispatch_latency };
            self.dispatch_buffer.push_back(instr);
            budget -= 1;
            progress += 1;
        }
        progress
    }

    fn dispatch_instruction(&mut self) -> u64 {
        let mut budget = self.dispatch_width;
        let mut progress = 0;

        while budget > 0 {
            let lq_free = self.lq.iter().filter(|slot| slot.is_none()).count();
            let sq_free = self.sq_size - self.sq.len();
            let ready = self.dispatch_buffer.front().is_some_and(|instr| {
                instr.event_cycle <= self.current_cycle
                    && self.rob.len() < self.rob_size
                    && instr.source_memory.len() <= lq_free
                    && instr.destination_memory.len() <= sq_free
            });
            if !ready {
                break;
            }
            let instr = self.dispatch_buffer.pop_front().unwrap();
            self.rob.push_back(instr);
            budget -= 1;
            progress += 1;
        }
        progress
    }

    // ------------------------------------------------------------------
    // back end

    fn schedule_instruction(&mut self) -> u64 {
        let mut search_bw = self.schedule_width;
        let mut progress = 0;
        let cycle = self.current_cycle + if self.warmup { 0 } else { self.schedule_latency };

        for instr in self.rob.iter_mut() {
            if search_bw == 0 {
                break;
            }
            if !instr.scheduled {
                instr.scheduled = true;
                instr.event_cycle = cycle;
                progress += 1;
            }
            if instr.executed == Progress::NotStarted {
                search_bw -= 1;
            }
        }
        progress
    }

    fn schedule_memory_instruction(&mut self) -> u64 {
        let mut search_bw = self.schedule_width;
        let mut progress = 0;

        for idx in 0..self.rob.len() {
            if search_bw == 0 {
                break;
            }
            let needs_lsq = {
                let instr = &self.rob[idx];
                instr.scheduled && instr.num_mem_ops() > 0 && !instr.lsq_allocated
            };
            if needs_lsq {
                let lq_free = self.lq.iter().filter(|slot| slot.is_none()).count();
                let sq_free = self.sq_size - self.sq.len();
                let instr = &self.rob[idx];
                if instr.source_memory.len() <= lq_free
                    && instr.destination_memory.len() <= sq_free
                {
                    self.do_memory_scheduling(idx);
                    progress += 1;
                }
            }
            if self.rob[idx].executed == Progress::NotStarted {
                search_bw -= 1;
            }
        }
        progress
    }

    /// Allocates LQ/SQ entries for the instruction at `rob[idx]`, applying
    /// store-to-load forwarding against the youngest older matching store.
    fn do_memory_scheduling(&mut self, idx: usize) {
        let instr_id = self.rob[idx].instr_id;
        let ip = self.rob[idx].ip;
        let event_cycle =
            self.current_cycle + if self.warmup { 0 } else { self.schedule_latency };
        let asid = [self.cpu as u8, self.cpu as u8];

        let sources = self.rob[idx].source_memory.clone();
        for smem in sources {
            let slot = self
                .lq
                .iter()
                .position(|entry| entry.is_none())
                .expect("load queue slot available (checked by caller)");
            let mut entry = LsqEntry::new(instr_id, smem, ip, asid);
            entry.event_cycle = event_cycle;

            // Youngest older store to the same address.
            let producer = self
                .sq
                .iter_mut()
                .filter(|sq_entry| {
                    sq_entry.virtual_address == smem && sq_entry.instr_id < instr_id
                })
                .max_by_key(|sq_entry| sq_entry.instr_id);

            match producer {
                Some(sq_entry) if sq_entry.fetch_issued => {
                    // Store already finished: forward immediately.
                    self.rob[idx].completed_mem_ops += 1;
                }
                Some(sq_entry) => {
                    entry.producer_id = Some(sq_entry.instr_id);
                    sq_entry.lq_depend_on_me.push(slot);
                    self.lq[slot] = Some(entry);
                }
                None => {
                    self.lq[slot] = Some(entry);
                }
            }
        }

        let destinations = self.rob[idx].destination_memory.clone();
        for dmem in destinations {
            let mut entry = LsqEntry::new(instr_id, dmem, ip, asid);
            entry.event_cycle = event_cycle;
            self.sq.push_back(entry);
        }

        self.rob[idx].lsq_allocated = true;
    }

    fn execute_instruction(&mut self) -> u64 {
        let mut exec_bw = self.execute_width;
        let mut progress = 0;
        let cycle = self.current_cycle + if self.warmup { 0 } else { self.execute_latency };

        for instr in self.rob.iter_mut() {
            if exec_bw == 0 {
                break;
            }
            if instr.scheduled
                && instr.executed == Progress::NotStarted
                && instr.event_cycle <= self.current_cycle
                && instr.num_reg_dependent == 0
            {
                instr.executed = Progress::Inflight;
                instr.event_cycle = cycle;
                exec_bw -= 1;
                progress += 1;
            }
        }
        progress
    }

    fn operate_lsq(&mut self, channels: &mut Channels) -> u64 {
        let mut progress = 0;
        let mut store_bw = self.sq_width;

        // Finish stores whose value is ready; this wakes forwarded loads.
        let mut idx = 0;
        while store_bw > 0 && idx < self.sq.len() {
            let ready = {
                let entry = &self.sq[idx];
                !entry.fetch_issued && entry.event_cycle <= self.current_cycle
            };
            if ready {
                self.do_finish_store(idx);
                self.sq[idx].fetch_issued = true;
                self.sq[idx].event_cycle = self.current_cycle;
                store_bw -= 1;
                progress += 1;
            }
            idx += 1;
        }

        // Release retired stores to the data cache, in order.
        let head_id = self
            .rob
            .front()
            .map_or(u64::MAX, |instr| instr.instr_id);
        while store_bw > 0 {
            let releasable = self.sq.front().is_some_and(|entry| {
                entry.fetch_issued
                    && entry.instr_id < head_id
                    && entry.event_cycle <= self.current_cycle
            });
            if !releasable {
                break;
            }
            let entry = self.sq.front().unwrap();
            let packet = RequestPacket {
                address: entry.virtual_address,
                v_address: entry.virtual_address,
                ip: entry.ip,
                instr_id: entry.instr_id,
                cpu: self.cpu,
                asid: entry.asid,
                ty: AccessType::Write,
                is_translated: false,
                response_requested: false,
                ..RequestPacket::default()
            };
            if !channels[self.l1d_bus].add_wq(packet) {
                break;
            }
            self.sq.pop_front();
            store_bw -= 1;
            progress += 1;
        }

        // Issue ready loads.
        let mut load_bw = self.lq_width;
        for slot in 0..self.lq.len() {
            if load_bw == 0 {
                break;
            }
            let issue = self.lq[slot].as_ref().is_some_and(|entry| {
                entry.producer_id.is_none()
                    && !entry.fetch_issued
                    && entry.event_cycle < self.current_cycle
            });
            if !issue {
                continue;
            }
            let entry = self.lq[slot].as_ref().unwrap();
            let packet = RequestPacket {
                address: entry.virtual_address,
                v_address: entry.virtual_address,
                ip: entry.ip,
                instr_id: entry.instr_id,
                cpu: self.cpu,
                asid: entry.asid,
                ty: AccessType::Load,
                is_translated: false,
                response_requested: true,
                instr_depend_on_me: vec![entry.instr_id],
                ..RequestPacket::default()
            };
            if channels[self.l1d_bus].add_rq(packet) {
                self.lq[slot].as_mut().unwrap().fetch_issued = true;
                load_bw -= 1;
                progress += 1;
            }
        }

        progress
    }

    /// Marks the store's memory op complete and forwards to waiting loads.
    fn do_finish_store(&mut self, sq_idx: usize) {
        let store_id = self.sq[sq_idx].instr_id;
        let dependents = std::mem::take(&mut self.sq[sq_idx].lq_depend_on_me);

        self.complete_mem_op(store_id);

        for slot in dependents {
            let Some(lq_entry) = self.lq[slot].take() else {
                continue;
            };
            debug_assert_eq!(lq_entry.producer_id, Some(store_id));
            self.complete_mem_op(lq_entry.instr_id);
        }
    }

    /// Credits one completed memory operation to a ROB instruction.
    fn complete_mem_op(&mut self, instr_id: u64) {
        if let Some(instr) = self.find_rob_mut(instr_id) {
            instr.completed_mem_ops += 1;
            debug_assert!(instr.completed_mem_ops <= instr.num_mem_ops());
        }
    }

    fn handle_memory_return(&mut self, channels: &mut Channels) -> u64 {
        let mut progress = 0;

        // Instruction cache returns.
        let mut l1i_returns = 0;
        while l1i_returns < self.l1i_bandwidth {
            let Some(response) = channels[self.l1i_bus].returned.pop_front() else {
                break;
            };
            self.finish_fetch(&response);
            l1i_returns += 1;
            progress += 1;
        }

        // Data cache returns.
        let mut l1d_returns = 0;
        while l1d_returns < self.l1d_bandwidth {
            let Some(response) = channels[self.l1d_bus].returned.pop_front() else {
                break;
            };
            self.finish_load(&response);
            l1d_returns += 1;
            progress += 1;
        }

        progress
    }

    fn finish_fetch(&mut self, response: &ResponsePacket) {
        let line = response.v_address.slice_upper(LOG2_BLOCK_SIZE);
        for instr in self.ifetch_buffer.iter_mut() {
            if instr.fetched == Progress::Inflight
                && response.instr_depend_on_me.binary_search(&instr.instr_id).is_ok()
                && instr.ip.slice_upper(LOG2_BLOCK_SIZE) == line
            {
                instr.fetched = Progress::Completed;
            }
        }
    }

    fn finish_load(&mut self, response: &ResponsePacket) {
        let line = response.v_address.slice_upper(LOG2_BLOCK_SIZE);
        for slot in 0..self.lq.len() {
            let matches = self.lq[slot].as_ref().is_some_and(|entry| {
                entry.fetch_issued
                    && entry.virtual_address.slice_upper(LOG2_BLOCK_SIZE) == line
            });
            if matches {
                let entry = self.lq[slot].take().unwrap();
                self.complete_mem_op(entry.instr_id);
            }
        }
    }

    fn complete_inflight_instruction(&mut self) -> u64 {
        let mut complete_bw = self.execute_width;
        let mut progress = 0;

        let mut idx = 0;
        while complete_bw > 0 && idx < self.rob.len() {
            let done = {
                let instr = &self.rob[idx];
                instr.executed == Progress::Inflight
                    && instr.event_cycle <= self.current_cycle
                    && instr.mem_ops_complete()
            };
            if done {
                self.do_complete_execution(idx);
                complete_bw -= 1;
                progress += 1;
            }
            idx += 1;
        }
        progress
    }

    fn do_complete_execution(&mut self, idx: usize) {
        self.rob[idx].executed = Progress::Completed;
        let dependents = self.rob[idx].registers_instrs_depend_on_me.clone();

        for dependent_id in dependents {
            if let Some(dependent) = self.find_instr_mut(dependent_id) {
                debug_assert!(dependent.num_reg_dependent > 0);
                dependent.num_reg_dependent -= 1;
            }
        }
    }

    fn retire_rob(&mut self) -> u64 {
        let mut progress = 0;
        let mut budget = self.retire_width;

        while budget > 0 {
            let done = self
                .rob
                .front()
                .is_some_and(|instr| instr.executed == Progress::Completed);
            if !done {
                break;
            }
            let instr = self.rob.pop_front().unwrap();
            assert!(
                instr.mem_ops_complete(),
                "retiring instruction {} with incomplete memory ops",
                instr.instr_id
            );
            self.num_retired += 1;
            budget -= 1;
            progress += 1;

            if self.show_heartbeat && self.num_retired >= self.next_print_instruction {
                let cycles = self.current_cycle.max(1);
                println!(
                    "Heartbeat CPU {} instructions: {} cycles: {} cumulative IPC: {:.4}",
                    self.cpu,
                    self.num_retired,
                    self.current_cycle,
                    self.num_retired as f64 / cycles as f64
                );
                self.next_print_instruction += STAT_PRINTING_PERIOD;
            }
        }
        progress
    }

    // ------------------------------------------------------------------
    // lookup helpers

    /// Finds a ROB entry by id (the ROB is sorted by id).
    fn find_rob_mut(&mut self, instr_id: u64) -> Option<&mut OooInstr> {
        let idx = self.rob.partition_point(|instr| instr.instr_id < instr_id);
        if self
            .rob
            .get(idx)
            .is_some_and(|instr| instr.instr_id == instr_id)
        {
            self.rob.get_mut(idx)
        } else {
            None
        }
    }

    /// Finds an in-flight instruction by id in any window.
    fn find_instr_mut(&mut self, instr_id: u64) -> Option<&mut OooInstr> {
        if self
            .rob
            .iter()
            .any(|instr| instr.instr_id == instr_id)
        {
            return self.find_rob_mut(instr_id);
        }
        self.dispatch_buffer
            .iter_mut()
            .chain(self.decode_buffer.iter_mut())
            .chain(self.ifetch_buffer.iter_mut())
            .find(|instr| instr.instr_id == instr_id)
    }

    /// Dumps the pipeline heads for deadlock diagnosis.
    pub fn print_deadlock(&self) {
        match self.rob.front() {
            Some(instr) => println!(
                "ROB head instr_id: {} ip: {} fetched: {:?} scheduled: {} executed: {:?} num_reg_dependent: {} mem_ops: {}/{} event: {}",
                instr.instr_id,
                instr.ip,
                instr.fetched,
                instr.scheduled,
                instr.executed,
                instr.num_reg_dependent,
                instr.completed_mem_ops,
                instr.num_mem_ops(),
                instr.event_cycle
            ),
            None => println!("ROB empty"),
        }

        match self.lq.iter().flatten().next() {
            Some(entry) => println!(
                "LQ head instr_id: {} address: {} fetch_issued: {} producer: {:?}",
                entry.instr_id, entry.virtual_address, entry.fetch_issued, entry.producer_id
            ),
            None => println!("LQ empty"),
        }

        match self.sq.front() {
            Some(entry) => println!(
                "SQ head instr_id: {} address: {} fetch_issued: {}",
                entry.instr_id, entry.virtual_address, entry.fetch_issued
            ),
            None => println!("SQ empty"),
        }
    }
}
