//! Harness: component wiring, trace intake, and the run loop.
//!
//! The harness owns the channel arena and every component. It builds the
//! standard single-core topology:
//!
//! ```text
//! CPU ── L1I ─┬─ L2C ── LLC ── DRAM
//!     ── L1D ─┘
//!      L1I ── ITLB ─┬─ STLB ── PTW ── (L1D)
//!      L1D ── DTLB ─┘
//! ```
//!
//! Components register on the clock bus in a fixed order (CPU, caches from
//! the core outward, PTW, DRAM); coincident ticks dispatch in that order,
//! which is the sole source of determinism. Each global tick the harness
//! refills the CPU input queue from the trace, dispatches due components,
//! relays retired-branch notifications to the instruction cache's
//! prefetcher, and watches the no-progress window.

use crate::channel::{Channel, Channels};
use crate::config::Config;
use crate::core::instruction::{OooInstr, TraceRecord};
use crate::core::O3Cpu;
use crate::mem::cache::Cache;
use crate::mem::dram::MemController;
use crate::mem::ptw::PageTableWalker;
use crate::mem::vmem::VirtualMemory;
use crate::sim::engine::{ClockBus, EngineStatus, OperableId};

/// Cache indices in the harness, in registration order.
const L1I: usize = 0;
const L1D: usize = 1;
const ITLB: usize = 2;
const DTLB: usize = 3;
const L2C: usize = 4;
const STLB: usize = 5;
const LLC: usize = 6;

/// Adapts a record iterator into numbered instructions with branch targets.
///
/// A taken branch's target is the next record's IP, so decoding runs one
/// record ahead.
pub struct TraceSource {
    records: Box<dyn Iterator<Item = TraceRecord>>,
    pending: Option<OooInstr>,
    next_id: u64,
}

impl TraceSource {
    /// Wraps a record iterator.
    pub fn new(records: Box<dyn Iterator<Item = TraceRecord>>) -> Self {
        Self {
            records,
            pending: None,
            next_id: 1,
        }
    }

    /// Produces the next instruction, or `None` at end of trace.
    pub fn next_instr(&mut self) -> Option<OooInstr> {
        if self.pending.is_none() {
            let record = self.records.next()?;
            self.pending = Some(OooInstr::from_record(self.next_id, &record));
            self.next_id += 1;
        }

        let lookahead = self.records.next().map(|record| {
            let instr = OooInstr::from_record(self.next_id, &record);
            self.next_id += 1;
            instr
        });

        let mut out = self.pending.take().unwrap();
        if let Some(next) = lookahead {
            if out.is_branch && out.branch_taken {
                out.branch_target = next.ip;
            }
            self.pending = Some(next);
        }
        Some(out)
    }
}

/// Outcome of a full simulation.
#[derive(Clone, Copy, Debug)]
pub struct SimulationResult {
    /// The simulation stalled and was aborted.
    pub deadlock: bool,
    /// Instructions retired in the measured phase.
    pub retired: u64,
    /// Cycles elapsed in the measured phase.
    pub cycles: u64,
}

enum Part {
    Cpu,
    Cache(usize),
    Ptw,
    Dram,
}

/// The assembled single-core system.
pub struct Harness {
    channels: Channels,
    bus: ClockBus,
    parts: Vec<Part>,
    cpu: O3Cpu,
    caches: Vec<Cache>,
    ptw: PageTableWalker,
    dram: MemController,
    warmup_instructions: u64,
    simulation_instructions: u64,
}

impl Harness {
    /// Wires the standard topology from a configuration.
    pub fn new(config: &Config, warmup_instructions: u64, simulation_instructions: u64) -> Self {
        let mut channels = Channels::new();
        fn ch(channels: &mut Channels, cfg: &crate::config::CacheConfig) -> crate::channel::ChannelId {
            channels.add(Channel::new(
                cfg.rq_size,
                cfg.pq_size,
                cfg.wq_size,
                cfg.offset_bits,
                cfg.match_offset_bits,
            ))
        }

        let cpu_to_l1i = ch(&mut channels, &config.l1i);
        let cpu_to_l1d = ch(&mut channels, &config.l1d);
        let l1i_to_l2c = ch(&mut channels, &config.l2c);
        let l1d_to_l2c = ch(&mut channels, &config.l2c);
        let l2c_to_llc = ch(&mut channels, &config.llc);
        // DRAM queues are modelled inside the controller; the channel in
        // front of it is sized to match.
        let llc_to_dram = channels.add(Channel::new(
            config.dram.rq_size,
            config.dram.rq_size,
            config.dram.wq_size,
            crate::common::LOG2_BLOCK_SIZE,
            false,
        ));
        let l1i_to_itlb = ch(&mut channels, &config.itlb);
        let l1d_to_dtlb = ch(&mut channels, &config.dtlb);
        let itlb_to_stlb = ch(&mut channels, &config.stlb);
        let dtlb_to_stlb = ch(&mut channels, &config.stlb);
        let stlb_to_ptw = channels.add(Channel::new(
            config.ptw.mshr_size,
            0,
            0,
            crate::common::LOG2_PAGE_SIZE,
            false,
        ));
        let ptw_to_l1d = ch(&mut channels, &config.l1d);

        let cpu = O3Cpu::new(&config.cpu, 0, cpu_to_l1i, cpu_to_l1d);

        let caches = vec![
            Cache::new(
                &config.l1i,
                0,
                vec![cpu_to_l1i],
                l1i_to_l2c,
                Some(l1i_to_itlb),
            ),
            Cache::new(
                &config.l1d,
                0,
                vec![cpu_to_l1d, ptw_to_l1d],
                l1d_to_l2c,
                Some(l1d_to_dtlb),
            ),
            Cache::new(&config.itlb, 0, vec![l1i_to_itlb], itlb_to_stlb, None),
            Cache::new(&config.dtlb, 0, vec![l1d_to_dtlb], dtlb_to_stlb, None),
            Cache::new(
                &config.l2c,
                0,
                vec![l1i_to_l2c, l1d_to_l2c],
                l2c_to_llc,
                None,
            ),
            Cache::new(
                &config.stlb,
                0,
                vec![itlb_to_stlb, dtlb_to_stlb],
                stlb_to_ptw,
                None,
            ),
            Cache::new(&config.llc, 0, vec![l2c_to_llc], llc_to_dram, None),
        ];

        let vmem = VirtualMemory::new(&config.vmem, config.dram.size_bytes());
        let ptw = PageTableWalker::new("PTW", 0, &config.ptw, vmem, vec![stlb_to_ptw], ptw_to_l1d);
        let dram = MemController::new(&config.dram, vec![llc_to_dram]);

        // Registration order fixes the dispatch order for coincident ticks.
        let mut bus = ClockBus::new();
        let mut parts = Vec::new();
        bus.register(config.cpu.period);
        parts.push(Part::Cpu);
        for (idx, cache_config) in [
            &config.l1i,
            &config.l1d,
            &config.itlb,
            &config.dtlb,
            &config.l2c,
            &config.stlb,
            &config.llc,
        ]
        .iter()
        .enumerate()
        {
            bus.register(cache_config.period);
            parts.push(Part::Cache(idx));
        }
        bus.register(config.ptw.period);
        parts.push(Part::Ptw);
        bus.register(config.dram.period);
        parts.push(Part::Dram);

        let mut harness = Self {
            channels,
            bus,
            parts,
            cpu,
            caches,
            ptw,
            dram,
            warmup_instructions,
            simulation_instructions,
        };
        harness.cpu.initialize();
        for cache in &mut harness.caches {
            cache.initialize();
        }
        harness
    }

    /// The assembled core, for inspection.
    pub fn cpu(&self) -> &O3Cpu {
        &self.cpu
    }

    /// A cache by harness index (0 = L1I, 1 = L1D, ..., 6 = LLC).
    pub fn cache(&self, idx: usize) -> &Cache {
        &self.caches[idx]
    }

    fn set_warmup(&mut self, warmup: bool) {
        self.cpu.set_warmup(warmup);
        for cache in &mut self.caches {
            cache.set_warmup(warmup);
        }
        self.ptw.set_warmup(warmup);
        self.dram.set_warmup(warmup);
    }

    fn dispatch(&mut self, id: OperableId) -> u64 {
        match self.parts[id.0] {
            Part::Cpu => self.cpu.operate(&mut self.channels),
            Part::Cache(idx) => self.caches[idx].operate(&mut self.channels),
            Part::Ptw => self.ptw.operate(&mut self.channels),
            Part::Dram => self.dram.operate(&mut self.channels),
        }
    }

    /// Runs the warmup phase then the measured phase.
    ///
    /// The run ends when the retirement goal is met, when the trace is
    /// exhausted and the pipeline has drained, or on deadlock (in which case
    /// every component dumps its state).
    pub fn run(&mut self, trace: &mut TraceSource) -> SimulationResult {
        self.set_warmup(true);
        if self.run_phase(trace, self.warmup_instructions) {
            return self.abort();
        }

        self.set_warmup(false);
        self.cpu.begin_phase("CPU 0");
        for cache in &mut self.caches {
            cache.begin_phase();
        }
        self.dram.begin_phase();
        self.channels.reset_stats();
        if self.run_phase(trace, self.simulation_instructions) {
            return self.abort();
        }
        self.cpu.end_phase();

        SimulationResult {
            deadlock: false,
            retired: self.cpu.stats.instrs(),
            cycles: self.cpu.stats.cycles(),
        }
    }

    /// Runs until `goal_instrs` more instructions retire. Returns true on
    /// deadlock.
    fn run_phase(&mut self, trace: &mut TraceSource, goal_instrs: u64) -> bool {
        let goal = self.cpu.num_retired() + goal_instrs;
        let mut trace_done = false;

        while self.cpu.num_retired() < goal {
            while self.cpu.input_space() > 0 && !trace_done {
                match trace.next_instr() {
                    Some(instr) => self.cpu.push_input(instr),
                    None => trace_done = true,
                }
            }
            if trace_done && self.cpu.is_drained() {
                break;
            }

            let (_, due) = self.bus.advance();
            let mut progress = 0;
            for id in due {
                progress += self.dispatch(id);
            }

            for (ip, ty, target) in self.cpu.take_branch_notifications() {
                self.caches[L1I].branch_operate(ip, ty, target);
            }

            if self.bus.note_progress(progress) == EngineStatus::Deadlocked {
                return true;
            }
        }
        false
    }

    fn abort(&mut self) -> SimulationResult {
        self.print_deadlock();
        SimulationResult {
            deadlock: true,
            retired: self.cpu.num_retired(),
            cycles: self.cpu.current_cycle(),
        }
    }

    /// Dumps every component's state.
    pub fn print_deadlock(&self) {
        println!("*** DEADLOCK at global time {} ***", self.bus.global_time());
        self.cpu.print_deadlock();
        for cache in &self.caches {
            cache.print_deadlock(&self.channels);
        }
        self.ptw.print_deadlock();
        self.dram.print_deadlock();
    }

    /// Prints the final report.
    pub fn print_report(&self) {
        println!("\n=== Simulation complete ===");
        self.cpu.stats.print();
        println!();
        for idx in [L1I, L1D, L2C, LLC, ITLB, DTLB, STLB] {
            self.caches[idx].stats.print();
        }
        println!();
        for stats in self.dram.channel_stats() {
            stats.print();
        }
        for cache in &self.caches {
            cache.final_stats();
        }
    }
}
