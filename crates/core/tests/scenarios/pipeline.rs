//! Out-of-order pipeline scenarios, driven with scripted memories standing in
//! for the instruction and data caches.

use o3sim_core::channel::{Channel, Channels};
use o3sim_core::common::{
    BranchType, REG_INSTRUCTION_POINTER, REG_STACK_POINTER,
};
use o3sim_core::config::CpuConfig;
use o3sim_core::core::instruction::{OooInstr, TraceRecord};
use o3sim_core::core::O3Cpu;
use o3sim_core::sim::TraceSource;

use crate::common::MockMemory;

struct CpuBench {
    channels: Channels,
    cpu: O3Cpu,
    l1i: MockMemory,
    l1d: MockMemory,
}

impl CpuBench {
    fn new() -> Self {
        let mut channels = Channels::new();
        let l1i_bus = channels.add(Channel::new(64, 8, 64, 6, true));
        let l1d_bus = channels.add(Channel::new(64, 8, 64, 6, true));
        let mut cpu = O3Cpu::new(&CpuConfig::default(), 0, l1i_bus, l1d_bus);
        cpu.initialize();
        cpu.set_warmup(false);
        cpu.set_show_heartbeat(false);
        Self {
            channels,
            cpu,
            l1i: MockMemory::new(l1i_bus, 2),
            l1d: MockMemory::new(l1d_bus, 4),
        }
    }

    fn tick(&mut self) {
        self.l1i.operate(&mut self.channels);
        self.l1d.operate(&mut self.channels);
        self.cpu.operate(&mut self.channels);
    }

    /// Runs until `goal` instructions retired or `max_ticks` elapsed.
    fn run_until_retired(&mut self, goal: u64, max_ticks: u64) {
        for _ in 0..max_ticks {
            if self.cpu.num_retired() >= goal {
                return;
            }
            self.tick();
        }
    }
}

fn simple(ip: u64) -> TraceRecord {
    let mut record = TraceRecord {
        ip,
        ..TraceRecord::default()
    };
    record.destination_registers[0] = 1;
    record.source_registers[0] = 2;
    record
}

fn load(ip: u64, address: u64) -> TraceRecord {
    let mut record = simple(ip);
    record.source_memory[0] = address;
    record
}

fn store(ip: u64, address: u64) -> TraceRecord {
    let mut record = simple(ip);
    record.destination_memory[0] = address;
    record
}

fn instrs(records: &[TraceRecord]) -> Vec<OooInstr> {
    let mut source = TraceSource::new(Box::new(records.to_vec().into_iter()));
    let mut out = Vec::new();
    while let Some(instr) = source.next_instr() {
        out.push(instr);
    }
    out
}

/// Straight-line code retires completely and in program order, and the ROB
/// stays sorted by instruction id throughout.
#[test]
fn straight_line_code_retires_in_order() {
    let mut bench = CpuBench::new();
    let records: Vec<TraceRecord> = (0..50).map(|i| simple(0x1000 + i * 4)).collect();
    for instr in instrs(&records) {
        bench.cpu.push_input(instr);
    }

    let mut last_retired = 0;
    for _ in 0..2000 {
        bench.tick();
        let ids = bench.cpu.rob_ids();
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "ROB must stay sorted");
        assert!(bench.cpu.num_retired() >= last_retired);
        last_retired = bench.cpu.num_retired();
        if bench.cpu.num_retired() == 50 {
            break;
        }
    }
    assert_eq!(bench.cpu.num_retired(), 50);
    assert!(bench.cpu.is_drained());
}

/// A load to the address of an in-flight older store forwards from the store
/// queue and never reads the data cache.
#[test]
fn store_forwards_to_younger_load() {
    let mut bench = CpuBench::new();
    let target = 0x8000_0040u64;
    let records = vec![
        simple(0x1000),
        store(0x1004, target),
        load(0x1008, target),
        simple(0x100c),
    ];
    for instr in instrs(&records) {
        bench.cpu.push_input(instr);
    }

    bench.run_until_retired(4, 2000);
    assert_eq!(bench.cpu.num_retired(), 4);

    let target_block = target >> 6;
    let read_blocks: Vec<u64> = bench
        .l1d
        .addresses
        .iter()
        .map(|a| a.value() >> 6)
        .collect();
    assert!(
        !read_blocks.contains(&target_block),
        "forwarded load must not read the cache"
    );
    // The store's write is released after retirement.
    assert!(bench
        .l1d
        .write_addresses
        .iter()
        .any(|a| a.value() >> 6 == target_block));
}

/// A load to a different address than the older store issues a real read.
#[test]
fn unrelated_load_reads_the_cache() {
    let mut bench = CpuBench::new();
    let records = vec![store(0x1004, 0x9000_0000), load(0x1008, 0xa000_0000)];
    for instr in instrs(&records) {
        bench.cpu.push_input(instr);
    }

    bench.run_until_retired(2, 2000);
    assert_eq!(bench.cpu.num_retired(), 2);
    assert!(bench
        .l1d
        .addresses
        .iter()
        .any(|a| a.value() >> 6 == 0xa000_0000 >> 6));
}

/// A cold taken branch mispredicts; the front end records the outcome by
/// branch type.
#[test]
fn cold_taken_branch_mispredicts() {
    let mut bench = CpuBench::new();
    let mut branch = TraceRecord {
        ip: 0x1000,
        is_branch: true,
        branch_taken: true,
        ..TraceRecord::default()
    };
    branch.source_registers[0] = REG_INSTRUCTION_POINTER;
    branch.destination_registers[0] = REG_INSTRUCTION_POINTER;
    let records = vec![branch, simple(0x4000), simple(0x4004)];
    for instr in instrs(&records) {
        bench.cpu.push_input(instr);
    }

    bench.run_until_retired(3, 2000);
    assert_eq!(bench.cpu.num_retired(), 3);
    let idx = BranchType::DirectJump.index();
    assert_eq!(bench.cpu.stats.total_branch_types[idx], 1);
    assert_eq!(bench.cpu.stats.branch_type_misses[idx], 1);
}

/// Returns classify from the operand signature and pair with their calls.
#[test]
fn call_and_return_classify_and_retire() {
    let mut bench = CpuBench::new();

    let mut call = TraceRecord {
        ip: 0x1000,
        is_branch: true,
        branch_taken: true,
        ..TraceRecord::default()
    };
    call.source_registers[0] = REG_INSTRUCTION_POINTER;
    call.source_registers[1] = REG_STACK_POINTER;
    call.destination_registers[0] = REG_INSTRUCTION_POINTER;
    call.destination_registers[1] = REG_STACK_POINTER;
    call.destination_memory[0] = 0x7fff_ff00;

    let mut ret = TraceRecord {
        ip: 0x4000,
        is_branch: true,
        branch_taken: true,
        ..TraceRecord::default()
    };
    ret.source_registers[0] = REG_INSTRUCTION_POINTER;
    ret.source_registers[1] = REG_STACK_POINTER;
    ret.destination_registers[0] = REG_INSTRUCTION_POINTER;
    ret.source_memory[0] = 0x7fff_ff00;

    let records = vec![call, ret, simple(0x1005)];
    for instr in instrs(&records) {
        bench.cpu.push_input(instr);
    }

    bench.run_until_retired(3, 4000);
    assert_eq!(bench.cpu.num_retired(), 3);
    assert_eq!(
        bench.cpu.stats.total_branch_types[BranchType::DirectCall.index()],
        1
    );
    assert_eq!(
        bench.cpu.stats.total_branch_types[BranchType::Return.index()],
        1
    );
}
