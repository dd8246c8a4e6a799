//! End-to-end run: the full topology retires a synthetic trace.

use o3sim_core::config::Config;
use o3sim_core::core::instruction::TraceRecord;
use o3sim_core::sim::{Harness, TraceSource};

/// A small synthetic workload: straight-line code with a strided load
/// stream, occasional stores, and a periodic taken branch.
fn synthetic_trace(len: u64) -> Vec<TraceRecord> {
    let mut records = Vec::new();
    for i in 0..len {
        let ip = 0x40_0000 + (i % 256) * 4;
        let mut record = TraceRecord {
            ip,
            ..TraceRecord::default()
        };
        record.destination_registers[0] = ((i % 20) + 1) as u8;
        record.source_registers[0] = ((i % 7) + 1) as u8;
        if i % 7 == 3 {
            record.source_memory[0] = 0x10_0000 + (i % 64) * 64;
        }
        if i % 11 == 5 {
            record.destination_memory[0] = 0x20_0000 + (i % 32) * 64;
        }
        if i % 16 == 15 {
            record.is_branch = true;
            record.branch_taken = true;
            record.source_registers[1] = o3sim_core::common::REG_INSTRUCTION_POINTER;
            record.destination_registers[1] = o3sim_core::common::REG_INSTRUCTION_POINTER;
        }
        records.push(record);
    }
    records
}

/// The whole machine — core, caches, TLBs, PTW, DRAM — retires every
/// instruction of a synthetic trace without deadlocking.
#[test]
fn full_machine_retires_a_synthetic_trace() {
    let trace_len = 500;
    let mut trace = TraceSource::new(Box::new(synthetic_trace(trace_len).into_iter()));
    let mut harness = Harness::new(&Config::standard(), 0, trace_len);

    let result = harness.run(&mut trace);
    assert!(!result.deadlock, "simulation must not deadlock");
    assert_eq!(result.retired, trace_len);
    assert!(result.cycles > 0);

    // The hierarchy actually saw traffic.
    assert!(harness.cache(0).stats.total_hits() + harness.cache(0).stats.total_misses() > 0);
    assert!(harness.cache(1).stats.total_hits() + harness.cache(1).stats.total_misses() > 0);
}

/// Warmup runs ahead of measurement: measured cycles cover only the second
/// phase.
#[test]
fn warmup_precedes_measurement() {
    let mut trace = TraceSource::new(Box::new(synthetic_trace(600).into_iter()));
    let mut harness = Harness::new(&Config::standard(), 200, 300);

    let result = harness.run(&mut trace);
    assert!(!result.deadlock);
    // Retirement can overshoot a goal by up to the retire width.
    assert!(result.retired >= 300);
    assert!(harness.cpu().num_retired() >= 500);
}
