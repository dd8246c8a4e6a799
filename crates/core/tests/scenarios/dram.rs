//! DRAM channel scenarios: row-buffer reuse and warmup behavior.

use o3sim_core::channel::{Channel, Channels, RequestPacket};
use o3sim_core::common::addr::{lg2, Address};
use o3sim_core::common::{AccessType, BLOCK_SIZE, LOG2_BLOCK_SIZE};
use o3sim_core::config::DramConfig;
use o3sim_core::mem::dram::MemController;

struct DramBench {
    channels: Channels,
    controller: MemController,
    upper: o3sim_core::channel::ChannelId,
    cycle: u64,
    returns: Vec<(Address, u64)>,
}

impl DramBench {
    fn new(config: &DramConfig, warmup: bool) -> Self {
        let mut channels = Channels::new();
        let upper = channels.add(Channel::new(64, 64, 64, LOG2_BLOCK_SIZE, false));
        let mut controller = MemController::new(config, vec![upper]);
        controller.set_warmup(warmup);
        Self {
            channels,
            controller,
            upper,
            cycle: 0,
            returns: Vec::new(),
        }
    }

    fn issue_read(&mut self, address: u64, instr_id: u64) -> bool {
        let packet = RequestPacket {
            address: Address::new(address),
            v_address: Address::new(address),
            instr_id,
            ty: AccessType::Load,
            response_requested: true,
            instr_depend_on_me: vec![instr_id],
            ..RequestPacket::default()
        };
        self.channels[self.upper].add_rq(packet)
    }

    fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.cycle += 1;
            self.controller.operate(&mut self.channels);
            while let Some(response) = self.channels[self.upper].returned.pop_front() {
                self.returns.push((response.address, self.cycle));
            }
        }
    }
}

fn cycles(ns: f64, io_freq: u64) -> u64 {
    (ns * io_freq as f64 / 1000.0).ceil() as u64
}

/// Two reads to the same row, different columns: the second pays only the
/// column access (no row activation), and the channel counts one row-buffer
/// hit and one miss.
#[test]
fn same_row_reads_hit_the_row_buffer() {
    let config = DramConfig::default();
    let mut bench = DramBench::new(&config, false);

    let column_shift = LOG2_BLOCK_SIZE + lg2(config.banks as u64);
    let first = 0u64;
    let second = 1u64 << column_shift; // same bank and row, next column

    assert!(bench.issue_read(first, 1));
    assert!(bench.issue_read(second, 2));
    bench.run(400);

    assert_eq!(bench.returns.len(), 2);
    let stats = bench.controller.channel_stats();
    assert_eq!(stats[0].rq_row_buffer_miss, 1);
    assert_eq!(stats[0].rq_row_buffer_hit, 1);

    // The hit occupies the bank for tCAS only; tRCD is not paid again.
    let t_cas = cycles(config.t_cas_ns, config.io_freq);
    let dbus_return = BLOCK_SIZE.div_ceil(config.channel_width);
    let gap = bench.returns[1].1 - bench.returns[0].1;
    assert_eq!(gap, t_cas + dbus_return);
}

/// Reads to distinct rows of one bank pay the precharge each time.
#[test]
fn conflicting_rows_never_hit() {
    let config = DramConfig::default();
    let mut bench = DramBench::new(&config, false);

    let row_shift = LOG2_BLOCK_SIZE
        + lg2(config.banks as u64)
        + lg2(config.columns as u64)
        + lg2(config.ranks as u64);
    assert!(bench.issue_read(0, 1));
    assert!(bench.issue_read(1u64 << row_shift, 2));
    bench.run(600);

    assert_eq!(bench.returns.len(), 2);
    let stats = bench.controller.channel_stats();
    assert_eq!(stats[0].rq_row_buffer_hit, 0);
    assert_eq!(stats[0].rq_row_buffer_miss, 2);
}

/// During warmup every request completes immediately with no DRAM timing.
#[test]
fn warmup_short_circuits_timing() {
    let config = DramConfig::default();
    let mut bench = DramBench::new(&config, true);

    assert!(bench.issue_read(0x1000, 1));
    bench.run(2);

    assert_eq!(bench.returns.len(), 1);
    let stats = bench.controller.channel_stats();
    assert_eq!(stats[0].rq_row_buffer_hit + stats[0].rq_row_buffer_miss, 0);
}
