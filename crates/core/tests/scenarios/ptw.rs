//! Page-table walker scenarios: full walks and PSCL reuse.

use o3sim_core::channel::{Channel, ChannelId, Channels, RequestPacket};
use o3sim_core::common::addr::Address;
use o3sim_core::common::{AccessType, LOG2_PAGE_SIZE};
use o3sim_core::config::{PtwConfig, VmemConfig};
use o3sim_core::mem::ptw::PageTableWalker;
use o3sim_core::mem::vmem::VirtualMemory;

use crate::common::MockMemory;

struct PtwBench {
    channels: Channels,
    ptw: PageTableWalker,
    mem: MockMemory,
    upper: ChannelId,
    responses: Vec<(Address, Address)>, // (v_address, data)
}

impl PtwBench {
    fn new() -> Self {
        let mut channels = Channels::new();
        let upper = channels.add(Channel::new(16, 0, 0, LOG2_PAGE_SIZE, false));
        let lower = channels.add(Channel::new(64, 64, 64, 6, false));
        // A small fault penalty keeps the walks short.
        let vmem_config = VmemConfig {
            minor_fault_penalty: 10,
            ..VmemConfig::default()
        };
        let vmem = VirtualMemory::new(&vmem_config, 1 << 32);
        let mut ptw = PageTableWalker::new(
            "PTW",
            0,
            &PtwConfig::default(),
            vmem,
            vec![upper],
            lower,
        );
        ptw.set_warmup(false);
        Self {
            channels,
            ptw,
            mem: MockMemory::new(lower, 1),
            upper,
            responses: Vec::new(),
        }
    }

    fn request(&mut self, vaddr: u64) -> bool {
        let packet = RequestPacket {
            address: Address::new(vaddr),
            v_address: Address::new(vaddr),
            ty: AccessType::Translation,
            response_requested: true,
            ..RequestPacket::default()
        };
        self.channels[self.upper].add_rq(packet)
    }

    fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.mem.operate(&mut self.channels);
            self.ptw.operate(&mut self.channels);
            while let Some(response) = self.channels[self.upper].returned.pop_front() {
                self.responses.push((response.v_address, response.data));
            }
        }
    }
}

/// A cold walk descends every radix level: one lower-level read per level,
/// then a response carrying the physical translation.
#[test]
fn cold_walk_reads_every_level() {
    let mut bench = PtwBench::new();
    let vaddr = 0xdead_b000u64;

    assert!(bench.request(vaddr));
    bench.run(500);

    assert_eq!(bench.responses.len(), 1);
    let (v_address, data) = bench.responses[0];
    assert_eq!(v_address.value(), vaddr);
    assert_ne!(data.value(), 0);

    let levels = VmemConfig::default().pt_levels as usize;
    assert_eq!(bench.mem.addresses.len(), levels);
    assert_eq!(bench.ptw.mshr_occupancy(), 0);
}

/// A second walk for the same prefix hits the most specific PSCL and reads
/// only the final level.
#[test]
fn pscl_hit_skips_upper_levels() {
    let mut bench = PtwBench::new();
    let vaddr = 0xdead_b000u64;

    assert!(bench.request(vaddr));
    bench.run(500);
    let cold_reads = bench.mem.addresses.len();

    assert!(bench.request(vaddr + 0x1000));
    bench.run(500);

    assert_eq!(bench.responses.len(), 2);
    assert_eq!(bench.mem.addresses.len(), cold_reads + 1);
}

/// Translations of the same page are stable across walks.
#[test]
fn repeated_walks_agree() {
    let mut bench = PtwBench::new();
    let vaddr = 0x1234_5000u64;

    assert!(bench.request(vaddr));
    bench.run(500);
    assert!(bench.request(vaddr));
    bench.run(500);

    assert_eq!(bench.responses.len(), 2);
    assert_eq!(bench.responses[0].1, bench.responses[1].1);
}
