//! Cache controller scenarios: prefetch accounting, MSHR merging, and
//! writeback behavior.

use o3sim_core::common::addr::Address;
use o3sim_core::common::{AccessType, BLOCK_SIZE, LOG2_BLOCK_SIZE};
use o3sim_core::config::{ActivateKind, CacheConfig, PrefetcherKind};
use o3sim_core::mem::prefetch::PrefetchLine;

use crate::common::{small_cache, CacheBench};

fn prefetch(address: u64) -> PrefetchLine {
    PrefetchLine {
        address: Address::new(address),
        fill_this_level: true,
        metadata: 0,
    }
}

/// An issued prefetch fills the cache, and a later demand load to the same
/// block hits, counts the prefetch useful, and returns in hit latency.
#[test]
fn issued_prefetch_fills_and_turns_useful() {
    let mut bench = CacheBench::new(small_cache("420-uut"), 1);

    assert!(bench.cache.prefetch_line(prefetch(0xdead_beef)));
    bench.run(100);
    assert_eq!(bench.cache.stats.pf_fill, 1);
    assert_eq!(bench.cache.stats.pf_issued, 1);

    let (accepted, issue_cycle) = bench.issue_load(0xdead_beef, 0xffff_ff00, 1);
    assert!(accepted);
    bench.run(2 * 2); // 2 * HIT_LATENCY

    assert_eq!(bench.cache.stats.pf_useful, 1);
    let (response, return_cycle) = bench.returns.last().expect("load must return");
    assert_eq!(response.address.value(), 0xdead_beef);
    assert_eq!(return_cycle - issue_cycle, 2 + 1); // HIT_LATENCY + 1
}

/// A duplicate prefetch to the same block merges into the first one's MSHR:
/// two issues, one fill, and no useful count.
#[test]
fn duplicate_prefetch_is_not_useful() {
    let mut bench = CacheBench::new(small_cache("424-uut"), 1);

    assert!(bench.cache.prefetch_line(prefetch(0xdead_beef)));
    assert!(bench.cache.prefetch_line(prefetch(0xdead_beef)));
    bench.run(100);

    assert_eq!(bench.cache.stats.pf_issued, 2);
    assert_eq!(bench.cache.stats.pf_fill, 1);
    assert_eq!(bench.cache.stats.pf_useful, 0);
}

/// The IP-stride prefetcher runs ahead of a strided stream: three demands
/// produce six lower-level reads whose blocks form one arithmetic
/// progression.
#[test]
fn ip_stride_prefetcher_follows_every_stride() {
    for stride in [-4i64, -3, -2, -1, 1, 2, 3, 4] {
        let config = CacheConfig {
            prefetcher: PrefetcherKind::IpStride,
            prefetch_activate: vec![ActivateKind::Load, ActivateKind::Rfo],
            ..small_cache(&format!("452-uut-[{stride}]"))
        };
        let mut bench = CacheBench::new(config, 1);

        let seed = 0xffff_003fu64;
        let ip = 0xcafe_cafeu64;
        let (accepted, _) = bench.issue_load(seed, ip, 1);
        assert!(accepted);
        bench.run(100);

        let step = stride * BLOCK_SIZE as i64;
        let (accepted, _) = bench.issue_load(seed.wrapping_add(step as u64), ip, 2);
        assert!(accepted);
        let (accepted, _) = bench.issue_load(seed.wrapping_add((2 * step) as u64), ip, 3);
        assert!(accepted);
        bench.run(100);

        let blocks: Vec<i64> = bench
            .mem
            .addresses
            .iter()
            .map(|a| (a.value() >> LOG2_BLOCK_SIZE) as i64)
            .collect();
        assert_eq!(blocks.len(), 6, "stride {stride}: expected 6 lower reads");
        for pair in blocks.windows(2) {
            assert_eq!(pair[1] - pair[0], stride, "stride {stride}: progression broken");
        }
    }
}

/// Evicting a dirty block issues a writeback for exactly that block, which
/// then no longer resides in the cache.
#[test]
fn dirty_eviction_writes_back_the_victim() {
    let config = CacheConfig {
        ways: 2,
        ..small_cache("wb-uut")
    };
    let mut bench = CacheBench::new(config, 1);

    let a = 0x1_0000u64;
    let b = 0x2_0000u64;
    assert!(bench.issue_write(a, 0x100, 1));
    assert!(bench.issue_write(b, 0x104, 2));
    bench.run(50);
    assert!(bench.mem.write_addresses.is_empty());

    // A third block in the same set evicts one of the dirty blocks.
    let c = 0x3_0000u64;
    let (accepted, _) = bench.issue_load(c, 0x108, 3);
    assert!(accepted);
    bench.run(50);

    assert_eq!(bench.mem.write_addresses.len(), 1);
    let evicted = bench.mem.write_addresses[0];
    assert!(
        evicted.value() == a || evicted.value() == b,
        "writeback must carry a victim address"
    );

    // P6: the evicted block is gone.
    let set = bench.cache.get_set_index(evicted);
    let survivors: Vec<u64> = bench
        .cache
        .set_view(set)
        .iter()
        .filter(|blk| blk.valid)
        .map(|blk| blk.address.value())
        .collect();
    assert!(!survivors.contains(&evicted.value()));
    assert!(survivors.contains(&c));
}

/// Late loads to an outstanding miss merge into its MSHR; the fill answers
/// every merged waiter at once.
#[test]
fn mshr_merging_bounds_occupancy() {
    let config = CacheConfig {
        mshr_size: 4,
        ..small_cache("mshr-uut")
    };
    let mut bench = CacheBench::new(config, 60);

    let base = 0x4_0000u64;
    for (id, block) in [0u64, 1, 2].iter().enumerate() {
        let (accepted, _) = bench.issue_load(base + block * BLOCK_SIZE, 0x200, id as u64 + 1);
        assert!(accepted);
    }
    bench.run(10);
    assert_eq!(bench.cache.mshr_occupancy(), 3);

    // Two more loads to the first block.
    let (accepted, _) = bench.issue_load(base, 0x204, 4);
    assert!(accepted);
    let (accepted, _) = bench.issue_load(base + 8, 0x208, 5);
    assert!(accepted);
    bench.run(10);
    assert_eq!(bench.cache.mshr_occupancy(), 3);

    bench.run(120);
    assert_eq!(bench.cache.mshr_occupancy(), 0);

    let merged = bench
        .returns
        .iter()
        .find(|(response, _)| {
            response.instr_depend_on_me.contains(&4) && response.instr_depend_on_me.contains(&5)
        })
        .expect("both late loads answered by one fill");
    assert_eq!(
        merged.0.address.slice_upper(LOG2_BLOCK_SIZE),
        Address::new(base).slice_upper(LOG2_BLOCK_SIZE)
    );
}

/// Responses preserve the request's addresses and dependency list.
#[test]
fn responses_round_trip_request_identity() {
    let mut bench = CacheBench::new(small_cache("rt-uut"), 1);
    let (accepted, _) = bench.issue_load(0x7777_7777, 0x1234, 42);
    assert!(accepted);
    bench.run(50);

    let (response, _) = bench.returns.first().expect("load must return");
    assert_eq!(response.address.value(), 0x7777_7777);
    assert_eq!(response.v_address.value(), 0x7777_7777);
    assert_eq!(response.instr_depend_on_me, vec![42]);
}

/// A promoted prefetch MSHR counts useful once and keeps its return set.
#[test]
fn demand_hitting_prefetch_mshr_promotes_it() {
    let mut bench = CacheBench::new(small_cache("promote-uut"), 60);

    assert!(bench.cache.prefetch_line(prefetch(0x5_0000)));
    bench.run(10);
    assert_eq!(bench.cache.mshr_occupancy(), 1);
    assert_eq!(bench.cache.stats.pf_useful, 0);

    let (accepted, _) = bench.issue_load(0x5_0000, 0x300, 9);
    assert!(accepted);
    bench.run(10);
    assert_eq!(bench.cache.mshr_occupancy(), 1);
    assert_eq!(bench.cache.stats.pf_useful, 1);

    bench.run(120);
    let (response, _) = bench.returns.first().expect("demand must be answered");
    assert!(response.instr_depend_on_me.contains(&9));
    assert!(bench.cache.stats.misses[AccessType::Load.index()] > 0);
}
