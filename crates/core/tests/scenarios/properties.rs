//! Invariant checks driven by randomized-looking access streams.

use o3sim_core::common::LOG2_BLOCK_SIZE;
use o3sim_core::config::CacheConfig;

use crate::common::{small_cache, CacheBench};

/// A deterministic address scrambler (xorshift) for mixed streams.
fn scramble(seed: u64) -> u64 {
    let mut x = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15).wrapping_add(1);
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x
}

/// P1: no two valid blocks in one set ever share a block address.
/// P2: MSHR and tag-check occupancy never exceed their bounds.
#[test]
fn sets_stay_duplicate_free_and_occupancy_bounded() {
    let config = CacheConfig {
        mshr_size: 8,
        ..small_cache("prop-uut")
    };
    let mut bench = CacheBench::new(config, 6);

    let mut issued = 0u64;
    for step in 0..600u64 {
        // A mix of fresh and repeated addresses over a small footprint.
        let address = (scramble(step % 37) % 0x4000) & !0x3f;
        let (accepted, _) = bench.issue_load(address, 0x1000 + step, step + 1);
        if accepted {
            issued += 1;
        }
        bench.tick();

        assert!(bench.cache.mshr_occupancy() <= bench.cache.mshr_size());
        assert!(bench.cache.tag_check_occupancy() <= bench.cache.tag_check_capacity());

        for set in 0..bench.cache.num_sets() {
            let mut blocks: Vec<u64> = bench
                .cache
                .set_view(set)
                .iter()
                .filter(|blk| blk.valid)
                .map(|blk| blk.address.value() >> LOG2_BLOCK_SIZE)
                .collect();
            blocks.sort_unstable();
            let len = blocks.len();
            blocks.dedup();
            assert_eq!(blocks.len(), len, "duplicate block in set {set}");
        }
    }
    assert!(issued > 0);
    bench.run(100);

    // Every accepted load is eventually answered exactly once per request.
    let answered: u64 = bench
        .returns
        .iter()
        .map(|(response, _)| response.instr_depend_on_me.len() as u64)
        .sum();
    assert_eq!(answered, issued);
}
