//! Shared test infrastructure.
//!
//! `MockMemory` stands in for everything below the component under test: it
//! consumes requests from a channel, remembers every address it saw, and
//! returns responses after a fixed latency. `CacheBench` wires one cache
//! between a producer channel and a mock memory and drives both in lockstep.

use std::collections::VecDeque;

use o3sim_core::channel::{Channel, ChannelId, Channels, RequestPacket, ResponsePacket};
use o3sim_core::common::addr::Address;
use o3sim_core::common::{AccessType, LOG2_BLOCK_SIZE};
use o3sim_core::config::CacheConfig;
use o3sim_core::mem::cache::Cache;

/// A scripted lower level: answers every read after `latency` ticks.
pub struct MockMemory {
    channel: ChannelId,
    latency: u64,
    cycle: u64,
    inflight: VecDeque<(u64, ResponsePacket)>,
    /// Read and prefetch addresses, in arrival order.
    pub addresses: Vec<Address>,
    /// Write addresses, in arrival order.
    pub write_addresses: Vec<Address>,
}

impl MockMemory {
    /// Creates a mock consuming `channel` with the given response latency.
    pub fn new(channel: ChannelId, latency: u64) -> Self {
        Self {
            channel,
            latency,
            cycle: 0,
            inflight: VecDeque::new(),
            addresses: Vec::new(),
            write_addresses: Vec::new(),
        }
    }

    fn consume(
        pkt: RequestPacket,
        inflight: &mut VecDeque<(u64, ResponsePacket)>,
        addresses: &mut Vec<Address>,
        cycle: u64,
        latency: u64,
    ) {
        addresses.push(pkt.address);
        if pkt.response_requested {
            inflight.push_back((
                cycle + latency,
                ResponsePacket {
                    address: pkt.address,
                    v_address: pkt.v_address,
                    data: pkt.data,
                    pf_metadata: pkt.pf_metadata,
                    instr_depend_on_me: pkt.instr_depend_on_me,
                },
            ));
        }
    }

    /// Consumes requests and publishes due responses.
    pub fn operate(&mut self, channels: &mut Channels) {
        self.cycle += 1;
        let chan = &mut channels[self.channel];

        while let Some(pkt) = chan.rq.pop_front() {
            Self::consume(pkt, &mut self.inflight, &mut self.addresses, self.cycle, self.latency);
        }
        while let Some(pkt) = chan.pq.pop_front() {
            Self::consume(pkt, &mut self.inflight, &mut self.addresses, self.cycle, self.latency);
        }
        while let Some(pkt) = chan.wq.pop_front() {
            self.write_addresses.push(pkt.address);
        }

        while self
            .inflight
            .front()
            .is_some_and(|(ready, _)| *ready <= self.cycle)
        {
            let (_, response) = self.inflight.pop_front().unwrap();
            chan.returned.push_back(response);
        }
    }
}

/// One cache between a producer channel and a mock memory.
pub struct CacheBench {
    pub channels: Channels,
    pub cache: Cache,
    pub mem: MockMemory,
    pub upper: ChannelId,
    pub cycle: u64,
    /// Responses seen on the producer channel, with arrival cycles.
    pub returns: Vec<(ResponsePacket, u64)>,
}

impl CacheBench {
    /// Builds the bench; the cache starts out of warmup.
    pub fn new(config: CacheConfig, mem_latency: u64) -> Self {
        let mut channels = Channels::new();
        let upper = channels.add(Channel::new(
            32,
            32,
            32,
            config.offset_bits,
            config.match_offset_bits,
        ));
        let lower = channels.add(Channel::new(64, 64, 64, LOG2_BLOCK_SIZE, false));
        let mut cache = Cache::new(&config, 0, vec![upper], lower, None);
        cache.initialize();
        cache.set_warmup(false);
        Self {
            channels,
            cache,
            mem: MockMemory::new(lower, mem_latency),
            upper,
            cycle: 0,
            returns: Vec::new(),
        }
    }

    /// Advances the mock memory and the cache by one tick.
    pub fn tick(&mut self) {
        self.cycle += 1;
        self.mem.operate(&mut self.channels);
        self.cache.operate(&mut self.channels);
        while let Some(response) = self.channels[self.upper].returned.pop_front() {
            self.returns.push((response, self.cycle));
        }
    }

    /// Runs `n` ticks.
    pub fn run(&mut self, n: u64) {
        for _ in 0..n {
            self.tick();
        }
    }

    /// Sends a load; returns whether it was accepted and the issue cycle.
    pub fn issue_load(&mut self, address: u64, ip: u64, instr_id: u64) -> (bool, u64) {
        let packet = RequestPacket {
            address: Address::new(address),
            v_address: Address::new(address),
            ip: Address::new(ip),
            instr_id,
            ty: AccessType::Load,
            is_translated: true,
            response_requested: true,
            instr_depend_on_me: vec![instr_id],
            ..RequestPacket::default()
        };
        (self.channels[self.upper].add_rq(packet), self.cycle)
    }

    /// Sends a write; returns whether it was accepted.
    pub fn issue_write(&mut self, address: u64, ip: u64, instr_id: u64) -> bool {
        let packet = RequestPacket {
            address: Address::new(address),
            v_address: Address::new(address),
            ip: Address::new(ip),
            instr_id,
            ty: AccessType::Write,
            is_translated: true,
            response_requested: false,
            ..RequestPacket::default()
        };
        self.channels[self.upper].add_wq(packet)
    }
}

/// A small cache configuration shared by the scenarios.
pub fn small_cache(name: &str) -> CacheConfig {
    CacheConfig {
        name: name.to_string(),
        sets: 8,
        ways: 4,
        hit_latency: 2,
        fill_latency: 2,
        match_offset_bits: true,
        ..CacheConfig::default()
    }
}
