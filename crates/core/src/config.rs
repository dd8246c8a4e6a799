//! Configuration for the simulator.
//!
//! This module defines all configuration structures and enums used to
//! parameterize the simulator. It provides:
//! 1. **Defaults:** baseline hardware constants for the core, caches, PTW,
//!    virtual memory, and DRAM.
//! 2. **Structures:** hierarchical config for the CPU, each cache level, the
//!    page-table walker, and the memory controller.
//! 3. **Enums:** replacement policy, prefetcher, branch predictor, and BTB
//!    module selection.
//!
//! Configuration is supplied as JSON (see the CLI) or via `Config::default()`.

use serde::Deserialize;

use crate::common::{AccessType, LOG2_BLOCK_SIZE};

/// Default configuration constants.
///
/// These values define the baseline hardware configuration when not
/// explicitly overridden in a JSON configuration file.
mod defaults {
    /// Instruction fetch buffer capacity.
    pub const IFETCH_BUFFER_SIZE: usize = 64;
    /// Decode buffer capacity.
    pub const DECODE_BUFFER_SIZE: usize = 32;
    /// Dispatch buffer capacity.
    pub const DISPATCH_BUFFER_SIZE: usize = 32;
    /// Reorder buffer capacity.
    pub const ROB_SIZE: usize = 352;
    /// Load queue capacity.
    pub const LQ_SIZE: usize = 128;
    /// Store queue capacity.
    pub const SQ_SIZE: usize = 72;
    /// Instructions fetched per cycle.
    pub const FETCH_WIDTH: usize = 6;
    /// Instructions decoded per cycle.
    pub const DECODE_WIDTH: usize = 6;
    /// Instructions dispatched per cycle.
    pub const DISPATCH_WIDTH: usize = 6;
    /// Scheduler window examined per cycle.
    pub const SCHEDULE_WIDTH: usize = 128;
    /// Instructions beginning execution per cycle.
    pub const EXECUTE_WIDTH: usize = 4;
    /// Loads issued to the data cache per cycle.
    pub const LQ_WIDTH: usize = 2;
    /// Stores finished per cycle.
    pub const SQ_WIDTH: usize = 2;
    /// Instructions retired per cycle.
    pub const RETIRE_WIDTH: usize = 5;
    /// Cycles of fetch stall after a predicted branch mispredict.
    pub const MISPREDICT_PENALTY: u64 = 1;
    /// Decode stage latency in cycles.
    pub const DECODE_LATENCY: u64 = 1;
    /// Dispatch stage latency in cycles.
    pub const DISPATCH_LATENCY: u64 = 1;
    /// Scheduling latency in cycles.
    pub const SCHEDULE_LATENCY: u64 = 0;
    /// Execution latency for non-memory instructions in cycles.
    pub const EXECUTE_LATENCY: u64 = 0;
    /// Instruction-cache lines requested per cycle.
    pub const L1I_BANDWIDTH: usize = 1;
    /// Data-cache lines requested per cycle.
    pub const L1D_BANDWIDTH: usize = 1;
    /// Decoded instruction buffer sets.
    pub const DIB_SETS: usize = 32;
    /// Decoded instruction buffer ways.
    pub const DIB_WAYS: usize = 8;
    /// Decoded instruction buffer window (bytes covered by one entry).
    pub const DIB_WINDOW: u64 = 16;

    /// Cache read queue capacity.
    pub const CACHE_RQ_SIZE: usize = 64;
    /// Cache prefetch queue capacity.
    pub const CACHE_PQ_SIZE: usize = 32;
    /// Cache write queue capacity.
    pub const CACHE_WQ_SIZE: usize = 64;
    /// Cache MSHR count.
    pub const CACHE_MSHR_SIZE: usize = 32;
    /// Tag checks started per cycle.
    pub const CACHE_MAX_TAG: usize = 2;
    /// Fills performed per cycle.
    pub const CACHE_MAX_FILL: usize = 2;

    /// PTW page-size cache dimensions: (walk level, sets, ways), most-general
    /// first. A PSCL at level L caches the page read at walk level L.
    pub const PSCL_DIMS: [(u32, usize, usize); 4] = [(4, 1, 2), (3, 1, 4), (2, 2, 4), (1, 4, 8)];
    /// PTW MSHR count.
    pub const PTW_MSHR_SIZE: usize = 5;
    /// PTW reads admitted per cycle.
    pub const PTW_MAX_READ: usize = 2;
    /// PTW fills performed per cycle.
    pub const PTW_MAX_FILL: usize = 2;
    /// PTW completion latency in cycles.
    pub const PTW_LATENCY: u64 = 1;

    /// Number of radix page-table levels.
    pub const PT_LEVELS: u32 = 5;
    /// Penalty in cycles for a minor page fault (first touch of a page).
    pub const MINOR_FAULT_PENALTY: u64 = 200;

    /// DRAM channels.
    pub const DRAM_CHANNELS: usize = 1;
    /// DRAM ranks per channel.
    pub const DRAM_RANKS: usize = 1;
    /// DRAM banks per rank.
    pub const DRAM_BANKS: usize = 8;
    /// DRAM rows per bank.
    pub const DRAM_ROWS: usize = 65_536;
    /// DRAM columns per row.
    pub const DRAM_COLUMNS: usize = 128;
    /// DRAM channel width in bytes.
    pub const DRAM_CHANNEL_WIDTH: u64 = 8;
    /// DRAM IO frequency in MT/s.
    pub const DRAM_IO_FREQ: u64 = 3200;
    /// Row precharge delay in nanoseconds.
    pub const T_RP_NS: f64 = 12.5;
    /// Row-to-column delay in nanoseconds.
    pub const T_RCD_NS: f64 = 12.5;
    /// Column access delay in nanoseconds.
    pub const T_CAS_NS: f64 = 12.5;
    /// Read/write bus turnaround in nanoseconds.
    pub const TURNAROUND_NS: f64 = 7.5;
    /// DRAM read queue capacity per channel.
    pub const DRAM_RQ_SIZE: usize = 48;
    /// DRAM write queue capacity per channel.
    pub const DRAM_WQ_SIZE: usize = 48;
    /// Write-mode entry watermark.
    pub const DRAM_WRITE_HIGH_WM: usize = 36;
    /// Write-mode exit watermark.
    pub const DRAM_WRITE_LOW_WM: usize = 24;
}

/// Cache replacement policy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementKind {
    /// Least-recently-used replacement.
    #[default]
    Lru,
    /// Static re-reference interval prediction.
    Srrip,
}

/// Hardware prefetcher selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetcherKind {
    /// No prefetching.
    #[default]
    None,
    /// Prefetch the next sequential line.
    NextLine,
    /// Detect per-IP constant strides.
    IpStride,
}

/// Branch direction predictor selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchPredictorKind {
    /// Bimodal table of saturating counters.
    #[default]
    Bimodal,
}

/// Branch target buffer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BtbKind {
    /// Direct-target table plus indirect predictor and return stack.
    #[default]
    Basic,
}

/// Access types that activate the prefetcher, as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivateKind {
    Load,
    Rfo,
    Prefetch,
    Write,
    Translation,
}

impl From<ActivateKind> for AccessType {
    fn from(kind: ActivateKind) -> AccessType {
        match kind {
            ActivateKind::Load => AccessType::Load,
            ActivateKind::Rfo => AccessType::Rfo,
            ActivateKind::Prefetch => AccessType::Prefetch,
            ActivateKind::Write => AccessType::Write,
            ActivateKind::Translation => AccessType::Translation,
        }
    }
}

/// Out-of-order core configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub ifetch_buffer_size: usize,
    pub decode_buffer_size: usize,
    pub dispatch_buffer_size: usize,
    pub rob_size: usize,
    pub lq_size: usize,
    pub sq_size: usize,
    pub fetch_width: usize,
    pub decode_width: usize,
    pub dispatch_width: usize,
    pub schedule_width: usize,
    pub execute_width: usize,
    pub lq_width: usize,
    pub sq_width: usize,
    pub retire_width: usize,
    pub mispredict_penalty: u64,
    pub decode_latency: u64,
    pub dispatch_latency: u64,
    pub schedule_latency: u64,
    pub execute_latency: u64,
    pub l1i_bandwidth: usize,
    pub l1d_bandwidth: usize,
    pub dib_sets: usize,
    pub dib_ways: usize,
    pub dib_window: u64,
    /// Direction predictors; all are notified, the last one's prediction wins.
    pub branch_predictors: Vec<BranchPredictorKind>,
    /// Target predictors; all are notified, the last one's prediction wins.
    pub btbs: Vec<BtbKind>,
    /// Clock period relative to the base tick.
    pub period: u64,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            ifetch_buffer_size: defaults::IFETCH_BUFFER_SIZE,
            decode_buffer_size: defaults::DECODE_BUFFER_SIZE,
            dispatch_buffer_size: defaults::DISPATCH_BUFFER_SIZE,
            rob_size: defaults::ROB_SIZE,
            lq_size: defaults::LQ_SIZE,
            sq_size: defaults::SQ_SIZE,
            fetch_width: defaults::FETCH_WIDTH,
            decode_width: defaults::DECODE_WIDTH,
            dispatch_width: defaults::DISPATCH_WIDTH,
            schedule_width: defaults::SCHEDULE_WIDTH,
            execute_width: defaults::EXECUTE_WIDTH,
            lq_width: defaults::LQ_WIDTH,
            sq_width: defaults::SQ_WIDTH,
            retire_width: defaults::RETIRE_WIDTH,
            mispredict_penalty: defaults::MISPREDICT_PENALTY,
            decode_latency: defaults::DECODE_LATENCY,
            dispatch_latency: defaults::DISPATCH_LATENCY,
            schedule_latency: defaults::SCHEDULE_LATENCY,
            execute_latency: defaults::EXECUTE_LATENCY,
            l1i_bandwidth: defaults::L1I_BANDWIDTH,
            l1d_bandwidth: defaults::L1D_BANDWIDTH,
            dib_sets: defaults::DIB_SETS,
            dib_ways: defaults::DIB_WAYS,
            dib_window: defaults::DIB_WINDOW,
            branch_predictors: vec![BranchPredictorKind::Bimodal],
            btbs: vec![BtbKind::Basic],
            period: 1,
        }
    }
}

/// One cache level's configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub name: String,
    pub sets: usize,
    pub ways: usize,
    pub rq_size: usize,
    pub pq_size: usize,
    pub wq_size: usize,
    pub mshr_size: usize,
    pub hit_latency: u64,
    pub fill_latency: u64,
    pub max_tag: usize,
    pub max_fill: usize,
    /// Route internal prefetches through the lower level's RQ instead of PQ.
    pub prefetch_as_load: bool,
    /// Compare full addresses (no block alignment) on write admission; set on
    /// caches whose writes are stores rather than writebacks.
    pub match_offset_bits: bool,
    /// Operate the prefetcher on virtual addresses.
    pub virtual_prefetch: bool,
    /// Access types that activate the prefetcher.
    pub prefetch_activate: Vec<ActivateKind>,
    pub prefetcher: PrefetcherKind,
    pub replacement: ReplacementKind,
    /// Block-alignment granularity; TLB levels use the page-offset width.
    pub offset_bits: u32,
    /// Clock period relative to the base tick.
    pub period: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: String::from("cache"),
            sets: 64,
            ways: 8,
            rq_size: defaults::CACHE_RQ_SIZE,
            pq_size: defaults::CACHE_PQ_SIZE,
            wq_size: defaults::CACHE_WQ_SIZE,
            mshr_size: defaults::CACHE_MSHR_SIZE,
            hit_latency: 4,
            fill_latency: 1,
            max_tag: defaults::CACHE_MAX_TAG,
            max_fill: defaults::CACHE_MAX_FILL,
            prefetch_as_load: false,
            match_offset_bits: false,
            virtual_prefetch: false,
            prefetch_activate: vec![ActivateKind::Load, ActivateKind::Rfo],
            prefetcher: PrefetcherKind::None,
            replacement: ReplacementKind::Lru,
            offset_bits: LOG2_BLOCK_SIZE,
            period: 1,
        }
    }
}

impl CacheConfig {
    /// Returns the activation mask as access types.
    pub fn activate_mask(&self) -> Vec<AccessType> {
        self.prefetch_activate.iter().map(|&k| k.into()).collect()
    }
}

/// Page-table walker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PtwConfig {
    /// Page-size cache dimensions: (level, sets, ways). Level 0 entries are
    /// ignored; levels are sorted most-general first.
    pub pscl: Vec<(u32, usize, usize)>,
    pub mshr_size: usize,
    pub max_read: usize,
    pub max_fill: usize,
    pub latency: u64,
    /// Clock period relative to the base tick.
    pub period: u64,
}

impl Default for PtwConfig {
    fn default() -> Self {
        Self {
            pscl: defaults::PSCL_DIMS.to_vec(),
            mshr_size: defaults::PTW_MSHR_SIZE,
            max_read: defaults::PTW_MAX_READ,
            max_fill: defaults::PTW_MAX_FILL,
            latency: defaults::PTW_LATENCY,
            period: 1,
        }
    }
}

/// Virtual memory emulation configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VmemConfig {
    pub pt_levels: u32,
    pub minor_fault_penalty: u64,
}

impl Default for VmemConfig {
    fn default() -> Self {
        Self {
            pt_levels: defaults::PT_LEVELS,
            minor_fault_penalty: defaults::MINOR_FAULT_PENALTY,
        }
    }
}

/// DRAM controller configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DramConfig {
    pub channels: usize,
    pub ranks: usize,
    pub banks: usize,
    pub rows: usize,
    pub columns: usize,
    /// Channel width in bytes.
    pub channel_width: u64,
    /// IO frequency in MT/s.
    pub io_freq: u64,
    pub t_rp_ns: f64,
    pub t_rcd_ns: f64,
    pub t_cas_ns: f64,
    pub turnaround_ns: f64,
    pub rq_size: usize,
    pub wq_size: usize,
    pub write_high_wm: usize,
    pub write_low_wm: usize,
    /// Clock period relative to the base tick.
    pub period: u64,
}

impl Default for DramConfig {
    fn default() -> Self {
        Self {
            channels: defaults::DRAM_CHANNELS,
            ranks: defaults::DRAM_RANKS,
            banks: defaults::DRAM_BANKS,
            rows: defaults::DRAM_ROWS,
            columns: defaults::DRAM_COLUMNS,
            channel_width: defaults::DRAM_CHANNEL_WIDTH,
            io_freq: defaults::DRAM_IO_FREQ,
            t_rp_ns: defaults::T_RP_NS,
            t_rcd_ns: defaults::T_RCD_NS,
            t_cas_ns: defaults::T_CAS_NS,
            turnaround_ns: defaults::TURNAROUND_NS,
            rq_size: defaults::DRAM_RQ_SIZE,
            wq_size: defaults::DRAM_WQ_SIZE,
            write_high_wm: defaults::DRAM_WRITE_HIGH_WM,
            write_low_wm: defaults::DRAM_WRITE_LOW_WM,
            period: 1,
        }
    }
}

impl DramConfig {
    /// Total DRAM capacity in bytes.
    pub fn size_bytes(&self) -> u64 {
        (self.channels * self.ranks * self.banks * self.rows * self.columns) as u64
            * crate::common::BLOCK_SIZE
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cpu: CpuConfig,
    pub l1i: CacheConfig,
    pub l1d: CacheConfig,
    pub l2c: CacheConfig,
    pub llc: CacheConfig,
    pub itlb: CacheConfig,
    pub dtlb: CacheConfig,
    pub stlb: CacheConfig,
    pub ptw: PtwConfig,
    pub vmem: VmemConfig,
    pub dram: DramConfig,
}

impl Config {
    /// Returns a configuration with the standard three-level hierarchy.
    pub fn standard() -> Self {
        Self {
            l1i: CacheConfig {
                name: String::from("L1I"),
                sets: 64,
                ways: 8,
                hit_latency: 4,
                match_offset_bits: true,
                virtual_prefetch: true,
                prefetch_activate: vec![ActivateKind::Load, ActivateKind::Prefetch],
                ..CacheConfig::default()
            },
            l1d: CacheConfig {
                name: String::from("L1D"),
                sets: 64,
                ways: 12,
                hit_latency: 5,
                match_offset_bits: true,
                ..CacheConfig::default()
            },
            l2c: CacheConfig {
                name: String::from("L2C"),
                sets: 1024,
                ways: 8,
                hit_latency: 10,
                ..CacheConfig::default()
            },
            llc: CacheConfig {
                name: String::from("LLC"),
                sets: 2048,
                ways: 16,
                hit_latency: 20,
                ..CacheConfig::default()
            },
            itlb: CacheConfig {
                name: String::from("ITLB"),
                sets: 16,
                ways: 4,
                hit_latency: 1,
                match_offset_bits: true,
                offset_bits: crate::common::LOG2_PAGE_SIZE,
                ..CacheConfig::default()
            },
            dtlb: CacheConfig {
                name: String::from("DTLB"),
                sets: 16,
                ways: 4,
                hit_latency: 1,
                match_offset_bits: true,
                offset_bits: crate::common::LOG2_PAGE_SIZE,
                ..CacheConfig::default()
            },
            stlb: CacheConfig {
                name: String::from("STLB"),
                sets: 128,
                ways: 12,
                hit_latency: 8,
                offset_bits: crate::common::LOG2_PAGE_SIZE,
                ..CacheConfig::default()
            },
            ..Self::default()
        }
    }
}
