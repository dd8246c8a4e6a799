//! Simulation statistics collection and reporting.
//!
//! This module tracks performance metrics for every component. It provides:
//! 1. **Core:** cycles, retired instructions, IPC, branch mix and MPKI.
//! 2. **Caches:** per-access-type hits/misses, prefetch counters, miss latency.
//! 3. **DRAM:** row-buffer hits/misses, refresh and bus congestion counters.
//!
//! Counters accumulate during the measured phase; the harness snapshots them
//! at phase boundaries and prints the final report.

use crate::common::{AccessType, BranchType};

/// Per-cache statistics.
#[derive(Clone, Default, Debug)]
pub struct CacheStats {
    /// Cache name used in the report.
    pub name: String,
    /// Hits, indexed by `AccessType::index`.
    pub hits: [u64; 5],
    /// Misses, indexed by `AccessType::index`.
    pub misses: [u64; 5],
    /// Prefetch lines requested by the prefetcher.
    pub pf_requested: u64,
    /// Prefetch lines accepted into the internal queue.
    pub pf_issued: u64,
    /// Prefetched blocks later referenced by a demand access.
    pub pf_useful: u64,
    /// Prefetched blocks evicted without a demand reference.
    pub pf_useless: u64,
    /// Fills whose data arrived on behalf of a prefetch.
    pub pf_fill: u64,
    /// Summed cycles between miss enqueue and fill.
    pub total_miss_latency: u64,
}

impl CacheStats {
    /// Creates stats labelled with a component name.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Total hits across access types.
    pub fn total_hits(&self) -> u64 {
        self.hits.iter().sum()
    }

    /// Total misses across access types.
    pub fn total_misses(&self) -> u64 {
        self.misses.iter().sum()
    }

    /// Average cycles from miss enqueue to fill.
    pub fn avg_miss_latency(&self) -> f64 {
        let misses = self.total_misses();
        if misses == 0 {
            0.0
        } else {
            self.total_miss_latency as f64 / misses as f64
        }
    }

    /// Prints this cache's section of the final report.
    pub fn print(&self) {
        println!(
            "{} TOTAL        ACCESS: {:>10}  HIT: {:>10}  MISS: {:>10}",
            self.name,
            self.total_hits() + self.total_misses(),
            self.total_hits(),
            self.total_misses()
        );
        for ty in AccessType::ALL {
            let idx = ty.index();
            println!(
                "{} {:<12} ACCESS: {:>10}  HIT: {:>10}  MISS: {:>10}",
                self.name,
                ty.name(),
                self.hits[idx] + self.misses[idx],
                self.hits[idx],
                self.misses[idx]
            );
        }
        println!(
            "{} PREFETCH     REQUESTED: {}  ISSUED: {}  USEFUL: {}  USELESS: {}  FILL: {}",
            self.name, self.pf_requested, self.pf_issued, self.pf_useful, self.pf_useless, self.pf_fill
        );
        println!(
            "{} AVERAGE MISS LATENCY: {:.4} cycles",
            self.name,
            self.avg_miss_latency()
        );
    }
}

/// Per-core statistics.
#[derive(Clone, Default, Debug)]
pub struct CpuStats {
    /// Core name used in the report.
    pub name: String,
    /// Retired-instruction count at phase begin.
    pub begin_instrs: u64,
    /// Cycle count at phase begin.
    pub begin_cycles: u64,
    /// Retired-instruction count at phase end.
    pub end_instrs: u64,
    /// Cycle count at phase end.
    pub end_cycles: u64,
    /// Summed ROB occupancy observed at each mispredicted branch.
    pub total_rob_occupancy_at_branch_mispredict: u64,
    /// Retired branches, indexed by `BranchType::index`.
    pub total_branch_types: [u64; BranchType::COUNT],
    /// Mispredicted branches, indexed by `BranchType::index`.
    pub branch_type_misses: [u64; BranchType::COUNT],
}

impl CpuStats {
    /// Instructions retired in the phase.
    pub fn instrs(&self) -> u64 {
        self.end_instrs - self.begin_instrs
    }

    /// Cycles elapsed in the phase.
    pub fn cycles(&self) -> u64 {
        self.end_cycles - self.begin_cycles
    }

    /// Total branches of all types.
    pub fn total_branches(&self) -> u64 {
        self.total_branch_types.iter().sum()
    }

    /// Total mispredicted branches of all types.
    pub fn total_mispredicts(&self) -> u64 {
        self.branch_type_misses.iter().sum()
    }

    /// Prints this core's section of the final report.
    pub fn print(&self) {
        let cycles = self.cycles().max(1);
        let instrs = self.instrs();
        println!(
            "{} cumulative IPC: {:.4} instructions: {} cycles: {}",
            self.name,
            instrs as f64 / cycles as f64,
            instrs,
            self.cycles()
        );
        let branches = self.total_branches();
        let misses = self.total_mispredicts();
        let accuracy = if branches > 0 {
            100.0 * (branches - misses) as f64 / branches as f64
        } else {
            100.0
        };
        let mpki = if instrs > 0 {
            1000.0 * misses as f64 / instrs as f64
        } else {
            0.0
        };
        println!(
            "{} Branch Prediction Accuracy: {:.4}% MPKI: {:.4} Average ROB Occupancy at Mispredict: {:.4}",
            self.name,
            accuracy,
            mpki,
            if misses > 0 {
                self.total_rob_occupancy_at_branch_mispredict as f64 / misses as f64
            } else {
                0.0
            }
        );
        println!("Branch type MPKI");
        for i in 0..BranchType::COUNT {
            let ty = [
                BranchType::NotBranch,
                BranchType::DirectJump,
                BranchType::Indirect,
                BranchType::Conditional,
                BranchType::DirectCall,
                BranchType::IndirectCall,
                BranchType::Return,
                BranchType::Other,
            ][i];
            if ty == BranchType::NotBranch {
                continue;
            }
            let type_mpki = if instrs > 0 {
                1000.0 * self.branch_type_misses[i] as f64 / instrs as f64
            } else {
                0.0
            };
            println!("{}: {:.4}", ty.name(), type_mpki);
        }
    }
}

/// Per-DRAM-channel statistics.
#[derive(Clone, Default, Debug)]
pub struct DramChannelStats {
    /// Channel name used in the report.
    pub name: String,
    /// Read accesses that hit the open row.
    pub rq_row_buffer_hit: u64,
    /// Read accesses that missed the open row.
    pub rq_row_buffer_miss: u64,
    /// Write accesses that hit the open row.
    pub wq_row_buffer_hit: u64,
    /// Write accesses that missed the open row.
    pub wq_row_buffer_miss: u64,
    /// Writes refused because the write queue was full.
    pub wq_full: u64,
    /// Refresh trigger events.
    pub refresh_cycles: u64,
    /// Cycles a ready bank waited on a busy data bus.
    pub dbus_cycle_congested: u64,
    /// Number of bank-ready events that found the bus busy.
    pub dbus_count_congested: u64,
}

impl DramChannelStats {
    /// Creates stats labelled with a channel name.
    pub fn named(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// Prints this channel's section of the final report.
    pub fn print(&self) {
        println!(
            "{} RQ ROW_BUFFER_HIT: {:>10}  ROW_BUFFER_MISS: {:>10}",
            self.name, self.rq_row_buffer_hit, self.rq_row_buffer_miss
        );
        let congestion = if self.dbus_count_congested > 0 {
            self.dbus_cycle_congested as f64 / self.dbus_count_congested as f64
        } else {
            0.0
        };
        println!("{} AVG DBUS CONGESTED CYCLE: {:.4}", self.name, congestion);
        println!(
            "{} WQ ROW_BUFFER_HIT: {:>10}  ROW_BUFFER_MISS: {:>10}  FULL: {:>10}",
            self.name, self.wq_row_buffer_hit, self.wq_row_buffer_miss, self.wq_full
        );
        println!("{} REFRESHES ISSUED: {:>10}", self.name, self.refresh_cycles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_totals() {
        let mut stats = CacheStats::named("L1D");
        stats.hits[AccessType::Load.index()] = 10;
        stats.misses[AccessType::Load.index()] = 5;
        stats.misses[AccessType::Rfo.index()] = 3;
        assert_eq!(stats.total_hits(), 10);
        assert_eq!(stats.total_misses(), 8);
        stats.total_miss_latency = 80;
        assert!((stats.avg_miss_latency() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cpu_phase_deltas() {
        let stats = CpuStats {
            begin_instrs: 100,
            end_instrs: 600,
            begin_cycles: 1000,
            end_cycles: 2000,
            ..CpuStats::default()
        };
        assert_eq!(stats.instrs(), 500);
        assert_eq!(stats.cycles(), 1000);
    }
}
