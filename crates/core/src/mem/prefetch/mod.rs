//! Hardware prefetcher modules.
//!
//! A prefetcher observes eligible tag checks and fills, and requests lines by
//! returning them from its hooks; the cache applies its admission rule to each
//! requested line (internal queue capacity, issue accounting). Multiple
//! prefetchers may be configured on one cache: every hook is broadcast to all
//! of them, and metadata folds through the chain with the last writer winning.

pub mod ip_stride;
pub mod next_line;

use crate::common::addr::Address;
use crate::common::{AccessType, BranchType};
use crate::config::PrefetcherKind;

pub use self::ip_stride::IpStridePrefetcher;
pub use self::next_line::NextLinePrefetcher;

/// A line requested by a prefetcher.
#[derive(Clone, Copy, Debug)]
pub struct PrefetchLine {
    /// Address to prefetch (virtual or physical per the cache's mode).
    pub address: Address,
    /// Fill into this cache level, or only below it.
    pub fill_this_level: bool,
    /// Metadata attached to the prefetch.
    pub metadata: u32,
}

/// The prefetcher contract.
pub trait Prefetcher {
    /// Called once before simulation begins.
    fn initialize(&mut self) {}

    /// Observes one eligible tag check; pushes requested lines onto `issue`.
    ///
    /// # Returns
    ///
    /// Metadata to attach to the access from here on.
    #[allow(clippy::too_many_arguments)]
    fn cache_operate(
        &mut self,
        addr: Address,
        ip: Address,
        hit: bool,
        useful_prefetch: bool,
        ty: AccessType,
        metadata_in: u32,
        issue: &mut Vec<PrefetchLine>,
    ) -> u32;

    /// Observes a fill into the cache.
    ///
    /// # Returns
    ///
    /// Metadata to store with the filled block.
    fn cache_fill(
        &mut self,
        addr: Address,
        set: usize,
        way: usize,
        prefetch: bool,
        evicted: Address,
        metadata_in: u32,
    ) -> u32;

    /// Called once per cache tick; may request lines.
    fn cycle_operate(&mut self, _issue: &mut Vec<PrefetchLine>) {}

    /// Observes a retired branch (instruction caches only).
    fn branch_operate(&mut self, _ip: Address, _ty: BranchType, _target: Address) {}

    /// Called once after simulation ends.
    fn final_stats(&self) {}
}

/// An ordered collection of prefetchers sharing one cache.
pub struct PrefetcherSet {
    modules: Vec<Box<dyn Prefetcher>>,
}

impl PrefetcherSet {
    /// Builds the configured prefetcher chain.
    pub fn build(kinds: &[PrefetcherKind]) -> Self {
        let modules = kinds
            .iter()
            .filter_map(|kind| -> Option<Box<dyn Prefetcher>> {
                match kind {
                    PrefetcherKind::None => None,
                    PrefetcherKind::NextLine => Some(Box::new(NextLinePrefetcher::new())),
                    PrefetcherKind::IpStride => Some(Box::new(IpStridePrefetcher::new())),
                }
            })
            .collect();
        Self { modules }
    }

    /// Initializes every module.
    pub fn initialize(&mut self) {
        for module in &mut self.modules {
            module.initialize();
        }
    }

    /// Broadcasts a tag check; metadata folds last-writer-wins.
    #[allow(clippy::too_many_arguments)]
    pub fn cache_operate(
        &mut self,
        addr: Address,
        ip: Address,
        hit: bool,
        useful_prefetch: bool,
        ty: AccessType,
        metadata_in: u32,
        issue: &mut Vec<PrefetchLine>,
    ) -> u32 {
        let mut metadata = metadata_in;
        for module in &mut self.modules {
            metadata = module.cache_operate(addr, ip, hit, useful_prefetch, ty, metadata, issue);
        }
        metadata
    }

    /// Broadcasts a fill; metadata folds last-writer-wins.
    pub fn cache_fill(
        &mut self,
        addr: Address,
        set: usize,
        way: usize,
        prefetch: bool,
        evicted: Address,
        metadata_in: u32,
    ) -> u32 {
        let mut metadata = metadata_in;
        for module in &mut self.modules {
            metadata = module.cache_fill(addr, set, way, prefetch, evicted, metadata);
        }
        metadata
    }

    /// Broadcasts the per-tick hook.
    pub fn cycle_operate(&mut self, issue: &mut Vec<PrefetchLine>) {
        for module in &mut self.modules {
            module.cycle_operate(issue);
        }
    }

    /// Broadcasts a retired branch.
    pub fn branch_operate(&mut self, ip: Address, ty: BranchType, target: Address) {
        for module in &mut self.modules {
            module.branch_operate(ip, ty, target);
        }
    }

    /// Reports final stats from every module.
    pub fn final_stats(&self) {
        for module in &self.modules {
            module.final_stats();
        }
    }
}
