//! Cache replacement policy modules.
//!
//! A replacer picks the victim way on a fill and observes every hit and fill.
//! Multiple replacers may be configured on one cache: every notification is
//! broadcast to all of them, and victim selection delegates to the last one.

pub mod lru;
pub mod srrip;

use crate::common::addr::Address;
use crate::common::AccessType;
use crate::config::ReplacementKind;
use crate::mem::cache::Block;

pub use self::lru::LruReplacer;
pub use self::srrip::SrripReplacer;

/// The replacement policy contract.
pub trait Replacer {
    /// Called once before simulation begins.
    fn initialize(&mut self) {}

    /// Picks the victim way for a fill into `set`.
    ///
    /// `current_set` is a read-only view of the set's blocks.
    fn find_victim(
        &mut self,
        cpu: u32,
        instr_id: u64,
        set: usize,
        current_set: &[Block],
        ip: Address,
        full_addr: Address,
        ty: AccessType,
    ) -> usize;

    /// Observes an access: `hit` distinguishes a tag hit from a fill.
    #[allow(clippy::too_many_arguments)]
    fn update(
        &mut self,
        cpu: u32,
        set: usize,
        way: usize,
        full_addr: Address,
        ip: Address,
        victim_addr: Address,
        ty: AccessType,
        hit: bool,
    );

    /// Called once after simulation ends.
    fn final_stats(&self) {}
}

/// An ordered collection of replacers sharing one cache.
pub struct ReplacerSet {
    modules: Vec<Box<dyn Replacer>>,
}

impl ReplacerSet {
    /// Builds the configured replacer chain for a cache of `sets × ways`.
    pub fn build(kinds: &[ReplacementKind], sets: usize, ways: usize) -> Self {
        let modules = kinds
            .iter()
            .map(|kind| -> Box<dyn Replacer> {
                match kind {
                    ReplacementKind::Lru => Box::new(LruReplacer::new(sets, ways)),
                    ReplacementKind::Srrip => Box::new(SrripReplacer::new(sets, ways)),
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

    /// Delegates to the last configured replacer.
    pub fn find_victim(
        &mut self,
        cpu: u32,
        instr_id: u64,
        set: usize,
        current_set: &[Block],
        ip: Address,
        full_addr: Address,
        ty: AccessType,
    ) -> usize {
        self.modules
            .last_mut()
            .expect("at least one replacer is configured")
            .find_victim(cpu, instr_id, set, current_set, ip, full_addr, ty)
    }

    /// Broadcasts an access to every module.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        cpu: u32,
        set: usize,
        way: usize,
        full_addr: Address,
        ip: Address,
        victim_addr: Address,
        ty: AccessType,
        hit: bool,
    ) {
        for module in &mut self.modules {
            module.update(cpu, set, way, full_addr, ip, victim_addr, ty, hit);
        }
    }

    /// Reports final stats from every module.
    pub fn final_stats(&self) {
        for module in &self.modules {
            module.final_stats();
        }
    }
}
