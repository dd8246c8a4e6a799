//! Demand-mapped virtual memory emulation.
//!
//! Physical frames do not exist until touched: the first translation of a
//! virtual page allocates a frame and charges a minor-fault penalty, and the
//! page-table radix grows the same way as the walker descends. The emulator
//! provides:
//! 1. **`va_to_pa`:** final virtual-to-physical translation.
//! 2. **`get_pte_pa`:** physical address of the page-table entry a walk reads
//!    at a given level.
//! 3. **Geometry:** shift amounts and in-page offsets for each radix level.
//!
//! Data frames are handed out from the top of DRAM downward; page-table pages
//! grow from low memory upward. Exhausting physical memory is fatal.

use std::collections::HashMap;

use crate::common::addr::{bitmask, lg2, Address};
use crate::common::{LOG2_PAGE_SIZE, PAGE_SIZE, PTE_BYTES};
use crate::config::VmemConfig;

/// The page-table and frame allocator emulator behind the PTW.
pub struct VirtualMemory {
    pt_levels: u32,
    minor_fault_penalty: u64,
    /// Bits of virtual address consumed by one radix level.
    bits_per_level: u32,
    /// (cpu, virtual page) → physical page base.
    vpage_map: HashMap<(u32, u64), u64>,
    /// (cpu, level, virtual prefix) → page-table page base.
    page_table: HashMap<(u32, u32, u64), u64>,
    next_ppage: u64,
    next_pte_page: u64,
}

impl VirtualMemory {
    /// Creates an emulator sized to the given DRAM capacity in bytes.
    ///
    /// # Panics
    ///
    /// Panics if the capacity is smaller than two pages.
    pub fn new(config: &VmemConfig, dram_size: u64) -> Self {
        assert!(dram_size >= 2 * PAGE_SIZE, "DRAM too small to page");
        Self {
            pt_levels: config.pt_levels,
            minor_fault_penalty: config.minor_fault_penalty,
            bits_per_level: lg2(PAGE_SIZE / PTE_BYTES),
            vpage_map: HashMap::new(),
            page_table: HashMap::new(),
            next_ppage: dram_size - PAGE_SIZE,
            next_pte_page: PAGE_SIZE,
        }
    }

    /// Number of radix levels in the emulated page table.
    pub fn pt_levels(&self) -> u32 {
        self.pt_levels
    }

    /// Penalty charged on the first touch of a page.
    pub fn minor_fault_penalty(&self) -> u64 {
        self.minor_fault_penalty
    }

    /// Virtual-address shift that selects the prefix translated at `level`.
    pub fn shamt(&self, level: u32) -> u32 {
        LOG2_PAGE_SIZE + self.bits_per_level * (level - 1)
    }

    /// Index of the PTE for `vaddr` within its level-`level` page-table page.
    pub fn get_offset(&self, vaddr: Address, level: u32) -> u64 {
        (vaddr.value() >> self.shamt(level)) & bitmask(self.bits_per_level)
    }

    fn alloc_data_page(next_ppage: &mut u64, next_pte_page: u64) -> u64 {
        let page = *next_ppage;
        assert!(
            page > next_pte_page,
            "physical memory exhausted by data pages"
        );
        *next_ppage -= PAGE_SIZE;
        page
    }

    fn alloc_pte_page(next_pte_page: &mut u64, next_ppage: u64) -> u64 {
        let page = *next_pte_page;
        assert!(
            page < next_ppage,
            "physical memory exhausted by page tables"
        );
        *next_pte_page += PAGE_SIZE;
        page
    }

    /// Translates a virtual address, demand-mapping the page on first touch.
    ///
    /// # Returns
    ///
    /// The physical address and the penalty in cycles (the minor-fault
    /// penalty on first touch, zero afterwards).
    pub fn va_to_pa(&mut self, cpu: u32, vaddr: Address) -> (Address, u64) {
        let vpage = vaddr.value() >> LOG2_PAGE_SIZE;
        let next_pte_page = self.next_pte_page;
        let next_ppage = &mut self.next_ppage;
        let mut fault = false;
        let ppage = *self.vpage_map.entry((cpu, vpage)).or_insert_with(|| {
            fault = true;
            Self::alloc_data_page(next_ppage, next_pte_page)
        });
        let paddr = Address::new(ppage).splice(vaddr, LOG2_PAGE_SIZE);
        (paddr, if fault { self.minor_fault_penalty } else { 0 })
    }

    /// Returns the physical address of the PTE read at `level` of a walk for
    /// `vaddr`, demand-mapping the page-table page on first touch.
    ///
    /// # Returns
    ///
    /// The PTE physical address and the penalty in cycles.
    pub fn get_pte_pa(&mut self, cpu: u32, vaddr: Address, level: u32) -> (Address, u64) {
        let prefix = if level >= self.pt_levels {
            0
        } else {
            vaddr.value() >> self.shamt(level + 1)
        };
        let next_ppage = self.next_ppage;
        let next_pte_page = &mut self.next_pte_page;
        let mut fault = false;
        let page = *self
            .page_table
            .entry((cpu, level, prefix))
            .or_insert_with(|| {
                fault = true;
                Self::alloc_pte_page(next_pte_page, next_ppage)
            });
        let offset = self.get_offset(vaddr, level);
        let paddr = Address::new(page).splice(Address::new(offset * PTE_BYTES), LOG2_PAGE_SIZE);
        (paddr, if fault { self.minor_fault_penalty } else { 0 })
    }
}
