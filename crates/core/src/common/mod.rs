//! Common types and constants shared across the simulator.
//!
//! This module provides:
//! 1. **Address types:** static and dynamic address slices (`addr`).
//! 2. **Access classification:** memory access and branch types.
//! 3. **Geometry constants:** block and page sizes and their logarithms.

pub mod addr;

pub use self::addr::{lg2, Address};

/// Cache block size in bytes.
pub const BLOCK_SIZE: u64 = 64;

/// Log2 of the cache block size.
pub const LOG2_BLOCK_SIZE: u32 = 6;

/// Page size in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// Log2 of the page size.
pub const LOG2_PAGE_SIZE: u32 = 12;

/// Size of one page-table entry in bytes.
pub const PTE_BYTES: u64 = 8;

/// Number of architectural register names carried by a trace record.
pub const NUM_REGS: usize = 256;

/// Register index meaning "no register".
pub const REG_NONE: u8 = 0;

/// Reserved register index for the stack pointer.
pub const REG_STACK_POINTER: u8 = 25;

/// Reserved register index for the frame pointer.
pub const REG_FRAME_POINTER: u8 = 26;

/// Reserved register index for the instruction pointer.
pub const REG_INSTRUCTION_POINTER: u8 = 27;

/// Retired-instruction interval between heartbeat prints.
pub const STAT_PRINTING_PERIOD: u64 = 10_000_000;

/// Number of ticks with zero progress before the engine declares deadlock.
pub const DEADLOCK_CYCLE: u64 = 65_536;

/// Classification of a memory access as it moves through the hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessType {
    /// Demand read.
    Load,
    /// Read-for-ownership: a read that acquires exclusive access for a write.
    Rfo,
    /// Speculative read issued by a prefetcher.
    Prefetch,
    /// Write (a store at the first level, a writeback below it).
    Write,
    /// Page-table walk read.
    Translation,
}

impl AccessType {
    /// All access types, in stats-reporting order.
    pub const ALL: [AccessType; 5] = [
        AccessType::Load,
        AccessType::Rfo,
        AccessType::Prefetch,
        AccessType::Write,
        AccessType::Translation,
    ];

    /// Returns the index of this type into per-type stats arrays.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            AccessType::Load => 0,
            AccessType::Rfo => 1,
            AccessType::Prefetch => 2,
            AccessType::Write => 3,
            AccessType::Translation => 4,
        }
    }

    /// Returns the display name used in reports and deadlock dumps.
    pub fn name(self) -> &'static str {
        match self {
            AccessType::Load => "LOAD",
            AccessType::Rfo => "RFO",
            AccessType::Prefetch => "PREFETCH",
            AccessType::Write => "WRITE",
            AccessType::Translation => "TRANSLATION",
        }
    }
}

/// Branch classification derived from a trace record's operand signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BranchType {
    /// Not a branch.
    #[default]
    NotBranch,
    /// Unconditional jump to an immediate target.
    DirectJump,
    /// Unconditional jump through a register.
    Indirect,
    /// Conditional branch.
    Conditional,
    /// Call to an immediate target.
    DirectCall,
    /// Call through a register.
    IndirectCall,
    /// Return from a call.
    Return,
    /// A branch that fits no other category.
    Other,
}

impl BranchType {
    /// Number of branch categories (for stats arrays).
    pub const COUNT: usize = 8;

    /// Returns the index of this type into per-type stats arrays.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            BranchType::NotBranch => 0,
            BranchType::DirectJump => 1,
            BranchType::Indirect => 2,
            BranchType::Conditional => 3,
            BranchType::DirectCall => 4,
            BranchType::IndirectCall => 5,
            BranchType::Return => 6,
            BranchType::Other => 7,
        }
    }

    /// Returns the display name used in the final report.
    pub fn name(self) -> &'static str {
        match self {
            BranchType::NotBranch => "NOT_BRANCH",
            BranchType::DirectJump => "BRANCH_DIRECT_JUMP",
            BranchType::Indirect => "BRANCH_INDIRECT",
            BranchType::Conditional => "BRANCH_CONDITIONAL",
            BranchType::DirectCall => "BRANCH_DIRECT_CALL",
            BranchType::IndirectCall => "BRANCH_INDIRECT_CALL",
            BranchType::Return => "BRANCH_RETURN",
            BranchType::Other => "BRANCH_OTHER",
        }
    }
}
