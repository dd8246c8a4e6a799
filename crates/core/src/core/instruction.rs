//! Trace records and in-flight instructions.
//!
//! A trace record is the fixed-size on-disk form of one retired instruction:
//! the program counter, branch outcome, and the register/memory operand
//! signature. Branch classification derives entirely from that signature.
//! An `OooInstr` is the record decorated with everything the pipeline tracks:
//! dependency edges, per-stage status, and the earliest cycle the next stage
//! may touch it.

use crate::common::addr::Address;
use crate::common::{
    BranchType, REG_FRAME_POINTER, REG_INSTRUCTION_POINTER, REG_NONE, REG_STACK_POINTER,
};

/// Source register slots in a trace record.
pub const NUM_INSTR_SOURCES: usize = 4;
/// Destination register slots in a trace record.
pub const NUM_INSTR_DESTINATIONS: usize = 2;
/// Source memory slots in a trace record.
pub const NUM_INSTR_SOURCE_MEMORY: usize = 2;
/// Destination memory slots in a trace record.
pub const NUM_INSTR_DESTINATION_MEMORY: usize = 2;

/// Size of one trace record on disk, in bytes.
pub const TRACE_RECORD_BYTES: usize = 8
    + 2
    + NUM_INSTR_DESTINATIONS
    + NUM_INSTR_SOURCES
    + 8 * NUM_INSTR_DESTINATION_MEMORY
    + 8 * NUM_INSTR_SOURCE_MEMORY;

/// One instruction as read from a trace.
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceRecord {
    pub ip: u64,
    pub is_branch: bool,
    pub branch_taken: bool,
    pub destination_registers: [u8; NUM_INSTR_DESTINATIONS],
    pub source_registers: [u8; NUM_INSTR_SOURCES],
    pub destination_memory: [u64; NUM_INSTR_DESTINATION_MEMORY],
    pub source_memory: [u64; NUM_INSTR_SOURCE_MEMORY],
}

impl TraceRecord {
    /// Decodes one little-endian record from `bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than `TRACE_RECORD_BYTES`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        assert!(bytes.len() >= TRACE_RECORD_BYTES, "short trace record");
        let mut record = TraceRecord {
            ip: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            is_branch: bytes[8] != 0,
            branch_taken: bytes[9] != 0,
            ..TraceRecord::default()
        };
        let mut offset = 10;
        for slot in &mut record.destination_registers {
            *slot = bytes[offset];
            offset += 1;
        }
        for slot in &mut record.source_registers {
            *slot = bytes[offset];
            offset += 1;
        }
        for slot in &mut record.destination_memory {
            *slot = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
            offset += 8;
        }
        for slot in &mut record.source_memory {
            *slot = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
            offset += 8;
        }
        record
    }

    /// Classifies the branch from the operand signature.
    pub fn branch_type(&self) -> BranchType {
        if !self.is_branch {
            return BranchType::NotBranch;
        }

        let reads = |reg: u8| self.source_registers.contains(&reg);
        let writes = |reg: u8| self.destination_registers.contains(&reg);
        let reads_ip = reads(REG_INSTRUCTION_POINTER);
        let writes_ip = writes(REG_INSTRUCTION_POINTER);
        let reads_sp = reads(REG_STACK_POINTER);
        let writes_sp = writes(REG_STACK_POINTER);
        let reads_mem = self.source_memory.iter().any(|&a| a != 0);
        let writes_mem = self.destination_memory.iter().any(|&a| a != 0);
        let reads_other = self.source_registers.iter().any(|&r| {
            r != REG_NONE
                && r != REG_INSTRUCTION_POINTER
                && r != REG_STACK_POINTER
                && r != REG_FRAME_POINTER
        });

        if reads_ip && writes_ip && reads_sp && reads_mem {
            BranchType::Return
        } else if reads_ip && writes_ip && writes_sp && writes_mem {
            if reads_other {
                BranchType::IndirectCall
            } else {
                BranchType::DirectCall
            }
        } else if self.branch_taken {
            if reads_other {
                BranchType::Indirect
            } else {
                BranchType::DirectJump
            }
        } else {
            BranchType::Conditional
        }
    }
}

/// Completion state of a stage that takes time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Progress {
    /// Not started.
    #[default]
    NotStarted,
    /// Issued, awaiting completion.
    Inflight,
    /// Done.
    Completed,
}

/// One in-flight instruction.
#[derive(Clone, Debug)]
pub struct OooInstr {
    /// Monotonically increasing identity.
    pub instr_id: u64,
    /// Program counter.
    pub ip: Address,
    pub is_branch: bool,
    pub branch_taken: bool,
    pub branch_type: BranchType,
    /// Actual target (the next instruction's IP for taken branches).
    pub branch_target: Address,
    /// Whether the front end predicted this branch wrong.
    pub branch_mispredicted: bool,
    /// Architectural source registers (zero slots removed).
    pub source_registers: Vec<u8>,
    /// Architectural destination registers (zero slots removed).
    pub destination_registers: Vec<u8>,
    /// Memory read addresses.
    pub source_memory: Vec<Address>,
    /// Memory write addresses.
    pub destination_memory: Vec<Address>,

    /// The DIB held this IP, so decode is skipped.
    pub dib_hit: bool,
    /// The DIB has been probed for this instruction.
    pub dib_checked: bool,
    /// An instruction-cache read covering this IP has been sent.
    pub fetch_issued: bool,
    pub fetched: Progress,
    pub scheduled: bool,
    pub executed: Progress,
    /// Load/store queue entries have been allocated.
    pub lsq_allocated: bool,
    /// Producers this instruction still waits on.
    pub num_reg_dependent: usize,
    /// Memory operations that have completed.
    pub completed_mem_ops: usize,
    /// Earliest cycle the next stage may touch this instruction.
    pub event_cycle: u64,
    /// Instructions whose sources this instruction produces (sorted ids).
    pub registers_instrs_depend_on_me: Vec<u64>,
}

impl OooInstr {
    /// Builds an in-flight instruction from a trace record.
    pub fn from_record(instr_id: u64, record: &TraceRecord) -> Self {
        Self {
            instr_id,
            ip: Address::new(record.ip),
            is_branch: record.is_branch,
            branch_taken: record.branch_taken,
            branch_type: record.branch_type(),
            branch_target: Address::new(0),
            branch_mispredicted: false,
            source_registers: record
                .source_registers
                .iter()
                .copied()
                .filter(|&r| r != REG_NONE)
                .collect(),
            destination_registers: record
                .destination_registers
                .iter()
                .copied()
                .filter(|&r| r != REG_NONE)
                .collect(),
            source_memory: record
                .source_memory
                .iter()
                .filter(|&&a| a != 0)
                .map(|&a| Address::new(a))
                .collect(),
            destination_memory: record
                .destination_memory
                .iter()
                .filter(|&&a| a != 0)
                .map(|&a| Address::new(a))
                .collect(),
            dib_hit: false,
            dib_checked: false,
            fetch_issued: false,
            fetched: Progress::NotStarted,
            scheduled: false,
            executed: Progress::NotStarted,
            lsq_allocated: false,
            num_reg_dependent: 0,
            completed_mem_ops: 0,
            event_cycle: 0,
            registers_instrs_depend_on_me: Vec::new(),
        }
    }

    /// Total memory operations this instruction performs.
    pub fn num_mem_ops(&self) -> usize {
        self.source_memory.len() + self.destination_memory.len()
    }

    /// Whether every memory operation has completed.
    pub fn mem_ops_complete(&self) -> bool {
        self.completed_mem_ops == self.num_mem_ops()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch_record(
        srcs: &[u8],
        dsts: &[u8],
        src_mem: bool,
        dst_mem: bool,
        taken: bool,
    ) -> TraceRecord {
        let mut record = TraceRecord {
            ip: 0x1000,
            is_branch: true,
            branch_taken: taken,
            ..TraceRecord::default()
        };
        for (slot, &reg) in record.source_registers.iter_mut().zip(srcs) {
            *slot = reg;
        }
        for (slot, &reg) in record.destination_registers.iter_mut().zip(dsts) {
            *slot = reg;
        }
        if src_mem {
            record.source_memory[0] = 0x7fff_0000;
        }
        if dst_mem {
            record.destination_memory[0] = 0x7fff_0000;
        }
        record
    }

    const IP: u8 = REG_INSTRUCTION_POINTER;
    const SP: u8 = REG_STACK_POINTER;

    #[test]
    fn test_return_classification() {
        let record = branch_record(&[IP, SP], &[IP], true, false, true);
        assert_eq!(record.branch_type(), BranchType::Return);
    }

    #[test]
    fn test_direct_call_classification() {
        let record = branch_record(&[IP, SP], &[IP, SP], false, true, true);
        assert_eq!(record.branch_type(), BranchType::DirectCall);
    }

    #[test]
    fn test_indirect_call_classification() {
        let record = branch_record(&[IP, SP, 3], &[IP, SP], false, true, true);
        assert_eq!(record.branch_type(), BranchType::IndirectCall);
    }

    #[test]
    fn test_direct_jump_and_indirect() {
        let jump = branch_record(&[IP], &[IP], false, false, true);
        assert_eq!(jump.branch_type(), BranchType::DirectJump);
        let indirect = branch_record(&[IP, 5], &[IP], false, false, true);
        assert_eq!(indirect.branch_type(), BranchType::Indirect);
    }

    #[test]
    fn test_not_taken_is_conditional() {
        let record = branch_record(&[IP], &[IP], false, false, false);
        assert_eq!(record.branch_type(), BranchType::Conditional);
    }

    #[test]
    fn test_non_branch() {
        let record = TraceRecord {
            ip: 0x2000,
            ..TraceRecord::default()
        };
        assert_eq!(record.branch_type(), BranchType::NotBranch);
    }

    #[test]
    fn test_record_round_trip_through_bytes() {
        let mut bytes = [0u8; TRACE_RECORD_BYTES];
        bytes[0..8].copy_from_slice(&0xdead_beefu64.to_le_bytes());
        bytes[8] = 1;
        bytes[9] = 1;
        bytes[10] = 7; // destination register
        bytes[12] = 3; // source register
        let record = TraceRecord::from_bytes(&bytes);
        assert_eq!(record.ip, 0xdead_beef);
        assert!(record.is_branch && record.branch_taken);
        assert_eq!(record.destination_registers[0], 7);
        assert_eq!(record.source_registers[0], 3);
    }

    #[test]
    fn test_instr_filters_empty_slots() {
        let record = branch_record(&[IP, 0, 4], &[IP], false, false, true);
        let instr = OooInstr::from_record(1, &record);
        assert_eq!(instr.source_registers, vec![IP, 4]);
        assert_eq!(instr.destination_registers, vec![IP]);
        assert_eq!(instr.num_mem_ops(), 0);
    }
}
