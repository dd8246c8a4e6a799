//! Hardware page-table walker.
//!
//! Translation requests arrive on the upper channels (from the last TLB
//! level); each becomes a multi-step walk down the radix page table, with one
//! read forwarded to the data hierarchy per level. A per-level page-size cache
//! (PSCL) remembers the page-table pages already reached for a virtual-address
//! prefix, letting later walks skip the upper levels. The final step resolves
//! the translation through the virtual memory emulator and answers the
//! requester with the physical page.
//!
//! Back-pressure is universal: a refused lower-level read leaves the walk
//! where it is and retries next tick.

use std::collections::VecDeque;

use crate::channel::{ChannelId, Channels, RequestPacket, ResponsePacket};
use crate::common::addr::Address;
use crate::common::{AccessType, LOG2_BLOCK_SIZE, LOG2_PAGE_SIZE, PTE_BYTES};
use crate::config::PtwConfig;
use crate::mem::lru_table::LruTable;
use crate::mem::vmem::VirtualMemory;

/// One remembered page-table page for a virtual-address prefix.
#[derive(Clone, Debug)]
pub struct PsclEntry {
    /// Virtual address whose prefix this entry covers.
    pub vaddr: Address,
    /// Physical address of the page-table page read at this level.
    pub ptw_addr: Address,
    /// Walk level of the read this entry accelerates.
    pub level: u32,
}

type Pscl = LruTable<
    PsclEntry,
    Box<dyn Fn(&PsclEntry) -> u64>,
    Box<dyn Fn(&PsclEntry) -> u64>,
>;

/// An in-flight walk step.
#[derive(Clone, Debug)]
struct WalkEntry {
    address: Address,
    v_address: Address,
    data: Address,
    pf_metadata: u32,
    cpu: u32,
    asid: [u8; 2],
    instr_depend_on_me: Vec<u64>,
    to_return: Vec<ChannelId>,
    /// Level of the page-table read currently in flight (pt_levels down to 1).
    translation_level: u32,
}

/// A walk step waiting out a latency before its next action.
struct Pending {
    entry: WalkEntry,
    ready_at: u64,
}

/// The page-table walker component.
pub struct PageTableWalker {
    name: String,
    upper_levels: Vec<ChannelId>,
    lower_level: ChannelId,
    mshr_size: usize,
    max_read: usize,
    max_fill: usize,
    hit_latency: u64,
    /// PSCLs ordered most-general (highest level) first.
    pscl: Vec<(u32, Pscl)>,
    cr3: Address,
    vmem: VirtualMemory,
    mshr: Vec<WalkEntry>,
    /// Intermediate steps whose data has returned, awaiting re-issue.
    finished: VecDeque<Pending>,
    /// Final steps awaiting response delivery.
    completed: VecDeque<Pending>,
    current_cycle: u64,
    warmup: bool,
}

impl PageTableWalker {
    /// Creates a walker for one CPU.
    ///
    /// `vmem` is owned by the walker; the root page (CR3) is demand-mapped at
    /// construction.
    pub fn new(
        name: &str,
        cpu: u32,
        config: &PtwConfig,
        mut vmem: VirtualMemory,
        upper_levels: Vec<ChannelId>,
        lower_level: ChannelId,
    ) -> Self {
        let mut dims: Vec<_> = config
            .pscl
            .iter()
            .copied()
            .filter(|&(level, _, _)| level > 0 && level < vmem.pt_levels())
            .collect();
        dims.sort_by(|a, b| b.0.cmp(&a.0));

        let pscl = dims
            .into_iter()
            .map(|(level, sets, ways)| {
                let shamt = vmem.shamt(level + 1);
                let set_proj: Box<dyn Fn(&PsclEntry) -> u64> =
                    Box::new(move |e: &PsclEntry| e.vaddr.value() >> shamt);
                let shamt2 = shamt;
                let tag_proj: Box<dyn Fn(&PsclEntry) -> u64> =
                    Box::new(move |e: &PsclEntry| e.vaddr.value() >> shamt2);
                (level, LruTable::new(sets, ways, set_proj, tag_proj))
            })
            .collect();

        let (cr3, _) = vmem.get_pte_pa(cpu, Address::new(0), vmem.pt_levels());

        Self {
            name: name.to_string(),
            upper_levels,
            lower_level,
            mshr_size: config.mshr_size,
            max_read: config.max_read,
            max_fill: config.max_fill,
            hit_latency: config.latency,
            pscl,
            cr3,
            vmem,
            mshr: Vec::new(),
            finished: VecDeque::new(),
            completed: VecDeque::new(),
            current_cycle: 0,
            warmup: true,
        }
    }

    /// Switches warmup mode on or off.
    pub fn set_warmup(&mut self, warmup: bool) {
        self.warmup = warmup;
    }

    /// Number of outstanding walks.
    pub fn mshr_occupancy(&self) -> usize {
        self.mshr.len()
    }

    /// Advances the walker by one tick.
    pub fn operate(&mut self, channels: &mut Channels) -> u64 {
        self.current_cycle += 1;
        let mut progress = 0u64;

        let returned: Vec<ResponsePacket> =
            channels[self.lower_level].returned.drain(..).collect();
        for packet in &returned {
            progress += self.finish_packet(packet);
        }

        // Deliver completed translations, then restart finished steps, within
        // one shared fill budget.
        let mut fill_bw = self.max_fill;
        while fill_bw > 0 {
            let ready = self
                .completed
                .front()
                .is_some_and(|p| p.ready_at <= self.current_cycle);
            if !ready {
                break;
            }
            let pending = self.completed.pop_front().unwrap();
            let response = ResponsePacket {
                address: pending.entry.v_address,
                v_address: pending.entry.v_address,
                data: pending.entry.data,
                pf_metadata: pending.entry.pf_metadata,
                instr_depend_on_me: pending.entry.instr_depend_on_me.clone(),
            };
            channels.push_response(&pending.entry.to_return, &response);
            fill_bw -= 1;
            progress += 1;
        }

        while fill_bw > 0 {
            let ready = self
                .finished
                .front()
                .is_some_and(|p| p.ready_at <= self.current_cycle);
            if !ready {
                break;
            }
            let pending = self.finished.pop_front().unwrap();
            match self.handle_fill(pending.entry, channels) {
                Ok(next) => {
                    self.mshr.push(next);
                    fill_bw -= 1;
                    progress += 1;
                }
                Err(entry) => {
                    // Lower level refused; retry this step next tick.
                    self.finished.push_front(Pending {
                        entry,
                        ready_at: self.current_cycle,
                    });
                    break;
                }
            }
        }

        // Admit new walks from the upper channels.
        let mut read_bw = self.max_read;
        for i in 0..self.upper_levels.len() {
            let ul = self.upper_levels[i];
            while read_bw > 0 {
                if self.mshr.len() >= self.mshr_size {
                    break;
                }
                let Some(packet) = channels[ul].rq.front().cloned() else {
                    break;
                };
                match self.handle_read(&packet, ul, channels) {
                    Some(entry) => {
                        channels[ul].rq.pop_front();
                        self.mshr.push(entry);
                        read_bw -= 1;
                        progress += 1;
                    }
                    None => break,
                }
            }
        }

        progress
    }

    /// Starts a walk for a translation request, consulting the PSCLs.
    fn handle_read(
        &mut self,
        packet: &RequestPacket,
        ul: ChannelId,
        channels: &mut Channels,
    ) -> Option<WalkEntry> {
        let mut init = PsclEntry {
            vaddr: packet.address,
            ptw_addr: self.cr3,
            level: self.vmem.pt_levels(),
        };
        // Most-general first; the last hit (most specific) wins.
        for (_, pscl) in &mut self.pscl {
            let probe = PsclEntry {
                vaddr: packet.address,
                ptw_addr: Address::new(0),
                level: 0,
            };
            if let Some(hit) = pscl.check_hit(&probe) {
                init = hit;
            }
        }

        let offset = self.vmem.get_offset(packet.address, init.level) * PTE_BYTES;
        let entry = WalkEntry {
            address: init.ptw_addr.splice(Address::new(offset), LOG2_PAGE_SIZE),
            v_address: packet.address,
            data: Address::new(0),
            pf_metadata: packet.pf_metadata,
            cpu: packet.cpu,
            asid: packet.asid,
            instr_depend_on_me: packet.instr_depend_on_me.clone(),
            to_return: if packet.response_requested {
                vec![ul]
            } else {
                Vec::new()
            },
            translation_level: init.level,
        };

        self.step_translation(entry, channels)
    }

    /// Re-issues a walk one level down after its data returned.
    ///
    /// Returns the stepped entry, or gives the entry back when the lower level
    /// refuses the read.
    fn handle_fill(
        &mut self,
        entry: WalkEntry,
        channels: &mut Channels,
    ) -> Result<WalkEntry, WalkEntry> {
        let next_level = entry.translation_level - 1;
        if let Some((_, pscl)) = self.pscl.iter_mut().find(|(l, _)| *l == next_level) {
            pscl.fill(PsclEntry {
                vaddr: entry.v_address,
                ptw_addr: entry.data,
                level: next_level,
            });
        }

        let stepped = WalkEntry {
            address: entry.data,
            translation_level: next_level,
            ..entry.clone()
        };
        self.step_translation(stepped, channels).ok_or(entry)
    }

    /// Forwards the walk's current read to the data hierarchy.
    fn step_translation(
        &mut self,
        entry: WalkEntry,
        channels: &mut Channels,
    ) -> Option<WalkEntry> {
        let packet = RequestPacket {
            address: entry.address,
            v_address: entry.v_address,
            pf_metadata: entry.pf_metadata,
            cpu: entry.cpu,
            asid: entry.asid,
            ty: AccessType::Translation,
            is_translated: true,
            response_requested: true,
            ..RequestPacket::default()
        };
        if channels[self.lower_level].add_rq(packet) {
            Some(entry)
        } else {
            None
        }
    }

    /// Resolves returned reads against the outstanding walks.
    fn finish_packet(&mut self, packet: &ResponsePacket) -> u64 {
        let block = packet.address.slice_upper(LOG2_BLOCK_SIZE);
        let mut progress = 0;
        let mut idx = 0;
        while idx < self.mshr.len() {
            if self.mshr[idx].address.slice_upper(LOG2_BLOCK_SIZE) != block {
                idx += 1;
                continue;
            }
            let mut entry = self.mshr.remove(idx);
            let last_step = entry.translation_level == 1;
            let (data, mut penalty) = if last_step {
                self.vmem.va_to_pa(entry.cpu, entry.v_address)
            } else {
                self.vmem
                    .get_pte_pa(entry.cpu, entry.v_address, entry.translation_level - 1)
            };
            if !self.warmup {
                penalty += self.hit_latency;
            }
            entry.data = data;
            let pending = Pending {
                entry,
                ready_at: self.current_cycle + penalty,
            };
            if last_step {
                self.completed.push_back(pending);
            } else {
                self.finished.push_back(pending);
            }
            progress += 1;
        }
        progress
    }

    /// Dumps the outstanding walks for deadlock diagnosis.
    pub fn print_deadlock(&self) {
        if self.mshr.is_empty() {
            println!("{} MSHR empty", self.name);
        } else {
            for (i, entry) in self.mshr.iter().enumerate() {
                println!(
                    "[{}_MSHR] entry: {} address: {} v_addr: {} translation_level: {}",
                    self.name, i, entry.address, entry.v_address, entry.translation_level
                );
            }
        }
    }
}
