//! The clock bus: a cooperative discrete-event engine.
//!
//! Every component registers with a period relative to the base tick. The bus
//! advances global time to the earliest pending tick and reports which
//! components are due, in registration order; the harness dispatches their
//! `operate` calls and reports the summed progress back. A fixed window of
//! global time with zero progress is a deadlock.

use crate::common::DEADLOCK_CYCLE;

/// Stable handle to a registered component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperableId(pub usize);

/// Outcome of a progress report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    /// Something moved recently; keep going.
    Running,
    /// The no-progress window elapsed; the simulation is stuck.
    Deadlocked,
}

struct Slot {
    period: u64,
    next_tick: u64,
}

/// The discrete-event scheduler.
pub struct ClockBus {
    slots: Vec<Slot>,
    global_time: u64,
    last_progress_time: u64,
}

impl Default for ClockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockBus {
    /// Creates an empty bus at time zero.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            global_time: 0,
            last_progress_time: 0,
        }
    }

    /// Registers a component with the given period.
    ///
    /// The first tick fires at `period`. Registration order is the dispatch
    /// order for coincident ticks and never changes afterwards.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn register(&mut self, period: u64) -> OperableId {
        assert!(period > 0, "operable period must be nonzero");
        self.slots.push(Slot {
            period,
            next_tick: period,
        });
        OperableId(self.slots.len() - 1)
    }

    /// Current global time.
    pub fn global_time(&self) -> u64 {
        self.global_time
    }

    /// Advances global time to the earliest pending tick.
    ///
    /// # Returns
    ///
    /// The new global time and the due components in registration order; each
    /// due component's next tick is advanced by its period.
    ///
    /// # Panics
    ///
    /// Panics if no component is registered.
    pub fn advance(&mut self) -> (u64, Vec<OperableId>) {
        let time = self
            .slots
            .iter()
            .map(|slot| slot.next_tick)
            .min()
            .expect("advance called with no operables");
        self.global_time = time;

        let mut due = Vec::new();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.next_tick == time {
                slot.next_tick += slot.period;
                due.push(OperableId(idx));
            }
        }
        (time, due)
    }

    /// Records the progress made at the current time.
    ///
    /// # Returns
    ///
    /// `Deadlocked` once a full no-progress window has elapsed.
    pub fn note_progress(&mut self, progress: u64) -> EngineStatus {
        if progress > 0 {
            self.last_progress_time = self.global_time;
            EngineStatus::Running
        } else if self.global_time - self.last_progress_time >= DEADLOCK_CYCLE {
            EngineStatus::Deadlocked
        } else {
            EngineStatus::Running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_operable_ticks_every_period() {
        let mut bus = ClockBus::new();
        let id = bus.register(3);
        let (time, due) = bus.advance();
        assert_eq!(time, 3);
        assert_eq!(due, vec![id]);
        let (time, _) = bus.advance();
        assert_eq!(time, 6);
    }

    #[test]
    fn test_coincident_ticks_fire_in_registration_order() {
        let mut bus = ClockBus::new();
        let a = bus.register(2);
        let b = bus.register(1);
        let (time, due) = bus.advance();
        assert_eq!(time, 1);
        assert_eq!(due, vec![b]);
        let (time, due) = bus.advance();
        assert_eq!(time, 2);
        assert_eq!(due, vec![a, b]);
    }

    #[test]
    fn test_only_due_components_fire() {
        let mut bus = ClockBus::new();
        let fast = bus.register(1);
        let slow = bus.register(4);
        for expected in 1..4 {
            let (time, due) = bus.advance();
            assert_eq!(time, expected);
            assert_eq!(due, vec![fast]);
        }
        let (_, due) = bus.advance();
        assert_eq!(due, vec![fast, slow]);
    }

    #[test]
    fn test_deadlock_window() {
        let mut bus = ClockBus::new();
        bus.register(1);
        bus.advance();
        assert_eq!(bus.note_progress(1), EngineStatus::Running);
        for _ in 0..DEADLOCK_CYCLE - 1 {
            bus.advance();
            assert_eq!(bus.note_progress(0), EngineStatus::Running);
        }
        bus.advance();
        assert_eq!(bus.note_progress(0), EngineStatus::Deadlocked);
    }

    #[test]
    fn test_progress_resets_the_window() {
        let mut bus = ClockBus::new();
        bus.register(1);
        for _ in 0..DEADLOCK_CYCLE {
            bus.advance();
            bus.note_progress(0);
        }
        bus.advance();
        assert_eq!(bus.note_progress(1), EngineStatus::Running);
        bus.advance();
        assert_eq!(bus.note_progress(0), EngineStatus::Running);
    }
}
