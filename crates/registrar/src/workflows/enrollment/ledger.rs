use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::domain::SectionId;

/// Per-section seat accounting. The single source of truth for "is there a
/// seat": a seat exists exactly when `enrolled < capacity`.
///
/// Lock granularity is one mutex per section. The outer registry lock is held
/// only long enough to look up the section cell, so contention on one
/// section's last seat never blocks another section.
#[derive(Default)]
pub struct CapacityLedger {
    sections: RwLock<HashMap<SectionId, Arc<Mutex<SeatCounters>>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SeatCounters {
    capacity: u32,
    enrolled: u32,
}

/// Snapshot of a section's counters for the read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatCounts {
    pub capacity: u32,
    pub enrolled: u32,
}

/// Result of an administrative capacity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityAdjustment {
    pub previous: u32,
    pub current: u32,
    pub enrolled: u32,
}

impl CapacityAdjustment {
    /// True when the change can have opened seats for the waitlist.
    pub fn widened(&self) -> bool {
        self.current > self.previous
    }

    /// Capacity may legally sit below the live count after an administrative
    /// cut; nobody is dropped, future grants are simply blocked.
    pub fn oversubscribed(&self) -> bool {
        self.enrolled > self.current
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("section {0} is not tracked by the capacity ledger")]
    UnknownSection(String),
    #[error("section {0} is already tracked by the capacity ledger")]
    SectionExists(String),
    #[error("section capacity must be a positive integer")]
    InvalidCapacity,
}

impl CapacityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_section(&self, section_id: &SectionId, capacity: u32) -> Result<(), LedgerError> {
        if capacity == 0 {
            return Err(LedgerError::InvalidCapacity);
        }
        let mut sections = self.sections.write().expect("ledger registry poisoned");
        if sections.contains_key(section_id) {
            return Err(LedgerError::SectionExists(section_id.0.clone()));
        }
        sections.insert(
            section_id.clone(),
            Arc::new(Mutex::new(SeatCounters {
                capacity,
                enrolled: 0,
            })),
        );
        Ok(())
    }

    fn cell(&self, section_id: &SectionId) -> Result<Arc<Mutex<SeatCounters>>, LedgerError> {
        let sections = self.sections.read().expect("ledger registry poisoned");
        sections
            .get(section_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownSection(section_id.0.clone()))
    }

    /// Atomically claim a seat. Exactly one of any set of concurrent callers
    /// racing for the last seat observes `true`.
    pub fn reserve_seat(&self, section_id: &SectionId) -> Result<bool, LedgerError> {
        let cell = self.cell(section_id)?;
        let mut counters = cell.lock().expect("section counters poisoned");
        if counters.enrolled < counters.capacity {
            counters.enrolled += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Atomically give a seat back. Returns `true` when a decrement occurred;
    /// that return value is the promotion trigger.
    pub fn release_seat(&self, section_id: &SectionId) -> Result<bool, LedgerError> {
        let cell = self.cell(section_id)?;
        let mut counters = cell.lock().expect("section counters poisoned");
        if counters.enrolled > 0 {
            counters.enrolled -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn adjust_capacity(
        &self,
        section_id: &SectionId,
        new_capacity: u32,
    ) -> Result<CapacityAdjustment, LedgerError> {
        if new_capacity == 0 {
            return Err(LedgerError::InvalidCapacity);
        }
        let cell = self.cell(section_id)?;
        let mut counters = cell.lock().expect("section counters poisoned");
        let previous = counters.capacity;
        counters.capacity = new_capacity;
        Ok(CapacityAdjustment {
            previous,
            current: new_capacity,
            enrolled: counters.enrolled,
        })
    }

    pub fn seat_counts(&self, section_id: &SectionId) -> Result<SeatCounts, LedgerError> {
        let cell = self.cell(section_id)?;
        let counters = cell.lock().expect("section counters poisoned");
        Ok(SeatCounts {
            capacity: counters.capacity,
            enrolled: counters.enrolled,
        })
    }

    /// True when `enrolled < capacity` at this instant. Advisory only; any
    /// decision must go through `reserve_seat`.
    pub fn has_open_seat(&self, section_id: &SectionId) -> Result<bool, LedgerError> {
        let counts = self.seat_counts(section_id)?;
        Ok(counts.enrolled < counts.capacity)
    }
}
