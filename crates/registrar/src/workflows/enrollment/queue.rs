use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use super::domain::{EnrollmentId, SectionId, StudentId};

/// One waiting student. Ordering is strict FIFO by original request time,
/// ties broken by insertion order (the Vec preserves it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSlot {
    pub enrollment_id: EnrollmentId,
    pub student_id: StudentId,
    pub queued_at: DateTime<Utc>,
}

/// Per-section FIFO waitlists. Positions are dense 1..N and derived from the
/// slot index, so removing a slot compacts every later position in the same
/// locked operation; there is no observable instant with a gap.
#[derive(Default)]
pub struct WaitlistQueue {
    sections: RwLock<HashMap<SectionId, Arc<Mutex<SectionQueue>>>>,
}

#[derive(Debug)]
struct SectionQueue {
    slots: Vec<QueueSlot>,
    waitlist_capacity: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("section {0} is not tracked by the waitlist queue")]
    UnknownSection(String),
    #[error("section {0} is already tracked by the waitlist queue")]
    SectionExists(String),
    #[error("waitlist for section {0} is full")]
    WaitlistFull(String),
}

impl WaitlistQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_section(
        &self,
        section_id: &SectionId,
        waitlist_capacity: Option<u32>,
    ) -> Result<(), QueueError> {
        let mut sections = self.sections.write().expect("queue registry poisoned");
        if sections.contains_key(section_id) {
            return Err(QueueError::SectionExists(section_id.0.clone()));
        }
        sections.insert(
            section_id.clone(),
            Arc::new(Mutex::new(SectionQueue {
                slots: Vec::new(),
                waitlist_capacity,
            })),
        );
        Ok(())
    }

    fn cell(&self, section_id: &SectionId) -> Result<Arc<Mutex<SectionQueue>>, QueueError> {
        let sections = self.sections.read().expect("queue registry poisoned");
        sections
            .get(section_id)
            .cloned()
            .ok_or_else(|| QueueError::UnknownSection(section_id.0.clone()))
    }

    /// Append a student to the tail. Returns the 1-based position assigned.
    pub fn enqueue(&self, section_id: &SectionId, slot: QueueSlot) -> Result<u32, QueueError> {
        let cell = self.cell(section_id)?;
        let mut queue = cell.lock().expect("section queue poisoned");
        if let Some(cap) = queue.waitlist_capacity {
            if queue.slots.len() as u32 >= cap {
                return Err(QueueError::WaitlistFull(section_id.0.clone()));
            }
        }
        queue.slots.push(slot);
        Ok(queue.slots.len() as u32)
    }

    /// Pop the head of the queue, if any.
    pub fn dequeue_head(&self, section_id: &SectionId) -> Result<Option<QueueSlot>, QueueError> {
        let cell = self.cell(section_id)?;
        let mut queue = cell.lock().expect("section queue poisoned");
        if queue.slots.is_empty() {
            Ok(None)
        } else {
            Ok(Some(queue.slots.remove(0)))
        }
    }

    /// Mid-queue removal. Later entries shift down by one in the same locked
    /// step, keeping positions contiguous. Returns `false` when the record
    /// was not queued.
    pub fn remove(
        &self,
        section_id: &SectionId,
        enrollment_id: &EnrollmentId,
    ) -> Result<bool, QueueError> {
        let cell = self.cell(section_id)?;
        let mut queue = cell.lock().expect("section queue poisoned");
        match queue
            .slots
            .iter()
            .position(|slot| &slot.enrollment_id == enrollment_id)
        {
            Some(index) => {
                queue.slots.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Put a student back at position 1. Used when a promotion loses the
    /// re-reservation race: first-come priority is never forfeited to a
    /// concurrent direct enrollment.
    pub fn reinstate_front(&self, section_id: &SectionId, slot: QueueSlot) -> Result<(), QueueError> {
        let cell = self.cell(section_id)?;
        let mut queue = cell.lock().expect("section queue poisoned");
        queue.slots.insert(0, slot);
        Ok(())
    }

    /// Snapshot of the queue in promotion order.
    pub fn ordered(&self, section_id: &SectionId) -> Result<Vec<QueueSlot>, QueueError> {
        let cell = self.cell(section_id)?;
        let queue = cell.lock().expect("section queue poisoned");
        Ok(queue.slots.clone())
    }

    /// 1-based rank of a student, `None` when not queued.
    pub fn position_of(
        &self,
        section_id: &SectionId,
        student_id: &StudentId,
    ) -> Result<Option<u32>, QueueError> {
        let cell = self.cell(section_id)?;
        let queue = cell.lock().expect("section queue poisoned");
        Ok(queue
            .slots
            .iter()
            .position(|slot| &slot.student_id == student_id)
            .map(|index| index as u32 + 1))
    }

    pub fn len(&self, section_id: &SectionId) -> Result<u32, QueueError> {
        let cell = self.cell(section_id)?;
        let queue = cell.lock().expect("section queue poisoned");
        Ok(queue.slots.len() as u32)
    }

    pub fn is_empty(&self, section_id: &SectionId) -> Result<bool, QueueError> {
        Ok(self.len(section_id)? == 0)
    }
}
