//! Course-section enrollment: capacity accounting, the enrollment state
//! machine, FIFO waitlists, and seat promotion with timed offers.
//!
//! The capacity ledger is the single source of truth for seats; the waitlist
//! queue owns ordering; the promotion engine advances the head through the
//! offer cycle whenever a seat frees; the deadline policy gates every
//! transition against the term calendar. The service composes the four and
//! is the only writer of seat counters and positions.

pub mod domain;
pub mod ledger;
pub mod policy;
pub mod promotion;
pub mod queue;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{
    EnrollmentAction, EnrollmentId, EnrollmentRecord, EnrollmentStatus, EnrollmentStatusView,
    OfferDecision, RefundTier, SeatOffer, SectionId, SectionProfile, SectionStatusView,
    StatusChange, StudentId, TermCalendar,
};
pub use ledger::{CapacityAdjustment, CapacityLedger, LedgerError, SeatCounts};
pub use policy::{DeadlinePolicy, PolicyDecision};
pub use promotion::{PromotionEngine, PromotionError, PromotionOutcome};
pub use queue::{QueueError, QueueSlot, WaitlistQueue};
pub use repository::{
    EnrollmentEvent, EnrollmentRepository, EventError, EventPublisher, RepositoryError,
};
pub use router::enrollment_router;
pub use service::{EnrollmentError, EnrollmentService};
