use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{EnrollmentId, EnrollmentRecord, RefundTier, SectionId, StudentId};

/// Storage abstraction so the service module can be exercised in isolation.
/// Records are append-only from the caller's perspective: updates replace the
/// row but the record itself carries its full transition history.
pub trait EnrollmentRepository: Send + Sync {
    fn insert(&self, record: EnrollmentRecord) -> Result<EnrollmentRecord, RepositoryError>;
    fn update(&self, record: EnrollmentRecord) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &EnrollmentId) -> Result<Option<EnrollmentRecord>, RepositoryError>;
    /// The unique active record for a (student, section) pair, if one exists.
    fn find_active(
        &self,
        student_id: &StudentId,
        section_id: &SectionId,
    ) -> Result<Option<EnrollmentRecord>, RepositoryError>;
}

/// Error enumeration for repository failures. `Unavailable` is the only
/// failure the core cannot recover from; it propagates to the caller as a
/// generic retryable error.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Outbound hook for notification and billing collaborators.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: EnrollmentEvent) -> Result<(), EventError>;
}

/// Domain events emitted by the enrollment core. Delivery mechanics are out
/// of scope; only the trigger is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EnrollmentEvent {
    SeatGranted {
        student_id: StudentId,
        section_id: SectionId,
    },
    SeatReleased {
        section_id: SectionId,
    },
    WaitlistOfferCreated {
        student_id: StudentId,
        section_id: SectionId,
        expires_at: DateTime<Utc>,
    },
    WaitlistOfferExpired {
        student_id: StudentId,
        section_id: SectionId,
    },
    RefundTierAssigned {
        enrollment_id: EnrollmentId,
        tier: RefundTier,
    },
}

/// Event dispatch error.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event transport unavailable: {0}")]
    Transport(String),
}
