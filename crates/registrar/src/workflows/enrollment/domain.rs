use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for students, issued upstream by the identity system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudentId(pub String);

/// Identifier wrapper for course sections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionId(pub String);

/// Identifier wrapper for enrollment records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnrollmentId(pub String);

/// Term calendar governing which enrollment actions are open. The three
/// deadlines are ordered: add <= drop <= withdraw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCalendar {
    pub term_code: String,
    pub add_deadline: DateTime<Utc>,
    pub drop_deadline: DateTime<Utc>,
    pub withdraw_deadline: DateTime<Utc>,
}

impl TermCalendar {
    pub fn deadlines_ordered(&self) -> bool {
        self.add_deadline <= self.drop_deadline && self.drop_deadline <= self.withdraw_deadline
    }
}

/// Section definition registered with the enrollment core before any request
/// is accepted. Seat counters are owned by the capacity ledger, never here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionProfile {
    pub section_id: SectionId,
    pub term: TermCalendar,
    pub capacity: u32,
    /// `None` means the waitlist is unbounded.
    pub waitlist_capacity: Option<u32>,
}

/// Lifecycle states for one (student, section) relationship. `requested` is
/// transient and never persisted standalone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Enrolled,
    Waitlisted,
    Dropped,
    Withdrawn,
    Completed,
    Expired,
}

impl EnrollmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            EnrollmentStatus::Enrolled => "enrolled",
            EnrollmentStatus::Waitlisted => "waitlisted",
            EnrollmentStatus::Dropped => "dropped",
            EnrollmentStatus::Withdrawn => "withdrawn",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Expired => "expired",
        }
    }

    /// A student may hold at most one active record per section.
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            EnrollmentStatus::Enrolled | EnrollmentStatus::Waitlisted
        )
    }
}

/// Calendar-gated actions a caller can request against a record or section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentAction {
    Add,
    Drop,
    Withdraw,
    WaitlistWithdraw,
}

impl EnrollmentAction {
    pub const fn label(self) -> &'static str {
        match self {
            EnrollmentAction::Add => "add",
            EnrollmentAction::Drop => "drop",
            EnrollmentAction::Withdraw => "withdraw",
            EnrollmentAction::WaitlistWithdraw => "waitlist_withdraw",
        }
    }
}

/// Refund consequence attached to a permitted drop or withdraw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "tier", content = "percent")]
pub enum RefundTier {
    Full,
    Partial(u8),
    None,
}

impl RefundTier {
    pub const fn percent(self) -> u8 {
        match self {
            RefundTier::Full => 100,
            RefundTier::Partial(percent) => percent,
            RefundTier::None => 0,
        }
    }
}

/// One entry in a record's append-only transition history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: EnrollmentStatus,
    pub changed_at: DateTime<Utc>,
}

/// The persisted relationship between a student and a section. Records are
/// never hard-deleted; every transition appends to `history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub enrollment_id: EnrollmentId,
    pub student_id: StudentId,
    pub section_id: SectionId,
    pub status: EnrollmentStatus,
    /// Dense 1..N rank, present only while the record sits in the waitlist
    /// queue. Cleared when the student is dequeued for an offer.
    pub waitlist_position: Option<u32>,
    pub requested_at: DateTime<Utc>,
    pub enrolled_at: Option<DateTime<Utc>>,
    pub status_changed_at: DateTime<Utc>,
    /// Grade placeholder. Grade computation is out of scope; a withdraw
    /// records the registrar's "W" marker here.
    pub grade: Option<String>,
    pub history: Vec<StatusChange>,
}

impl EnrollmentRecord {
    pub fn new(
        enrollment_id: EnrollmentId,
        student_id: StudentId,
        section_id: SectionId,
        status: EnrollmentStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            enrollment_id,
            student_id,
            section_id,
            status,
            waitlist_position: None,
            requested_at: now,
            enrolled_at: matches!(status, EnrollmentStatus::Enrolled).then_some(now),
            status_changed_at: now,
            grade: None,
            history: vec![StatusChange {
                status,
                changed_at: now,
            }],
        }
    }

    /// Apply a transition, preserving the audit trail.
    pub fn transition_to(&mut self, status: EnrollmentStatus, now: DateTime<Utc>) {
        self.status = status;
        self.status_changed_at = now;
        if matches!(status, EnrollmentStatus::Enrolled) {
            self.enrolled_at = Some(now);
        }
        if !matches!(status, EnrollmentStatus::Waitlisted) {
            self.waitlist_position = None;
        }
        self.history.push(StatusChange {
            status,
            changed_at: now,
        });
    }

    pub fn status_view(&self) -> EnrollmentStatusView {
        EnrollmentStatusView {
            enrollment_id: self.enrollment_id.clone(),
            student_id: self.student_id.clone(),
            section_id: self.section_id.clone(),
            status: self.status.label(),
            waitlist_position: self.waitlist_position,
            grade: self.grade.clone(),
        }
    }
}

/// Sanitized representation of a record's exposed status.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentStatusView {
    pub enrollment_id: EnrollmentId,
    pub student_id: StudentId,
    pub section_id: SectionId,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waitlist_position: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
}

/// Decision states for a timed seat offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferDecision {
    Pending,
    Accepted,
    Declined,
    Expired,
}

/// A time-boxed opportunity for a waitlisted student to claim a freed seat.
/// Ephemeral: created by the promotion engine, consumed on accept, decline,
/// or expiry, never persisted beyond its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatOffer {
    pub enrollment_id: EnrollmentId,
    pub student_id: StudentId,
    pub section_id: SectionId,
    pub expires_at: DateTime<Utc>,
    pub decision: OfferDecision,
}

/// Read model for a section exposed to reporting and UI collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionStatusView {
    pub section_id: SectionId,
    pub capacity: u32,
    pub enrolled: u32,
    pub waitlist_length: u32,
}
