use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::EnrollmentConfig;

use super::domain::{
    EnrollmentAction, EnrollmentId, EnrollmentRecord, EnrollmentStatus, SeatOffer, SectionId,
    SectionProfile, SectionStatusView, StudentId,
};
use super::ledger::{CapacityAdjustment, CapacityLedger, LedgerError};
use super::policy::DeadlinePolicy;
use super::promotion::{PromotionEngine, PromotionError, PromotionOutcome};
use super::queue::{QueueError, QueueSlot, WaitlistQueue};
use super::repository::{
    EnrollmentEvent, EnrollmentRepository, EventError, EventPublisher, RepositoryError,
};

/// Service composing the capacity ledger, waitlist queue, deadline policy,
/// and promotion engine behind the validated inbound surface.
///
/// Locking: the ledger and queue each guard a section with their own short
/// mutex, and only the per-section promotion lock is ever held across them.
/// Promotions for a section therefore serialize, while direct enrollments
/// contend only on the seat mutex itself.
pub struct EnrollmentService<R, E> {
    repository: Arc<R>,
    events: Arc<E>,
    ledger: CapacityLedger,
    queue: WaitlistQueue,
    engine: PromotionEngine,
    policy: DeadlinePolicy,
    directory: RwLock<HashMap<SectionId, SectionProfile>>,
}

static ENROLLMENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_enrollment_id() -> EnrollmentId {
    let id = ENROLLMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    EnrollmentId(format!("enr-{id:06}"))
}

impl<R, E> EnrollmentService<R, E>
where
    R: EnrollmentRepository + 'static,
    E: EventPublisher + 'static,
{
    pub fn new(repository: Arc<R>, events: Arc<E>, config: EnrollmentConfig) -> Self {
        Self {
            repository,
            events,
            ledger: CapacityLedger::new(),
            queue: WaitlistQueue::new(),
            engine: PromotionEngine::new(Duration::hours(config.offer_window_hours)),
            policy: DeadlinePolicy::new(config.partial_refund_percent),
            directory: RwLock::new(HashMap::new()),
        }
    }

    /// Register a section with the core. Upstream CRUD owns the catalog; the
    /// core only accepts requests against sections it tracks.
    pub fn open_section(&self, profile: SectionProfile) -> Result<(), EnrollmentError> {
        if !profile.term.deadlines_ordered() {
            return Err(EnrollmentError::InvalidTermCalendar);
        }
        self.ledger
            .open_section(&profile.section_id, profile.capacity)?;
        self.queue
            .open_section(&profile.section_id, profile.waitlist_capacity)?;
        let mut directory = self.directory.write().expect("section directory poisoned");
        directory.insert(profile.section_id.clone(), profile);
        Ok(())
    }

    fn profile(&self, section_id: &SectionId) -> Result<SectionProfile, EnrollmentError> {
        let directory = self.directory.read().expect("section directory poisoned");
        directory
            .get(section_id)
            .cloned()
            .ok_or_else(|| EnrollmentError::UnknownSection(section_id.0.clone()))
    }

    /// Handle a validated enrollment request. The acting user was authorized
    /// upstream; it is recorded for audit only.
    pub fn request_enrollment(
        &self,
        student_id: StudentId,
        section_id: SectionId,
        acting_user: &str,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentRecord, EnrollmentError> {
        let profile = self.profile(&section_id)?;

        if self
            .repository
            .find_active(&student_id, &section_id)?
            .is_some()
        {
            return Err(EnrollmentError::DuplicateActiveEnrollment);
        }

        let decision = self
            .policy
            .evaluate(&profile.term, now, EnrollmentAction::Add);
        if !decision.permitted {
            return Err(EnrollmentError::DeadlinePassed {
                action: EnrollmentAction::Add,
                term_code: profile.term.term_code,
            });
        }

        let enrollment_id = next_enrollment_id();

        if self.ledger.reserve_seat(&section_id)? {
            let record = EnrollmentRecord::new(
                enrollment_id,
                student_id.clone(),
                section_id.clone(),
                EnrollmentStatus::Enrolled,
                now,
            );
            let stored = match self.repository.insert(record) {
                Ok(stored) => stored,
                Err(err) => {
                    // Give the seat back so a storage fault cannot strand it.
                    self.ledger.release_seat(&section_id)?;
                    return Err(err.into());
                }
            };
            info!(
                student = %student_id.0,
                section = %section_id.0,
                acting_user,
                "seat granted on direct enrollment"
            );
            self.events.publish(EnrollmentEvent::SeatGranted {
                student_id,
                section_id,
            })?;
            return Ok(stored);
        }

        // A denied seat is a normal outcome, not an error: route to waitlist.
        let slot = QueueSlot {
            enrollment_id: enrollment_id.clone(),
            student_id: student_id.clone(),
            queued_at: now,
        };
        let position = match self.queue.enqueue(&section_id, slot) {
            Ok(position) => position,
            Err(QueueError::WaitlistFull(section)) => {
                return Err(EnrollmentError::SectionAndWaitlistFull(section));
            }
            Err(other) => return Err(other.into()),
        };

        let mut record = EnrollmentRecord::new(
            enrollment_id.clone(),
            student_id.clone(),
            section_id.clone(),
            EnrollmentStatus::Waitlisted,
            now,
        );
        record.waitlist_position = Some(position);
        let stored = match self.repository.insert(record) {
            Ok(stored) => stored,
            Err(err) => {
                self.queue.remove(&section_id, &enrollment_id)?;
                return Err(err.into());
            }
        };
        info!(
            student = %student_id.0,
            section = %section_id.0,
            position,
            acting_user,
            "section full, request waitlisted"
        );
        Ok(stored)
    }

    /// Drop an enrolled student inside the drop window. Full refund; the
    /// freed seat goes straight to the waitlist head.
    pub fn request_drop(
        &self,
        enrollment_id: &EnrollmentId,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentRecord, EnrollmentError> {
        self.leave_enrolled(enrollment_id, EnrollmentAction::Drop, now)
    }

    /// Withdraw an enrolled student between the drop and withdraw deadlines.
    /// Partial or no refund per policy; a "W" placeholder is recorded.
    pub fn request_withdraw(
        &self,
        enrollment_id: &EnrollmentId,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentRecord, EnrollmentError> {
        self.leave_enrolled(enrollment_id, EnrollmentAction::Withdraw, now)
    }

    fn leave_enrolled(
        &self,
        enrollment_id: &EnrollmentId,
        action: EnrollmentAction,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentRecord, EnrollmentError> {
        let mut record = self
            .repository
            .fetch(enrollment_id)?
            .ok_or(RepositoryError::NotFound)?;

        if record.status != EnrollmentStatus::Enrolled {
            return Err(EnrollmentError::InvalidTransition {
                status: record.status,
                operation: action.label(),
            });
        }

        let profile = self.profile(&record.section_id)?;
        let decision = self.policy.evaluate(&profile.term, now, action);
        if !decision.permitted {
            return Err(EnrollmentError::DeadlinePassed {
                action,
                term_code: profile.term.term_code,
            });
        }

        let next_status = match action {
            EnrollmentAction::Drop => EnrollmentStatus::Dropped,
            _ => EnrollmentStatus::Withdrawn,
        };
        if matches!(action, EnrollmentAction::Withdraw) {
            record.grade = Some("W".to_string());
        }
        record.transition_to(next_status, now);
        self.repository.update(record.clone())?;
        info!(
            enrollment = %enrollment_id.0,
            section = %record.section_id.0,
            status = record.status.label(),
            refund = decision.refund_tier.percent(),
            "enrolled student left section"
        );
        self.events.publish(EnrollmentEvent::RefundTierAssigned {
            enrollment_id: enrollment_id.clone(),
            tier: decision.refund_tier,
        })?;

        self.free_seat_and_promote(&record.section_id, now)?;
        Ok(record)
    }

    /// Voluntary departure from the waitlist. Remaining positions compact in
    /// the same step; a pending offer is treated as declined and its held
    /// seat moves to the next head.
    pub fn request_waitlist_withdraw(
        &self,
        enrollment_id: &EnrollmentId,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentRecord, EnrollmentError> {
        let mut record = self
            .repository
            .fetch(enrollment_id)?
            .ok_or(RepositoryError::NotFound)?;

        if record.status != EnrollmentStatus::Waitlisted {
            return Err(EnrollmentError::InvalidTransition {
                status: record.status,
                operation: EnrollmentAction::WaitlistWithdraw.label(),
            });
        }

        let profile = self.profile(&record.section_id)?;
        let decision =
            self.policy
                .evaluate(&profile.term, now, EnrollmentAction::WaitlistWithdraw);
        if !decision.permitted {
            return Err(EnrollmentError::DeadlinePassed {
                action: EnrollmentAction::WaitlistWithdraw,
                term_code: profile.term.term_code,
            });
        }

        let held_offer = self.engine.claim_declined(enrollment_id).is_some();
        if !held_offer {
            self.queue.remove(&record.section_id, enrollment_id)?;
        }

        record.transition_to(EnrollmentStatus::Withdrawn, now);
        self.repository.update(record.clone())?;
        info!(
            enrollment = %enrollment_id.0,
            section = %record.section_id.0,
            "student left the waitlist"
        );

        if held_offer {
            self.free_seat_and_promote(&record.section_id, now)?;
        } else {
            self.resync_positions(&record.section_id)?;
        }
        Ok(record)
    }

    /// Accept a pending seat offer. The seat was re-reserved when the offer
    /// was created, so acceptance is a pure record transition.
    pub fn accept_offer(
        &self,
        enrollment_id: &EnrollmentId,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentRecord, EnrollmentError> {
        let mut record = self
            .repository
            .fetch(enrollment_id)?
            .ok_or(RepositoryError::NotFound)?;

        if record.status != EnrollmentStatus::Waitlisted {
            return Err(EnrollmentError::InvalidTransition {
                status: record.status,
                operation: "offer_accept",
            });
        }

        if self.engine.claim_accepted(enrollment_id, now).is_some() {
            record.transition_to(EnrollmentStatus::Enrolled, now);
            self.repository.update(record.clone())?;
            info!(
                enrollment = %enrollment_id.0,
                section = %record.section_id.0,
                "waitlist offer accepted"
            );
            self.events.publish(EnrollmentEvent::SeatGranted {
                student_id: record.student_id.clone(),
                section_id: record.section_id.clone(),
            })?;
            return Ok(record);
        }

        // Lapsed before the sweep reached it: run the expiry path now so the
        // seat is not stranded, then report the late acceptance.
        if let Some(offer) = self.engine.claim_expired(enrollment_id, now) {
            self.expire_offer(offer, now)?;
            return Err(EnrollmentError::OfferExpired(enrollment_id.0.clone()));
        }

        Err(EnrollmentError::NoPendingOffer(enrollment_id.0.clone()))
    }

    /// Decline a pending seat offer. The held seat frees immediately and the
    /// next head is promoted.
    pub fn decline_offer(
        &self,
        enrollment_id: &EnrollmentId,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentRecord, EnrollmentError> {
        let mut record = self
            .repository
            .fetch(enrollment_id)?
            .ok_or(RepositoryError::NotFound)?;

        if self.engine.claim_declined(enrollment_id).is_none() {
            return Err(EnrollmentError::NoPendingOffer(enrollment_id.0.clone()));
        }

        record.transition_to(EnrollmentStatus::Withdrawn, now);
        self.repository.update(record.clone())?;
        info!(
            enrollment = %enrollment_id.0,
            section = %record.section_id.0,
            "waitlist offer declined"
        );
        self.free_seat_and_promote(&record.section_id, now)?;
        Ok(record)
    }

    /// Administrative capacity change, upstream-authorized. Widening triggers
    /// promotion exactly as a drop would; narrowing below the live count
    /// drops nobody and only blocks future grants.
    pub fn adjust_capacity(
        &self,
        section_id: &SectionId,
        new_capacity: u32,
        now: DateTime<Utc>,
    ) -> Result<CapacityAdjustment, EnrollmentError> {
        let adjustment = self.ledger.adjust_capacity(section_id, new_capacity)?;

        {
            let mut directory = self.directory.write().expect("section directory poisoned");
            if let Some(profile) = directory.get_mut(section_id) {
                profile.capacity = new_capacity;
            }
        }

        if adjustment.oversubscribed() {
            warn!(
                section = %section_id.0,
                capacity = adjustment.current,
                enrolled = adjustment.enrolled,
                "capacity cut below live enrollment; attrition will reconcile"
            );
        }

        if adjustment.widened() {
            let outcomes =
                self.engine
                    .promote_vacancies(&self.ledger, &self.queue, section_id, now)?;
            for outcome in outcomes {
                self.apply_promotion(outcome, now)?;
            }
        }

        Ok(adjustment)
    }

    /// Registrar close-out at end of term. Completion is not a seat-freeing
    /// event; the roster simply becomes final.
    pub fn mark_completed(
        &self,
        enrollment_id: &EnrollmentId,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentRecord, EnrollmentError> {
        let mut record = self
            .repository
            .fetch(enrollment_id)?
            .ok_or(RepositoryError::NotFound)?;

        if record.status != EnrollmentStatus::Enrolled {
            return Err(EnrollmentError::InvalidTransition {
                status: record.status,
                operation: "complete",
            });
        }

        record.transition_to(EnrollmentStatus::Completed, now);
        self.repository.update(record.clone())?;
        Ok(record)
    }

    /// Reap every offer whose window lapsed. Safe to run concurrently from
    /// any number of workers: each offer is claimed exactly once, expiry
    /// frees the held seat, and the next head is promoted in FIFO order.
    pub fn sweep_expired_offers(&self, now: DateTime<Utc>) -> Result<u32, EnrollmentError> {
        let mut reaped = 0;
        for offer in self.engine.sweep_due(now) {
            self.expire_offer(offer, now)?;
            reaped += 1;
        }
        Ok(reaped)
    }

    fn expire_offer(&self, offer: SeatOffer, now: DateTime<Utc>) -> Result<(), EnrollmentError> {
        if let Some(mut record) = self.repository.fetch(&offer.enrollment_id)? {
            record.transition_to(EnrollmentStatus::Expired, now);
            self.repository.update(record)?;
        }
        info!(
            enrollment = %offer.enrollment_id.0,
            section = %offer.section_id.0,
            "waitlist offer expired unaccepted"
        );
        self.events.publish(EnrollmentEvent::WaitlistOfferExpired {
            student_id: offer.student_id,
            section_id: offer.section_id.clone(),
        })?;
        self.free_seat_and_promote(&offer.section_id, now)?;
        Ok(())
    }

    /// Release one seat and hand it to the waitlist head, synchronously with
    /// the release so no window exists where the seat is free but unclaimed.
    fn free_seat_and_promote(
        &self,
        section_id: &SectionId,
        now: DateTime<Utc>,
    ) -> Result<(), EnrollmentError> {
        if !self.ledger.release_seat(section_id)? {
            return Ok(());
        }
        self.events.publish(EnrollmentEvent::SeatReleased {
            section_id: section_id.clone(),
        })?;

        let outcome = self
            .engine
            .promote_head(&self.ledger, &self.queue, section_id, now)?;
        self.apply_promotion(outcome, now)
    }

    fn apply_promotion(
        &self,
        outcome: PromotionOutcome,
        _now: DateTime<Utc>,
    ) -> Result<(), EnrollmentError> {
        match outcome {
            PromotionOutcome::Idle => Ok(()),
            PromotionOutcome::RaceLost { slot } => {
                // Recovered internally; the student kept the front of the
                // queue and never observes the race.
                debug!(
                    enrollment = %slot.enrollment_id.0,
                    "promotion lost seat race, head reinstated"
                );
                Ok(())
            }
            PromotionOutcome::Offered { slot, offer } => {
                if let Some(mut record) = self.repository.fetch(&slot.enrollment_id)? {
                    record.waitlist_position = None;
                    self.repository.update(record)?;
                }
                info!(
                    enrollment = %slot.enrollment_id.0,
                    section = %offer.section_id.0,
                    expires_at = %offer.expires_at,
                    "waitlist head promoted, offer opened"
                );
                self.events.publish(EnrollmentEvent::WaitlistOfferCreated {
                    student_id: offer.student_id.clone(),
                    section_id: offer.section_id.clone(),
                    expires_at: offer.expires_at,
                })?;
                self.resync_positions(&offer.section_id)
            }
        }
    }

    /// Re-derive dense positions from queue order after any removal, as one
    /// batch, so records never expose a gap.
    fn resync_positions(&self, section_id: &SectionId) -> Result<(), EnrollmentError> {
        for (index, slot) in self.queue.ordered(section_id)?.into_iter().enumerate() {
            let expected = Some(index as u32 + 1);
            if let Some(mut record) = self.repository.fetch(&slot.enrollment_id)? {
                if record.status == EnrollmentStatus::Waitlisted
                    && record.waitlist_position != expected
                {
                    record.waitlist_position = expected;
                    self.repository.update(record)?;
                }
            }
        }
        Ok(())
    }

    /// Read model for reporting and UI collaborators.
    pub fn section_status(&self, section_id: &SectionId) -> Result<SectionStatusView, EnrollmentError> {
        let counts = self.ledger.seat_counts(section_id)?;
        let waitlist_length = self.queue.len(section_id)?;
        Ok(SectionStatusView {
            section_id: section_id.clone(),
            capacity: counts.capacity,
            enrolled: counts.enrolled,
            waitlist_length,
        })
    }

    pub fn waitlist_position(
        &self,
        student_id: &StudentId,
        section_id: &SectionId,
    ) -> Result<Option<u32>, EnrollmentError> {
        Ok(self.queue.position_of(section_id, student_id)?)
    }

    pub fn get_record(&self, enrollment_id: &EnrollmentId) -> Result<EnrollmentRecord, EnrollmentError> {
        let record = self
            .repository
            .fetch(enrollment_id)?
            .ok_or(RepositoryError::NotFound)?;
        Ok(record)
    }

    pub fn pending_offer(&self, enrollment_id: &EnrollmentId) -> Option<SeatOffer> {
        self.engine.pending_offer(enrollment_id)
    }
}

/// Error raised by the enrollment service. Capacity denial is absent on
/// purpose: a full section routes to the waitlist, and a lost promotion race
/// is recovered internally without surfacing to the student.
#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("the {} window for term {term_code} is closed", .action.label())]
    DeadlinePassed {
        action: EnrollmentAction,
        term_code: String,
    },
    #[error("student already holds an active record for this section")]
    DuplicateActiveEnrollment,
    #[error("section {0} is not open for enrollment")]
    UnknownSection(String),
    #[error("section {0} and its waitlist are both full")]
    SectionAndWaitlistFull(String),
    #[error("term deadlines must be ordered add <= drop <= withdraw")]
    InvalidTermCalendar,
    #[error("{operation} is not legal from status {}", .status.label())]
    InvalidTransition {
        status: EnrollmentStatus,
        operation: &'static str,
    },
    #[error("the seat offer for enrollment {0} has expired")]
    OfferExpired(String),
    #[error("no pending seat offer for enrollment {0}")]
    NoPendingOffer(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Event(#[from] EventError),
}

impl From<PromotionError> for EnrollmentError {
    fn from(value: PromotionError) -> Self {
        match value {
            PromotionError::Ledger(err) => Self::Ledger(err),
            PromotionError::Queue(err) => Self::Queue(err),
        }
    }
}
