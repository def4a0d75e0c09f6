use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};

use super::domain::{EnrollmentId, OfferDecision, SeatOffer, SectionId};
use super::ledger::{CapacityLedger, LedgerError};
use super::queue::{QueueError, QueueSlot, WaitlistQueue};

/// Advances the waitlist head through the offer cycle whenever a seat frees.
///
/// All promotions for one section run under that section's promotion lock, so
/// two seats freeing concurrently promote the two earliest-queued students in
/// order. The lock is distinct from the ledger's seat mutex: the ledger stays
/// cheap for direct enrollments while a promotion is in flight.
pub struct PromotionEngine {
    offer_window: Duration,
    offers: OfferBoard,
    promotion_locks: RwLock<HashMap<SectionId, Arc<Mutex<()>>>>,
}

/// What a single promotion attempt did. The service layer persists records
/// and publishes events based on this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// Waitlist empty; the seat stays open for direct enrollment requests.
    Idle,
    /// Head dequeued, seat re-reserved on their behalf, offer opened.
    Offered { slot: QueueSlot, offer: SeatOffer },
    /// The freed seat was consumed by a concurrent direct enrollment between
    /// dequeue and re-reserve. The student is already back at position 1.
    RaceLost { slot: QueueSlot },
}

#[derive(Debug, thiserror::Error)]
pub enum PromotionError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl PromotionEngine {
    pub fn new(offer_window: Duration) -> Self {
        Self {
            offer_window,
            offers: OfferBoard::default(),
            promotion_locks: RwLock::new(HashMap::new()),
        }
    }

    fn section_lock(&self, section_id: &SectionId) -> Arc<Mutex<()>> {
        {
            let locks = self.promotion_locks.read().expect("promotion registry poisoned");
            if let Some(lock) = locks.get(section_id) {
                return lock.clone();
            }
        }
        let mut locks = self.promotion_locks.write().expect("promotion registry poisoned");
        locks
            .entry(section_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// React to one freed seat: pop the head, re-reserve the seat on their
    /// behalf, and open a timed offer.
    pub fn promote_head(
        &self,
        ledger: &CapacityLedger,
        queue: &WaitlistQueue,
        section_id: &SectionId,
        now: DateTime<Utc>,
    ) -> Result<PromotionOutcome, PromotionError> {
        let lock = self.section_lock(section_id);
        let _serial = lock.lock().expect("promotion lock poisoned");

        let Some(slot) = queue.dequeue_head(section_id)? else {
            return Ok(PromotionOutcome::Idle);
        };

        if !ledger.reserve_seat(section_id)? {
            queue.reinstate_front(section_id, slot.clone())?;
            return Ok(PromotionOutcome::RaceLost { slot });
        }

        let offer = SeatOffer {
            enrollment_id: slot.enrollment_id.clone(),
            student_id: slot.student_id.clone(),
            section_id: section_id.clone(),
            expires_at: now + self.offer_window,
            decision: OfferDecision::Pending,
        };
        self.offers.open(offer.clone());

        Ok(PromotionOutcome::Offered { slot, offer })
    }

    /// Promote heads while the section still has open seats. Used after a
    /// capacity increase, which can free several seats at once.
    pub fn promote_vacancies(
        &self,
        ledger: &CapacityLedger,
        queue: &WaitlistQueue,
        section_id: &SectionId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PromotionOutcome>, PromotionError> {
        let mut outcomes = Vec::new();
        while ledger.has_open_seat(section_id)? {
            let outcome = self.promote_head(ledger, queue, section_id, now)?;
            let stop = !matches!(outcome, PromotionOutcome::Offered { .. });
            if !matches!(outcome, PromotionOutcome::Idle) {
                outcomes.push(outcome);
            }
            if stop {
                break;
            }
        }
        Ok(outcomes)
    }

    /// Claim a pending, unexpired offer as accepted. `None` when there is no
    /// pending offer or it has already lapsed.
    pub fn claim_accepted(&self, enrollment_id: &EnrollmentId, now: DateTime<Utc>) -> Option<SeatOffer> {
        self.offers
            .claim(enrollment_id, OfferDecision::Accepted, |offer| {
                offer.expires_at >= now
            })
    }

    /// Claim a pending offer as declined, regardless of remaining time.
    pub fn claim_declined(&self, enrollment_id: &EnrollmentId) -> Option<SeatOffer> {
        self.offers
            .claim(enrollment_id, OfferDecision::Declined, |_| true)
    }

    /// Claim a pending offer as expired once its window has lapsed. Used both
    /// by the sweep and by an accept that arrives too late.
    pub fn claim_expired(&self, enrollment_id: &EnrollmentId, now: DateTime<Utc>) -> Option<SeatOffer> {
        self.offers
            .claim(enrollment_id, OfferDecision::Expired, |offer| {
                offer.expires_at < now
            })
    }

    /// Claim every lapsed pending offer. Each offer is claimed at most once
    /// across any number of concurrent sweep workers, so processing an entry
    /// twice is impossible.
    pub fn sweep_due(&self, now: DateTime<Utc>) -> Vec<SeatOffer> {
        self.offers.sweep_due(now)
    }

    pub fn pending_offer(&self, enrollment_id: &EnrollmentId) -> Option<SeatOffer> {
        self.offers.pending(enrollment_id)
    }
}

/// In-memory board of live offers keyed by enrollment id.
///
/// The decision field doubles as the claim row: a transition away from
/// `Pending` happens exactly once under the board lock, and the claimed offer
/// is removed from the board, so every consumer follows claim-then-process.
#[derive(Default)]
struct OfferBoard {
    offers: Mutex<HashMap<EnrollmentId, SeatOffer>>,
}

impl OfferBoard {
    fn open(&self, offer: SeatOffer) {
        let mut offers = self.offers.lock().expect("offer board poisoned");
        offers.insert(offer.enrollment_id.clone(), offer);
    }

    fn pending(&self, enrollment_id: &EnrollmentId) -> Option<SeatOffer> {
        let offers = self.offers.lock().expect("offer board poisoned");
        offers
            .get(enrollment_id)
            .filter(|offer| offer.decision == OfferDecision::Pending)
            .cloned()
    }

    fn claim<F>(
        &self,
        enrollment_id: &EnrollmentId,
        decision: OfferDecision,
        eligible: F,
    ) -> Option<SeatOffer>
    where
        F: Fn(&SeatOffer) -> bool,
    {
        let mut offers = self.offers.lock().expect("offer board poisoned");
        let claimable = offers
            .get(enrollment_id)
            .map(|offer| offer.decision == OfferDecision::Pending && eligible(offer))
            .unwrap_or(false);
        if !claimable {
            return None;
        }
        let mut offer = offers.remove(enrollment_id)?;
        offer.decision = decision;
        Some(offer)
    }

    fn sweep_due(&self, now: DateTime<Utc>) -> Vec<SeatOffer> {
        let mut offers = self.offers.lock().expect("offer board poisoned");
        let due: Vec<EnrollmentId> = offers
            .values()
            .filter(|offer| offer.decision == OfferDecision::Pending && offer.expires_at < now)
            .map(|offer| offer.enrollment_id.clone())
            .collect();
        due.into_iter()
            .filter_map(|id| {
                offers.remove(&id).map(|mut offer| {
                    offer.decision = OfferDecision::Expired;
                    offer
                })
            })
            .collect()
    }
}
