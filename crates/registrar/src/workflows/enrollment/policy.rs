use chrono::{DateTime, Utc};

use super::domain::{EnrollmentAction, RefundTier, TermCalendar};

/// Calendar-driven rules deciding which enrollment actions are legal and what
/// refund tier they carry. Pure: same term, instant, and action always yield
/// the same decision.
#[derive(Debug, Clone, Copy)]
pub struct DeadlinePolicy {
    partial_refund_percent: u8,
}

/// Outcome of a policy check. A forbidden action carries the tier that would
/// have applied so callers can explain the rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    pub permitted: bool,
    pub refund_tier: RefundTier,
}

impl DeadlinePolicy {
    pub fn new(partial_refund_percent: u8) -> Self {
        Self {
            partial_refund_percent,
        }
    }

    /// Refund tier by calendar position alone: 100% through the drop
    /// deadline, the configured partial percentage through the withdraw
    /// deadline, nothing after.
    pub fn refund_tier(&self, term: &TermCalendar, now: DateTime<Utc>) -> RefundTier {
        if now <= term.drop_deadline {
            RefundTier::Full
        } else if now <= term.withdraw_deadline {
            RefundTier::Partial(self.partial_refund_percent)
        } else {
            RefundTier::None
        }
    }

    pub fn evaluate(
        &self,
        term: &TermCalendar,
        now: DateTime<Utc>,
        action: EnrollmentAction,
    ) -> PolicyDecision {
        let refund_tier = self.refund_tier(term, now);
        let permitted = match action {
            EnrollmentAction::Add => now <= term.add_deadline,
            EnrollmentAction::Drop => now <= term.drop_deadline,
            // A withdraw is only meaningful once the drop window has closed;
            // before that the registrar expects a drop with full refund.
            EnrollmentAction::Withdraw => {
                now > term.drop_deadline && now <= term.withdraw_deadline
            }
            // Leaving the waitlist is allowed any time the term is still open.
            EnrollmentAction::WaitlistWithdraw => now <= term.withdraw_deadline,
        };

        PolicyDecision {
            permitted,
            refund_tier,
        }
    }
}
