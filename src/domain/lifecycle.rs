use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::domain::{
    entities::subscriptions::SubscriptionEntity,
    value_objects::{
        enums::{
            access_modes::AccessMode, billing_cycles::BillingCycle,
            subscription_statuses::SubscriptionStatus,
        },
        webhook_events::{CanonicalEvent, NormalizedEvent},
    },
};

/// Tunables for payment-failure handling, loaded from config at startup.
#[derive(Debug, Clone)]
pub struct BillingPolicy {
    pub grace_period_days: i64,
    pub max_failed_payments: i32,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            grace_period_days: 7,
            max_failed_payments: 3,
        }
    }
}

/// The full set of mutable subscription fields after a transition. Writers
/// persist this with an expected-version compare-and-swap.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionChanges {
    pub status: SubscriptionStatus,
    pub plan_code: String,
    pub billing_cycle: BillingCycle,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub auto_renewing: bool,
    pub failed_payment_count: i32,
    pub pending_proration_minor: i64,
}

impl SubscriptionChanges {
    /// Starting point that keeps every field as it currently is.
    pub fn carry(subscription: &SubscriptionEntity) -> Self {
        Self {
            status: subscription.status_enum(),
            plan_code: subscription.plan_code.clone(),
            billing_cycle: subscription.billing_cycle_enum(),
            current_period_start: subscription.current_period_start,
            current_period_end: subscription.current_period_end,
            grace_period_ends_at: subscription.grace_period_ends_at,
            cancel_at_period_end: subscription.cancel_at_period_end,
            auto_renewing: subscription.auto_renewing,
            failed_payment_count: subscription.failed_payment_count,
            pending_proration_minor: subscription.pending_proration_minor,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("subscription is terminal ({0}) and cannot transition")]
    Terminal(SubscriptionStatus),
    #[error("cannot {action} a subscription in status {status}")]
    Invalid {
        action: &'static str,
        status: SubscriptionStatus,
    },
}

/// Applies a canonical billing event to a subscription snapshot and returns
/// the resulting field set. Pure: no clock reads, no I/O; callers supply
/// `now` and persist the result under an optimistic version guard.
pub fn apply(
    subscription: &SubscriptionEntity,
    event: &NormalizedEvent,
    policy: &BillingPolicy,
    now: DateTime<Utc>,
) -> Result<SubscriptionChanges, TransitionError> {
    let status = subscription.status_enum();
    if status.is_terminal() {
        return Err(TransitionError::Terminal(status));
    }

    let canonical = match &event.canonical {
        Some(canonical) => canonical,
        None => return Ok(SubscriptionChanges::carry(subscription)),
    };

    let mut changes = SubscriptionChanges::carry(subscription);
    match canonical {
        CanonicalEvent::SubscriptionActivated => {
            changes.status = SubscriptionStatus::Active;
            changes.failed_payment_count = 0;
            changes.grace_period_ends_at = None;
            changes.auto_renewing = true;
            changes.current_period_start = Some(event.period_start.unwrap_or(now));
            changes.current_period_end = event
                .period_end
                .or_else(|| period_end_fallback(event.period_start.unwrap_or(now), &changes));
        }
        CanonicalEvent::RenewalSucceeded => {
            let start = event
                .period_start
                .or(subscription.current_period_end)
                .unwrap_or(now);
            changes.status = SubscriptionStatus::Active;
            changes.failed_payment_count = 0;
            changes.grace_period_ends_at = None;
            changes.current_period_start = Some(start);
            changes.current_period_end = event
                .period_end
                .or_else(|| period_end_fallback(start, &changes));
        }
        CanonicalEvent::PaymentFailed => {
            changes.failed_payment_count = subscription.failed_payment_count + 1;
            if changes.failed_payment_count >= policy.max_failed_payments {
                changes.status = SubscriptionStatus::Expired;
                changes.grace_period_ends_at = None;
                changes.auto_renewing = false;
            } else {
                changes.status = SubscriptionStatus::PastDue;
                if subscription.grace_period_ends_at.is_none() {
                    changes.grace_period_ends_at =
                        Some(now + Duration::days(policy.grace_period_days));
                }
            }
        }
        CanonicalEvent::SubscriptionCancelled { immediate } => {
            if *immediate {
                changes.status = SubscriptionStatus::Cancelled;
                changes.auto_renewing = false;
                changes.grace_period_ends_at = None;
            } else {
                changes.cancel_at_period_end = true;
                changes.auto_renewing = false;
            }
        }
        CanonicalEvent::SubscriptionPaused => {
            if !matches!(
                status,
                SubscriptionStatus::Active | SubscriptionStatus::Trialing
            ) {
                return Err(TransitionError::Invalid {
                    action: "pause",
                    status,
                });
            }
            changes.status = SubscriptionStatus::Paused;
        }
        CanonicalEvent::SubscriptionResumed => {
            if status != SubscriptionStatus::Paused {
                return Err(TransitionError::Invalid {
                    action: "resume",
                    status,
                });
            }
            changes.status = SubscriptionStatus::Active;
        }
        CanonicalEvent::PlanChanged {
            plan_code,
            billing_cycle,
        } => {
            changes.plan_code = plan_code.clone();
            changes.billing_cycle = *billing_cycle;
        }
    }

    Ok(changes)
}

fn period_end_fallback(
    start: DateTime<Utc>,
    changes: &SubscriptionChanges,
) -> Option<DateTime<Utc>> {
    Some(start + Duration::days(changes.billing_cycle.total_days()))
}

/// Proration owed for switching plans mid-period:
/// `(remaining_days / total_days) * (new_price - old_price)`, floored toward
/// zero in integer minor units. Negative results are credits.
pub fn proration_adjustment_minor(
    remaining_days: i64,
    total_days: i64,
    new_price_minor: i64,
    old_price_minor: i64,
) -> i64 {
    if total_days <= 0 || remaining_days <= 0 {
        return 0;
    }
    let remaining = remaining_days.min(total_days);
    (new_price_minor - old_price_minor) * remaining / total_days
}

/// Maps a subscription snapshot to the device access mode. Pure so devices
/// can evaluate their cached copy offline with their own clock.
pub fn access_mode_for(
    status: SubscriptionStatus,
    grace_period_ends_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> AccessMode {
    match status {
        SubscriptionStatus::Active | SubscriptionStatus::Trialing => AccessMode::Full,
        SubscriptionStatus::PastDue => match grace_period_ends_at {
            Some(grace_end) if now < grace_end => AccessMode::Grace,
            _ => AccessMode::Blocked,
        },
        SubscriptionStatus::Pending
        | SubscriptionStatus::Paused
        | SubscriptionStatus::Cancelled
        | SubscriptionStatus::Expired => AccessMode::Blocked,
    }
}
