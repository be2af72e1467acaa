use crate::models::{BudgetRange, IntentLevel, Timeline, UrgencyLevel, VoucherStatus};

/// Signals the intent classifier reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntentSignals {
    pub urgency: Option<UrgencyLevel>,
    /// Legacy bucket, consulted only when `urgency` is absent.
    pub timeline: Option<Timeline>,
    pub budget: Option<BudgetRange>,
    pub has_recent_tests: Option<bool>,
    pub voucher: Option<VoucherStatus>,
}

fn budget_known(budget: Option<BudgetRange>) -> bool {
    budget.is_some_and(|b| b.is_known())
}

fn from_timeline(timeline: Option<Timeline>, budget: Option<BudgetRange>) -> IntentLevel {
    match timeline {
        Some(Timeline::Asap) | Some(Timeline::OneToThreeMonths) => {
            if budget == Some(BudgetRange::PreferDiscuss) {
                IntentLevel::Medium
            } else {
                IntentLevel::High
            }
        }
        _ => IntentLevel::Low,
    }
}

/// Derives the intent level, first match wins:
///
/// 1. info-only (or legacy "researching" without urgency) is low;
/// 2. 6-12 months is medium with a known budget, else low;
/// 3. 3-6 months is high with a known budget plus recent tests or an
///    approved voucher, else medium;
/// 4. ASAP / 1-3 months is high unless the budget is "prefer to discuss".
pub fn derive_intent_level(signals: &IntentSignals) -> IntentLevel {
    let known = budget_known(signals.budget);
    let voucher_approved = signals.voucher.is_some_and(|v| v.is_approved());

    match signals.urgency {
        Some(UrgencyLevel::InfoOnly) => IntentLevel::Low,
        Some(UrgencyLevel::Later6To12) => {
            if known {
                IntentLevel::Medium
            } else {
                IntentLevel::Low
            }
        }
        Some(UrgencyLevel::Mid3To6) => {
            if known && (signals.has_recent_tests == Some(true) || voucher_approved) {
                IntentLevel::High
            } else {
                IntentLevel::Medium
            }
        }
        Some(UrgencyLevel::Asap0To30) | Some(UrgencyLevel::Soon1To3) => {
            if signals.budget == Some(BudgetRange::PreferDiscuss) {
                IntentLevel::Medium
            } else {
                IntentLevel::High
            }
        }
        None => from_timeline(signals.timeline, signals.budget),
    }
}

/// Two-argument form kept for rows that predate urgency buckets.
pub fn derive_intent_level_legacy(timeline: Timeline, budget: BudgetRange) -> IntentLevel {
    from_timeline(Some(timeline), Some(budget))
}
