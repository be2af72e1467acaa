//! Operator-facing priority tiers (A-D) with a human-readable reason.

use crate::models::{ContactMethod, Lead, LeadStatus, LeadTier, Locale, UrgencyLevel};

/// Youngest female age that counts as "optimal" when scoring.
pub const SCORING_AGE_MIN: i32 = 20;
/// Oldest female age that counts as "optimal" when scoring.
pub const SCORING_AGE_MAX: i32 = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierInput<'a> {
    pub status: LeadStatus,
    pub urgency: Option<UrgencyLevel>,
    pub consent_to_share: bool,
    pub female_age_exact: Option<i32>,
    pub best_contact_method: Option<ContactMethod>,
    pub availability: Option<&'a str>,
    pub has_recent_tests: Option<bool>,
    pub tests_list: Option<&'a str>,
}

impl<'a> TierInput<'a> {
    /// Scores `lead` as if it were in `status`.
    pub fn for_lead(lead: &'a Lead, status: LeadStatus) -> Self {
        Self {
            status,
            urgency: lead.urgency_level,
            consent_to_share: lead.consent_to_share,
            female_age_exact: lead.female_age_exact,
            best_contact_method: lead.best_contact_method,
            availability: lead.availability.as_deref(),
            has_recent_tests: lead.has_recent_tests,
            tests_list: lead.tests_list.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierResult {
    pub tier: LeadTier,
    pub reason: String,
}

fn tr(locale: Locale, ro: &str, en: &str) -> String {
    match locale {
        Locale::Ro => ro.to_string(),
        Locale::En => en.to_string(),
    }
}

fn filled(text: Option<&str>) -> bool {
    text.is_some_and(|t| !t.trim().is_empty())
}

/// Computes the tier. Only a lead in `VERIFIED_READY` can score above D.
pub fn compute_tier(input: &TierInput<'_>, locale: Locale) -> TierResult {
    let d = |reason: String| TierResult {
        tier: LeadTier::D,
        reason,
    };

    match input.status {
        LeadStatus::VerifiedReady => {}
        LeadStatus::LowIntentNurture => {
            return d(tr(
                locale,
                "Lead cu intenție scăzută sau doar informare",
                "Low intent or information-only lead",
            ))
        }
        LeadStatus::Invalid => {
            return d(tr(locale, "Lead marcat ca invalid", "Lead marked as invalid"))
        }
        _ => {
            return d(tr(
                locale,
                "Lead neverificat de operator",
                "Lead not verified by operator",
            ))
        }
    }

    if !input.consent_to_share {
        return d(tr(locale, "Fără consimțământ pentru partajare", "No consent to share"));
    }

    match input.urgency {
        Some(UrgencyLevel::InfoOnly) => {
            return d(tr(
                locale,
                "Doar informare, fără urgență",
                "Information only, no urgency",
            ))
        }
        Some(UrgencyLevel::Later6To12) => {
            return TierResult {
                tier: LeadTier::C,
                reason: tr(locale, "Urgență scăzută (6-12 luni)", "Low urgency (6-12 months)"),
            }
        }
        _ => {}
    }

    let good_urgency = input.urgency.is_some_and(|u| u.is_good());
    let good_age = input
        .female_age_exact
        .is_some_and(|age| (SCORING_AGE_MIN..=SCORING_AGE_MAX).contains(&age));
    let has_contact = input.best_contact_method.is_some();
    let has_availability = filled(input.availability);
    let has_tests = input.has_recent_tests == Some(true) || filled(input.tests_list);

    if good_urgency && good_age && has_contact {
        let mut reason = tr(
            locale,
            "Lead verificat, urgență bună, vârstă optimă, metodă de contact disponibilă",
            "Verified lead, good urgency, optimal age, contact method available",
        );
        let suffix = match (has_availability, has_tests) {
            (true, true) => Some(tr(
                locale,
                ", disponibilitate și analize documentate",
                ", availability and tests documented",
            )),
            (true, false) => Some(tr(
                locale,
                ", disponibilitate documentată",
                ", availability documented",
            )),
            (false, true) => Some(tr(locale, ", analize documentate", ", tests documented")),
            (false, false) => None,
        };
        if let Some(suffix) = suffix {
            reason.push_str(&suffix);
        }
        return TierResult {
            tier: LeadTier::A,
            reason,
        };
    }

    if good_urgency {
        let mut missing = Vec::new();
        if !good_age {
            missing.push(tr(locale, "vârstă", "age"));
        }
        if !has_contact {
            missing.push(tr(locale, "metodă contact", "contact method"));
        }
        if !has_availability {
            missing.push(tr(locale, "disponibilitate", "availability"));
        }
        if !has_tests {
            missing.push(tr(locale, "informații analize", "test info"));
        }
        let missing = missing.join(", ");
        return TierResult {
            tier: LeadTier::B,
            reason: match locale {
                Locale::Ro => format!("Lead verificat cu urgență bună, dar lipsește: {}", missing),
                Locale::En => format!("Verified lead with good urgency, but missing: {}", missing),
            },
        };
    }

    TierResult {
        tier: LeadTier::C,
        reason: tr(
            locale,
            "Lead verificat dar cu urgență scăzută sau informații incomplete",
            "Verified lead but with low urgency or incomplete information",
        ),
    }
}
