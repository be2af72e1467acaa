/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs
use proptest::prelude::*;

use fiv_match_api::intent::{derive_intent_level, IntentSignals};
use fiv_match_api::models::{
    BudgetRange, ContactMethod, LeadStatus, LeadTier, Locale, UrgencyLevel, VoucherStatus,
};
use fiv_match_api::routing::normalize_city;
use fiv_match_api::tiering::{compute_tier, TierInput};
use fiv_match_api::validation::{is_valid_email, normalize_ro_phone, validate_submission};

fn urgency() -> impl Strategy<Value = Option<UrgencyLevel>> {
    proptest::option::of(proptest::sample::select(UrgencyLevel::ALL))
}

fn budget() -> impl Strategy<Value = Option<BudgetRange>> {
    proptest::option::of(proptest::sample::select(BudgetRange::ALL))
}

// Property: the intent classifier is total and info-only is always low
proptest! {
    #[test]
    fn intent_is_defined_for_every_combination(
        urgency in urgency(),
        budget in budget(),
        tests in proptest::option::of(any::<bool>()),
        voucher in proptest::option::of(proptest::sample::select(VoucherStatus::ALL)),
    ) {
        let level = derive_intent_level(&IntentSignals {
            urgency,
            timeline: None,
            budget,
            has_recent_tests: tests,
            voucher,
        });
        if urgency == Some(UrgencyLevel::InfoOnly) {
            prop_assert_eq!(level, fiv_match_api::models::IntentLevel::Low);
        }
    }
}

// Property: only operator-verified leads score above D
proptest! {
    #[test]
    fn unverified_leads_are_always_tier_d(
        status in proptest::sample::select(LeadStatus::ALL),
        urgency in urgency(),
        age in proptest::option::of(0i32..120),
        contact in proptest::option::of(proptest::sample::select(ContactMethod::ALL)),
        consent in any::<bool>(),
    ) {
        prop_assume!(status != LeadStatus::VerifiedReady);
        let result = compute_tier(
            &TierInput {
                status,
                urgency,
                consent_to_share: consent,
                female_age_exact: age,
                best_contact_method: contact,
                availability: Some("mornings"),
                has_recent_tests: Some(true),
                tests_list: None,
            },
            Locale::En,
        );
        prop_assert_eq!(result.tier, LeadTier::D);
        prop_assert!(!result.reason.is_empty());
    }

    #[test]
    fn verified_without_consent_is_tier_d(
        urgency in urgency(),
        age in proptest::option::of(20i32..=45),
    ) {
        let result = compute_tier(
            &TierInput {
                status: LeadStatus::VerifiedReady,
                urgency,
                consent_to_share: false,
                female_age_exact: age,
                best_contact_method: Some(ContactMethod::Phone),
                availability: None,
                has_recent_tests: None,
                tests_list: None,
            },
            Locale::Ro,
        );
        prop_assert_eq!(result.tier, LeadTier::D);
    }
}

// Property: city folding is stable and case-insensitive
proptest! {
    #[test]
    fn normalize_city_is_idempotent(city in "\\PC{0,40}") {
        let once = normalize_city(&city);
        prop_assert_eq!(normalize_city(&once), once.clone());
    }

    #[test]
    fn normalize_city_ignores_case(city in "[a-zA-Z ]{1,30}") {
        prop_assert_eq!(normalize_city(&city.to_uppercase()), normalize_city(&city.to_lowercase()));
    }
}

// Property: validators never panic on arbitrary input
proptest! {
    #[test]
    fn email_validation_never_panics(email in "\\PC*") {
        let _ = is_valid_email(&email);
    }

    #[test]
    fn ro_phone_normalization_is_e164(number in 700_000_000u32..=799_999_999u32) {
        let local = format!("0{}", number);
        if let Some(normalized) = normalize_ro_phone(&local) {
            prop_assert!(normalized.starts_with("+40"));
            prop_assert_eq!(normalized.len(), 12);
        }
    }

    #[test]
    fn validation_never_panics_on_arbitrary_fields(
        first in "\\PC{0,20}",
        phone in "\\PC{0,20}",
        age in any::<i64>(),
    ) {
        let body = serde_json::json!({
            "first_name": first,
            "last_name": "Pop",
            "phone": phone,
            "email": "a@b.ro",
            "female_age_exact": age,
            "tried_ivf": "No",
            "budget_range": "under-10k",
            "city": "Iasi",
            "gdpr_consent": true,
            "consent_to_share": true,
            "urgency_level": "SOON_1_3"
        });
        if let Ok(draft) = validate_submission(&body) {
            prop_assert!((18..=50).contains(&draft.female_age_exact));
            prop_assert!(!draft.first_name.is_empty());
        }
    }
}
