//! Sanitizes and validates a raw submission into a typed [`LeadDraft`].

use once_cell::sync::Lazy;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use serde_json::{Map, Value};

use crate::errors::FieldErrors;
use crate::locale::{field_error_message, resolve_locale, FieldError, Locale};
use crate::models::{
    AgeRange, BudgetRange, ContactMethod, PrimaryFactor, TestStatus, Timeline, TriedIvf,
    UrgencyLevel, VoucherStatus,
};

/// Every free-text field is capped at this many characters.
pub const MAX_TEXT_LEN: usize = 500;

pub const FEMALE_AGE_MIN: i64 = 18;
pub const FEMALE_AGE_MAX: i64 = 50;
pub const MALE_AGE_MIN: i64 = 18;
pub const MALE_AGE_MAX: i64 = 70;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));
static PHONE_SEPARATORS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s\-.()]").expect("valid separator regex"));

/// A sanitized, typed submission ready for the abuse gate's content check.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadDraft {
    pub locale: Locale,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    /// E.164 form, when libphonenumber recognises the number as Romanian.
    pub phone_e164: Option<String>,
    pub email: String,
    pub city: String,
    pub age_range: AgeRange,
    pub female_age_exact: i32,
    pub male_age_exact: Option<i32>,
    pub tried_ivf: TriedIvf,
    pub urgency_level: UrgencyLevel,
    pub timeline: Timeline,
    pub budget_range: BudgetRange,
    pub test_status: Option<TestStatus>,
    pub voucher_status: Option<VoucherStatus>,
    pub primary_factor: Option<PrimaryFactor>,
    pub has_recent_tests: Option<bool>,
    pub tests_list: Option<String>,
    pub prior_clinics: Option<String>,
    pub availability: Option<String>,
    pub best_contact_method: Option<ContactMethod>,
    pub message: Option<String>,
    /// Character count of the trimmed message before capping.
    pub message_len: usize,
    pub gdpr_consent: bool,
    pub consent_to_share: bool,
}

/// Field-level rejection, localized for the submitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub locale: Locale,
    pub fields: FieldErrors,
}

fn raw_text(raw: &Map<String, Value>, key: &str) -> String {
    raw.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Trims and caps a string field; anything that is not a string becomes empty.
pub fn sanitize(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(|s| s.trim().chars().take(MAX_TEXT_LEN).collect())
        .unwrap_or_default()
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.is_empty())
}

/// Reads an integer the way a lenient form post sends it: a JSON number or
/// a string with a leading integer ("34", "34 ani").
fn parse_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            let (sign, rest) = match s.strip_prefix('-') {
                Some(rest) => (-1, rest),
                None => (1, s.strip_prefix('+').unwrap_or(s)),
            };
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<i64>().ok().map(|n| sign * n)
        }
        _ => None,
    }
}

/// Strips spaces, dashes, dots and parentheses from a phone number.
pub fn strip_phone(raw: &str) -> String {
    PHONE_SEPARATORS_RE.replace_all(raw, "").into_owned()
}

/// Loose Romania-oriented phone check: `+40`, `40` or `0` prefix and
/// 10 to 13 digits once separators are removed.
pub fn is_valid_phone(raw: &str) -> bool {
    let stripped = strip_phone(raw);
    if !(stripped.starts_with("+40") || stripped.starts_with("40") || stripped.starts_with('0')) {
        return false;
    }
    let digits = stripped.chars().filter(|c| c.is_ascii_digit()).count();
    (10..=13).contains(&digits)
}

/// Normalizes a Romanian number to E.164 when libphonenumber accepts it.
pub fn normalize_ro_phone(raw: &str) -> Option<String> {
    match phonenumber::parse(Some(CountryId::RO), strip_phone(raw)) {
        Ok(number) if phonenumber::is_valid(&number) => {
            Some(number.format().mode(Mode::E164).to_string())
        }
        Ok(_) => {
            tracing::debug!("Phone passed the loose check but is not a valid RO number");
            None
        }
        Err(e) => {
            tracing::debug!("Failed to parse RO phone: {:?}", e);
            None
        }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "yes" || s == "true",
        _ => false,
    }
}

/// Validates a raw submission.
///
/// Required enums are rejected when unknown; optional enums
/// (primary factor, voucher, contact method, test status) are dropped.
pub fn validate_submission(body: &Value) -> Result<LeadDraft, ValidationFailure> {
    let Some(raw) = body.as_object() else {
        let mut fields = FieldErrors::new();
        fields.insert(
            "_form".to_string(),
            field_error_message(FieldError::InvalidBody, Locale::Ro).to_string(),
        );
        return Err(ValidationFailure {
            locale: Locale::Ro,
            fields,
        });
    };

    let locale = resolve_locale(raw.get("locale"));
    let mut errors = FieldErrors::new();
    let mut reject = |field: &str, key: FieldError| {
        errors.insert(field.to_string(), field_error_message(key, locale).to_string());
    };

    let first_name = sanitize(raw.get("first_name"));
    let last_name = sanitize(raw.get("last_name"));
    let phone = sanitize(raw.get("phone"));
    let email = sanitize(raw.get("email"));
    let city = sanitize(raw.get("city"));
    let raw_message = raw_text(raw, "message");
    let message_len = raw_message.chars().count();
    let message = sanitize(raw.get("message"));

    if first_name.is_empty() {
        reject("first_name", FieldError::FirstNameRequired);
    }
    if last_name.is_empty() {
        reject("last_name", FieldError::LastNameRequired);
    }

    if phone.is_empty() {
        reject("phone", FieldError::PhoneRequired);
    } else if !is_valid_phone(&phone) {
        reject("phone", FieldError::PhoneInvalid);
    }

    if email.is_empty() {
        reject("email", FieldError::EmailRequired);
    } else if !is_valid_email(&email) {
        reject("email", FieldError::EmailInvalid);
    }

    let female_age = parse_int(raw.get("female_age_exact"))
        .filter(|age| (FEMALE_AGE_MIN..=FEMALE_AGE_MAX).contains(age));
    if female_age.is_none() {
        reject("female_age_exact", FieldError::FemaleAgeExactRequired);
    }

    let tried_ivf = TriedIvf::parse(&sanitize(raw.get("tried_ivf")));
    if tried_ivf.is_none() {
        reject("tried_ivf", FieldError::TriedIvfInvalid);
    }

    let budget_range = BudgetRange::parse(&sanitize(raw.get("budget_range")));
    if budget_range.is_none() {
        reject("budget_range", FieldError::BudgetRangeInvalid);
    }

    if city.is_empty() {
        reject("city", FieldError::CityRequired);
    }

    let gdpr_consent = raw.get("gdpr_consent") == Some(&Value::Bool(true));
    if !gdpr_consent {
        reject("gdpr_consent", FieldError::GdprRequired);
    }
    let consent_to_share = raw.get("consent_to_share") == Some(&Value::Bool(true));
    if !consent_to_share {
        reject("consent_to_share", FieldError::ConsentToShareRequired);
    }

    let urgency_level = UrgencyLevel::parse(&sanitize(raw.get("urgency_level")));
    if urgency_level.is_none() {
        reject("urgency_level", FieldError::UrgencyLevelRequired);
    }

    let (Some(female_age), Some(tried_ivf), Some(budget_range), Some(urgency_level)) =
        (female_age, tried_ivf, budget_range, urgency_level)
    else {
        return Err(ValidationFailure {
            locale,
            fields: errors,
        });
    };
    if !errors.is_empty() {
        return Err(ValidationFailure {
            locale,
            fields: errors,
        });
    }

    // both are in range by construction
    let female_age = female_age as i32;
    let male_age_exact = parse_int(raw.get("male_age_exact"))
        .filter(|age| (MALE_AGE_MIN..=MALE_AGE_MAX).contains(age))
        .map(|age| age as i32);

    let age_range = AgeRange::parse(&sanitize(raw.get("age_range")))
        .unwrap_or_else(|| AgeRange::from_age(female_age));
    let timeline = Timeline::parse(&sanitize(raw.get("timeline")))
        .unwrap_or_else(|| urgency_level.legacy_timeline());

    Ok(LeadDraft {
        locale,
        first_name,
        last_name,
        phone_e164: normalize_ro_phone(&phone),
        phone,
        email: email.to_lowercase(),
        city,
        age_range,
        female_age_exact: female_age,
        male_age_exact,
        tried_ivf,
        urgency_level,
        timeline,
        budget_range,
        test_status: TestStatus::parse(&sanitize(raw.get("test_status"))),
        voucher_status: VoucherStatus::parse(&sanitize(raw.get("voucher_status"))),
        primary_factor: PrimaryFactor::parse(&sanitize(raw.get("primary_factor"))),
        has_recent_tests: Some(true).filter(|_| truthy(raw.get("has_recent_tests"))),
        tests_list: non_empty(sanitize(raw.get("tests_list"))),
        prior_clinics: non_empty(sanitize(raw.get("previous_clinics"))),
        availability: non_empty(sanitize(raw.get("availability_windows"))),
        best_contact_method: ContactMethod::parse(&sanitize(raw.get("best_contact_method"))),
        message: non_empty(message),
        message_len,
        gdpr_consent,
        consent_to_share,
    })
}
