//! Backend-only bilingual strings: field errors, API messages and email subjects.

pub use crate::models::Locale;
use crate::models::IntentLevel;

/// Resolves a raw locale hint. Never fails; anything unrecognised is `Ro`.
pub fn resolve_locale(raw: Option<&serde_json::Value>) -> Locale {
    raw.and_then(|v| v.as_str())
        .and_then(Locale::parse)
        .unwrap_or_default()
}

fn pick(locale: Locale, ro: &'static str, en: &'static str) -> &'static str {
    match locale {
        Locale::Ro => ro,
        Locale::En => en,
    }
}

/// Keys of field-level validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldError {
    FirstNameRequired,
    LastNameRequired,
    PhoneRequired,
    PhoneInvalid,
    EmailRequired,
    EmailInvalid,
    TriedIvfInvalid,
    CityRequired,
    BudgetRangeInvalid,
    GdprRequired,
    ConsentToShareRequired,
    FemaleAgeExactRequired,
    UrgencyLevelRequired,
    InvalidBody,
}

pub fn field_error_message(key: FieldError, locale: Locale) -> &'static str {
    use FieldError::*;
    match key {
        FirstNameRequired => pick(locale, "Prenumele este obligatoriu", "First name is required"),
        LastNameRequired => pick(
            locale,
            "Numele de familie este obligatoriu",
            "Last name is required",
        ),
        PhoneRequired => pick(
            locale,
            "Numarul de telefon este obligatoriu",
            "Phone number is required",
        ),
        PhoneInvalid => pick(
            locale,
            "Numarul de telefon nu pare valid (ex. +40 7XX XXX XXX)",
            "This phone number doesn't look valid (e.g. +40 7XX XXX XXX)",
        ),
        EmailRequired => pick(
            locale,
            "Adresa de email este obligatorie",
            "Email address is required",
        ),
        EmailInvalid => pick(
            locale,
            "Adresa de email nu pare corecta",
            "This email address doesn't look right",
        ),
        TriedIvfInvalid => pick(locale, "Selecteaza o optiune", "Select an option"),
        CityRequired => pick(locale, "Completeaza orasul", "Enter your city"),
        BudgetRangeInvalid => pick(
            locale,
            "Selecteaza bugetul estimativ",
            "Select your estimated budget",
        ),
        GdprRequired => pick(
            locale,
            "Trebuie sa accepti prelucrarea datelor pentru a continua",
            "You need to accept data processing to continue",
        ),
        ConsentToShareRequired => pick(
            locale,
            "Trebuie sa accepti partajarea datelor pentru a continua",
            "You must agree to data sharing to continue",
        ),
        FemaleAgeExactRequired => {
            pick(locale, "Vârsta (femeie) este obligatorie", "Female age is required")
        }
        UrgencyLevelRequired => pick(locale, "Selectează un termen", "Select a timeline"),
        InvalidBody => pick(locale, "Cererea nu este valida", "Invalid request body"),
    }
}

/// Keys of top-level API response messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMessage {
    Success,
    NextSteps,
    ValidationFailed,
    ServerError,
    InvalidJson,
}

pub fn api_message(key: ApiMessage, locale: Locale) -> &'static str {
    match key {
        ApiMessage::Success => pick(
            locale,
            "Solicitarea ta a fost primita. Vom confirma detaliile in curand. O clinica partenera te va contacta dupa verificare.",
            "We received your request and will confirm details shortly. A partner clinic will contact you after verification.",
        ),
        ApiMessage::NextSteps => pick(
            locale,
            "Vom verifica solicitarea ta si o clinica partenera te va contacta dupa aprobare.",
            "We will verify your request and a partner clinic will contact you after approval.",
        ),
        ApiMessage::ValidationFailed => pick(
            locale,
            "Verifica campurile marcate.",
            "Please check the highlighted fields.",
        ),
        ApiMessage::ServerError => pick(
            locale,
            "A aparut o eroare. Incearca din nou.",
            "An error occurred. Please try again.",
        ),
        ApiMessage::InvalidJson => pick(
            locale,
            "Cererea nu a putut fi procesata.",
            "The request could not be processed.",
        ),
    }
}

pub fn intent_label(level: IntentLevel, locale: Locale) -> &'static str {
    match level {
        IntentLevel::High => pick(locale, "Intent ridicat", "High intent"),
        IntentLevel::Medium => pick(locale, "Intent mediu", "Medium intent"),
        IntentLevel::Low => pick(locale, "Doar informativ", "Informational only"),
    }
}

pub fn user_subject(locale: Locale) -> &'static str {
    pick(
        locale,
        "Solicitarea ta pentru FIV a fost primita",
        "Your IVF request has been received",
    )
}

pub fn internal_subject(locale: Locale) -> &'static str {
    pick(locale, "Lead nou - de verificat", "New lead - needs verification")
}

pub fn clinic_subject(intent: IntentLevel, locale: Locale) -> &'static str {
    match intent {
        IntentLevel::High => pick(
            locale,
            "Lead nou FIV - intent ridicat",
            "New IVF Lead - high intent",
        ),
        IntentLevel::Medium => pick(
            locale,
            "Lead nou FIV - intent mediu",
            "New IVF Lead - medium intent",
        ),
        IntentLevel::Low => pick(
            locale,
            "Lead nou FIV - doar informativ",
            "New IVF Lead - informational only",
        ),
    }
}

/// Subject of nurture email `stage` (1..=3).
pub fn nurture_subject(stage: i32, locale: Locale) -> Option<&'static str> {
    let subject = match stage {
        1 => pick(
            locale,
            "Ce presupune FIV în România – pași generali",
            "What IVF involves in Romania – general steps",
        ),
        2 => pick(
            locale,
            "Când este momentul potrivit pentru a începe FIV?",
            "When is the right time to start IVF?",
        ),
        3 => pick(
            locale,
            "Doriți să discutăm opțiunile disponibile?",
            "Would you like to discuss available options?",
        ),
        _ => return None,
    };
    Some(subject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_locale_defaults_to_ro() {
        assert_eq!(resolve_locale(None), Locale::Ro);
        assert_eq!(resolve_locale(Some(&json!("fr"))), Locale::Ro);
        assert_eq!(resolve_locale(Some(&json!(42))), Locale::Ro);
        assert_eq!(resolve_locale(Some(&json!("en"))), Locale::En);
    }

    #[test]
    fn nurture_subject_only_for_known_stages() {
        assert!(nurture_subject(1, Locale::En).is_some());
        assert!(nurture_subject(3, Locale::Ro).is_some());
        assert!(nurture_subject(0, Locale::Ro).is_none());
        assert!(nurture_subject(4, Locale::En).is_none());
    }
}
