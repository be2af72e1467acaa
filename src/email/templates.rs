//! HTML bodies for the four outbound messages. Every lead-supplied value is
//! escaped before it reaches markup.

use crate::locale::{clinic_subject, intent_label, internal_subject, nurture_subject, user_subject};
use crate::models::{IntentLevel, Lead, Locale};
use crate::routing::RoutingResult;

use super::OutgoingEmail;

const SITE_URL: &str = "https://fivmatch.ro";
const USER_AGENT_PREVIEW: usize = 180;

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn pick(locale: Locale, ro: &'static str, en: &'static str) -> &'static str {
    match locale {
        Locale::Ro => ro,
        Locale::En => en,
    }
}

fn row(label: &str, value: &str) -> String {
    format!(
        "<tr><td style=\"padding:10px 14px;font-weight:600;color:#64748b;width:40%;\">{}</td>\
         <td style=\"padding:10px 14px;white-space:pre-wrap;\">{}</td></tr>",
        escape_html(label),
        escape_html(value)
    )
}

fn optional_row(label: &str, value: Option<&str>) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => row(label, v),
        None => String::new(),
    }
}

fn layout(locale: Locale, heading: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html lang=\"{}\"><head><meta charset=\"UTF-8\"></head>\
         <body style=\"margin:0;font-family:-apple-system,'Segoe UI',Roboto,sans-serif;background:#f8fafc;\">\
         <div style=\"max-width:600px;margin:0 auto;padding:32px 24px;\">\
         <div style=\"background:#ffffff;border:1px solid #e2e8f0;border-radius:12px;overflow:hidden;\">\
         <div style=\"background:#2563eb;padding:24px 32px;\"><h1 style=\"margin:0;color:#ffffff;font-size:20px;\">{}</h1></div>\
         <div style=\"padding:32px;color:#334155;\">{}</div></div></div></body></html>",
        locale,
        escape_html(heading),
        body
    )
}

fn lead_table(lead: &Lead, locale: Locale) -> String {
    let rows = [
        row(pick(locale, "Nume", "Name"), &lead.full_name()),
        row("Email", &lead.email),
        row(pick(locale, "Telefon", "Phone"), lead.phone_e164.as_deref().unwrap_or(&lead.phone)),
        row(pick(locale, "Oraș", "City"), &lead.city),
        optional_row(
            pick(locale, "Vârsta partenerei", "Female age"),
            lead.female_age_exact.map(|a| a.to_string()).as_deref(),
        ),
        optional_row(
            pick(locale, "Urgență", "Urgency"),
            lead.urgency_level.map(|u| u.as_str()),
        ),
        row(pick(locale, "Buget", "Budget"), lead.budget_range.as_str()),
        optional_row(
            pick(locale, "Voucher", "Voucher"),
            lead.voucher_status.map(|v| v.as_str()),
        ),
        optional_row(
            pick(locale, "Analize", "Tests"),
            lead.tests_list.as_deref(),
        ),
        optional_row(
            pick(locale, "Disponibilitate", "Availability"),
            lead.availability.as_deref(),
        ),
        optional_row(
            pick(locale, "Contact preferat", "Preferred contact"),
            lead.best_contact_method.map(|c| c.as_str()),
        ),
        optional_row(pick(locale, "Mesaj", "Message"), lead.message.as_deref()),
    ];
    format!(
        "<table style=\"width:100%;border-collapse:collapse;font-size:15px;\">{}</table>",
        rows.concat()
    )
}

fn meta_block(lead: &Lead, routed_to: &str) -> String {
    let user_agent: String = lead
        .user_agent
        .as_deref()
        .unwrap_or("")
        .chars()
        .take(USER_AGENT_PREVIEW)
        .collect();
    format!(
        "<div style=\"margin-top:24px;padding:16px;background:#f8fafc;border:1px solid #e2e8f0;\
         font-size:12px;color:#94a3b8;font-family:monospace;\">\
         <strong>Internal Meta (EN)</strong><br>Lead ID: {}<br>Timestamp: {}<br>Locale: {}<br>\
         Intent: {}<br>Tier: {}<br>Routed: {}<br>IP Hash: {}<br>User-Agent: {}</div>",
        lead.short_id(),
        lead.created_at.to_rfc3339(),
        lead.locale,
        lead.intent_level,
        lead.tier,
        escape_html(routed_to),
        escape_html(lead.ip_hash.as_deref().unwrap_or("")),
        escape_html(&user_agent)
    )
}

/// Confirmation to the person who filled in the form.
pub fn user_confirmation(lead: &Lead) -> OutgoingEmail {
    let locale = lead.locale;
    let body = format!(
        "<p>{} {},</p><p>{}</p>{}<p>{}</p>",
        pick(locale, "Bună", "Hello"),
        escape_html(&lead.first_name),
        pick(
            locale,
            "Am primit solicitarea ta. Un coordonator te va contacta pentru a confirma detaliile.",
            "We received your request. A coordinator will contact you to confirm the details.",
        ),
        lead_table(lead, locale),
        pick(
            locale,
            "Datele tale sunt folosite doar pentru a te pune în legătură cu o clinică potrivită.",
            "Your data is only used to connect you with a suitable clinic.",
        ),
    );
    OutgoingEmail::new(
        lead.email.clone(),
        user_subject(locale),
        layout(locale, user_subject(locale), &body),
    )
}

/// Heads-up to the operations inbox that a lead awaits verification.
pub fn internal_notification(lead: &Lead, monitor: &str) -> OutgoingEmail {
    let locale = lead.locale;
    let body = format!(
        "<p>{} <strong>{}</strong> ({}).</p>{}{}",
        pick(locale, "Lead nou de verificat:", "New lead to verify:"),
        lead.short_id(),
        intent_label(lead.intent_level, locale),
        lead_table(lead, locale),
        meta_block(lead, monitor),
    );
    OutgoingEmail::new(
        monitor,
        internal_subject(locale),
        layout(locale, internal_subject(locale), &body),
    )
}

/// Lead handoff to the assigned clinic.
pub fn clinic_dispatch(
    lead: &Lead,
    clinic: &crate::models::Clinic,
    routing: &RoutingResult,
) -> OutgoingEmail {
    let locale = lead.locale;
    let subject = clinic_subject(lead.intent_level, locale);
    let hint = match lead.intent_level {
        IntentLevel::High => "",
        IntentLevel::Medium => pick(
            locale,
            "<p><strong>Intent mediu</strong> - lead serios, buget de discutat.</p>",
            "<p><strong>Medium intent</strong> - serious lead, budget to discuss.</p>",
        ),
        IntentLevel::Low => pick(
            locale,
            "<p><strong>Lead informativ</strong> - recomandat pentru nurturing.</p>",
            "<p><strong>Informational lead</strong> - recommended for nurturing.</p>",
        ),
    };
    let body = format!(
        "<p>{} {}</p>{}{}<p>Tier: {} ({})</p>{}",
        pick(locale, "Lead verificat pentru", "Verified lead for"),
        escape_html(&clinic.name),
        lead_table(lead, locale),
        hint,
        lead.tier,
        escape_html(&lead.tier_reason),
        meta_block(lead, &routing.matched_rule),
    );
    let mut email = OutgoingEmail::new(
        clinic.email.clone(),
        subject,
        layout(locale, subject, &body),
    );
    if !routing.email.eq_ignore_ascii_case(&clinic.email) {
        email.cc.push(routing.email.clone());
    }
    email
}

/// Unsubscribe page for `email`, with the address percent-encoded.
fn unsubscribe_url(locale: Locale, email: &str) -> String {
    let page = format!("{}/{}/unsubscribe", SITE_URL, locale);
    match reqwest::Url::parse_with_params(&page, &[("email", email)]) {
        Ok(url) => url.to_string(),
        Err(e) => {
            tracing::warn!("Could not build unsubscribe link: {}", e);
            page
        }
    }
}

/// Nurture message for `stage` (1..=3). Other stages have no email.
pub fn nurture(stage: i32, lead: &Lead) -> Option<OutgoingEmail> {
    let locale = lead.locale;
    let subject = nurture_subject(stage, locale)?;
    let content = match (stage, locale) {
        (1, Locale::Ro) => {
            "<p>FIV presupune câțiva pași generali: consultare inițială, investigații, \
             stimulare ovariană, colectare și fertilizare, transfer embrionar.</p>"
        }
        (1, _) => {
            "<p>IVF involves a few general steps: initial consultation, tests, ovarian \
             stimulation, retrieval and fertilisation, embryo transfer.</p>"
        }
        (2, Locale::Ro) => {
            "<p>Momentul potrivit depinde de vârstă, de analizele recente și de \
             recomandarea medicului. O discuție timpurie ajută la planificare.</p>"
        }
        (2, _) => {
            "<p>The right moment depends on age, recent tests and your doctor's \
             advice. An early conversation helps with planning.</p>"
        }
        (_, Locale::Ro) => {
            "<p>Dacă doriți, vă putem pune în legătură cu o clinică potrivită. \
             Răspundeți la acest email și un coordonator vă va contacta.</p>"
        }
        _ => {
            "<p>If you wish, we can connect you with a suitable clinic. Reply to \
             this email and a coordinator will contact you.</p>"
        }
    };
    let unsubscribe = format!(
        "<p style=\"font-size:11px;color:#94a3b8;\"><a href=\"{}\">{}</a></p>",
        escape_html(&unsubscribe_url(locale, &lead.email)),
        pick(locale, "Anulați abonarea", "Unsubscribe"),
    );
    let body = format!(
        "<p>{} {},</p>{}<p>{}</p>{}",
        pick(locale, "Bună", "Hello"),
        escape_html(&lead.first_name),
        content,
        pick(locale, "Cu respect, Echipa FIV Match", "Kind regards, the FIV Match team"),
        unsubscribe,
    );
    Some(OutgoingEmail::new(
        lead.email.clone(),
        subject,
        layout(locale, subject, &body),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgeRange, BudgetRange, Clinic, LeadStatus, LeadTier, Timeline, TriedIvf};
    use chrono::Utc;
    use uuid::Uuid;

    fn lead() -> Lead {
        let now = Utc::now();
        Lead {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            locale: Locale::En,
            first_name: "<script>".into(),
            last_name: "O'Neil".into(),
            phone: "0722123456".into(),
            phone_e164: Some("+40722123456".into()),
            email: "ana@example.com".into(),
            city: "Cluj".into(),
            age_range: AgeRange::From30To34,
            female_age_exact: Some(31),
            male_age_exact: None,
            tried_ivf: TriedIvf::No,
            urgency_level: None,
            timeline: Timeline::Researching,
            budget_range: BudgetRange::PreferDiscuss,
            voucher_status: None,
            primary_factor: None,
            has_recent_tests: None,
            tests_list: None,
            test_status: None,
            prior_clinics: None,
            availability: None,
            best_contact_method: None,
            message: Some("a & b".into()),
            gdpr_consent: true,
            consent_to_share: true,
            consent_captured_at: Some(now),
            ip_hash: Some("abc".into()),
            user_agent: None,
            intent_level: IntentLevel::Low,
            tier: LeadTier::D,
            tier_reason: String::new(),
            status: LeadStatus::New,
            call_attempts: 0,
            last_call_at: None,
            operator_notes: None,
            assigned_clinic_id: None,
            verified_at: None,
            assigned_at: None,
            sent_to_clinic_at: None,
            nurture_stage: 1,
            nurture_next_at: None,
            nurture_completed: false,
        }
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
        let email = user_confirmation(&lead());
        assert!(!email.html.contains("<script>"));
        assert!(email.html.contains("&lt;script&gt;"));
        assert!(email.html.contains("a &amp; b"));
    }

    #[test]
    fn nurture_exists_only_for_three_stages() {
        let lead = lead();
        for stage in 1..=3 {
            let email = nurture(stage, &lead).unwrap();
            assert_eq!(email.to, vec!["ana@example.com".to_string()]);
            assert!(email.html.contains("unsubscribe"));
        }
        assert!(nurture(0, &lead).is_none());
        assert!(nurture(4, &lead).is_none());
    }

    #[test]
    fn unsubscribe_link_percent_encodes_the_address() {
        let mut lead = lead();
        lead.email = "ana+ivf&x@example.ro".into();
        let email = nurture(1, &lead).unwrap();
        assert!(email
            .html
            .contains("/en/unsubscribe?email=ana%2Bivf%26x%40example.ro\""));
        assert!(!email.html.contains("ana+ivf"));
    }

    #[test]
    fn clinic_dispatch_copies_routed_inbox_when_different() {
        let now = Utc::now();
        let clinic = Clinic {
            id: Uuid::new_v4(),
            name: "Clinica Nord".into(),
            email: "nord@clinic.ro".into(),
            phone: None,
            cities: vec!["Cluj".into()],
            active: true,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        let routed = RoutingResult {
            email: "cluj@clinic.ro".into(),
            matched_rule: "city-match: Cluj → cluj@clinic.ro".into(),
        };
        let email = clinic_dispatch(&lead(), &clinic, &routed);
        assert_eq!(email.to, vec!["nord@clinic.ro".to_string()]);
        assert_eq!(email.cc, vec!["cluj@clinic.ro".to_string()]);
        assert_eq!(email.subject, "New IVF Lead - informational only");

        let same = RoutingResult {
            email: "NORD@clinic.ro".into(),
            matched_rule: "default".into(),
        };
        assert!(clinic_dispatch(&lead(), &clinic, &same).cc.is_empty());
    }
}
