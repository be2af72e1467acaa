//! Public form intake: abuse gate, validation, intent, persistence and
//! confirmation emails.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::abuse::{AbuseGate, RejectionReason};
use crate::email::{templates, EmailOutcome, EmailSender};
use crate::errors::{AppError, ResultExt};
use crate::hashing::{log_prefix, IpHasher};
use crate::intent::{derive_intent_level, IntentSignals};
use crate::locale::resolve_locale;
use crate::models::{EventType, IntentLevel, Lead, LeadEvent, LeadStatus, LeadTier, Locale};
use crate::repository::LeadRepository;
use crate::tiering::{compute_tier, TierInput};
use crate::validation::{validate_submission, LeadDraft, ValidationFailure};

/// Stored user agents are cut to this many characters.
pub const MAX_USER_AGENT_LEN: usize = 500;

/// Result of one submission. Exactly one of these happens per call.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Persisted; notifications dispatched in the background.
    Accepted {
        lead_id: Uuid,
        intent: IntentLevel,
        locale: Locale,
    },
    /// Field errors for the submitter.
    Rejected(ValidationFailure),
    /// Looked automated. Nothing was stored or sent; the caller must answer
    /// exactly as if the lead had been accepted.
    Filtered {
        reason: RejectionReason,
        locale: Locale,
    },
}

pub struct IntakeService {
    leads: Arc<dyn LeadRepository>,
    gate: AbuseGate,
    hasher: IpHasher,
    email: Arc<dyn EmailSender>,
    monitor_email: Option<String>,
}

impl IntakeService {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        gate: AbuseGate,
        hasher: IpHasher,
        email: Arc<dyn EmailSender>,
        monitor_email: Option<String>,
    ) -> Self {
        Self {
            leads,
            gate,
            hasher,
            email,
            monitor_email,
        }
    }

    pub fn gate(&self) -> &AbuseGate {
        &self.gate
    }

    pub async fn submit(
        &self,
        raw: &Value,
        client_ip: &str,
        user_agent: Option<&str>,
    ) -> Result<SubmissionOutcome, AppError> {
        let now = Utc::now();
        let hint = resolve_locale(raw.get("locale"));
        let ip_hash = self.hasher.hash(client_ip);

        if let Err(reason) = self.gate.screen_request(raw, &ip_hash, now.timestamp_millis()) {
            tracing::info!("[spam] {} from {}…", reason, log_prefix(&ip_hash));
            return Ok(SubmissionOutcome::Filtered {
                reason,
                locale: hint,
            });
        }

        let draft = match validate_submission(raw) {
            Ok(draft) => draft,
            Err(failure) => {
                tracing::debug!("Submission rejected on {} field(s)", failure.fields.len());
                return Ok(SubmissionOutcome::Rejected(failure));
            }
        };

        if let Err(reason) = self.gate.screen_content(&draft) {
            tracing::info!("[spam] content {} from {}…", reason, log_prefix(&ip_hash));
            return Ok(SubmissionOutcome::Filtered {
                reason,
                locale: draft.locale,
            });
        }

        let user_agent = user_agent.map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect());
        let lead = build_lead(&draft, Uuid::new_v4(), now, Some(ip_hash), user_agent);

        self.leads.insert_lead(&lead).await.context("storing admitted lead")?;
        for event in intake_events(&lead) {
            self.leads.append_event(&event).await?;
        }

        let stopped = self
            .leads
            .stop_nurture_for_email(&lead.email, Some(lead.id), now)
            .await
            .context("stopping earlier nurture sequences")?;
        if stopped > 0 {
            tracing::info!("Stopped {} earlier nurture sequence(s) on re-submission", stopped);
        }
        tracing::info!(
            "Lead {} admitted (intent {}, nurture {})",
            lead.short_id(),
            lead.intent_level,
            if lead.nurture_active() { "started" } else { "off" }
        );

        let outcome = SubmissionOutcome::Accepted {
            lead_id: lead.id,
            intent: lead.intent_level,
            locale: lead.locale,
        };

        let email = Arc::clone(&self.email);
        let monitor = self.monitor_email.clone();
        tokio::spawn(async move {
            notify_admitted(email.as_ref(), &lead, monitor.as_deref()).await;
        });

        Ok(outcome)
    }
}

/// Sends the internal and submitter emails concurrently. Each failure is
/// logged on its own and never propagates.
pub async fn notify_admitted(email: &dyn EmailSender, lead: &Lead, monitor: Option<&str>) {
    let internal = async {
        match monitor {
            Some(monitor) => {
                let notification = templates::internal_notification(lead, monitor);
                Some(email.send(&notification).await)
            }
            None => None,
        }
    };
    let confirmation = templates::user_confirmation(lead);
    let user = email.send(&confirmation);
    let (internal, user) = tokio::join!(internal, user);

    if let Some(EmailOutcome::Failed { reason }) = internal {
        tracing::error!("Internal notification for lead {} failed: {}", lead.short_id(), reason);
    }
    if let EmailOutcome::Failed { reason } = user {
        tracing::error!("Confirmation email for lead {} failed: {}", lead.short_id(), reason);
    }
}

/// Builds the stored lead from an admitted draft.
pub fn build_lead(
    draft: &LeadDraft,
    id: Uuid,
    now: DateTime<Utc>,
    ip_hash: Option<String>,
    user_agent: Option<String>,
) -> Lead {
    let intent_level = derive_intent_level(&IntentSignals {
        urgency: Some(draft.urgency_level),
        timeline: Some(draft.timeline),
        budget: Some(draft.budget_range),
        has_recent_tests: draft.has_recent_tests,
        voucher: draft.voucher_status,
    });
    let low_intent = intent_level == IntentLevel::Low;

    let mut lead = Lead {
        id,
        created_at: now,
        updated_at: now,
        locale: draft.locale,
        first_name: draft.first_name.clone(),
        last_name: draft.last_name.clone(),
        phone: draft.phone.clone(),
        phone_e164: draft.phone_e164.clone(),
        email: draft.email.clone(),
        city: draft.city.clone(),
        age_range: draft.age_range,
        female_age_exact: Some(draft.female_age_exact),
        male_age_exact: draft.male_age_exact,
        tried_ivf: draft.tried_ivf,
        urgency_level: Some(draft.urgency_level),
        timeline: draft.timeline,
        budget_range: draft.budget_range,
        voucher_status: draft.voucher_status,
        primary_factor: draft.primary_factor,
        has_recent_tests: draft.has_recent_tests,
        tests_list: draft.tests_list.clone(),
        test_status: draft.test_status,
        prior_clinics: draft.prior_clinics.clone(),
        availability: draft.availability.clone(),
        best_contact_method: draft.best_contact_method,
        message: draft.message.clone(),
        gdpr_consent: draft.gdpr_consent,
        consent_to_share: draft.consent_to_share,
        consent_captured_at: Some(now),
        ip_hash,
        user_agent,
        intent_level,
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
        nurture_stage: if low_intent { 1 } else { 0 },
        nurture_next_at: low_intent.then_some(now),
        nurture_completed: false,
    };

    let tier = compute_tier(&TierInput::for_lead(&lead, LeadStatus::New), lead.locale);
    lead.tier = tier.tier;
    lead.tier_reason = tier.reason;
    lead
}

fn intake_events(lead: &Lead) -> [LeadEvent; 2] {
    [
        LeadEvent::new(
            lead.id,
            EventType::Created,
            json!({
                "source": "landing_form",
                "intent_level": lead.intent_level,
                "tier": lead.tier,
                "nurture_stage": lead.nurture_stage,
            }),
            lead.created_at,
        ),
        LeadEvent::new(
            lead.id,
            EventType::ConsentCaptured,
            json!({
                "gdpr_consent": lead.gdpr_consent,
                "consent_to_share": lead.consent_to_share,
                "ip_hash": lead.ip_hash,
                "user_agent": lead.user_agent,
            }),
            lead.created_at,
        ),
    ]
}
