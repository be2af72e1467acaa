//! Lead lifecycle state machine.
//!
//! [`transition`] is pure: it validates an operator action against the
//! current lead and returns the updated lead plus the audit events to
//! append. [`LifecycleService`] loads, dispatches and persists around it.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::email::{templates, EmailOutcome, EmailSender};
use crate::errors::AppError;
use crate::models::{Clinic, EventType, Lead, LeadEvent, LeadStatus};
use crate::repository::{ClinicRepository, LeadRepository};
use crate::routing::RoutingResolver;
use crate::tiering::{compute_tier, TierInput};

/// A refused transition. Always surfaced to the caller by name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardViolation {
    #[error("lead is in terminal state {0}")]
    TerminalState(LeadStatus),
    #[error("cannot {action} a lead in status {from}")]
    InvalidTransition {
        action: &'static str,
        from: LeadStatus,
    },
    #[error("clinic is not active")]
    ClinicInactive,
    #[error("cannot dispatch without an assigned clinic")]
    MissingClinic,
    #[error("cannot dispatch without sharing consent")]
    MissingShareConsent,
    #[error("lead has not been verified by an operator")]
    NotVerified,
    #[error("lead is already in the nurture sequence")]
    AlreadyInNurture,
}

impl GuardViolation {
    pub fn code(&self) -> &'static str {
        match self {
            GuardViolation::TerminalState(_) => "terminal_state",
            GuardViolation::InvalidTransition { .. } => "invalid_transition",
            GuardViolation::ClinicInactive => "clinic_inactive",
            GuardViolation::MissingClinic => "missing_clinic",
            GuardViolation::MissingShareConsent => "missing_share_consent",
            GuardViolation::NotVerified => "not_verified",
            GuardViolation::AlreadyInNurture => "already_in_nurture",
        }
    }
}

/// Operator actions understood by the state machine.
#[derive(Debug, Clone, Copy)]
pub enum Action<'a> {
    LogCall,
    Verify,
    Assign(&'a Clinic),
    /// Dispatch to the assigned clinic, when it could be loaded.
    Send(Option<&'a Clinic>),
    Invalidate,
    EnrollNurture,
}

impl Action<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Action::LogCall => "log a call for",
            Action::Verify => "verify",
            Action::Assign(_) => "assign",
            Action::Send(_) => "send",
            Action::Invalidate => "invalidate",
            Action::EnrollNurture => "enroll",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub lead: Lead,
    pub events: Vec<LeadEvent>,
    /// Other active nurture sequences for the same email must be stopped.
    pub stop_other_nurture: bool,
}

/// Appends a note to the running log: the first note verbatim, later
/// ones as `"{rfc3339}: {note}"` separated by a blank line.
pub fn append_note(existing: Option<&str>, note: &str, now: DateTime<Utc>) -> Option<String> {
    let note = note.trim();
    let existing = existing.unwrap_or("");
    if note.is_empty() {
        return Some(existing.to_string()).filter(|e| !e.is_empty());
    }
    if existing.trim().is_empty() {
        return Some(note.to_string());
    }
    Some(format!("{}\n\n{}: {}", existing, now.to_rfc3339(), note))
}

fn complete_nurture(lead: &mut Lead) {
    lead.nurture_completed = true;
    lead.nurture_next_at = None;
}

fn retier(lead: &mut Lead) {
    let result = compute_tier(&TierInput::for_lead(lead, lead.status), lead.locale);
    lead.tier = result.tier;
    lead.tier_reason = result.reason;
}

/// Validates `action` against `lead` and applies its effects.
pub fn transition(
    lead: &Lead,
    action: Action<'_>,
    actor: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, GuardViolation> {
    use LeadStatus::*;

    let from = lead.status;
    if from.is_terminal() {
        return Err(GuardViolation::TerminalState(from));
    }
    let invalid = GuardViolation::InvalidTransition {
        action: action.name(),
        from,
    };

    let mut next = lead.clone();
    let mut events = Vec::new();
    let mut stop_other_nurture = false;

    match action {
        Action::LogCall => {
            next.call_attempts += 1;
            next.last_call_at = Some(now);
            if from == New {
                next.status = CalledNoAnswer;
            }
            events.push(LeadEvent::new(
                lead.id,
                EventType::OperatorCalled,
                json!({
                    "attempt": next.call_attempts,
                    "actor": actor,
                    "notes": notes,
                }),
                now,
            ));
        }
        Action::Verify => {
            if !matches!(from, New | CalledNoAnswer | LowIntentNurture | VerifiedReady) {
                return Err(invalid);
            }
            next.status = VerifiedReady;
            next.verified_at = Some(now);
            if next.nurture_active() {
                complete_nurture(&mut next);
            }
            retier(&mut next);
            stop_other_nurture = true;
        }
        Action::Assign(clinic) => {
            if !from.is_verified_equivalent() {
                return Err(GuardViolation::NotVerified);
            }
            if !clinic.active {
                return Err(GuardViolation::ClinicInactive);
            }
            next.status = Assigned;
            next.assigned_clinic_id = Some(clinic.id);
            next.assigned_at = Some(now);
            events.push(LeadEvent::new(
                lead.id,
                EventType::Assigned,
                json!({
                    "clinic_id": clinic.id,
                    "clinic_name": clinic.name,
                    "previous_clinic_id": lead.assigned_clinic_id,
                    "actor": actor,
                }),
                now,
            ));
        }
        Action::Send(clinic) => {
            if lead.assigned_clinic_id.is_none() {
                return Err(GuardViolation::MissingClinic);
            }
            if !from.is_verified_equivalent() {
                return Err(GuardViolation::NotVerified);
            }
            if !lead.consent_to_share {
                return Err(GuardViolation::MissingShareConsent);
            }
            // deactivated after assignment
            if clinic.is_some_and(|c| !c.active) {
                return Err(GuardViolation::ClinicInactive);
            }
            if from != Assigned {
                return Err(invalid);
            }
            next.status = SentToClinic;
            next.sent_to_clinic_at = Some(now);
            complete_nurture(&mut next);
        }
        Action::Invalidate => {
            next.status = Invalid;
            next.assigned_clinic_id = None;
            next.assigned_at = None;
            complete_nurture(&mut next);
            retier(&mut next);
        }
        Action::EnrollNurture => {
            if from == LowIntentNurture {
                return Err(GuardViolation::AlreadyInNurture);
            }
            if !matches!(from, New | CalledNoAnswer | VerifiedReady | Assigned) {
                return Err(invalid);
            }
            next.status = LowIntentNurture;
            next.assigned_clinic_id = None;
            next.assigned_at = None;
            let finished = lead.nurture_completed && lead.nurture_stage >= 3;
            if !lead.nurture_active() && !finished {
                next.nurture_stage = 1;
                next.nurture_next_at = Some(now);
                next.nurture_completed = false;
            }
            retier(&mut next);
            stop_other_nurture = true;
        }
    }

    if let Some(note) = notes {
        next.operator_notes = append_note(lead.operator_notes.as_deref(), note, now);
    }
    if next.status != from {
        events.push(LeadEvent::new(
            lead.id,
            EventType::StatusChanged,
            json!({
                "old_status": from,
                "new_status": next.status,
                "actor": actor,
                "notes": notes,
            }),
            now,
        ));
    }
    next.updated_at = now;

    Ok(TransitionOutcome {
        lead: next,
        events,
        stop_other_nurture,
    })
}

/// Operator request, before the clinic reference is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    LogCall,
    Verify,
    Assign { clinic_id: Uuid },
    Send,
    Invalidate,
    EnrollNurture,
}

/// Runs operator actions against stored leads.
pub struct LifecycleService {
    leads: Arc<dyn LeadRepository>,
    clinics: Arc<dyn ClinicRepository>,
    routing: Arc<RoutingResolver>,
    email: Arc<dyn EmailSender>,
    monitor_email: Option<String>,
}

impl LifecycleService {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        clinics: Arc<dyn ClinicRepository>,
        routing: Arc<RoutingResolver>,
        email: Arc<dyn EmailSender>,
        monitor_email: Option<String>,
    ) -> Self {
        Self {
            leads,
            clinics,
            routing,
            email,
            monitor_email,
        }
    }

    /// Finds a lead by full UUID or short display id.
    pub async fn find_lead(&self, reference: &str) -> Result<Lead, AppError> {
        let reference = reference.trim();
        let found = match Uuid::parse_str(reference) {
            Ok(id) => self.leads.get_lead(id).await?,
            Err(_) => self.leads.find_by_short_id(reference).await?,
        };
        found.ok_or_else(|| AppError::NotFound(format!("Lead {} not found", reference)))
    }

    async fn load_clinic(&self, id: Uuid) -> Result<Clinic, AppError> {
        self.clinics
            .get_clinic(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Clinic {} not found", id)))
    }

    pub async fn apply(
        &self,
        reference: &str,
        action: OperatorAction,
        actor: &str,
        notes: Option<&str>,
    ) -> Result<Lead, AppError> {
        let lead = self.find_lead(reference).await?;
        let now = Utc::now();

        let clinic = match action {
            OperatorAction::Assign { clinic_id } => Some(self.load_clinic(clinic_id).await?),
            OperatorAction::Send => match lead.assigned_clinic_id {
                Some(id) => Some(self.load_clinic(id).await?),
                None => None,
            },
            _ => None,
        };

        let machine_action = match (action, clinic.as_ref()) {
            (OperatorAction::LogCall, _) => Action::LogCall,
            (OperatorAction::Verify, _) => Action::Verify,
            (OperatorAction::Assign { .. }, Some(clinic)) => Action::Assign(clinic),
            (OperatorAction::Assign { clinic_id }, None) => {
                return Err(AppError::NotFound(format!("Clinic {} not found", clinic_id)))
            }
            (OperatorAction::Send, clinic) => Action::Send(clinic),
            (OperatorAction::Invalidate, _) => Action::Invalidate,
            (OperatorAction::EnrollNurture, _) => Action::EnrollNurture,
        };

        let mut outcome = transition(&lead, machine_action, actor, notes, now)?;

        if let Action::Send(Some(clinic)) = machine_action {
            let sent = self.dispatch_to_clinic(&outcome.lead, clinic).await?;
            outcome.events.push(sent);
        }

        self.leads.update_lifecycle(&outcome.lead).await?;
        for event in &outcome.events {
            self.leads.append_event(event).await?;
        }
        if outcome.stop_other_nurture {
            let stopped = self
                .leads
                .stop_nurture_for_email(&outcome.lead.email, Some(outcome.lead.id), now)
                .await?;
            if stopped > 0 {
                tracing::info!(
                    "Stopped {} other nurture sequence(s) for lead {}",
                    stopped,
                    outcome.lead.short_id()
                );
            }
        }

        tracing::info!(
            "Lead {} {} -> {} by {}",
            outcome.lead.short_id(),
            lead.status,
            outcome.lead.status,
            actor
        );
        Ok(outcome.lead)
    }

    /// Emails the lead to its clinic. Nothing is persisted when this fails.
    async fn dispatch_to_clinic(
        &self,
        lead: &Lead,
        clinic: &Clinic,
    ) -> Result<LeadEvent, AppError> {
        let routing = self.routing.resolve(&lead.city);
        let mut email = templates::clinic_dispatch(lead, clinic, &routing);
        if let Some(monitor) = &self.monitor_email {
            email.cc.push(monitor.clone());
        }

        match self.email.send(&email).await {
            EmailOutcome::Sent { id } => Ok(LeadEvent::new(
                lead.id,
                EventType::SentEmail,
                json!({
                    "kind": "clinic_dispatch",
                    "to": clinic.email,
                    "clinic_id": clinic.id,
                    "provider_id": id,
                    "routing": routing,
                }),
                Utc::now(),
            )),
            EmailOutcome::Failed { reason } => Err(AppError::ExternalApiError(format!(
                "clinic email for lead {} failed: {}",
                lead.short_id(),
                reason
            ))),
        }
    }

    /// Appends operator notes without changing the status.
    pub async fn add_notes(&self, reference: &str, notes: &str) -> Result<Lead, AppError> {
        if notes.trim().is_empty() {
            return Err(AppError::BadRequest("notes cannot be empty".to_string()));
        }
        let mut lead = self.find_lead(reference).await?;
        let now = Utc::now();
        lead.operator_notes = append_note(lead.operator_notes.as_deref(), notes, now);
        lead.updated_at = now;
        self.leads.update_lifecycle(&lead).await?;
        Ok(lead)
    }
}
