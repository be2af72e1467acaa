//! Process-local store implementing both repositories. Backs the test suites
//! and dry runs of the command-line tools.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::{is_due_for_nurture, short_id_prefix, ClinicRepository, LeadRepository};
use crate::errors::AppError;
use crate::models::{Clinic, Lead, LeadEvent, LeadFilter};

#[derive(Default)]
struct Tables {
    leads: HashMap<Uuid, Lead>,
    events: Vec<LeadEvent>,
    clinics: HashMap<Uuid, Clinic>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lead_count(&self) -> usize {
        self.tables.lock().leads.len()
    }

    pub fn all_leads(&self) -> Vec<Lead> {
        let mut leads: Vec<Lead> = self.tables.lock().leads.values().cloned().collect();
        leads.sort_by_key(|l| l.created_at);
        leads
    }
}

#[async_trait]
impl LeadRepository for MemoryStore {
    async fn insert_lead(&self, lead: &Lead) -> Result<(), AppError> {
        let mut tables = self.tables.lock();
        if tables.leads.contains_key(&lead.id) {
            return Err(AppError::InternalError(format!("duplicate lead id {}", lead.id)));
        }
        tables.leads.insert(lead.id, lead.clone());
        Ok(())
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, AppError> {
        Ok(self.tables.lock().leads.get(&id).cloned())
    }

    async fn find_by_short_id(&self, short_id: &str) -> Result<Option<Lead>, AppError> {
        let Some(prefix) = short_id_prefix(short_id) else {
            return Ok(None);
        };
        Ok(self
            .tables
            .lock()
            .leads
            .values()
            .filter(|l| l.id.simple().to_string().starts_with(&prefix))
            .max_by_key(|l| l.created_at)
            .cloned())
    }

    async fn list_leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>, AppError> {
        let mut leads: Vec<Lead> = self
            .tables
            .lock()
            .leads
            .values()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        leads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(leads
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn update_lifecycle(&self, lead: &Lead) -> Result<(), AppError> {
        let mut tables = self.tables.lock();
        let stored = tables
            .leads
            .get_mut(&lead.id)
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", lead.id)))?;
        stored.status = lead.status;
        stored.tier = lead.tier;
        stored.tier_reason = lead.tier_reason.clone();
        stored.call_attempts = lead.call_attempts;
        stored.last_call_at = lead.last_call_at;
        stored.operator_notes = lead.operator_notes.clone();
        stored.assigned_clinic_id = lead.assigned_clinic_id;
        stored.verified_at = lead.verified_at;
        stored.assigned_at = lead.assigned_at;
        stored.sent_to_clinic_at = lead.sent_to_clinic_at;
        stored.nurture_stage = lead.nurture_stage;
        stored.nurture_next_at = lead.nurture_next_at;
        stored.nurture_completed = lead.nurture_completed;
        stored.updated_at = lead.updated_at;
        Ok(())
    }

    async fn advance_nurture(
        &self,
        id: Uuid,
        expected_stage: i32,
        new_stage: i32,
        next_at: Option<DateTime<Utc>>,
        completed: bool,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.lock();
        match tables.leads.get_mut(&id) {
            Some(lead) if lead.nurture_stage == expected_stage && !lead.nurture_completed => {
                lead.nurture_stage = new_stage;
                lead.nurture_next_at = next_at;
                lead.nurture_completed = completed;
                lead.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stop_nurture_for_email(
        &self,
        email: &str,
        except: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut stopped = 0;
        for lead in self.tables.lock().leads.values_mut() {
            if Some(lead.id) != except
                && lead.email.eq_ignore_ascii_case(email)
                && lead.nurture_active()
            {
                lead.nurture_completed = true;
                lead.nurture_next_at = None;
                lead.updated_at = now;
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    async fn due_for_nurture(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Lead>, AppError> {
        let mut due: Vec<Lead> = self
            .tables
            .lock()
            .leads
            .values()
            .filter(|l| is_due_for_nurture(l, now))
            .cloned()
            .collect();
        due.sort_by_key(|l| l.nurture_next_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn append_event(&self, event: &LeadEvent) -> Result<(), AppError> {
        self.tables.lock().events.push(event.clone());
        Ok(())
    }

    async fn list_events(&self, lead_id: Uuid) -> Result<Vec<LeadEvent>, AppError> {
        Ok(self
            .tables
            .lock()
            .events
            .iter()
            .filter(|e| e.lead_id == lead_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ClinicRepository for MemoryStore {
    async fn create_clinic(&self, clinic: &Clinic) -> Result<(), AppError> {
        self.tables.lock().clinics.insert(clinic.id, clinic.clone());
        Ok(())
    }

    async fn get_clinic(&self, id: Uuid) -> Result<Option<Clinic>, AppError> {
        Ok(self.tables.lock().clinics.get(&id).cloned())
    }

    async fn list_clinics(&self, active_only: bool) -> Result<Vec<Clinic>, AppError> {
        let mut clinics: Vec<Clinic> = self
            .tables
            .lock()
            .clinics
            .values()
            .filter(|c| !active_only || c.active)
            .cloned()
            .collect();
        clinics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clinics)
    }

    async fn update_clinic(&self, clinic: &Clinic) -> Result<(), AppError> {
        let mut tables = self.tables.lock();
        match tables.clinics.get_mut(&clinic.id) {
            Some(stored) => {
                *stored = clinic.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Clinic {} not found", clinic.id))),
        }
    }

    async fn deactivate_clinic(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        match self.tables.lock().clinics.get_mut(&id) {
            Some(clinic) => {
                clinic.active = false;
                clinic.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
