//! Persistence seams for leads, their audit trail and clinics.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::models::{Clinic, IntentLevel, Lead, LeadEvent, LeadFilter, LeadStatus};

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn insert_lead(&self, lead: &Lead) -> Result<(), AppError>;
    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, AppError>;
    /// Most recent lead whose id starts with the given short display id.
    async fn find_by_short_id(&self, short_id: &str) -> Result<Option<Lead>, AppError>;
    async fn list_leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>, AppError>;
    /// Persists status, tier, call, assignment, notes and nurture columns.
    async fn update_lifecycle(&self, lead: &Lead) -> Result<(), AppError>;
    /// Moves a lead from `expected_stage` to the given nurture state in one
    /// conditional update. Returns false when the row was not at
    /// `expected_stage` anymore (or already completed).
    async fn advance_nurture(
        &self,
        id: Uuid,
        expected_stage: i32,
        new_stage: i32,
        next_at: Option<DateTime<Utc>>,
        completed: bool,
    ) -> Result<bool, AppError>;
    /// Completes every active nurture sequence for `email`, except `except`.
    async fn stop_nurture_for_email(
        &self,
        email: &str,
        except: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError>;
    /// Snapshot of leads due a nurture email, oldest due first.
    async fn due_for_nurture(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Lead>, AppError>;
    async fn append_event(&self, event: &LeadEvent) -> Result<(), AppError>;
    async fn list_events(&self, lead_id: Uuid) -> Result<Vec<LeadEvent>, AppError>;
}

#[async_trait]
pub trait ClinicRepository: Send + Sync {
    async fn create_clinic(&self, clinic: &Clinic) -> Result<(), AppError>;
    async fn get_clinic(&self, id: Uuid) -> Result<Option<Clinic>, AppError>;
    async fn list_clinics(&self, active_only: bool) -> Result<Vec<Clinic>, AppError>;
    async fn update_clinic(&self, clinic: &Clinic) -> Result<(), AppError>;
    /// Soft delete. Returns false when the clinic does not exist.
    async fn deactivate_clinic(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError>;
}

/// Lowercase, dash-free hex prefix of a short display id, if it looks like one.
pub fn short_id_prefix(reference: &str) -> Option<String> {
    let cleaned: String = reference.trim().chars().filter(|c| *c != '-').collect();
    if cleaned.is_empty() || cleaned.len() > 32 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(cleaned.to_ascii_lowercase())
}

/// Leads due a nurture email: low intent or operator-enrolled, still running,
/// next email due.
pub fn is_due_for_nurture(lead: &Lead, now: DateTime<Utc>) -> bool {
    (lead.intent_level == IntentLevel::Low || lead.status == LeadStatus::LowIntentNurture)
        && !lead.nurture_completed
        && lead.nurture_next_at.is_some_and(|at| at <= now)
}

const LEAD_COLUMNS: &str = r#"
    id, created_at, updated_at, locale,
    first_name, last_name, phone, phone_e164, email, city,
    age_range, female_age_exact, male_age_exact, tried_ivf,
    urgency_level, timeline, budget_range, voucher_status, primary_factor,
    has_recent_tests, tests_list, test_status, prior_clinics, availability,
    best_contact_method, message,
    gdpr_consent, consent_to_share, consent_captured_at, ip_hash, user_agent,
    intent_level, tier, tier_reason,
    status, call_attempts, last_call_at, operator_notes, assigned_clinic_id,
    verified_at, assigned_at, sent_to_clinic_at,
    nurture_stage, nurture_next_at, nurture_completed
"#;

/// Postgres-backed store for both repositories.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadRepository for PgStore {
    async fn insert_lead(&self, lead: &Lead) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO leads ({}) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20,
                $21, $22, $23, $24, $25, $26, $27, $28, $29, $30,
                $31, $32, $33, $34, $35, $36, $37, $38, $39, $40,
                $41, $42, $43, $44, $45
            )",
            LEAD_COLUMNS
        );
        sqlx::query(&sql)
            .bind(lead.id)
            .bind(lead.created_at)
            .bind(lead.updated_at)
            .bind(lead.locale)
            .bind(&lead.first_name)
            .bind(&lead.last_name)
            .bind(&lead.phone)
            .bind(&lead.phone_e164)
            .bind(&lead.email)
            .bind(&lead.city)
            .bind(lead.age_range)
            .bind(lead.female_age_exact)
            .bind(lead.male_age_exact)
            .bind(lead.tried_ivf)
            .bind(lead.urgency_level)
            .bind(lead.timeline)
            .bind(lead.budget_range)
            .bind(lead.voucher_status)
            .bind(lead.primary_factor)
            .bind(lead.has_recent_tests)
            .bind(&lead.tests_list)
            .bind(lead.test_status)
            .bind(&lead.prior_clinics)
            .bind(&lead.availability)
            .bind(lead.best_contact_method)
            .bind(&lead.message)
            .bind(lead.gdpr_consent)
            .bind(lead.consent_to_share)
            .bind(lead.consent_captured_at)
            .bind(&lead.ip_hash)
            .bind(&lead.user_agent)
            .bind(lead.intent_level)
            .bind(lead.tier)
            .bind(&lead.tier_reason)
            .bind(lead.status)
            .bind(lead.call_attempts)
            .bind(lead.last_call_at)
            .bind(&lead.operator_notes)
            .bind(lead.assigned_clinic_id)
            .bind(lead.verified_at)
            .bind(lead.assigned_at)
            .bind(lead.sent_to_clinic_at)
            .bind(lead.nurture_stage)
            .bind(lead.nurture_next_at)
            .bind(lead.nurture_completed)
            .execute(&self.pool)
            .await
            .with_context(|| format!("inserting lead {}", lead.short_id()))?;

        tracing::debug!("Inserted lead {}", lead.short_id());
        Ok(())
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, AppError> {
        let sql = format!("SELECT {} FROM leads WHERE id = $1", LEAD_COLUMNS);
        sqlx::query_as::<_, Lead>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn find_by_short_id(&self, short_id: &str) -> Result<Option<Lead>, AppError> {
        let Some(prefix) = short_id_prefix(short_id) else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT {} FROM leads WHERE replace(id::text, '-', '') LIKE $1 || '%' \
             ORDER BY created_at DESC LIMIT 1",
            LEAD_COLUMNS
        );
        sqlx::query_as::<_, Lead>(&sql)
            .bind(prefix)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn list_leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>, AppError> {
        let sql = format!(
            r#"
            SELECT {} FROM leads
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR tier = $2)
              AND ($3::text IS NULL OR intent_level = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
            LEAD_COLUMNS
        );
        sqlx::query_as::<_, Lead>(&sql)
            .bind(filter.status)
            .bind(filter.tier)
            .bind(filter.intent)
            .bind(filter.limit())
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn update_lifecycle(&self, lead: &Lead) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE leads
            SET status = $2,
                tier = $3,
                tier_reason = $4,
                call_attempts = $5,
                last_call_at = $6,
                operator_notes = $7,
                assigned_clinic_id = $8,
                verified_at = $9,
                assigned_at = $10,
                sent_to_clinic_at = $11,
                nurture_stage = $12,
                nurture_next_at = $13,
                nurture_completed = $14,
                updated_at = $15
            WHERE id = $1
            "#,
        )
        .bind(lead.id)
        .bind(lead.status)
        .bind(lead.tier)
        .bind(&lead.tier_reason)
        .bind(lead.call_attempts)
        .bind(lead.last_call_at)
        .bind(&lead.operator_notes)
        .bind(lead.assigned_clinic_id)
        .bind(lead.verified_at)
        .bind(lead.assigned_at)
        .bind(lead.sent_to_clinic_at)
        .bind(lead.nurture_stage)
        .bind(lead.nurture_next_at)
        .bind(lead.nurture_completed)
        .bind(lead.updated_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Lead {} not found", lead.id)));
        }
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
        let result = sqlx::query(
            r#"
            UPDATE leads
            SET nurture_stage = $3,
                nurture_next_at = $4,
                nurture_completed = $5,
                updated_at = now()
            WHERE id = $1 AND nurture_stage = $2 AND nurture_completed = false
            "#,
        )
        .bind(id)
        .bind(expected_stage)
        .bind(new_stage)
        .bind(next_at)
        .bind(completed)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(result.rows_affected() == 1)
    }

    async fn stop_nurture_for_email(
        &self,
        email: &str,
        except: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE leads
            SET nurture_completed = true,
                nurture_next_at = NULL,
                updated_at = $3
            WHERE lower(email) = lower($1)
              AND nurture_stage > 0
              AND nurture_completed = false
              AND ($2::uuid IS NULL OR id <> $2)
            "#,
        )
        .bind(email)
        .bind(except)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(result.rows_affected())
    }

    async fn due_for_nurture(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Lead>, AppError> {
        let sql = format!(
            r#"
            SELECT {} FROM leads
            WHERE (intent_level = 'low' OR status = 'LOW_INTENT_NURTURE')
              AND nurture_completed = false
              AND nurture_next_at IS NOT NULL
              AND nurture_next_at <= $1
            ORDER BY nurture_next_at ASC
            LIMIT $2
            "#,
            LEAD_COLUMNS
        );
        sqlx::query_as::<_, Lead>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn append_event(&self, event: &LeadEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO lead_events (id, lead_id, event_type, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.id)
        .bind(event.lead_id)
        .bind(event.event_type)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .context("appending lead event")?;
        Ok(())
    }

    async fn list_events(&self, lead_id: Uuid) -> Result<Vec<LeadEvent>, AppError> {
        sqlx::query_as::<_, LeadEvent>(
            r#"
            SELECT id, lead_id, event_type, payload, created_at
            FROM lead_events
            WHERE lead_id = $1
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(lead_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }
}

#[async_trait]
impl ClinicRepository for PgStore {
    async fn create_clinic(&self, clinic: &Clinic) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO clinics (id, name, email, phone, cities, active, notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(clinic.id)
        .bind(&clinic.name)
        .bind(&clinic.email)
        .bind(&clinic.phone)
        .bind(&clinic.cities)
        .bind(clinic.active)
        .bind(&clinic.notes)
        .bind(clinic.created_at)
        .bind(clinic.updated_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    async fn get_clinic(&self, id: Uuid) -> Result<Option<Clinic>, AppError> {
        sqlx::query_as::<_, Clinic>(
            "SELECT id, name, email, phone, cities, active, notes, created_at, updated_at \
             FROM clinics WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    async fn list_clinics(&self, active_only: bool) -> Result<Vec<Clinic>, AppError> {
        sqlx::query_as::<_, Clinic>(
            "SELECT id, name, email, phone, cities, active, notes, created_at, updated_at \
             FROM clinics WHERE ($1 = false OR active = true) ORDER BY name ASC",
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    async fn update_clinic(&self, clinic: &Clinic) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE clinics
            SET name = $2, email = $3, phone = $4, cities = $5,
                active = $6, notes = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(clinic.id)
        .bind(&clinic.name)
        .bind(&clinic.email)
        .bind(&clinic.phone)
        .bind(&clinic.cities)
        .bind(clinic.active)
        .bind(&clinic.notes)
        .bind(clinic.updated_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    async fn deactivate_clinic(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE clinics SET active = false, updated_at = $2 WHERE id = $1")
                .bind(id)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_prefix_accepts_hex_only() {
        assert_eq!(short_id_prefix("3F2A9C1E").as_deref(), Some("3f2a9c1e"));
        assert_eq!(short_id_prefix(" 3f2a-9c1e ").as_deref(), Some("3f2a9c1e"));
        assert_eq!(short_id_prefix(""), None);
        assert_eq!(short_id_prefix("ZZZZ"), None);
        assert_eq!(short_id_prefix("'; drop table leads; --"), None);
        assert_eq!(short_id_prefix(&"a".repeat(33)), None);
    }
}
