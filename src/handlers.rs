use crate::abuse::AbuseGate;
use crate::config::Config;
use crate::email::EmailSender;
use crate::errors::AppError;
use crate::hashing::IpHasher;
use crate::intake::{IntakeService, SubmissionOutcome};
use crate::lifecycle::{LifecycleService, OperatorAction};
use crate::locale::{api_message, resolve_locale, ApiMessage, Locale};
use crate::models::*;
use crate::nurture::{NurtureReport, NurtureScheduler};
use crate::repository::{ClinicRepository, LeadRepository};
use crate::routing::RoutingResolver;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use uuid::Uuid;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

const OPERATOR_TOKEN_HEADER: &str = "x-verify-token";
const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";
const OPERATOR_NAME_HEADER: &str = "x-operator-name";

/// Shared application state injected into handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    pub leads: Arc<dyn LeadRepository>,
    pub clinics: Arc<dyn ClinicRepository>,
    /// City routing, built once from the configured rules.
    pub routing: Arc<RoutingResolver>,
    pub intake: IntakeService,
    pub lifecycle: LifecycleService,
    pub nurture: NurtureScheduler,
}

impl AppState {
    /// Wires every service from the configuration and its collaborators.
    pub fn new(
        config: Config,
        leads: Arc<dyn LeadRepository>,
        clinics: Arc<dyn ClinicRepository>,
        email: Arc<dyn EmailSender>,
        routing: Arc<RoutingResolver>,
        gate: AbuseGate,
    ) -> Self {
        let intake = IntakeService::new(
            Arc::clone(&leads),
            gate,
            IpHasher::new(config.ip_hash_salt.clone()),
            Arc::clone(&email),
            config.monitor_email.clone(),
        );
        let lifecycle = LifecycleService::new(
            Arc::clone(&leads),
            Arc::clone(&clinics),
            Arc::clone(&routing),
            Arc::clone(&email),
            config.monitor_email.clone(),
        );
        let nurture = NurtureScheduler::new(Arc::clone(&leads), email, config.nurture);
        Self {
            config,
            leads,
            clinics,
            routing,
            intake,
            lifecycle,
            nurture,
        }
    }
}

/// Routes behind the per-IP governor: public intake, operator and internal.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/leads", post(submit_lead))
        .route("/api/admin/leads", get(list_leads))
        .route("/api/admin/leads/:id", get(get_lead))
        .route("/api/admin/leads/:id/routing", get(routing_preview))
        .route("/api/admin/leads/:id/call", post(log_call))
        .route("/api/admin/leads/:id/verify", post(verify_lead))
        .route("/api/admin/leads/:id/assign", post(assign_lead))
        .route("/api/admin/leads/:id/send", post(send_lead))
        .route("/api/admin/leads/:id/status", post(set_status))
        .route("/api/admin/leads/:id/notes", post(add_notes))
        .route("/api/admin/clinics", get(list_clinics).post(create_clinic))
        .route(
            "/api/admin/clinics/:id",
            get(get_clinic).put(update_clinic).delete(deactivate_clinic),
        )
        .route("/api/internal/run-nurture", post(run_nurture))
}

/// Adds the health check, state and transport layers around `protected`.
pub fn build_router(state: Arc<AppState>, protected: Router<Arc<AppState>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(protected.layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Full router without the governor layer.
pub fn app_router(state: Arc<AppState>) -> Router {
    build_router(state, api_routes())
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "fiv-match-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

// ============ Intake ============

/// The 201 answer given to a submission the abuse gate filtered.
///
/// Indistinguishable from a real admission apart from the nil lead id;
/// nothing was stored and no email will follow.
pub fn silent_abuse_acknowledgement(locale: Locale) -> Response {
    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": api_message(ApiMessage::Success, locale),
            "next_steps": api_message(ApiMessage::NextSteps, locale),
            "lead_id": Uuid::nil(),
        })),
    )
        .into_response()
}

/// Client IP from proxy headers: first `x-forwarded-for` entry, then
/// `x-real-ip`, else `"unknown"`.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .unwrap_or("unknown")
        .to_string()
}

/// POST /api/leads
///
/// Public form intake.
///
/// # Returns
///
/// * `201` - Lead admitted, or filtered as automated (same body shape).
/// * `400` - Body is not JSON.
/// * `422` - Localized field errors.
/// * `500` - Localized generic error.
pub async fn submit_lead(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(Value::Null) | Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": api_message(ApiMessage::InvalidJson, Locale::default()) })),
            )
                .into_response()
        }
        Ok(raw) => raw,
    };
    let locale = resolve_locale(raw.get("locale"));
    let ip = client_ip(&headers);
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    match state.intake.submit(&raw, &ip, user_agent).await {
        Ok(SubmissionOutcome::Accepted {
            lead_id,
            intent,
            locale,
        }) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": api_message(ApiMessage::Success, locale),
                "next_steps": api_message(ApiMessage::NextSteps, locale),
                "lead_id": lead_id,
                "lead_score": intent,
            })),
        )
            .into_response(),
        Ok(SubmissionOutcome::Filtered { locale, .. }) => silent_abuse_acknowledgement(locale),
        Ok(SubmissionOutcome::Rejected(failure)) => AppError::Validation {
            locale: failure.locale,
            fields: failure.fields,
        }
        .into_response(),
        Err(e) => {
            tracing::error!("Unexpected error in lead intake: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": api_message(ApiMessage::ServerError, locale) })),
            )
                .into_response()
        }
    }
}

// ============ Access control ============

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

fn require_operator(
    state: &AppState,
    headers: &HeaderMap,
    query: &TokenQuery,
) -> Result<String, AppError> {
    let token = headers
        .get(OPERATOR_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(query.token.as_deref())
        .ok_or_else(|| AppError::Unauthorized("Missing operator token".to_string()))?;

    if !constant_time_compare(token, &state.config.verify_token) {
        return Err(AppError::Unauthorized("Invalid operator token".to_string()));
    }

    Ok(headers
        .get(OPERATOR_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("operator")
        .to_string())
}

fn require_internal(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let token = headers
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing internal token".to_string()))?;

    if !constant_time_compare(token, &state.config.internal_cron_token) {
        return Err(AppError::Unauthorized("Invalid internal token".to_string()));
    }
    Ok(())
}

// ============ Operator: leads ============

/// GET /api/admin/leads
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Query(filter): Query<LeadFilter>,
) -> Result<Json<Value>, AppError> {
    require_operator(&state, &headers, &token)?;
    let leads = state.leads.list_leads(&filter).await?;
    Ok(Json(json!({
        "leads": leads,
        "limit": filter.limit(),
        "offset": filter.offset(),
    })))
}

/// GET /api/admin/leads/:id
///
/// Accepts a full UUID or a short display id. Includes the assigned clinic
/// and the audit trail.
pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Path(reference): Path<String>,
) -> Result<Json<Value>, AppError> {
    require_operator(&state, &headers, &token)?;
    let lead = state.lifecycle.find_lead(&reference).await?;
    let clinic = match lead.assigned_clinic_id {
        Some(id) => state.clinics.get_clinic(id).await?,
        None => None,
    };
    let events = state.leads.list_events(lead.id).await?;
    Ok(Json(json!({
        "short_id": lead.short_id(),
        "lead": lead,
        "clinic": clinic,
        "events": events,
    })))
}

/// GET /api/admin/leads/:id/routing
pub async fn routing_preview(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Path(reference): Path<String>,
) -> Result<Json<Value>, AppError> {
    require_operator(&state, &headers, &token)?;
    let lead = state.lifecycle.find_lead(&reference).await?;
    let routing = state.routing.resolve(&lead.city);
    Ok(Json(json!({
        "lead_id": lead.id,
        "city": lead.city,
        "email": routing.email,
        "matched_rule": routing.matched_rule,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct NotesBody {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub clinic_id: Uuid,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: LeadStatus,
    pub notes: Option<String>,
}

async fn run_action(
    state: &AppState,
    reference: &str,
    action: OperatorAction,
    actor: &str,
    notes: Option<&str>,
) -> Result<Json<Lead>, AppError> {
    let notes = notes.map(str::trim).filter(|n| !n.is_empty());
    let lead = state.lifecycle.apply(reference, action, actor, notes).await?;
    Ok(Json(lead))
}

/// POST /api/admin/leads/:id/call
pub async fn log_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Path(reference): Path<String>,
    body: Option<Json<NotesBody>>,
) -> Result<Json<Lead>, AppError> {
    let actor = require_operator(&state, &headers, &token)?;
    let notes = body.and_then(|Json(b)| b.notes);
    run_action(&state, &reference, OperatorAction::LogCall, &actor, notes.as_deref()).await
}

/// POST /api/admin/leads/:id/verify
pub async fn verify_lead(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Path(reference): Path<String>,
    body: Option<Json<NotesBody>>,
) -> Result<Json<Lead>, AppError> {
    let actor = require_operator(&state, &headers, &token)?;
    let notes = body.and_then(|Json(b)| b.notes);
    run_action(&state, &reference, OperatorAction::Verify, &actor, notes.as_deref()).await
}

/// POST /api/admin/leads/:id/assign
pub async fn assign_lead(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Path(reference): Path<String>,
    Json(body): Json<AssignBody>,
) -> Result<Json<Lead>, AppError> {
    let actor = require_operator(&state, &headers, &token)?;
    run_action(
        &state,
        &reference,
        OperatorAction::Assign {
            clinic_id: body.clinic_id,
        },
        &actor,
        body.notes.as_deref(),
    )
    .await
}

/// POST /api/admin/leads/:id/send
///
/// Emails the lead to its assigned clinic. A provider failure answers 502
/// and leaves the lead untouched.
pub async fn send_lead(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Path(reference): Path<String>,
    body: Option<Json<NotesBody>>,
) -> Result<Json<Lead>, AppError> {
    let actor = require_operator(&state, &headers, &token)?;
    let notes = body.and_then(|Json(b)| b.notes);
    run_action(&state, &reference, OperatorAction::Send, &actor, notes.as_deref()).await
}

/// POST /api/admin/leads/:id/status
///
/// Operator status change: `VERIFIED_READY`, `INVALID` or `LOW_INTENT_NURTURE`.
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Path(reference): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Lead>, AppError> {
    let actor = require_operator(&state, &headers, &token)?;
    let action = match body.status {
        LeadStatus::VerifiedReady => OperatorAction::Verify,
        LeadStatus::Invalid => OperatorAction::Invalidate,
        LeadStatus::LowIntentNurture => OperatorAction::EnrollNurture,
        other => {
            return Err(AppError::BadRequest(format!(
                "status {} cannot be set directly",
                other
            )))
        }
    };
    run_action(&state, &reference, action, &actor, body.notes.as_deref()).await
}

/// POST /api/admin/leads/:id/notes
pub async fn add_notes(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Path(reference): Path<String>,
    Json(body): Json<NotesBody>,
) -> Result<Json<Lead>, AppError> {
    require_operator(&state, &headers, &token)?;
    let notes = body.notes.unwrap_or_default();
    let lead = state.lifecycle.add_notes(&reference, &notes).await?;
    Ok(Json(lead))
}

// ============ Operator: clinics ============

#[derive(Debug, Default, Deserialize)]
pub struct ClinicListQuery {
    pub active_only: Option<bool>,
}

/// GET /api/admin/clinics
pub async fn list_clinics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Query(query): Query<ClinicListQuery>,
) -> Result<Json<Vec<Clinic>>, AppError> {
    require_operator(&state, &headers, &token)?;
    let clinics = state
        .clinics
        .list_clinics(query.active_only.unwrap_or(false))
        .await?;
    Ok(Json(clinics))
}

fn check_clinic_fields(name: &str, email: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("clinic name is required".to_string()));
    }
    if !email.contains('@') {
        return Err(AppError::BadRequest("clinic email is invalid".to_string()));
    }
    Ok(())
}

/// POST /api/admin/clinics
pub async fn create_clinic(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Json(body): Json<NewClinic>,
) -> Result<(StatusCode, Json<Clinic>), AppError> {
    require_operator(&state, &headers, &token)?;
    check_clinic_fields(&body.name, &body.email)?;

    let now = Utc::now();
    let clinic = Clinic {
        id: Uuid::new_v4(),
        name: body.name.trim().to_string(),
        email: body.email.trim().to_lowercase(),
        phone: body.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
        cities: clean_cities(&body.cities),
        active: body.active,
        notes: body.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        created_at: now,
        updated_at: now,
    };
    state.clinics.create_clinic(&clinic).await?;
    tracing::info!("Clinic {} created ({} cities)", clinic.id, clinic.cities.len());
    Ok((StatusCode::CREATED, Json(clinic)))
}

async fn load_clinic(state: &AppState, id: Uuid) -> Result<Clinic, AppError> {
    state
        .clinics
        .get_clinic(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Clinic {} not found", id)))
}

/// GET /api/admin/clinics/:id
pub async fn get_clinic(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Path(id): Path<Uuid>,
) -> Result<Json<Clinic>, AppError> {
    require_operator(&state, &headers, &token)?;
    Ok(Json(load_clinic(&state, id).await?))
}

/// PUT /api/admin/clinics/:id
pub async fn update_clinic(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Path(id): Path<Uuid>,
    Json(update): Json<ClinicUpdate>,
) -> Result<Json<Clinic>, AppError> {
    require_operator(&state, &headers, &token)?;
    if update.is_empty() {
        return Err(AppError::BadRequest("no fields to update".to_string()));
    }
    let mut clinic = load_clinic(&state, id).await?;
    update.apply(&mut clinic);
    check_clinic_fields(&clinic.name, &clinic.email)?;
    clinic.updated_at = Utc::now();
    state.clinics.update_clinic(&clinic).await?;
    Ok(Json(clinic))
}

/// DELETE /api/admin/clinics/:id
///
/// Soft delete: the clinic stays on record but is no longer assignable.
pub async fn deactivate_clinic(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_operator(&state, &headers, &token)?;
    if !state.clinics.deactivate_clinic(id, Utc::now()).await? {
        return Err(AppError::NotFound(format!("Clinic {} not found", id)));
    }
    tracing::info!("Clinic {} deactivated", id);
    Ok(Json(json!({ "id": id, "active": false })))
}

// ============ Internal ============

/// POST /api/internal/run-nurture
///
/// Scheduler trigger, authenticated with the shared internal token.
pub async fn run_nurture(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<NurtureReport>, AppError> {
    require_internal(&state, &headers)?;
    let report = state.nurture.run_batch(Utc::now()).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers), "10.0.0.2");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }

    #[test]
    fn token_comparison() {
        assert!(constant_time_compare("secret", "secret"));
        assert!(!constant_time_compare("secret", "secreT"));
        assert!(!constant_time_compare("secret", "secret-longer"));
    }
}
