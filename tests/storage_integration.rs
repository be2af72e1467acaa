use chrono::{Duration, Utc};
use std::env;
use uuid::Uuid;

use fiv_match_api::db::{ensure_schema, Database};
use fiv_match_api::intake::build_lead;
use fiv_match_api::models::{Clinic, EventType, LeadEvent, LeadFilter, LeadStatus};
use fiv_match_api::repository::{ClinicRepository, LeadRepository, PgStore};
use fiv_match_api::validation::validate_submission;

/// Round trip of leads, clinics, events and nurture updates through Postgres.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn lead_storage_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    ensure_schema(&db.pool).await?;
    let store = PgStore::new(db.pool.clone());

    let now = Utc::now();
    let clinic = Clinic {
        id: Uuid::new_v4(),
        name: "Smoke Test Clinic".to_string(),
        email: "smoke@clinic.test".to_string(),
        phone: None,
        cities: vec!["Iasi".to_string()],
        active: true,
        notes: None,
        created_at: now,
        updated_at: now,
    };
    store.create_clinic(&clinic).await?;
    let stored = store
        .get_clinic(clinic.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("clinic not found"))?;
    assert_eq!(stored.name, clinic.name);
    assert_eq!(stored.cities, clinic.cities);

    // Unique email so repeated runs do not touch each other's nurture state.
    let email = format!("smoke-{}@example.test", Uuid::new_v4().simple());
    let draft = validate_submission(&serde_json::json!({
        "first_name": "Smoke",
        "last_name": "Test",
        "phone": "0722123456",
        "email": email,
        "female_age_exact": 33,
        "tried_ivf": "Yes",
        "budget_range": "over-20k",
        "city": "Iasi",
        "gdpr_consent": true,
        "consent_to_share": true,
        "urgency_level": "INFO_ONLY"
    }))
    .map_err(|f| anyhow::anyhow!("fixture rejected: {:?}", f.fields))?;
    let lead = build_lead(&draft, Uuid::new_v4(), now, Some("hash".to_string()), None);
    store.insert_lead(&lead).await?;
    store
        .append_event(&LeadEvent::new(
            lead.id,
            EventType::Created,
            serde_json::json!({"source": "smoke_test"}),
            now,
        ))
        .await?;

    let loaded = store
        .get_lead(lead.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("lead not found"))?;
    assert_eq!(loaded.email, email);
    assert_eq!(loaded.status, LeadStatus::New);
    assert_eq!(loaded.nurture_stage, 1);

    let by_short = store.find_by_short_id(&lead.short_id()).await?;
    assert_eq!(by_short.map(|l| l.id), Some(lead.id));

    let listed = store
        .list_leads(&LeadFilter {
            status: Some(LeadStatus::New),
            ..LeadFilter::default()
        })
        .await?;
    assert!(listed.iter().all(|l| l.status == LeadStatus::New));

    let due = store.due_for_nurture(now + Duration::seconds(1), 1000).await?;
    assert!(due.iter().any(|l| l.id == lead.id));

    assert!(store.advance_nurture(lead.id, 1, 2, Some(now + Duration::days(7)), false).await?);
    // stale expectation loses
    assert!(!store.advance_nurture(lead.id, 1, 2, Some(now + Duration::days(7)), false).await?);

    let stopped = store.stop_nurture_for_email(&email.to_uppercase(), None, now).await?;
    assert_eq!(stopped, 1);

    let events = store.list_events(lead.id).await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Created);

    assert!(store.deactivate_clinic(clinic.id, now).await?);
    let inactive = store.list_clinics(true).await?;
    assert!(inactive.iter().all(|c| c.id != clinic.id));

    Ok(())
}
