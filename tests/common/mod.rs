//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use fiv_match_api::abuse::{AbuseGate, AbuseSettings};
use fiv_match_api::config::Config;
use fiv_match_api::email::{EmailOutcome, EmailSender, EmailSettings, OutgoingEmail};
use fiv_match_api::errors::AppError;
use fiv_match_api::handlers::AppState;
use fiv_match_api::models::{Lead, LeadEvent, LeadFilter};
use fiv_match_api::nurture::NurtureSettings;
use fiv_match_api::repository::memory::MemoryStore;
use fiv_match_api::repository::LeadRepository;
use fiv_match_api::routing::{RoutingResolver, RoutingRule};

pub const OPERATOR_TOKEN: &str = "operator-secret";
pub const CRON_TOKEN: &str = "cron-secret";
pub const MONITOR_EMAIL: &str = "monitor@fivmatch.ro";
pub const DEFAULT_ROUTING_EMAIL: &str = "leads@fivmatch.ro";

/// Records every email and optionally fails them all.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<OutgoingEmail>>,
    failing: AtomicBool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<OutgoingEmail> {
        self.sent()
            .into_iter()
            .filter(|e| e.to.iter().any(|to| to == address))
            .collect()
    }

    /// Waits for background notification tasks to deliver `count` emails.
    pub async fn wait_for(&self, count: usize) -> Vec<OutgoingEmail> {
        for _ in 0..100 {
            if self.sent.lock().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, email: &OutgoingEmail) -> EmailOutcome {
        if self.failing.load(Ordering::SeqCst) {
            return EmailOutcome::Failed {
                reason: "provider unavailable".to_string(),
            };
        }
        let mut sent = self.sent.lock();
        sent.push(email.clone());
        EmailOutcome::Sent {
            id: Some(format!("msg-{}", sent.len())),
        }
    }
}

/// Delegates to a [`MemoryStore`] but refuses every new lead.
pub struct RejectingInserts(pub Arc<MemoryStore>);

#[async_trait]
impl LeadRepository for RejectingInserts {
    async fn insert_lead(&self, _lead: &Lead) -> Result<(), AppError> {
        Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut))
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, AppError> {
        self.0.get_lead(id).await
    }

    async fn find_by_short_id(&self, short_id: &str) -> Result<Option<Lead>, AppError> {
        self.0.find_by_short_id(short_id).await
    }

    async fn list_leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>, AppError> {
        self.0.list_leads(filter).await
    }

    async fn update_lifecycle(&self, lead: &Lead) -> Result<(), AppError> {
        self.0.update_lifecycle(lead).await
    }

    async fn advance_nurture(
        &self,
        id: Uuid,
        expected_stage: i32,
        new_stage: i32,
        next_at: Option<DateTime<Utc>>,
        completed: bool,
    ) -> Result<bool, AppError> {
        self.0
            .advance_nurture(id, expected_stage, new_stage, next_at, completed)
            .await
    }

    async fn stop_nurture_for_email(
        &self,
        email: &str,
        except: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        self.0.stop_nurture_for_email(email, except, now).await
    }

    async fn due_for_nurture(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Lead>, AppError> {
        self.0.due_for_nurture(now, limit).await
    }

    async fn append_event(&self, event: &LeadEvent) -> Result<(), AppError> {
        self.0.append_event(event).await
    }

    async fn list_events(&self, lead_id: Uuid) -> Result<Vec<LeadEvent>, AppError> {
        self.0.list_events(lead_id).await
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/fiv_match_test".to_string(),
        port: 0,
        ip_hash_salt: "test-salt".to_string(),
        verify_token: OPERATOR_TOKEN.to_string(),
        internal_cron_token: CRON_TOKEN.to_string(),
        default_routing_email: DEFAULT_ROUTING_EMAIL.to_string(),
        routing_rules: vec![RoutingRule {
            email: "cluj@partner.ro".to_string(),
            cities: vec!["Cluj-Napoca".to_string(), "Cluj".to_string()],
        }],
        monitor_email: Some(MONITOR_EMAIL.to_string()),
        email: EmailSettings {
            api_key: "re_test".to_string(),
            from: "FIV Match <noreply@fivmatch.ro>".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
        },
        abuse: AbuseSettings::default(),
        nurture: NurtureSettings::default(),
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub email: Arc<RecordingSender>,
}

pub fn build_app(config: Config) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(RecordingSender::new());
    let routing = Arc::new(
        RoutingResolver::new(&config.routing_rules, config.default_routing_email.clone())
            .expect("routing resolver"),
    );
    let gate = AbuseGate::in_memory(config.abuse.clone());
    let state = Arc::new(AppState::new(
        config,
        store.clone(),
        store.clone(),
        email.clone(),
        routing,
        gate,
    ));
    TestApp {
        state,
        store,
        email,
    }
}

pub fn test_app() -> TestApp {
    build_app(test_config())
}

/// A complete, high-intent submission rendered ten seconds ago.
pub fn valid_body() -> Value {
    json!({
        "locale": "en",
        "first_name": "Ana",
        "last_name": "Popescu",
        "phone": "0722 123 456",
        "email": "ana.popescu@example.ro",
        "city": "Cluj-Napoca",
        "female_age_exact": 32,
        "tried_ivf": "No",
        "urgency_level": "ASAP_0_30",
        "budget_range": "10k-20k",
        "best_contact_method": "PHONE",
        "availability_windows": "weekdays after 17:00",
        "gdpr_consent": true,
        "consent_to_share": true,
        "_company": "",
        "_rendered": Utc::now().timestamp_millis() - 10_000
    })
}

pub fn low_intent_body() -> Value {
    let mut body = valid_body();
    body["urgency_level"] = json!("INFO_ONLY");
    body
}
