use sqlx::{postgres::PgPoolOptions, PgPool};

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS clinics (
    id          UUID PRIMARY KEY,
    name        TEXT NOT NULL,
    email       TEXT NOT NULL,
    phone       TEXT,
    cities      TEXT[] NOT NULL DEFAULT '{}',
    active      BOOLEAN NOT NULL DEFAULT true,
    notes       TEXT,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS leads (
    id                  UUID PRIMARY KEY,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    locale              TEXT NOT NULL DEFAULT 'ro',
    first_name          TEXT NOT NULL,
    last_name           TEXT NOT NULL,
    phone               TEXT NOT NULL,
    phone_e164          TEXT,
    email               TEXT NOT NULL,
    city                TEXT NOT NULL,
    age_range           TEXT NOT NULL,
    female_age_exact    INTEGER,
    male_age_exact      INTEGER,
    tried_ivf           TEXT NOT NULL,
    urgency_level       TEXT,
    timeline            TEXT NOT NULL,
    budget_range        TEXT NOT NULL,
    voucher_status      TEXT,
    primary_factor      TEXT,
    has_recent_tests    BOOLEAN,
    tests_list          TEXT,
    test_status         TEXT,
    prior_clinics       TEXT,
    availability        TEXT,
    best_contact_method TEXT,
    message             TEXT,
    gdpr_consent        BOOLEAN NOT NULL,
    consent_to_share    BOOLEAN NOT NULL,
    consent_captured_at TIMESTAMPTZ,
    ip_hash             TEXT,
    user_agent          TEXT,
    intent_level        TEXT NOT NULL,
    tier                TEXT NOT NULL DEFAULT 'D',
    tier_reason         TEXT NOT NULL DEFAULT '',
    status              TEXT NOT NULL DEFAULT 'NEW',
    call_attempts       INTEGER NOT NULL DEFAULT 0,
    last_call_at        TIMESTAMPTZ,
    operator_notes      TEXT,
    assigned_clinic_id  UUID REFERENCES clinics(id),
    verified_at         TIMESTAMPTZ,
    assigned_at         TIMESTAMPTZ,
    sent_to_clinic_at   TIMESTAMPTZ,
    nurture_stage       INTEGER NOT NULL DEFAULT 0,
    nurture_next_at     TIMESTAMPTZ,
    nurture_completed   BOOLEAN NOT NULL DEFAULT false
);

CREATE INDEX IF NOT EXISTS leads_status_idx ON leads (status);
CREATE INDEX IF NOT EXISTS leads_email_idx ON leads (lower(email));
CREATE INDEX IF NOT EXISTS leads_nurture_due_idx ON leads (nurture_next_at)
    WHERE nurture_completed = false;

CREATE TABLE IF NOT EXISTS lead_events (
    seq         BIGSERIAL,
    id          UUID PRIMARY KEY,
    lead_id     UUID NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
    event_type  TEXT NOT NULL,
    payload     JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS lead_events_lead_idx ON lead_events (lead_id, created_at);
"#;

/// Creates the tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    tracing::info!("Database schema ready");
    Ok(())
}
