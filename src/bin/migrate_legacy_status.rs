//! Collapses the legacy `status` / `operator_status` column pair into the
//! single lifecycle status column.
//!
//! Usage: `migrate_legacy_status [--dry-run]`

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use sqlx::FromRow;
use std::env;
use uuid::Uuid;

use fiv_match_api::models::LeadStatus;

#[derive(Debug, FromRow)]
struct LegacyStatusRow {
    id: Uuid,
    status: Option<String>,
    operator_status: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let dry_run = env::args().any(|arg| arg == "--dry-run");
    let database_url =
        env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let has_operator_status: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.columns
            WHERE table_name = 'leads' AND column_name = 'operator_status'
        )
        "#,
    )
    .fetch_one(&pool)
    .await?;

    let select = if has_operator_status {
        "SELECT id, status, operator_status FROM leads"
    } else {
        tracing::info!("No operator_status column, normalizing status values only");
        "SELECT id, status, NULL::text AS operator_status FROM leads"
    };
    let rows: Vec<LegacyStatusRow> = sqlx::query_as(select).fetch_all(&pool).await?;

    let total = rows.len();
    tracing::info!("Found {} leads to inspect{}", total, if dry_run { " (dry run)" } else { "" });

    let mut migrated_count = 0;
    let mut unchanged_count = 0;
    let mut error_count = 0;

    for (index, row) in rows.into_iter().enumerate() {
        if index > 0 && index % 1000 == 0 {
            tracing::info!(
                "Processed {}/{} leads (Migrated: {}, Unchanged: {}, Errors: {})",
                index,
                total,
                migrated_count,
                unchanged_count,
                error_count
            );
        }

        let canonical =
            LeadStatus::from_legacy(row.status.as_deref(), row.operator_status.as_deref());
        if row.status.as_deref() == Some(canonical.as_str()) {
            unchanged_count += 1;
            continue;
        }

        tracing::debug!(
            "Lead {}: status={:?} operator_status={:?} -> {}",
            row.id,
            row.status,
            row.operator_status,
            canonical
        );
        if dry_run {
            migrated_count += 1;
            continue;
        }

        match sqlx::query("UPDATE leads SET status = $2, updated_at = now() WHERE id = $1")
            .bind(row.id)
            .bind(canonical)
            .execute(&pool)
            .await
        {
            Ok(_) => migrated_count += 1,
            Err(e) => {
                tracing::error!("Failed to migrate lead {}: {}", row.id, e);
                error_count += 1;
            }
        }
    }

    tracing::info!(
        "Migration finished. Total: {}, Migrated: {}, Unchanged: {}, Errors: {}",
        total,
        migrated_count,
        unchanged_count,
        error_count
    );

    if error_count > 0 {
        anyhow::bail!("{} leads could not be migrated", error_count);
    }
    Ok(())
}
