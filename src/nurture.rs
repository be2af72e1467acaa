//! Three-step re-engagement email sequence for low-intent leads.
//!
//! A batch takes one snapshot of due leads and processes each lead
//! independently with bounded concurrency. Every advance is a conditional
//! update on the stage the snapshot saw, so no lead moves twice per run
//! even when two runs overlap.

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::email::{templates, EmailOutcome, EmailSender};
use crate::errors::AppError;
use crate::models::Lead;
use crate::repository::LeadRepository;

/// Final stage of the sequence.
pub const LAST_STAGE: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NurtureSettings {
    /// Maximum leads per run.
    pub batch_size: i64,
    /// Leads processed in parallel within a run.
    pub concurrency: usize,
    /// Report what would happen without advancing any lead.
    pub dry_run: bool,
}

impl Default for NurtureSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 8,
            dry_run: false,
        }
    }
}

/// What to do with a lead sitting at a given stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlan {
    pub send: bool,
    pub next_stage: i32,
    pub next_at: Option<DateTime<Utc>>,
    pub completed: bool,
}

pub fn plan_stage(stage: i32, now: DateTime<Utc>) -> StagePlan {
    match stage {
        1 => StagePlan {
            send: true,
            next_stage: 2,
            next_at: Some(now + Duration::days(7)),
            completed: false,
        },
        2 => StagePlan {
            send: true,
            next_stage: 3,
            next_at: Some(now + Duration::days(14)),
            completed: false,
        },
        LAST_STAGE => StagePlan {
            send: true,
            next_stage: LAST_STAGE,
            next_at: None,
            completed: true,
        },
        // Corrupt stage: close the sequence without sending.
        other => StagePlan {
            send: false,
            next_stage: other,
            next_at: None,
            completed: true,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadNurtureStatus {
    Sent,
    /// Invalid stage closed without an email.
    Closed,
    /// Changed by someone else since the snapshot.
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadNurtureResult {
    pub lead_id: Uuid,
    pub stage: i32,
    pub status: LeadNurtureStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NurtureReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<LeadNurtureResult>,
}

impl NurtureReport {
    fn from_results(results: Vec<LeadNurtureResult>) -> Self {
        let count = |status: LeadNurtureStatus| {
            results.iter().filter(|r| r.status == status).count()
        };
        Self {
            processed: results.len(),
            succeeded: count(LeadNurtureStatus::Sent) + count(LeadNurtureStatus::Closed),
            failed: count(LeadNurtureStatus::Failed),
            skipped: count(LeadNurtureStatus::Skipped),
            results,
        }
    }
}

pub struct NurtureScheduler {
    leads: Arc<dyn LeadRepository>,
    email: Arc<dyn EmailSender>,
    settings: NurtureSettings,
}

impl NurtureScheduler {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        email: Arc<dyn EmailSender>,
        settings: NurtureSettings,
    ) -> Self {
        Self {
            leads,
            email,
            settings,
        }
    }

    /// Processes every lead due at `now`. Only the snapshot query can fail
    /// the run; per-lead failures land in the report.
    pub async fn run_batch(&self, now: DateTime<Utc>) -> Result<NurtureReport, AppError> {
        let due = self
            .leads
            .due_for_nurture(now, self.settings.batch_size)
            .await?;
        tracing::info!("[nurture] Found {} leads ready for nurture emails", due.len());

        let results: Vec<LeadNurtureResult> = stream::iter(due)
            .map(|lead| self.process(lead, now))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let report = NurtureReport::from_results(results);
        tracing::info!(
            "[nurture] Run finished: {} processed, {} succeeded, {} failed, {} skipped",
            report.processed,
            report.succeeded,
            report.failed,
            report.skipped
        );
        Ok(report)
    }

    async fn process(&self, lead: Lead, now: DateTime<Utc>) -> LeadNurtureResult {
        let stage = lead.nurture_stage;
        let result = |status, error| LeadNurtureResult {
            lead_id: lead.id,
            stage,
            status,
            error,
        };
        let plan = plan_stage(stage, now);

        if plan.send {
            let Some(email) = templates::nurture(stage, &lead) else {
                return result(
                    LeadNurtureStatus::Failed,
                    Some(format!("no template for stage {}", stage)),
                );
            };
            if let EmailOutcome::Failed { reason } = self.email.send(&email).await {
                tracing::error!(
                    "[nurture] Lead {}: failed to send email #{}: {}",
                    lead.short_id(),
                    stage,
                    reason
                );
                return result(LeadNurtureStatus::Failed, Some(reason));
            }
        } else {
            tracing::warn!(
                "[nurture] Lead {}: invalid stage {}, marking as completed",
                lead.short_id(),
                stage
            );
        }

        if self.settings.dry_run {
            tracing::info!(
                "[nurture] Lead {}: dry run, would move to stage {}{}",
                lead.short_id(),
                plan.next_stage,
                if plan.completed { " and complete" } else { "" }
            );
            let status = if plan.send {
                LeadNurtureStatus::Sent
            } else {
                LeadNurtureStatus::Closed
            };
            return result(status, None);
        }

        match self
            .leads
            .advance_nurture(lead.id, stage, plan.next_stage, plan.next_at, plan.completed)
            .await
        {
            Ok(true) if plan.send => {
                tracing::info!(
                    "[nurture] Lead {}: sent email #{}{}",
                    lead.short_id(),
                    stage,
                    if plan.completed { ", sequence completed" } else { "" }
                );
                result(LeadNurtureStatus::Sent, None)
            }
            Ok(true) => result(LeadNurtureStatus::Closed, None),
            Ok(false) => {
                tracing::warn!(
                    "[nurture] Lead {}: stage changed since snapshot, not advanced",
                    lead.short_id()
                );
                result(LeadNurtureStatus::Skipped, None)
            }
            Err(e) => {
                tracing::error!("[nurture] Lead {}: failed to advance: {}", lead.short_id(), e);
                result(LeadNurtureStatus::Failed, Some(e.to_string()))
            }
        }
    }
}
