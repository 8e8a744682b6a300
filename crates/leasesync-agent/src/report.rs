//! Per-run audit record, emitted as JSON once the run ends.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use leasesync_core::ErrorKind;
use serde::Serialize;
use uuid::Uuid;

use crate::apply::ApplyOutcome;
use crate::diff::{Action, ReconciliationPlan};
use crate::error::SyncError;

/// A single inventory write that did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationFailure {
    pub ip: Ipv4Addr,
    pub action: Action,
    pub kind: ErrorKind,
    pub message: String,
}

/// The error that stopped a run before it could apply its plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FatalError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub target: String,
    pub subnet_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub observed: usize,
    pub rejected_rows: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deactivated: usize,
    pub failed: usize,
    pub failures: Vec<OperationFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FatalError>,
}

impl RunReport {
    pub fn new(target: impl Into<String>, subnet_id: impl Into<String>, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target: target.into(),
            subnet_id: subnet_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            observed: 0,
            rejected_rows: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
            deactivated: 0,
            failed: 0,
            failures: Vec::new(),
            error: None,
        }
    }

    /// Count a plan that was computed but not applied.
    pub fn record_dry_run(&mut self, plan: &ReconciliationPlan) {
        self.created = plan.create.len();
        self.updated = plan.update.len();
        self.unchanged = plan.unchanged.len();
        self.deactivated = plan.deactivate.len();
    }

    pub fn record_outcome(&mut self, plan: &ReconciliationPlan, outcome: ApplyOutcome) {
        self.created = outcome.created;
        self.updated = outcome.updated;
        self.deactivated = outcome.deactivated;
        self.unchanged = plan.unchanged.len();
        self.failed = outcome.failures.len();
        self.failures = outcome.failures;
    }

    pub fn mark_fatal(&mut self, error: &SyncError) {
        self.abort(error.kind(), error.to_string());
    }

    pub fn abort(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.error = Some(FatalError {
            kind,
            message: message.into(),
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// True when the run reached apply. Per-record failures still count
    /// as a completed run.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}
