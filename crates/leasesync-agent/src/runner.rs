//! Run controller.
//!
//! A run walks one target through authenticate → fetch → merge → list →
//! plan → apply. Each target owns its clients and token; several targets
//! run as separate tokio tasks so one failing appliance cannot stop the rest.

use std::sync::Arc;

use leasesync_core::{ErrorKind, SubnetTarget};
use leasesync_ipam::{AddressInventory, IpamClient};

use crate::apply::{apply, ApplyOptions};
use crate::config::{SyncConfig, TargetConfig};
use crate::diff::{plan, PlanOptions};
use crate::error::{Result, SyncError};
use crate::merge::{merge, scope_to_subnet};
use crate::report::RunReport;
use crate::source::{ApplianceClient, HostSource};

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub dry_run: bool,
    pub enable_deactivation: bool,
    pub max_in_flight: usize,
}

/// Everything one run needs, owned by that run.
pub struct RunContext<S, I> {
    name: String,
    target: SubnetTarget,
    source: S,
    inventory: I,
    options: RunOptions,
}

impl RunContext<ApplianceClient, IpamClient> {
    /// Build the production clients for one configured target.
    pub fn from_config(target: &TargetConfig, sync: &SyncConfig, dry_run: bool) -> Result<Self> {
        let source = ApplianceClient::new(&target.appliance_config(sync))
            .map_err(|e| SyncError::Config(format!("appliance client: {e}")))?;
        let inventory = IpamClient::new(&target.ipam_config(sync))
            .map_err(|e| SyncError::Config(format!("inventory client: {e}")))?;

        Ok(Self::new(
            target.display_name(),
            target.subnet_target(),
            source,
            inventory,
            RunOptions {
                dry_run,
                enable_deactivation: target.enable_deactivation,
                max_in_flight: sync.max_in_flight,
            },
        ))
    }
}

impl<S, I> RunContext<S, I>
where
    S: HostSource,
    I: AddressInventory,
{
    pub fn new(
        name: impl Into<String>,
        target: SubnetTarget,
        source: S,
        inventory: I,
        options: RunOptions,
    ) -> Self {
        Self {
            name: name.into(),
            target,
            source,
            inventory,
            options,
        }
    }

    /// Execute one reconciliation run. Never fails; fatal errors are
    /// recorded on the returned report.
    pub async fn run(&mut self) -> RunReport {
        let mut report = RunReport::new(&self.name, &self.target.subnet_id, self.options.dry_run);

        tracing::info!(
            run_id = %report.run_id,
            target = %self.name,
            subnet_id = %self.target.subnet_id,
            dry_run = self.options.dry_run,
            "Starting reconciliation run"
        );

        if let Err(e) = self.reconcile(&mut report).await {
            tracing::error!(
                run_id = %report.run_id,
                target = %self.name,
                kind = %e.kind(),
                error = %e,
                "Run aborted"
            );
            report.mark_fatal(&e);
        }
        report.finish();

        tracing::info!(
            run_id = %report.run_id,
            target = %self.name,
            observed = report.observed,
            rejected_rows = report.rejected_rows,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            deactivated = report.deactivated,
            failed = report.failed,
            duration_ms = report.duration_ms().unwrap_or_default(),
            "Run complete"
        );

        report
    }

    async fn reconcile(&mut self, report: &mut RunReport) -> Result<()> {
        self.inventory
            .authenticate()
            .await
            .map_err(SyncError::Auth)?;

        // Both sources must succeed before anything is written.
        let (leases, arp) = tokio::try_join!(self.source.fetch_leases(), self.source.fetch_arp())?;
        report.rejected_rows = leases.rejected.len() + arp.rejected.len();

        let hosts = scope_to_subnet(merge(leases.observations, arp.observations), &self.target);
        report.observed = hosts.len();

        let existing = self
            .inventory
            .list_addresses(&self.target.subnet_id)
            .await
            .map_err(SyncError::InventoryRead)?;

        let plan = plan(
            &hosts,
            existing,
            &self.target,
            PlanOptions {
                enable_deactivation: self.options.enable_deactivation,
            },
        );

        if self.options.dry_run {
            tracing::info!(
                target = %self.name,
                writes = plan.write_count(),
                "Dry run, skipping inventory writes"
            );
            report.record_dry_run(&plan);
            return Ok(());
        }

        let outcome = apply(
            &plan,
            &self.inventory,
            &ApplyOptions {
                subnet_id: self.target.subnet_id.clone(),
                max_in_flight: self.options.max_in_flight,
            },
        )
        .await;
        report.record_outcome(&plan, outcome);
        Ok(())
    }
}

/// Run every configured target once, or only the one named `only`.
///
/// Reports come back in configuration order.
pub async fn run_targets(
    sync: &SyncConfig,
    only: Option<&str>,
    dry_run: bool,
) -> Result<Vec<RunReport>> {
    let targets: Vec<TargetConfig> = sync
        .all_targets()
        .into_iter()
        .filter(|t| only.map_or(true, |name| t.display_name() == name))
        .collect();

    if targets.is_empty() {
        return Err(SyncError::Config(match only {
            Some(name) => format!("no target named {name}"),
            None => "no sync targets configured".to_string(),
        }));
    }

    let sync = Arc::new(sync.clone());
    let mut handles = Vec::with_capacity(targets.len());

    for target in targets {
        let sync = sync.clone();
        let name = target.display_name();
        let subnet_id = target.subnet_id.clone();
        let handle = tokio::spawn(async move { run_target(&target, &sync, dry_run).await });
        handles.push((name, subnet_id, handle));
    }

    tracing::info!(target_count = handles.len(), "Runs started");

    let mut reports = Vec::with_capacity(handles.len());
    for (name, subnet_id, handle) in handles {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => {
                tracing::error!(target = %name, error = %e, "Run task panicked");
                let mut report = RunReport::new(name, subnet_id, dry_run);
                report.abort(ErrorKind::Internal, format!("run task failed: {e}"));
                report.finish();
                reports.push(report);
            }
        }
    }

    Ok(reports)
}

async fn run_target(target: &TargetConfig, sync: &SyncConfig, dry_run: bool) -> RunReport {
    match RunContext::from_config(target, sync, dry_run) {
        Ok(mut ctx) => ctx.run().await,
        Err(e) => {
            tracing::error!(target = %target.display_name(), error = %e, "Cannot start run");
            let mut report = RunReport::new(target.display_name(), &target.subnet_id, dry_run);
            report.mark_fatal(&e);
            report.finish();
            report
        }
    }
}
