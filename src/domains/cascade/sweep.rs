//! Expired-hold sweep.
//!
//! Finds held slots whose expiry timestamp has passed and cascades each one
//! with reason `expired`. One tenant's failure never aborts the others; the
//! report aggregates counts and per-tenant error strings.

use tracing::{debug, error, info};

use crate::common::{EntryId, SlotId, TenantId};
use crate::kernel::ServiceKernel;

use super::orchestrator::{CascadeOrchestrator, CascadeReason};

/// Aggregate result of one sweep run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub tenants_processed: usize,
    pub holds_released: usize,
    /// Released holds where a next candidate was found and offered.
    pub cascaded: usize,
    pub errors: Vec<String>,
}

/// Sweeps expired holds for one tenant, or for every tenant that currently
/// has held slots when `tenant` is `None`.
pub async fn run_sweep(
    kernel: &ServiceKernel,
    tenant: Option<TenantId>,
) -> anyhow::Result<SweepReport> {
    let tenants = match tenant {
        Some(t) => vec![t],
        None => kernel.slots.tenants_with_held_slots().await?,
    };

    let mut report = SweepReport::default();
    for tenant_id in tenants {
        report.tenants_processed += 1;
        match sweep_tenant(kernel, tenant_id).await {
            Ok((released, cascaded)) => {
                report.holds_released += released;
                report.cascaded += cascaded;
            }
            Err(e) => {
                error!(tenant_id = %tenant_id, error = %e, "sweep failed for tenant");
                report.errors.push(format!("tenant {tenant_id}: {e:#}"));
            }
        }
    }

    info!(
        tenants = report.tenants_processed,
        released = report.holds_released,
        cascaded = report.cascaded,
        errors = report.errors.len(),
        "expired-hold sweep complete"
    );
    Ok(report)
}

async fn sweep_tenant(kernel: &ServiceKernel, tenant_id: TenantId) -> anyhow::Result<(usize, usize)> {
    let now = kernel.clock.now();
    let expired = kernel.slots.find_expired_holds(tenant_id, now).await?;
    if expired.is_empty() {
        return Ok((0, 0));
    }

    let orchestrator = CascadeOrchestrator::new(kernel);
    let mut released = 0;
    let mut cascaded = 0;

    for slot in expired {
        let entry_id = match slot.hold_entry_id {
            Some(id) => EntryId::from_uuid(id),
            // A held slot without an entry violates the model invariant;
            // skip it rather than poison the tenant's whole sweep.
            None => {
                debug!(slot_id = %slot.id, "held slot has no hold entry, skipping");
                continue;
            }
        };

        match orchestrator
            .handle_cascade(
                tenant_id,
                SlotId::from_uuid(slot.id),
                entry_id,
                CascadeReason::Expired,
            )
            .await
        {
            // Only count holds this sweep actually released; a concurrent
            // worker may have processed the same hold between the query and
            // the release.
            Ok(outcome) if outcome.hold_released => {
                released += 1;
                if outcome.next_candidate_found {
                    cascaded += 1;
                }
            }
            Ok(_) => {
                debug!(slot_id = %slot.id, "hold already processed elsewhere");
            }
            // Lost races mean another worker got there first.
            Err(e) if e.is_conflict() => {
                debug!(slot_id = %slot.id, "hold already advanced by another worker");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok((released, cascaded))
}
