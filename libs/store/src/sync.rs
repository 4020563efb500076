//! Startup-time bulk transfer of every dataset from the document store into
//! the grid.
//!
//! The synchronizer locates the two stores by their [`StoreKind`] tag
//! because either one may be configured as the dual store's primary. The
//! cancellation handle is honored before the run, at each dataset boundary
//! and between items, so a slow transfer can be abandoned mid-flight with a
//! partial-progress summary.

use crate::error::{Error, Result};
use crate::{DualStore, Store, StoreKind};

use quasar_core::config::ResourceConfig;
use quasar_core::resource::ensure_environment;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default deadline applied to the cancellation handle by the provisioning
/// startup path.
pub const DEFAULT_SYNC_DEADLINE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub completed_resources: usize,
    pub processed_items: u64,
    pub failed_items: u64,
    pub total_items: u64,
}

/// Pick the grid and document stores out of the dual store, in that order.
fn locate_stores(dual: &DualStore) -> Result<(Arc<dyn Store>, Arc<dyn Store>)> {
    let mut grid = None;
    let mut document = None;
    let mut stores = vec![dual.primary()];
    stores.extend(dual.secondary());
    for store in stores {
        match store.kind() {
            StoreKind::Grid => grid = Some(store),
            StoreKind::Document => document = Some(store),
            StoreKind::Dummy => {}
        }
    }
    Ok((
        grid.ok_or(Error::StoreNotConfigured(StoreKind::Grid))?,
        document.ok_or(Error::StoreNotConfigured(StoreKind::Document))?,
    ))
}

/// Copy every configured dataset from the document store into the grid.
///
/// Returns [`Error::SyncCancelled`] when the handle fires,
/// [`Error::SyncFailed`] when any item could not be written, and the
/// aggregate report otherwise.
pub async fn sync_stores(
    cancel: CancellationToken,
    dual: &DualStore,
    specs: &[ResourceConfig],
) -> Result<SyncReport> {
    let (grid, document) = locate_stores(dual)?;
    if !grid.connected() || !document.connected() {
        return Err(Error::NoConnectedStore);
    }

    let mut report = SyncReport::default();
    for spec in specs {
        if cancel.is_cancelled() {
            return Err(cancelled(&report));
        }
        let dataset = spec.kubernetes.dataset();
        let resources = document.list(&dataset, "", 0).await?;
        report.total_items += resources.len() as u64;

        let mut succeeded = 0u64;
        let mut failed = 0u64;
        for mut resource in resources {
            if cancel.is_cancelled() {
                return Err(cancelled(&report));
            }
            ensure_environment(&mut resource);
            match grid.create(&resource).await {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    warn!(msg = "bulk sync write failed", dataset, operation = "create", %e);
                    failed += 1;
                }
            }
            report.processed_items += 1;
        }
        report.failed_items += failed;
        report.completed_resources += 1;
        info!(msg = "dataset synchronized", dataset, succeeded, failed);
    }

    if report.failed_items > 0 {
        return Err(Error::SyncFailed {
            failed: report.failed_items,
            total: report.total_items,
        });
    }
    info!(
        msg = "bulk store synchronization complete",
        completed_resources = report.completed_resources,
        processed_items = report.processed_items,
        total_items = report.total_items,
    );
    Ok(report)
}

fn cancelled(report: &SyncReport) -> Error {
    warn!(
        msg = "bulk store synchronization cancelled",
        completed_resources = report.completed_resources,
        processed_items = report.processed_items,
        total_items = report.total_items,
    );
    Error::SyncCancelled
}
