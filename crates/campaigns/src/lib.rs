//! Template campaigns: audience resolution, batched dispatch, delivery
//! reconciliation and analytics.

pub mod analytics;
pub mod audience;
pub mod dispatch;
pub mod reconcile;
pub mod scheduler;
pub mod service;
pub mod variables;

#[cfg(test)]
mod test_support;

pub use {
    analytics::{compute_analytics, refresh_analytics},
    dispatch::{DispatchSettings, Dispatcher},
    reconcile::{ReconcileOutcome, Reconciler, StatusCallback, map_provider_status},
    scheduler::{CampaignScheduler, dispatch_due, prune_held_reports, recover_interrupted},
    service::{CampaignService, CampaignView, CreateCampaign},
};
