//! Starting scheduled campaigns and picking up runs cut short by a restart.

use std::{collections::HashSet, sync::Arc, time::Duration};

use {
    parley_common::{HOUR_MS, Result, now_ms, periodic::PeriodicTask},
    parley_store::{CampaignStatus, RunStatus, Store},
    tracing::{debug, error, info, warn},
};

use crate::{analytics::refresh_analytics, dispatch::Dispatcher};

pub const INTERRUPTED: &str = "interrupted before the send completed";

/// Held delivery reports older than this belong to sends parley never made.
pub const HELD_REPORT_TTL_MS: i64 = HOUR_MS;

/// Move due scheduled campaigns to `running` and dispatch them.
///
/// The move is a compare-and-set, so concurrent schedulers never dispatch the
/// same campaign twice.
pub async fn dispatch_due(
    store: &dyn Store,
    dispatcher: &Arc<Dispatcher>,
    now: i64,
) -> Result<usize> {
    let mut started = 0;
    for campaign in store.due_campaigns(now).await? {
        let claimed = store
            .transition_campaign(
                &campaign.id,
                &[CampaignStatus::Scheduled],
                CampaignStatus::Running,
                None,
                now,
            )
            .await?;
        if claimed {
            info!(campaign_id = %campaign.id, "scheduled campaign started");
            dispatcher.spawn(campaign.id);
            started += 1;
        }
    }
    Ok(started)
}

/// Close out dispatch runs left `running` by a previous process and resume
/// their campaigns.
///
/// Rows still `pending` may or may not have reached the provider; they are
/// failed rather than resent.
pub async fn recover_interrupted(
    store: &dyn Store,
    dispatcher: &Arc<Dispatcher>,
    now: i64,
) -> Result<usize> {
    let mut campaigns = HashSet::new();
    for mut run in store.runs_with_status(RunStatus::Running).await? {
        run.status = RunStatus::Failed;
        run.error = Some("interrupted by restart".into());
        run.updated_at = now;
        run.finished_at = Some(now);
        store.update_run(&run).await?;

        let failed = store
            .fail_pending_campaign_messages(&run.campaign_id, INTERRUPTED, now)
            .await?;
        if failed > 0 {
            warn!(campaign_id = %run.campaign_id, failed, "failed interrupted recipients");
        }
        campaigns.insert(run.campaign_id);
    }

    let mut resumed = 0;
    for campaign_id in campaigns {
        refresh_analytics(store, &campaign_id, now).await?;
        let running = store
            .get_campaign(&campaign_id)
            .await?
            .is_some_and(|c| c.status == CampaignStatus::Running);
        if running {
            info!(campaign_id = %campaign_id, "resuming interrupted campaign");
            dispatcher.spawn(campaign_id);
            resumed += 1;
        }
    }
    Ok(resumed)
}

/// Drop held delivery reports whose provider id never showed up.
pub async fn prune_held_reports(store: &dyn Store, now: i64) -> Result<u64> {
    let pruned = store.prune_status_reports(now - HELD_REPORT_TTL_MS).await?;
    if pruned > 0 {
        debug!(pruned, "dropped unclaimed delivery statuses");
    }
    Ok(pruned)
}

/// Background task running [`dispatch_due`] and [`prune_held_reports`] on an
/// interval.
pub struct CampaignScheduler {
    task: PeriodicTask,
}

impl CampaignScheduler {
    pub fn start(store: Arc<dyn Store>, dispatcher: Arc<Dispatcher>, every: Duration) -> Self {
        let task = PeriodicTask::spawn("campaign-scheduler", every, move || {
            let store = Arc::clone(&store);
            let dispatcher = Arc::clone(&dispatcher);
            async move {
                let now = now_ms();
                if let Err(e) = dispatch_due(store.as_ref(), &dispatcher, now).await {
                    error!(error = %e, "campaign scheduler tick failed");
                }
                if let Err(e) = prune_held_reports(store.as_ref(), now).await {
                    warn!(error = %e, "could not prune held delivery statuses");
                }
            }
        });
        Self { task }
    }

    pub async fn stop(self) {
        self.task.stop().await;
    }
}
