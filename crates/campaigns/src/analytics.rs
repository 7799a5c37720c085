//! Campaign analytics: a pure projection of the tracking rows.

use {
    parley_common::Result,
    parley_store::{CampaignAnalytics, StatusCounts, Store},
};

/// Derive analytics from raw per-status row counts.
///
/// `sent` counts every row that left `pending`; `delivered` includes rows that
/// were later read. Rates are percentages rounded to two decimals, and zero
/// when the divisor is zero. [`Store::recompute_analytics`] evaluates the same
/// projection inside the database.
pub fn compute_analytics(campaign_id: &str, counts: StatusCounts, now: i64) -> CampaignAnalytics {
    let delivered = counts.delivered + counts.read;
    let sent = counts.sent + delivered + counts.failed;
    CampaignAnalytics {
        campaign_id: campaign_id.to_string(),
        total: counts.total(),
        pending: counts.pending,
        sent,
        delivered,
        read: counts.read,
        failed: counts.failed,
        delivery_rate: percent(delivered, sent),
        read_rate: percent(counts.read, delivered),
        updated_at: now,
    }
}

fn percent(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 * 10_000.0 / whole as f64).round() / 100.0
}

/// Recompute from the tracking rows and persist, atomically.
///
/// Aggregation and write happen in one statement, so concurrent callers
/// cannot persist a snapshot older than the rows they raced with.
pub async fn refresh_analytics(
    store: &dyn Store,
    campaign_id: &str,
    now: i64,
) -> Result<CampaignAnalytics> {
    Ok(store.recompute_analytics(campaign_id, now).await?)
}
