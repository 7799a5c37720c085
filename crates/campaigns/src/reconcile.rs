//! Delivery-status callbacks.
//!
//! Status only moves forward along `pending < sent < delivered < read`;
//! `failed` is terminal and only reachable before delivery. Every update is a
//! compare-and-set in the store, so callbacks for the same message can race
//! without locks.
//!
//! A report can beat the sender to the store: the provider may call back
//! before the dispatcher has recorded the provider id. Such reports are held
//! and replayed by the sender once its row exists.

use std::{collections::HashMap, sync::Arc};

use {
    parley_common::{Result, now_ms},
    parley_store::{CampaignStatus, DeliveryStatus, EarlyStatusReport, RunStatus, Store},
    tracing::{debug, error, info, warn},
};

use crate::analytics::refresh_analytics;

/// A provider delivery report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCallback {
    pub provider_message_id: String,
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl StatusCallback {
    /// Parse Twilio's status callback fields.
    pub fn from_form(form: &HashMap<String, String>) -> Option<Self> {
        let field = |name: &str| {
            form.get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Some(Self {
            provider_message_id: field("MessageSid").or_else(|| field("SmsSid"))?,
            status: field("MessageStatus").or_else(|| field("SmsStatus"))?,
            error_code: field("ErrorCode"),
            error_message: field("ErrorMessage"),
        })
    }

    fn error_text(&self) -> Option<String> {
        match (&self.error_code, &self.error_message) {
            (Some(code), Some(msg)) => Some(format!("[{code}] {msg}")),
            (Some(code), None) => Some(format!("provider error {code}")),
            (None, Some(msg)) => Some(msg.clone()),
            (None, None) => None,
        }
    }
}

/// Map a provider status onto our delivery status. Unknown values map to `None`.
pub fn map_provider_status(status: &str) -> Option<DeliveryStatus> {
    match status.to_ascii_lowercase().as_str() {
        "queued" | "accepted" | "sending" | "sent" => Some(DeliveryStatus::Sent),
        "delivered" => Some(DeliveryStatus::Delivered),
        "read" => Some(DeliveryStatus::Read),
        "failed" | "undelivered" => Some(DeliveryStatus::Failed),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied {
        status: DeliveryStatus,
        campaign_id: Option<String>,
        message_updated: bool,
    },
    /// Known status, but it would regress or overwrite a terminal state.
    Stale,
    /// No row carries the id yet; the report waits for the sender.
    Held,
    UnknownStatus,
}

/// Mark a running campaign completed once nothing is left in flight.
///
/// With `await_delivery` set, rows still `sent` keep the campaign running
/// until their delivery report arrives.
pub async fn maybe_complete(
    store: &dyn Store,
    campaign_id: &str,
    await_delivery: bool,
    now: i64,
) -> Result<bool> {
    let Some(campaign) = store.get_campaign(campaign_id).await? else {
        return Ok(false);
    };
    if campaign.status != CampaignStatus::Running {
        return Ok(false);
    }
    if let Some(run) = store.latest_run(campaign_id).await?
        && run.status == RunStatus::Running
    {
        return Ok(false);
    }
    let counts = store.campaign_status_counts(campaign_id).await?;
    if counts.pending > 0 || (await_delivery && counts.sent > 0) {
        return Ok(false);
    }

    let done = store
        .transition_campaign(
            campaign_id,
            &[CampaignStatus::Running],
            CampaignStatus::Completed,
            None,
            now,
        )
        .await?;
    if done {
        info!(campaign_id, "campaign completed");
    }
    Ok(done)
}

pub struct Reconciler {
    store: Arc<dyn Store>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Apply a callback, never failing. Errors are logged.
    pub async fn handle(&self, callback: StatusCallback) {
        let id = callback.provider_message_id.clone();
        match self.apply(callback, now_ms()).await {
            Ok(ReconcileOutcome::Applied {
                status,
                campaign_id,
                message_updated,
            }) => {
                debug!(
                    provider_message_id = %id,
                    %status,
                    campaign_id = ?campaign_id,
                    message_updated,
                    "delivery status applied"
                );
            },
            Ok(ReconcileOutcome::Stale) => {
                debug!(provider_message_id = %id, "stale delivery status ignored");
            },
            Ok(ReconcileOutcome::Held) => {
                debug!(provider_message_id = %id, "delivery status held for unknown id");
            },
            Ok(ReconcileOutcome::UnknownStatus) => {
                warn!(provider_message_id = %id, "unrecognised delivery status ignored");
            },
            Err(e) => {
                error!(
                    provider_message_id = %id,
                    error = %e,
                    "delivery status processing failed"
                );
            },
        }
    }

    pub async fn apply(&self, callback: StatusCallback, now: i64) -> Result<ReconcileOutcome> {
        let Some(to) = map_provider_status(&callback.status) else {
            return Ok(ReconcileOutcome::UnknownStatus);
        };
        let error = (to == DeliveryStatus::Failed)
            .then(|| callback.error_text())
            .flatten();
        let id = callback.provider_message_id.as_str();

        let outcome = self.advance(id, to, error.as_deref(), now).await?;
        if outcome != ReconcileOutcome::Stale {
            return Ok(outcome);
        }
        // Either a regression, or the sender recorded the id after our miss.
        if self.store.provider_id_known(id).await? {
            return self.advance(id, to, error.as_deref(), now).await;
        }

        self.store
            .hold_status_report(&EarlyStatusReport {
                provider_message_id: id.to_string(),
                status: to,
                error,
                received_at: now,
            })
            .await?;
        // The sender may have taken held reports between the check and the hold.
        if self.store.provider_id_known(id).await? {
            self.replay_held(id, now).await?;
        }
        Ok(ReconcileOutcome::Held)
    }

    /// Apply reports held for `provider_message_id` before its row existed.
    /// Returns how many of them moved a row.
    pub async fn replay_held(&self, provider_message_id: &str, now: i64) -> Result<usize> {
        let mut applied = 0;
        for report in self.store.take_status_reports(provider_message_id).await? {
            let outcome = self
                .advance(
                    &report.provider_message_id,
                    report.status,
                    report.error.as_deref(),
                    now,
                )
                .await?;
            if matches!(outcome, ReconcileOutcome::Applied { .. }) {
                applied += 1;
            }
        }
        if applied > 0 {
            debug!(provider_message_id, applied, "held delivery statuses replayed");
        }
        Ok(applied)
    }

    async fn advance(
        &self,
        id: &str,
        to: DeliveryStatus,
        error: Option<&str>,
        now: i64,
    ) -> Result<ReconcileOutcome> {
        let from = to.predecessors();
        let message_updated = self
            .store
            .advance_message_status(id, to, from, error, now)
            .await?;
        let row = self
            .store
            .advance_campaign_message(id, to, from, error, now)
            .await?;

        let campaign_id = match row {
            Some(row) => {
                refresh_analytics(self.store.as_ref(), &row.campaign_id, now).await?;
                maybe_complete(self.store.as_ref(), &row.campaign_id, true, now).await?;
                Some(row.campaign_id)
            },
            None => None,
        };

        if campaign_id.is_none() && !message_updated {
            return Ok(ReconcileOutcome::Stale);
        }
        Ok(ReconcileOutcome::Applied {
            status: to,
            campaign_id,
            message_updated,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::test_support::{Fixture, callback, fixture},
        parley_conversations::window::new_inbound_conversation,
        parley_store::{CampaignMessage, Direction, Message, MessageType},
        parley_transport::DryRunTransport,
        rstest::rstest,
    };

    const PHONES: [&str; 2] = ["+14155550101", "+14155550102"];

    /// A dispatched campaign whose rows all sit at `sent`, awaiting reports.
    async fn dispatched() -> (Fixture, String, Vec<CampaignMessage>) {
        let fx = fixture(DryRunTransport::new().with_callbacks(), &PHONES).await;
        let campaign = fx.campaign(CampaignStatus::Running).await;
        fx.dispatcher.run(&campaign.id).await.unwrap();
        let rows = fx.store.campaign_messages(&campaign.id).await.unwrap();
        (fx, campaign.id, rows)
    }

    fn provider_id(row: &CampaignMessage) -> String {
        row.provider_message_id.clone().unwrap()
    }

    async fn row_by_provider_id(fx: &Fixture, campaign_id: &str, id: &str) -> CampaignMessage {
        fx.store
            .campaign_messages(campaign_id)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.provider_message_id.as_deref() == Some(id))
            .unwrap()
    }

    #[rstest]
    #[case("queued", Some(DeliveryStatus::Sent))]
    #[case("accepted", Some(DeliveryStatus::Sent))]
    #[case("sending", Some(DeliveryStatus::Sent))]
    #[case("sent", Some(DeliveryStatus::Sent))]
    #[case("delivered", Some(DeliveryStatus::Delivered))]
    #[case("READ", Some(DeliveryStatus::Read))]
    #[case("failed", Some(DeliveryStatus::Failed))]
    #[case("undelivered", Some(DeliveryStatus::Failed))]
    #[case("receiving", None)]
    fn maps_provider_statuses(#[case] raw: &str, #[case] expected: Option<DeliveryStatus>) {
        assert_eq!(map_provider_status(raw), expected);
    }

    #[rstest]
    #[case(DeliveryStatus::Sent, DeliveryStatus::Delivered, false)]
    #[case(DeliveryStatus::Sent, DeliveryStatus::Read, false)]
    #[case(DeliveryStatus::Delivered, DeliveryStatus::Read, false)]
    #[case(DeliveryStatus::Delivered, DeliveryStatus::Sent, true)]
    #[case(DeliveryStatus::Read, DeliveryStatus::Delivered, true)]
    #[case(DeliveryStatus::Failed, DeliveryStatus::Delivered, false)]
    #[case(DeliveryStatus::Failed, DeliveryStatus::Read, false)]
    #[case(DeliveryStatus::Sent, DeliveryStatus::Failed, false)]
    #[case(DeliveryStatus::Delivered, DeliveryStatus::Failed, false)]
    fn predecessor_table_is_monotonic(
        #[case] to: DeliveryStatus,
        #[case] current: DeliveryStatus,
        #[case] applies: bool,
    ) {
        assert_eq!(to.predecessors().contains(&current), applies);
    }

    #[test]
    fn parses_status_form() {
        let form: HashMap<String, String> = [
            ("MessageSid", "SM1"),
            ("MessageStatus", "undelivered"),
            ("ErrorCode", "30008"),
            ("ErrorMessage", "Unknown error"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let cb = StatusCallback::from_form(&form).unwrap();
        assert_eq!(cb.provider_message_id, "SM1");
        assert_eq!(cb.error_text().as_deref(), Some("[30008] Unknown error"));
        assert!(StatusCallback::from_form(&HashMap::new()).is_none());
    }

    #[tokio::test]
    async fn late_sent_after_delivery_is_stale() {
        let (fx, campaign_id, rows) = dispatched().await;
        let reconciler = Reconciler::new(fx.store.clone());

        for (row, reached) in rows.iter().zip(["delivered", "read"]) {
            let id = provider_id(row);
            let applied = reconciler.apply(callback(&id, reached), now_ms()).await.unwrap();
            assert!(matches!(applied, ReconcileOutcome::Applied { .. }));
            let before = row_by_provider_id(&fx, &campaign_id, &id).await;

            let late = reconciler.apply(callback(&id, "sent"), now_ms()).await.unwrap();
            assert_eq!(late, ReconcileOutcome::Stale);
            assert_eq!(row_by_provider_id(&fx, &campaign_id, &id).await, before);
        }
    }

    #[tokio::test]
    async fn undelivered_after_read_changes_nothing() {
        let (fx, campaign_id, rows) = dispatched().await;
        let reconciler = Reconciler::new(fx.store.clone());
        let id = provider_id(&rows[0]);

        reconciler.apply(callback(&id, "read"), now_ms()).await.unwrap();
        let failed = StatusCallback {
            error_code: Some("30008".into()),
            error_message: Some("Unknown error".into()),
            ..callback(&id, "undelivered")
        };
        assert_eq!(
            reconciler.apply(failed, now_ms()).await.unwrap(),
            ReconcileOutcome::Stale
        );

        let row = row_by_provider_id(&fx, &campaign_id, &id).await;
        assert_eq!(row.status, DeliveryStatus::Read);
        assert_eq!(row.error, None);
        assert_eq!(row.failed_at, None);
    }

    #[tokio::test]
    async fn undelivered_records_provider_error() {
        let (fx, campaign_id, rows) = dispatched().await;
        let reconciler = Reconciler::new(fx.store.clone());
        let id = provider_id(&rows[0]);

        let failed = StatusCallback {
            error_code: Some("30008".into()),
            error_message: Some("Unknown error".into()),
            ..callback(&id, "undelivered")
        };
        let outcome = reconciler.apply(failed, now_ms()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied {
            status: DeliveryStatus::Failed,
            campaign_id: Some(campaign_id.clone()),
            message_updated: true,
        });

        let row = row_by_provider_id(&fx, &campaign_id, &id).await;
        assert_eq!(row.status, DeliveryStatus::Failed);
        assert_eq!(row.error.as_deref(), Some("[30008] Unknown error"));
        assert!(row.failed_at.is_some());
        let analytics = fx.store.get_analytics(&campaign_id).await.unwrap().unwrap();
        assert_eq!(analytics.failed, 1);
    }

    #[tokio::test]
    async fn direct_reply_status_updates_message_only() {
        let fx = fixture(DryRunTransport::new(), &PHONES[..1]).await;
        let now = now_ms();
        let conversation = new_inbound_conversation(&fx.contacts[0].id, now);
        fx.store.insert_conversation(&conversation).await.unwrap();
        fx.store
            .insert_message(&Message {
                id: "m1".into(),
                conversation_id: conversation.id.clone(),
                direction: Direction::Outbound,
                message_type: MessageType::Text,
                content: "on our way".into(),
                media_url: None,
                media_content_type: None,
                provider_message_id: Some("SMdirect".into()),
                delivery_status: Some(DeliveryStatus::Sent),
                sender: Some("agent-1".into()),
                error: None,
                created_at: now,
                delivered_at: None,
                read_at: None,
            })
            .await
            .unwrap();

        let outcome = Reconciler::new(fx.store.clone())
            .apply(callback("SMdirect", "delivered"), now + 1)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied {
            status: DeliveryStatus::Delivered,
            campaign_id: None,
            message_updated: true,
        });
        let message = fx.store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(message.delivery_status, Some(DeliveryStatus::Delivered));
        assert_eq!(message.delivered_at, Some(now + 1));
    }

    #[tokio::test]
    async fn unknown_id_is_held_until_replayed() {
        let fx = fixture(DryRunTransport::new(), &PHONES[..1]).await;
        let reconciler = Reconciler::new(fx.store.clone());

        let outcome = reconciler.apply(callback("SMlater", "read"), now_ms()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Held);
        assert_eq!(
            reconciler.apply(callback("SMlater", "bogus"), now_ms()).await.unwrap(),
            ReconcileOutcome::UnknownStatus
        );
        // Nothing to apply to yet: the report is consumed without effect.
        assert_eq!(reconciler.replay_held("SMlater", now_ms()).await.unwrap(), 0);

        reconciler.apply(callback("SMlater", "read"), now_ms()).await.unwrap();
        let now = now_ms();
        let conversation = new_inbound_conversation(&fx.contacts[0].id, now);
        fx.store.insert_conversation(&conversation).await.unwrap();
        fx.store
            .insert_message(&Message {
                id: "m2".into(),
                conversation_id: conversation.id.clone(),
                direction: Direction::Outbound,
                message_type: MessageType::Text,
                content: "hello".into(),
                media_url: None,
                media_content_type: None,
                provider_message_id: Some("SMlater".into()),
                delivery_status: Some(DeliveryStatus::Sent),
                sender: None,
                error: None,
                created_at: now,
                delivered_at: None,
                read_at: None,
            })
            .await
            .unwrap();

        assert_eq!(reconciler.replay_held("SMlater", now_ms()).await.unwrap(), 1);
        let message = fx.store.get_message("m2").await.unwrap().unwrap();
        assert_eq!(message.delivery_status, Some(DeliveryStatus::Read));
    }
}
