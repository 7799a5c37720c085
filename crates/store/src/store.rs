use async_trait::async_trait;

use crate::{
    error::Result,
    types::{
        Audience, Campaign, CampaignAnalytics, CampaignMessage, CampaignStatus, Contact,
        Conversation, DeliveryStatus, DispatchRun, EarlyStatusReport, Message, RunStatus,
        Segment, StatusCounts, Template,
    },
};

/// Persistence boundary for conversations, campaigns and their tracking rows.
///
/// Every multi-writer mutation is expressed as a single conditional statement
/// (`INSERT .. ON CONFLICT`, `UPDATE .. WHERE status IN (..)`) so concurrent
/// webhook handlers, sweeps and dispatchers never need in-process locks.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Contacts and targeting ──────────────────────────────────────────────

    /// Insert a contact; fails with a unique violation on a duplicate phone.
    async fn insert_contact(&self, contact: &Contact) -> Result<()>;

    /// Return the contact for `phone`, creating it when absent.
    ///
    /// Safe under concurrent callers: the insert is skipped on conflict and
    /// the winning row is re-read.
    async fn find_or_create_contact(
        &self,
        phone: &str,
        name: Option<&str>,
        now: i64,
    ) -> Result<Contact>;

    async fn get_contact(&self, id: &str) -> Result<Option<Contact>>;

    /// Set the display name only if none is stored yet.
    async fn fill_contact_name(&self, id: &str, name: &str, now: i64) -> Result<bool>;

    async fn insert_segment(&self, segment: &Segment) -> Result<()>;

    async fn add_to_segment(&self, contact_id: &str, segment_id: &str) -> Result<()>;

    /// Distinct contacts belonging to any of `segment_ids`.
    async fn contacts_in_segments(&self, segment_ids: &[String]) -> Result<Vec<Contact>>;

    async fn insert_audience(&self, audience: &Audience) -> Result<()>;

    async fn get_audience(&self, id: &str) -> Result<Option<Audience>>;

    async fn insert_template(&self, template: &Template) -> Result<()>;

    async fn get_template(&self, id: &str) -> Result<Option<Template>>;

    // ── Conversations ───────────────────────────────────────────────────────

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<()>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Most recently created conversation for a contact.
    async fn latest_conversation_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Option<Conversation>>;

    /// Persist the window fields, status and visibility of `conversation`.
    async fn save_window_state(&self, conversation: &Conversation) -> Result<()>;

    /// Record an outbound message: bump `last_message_at` and force `open`.
    async fn touch_outbound(&self, conversation_id: &str, now: i64) -> Result<()>;

    /// Close every non-closed conversation whose window expired before `now`.
    async fn close_expired_conversations(&self, now: i64) -> Result<u64>;

    // ── Messages ────────────────────────────────────────────────────────────

    /// Insert a message. Returns `false` when a message with the same provider
    /// id already exists.
    async fn insert_message(&self, message: &Message) -> Result<bool>;

    async fn get_message(&self, id: &str) -> Result<Option<Message>>;

    async fn message_by_provider_id(&self, provider_message_id: &str)
    -> Result<Option<Message>>;

    /// Newest `limit` messages of a conversation, oldest first.
    async fn list_messages(&self, conversation_id: &str, limit: i64) -> Result<Vec<Message>>;

    /// Compare-and-set the delivery status of the message with this provider
    /// id. Applies only if the current status is one of `from`.
    async fn advance_message_status(
        &self,
        provider_message_id: &str,
        to: DeliveryStatus,
        from: &[DeliveryStatus],
        error: Option<&str>,
        now: i64,
    ) -> Result<bool>;

    // ── Campaigns ───────────────────────────────────────────────────────────

    async fn insert_campaign(&self, campaign: &Campaign) -> Result<()>;

    async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>>;

    /// Compare-and-set the campaign status. `error` replaces the stored error
    /// when given.
    async fn transition_campaign(
        &self,
        id: &str,
        from: &[CampaignStatus],
        to: CampaignStatus,
        error: Option<&str>,
        now: i64,
    ) -> Result<bool>;

    /// Scheduled campaigns whose start time has passed.
    async fn due_campaigns(&self, now: i64) -> Result<Vec<Campaign>>;

    // ── Campaign messages ───────────────────────────────────────────────────

    /// Insert a tracking row. Returns `false` when the contact already has a
    /// row for this campaign.
    async fn insert_campaign_message(&self, row: &CampaignMessage) -> Result<bool>;

    /// `pending -> sent` with the provider id returned by the transport.
    ///
    /// The conversation transcript entry, when given, is written in the same
    /// transaction, so the provider id becomes known in both tables at once.
    async fn mark_campaign_message_sent(
        &self,
        id: &str,
        provider_message_id: &str,
        transcript: Option<&Message>,
        now: i64,
    ) -> Result<bool>;

    /// `pending -> failed` with the transport error.
    async fn mark_campaign_message_failed(&self, id: &str, error: &str, now: i64)
    -> Result<bool>;

    /// Compare-and-set by provider id; returns the updated row when applied.
    async fn advance_campaign_message(
        &self,
        provider_message_id: &str,
        to: DeliveryStatus,
        from: &[DeliveryStatus],
        error: Option<&str>,
        now: i64,
    ) -> Result<Option<CampaignMessage>>;

    async fn campaign_messages(&self, campaign_id: &str) -> Result<Vec<CampaignMessage>>;

    /// Contact ids that already hold a tracking row for this campaign.
    async fn campaign_contact_ids(&self, campaign_id: &str) -> Result<Vec<String>>;

    async fn campaign_status_counts(&self, campaign_id: &str) -> Result<StatusCounts>;

    /// Fail every row still `pending`, e.g. after a crash mid-send.
    async fn fail_pending_campaign_messages(
        &self,
        campaign_id: &str,
        error: &str,
        now: i64,
    ) -> Result<u64>;

    /// Aggregate the tracking rows and persist the projection in one
    /// statement, so concurrent callers never write a stale snapshot.
    ///
    /// `sent` counts every row that left `pending`; `delivered` includes rows
    /// that were later read. Rates are percentages rounded to two decimals.
    async fn recompute_analytics(&self, campaign_id: &str, now: i64)
    -> Result<CampaignAnalytics>;

    async fn get_analytics(&self, campaign_id: &str) -> Result<Option<CampaignAnalytics>>;

    // ── Early status reports ────────────────────────────────────────────────

    /// Whether any message or campaign row carries this provider id.
    async fn provider_id_known(&self, provider_message_id: &str) -> Result<bool>;

    /// Keep a report for an id nobody has recorded yet. Repeats of the same
    /// status are ignored.
    async fn hold_status_report(&self, report: &EarlyStatusReport) -> Result<()>;

    /// Remove and return the reports held for this id, oldest first.
    async fn take_status_reports(
        &self,
        provider_message_id: &str,
    ) -> Result<Vec<EarlyStatusReport>>;

    /// Drop reports received before `before`; their ids never showed up.
    async fn prune_status_reports(&self, before: i64) -> Result<u64>;

    // ── Dispatch runs ───────────────────────────────────────────────────────

    async fn insert_run(&self, run: &DispatchRun) -> Result<()>;

    async fn update_run(&self, run: &DispatchRun) -> Result<()>;

    async fn latest_run(&self, campaign_id: &str) -> Result<Option<DispatchRun>>;

    async fn runs_with_status(&self, status: RunStatus) -> Result<Vec<DispatchRun>>;
}
