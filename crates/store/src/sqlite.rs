//! SQLite-backed [`Store`] using sqlx.

use std::{collections::BTreeMap, str::FromStr, time::Duration};

use {
    async_trait::async_trait,
    sqlx::{
        SqliteExecutor, SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    },
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    store::Store,
    types::{
        Audience, Campaign, CampaignAnalytics, CampaignMessage, CampaignStatus, Contact,
        Conversation, DeliveryStatus, DispatchRun, EarlyStatusReport, Message, RunStatus,
        Segment, StatusCounts, Template, new_id,
    },
};

// ── Row types ───────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ContactRow {
    id: String,
    phone: String,
    name: Option<String>,
    email: Option<String>,
    profile: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ContactRow> for Contact {
    type Error = Error;

    fn try_from(r: ContactRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            phone: r.phone,
            name: r.name,
            email: r.email,
            profile: serde_json::from_str(&r.profile)?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AudienceRow {
    id: String,
    name: String,
    segment_ids: String,
    created_at: i64,
}

impl TryFrom<AudienceRow> for Audience {
    type Error = Error;

    fn try_from(r: AudienceRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            name: r.name,
            segment_ids: serde_json::from_str(&r.segment_ids)?,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: String,
    name: String,
    content_sid: String,
    body: String,
    status: String,
    created_at: i64,
}

impl TryFrom<TemplateRow> for Template {
    type Error = Error;

    fn try_from(r: TemplateRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            name: r.name,
            content_sid: r.content_sid,
            body: r.body,
            status: r.status.parse()?,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    contact_id: String,
    status: String,
    visibility: String,
    last_message_at: Option<i64>,
    last_customer_message_at: Option<i64>,
    window_expires_at: Option<i64>,
    created_by_campaign: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = Error;

    fn try_from(r: ConversationRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            contact_id: r.contact_id,
            status: r.status.parse()?,
            visibility: r.visibility.parse()?,
            last_message_at: r.last_message_at,
            last_customer_message_at: r.last_customer_message_at,
            window_expires_at: r.window_expires_at,
            created_by_campaign: r.created_by_campaign,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    direction: String,
    message_type: String,
    content: String,
    media_url: Option<String>,
    media_content_type: Option<String>,
    provider_message_id: Option<String>,
    delivery_status: Option<String>,
    sender: Option<String>,
    error: Option<String>,
    created_at: i64,
    delivered_at: Option<i64>,
    read_at: Option<i64>,
}

impl TryFrom<MessageRow> for Message {
    type Error = Error;

    fn try_from(r: MessageRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            conversation_id: r.conversation_id,
            direction: r.direction.parse()?,
            message_type: r.message_type.parse()?,
            content: r.content,
            media_url: r.media_url,
            media_content_type: r.media_content_type,
            provider_message_id: r.provider_message_id,
            delivery_status: r
                .delivery_status
                .as_deref()
                .map(DeliveryStatus::from_str)
                .transpose()?,
            sender: r.sender,
            error: r.error,
            created_at: r.created_at,
            delivered_at: r.delivered_at,
            read_at: r.read_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CampaignRow {
    id: String,
    name: String,
    template_id: String,
    audience_id: String,
    segment_ids: String,
    schedule_type: String,
    scheduled_at: Option<i64>,
    status: String,
    variable_source: String,
    template_variables: String,
    error: Option<String>,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = Error;

    fn try_from(r: CampaignRow) -> Result<Self> {
        let template_variables: BTreeMap<String, String> =
            serde_json::from_str(&r.template_variables)?;
        Ok(Self {
            id: r.id,
            name: r.name,
            template_id: r.template_id,
            audience_id: r.audience_id,
            segment_ids: serde_json::from_str(&r.segment_ids)?,
            schedule_type: r.schedule_type.parse()?,
            scheduled_at: r.scheduled_at,
            status: r.status.parse()?,
            variable_source: r.variable_source.parse()?,
            template_variables,
            error: r.error,
            created_at: r.created_at,
            updated_at: r.updated_at,
            completed_at: r.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CampaignMessageRow {
    id: String,
    campaign_id: String,
    contact_id: String,
    conversation_id: Option<String>,
    phone: String,
    status: String,
    provider_message_id: Option<String>,
    error: Option<String>,
    created_at: i64,
    sent_at: Option<i64>,
    delivered_at: Option<i64>,
    read_at: Option<i64>,
    failed_at: Option<i64>,
    updated_at: i64,
}

impl TryFrom<CampaignMessageRow> for CampaignMessage {
    type Error = Error;

    fn try_from(r: CampaignMessageRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            campaign_id: r.campaign_id,
            contact_id: r.contact_id,
            conversation_id: r.conversation_id,
            phone: r.phone,
            status: r.status.parse()?,
            provider_message_id: r.provider_message_id,
            error: r.error,
            created_at: r.created_at,
            sent_at: r.sent_at,
            delivered_at: r.delivered_at,
            read_at: r.read_at,
            failed_at: r.failed_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AnalyticsRow {
    campaign_id: String,
    total: i64,
    pending: i64,
    sent: i64,
    delivered: i64,
    read: i64,
    failed: i64,
    delivery_rate: f64,
    read_rate: f64,
    updated_at: i64,
}

impl From<AnalyticsRow> for CampaignAnalytics {
    fn from(r: AnalyticsRow) -> Self {
        Self {
            campaign_id: r.campaign_id,
            total: r.total,
            pending: r.pending,
            sent: r.sent,
            delivered: r.delivered,
            read: r.read,
            failed: r.failed,
            delivery_rate: r.delivery_rate,
            read_rate: r.read_rate,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EarlyReportRow {
    provider_message_id: String,
    status: String,
    error: Option<String>,
    received_at: i64,
}

impl TryFrom<EarlyReportRow> for EarlyStatusReport {
    type Error = Error;

    fn try_from(r: EarlyReportRow) -> Result<Self> {
        Ok(Self {
            provider_message_id: r.provider_message_id,
            status: r.status.parse()?,
            error: r.error,
            received_at: r.received_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    campaign_id: String,
    status: String,
    total: i64,
    attempted: i64,
    sent: i64,
    failed: i64,
    error: Option<String>,
    started_at: i64,
    updated_at: i64,
    finished_at: Option<i64>,
}

impl TryFrom<RunRow> for DispatchRun {
    type Error = Error;

    fn try_from(r: RunRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            campaign_id: r.campaign_id,
            status: r.status.parse()?,
            total: r.total,
            attempted: r.attempted,
            sent: r.sent,
            failed: r.failed,
            error: r.error,
            started_at: r.started_at,
            updated_at: r.updated_at,
            finished_at: r.finished_at,
        })
    }
}

/// `?, ?, ?` for an `IN (..)` list of `n` values.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// ── Store ───────────────────────────────────────────────────────────────────

/// SQLite-backed persistence for all parley records.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `url` and run migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        crate::run_migrations(&pool).await?;
        debug!(url, "sqlite store ready");
        Ok(Self { pool })
    }

    /// Private in-memory database on a single long-lived connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        crate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Use an existing pool; [`crate::run_migrations`] must already have run.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_contact(&self, contact: &Contact) -> Result<()> {
        sqlx::query(
            "INSERT INTO contacts (id, phone, name, email, profile, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&contact.id)
        .bind(&contact.phone)
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(serde_json::to_string(&contact.profile)?)
        .bind(contact.created_at)
        .bind(contact.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_or_create_contact(
        &self,
        phone: &str,
        name: Option<&str>,
        now: i64,
    ) -> Result<Contact> {
        let inserted = sqlx::query(
            "INSERT INTO contacts (id, phone, name, profile, created_at, updated_at)
             VALUES (?, ?, ?, '{}', ?, ?)
             ON CONFLICT(phone) DO NOTHING",
        )
        .bind(new_id())
        .bind(phone)
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if inserted == 1 {
            debug!(phone, "created contact");
        }

        let row = sqlx::query_as::<_, ContactRow>("SELECT * FROM contacts WHERE phone = ?")
            .bind(phone)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn get_contact(&self, id: &str) -> Result<Option<Contact>> {
        let row = sqlx::query_as::<_, ContactRow>("SELECT * FROM contacts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn fill_contact_name(&self, id: &str, name: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE contacts SET name = ?, updated_at = ?
             WHERE id = ? AND (name IS NULL OR name = '')",
        )
        .bind(name)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_segment(&self, segment: &Segment) -> Result<()> {
        sqlx::query("INSERT INTO segments (id, name, created_at) VALUES (?, ?, ?)")
            .bind(&segment.id)
            .bind(&segment.name)
            .bind(segment.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_to_segment(&self, contact_id: &str, segment_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO contact_segments (contact_id, segment_id) VALUES (?, ?)")
            .bind(contact_id)
            .bind(segment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn contacts_in_segments(&self, segment_ids: &[String]) -> Result<Vec<Contact>> {
        if segment_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT DISTINCT c.* FROM contacts c
             JOIN contact_segments cs ON cs.contact_id = c.id
             WHERE cs.segment_id IN ({})
             ORDER BY c.created_at, c.id",
            placeholders(segment_ids.len())
        );
        let mut query = sqlx::query_as::<_, ContactRow>(&sql);
        for id in segment_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_audience(&self, audience: &Audience) -> Result<()> {
        sqlx::query("INSERT INTO audiences (id, name, segment_ids, created_at) VALUES (?, ?, ?, ?)")
            .bind(&audience.id)
            .bind(&audience.name)
            .bind(serde_json::to_string(&audience.segment_ids)?)
            .bind(audience.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_audience(&self, id: &str) -> Result<Option<Audience>> {
        let row = sqlx::query_as::<_, AudienceRow>("SELECT * FROM audiences WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn insert_template(&self, template: &Template) -> Result<()> {
        sqlx::query(
            "INSERT INTO templates (id, name, content_sid, body, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&template.id)
        .bind(&template.name)
        .bind(&template.content_sid)
        .bind(&template.body)
        .bind(template.status.as_str())
        .bind(template.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_template(&self, id: &str) -> Result<Option<Template>> {
        let row = sqlx::query_as::<_, TemplateRow>("SELECT * FROM templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn insert_conversation(&self, c: &Conversation) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO conversations (
                   id, contact_id, status, visibility, last_message_at,
                   last_customer_message_at, window_expires_at, created_by_campaign,
                   created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&c.id)
        .bind(&c.contact_id)
        .bind(c.status.as_str())
        .bind(c.visibility.as_str())
        .bind(c.last_message_at)
        .bind(c.last_customer_message_at)
        .bind(c.window_expires_at)
        .bind(&c.created_by_campaign)
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn latest_conversation_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT * FROM conversations WHERE contact_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn save_window_state(&self, c: &Conversation) -> Result<()> {
        // `active` is sticky: a stale dormant value never overwrites it.
        sqlx::query(
            r#"UPDATE conversations SET
                   status = ?,
                   visibility = CASE WHEN visibility = 'active' THEN 'active' ELSE ? END,
                   last_message_at = ?,
                   last_customer_message_at = ?,
                   window_expires_at = ?,
                   updated_at = ?
               WHERE id = ?"#,
        )
        .bind(c.status.as_str())
        .bind(c.visibility.as_str())
        .bind(c.last_message_at)
        .bind(c.last_customer_message_at)
        .bind(c.window_expires_at)
        .bind(c.updated_at)
        .bind(&c.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_outbound(&self, conversation_id: &str, now: i64) -> Result<()> {
        sqlx::query(
            "UPDATE conversations
             SET last_message_at = MAX(COALESCE(last_message_at, 0), ?),
                 status = 'open',
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close_expired_conversations(&self, now: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE conversations SET status = 'closed', updated_at = ?
             WHERE window_expires_at IS NOT NULL AND window_expires_at < ? AND status != 'closed'",
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_message(&self, m: &Message) -> Result<bool> {
        insert_message_row(&self.pool, m).await
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn message_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>> {
        let row =
            sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE provider_message_id = ?")
                .bind(provider_message_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_messages(&self, conversation_id: &str, limit: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM (
                 SELECT *, rowid AS seq FROM messages WHERE conversation_id = ?
                 ORDER BY created_at DESC, rowid DESC LIMIT ?
             ) ORDER BY created_at ASC, seq ASC",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn advance_message_status(
        &self,
        provider_message_id: &str,
        to: DeliveryStatus,
        from: &[DeliveryStatus],
        error: Option<&str>,
        now: i64,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let delivered_at = matches!(to, DeliveryStatus::Delivered | DeliveryStatus::Read)
            .then_some(now);
        let read_at = (to == DeliveryStatus::Read).then_some(now);
        let sql = format!(
            "UPDATE messages SET
                 delivery_status = ?,
                 error = COALESCE(?, error),
                 delivered_at = COALESCE(delivered_at, ?),
                 read_at = COALESCE(read_at, ?)
             WHERE provider_message_id = ? AND delivery_status IN ({})",
            placeholders(from.len())
        );
        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(error)
            .bind(delivered_at)
            .bind(read_at)
            .bind(provider_message_id);
        for status in from {
            query = query.bind(status.as_str());
        }
        Ok(query.execute(&self.pool).await?.rows_affected() == 1)
    }

    async fn insert_campaign(&self, c: &Campaign) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO campaigns (
                   id, name, template_id, audience_id, segment_ids, schedule_type, scheduled_at,
                   status, variable_source, template_variables, error, created_at, updated_at,
                   completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&c.id)
        .bind(&c.name)
        .bind(&c.template_id)
        .bind(&c.audience_id)
        .bind(serde_json::to_string(&c.segment_ids)?)
        .bind(c.schedule_type.as_str())
        .bind(c.scheduled_at)
        .bind(c.status.as_str())
        .bind(c.variable_source.as_str())
        .bind(serde_json::to_string(&c.template_variables)?)
        .bind(&c.error)
        .bind(c.created_at)
        .bind(c.updated_at)
        .bind(c.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>> {
        let row = sqlx::query_as::<_, CampaignRow>("SELECT * FROM campaigns WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn transition_campaign(
        &self,
        id: &str,
        from: &[CampaignStatus],
        to: CampaignStatus,
        error: Option<&str>,
        now: i64,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let completed_at = (to == CampaignStatus::Completed).then_some(now);
        let sql = format!(
            "UPDATE campaigns SET
                 status = ?,
                 error = COALESCE(?, error),
                 completed_at = COALESCE(?, completed_at),
                 updated_at = ?
             WHERE id = ? AND status IN ({})",
            placeholders(from.len())
        );
        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(error)
            .bind(completed_at)
            .bind(now)
            .bind(id);
        for status in from {
            query = query.bind(status.as_str());
        }
        Ok(query.execute(&self.pool).await?.rows_affected() == 1)
    }

    async fn due_campaigns(&self, now: i64) -> Result<Vec<Campaign>> {
        let rows = sqlx::query_as::<_, CampaignRow>(
            "SELECT * FROM campaigns
             WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ?
             ORDER BY scheduled_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_campaign_message(&self, r: &CampaignMessage) -> Result<bool> {
        let result = sqlx::query(
            r#"INSERT INTO campaign_messages (
                   id, campaign_id, contact_id, conversation_id, phone, status,
                   provider_message_id, error, created_at, sent_at, delivered_at, read_at,
                   failed_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(campaign_id, contact_id) DO NOTHING"#,
        )
        .bind(&r.id)
        .bind(&r.campaign_id)
        .bind(&r.contact_id)
        .bind(&r.conversation_id)
        .bind(&r.phone)
        .bind(r.status.as_str())
        .bind(&r.provider_message_id)
        .bind(&r.error)
        .bind(r.created_at)
        .bind(r.sent_at)
        .bind(r.delivered_at)
        .bind(r.read_at)
        .bind(r.failed_at)
        .bind(r.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_campaign_message_sent(
        &self,
        id: &str,
        provider_message_id: &str,
        transcript: Option<&Message>,
        now: i64,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE campaign_messages
             SET status = 'sent', provider_message_id = ?, sent_at = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(provider_message_id)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }
        if let Some(message) = transcript {
            insert_message_row(&mut *tx, message).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn mark_campaign_message_failed(
        &self,
        id: &str,
        error: &str,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE campaign_messages
             SET status = 'failed', error = ?, failed_at = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn advance_campaign_message(
        &self,
        provider_message_id: &str,
        to: DeliveryStatus,
        from: &[DeliveryStatus],
        error: Option<&str>,
        now: i64,
    ) -> Result<Option<CampaignMessage>> {
        if from.is_empty() {
            return Ok(None);
        }
        let stamp = |wanted: &[DeliveryStatus]| wanted.contains(&to).then_some(now);
        let sql = format!(
            "UPDATE campaign_messages SET
                 status = ?,
                 error = COALESCE(?, error),
                 sent_at = COALESCE(sent_at, ?),
                 delivered_at = COALESCE(delivered_at, ?),
                 read_at = COALESCE(read_at, ?),
                 failed_at = COALESCE(failed_at, ?),
                 updated_at = ?
             WHERE provider_message_id = ? AND status IN ({})",
            placeholders(from.len())
        );
        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(error)
            .bind(stamp(&[
                DeliveryStatus::Sent,
                DeliveryStatus::Delivered,
                DeliveryStatus::Read,
            ]))
            .bind(stamp(&[DeliveryStatus::Delivered, DeliveryStatus::Read]))
            .bind(stamp(&[DeliveryStatus::Read]))
            .bind(stamp(&[DeliveryStatus::Failed]))
            .bind(now)
            .bind(provider_message_id);
        for status in from {
            query = query.bind(status.as_str());
        }
        if query.execute(&self.pool).await?.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, CampaignMessageRow>(
            "SELECT * FROM campaign_messages WHERE provider_message_id = ?",
        )
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn campaign_messages(&self, campaign_id: &str) -> Result<Vec<CampaignMessage>> {
        let rows = sqlx::query_as::<_, CampaignMessageRow>(
            "SELECT * FROM campaign_messages WHERE campaign_id = ? ORDER BY created_at, rowid",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn campaign_contact_ids(&self, campaign_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT contact_id FROM campaign_messages WHERE campaign_id = ?",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn campaign_status_counts(&self, campaign_id: &str) -> Result<StatusCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM campaign_messages WHERE campaign_id = ? GROUP BY status",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            counts.add(status.parse()?, n);
        }
        Ok(counts)
    }

    async fn fail_pending_campaign_messages(
        &self,
        campaign_id: &str,
        error: &str,
        now: i64,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE campaign_messages
             SET status = 'failed', error = ?, failed_at = ?, updated_at = ?
             WHERE campaign_id = ? AND status = 'pending'",
        )
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn recompute_analytics(
        &self,
        campaign_id: &str,
        now: i64,
    ) -> Result<CampaignAnalytics> {
        // `WHERE true` keeps SQLite from parsing ON CONFLICT as a join clause.
        let row = sqlx::query_as::<_, AnalyticsRow>(
            r#"INSERT INTO campaign_analytics (
                   campaign_id, total, pending, sent, delivered, read, failed,
                   delivery_rate, read_rate, updated_at)
               SELECT ?1, c.total, c.pending, c.sent, c.delivered, c.read, c.failed,
                      CASE WHEN c.sent = 0 THEN 0.0
                           ELSE ROUND(c.delivered * 10000.0 / c.sent) / 100.0 END,
                      CASE WHEN c.delivered = 0 THEN 0.0
                           ELSE ROUND(c.read * 10000.0 / c.delivered) / 100.0 END,
                      ?2
               FROM (
                   SELECT COUNT(*) AS total,
                          COALESCE(SUM(status = 'pending'), 0) AS pending,
                          COALESCE(SUM(status != 'pending'), 0) AS sent,
                          COALESCE(SUM(status IN ('delivered', 'read')), 0) AS delivered,
                          COALESCE(SUM(status = 'read'), 0) AS read,
                          COALESCE(SUM(status = 'failed'), 0) AS failed
                   FROM campaign_messages
                   WHERE campaign_id = ?1
               ) AS c
               WHERE true
               ON CONFLICT(campaign_id) DO UPDATE SET
                 total = excluded.total,
                 pending = excluded.pending,
                 sent = excluded.sent,
                 delivered = excluded.delivered,
                 read = excluded.read,
                 failed = excluded.failed,
                 delivery_rate = excluded.delivery_rate,
                 read_rate = excluded.read_rate,
                 updated_at = excluded.updated_at
               RETURNING *"#,
        )
        .bind(campaign_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_analytics(&self, campaign_id: &str) -> Result<Option<CampaignAnalytics>> {
        let row = sqlx::query_as::<_, AnalyticsRow>(
            "SELECT * FROM campaign_analytics WHERE campaign_id = ?",
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn provider_id_known(&self, provider_message_id: &str) -> Result<bool> {
        let known = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM campaign_messages WHERE provider_message_id = ?1)
                 OR EXISTS(SELECT 1 FROM messages WHERE provider_message_id = ?1)",
        )
        .bind(provider_message_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(known)
    }

    async fn hold_status_report(&self, report: &EarlyStatusReport) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO early_status_reports (provider_message_id, status, error, received_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(provider_message_id, status) DO NOTHING"#,
        )
        .bind(&report.provider_message_id)
        .bind(report.status.as_str())
        .bind(&report.error)
        .bind(report.received_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn take_status_reports(
        &self,
        provider_message_id: &str,
    ) -> Result<Vec<EarlyStatusReport>> {
        let rows = sqlx::query_as::<_, EarlyReportRow>(
            "DELETE FROM early_status_reports WHERE provider_message_id = ? RETURNING *",
        )
        .bind(provider_message_id)
        .fetch_all(&self.pool)
        .await?;
        let mut reports = rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<EarlyStatusReport>>>()?;
        reports.sort_by_key(|r| r.received_at);
        Ok(reports)
    }

    async fn prune_status_reports(&self, before: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM early_status_reports WHERE received_at < ?")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_run(&self, run: &DispatchRun) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO dispatch_runs (
                   id, campaign_id, status, total, attempted, sent, failed, error,
                   started_at, updated_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&run.id)
        .bind(&run.campaign_id)
        .bind(run.status.as_str())
        .bind(run.total)
        .bind(run.attempted)
        .bind(run.sent)
        .bind(run.failed)
        .bind(&run.error)
        .bind(run.started_at)
        .bind(run.updated_at)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_run(&self, run: &DispatchRun) -> Result<()> {
        sqlx::query(
            "UPDATE dispatch_runs SET
                 status = ?, total = ?, attempted = ?, sent = ?, failed = ?, error = ?,
                 updated_at = ?, finished_at = ?
             WHERE id = ?",
        )
        .bind(run.status.as_str())
        .bind(run.total)
        .bind(run.attempted)
        .bind(run.sent)
        .bind(run.failed)
        .bind(&run.error)
        .bind(run.updated_at)
        .bind(run.finished_at)
        .bind(&run.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_run(&self, campaign_id: &str) -> Result<Option<DispatchRun>> {
        let row = sqlx::query_as::<_, RunRow>(
            "SELECT * FROM dispatch_runs WHERE campaign_id = ?
             ORDER BY started_at DESC, rowid DESC LIMIT 1",
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn runs_with_status(&self, status: RunStatus) -> Result<Vec<DispatchRun>> {
        let rows = sqlx::query_as::<_, RunRow>(
            "SELECT * FROM dispatch_runs WHERE status = ? ORDER BY started_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// Insert a message row; `false` when its provider id is already stored.
async fn insert_message_row<'e>(
    executor: impl SqliteExecutor<'e>,
    m: &Message,
) -> Result<bool> {
    let result = sqlx::query(
        r#"INSERT INTO messages (
               id, conversation_id, direction, message_type, content, media_url,
               media_content_type, provider_message_id, delivery_status, sender, error,
               created_at, delivered_at, read_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(provider_message_id) DO NOTHING"#,
    )
    .bind(&m.id)
    .bind(&m.conversation_id)
    .bind(m.direction.as_str())
    .bind(m.message_type.as_str())
    .bind(&m.content)
    .bind(&m.media_url)
    .bind(&m.media_content_type)
    .bind(&m.provider_message_id)
    .bind(m.delivery_status.map(DeliveryStatus::as_str))
    .bind(&m.sender)
    .bind(&m.error)
    .bind(m.created_at)
    .bind(m.delivered_at)
    .bind(m.read_at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}
