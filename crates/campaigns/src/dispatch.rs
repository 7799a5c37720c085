//! Campaign dispatch: batched template sends with per-recipient tracking.

use std::{collections::HashSet, sync::Arc, time::Duration};

use {
    futures::future::join_all,
    parley_common::{Entity, Error, Result, codes, now_ms},
    parley_config::CampaignsConfig,
    parley_conversations::window::new_campaign_conversation,
    parley_store::{
        Campaign, CampaignMessage, CampaignStatus, Contact, DeliveryStatus, Direction,
        DispatchRun, Message, MessageType, RunStatus, Store, Template, TemplateStatus, new_id,
    },
    parley_transport::{MessageTransport, TemplateRequest, TransportError},
    tokio::task::JoinHandle,
    tracing::{debug, error, info, warn},
};

use crate::{
    analytics::refresh_analytics,
    audience::resolve_audience,
    reconcile::{Reconciler, maybe_complete},
    variables::{render, variables_for},
};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub status_callback: Option<String>,
}

impl DispatchSettings {
    pub fn from_config(config: &CampaignsConfig, status_callback: Option<String>) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            batch_delay: Duration::from_millis(config.batch_delay_ms),
            status_callback,
        }
    }
}

/// How one recipient's send ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Sent,
    Failed,
    /// Another run already holds a row for this contact.
    Skipped,
}

pub struct Dispatcher {
    store: Arc<dyn Store>,
    transport: Arc<dyn MessageTransport>,
    reconciler: Reconciler,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn MessageTransport>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(Arc::clone(&store)),
            store,
            transport,
            settings,
        }
    }

    /// Dispatch in the background. The outcome is observable only through
    /// the campaign, its dispatch runs and analytics.
    pub fn spawn(self: &Arc<Self>, campaign_id: String) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.run(&campaign_id).await {
                error!(campaign_id = %campaign_id, error = %e, "campaign dispatch failed");
            }
        })
    }

    /// Run one dispatch pass over every audience member without a tracking
    /// row. The campaign must already be `running`.
    pub async fn run(&self, campaign_id: &str) -> Result<DispatchRun> {
        let campaign = self
            .store
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Campaign, campaign_id))?;
        if campaign.status != CampaignStatus::Running {
            return Err(Error::conflict(
                codes::CAMPAIGN_STATE,
                format!("campaign {campaign_id} is {}, not running", campaign.status),
            ));
        }

        let now = now_ms();
        let mut run = DispatchRun {
            id: new_id(),
            campaign_id: campaign.id.clone(),
            status: RunStatus::Running,
            total: 0,
            attempted: 0,
            sent: 0,
            failed: 0,
            error: None,
            started_at: now,
            updated_at: now,
            finished_at: None,
        };
        self.store.insert_run(&run).await?;
        info!(campaign_id, run_id = %run.id, "dispatch started");

        let (template, recipients) = match self.prepare(&campaign).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.abort(&campaign, &mut run, &e).await?;
                return Err(e);
            },
        };
        run.total = recipients.len() as i64;
        run.updated_at = now_ms();
        self.store.update_run(&run).await?;

        for (index, batch) in recipients.chunks(self.settings.batch_size.max(1)).enumerate() {
            if index > 0 && !self.settings.batch_delay.is_zero() {
                tokio::time::sleep(self.settings.batch_delay).await;
            }

            let current = self.store.get_campaign(campaign_id).await?;
            let status = current.map(|c| c.status);
            if status != Some(CampaignStatus::Running) {
                info!(campaign_id, ?status, batch = index, "dispatch stopped before batch");
                run.status = RunStatus::Paused;
                break;
            }

            let attempts = join_all(
                batch
                    .iter()
                    .map(|contact| self.send_one(&campaign, &template, contact)),
            )
            .await;
            for attempt in attempts {
                match attempt {
                    Attempt::Sent => {
                        run.attempted += 1;
                        run.sent += 1;
                    },
                    Attempt::Failed => {
                        run.attempted += 1;
                        run.failed += 1;
                    },
                    Attempt::Skipped => {},
                }
            }
            run.updated_at = now_ms();
            self.store.update_run(&run).await?;
            debug!(
                campaign_id,
                batch = index,
                attempted = run.attempted,
                total = run.total,
                "batch dispatched"
            );
        }

        let now = now_ms();
        if run.status == RunStatus::Running {
            run.status = RunStatus::Completed;
        }
        run.updated_at = now;
        run.finished_at = Some(now);
        self.store.update_run(&run).await?;

        refresh_analytics(self.store.as_ref(), campaign_id, now).await?;
        maybe_complete(
            self.store.as_ref(),
            campaign_id,
            self.transport.delivery_callbacks(),
            now,
        )
        .await?;

        info!(
            campaign_id,
            run_id = %run.id,
            status = %run.status,
            sent = run.sent,
            failed = run.failed,
            "dispatch finished"
        );
        Ok(run)
    }

    /// Template and remaining recipients; any error here aborts the run.
    async fn prepare(&self, campaign: &Campaign) -> Result<(Template, Vec<Contact>)> {
        let template = self
            .store
            .get_template(&campaign.template_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Template, &campaign.template_id))?;
        if template.status != TemplateStatus::Approved {
            return Err(Error::conflict(
                codes::TEMPLATE_NOT_APPROVED,
                format!("template {} is {}", template.id, template.status),
            ));
        }

        let audience = resolve_audience(self.store.as_ref(), &campaign.segment_ids).await?;
        if audience.is_empty() {
            return Err(Error::validation(
                codes::EMPTY_AUDIENCE,
                "audience resolved to no contacts",
            ));
        }

        let done: HashSet<String> = self
            .store
            .campaign_contact_ids(&campaign.id)
            .await?
            .into_iter()
            .collect();
        let remaining = audience
            .into_iter()
            .filter(|c| !done.contains(&c.id))
            .collect();
        Ok((template, remaining))
    }

    /// Fail the run. The campaign fails too unless an earlier run already
    /// messaged someone, in which case it is paused for an operator to fix
    /// the cause and resume.
    async fn abort(&self, campaign: &Campaign, run: &mut DispatchRun, cause: &Error) -> Result<()> {
        let now = now_ms();
        let reason = cause.to_string();
        run.status = RunStatus::Failed;
        run.error = Some(reason.clone());
        run.updated_at = now;
        run.finished_at = Some(now);
        self.store.update_run(run).await?;

        let already_sent = !self.store.campaign_contact_ids(&campaign.id).await?.is_empty();
        let to = if already_sent {
            warn!(campaign_id = %campaign.id, error = %reason, "campaign paused mid-send");
            CampaignStatus::Paused
        } else {
            warn!(campaign_id = %campaign.id, error = %reason, "campaign aborted before sending");
            CampaignStatus::Failed
        };
        self.store
            .transition_campaign(
                &campaign.id,
                &[CampaignStatus::Running],
                to,
                Some(&reason),
                now,
            )
            .await?;
        Ok(())
    }

    /// Track, send and record one recipient. Failures stay on the row.
    async fn send_one(
        &self,
        campaign: &Campaign,
        template: &Template,
        contact: &Contact,
    ) -> Attempt {
        let now = now_ms();
        let conversation_id = match self.conversation_for(campaign, contact, now).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(
                    campaign_id = %campaign.id,
                    contact_id = %contact.id,
                    error = %e,
                    "could not prepare conversation"
                );
                None
            },
        };

        let row = CampaignMessage {
            id: new_id(),
            campaign_id: campaign.id.clone(),
            contact_id: contact.id.clone(),
            conversation_id: conversation_id.clone(),
            phone: contact.phone.clone(),
            status: DeliveryStatus::Pending,
            provider_message_id: None,
            error: None,
            created_at: now,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            failed_at: None,
            updated_at: now,
        };
        match self.store.insert_campaign_message(&row).await {
            Ok(true) => {},
            Ok(false) => return Attempt::Skipped,
            Err(e) => {
                error!(
                    campaign_id = %campaign.id,
                    contact_id = %contact.id,
                    error = %e,
                    "could not create tracking row"
                );
                return Attempt::Skipped;
            },
        }

        let variables = variables_for(
            campaign.variable_source,
            &campaign.template_variables,
            contact,
        );
        let result = self
            .transport
            .send_template(TemplateRequest {
                to: contact.phone.clone(),
                content_sid: template.content_sid.clone(),
                variables: variables.clone(),
                status_callback: self.settings.status_callback.clone(),
            })
            .await;

        let now = now_ms();
        match result {
            Ok(receipt) => {
                let provider_id = receipt.provider_message_id;
                let transcript = conversation_id.map(|conversation_id| Message {
                    id: new_id(),
                    conversation_id,
                    direction: Direction::Outbound,
                    message_type: MessageType::Text,
                    content: render(&template.body, &variables),
                    media_url: None,
                    media_content_type: None,
                    provider_message_id: Some(provider_id.clone()),
                    delivery_status: Some(DeliveryStatus::Sent),
                    sender: Some(format!("campaign:{}", campaign.id)),
                    error: None,
                    created_at: now,
                    delivered_at: None,
                    read_at: None,
                });
                self.record_sent(campaign, &row, &provider_id, transcript, now).await;
                Attempt::Sent
            },
            Err(e) => {
                let reason = describe(&e);
                debug!(
                    campaign_id = %campaign.id,
                    contact_id = %contact.id,
                    error = %reason,
                    "recipient send failed"
                );
                if let Err(store_err) = self
                    .store
                    .mark_campaign_message_failed(&row.id, &reason, now)
                    .await
                {
                    error!(
                        campaign_id = %campaign.id,
                        row_id = %row.id,
                        error = %store_err,
                        "could not record failure"
                    );
                }
                Attempt::Failed
            },
        }
    }

    /// Record an accepted send, then apply any delivery report that arrived
    /// before the provider id was stored.
    async fn record_sent(
        &self,
        campaign: &Campaign,
        row: &CampaignMessage,
        provider_id: &str,
        transcript: Option<Message>,
        now: i64,
    ) {
        let recorded = match self
            .store
            .mark_campaign_message_sent(&row.id, provider_id, transcript.as_ref(), now)
            .await
        {
            Err(e) if transcript.is_some() => {
                warn!(
                    campaign_id = %campaign.id,
                    row_id = %row.id,
                    error = %e,
                    "could not store campaign message text"
                );
                self.store
                    .mark_campaign_message_sent(&row.id, provider_id, None, now)
                    .await
            },
            other => other,
        };
        if let Err(e) = recorded {
            error!(
                campaign_id = %campaign.id,
                row_id = %row.id,
                error = %e,
                "sent but could not record"
            );
            return;
        }
        if let Err(e) = self.reconciler.replay_held(provider_id, now).await {
            warn!(
                campaign_id = %campaign.id,
                provider_message_id = %provider_id,
                error = %e,
                "could not replay held delivery statuses"
            );
        }
    }

    async fn conversation_for(
        &self,
        campaign: &Campaign,
        contact: &Contact,
        now: i64,
    ) -> Result<String> {
        if let Some(existing) = self
            .store
            .latest_conversation_for_contact(&contact.id)
            .await?
        {
            return Ok(existing.id);
        }
        let conversation = new_campaign_conversation(&contact.id, &campaign.id, now);
        self.store.insert_conversation(&conversation).await?;
        Ok(conversation.id)
    }
}

fn describe(err: &TransportError) -> String {
    match &err.provider_code {
        Some(code) => format!("{} [{code}]: {}", err.kind.code(), err.message),
        None => format!("{}: {}", err.kind.code(), err.message),
    }
}
