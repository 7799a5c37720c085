//! Free-form agent replies inside the reply window.

use std::sync::Arc;

use {
    parley_common::{Entity, Error, Result, codes, now_ms},
    parley_store::{
        ConversationStatus, DeliveryStatus, Direction, Message, MessageType, Store, new_id,
    },
    parley_transport::{MessageTransport, OutboundRequest},
    serde::{Deserialize, Serialize},
    tracing::{error, info, warn},
};

use crate::{media::validate_outbound, window::is_within_window};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "type", default = "default_type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_content_type: Option<String>,
    /// Agent or system that authored the reply.
    #[serde(default)]
    pub sender: Option<String>,
}

fn default_type() -> MessageType {
    MessageType::Text
}

impl SendRequest {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            message_type: MessageType::Text,
            media_url: None,
            media_content_type: None,
            sender: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub message_id: String,
    pub provider_message_id: String,
    pub provider_status: String,
}

pub struct OutboundGateway {
    store: Arc<dyn Store>,
    transport: Arc<dyn MessageTransport>,
    status_callback: Option<String>,
}

impl OutboundGateway {
    pub fn new(store: Arc<dyn Store>, transport: Arc<dyn MessageTransport>) -> Self {
        Self {
            store,
            transport,
            status_callback: None,
        }
    }

    /// URL the provider should post delivery updates to.
    #[must_use]
    pub fn with_status_callback(mut self, url: Option<String>) -> Self {
        self.status_callback = url;
        self
    }

    pub async fn send(&self, conversation_id: &str, request: SendRequest) -> Result<SendOutcome> {
        self.send_at(conversation_id, request, now_ms()).await
    }

    /// Send a reply, checking (in order) existence, closed status, the
    /// window and media. Nothing is persisted unless the transport accepts.
    pub async fn send_at(
        &self,
        conversation_id: &str,
        request: SendRequest,
        now: i64,
    ) -> Result<SendOutcome> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Conversation, conversation_id))?;
        if conversation.status == ConversationStatus::Closed {
            return Err(Error::conversation_closed(conversation_id));
        }
        if !is_within_window(&conversation, now) {
            return Err(Error::window_expired(conversation_id));
        }
        let content_type = validate_outbound(
            request.message_type,
            request.media_url.as_deref(),
            request.media_content_type.as_deref(),
        )?;

        let body = request
            .message
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string);
        if body.is_none() && request.message_type == MessageType::Text {
            return Err(Error::validation(
                codes::VALIDATION_ERROR,
                "message text is required",
            ));
        }

        let contact = self
            .store
            .get_contact(&conversation.contact_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Contact, &conversation.contact_id))?;

        let receipt = self
            .transport
            .send(OutboundRequest {
                to: contact.phone.clone(),
                body: body.clone(),
                media_url: request.media_url.clone(),
                status_callback: self.status_callback.clone(),
            })
            .await
            .map_err(|e| {
                warn!(
                    conversation_id,
                    transport = self.transport.name(),
                    kind = %e.kind,
                    provider_code = ?e.provider_code,
                    error = %e,
                    "outbound send rejected"
                );
                Error::from(e)
            })?;

        let message = Message {
            id: new_id(),
            conversation_id: conversation.id.clone(),
            direction: Direction::Outbound,
            message_type: request.message_type,
            content: body.unwrap_or_default(),
            media_url: request.media_url,
            media_content_type: content_type,
            provider_message_id: Some(receipt.provider_message_id.clone()),
            delivery_status: Some(DeliveryStatus::Sent),
            sender: request.sender,
            error: None,
            created_at: now,
            delivered_at: None,
            read_at: None,
        };
        let persisted = async {
            self.store.insert_message(&message).await?;
            self.store.touch_outbound(&conversation.id, now).await
        }
        .await;
        if let Err(e) = persisted {
            error!(
                conversation_id,
                provider_message_id = %receipt.provider_message_id,
                error = %e,
                "message sent but not recorded"
            );
            return Err(e.into());
        }

        self.apply_held_reports(&receipt.provider_message_id, now).await;

        info!(
            conversation_id,
            message_id = %message.id,
            provider_message_id = %receipt.provider_message_id,
            "outbound message sent"
        );
        Ok(SendOutcome {
            message_id: message.id,
            provider_message_id: receipt.provider_message_id,
            provider_status: receipt.status,
        })
    }

    /// Delivery reports can reach the webhook before the message row exists;
    /// the reconciler holds those until now.
    async fn apply_held_reports(&self, provider_message_id: &str, now: i64) {
        let reports = match self.store.take_status_reports(provider_message_id).await {
            Ok(reports) => reports,
            Err(e) => {
                warn!(provider_message_id, error = %e, "could not load held delivery statuses");
                return;
            },
        };
        for report in reports {
            let applied = self
                .store
                .advance_message_status(
                    provider_message_id,
                    report.status,
                    report.status.predecessors(),
                    report.error.as_deref(),
                    now,
                )
                .await;
            if let Err(e) = applied {
                warn!(provider_message_id, error = %e, "could not apply held delivery status");
            }
        }
    }
}
