//! Customer messages delivered by the provider webhook.

use std::{collections::HashMap, sync::Arc};

use {
    parley_common::{Error, Result, now_ms, phone::normalize_phone},
    parley_store::{Direction, Message, MessageType, Store, new_id},
    tracing::{debug, error, info, warn},
};

use crate::{
    media::{is_allowed, message_type_for, placeholder_text},
    window::{inbound_transition, new_inbound_conversation},
};

/// Twilio delivers at most ten attachments per message.
const MAX_ATTACHMENTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAttachment {
    pub url: String,
    pub content_type: String,
}

/// Provider-neutral view of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPayload {
    pub message_id: String,
    pub from: String,
    pub to: String,
    pub body: Option<String>,
    pub media: Vec<InboundAttachment>,
    pub profile_name: Option<String>,
}

impl InboundPayload {
    /// Parse Twilio's form fields (`MessageSid`, `From`, `Body`, `NumMedia`,
    /// `MediaUrl{n}`, `MediaContentType{n}`, `ProfileName`).
    ///
    /// Returns `None` when the sender or message id is missing.
    pub fn from_form(form: &HashMap<String, String>) -> Option<Self> {
        let field = |name: &str| {
            form.get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let message_id = field("MessageSid").or_else(|| field("SmsMessageSid"))?;
        let from = field("From")?;
        let num_media: usize = field("NumMedia")
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
            .min(MAX_ATTACHMENTS);

        let media = (0..num_media)
            .filter_map(|i| {
                Some(InboundAttachment {
                    url: field(&format!("MediaUrl{i}"))?,
                    content_type: field(&format!("MediaContentType{i}")).unwrap_or_default(),
                })
            })
            .collect();

        Some(Self {
            message_id,
            from,
            to: field("To").unwrap_or_default(),
            body: field("Body"),
            media,
            profile_name: field("ProfileName"),
        })
    }

    /// First attachment whose content type is on the allow-list.
    pub fn primary_media(&self) -> Option<&InboundAttachment> {
        self.media.iter().find(|m| is_allowed(&m.content_type))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Stored {
        message_id: String,
        conversation_id: String,
        created_conversation: bool,
    },
    /// The provider id was already stored; nothing changed.
    Duplicate,
}

pub struct InboundProcessor {
    store: Arc<dyn Store>,
}

impl InboundProcessor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Process a webhook delivery, never failing.
    ///
    /// Errors are logged; the provider must always get a success response so
    /// it does not retry.
    pub async fn handle(&self, payload: InboundPayload) {
        let provider_id = payload.message_id.clone();
        match self.process(payload, now_ms()).await {
            Ok(InboundOutcome::Stored {
                message_id,
                conversation_id,
                created_conversation,
            }) => {
                info!(
                    provider_message_id = %provider_id,
                    %message_id,
                    %conversation_id,
                    created_conversation,
                    "inbound message stored"
                );
            },
            Ok(InboundOutcome::Duplicate) => {
                debug!(provider_message_id = %provider_id, "duplicate inbound message ignored");
            },
            Err(e @ Error::Validation { .. }) => {
                warn!(provider_message_id = %provider_id, error = %e, "inbound message rejected");
            },
            Err(e) => {
                error!(
                    provider_message_id = %provider_id,
                    error = %e,
                    "inbound message processing failed"
                );
            },
        }
    }

    pub async fn process(&self, payload: InboundPayload, now: i64) -> Result<InboundOutcome> {
        let phone = normalize_phone(&payload.from)?;

        if self
            .store
            .message_by_provider_id(&payload.message_id)
            .await?
            .is_some()
        {
            return Ok(InboundOutcome::Duplicate);
        }

        let profile_name = payload.profile_name.as_deref();
        let contact = self
            .store
            .find_or_create_contact(&phone, profile_name, now)
            .await?;
        if let Some(name) = profile_name
            && contact.name.as_deref().is_none_or(str::is_empty)
        {
            self.store.fill_contact_name(&contact.id, name, now).await?;
        }

        let (conversation, created_conversation) = match self
            .store
            .latest_conversation_for_contact(&contact.id)
            .await?
        {
            Some(existing) => {
                let reopened = inbound_transition(&existing, now);
                self.store.save_window_state(&reopened).await?;
                if existing.status != reopened.status {
                    info!(
                        conversation_id = %existing.id,
                        from = %existing.status,
                        "conversation reopened by customer"
                    );
                }
                (reopened, false)
            },
            None => {
                let fresh = new_inbound_conversation(&contact.id, now);
                self.store.insert_conversation(&fresh).await?;
                (fresh, true)
            },
        };

        let primary = payload.primary_media();
        let message_type = primary
            .and_then(|m| message_type_for(&m.content_type))
            .unwrap_or(MessageType::Text);
        if primary.is_none() && !payload.media.is_empty() {
            warn!(
                provider_message_id = %payload.message_id,
                count = payload.media.len(),
                "inbound attachments all have unsupported content types"
            );
        }
        let content = payload
            .body
            .clone()
            .unwrap_or_else(|| placeholder_text(message_type).to_string());

        let message = Message {
            id: new_id(),
            conversation_id: conversation.id.clone(),
            direction: Direction::Inbound,
            message_type,
            content,
            media_url: primary.map(|m| m.url.clone()),
            media_content_type: primary.map(|m| m.content_type.clone()),
            provider_message_id: Some(payload.message_id.clone()),
            delivery_status: None,
            sender: Some(phone),
            error: None,
            created_at: now,
            delivered_at: None,
            read_at: None,
        };
        if !self.store.insert_message(&message).await? {
            return Ok(InboundOutcome::Duplicate);
        }

        Ok(InboundOutcome::Stored {
            message_id: message.id,
            conversation_id: conversation.id,
            created_conversation,
        })
    }
}
