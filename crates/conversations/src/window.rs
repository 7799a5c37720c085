//! The 24-hour customer service window.
//!
//! ```text
//! no-window ──inbound──▶ open ──(now ≥ expires_at)──▶ expired ──sweep──▶ closed
//!                          ▲                                               │
//!                          └───────────────────inbound─────────────────────┘
//! ```
//!
//! All functions here are pure; callers persist the result.

use {
    parley_common::HOUR_MS,
    parley_store::{Conversation, ConversationStatus, Visibility, new_id},
    serde::Serialize,
};

/// Length of the reply window after a customer message.
pub const WINDOW_MS: i64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WindowState {
    /// The customer has never written.
    NoWindow,
    Open {
        #[serde(rename = "expiresAt")]
        expires_at: i64,
    },
    Expired,
}

pub fn window_state(conversation: &Conversation, now: i64) -> WindowState {
    match conversation.window_expires_at {
        None => WindowState::NoWindow,
        Some(expires_at) if expires_at > now => WindowState::Open { expires_at },
        Some(_) => WindowState::Expired,
    }
}

/// Whether a free-form reply is allowed right now.
pub fn is_within_window(conversation: &Conversation, now: i64) -> bool {
    conversation.status != ConversationStatus::Closed
        && matches!(window_state(conversation, now), WindowState::Open { .. })
}

/// Apply a customer message received at `now`.
///
/// Always reopens and always activates, whatever the prior state.
pub fn inbound_transition(conversation: &Conversation, now: i64) -> Conversation {
    Conversation {
        status: ConversationStatus::Open,
        visibility: Visibility::Active,
        last_message_at: Some(now),
        last_customer_message_at: Some(now),
        window_expires_at: Some(now + WINDOW_MS),
        updated_at: now,
        ..conversation.clone()
    }
}

/// A conversation started by the customer, already in the open window.
pub fn new_inbound_conversation(contact_id: &str, now: i64) -> Conversation {
    let blank = Conversation {
        id: new_id(),
        contact_id: contact_id.to_string(),
        status: ConversationStatus::Open,
        visibility: Visibility::Active,
        last_message_at: None,
        last_customer_message_at: None,
        window_expires_at: None,
        created_by_campaign: None,
        created_at: now,
        updated_at: now,
    };
    inbound_transition(&blank, now)
}

/// A conversation opened by a campaign send: dormant until the customer replies.
pub fn new_campaign_conversation(contact_id: &str, campaign_id: &str, now: i64) -> Conversation {
    Conversation {
        id: new_id(),
        contact_id: contact_id.to_string(),
        status: ConversationStatus::Pending,
        visibility: Visibility::Dormant,
        last_message_at: None,
        last_customer_message_at: None,
        window_expires_at: None,
        created_by_campaign: Some(campaign_id.to_string()),
        created_at: now,
        updated_at: now,
    }
}

/// Whether the sweep should close this conversation at `now`.
pub fn should_close(conversation: &Conversation, now: i64) -> bool {
    conversation.status != ConversationStatus::Closed
        && conversation.window_expires_at.is_some_and(|t| t < now)
}
