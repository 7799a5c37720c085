//! Domain records persisted by the store.
//!
//! Timestamps are epoch milliseconds. Enum columns are stored as their
//! lowercase `as_str()` form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Declares a string-backed enum with `as_str`, `Display` and `FromStr`.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident : $column:literal { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(Error::invalid_value($column, other)),
                }
            }
        }
    };
}

text_enum! {
    ConversationStatus: "conversation status" {
        Open => "open",
        Pending => "pending",
        Closed => "closed",
    }
}

text_enum! {
    /// Dormant conversations were opened by a campaign and have not heard back yet.
    Visibility: "visibility" {
        Active => "active",
        Dormant => "dormant",
    }
}

text_enum! {
    Direction: "direction" {
        Inbound => "inbound",
        Outbound => "outbound",
    }
}

text_enum! {
    MessageType: "message type" {
        Text => "text",
        Image => "image",
        Video => "video",
        Audio => "audio",
        Document => "document",
    }
}

text_enum! {
    /// Delivery progress of an outbound message or campaign recipient.
    DeliveryStatus: "delivery status" {
        Pending => "pending",
        Sent => "sent",
        Delivered => "delivered",
        Read => "read",
        Failed => "failed",
    }
}

impl DeliveryStatus {
    /// States a record may be in for a move to `self` to apply.
    ///
    /// Status only moves forward along `pending < sent < delivered < read`;
    /// `failed` is terminal and only reachable before delivery.
    pub fn predecessors(self) -> &'static [DeliveryStatus] {
        use DeliveryStatus::*;
        match self {
            Pending => &[],
            Sent => &[Pending],
            Delivered => &[Pending, Sent],
            Read => &[Pending, Sent, Delivered],
            Failed => &[Pending, Sent],
        }
    }
}

text_enum! {
    CampaignStatus: "campaign status" {
        Draft => "draft",
        Scheduled => "scheduled",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Paused => "paused",
    }
}

text_enum! {
    ScheduleType: "schedule type" {
        Immediate => "immediate",
        Scheduled => "scheduled",
    }
}

text_enum! {
    /// Where per-recipient template variables come from.
    VariableSource: "variable source" {
        Static => "static",
        Contact => "contact",
    }
}

text_enum! {
    TemplateStatus: "template status" {
        Approved => "approved",
        Pending => "pending",
        Rejected => "rejected",
    }
}

text_enum! {
    RunStatus: "run status" {
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Paused => "paused",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub phone: String,
    pub name: Option<String>,
    pub email: Option<String>,
    /// Free-form profile attributes usable as template variables.
    pub profile: BTreeMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audience {
    pub id: String,
    pub name: String,
    pub segment_ids: Vec<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    /// Provider-side content identifier (Twilio `ContentSid`).
    pub content_sid: String,
    /// Body with `{{n}}` placeholders, rendered into the stored message text.
    pub body: String,
    pub status: TemplateStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub contact_id: String,
    pub status: ConversationStatus,
    pub visibility: Visibility,
    pub last_message_at: Option<i64>,
    pub last_customer_message_at: Option<i64>,
    pub window_expires_at: Option<i64>,
    pub created_by_campaign: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub direction: Direction,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    pub media_url: Option<String>,
    pub media_content_type: Option<String>,
    pub provider_message_id: Option<String>,
    /// Only tracked for outbound messages.
    pub delivery_status: Option<DeliveryStatus>,
    pub sender: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub delivered_at: Option<i64>,
    pub read_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub template_id: String,
    pub audience_id: String,
    /// Snapshot of the audience's segments at creation time.
    pub segment_ids: Vec<String>,
    pub schedule_type: ScheduleType,
    pub scheduled_at: Option<i64>,
    pub status: CampaignStatus,
    pub variable_source: VariableSource,
    pub template_variables: BTreeMap<String, String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

/// Per-recipient tracking row for a campaign send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignMessage {
    pub id: String,
    pub campaign_id: String,
    pub contact_id: String,
    pub conversation_id: Option<String>,
    pub phone: String,
    pub status: DeliveryStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub sent_at: Option<i64>,
    pub delivered_at: Option<i64>,
    pub read_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub updated_at: i64,
}

/// Raw row counts per [`DeliveryStatus`] for one campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub sent: i64,
    pub delivered: i64,
    pub read: i64,
    pub failed: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.sent + self.delivered + self.read + self.failed
    }

    pub fn add(&mut self, status: DeliveryStatus, n: i64) {
        match status {
            DeliveryStatus::Pending => self.pending += n,
            DeliveryStatus::Sent => self.sent += n,
            DeliveryStatus::Delivered => self.delivered += n,
            DeliveryStatus::Read => self.read += n,
            DeliveryStatus::Failed => self.failed += n,
        }
    }
}

/// A delivery report that arrived before the send it describes was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarlyStatusReport {
    pub provider_message_id: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub received_at: i64,
}

/// Derived projection of a campaign's [`CampaignMessage`] rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignAnalytics {
    pub campaign_id: String,
    pub total: i64,
    pub pending: i64,
    pub sent: i64,
    pub delivered: i64,
    pub read: i64,
    pub failed: i64,
    pub delivery_rate: f64,
    pub read_rate: f64,
    pub updated_at: i64,
}

/// Durable record of one dispatch pass over a campaign's audience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRun {
    pub id: String,
    pub campaign_id: String,
    pub status: RunStatus,
    pub total: i64,
    pub attempted: i64,
    pub sent: i64,
    pub failed: i64,
    pub error: Option<String>,
    pub started_at: i64,
    pub updated_at: i64,
    pub finished_at: Option<i64>,
}

/// Fresh random identifier for a new record.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
