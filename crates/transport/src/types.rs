use std::collections::BTreeMap;

use serde::Serialize;

/// A free-form message, allowed only inside the reply window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundRequest {
    /// Recipient in E.164 form.
    pub to: String,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub status_callback: Option<String>,
}

/// A pre-approved template message, allowed at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateRequest {
    pub to: String,
    pub content_sid: String,
    /// Placeholder name (`"1"`, `"2"`, ...) to value.
    pub variables: BTreeMap<String, String>,
    pub status_callback: Option<String>,
}

/// What the provider returned for an accepted send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportReceipt {
    pub provider_message_id: String,
    /// Provider status at acceptance time, e.g. `queued`.
    pub status: String,
}
