//! Transport that logs instead of sending.
//!
//! Used when no provider is configured and as the deterministic test double:
//! every request is recorded, and failures can be scripted per recipient.

use std::collections::HashMap;

use {async_trait::async_trait, tokio::sync::Mutex, tracing::info};

use crate::{
    MessageTransport, Result,
    error::TransportError,
    types::{OutboundRequest, TemplateRequest, TransportReceipt},
};

/// One request seen by a [`DryRunTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DryRunRecord {
    Message(OutboundRequest),
    Template(TemplateRequest),
}

impl DryRunRecord {
    pub fn to(&self) -> &str {
        match self {
            Self::Message(r) => &r.to,
            Self::Template(r) => &r.to,
        }
    }
}

#[derive(Default)]
pub struct DryRunTransport {
    callbacks: bool,
    sent: Mutex<Vec<DryRunRecord>>,
    failures: Mutex<HashMap<String, TransportError>>,
}

impl DryRunTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend the provider will report delivery status later, as a real one
    /// would. Tests use this to drive the status webhook by hand.
    #[must_use]
    pub fn with_callbacks(mut self) -> Self {
        self.callbacks = true;
        self
    }

    /// Every future send to `phone` fails with `error`.
    pub async fn fail_for(&self, phone: impl Into<String>, error: TransportError) {
        self.failures.lock().await.insert(phone.into(), error);
    }

    /// Requests that were accepted, in order.
    pub async fn sent(&self) -> Vec<DryRunRecord> {
        self.sent.lock().await.clone()
    }

    async fn accept(&self, record: DryRunRecord) -> Result<TransportReceipt> {
        if let Some(err) = self.failures.lock().await.get(record.to()) {
            info!(to = record.to(), error = %err, "dry-run send failed (scripted)");
            return Err(err.clone());
        }
        let id = format!("DR{}", uuid::Uuid::new_v4().simple());
        info!(to = record.to(), provider_message_id = %id, "dry-run send");
        self.sent.lock().await.push(record);
        Ok(TransportReceipt {
            provider_message_id: id,
            status: "queued".into(),
        })
    }
}

#[async_trait]
impl MessageTransport for DryRunTransport {
    fn name(&self) -> &'static str {
        "dry_run"
    }

    fn delivery_callbacks(&self) -> bool {
        self.callbacks
    }

    async fn send(&self, request: OutboundRequest) -> Result<TransportReceipt> {
        self.accept(DryRunRecord::Message(request)).await
    }

    async fn send_template(&self, request: TemplateRequest) -> Result<TransportReceipt> {
        self.accept(DryRunRecord::Template(request)).await
    }
}
