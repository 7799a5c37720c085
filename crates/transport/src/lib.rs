//! Outbound message transport.
//!
//! [`MessageTransport`] is the single capability the conversation and campaign
//! services need from a provider. One instance is built at startup and shared
//! as `Arc<dyn MessageTransport>`.

pub mod dry_run;
pub mod error;
pub mod twilio;
pub mod types;

use std::sync::Arc;

use {async_trait::async_trait, parley_config::{TransportConfig, TransportProvider}};

pub use {
    dry_run::{DryRunRecord, DryRunTransport},
    error::{TransportError, classify},
    twilio::TwilioTransport,
    types::{OutboundRequest, TemplateRequest, TransportReceipt},
};

pub type Result<T> = std::result::Result<T, TransportError>;

#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &'static str;

    /// Whether the provider will later call the delivery-status webhook for
    /// messages it accepts.
    fn delivery_callbacks(&self) -> bool {
        true
    }

    async fn send(&self, request: OutboundRequest) -> Result<TransportReceipt>;

    async fn send_template(&self, request: TemplateRequest) -> Result<TransportReceipt>;
}

/// Build the configured transport.
pub fn build_transport(config: &TransportConfig) -> Result<Arc<dyn MessageTransport>> {
    match config.provider {
        TransportProvider::Twilio => Ok(Arc::new(TwilioTransport::from_config(config)?)),
        TransportProvider::DryRun => Ok(Arc::new(DryRunTransport::new())),
    }
}
