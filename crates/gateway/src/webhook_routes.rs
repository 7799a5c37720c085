//! Provider webhooks.
//!
//! Both endpoints acknowledge with `200` and an empty TwiML document no matter
//! what happens internally: a non-2xx response makes the provider retry, and a
//! retry storm is worse than a logged, dropped event. The body is parsed by
//! hand so even a malformed form cannot produce an extractor rejection.

use std::collections::HashMap;

use {
    axum::{
        body::Bytes,
        extract::State,
        http::header::CONTENT_TYPE,
        response::{IntoResponse, Response},
    },
    parley_campaigns::StatusCallback,
    parley_conversations::InboundPayload,
    tracing::warn,
};

use crate::server::AppState;

const EMPTY_TWIML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response/>"#;

fn acknowledge() -> Response {
    ([(CONTENT_TYPE, "text/xml")], EMPTY_TWIML).into_response()
}

fn parse_form(body: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

/// `POST /webhooks/inbound`
pub async fn inbound_message(State(state): State<AppState>, body: Bytes) -> Response {
    let form = parse_form(&body);
    match InboundPayload::from_form(&form) {
        Some(payload) => state.gateway.inbound.handle(payload).await,
        None => {
            warn!(
                fields = form.len(),
                "inbound webhook missing MessageSid or From, ignored"
            );
        },
    }
    acknowledge()
}

/// `POST /webhooks/status`
pub async fn delivery_status(State(state): State<AppState>, body: Bytes) -> Response {
    let form = parse_form(&body);
    match StatusCallback::from_form(&form) {
        Some(callback) => state.gateway.reconciler.handle(callback).await,
        None => {
            warn!(
                fields = form.len(),
                "status webhook missing MessageSid or MessageStatus, ignored"
            );
        },
    }
    acknowledge()
}
