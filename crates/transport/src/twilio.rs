//! Twilio WhatsApp transport over the Messages REST API.

use std::time::Duration;

use {
    async_trait::async_trait,
    parley_common::phone::channel_address,
    parley_config::TransportConfig,
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    tracing::{debug, warn},
};

use crate::{
    MessageTransport, Result,
    error::TransportError,
    types::{OutboundRequest, TemplateRequest, TransportReceipt},
};

pub struct TwilioTransport {
    client: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: Secret<String>,
    from: String,
}

#[derive(Deserialize)]
struct MessageResource {
    sid: String,
    status: String,
}

#[derive(Deserialize)]
struct ErrorResource {
    code: Option<serde_json::Value>,
    message: Option<String>,
}

impl TwilioTransport {
    pub fn new(
        api_base: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: Secret<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            account_sid: account_sid.into(),
            auth_token,
            from: from.into(),
        })
    }

    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let missing =
            |field: &str| TransportError::generic(format!("transport.{field} is not set"));
        let account_sid = config
            .account_sid
            .clone()
            .ok_or_else(|| missing("account_sid"))?;
        let auth_token = config
            .auth_token
            .clone()
            .ok_or_else(|| missing("auth_token"))?;
        let from = config
            .from_number
            .clone()
            .ok_or_else(|| missing("from_number"))?;
        Self::new(
            config.api_base.clone(),
            account_sid,
            auth_token,
            from,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        )
    }

    async fn post(&self, form: Vec<(&'static str, String)>) -> Result<TransportReceipt> {
        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            let msg: MessageResource = resp.json().await?;
            debug!(sid = %msg.sid, status = %msg.status, "twilio accepted message");
            return Ok(TransportReceipt {
                provider_message_id: msg.sid,
                status: msg.status,
            });
        }

        let body = resp.text().await.unwrap_or_default();
        let err = match serde_json::from_str::<ErrorResource>(&body) {
            Ok(parsed) => {
                let code = parsed.code.map(|c| match c {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                });
                TransportError::from_provider(
                    code,
                    parsed
                        .message
                        .unwrap_or_else(|| format!("twilio returned {status}")),
                )
            },
            Err(_) => TransportError::generic(format!("twilio returned {status}: {body}")),
        };
        warn!(
            http_status = status.as_u16(),
            provider_code = ?err.provider_code,
            kind = %err.kind,
            "twilio rejected message"
        );
        Err(err)
    }

    fn base_form(&self, to: &str, status_callback: Option<&str>) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("To", channel_address(to)),
            ("From", channel_address(&self.from)),
        ];
        if let Some(cb) = status_callback {
            form.push(("StatusCallback", cb.to_string()));
        }
        form
    }
}

#[async_trait]
impl MessageTransport for TwilioTransport {
    fn name(&self) -> &'static str {
        "twilio"
    }

    async fn send(&self, request: OutboundRequest) -> Result<TransportReceipt> {
        let mut form = self.base_form(&request.to, request.status_callback.as_deref());
        if let Some(body) = request.body {
            form.push(("Body", body));
        }
        if let Some(url) = request.media_url {
            form.push(("MediaUrl", url));
        }
        self.post(form).await
    }

    async fn send_template(&self, request: TemplateRequest) -> Result<TransportReceipt> {
        let mut form = self.base_form(&request.to, request.status_callback.as_deref());
        form.push(("ContentSid", request.content_sid));
        if !request.variables.is_empty() {
            let vars = serde_json::to_string(&request.variables)
                .map_err(|e| TransportError::generic(format!("encode template variables: {e}")))?;
            form.push(("ContentVariables", vars));
        }
        self.post(form).await
    }
}
