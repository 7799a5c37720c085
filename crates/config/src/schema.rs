//! Config schema types.

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub transport: TransportConfig,
    pub campaigns: CampaignsConfig,
    pub window: WindowConfig,
    pub media: MediaConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Externally reachable base URL, used to build media and callback URLs.
    /// Falls back to `http://{bind}:{port}` when unset.
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
            public_url: None,
        }
    }
}

impl ServerConfig {
    /// Base URL without a trailing slash.
    pub fn public_base(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.bind, self.port),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:parley.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportProvider {
    Twilio,
    #[default]
    DryRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub provider: TransportProvider,
    pub account_sid: Option<String>,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_token: Option<Secret<String>>,
    /// Sender number in E.164 form, without the `whatsapp:` prefix.
    pub from_number: Option<String>,
    pub api_base: String,
    /// Overrides the derived `{public_url}/webhooks/status` callback.
    pub status_callback_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            provider: TransportProvider::default(),
            account_sid: None,
            auth_token: None,
            from_number: None,
            api_base: "https://api.twilio.com".into(),
            status_callback_url: None,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignsConfig {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub scheduler_interval_secs: u64,
}

impl Default for CampaignsConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay_ms: 1000,
            scheduler_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub sweep_interval_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub upload_dir: String,
    pub max_upload_bytes: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            upload_dir: "./media".into(),
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// When unset, the API is open.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,
}

impl AuthConfig {
    pub fn is_enabled(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().is_empty())
    }
}

/// Secrets are never written back out in clear text.
fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(_) => serializer.serialize_some("[REDACTED]"),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ParleyConfig::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.database.max_connections, 5);
        assert_eq!(cfg.transport.provider, TransportProvider::DryRun);
        assert_eq!(cfg.campaigns.batch_size, 50);
        assert_eq!(cfg.campaigns.batch_delay_ms, 1000);
        assert_eq!(cfg.window.sweep_interval_secs, 300);
        assert_eq!(cfg.media.max_upload_bytes, 20 * 1024 * 1024);
        assert!(!cfg.auth.is_enabled());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: ParleyConfig = toml::from_str(
            r#"
            [transport]
            provider = "twilio"
            account_sid = "AC123"
            auth_token = "tok"

            [campaigns]
            batch_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.transport.provider, TransportProvider::Twilio);
        assert_eq!(cfg.transport.auth_token.unwrap().expose_secret(), "tok");
        assert_eq!(cfg.campaigns.batch_size, 10);
        assert_eq!(cfg.campaigns.batch_delay_ms, 1000);
        assert_eq!(cfg.transport.api_base, "https://api.twilio.com");
    }

    #[test]
    fn public_base_falls_back_to_bind_address() {
        let mut server = ServerConfig::default();
        assert_eq!(server.public_base(), "http://127.0.0.1:8080");
        server.public_url = Some("https://chat.example.com/".into());
        assert_eq!(server.public_base(), "https://chat.example.com");
    }

    #[test]
    fn secrets_are_redacted_on_serialize() {
        let mut cfg = ParleyConfig::default();
        cfg.auth.api_key = Some(Secret::new("hunter2".into()));
        let out = toml::to_string(&cfg).unwrap();
        assert!(out.contains("[REDACTED]"));
        assert!(!out.contains("hunter2"));
    }
}
