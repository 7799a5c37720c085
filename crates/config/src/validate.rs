//! Semantic checks run on a loaded [`ParleyConfig`] before the server starts.

use std::fmt;

use crate::schema::{ParleyConfig, TransportProvider};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "transport.account_sid"
    pub path: &'static str,
    pub message: String,
}

impl Diagnostic {
    fn error(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            path,
            message: message.into(),
        }
    }

    fn warning(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            path,
            message: message.into(),
        }
    }

    fn info(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            path,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.path, self.message)
    }
}

/// Largest media object the provider accepts.
pub const MAX_UPLOAD_LIMIT: usize = 20 * 1024 * 1024;

/// Collect every problem with `config`; callers decide whether errors are fatal.
pub fn validate(config: &ParleyConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    match config.transport.provider {
        TransportProvider::Twilio => {
            let t = &config.transport;
            if t.account_sid.as_deref().is_none_or(str::is_empty) {
                out.push(Diagnostic::error(
                    "transport.account_sid",
                    "required when provider = \"twilio\"",
                ));
            }
            if t.auth_token.is_none() {
                out.push(Diagnostic::error(
                    "transport.auth_token",
                    "required when provider = \"twilio\" (or set PARLEY_TWILIO_AUTH_TOKEN)",
                ));
            }
            match t.from_number.as_deref() {
                None | Some("") => out.push(Diagnostic::error(
                    "transport.from_number",
                    "required when provider = \"twilio\"",
                )),
                Some(n) if !looks_like_e164(n) => out.push(Diagnostic::error(
                    "transport.from_number",
                    format!("{n:?} is not an E.164 number"),
                )),
                Some(_) => {},
            }
            if !is_http_url(&t.api_base) {
                out.push(Diagnostic::error(
                    "transport.api_base",
                    "must be an http(s) URL",
                ));
            }
        },
        TransportProvider::DryRun => out.push(Diagnostic::info(
            "transport.provider",
            "dry_run transport: messages are logged, not delivered",
        )),
    }

    if let Some(url) = &config.transport.status_callback_url
        && !is_http_url(url)
    {
        out.push(Diagnostic::error(
            "transport.status_callback_url",
            "must be an http(s) URL",
        ));
    }
    if let Some(url) = &config.server.public_url
        && !is_http_url(url)
    {
        out.push(Diagnostic::error("server.public_url", "must be an http(s) URL"));
    }

    if config.campaigns.batch_size == 0 {
        out.push(Diagnostic::error("campaigns.batch_size", "must be at least 1"));
    }
    if config.campaigns.scheduler_interval_secs == 0 {
        out.push(Diagnostic::error(
            "campaigns.scheduler_interval_secs",
            "must be at least 1",
        ));
    }
    if config.window.sweep_interval_secs == 0 {
        out.push(Diagnostic::error(
            "window.sweep_interval_secs",
            "must be at least 1",
        ));
    }
    if config.media.max_upload_bytes == 0 {
        out.push(Diagnostic::error("media.max_upload_bytes", "must be positive"));
    } else if config.media.max_upload_bytes > MAX_UPLOAD_LIMIT {
        out.push(Diagnostic::error(
            "media.max_upload_bytes",
            format!("must not exceed {MAX_UPLOAD_LIMIT} bytes (provider media limit)"),
        ));
    }
    if config.database.max_connections == 0 {
        out.push(Diagnostic::error(
            "database.max_connections",
            "must be at least 1",
        ));
    }

    if !config.auth.is_enabled() && !is_loopback(&config.server.bind) {
        out.push(Diagnostic::warning(
            "auth.api_key",
            format!(
                "API is unauthenticated while listening on {}",
                config.server.bind
            ),
        ));
    }

    out
}

fn looks_like_e164(n: &str) -> bool {
    let digits = n.strip_prefix('+').unwrap_or(n);
    (8..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn is_loopback(bind: &str) -> bool {
    matches!(bind, "127.0.0.1" | "::1" | "localhost")
}
