use {parley_common::TransportErrorKind, thiserror::Error};

/// A send the provider (or the network) refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub provider_code: Option<String>,
    pub message: String,
}

impl TransportError {
    /// Build from a provider error code, classifying it.
    #[must_use]
    pub fn from_provider(code: Option<String>, message: impl Into<String>) -> Self {
        let kind = code
            .as_deref()
            .map_or(TransportErrorKind::Generic, classify);
        Self {
            kind,
            provider_code: code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn generic(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Generic,
            provider_code: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_kind(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider_code: None,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::generic(format!("transport request failed: {err}"))
    }
}

impl From<TransportError> for parley_common::Error {
    fn from(err: TransportError) -> Self {
        Self::transport(err.kind, err.provider_code, err.message)
    }
}

/// Map a Twilio error code onto the transport taxonomy.
pub fn classify(code: &str) -> TransportErrorKind {
    match code {
        "20403" | "63018" => TransportErrorKind::Permission,
        "11751" | "21617" => TransportErrorKind::SizeLimit,
        "12300" | "21620" => TransportErrorKind::UnsupportedType,
        "21211" | "21614" | "63003" => TransportErrorKind::UnknownRecipient,
        "21602" => TransportErrorKind::BodyRequired,
        _ => TransportErrorKind::Generic,
    }
}
