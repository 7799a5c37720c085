use std::{error::Error as StdError, fmt};

use thiserror::Error;

/// Stable machine-readable error codes returned to API callers.
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const INVALID_PHONE: &str = "INVALID_PHONE";
    pub const MEDIA_VALIDATION_ERROR: &str = "MEDIA_VALIDATION_ERROR";
    pub const EMPTY_AUDIENCE: &str = "EMPTY_AUDIENCE";
    pub const INVALID_SCHEDULE: &str = "INVALID_SCHEDULE";
    pub const WINDOW_EXPIRED: &str = "WINDOW_EXPIRED";
    pub const CONVERSATION_CLOSED: &str = "CONVERSATION_CLOSED";
    pub const DUPLICATE_PHONE: &str = "DUPLICATE_PHONE";
    pub const TEMPLATE_NOT_APPROVED: &str = "TEMPLATE_NOT_APPROVED";
    pub const CAMPAIGN_STATE: &str = "CAMPAIGN_STATE";
    pub const PERSISTENCE_ERROR: &str = "PERSISTENCE_ERROR";
}

/// Kind of record a [`Error::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Contact,
    Conversation,
    Message,
    Campaign,
    Template,
    Audience,
}

impl Entity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Conversation => "conversation",
            Self::Message => "message",
            Self::Campaign => "campaign",
            Self::Template => "template",
            Self::Audience => "audience",
        }
    }

    fn not_found_code(self) -> &'static str {
        match self {
            Self::Contact => "CONTACT_NOT_FOUND",
            Self::Conversation => "CONVERSATION_NOT_FOUND",
            Self::Message => "MESSAGE_NOT_FOUND",
            Self::Campaign => "CAMPAIGN_NOT_FOUND",
            Self::Template => "TEMPLATE_NOT_FOUND",
            Self::Audience => "AUDIENCE_NOT_FOUND",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a provider-side send rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The provider refused access to the media URL or the account lacks permission.
    Permission,
    /// Body or media exceeds the provider's size limit.
    SizeLimit,
    /// Media content type is not accepted by the provider.
    UnsupportedType,
    /// The recipient number is invalid or not reachable on the channel.
    UnknownRecipient,
    /// The message had neither a body nor media.
    BodyRequired,
    Generic,
}

impl TransportErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::Permission => "MEDIA_PERMISSION_DENIED",
            Self::SizeLimit => "MEDIA_TOO_LARGE",
            Self::UnsupportedType => "UNSUPPORTED_MEDIA_TYPE",
            Self::UnknownRecipient => "UNKNOWN_RECIPIENT",
            Self::BodyRequired => "BODY_REQUIRED",
            Self::Generic => "TRANSPORT_ERROR",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Permission => "permission",
            Self::SizeLimit => "size limit",
            Self::UnsupportedType => "unsupported type",
            Self::UnknownRecipient => "unknown recipient",
            Self::BodyRequired => "body required",
            Self::Generic => "generic",
        };
        f.write_str(s)
    }
}

/// Error taxonomy shared by the conversation and campaign services.
///
/// Crate-local errors (store, transport, config) convert into this type at
/// the service boundary; the gateway maps each variant to an HTTP status.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not authenticated")]
    Auth,

    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    #[error("{message}")]
    Validation { code: &'static str, message: String },

    #[error("{message}")]
    StateConflict { code: &'static str, message: String },

    #[error("transport rejected message ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        provider_code: Option<String>,
        message: String,
    },

    #[error("persistence error: {source}")]
    Persistence {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn media(message: impl Into<String>) -> Self {
        Self::validation(codes::MEDIA_VALIDATION_ERROR, message)
    }

    #[must_use]
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::StateConflict {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn window_expired(conversation_id: &str) -> Self {
        Self::conflict(
            codes::WINDOW_EXPIRED,
            format!("conversation {conversation_id} is outside the 24-hour reply window"),
        )
    }

    #[must_use]
    pub fn conversation_closed(conversation_id: &str) -> Self {
        Self::conflict(
            codes::CONVERSATION_CLOSED,
            format!("conversation {conversation_id} is closed"),
        )
    }

    #[must_use]
    pub fn transport(
        kind: TransportErrorKind,
        provider_code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            kind,
            provider_code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn persistence(source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Persistence {
            source: Box::new(source),
        }
    }

    /// Machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth => codes::UNAUTHORIZED,
            Self::NotFound { entity, .. } => entity.not_found_code(),
            Self::Validation { code, .. } | Self::StateConflict { code, .. } => *code,
            Self::Transport { kind, .. } => kind.code(),
            Self::Persistence { .. } => codes::PERSISTENCE_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
