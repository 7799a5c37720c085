use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use {
    parley_common::{Error, TransportErrorKind, codes},
    serde_json::{Value, json},
    tracing::error,
};

/// Error returned by API handlers, rendered as `{error, code, details}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::validation(
            codes::VALIDATION_ERROR,
            rejection.body_text(),
        ))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Auth => StatusCode::UNAUTHORIZED,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation { .. } | Error::StateConflict { .. } => StatusCode::BAD_REQUEST,
            Error::Transport {
                kind: TransportErrorKind::Permission,
                ..
            } => StatusCode::FORBIDDEN,
            Error::Transport { .. } | Error::Persistence { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    fn details(&self) -> Value {
        match &self.0 {
            Error::NotFound { entity, id } => json!({ "entity": entity.as_str(), "id": id }),
            Error::Transport {
                kind,
                provider_code,
                ..
            } => json!({ "kind": kind.to_string(), "providerCode": provider_code }),
            _ => Value::Null,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Store failures are logged in full but not echoed to callers.
        let message = match &self.0 {
            Error::Persistence { .. } => {
                error!(error = %self.0, "request failed in the store");
                "internal storage error".to_string()
            },
            other => other.to_string(),
        };
        let body = json!({
            "error": message,
            "code": self.0.code(),
            "details": self.details(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, parley_common::Entity};

    #[test]
    fn maps_taxonomy_to_status() {
        let cases = [
            (Error::Auth, StatusCode::UNAUTHORIZED),
            (
                Error::not_found(Entity::Conversation, "c1"),
                StatusCode::NOT_FOUND,
            ),
            (Error::window_expired("c1"), StatusCode::BAD_REQUEST),
            (Error::media("bad"), StatusCode::BAD_REQUEST),
            (
                Error::transport(TransportErrorKind::Permission, Some("20403".into()), "no"),
                StatusCode::FORBIDDEN,
            ),
            (
                Error::transport(TransportErrorKind::UnknownRecipient, None, "no"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                Error::persistence(std::io::Error::other("disk")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[test]
    fn transport_details_carry_provider_code() {
        let err = ApiError(Error::transport(
            TransportErrorKind::SizeLimit,
            Some("11751".into()),
            "too big",
        ));
        let details = err.details();
        assert_eq!(details["providerCode"], "11751");
        assert_eq!(details["kind"], "size limit");
    }
}
