use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use stepauth_auth::AuthError;
use stepauth_database::DatabaseError;

/// HTTP rendering of a domain error.
///
/// Handlers never map errors themselves; every failure funnels through
/// this type so status codes, envelope shape, and logging stay uniform.
/// Expected client errors (4xx) are not logged; 5xx and anything
/// unexpected are, with the original error preserved and the response
/// message sanitised.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "invalid_token",
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "unauthorized",
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }

    pub fn rate_limited() -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            code: "rate_limited",
            message: "Too many requests. Please try again later.".to_string(),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: "An internal error occurred".to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::BadRequest(msg) => Self::bad_request(msg),
            AuthError::InvalidCredentials => {
                Self::bad_request("invalid username or password")
            }
            AuthError::InvalidToken(msg) => Self::invalid_token(msg),
            AuthError::InvalidCode(msg) => Self::invalid_token(msg),
            AuthError::Unauthorized(msg) => Self::unauthorized(msg),
            AuthError::NotFound(msg) => Self::not_found(msg),
            AuthError::Webauthn(e) => Self::bad_request(e.to_string()),
            AuthError::Database(db) => db.into(),
            other @ (AuthError::Backpressure
            | AuthError::Cache(_)
            | AuthError::Internal(_)) => {
                tracing::error!(error = %other, "request failed");
                Self::internal()
            }
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(msg) => Self::not_found(msg),
            DatabaseError::DuplicateEntry(msg)
            | DatabaseError::ConstraintViolation(msg)
            | DatabaseError::InvalidInput(msg) => Self::bad_request(msg),
            DatabaseError::Connection(_) | DatabaseError::Other(_) => {
                tracing::error!(error = %err, "database request failed");
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorEnvelope {
                error: ErrorBody {
                    code: self.code,
                    message: &self.message,
                },
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_mapping() {
        assert_eq!(
            ApiError::from(AuthError::BadRequest("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(AuthError::InvalidToken("x".into())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(AuthError::InvalidCode("x".into())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(AuthError::Unauthorized("x".into())).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(AuthError::NotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::rate_limited().status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::from(AuthError::Backpressure).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_message_sanitised() {
        let err = ApiError::from(AuthError::Internal("secret detail".into()));
        assert_eq!(err.message, "An internal error occurred");
    }

    #[test]
    fn test_database_not_found_is_404() {
        let err = ApiError::from(AuthError::Database(DatabaseError::NotFound("user".into())));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
