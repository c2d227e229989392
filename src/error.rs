use axum::{
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("{0} already exists")]
    DuplicateKey(String),

    #[error("{0}")]
    Verification(VerificationFailure),

    #[error("No resource found")]
    NoResource,

    #[error("{0}")]
    PasswordHashError(#[from] password_hash::Error),

    #[error("{0}")]
    DatabaseError(#[from] mongodb::error::Error),

    #[error("{0}")]
    JWTError(#[from] jsonwebtoken::errors::Error),

    #[error("{0}")]
    Unauthorized(UnauthorizedType),

    #[error("You have no permission to access this resource")]
    Forbidden,

    #[error("{0}")]
    BSONSerError(#[from] bson::ser::Error),

    #[error("{0}")]
    BSONDeError(#[from] bson::de::Error),

    #[error("{1}")]
    CustomStr(StatusCode, &'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum UnauthorizedType {
    #[error("Wrong Email or Password")]
    WrongEmailOrPassword,

    #[error("Invalid access token")]
    InvalidAccessToken,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerificationFailure {
    #[error("No verification code has been issued")]
    NotPending,

    #[error("Verification code has expired")]
    Expired,

    #[error("Verification code is invalid")]
    InvalidCode,

    #[error("Account is already verified")]
    AlreadyVerified,

    #[error("Too many wrong verification codes, request a new one")]
    TooManyAttempts,

    #[error("A verification code was sent recently, try again later")]
    ResendTooSoon,
}

impl From<VerificationFailure> for Error {
    fn from(value: VerificationFailure) -> Self {
        Self::Verification(value)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Value>,
    pub r#type: String,
    pub message: String,
}

impl From<Error> for ErrorJson {
    fn from(err: Error) -> Self {
        let message = err.to_string();

        let r#type = err.to_string_variant();

        let errors = match err {
            Error::ValidationError(err) => serde_json::to_value(err).ok(),
            Error::DuplicateKey(field) => Some(serde_json::json!({ "field": field })),
            Error::Verification(..)
            | Error::NoResource
            | Error::PasswordHashError(..)
            | Error::DatabaseError(..)
            | Error::JWTError(..)
            | Error::BSONSerError(..)
            | Error::BSONDeError(..)
            | Error::Unauthorized(..)
            | Error::Forbidden
            | Error::CustomStr(..) => None,
        };

        Self {
            errors,
            message,
            r#type,
        }
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            Self::Verification(VerificationFailure::ResendTooSoon) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::ValidationError(..) | Self::Verification(..) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::DuplicateKey(..) => StatusCode::CONFLICT,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NoResource => StatusCode::NOT_FOUND,
            Self::PasswordHashError(..)
            | Self::DatabaseError(..)
            | Self::JWTError(..)
            | Self::BSONSerError(..)
            | Self::BSONDeError(..) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::CustomStr(code, ..) => *code,
        }
    }

    pub fn to_string_variant(&self) -> String {
        macro_rules! match_var {
            ($id:ident !) => {
                Self::$id
            };
            ($id:ident (..)) => {
                Self::$id(..)
            };
        }

        macro_rules! variant {
            ($($name:ident $tt:tt),+) => {
                match self {
                    $(
                        match_var!($name $tt) => {
                            stringify!($name)
                       }
                    )+
                }
            };
        }

        variant! {
            NoResource!,
            Forbidden!,
            ValidationError(..),
            DuplicateKey(..),
            Verification(..),
            PasswordHashError(..),
            DatabaseError(..),
            JWTError(..),
            BSONSerError(..),
            BSONDeError(..),
            Unauthorized(..),
            CustomStr(..)
        }
        .to_string()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!("error: {:?}", self);
        } else {
            tracing::debug!("rejected: {:?}", self);
        }

        let error = ErrorJson::from(self);

        (status, Json(error)).into_response()
    }
}

impl From<axum::extract::rejection::JsonRejection> for Error {
    fn from(value: axum::extract::rejection::JsonRejection) -> Self {
        let mut error = validator::ValidationError::new("body");
        error.message = Some(value.body_text().into());

        let mut errors = validator::ValidationErrors::new();
        errors.add("body", error);

        Self::ValidationError(errors)
    }
}

impl From<axum::extract::rejection::PathRejection> for Error {
    fn from(_value: axum::extract::rejection::PathRejection) -> Self {
        Self::NoResource
    }
}
