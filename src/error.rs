//! Service error type / 服务错误类型

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::findex::{signature::SignatureError, CodecError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid callback signature")]
    InvalidSignature,

    #[error("malformed Findex payload: {0}")]
    Codec(#[from] CodecError),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown index for ID {0}")]
    UnknownIndex(String),

    #[error("Unknown project {0}")]
    UnknownProject(String),

    #[error("missing or malformed bearer token")]
    MissingBearer,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("identity provider error: {0}")]
    Provider(#[from] reqwest::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SignatureError> for Error {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::InvalidSignature => Error::InvalidSignature,
            SignatureError::InvalidSeed(_) => Error::Internal(err.to_string()),
            SignatureError::MissingSignature(_)
            | SignatureError::MissingTimestamp(_)
            | SignatureError::Expired { .. } => Error::BadRequest(err.to_string()),
        }
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Sqlx(_) | Error::Io(_) | Error::Provider(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::InvalidSignature | Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Codec(_) | Error::Json(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::UnknownIndex(_) => StatusCode::BAD_REQUEST,
            Error::UnknownProject(_) => StatusCode::NOT_FOUND,
            Error::MissingBearer => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("{}", self);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
