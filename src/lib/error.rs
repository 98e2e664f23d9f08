use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetaError>;

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cannot reach metadata store: {0}")]
    StoreConnectivity(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("aggregation of dimension '{dimension}' failed: {message}")]
    Composition { dimension: String, message: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for MetaError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for MetaError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

impl IntoResponse for MetaError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Config(_) => StatusCode::BAD_REQUEST,
            Self::StoreConnectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Query(_) | Self::Composition { .. } | Self::Io(_) | Self::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = self.to_string();
        (status, Json(ErrorBody { message: &message })).into_response()
    }
}
