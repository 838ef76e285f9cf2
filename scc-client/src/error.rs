//! Crate-wide error type.
use std::sync::PoisonError;

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::connection::ConnectionError;
use crate::http::HttpClientError;
use crate::schema::SchemaError;
use crate::service::LinkError;

/// Result alias used across the client API.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned by [`ApplianceClient`](crate::ApplianceClient) and the layers below it.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("`{0}`")]
    Schema(#[from] SchemaError),
    #[error("`{0}`")]
    Connection(#[from] ConnectionError),
    #[error("`{0}`")]
    Link(#[from] LinkError),
    #[error("`{0}`")]
    Config(#[from] ConfigError),
    #[error("`{service}.{resource}.{link}` on `{host}` returned no data")]
    EmptyResponse {
        host: String,
        service: String,
        resource: String,
        link: String,
    },
    #[error("poison error, a thread panicked while holding a lock")]
    PoisonError,
}

impl<T> From<PoisonError<T>> for ClientError {
    fn from(_value: PoisonError<T>) -> Self {
        ClientError::PoisonError
    }
}

/// Coarse classification of a [`ClientError`], for callers that branch on the failure
/// category rather than on the exact variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SchemaNotFound,
    SchemaParse,
    UnsupportedVersion,
    /// The connection could not be established or the host is malformed.
    Connect,
    TokenFetch,
    Unauthorized,
    UnknownResource,
    UnknownLink,
    Validation,
    /// The appliance answered with an error status or an undecodable body.
    Status,
    Timeout,
    EmptyResponse,
    Transport,
    Config,
    Internal,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Schema(e) => match e {
                SchemaError::NotFound { .. } | SchemaError::InvalidIdentifier(_) => {
                    ErrorKind::SchemaNotFound
                }
                SchemaError::Parse { .. } | SchemaError::Io { .. } => ErrorKind::SchemaParse,
                SchemaError::PoisonError => ErrorKind::Internal,
            },
            ClientError::Connection(e) => connection_kind(e),
            ClientError::Link(e) => match e {
                LinkError::UnknownResource { .. } => ErrorKind::UnknownResource,
                LinkError::UnknownLink { .. } => ErrorKind::UnknownLink,
                LinkError::Validation { .. } => ErrorKind::Validation,
                LinkError::UnexpectedStatus { .. } | LinkError::Decode { .. } => ErrorKind::Status,
                LinkError::Send { source, .. } => connection_kind(source),
            },
            ClientError::Config(_) => ErrorKind::Config,
            ClientError::EmptyResponse { .. } => ErrorKind::EmptyResponse,
            ClientError::PoisonError => ErrorKind::Internal,
        }
    }

    /// True when the failure was caused by a request timeout, at any layer.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

fn connection_kind(error: &ConnectionError) -> ErrorKind {
    match error {
        ConnectionError::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
        ConnectionError::InvalidVersion { .. }
        | ConnectionError::Info { .. }
        | ConnectionError::InvalidHost { .. } => ErrorKind::Connect,
        ConnectionError::Auth { source, .. } => auth_kind(source),
        ConnectionError::Transport { source, .. } => transport_kind(source),
        ConnectionError::PoisonError => ErrorKind::Internal,
    }
}

fn auth_kind(error: &AuthError) -> ErrorKind {
    match error {
        AuthError::TokenRequest { source, .. } if source.is_timeout() => ErrorKind::Timeout,
        AuthError::TokenFetch { .. }
        | AuthError::TokenRequest { .. }
        | AuthError::InvalidToken(_) => ErrorKind::TokenFetch,
        AuthError::Unauthorized { .. } => ErrorKind::Unauthorized,
        AuthError::RelativeUri(_) => ErrorKind::Connect,
        AuthError::Transport(source) => transport_kind(source),
        AuthError::PoisonError => ErrorKind::Internal,
    }
}

fn transport_kind(error: &HttpClientError) -> ErrorKind {
    if error.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::Transport
    }
}
