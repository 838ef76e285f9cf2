//! # Synchronous HTTP transport for the appliance REST API.
mod config;
pub(crate) mod http_client;

// export public structs
pub use {
    config::HttpConfig, config::HttpConfigError, config::DEFAULT_CLIENT_TIMEOUT, config::UNLIMITED_BODY_SIZE,
    http_client::HttpClient, http_client::HttpClientError, http_client::HttpClientUreq,
};
