//! # Common HTTP Configuration.

use http::header::{InvalidHeaderName, InvalidHeaderValue};
use http::{HeaderMap, HeaderName, HeaderValue};
use std::str::FromStr;
use std::time::Duration;

/// Default client timeout is 30 seconds
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Response bodies are read in full, whatever their size, unless a limit is configured.
pub const UNLIMITED_BODY_SIZE: u64 = u64::MAX;

/// A struct representing the configuration for the internal HTTP client.
///
/// Appliances commonly present self-signed certificates, so TLS verification
/// is disabled unless explicitly requested.
///
/// # Examples
///
/// Creating a new `HttpConfig` with the default settings:
///
/// ```rust
/// use scc_client::http::HttpConfig;
///
/// let config = HttpConfig::new();
/// assert!(!config.tls_verify());
/// ```
///
/// Adding custom headers to the configuration:
///
/// ```rust
/// use scc_client::http::HttpConfig;
///
/// let config = HttpConfig::new()
///     .with_headers(vec![("X-Requested-By", "scc-client")])
///     .unwrap();
/// ```
///
/// Setting a custom timeout and enabling certificate verification:
///
/// ```rust
/// use std::time::Duration;
/// use scc_client::http::HttpConfig;
///
/// let config = HttpConfig::new()
///     .with_timeout(Duration::from_secs(5))
///     .with_tls_verify(true);
/// assert_eq!(config.timeout(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub(super) headers: HeaderMap,
    pub(super) timeout: Duration,
    pub(super) tls_verify: bool,
    pub(super) max_body_size: u64,
}

/// An enumeration of potential errors related to the HTTP configuration.
#[derive(thiserror::Error, Debug)]
pub enum HttpConfigError {
    /// HTTP client with an invalid header value.
    #[error("`{0}`")]
    InvalidHeader(#[from] InvalidHeaderValue),
    /// HTTP client with an invalid header name.
    #[error("`{0}`")]
    InvalidHeaderName(#[from] InvalidHeaderName),
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpConfig {
    /// Construct a new `HttpConfig` with the default timeout and TLS verification disabled.
    pub fn new() -> Self {
        Self {
            headers: appliance_headers(),
            timeout: DEFAULT_CLIENT_TIMEOUT,
            tls_verify: false,
            max_body_size: UNLIMITED_BODY_SIZE,
        }
    }

    /// Optionally include custom headers into the HTTP requests.
    ///
    /// If the key already exists in the current header map, the new value will overwrite the old one.
    ///
    /// # Errors
    ///
    /// This function will return an error if the provided key or value is not valid.
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Result<Self, HttpConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (ref key, ref val) in headers {
            let _ = self
                .headers
                .insert(HeaderName::from_str(key.as_ref())?, val.as_ref().parse()?);
        }
        Ok(self)
    }

    /// Define a custom timeout bounding every HTTP call.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Enable or disable verification of the appliance TLS certificate.
    pub fn with_tls_verify(self, tls_verify: bool) -> Self {
        Self { tls_verify, ..self }
    }

    /// Largest response body accepted, in bytes. Longer bodies fail the call.
    pub fn with_max_body_size(self, max_body_size: u64) -> Self {
        Self {
            max_body_size,
            ..self
        }
    }

    /// Timeout applied to each HTTP call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the appliance certificate is verified.
    pub fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// Response body size limit in bytes.
    pub fn max_body_size(&self) -> u64 {
        self.max_body_size
    }

    /// Headers added to every request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// Returns a HeaderMap pre-populated with the headers every appliance call carries
fn appliance_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();

    headers.insert("Accept", HeaderValue::from_static("application/json"));
    headers.insert(
        "User-Agent",
        HeaderValue::from_static(concat!("scc-client/", env!("CARGO_PKG_VERSION"))),
    );

    headers
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config() {
        let http_config = HttpConfig::default();

        assert_eq!(http_config.timeout(), DEFAULT_CLIENT_TIMEOUT);
        assert!(!http_config.tls_verify());
        assert_eq!(http_config.max_body_size(), UNLIMITED_BODY_SIZE);
        assert_eq!(
            http_config.headers().get("Accept"),
            Some(&HeaderValue::from_static("application/json"))
        );
    }

    #[test]
    fn custom_headers_override_defaults() {
        let http_config = HttpConfig::new()
            .with_headers([("accept", "text/plain"), ("x-custom", "value")])
            .unwrap();

        assert_eq!(
            http_config.headers().get("Accept"),
            Some(&HeaderValue::from_static("text/plain"))
        );
        assert_eq!(
            http_config.headers().get("X-Custom"),
            Some(&HeaderValue::from_static("value"))
        );
    }

    #[test]
    fn invalid_header_name() {
        let res = HttpConfig::new().with_headers([("bad header", "value")]);
        assert!(matches!(res, Err(HttpConfigError::InvalidHeaderName(_))));
    }
}
