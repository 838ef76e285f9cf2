//! # Synchronous HTTP Client Module
//!
//! Blocking transport used by every appliance call. HTTP error statuses are handed back
//! as regular responses so the authentication layer can react to them.
use std::io;

use http::{Request, Response};
use tracing::trace;
use ureq::tls::TlsConfig;

use crate::http::HttpConfig;

/// An enumeration of potential errors related to the HTTP client.
#[derive(thiserror::Error, Debug)]
pub enum HttpClientError {
    /// The call exceeded the configured timeout.
    #[error("request timed out")]
    Timeout,
    /// Represents ureq crate error.
    #[error("`{0}`")]
    UreqError(String),
    /// Represents an io reader error.
    #[error("`{0}`")]
    IOError(#[from] io::Error),
    /// Represents an http crate build or consume body error.
    #[error("`{0}`")]
    HTTPBodyError(#[from] http::Error),
}

impl HttpClientError {
    /// Returns true when the error was caused by the request timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            HttpClientError::Timeout => true,
            HttpClientError::IOError(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

impl From<ureq::Error> for HttpClientError {
    fn from(value: ureq::Error) -> Self {
        match value {
            ureq::Error::Timeout(_) => HttpClientError::Timeout,
            ureq::Error::Io(e) if e.kind() == io::ErrorKind::TimedOut => HttpClientError::Timeout,
            e => HttpClientError::UreqError(e.to_string()),
        }
    }
}

/// A synchronous trait that defines how requests reach the appliance.
pub trait HttpClient: Send + Sync {
    /// Sends the request and returns the full response, whatever its status code.
    fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, HttpClientError>;
}

/// An implementation of the `HttpClient` trait using the ureq library.
pub struct HttpClientUreq {
    client: ureq::Agent,
    config: HttpConfig,
}

impl HttpClientUreq {
    /// Construct a new `HttpClientUreq` from the given `HttpConfig`.
    pub fn new(config: HttpConfig) -> Self {
        Self {
            client: ureq::Agent::from(&config),
            config,
        }
    }

    /// The configuration this client was built from.
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }
}

/// Implement From trait to create a ureq::Agent from HttpConfig
impl From<&HttpConfig> for ureq::Agent {
    fn from(value: &HttpConfig) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(value.timeout))
            .http_status_as_error(false)
            .tls_config(
                TlsConfig::builder()
                    .disable_verification(!value.tls_verify)
                    .build(),
            )
            .build();
        ureq::Agent::new_with_config(config)
    }
}

impl HttpClient for HttpClientUreq {
    fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, HttpClientError> {
        let (mut parts, body) = request.into_parts();

        for (name, value) in self.config.headers.iter() {
            if !parts.headers.contains_key(name) {
                parts.headers.insert(name.clone(), value.clone());
            }
        }

        trace!(method = %parts.method, uri = %parts.uri, "sending request");

        let response = if body.is_empty() {
            self.client.run(Request::from_parts(parts, ()))?
        } else {
            self.client.run(Request::from_parts(parts, body))?
        };

        build_response(response, self.config.max_body_size)
    }
}

fn build_response(
    response: Response<ureq::Body>,
    max_body_size: u64,
) -> Result<Response<Vec<u8>>, HttpClientError> {
    let (parts, mut body) = response.into_parts();
    let buf = body.with_config().limit(max_body_size).read_to_vec()?;
    Ok(Response::from_parts(parts, buf))
}

/// Copies a request so it can be sent again.
pub(crate) fn clone_request(request: &Request<Vec<u8>>) -> Result<Request<Vec<u8>>, HttpClientError> {
    let mut builder = Request::builder()
        .method(request.method().clone())
        .uri(request.uri().clone())
        .version(request.version());
    if let Some(headers) = builder.headers_mut() {
        headers.extend(
            request
                .headers()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }
    Ok(builder.body(request.body().clone())?)
}

#[cfg(test)]
pub(crate) mod test {
    use http::{response::Builder, StatusCode};
    use httpmock::prelude::*;
    use mockall::mock;
    use std::time::Duration;

    use super::*;

    #[test]
    fn returns_error_statuses_as_responses() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/common/1.0/info");
            then.status(401).body("unauthorized");
        });

        let client = HttpClientUreq::new(HttpConfig::new());
        let request = Request::get(server.url("/api/common/1.0/info"))
            .body(Vec::new())
            .unwrap();

        let response = client.send(request).unwrap();
        mock.assert();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.body().as_slice(), b"unauthorized");
    }

    #[test]
    fn default_headers_are_sent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/echo")
                .header("accept", "application/json")
                .header("x-custom", "5UP4H-K3Y")
                .body("payload");
            then.status(200).body("{}");
        });

        let config = HttpConfig::new()
            .with_headers([("x-custom", "5UP4H-K3Y")])
            .unwrap();
        let client = HttpClientUreq::new(config);
        let request = Request::post(server.url("/echo"))
            .body(b"payload".to_vec())
            .unwrap();

        let response = client.send(request).unwrap();
        mock.assert();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn slow_server_times_out() {
        let server = MockServer::start();
        let _slow = server.mock(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_secs(3));
        });

        let client = HttpClientUreq::new(HttpConfig::new().with_timeout(Duration::from_millis(200)));
        let request = Request::get(server.url("/slow")).body(Vec::new()).unwrap();

        let err = client.send(request).unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err}");
    }

    #[test]
    fn large_bodies_are_read_in_full() {
        // above ureq's own 10 MiB default
        let body = "x".repeat(12 * 1024 * 1024);
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/large");
            then.status(200).body(&body);
        });

        let client = HttpClientUreq::new(HttpConfig::new());
        let request = Request::get(server.url("/large")).body(Vec::new()).unwrap();

        let response = client.send(request).unwrap();
        mock.assert();
        assert_eq!(response.body().len(), body.len());
    }

    #[test]
    fn configured_body_limit_is_enforced() {
        let server = MockServer::start();
        let _large = server.mock(|when, then| {
            when.method(GET).path("/large");
            then.status(200).body("x".repeat(2048));
        });

        let client = HttpClientUreq::new(HttpConfig::new().with_max_body_size(1024));
        let request = Request::get(server.url("/large")).body(Vec::new()).unwrap();

        let err = client.send(request).unwrap_err();
        assert!(!err.is_timeout(), "unexpected error: {err}");
    }

    #[test]
    fn cloned_request_keeps_headers_and_body() {
        let request = Request::post("https://scc.example.com/api/x")
            .header("authorization", "Bearer abc")
            .body(b"body".to_vec())
            .unwrap();

        let copy = clone_request(&request).unwrap();
        assert_eq!(copy.method(), request.method());
        assert_eq!(copy.uri(), request.uri());
        assert_eq!(copy.headers(), request.headers());
        assert_eq!(copy.body(), request.body());
    }

    /////////////////////////////////////////////
    // Test helpers & mocks
    /////////////////////////////////////////////

    mock! {
      pub(crate) HttpClientMockall {}

        impl HttpClient for HttpClientMockall {
            fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, HttpClientError>;
        }
    }

    impl MockHttpClientMockall {
        pub(crate) fn should_send(&mut self, response: Response<Vec<u8>>) {
            self.expect_send().once().return_once(move |_| Ok(response));
        }

        #[allow(dead_code)]
        pub(crate) fn should_not_send(&mut self, error: HttpClientError) {
            self.expect_send().once().return_once(move |_| Err(error));
        }
    }

    // Create a response carrying the given JSON document
    pub(crate) fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Vec<u8>> {
        Builder::new()
            .status(status)
            .header("content-type", "application/json")
            .body(serde_json::to_vec(&body).unwrap())
            .unwrap()
    }

    // Matcher helper: true when the request carries exactly this Authorization value
    pub(crate) fn has_authorization(request: &Request<Vec<u8>>, value: &str) -> bool {
        request
            .headers()
            .get(http::header::AUTHORIZATION)
            .is_some_and(|v| v == value)
    }

    // Create an empty response with the given status code
    pub(crate) fn status_response(status: StatusCode) -> Response<Vec<u8>> {
        Builder::new().status(status).body(Vec::new()).unwrap()
    }
}
