//! Live, authenticated channels to appliance hosts.

use std::fmt;
use std::sync::{Arc, PoisonError};

use http::{Request, Response, Uri};
use thiserror::Error;
use tracing::trace;
use url::Url;

use crate::auth::{AuthError, TokenAuthenticator};
use crate::http::http_client::clone_request;
use crate::http::{HttpClient, HttpClientError};

pub mod hook;
pub mod registry;

pub use hook::{ApplianceHook, ConnectionHook, DirectHook, HookKind};
pub use registry::ConnectionRegistry;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error(
        "appliance `{host}` runs unsupported software version `{version}`, minimum major version is {minimum}"
    )]
    UnsupportedVersion {
        host: String,
        version: String,
        minimum: u32,
    },
    #[error("appliance `{host}` reported an unreadable software version `{version}`")]
    InvalidVersion { host: String, version: String },
    #[error("appliance `{host}` info request failed: {reason}")]
    Info { host: String, reason: String },
    #[error("authentication with `{host}` failed: {source}")]
    Auth {
        host: String,
        #[source]
        source: AuthError,
    },
    #[error("request to `{host}` failed: {source}")]
    Transport {
        host: String,
        #[source]
        source: HttpClientError,
    },
    #[error("invalid host `{host}`: {reason}")]
    InvalidHost { host: String, reason: String },
    #[error("poison error, a thread panicked while holding a lock")]
    PoisonError,
}

impl<T> From<PoisonError<T>> for ConnectionError {
    fn from(_value: PoisonError<T>) -> Self {
        ConnectionError::PoisonError
    }
}

/// A long-lived channel to one appliance host.
///
/// Requests sent through a connection holding an authenticator carry the current token and
/// are transparently replayed once after a token refresh when the appliance answers `401`.
pub struct Connection {
    host: Url,
    authenticator: Option<Arc<TokenAuthenticator>>,
    tls_verify: bool,
    client: Arc<dyn HttpClient>,
}

impl Connection {
    pub fn new(
        host: Url,
        authenticator: Option<Arc<TokenAuthenticator>>,
        client: Arc<dyn HttpClient>,
        tls_verify: bool,
    ) -> Self {
        Self {
            host,
            authenticator,
            tls_verify,
            client,
        }
    }

    pub fn host(&self) -> &Url {
        &self.host
    }

    pub fn authenticator(&self) -> Option<&Arc<TokenAuthenticator>> {
        self.authenticator.as_ref()
    }

    pub fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// Resolves an absolute path against the connection host.
    pub fn uri(&self, path_and_query: &str) -> Result<Uri, ConnectionError> {
        let url = self
            .host
            .join(path_and_query)
            .map_err(|e| self.invalid_host(e.to_string()))?;
        Uri::try_from(url.as_str()).map_err(|e| self.invalid_host(e.to_string()))
    }

    /// Sends a request, authenticating it when the connection holds an authenticator.
    pub fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, ConnectionError> {
        let Some(authenticator) = self.authenticator.as_ref() else {
            return self.send_unauthenticated(request);
        };

        let request = authenticator
            .intercept(request, self.client.as_ref())
            .map_err(|e| self.auth_error(e))?;
        let response = self.send_unauthenticated(
            clone_request(&request).map_err(|e| self.transport_error(e))?,
        )?;
        authenticator
            .on_response(request, response, self.client.as_ref())
            .map_err(|e| self.auth_error(e))
    }

    /// Sends a request as is, without any token handling.
    pub fn send_unauthenticated(
        &self,
        request: Request<Vec<u8>>,
    ) -> Result<Response<Vec<u8>>, ConnectionError> {
        trace!(host = %self.host, uri = %request.uri(), "sending request");
        self.client
            .send(request)
            .map_err(|e| self.transport_error(e))
    }

    fn host_name(&self) -> String {
        self.host.origin().ascii_serialization()
    }

    fn invalid_host(&self, reason: String) -> ConnectionError {
        ConnectionError::InvalidHost {
            host: self.host_name(),
            reason,
        }
    }

    fn transport_error(&self, source: HttpClientError) -> ConnectionError {
        ConnectionError::Transport {
            host: self.host_name(),
            source,
        }
    }

    fn auth_error(&self, source: AuthError) -> ConnectionError {
        ConnectionError::Auth {
            host: self.host_name(),
            source,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host.as_str())
            .field("authenticator", &self.authenticator)
            .field("tls_verify", &self.tls_verify)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::auth::{ResponseHistory, TOKEN_PATH};
    use crate::http::http_client::test::{
        has_authorization, json_response, status_response, MockHttpClientMockall,
    };
    use assert_matches::assert_matches;
    use http::{header, StatusCode};
    use mockall::Sequence;
    use serde_json::json;

    fn connection(client: MockHttpClientMockall, auth: Option<TokenAuthenticator>) -> Connection {
        Connection::new(
            Url::parse("https://scc.example.com").unwrap(),
            auth.map(Arc::new),
            Arc::new(client),
            false,
        )
    }

    #[test]
    fn uri_is_resolved_against_host() {
        let conn = connection(MockHttpClientMockall::new(), None);
        assert_eq!(
            conn.uri("/api/cmc.stats/1.0/throughput?device=1").unwrap(),
            "https://scc.example.com/api/cmc.stats/1.0/throughput?device=1"
        );
    }

    #[test]
    fn unauthenticated_connection_sends_as_is() {
        let mut client = MockHttpClientMockall::new();
        client
            .expect_send()
            .once()
            .withf(|req| req.headers().get(header::AUTHORIZATION).is_none())
            .return_once(|_| Ok(status_response(StatusCode::UNAUTHORIZED)));

        let conn = connection(client, None);
        let request = Request::get(conn.uri("/api/x").unwrap()).body(Vec::new()).unwrap();

        // without authenticator a 401 is just a response
        let response = conn.send(request).unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn first_request_fetches_token_then_sends() {
        let mut client = MockHttpClientMockall::new();
        let mut seq = Sequence::new();
        client
            .expect_send()
            .once()
            .in_sequence(&mut seq)
            .withf(|req| req.uri().path() == TOKEN_PATH)
            .return_once(|_| Ok(json_response(StatusCode::OK, json!({"access_token": "abc"}))));
        client
            .expect_send()
            .once()
            .in_sequence(&mut seq)
            .withf(|req| has_authorization(req, "Bearer abc"))
            .return_once(|_| Ok(json_response(StatusCode::OK, json!([1, 2, 3]))));

        let conn = connection(client, Some(TokenAuthenticator::new("ACCESS123")));
        let request = Request::get(conn.uri("/api/x").unwrap()).body(Vec::new()).unwrap();

        let response = conn.send(request).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.extensions().get::<ResponseHistory>().is_none());
    }

    #[test]
    fn expired_token_is_refreshed_transparently() {
        let mut client = MockHttpClientMockall::new();
        let mut seq = Sequence::new();
        client
            .expect_send()
            .once()
            .in_sequence(&mut seq)
            .withf(|req| has_authorization(req, "Bearer old"))
            .return_once(|_| Ok(status_response(StatusCode::UNAUTHORIZED)));
        client
            .expect_send()
            .once()
            .in_sequence(&mut seq)
            .withf(|req| req.uri().path() == TOKEN_PATH)
            .return_once(|_| Ok(json_response(StatusCode::OK, json!({"access_token": "new"}))));
        client
            .expect_send()
            .once()
            .in_sequence(&mut seq)
            .withf(|req| {
                has_authorization(req, "Bearer new")
                    && req.body().as_slice() == b"{\"a\":1}"
            })
            .return_once(|_| Ok(json_response(StatusCode::OK, json!({"response_data": [1]}))));

        let auth = TokenAuthenticator::with_token("ACCESS123", "old").unwrap();
        let conn = connection(client, Some(auth));
        let request = Request::post(conn.uri("/api/x").unwrap())
            .body(b"{\"a\":1}".to_vec())
            .unwrap();

        let response = conn.send(request).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.extensions().get::<ResponseHistory>().unwrap().0.len(),
            2
        );
        let token = conn.authenticator().unwrap().token().unwrap().unwrap();
        assert_eq!(token.value(), "new");
    }

    #[test]
    fn transport_errors_carry_host() {
        let mut client = MockHttpClientMockall::new();
        client.should_not_send(HttpClientError::Timeout);

        let conn = connection(client, None);
        let request = Request::get(conn.uri("/api/x").unwrap()).body(Vec::new()).unwrap();

        assert_matches!(
            conn.send(request).unwrap_err(),
            ConnectionError::Transport { host, source: HttpClientError::Timeout }
                if host == "https://scc.example.com"
        );
    }
}
