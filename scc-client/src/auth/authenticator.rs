//! OAuth2 style authentication against the appliance token resource.
//!
//! The authenticator exchanges an access code (generated from the appliance web UI) for a
//! short-lived token, attaches it to every outgoing request, and transparently refreshes it
//! once when the appliance answers `401 Unauthorized`.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use base64::{engine::general_purpose::URL_SAFE, Engine};
use http::{header, HeaderValue, Method, Request, Response, StatusCode, Uri};
use rand::distributions::{Alphanumeric, DistString};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::token::{Token, TokenError};
use crate::http::{HttpClient, HttpClientError};

/// Path of the token resource, relative to the appliance host.
pub const TOKEN_PATH: &str = "/api/common/1.0/oauth/token";

const GRANT_TYPE: &str = "access_code";
const STATE_LEN: usize = 10;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token request to `{uri}` failed: {reason}")]
    TokenFetch { uri: String, reason: String },
    #[error("token request to `{uri}` could not be sent: {source}")]
    TokenRequest {
        uri: String,
        #[source]
        source: HttpClientError,
    },
    #[error("`{0}`")]
    InvalidToken(#[from] TokenError),
    #[error("request to `{uri}` is still unauthorized after refreshing the token")]
    Unauthorized { uri: String },
    #[error("request uri `{0}` has no scheme or authority")]
    RelativeUri(String),
    #[error("`{0}`")]
    Transport(#[from] HttpClientError),
    #[error("poison error, a thread panicked while holding a lock")]
    PoisonError,
}

impl<T> From<PoisonError<T>> for AuthError {
    fn from(_value: PoisonError<T>) -> Self {
        AuthError::PoisonError
    }
}

/// Access code obtained out-of-band. It is only ever sent inside the token assertion.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct AuthCredential(String);

impl AuthCredential {
    pub fn new(access_code: impl Into<String>) -> Self {
        Self(access_code.into())
    }

    // assertion format: <base64url header>.<access code>.<empty signature>
    fn assertion(&self) -> String {
        format!("{}.{}.", URL_SAFE.encode(r#"{"alg":"none"}"#), self.0)
    }
}

impl From<&str> for AuthCredential {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AuthCredential {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthCredential(<redacted>)")
    }
}

/// One hop of a request that went through the refresh protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub method: Method,
    pub uri: Uri,
    pub status: StatusCode,
}

impl HistoryEntry {
    fn new<B, C>(request: &Request<B>, response: &Response<C>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            status: response.status(),
        }
    }
}

/// Responses that preceded the final one, oldest first. Attached as a response extension
/// whenever the token had to be refreshed: the rejected request, then the token request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseHistory(pub Vec<HistoryEntry>);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Holds the access credential and the current token for a single appliance login.
///
/// Two authenticators built from the same credential compare equal, so a cached connection
/// is reused when a caller constructs a fresh authenticator.
pub struct TokenAuthenticator {
    credential: AuthCredential,
    token: RwLock<Option<Token>>,
}

impl TokenAuthenticator {
    pub fn new(credential: impl Into<AuthCredential>) -> Self {
        Self {
            credential: credential.into(),
            token: RwLock::new(None),
        }
    }

    /// Starts from a previously obtained token instead of fetching one on first use.
    pub fn with_token(
        credential: impl Into<AuthCredential>,
        token: &str,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            credential: credential.into(),
            token: RwLock::new(Some(token.parse()?)),
        })
    }

    pub fn credential(&self) -> &AuthCredential {
        &self.credential
    }

    /// The token currently held, if any.
    pub fn token(&self) -> Result<Option<Token>, AuthError> {
        Ok(self.token.read()?.clone())
    }

    /// Prepares an outgoing request, fetching a token first if none is held yet.
    pub fn intercept(
        &self,
        mut request: Request<Vec<u8>>,
        client: &dyn HttpClient,
    ) -> Result<Request<Vec<u8>>, AuthError> {
        if self.token()?.is_none() {
            self.fetch_token(request.uri(), client)?;
        }
        self.authorize(&mut request)?;
        debug!(method = %request.method(), uri = %request.uri(), "making initial request");
        Ok(request)
    }

    /// Handles the reply to an intercepted request.
    ///
    /// A `401` triggers a single token refresh followed by one replay of `request`. A second
    /// `401` is returned as [`AuthError::Unauthorized`]. Any other response is passed through.
    pub fn on_response(
        &self,
        mut request: Request<Vec<u8>>,
        response: Response<Vec<u8>>,
        client: &dyn HttpClient,
    ) -> Result<Response<Vec<u8>>, AuthError> {
        debug!(uri = %request.uri(), status = %response.status(), "got response");
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let mut history = vec![HistoryEntry::new(&request, &response)];
        // release the rejected response before talking to the token resource
        drop(response);

        let (_, token_entry) = self.refresh(request.uri(), client)?;
        history.push(token_entry);
        self.authorize(&mut request)?;

        debug!(method = %request.method(), uri = %request.uri(), "re-issuing request");
        let uri = request.uri().to_string();
        let mut replayed = client.send(request)?;
        if replayed.status() == StatusCode::UNAUTHORIZED {
            warn!(%uri, "request rejected again after token refresh");
            return Err(AuthError::Unauthorized { uri });
        }

        replayed.extensions_mut().insert(ResponseHistory(history));
        Ok(replayed)
    }

    /// Exchanges the access code for a new token on the host `uri` points at, replacing
    /// any token held so far.
    pub fn fetch_token(&self, uri: &Uri, client: &dyn HttpClient) -> Result<Token, AuthError> {
        let (token, _) = self.refresh(uri, client)?;
        Ok(token)
    }

    fn refresh(
        &self,
        uri: &Uri,
        client: &dyn HttpClient,
    ) -> Result<(Token, HistoryEntry), AuthError> {
        let token_uri = token_uri(uri)?;
        let request = Request::post(token_uri.clone())
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            )
            .body(self.token_request_body().into_bytes())
            .map_err(HttpClientError::from)?;

        debug!(uri = %token_uri, "requesting access token");
        let response = client
            .send(request)
            .map_err(|source| AuthError::TokenRequest {
                uri: token_uri.to_string(),
                source,
            })?;

        let entry = HistoryEntry {
            method: Method::POST,
            uri: token_uri.clone(),
            status: response.status(),
        };

        if !response.status().is_success() {
            return Err(AuthError::TokenFetch {
                uri: token_uri.to_string(),
                reason: format!("unexpected status {}", response.status()),
            });
        }

        let access_token = serde_json::from_slice::<TokenResponse>(response.body())
            .map_err(|e| AuthError::TokenFetch {
                uri: token_uri.to_string(),
                reason: format!("invalid token response: {e}"),
            })?
            .access_token
            .ok_or_else(|| AuthError::TokenFetch {
                uri: token_uri.to_string(),
                reason: "response has no `access_token`".to_string(),
            })?;

        let token: Token = access_token.parse()?;
        debug!(kind = %token.kind(), "obtained access token");
        *self.token.write()? = Some(token.clone());

        Ok((token, entry))
    }

    fn token_request_body(&self) -> String {
        let state = Alphanumeric.sample_string(&mut rand::thread_rng(), STATE_LEN);
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", GRANT_TYPE)
            .append_pair("assertion", &self.credential.assertion())
            .append_pair("state", &state)
            .finish()
    }

    fn authorize(&self, request: &mut Request<Vec<u8>>) -> Result<(), AuthError> {
        if let Some(token) = self.token.read()?.as_ref() {
            let value = HeaderValue::from_str(&token.authorization())
                .map_err(|e| HttpClientError::from(http::Error::from(e)))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }
        Ok(())
    }
}

impl PartialEq for TokenAuthenticator {
    fn eq(&self, other: &Self) -> bool {
        self.credential == other.credential
    }
}

impl fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

fn token_uri(uri: &Uri) -> Result<Uri, AuthError> {
    match (uri.scheme(), uri.authority()) {
        (Some(scheme), Some(authority)) => Uri::builder()
            .scheme(scheme.clone())
            .authority(authority.clone())
            .path_and_query(TOKEN_PATH)
            .build()
            .map_err(|e| AuthError::Transport(e.into())),
        _ => Err(AuthError::RelativeUri(uri.to_string())),
    }
}
