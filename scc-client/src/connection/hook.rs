//! Strategies used by the registry to open a connection to a host.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use http::Request;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::{Connection, ConnectionError};
use crate::auth::TokenAuthenticator;
use crate::http::{HttpClient, HttpClientUreq, HttpConfig};

/// Path of the unauthenticated appliance information resource.
pub const INFO_PATH: &str = "/api/common/1.0/info";

/// Oldest appliance software major version this client talks to.
pub const MIN_SW_MAJOR_VERSION: u32 = 9;

/// Produces a live connection for a host, optionally validating the remote end first.
///
/// A hook only returns connections that are ready to be cached: any validation must happen
/// before `connect` returns.
pub trait ConnectionHook: Send + Sync {
    fn connect(
        &self,
        host: &Url,
        authenticator: Option<Arc<TokenAuthenticator>>,
    ) -> Result<Connection, ConnectionError>;
}

/// Connects without any validation. Used when the API is fronted by a service layer that
/// does not expose the appliance info resource.
pub struct DirectHook {
    client: Arc<dyn HttpClient>,
    tls_verify: bool,
}

impl DirectHook {
    pub fn new(config: HttpConfig) -> Self {
        let tls_verify = config.tls_verify();
        Self::with_client(Arc::new(HttpClientUreq::new(config)), tls_verify)
    }

    pub fn with_client(client: Arc<dyn HttpClient>, tls_verify: bool) -> Self {
        Self { client, tls_verify }
    }
}

impl ConnectionHook for DirectHook {
    fn connect(
        &self,
        host: &Url,
        authenticator: Option<Arc<TokenAuthenticator>>,
    ) -> Result<Connection, ConnectionError> {
        debug!(%host, tls_verify = self.tls_verify, "opening connection");
        Ok(Connection::new(
            host.clone(),
            authenticator,
            self.client.clone(),
            self.tls_verify,
        ))
    }
}

/// Connects to an appliance and checks once that its software version is supported.
pub struct ApplianceHook {
    direct: DirectHook,
    minimum_major: u32,
}

#[derive(Deserialize)]
struct ApplianceInfo {
    sw_version: Option<String>,
}

impl ApplianceHook {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            direct: DirectHook::new(config),
            minimum_major: MIN_SW_MAJOR_VERSION,
        }
    }

    pub fn with_client(client: Arc<dyn HttpClient>, tls_verify: bool) -> Self {
        Self {
            direct: DirectHook::with_client(client, tls_verify),
            minimum_major: MIN_SW_MAJOR_VERSION,
        }
    }

    fn check_version(&self, connection: &Connection) -> Result<(), ConnectionError> {
        let host = connection.host_name();
        let request = Request::get(connection.uri(INFO_PATH)?)
            .body(Vec::new())
            .map_err(|e| connection.transport_error(e.into()))?;

        let response = connection.send_unauthenticated(request)?;
        if !response.status().is_success() {
            return Err(ConnectionError::Info {
                host,
                reason: format!("unexpected status {}", response.status()),
            });
        }

        let version = serde_json::from_slice::<ApplianceInfo>(response.body())
            .map_err(|e| ConnectionError::Info {
                host: host.clone(),
                reason: e.to_string(),
            })?
            .sw_version
            .ok_or_else(|| ConnectionError::Info {
                host: host.clone(),
                reason: "response has no `sw_version`".to_string(),
            })?;

        let Some(major) = major_version(&version) else {
            return Err(ConnectionError::InvalidVersion { host, version });
        };

        if major < self.minimum_major {
            warn!(%host, %version, "appliance software version is not supported");
            return Err(ConnectionError::UnsupportedVersion {
                host,
                version,
                minimum: self.minimum_major,
            });
        }

        info!(%host, %version, "connected to appliance");
        Ok(())
    }
}

impl ConnectionHook for ApplianceHook {
    fn connect(
        &self,
        host: &Url,
        authenticator: Option<Arc<TokenAuthenticator>>,
    ) -> Result<Connection, ConnectionError> {
        let connection = self.direct.connect(host, authenticator)?;
        self.check_version(&connection)?;
        Ok(connection)
    }
}

/// Leading integer of a dotted version string, `"9.5.1"` gives `9`.
pub(crate) fn major_version(version: &str) -> Option<u32> {
    let digits: String = version
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// The connection hooks available to a client, selected by configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    /// Talk to the appliance directly and enforce the minimum software version.
    #[default]
    Appliance,
    /// Talk to a fronting service layer, no validation.
    Direct,
}

impl HookKind {
    pub fn build(self, config: HttpConfig) -> Box<dyn ConnectionHook> {
        match self {
            HookKind::Appliance => Box::new(ApplianceHook::new(config)),
            HookKind::Direct => Box::new(DirectHook::new(config)),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("unknown connection hook `{0}`, expected `appliance` or `direct`")]
pub struct UnknownHookError(String);

impl FromStr for HookKind {
    type Err = UnknownHookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "appliance" => Ok(HookKind::Appliance),
            "direct" => Ok(HookKind::Direct),
            other => Err(UnknownHookError(other.to_string())),
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Appliance => f.write_str("appliance"),
            HookKind::Direct => f.write_str("direct"),
        }
    }
}
