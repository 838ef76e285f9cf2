//! Client configuration, built in code or read from a YAML file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use url::Url;

use crate::auth::AuthCredential;
use crate::connection::HookKind;
use crate::http::{DEFAULT_CLIENT_TIMEOUT, HttpConfig};
use crate::schema::DEFAULT_PROVIDER;

/// Directory of the service definitions shipped with this crate.
pub const DEFAULT_SERVICEDEF_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/servicedef");

/// Service version requested when none is configured.
pub const DEFAULT_SERVICE_VERSION: &str = "1.0";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid host `{host}`: {reason}")]
    InvalidHost { host: String, reason: String },
    #[error("request timeout must be greater than zero")]
    ZeroTimeout,
}

/// Everything needed to build an [`ApplianceClient`](crate::ApplianceClient).
///
/// ```
/// use scc_client::ClientConfig;
///
/// let config = ClientConfig::from_yaml_str(
///     "host: https://scc.example.com\naccess_code: ACCESS123\ntimeout_secs: 10\n",
/// )
/// .unwrap();
/// assert_eq!(config.timeout(), std::time::Duration::from_secs(10));
///
/// let config = ClientConfig::from_yaml_str(
///     "host: https://scc.example.com\naccess_code: ACCESS123\ntimeout_secs: 2.5\n",
/// )
/// .unwrap();
/// assert_eq!(config.timeout(), std::time::Duration::from_millis(2500));
/// assert_eq!(config.version(), "1.0");
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    host: String,
    access_code: AuthCredential,
    #[serde(default = "default_provider")]
    provider: String,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default = "default_servicedef_dir")]
    servicedef_dir: PathBuf,
    #[serde(default)]
    hook: HookKind,
    #[serde(
        default = "default_timeout",
        rename = "timeout_secs",
        deserialize_with = "deserialize_seconds"
    )]
    timeout: Duration,
    #[serde(default)]
    tls_verify: bool,
    #[serde(default)]
    max_body_size: Option<u64>,
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

fn default_version() -> String {
    DEFAULT_SERVICE_VERSION.to_string()
}

fn default_servicedef_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SERVICEDEF_DIR)
}

fn default_timeout() -> Duration {
    DEFAULT_CLIENT_TIMEOUT
}

// whole or fractional seconds
fn deserialize_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, access_code: impl Into<AuthCredential>) -> Self {
        Self {
            host: host.into(),
            access_code: access_code.into(),
            provider: default_provider(),
            version: default_version(),
            servicedef_dir: default_servicedef_dir(),
            hook: HookKind::default(),
            timeout: default_timeout(),
            tls_verify: false,
            max_body_size: None,
        }
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.check_timeout()?;
        Ok(config)
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_servicedef_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.servicedef_dir = dir.into();
        self
    }

    pub fn with_hook(mut self, hook: HookKind) -> Self {
        self.hook = hook;
        self
    }

    /// Timeout of each HTTP call. Must be greater than zero, see [`ClientConfig::http_config`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Limits the size of response bodies, unlimited by default.
    pub fn with_max_body_size(mut self, max_body_size: u64) -> Self {
        self.max_body_size = Some(max_body_size);
        self
    }

    pub fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The host as a URL. Hosts given without a scheme are taken as `https`.
    pub fn host_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidHost {
            host: self.host.clone(),
            reason,
        };
        let host = if self.host.contains("://") {
            self.host.clone()
        } else {
            format!("https://{}", self.host)
        };
        let url = Url::parse(&host).map_err(|e| invalid(e.to_string()))?;
        if url.host_str().is_none() {
            return Err(invalid("no host name".to_string()));
        }
        Ok(url)
    }

    pub fn access_code(&self) -> &AuthCredential {
        &self.access_code
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn servicedef_dir(&self) -> &Path {
        &self.servicedef_dir
    }

    pub fn hook(&self) -> HookKind {
        self.hook
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// Transport settings derived from this configuration. Fails on a zero timeout.
    pub fn http_config(&self) -> Result<HttpConfig, ConfigError> {
        self.check_timeout()?;
        let config = HttpConfig::new()
            .with_timeout(self.timeout)
            .with_tls_verify(self.tls_verify);
        Ok(match self.max_body_size {
            Some(limit) => config.with_max_body_size(limit),
            None => config,
        })
    }

    fn check_timeout(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}
