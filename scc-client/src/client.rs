//! High level entry point: one client per appliance host.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, error, info};
use url::Url;

use crate::auth::TokenAuthenticator;
use crate::config::ClientConfig;
use crate::connection::ConnectionRegistry;
use crate::criteria::Criteria;
use crate::error::{ClientError, ClientResult};
use crate::schema::{SchemaStore, ServiceIdentifier};
use crate::service::{ServiceProxy, ServiceResolver};

/// Key under which appliances wrap response payloads.
pub const RESPONSE_DATA_KEY: &str = "response_data";

/// Calls services of one appliance by name.
///
/// Each service is resolved on first use and the proxy is kept for later calls. Clients
/// created from the same [`ServiceResolver`] share schema documents and connections, so two
/// clients for one host talk through a single connection.
pub struct ApplianceClient {
    host: Url,
    authenticator: Arc<TokenAuthenticator>,
    provider: String,
    version: String,
    resolver: ServiceResolver,
    proxies: Mutex<HashMap<String, Arc<ServiceProxy>>>,
}

impl ApplianceClient {
    /// Builds a client using shared schema and connection registries.
    pub fn new(config: &ClientConfig, resolver: ServiceResolver) -> ClientResult<Self> {
        Ok(Self {
            host: config.host_url()?,
            authenticator: Arc::new(TokenAuthenticator::new(config.access_code().clone())),
            provider: config.provider().to_string(),
            version: config.version().to_string(),
            resolver,
            proxies: Mutex::new(HashMap::new()),
        })
    }

    /// Builds a standalone client with its own registries, discovering service definitions in
    /// the configured directory.
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let schemas = SchemaStore::discover(config.servicedef_dir())?;
        let connections = ConnectionRegistry::new(config.hook().build(config.http_config()?));
        Self::new(
            config,
            ServiceResolver::new(Arc::new(schemas), Arc::new(connections)),
        )
    }

    /// Replaces the authenticator, e.g. one seeded with
    /// [`TokenAuthenticator::with_token`].
    pub fn with_authenticator(mut self, authenticator: Arc<TokenAuthenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn host(&self) -> &Url {
        &self.host
    }

    pub fn authenticator(&self) -> &Arc<TokenAuthenticator> {
        &self.authenticator
    }

    /// Identifier of a service name under this client's provider and version.
    pub fn service_id(&self, service: &str) -> ServiceIdentifier {
        ServiceIdentifier::new(&self.provider, service, &self.version)
    }

    /// The proxy for a service, resolving it on first use.
    pub fn service(&self, service: &str) -> ClientResult<Arc<ServiceProxy>> {
        if let Some(proxy) = self.proxies.lock()?.get(service) {
            return Ok(proxy.clone());
        }

        let id = self.service_id(service);
        let proxy = self
            .resolver
            .resolve(&id, &self.host, Some(self.authenticator.clone()))
            .inspect_err(|e| error!(service = %id, host = %self.host, "{e}"))?;

        debug!(service = %id, host = %self.host, "caching service proxy");
        let proxy = self
            .proxies
            .lock()?
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(proxy))
            .clone();
        Ok(proxy)
    }

    /// Executes `link` of `resource` in `service` and returns the unwrapped payload.
    ///
    /// A `{"response_data": ...}` envelope is removed; any other body is returned as is. Links
    /// declaring a response shape fail with [`ClientError::EmptyResponse`] when the payload is
    /// empty.
    pub fn request(
        &self,
        service: &str,
        resource: &str,
        link: &str,
        criteria: Option<&Criteria>,
    ) -> ClientResult<Value> {
        let proxy = self.service(service)?;
        let response = proxy.bind(resource)?.execute(link, criteria)?;

        if !response.history.0.is_empty() {
            info!(
                service,
                resource,
                link,
                hops = response.history.0.len(),
                "request succeeded after token refresh"
            );
        }

        let data = unwrap_envelope(response.data);
        if response.expects_data && is_empty(&data) {
            return Err(ClientError::EmptyResponse {
                host: self.host.origin().ascii_serialization(),
                service: service.to_string(),
                resource: resource.to_string(),
                link: link.to_string(),
            });
        }
        Ok(data)
    }
}

/// Removes the `response_data` envelope when present.
pub fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key(RESPONSE_DATA_KEY) => map
            .remove(RESPONSE_DATA_KEY)
            .unwrap_or(Value::Null),
        other => other,
    }
}

fn is_empty(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
