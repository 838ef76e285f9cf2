//! Binding of service definitions to live connections.

use std::sync::Arc;

use http::{Request, StatusCode, header};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;
use url::form_urlencoded;

use crate::auth::{ResponseHistory, TokenAuthenticator};
use crate::connection::{Connection, ConnectionError, ConnectionRegistry};
use crate::criteria::Criteria;
use crate::error::ClientResult;
use crate::schema::{LinkDef, ResourceDef, SchemaDocument, SchemaStore, ServiceIdentifier};

/// Longest response body excerpt kept in an error.
const BODY_EXCERPT_LEN: usize = 256;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("service `{service}` has no resource `{resource}`")]
    UnknownResource { service: String, resource: String },
    #[error("resource `{service}.{resource}` has no link `{link}`")]
    UnknownLink {
        service: String,
        resource: String,
        link: String,
    },
    #[error("invalid criteria for `{service}.{resource}.{link}`: {reason}")]
    Validation {
        service: String,
        resource: String,
        link: String,
        reason: String,
    },
    #[error("`{service}.{resource}.{link}` returned status {status}: {body}")]
    UnexpectedStatus {
        service: String,
        resource: String,
        link: String,
        status: StatusCode,
        body: String,
    },
    #[error("`{service}.{resource}.{link}` returned a body that is not JSON: {reason}")]
    Decode {
        service: String,
        resource: String,
        link: String,
        reason: String,
    },
    #[error("`{service}.{resource}.{link}` failed: {source}")]
    Send {
        service: String,
        resource: String,
        link: String,
        #[source]
        source: ConnectionError,
    },
}

/// Turns service identifiers into proxies bound to a host.
///
/// Both the schema store and the connection registry are shared: every resolver built from
/// the same pair reuses the same documents and the same per-host connections.
#[derive(Clone)]
pub struct ServiceResolver {
    schemas: Arc<SchemaStore>,
    connections: Arc<ConnectionRegistry>,
}

impl ServiceResolver {
    pub fn new(schemas: Arc<SchemaStore>, connections: Arc<ConnectionRegistry>) -> Self {
        Self {
            schemas,
            connections,
        }
    }

    pub fn schemas(&self) -> &Arc<SchemaStore> {
        &self.schemas
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Loads the service definition, then gets (or opens) the connection to `host`.
    ///
    /// The schema is loaded first so an unknown service never touches the network.
    pub fn resolve(
        &self,
        id: &ServiceIdentifier,
        host: &Url,
        authenticator: Option<Arc<TokenAuthenticator>>,
    ) -> ClientResult<ServiceProxy> {
        let schema = self.schemas.load(id)?;
        let connection = self.connections.get(host, authenticator)?;
        debug!(service = %id, host = %host, "resolved service");
        Ok(ServiceProxy { schema, connection })
    }
}

/// A service definition bound to a live connection.
#[derive(Clone, Debug)]
pub struct ServiceProxy {
    schema: Arc<SchemaDocument>,
    connection: Arc<Connection>,
}

impl ServiceProxy {
    pub fn schema(&self) -> &Arc<SchemaDocument> {
        &self.schema
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn bind(&self, resource: &str) -> Result<BoundResource<'_>, LinkError> {
        let def = self
            .schema
            .resource(resource)
            .ok_or_else(|| LinkError::UnknownResource {
                service: self.schema.name.clone(),
                resource: resource.to_string(),
            })?;
        Ok(BoundResource {
            proxy: self,
            name: resource.to_string(),
            def,
        })
    }
}

/// One resource of a [`ServiceProxy`], ready to have its links executed.
#[derive(Debug)]
pub struct BoundResource<'a> {
    proxy: &'a ServiceProxy,
    name: String,
    def: &'a ResourceDef,
}

/// Outcome of a link execution.
#[derive(Debug, Clone)]
pub struct LinkResponse {
    pub status: StatusCode,
    /// Decoded body, `Null` when the body was empty.
    pub data: Value,
    /// Whether the link declares a response shape.
    pub expects_data: bool,
    /// Hops taken to produce the response, empty unless a token refresh happened.
    pub history: ResponseHistory,
}

impl BoundResource<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn def(&self) -> &ResourceDef {
        self.def
    }

    /// Validates the criteria, sends the request and decodes the JSON response.
    pub fn execute(&self, link: &str, criteria: Option<&Criteria>) -> ClientResult<LinkResponse> {
        let empty = Criteria::new();
        let criteria = criteria.unwrap_or(&empty);

        let def = self.def.link(link).ok_or_else(|| LinkError::UnknownLink {
            service: self.service().to_string(),
            resource: self.name.clone(),
            link: link.to_string(),
        })?;
        def.validate(criteria)
            .map_err(|reason| self.validation_error(link, reason))?;

        let connection = &self.proxy.connection;
        let path_and_query = self.path_and_query(link, def, criteria)?;
        let mut builder = Request::builder()
            .method(http::Method::from(def.method))
            .uri(connection.uri(&path_and_query)?);

        let body = match json_body(def, criteria) {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                serde_json::to_vec(&body).map_err(|e| self.validation_error(link, e.to_string()))?
            }
            None => Vec::new(),
        };
        let request = builder
            .body(body)
            .map_err(|e| self.validation_error(link, e.to_string()))?;

        debug!(
            service = self.service(),
            resource = %self.name,
            link,
            method = def.method.as_str(),
            path = %path_and_query,
            "executing link"
        );
        let response = connection.send(request).map_err(|source| {
            warn!(service = self.service(), resource = %self.name, link, "{source}");
            LinkError::Send {
                service: self.service().to_string(),
                resource: self.name.clone(),
                link: link.to_string(),
                source,
            }
        })?;
        let status = response.status();
        let history = response
            .extensions()
            .get::<ResponseHistory>()
            .cloned()
            .unwrap_or_default();

        if !status.is_success() {
            warn!(service = self.service(), resource = %self.name, link, %status, "link failed");
            return Err(LinkError::UnexpectedStatus {
                service: self.service().to_string(),
                resource: self.name.clone(),
                link: link.to_string(),
                status,
                body: excerpt(response.body()),
            }
            .into());
        }

        let data = if response.body().iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(response.body()).map_err(|e| LinkError::Decode {
                service: self.service().to_string(),
                resource: self.name.clone(),
                link: link.to_string(),
                reason: e.to_string(),
            })?
        };

        Ok(LinkResponse {
            status,
            data,
            expects_data: def.expects_data(),
            history,
        })
    }

    fn service(&self) -> &str {
        &self.proxy.schema.name
    }

    fn validation_error(&self, link: &str, reason: String) -> LinkError {
        LinkError::Validation {
            service: self.service().to_string(),
            resource: self.name.clone(),
            link: link.to_string(),
            reason,
        }
    }

    // Fills the path placeholders and appends declared query parameters.
    fn path_and_query(
        &self,
        link: &str,
        def: &LinkDef,
        criteria: &Criteria,
    ) -> Result<String, LinkError> {
        let mut path = def.path.clone();
        let vars: Vec<&str> = def.path_vars().collect();
        for var in &vars {
            let Some(value) = criteria.get(var) else {
                continue;
            };
            let value = plain(value);
            if value.is_empty() || value.contains(['/', '?', '#']) {
                return Err(self.validation_error(
                    link,
                    format!("path variable `{var}` cannot be `{value}`"),
                ));
            }
            path = path.replace(&format!("{{{var}}}"), &value);
        }

        let mut query = form_urlencoded::Serializer::new(String::new());
        let mut has_query = false;
        for (key, value) in criteria {
            if vars.contains(&key.as_str()) || !def.params.contains_key(key) {
                continue;
            }
            query.append_pair(key, &plain(value));
            has_query = true;
        }

        if has_query {
            path.push('?');
            path.push_str(&query.finish());
        }
        Ok(path)
    }
}

// JSON body of a link: criteria not consumed by the path or the query.
fn json_body(def: &LinkDef, criteria: &Criteria) -> Option<Value> {
    def.request.as_ref()?;
    let vars: Vec<&str> = def.path_vars().collect();
    let fields = criteria
        .iter()
        .filter(|(key, _)| !def.params.contains_key(*key) && !vars.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Some(Value::Object(fields))
}

// Query and path rendering: strings unquoted, arrays comma separated.
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(plain).collect::<Vec<_>>().join(","),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.into_owned(),
    }
}
