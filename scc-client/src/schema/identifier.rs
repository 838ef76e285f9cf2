use std::fmt;
use std::str::FromStr;

use url::Url;

use super::SchemaError;

/// Provider of every service shipped with this crate.
pub const DEFAULT_PROVIDER: &str = "riverbed";

const RIVERBED_DOMAIN: &str = "support.riverbed.com";

/// Names one versioned service of one provider.
///
/// The canonical form is `https://<provider-domain>/apis/<name>/<version>`:
///
/// ```
/// use scc_client::schema::ServiceIdentifier;
///
/// let id = ServiceIdentifier::new("riverbed", "cmc.stats", "1.0");
/// assert_eq!(id.canonical(), "https://support.riverbed.com/apis/cmc.stats/1.0");
/// assert_eq!(id.canonical().parse::<ServiceIdentifier>().unwrap(), id);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceIdentifier {
    provider: String,
    name: String,
    version: String,
}

impl ServiceIdentifier {
    pub fn new(
        provider: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Bare service name, e.g. `cmc.stats`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn canonical(&self) -> String {
        format!(
            "https://{}/apis/{}/{}",
            provider_domain(&self.provider),
            self.name,
            self.version
        )
    }
}

// unknown providers use their own name as domain
fn provider_domain(provider: &str) -> &str {
    match provider {
        DEFAULT_PROVIDER => RIVERBED_DOMAIN,
        other => other,
    }
}

fn domain_provider(domain: &str) -> &str {
    match domain {
        RIVERBED_DOMAIN => DEFAULT_PROVIDER,
        other => other,
    }
}

impl fmt::Display for ServiceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for ServiceIdentifier {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SchemaError::InvalidIdentifier(s.to_string());

        let url = Url::parse(s).map_err(|_| invalid())?;
        let domain = url.host_str().ok_or_else(invalid)?;
        let segments: Vec<&str> = url
            .path_segments()
            .ok_or_else(invalid)?
            .filter(|segment| !segment.is_empty())
            .collect();

        match segments.as_slice() {
            ["apis", name, version] => Ok(ServiceIdentifier::new(
                domain_provider(domain),
                *name,
                *version,
            )),
            _ => Err(invalid()),
        }
    }
}
