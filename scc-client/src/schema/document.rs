//! Parsed service definition documents.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::Value;

use super::identifier::{DEFAULT_PROVIDER, ServiceIdentifier};
use crate::criteria::Criteria;

/// A service definition: the resources a service exposes and how each of their links is called.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaDocument {
    /// Canonical identifier the document declares for itself.
    pub id: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceDef>,
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

impl SchemaDocument {
    pub fn identifier(&self) -> ServiceIdentifier {
        ServiceIdentifier::new(&self.provider, &self.name, &self.version)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceDef> {
        self.resources.get(name)
    }

    /// Checks the document is self-consistent: the declared `id` matches its name and every
    /// path variable of every link is declared as a parameter.
    pub(crate) fn check(&self) -> Result<(), String> {
        let expected = self.identifier().canonical();
        if self.id != expected {
            return Err(format!(
                "declared id `{}` does not match `{expected}`",
                self.id
            ));
        }

        for (resource_name, resource) in &self.resources {
            for (link_name, link) in &resource.links {
                for var in link.path_vars() {
                    if !link.params.contains_key(var) {
                        return Err(format!(
                            "link `{resource_name}.{link_name}` uses undeclared path variable `{var}`"
                        ));
                    }
                }
                if link.request.is_some() && !link.method.has_body() {
                    return Err(format!(
                        "link `{resource_name}.{link_name}` declares a request body on a {} link",
                        link.method.as_str()
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDef {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub links: BTreeMap<String, LinkDef>,
}

impl ResourceDef {
    pub fn link(&self, name: &str) -> Option<&LinkDef> {
        self.links.get(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LinkMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl LinkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkMethod::Get => "GET",
            LinkMethod::Post => "POST",
            LinkMethod::Put => "PUT",
            LinkMethod::Patch => "PATCH",
            LinkMethod::Delete => "DELETE",
        }
    }

    pub fn has_body(&self) -> bool {
        matches!(self, LinkMethod::Post | LinkMethod::Put | LinkMethod::Patch)
    }
}

impl From<LinkMethod> for http::Method {
    fn from(value: LinkMethod) -> Self {
        match value {
            LinkMethod::Get => http::Method::GET,
            LinkMethod::Post => http::Method::POST,
            LinkMethod::Put => http::Method::PUT,
            LinkMethod::Patch => http::Method::PATCH,
            LinkMethod::Delete => http::Method::DELETE,
        }
    }
}

/// One callable operation of a resource.
///
/// `path` is relative to the host and may hold `{var}` placeholders filled from the criteria.
/// Criteria named in `params` travel in the query string, criteria named in `request` travel
/// in the JSON body.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkDef {
    pub method: LinkMethod,
    pub path: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamSchema>,
    #[serde(default)]
    pub request: Option<ObjectSchema>,
    /// Shape of the returned data. Links declaring one are expected to return data.
    #[serde(default)]
    pub response: Option<Value>,
}

impl LinkDef {
    /// Placeholder names in `path`, in order of appearance.
    pub fn path_vars(&self) -> impl Iterator<Item = &str> {
        self.path.split('{').skip(1).filter_map(|rest| {
            rest.split_once('}').map(|(var, _)| var)
        })
    }

    pub fn expects_data(&self) -> bool {
        self.response.is_some()
    }

    /// Validates criteria against the link: every key must be declared (unless the request body
    /// accepts additional properties), required values must be present and every value must
    /// match its declared type.
    pub fn validate(&self, criteria: &Criteria) -> Result<(), String> {
        for (key, value) in criteria.iter() {
            let schema = self
                .params
                .get(key)
                .or_else(|| self.request.as_ref().and_then(|r| r.properties.get(key)));
            match schema {
                Some(schema) => schema
                    .check(value)
                    .map_err(|reason| format!("criterion `{key}` {reason}"))?,
                None if self.accepts_additional() => {}
                None => return Err(format!("unknown criterion `{key}`")),
            }
        }

        let required_params = self
            .params
            .iter()
            .filter(|(_, schema)| schema.required)
            .map(|(name, _)| name.as_str());
        let required_body = self
            .request
            .iter()
            .flat_map(|r| r.required.iter().map(String::as_str));
        let path_vars = self.path_vars();

        let missing: BTreeSet<&str> = required_params
            .chain(required_body)
            .chain(path_vars)
            .filter(|name| criteria.get(name).is_none())
            .collect();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.into_iter().collect();
            return Err(format!("missing required criteria `{}`", names.join("`, `")));
        }

        Ok(())
    }

    fn accepts_additional(&self) -> bool {
        self.request
            .as_ref()
            .is_some_and(|r| r.additional_properties)
    }
}

/// Schema of a JSON request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectSchema {
    #[serde(default)]
    pub properties: BTreeMap<String, ParamSchema>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub additional_properties: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    /// Seconds since the epoch, possibly fractional.
    Timestamp,
    Array,
    Object,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParamSchema {
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "enum")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default)]
    pub items: Option<Box<ParamSchema>>,
}

impl ParamSchema {
    fn check(&self, value: &Value) -> Result<(), String> {
        let matches = match self.kind {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Timestamp => value.as_f64().is_some_and(|t| t >= 0.0),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        };
        if !matches {
            return Err(format!("expected {}, got `{value}`", self.kind.as_str()));
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                return Err(format!("value `{value}` is not one of the allowed values"));
            }
        }

        if let (Some(items), Some(values)) = (&self.items, value.as_array()) {
            for (i, item) in values.iter().enumerate() {
                items.check(item).map_err(|reason| format!("item {i}: {reason}"))?;
            }
        }
        Ok(())
    }
}

impl ParamType {
    fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "a string",
            ParamType::Integer => "an integer",
            ParamType::Number => "a number",
            ParamType::Boolean => "a boolean",
            ParamType::Timestamp => "a non-negative timestamp",
            ParamType::Array => "an array",
            ParamType::Object => "an object",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    const DOCUMENT: &str = r#"
id: https://support.riverbed.com/apis/test.service/1.0
provider: riverbed
name: test.service
version: "1.0"
resources:
  widgets:
    links:
      get:
        method: GET
        path: /api/test.service/1.0/widgets/{serial}
        params:
          serial: { type: string, required: true }
          detail: { type: boolean }
        response: { type: object }
      report:
        method: POST
        path: /api/test.service/1.0/widgets/report
        request:
          properties:
            start_time: { type: timestamp }
            end_time: { type: timestamp }
            devices: { type: array, items: { type: integer } }
            traffic_type: { type: string, enum: [optimized, passthrough] }
          required: [start_time, end_time]
"#;

    fn document() -> SchemaDocument {
        serde_yaml::from_str(DOCUMENT).unwrap()
    }

    fn link(resource: &str, link: &str) -> LinkDef {
        document()
            .resource(resource)
            .unwrap()
            .link(link)
            .unwrap()
            .clone()
    }

    #[test]
    fn document_parses_and_checks() {
        let doc = document();
        assert_eq!(doc.identifier().canonical(), doc.id);
        assert_eq!(doc.check(), Ok(()));

        let get = link("widgets", "get");
        assert_eq!(get.method, LinkMethod::Get);
        assert_eq!(get.path_vars().collect::<Vec<_>>(), vec!["serial"]);
        assert!(get.expects_data());
        assert!(!link("widgets", "report").expects_data());
    }

    #[test]
    fn mismatched_id_is_rejected() {
        let mut doc = document();
        doc.version = "2.0".to_string();
        assert!(doc.check().unwrap_err().contains("does not match"));
    }

    #[test]
    fn undeclared_path_variable_is_rejected() {
        let mut doc = document();
        let resource = doc.resources.get_mut("widgets").unwrap();
        resource.links.get_mut("get").unwrap().params.clear();
        assert!(doc.check().unwrap_err().contains("`serial`"));
    }

    #[test]
    fn valid_criteria() {
        let criteria = Criteria::new()
            .with("start_time", 1000)
            .with("end_time", 2000.5)
            .with("devices", json!([1, 2]))
            .with("traffic_type", "optimized");
        assert_eq!(link("widgets", "report").validate(&criteria), Ok(()));

        let criteria = Criteria::new().with("serial", "A1B2C3");
        assert_eq!(link("widgets", "get").validate(&criteria), Ok(()));
    }

    #[test]
    fn invalid_criteria() {
        let report = link("widgets", "report");
        let cases = [
            (Criteria::new().with("start_time", 1), "missing required criteria `end_time`"),
            (
                Criteria::new().with("start_time", "now").with("end_time", 2),
                "expected a non-negative timestamp",
            ),
            (
                Criteria::new()
                    .with("start_time", 1)
                    .with("end_time", 2)
                    .with("devices", json!([1, "two"])),
                "item 1",
            ),
            (
                Criteria::new()
                    .with("start_time", 1)
                    .with("end_time", 2)
                    .with("traffic_type", "bogus"),
                "not one of the allowed values",
            ),
            (
                Criteria::new()
                    .with("start_time", 1)
                    .with("end_time", 2)
                    .with("colour", "blue"),
                "unknown criterion `colour`",
            ),
        ];
        for (criteria, expected) in cases {
            let reason = report.validate(&criteria).unwrap_err();
            assert!(reason.contains(expected), "{reason} should contain {expected}");
        }

        let reason = link("widgets", "get").validate(&Criteria::new()).unwrap_err();
        assert!(reason.contains("`serial`"));
    }

    #[test]
    fn additional_properties_are_accepted_when_declared() {
        let mut report = link("widgets", "report");
        report.request.as_mut().unwrap().additional_properties = true;
        let criteria = Criteria::new()
            .with("start_time", 1)
            .with("end_time", 2)
            .with("colour", "blue");
        assert_eq!(report.validate(&criteria), Ok(()));
    }
}
