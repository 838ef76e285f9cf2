//! Registry and cache of service definitions.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::{SchemaDocument, SchemaError, ServiceIdentifier};

/// File extensions recognised as service definitions.
pub const SCHEMA_EXTENSIONS: [&str; 2] = ["yml", "yaml"];

/// Maps service names to definition files and caches each parsed document.
///
/// A document is read and parsed on its first load and the same `Arc` is handed out
/// afterwards. Failed loads are not cached.
#[derive(Debug, Default)]
pub struct SchemaStore {
    paths: HashMap<String, PathBuf>,
    documents: Mutex<HashMap<ServiceIdentifier, Arc<SchemaDocument>>>,
}

impl SchemaStore {
    /// An empty store, see [`SchemaStore::register`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `<dir>/<name>.yml` for each of the given service names.
    pub fn with_services<I, S>(dir: impl AsRef<Path>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dir = dir.as_ref();
        let mut store = Self::new();
        for name in names {
            let name = name.into();
            let path = dir.join(format!("{name}.{}", SCHEMA_EXTENSIONS[0]));
            store.register(name, path);
        }
        store
    }

    /// Registers every definition file found in `dir`, named after the file stem.
    pub fn discover(dir: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let dir = dir.as_ref();
        let io_error = |source: io::Error| SchemaError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut store = Self::new();
        for entry in fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            let is_schema = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| SCHEMA_EXTENSIONS.contains(&ext));
            if !is_schema {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                store.register(name.to_string(), path.clone());
            }
        }
        info!(dir = %dir.display(), services = store.paths.len(), "discovered service definitions");
        Ok(store)
    }

    /// Registers (or replaces) the definition file of a service.
    pub fn register(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        let name = name.into();
        let path = path.into();
        debug!(service = %name, path = %path.display(), "registered service definition");
        self.paths.insert(name, path);
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.paths.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the document for a service identifier, reading it on first use.
    pub fn load(&self, id: &ServiceIdentifier) -> Result<Arc<SchemaDocument>, SchemaError> {
        if let Some(document) = self.documents.lock()?.get(id) {
            return Ok(document.clone());
        }

        let not_found = |reason: String| SchemaError::NotFound {
            id: id.canonical(),
            reason,
        };
        let path = self
            .paths
            .get(id.name())
            .ok_or_else(|| not_found("no definition registered".to_string()))?;

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(not_found(format!("`{}` does not exist", path.display())));
            }
            Err(source) => {
                return Err(SchemaError::Io {
                    path: path.clone(),
                    source,
                });
            }
        };

        let parse_error = |reason: String| SchemaError::Parse {
            path: path.clone(),
            reason,
        };
        let document: SchemaDocument =
            serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?;
        document.check().map_err(|reason| parse_error(reason))?;

        // a definition for another version or provider does not serve this identifier
        if document.identifier() != *id {
            return Err(not_found(format!(
                "`{}` declares `{}`",
                path.display(),
                document.id
            )));
        }

        debug!(service = %id, path = %path.display(), "loaded service definition");
        // concurrent loaders parse independently, the first insert wins
        let document = self
            .documents
            .lock()?
            .entry(id.clone())
            .or_insert_with(|| Arc::new(document))
            .clone();
        Ok(document)
    }

    /// Same as [`SchemaStore::load`] from a canonical identifier string.
    pub fn load_by_id(&self, id: &str) -> Result<Arc<SchemaDocument>, SchemaError> {
        self.load(&id.parse()?)
    }
}
