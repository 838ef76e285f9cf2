//! Service definitions: identifiers, documents and the store that loads them.

use std::io;
use std::path::PathBuf;
use std::sync::PoisonError;

use thiserror::Error;

mod document;
mod identifier;
mod store;

pub use document::{
    LinkDef, LinkMethod, ObjectSchema, ParamSchema, ParamType, ResourceDef, SchemaDocument,
};
pub use identifier::{DEFAULT_PROVIDER, ServiceIdentifier};
pub use store::{SCHEMA_EXTENSIONS, SchemaStore};

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("no service definition for `{id}`: {reason}")]
    NotFound { id: String, reason: String },
    #[error("invalid service identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("malformed service definition `{}`: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },
    #[error("cannot read `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("poison error, a thread panicked while holding a lock")]
    PoisonError,
}

impl<T> From<PoisonError<T>> for SchemaError {
    fn from(_value: PoisonError<T>) -> Self {
        SchemaError::PoisonError
    }
}
