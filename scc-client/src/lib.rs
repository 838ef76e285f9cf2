//! REST client library for SteelCentral Controller appliances.
//!
//! Services are described by YAML definitions (see `servicedef/`) and called by name:
//!
//! ```no_run
//! use scc_client::{ApplianceClient, ClientConfig, Criteria};
//!
//! let config = ClientConfig::new("https://scc.example.com", "ACCESS123");
//! let client = ApplianceClient::from_config(&config)?;
//! let criteria = Criteria::new()
//!     .with("device", "12345")
//!     .with("start_time", 1000)
//!     .with("end_time", 2000);
//! let rows = client.request("cmc.stats", "throughput", "report", Some(&criteria))?;
//! # Ok::<(), scc_client::ClientError>(())
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod http;
pub mod schema;
pub mod service;

mod criteria;
pub use criteria::Criteria;

pub mod error;
pub use error::{ClientError, ClientResult, ErrorKind};

pub mod client;
pub use client::*;

pub use config::ClientConfig;
