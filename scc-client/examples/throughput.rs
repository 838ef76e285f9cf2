//! Prints the throughput of one appliance over the last hour.
//!
//! ```text
//! SCC_HOST=https://scc.example.com SCC_ACCESS_CODE=... SCC_DEVICE=12345 \
//!     cargo run --example throughput
//! ```
//!
//! `SCC_CONFIG` may point to a YAML configuration file instead of `SCC_HOST` and
//! `SCC_ACCESS_CODE`. Set `LOG_LEVEL=debug` to follow the calls.
use std::env;
use std::process::ExitCode;
use std::time::{Duration, SystemTime};

use scc_client::{ApplianceClient, ClientConfig, ClientError, Criteria, ErrorKind};
use tracing::{error, info};

const SERVICE: &str = "cmc.stats";
const RESOURCE: &str = "throughput";
const LINK: &str = "report";
const VALUE_COLUMNS: [&str; 4] = ["wan_in", "wan_out", "lan_in", "lan_out"];

fn config() -> Result<ClientConfig, String> {
    if let Ok(path) = env::var("SCC_CONFIG") {
        return ClientConfig::from_yaml_file(path).map_err(|e| e.to_string());
    }
    let host = env::var("SCC_HOST").map_err(|_| "SCC_HOST is not set".to_string())?;
    let access_code =
        env::var("SCC_ACCESS_CODE").map_err(|_| "SCC_ACCESS_CODE is not set".to_string())?;
    Ok(ClientConfig::new(host, access_code))
}

fn run(config: &ClientConfig, device: String) -> Result<(), ClientError> {
    let client = ApplianceClient::from_config(config)?;

    let end = SystemTime::now();
    let criteria = Criteria::new()
        .with("device", device)
        .with_time("start_time", end - Duration::from_secs(3600))
        .with_time("end_time", end);

    let rows = client.request(SERVICE, RESOURCE, LINK, Some(&criteria))?;
    for row in rows.as_array().into_iter().flatten() {
        let values = row["data"].as_array().into_iter().flatten();
        let columns: Vec<String> = VALUE_COLUMNS
            .iter()
            .zip(values)
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        println!("{} {}", row["timestamp"], columns.join(" "));
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::metadata::LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .init();

    let config = match config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let device = env::var("SCC_DEVICE").unwrap_or_default();

    info!(host = config.host(), device = %device, "running throughput report");
    match run(&config, device) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.kind() == ErrorKind::EmptyResponse => {
            info!("no data returned for the requested range");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(kind = ?e.kind(), "{e}");
            ExitCode::FAILURE
        }
    }
}
