//! Runtime configuration, loaded from a TOML file with environment
//! overrides (`BROKER_*`), same pattern as the distribution client's own
//! `Settings`.

use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::ServerError;

#[derive(Debug, Deserialize)]
pub struct Log {
    pub level: String,
}

impl Log {
    fn defaults() -> config::Map<String, &'static str> {
        config::Map::from([("level".into(), "info")])
    }
}

#[derive(Debug, Deserialize)]
pub struct Tree {
    /// Path to the primary VSS spec file.
    pub spec_path: PathBuf,
    /// Directory scanned for `.json` overlay files, applied in
    /// lexicographic filename order (spec.md §3).
    #[serde(default)]
    pub overlay_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct Auth {
    /// PEM-encoded RSA public key used to verify `kuksa-vss` bearer
    /// tokens. The broker never holds a private key.
    pub public_key_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct Transport {
    pub http_bind_addr: String,
    pub grpc_bind_addr: String,
    /// Skip TLS entirely and serve plaintext WS/gRPC. Collaborator-grade
    /// transports only (spec.md §6 classifies WebSocket/TLS and gRPC
    /// transport as out-of-core-scope); real deployments set this false
    /// and provide `tls_cert_path`/`tls_key_path`.
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
}

impl Transport {
    fn defaults() -> config::Map<String, &'static str> {
        config::Map::from([
            ("http_bind_addr".into(), "0.0.0.0:8090"),
            ("grpc_bind_addr".into(), "0.0.0.0:8091"),
            ("insecure".into(), "false"),
        ])
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub log: Log,
    pub tree: Tree,
    pub auth: Auth,
    pub transport: Transport,
}

impl Settings {
    pub fn load(config_file: &str) -> Result<Self, ServerError> {
        let s = Config::builder()
            .set_default("log", Log::defaults())?
            .set_default("transport", Transport::defaults())?
            .add_source(File::with_name(config_file))
            .add_source(Environment::with_prefix("broker").separator("__"))
            .build()?;

        s.try_deserialize().map_err(ServerError::InvalidConfig)
    }
}

pub fn overlay_files(dir: &std::path::Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}
