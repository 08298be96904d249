//! Binary entry point: load configuration, build the core collaborators
//! once, then serve the WebSocket/HTTP and gRPC transports concurrently
//! against the same `RequestProcessor` (spec.md §5: "one tree, one
//! subscription engine, many transports").

mod error;
mod publisher;
mod registry;
mod settings;
mod transport;

use std::sync::Arc;

use broker_core::processor::RequestProcessor;
use broker_core::subscription::SubscriptionEngine;
use broker_core::token::TokenVerifier;
use broker_core::tree::TreeStore;
use clap::Parser;

use crate::error::ServerError;
use crate::publisher::LoggingPublisher;
use crate::registry::ConnectionRegistry;
use crate::settings::{overlay_files, Settings};
use crate::transport::grpc::GrpcService;
use crate::transport::{http, AppState};

/// A hierarchical vehicle-signal broker.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "broker.toml")]
    config: String,

    /// Override `transport.http_bind_addr`.
    #[arg(long)]
    http_bind: Option<String>,

    /// Override `transport.grpc_bind_addr`.
    #[arg(long)]
    grpc_bind: Option<String>,

    /// Serve both transports over plaintext, skipping TLS entirely.
    #[arg(long)]
    insecure: bool,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    // rustls 0.23 requires a process-wide default crypto provider before any
    // TLS config is built; `ring` is the only backend this workspace links.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = Args::parse();
    let mut settings = Settings::load(&args.config)?;
    if let Some(addr) = args.http_bind {
        settings.transport.http_bind_addr = addr;
    }
    if let Some(addr) = args.grpc_bind {
        settings.transport.grpc_bind_addr = addr;
    }
    if args.insecure {
        settings.transport.insecure = true;
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .with_max_level(parse_level(&settings.log.level))
        .init();

    tracing::info!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    if !settings.transport.insecure
        && (settings.transport.tls_cert_path.is_none() || settings.transport.tls_key_path.is_none())
    {
        tracing::warn!(
            "no tls_cert_path/tls_key_path configured and insecure=false; gRPC will run \
             without transport security and WebSocket/HTTP always does in this crate \
             (terminate TLS at a reverse proxy for a production deployment)"
        );
    }

    let overlays = settings
        .tree
        .overlay_dir
        .as_deref()
        .map(overlay_files)
        .transpose()?
        .unwrap_or_default();
    let tree = Arc::new(TreeStore::init(&settings.tree.spec_path, &overlays)?);

    let key_pem = std::fs::read(&settings.auth.public_key_path)?;
    let tokens = TokenVerifier::from_rsa_pem(&key_pem)?;

    let subscriptions = SubscriptionEngine::spawn();
    let registry = ConnectionRegistry::default();
    let processor = Arc::new(RequestProcessor::new(
        tree,
        tokens,
        subscriptions,
        Arc::new(LoggingPublisher),
        Arc::new(registry.clone()),
    ));

    let state = AppState::new(processor, registry);

    let http_addr: std::net::SocketAddr = settings.transport.http_bind_addr.parse()?;
    let grpc_addr: std::net::SocketAddr = settings.transport.grpc_bind_addr.parse()?;

    let http_app = http::make_app(state.clone());
    let http_server = async move {
        let listener = tokio::net::TcpListener::bind(http_addr).await?;
        tracing::info!(%http_addr, "websocket/http listening");
        axum::serve(listener, http_app)
            .await
            .map_err(ServerError::Io)
    };

    let tls_config = match (
        &settings.transport.tls_cert_path,
        &settings.transport.tls_key_path,
    ) {
        (Some(cert_path), Some(key_path)) => {
            let cert = std::fs::read(cert_path)?;
            let key = std::fs::read(key_path)?;
            Some(tonic::transport::ServerTlsConfig::new().identity(
                tonic::transport::Identity::from_pem(cert, key),
            ))
        }
        _ => None,
    };

    let grpc_server = async move {
        tracing::info!(%grpc_addr, "grpc listening");
        let mut builder = tonic::transport::Server::builder();
        if let Some(tls) = tls_config {
            builder = builder.tls_config(tls).map_err(ServerError::Transport)?;
        }
        builder
            .add_service(GrpcService::new(state))
            .serve(grpc_addr)
            .await
            .map_err(ServerError::Transport)
    };

    tokio::try_join!(http_server, grpc_server)?;
    Ok(())
}

fn parse_level(level: &str) -> tracing::Level {
    level.parse().unwrap_or(tracing::Level::INFO)
}
