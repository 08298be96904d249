use config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid config")]
    InvalidConfig(#[from] ConfigError),

    #[error("cannot load VSS tree")]
    Tree(#[from] broker_core::error::TreeError),

    #[error("cannot load token public key")]
    Key(#[from] broker_core::error::TokenError),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("gRPC transport error, is the port already in use?")]
    Transport(#[from] tonic::transport::Error),

    #[error("invalid bind address")]
    Addr(#[from] std::net::AddrParseError),
}
