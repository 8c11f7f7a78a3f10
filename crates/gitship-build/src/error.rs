use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Dockerfile not found: {0} - aborting build")]
    DockerfileNotFound(PathBuf),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Failed to package build context: {0}")]
    Packaging(#[source] std::io::Error),

    #[error("Could not connect to Docker at {address}: {source}")]
    DaemonUnreachable {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected response from Docker daemon: {0}")]
    Protocol(String),

    #[error("BUILD FAILED: {0}")]
    BuildFailed(String),

    #[error("PUSH FAILED: {0}")]
    PushFailed(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error(transparent)]
    Config(#[from] gitship_core::CoreError),

    #[error(transparent)]
    Tunnel(#[from] gitship_tunnel::TunnelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BuildError>;
