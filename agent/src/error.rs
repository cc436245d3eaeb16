//! Top-level error type for the agent binary and its orchestrator (§7).
//! Library crates keep their own hand-rolled error enums; this one only
//! exists to give `main` a single thing to match on for exit codes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("loading configuration: {0}")]
    Config(#[from] mm_config::ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] mm_transport::TransportError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listener '{address}' uses unsupported transport for this build: {transport:?}")]
    UnsupportedTransport { address: String, transport: mm_config::TransportKind },
}

impl AgentError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        AgentError::Io { context: context.into(), source }
    }
}
