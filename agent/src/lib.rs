//! The Muti Metroo agent (C11): one mesh node's orchestrator, tying
//! together identity, configuration, transports, peer connections, routing,
//! and SOCKS5/exit ingress-egress into a single running process.

mod advertise;
pub mod error;
mod orchestrator;
mod transports;

pub use error::AgentError;
pub use orchestrator::Orchestrator;
