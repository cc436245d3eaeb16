//! Exit handler (C10, §4.9): the far end of a stream whose `remaining_path`
//! has emptied out. Resolves the requested destination, checks it against
//! the configured allow-list, dials a real TCP socket, and derives the
//! exit-side half of the per-stream E2E session key.

mod error;
mod handler;
mod sink;

pub use error::ExitError;
pub use handler::{ExitAllowlist, TcpExitHandler};
