//! Error taxonomy. Only `InitError` is a public type: transient per-source
//! I/O failures, peer closures, and invariant violations are resolved
//! locally at the point of detection inside the event loop rather than
//! propagated as a typed error.

use std::io;

use thiserror::Error;

/// Fatal startup failure. Printed to stderr and mapped to a non-zero exit
/// code; the steady-state loop never produces one of these.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("failed to bind abstract control socket {name:?}: {source}")]
    AbstractSocket {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to create readiness facility: {0}")]
    Poll(#[source] io::Error),
    #[error("failed to register control listener: {0}")]
    Register(#[source] io::Error),
}
