//! Event loop: owns the `mio::Poll` readiness facility, the control server,
//! and the source table, and dispatches each ready descriptor by source
//! type. Named `loop_` to avoid the `loop` keyword.

use std::{io, os::fd::RawFd, time::Duration};

use mio::{Events, Poll};
use tracing::{debug, error, info};

use crate::{
    control::{accept_control, read_control},
    error::InitError,
    forward::{accept_forward, read_forward},
    registry::SourceTable,
    socket,
    source::{EventSource, SourceType},
};

/// Event batch size per readiness wait.
const DEFAULT_MAX_EVENTS: usize = 64;

/// Owns every live socket and drives the single-threaded, edge-triggered
/// event loop: one control server, any number of control connections, and
/// the forward listeners/connections they own.
pub struct Daemon {
    poll: Poll,
    events: Events,
    table: SourceTable,
    control_server_fd: RawFd,
}

impl Daemon {
    /// Binds the abstract control socket named `socket_name`, creates the
    /// readiness facility, and registers the control server. Any failure
    /// here is a fatal initialization error.
    pub fn new(socket_name: &str) -> Result<Self, InitError> {
        let poll = Poll::new().map_err(InitError::Poll)?;
        let mut table = SourceTable::new();

        let control_server_fd = socket::bind_abstract_unix_listener(socket_name)
            .map_err(|source| InitError::AbstractSocket { name: socket_name.to_string(), source })?;

        let source = EventSource::new(control_server_fd, SourceType::ControlServer);
        if let Err(e) = table.insert(poll.registry(), source) {
            socket::close_fd(control_server_fd);
            return Err(InitError::Register(e));
        }

        info!(name = socket_name, "listening on abstract control socket");

        Ok(Self { poll, events: Events::with_capacity(DEFAULT_MAX_EVENTS), table, control_server_fd })
    }

    /// The control server's descriptor, for diagnostics and tests.
    pub fn control_server_fd(&self) -> RawFd {
        self.control_server_fd
    }

    /// Runs the steady-state loop. Never returns voluntarily: only a
    /// readiness-wait failure or an invariant violation terminates the
    /// process.
    pub fn run(&mut self) -> ! {
        loop {
            if let Err(e) = self.poll_once(None) {
                error!(error = %e, "readiness wait failed");
                std::process::exit(1);
            }
        }
    }

    /// Waits for readiness once (blocking up to `timeout`, or indefinitely
    /// if `None`) and dispatches every ready descriptor to exhaustion. Split
    /// out from [`run`] so tests can drive the loop deterministically
    /// without relying on an infinite loop.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let ready: Vec<(RawFd, bool, bool, bool)> = self
            .events
            .iter()
            .map(|e| {
                let fd = e.token().0 as RawFd;
                let hup = e.is_read_closed() || e.is_write_closed();
                (fd, e.is_readable(), e.is_error(), hup)
            })
            .collect();

        for (fd, readable, errored, hup) in ready {
            self.dispatch(fd, readable, errored, hup);
        }
        Ok(())
    }

    /// One event's worth of handling: error/hangup/non-readable checks
    /// first, then dispatch by source type.
    fn dispatch(&mut self, fd: RawFd, readable: bool, errored: bool, hup: bool) {
        let registry = self.poll.registry();

        let Some(source) = self.table.find(fd) else {
            error!(fd, "event for unknown descriptor (invariant violation)");
            std::process::exit(1);
        };
        let kind = source.kind;

        if errored {
            debug!(fd, "socket error, tearing down");
            self.table.delete(registry, fd);
            return;
        }
        if hup {
            debug!(fd, "hangup, tearing down");
            self.table.delete(registry, fd);
            return;
        }
        if !readable {
            debug!(fd, "non-readable event, tearing down defensively");
            self.table.delete(registry, fd);
            return;
        }

        match kind {
            SourceType::ControlServer => accept_control(registry, &mut self.table, fd),
            SourceType::ForwardServer => accept_forward(registry, &mut self.table, fd),
            SourceType::ControlConnection => read_control(registry, &mut self.table, fd),
            SourceType::ForwardConnection => read_forward(registry, &mut self.table, fd),
        }
    }
}
