//! Forward state machine: accepts inbound TCP clients on a `ForwardServer`,
//! and relays each read on a `ForwardConnection` back to the owning control
//! connection as a framed payload.

use std::os::fd::RawFd;

use mio::Registry;
use tracing::warn;

use crate::{
    registry::SourceTable,
    socket,
    source::{EventSource, SourceType, HEADER_SIZE, MAX_PAYLOAD},
    wire::encode_header,
};

/// Drains every pending accept on `server_fd`, registering each inbound
/// client as a [`SourceType::ForwardConnection`] inheriting `port`/`target`
/// from the listener that accepted it.
pub fn accept_forward(registry: &Registry, table: &mut SourceTable, server_fd: RawFd) {
    let Some(server) = table.find(server_fd) else {
        return;
    };
    let port = server.port;
    let target = server.target;

    loop {
        match socket::accept_nonblocking(server_fd) {
            Ok(Some(fd)) => {
                let mut source = EventSource::new(fd, SourceType::ForwardConnection);
                source.port = port;
                source.target = target;
                if let Err(e) = table.insert(registry, source) {
                    warn!(fd, error = %e, "failed to register forward connection");
                    socket::close_fd(fd);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "accept on forward listener failed");
                break;
            }
        }
    }
}

/// Drains every pending read on `fd`, emitting one frame per successful
/// read: `target = fd`, `length = n`, followed by the `n` payload bytes,
/// written to the owning control connection.
pub fn read_forward(registry: &Registry, table: &mut SourceTable, fd: RawFd) {
    debug_assert_ne!(fd, 0, "forward connection fd collides with the open-port sentinel");

    let mut buf = [0u8; HEADER_SIZE + MAX_PAYLOAD];
    loop {
        let Some(target) = table.find(fd).map(|s| s.target) else {
            return;
        };

        match socket::read_nonblocking(fd, &mut buf[HEADER_SIZE..]) {
            Ok(Some(0)) => {
                table.delete(registry, fd);
                return;
            }
            Ok(Some(n)) => {
                let header = encode_header(fd as u16, n as u16);
                buf[..HEADER_SIZE].copy_from_slice(&header);
                if let Err(e) = socket::write_all_blocking(target, &buf[..HEADER_SIZE + n]) {
                    warn!(target, error = %e, "relay write to control connection failed");
                    table.delete(registry, fd);
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(fd, error = %e, "forward connection read error");
                table.delete(registry, fd);
                return;
            }
        }
    }
}
