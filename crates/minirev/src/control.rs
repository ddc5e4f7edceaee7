//! Control state machine: accepts control connections on the
//! `ControlServer`, and parses the framing byte stream on each
//! `ControlConnection` into "open port" requests and relayed payload bytes.

use std::os::fd::RawFd;

use mio::Registry;
use tracing::{info, warn};

use crate::{
    registry::SourceTable,
    socket,
    source::{EventSource, SourceType, MAX_PAYLOAD},
    wire::{decode_into_source, FrameEvent},
};

/// Drains every pending connection on the control server, registering each
/// as a fresh [`SourceType::ControlConnection`] primed to collect a header.
pub fn accept_control(registry: &Registry, table: &mut SourceTable, control_server_fd: RawFd) {
    loop {
        match socket::accept_nonblocking(control_server_fd) {
            Ok(Some(fd)) => {
                let source = EventSource::new_control_connection(fd);
                if let Err(e) = table.insert(registry, source) {
                    warn!(fd, error = %e, "failed to register accepted control connection");
                    socket::close_fd(fd);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "accept on control server failed");
                break;
            }
        }
    }
}

/// Drains every pending read on `fd`, feeding each chunk through the
/// per-connection framing state machine. Payload bytes are relayed
/// immediately (no table access needed); "open port" requests are queued and
/// handled once the in-progress borrow of the connection's own state is
/// released, since opening a listener needs to insert into the same table.
pub fn read_control(registry: &Registry, table: &mut SourceTable, fd: RawFd) {
    let mut buf = [0u8; MAX_PAYLOAD];
    loop {
        match socket::read_nonblocking(fd, &mut buf) {
            Ok(Some(0)) => {
                table.delete(registry, fd);
                return;
            }
            Ok(Some(n)) => {
                let mut open_requests: Vec<u16> = Vec::new();
                {
                    let Some(source) = table.find_mut(fd) else {
                        tracing::error!(fd, "read_control dispatched for unknown source");
                        std::process::exit(1);
                    };
                    decode_into_source(source, &buf[..n], |event| match event {
                        FrameEvent::OpenPort { port } => open_requests.push(port),
                        FrameEvent::Payload { target, bytes } => {
                            if let Err(e) = socket::write_all_blocking(target, bytes) {
                                warn!(
                                    target,
                                    error = %e,
                                    "relay write to forward connection failed, dropping bytes"
                                );
                            }
                        }
                    });
                }
                for port in open_requests {
                    open_forward_listener(registry, table, fd, port);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(fd, error = %e, "control connection read error");
                table.delete(registry, fd);
                return;
            }
        }
    }
}

/// Opens a forward listener on `port` on behalf of `control_fd`. Any
/// failure tears down the requesting control connection: the controller's
/// protocol state would otherwise diverge from the device's.
fn open_forward_listener(registry: &Registry, table: &mut SourceTable, control_fd: RawFd, port: u16) {
    match socket::bind_tcp_listener(port) {
        Ok(fd) => {
            let mut source = EventSource::new(fd, SourceType::ForwardServer);
            source.port = port;
            source.target = control_fd;
            if let Err(e) = table.insert(registry, source) {
                warn!(port, error = %e, "failed to register forward listener");
                socket::close_fd(fd);
                table.delete(registry, control_fd);
                return;
            }
            info!("Forwarding port {port}");
        }
        Err(e) => {
            warn!(port, error = %e, "failed to open forward listener, tearing down control connection");
            table.delete(registry, control_fd);
        }
    }
}
