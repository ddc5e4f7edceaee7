//! Event source registry: a descriptor-keyed table owning every live
//! [`EventSource`], with cascading deletion that follows the
//! ControlConnection -> ForwardServer -> ForwardConnection ownership chain.

use std::{collections::HashMap, io, os::fd::RawFd};

use mio::{Interest, Registry, Token, unix::SourceFd};
use tracing::debug;

use crate::{
    socket,
    source::{EventSource, SourceType},
};

/// Descriptor-keyed table of live [`EventSource`]s. Owns every descriptor it
/// holds: removing an entry closes its descriptor and deregisters it from
/// the readiness facility.
#[derive(Default)]
pub struct SourceTable {
    sources: HashMap<RawFd, EventSource>,
}

impl SourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `source` for read-edge readiness and adds it to the table.
    ///
    /// # Panics
    /// Panics in debug builds if `source.fd` is already present: insertion
    /// requires no existing entry for the descriptor.
    pub fn insert(&mut self, registry: &Registry, source: EventSource) -> io::Result<()> {
        let fd = source.fd;
        debug_assert!(
            !self.sources.contains_key(&fd),
            "duplicate fd {fd} inserted into source table"
        );
        registry.register(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)?;
        debug!(fd, kind = ?source.kind, port = source.port, "source registered");
        self.sources.insert(fd, source);
        Ok(())
    }

    pub fn find(&self, fd: RawFd) -> Option<&EventSource> {
        self.sources.get(&fd)
    }

    pub fn find_mut(&mut self, fd: RawFd) -> Option<&mut EventSource> {
        self.sources.get_mut(&fd)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Removes `fd`, closing its descriptor and cascading to everything it
    /// owns. No-op if `fd` is already absent.
    pub fn delete(&mut self, registry: &Registry, fd: RawFd) {
        let Some(source) = self.sources.remove(&fd) else {
            return;
        };
        let _ = registry.deregister(&mut SourceFd(&fd));
        socket::close_fd(fd);
        debug!(fd, kind = ?source.kind, "source deleted");

        match source.kind {
            // A control connection owns every forward listener it opened.
            // Cascade by `target == fd`, not `port`: a connection can open
            // more than one port, and its own descriptor (unlike its `port`
            // field, which only ever holds the most recent value) is a
            // stable key for all of them. See DESIGN.md.
            SourceType::ControlConnection => {
                self.cascade(registry, |s| s.kind == SourceType::ForwardServer && s.target == fd);
            }
            // A forward server owns every connection accepted on it; two
            // listeners never share a port, so matching by port is safe and
            // unambiguous here.
            SourceType::ForwardServer => {
                let port = source.port;
                self.cascade(registry, |s| {
                    s.kind == SourceType::ForwardConnection && s.port == port
                });
            }
            SourceType::ControlServer | SourceType::ForwardConnection => {}
        }
    }

    /// Deletes every entry matching `pred`, snapshotting matches first so
    /// the traversal tolerates removal of sibling entries mid-walk.
    fn cascade(&mut self, registry: &Registry, pred: impl Fn(&EventSource) -> bool) {
        let matching: Vec<RawFd> = self.sources.values().filter(|s| pred(s)).map(|s| s.fd).collect();
        for fd in matching {
            self.delete(registry, fd);
        }
    }
}

impl Drop for SourceTable {
    /// Closes whatever descriptors are still live when the table itself
    /// goes away (process shutdown, or a test's `Daemon` being dropped).
    /// The readiness facility is being torn down alongside it, so there's
    /// no registry left to deregister from.
    fn drop(&mut self) {
        for &fd in self.sources.keys() {
            socket::close_fd(fd);
        }
    }
}
