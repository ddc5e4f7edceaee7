use std::os::fd::RawFd;

/// Wire header size: a 2-byte target plus a 2-byte length, both little-endian.
pub const HEADER_SIZE: usize = 4;
/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD: usize = 0xFFFF;

/// What an [`EventSource`] is for. Drives dispatch in the event loop and the
/// cascade rules in [`crate::registry::SourceTable::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    /// The process-wide abstract-namespace UNIX listener. Exactly one, for
    /// the life of the process.
    ControlServer,
    /// An accepted connection from the controller, carrying the multiplex
    /// protocol.
    ControlConnection,
    /// A TCP listener opened on behalf of a `ControlConnection`.
    ForwardServer,
    /// An accepted TCP client on a `ForwardServer`.
    ForwardConnection,
}

/// The sole first-class entity the daemon tracks: one per live descriptor.
///
/// `port` and `target` change meaning by `kind`:
/// - `ControlServer`: `port` is always 0, `target` unused.
/// - `ControlConnection`: `target` is the descriptor a payload frame
///   currently in flight is owed to; meaningless while awaiting a header.
/// - `ForwardServer`: `port` is the bound TCP port; `target` is the owning
///   `ControlConnection`'s descriptor.
/// - `ForwardConnection`: `port` and `target` are copied from the
///   `ForwardServer` that accepted it.
///
/// `mpheader`/`mplength` are scratch state for `ControlConnection` only: the
/// sign of `mplength` is the substate. Negative means "collecting header,
/// `-mplength` bytes still needed"; non-negative means "collecting payload,
/// `mplength` bytes still owed to `target`".
#[derive(Debug)]
pub struct EventSource {
    pub fd: RawFd,
    pub kind: SourceType,
    pub port: u16,
    pub target: RawFd,
    pub mpheader: [u8; HEADER_SIZE],
    pub mplength: i32,
}

impl EventSource {
    pub fn new(fd: RawFd, kind: SourceType) -> Self {
        Self { fd, kind, port: 0, target: 0, mpheader: [0; HEADER_SIZE], mplength: 0 }
    }

    /// A freshly accepted control connection, primed to collect a header.
    pub fn new_control_connection(fd: RawFd) -> Self {
        let mut source = Self::new(fd, SourceType::ControlConnection);
        source.mplength = -(HEADER_SIZE as i32);
        source
    }
}
