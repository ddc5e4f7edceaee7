//! Raw-descriptor socket factory. Operates directly on file descriptors via
//! `libc`, matching the level at which [`crate::source::EventSource`] tracks
//! sockets: the registry only ever holds a `RawFd`, never an owned socket
//! type, so creation, I/O, and teardown all go through this module's
//! syscalls.

use std::{io, mem, os::fd::RawFd};

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 { Err(io::Error::last_os_error()) } else { Ok(ret) }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = cvt(libc::fcntl(fd, libc::F_GETFL, 0))?;
        cvt(libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
    }
    Ok(())
}

/// Closes a descriptor. Called exactly once per descriptor, at the point it
/// leaves the registry.
pub fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Binds an abstract-namespace `AF_UNIX/SOCK_STREAM` listener named `name`.
///
/// The address is the abstract-namespace encoding: a leading NUL byte
/// followed by `name`, with `addrlen = sizeof(sa_family_t) + 1 + name.len()`
/// so the kernel doesn't treat trailing `sun_path` bytes as part of the name.
pub fn bind_abstract_unix_listener(name: &str) -> io::Result<RawFd> {
    let name = name.as_bytes();
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    if name.len() + 1 > addr.sun_path.len() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "abstract socket name too long"));
    }
    for (slot, &byte) in addr.sun_path[1..].iter_mut().zip(name) {
        *slot = byte as libc::c_char;
    }
    let addr_len = (mem::size_of::<libc::sa_family_t>() + 1 + name.len()) as libc::socklen_t;

    unsafe {
        let fd = cvt(libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0))?;
        if let Err(e) = bind_and_listen(fd, std::ptr::addr_of!(addr).cast(), addr_len) {
            libc::close(fd);
            return Err(e);
        }
        Ok(fd)
    }
}

/// Binds an `AF_INET/SOCK_STREAM` listener on `0.0.0.0:port` with
/// `SO_REUSEADDR` set.
pub fn bind_tcp_listener(port: u16) -> io::Result<RawFd> {
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_port = port.to_be();
    addr.sin_addr.s_addr = libc::INADDR_ANY;
    let addr_len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

    unsafe {
        let fd = cvt(libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0))?;
        if let Err(e) = set_reuseaddr(fd) {
            libc::close(fd);
            return Err(e);
        }
        if let Err(e) = bind_and_listen(fd, std::ptr::addr_of!(addr).cast(), addr_len) {
            libc::close(fd);
            return Err(e);
        }
        Ok(fd)
    }
}

unsafe fn set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let one: libc::c_int = 1;
    cvt(unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            std::ptr::addr_of!(one).cast(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

unsafe fn bind_and_listen(
    fd: RawFd,
    addr: *const libc::sockaddr,
    addr_len: libc::socklen_t,
) -> io::Result<()> {
    cvt(unsafe { libc::bind(fd, addr, addr_len) })?;
    set_nonblocking(fd)?;
    cvt(unsafe { libc::listen(fd, libc::SOMAXCONN) })?;
    Ok(())
}

/// Non-blocking `accept4`. `Ok(None)` is the would-block sentinel callers
/// must loop on until seen: the event loop is edge-triggered, so every
/// ready listener must be drained to exhaustion on each wakeup.
pub fn accept_nonblocking(listener_fd: RawFd) -> io::Result<Option<RawFd>> {
    unsafe {
        let fd =
            libc::accept4(listener_fd, std::ptr::null_mut(), std::ptr::null_mut(), libc::SOCK_NONBLOCK);
        if fd == -1 {
            let err = io::Error::last_os_error();
            return if err.kind() == io::ErrorKind::WouldBlock { Ok(None) } else { Err(err) };
        }
        Ok(Some(fd))
    }
}

/// Non-blocking `read`. `Ok(None)` is the would-block sentinel; `Ok(Some(0))`
/// is EOF.
pub fn read_nonblocking(fd: RawFd, buf: &mut [u8]) -> io::Result<Option<usize>> {
    unsafe {
        let n = libc::read(fd, buf.as_mut_ptr().cast(), buf.len());
        if n == -1 {
            let err = io::Error::last_os_error();
            return if err.kind() == io::ErrorKind::WouldBlock { Ok(None) } else { Err(err) };
        }
        Ok(Some(n as usize))
    }
}

/// Writes every byte of `buf` to `fd`, retrying on would-block.
///
/// This is a known limitation: there's no backpressure signalling to the
/// peer whose bytes are waiting to be relayed, just a busy retry until the
/// kernel drains. A production-grade rework would queue outbound bytes
/// per-descriptor and toggle write-readiness instead.
pub fn write_all_blocking(fd: RawFd, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        buf = &buf[n as usize..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_listener_binds_ephemeral_port() {
        let fd = bind_tcp_listener(0).expect("bind ephemeral port");
        assert!(fd >= 0);
        close_fd(fd);
    }

    #[test]
    fn abstract_unix_listener_binds() {
        let name = format!("minirev-socket-test-{}", std::process::id());
        let fd = bind_abstract_unix_listener(&name).expect("bind abstract socket");
        assert!(fd >= 0);
        close_fd(fd);
    }

    #[test]
    fn abstract_unix_listener_rejects_oversized_name() {
        let name = "x".repeat(200);
        assert!(bind_abstract_unix_listener(&name).is_err());
    }
}
