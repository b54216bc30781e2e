// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine-blocking I/O on non-blocking fds.
//!
//! Each helper tries the syscall first. On EAGAIN it parks the running
//! coroutine on the reactor and retries once woken, so from inside a
//! coroutine the call reads like ordinary blocking I/O.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;

use coro_rt::Scheduler;

use crate::reactor::Reactor;

/// Read into `buf`. `Ok(0)` is end of stream.
pub fn read(sched: &Scheduler, reactor: &Reactor, fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => reactor.park(sched, fd),
            io::ErrorKind::Interrupted => {}
            _ => return Err(err),
        }
    }
}

/// Write all of `buf`, parking whenever the fd is full.
pub fn write_all(sched: &Scheduler, reactor: &Reactor, fd: RawFd, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n > 0 {
            buf = &buf[n as usize..];
            continue;
        }
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => reactor.park(sched, fd),
            io::ErrorKind::Interrupted => {}
            _ => return Err(err),
        }
    }
    Ok(())
}

/// Accept one connection. The returned socket is already non-blocking.
pub fn accept(
    sched: &Scheduler,
    reactor: &Reactor,
    listen_fd: RawFd,
) -> io::Result<(OwnedFd, SocketAddr)> {
    loop {
        let mut addr: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut addrlen = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let client_fd = unsafe {
            libc::accept4(
                listen_fd,
                &mut addr as *mut _ as *mut libc::sockaddr,
                &mut addrlen,
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        };
        if client_fd >= 0 {
            let fd = unsafe { OwnedFd::from_raw_fd(client_fd) };
            return Ok((fd, sockaddr_to_std(&addr)));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => reactor.park(sched, listen_fd),
            io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted => {}
            _ => return Err(err),
        }
    }
}

/// Convert a raw sockaddr_storage to std::net::SocketAddr.
pub fn sockaddr_to_std(addr: &libc::sockaddr_storage) -> SocketAddr {
    match addr.ss_family as i32 {
        libc::AF_INET => {
            let addr4 = unsafe { &*(addr as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr4.sin_addr.s_addr));
            let port = u16::from_be(addr4.sin_port);
            SocketAddr::V4(SocketAddrV4::new(ip, port))
        }
        libc::AF_INET6 => {
            let addr6 = unsafe { &*(addr as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(addr6.sin6_addr.s6_addr);
            let port = u16::from_be(addr6.sin6_port);
            SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr6.sin6_flowinfo,
                addr6.sin6_scope_id,
            ))
        }
        _ => SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
    }
}
