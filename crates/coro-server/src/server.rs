// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The HTTP responder: one acceptor coroutine plus one coroutine per client.

use std::cell::Cell;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::time::Duration;

use coro_rt::{CoroutineId, Scheduler};

use crate::io;
use crate::reactor::{Interest, Reactor};

/// Every request gets this reply, whatever it asked for.
pub const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 15\r\n\r\nHello, World!\r\n";

/// Bytes read from a request before answering.
const REQUEST_BUF: usize = 1024;

/// Pause after an accept error, so a persistent failure (EMFILE) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

pub struct Server {
    listener: TcpListener,
    reactor: Reactor,
    delay: Duration,
    served: Cell<u64>,
    rejected: Cell<u64>,
}

impl Server {
    /// Bind `addr` and register the listener with a fresh reactor.
    pub fn bind(addr: SocketAddr, delay: Duration) -> std::io::Result<Rc<Self>> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let reactor = Reactor::new()?;
        reactor.register(listener.as_raw_fd(), Interest::Readable)?;
        Ok(Rc::new(Self {
            listener,
            reactor,
            delay,
            served: Cell::new(0),
            rejected: Cell::new(0),
        }))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// Responses fully written so far.
    pub fn served(&self) -> u64 {
        self.served.get()
    }

    /// Connections closed because the coroutine limit was reached.
    pub fn rejected(&self) -> u64 {
        self.rejected.get()
    }

    /// Spawn the acceptor coroutine.
    pub fn start(self: &Rc<Self>, sched: &Scheduler) -> coro_rt::Result<CoroutineId> {
        let server = Rc::clone(self);
        sched.spawn("acceptor", move |s| server.accept_loop(s))
    }

    fn accept_loop(self: Rc<Self>, sched: &Scheduler) {
        let listen_fd = self.listener.as_raw_fd();
        loop {
            match io::accept(sched, &self.reactor, listen_fd) {
                Ok((fd, peer)) => self.on_connection(sched, fd, peer),
                Err(err) => {
                    log::error!("accept: {err}");
                    sched.sleep(ACCEPT_BACKOFF);
                }
            }
        }
    }

    fn on_connection(self: &Rc<Self>, sched: &Scheduler, fd: OwnedFd, peer: SocketAddr) {
        let raw = fd.as_raw_fd();
        if let Err(err) = self.reactor.register(raw, Interest::ReadWrite) {
            log::warn!("{peer}: cannot register with reactor: {err}");
            return;
        }
        let server = Rc::clone(self);
        match sched.spawn(&peer.to_string(), move |s| server.serve_client(s, fd, peer)) {
            Ok(id) => log::debug!("{peer}: accepted as {id}"),
            Err(coro_rt::Error::CapacityExceeded { max }) => {
                // The closure, and the socket with it, was dropped by spawn.
                log::warn!("{peer}: refused, {max} connections already open");
                self.rejected.set(self.rejected.get() + 1);
                self.release(raw, peer);
            }
            Err(err) => {
                log::error!("{peer}: spawn failed: {err}");
                self.release(raw, peer);
            }
        }
    }

    fn serve_client(&self, sched: &Scheduler, fd: OwnedFd, peer: SocketAddr) {
        let raw = fd.as_raw_fd();
        match self.respond(sched, raw) {
            Ok(true) => {
                self.served.set(self.served.get() + 1);
                log::debug!("{peer}: served");
            }
            Ok(false) => log::debug!("{peer}: closed before sending a request"),
            Err(err) => log::warn!("{peer}: {err}"),
        }
        self.release(raw, peer);
    }

    fn release(&self, fd: RawFd, peer: SocketAddr) {
        if let Err(err) = self.reactor.deregister(fd) {
            log::debug!("{peer}: deregister fd {fd}: {err}");
        }
    }

    /// Read one request, wait `delay`, answer. `Ok(false)` on early EOF.
    fn respond(&self, sched: &Scheduler, fd: RawFd) -> std::io::Result<bool> {
        let mut buf = [0u8; REQUEST_BUF];
        let n = io::read(sched, &self.reactor, fd, &mut buf)?;
        if n == 0 {
            return Ok(false);
        }
        log::trace!("request: {:?}", String::from_utf8_lossy(&buf[..n]));
        sched.sleep(self.delay);
        io::write_all(sched, &self.reactor, fd, RESPONSE)?;
        Ok(true)
    }
}
