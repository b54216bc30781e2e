// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Reactor: edge-triggered epoll bridging fd readiness to coroutine wakes.
//!
//! Lives on the runtime's thread. A coroutine whose I/O would block parks
//! on its fd: it records a fresh future as that fd's waiter and blocks.
//! `poll_once` turns each readiness event into a `wake` of the waiter.
//! Events for fds with no waiter are dropped; the next operation on that
//! fd simply succeeds without parking.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;

use coro_rt::{CoFuture, Scheduler};

/// I/O interest for reactor registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    ReadWrite,
}

impl Interest {
    fn to_epoll_events(self) -> u32 {
        let base = match self {
            Interest::Readable => libc::EPOLLIN | libc::EPOLLRDHUP,
            Interest::ReadWrite => libc::EPOLLIN | libc::EPOLLOUT | libc::EPOLLRDHUP,
        };
        (base | libc::EPOLLET) as u32
    }
}

pub struct Reactor {
    epoll_fd: RawFd,
    /// fd -> registered interest.
    interests: RefCell<HashMap<RawFd, Interest>>,
    /// fd -> future of the coroutine parked on it.
    waiters: RefCell<HashMap<RawFd, CoFuture>>,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epoll_fd,
            interests: RefCell::new(HashMap::new()),
            waiters: RefCell::new(HashMap::new()),
        })
    }

    /// Add `fd` to the epoll set, or change its interest if already there.
    pub fn register(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut interests = self.interests.borrow_mut();
        let mut ev = libc::epoll_event {
            events: interest.to_epoll_events(),
            u64: fd as u64,
        };
        let op = if interests.contains_key(&fd) {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };
        if unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut ev) } < 0 {
            return Err(io::Error::last_os_error());
        }
        interests.insert(fd, interest);
        Ok(())
    }

    /// Remove `fd` and forget any waiter parked on it.
    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.waiters.borrow_mut().remove(&fd);
        if self.interests.borrow_mut().remove(&fd).is_some() {
            let ret = unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                // ENOENT / EBADF are expected if FD was already closed.
                if err.raw_os_error() != Some(libc::ENOENT)
                    && err.raw_os_error() != Some(libc::EBADF)
                {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Block the running coroutine until `fd` reports readiness.
    pub fn park(&self, sched: &Scheduler, fd: RawFd) {
        let fut = sched.new_future();
        self.waiters.borrow_mut().insert(fd, fut);
        sched.block();
    }

    /// Wait up to `timeout_ms` (-1 for no bound) and wake every coroutine
    /// parked on a ready fd. Returns the number woken.
    pub fn poll_once(&self, sched: &Scheduler, timeout_ms: i32) -> io::Result<usize> {
        const MAX_EVENTS: usize = 64;
        let mut events: [libc::epoll_event; MAX_EVENTS] =
            [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];

        let n = unsafe {
            libc::epoll_wait(self.epoll_fd, events.as_mut_ptr(), MAX_EVENTS as i32, timeout_ms)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0); // EINTR: a signal arrived, caller checks flags.
            }
            return Err(err);
        }

        let mut woken = 0;
        for ev in &events[..n as usize] {
            let fd = ev.u64 as RawFd;
            // Take the waiter out before waking so the borrow is released.
            let waiter = self.waiters.borrow_mut().remove(&fd);
            match waiter {
                Some(fut) => {
                    sched.wake(&fut);
                    woken += 1;
                }
                None => log::trace!("fd {fd} ready with no waiter"),
            }
        }
        Ok(woken)
    }

    /// Number of fds currently registered.
    pub fn registered(&self) -> usize {
        self.interests.borrow().len()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use coro_rt::{Runtime, Status};

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        assert_eq!(ret, 0);
        (fds[0], fds[1])
    }

    fn close(fd: RawFd) {
        unsafe { libc::close(fd) };
    }

    #[test]
    fn parked_coroutine_woken_by_pipe() {
        let rt = Runtime::setup(4).unwrap();
        let reactor = Rc::new(Reactor::new().unwrap());
        let (read_fd, write_fd) = pipe();
        reactor.register(read_fd, Interest::Readable).unwrap();

        let resumed = Rc::new(Cell::new(false));
        let id = {
            let reactor = reactor.clone();
            let resumed = resumed.clone();
            rt.spawn("reader", move |s| {
                reactor.park(s, read_fd);
                resumed.set(true);
            })
            .unwrap()
        };
        rt.dispatch();
        assert_eq!(rt.status(id), Some(Status::Blocked));

        // Nothing written yet.
        assert_eq!(reactor.poll_once(&rt, 0).unwrap(), 0);

        unsafe { libc::write(write_fd, b"x".as_ptr().cast(), 1) };
        assert_eq!(reactor.poll_once(&rt, 100).unwrap(), 1);
        rt.dispatch();
        assert!(resumed.get());

        reactor.deregister(read_fd).unwrap();
        assert_eq!(reactor.registered(), 0);
        close(read_fd);
        close(write_fd);
        rt.teardown();
    }

    #[test]
    fn event_without_waiter_is_dropped() {
        let rt = Runtime::setup(2).unwrap();
        let reactor = Reactor::new().unwrap();
        let (read_fd, write_fd) = pipe();
        reactor.register(read_fd, Interest::Readable).unwrap();
        unsafe { libc::write(write_fd, b"x".as_ptr().cast(), 1) };
        assert_eq!(reactor.poll_once(&rt, 100).unwrap(), 0);
        assert!(!rt.has_pending());
        close(read_fd);
        close(write_fd);
        rt.teardown();
    }

    #[test]
    fn timeout_without_events() {
        let rt = Runtime::setup(2).unwrap();
        let reactor = Reactor::new().unwrap();
        assert_eq!(reactor.poll_once(&rt, 1).unwrap(), 0);
        rt.teardown();
    }

    #[test]
    fn reregister_modifies_interest() {
        let reactor = Reactor::new().unwrap();
        let (read_fd, write_fd) = pipe();
        reactor.register(write_fd, Interest::Readable).unwrap();
        reactor.register(write_fd, Interest::ReadWrite).unwrap();
        assert_eq!(reactor.registered(), 1);
        reactor.deregister(write_fd).unwrap();
        // Unknown fds are ignored.
        reactor.deregister(write_fd).unwrap();
        close(read_fd);
        close(write_fd);
    }
}
