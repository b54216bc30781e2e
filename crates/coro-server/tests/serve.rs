// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Run the real binary, talk HTTP to it, stop it with SIGINT.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const EXPECTED: &str = "HTTP/1.1 200 OK\r\nContent-Length: 15\r\n\r\nHello, World!\r\n";

struct Running {
    child: Child,
    stdout: BufReader<ChildStdout>,
    addr: SocketAddr,
}

impl Running {
    fn start(extra: &[&str]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_coro-server"))
            .args(["--addr", "127.0.0.1:0", "--delay-ms", "1"])
            .args(extra)
            .env("NO_COLOR", "1")
            .env_remove("CORO_SERVER_ADDR")
            .env_remove("CORO_MAX_CONNECTIONS")
            .env_remove("CORO_STACK_SIZE")
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .expect("failed to start coro-server");
        let mut stdout = BufReader::new(child.stdout.take().unwrap());

        let mut line = String::new();
        stdout.read_line(&mut line).unwrap();
        let addr = line
            .trim()
            .strip_prefix("listening on ")
            .unwrap_or_else(|| panic!("unexpected first line: {line:?}"))
            .parse()
            .unwrap();
        Self {
            child,
            stdout,
            addr,
        }
    }

    fn request(&self) -> String {
        let mut stream = TcpStream::connect(self.addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).unwrap();
        reply
    }

    fn signal(&self, signo: libc::c_int) {
        let ret = unsafe { libc::kill(self.child.id() as libc::pid_t, signo) };
        assert_eq!(ret, 0);
    }

    /// SIGINT, then wait for a clean exit and return the rest of stdout.
    fn stop(mut self) -> String {
        self.signal(libc::SIGINT);
        let deadline = Instant::now() + Duration::from_secs(10);
        let status = loop {
            if let Some(status) = self.child.try_wait().unwrap() {
                break status;
            }
            if Instant::now() > deadline {
                let _ = self.child.kill();
                panic!("server did not stop after SIGINT");
            }
            thread::sleep(Duration::from_millis(20));
        };
        assert!(status.success(), "exit status {status}");
        let mut rest = String::new();
        self.stdout.read_to_string(&mut rest).unwrap();
        rest
    }
}

#[test]
fn answers_hello_world() {
    let server = Running::start(&[]);
    assert_eq!(server.request(), EXPECTED);
    let tail = server.stop();
    assert!(tail.contains("shut down: 1 served"), "{tail:?}");
}

#[test]
fn serves_concurrent_clients() {
    let server = Running::start(&["--delay-ms", "50"]);
    let addr = server.addr;
    let started = Instant::now();
    let clients: Vec<_> = (0..20)
        .map(|_| {
            thread::spawn(move || {
                let mut stream = TcpStream::connect(addr).unwrap();
                stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
                stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
                let mut reply = String::new();
                stream.read_to_string(&mut reply).unwrap();
                reply
            })
        })
        .collect();
    for client in clients {
        assert_eq!(client.join().unwrap(), EXPECTED);
    }
    // Delays overlap instead of adding up.
    assert!(started.elapsed() < Duration::from_millis(20 * 50));
    let tail = server.stop();
    assert!(tail.contains("20 served"), "{tail:?}");
}

#[test]
fn sigquit_dumps_and_keeps_serving() {
    let server = Running::start(&[]);
    server.signal(libc::SIGQUIT);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(server.request(), EXPECTED);
    server.stop();
}

#[test]
fn closed_connection_without_request() {
    let server = Running::start(&[]);
    drop(TcpStream::connect(server.addr).unwrap());
    assert_eq!(server.request(), EXPECTED);
    let tail = server.stop();
    assert!(tail.contains("1 served"), "{tail:?}");
}
