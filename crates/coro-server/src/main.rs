// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! coro-server: answers every HTTP request with "Hello, World!" after a
//! short delay, one coroutine per connection.
//!
//! The event loop is the only thing that blocks the thread: it waits in
//! epoll for at most the time until the next sleeping coroutine is due,
//! wakes coroutines whose sockets became ready, then dispatches.

use std::net::SocketAddr;
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use coro_rt::{Config, Runtime};

mod io;
mod output;
mod reactor;
mod server;
mod signals;

use server::Server;

#[derive(Parser, Debug)]
#[command(name = "coro-server")]
#[command(version)]
#[command(about = "HTTP hello-world server on stackful coroutines", long_about = None)]
struct Args {
    /// Address to listen on. Port 0 picks a free port.
    #[arg(long, env = "CORO_SERVER_ADDR", default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    /// Connections served concurrently; more are refused.
    #[arg(long, env = "CORO_MAX_CONNECTIONS", default_value_t = 1000)]
    max_connections: usize,

    /// Delay before each response, in milliseconds.
    #[arg(long, default_value_t = 100)]
    delay_ms: u64,

    /// Stack size per coroutine, in KiB [default: CORO_STACK_SIZE or 128].
    #[arg(long)]
    stack_kib: Option<usize>,

    /// Debug-level logging (RUST_LOG overrides).
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);
    output::init();

    if let Err(err) = run(&args) {
        eprintln!("{}: {err:#}", output::error_label());
        eprintln!("{}", output::hint("run with -v or RUST_LOG=debug for details"));
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn run(args: &Args) -> anyhow::Result<()> {
    signals::install().context("installing signal handlers")?;

    let config = runtime_config(args)?;
    let rt = Runtime::with_config(config).context("setting up coroutine runtime")?;

    let server = Server::bind(args.addr, Duration::from_millis(args.delay_ms))
        .with_context(|| format!("binding {}", args.addr))?;
    let addr = server.local_addr()?;
    server.start(&rt).context("spawning acceptor")?;
    println!("{}", output::listening(addr));
    log::info!(
        "max {} connections, {} ms delay, {} KiB stacks",
        args.max_connections,
        args.delay_ms,
        config.stack_size / 1024
    );

    event_loop(&rt, &server)?;

    let unmapped = rt.teardown();
    println!(
        "{}",
        output::shutdown(server.served(), server.rejected(), unmapped)
    );
    Ok(())
}

/// Runtime sizing: environment defaults, then command-line overrides.
fn runtime_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = Config::from_env();
    // One extra coroutine for the acceptor.
    config.max_concurrency = args
        .max_connections
        .checked_add(1)
        .context("--max-connections is too large")?;
    if let Some(kib) = args.stack_kib {
        let bytes = kib.checked_mul(1024).context("--stack-kib is too large")?;
        config = config.with_stack_size(bytes);
    }
    Ok(config)
}

fn event_loop(rt: &Runtime, server: &Server) -> anyhow::Result<()> {
    while !signals::stop_requested() {
        if signals::take_dump_request() {
            rt.print_diagnostics();
            eprintln!("Registered fds:   {}", server.reactor().registered());
        }
        let timeout = poll_timeout(rt.min_wait_time());
        server
            .reactor()
            .poll_once(rt, timeout)
            .context("waiting for socket events")?;
        while rt.has_pending() {
            rt.dispatch();
        }
    }
    log::info!("stop requested");
    Ok(())
}

/// epoll timeout for the next timer: -1 waits forever, otherwise the wait
/// rounded up to whole milliseconds so a due timer is never polled early.
fn poll_timeout(wait: Option<Duration>) -> i32 {
    match wait {
        None => -1,
        Some(wait) => {
            let ms = wait.as_nanos().div_ceil(1_000_000);
            i32::try_from(ms).unwrap_or(i32::MAX)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_rounds_up() {
        assert_eq!(poll_timeout(None), -1);
        assert_eq!(poll_timeout(Some(Duration::ZERO)), 0);
        assert_eq!(poll_timeout(Some(Duration::from_nanos(1))), 1);
        assert_eq!(poll_timeout(Some(Duration::from_micros(10_500))), 11);
        assert_eq!(poll_timeout(Some(Duration::from_secs(u64::MAX))), i32::MAX);
    }

    #[test]
    fn default_arguments() {
        let args = Args::parse_from(["coro-server"]);
        assert_eq!(args.max_connections, 1000);
        assert_eq!(args.delay_ms, 100);
        assert_eq!(args.stack_kib, None);
    }

    #[test]
    fn config_reserves_acceptor_slot() {
        let args = Args::parse_from(["coro-server", "--max-connections", "10", "--stack-kib", "64"]);
        let config = runtime_config(&args).unwrap();
        assert_eq!(config.max_concurrency, 11);
        assert_eq!(config.stack_size, 64 * 1024);
    }

    #[test]
    fn oversized_arguments_rejected() {
        let args = Args::parse_from(["coro-server", "--stack-kib", &usize::MAX.to_string()]);
        let err = runtime_config(&args).unwrap_err();
        assert!(err.to_string().contains("--stack-kib"), "{err}");

        let args = Args::parse_from(["coro-server", "--max-connections", &usize::MAX.to_string()]);
        assert!(runtime_config(&args).is_err());
    }
}
