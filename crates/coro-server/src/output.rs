// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Terminal output with colors and styling.
//!
//! Respects NO_COLOR and FORCE_COLOR environment variables.

use std::net::SocketAddr;

use colored::{ColoredString, Colorize};

/// Initialize color support based on environment.
/// Call once at startup.
pub fn init() {
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    } else if std::env::var("FORCE_COLOR").is_ok() {
        colored::control::set_override(true);
    }
}

pub fn error_label() -> ColoredString {
    "error".red().bold()
}

/// First line on stdout once the socket is bound. Tests look for it.
pub fn listening(addr: SocketAddr) -> String {
    format!("{} {}", "listening on".green().bold(), addr.to_string().underline())
}

pub fn hint(msg: &str) -> ColoredString {
    msg.dimmed()
}

pub fn shutdown(served: u64, rejected: u64, unmapped: usize) -> String {
    let rejected = if rejected > 0 {
        format!("{rejected} refused").red()
    } else {
        format!("{rejected} refused").normal()
    };
    format!(
        "{} {} served, {}, {} stacks released",
        "shut down:".yellow().bold(),
        served.to_string().green(),
        rejected,
        unmapped
    )
}
