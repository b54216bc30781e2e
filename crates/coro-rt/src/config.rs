// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime configuration.

use std::env;
use std::str::FromStr;

use crate::context::page_size;
use crate::error::{Error, Result};

/// Environment variable overriding [`Config::max_concurrency`].
pub const ENV_MAX_CONCURRENCY: &str = "CORO_MAX_CONCURRENCY";
/// Environment variable overriding [`Config::stack_size`], in bytes.
pub const ENV_STACK_SIZE: &str = "CORO_STACK_SIZE";

pub const DEFAULT_MAX_CONCURRENCY: usize = 1024;
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;
/// Smallest stack a coroutine may be given.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Sizing of a runtime. Fixed for the runtime's whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Most coroutines that may exist at once, not counting main.
    pub max_concurrency: usize,
    /// Usable bytes per coroutine stack, before page rounding.
    pub stack_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl Config {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            ..Self::default()
        }
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Defaults, overridden by `CORO_MAX_CONCURRENCY` and `CORO_STACK_SIZE`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrency: env_or(ENV_MAX_CONCURRENCY, defaults.max_concurrency),
            stack_size: env_or(ENV_STACK_SIZE, defaults.stack_size),
        }
    }

    /// Check limits and round the stack size up to whole pages.
    pub(crate) fn validated(self) -> Result<Self> {
        if self.max_concurrency == 0 {
            return Err(Error::InvalidState {
                reason: "max_concurrency must be positive",
            });
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(Error::InvalidState {
                reason: "stack_size must be at least 16 KiB",
            });
        }
        let stack_size = self
            .stack_size
            .checked_next_multiple_of(page_size())
            .ok_or(Error::InvalidState {
                reason: "stack_size overflows when rounded to pages",
            })?;
        Ok(Self { stack_size, ..self })
    }
}

fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("ignoring unparsable {key}={raw:?}");
                default
            }
        },
        Err(_) => default,
    }
}
