// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Wait tokens.
//!
//! A [`CoFuture`] names a coroutine plus the sequence number it was issued
//! under. The owning coroutine keeps a [`Pending`] record of its single
//! outstanding token; a wake flips that record to ready and a resume
//! consumes it. Any token whose sequence no longer matches the record is
//! stale, which makes a token usable for at most one wake.

use crate::coroutine::CoroutineId;

/// Handle used to wake a blocked or sleeping coroutine.
///
/// Obtained from [`Scheduler::new_future`](crate::Scheduler::new_future)
/// inside the coroutine that will wait on it. Waking it twice is a
/// contract violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoFuture {
    pub(crate) token: Token,
}

impl CoFuture {
    pub(crate) fn new(token: Token) -> Self {
        Self { token }
    }

    /// The coroutine this future resumes.
    pub fn owner(&self) -> CoroutineId {
        self.token.co
    }
}

/// What the ready queue and the timer heap carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token {
    pub co: CoroutineId,
    pub seq: u64,
}

/// Outstanding token of one coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pending {
    pub seq: u64,
    pub ready: bool,
}

/// Why a token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Refused {
    /// Matching token, already woken.
    AlreadyReady,
    /// Superseded by a newer token, or already consumed.
    Stale,
}

impl Token {
    /// Install this token as the owner's outstanding one.
    pub fn issue(self, pending: &mut Option<Pending>) {
        *pending = Some(Pending {
            seq: self.seq,
            ready: false,
        });
    }

    /// Wake: not-ready to ready. Only the matching token may do this once.
    pub fn mark_ready(self, pending: &mut Option<Pending>) -> Result<(), Refused> {
        match pending {
            Some(p) if p.seq == self.seq && !p.ready => {
                p.ready = true;
                Ok(())
            }
            Some(p) if p.seq == self.seq => Err(Refused::AlreadyReady),
            _ => Err(Refused::Stale),
        }
    }

    /// Resume: drop the record so the token cannot be used again.
    pub fn consume(self, pending: &mut Option<Pending>) -> Result<(), Refused> {
        match pending {
            Some(p) if p.seq == self.seq => {
                *pending = None;
                Ok(())
            }
            _ => Err(Refused::Stale),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(seq: u64) -> Token {
        Token {
            co: CoroutineId(3),
            seq,
        }
    }

    #[test]
    fn wake_then_consume() {
        let mut pending = None;
        token(7).issue(&mut pending);
        assert_eq!(pending, Some(Pending { seq: 7, ready: false }));
        token(7).mark_ready(&mut pending).unwrap();
        assert_eq!(pending, Some(Pending { seq: 7, ready: true }));
        token(7).consume(&mut pending).unwrap();
        assert_eq!(pending, None);
    }

    #[test]
    fn second_wake_refused() {
        let mut pending = None;
        token(1).issue(&mut pending);
        token(1).mark_ready(&mut pending).unwrap();
        assert_eq!(token(1).mark_ready(&mut pending), Err(Refused::AlreadyReady));
    }

    #[test]
    fn superseded_token_is_stale() {
        let mut pending = None;
        token(1).issue(&mut pending);
        token(2).issue(&mut pending);
        assert_eq!(token(1).mark_ready(&mut pending), Err(Refused::Stale));
        assert_eq!(token(1).consume(&mut pending), Err(Refused::Stale));
        token(2).mark_ready(&mut pending).unwrap();
    }

    #[test]
    fn consumed_token_is_stale() {
        let mut pending = None;
        token(4).issue(&mut pending);
        token(4).consume(&mut pending).unwrap();
        assert_eq!(token(4).mark_ready(&mut pending), Err(Refused::Stale));
    }

    #[test]
    fn owner_reported() {
        let fut = CoFuture::new(token(9));
        assert_eq!(fut.owner(), CoroutineId(3));
    }
}
