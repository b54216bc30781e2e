// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime state dump.

use std::fmt;

use crate::coroutine::{CoroutineId, Status};

/// Snapshot of the scheduler's containers and every registered coroutine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    /// Tokens in the ready queue.
    pub ready: usize,
    /// Slots in the idle pool.
    pub idle: usize,
    /// Registered coroutines, main included.
    pub total: usize,
    /// Most coroutines the registry can hold, main included.
    pub capacity: usize,
    /// Pending sleep deadlines.
    pub timers: usize,
    /// Coroutine stacks currently mapped.
    pub stacks_mapped: usize,
    /// Registry order.
    pub coroutines: Vec<CoroutineInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoroutineInfo {
    pub id: CoroutineId,
    pub name: String,
    pub status: Status,
}

impl Diagnostics {
    /// Coroutines that are not parked in the idle pool.
    pub fn active(&self) -> impl Iterator<Item = &CoroutineInfo> {
        self.coroutines.iter().filter(|co| co.status != Status::Idle)
    }

    pub fn count(&self, status: Status) -> usize {
        self.coroutines.iter().filter(|co| co.status == status).count()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ready future:     {}", self.ready)?;
        writeln!(f, "Idle coroutine:   {}", self.idle)?;
        writeln!(f, "All coroutine:    {}/{}", self.total, self.capacity)?;
        writeln!(f, "Sleep timers:     {}", self.timers)?;
        writeln!(f, "Stacks mapped:    {}", self.stacks_mapped)?;
        for co in self.active() {
            writeln!(f, "    coroutine {}: {}", co.name, co.status)?;
        }
        write!(f, "===END===")
    }
}
