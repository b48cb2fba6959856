//! Purpose: Decide where a task's perform phase runs, and abstract the pool/timer backend.
//! Exports: `Level`, `Dispatcher`, `Executor`.
//! Role: Seam between the owner-context engine and whatever runs blocking work.
//! Invariants: Inline when `short_circuit >= level`; otherwise the executor runs perform
//! and hands the task back to `Port::performed` on the owner context.
use std::time::Duration;

use crate::core::command::Opcode;
use crate::core::task::Task;
use crate::core::timer::TimerToken;

/// Cost class of a task.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    /// Path and positioning operations; cheap and often startup-critical.
    Metadata = 1,
    /// Bulk data movement.
    Data = 2,
}

impl Level {
    pub fn of(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Read
            | Opcode::ReadLine
            | Opcode::Write
            | Opcode::Fsync
            | Opcode::Pwritev
            | Opcode::Preadv
            | Opcode::Ipread
            | Opcode::ReadFile => Level::Data,
            _ => Level::Metadata,
        }
    }
}

/// Worker pool plus single-shot timers for one port.
pub trait Executor: Send {
    /// Runs `task.perform()` off the owner context, then delivers the task back to the owner.
    fn submit(&mut self, task: Box<Task>);

    /// Arms a single-shot timer that reports its id to the owner when it expires.
    fn arm_timer(&mut self, delay: Duration) -> TimerToken;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Dispatcher {
    short_circuit: i32,
}

impl Dispatcher {
    pub fn new(short_circuit: i32) -> Self {
        Self { short_circuit }
    }

    pub fn runs_inline(&self, level: Level) -> bool {
        self.short_circuit >= level as i32
    }
}

#[cfg(test)]
mod tests {
    use super::{Dispatcher, Level};
    use crate::core::command::Opcode;

    #[test]
    fn threshold_is_inclusive() {
        let pooled = Dispatcher::new(0);
        assert!(!pooled.runs_inline(Level::Metadata));
        assert!(!pooled.runs_inline(Level::Data));

        let metadata_inline = Dispatcher::new(1);
        assert!(metadata_inline.runs_inline(Level::Metadata));
        assert!(!metadata_inline.runs_inline(Level::Data));

        let all_inline = Dispatcher::new(2);
        assert!(all_inline.runs_inline(Level::Data));
    }

    #[test]
    fn bulk_commands_are_data_level() {
        assert_eq!(Level::of(Opcode::ReadFile), Level::Data);
        assert_eq!(Level::of(Opcode::Write), Level::Data);
        assert_eq!(Level::of(Opcode::Readdir), Level::Metadata);
        assert_eq!(Level::of(Opcode::Seek), Level::Metadata);
    }
}
