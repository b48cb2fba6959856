//! Purpose: Task lifecycle shared by every command: perform (1..N times) then complete (once).
//! Exports: `Task`, `Progress`.
//! Role: Tagged variant over the closed set of task kinds; the queue engine only sees `Task`.
//! Invariants: Perform mutates only the task itself (and the Write Buffer under its lock).
//! Invariants: Complete consumes the task and runs on the owner context.
use std::fmt;

use crate::core::command::Opcode;
use crate::core::dispatch::Level;
use crate::core::errno::Errno;
use crate::core::file_ops::FileTask;
use crate::core::port::Port;
use crate::core::read_file::ReadFileTask;
use crate::core::simple::SimpleTask;
use crate::core::write::WriteTask;

/// Result of one perform invocation that did not fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Progress {
    Done,
    /// Partial progress; re-invoke perform before completing.
    Again,
}

pub(crate) enum Work {
    Simple(SimpleTask),
    File(FileTask),
    ReadFile(ReadFileTask),
    Write(WriteTask),
}

pub struct Task {
    command: Opcode,
    level: Level,
    reply: bool,
    again: bool,
    outcome: Result<(), Errno>,
    performs: u32,
    work: Work,
}

impl Task {
    pub(crate) fn new(command: Opcode, level: Level, reply: bool, work: Work) -> Box<Self> {
        Box::new(Self {
            command,
            level,
            reply,
            again: false,
            outcome: Ok(()),
            performs: 0,
            work,
        })
    }

    pub fn command(&self) -> Opcode {
        self.command
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Whether completion answers on the wire (silent flushes do not).
    pub fn replies(&self) -> bool {
        self.reply
    }

    pub fn again(&self) -> bool {
        self.again
    }

    pub fn outcome(&self) -> Result<(), Errno> {
        self.outcome
    }

    /// Number of perform invocations so far.
    pub fn performs(&self) -> u32 {
        self.performs
    }

    pub(crate) fn reset_again(&mut self) {
        self.again = false;
    }

    /// Runs one perform step. Safe to call off the owner context.
    pub fn perform(&mut self) {
        self.performs += 1;
        let continuation = self.again;
        let step = match &mut self.work {
            Work::Simple(work) => work.perform(),
            Work::File(work) => work.perform(),
            Work::ReadFile(work) => work.perform(),
            Work::Write(work) => work.perform(continuation),
        };
        match step {
            Ok(progress) => {
                self.outcome = Ok(());
                self.again = progress == Progress::Again;
            }
            Err(errno) => {
                self.outcome = Err(errno);
                self.again = false;
            }
        }
    }

    /// Finishes the task on the owner context: replies or records sticky state.
    pub(crate) fn complete(self: Box<Self>, port: &mut Port) {
        let Task {
            reply,
            outcome,
            work,
            ..
        } = *self;
        match work {
            Work::Simple(work) => work.complete(outcome, port),
            Work::File(work) => work.complete(outcome, port),
            Work::ReadFile(work) => work.complete(outcome, port),
            Work::Write(work) => work.complete(outcome, reply, port),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("command", &self.command)
            .field("level", &self.level)
            .field("reply", &self.reply)
            .field("again", &self.again)
            .field("outcome", &self.outcome)
            .field("performs", &self.performs)
            .finish_non_exhaustive()
    }
}
