//! Purpose: Port State and the command queue engine.
//! Exports: `Port`.
//! Role: Owner-context actor body: decodes commands, queues tasks, drains them through the
//! dispatcher, resolves timer fires and records sticky write errors.
//! Invariants: At most one task is in flight; a parked continuation runs before anything queued.
//! Invariants: Only the owner context mutates this struct; tasks see it only in `complete`.
//! Invariants: `timer = Write` is only armed while unassigned bytes are buffered.
use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::core::command::{self, Opcode, PortOption, Request};
use crate::core::config::PortConfig;
use crate::core::dispatch::{Dispatcher, Executor, Level};
use crate::core::errno::Errno;
use crate::core::file_ops::{FileOp, FileTask};
use crate::core::fs::{FileHandle, OpenFlags};
use crate::core::read_file::ReadFileTask;
use crate::core::reply::{Reply, ReplySink};
use crate::core::simple::{SimpleOp, SimpleTask};
use crate::core::task::{Task, Work};
use crate::core::timer::{Fired, TimerId, TimerSlot, TimerState};
use crate::core::write::WriteTask;
use crate::core::write_buffer::WriteBuffer;

/// Access a handle command needs from the open file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Access {
    /// Any mode, compressed included.
    Any,
    /// Any uncompressed mode.
    Plain,
    Read,
    Write,
}

pub struct Port {
    config: PortConfig,
    dispatcher: Dispatcher,
    executor: Box<dyn Executor>,
    sink: Box<dyn ReplySink>,
    file: Option<FileHandle>,
    flags: OpenFlags,
    timer: TimerSlot<Box<Task>>,
    queue: VecDeque<Box<Task>>,
    in_flight: bool,
    buffer: Arc<WriteBuffer>,
    /// Buffered bytes not yet assigned to a write task.
    write_buffered: usize,
    write_bufsize: usize,
    write_delay: Duration,
    write_error: Option<Errno>,
    read_ahead: usize,
}

impl Port {
    pub fn new(config: PortConfig, executor: Box<dyn Executor>, sink: Box<dyn ReplySink>) -> Self {
        Self {
            dispatcher: Dispatcher::new(config.short_circuit),
            write_delay: config.write_delay,
            config,
            executor,
            sink,
            file: None,
            flags: OpenFlags::default(),
            timer: TimerSlot::new(),
            queue: VecDeque::new(),
            in_flight: false,
            buffer: Arc::new(WriteBuffer::new()),
            write_buffered: 0,
            write_bufsize: 0,
            write_error: None,
            read_ahead: 0,
        }
    }

    pub fn timer_state(&self) -> TimerState {
        self.timer.state()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn read_ahead(&self) -> usize {
        self.read_ahead
    }

    /// Nothing queued, nothing in flight, no parked continuation.
    pub fn is_quiescent(&self) -> bool {
        self.queue.is_empty() && !self.in_flight && self.timer.state() != TimerState::Again
    }

    /// Intake for one inbound frame. Structural errors are answered here and never queued.
    pub fn command(&mut self, frame: Bytes) {
        let request = match command::decode(frame) {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "rejected command");
                self.reply(Reply::Error(err.errno()));
                return;
            }
        };
        let opcode = request.opcode();
        trace!(?opcode, "command");
        match request {
            Request::SetOption(option) => {
                self.set_option(option);
                self.reply(Reply::ok());
            }
            Request::Open { flags, path } => self.open(flags, path),
            Request::Write { data } => self.write(data),
            Request::ReadFile { path } => {
                let work = Work::ReadFile(ReadFileTask::new(path, self.config.segment_read));
                self.push(opcode, work);
            }
            Request::Fstat { path: Some(path) } => self.simple(opcode, SimpleOp::Stat(path)),
            Request::Fstat { path: None } => self.handle_command(opcode, Access::Plain, FileOp::Fstat),
            Request::Pwd => self.simple(opcode, SimpleOp::Pwd),
            Request::Readdir { path } => self.simple(opcode, SimpleOp::Readdir(path)),
            Request::Chdir { path } => self.simple(opcode, SimpleOp::Chdir(path)),
            Request::Mkdir { path } => self.simple(opcode, SimpleOp::Mkdir(path)),
            Request::Delete { path } => self.simple(opcode, SimpleOp::Delete(path)),
            Request::Rename { from, to } => self.simple(opcode, SimpleOp::Rename { from, to }),
            Request::Rmdir { path } => self.simple(opcode, SimpleOp::Rmdir(path)),
            Request::WriteInfo { path, info } => self.simple(opcode, SimpleOp::WriteInfo { path, info }),
            Request::Lstat { path } => self.simple(opcode, SimpleOp::Lstat(path)),
            Request::Readlink { path } => self.simple(opcode, SimpleOp::Readlink(path)),
            Request::Link { existing, new } => self.simple(opcode, SimpleOp::Link { existing, new }),
            Request::Symlink { target, link } => self.simple(opcode, SimpleOp::Symlink { target, link }),
            Request::AltName { path } => self.simple(opcode, SimpleOp::AltName(path)),
            Request::Read { size } => self.handle_command(opcode, Access::Read, FileOp::Read { size }),
            Request::ReadLine => {
                let op = FileOp::ReadLine {
                    segment: self.config.segment_read,
                    line: Vec::new(),
                };
                self.handle_command(opcode, Access::Read, op);
            }
            Request::Seek { offset, whence } => {
                self.handle_command(opcode, Access::Plain, FileOp::Seek { offset, whence });
            }
            Request::Fsync => self.handle_command(opcode, Access::Any, FileOp::Fsync),
            Request::Truncate => self.handle_command(opcode, Access::Write, FileOp::Truncate),
            Request::Close => self.handle_command(opcode, Access::Any, FileOp::Close),
            Request::Pwritev { chunks } => {
                self.handle_command(opcode, Access::Write, FileOp::Pwritev { chunks, written: 0 });
            }
            Request::Preadv { ranges } => self.handle_command(opcode, Access::Read, FileOp::Preadv { ranges }),
            Request::Ipread { position, max_size } => {
                self.handle_command(opcode, Access::Read, FileOp::Ipread { position, max_size });
            }
        }
        self.drain();
    }

    /// Hands back a task whose perform ran on the worker pool.
    pub fn performed(&mut self, task: Box<Task>) {
        assert!(
            self.in_flight,
            "{:?} performed with no task in flight",
            task.command()
        );
        self.after_perform(task);
        self.drain();
    }

    pub fn timeout(&mut self, id: TimerId) {
        match self.timer.fire(id) {
            Fired::Stale => debug!(timer = %id, "stale timer ignored"),
            Fired::Resume(task) => {
                debug!(timer = %id, command = ?task.command(), "resuming continuation");
                self.dispatch(task);
            }
            Fired::Flush => {
                debug!(timer = %id, buffered = self.write_buffered, "write delay expired");
                self.flush_write(true);
            }
        }
        self.drain();
    }

    /// Assigns every buffered byte to a write task and starts draining. Returns once enqueued.
    pub fn flush(&mut self) {
        self.timer.cancel_write();
        self.flush_write(false);
        self.drain();
    }

    pub(crate) fn reply(&mut self, reply: Reply) {
        trace!(tag = reply.tag(), "reply");
        self.sink.send(reply);
    }

    pub(crate) fn set_write_error(&mut self, errno: Errno) {
        warn!(errno = errno.as_str(), "background write failed; error is now sticky");
        self.write_error = Some(errno);
    }

    pub(crate) fn install_file(&mut self, handle: FileHandle, flags: OpenFlags) -> Result<(), Errno> {
        if self.file.is_some() {
            return Err(Errno::Inval);
        }
        debug!(flags = flags.bits(), "file opened");
        self.file = Some(handle);
        self.flags = flags;
        Ok(())
    }

    pub(crate) fn release_file(&mut self) {
        debug!("file closed");
        self.file = None;
        self.flags = OpenFlags::default();
        self.timer.cancel_write();
    }

    fn set_option(&mut self, option: PortOption) {
        match option {
            PortOption::DelayedWrite { size, delay_ms } => {
                self.write_bufsize = size;
                self.write_delay = Duration::from_millis(delay_ms);
            }
            PortOption::ReadAhead { size } => self.read_ahead = size,
        }
    }

    fn open(&mut self, bits: u32, path: std::path::PathBuf) {
        let flags = match OpenFlags::from_bits(bits) {
            Ok(flags) => flags,
            Err(errno) => return self.reply(Reply::Error(errno)),
        };
        if self.file.is_some() {
            return self.reply(Reply::Error(Errno::Inval));
        }
        let work = Work::File(FileTask::new(FileOp::Open { path, flags }, None));
        self.push(Opcode::Open, work);
    }

    fn simple(&mut self, opcode: Opcode, op: SimpleOp) {
        self.push(opcode, Work::Simple(SimpleTask::new(op)));
    }

    fn handle_command(&mut self, opcode: Opcode, access: Access, op: FileOp) {
        if !self.flush_write_check_error() {
            return;
        }
        let Some(handle) = self.file.clone() else {
            return self.reply(Reply::Error(Errno::Badf));
        };
        let allowed = match access {
            Access::Any => true,
            Access::Plain => !self.flags.compressed(),
            Access::Read => !self.flags.compressed() && self.flags.readable(),
            Access::Write => !self.flags.compressed() && self.flags.writable(),
        };
        if !allowed {
            return self.reply(Reply::Error(Errno::Badf));
        }
        self.push(opcode, Work::File(FileTask::new(op, Some(handle))));
    }

    fn write(&mut self, data: Bytes) {
        if let Some(errno) = self.write_error.take() {
            return self.reply(Reply::Error(errno));
        }
        let Some(handle) = self.file.clone() else {
            return self.reply(Reply::Error(Errno::Badf));
        };
        if !self.flags.writable() {
            return self.reply(Reply::Error(Errno::Badf));
        }
        let size = data.len();
        if let Err(errno) = self.buffer.append(data) {
            return self.reply(Reply::Error(errno));
        }
        if self.write_buffered + size < self.write_bufsize {
            self.write_buffered += size;
            self.reply(Reply::Number(size as u64));
            if self.write_buffered > 0 && self.timer.is_idle() {
                self.arm_write_timer();
            }
            return;
        }
        let assigned = mem::take(&mut self.write_buffered) + size;
        let task = self.write_task(handle, assigned, size, true);
        self.enqueue(task);
    }

    fn write_task(&self, handle: FileHandle, size: usize, reply_size: usize, reply: bool) -> Box<Task> {
        let chunked = self.config.segment_writes || self.dispatcher.runs_inline(Level::Data);
        let work = WriteTask::new(
            handle,
            Arc::clone(&self.buffer),
            size,
            reply_size,
            self.config.segment_write,
            chunked,
        );
        Task::new(Opcode::Write, Level::Data, reply, Work::Write(work))
    }

    /// Moves unassigned bytes into a silent write task. `force` enqueues even with nothing buffered.
    fn flush_write(&mut self, force: bool) {
        if self.write_buffered == 0 && !force {
            return;
        }
        let Some(handle) = self.file.clone() else {
            return;
        };
        let size = mem::take(&mut self.write_buffered);
        trace!(size, force, "flushing buffered writes");
        let task = self.write_task(handle, size, 0, false);
        self.enqueue(task);
    }

    /// Flushes, then surfaces (and clears) a sticky write error. False means the error was answered.
    fn flush_write_check_error(&mut self) -> bool {
        self.flush_write(false);
        match self.write_error.take() {
            Some(errno) => {
                self.reply(Reply::Error(errno));
                false
            }
            None => true,
        }
    }

    fn push(&mut self, opcode: Opcode, work: Work) {
        self.enqueue(Task::new(opcode, Level::of(opcode), true, work));
    }

    fn enqueue(&mut self, task: Box<Task>) {
        self.queue.push_back(task);
    }

    fn drain(&mut self) {
        while let Some(task) = self.next_task() {
            self.dispatch(task);
        }
    }

    fn next_task(&mut self) -> Option<Box<Task>> {
        if self.in_flight || self.timer.state() == TimerState::Again {
            return None;
        }
        let mut task = self.queue.pop_front()?;
        task.reset_again();
        Some(task)
    }

    fn dispatch(&mut self, mut task: Box<Task>) {
        assert!(!self.in_flight, "dispatch with a task already in flight");
        self.in_flight = true;
        if self.dispatcher.runs_inline(task.level()) {
            trace!(command = ?task.command(), "perform inline");
            task.perform();
            self.after_perform(task);
        } else {
            trace!(command = ?task.command(), "perform on pool");
            self.executor.submit(task);
        }
    }

    fn after_perform(&mut self, task: Box<Task>) {
        self.in_flight = false;
        if task.again() {
            let token = self.executor.arm_timer(Duration::ZERO);
            debug!(timer = %token.id(), command = ?task.command(), "parking continuation");
            self.timer.park(task, token);
            return;
        }
        trace!(
            command = ?task.command(),
            performs = task.performs(),
            outcome = ?task.outcome(),
            replies = task.replies(),
            "task finished"
        );
        task.complete(self);
        if self.write_buffered > 0 && self.timer.is_idle() {
            self.arm_write_timer();
        }
    }

    fn arm_write_timer(&mut self) {
        let token = self.executor.arm_timer(self.write_delay);
        debug!(timer = %token.id(), delay_ms = self.write_delay.as_millis() as u64, "write flush armed");
        self.timer.arm_write(token);
    }
}
