//! Purpose: Segmented write task draining the head of the Write Buffer.
//! Exports: `WriteTask`.
//! Role: Performs vectored (or gzip) writes against a snapshot; completion frees the bytes.
//! Invariants: The buffer lock is only held to snapshot, never across the write call.
//! Invariants: Completion dequeues exactly `free_size` bytes, replying or not.
use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;

use crate::core::errno::Errno;
use crate::core::fs::{lock, write_all_vectored, FileHandle};
use crate::core::port::Port;
use crate::core::reply::Reply;
use crate::core::task::Progress;
use crate::core::write_buffer::WriteBuffer;

pub struct WriteTask {
    handle: FileHandle,
    buffer: Arc<WriteBuffer>,
    /// Bytes at the buffer head owned by this task.
    size: usize,
    /// Bytes already written (or abandoned after a failure).
    free_size: usize,
    /// Size answered by a replying write.
    reply_size: usize,
    segment: usize,
    chunked: bool,
}

impl WriteTask {
    pub fn new(
        handle: FileHandle,
        buffer: Arc<WriteBuffer>,
        size: usize,
        reply_size: usize,
        segment: usize,
        chunked: bool,
    ) -> Self {
        Self {
            handle,
            buffer,
            size,
            free_size: 0,
            reply_size,
            segment: segment.max(1),
            chunked,
        }
    }

    pub(crate) fn perform(&mut self, continuation: bool) -> Result<Progress, Errno> {
        let remaining = self.size - self.free_size;
        let segmented = (self.chunked || continuation) && remaining >= 2 * self.segment;
        let bound = if segmented { self.segment } else { remaining };

        let snapshot = self.buffer.snapshot();
        let written = take_prefix(snapshot, self.free_size, bound).and_then(|ranges| self.write(ranges));
        match written {
            Ok(written) => {
                self.free_size += written;
                if segmented && self.free_size < self.size {
                    Ok(Progress::Again)
                } else {
                    Ok(Progress::Done)
                }
            }
            Err(errno) => {
                // the whole share is dropped; a failed write is never replayed
                self.free_size = self.size;
                Err(errno)
            }
        }
    }

    fn write(&self, ranges: Vec<Bytes>) -> Result<usize, Errno> {
        match &self.handle {
            FileHandle::Plain(file) => write_all_vectored(&**file, ranges).map_err(Errno::from),
            FileHandle::Compressed(encoder) => {
                let mut encoder = lock(encoder);
                let mut written = 0;
                for range in ranges {
                    encoder.write_all(&range).map_err(Errno::from)?;
                    written += range.len();
                }
                Ok(written)
            }
        }
    }

    pub(crate) fn complete(self, outcome: Result<(), Errno>, reply: bool, port: &mut Port) {
        self.buffer.dequeue(self.free_size);
        match outcome {
            Ok(()) if reply => port.reply(Reply::Number(self.reply_size as u64)),
            Ok(()) => {}
            Err(errno) if reply => port.reply(Reply::Error(errno)),
            Err(errno) => port.set_write_error(errno),
        }
    }
}

/// Skips `skip` bytes of the snapshot, then returns exactly the next `len` bytes as ranges.
fn take_prefix(snapshot: Vec<Bytes>, mut skip: usize, len: usize) -> Result<Vec<Bytes>, Errno> {
    let mut out = Vec::new();
    let mut left = len;
    for range in snapshot {
        if left == 0 {
            break;
        }
        if skip >= range.len() {
            skip -= range.len();
            continue;
        }
        let take = (range.len() - skip).min(left);
        out.push(range.slice(skip..skip + take));
        skip = 0;
        left -= take;
    }
    if left > 0 {
        return Err(Errno::Inval);
    }
    Ok(out)
}
