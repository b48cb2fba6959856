//! Purpose: Byte ranges queued for writing, shared by the command producer and write tasks.
//! Exports: `WriteBuffer`.
//! Role: The only Port State touched off the owner context.
//! Invariants: `queued_bytes` equals the sum of unconsumed range lengths.
//! Invariants: The lock is held only for append/snapshot/dequeue, never across I/O.
use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::{Buf, Bytes};

use crate::core::errno::Errno;
use crate::core::fs::lock;

#[derive(Debug, Default)]
pub struct WriteBuffer {
    inner: Mutex<Ranges>,
}

#[derive(Debug, Default)]
struct Ranges {
    ranges: VecDeque<Bytes>,
    queued_bytes: usize,
}

impl Ranges {
    fn check(&self) {
        debug_assert_eq!(
            self.queued_bytes,
            self.ranges.iter().map(Bytes::len).sum::<usize>(),
            "queued_bytes out of sync with ranges"
        );
    }
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `data` at the tail.
    pub fn append(&self, data: Bytes) -> Result<(), Errno> {
        if data.is_empty() {
            return Ok(());
        }
        let mut inner = lock(&self.inner);
        inner.ranges.try_reserve(1).map_err(|_| Errno::Nomem)?;
        inner.queued_bytes += data.len();
        inner.ranges.push_back(data);
        inner.check();
        Ok(())
    }

    /// Shallow clone of the queued ranges; clones share storage with the buffer.
    pub fn snapshot(&self) -> Vec<Bytes> {
        let inner = lock(&self.inner);
        inner.ranges.iter().cloned().collect()
    }

    /// Drops `len` bytes from the head, splitting a range when needed. Returns bytes removed.
    pub fn dequeue(&self, len: usize) -> usize {
        let mut inner = lock(&self.inner);
        let mut left = len.min(inner.queued_bytes);
        let removed = left;
        while left > 0 {
            let Some(head) = inner.ranges.front_mut() else {
                break;
            };
            if head.len() <= left {
                left -= head.len();
                inner.ranges.pop_front();
            } else {
                head.advance(left);
                left = 0;
            }
        }
        inner.queued_bytes -= removed;
        inner.check();
        removed
    }

    pub fn queued_bytes(&self) -> usize {
        lock(&self.inner).queued_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.queued_bytes() == 0
    }

    #[cfg(test)]
    fn range_total(&self) -> usize {
        lock(&self.inner).ranges.iter().map(Bytes::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::WriteBuffer;
    use bytes::Bytes;
    use std::sync::Arc;

    #[test]
    fn queued_bytes_tracks_appends_and_dequeues() {
        let buffer = WriteBuffer::new();
        buffer.append(Bytes::from_static(b"hello ")).expect("append");
        buffer.append(Bytes::new()).expect("append empty");
        buffer.append(Bytes::from_static(b"world")).expect("append");
        assert_eq!(buffer.queued_bytes(), 11);
        assert_eq!(buffer.range_total(), 11);

        assert_eq!(buffer.dequeue(8), 8);
        assert_eq!(buffer.queued_bytes(), 3);
        assert_eq!(buffer.range_total(), 3);
        assert_eq!(buffer.snapshot(), vec![Bytes::from_static(b"rld")]);

        assert_eq!(buffer.dequeue(10), 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_dequeue() {
        let buffer = WriteBuffer::new();
        buffer.append(Bytes::from_static(b"abc")).expect("append");
        let snapshot = buffer.snapshot();
        buffer.dequeue(3);
        assert_eq!(snapshot, vec![Bytes::from_static(b"abc")]);
        assert!(buffer.snapshot().is_empty());
    }

    #[test]
    fn concurrent_append_and_drain_keep_the_count() {
        let buffer = Arc::new(WriteBuffer::new());
        let producer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    buffer.append(Bytes::from_static(b"xy")).expect("append");
                }
            })
        };
        let mut drained = 0;
        while drained < 2000 {
            let snapshot = buffer.snapshot();
            let available: usize = snapshot.iter().map(Bytes::len).sum();
            drained += buffer.dequeue(available.min(7));
        }
        producer.join().expect("producer");
        assert!(buffer.is_empty());
        assert_eq!(buffer.range_total(), 0);
    }
}
