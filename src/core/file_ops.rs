//! Purpose: Tasks bound to the port's open file (open, close, read, seek, positioned I/O, ...).
//! Exports: `FileOp`, `FileTask`.
//! Role: Perform works on a cloned `FileHandle`; only open/close completion touches Port State.
//! Invariants: Read-line is the only continuation here; it leaves the position after the newline.
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use bytes::Bytes;

use crate::core::command::Whence;
use crate::core::errno::Errno;
use crate::core::fs::{self, read_full, read_full_at, write_all_at, FileHandle, FileInfo, OpenFlags};
use crate::core::port::Port;
use crate::core::reply::Reply;
use crate::core::task::Progress;

#[derive(Debug)]
pub enum FileOp {
    Open { path: PathBuf, flags: OpenFlags },
    Close,
    Read { size: u64 },
    ReadLine { segment: usize, line: Vec<u8> },
    Seek { offset: i64, whence: Whence },
    Fsync,
    Truncate,
    Fstat,
    Pwritev { chunks: Vec<(u64, Bytes)>, written: u64 },
    Preadv { ranges: Vec<(u64, u64)> },
    Ipread { position: u64, max_size: u64 },
}

pub struct FileTask {
    op: FileOp,
    handle: Option<FileHandle>,
    output: Option<Reply>,
}

impl FileTask {
    /// `handle` is the port's open file; `None` only for open.
    pub fn new(op: FileOp, handle: Option<FileHandle>) -> Self {
        Self {
            op,
            handle,
            output: None,
        }
    }

    pub(crate) fn perform(&mut self) -> Result<Progress, Errno> {
        if let FileOp::Open { path, flags } = &self.op {
            self.handle = Some(fs::open(path, *flags)?);
            self.output = Some(Reply::ok());
            return Ok(Progress::Done);
        }
        let handle = self.handle.as_ref().ok_or(Errno::Badf)?;
        let reply = match &mut self.op {
            FileOp::Open { .. } => unreachable!("open handled above"),
            FileOp::Close => {
                handle.finish()?;
                Reply::ok()
            }
            FileOp::Fsync => {
                handle.sync()?;
                Reply::ok()
            }
            FileOp::Fstat => Reply::Info(Box::new(FileInfo::from_metadata(&handle.metadata()?))),
            FileOp::Read { size } => read(handle.plain()?, *size)?,
            FileOp::ReadLine { segment, line } => match read_line(handle.plain()?, *segment, line)? {
                Some(reply) => reply,
                None => return Ok(Progress::Again),
            },
            FileOp::Seek { offset, whence } => {
                let target = match whence {
                    Whence::Set => SeekFrom::Start(u64::try_from(*offset).map_err(|_| Errno::Inval)?),
                    Whence::Current => SeekFrom::Current(*offset),
                    Whence::End => SeekFrom::End(*offset),
                };
                let mut file = handle.plain()?;
                Reply::Number(file.seek(target).map_err(Errno::from)?)
            }
            FileOp::Truncate => {
                let mut file = handle.plain()?;
                let position = file.stream_position().map_err(Errno::from)?;
                file.set_len(position).map_err(Errno::from)?;
                Reply::ok()
            }
            FileOp::Pwritev { chunks, written } => {
                let file = handle.plain()?;
                for (offset, data) in chunks.iter() {
                    write_all_at(file, data, *offset).map_err(Errno::from)?;
                    *written += data.len() as u64;
                }
                Reply::Number(*written)
            }
            FileOp::Preadv { ranges } => preadv(handle.plain()?, ranges)?,
            FileOp::Ipread { position, max_size } => ipread(handle.plain()?, *position, *max_size)?,
        };
        self.output = Some(reply);
        Ok(Progress::Done)
    }

    pub(crate) fn complete(self, outcome: Result<(), Errno>, port: &mut Port) {
        let FileTask { op, handle, output } = self;
        match (op, outcome) {
            (FileOp::Open { flags, .. }, Ok(())) => {
                let Some(handle) = handle else {
                    panic!("open completed without a handle");
                };
                match port.install_file(handle, flags) {
                    Ok(()) => port.reply(Reply::ok()),
                    Err(errno) => port.reply(Reply::Error(errno)),
                }
            }
            (FileOp::Close, outcome) => {
                port.release_file();
                port.reply(match outcome {
                    Ok(()) => Reply::ok(),
                    Err(errno) => Reply::Error(errno),
                });
            }
            (FileOp::Pwritev { written, .. }, Err(errno)) if written > 0 => {
                port.reply(Reply::NumErr {
                    count: written,
                    errno,
                });
            }
            (_, Err(errno)) => port.reply(Reply::Error(errno)),
            (_, Ok(())) => port.reply(output.unwrap_or_else(Reply::ok)),
        }
    }
}

fn alloc(len: u64) -> Result<Vec<u8>, Errno> {
    let len = usize::try_from(len).map_err(|_| Errno::Nomem)?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| Errno::Nomem)?;
    buf.resize(len, 0);
    Ok(buf)
}

fn read(file: &File, size: u64) -> Result<Reply, Errno> {
    let mut buf = alloc(size)?;
    let got = read_full(file, &mut buf).map_err(Errno::from)?;
    if got == 0 && size > 0 {
        return Ok(Reply::Eof);
    }
    buf.truncate(got);
    Ok(Reply::Data(Bytes::from(buf)))
}

/// One chunk of a line read. `None` means the newline has not been seen yet.
fn read_line(mut file: &File, segment: usize, line: &mut Vec<u8>) -> Result<Option<Reply>, Errno> {
    let mut chunk = alloc(segment as u64)?;
    let got = loop {
        match file.read(&mut chunk) {
            Ok(n) => break n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(Errno::from(err)),
        }
    };
    if got == 0 {
        if line.is_empty() {
            return Ok(Some(Reply::Eof));
        }
        return Ok(Some(Reply::Data(Bytes::from(std::mem::take(line)))));
    }
    let chunk = &chunk[..got];
    match chunk.iter().position(|&b| b == b'\n') {
        Some(at) => {
            line.extend_from_slice(&chunk[..=at]);
            let excess = (got - at - 1) as i64;
            if excess > 0 {
                file.seek(SeekFrom::Current(-excess)).map_err(Errno::from)?;
            }
            Ok(Some(Reply::Data(Bytes::from(std::mem::take(line)))))
        }
        None => {
            line.try_reserve(got).map_err(|_| Errno::Nomem)?;
            line.extend_from_slice(chunk);
            Ok(None)
        }
    }
}

fn preadv(file: &File, ranges: &[(u64, u64)]) -> Result<Reply, Errno> {
    let mut chunks = Vec::with_capacity(ranges.len());
    for &(offset, size) in ranges {
        let mut buf = alloc(size)?;
        let got = read_full_at(file, &mut buf, offset).map_err(Errno::from)?;
        buf.truncate(got);
        chunks.push(Bytes::from(buf));
    }
    Ok(Reply::LData(chunks))
}

/// Reads a `size u32 | offset u32` header at `position`, then the record it points at.
fn ipread(file: &File, position: u64, max_size: u64) -> Result<Reply, Errno> {
    let mut header = [0u8; 8];
    if read_full_at(file, &mut header, position).map_err(Errno::from)? < header.len() {
        return Ok(Reply::Eof);
    }
    let size = u64::from(u32::from_be_bytes([header[0], header[1], header[2], header[3]]));
    let offset = u64::from(u32::from_be_bytes([header[4], header[5], header[6], header[7]]));
    if size > max_size {
        return Err(Errno::Inval);
    }
    let mut data = alloc(size)?;
    let got = read_full_at(file, &mut data, offset).map_err(Errno::from)?;
    if got == 0 && size > 0 {
        return Ok(Reply::Eof);
    }
    data.truncate(got);
    Ok(Reply::N2Data {
        first: offset,
        second: got as u64,
        data: Bytes::from(data),
    })
}

#[cfg(test)]
mod tests {
    use super::{FileOp, FileTask};
    use crate::core::errno::Errno;
    use crate::core::fs::FileHandle;
    use crate::core::reply::Reply;
    use crate::core::task::Progress;
    use bytes::Bytes;
    use std::fs::{File, OpenOptions};
    use std::path::Path;
    use std::sync::Arc;

    fn handle(path: &Path) -> FileHandle {
        let file = OpenOptions::new().read(true).write(true).open(path).expect("open");
        FileHandle::Plain(Arc::new(file))
    }

    fn run(op: FileOp, handle: &FileHandle) -> Result<Reply, Errno> {
        let mut task = FileTask::new(op, Some(handle.clone()));
        loop {
            match task.perform()? {
                Progress::Done => return Ok(task.output.take().expect("output")),
                Progress::Again => continue,
            }
        }
    }

    #[test]
    fn read_line_spans_segments_and_repositions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lines");
        std::fs::write(&path, b"first line\nsecond\n").expect("seed");
        let handle = handle(&path);

        let mut task = FileTask::new(FileOp::ReadLine { segment: 4, line: Vec::new() }, Some(handle.clone()));
        let mut performs = 0;
        while task.perform().expect("perform") == Progress::Again {
            performs += 1;
        }
        assert_eq!(performs, 2);
        assert_eq!(task.output, Some(Reply::Data(Bytes::from_static(b"first line\n"))));

        let reply = run(FileOp::ReadLine { segment: 64, line: Vec::new() }, &handle).expect("second");
        assert_eq!(reply, Reply::Data(Bytes::from_static(b"second\n")));
        let reply = run(FileOp::ReadLine { segment: 64, line: Vec::new() }, &handle).expect("eof");
        assert_eq!(reply, Reply::Eof);
    }

    #[test]
    fn read_reports_eof_after_the_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data");
        std::fs::write(&path, b"abc").expect("seed");
        let handle = handle(&path);

        let reply = run(FileOp::Read { size: 10 }, &handle).expect("read");
        assert_eq!(reply, Reply::Data(Bytes::from_static(b"abc")));
        let reply = run(FileOp::Read { size: 10 }, &handle).expect("read");
        assert_eq!(reply, Reply::Eof);
    }

    #[test]
    fn seek_and_truncate_cut_at_the_position() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data");
        std::fs::write(&path, b"0123456789").expect("seed");
        let handle = handle(&path);

        let reply = run(FileOp::Seek { offset: -4, whence: crate::core::command::Whence::End }, &handle).expect("seek");
        assert_eq!(reply, Reply::Number(6));
        run(FileOp::Truncate, &handle).expect("truncate");
        assert_eq!(std::fs::read(&path).expect("read"), b"012345");
    }

    #[test]
    fn positioned_vectors_round_through_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data");
        std::fs::write(&path, b"").expect("seed");
        let handle = handle(&path);

        let chunks = vec![(0, Bytes::from_static(b"head")), (8, Bytes::from_static(b"tail"))];
        let reply = run(FileOp::Pwritev { chunks, written: 0 }, &handle).expect("pwritev");
        assert_eq!(reply, Reply::Number(8));

        let reply = run(FileOp::Preadv { ranges: vec![(0, 4), (8, 10)] }, &handle).expect("preadv");
        assert_eq!(
            reply,
            Reply::LData(vec![Bytes::from_static(b"head"), Bytes::from_static(b"tail")])
        );
    }

    #[test]
    fn ipread_follows_the_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index");
        let mut raw = Vec::new();
        raw.extend_from_slice(&5u32.to_be_bytes());
        raw.extend_from_slice(&8u32.to_be_bytes());
        raw.extend_from_slice(b"hello");
        std::fs::write(&path, &raw).expect("seed");
        let handle = handle(&path);

        let reply = run(FileOp::Ipread { position: 0, max_size: 64 }, &handle).expect("ipread");
        assert_eq!(
            reply,
            Reply::N2Data {
                first: 8,
                second: 5,
                data: Bytes::from_static(b"hello"),
            }
        );
        assert_eq!(run(FileOp::Ipread { position: 0, max_size: 4 }, &handle), Err(Errno::Inval));
        assert_eq!(run(FileOp::Ipread { position: 100, max_size: 64 }, &handle), Ok(Reply::Eof));
    }

    #[test]
    fn compressed_handles_refuse_positioned_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = File::create(dir.path().join("x.gz")).expect("create");
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let handle = FileHandle::Compressed(Arc::new(std::sync::Mutex::new(encoder)));
        assert_eq!(run(FileOp::Read { size: 1 }, &handle), Err(Errno::Notsup));
    }
}
