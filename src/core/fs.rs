//! Purpose: Syscall provider for port tasks: open modes, handles, stat info, positioned I/O.
//! Exports: `OpenFlags`, `FileHandle`, `FileInfo`, `FileType`, `open`, `read_full`,
//! `read_full_at`, `write_all_at`, `write_all_vectored`.
//! Role: The only module that talks to `std::fs`/OS handles on behalf of tasks.
//! Invariants: Every failure is reported as an `Errno`; nothing here touches Port State.
use std::fs::{File, Metadata, OpenOptions};
use std::io::{self, IoSlice, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, Bytes};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;

use crate::core::errno::Errno;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ: u32 = 1;
    pub const WRITE: u32 = 2;
    pub const APPEND: u32 = 4;
    pub const COMPRESSED: u32 = 8;
    pub const NO_TRUNCATE: u32 = 16;
    const KNOWN: u32 = 31;

    pub fn from_bits(bits: u32) -> Result<Self, Errno> {
        if bits & !Self::KNOWN != 0 || bits & (Self::READ | Self::WRITE | Self::APPEND) == 0 {
            return Err(Errno::Inval);
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn readable(self) -> bool {
        self.0 & Self::READ != 0
    }

    /// Append implies writing.
    pub fn writable(self) -> bool {
        self.0 & (Self::WRITE | Self::APPEND) != 0
    }

    pub fn compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options.read(self.readable());
        if self.0 & Self::APPEND != 0 {
            options.append(true).create(true);
        } else if self.0 & Self::WRITE != 0 {
            options.write(true).create(true);
            let truncate = !self.readable() && self.0 & Self::NO_TRUNCATE == 0;
            options.truncate(truncate);
        }
        options
    }
}

/// Open file owned by a port. Tasks hold clones; the port drops its copy on close.
#[derive(Clone, Debug)]
pub enum FileHandle {
    Plain(Arc<File>),
    Compressed(Arc<Mutex<GzEncoder<File>>>),
}

impl FileHandle {
    /// Plain handle for operations that need seeking or positioned I/O.
    pub fn plain(&self) -> Result<&File, Errno> {
        match self {
            FileHandle::Plain(file) => Ok(&**file),
            FileHandle::Compressed(_) => Err(Errno::Notsup),
        }
    }

    pub fn metadata(&self) -> Result<Metadata, Errno> {
        match self {
            FileHandle::Plain(file) => file.metadata().map_err(Errno::from),
            FileHandle::Compressed(encoder) => lock(encoder).get_ref().metadata().map_err(Errno::from),
        }
    }

    pub fn sync(&self) -> Result<(), Errno> {
        match self {
            FileHandle::Plain(file) => file.sync_all().map_err(Errno::from),
            FileHandle::Compressed(encoder) => {
                let mut encoder = lock(encoder);
                encoder.flush().map_err(Errno::from)?;
                encoder.get_ref().sync_all().map_err(Errno::from)
            }
        }
    }

    /// Writes the gzip trailer for compressed handles; plain handles have nothing to finish.
    pub fn finish(&self) -> Result<(), Errno> {
        match self {
            FileHandle::Plain(_) => Ok(()),
            FileHandle::Compressed(encoder) => lock(encoder).try_finish().map_err(Errno::from),
        }
    }
}

pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn open(path: &Path, flags: OpenFlags) -> Result<FileHandle, Errno> {
    if flags.compressed() && flags.readable() {
        return Err(Errno::Notsup);
    }
    let file = flags.options().open(path).map_err(Errno::from)?;
    if file.metadata().map_err(Errno::from)?.is_dir() {
        return Err(Errno::Isdir);
    }
    if flags.compressed() {
        let encoder = GzEncoder::new(file, Compression::default());
        return Ok(FileHandle::Compressed(Arc::new(Mutex::new(encoder))));
    }
    Ok(FileHandle::Plain(Arc::new(file)))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Device = 1,
    Directory = 2,
    Regular = 3,
    Symlink = 4,
    Other = 5,
}

impl FileType {
    pub fn from_u32(value: u32) -> Option<Self> {
        let kind = match value {
            1 => FileType::Device,
            2 => FileType::Directory,
            3 => FileType::Regular,
            4 => FileType::Symlink,
            5 => FileType::Other,
            _ => return None,
        };
        Some(kind)
    }
}

pub const ACCESS_NONE: u32 = 0;
pub const ACCESS_WRITE: u32 = 1;
pub const ACCESS_READ: u32 = 2;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FileInfo {
    pub size: u64,
    pub file_type: FileType,
    pub access: u32,
    pub mode: u32,
    pub links: u32,
    pub major_device: u32,
    pub minor_device: u32,
    pub inode: u64,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl FileInfo {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            FileType::Symlink
        } else if file_type.is_dir() {
            FileType::Directory
        } else if file_type.is_file() {
            FileType::Regular
        } else if is_device(&file_type) {
            FileType::Device
        } else {
            FileType::Other
        };
        let access = if meta.permissions().readonly() {
            ACCESS_READ
        } else {
            ACCESS_READ | ACCESS_WRITE
        };
        let mut info = Self {
            size: meta.len(),
            file_type: kind,
            access,
            mode: 0,
            links: 1,
            major_device: 0,
            minor_device: 0,
            inode: 0,
            uid: 0,
            gid: 0,
            atime: unix_seconds(meta.accessed()),
            mtime: unix_seconds(meta.modified()),
            ctime: unix_seconds(meta.created()),
        };
        fill_unix_fields(&mut info, meta);
        info
    }
}

#[cfg(unix)]
fn is_device(file_type: &std::fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file_type.is_block_device() || file_type.is_char_device()
}

#[cfg(not(unix))]
fn is_device(_file_type: &std::fs::FileType) -> bool {
    false
}

#[cfg(unix)]
fn fill_unix_fields(info: &mut FileInfo, meta: &Metadata) {
    use std::os::unix::fs::MetadataExt;
    let dev = meta.dev();
    info.mode = meta.mode();
    info.links = meta.nlink() as u32;
    // glibc dev_t encoding
    info.major_device = (((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfff)) as u32;
    info.minor_device = ((dev & 0xff) | ((dev >> 12) & !0xff)) as u32;
    info.inode = meta.ino();
    info.uid = meta.uid();
    info.gid = meta.gid();
    info.ctime = meta.ctime();
}

#[cfg(not(unix))]
fn fill_unix_fields(_info: &mut FileInfo, _meta: &Metadata) {}

fn unix_seconds(time: io::Result<SystemTime>) -> i64 {
    match time {
        Ok(time) => match time.duration_since(UNIX_EPOCH) {
            Ok(after) => after.as_secs() as i64,
            Err(before) => -(before.duration().as_secs() as i64),
        },
        Err(_) => 0,
    }
}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
pub fn read_full(mut reader: impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

pub fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match read_at(file, &mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

pub fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    while !buf.is_empty() {
        match write_at(file, buf, offset) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

/// Issues vectored writes until every range is out; returns the byte count.
pub fn write_all_vectored(mut writer: impl Write, mut ranges: Vec<Bytes>) -> io::Result<usize> {
    ranges.retain(|range| !range.is_empty());
    let mut written = 0;
    let mut head = 0;
    while head < ranges.len() {
        let slices: Vec<IoSlice<'_>> = ranges[head..].iter().map(|range| IoSlice::new(range)).collect();
        let mut n = match writer.write_vectored(&slices) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        drop(slices);
        written += n;
        while n > 0 {
            let range = &mut ranges[head];
            let step = n.min(range.len());
            range.advance(step);
            n -= step;
            if range.is_empty() {
                head += 1;
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::{open, write_all_vectored, FileHandle, FileInfo, FileType, OpenFlags};
    use crate::core::errno::Errno;
    use bytes::Bytes;
    use std::io::{self, Write};

    struct Trickle {
        out: Vec<u8>,
        max: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.max);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn vectored_write_survives_short_writes() {
        let mut sink = Trickle { out: Vec::new(), max: 3 };
        let ranges = vec![
            Bytes::from_static(b"hello "),
            Bytes::new(),
            Bytes::from_static(b"world"),
        ];
        let written = write_all_vectored(&mut sink, ranges).expect("write");
        assert_eq!(written, 11);
        assert_eq!(sink.out, b"hello world");
    }

    #[test]
    fn flags_reject_unknown_bits_and_missing_mode() {
        assert_eq!(OpenFlags::from_bits(64), Err(Errno::Inval));
        assert_eq!(OpenFlags::from_bits(OpenFlags::COMPRESSED), Err(Errno::Inval));
        let flags = OpenFlags::from_bits(OpenFlags::APPEND).expect("flags");
        assert!(flags.writable());
        assert!(!flags.readable());
    }

    #[test]
    fn compressed_read_is_not_supported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flags = OpenFlags::from_bits(OpenFlags::READ | OpenFlags::COMPRESSED).expect("flags");
        let err = open(&dir.path().join("x.gz"), flags).expect_err("should fail");
        assert_eq!(err, Errno::Notsup);
    }

    #[test]
    fn write_only_open_truncates_unless_asked_not_to() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data");
        std::fs::write(&path, b"previous").expect("seed");

        let keep = OpenFlags::from_bits(OpenFlags::WRITE | OpenFlags::NO_TRUNCATE).expect("flags");
        drop(open(&path, keep).expect("open"));
        assert_eq!(std::fs::read(&path).expect("read").len(), 8);

        let truncate = OpenFlags::from_bits(OpenFlags::WRITE).expect("flags");
        drop(open(&path, truncate).expect("open"));
        assert_eq!(std::fs::read(&path).expect("read").len(), 0);
    }

    #[test]
    fn info_reports_regular_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data");
        std::fs::write(&path, b"12345").expect("seed");
        let flags = OpenFlags::from_bits(OpenFlags::READ).expect("flags");
        let handle = open(&path, flags).expect("open");
        assert!(matches!(handle, FileHandle::Plain(_)));

        let info = FileInfo::from_metadata(&handle.metadata().expect("metadata"));
        assert_eq!(info.size, 5);
        assert_eq!(info.file_type, FileType::Regular);
    }
}
