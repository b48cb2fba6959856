//! Purpose: Decode inbound command frames into typed requests.
//! Exports: `Opcode`, `Request`, `PortOption`, `WriteInfo`, `Whence`, `decode`.
//! Role: Structural validation boundary; anything that fails here is never enqueued.
//! Invariants: Opcode values are fixed wire constants.
//! Invariants: Payload views are zero-copy slices of the inbound frame.
use std::path::PathBuf;

use bytes::Bytes;

use crate::core::errno::Errno;
use crate::core::error::Error;
use crate::core::wire::WireReader;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Opcode {
    Open = 1,
    Read = 2,
    Seek = 3,
    Write = 4,
    Fstat = 5,
    Pwd = 6,
    Readdir = 7,
    Chdir = 8,
    Fsync = 9,
    Mkdir = 10,
    Delete = 11,
    Rename = 12,
    Rmdir = 13,
    Truncate = 14,
    ReadFile = 15,
    WriteInfo = 16,
    Lstat = 19,
    Readlink = 20,
    Link = 21,
    Symlink = 22,
    Close = 23,
    Pwritev = 24,
    Preadv = 25,
    SetOption = 26,
    Ipread = 27,
    AltName = 28,
    ReadLine = 29,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        let op = match value {
            1 => Opcode::Open,
            2 => Opcode::Read,
            3 => Opcode::Seek,
            4 => Opcode::Write,
            5 => Opcode::Fstat,
            6 => Opcode::Pwd,
            7 => Opcode::Readdir,
            8 => Opcode::Chdir,
            9 => Opcode::Fsync,
            10 => Opcode::Mkdir,
            11 => Opcode::Delete,
            12 => Opcode::Rename,
            13 => Opcode::Rmdir,
            14 => Opcode::Truncate,
            15 => Opcode::ReadFile,
            16 => Opcode::WriteInfo,
            19 => Opcode::Lstat,
            20 => Opcode::Readlink,
            21 => Opcode::Link,
            22 => Opcode::Symlink,
            23 => Opcode::Close,
            24 => Opcode::Pwritev,
            25 => Opcode::Preadv,
            26 => Opcode::SetOption,
            27 => Opcode::Ipread,
            28 => Opcode::AltName,
            29 => Opcode::ReadLine,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Whence {
    Set,
    Current,
    End,
}

pub const OPT_DELAYED_WRITE: u8 = 0;
pub const OPT_READ_AHEAD: u8 = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PortOption {
    DelayedWrite { size: usize, delay_ms: u64 },
    ReadAhead { size: usize },
}

/// Sentinel for "leave unchanged" in owner fields.
pub const KEEP_ID: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WriteInfo {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

pub const IPREAD_S32BU_P32BU: u8 = 0;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    Open { flags: u32, path: PathBuf },
    Read { size: u64 },
    Seek { offset: i64, whence: Whence },
    Write { data: Bytes },
    /// `None` stats the open handle.
    Fstat { path: Option<PathBuf> },
    Pwd,
    Readdir { path: PathBuf },
    Chdir { path: PathBuf },
    Fsync,
    Mkdir { path: PathBuf },
    Delete { path: PathBuf },
    Rename { from: PathBuf, to: PathBuf },
    Rmdir { path: PathBuf },
    Truncate,
    ReadFile { path: PathBuf },
    WriteInfo { path: PathBuf, info: WriteInfo },
    Lstat { path: PathBuf },
    Readlink { path: PathBuf },
    Link { existing: PathBuf, new: PathBuf },
    Symlink { target: PathBuf, link: PathBuf },
    Close,
    Pwritev { chunks: Vec<(u64, Bytes)> },
    Preadv { ranges: Vec<(u64, u64)> },
    SetOption(PortOption),
    Ipread { position: u64, max_size: u64 },
    AltName { path: PathBuf },
    ReadLine,
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Open { .. } => Opcode::Open,
            Request::Read { .. } => Opcode::Read,
            Request::Seek { .. } => Opcode::Seek,
            Request::Write { .. } => Opcode::Write,
            Request::Fstat { .. } => Opcode::Fstat,
            Request::Pwd => Opcode::Pwd,
            Request::Readdir { .. } => Opcode::Readdir,
            Request::Chdir { .. } => Opcode::Chdir,
            Request::Fsync => Opcode::Fsync,
            Request::Mkdir { .. } => Opcode::Mkdir,
            Request::Delete { .. } => Opcode::Delete,
            Request::Rename { .. } => Opcode::Rename,
            Request::Rmdir { .. } => Opcode::Rmdir,
            Request::Truncate => Opcode::Truncate,
            Request::ReadFile { .. } => Opcode::ReadFile,
            Request::WriteInfo { .. } => Opcode::WriteInfo,
            Request::Lstat { .. } => Opcode::Lstat,
            Request::Readlink { .. } => Opcode::Readlink,
            Request::Link { .. } => Opcode::Link,
            Request::Symlink { .. } => Opcode::Symlink,
            Request::Close => Opcode::Close,
            Request::Pwritev { .. } => Opcode::Pwritev,
            Request::Preadv { .. } => Opcode::Preadv,
            Request::SetOption(_) => Opcode::SetOption,
            Request::Ipread { .. } => Opcode::Ipread,
            Request::AltName { .. } => Opcode::AltName,
            Request::ReadLine => Opcode::ReadLine,
        }
    }
}

/// Parses one inbound frame: opcode byte followed by the command payload.
pub fn decode(frame: Bytes) -> Result<Request, Error> {
    let mut reader = WireReader::new(frame);
    if reader.remaining() == 0 {
        return Err(Error::protocol("empty command"));
    }
    let raw = reader.read_u8()?;
    let opcode =
        Opcode::from_u8(raw).ok_or_else(|| Error::protocol(format!("unknown opcode {raw}")))?;

    let request = match opcode {
        Opcode::Open => {
            let flags = reader.read_u32()?;
            Request::Open {
                flags,
                path: reader.read_path()?,
            }
        }
        Opcode::Read => Request::Read {
            size: reader.read_u64()?,
        },
        Opcode::Seek => {
            let offset = reader.read_i64()?;
            let whence = match reader.read_u32()? {
                0 => Whence::Set,
                1 => Whence::Current,
                2 => Whence::End,
                other => return Err(Error::protocol(format!("invalid seek whence {other}"))),
            };
            Request::Seek { offset, whence }
        }
        Opcode::Write => Request::Write {
            data: reader.rest(),
        },
        Opcode::Fstat => {
            Request::Fstat {
                path: reader.read_optional_path(),
            }
        }
        Opcode::Pwd => {
            // drive letter byte is meaningless here
            reader.rest();
            Request::Pwd
        }
        Opcode::Readdir => Request::Readdir {
            path: reader.read_path()?,
        },
        Opcode::Chdir => Request::Chdir {
            path: reader.read_path()?,
        },
        Opcode::Fsync => Request::Fsync,
        Opcode::Mkdir => Request::Mkdir {
            path: reader.read_path()?,
        },
        Opcode::Delete => Request::Delete {
            path: reader.read_path()?,
        },
        Opcode::Rename => {
            let from = reader.read_path()?;
            Request::Rename {
                from,
                to: reader.read_path()?,
            }
        }
        Opcode::Rmdir => Request::Rmdir {
            path: reader.read_path()?,
        },
        Opcode::Truncate => Request::Truncate,
        Opcode::ReadFile => {
            let path = reader.read_path()?;
            if path.as_os_str().is_empty() {
                return Err(Error::protocol("empty path").with_errno(Errno::Noent));
            }
            Request::ReadFile { path }
        }
        Opcode::WriteInfo => {
            let info = WriteInfo {
                mode: reader.read_u32()?,
                uid: reader.read_u32()?,
                gid: reader.read_u32()?,
                atime: reader.read_i64()?,
                mtime: reader.read_i64()?,
                ctime: reader.read_i64()?,
            };
            Request::WriteInfo {
                path: reader.read_path()?,
                info,
            }
        }
        Opcode::Lstat => Request::Lstat {
            path: reader.read_path()?,
        },
        Opcode::Readlink => Request::Readlink {
            path: reader.read_path()?,
        },
        Opcode::Link => {
            let existing = reader.read_path()?;
            Request::Link {
                existing,
                new: reader.read_path()?,
            }
        }
        Opcode::Symlink => {
            let target = reader.read_path()?;
            Request::Symlink {
                target,
                link: reader.read_path()?,
            }
        }
        Opcode::Close => Request::Close,
        Opcode::Pwritev => {
            let headers = read_ranges(&mut reader)?;
            let mut chunks = Vec::with_capacity(headers.len());
            for (offset, size) in headers {
                let size = usize::try_from(size)
                    .map_err(|_| Error::protocol("pwritev chunk too large"))?;
                chunks.push((offset, reader.read_bytes(size)?));
            }
            Request::Pwritev { chunks }
        }
        Opcode::Preadv => Request::Preadv {
            ranges: read_ranges(&mut reader)?,
        },
        Opcode::SetOption => {
            let option = match reader.read_u8()? {
                OPT_DELAYED_WRITE => PortOption::DelayedWrite {
                    size: reader.read_u32()? as usize,
                    delay_ms: u64::from(reader.read_u32()?),
                },
                OPT_READ_AHEAD => PortOption::ReadAhead {
                    size: reader.read_u32()? as usize,
                },
                other => return Err(Error::protocol(format!("unknown port option {other}"))),
            };
            Request::SetOption(option)
        }
        Opcode::Ipread => {
            let variant = reader.read_u8()?;
            if variant != IPREAD_S32BU_P32BU {
                return Err(Error::protocol(format!("unknown ipread variant {variant}")));
            }
            let position = reader.read_u64()?;
            Request::Ipread {
                position,
                max_size: reader.read_u64()?,
            }
        }
        Opcode::AltName => Request::AltName {
            path: reader.read_path()?,
        },
        Opcode::ReadLine => Request::ReadLine,
    };
    reader.finish()?;
    Ok(request)
}

fn read_ranges(reader: &mut WireReader) -> Result<Vec<(u64, u64)>, Error> {
    let count = reader.read_u32()? as usize;
    // each header is 16 bytes; reject counts the frame cannot hold
    if count > reader.remaining() / 16 {
        return Err(Error::protocol("range count exceeds payload"));
    }
    let mut ranges = Vec::with_capacity(count);
    for _ in 0..count {
        let offset = reader.read_u64()?;
        ranges.push((offset, reader.read_u64()?));
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::{decode, Opcode, PortOption, Request, Whence};
    use crate::core::errno::Errno;
    use crate::core::error::ErrorKind;
    use bytes::Bytes;
    use std::path::PathBuf;

    fn frame(opcode: Opcode, payload: &[u8]) -> Bytes {
        let mut raw = vec![opcode as u8];
        raw.extend_from_slice(payload);
        Bytes::from(raw)
    }

    #[test]
    fn empty_and_unknown_commands_are_rejected() {
        let err = decode(Bytes::new()).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.errno(), Errno::Inval);

        let err = decode(Bytes::from_static(&[17])).expect_err("unknown");
        assert_eq!(err.errno(), Errno::Inval);
    }

    #[test]
    fn rename_reads_two_paths() {
        let request = decode(frame(Opcode::Rename, b"old\0new\0")).expect("decode");
        assert_eq!(
            request,
            Request::Rename {
                from: PathBuf::from("old"),
                to: PathBuf::from("new"),
            }
        );
    }

    #[test]
    fn missing_paths_are_rejected_before_queueing() {
        let err = decode(frame(Opcode::Rename, b"old\0")).expect_err("one path");
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.errno(), Errno::Inval);

        for opcode in [Opcode::Mkdir, Opcode::Symlink, Opcode::Readdir, Opcode::AltName] {
            let err = decode(frame(opcode, b"")).expect_err("no path");
            assert_eq!(err.errno(), Errno::Inval, "{opcode:?}");
        }

        let mut open = 1u32.to_be_bytes().to_vec();
        assert!(decode(frame(Opcode::Open, &open)).is_err());
        open.extend_from_slice(b"f\0");
        assert!(decode(frame(Opcode::Open, &open)).is_ok());
    }

    #[test]
    fn seek_validates_whence() {
        let mut payload = (-4i64).to_be_bytes().to_vec();
        payload.extend_from_slice(&2u32.to_be_bytes());
        let request = decode(frame(Opcode::Seek, &payload)).expect("decode");
        assert_eq!(
            request,
            Request::Seek {
                offset: -4,
                whence: Whence::End
            }
        );

        let mut payload = 0i64.to_be_bytes().to_vec();
        payload.extend_from_slice(&9u32.to_be_bytes());
        assert!(decode(frame(Opcode::Seek, &payload)).is_err());
    }

    #[test]
    fn pwritev_slices_data_after_headers() {
        let mut payload = 2u32.to_be_bytes().to_vec();
        for (offset, size) in [(0u64, 3u64), (10, 2)] {
            payload.extend_from_slice(&offset.to_be_bytes());
            payload.extend_from_slice(&size.to_be_bytes());
        }
        payload.extend_from_slice(b"abcde");
        let request = decode(frame(Opcode::Pwritev, &payload)).expect("decode");
        assert_eq!(
            request,
            Request::Pwritev {
                chunks: vec![(0, Bytes::from_static(b"abc")), (10, Bytes::from_static(b"de"))],
            }
        );
    }

    #[test]
    fn read_file_with_empty_path_is_enoent() {
        let err = decode(frame(Opcode::ReadFile, b"\0")).expect_err("empty path");
        assert_eq!(err.errno(), Errno::Noent);
    }

    #[test]
    fn delayed_write_option_decodes() {
        let mut payload = vec![0u8];
        payload.extend_from_slice(&4096u32.to_be_bytes());
        payload.extend_from_slice(&20u32.to_be_bytes());
        let request = decode(frame(Opcode::SetOption, &payload)).expect("decode");
        assert_eq!(
            request,
            Request::SetOption(PortOption::DelayedWrite {
                size: 4096,
                delay_ms: 20
            })
        );
    }

    #[test]
    fn empty_fstat_path_targets_the_handle() {
        let request = decode(frame(Opcode::Fstat, b"")).expect("decode");
        assert_eq!(request, Request::Fstat { path: None });
        assert_eq!(request.opcode(), Opcode::Fstat);
    }
}
