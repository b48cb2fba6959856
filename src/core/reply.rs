// Reply tags and wire encoding for task outcomes.
use bytes::{BufMut, Bytes, BytesMut};

use crate::core::errno::Errno;
use crate::core::error::Error;
use crate::core::fs::{FileInfo, FileType};
use crate::core::wire::WireReader;

pub const RESP_OK: u8 = 0;
pub const RESP_ERROR: u8 = 1;
pub const RESP_DATA: u8 = 2;
pub const RESP_NUMBER: u8 = 3;
pub const RESP_INFO: u8 = 4;
pub const RESP_NUMERR: u8 = 5;
pub const RESP_LDATA: u8 = 6;
pub const RESP_N2DATA: u8 = 7;
pub const RESP_EOF: u8 = 8;

const INFO_LEN: usize = 8 + 4 * 6 + 8 + 4 * 2 + 8 * 3;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    /// Success; payload is empty for a bare OK.
    Ok(Bytes),
    Error(Errno),
    Data(Bytes),
    Number(u64),
    Info(Box<FileInfo>),
    /// Partial success: `count` units done before `errno` stopped the operation.
    NumErr { count: u64, errno: Errno },
    LData(Vec<Bytes>),
    N2Data { first: u64, second: u64, data: Bytes },
    Eof,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Ok(Bytes::new())
    }

    pub fn tag(&self) -> u8 {
        match self {
            Reply::Ok(_) => RESP_OK,
            Reply::Error(_) => RESP_ERROR,
            Reply::Data(_) => RESP_DATA,
            Reply::Number(_) => RESP_NUMBER,
            Reply::Info(_) => RESP_INFO,
            Reply::NumErr { .. } => RESP_NUMERR,
            Reply::LData(_) => RESP_LDATA,
            Reply::N2Data { .. } => RESP_N2DATA,
            Reply::Eof => RESP_EOF,
        }
    }

    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Reply::Ok(payload) => payload.len(),
            Reply::Error(errno) => errno.as_str().len(),
            Reply::Data(data) => 8 + data.len(),
            Reply::Number(_) => 8,
            Reply::Info(_) => INFO_LEN,
            Reply::NumErr { errno, .. } => 8 + errno.as_str().len(),
            Reply::LData(chunks) => 4 + chunks.iter().map(|chunk| 8 + chunk.len()).sum::<usize>(),
            Reply::N2Data { data, .. } => 16 + data.len(),
            Reply::Eof => 0,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.tag());
        match self {
            Reply::Ok(payload) => buf.put_slice(payload),
            Reply::Error(errno) => buf.put_slice(errno.as_str().as_bytes()),
            Reply::Data(data) => {
                buf.put_u64(data.len() as u64);
                buf.put_slice(data);
            }
            Reply::Number(value) => buf.put_u64(*value),
            Reply::Info(info) => put_info(&mut buf, info),
            Reply::NumErr { count, errno } => {
                buf.put_u64(*count);
                buf.put_slice(errno.as_str().as_bytes());
            }
            Reply::LData(chunks) => {
                buf.put_u32(chunks.len() as u32);
                for chunk in chunks {
                    buf.put_u64(chunk.len() as u64);
                    buf.put_slice(chunk);
                }
            }
            Reply::N2Data { first, second, data } => {
                buf.put_u64(*first);
                buf.put_u64(*second);
                buf.put_slice(data);
            }
            Reply::Eof => {}
        }
        buf.freeze()
    }

    /// Parses an encoded reply; used by clients of the stdio transport.
    pub fn decode(buf: Bytes) -> Result<Self, Error> {
        let mut reader = WireReader::new(buf);
        let tag = reader.read_u8()?;
        let reply = match tag {
            RESP_OK => Reply::Ok(reader.rest()),
            RESP_ERROR => Reply::Error(read_errno(&mut reader)?),
            RESP_DATA => {
                let len = read_len(&mut reader)?;
                Reply::Data(reader.read_bytes(len)?)
            }
            RESP_NUMBER => Reply::Number(reader.read_u64()?),
            RESP_INFO => Reply::Info(Box::new(read_info(&mut reader)?)),
            RESP_NUMERR => {
                let count = reader.read_u64()?;
                Reply::NumErr {
                    count,
                    errno: read_errno(&mut reader)?,
                }
            }
            RESP_LDATA => {
                let count = reader.read_u32()?;
                let mut chunks = Vec::new();
                for _ in 0..count {
                    let len = read_len(&mut reader)?;
                    chunks.push(reader.read_bytes(len)?);
                }
                Reply::LData(chunks)
            }
            RESP_N2DATA => {
                let first = reader.read_u64()?;
                let second = reader.read_u64()?;
                Reply::N2Data {
                    first,
                    second,
                    data: reader.rest(),
                }
            }
            RESP_EOF => Reply::Eof,
            other => return Err(Error::protocol(format!("unknown reply tag {other}"))),
        };
        reader.finish()?;
        Ok(reply)
    }
}

fn read_len(reader: &mut WireReader) -> Result<usize, Error> {
    let len = reader.read_u64()?;
    usize::try_from(len).map_err(|_| Error::protocol(format!("length {len} does not fit")))
}

fn read_errno(reader: &mut WireReader) -> Result<Errno, Error> {
    let raw = reader.rest();
    let symbol = std::str::from_utf8(&raw).map_err(|err| Error::protocol("errno symbol is not utf-8").with_source(err))?;
    Errno::from_symbol(symbol).ok_or_else(|| Error::protocol(format!("unknown errno symbol {symbol:?}")))
}

fn read_info(reader: &mut WireReader) -> Result<FileInfo, Error> {
    let size = reader.read_u64()?;
    let raw_type = reader.read_u32()?;
    let file_type = FileType::from_u32(raw_type)
        .ok_or_else(|| Error::protocol(format!("unknown file type {raw_type}")))?;
    Ok(FileInfo {
        size,
        file_type,
        access: reader.read_u32()?,
        mode: reader.read_u32()?,
        links: reader.read_u32()?,
        major_device: reader.read_u32()?,
        minor_device: reader.read_u32()?,
        inode: reader.read_u64()?,
        uid: reader.read_u32()?,
        gid: reader.read_u32()?,
        atime: reader.read_i64()?,
        mtime: reader.read_i64()?,
        ctime: reader.read_i64()?,
    })
}

impl From<Errno> for Reply {
    fn from(errno: Errno) -> Self {
        Reply::Error(errno)
    }
}

fn put_info(buf: &mut BytesMut, info: &FileInfo) {
    buf.put_u64(info.size);
    buf.put_u32(info.file_type as u32);
    buf.put_u32(info.access);
    buf.put_u32(info.mode);
    buf.put_u32(info.links);
    buf.put_u32(info.major_device);
    buf.put_u32(info.minor_device);
    buf.put_u64(info.inode);
    buf.put_u32(info.uid);
    buf.put_u32(info.gid);
    buf.put_i64(info.atime);
    buf.put_i64(info.mtime);
    buf.put_i64(info.ctime);
}

/// Outbound transport for encoded replies.
pub trait ReplySink: Send {
    fn send(&mut self, reply: Reply);
}

impl ReplySink for tokio::sync::mpsc::UnboundedSender<Bytes> {
    fn send(&mut self, reply: Reply) {
        if tokio::sync::mpsc::UnboundedSender::send(self, reply.encode()).is_err() {
            tracing::trace!("reply dropped: transport closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Reply, INFO_LEN, RESP_DATA, RESP_EOF, RESP_ERROR, RESP_INFO, RESP_LDATA};
    use crate::core::errno::Errno;
    use crate::core::fs::{FileInfo, FileType};
    use bytes::Bytes;

    #[test]
    fn error_reply_carries_symbol() {
        let buf = Reply::Error(Errno::Exist).encode();
        assert_eq!(buf[0], RESP_ERROR);
        assert_eq!(&buf[1..], b"eexist");
    }

    #[test]
    fn data_reply_is_length_prefixed() {
        let buf = Reply::Data(Bytes::from_static(b"abc")).encode();
        assert_eq!(buf[0], RESP_DATA);
        assert_eq!(&buf[1..9], &3u64.to_be_bytes());
        assert_eq!(&buf[9..], b"abc");
    }

    #[test]
    fn ldata_chains_chunks() {
        let reply = Reply::LData(vec![Bytes::from_static(b"ab"), Bytes::new()]);
        let buf = reply.encode();
        assert_eq!(buf.len(), reply.encoded_len());
        assert_eq!(buf[0], RESP_LDATA);
        assert_eq!(&buf[1..5], &2u32.to_be_bytes());
        assert_eq!(&buf[5..13], &2u64.to_be_bytes());
        assert_eq!(&buf[13..15], b"ab");
        assert_eq!(&buf[15..23], &0u64.to_be_bytes());
    }

    #[test]
    fn info_layout_is_fixed() {
        let info = FileInfo {
            size: 600,
            file_type: FileType::Regular,
            access: 3,
            mode: 0o644,
            links: 1,
            major_device: 8,
            minor_device: 1,
            inode: 42,
            uid: 1000,
            gid: 1000,
            atime: 1,
            mtime: 2,
            ctime: 3,
        };
        let buf = Reply::Info(Box::new(info)).encode();
        assert_eq!(buf.len(), 1 + INFO_LEN);
        assert_eq!(buf[0], RESP_INFO);
        assert_eq!(&buf[1..9], &600u64.to_be_bytes());
        assert_eq!(&buf[9..13], &3u32.to_be_bytes());
        assert_eq!(&buf[buf.len() - 8..], &3i64.to_be_bytes());
    }

    #[test]
    fn decode_reads_what_clients_receive() {
        let reply = Reply::NumErr {
            count: 7,
            errno: Errno::Nospc,
        };
        assert_eq!(Reply::decode(reply.encode()).expect("decode"), reply);
        let reply = Reply::LData(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"c")]);
        assert_eq!(Reply::decode(reply.encode()).expect("decode"), reply);
        assert!(Reply::decode(Bytes::from_static(&[RESP_ERROR, b'x'])).is_err());
        assert!(Reply::decode(Bytes::from_static(&[42])).is_err());
    }

    #[test]
    fn eof_is_a_bare_tag() {
        assert_eq!(Reply::Eof.encode().as_ref(), &[RESP_EOF]);
    }
}
