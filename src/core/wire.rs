// Big-endian payload cursor for inbound commands.
use std::path::PathBuf;

use bytes::Bytes;

use crate::core::error::Error;

#[derive(Debug)]
pub struct WireReader {
    buf: Bytes,
    pos: usize,
}

impl WireReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1, "u8")?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        let mut out = [0u8; 4];
        out.copy_from_slice(self.take(4, "u32")?);
        Ok(u32::from_be_bytes(out))
    }

    pub fn read_u64(&mut self) -> Result<u64, Error> {
        Ok(u64::from_be_bytes(self.read_8("u64")?))
    }

    pub fn read_i64(&mut self) -> Result<i64, Error> {
        Ok(i64::from_be_bytes(self.read_8("i64")?))
    }

    /// Reads a NUL-terminated path; a missing terminator at the end of the payload is accepted.
    /// A payload that ends before the path starts is truncated.
    pub fn read_path(&mut self) -> Result<PathBuf, Error> {
        if self.remaining() == 0 {
            return Err(Error::protocol("payload truncated reading path"));
        }
        Ok(self.take_path())
    }

    /// Like `read_path`, but an exhausted payload yields `None`.
    pub fn read_optional_path(&mut self) -> Option<PathBuf> {
        let path = self.take_path();
        (!path.as_os_str().is_empty()).then_some(path)
    }

    fn take_path(&mut self) -> PathBuf {
        let rest = &self.buf[self.pos..];
        let (raw, consumed) = match rest.iter().position(|byte| *byte == 0) {
            Some(nul) => (&rest[..nul], nul + 1),
            None => (rest, rest.len()),
        };
        let path = path_from_bytes(raw);
        self.pos += consumed;
        path
    }

    /// Zero-copy view of `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, Error> {
        if self.remaining() < len {
            return Err(Error::protocol(format!(
                "payload truncated: need {len} bytes, have {}",
                self.remaining()
            )));
        }
        let out = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(out)
    }

    pub fn rest(&mut self) -> Bytes {
        let out = self.buf.slice(self.pos..);
        self.pos = self.buf.len();
        out
    }

    pub fn finish(&self) -> Result<(), Error> {
        if self.remaining() != 0 {
            return Err(Error::protocol(format!(
                "{} trailing bytes after payload",
                self.remaining()
            )));
        }
        Ok(())
    }

    fn read_8(&mut self, what: &str) -> Result<[u8; 8], Error> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.take(8, what)?);
        Ok(out)
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&[u8], Error> {
        if self.remaining() < len {
            return Err(Error::protocol(format!("payload truncated reading {what}")));
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.buf[start..start + len])
    }
}

#[cfg(unix)]
pub fn path_from_bytes(raw: &[u8]) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(raw))
}

#[cfg(not(unix))]
pub fn path_from_bytes(raw: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(raw).into_owned())
}

#[cfg(unix)]
pub fn path_to_bytes(path: &std::path::Path) -> Bytes {
    use std::os::unix::ffi::OsStrExt;
    Bytes::copy_from_slice(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
pub fn path_to_bytes(path: &std::path::Path) -> Bytes {
    Bytes::from(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::WireReader;
    use crate::core::error::ErrorKind;
    use bytes::Bytes;
    use std::path::Path;

    #[test]
    fn reads_big_endian_fields_and_paths() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&7u32.to_be_bytes());
        raw.extend_from_slice(&(-3i64).to_be_bytes());
        raw.extend_from_slice(b"a/b\0c");
        let mut reader = WireReader::new(Bytes::from(raw));

        assert_eq!(reader.read_u32().expect("u32"), 7);
        assert_eq!(reader.read_i64().expect("i64"), -3);
        assert_eq!(reader.read_path().expect("path"), Path::new("a/b"));
        assert_eq!(reader.read_path().expect("path"), Path::new("c"));
        reader.finish().expect("fully consumed");
    }

    #[test]
    fn truncated_numbers_are_protocol_errors() {
        let mut reader = WireReader::new(Bytes::from_static(&[0, 1]));
        let err = reader.read_u32().expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn missing_paths_are_truncated_payloads() {
        let mut reader = WireReader::new(Bytes::from_static(b"only\0"));
        assert_eq!(reader.read_path().expect("first"), Path::new("only"));
        let err = reader.read_path().expect_err("second path missing");
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(reader.read_optional_path(), None);
    }

    #[test]
    fn read_bytes_is_bounded() {
        let mut reader = WireReader::new(Bytes::from_static(b"abc"));
        assert_eq!(reader.read_bytes(2).expect("bytes"), Bytes::from_static(b"ab"));
        assert!(reader.read_bytes(2).is_err());
        assert_eq!(reader.rest(), Bytes::from_static(b"c"));
    }
}
