//! Purpose: Closed set of POSIX-style codes reported by port operations.
//! Exports: `Errno`.
//! Role: Value object for operational failures; carried by tasks and sticky port state.
//! Invariants: Symbols are stable wire strings; unknown failures map to `unknown`.
use std::io;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Errno {
    Noent,
    Exist,
    Perm,
    Acces,
    Nomem,
    Inval,
    Io,
    Badf,
    Notdir,
    Isdir,
    Notempty,
    Nospc,
    Xdev,
    Notsup,
    Unknown,
}

impl Errno {
    pub fn as_str(self) -> &'static str {
        match self {
            Errno::Noent => "enoent",
            Errno::Exist => "eexist",
            Errno::Perm => "eperm",
            Errno::Acces => "eacces",
            Errno::Nomem => "enomem",
            Errno::Inval => "einval",
            Errno::Io => "eio",
            Errno::Badf => "ebadf",
            Errno::Notdir => "enotdir",
            Errno::Isdir => "eisdir",
            Errno::Notempty => "enotempty",
            Errno::Nospc => "enospc",
            Errno::Xdev => "exdev",
            Errno::Notsup => "enotsup",
            Errno::Unknown => "unknown",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        const ALL: [Errno; 15] = [
            Errno::Noent,
            Errno::Exist,
            Errno::Perm,
            Errno::Acces,
            Errno::Nomem,
            Errno::Inval,
            Errno::Io,
            Errno::Badf,
            Errno::Notdir,
            Errno::Isdir,
            Errno::Notempty,
            Errno::Nospc,
            Errno::Xdev,
            Errno::Notsup,
            Errno::Unknown,
        ];
        ALL.into_iter().find(|errno| errno.as_str() == symbol)
    }

    /// Classifies an I/O failure: raw OS code first, then the portable error kind.
    pub fn from_io(err: &io::Error) -> Self {
        if let Some(errno) = err.raw_os_error().and_then(from_raw) {
            return errno;
        }
        match err.kind() {
            io::ErrorKind::OutOfMemory => Errno::Nomem,
            io::ErrorKind::PermissionDenied => Errno::Perm,
            io::ErrorKind::NotFound => Errno::Noent,
            io::ErrorKind::AlreadyExists => Errno::Exist,
            io::ErrorKind::InvalidInput => Errno::Inval,
            io::ErrorKind::Unsupported => Errno::Notsup,
            _ => Errno::Unknown,
        }
    }
}

impl From<io::Error> for Errno {
    fn from(err: io::Error) -> Self {
        Errno::from_io(&err)
    }
}

#[cfg(unix)]
fn from_raw(code: i32) -> Option<Errno> {
    let errno = match code {
        libc::ENOENT => Errno::Noent,
        libc::EEXIST => Errno::Exist,
        libc::EPERM => Errno::Perm,
        libc::EACCES => Errno::Acces,
        libc::ENOMEM => Errno::Nomem,
        libc::EINVAL => Errno::Inval,
        libc::EIO => Errno::Io,
        libc::EBADF => Errno::Badf,
        libc::ENOTDIR => Errno::Notdir,
        libc::EISDIR => Errno::Isdir,
        libc::ENOTEMPTY => Errno::Notempty,
        libc::ENOSPC => Errno::Nospc,
        libc::EXDEV => Errno::Xdev,
        libc::ENOTSUP => Errno::Notsup,
        _ => return None,
    };
    Some(errno)
}

#[cfg(not(unix))]
fn from_raw(_code: i32) -> Option<Errno> {
    None
}
