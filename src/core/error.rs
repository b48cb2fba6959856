use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use crate::core::errno::Errno;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Protocol,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    path: Option<PathBuf>,
    errno: Option<Errno>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            path: None,
            errno: None,
            source: None,
        }
    }

    /// Malformed inbound command; answered with `einval` unless a code is attached.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol).with_message(message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    /// POSIX code reported on the wire for this error.
    pub fn errno(&self) -> Errno {
        self.errno.unwrap_or(match self.kind {
            ErrorKind::Protocol | ErrorKind::Usage => Errno::Inval,
            ErrorKind::Io => Errno::Io,
            ErrorKind::Internal => Errno::Unknown,
        })
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_errno(mut self, errno: Errno) -> Self {
        self.errno = Some(errno);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        if let Some(errno) = self.errno {
            write!(f, " ({})", errno.as_str())?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Protocol => 3,
        ErrorKind::Io => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::{to_exit_code, Error, ErrorKind};
    use crate::core::errno::Errno;

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::Protocol, 3),
            (ErrorKind::Io, 4),
        ];
        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn protocol_errors_default_to_einval() {
        let err = Error::protocol("empty command");
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.errno(), Errno::Inval);
        assert_eq!(err.message(), Some("empty command"));
    }

    #[test]
    fn attached_errno_wins() {
        let err = Error::protocol("empty path").with_errno(Errno::Noent);
        assert_eq!(err.errno(), Errno::Noent);
        assert!(err.to_string().contains("enoent"));
    }
}
