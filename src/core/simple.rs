//! Purpose: Single-shot path operations (mkdir, delete, rename, stat, readdir, ...).
//! Exports: `SimpleOp`, `SimpleTask`.
//! Role: One OS call per task; never continues; always replies.
//! Invariants: Failures are classified into an `Errno` inside perform.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::core::command::WriteInfo;
use crate::core::errno::Errno;
use crate::core::fs::FileInfo;
use crate::core::port::Port;
use crate::core::reply::Reply;
use crate::core::task::Progress;
use crate::core::wire::path_to_bytes;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SimpleOp {
    Mkdir(PathBuf),
    Rmdir(PathBuf),
    Delete(PathBuf),
    Rename { from: PathBuf, to: PathBuf },
    Link { existing: PathBuf, new: PathBuf },
    Symlink { target: PathBuf, link: PathBuf },
    Readlink(PathBuf),
    Stat(PathBuf),
    Lstat(PathBuf),
    Chdir(PathBuf),
    Pwd,
    Readdir(PathBuf),
    WriteInfo { path: PathBuf, info: WriteInfo },
    AltName(PathBuf),
}

pub struct SimpleTask {
    op: SimpleOp,
    output: Vec<Reply>,
}

impl SimpleTask {
    pub fn new(op: SimpleOp) -> Self {
        Self {
            op,
            output: Vec::new(),
        }
    }

    pub(crate) fn perform(&mut self) -> Result<Progress, Errno> {
        self.output = run(&self.op).map_err(|err| Errno::from_io(&err))?;
        Ok(Progress::Done)
    }

    pub(crate) fn complete(self, outcome: Result<(), Errno>, port: &mut Port) {
        match outcome {
            Ok(()) => {
                for reply in self.output {
                    port.reply(reply);
                }
            }
            Err(errno) => port.reply(Reply::Error(errno)),
        }
    }
}

fn run(op: &SimpleOp) -> io::Result<Vec<Reply>> {
    let reply = match op {
        SimpleOp::Mkdir(path) => {
            fs::create_dir(path)?;
            Reply::ok()
        }
        SimpleOp::Rmdir(path) => {
            fs::remove_dir(path)?;
            Reply::ok()
        }
        SimpleOp::Delete(path) => {
            fs::remove_file(path)?;
            Reply::ok()
        }
        SimpleOp::Rename { from, to } => {
            fs::rename(from, to)?;
            Reply::ok()
        }
        SimpleOp::Link { existing, new } => {
            fs::hard_link(existing, new)?;
            Reply::ok()
        }
        SimpleOp::Symlink { target, link } => {
            symlink(target, link)?;
            Reply::ok()
        }
        SimpleOp::Readlink(path) => Reply::Ok(path_to_bytes(&fs::read_link(path)?)),
        SimpleOp::Stat(path) => Reply::Info(Box::new(FileInfo::from_metadata(&fs::metadata(path)?))),
        SimpleOp::Lstat(path) => {
            Reply::Info(Box::new(FileInfo::from_metadata(&fs::symlink_metadata(path)?)))
        }
        SimpleOp::Chdir(path) => {
            std::env::set_current_dir(path)?;
            Reply::ok()
        }
        SimpleOp::Pwd => Reply::Ok(path_to_bytes(&std::env::current_dir()?)),
        SimpleOp::Readdir(path) => return readdir(path),
        SimpleOp::WriteInfo { path, info } => {
            write_info(path, info)?;
            Reply::ok()
        }
        SimpleOp::AltName(_) => return Err(io::Error::from(io::ErrorKind::Unsupported)),
    };
    Ok(vec![reply])
}

fn readdir(path: &Path) -> io::Result<Vec<Reply>> {
    let mut replies = Vec::new();
    for entry in fs::read_dir(path)? {
        let name = entry?.file_name();
        replies.push(Reply::Ok(name_bytes(&name)));
    }
    replies.push(Reply::ok());
    Ok(replies)
}

#[cfg(unix)]
fn name_bytes(name: &std::ffi::OsStr) -> Bytes {
    use std::os::unix::ffi::OsStrExt;
    Bytes::copy_from_slice(name.as_bytes())
}

#[cfg(not(unix))]
fn name_bytes(name: &std::ffi::OsStr) -> Bytes {
    Bytes::from(name.to_string_lossy().into_owned())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

fn write_info(path: &Path, info: &WriteInfo) -> io::Result<()> {
    apply_owner_and_mode(path, info)?;
    set_times(path, info.atime, info.mtime)
}

#[cfg(unix)]
fn apply_owner_and_mode(path: &Path, info: &WriteInfo) -> io::Result<()> {
    use crate::core::command::KEEP_ID;
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(info.mode & 0o7777))?;
    let uid = (info.uid != KEEP_ID).then_some(info.uid);
    let gid = (info.gid != KEEP_ID).then_some(info.gid);
    if uid.is_some() || gid.is_some() {
        std::os::unix::fs::chown(path, uid, gid)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_owner_and_mode(_path: &Path, _info: &WriteInfo) -> io::Result<()> {
    Ok(())
}

/// Sets access and modification times by path, so the new mode never gates it.
#[cfg(unix)]
fn set_times(path: &Path, atime: i64, mtime: i64) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let raw = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let times = [timespec(atime), timespec(mtime)];
    // SAFETY: `raw` is NUL-terminated and `times` holds the two entries utimensat reads.
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, raw.as_ptr(), times.as_ptr(), 0) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(unix)]
fn timespec(seconds: i64) -> libc::timespec {
    libc::timespec {
        tv_sec: seconds as libc::time_t,
        tv_nsec: 0,
    }
}

#[cfg(not(unix))]
fn set_times(path: &Path, atime: i64, mtime: i64) -> io::Result<()> {
    let file = fs::File::options().write(true).open(path)?;
    let times = fs::FileTimes::new()
        .set_accessed(from_unix_seconds(atime))
        .set_modified(from_unix_seconds(mtime));
    file.set_times(times)
}

#[cfg(not(unix))]
fn from_unix_seconds(seconds: i64) -> std::time::SystemTime {
    let offset = std::time::Duration::from_secs(seconds.unsigned_abs());
    if seconds >= 0 {
        std::time::UNIX_EPOCH + offset
    } else {
        std::time::UNIX_EPOCH - offset
    }
}
