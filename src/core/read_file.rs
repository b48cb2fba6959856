//! Purpose: Whole-file read as an explicit state machine, one segment per perform.
//! Exports: `ReadFileTask`.
//! Role: Continuation task for the read-whole-file command.
//! Invariants: The destination is sized from the file length once; a short read is `eio`.
//! Invariants: The file handle is dropped before the task reports `Done`.
use std::fs::File;
use std::mem;
use std::path::PathBuf;

use bytes::Bytes;

use crate::core::errno::Errno;
use crate::core::fs::read_full;
use crate::core::port::Port;
use crate::core::reply::Reply;
use crate::core::task::Progress;

enum Stage {
    Opening,
    Reading {
        file: File,
        data: Vec<u8>,
        filled: usize,
    },
    Done(Vec<u8>),
}

pub struct ReadFileTask {
    path: PathBuf,
    segment: usize,
    stage: Stage,
}

impl ReadFileTask {
    pub fn new(path: PathBuf, segment: usize) -> Self {
        Self {
            path,
            segment: segment.max(1),
            stage: Stage::Opening,
        }
    }

    pub(crate) fn perform(&mut self) -> Result<Progress, Errno> {
        if let Stage::Opening = self.stage {
            self.stage = self.open()?;
        }
        let Stage::Reading { file, data, filled } = &mut self.stage else {
            return Ok(Progress::Done);
        };
        let end = data.len().min(*filled + self.segment);
        let got = read_full(&*file, &mut data[*filled..end]).map_err(Errno::from)?;
        if got < end - *filled {
            // file shrank underneath us
            return Err(Errno::Io);
        }
        *filled = end;
        if *filled < data.len() {
            return Ok(Progress::Again);
        }
        let data = mem::take(data);
        self.stage = Stage::Done(data);
        Ok(Progress::Done)
    }

    fn open(&self) -> Result<Stage, Errno> {
        let file = File::open(&self.path).map_err(Errno::from)?;
        let meta = file.metadata().map_err(Errno::from)?;
        if meta.is_dir() {
            return Err(Errno::Isdir);
        }
        let len = usize::try_from(meta.len()).map_err(|_| Errno::Nomem)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| Errno::Nomem)?;
        data.resize(len, 0);
        Ok(Stage::Reading {
            file,
            data,
            filled: 0,
        })
    }

    pub(crate) fn complete(self, outcome: Result<(), Errno>, port: &mut Port) {
        let reply = match (outcome, self.stage) {
            (Err(errno), _) => Reply::Error(errno),
            (Ok(()), Stage::Done(data)) => Reply::Ok(Bytes::from(data)),
            (Ok(()), _) => panic!("read-file completed before reaching Done"),
        };
        port.reply(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::{ReadFileTask, Stage};
    use crate::core::errno::Errno;
    use crate::core::task::Progress;

    #[test]
    fn reads_one_segment_per_perform() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data");
        std::fs::write(&path, b"0123456789").expect("seed");

        let mut task = ReadFileTask::new(path, 4);
        assert_eq!(task.perform(), Ok(Progress::Again));
        assert_eq!(task.perform(), Ok(Progress::Again));
        assert_eq!(task.perform(), Ok(Progress::Done));
        match task.stage {
            Stage::Done(data) => assert_eq!(data, b"0123456789"),
            _ => panic!("task did not finish"),
        }
    }

    #[test]
    fn empty_file_finishes_on_first_perform() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").expect("seed");

        let mut task = ReadFileTask::new(path, 4);
        assert_eq!(task.perform(), Ok(Progress::Done));
    }

    #[test]
    fn shrinking_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data");
        std::fs::write(&path, b"0123456789").expect("seed");

        let mut task = ReadFileTask::new(path.clone(), 4);
        assert_eq!(task.perform(), Ok(Progress::Again));
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("reopen")
            .set_len(5)
            .expect("truncate");
        assert_eq!(task.perform(), Err(Errno::Io));
    }

    #[test]
    fn missing_file_is_enoent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut task = ReadFileTask::new(dir.path().join("missing"), 4);
        assert_eq!(task.perform(), Err(Errno::Noent));
    }
}
