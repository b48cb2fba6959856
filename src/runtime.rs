//! Purpose: tokio owner context for ports: one actor task per port.
//! Exports: `spawn_port`, `PortHandle`, `PortEvent`, `TokioExecutor`.
//! Role: Supplies the worker pool (`spawn_blocking`) and timers (`tokio::time`) to `core::port`.
//! Invariants: Only the actor task touches its `Port`; pool and timers report back as wakeups.
//! Invariants: Shutdown flushes and keeps the actor alive until the port is quiescent.
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::core::config::PortConfig;
use crate::core::dispatch::Executor;
use crate::core::error::{Error, ErrorKind};
use crate::core::port::Port;
use crate::core::task::Task;
use crate::core::timer::{TimerId, TimerToken};

/// Requests from the transport side.
#[derive(Debug)]
pub enum PortEvent {
    Command(Bytes),
    /// Answered once the flush write task is enqueued.
    Flush(oneshot::Sender<()>),
    /// Answered once the port has drained to quiescence.
    Shutdown(oneshot::Sender<()>),
}

/// Results coming back from the pool and the timers.
enum Wakeup {
    Performed(Box<Task>),
    Timeout(TimerId),
}

pub struct TokioExecutor {
    wakeups: mpsc::UnboundedSender<Wakeup>,
    next_timer: u64,
}

impl Executor for TokioExecutor {
    fn submit(&mut self, mut task: Box<Task>) {
        let wakeups = self.wakeups.clone();
        tokio::task::spawn_blocking(move || {
            task.perform();
            if wakeups.send(Wakeup::Performed(task)).is_err() {
                debug!("port gone before perform finished");
            }
        });
    }

    fn arm_timer(&mut self, delay: Duration) -> TimerToken {
        self.next_timer += 1;
        let id = TimerId(self.next_timer);
        let wakeups = self.wakeups.clone();
        let sleeper = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = wakeups.send(Wakeup::Timeout(id));
        });
        TimerToken::with_abort(id, sleeper.abort_handle())
    }
}

#[derive(Clone, Debug)]
pub struct PortHandle {
    events: mpsc::UnboundedSender<PortEvent>,
}

impl PortHandle {
    pub fn command(&self, frame: Bytes) -> Result<(), Error> {
        self.events.send(PortEvent::Command(frame)).map_err(|_| stopped())
    }

    pub async fn flush(&self) -> Result<(), Error> {
        let (done, wait) = oneshot::channel();
        self.events.send(PortEvent::Flush(done)).map_err(|_| stopped())?;
        wait.await.map_err(|_| stopped())
    }

    pub async fn shutdown(self) -> Result<(), Error> {
        let (done, wait) = oneshot::channel();
        self.events.send(PortEvent::Shutdown(done)).map_err(|_| stopped())?;
        wait.await.map_err(|_| stopped())
    }
}

fn stopped() -> Error {
    Error::new(ErrorKind::Internal).with_message("port actor stopped")
}

/// Spawns a port actor on the current tokio runtime. Encoded replies go to `replies`.
pub fn spawn_port(config: PortConfig, replies: mpsc::UnboundedSender<Bytes>) -> PortHandle {
    let (events, event_rx) = mpsc::unbounded_channel();
    let (wakeups, wakeup_rx) = mpsc::unbounded_channel();
    let executor = TokioExecutor {
        wakeups,
        next_timer: 0,
    };
    let port = Port::new(config, Box::new(executor), Box::new(replies));
    tokio::spawn(run_port(port, event_rx, wakeup_rx));
    PortHandle { events }
}

async fn run_port(
    mut port: Port,
    mut events: mpsc::UnboundedReceiver<PortEvent>,
    mut wakeups: mpsc::UnboundedReceiver<Wakeup>,
) {
    let mut closing = false;
    let mut waiters: Vec<oneshot::Sender<()>> = Vec::new();
    loop {
        if closing && port.is_quiescent() {
            break;
        }
        tokio::select! {
            event = events.recv(), if !closing => match event {
                Some(PortEvent::Command(frame)) => port.command(frame),
                Some(PortEvent::Flush(done)) => {
                    port.flush();
                    let _ = done.send(());
                }
                Some(PortEvent::Shutdown(done)) => {
                    port.flush();
                    waiters.push(done);
                    closing = true;
                }
                None => {
                    port.flush();
                    closing = true;
                }
            },
            Some(wakeup) = wakeups.recv() => match wakeup {
                Wakeup::Performed(task) => port.performed(task),
                Wakeup::Timeout(id) => port.timeout(id),
            },
            else => break,
        }
    }
    info!("port drained; actor exiting");
    for done in waiters {
        let _ = done.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::spawn_port;
    use crate::core::command::Opcode;
    use crate::core::config::PortConfig;
    use crate::core::fs::OpenFlags;
    use crate::core::reply::{RESP_NUMBER, RESP_OK};
    use bytes::Bytes;
    use std::path::Path;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn frame(opcode: Opcode, payload: &[u8]) -> Bytes {
        let mut raw = vec![opcode as u8];
        raw.extend_from_slice(payload);
        Bytes::from(raw)
    }

    fn path_arg(path: &Path) -> Vec<u8> {
        let mut raw = path.to_str().expect("utf8 path").as_bytes().to_vec();
        raw.push(0);
        raw
    }

    #[tokio::test]
    async fn read_file_answers_through_the_pool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data");
        std::fs::write(&path, b"pooled").expect("seed");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let port = spawn_port(PortConfig::default(), tx);
        port.command(frame(Opcode::ReadFile, &path_arg(&path))).expect("command");

        let reply = rx.recv().await.expect("reply");
        assert_eq!(reply[0], RESP_OK);
        assert_eq!(&reply[1..], b"pooled");
        port.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn shutdown_waits_for_queued_work() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let port = spawn_port(PortConfig::default(), tx);
        for name in ["a", "b", "c"] {
            port.command(frame(Opcode::Mkdir, &path_arg(&dir.path().join(name))))
                .expect("command");
        }
        port.shutdown().await.expect("shutdown");

        let mut replies = Vec::new();
        while let Ok(reply) = rx.try_recv() {
            replies.push(reply);
        }
        assert_eq!(replies.len(), 3);
        assert!(replies.iter().all(|reply| reply[0] == RESP_OK));
        assert!(dir.path().join("c").is_dir());
    }

    #[tokio::test]
    async fn delayed_writes_are_flushed_by_the_timer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let port = spawn_port(PortConfig::default(), tx);

        let mut open = OpenFlags::WRITE.to_be_bytes().to_vec();
        open.extend_from_slice(&path_arg(&path));
        port.command(frame(Opcode::Open, &open)).expect("open");
        assert_eq!(rx.recv().await.expect("open reply")[0], RESP_OK);
        let mut option = vec![0u8];
        option.extend_from_slice(&1024u32.to_be_bytes());
        option.extend_from_slice(&5u32.to_be_bytes());
        port.command(frame(Opcode::SetOption, &option)).expect("set option");
        port.command(frame(Opcode::Write, b"later")).expect("write");

        assert_eq!(rx.recv().await.expect("option reply")[0], RESP_OK);
        // buffered writes are answered before they reach the file
        assert_eq!(rx.recv().await.expect("write reply")[0], RESP_NUMBER);

        let mut flushed = false;
        for _ in 0..200 {
            if std::fs::read(&path).map(|data| data == b"later").unwrap_or(false) {
                flushed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(flushed, "timer never flushed the buffered write");
        port.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn flush_returns_once_enqueued() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let port = spawn_port(PortConfig::default(), tx);
        port.flush().await.expect("flush");
        port.shutdown().await.expect("shutdown");
    }
}
