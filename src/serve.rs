//! Purpose: Framed stdio transport in front of one port.
//! Exports: `serve`, `stat`.
//! Role: Reads `length u32 BE | command` frames from stdin, writes reply frames to stdout.
//! Invariants: stdout only ever carries whole reply frames.
//! Invariants: stdin EOF or a shutdown signal drains the port before exiting.
use std::path::PathBuf;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::info;

use fileport::core::command::Opcode;
use fileport::core::config::PortConfig;
use fileport::core::error::{Error, ErrorKind};
use fileport::core::fs::FileInfo;
use fileport::core::reply::Reply;
use fileport::core::wire::path_to_bytes;
use fileport::runtime::spawn_port;

pub(super) async fn serve(config: PortConfig) -> Result<(), Error> {
    info!(short_circuit = config.short_circuit, "serving port on stdio");
    let (replies, mut reply_rx) = mpsc::unbounded_channel::<Bytes>();
    let port = spawn_port(config, replies);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(reply) = reply_rx.recv().await {
            write_frame(&mut stdout, &reply).await?;
        }
        Ok::<(), Error>(())
    });

    let mut stdin = tokio::io::stdin();
    let intake = async {
        while let Some(frame) = read_frame(&mut stdin).await? {
            port.command(frame)?;
        }
        Ok::<(), Error>(())
    };
    tokio::select! {
        result = intake => {
            result?;
            info!("stdin closed; draining port");
        }
        _ = shutdown_signal() => info!("shutdown signal received; draining port"),
    }

    port.shutdown().await?;
    writer.await.map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("reply writer panicked")
            .with_source(err)
    })?
}

pub(super) async fn stat(config: PortConfig, path: PathBuf) -> Result<FileInfo, Error> {
    let (replies, mut reply_rx) = mpsc::unbounded_channel::<Bytes>();
    let port = spawn_port(config, replies);

    let mut frame = BytesMut::new();
    frame.put_u8(Opcode::Fstat as u8);
    frame.put_slice(&path_to_bytes(&path));
    frame.put_u8(0);
    port.command(frame.freeze())?;

    let raw = reply_rx.recv().await.ok_or_else(|| {
        Error::new(ErrorKind::Internal).with_message("port closed without replying")
    })?;
    port.shutdown().await?;
    match Reply::decode(raw)? {
        Reply::Info(info) => Ok(*info),
        Reply::Error(errno) => Err(Error::new(ErrorKind::Io)
            .with_message("stat failed")
            .with_path(path)
            .with_errno(errno)),
        other => Err(Error::new(ErrorKind::Internal)
            .with_message(format!("unexpected reply tag {}", other.tag()))),
    }
}

/// Reads one frame. `None` on a clean EOF at a frame boundary.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Bytes>, Error> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => {
            return Err(Error::new(ErrorKind::Io)
                .with_message("failed to read frame length")
                .with_source(err));
        }
    }
    let len = u32::from_be_bytes(len) as usize;
    let mut payload = Vec::new();
    payload.try_reserve_exact(len).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("cannot buffer a {len} byte frame"))
            .with_source(err)
    })?;
    payload.resize(len, 0);
    reader.read_exact(&mut payload).await.map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("truncated command frame")
            .with_source(err)
    })?;
    Ok(Some(Bytes::from(payload)))
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<(), Error> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        Error::new(ErrorKind::Internal).with_message("reply exceeds the frame size limit")
    })?;
    let io_err = |err: std::io::Error| {
        Error::new(ErrorKind::Io)
            .with_message("failed to write reply frame")
            .with_source(err)
    };
    writer.write_all(&len.to_be_bytes()).await.map_err(io_err)?;
    writer.write_all(payload).await.map_err(io_err)?;
    writer.flush().await.map_err(io_err)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}
