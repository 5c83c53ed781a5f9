//! TCP sessions: length-prefixed framed requests with a hard idle
//! deadline.
//!
//! Each accepted connection runs in its own task that owns the socket.
//! The task reads the 2-byte length prefix and the body, half-closes the
//! read side, and hands the request to the event loop together with a
//! one-shot reply channel. The event loop releases a connection by
//! dropping that channel; the deadline covers the whole conversation
//! from accept to the last response byte.

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Hard per-connection deadline.
pub const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Backoff before accepting again once the descriptor budget is spent.
pub const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Descriptors kept free for everything that is not a TCP client.
pub const FD_RESERVE: usize = 5;

/// Initial buffered-read size for the framed request.
const TCP_READ_BUF: usize = 512;

pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub fn from_owned_fd(fd: OwnedFd) -> io::Result<Self> {
        let listener = std::net::TcpListener::from(fd);
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener: TcpListener::from_std(listener)?,
        })
    }

    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Events a connection task reports to the event loop.
#[derive(Debug)]
pub enum TcpEvent {
    /// A complete framed request; `reply` delivers the answer bytes and
    /// is dropped by the event loop to release the connection early.
    Request {
        conn: u64,
        from: SocketAddr,
        wire: Vec<u8>,
        reply: oneshot::Sender<Vec<u8>>,
    },
    /// The connection ended: answered, timed out, failed, or closed by
    /// the peer. Always sent exactly once per accepted connection.
    Closed { conn: u64 },
}

/// Spawns the owning task for one accepted connection.
pub fn spawn_session(
    conn: u64,
    stream: TcpStream,
    from: SocketAddr,
    events: mpsc::Sender<TcpEvent>,
) {
    tokio::spawn(async move {
        match tokio::time::timeout(TCP_IDLE_TIMEOUT, session(conn, stream, from, &events)).await {
            Err(_) => debug!(conn, client = %from, "tcp session timed out"),
            Ok(Err(e)) => debug!(conn, client = %from, error = %e, "tcp session failed"),
            Ok(Ok(())) => {}
        }
        let _ = events.send(TcpEvent::Closed { conn }).await;
    });
}

async fn session(
    conn: u64,
    mut stream: TcpStream,
    from: SocketAddr,
    events: &mpsc::Sender<TcpEvent>,
) -> io::Result<()> {
    let raw_fd = stream.as_raw_fd();
    let (rd, mut wr) = stream.split();
    let mut reader = BufReader::with_capacity(TCP_READ_BUF, rd);

    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;

    let mut wire = vec![0u8; len];
    reader.read_exact(&mut wire).await?;
    drop(reader);

    // The request is complete; nothing more is read from this client.
    shutdown_read(raw_fd);

    let (reply_tx, reply_rx) = oneshot::channel();
    if events
        .send(TcpEvent::Request {
            conn,
            from,
            wire,
            reply: reply_tx,
        })
        .await
        .is_err()
    {
        return Ok(());
    }

    let answer = match reply_rx.await {
        Ok(answer) => answer,
        // Released by the event loop without an answer.
        Err(_) => return Ok(()),
    };

    wr.write_all(&(answer.len() as u16).to_be_bytes()).await?;
    wr.write_all(&answer).await?;
    wr.flush().await?;
    Ok(())
}

fn shutdown_read(fd: RawFd) {
    unsafe {
        libc::shutdown(fd, libc::SHUT_RD);
    }
}
