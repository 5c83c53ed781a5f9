//! Control-socket relay.
//!
//! Local control clients connect over the unix socket the parent opened
//! for us and speak the same typed message framing as the process
//! channels. Requests are forwarded to the resolver stamped with the
//! client's pid; `CTL_*` replies come back through the event loop and are
//! routed to the client whose pid matches.

use std::io;
use std::os::fd::OwnedFd;

use rustc_hash::FxHashMap;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ipc::IpcChannel;

#[derive(Debug)]
pub enum ControlEvent {
    Request {
        client: u64,
        kind: u32,
        pid: u32,
        payload: Vec<u8>,
    },
    Closed {
        client: u64,
    },
}

pub struct ControlListener {
    listener: UnixListener,
}

impl ControlListener {
    pub fn from_owned_fd(fd: OwnedFd) -> io::Result<Self> {
        let listener = std::os::unix::net::UnixListener::from(fd);
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener: UnixListener::from_std(listener)?,
        })
    }

    pub async fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }
}

struct ClientHandle {
    pid: Option<u32>,
    tx: mpsc::Sender<(u32, u32, Vec<u8>)>,
}

/// Live control clients, keyed by an internal id. Each client runs in
/// its own task owning the connection; the event loop only sees typed
/// events and reply handles.
#[derive(Default)]
pub struct ControlClients {
    clients: FxHashMap<u64, ClientHandle>,
    next_id: u64,
}

impl ControlClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stream: UnixStream, events: mpsc::Sender<ControlEvent>) {
        let client = self.next_id;
        self.next_id += 1;

        let (reply_tx, reply_rx) = mpsc::channel(16);
        self.clients.insert(
            client,
            ClientHandle {
                pid: None,
                tx: reply_tx,
            },
        );
        spawn_client(client, stream, events, reply_rx);
    }

    pub fn note_pid(&mut self, client: u64, pid: u32) {
        if let Some(handle) = self.clients.get_mut(&client) {
            handle.pid = Some(pid);
        }
    }

    pub fn remove(&mut self, client: u64) {
        self.clients.remove(&client);
    }

    /// Routes a resolver reply to the client whose pid matches the
    /// message header. Unmatched replies are dropped quietly; the client
    /// may simply have disconnected.
    pub fn relay(&mut self, pid: u32, kind: u32, payload: &[u8]) {
        for handle in self.clients.values() {
            if handle.pid == Some(pid) {
                if handle.tx.try_send((kind, pid, payload.to_vec())).is_err() {
                    debug!(pid, "control client reply queue full");
                }
                return;
            }
        }
        debug!(pid, kind, "no control client for relay");
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn spawn_client(
    client: u64,
    stream: UnixStream,
    events: mpsc::Sender<ControlEvent>,
    mut replies: mpsc::Receiver<(u32, u32, Vec<u8>)>,
) {
    tokio::spawn(async move {
        let fd: OwnedFd = match stream.into_std() {
            Ok(std_stream) => std_stream.into(),
            Err(e) => {
                warn!(error = %e, "control client setup failed");
                let _ = events.send(ControlEvent::Closed { client }).await;
                return;
            }
        };
        let mut chan = match IpcChannel::from_owned_fd(fd) {
            Ok(chan) => chan,
            Err(e) => {
                warn!(error = %e, "control client setup failed");
                let _ = events.send(ControlEvent::Closed { client }).await;
                return;
            }
        };

        loop {
            tokio::select! {
                msg = chan.io_step() => match msg {
                    Ok(Some(msg)) => {
                        let forwarded = events
                            .send(ControlEvent::Request {
                                client,
                                kind: msg.kind,
                                pid: msg.pid,
                                payload: msg.payload,
                            })
                            .await;
                        if forwarded.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "control client error");
                        break;
                    }
                },
                reply = replies.recv() => match reply {
                    Some((kind, pid, payload)) => {
                        if chan.compose_full(kind, pid, &payload, None).is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        let _ = events.send(ControlEvent::Closed { client }).await;
    });
}
