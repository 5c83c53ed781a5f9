//! Async typed message channel over an inherited unix stream socket.
//!
//! Sends are buffered composes drained when the peer is writable, so the
//! event loop never blocks on a slow peer. A descriptor travels as
//! `SCM_RIGHTS` ancillary data attached to the first byte of its message;
//! received descriptors queue up and are paired with the next message
//! whose type carries one.

use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tokio::io::unix::AsyncFd;
use tokio::io::{Interest, Ready};
use tracing::warn;
use unwind_dns_application::{QueryRequest, ResolverPort};
use unwind_dns_domain::{DnsProposal, FrontendError};

use super::message::{
    encode_proposal, encode_query, Imsg, MsgType, IMSG_HEADER_SIZE, MAX_IMSG_PAYLOAD,
};

const READ_CHUNK_SIZE: usize = 65536;
const CMSG_BUF_SIZE: usize = 256;

struct PendingWrite {
    bytes: Vec<u8>,
    offset: usize,
    fd: Option<OwnedFd>,
}

pub struct IpcChannel {
    fd: AsyncFd<OwnedFd>,
    pid: u32,
    rbuf: Vec<u8>,
    rchunk: Vec<u8>,
    rfds: VecDeque<OwnedFd>,
    wqueue: VecDeque<PendingWrite>,
    eof: bool,
}

impl IpcChannel {
    /// Wraps an inherited socket. The descriptor is switched to
    /// non-blocking mode; the tokio reactor drives readiness.
    pub fn from_owned_fd(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self {
            fd: AsyncFd::new(fd)?,
            pid: std::process::id(),
            rbuf: Vec::new(),
            rchunk: vec![0u8; READ_CHUNK_SIZE],
            rfds: VecDeque::new(),
            wqueue: VecDeque::new(),
            eof: false,
        })
    }

    pub fn compose(&mut self, kind: MsgType, payload: &[u8]) -> Result<(), FrontendError> {
        self.compose_full(kind as u32, self.pid, payload, None)
    }

    pub fn compose_with_fd(
        &mut self,
        kind: MsgType,
        payload: &[u8],
        fd: OwnedFd,
    ) -> Result<(), FrontendError> {
        self.compose_full(kind as u32, self.pid, payload, Some(fd))
    }

    /// Raw-type compose used when relaying messages whose kind is only
    /// known as a wire value.
    pub fn compose_full(
        &mut self,
        kind: u32,
        pid: u32,
        payload: &[u8],
        fd: Option<OwnedFd>,
    ) -> Result<(), FrontendError> {
        if payload.len() > MAX_IMSG_PAYLOAD {
            return Err(FrontendError::Ipc(format!(
                "payload too large: {}",
                payload.len()
            )));
        }
        let mut bytes = Vec::with_capacity(IMSG_HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&kind.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&pid.to_le_bytes());
        bytes.extend_from_slice(payload);
        self.wqueue.push_back(PendingWrite {
            bytes,
            offset: 0,
            fd,
        });
        Ok(())
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.wqueue.is_empty()
    }

    /// One step of channel I/O: returns the next complete message,
    /// `None` when the peer closed the socket. Buffered writes are
    /// drained opportunistically whenever the socket is writable.
    pub async fn io_step(&mut self) -> Result<Option<Imsg>, FrontendError> {
        let raw = self.fd.get_ref().as_raw_fd();
        loop {
            if let Some(msg) = self.parse_next()? {
                return Ok(Some(msg));
            }
            if self.eof {
                return Ok(None);
            }

            let interest = if self.wqueue.is_empty() {
                Interest::READABLE
            } else {
                Interest::READABLE | Interest::WRITABLE
            };
            let mut guard = self
                .fd
                .ready(interest)
                .await
                .map_err(|e| FrontendError::Ipc(e.to_string()))?;

            if guard.ready().is_writable() {
                match raw_send(raw, &mut self.wqueue) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        guard.clear_ready_matching(Ready::WRITABLE);
                    }
                    Err(e) => return Err(FrontendError::Ipc(e.to_string())),
                }
            }

            if guard.ready().is_readable() {
                match raw_recv(raw, &mut self.rchunk, &mut self.rfds) {
                    Ok(0) => self.eof = true,
                    Ok(n) => self.rbuf.extend_from_slice(&self.rchunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        guard.clear_ready_matching(Ready::READABLE);
                    }
                    Err(e) => return Err(FrontendError::Ipc(e.to_string())),
                }
            }
        }
    }

    /// Best-effort synchronous drain used during shutdown.
    pub fn try_flush(&mut self) {
        let raw = self.fd.get_ref().as_raw_fd();
        let _ = raw_send(raw, &mut self.wqueue);
    }

    fn parse_next(&mut self) -> Result<Option<Imsg>, FrontendError> {
        if self.rbuf.len() < IMSG_HEADER_SIZE {
            return Ok(None);
        }
        let kind = u32::from_le_bytes(self.rbuf[0..4].try_into().unwrap());
        let len = u32::from_le_bytes(self.rbuf[4..8].try_into().unwrap()) as usize;
        let pid = u32::from_le_bytes(self.rbuf[8..12].try_into().unwrap());
        if len > MAX_IMSG_PAYLOAD {
            return Err(FrontendError::Protocol(format!(
                "oversized imsg payload: {}",
                len
            )));
        }
        if self.rbuf.len() < IMSG_HEADER_SIZE + len {
            return Ok(None);
        }
        let payload = self.rbuf[IMSG_HEADER_SIZE..IMSG_HEADER_SIZE + len].to_vec();
        self.rbuf.drain(..IMSG_HEADER_SIZE + len);

        let fd = match MsgType::from_u32(kind) {
            Some(t) if t.carries_fd() => self.rfds.pop_front(),
            _ => None,
        };
        Ok(Some(Imsg {
            kind,
            pid,
            payload,
            fd,
        }))
    }
}

impl ResolverPort for IpcChannel {
    fn forward_query(&mut self, query: &QueryRequest) -> Result<(), FrontendError> {
        let payload = encode_query(query)?;
        self.compose(MsgType::Query, &payload)
    }

    fn replace_dns(&mut self, proposal: &DnsProposal) -> Result<(), FrontendError> {
        self.compose(MsgType::ReplaceDns, &encode_proposal(proposal))
    }

    fn network_changed(&mut self) -> Result<(), FrontendError> {
        self.compose(MsgType::NetworkChanged, &[])
    }

    fn new_trust_anchor(&mut self, anchor: &str) -> Result<(), FrontendError> {
        self.compose(MsgType::NewTa, anchor.as_bytes())
    }

    fn trust_anchors_done(&mut self) -> Result<(), FrontendError> {
        self.compose(MsgType::NewTasDone, &[])
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let fl = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if fl < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Writes queued messages until the queue empties or the socket blocks.
/// The fd rides with the first byte of its message; once any bytes of the
/// message are out, the descriptor has been delivered and is closed here.
fn raw_send(fd: RawFd, wqueue: &mut VecDeque<PendingWrite>) -> io::Result<()> {
    while let Some(head) = wqueue.front_mut() {
        let remaining = &head.bytes[head.offset..];
        let iov = libc::iovec {
            iov_base: remaining.as_ptr() as *mut libc::c_void,
            iov_len: remaining.len(),
        };
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = &iov as *const libc::iovec as *mut libc::iovec;
        msg.msg_iovlen = 1;

        let mut cmsg_buf = [0u8; CMSG_BUF_SIZE];
        if let Some(pass_fd) = &head.fd {
            let cmsg_space = unsafe { libc::CMSG_SPACE(4) } as usize;
            msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
            msg.msg_controllen = cmsg_space as _;
            unsafe {
                let cmsg = libc::CMSG_FIRSTHDR(&msg);
                (*cmsg).cmsg_level = libc::SOL_SOCKET;
                (*cmsg).cmsg_type = libc::SCM_RIGHTS;
                (*cmsg).cmsg_len = libc::CMSG_LEN(4) as _;
                let data = libc::CMSG_DATA(cmsg) as *mut RawFd;
                data.write_unaligned(pass_fd.as_raw_fd());
            }
        }

        let n = unsafe { libc::sendmsg(fd, &msg, libc::MSG_DONTWAIT) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }

        head.fd = None;
        head.offset += n as usize;
        if head.offset >= head.bytes.len() {
            wqueue.pop_front();
        }
    }
    Ok(())
}

/// One `recvmsg` into `chunk`, collecting any passed descriptors.
/// Returns the byte count; 0 means the peer closed.
fn raw_recv(fd: RawFd, chunk: &mut [u8], rfds: &mut VecDeque<OwnedFd>) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: chunk.as_mut_ptr() as *mut libc::c_void,
        iov_len: chunk.len(),
    };
    let mut cmsg_buf = [0u8; CMSG_BUF_SIZE];
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_buf.len() as _;

    let n = loop {
        let n = unsafe { libc::recvmsg(fd, &mut msg, libc::MSG_DONTWAIT | libc::MSG_CMSG_CLOEXEC) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }
        break n as usize;
    };

    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        warn!("control data truncated on ipc channel");
    }

    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data_len = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                let count = data_len / std::mem::size_of::<RawFd>();
                let data = libc::CMSG_DATA(cmsg) as *const RawFd;
                for i in 0..count {
                    let raw = data.add(i).read_unaligned();
                    rfds.push_back(OwnedFd::from_raw_fd(raw));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok(n)
}
