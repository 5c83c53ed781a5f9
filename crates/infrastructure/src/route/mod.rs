//! Routing-socket watcher.
//!
//! The kernel publishes interface and DNS-proposal events as
//! variable-length records on the routing socket the parent hands us.
//! The record layout is the platform ABI, mirrored here as explicit
//! offsets so the parser can be exercised against captured buffers. Only
//! three record types matter to the resolver: interface departures,
//! link-state changes, and DNS-server proposals.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};

use tokio::io::unix::AsyncFd;
use tracing::warn;
use unwind_dns_application::ResolverPort;
use unwind_dns_domain::{DnsProposal, FrontendError, ProposalFamily};

pub const ROUTE_SOCKET_BUF_SIZE: usize = 16384;

pub const RTM_VERSION: u8 = 5;
pub const RTM_IFINFO: u8 = 0x0e;
pub const RTM_IFANNOUNCE: u8 = 0x0f;
pub const RTM_PROPOSAL: u8 = 0x13;

pub const RTA_DNS: u32 = 0x1000;
pub const RTAX_DNS: usize = 12;
pub const RTAX_MAX: usize = 15;

pub const IFAN_ARRIVAL: u16 = 0;

const ROUTE_AF_INET: u8 = 2;
const ROUTE_AF_INET6: u8 = 24;

// rt_msghdr field offsets.
const RTM_MSGLEN: usize = 0;
const RTM_VERSION_OFF: usize = 2;
const RTM_TYPE: usize = 3;
const RTM_HDRLEN: usize = 4;
const RTM_INDEX: usize = 6;
const RTM_PRIORITY: usize = 10;
const RTM_ADDRS: usize = 12;

// if_announcemsghdr field offsets.
const IFAN_INDEX: usize = 6;
const IFAN_WHAT: usize = 8;

/// Route events the resolver cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMessage {
    /// Link state changed somewhere; the resolver re-checks its view.
    NetworkChanged,
    /// DNS servers proposed (or withdrawn) for an interface.
    Proposal(DnsProposal),
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_ne_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Sockaddrs inside a route record are padded to long-word boundaries.
fn roundup(len: usize) -> usize {
    if len == 0 {
        8
    } else {
        (len + 7) & !7
    }
}

/// Parses one whole routing-socket record.
///
/// Returns `Ok(None)` for records the frontend ignores (wrong version,
/// uninteresting type, proposals without DNS payload, interface
/// arrivals). Partial records and malformed proposals are errors the
/// caller logs and skips.
pub fn parse_route_message(buf: &[u8]) -> Result<Option<RouteMessage>, FrontendError> {
    if buf.len() < RTM_MSGLEN + 2 {
        return Err(FrontendError::RouteMessage(format!(
            "partial rtm of {} in buffer",
            buf.len()
        )));
    }
    let msglen = read_u16(buf, RTM_MSGLEN) as usize;
    if buf.len() < msglen || msglen < RTM_ADDRS {
        return Err(FrontendError::RouteMessage(format!(
            "partial rtm of {} in buffer",
            buf.len()
        )));
    }
    if buf[RTM_VERSION_OFF] != RTM_VERSION {
        return Ok(None);
    }

    match buf[RTM_TYPE] {
        RTM_IFANNOUNCE => {
            if msglen < IFAN_WHAT + 2 {
                return Err(FrontendError::RouteMessage("short ifannounce".into()));
            }
            if read_u16(buf, IFAN_WHAT) == IFAN_ARRIVAL {
                return Ok(None);
            }
            let if_index = read_u16(buf, IFAN_INDEX) as u32;
            Ok(Some(RouteMessage::Proposal(DnsProposal::withdraw(
                if_index,
            ))))
        }
        RTM_IFINFO => Ok(Some(RouteMessage::NetworkChanged)),
        RTM_PROPOSAL => {
            if msglen < RTM_ADDRS + 4 {
                return Err(FrontendError::RouteMessage("short proposal".into()));
            }
            let addrs = read_u32(buf, RTM_ADDRS);
            if addrs & RTA_DNS == 0 {
                return Ok(None);
            }
            let hdrlen = read_u16(buf, RTM_HDRLEN) as usize;
            let rtdns = find_sockaddr(&buf[..msglen], hdrlen, addrs, RTAX_DNS)?;
            let proposal = parse_rtdns(rtdns, read_u16(buf, RTM_INDEX), buf[RTM_PRIORITY])?;
            Ok(Some(RouteMessage::Proposal(proposal)))
        }
        _ => Ok(None),
    }
}

/// Walks the packed sockaddr list after the fixed header and returns the
/// one at position `want` of the address bitmask.
fn find_sockaddr(
    buf: &[u8],
    hdrlen: usize,
    addrs: u32,
    want: usize,
) -> Result<&[u8], FrontendError> {
    let mut pos = hdrlen;
    for i in 0..RTAX_MAX {
        if addrs & (1 << i) == 0 {
            continue;
        }
        let sa_len = *buf
            .get(pos)
            .ok_or_else(|| FrontendError::RouteMessage("truncated sockaddr list".into()))?
            as usize;
        if i == want {
            return buf
                .get(pos..pos + sa_len)
                .ok_or_else(|| FrontendError::RouteMessage("truncated sockaddr".into()));
        }
        pos += roundup(sa_len);
    }
    Err(FrontendError::RouteMessage("rtdns sockaddr missing".into()))
}

/// Validates the DNS sockaddr payload: it must hold whole addresses of
/// its family.
fn parse_rtdns(rtdns: &[u8], if_index: u16, priority: u8) -> Result<DnsProposal, FrontendError> {
    if rtdns.len() < 2 {
        return Err(FrontendError::RouteMessage("short rtdns sockaddr".into()));
    }
    let family = match rtdns[1] {
        ROUTE_AF_INET => ProposalFamily::V4,
        ROUTE_AF_INET6 => ProposalFamily::V6,
        _ => {
            return Err(FrontendError::RouteMessage(
                "ignoring invalid RTM_PROPOSAL".into(),
            ))
        }
    };
    let proposal = DnsProposal {
        if_index: if_index as u32,
        source: priority,
        family,
        addresses: rtdns[2..].to_vec(),
    };
    if !proposal.is_aligned() {
        return Err(FrontendError::RouteMessage(
            "ignoring invalid RTM_PROPOSAL".into(),
        ));
    }
    Ok(proposal)
}

/// Forwards a parsed route event to the resolver.
pub fn dispatch(
    message: RouteMessage,
    resolver: &mut dyn ResolverPort,
) -> Result<(), FrontendError> {
    match message {
        RouteMessage::NetworkChanged => resolver.network_changed(),
        RouteMessage::Proposal(proposal) => resolver.replace_dns(&proposal),
    }
}

/// Non-blocking reader for the routing socket fd.
pub struct RouteSocket {
    fd: AsyncFd<OwnedFd>,
    buf: Vec<u8>,
}

impl RouteSocket {
    pub fn from_owned_fd(fd: OwnedFd) -> io::Result<Self> {
        let raw = fd.as_raw_fd();
        let fl = unsafe { libc::fcntl(raw, libc::F_GETFL) };
        if fl < 0 || unsafe { libc::fcntl(raw, libc::F_SETFL, fl | libc::O_NONBLOCK) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd: AsyncFd::new(fd)?,
            buf: vec![0u8; ROUTE_SOCKET_BUF_SIZE],
        })
    }

    /// Reads one routing-socket record burst. An empty slice means the
    /// socket closed, which is fatal for the process.
    pub async fn recv(&mut self) -> io::Result<&[u8]> {
        loop {
            let mut guard = self.fd.readable().await?;
            let raw = self.fd.get_ref().as_raw_fd();
            let n = unsafe {
                libc::read(
                    raw,
                    self.buf.as_mut_ptr() as *mut libc::c_void,
                    self.buf.len(),
                )
            };
            if n >= 0 {
                return Ok(&self.buf[..n as usize]);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) => {
                    guard.clear_ready();
                    continue;
                }
                _ => return Err(err),
            }
        }
    }
}

/// Parses and dispatches every record in one read burst, logging and
/// skipping the invalid ones.
pub fn handle_route_buffer(
    buf: &[u8],
    resolver: &mut dyn ResolverPort,
) -> Result<(), FrontendError> {
    match parse_route_message(buf) {
        Ok(Some(message)) => dispatch(message, resolver),
        Ok(None) => Ok(()),
        Err(e) => {
            warn!(error = %e, "route message skipped");
            Ok(())
        }
    }
}
