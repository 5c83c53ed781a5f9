//! UDP listener adapter over a socket inherited from the parent.

use std::io;
use std::net::SocketAddr;
use std::os::fd::OwnedFd;

use tokio::net::UdpSocket;

/// Largest datagram a client can send us.
const UDP_RECV_BUF: usize = 65536;

pub struct UdpListener {
    sock: UdpSocket,
    buf: Vec<u8>,
}

impl UdpListener {
    pub fn from_owned_fd(fd: OwnedFd) -> io::Result<Self> {
        let sock = std::net::UdpSocket::from(fd);
        sock.set_nonblocking(true)?;
        Ok(Self {
            sock: UdpSocket::from_std(sock)?,
            buf: vec![0u8; UDP_RECV_BUF],
        })
    }

    /// Receives one datagram, returning the owned query bytes and the
    /// client address the answer must go back to.
    pub async fn recv(&mut self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let (n, from) = self.sock.recv_from(&mut self.buf).await?;
        Ok((self.buf[..n].to_vec(), from))
    }

    pub async fn send_to(&self, answer: &[u8], to: SocketAddr) -> io::Result<usize> {
        self.sock.send_to(answer, to).await
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.sock.local_addr()
    }
}
