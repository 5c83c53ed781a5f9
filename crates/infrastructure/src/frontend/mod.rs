//! The frontend event loop.
//!
//! One task owns every piece of state: the two process channels, the
//! listening sockets, the pending-query table, the trust anchors and the
//! screening policy. Socket tasks (TCP sessions, control clients) are
//! cooperative helpers on the same single-threaded runtime and talk to
//! the loop over channels; the loop holds nothing of theirs but a reply
//! handle, dropped to cancel.

pub mod control;
pub mod pending;
pub mod tcp;
pub mod udp;

use std::fs::File;
use std::io;
use std::net::SocketAddr;
use std::os::fd::OwnedFd;

use rustc_hash::FxHashMap;
use tokio::net::{TcpStream, UnixStream};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use unwind_dns_application::{QueryRequest, ResolverPort, ScreenQueryUseCase, Screening};
use unwind_dns_domain::query::rcode;
use unwind_dns_domain::{FrontendConfig, FrontendError, TrustAnchorSet};

use crate::blocklist_file;
use crate::dns::{answer, wire};
use crate::ipc::message::{decode_config, AnswerHeader, Imsg, MsgType};
use crate::ipc::IpcChannel;
use crate::route::{self, RouteSocket};
use crate::trust_file;
use control::{ControlClients, ControlEvent, ControlListener};
use pending::{PendingQuery, PendingTable, QueryOrigin, UdpSock};
use tcp::{TcpAcceptor, TcpEvent, ACCEPT_BACKOFF, FD_RESERVE};
use udp::UdpListener;

/// Descriptors the process itself consumes (stdio, channels, listeners,
/// anchor file, headroom for control clients).
const BASE_FD_USAGE: usize = 16;

const MAX_ANSWER_LEN: u32 = 65535;

enum ChunkOutcome {
    Missing,
    ServFail,
    Incomplete,
    Complete,
}

pub struct Frontend {
    main: IpcChannel,
    resolver: Option<IpcChannel>,

    screener: ScreenQueryUseCase,
    staging_conf: Option<FrontendConfig>,

    trust_anchors: TrustAnchorSet,
    staging_anchors: TrustAnchorSet,
    ta_file: Option<File>,

    udp4: Option<UdpListener>,
    udp6: Option<UdpListener>,
    tcp4: Option<TcpAcceptor>,
    tcp6: Option<TcpAcceptor>,
    route: Option<RouteSocket>,
    route_armed: bool,
    control: Option<ControlListener>,
    control_clients: ControlClients,

    pending: PendingTable,
    tcp_events_tx: mpsc::Sender<TcpEvent>,
    tcp_events_rx: mpsc::Receiver<TcpEvent>,
    control_events_tx: mpsc::Sender<ControlEvent>,
    control_events_rx: mpsc::Receiver<ControlEvent>,

    /// Live TCP connections and the pending query each one carries.
    tcp_conns: FxHashMap<u64, Option<u64>>,
    next_conn_id: u64,

    fd_limit: usize,
    accept_pause: Option<Instant>,

    sigint: Signal,
    sigterm: Signal,
    shutdown: bool,
}

impl Frontend {
    /// Builds the frontend around the channel to the parent process.
    /// Must run inside the runtime: the channel and the signal handlers
    /// register with the reactor immediately.
    pub fn new(main_fd: OwnedFd) -> Result<Self, FrontendError> {
        let (tcp_events_tx, tcp_events_rx) = mpsc::channel(64);
        let (control_events_tx, control_events_rx) = mpsc::channel(16);

        Ok(Self {
            main: IpcChannel::from_owned_fd(main_fd)?,
            resolver: None,
            screener: ScreenQueryUseCase::new(),
            staging_conf: None,
            trust_anchors: TrustAnchorSet::with_root_ksk(),
            staging_anchors: TrustAnchorSet::new(),
            ta_file: None,
            udp4: None,
            udp6: None,
            tcp4: None,
            tcp6: None,
            route: None,
            route_armed: false,
            control: None,
            control_clients: ControlClients::new(),
            pending: PendingTable::new(),
            tcp_events_tx,
            tcp_events_rx,
            control_events_tx,
            control_events_rx,
            tcp_conns: FxHashMap::default(),
            next_conn_id: 0,
            fd_limit: descriptor_limit(),
            accept_pause: None,
            sigint: signal(SignalKind::interrupt()).map_err(FrontendError::from)?,
            sigterm: signal(SignalKind::terminate()).map_err(FrontendError::from)?,
            shutdown: false,
        })
    }

    /// Overrides the initial configuration (standalone debug runs only;
    /// the parent replaces it via `RECONF_*`).
    pub fn with_config(mut self, config: FrontendConfig) -> Self {
        self.screener.apply_config(config);
        self
    }

    /// Drives the loop until shutdown, then flushes and closes both
    /// process channels.
    pub async fn run(&mut self) -> Result<(), FrontendError> {
        while !self.shutdown {
            self.step().await?;
        }
        if let Some(resolver) = self.resolver.as_mut() {
            resolver.try_flush();
        }
        self.main.try_flush();
        self.resolver = None;
        info!("frontend exiting");
        Ok(())
    }

    async fn step(&mut self) -> Result<(), FrontendError> {
        let accept_ok = self.accept_ready();

        tokio::select! {
            msg = self.main.io_step() => match msg? {
                Some(msg) => self.dispatch_main(msg).await?,
                None => {
                    // The parent is gone; nothing left to serve.
                    warn!("main channel closed");
                    self.shutdown = true;
                }
            },

            msg = chan_step(self.resolver.as_mut()) => match msg? {
                Some(msg) => self.dispatch_resolver(msg).await?,
                None => {
                    warn!("resolver channel closed");
                    self.shutdown = true;
                }
            },

            res = udp_recv(self.udp4.as_mut()) => match res {
                Ok((wire, from)) => {
                    self.handle_query(QueryOrigin::Udp { sock: UdpSock::V4 }, from, wire).await?;
                }
                Err(e) => warn!(error = %e, "recvmsg"),
            },

            res = udp_recv(self.udp6.as_mut()) => match res {
                Ok((wire, from)) => {
                    self.handle_query(QueryOrigin::Udp { sock: UdpSock::V6 }, from, wire).await?;
                }
                Err(e) => warn!(error = %e, "recvmsg"),
            },

            res = tcp_accept(self.tcp4.as_ref(), accept_ok) => {
                self.on_accept(res)?;
            },

            res = tcp_accept(self.tcp6.as_ref(), accept_ok) => {
                self.on_accept(res)?;
            },

            _ = pause_wakeup(self.accept_pause) => {},

            event = self.tcp_events_rx.recv() => {
                // Both sender halves live in self, so recv never yields None.
                if let Some(event) = event {
                    self.on_tcp_event(event).await?;
                }
            },

            res = control_accept(self.control.as_ref()) => match res {
                Ok(stream) => self.control_clients.register(stream, self.control_events_tx.clone()),
                Err(e) => warn!(error = %e, "control accept"),
            },

            event = self.control_events_rx.recv() => {
                if let Some(event) = event {
                    self.on_control_event(event);
                }
            },

            res = route_recv(self.route.as_mut(), self.route_armed) => match res {
                Ok(buf) if buf.is_empty() => {
                    return Err(FrontendError::Protocol("routing socket closed".into()));
                }
                Ok(buf) => {
                    if let Some(resolver) = self.resolver.as_mut() {
                        route::handle_route_buffer(&buf, resolver)?;
                    }
                }
                Err(e) => warn!(error = %e, "route socket read error"),
            },

            _ = self.sigint.recv() => self.shutdown = true,
            _ = self.sigterm.recv() => self.shutdown = true,
        }

        Ok(())
    }

    fn on_accept(&mut self, res: io::Result<(TcpStream, SocketAddr)>) -> Result<(), FrontendError> {
        match res {
            Ok((stream, from)) => {
                let conn = self.next_conn_id;
                self.next_conn_id += 1;
                self.tcp_conns.insert(conn, None);
                tcp::spawn_session(conn, stream, from, self.tcp_events_tx.clone());
                Ok(())
            }
            Err(e) => match e.raw_os_error() {
                Some(libc::EMFILE) | Some(libc::ENFILE) => {
                    self.pause_accepts();
                    Ok(())
                }
                Some(libc::EINTR) | Some(libc::ECONNABORTED) => Ok(()),
                _ if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
                _ => Err(FrontendError::Io(format!("accept: {}", e))),
            },
        }
    }

    async fn on_tcp_event(&mut self, event: TcpEvent) -> Result<(), FrontendError> {
        match event {
            TcpEvent::Request {
                conn,
                from,
                wire,
                reply,
            } => {
                if !self.tcp_conns.contains_key(&conn) {
                    return Ok(());
                }
                let id = self
                    .handle_query(QueryOrigin::Tcp { conn, reply }, from, wire)
                    .await?;
                if let Some(id) = id {
                    self.tcp_conns.insert(conn, Some(id));
                }
            }
            TcpEvent::Closed { conn } => {
                if let Some(Some(id)) = self.tcp_conns.remove(&conn) {
                    self.pending.remove(id);
                }
            }
        }
        Ok(())
    }

    fn on_control_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Request {
                client,
                kind,
                pid,
                payload,
            } => {
                self.control_clients.note_pid(client, pid);
                match self.resolver.as_mut() {
                    Some(resolver) => {
                        if let Err(e) = resolver.compose_full(kind, pid, &payload, None) {
                            warn!(error = %e, "control relay to resolver failed");
                        }
                    }
                    None => debug!(kind, "control request before resolver channel"),
                }
            }
            ControlEvent::Closed { client } => self.control_clients.remove(client),
        }
    }

    /// The common screening pipeline for one inbound query, shared by
    /// both transports. Returns the pending-query id when the question
    /// went to the resolver.
    async fn handle_query(
        &mut self,
        origin: QueryOrigin,
        from: SocketAddr,
        mut wire_buf: Vec<u8>,
    ) -> Result<Option<u64>, FrontendError> {
        match wire::check_query(&mut wire_buf) {
            wire::QueryCheck::Drop => return Ok(None),
            wire::QueryCheck::Reject(rc) => {
                let hdr = wire::header(&wire_buf);
                let parsed = wire::parse_question(&wire_buf).ok();
                let edns = parsed
                    .as_ref()
                    .and_then(|p| wire::parse_edns(&wire_buf, p.question_end).ok())
                    .unwrap_or_default();
                let question = parsed
                    .as_ref()
                    .map(|p| &wire_buf[wire::DNS_HEADER_SIZE..p.question_end]);
                let reply = answer::encode_error(&hdr, question, &edns, rc);
                self.send_answer_to(origin, from, reply).await;
                return Ok(None);
            }
            wire::QueryCheck::Accept => {}
        }

        let hdr = wire::header(&wire_buf);
        let parsed = match wire::parse_question(&wire_buf) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(client = %from, error = %e, "query parse failed");
                return Ok(None);
            }
        };
        let question_wire = wire_buf[wire::DNS_HEADER_SIZE..parsed.question_end].to_vec();

        let edns = match wire::parse_edns(&wire_buf, parsed.question_end) {
            Ok(edns) => edns,
            Err(e) => {
                warn!(client = %from, error = %e, "edns parse failed");
                let reply =
                    answer::encode_error(&hdr, Some(&question_wire), &Default::default(), rcode::FORMERR);
                self.send_answer_to(origin, from, reply).await;
                return Ok(None);
            }
        };

        debug!(
            client = %from,
            qname = %parsed.info.qname,
            qtype = parsed.info.qtype,
            qclass = parsed.info.qclass,
            "query"
        );

        match self.screener.screen(&parsed.info) {
            Screening::Refuse => {
                let reply = answer::encode_error(&hdr, Some(&question_wire), &edns, rcode::REFUSED);
                self.send_answer_to(origin, from, reply).await;
                Ok(None)
            }
            Screening::FormErr => {
                let reply = answer::encode_error(&hdr, Some(&question_wire), &edns, rcode::FORMERR);
                self.send_answer_to(origin, from, reply).await;
                Ok(None)
            }
            Screening::Chaos => {
                let reply = answer::encode_chaos(&hdr, &question_wire);
                self.send_answer_to(origin, from, reply).await;
                Ok(None)
            }
            Screening::Forward => {
                let id = self.pending.new_id();
                let request = QueryRequest {
                    id,
                    qname: parsed.info.qname.clone(),
                    qtype: parsed.info.qtype,
                    qclass: parsed.info.qclass,
                };
                let forwarded = match self.resolver.as_mut() {
                    Some(resolver) => resolver.forward_query(&request).is_ok(),
                    None => false,
                };
                if !forwarded {
                    let reply =
                        answer::encode_error(&hdr, Some(&question_wire), &edns, rcode::SERVFAIL);
                    self.send_answer_to(origin, from, reply).await;
                    return Ok(None);
                }

                let question_end = parsed.question_end;
                self.pending.insert(PendingQuery {
                    imsg_id: id,
                    from,
                    origin,
                    qbuf: wire_buf,
                    abuf: pending::AnswerBuffer::new(),
                    qinfo: parsed.info,
                    header: hdr,
                    edns,
                    question_end,
                });
                Ok(Some(id))
            }
        }
    }

    async fn dispatch_main(&mut self, mut msg: Imsg) -> Result<(), FrontendError> {
        match msg.msg_type() {
            Some(MsgType::SocketIpcResolver) => {
                if self.resolver.is_some() {
                    return Err(FrontendError::Protocol(
                        "received unexpected resolver socket".into(),
                    ));
                }
                let fd = msg.require_fd("resolver socket")?;
                self.resolver = Some(IpcChannel::from_owned_fd(fd)?);
            }
            Some(MsgType::Udp4Sock) => {
                if self.udp4.is_some() {
                    return Err(FrontendError::Protocol("received unexpected udp4sock".into()));
                }
                self.udp4 = Some(UdpListener::from_owned_fd(msg.require_fd("UDP4")?)?);
            }
            Some(MsgType::Udp6Sock) => {
                if self.udp6.is_some() {
                    return Err(FrontendError::Protocol("received unexpected udp6sock".into()));
                }
                self.udp6 = Some(UdpListener::from_owned_fd(msg.require_fd("UDP6")?)?);
            }
            Some(MsgType::Tcp4Sock) => {
                if self.tcp4.is_some() {
                    return Err(FrontendError::Protocol("received unexpected tcp4sock".into()));
                }
                self.tcp4 = Some(TcpAcceptor::from_owned_fd(msg.require_fd("TCP4")?)?);
            }
            Some(MsgType::Tcp6Sock) => {
                if self.tcp6.is_some() {
                    return Err(FrontendError::Protocol("received unexpected tcp6sock".into()));
                }
                self.tcp6 = Some(TcpAcceptor::from_owned_fd(msg.require_fd("TCP6")?)?);
            }
            Some(MsgType::RouteSock) => {
                if self.route.is_some() {
                    return Err(FrontendError::Protocol("received unexpected routesock".into()));
                }
                self.route = Some(RouteSocket::from_owned_fd(msg.require_fd("route")?)?);
            }
            Some(MsgType::ControlFd) => {
                if self.control.is_some() {
                    return Err(FrontendError::Protocol(
                        "received unexpected controlsock".into(),
                    ));
                }
                self.control = Some(ControlListener::from_owned_fd(msg.require_fd("control")?)?);
            }
            Some(MsgType::TaFd) => {
                if let Some(fd) = msg.fd.take() {
                    let mut file = File::from(fd);
                    trust_file::parse_trust_anchors(&mut file, &mut self.trust_anchors);
                    self.ta_file = Some(file);
                }
                if !self.trust_anchors.is_empty() {
                    let resolver = self.resolver.as_mut().ok_or_else(|| {
                        FrontendError::Protocol("trust anchors before resolver channel".into())
                    })?;
                    trust_file::send_trust_anchors(&self.trust_anchors, resolver)?;
                }
            }
            Some(MsgType::BlFd) => {
                let fd = msg.require_fd("block list")?;
                let blocklist = blocklist_file::parse_blocklist(File::from(fd));
                info!(entries = blocklist.len(), "block list loaded");
                self.screener.replace_blocklist(blocklist);
            }
            Some(MsgType::ReconfConf) => {
                self.staging_conf = Some(decode_config(&msg.payload)?);
            }
            Some(MsgType::ReconfBlocklistFile) => {
                let staging = self.staging_conf.as_mut().ok_or_else(|| {
                    FrontendError::Protocol("RECONF_BLOCKLIST_FILE without RECONF_CONF".into())
                })?;
                let path = String::from_utf8(msg.payload)
                    .map_err(|_| FrontendError::Protocol("blocklist path not UTF-8".into()))?;
                staging.blocklist_file = Some(path);
            }
            Some(MsgType::ReconfEnd) => {
                let staged = self.staging_conf.take().ok_or_else(|| {
                    FrontendError::Protocol("RECONF_END without RECONF_CONF".into())
                })?;
                self.screener.apply_config(staged);
            }
            Some(MsgType::Startup) => self.startup()?,
            _ => debug!(kind = msg.kind, "unhandled imsg from main"),
        }
        Ok(())
    }

    /// Servicing begins: the route socket must have arrived by now.
    fn startup(&mut self) -> Result<(), FrontendError> {
        if self.route.is_none() {
            return Err(FrontendError::Protocol(
                "did not receive a route socket from the main process".into(),
            ));
        }
        self.route_armed = true;
        self.main.compose(MsgType::StartupDone, &[])?;
        info!("frontend ready");
        Ok(())
    }

    async fn dispatch_resolver(&mut self, msg: Imsg) -> Result<(), FrontendError> {
        match msg.msg_type() {
            Some(MsgType::Answer) => self.handle_answer(&msg.payload).await?,
            Some(MsgType::NewTa) => {
                let anchor = String::from_utf8_lossy(&msg.payload);
                self.staging_anchors.insert(anchor.trim_end_matches('\0'));
            }
            Some(MsgType::NewTasAbort) => self.staging_anchors.clear(),
            Some(MsgType::NewTasDone) => {
                let changed = self.trust_anchors.merge_from(&mut self.staging_anchors);
                if changed {
                    if let Some(resolver) = self.resolver.as_mut() {
                        trust_file::send_trust_anchors(&self.trust_anchors, resolver)?;
                    }
                }
                // Rewritten even without change: the file's mtime shows
                // the rollover machinery is alive.
                if let Some(file) = self.ta_file.as_mut() {
                    trust_file::write_trust_anchors(&self.trust_anchors, file);
                }
            }
            _ if MsgType::is_control_relay(msg.kind) => {
                self.control_clients.relay(msg.pid, msg.kind, &msg.payload);
            }
            _ => debug!(kind = msg.kind, "unhandled imsg from resolver"),
        }
        Ok(())
    }

    async fn handle_answer(&mut self, payload: &[u8]) -> Result<(), FrontendError> {
        let (hdr, chunk) = AnswerHeader::decode(payload)?;
        if hdr.answer_len > MAX_ANSWER_LEN {
            return Err(FrontendError::Protocol(format!(
                "ANSWER too big: {}",
                hdr.answer_len
            )));
        }

        let outcome = match self.pending.get_mut(hdr.id) {
            None => ChunkOutcome::Missing,
            Some(pq) => {
                if hdr.srvfail || (hdr.bogus && !pq.header.checking_disabled()) {
                    ChunkOutcome::ServFail
                } else if pq.abuf.capacity().is_none() && hdr.answer_len == 0 {
                    ChunkOutcome::ServFail
                } else {
                    if pq.abuf.capacity().is_none() {
                        let _ = pq.abuf.set_capacity(hdr.answer_len as usize);
                    }
                    match pq.abuf.write(chunk) {
                        Err(e) => {
                            warn!(id = hdr.id, error = %e, "answer chunk overflow");
                            ChunkOutcome::ServFail
                        }
                        Ok(()) if pq.abuf.is_complete() => ChunkOutcome::Complete,
                        Ok(()) => ChunkOutcome::Incomplete,
                    }
                }
            }
        };

        match outcome {
            ChunkOutcome::Missing => {
                warn!(id = hdr.id, "cannot find pending query");
            }
            ChunkOutcome::ServFail => self.finish_servfail(hdr.id).await,
            ChunkOutcome::Complete => self.finish_answer(hdr.id).await,
            ChunkOutcome::Incomplete => {}
        }
        Ok(())
    }

    /// Re-encodes the assembled reply for the client and releases the
    /// pending query.
    async fn finish_answer(&mut self, id: u64) {
        let Some(pq) = self.pending.remove(id) else {
            return;
        };
        let PendingQuery {
            from,
            origin,
            qbuf,
            abuf,
            qinfo,
            header,
            edns,
            question_end,
            ..
        } = pq;

        let reply_wire = abuf.take();
        let reply = match answer::rebuild_reply(&reply_wire, &qinfo, &header, &edns, origin.transport())
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(id, error = %e, "reply re-encode failed");
                answer::encode_error(
                    &header,
                    Some(&qbuf[wire::DNS_HEADER_SIZE..question_end]),
                    &edns,
                    rcode::SERVFAIL,
                )
            }
        };
        self.send_answer_to(origin, from, reply).await;
    }

    async fn finish_servfail(&mut self, id: u64) {
        let Some(pq) = self.pending.remove(id) else {
            return;
        };
        let reply = answer::encode_error(
            &pq.header,
            Some(&pq.qbuf[wire::DNS_HEADER_SIZE..pq.question_end]),
            &pq.edns,
            rcode::SERVFAIL,
        );
        self.send_answer_to(pq.origin, pq.from, reply).await;
    }

    async fn send_answer_to(&mut self, origin: QueryOrigin, from: SocketAddr, reply: Vec<u8>) {
        match origin {
            QueryOrigin::Udp { sock } => {
                let listener = match sock {
                    UdpSock::V4 => self.udp4.as_ref(),
                    UdpSock::V6 => self.udp6.as_ref(),
                };
                if let Some(listener) = listener {
                    if let Err(e) = listener.send_to(&reply, from).await {
                        warn!(client = %from, error = %e, "sendto");
                    }
                }
            }
            QueryOrigin::Tcp { reply: tx, .. } => {
                // A closed session just drops the answer.
                let _ = tx.send(reply);
            }
        }
    }

    fn fd_in_use(&self) -> usize {
        BASE_FD_USAGE + self.tcp_conns.len() + self.control_clients.len()
    }

    /// Accept gate: paused after descriptor pressure, re-opened at least
    /// one backoff period later.
    fn accept_ready(&mut self) -> bool {
        if let Some(until) = self.accept_pause {
            if Instant::now() < until {
                return false;
            }
            self.accept_pause = None;
        }
        if self.fd_in_use() + FD_RESERVE >= self.fd_limit {
            debug!("inflight fds exceeded");
            self.pause_accepts();
            return false;
        }
        true
    }

    fn pause_accepts(&mut self) {
        self.accept_pause = Some(Instant::now() + ACCEPT_BACKOFF);
    }

    pub fn pending_query_count(&self) -> usize {
        self.pending.len()
    }
}

fn descriptor_limit() -> usize {
    let mut rl = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) } == 0 {
        rl.rlim_cur as usize
    } else {
        1024
    }
}

async fn chan_step(chan: Option<&mut IpcChannel>) -> Result<Option<Imsg>, FrontendError> {
    match chan {
        Some(chan) => chan.io_step().await,
        None => std::future::pending().await,
    }
}

async fn udp_recv(listener: Option<&mut UdpListener>) -> io::Result<(Vec<u8>, SocketAddr)> {
    match listener {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}

async fn tcp_accept(
    listener: Option<&TcpAcceptor>,
    enabled: bool,
) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) if enabled => listener.accept().await,
        _ => std::future::pending().await,
    }
}

async fn control_accept(listener: Option<&ControlListener>) -> io::Result<UnixStream> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn route_recv(socket: Option<&mut RouteSocket>, armed: bool) -> io::Result<Vec<u8>> {
    match socket {
        Some(socket) if armed => socket.recv().await.map(<[u8]>::to_vec),
        _ => std::future::pending().await,
    }
}

async fn pause_wakeup(until: Option<Instant>) {
    match until {
        Some(until) => tokio::time::sleep_until(until).await,
        None => std::future::pending().await,
    }
}
