//! The proxy event loop
//!
//! Single-threaded: one `epoll_pwait` over every interface socket, one frame
//! handled end-to-end per wakeup. The loop owns the interface table and the
//! frame buffer. On a non-fatal runtime error it enters a 10-second cooldown
//! and rebuilds every socket without re-reading the config; with `--oneshot`
//! it exits with a failure instead. Signals are blocked everywhere except
//! inside the wait, which runs with an empty mask.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use tracing::{debug, error, info, trace, warn};

use eapold_capture::buffer::FrameBuffer;
use eapold_capture::iface::IfaceTable;
use eapold_capture::netdev;
use eapold_capture::sock::Recv;
use eapold_core::config::{ActionKey, ActionTable};
use eapold_core::{Error, Result};
use eapold_packet::eapol::{describe_code, describe_type, EapolPdu};
use eapold_packet::view::{hexdump, PacketView};

use crate::policy;
use crate::script;
use crate::signals;

const COOLDOWN_SECS: libc::time_t = 10;

/// What the loop does after handling one event
enum Step {
    Continue,
    /// Runtime transient; restart after cooldown
    Cooldown,
}

pub struct Proxy {
    table: IfaceTable,
    oneshot: bool,
    quiet_script: bool,
    /// Set after a MAC mutation: the next error event on any socket is the
    /// expected fallout of the link cycling and triggers a quiet restart.
    /// Cleared by that first error event.
    expect_error_event: bool,
}

impl Proxy {
    pub fn new(table: IfaceTable, oneshot: bool, quiet_script: bool) -> Self {
        Self {
            table,
            oneshot,
            quiet_script,
            expect_error_event: false,
        }
    }

    /// Run until a shutdown signal or a fatal error
    pub fn run(&mut self) -> Result<()> {
        let total = self.table.len();

        let mut epfd = create_epoll()?;
        let mut ready = self.init_session(&epfd)?;
        let mut buf = FrameBuffer::new(self.table.max_mtu());
        info!("{} interfaces are ready", ready);
        info!("starting proxy");

        loop {
            if ready != total {
                return Err(Error::Proxy("some interfaces are not ready".into()));
            }

            let (pos, events) = match wait(&epfd)? {
                Some(event) => event,
                None => {
                    // EINTR: the only window in which signals are delivered
                    if signals::check() {
                        return Ok(());
                    }
                    continue;
                }
            };

            match self.handle_event(pos, events, &mut buf) {
                Step::Continue => continue,
                Step::Cooldown => {
                    if self.oneshot {
                        info!("exiting on error, goodbye");
                        return Err(Error::Proxy("runtime error in oneshot mode".into()));
                    }
                    drop(epfd);
                    if self.cooldown() {
                        return Ok(());
                    }
                    epfd = create_epoll()?;
                    ready = self.init_session(&epfd)?;
                    buf = FrameBuffer::new(self.table.max_mtu());
                    info!("{} interfaces are ready", ready);
                    info!("starting proxy");
                }
            }
        }
    }

    /// (Re)initialise all sockets and register them with the epoll instance
    fn init_session(&mut self, epfd: &OwnedFd) -> Result<usize> {
        self.expect_error_event = false;
        for iface in self.table.iter() {
            if iface.recv_ctr > 0 || iface.send_ctr > 0 {
                debug!(
                    "interface '{}': {} received, {} sent so far",
                    iface.name, iface.recv_ctr, iface.send_ctr
                );
            }
        }
        let ready = self.table.initialise();

        for (pos, iface) in self.table.iter().enumerate() {
            let Some(sock) = &iface.socket else { continue };
            let mut event = libc::epoll_event {
                events: libc::EPOLLIN as u32,
                u64: pos as u64,
            };
            let rv = unsafe {
                libc::epoll_ctl(
                    epfd.as_raw_fd(),
                    libc::EPOLL_CTL_ADD,
                    sock.as_raw_fd(),
                    &mut event,
                )
            };
            if rv == -1 {
                return Err(Error::socket_errno(iface.name.as_str()));
            }
            debug!("socket registered with epoll, interface '{}'", iface.name);
        }
        Ok(ready)
    }

    /// Unblock signals, sleep out the cooldown, and re-block. Returns true
    /// when a shutdown signal arrived during the window.
    fn cooldown(&self) -> bool {
        signals::unblock();
        if signals::check() {
            signals::block();
            return true;
        }

        info!("restarting proxy in {} seconds", COOLDOWN_SECS);
        let ts = libc::timespec {
            tv_sec: COOLDOWN_SECS,
            tv_nsec: 0,
        };
        unsafe { libc::nanosleep(&ts, std::ptr::null_mut()) };

        let shutdown = signals::check();
        signals::block();
        shutdown
    }

    fn handle_event(&mut self, pos: usize, events: u32, buf: &mut FrameBuffer) -> Step {
        if events & libc::EPOLLIN as u32 == 0 {
            // Cycling a link invalidates its sockets; after a MAC mutation
            // the first error event is expected and restarts quietly.
            if self.expect_error_event && events & libc::EPOLLERR as u32 != 0 {
                self.expect_error_event = false;
                return Step::Cooldown;
            }
            spurious_event(&self.table.get(pos).name, events);
            return Step::Cooldown;
        }

        let ingress_name = self.table.get(pos).name.clone();
        debug!("got a readable event, interface '{}'", ingress_name);

        let meta = {
            let Some(sock) = &self.table.get(pos).socket else {
                error!("readable event on uninitialised interface '{}'", ingress_name);
                return Step::Cooldown;
            };
            match sock.recv(buf) {
                Err(e) => {
                    error!("cannot receive: {e}");
                    return Step::Cooldown;
                }
                Ok(Recv::Runt(len)) => {
                    warn!(
                        "dropping runt frame ({len} bytes), interface '{ingress_name}'"
                    );
                    return Step::Continue;
                }
                Ok(Recv::Giant(len)) => {
                    warn!(
                        "dropping giant frame ({len} bytes), interface '{ingress_name}'"
                    );
                    return Step::Continue;
                }
                Ok(Recv::Frame(meta)) => meta,
            }
        };

        let pdu = match EapolPdu::parse(&buf.pdu()[2..2 + meta.pdu_len]) {
            Ok(pdu) => pdu,
            Err(e) => {
                warn!("dropping frame, interface '{ingress_name}': {e}");
                return Step::Continue;
            }
        };

        let pkt = PacketView {
            timestamp: meta.timestamp,
            ingress: pos,
            current: pos,
            len: meta.len,
            len_orig: meta.len,
            dest: meta.dest,
            source: meta.source,
            vlan: meta.vlan,
            vlan_orig: meta.vlan,
            pdu,
        };

        debug!("{}", pkt.summary(&ingress_name));
        self.dump(&pkt, buf, true);

        let first_frame = {
            let iface = self.table.get_mut(pos);
            iface.recv_ctr += 1;
            iface.recv_ctr == 1
        };

        // One-shot MAC learning: the first frame on this interface supplies
        // the MAC of every interface configured to learn from it. The link
        // cycle invalidates the learner's socket, so the triggering frame is
        // dropped and the proxy restarts on the expected error event.
        if first_frame && self.learn_macs(pos, &pkt) {
            self.expect_error_event = true;
            return Step::Continue;
        }

        // Ingress action, then ingress filter
        let ingress = self.table.get(pos).ingress.clone();
        if let Some(action) = ingress.as_ref().and_then(|p| p.action.as_ref()) {
            self.run_action(action, &pkt, buf, None);
        }
        if let Some(mask) = ingress.as_ref().and_then(|p| p.filter.as_ref()) {
            if policy::filter_drops(mask, &pkt, &ingress_name, None) {
                return Step::Continue;
            }
        }

        // Egress: fresh copy of the view per interface
        for out_pos in 0..self.table.len() {
            if out_pos == pos {
                continue;
            }

            let mut out = pkt;
            out.current = out_pos;

            let egress = self.table.get(out_pos).egress.clone();
            policy::apply_tci(&mut out, egress.as_ref().and_then(|p| p.tci.as_ref()));

            let out_name = self.table.get(out_pos).name.clone();
            if let Some(mask) = egress.as_ref().and_then(|p| p.filter.as_ref()) {
                if policy::filter_drops(mask, &out, &out_name, Some(&ingress_name)) {
                    continue;
                }
            }
            if let Some(action) = egress.as_ref().and_then(|p| p.action.as_ref()) {
                self.run_action(action, &out, buf, Some(&ingress_name));
            }

            let frame = buf.frame(out.dest, out.source, out.vlan, out.len);
            let sent = match &self.table.get(out_pos).socket {
                Some(sock) => sock.send(frame),
                None => Err(Error::interface(out_name.as_str(), "socket not initialised")),
            };
            if let Err(e) = sent {
                error!("cannot send: {e}");
                return Step::Cooldown;
            }

            self.table.get_mut(out_pos).send_ctr += 1;
            debug!("{}", out.summary(&out_name));
            self.dump(&out, buf, false);
        }

        Step::Continue
    }

    /// Set the MAC of every interface learning from `pos` to the source
    /// address of the received frame. Returns true when at least one link
    /// was actually mutated.
    fn learn_macs(&mut self, pos: usize, pkt: &PacketView) -> bool {
        let source_index = self.table.get(pos).index;
        let mut mutated = false;

        for other in 0..self.table.len() {
            if other == pos {
                continue;
            }
            let iface = self.table.get_mut(other);
            if iface.learn_mac_from != Some(source_index) {
                continue;
            }
            iface.learn_mac_from = None;
            let name = iface.name.clone();
            match netdev::set_hardware_addr(&name, pkt.source) {
                Ok(true) => {
                    mutated = true;
                    info!("set MAC, interface '{name}', restarting");
                }
                Ok(false) => {}
                Err(e) => warn!("{e}; won't try to set MAC again, interface '{name}'"),
            }
        }
        mutated
    }

    /// Select and execute an action script for a classification
    fn run_action(
        &self,
        table: &ActionTable,
        pkt: &PacketView,
        buf: &mut FrameBuffer,
        from: Option<&str>,
    ) {
        let Some((path, key)) = table.select(pkt.eapol_type(), pkt.eap_code()) else {
            return;
        };

        let (desc, kind) = match key {
            ActionKey::Type(ty) => (describe_type(ty), "frame"),
            ActionKey::Code(code) => (describe_code(code), "EAP-Packet"),
        };
        let name = &self.table.get(pkt.current).name;
        let line = match from {
            Some(orig) => format!(
                "{desc} {kind} from '{orig}' leaving on '{name}'; executing '{}'",
                path.display()
            ),
            None => format!(
                "{desc} {kind} entering on '{name}'; executing '{}'",
                path.display()
            ),
        };
        if self.quiet_script {
            debug!("{line}");
        } else {
            info!("{line}");
        }

        let orig = self.table.get(pkt.ingress);
        let current = self.table.get(pkt.current);
        let env = script::build_env(
            pkt,
            (orig.name.as_str(), orig.mtu),
            (current.name.as_str(), current.mtu),
            buf,
        );
        script::run(path, &env);
    }

    /// Hexdump a frame at TRACE level
    fn dump(&self, pkt: &PacketView, buf: &mut FrameBuffer, original: bool) {
        if !tracing::enabled!(tracing::Level::TRACE) {
            return;
        }
        let (vlan, len) = if original {
            (pkt.vlan_orig, pkt.len_orig)
        } else {
            (pkt.vlan, pkt.len)
        };
        for line in hexdump(buf.frame(pkt.dest, pkt.source, vlan, len)) {
            trace!("{line}");
        }
    }
}

fn create_epoll() -> Result<OwnedFd> {
    let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
    if fd == -1 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Wait for one event. `Ok(None)` means the wait was interrupted by a
/// signal; the caller must consume the counters.
fn wait(epfd: &OwnedFd) -> Result<Option<(usize, u32)>> {
    let mut event = libc::epoll_event { events: 0, u64: 0 };
    let empty = signals::empty_sigset();
    let n = unsafe { libc::epoll_pwait(epfd.as_raw_fd(), &mut event, 1, -1, &empty) };
    if n == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            return Ok(None);
        }
        return Err(Error::Io(err));
    }
    let pos = event.u64 as usize;
    let events = event.events;
    Ok(Some((pos, events)))
}

fn spurious_event(name: &str, events: u32) {
    let desc = if events & libc::EPOLLERR as u32 != 0 {
        ", EPOLLERR - is interface up?"
    } else if events & libc::EPOLLHUP as u32 != 0 {
        ", EPOLLHUP"
    } else {
        ""
    };
    error!("unexpected socket event (0x{events:x}{desc}), interface '{name}'");
}
