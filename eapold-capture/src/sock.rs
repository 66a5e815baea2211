//! Raw AF_PACKET socket layer
//!
//! One raw socket per interface, bound by ifindex with a kernel-side BPF
//! program that accepts only EtherType 0x888E. Two Linux quirks shape this
//! module:
//!
//! - Opening the socket with ETH_P_PAE as the bind protocol suppresses
//!   `tpacket_auxdata` delivery, so the socket is opened with ETH_P_ALL and
//!   filtered with our own BPF program instead. The kernel strips any 802.1Q
//!   tag before the filter runs, so the EtherType sits at offset 12 whether or
//!   not the frame was tagged, and the stripped tag is recovered from the
//!   PACKET_AUXDATA control message on receive.
//! - On send, a plain `write()` with the tag at bytes 12..16 is the only path
//!   that reliably puts an 802.1Q tag on the wire; `sendmsg()` with auxdata or
//!   with a separate tag iovec does not.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use eapold_core::types::{ethertypes, MacAddr, Tci, ETH_ALEN, PAE_GROUP_ADDRS};
use eapold_core::{Error, Result};

use crate::buffer::FrameBuffer;

/// Minimum Ethernet frame size excluding the FCS
const MIN_FRAME_LEN: usize = 60;

/// `tpacket_auxdata` as delivered in the PACKET_AUXDATA control message.
/// Defined here because the `tp_vlan_tpid` field was still called
/// `tp_padding` on older kernels.
#[repr(C)]
#[derive(Clone, Copy)]
struct PacketAuxdata {
    tp_status: u32,
    tp_len: u32,
    tp_snaplen: u32,
    tp_mac: u16,
    tp_net: u16,
    tp_vlan_tci: u16,
    tp_vlan_tpid: u16,
}

const TP_STATUS_VLAN_VALID: u32 = 1 << 4;

/// Not exposed by the `libc` crate; standard Linux ioctl value.
const SIOCGSTAMP: libc::c_ulong = 0x8906;

/// Accept iff the halfword at offset 12 of the post-strip frame is 0x888E.
const EAPOL_FILTER: [libc::sock_filter; 4] = [
    // ldh [12]
    libc::sock_filter {
        code: 0x28,
        jt: 0,
        jf: 0,
        k: 12,
    },
    // jeq #0x888e, jt 2, jf 3
    libc::sock_filter {
        code: 0x15,
        jt: 0,
        jf: 1,
        k: 0x888e,
    },
    // ret #262144
    libc::sock_filter {
        code: 0x06,
        jt: 0,
        jf: 0,
        k: 0x40000,
    },
    // ret #0
    libc::sock_filter {
        code: 0x06,
        jt: 0,
        jf: 0,
        k: 0,
    },
];

/// Outcome of one receive
#[derive(Debug, Clone, Copy)]
pub enum Recv {
    /// A complete frame landed in the buffer
    Frame(RecvMeta),
    /// Fewer than 60 bytes arrived; dropped
    Runt(usize),
    /// The frame's true length exceeds the PDU buffer; dropped
    Giant(usize),
}

/// Receive-side frame metadata
#[derive(Debug, Clone, Copy)]
pub struct RecvMeta {
    /// Logical frame length: MACs + PDU, plus 4 when a stripped tag was
    /// recovered from auxiliary data
    pub len: usize,
    /// Number of PDU bytes (after the EtherType) present in the buffer
    pub pdu_len: usize,
    pub dest: MacAddr,
    pub source: MacAddr,
    pub vlan: Option<Tci>,
    pub timestamp: SystemTime,
}

/// A raw link-layer socket bound to one interface
pub struct RawSocket {
    fd: OwnedFd,
    name: String,
}

impl RawSocket {
    /// Create, bind, and configure the raw socket for an interface:
    /// BPF filter, multicast or promiscuous membership, auxiliary data.
    pub fn open(name: &str, ifindex: u32, promiscuous: bool) -> Result<Self> {
        let protocol = (libc::ETH_P_ALL as u16).to_be() as libc::c_int;
        let raw = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW | libc::SOCK_CLOEXEC, protocol) };
        if raw < 0 {
            return Err(Error::socket_errno(name));
        }
        let sock = Self {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
            name: name.to_string(),
        };

        let mut sll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as libc::c_ushort;
        sll.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
        sll.sll_ifindex = ifindex as libc::c_int;
        sll.sll_pkttype = (libc::PACKET_HOST | libc::PACKET_MULTICAST) as libc::c_uchar;
        let rv = unsafe {
            libc::bind(
                sock.fd.as_raw_fd(),
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rv == -1 {
            return Err(Error::socket_errno(name));
        }
        debug!("bound socket {} to interface '{}'", sock.fd.as_raw_fd(), name);

        let prog = libc::sock_fprog {
            len: EAPOL_FILTER.len() as libc::c_ushort,
            filter: EAPOL_FILTER.as_ptr() as *mut libc::sock_filter,
        };
        sock.setsockopt(
            libc::SOL_SOCKET,
            libc::SO_ATTACH_FILTER,
            &prog as *const libc::sock_fprog as *const libc::c_void,
            std::mem::size_of::<libc::sock_fprog>(),
        )?;

        if promiscuous {
            let mut mreq: libc::packet_mreq = unsafe { std::mem::zeroed() };
            mreq.mr_ifindex = ifindex as libc::c_int;
            mreq.mr_type = libc::PACKET_MR_PROMISC as libc::c_ushort;
            sock.add_membership(&mreq)?;
        } else {
            for group in PAE_GROUP_ADDRS {
                let mut mreq: libc::packet_mreq = unsafe { std::mem::zeroed() };
                mreq.mr_ifindex = ifindex as libc::c_int;
                mreq.mr_type = libc::PACKET_MR_MULTICAST as libc::c_ushort;
                mreq.mr_alen = ETH_ALEN as libc::c_ushort;
                mreq.mr_address[..ETH_ALEN].copy_from_slice(group.as_bytes());
                sock.add_membership(&mreq)?;
            }
        }

        let one: libc::c_int = 1;
        if sock
            .setsockopt(
                libc::SOL_PACKET,
                libc::PACKET_AUXDATA,
                &one as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>(),
            )
            .is_err()
        {
            // Pre-3.x kernels only; tagged frames lose their 802.1Q info
            info!("there will be no 802.1Q info on interface '{}'", name);
        }

        Ok(sock)
    }

    fn setsockopt(
        &self,
        level: libc::c_int,
        option: libc::c_int,
        value: *const libc::c_void,
        len: usize,
    ) -> Result<()> {
        let rv = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                level,
                option,
                value,
                len as libc::socklen_t,
            )
        };
        if rv == -1 {
            return Err(Error::socket_errno(self.name.as_str()));
        }
        Ok(())
    }

    fn add_membership(&self, mreq: &libc::packet_mreq) -> Result<()> {
        self.setsockopt(
            libc::SOL_PACKET,
            libc::PACKET_ADD_MEMBERSHIP,
            mreq as *const libc::packet_mreq as *const libc::c_void,
            std::mem::size_of::<libc::packet_mreq>(),
        )
    }

    /// Receive one frame: destination MAC, source MAC, and the PDU scattered
    /// into their places, with the stripped 802.1Q tag recovered from the
    /// PACKET_AUXDATA control message.
    pub fn recv(&self, buf: &mut FrameBuffer) -> Result<Recv> {
        let mut dest = [0u8; ETH_ALEN];
        let mut source = [0u8; ETH_ALEN];
        let pdu = buf.pdu_mut();

        let mut iov = [
            libc::iovec {
                iov_base: dest.as_mut_ptr() as *mut libc::c_void,
                iov_len: ETH_ALEN,
            },
            libc::iovec {
                iov_base: source.as_mut_ptr() as *mut libc::c_void,
                iov_len: ETH_ALEN,
            },
            libc::iovec {
                iov_base: pdu.as_mut_ptr() as *mut libc::c_void,
                iov_len: pdu.len(),
            },
        ];

        #[repr(align(8))]
        struct CmsgBuf([u8; 64]);
        let mut cmsg_buf = CmsgBuf([0; 64]);

        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = iov.as_mut_ptr();
        msg.msg_iovlen = iov.len() as _;
        msg.msg_control = cmsg_buf.0.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = cmsg_buf.0.len() as _;

        let n = unsafe { libc::recvmsg(self.fd.as_raw_fd(), &mut msg, 0) };
        if n < 0 {
            return Err(Error::socket_errno(self.name.as_str()));
        }
        let wire_len = n as usize;
        if wire_len < MIN_FRAME_LEN {
            return Ok(Recv::Runt(wire_len));
        }

        let timestamp = self.timestamp();

        let mut len = wire_len;
        let mut vlan = None;
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                if (*cmsg).cmsg_level == libc::SOL_PACKET
                    && (*cmsg).cmsg_type == libc::PACKET_AUXDATA
                {
                    let aux: PacketAuxdata =
                        std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const PacketAuxdata);
                    if aux.tp_len as usize > wire_len {
                        return Ok(Recv::Giant(aux.tp_len as usize));
                    }
                    if aux.tp_status & TP_STATUS_VLAN_VALID != 0
                        && aux.tp_vlan_tpid == ethertypes::DOT1Q
                    {
                        vlan = Some(Tci::from_u16(aux.tp_vlan_tci));
                        len += 4;
                    }
                    break;
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }

        Ok(Recv::Frame(RecvMeta {
            len,
            pdu_len: wire_len - 2 * ETH_ALEN - 2,
            dest: MacAddr::new(dest),
            source: MacAddr::new(source),
            vlan,
            timestamp,
        }))
    }

    /// Kernel receive timestamp via SIOCGSTAMP, wall clock when that fails
    fn timestamp(&self) -> SystemTime {
        let mut tv: libc::timeval = unsafe { std::mem::zeroed() };
        let rv = unsafe {
            libc::ioctl(
                self.fd.as_raw_fd(),
                SIOCGSTAMP,
                &mut tv as *mut libc::timeval,
            )
        };
        if rv == -1 {
            warn!(
                "cannot read packet timestamp, interface '{}': {}; using wall clock",
                self.name,
                io::Error::last_os_error()
            );
            return SystemTime::now();
        }
        UNIX_EPOCH + Duration::new(tv.tv_sec as u64, (tv.tv_usec as u32) * 1000)
    }

    /// Send a complete frame with a single write. The kernel transmits it
    /// verbatim, including any 802.1Q tag at bytes 12..16.
    pub fn send(&self, frame: &[u8]) -> Result<()> {
        let n = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
            )
        };
        if n < 0 {
            return Err(Error::socket_errno(self.name.as_str()));
        }
        if n as usize != frame.len() {
            return Err(Error::ShortSend {
                iface: self.name.clone(),
                sent: n as usize,
                expected: frame.len(),
            });
        }
        Ok(())
    }
}

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_shape() {
        // ldh [12]; jeq 0x888e; accept; reject
        assert_eq!(EAPOL_FILTER.len(), 4);
        assert_eq!(EAPOL_FILTER[0].code, 0x28);
        assert_eq!(EAPOL_FILTER[0].k, 12);
        assert_eq!(EAPOL_FILTER[1].k, u32::from(ethertypes::EAPOL));
        assert_ne!(EAPOL_FILTER[2].k, 0);
        assert_eq!(EAPOL_FILTER[3].k, 0);
    }

    #[test]
    fn test_open_requires_privileges_or_fails_cleanly() {
        // Interface index 0 is never valid; either the socket call fails for
        // lack of CAP_NET_RAW or the bind is refused. Both must surface as a
        // socket error, never a panic.
        assert!(RawSocket::open("nonexistent0", 0, false).is_err());
    }
}
