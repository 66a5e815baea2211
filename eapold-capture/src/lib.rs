//! Eapold Capture Library
//!
//! The Linux side of the proxy: the interface table with per-interface
//! policy and counters, netdevice ioctls (flags, MTU, hardware address),
//! the raw AF_PACKET socket layer with kernel-side EAPOL filtering, and the
//! shared frame buffer that lets one received PDU be sent on several egress
//! interfaces with different 802.1Q tags.

pub mod buffer;
pub mod iface;
pub mod netdev;
pub mod sock;

pub use buffer::FrameBuffer;
pub use iface::{Iface, IfaceTable};
pub use sock::{RawSocket, Recv, RecvMeta};
