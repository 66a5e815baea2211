//! The per-frame packet view
//!
//! One `PacketView` is built for every received frame and copied by value for
//! every egress interface, so that per-interface 802.1Q rewrites never touch
//! the received (`*_orig`) state.

use std::time::SystemTime;

use eapold_core::types::{MacAddr, Tci};

use crate::eapol::{self, EapolPdu};

/// Everything the proxy knows about one EAPOL frame
///
/// The `*_orig` fields are fixed at receive time; `current`, `len`, and `vlan`
/// are rewritten per egress interface on a by-value copy.
#[derive(Debug, Clone, Copy)]
pub struct PacketView {
    /// Kernel receive timestamp, or wall-clock fallback
    pub timestamp: SystemTime,
    /// Position of the ingress interface in the interface table
    pub ingress: usize,
    /// Position of the interface the frame is currently being processed for
    pub current: usize,
    /// Current logical frame length, including MACs and any 802.1Q tag
    pub len: usize,
    /// Frame length as received
    pub len_orig: usize,
    /// Destination MAC address
    pub dest: MacAddr,
    /// Source MAC address
    pub source: MacAddr,
    /// Current 802.1Q tag, if any
    pub vlan: Option<Tci>,
    /// 802.1Q tag as received, if any
    pub vlan_orig: Option<Tci>,
    /// Classified EAPOL/EAP headers
    pub pdu: EapolPdu,
}

impl PacketView {
    /// EAPOL Packet Type
    pub fn eapol_type(&self) -> u8 {
        self.pdu.packet_type
    }

    /// EAP Code, when the frame encapsulates an EAP-Packet
    pub fn eap_code(&self) -> Option<u8> {
        self.pdu.eap_code()
    }

    /// Is the view still on the ingress side?
    pub fn is_ingress(&self) -> bool {
        self.current == self.ingress
    }

    /// Render a tcpdump-like one-line summary, e.g.
    /// `recv 60 bytes on 'eth0': 00:11:22:33:44:55 > 01:80:c2:00:00:03, EAPOL-Start (1) v2`
    pub fn summary(&self, name: &str) -> String {
        let mut s = format!(
            "{} {} bytes on '{}': {} > {}",
            if self.is_ingress() { "recv" } else { "send" },
            self.len,
            name,
            self.source,
            self.dest
        );

        if let Some(tci) = self.vlan {
            s.push_str(&format!(
                ", vlan {} (prio {}, dei {}set)",
                tci.vid,
                tci.pcp,
                if tci.dei == 1 { "" } else { "un" }
            ));
        }

        s.push_str(&format!(
            ", {} ({}) v{}",
            eapol::describe_type(self.pdu.packet_type),
            self.pdu.packet_type,
            self.pdu.version
        ));

        if let Some(eap) = self.pdu.eap {
            s.push_str(&format!(", {}", eapol::describe_code(eap.code)));
            if let Some(rtype) = eap.rtype {
                s.push_str(&format!(
                    "/{} ({})",
                    eapol::describe_eap_type(rtype),
                    rtype
                ));
            }
            s.push_str(&format!(", id {}, len {}", eap.id, eap.len));
        } else if let Some(key) = self.pdu.key {
            s.push_str(&format!(
                ", type {}-{} ({})",
                eapol::describe_key_type(key.desc_type),
                u32::from(key.key_len) * 8,
                key.desc_type
            ));
            s.push_str(&format!(
                ", index {} ({}cast)",
                key.key_index & 0x7f,
                if key.key_index & 0x80 != 0 {
                    "uni"
                } else {
                    "broad"
                }
            ));
        }

        s
    }
}

/// Render a frame as hexdump lines, 16 bytes per line in u16 columns:
///
/// ```text
///   0x0000:  0180 c200 0003 feed face ca11 8100 6000
///   0x0010:  888e 0101 0000
/// ```
pub fn hexdump(frame: &[u8]) -> Vec<String> {
    let mut lines = Vec::with_capacity(frame.len().div_ceil(16));
    for (i, chunk) in frame.chunks(16).enumerate() {
        let mut line = format!("  0x{:04x}: ", i * 16);
        for (j, byte) in chunk.iter().enumerate() {
            if j % 2 == 0 {
                line.push(' ');
            }
            line.push_str(&format!("{byte:02x}"));
        }
        lines.push(line);
    }
    lines
}
