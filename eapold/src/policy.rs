//! Packet policy: filtering and per-egress 802.1Q rewrite
//!
//! The ingress filter runs exactly once per received frame, before the
//! egress loop; the egress filter runs exactly once per egress interface
//! inside it. The 802.1Q rewrite always starts from the frame's original
//! tag state, so the outcome per interface never depends on the order the
//! egress interfaces are visited in.

use tracing::info;

use eapold_core::config::{FilterMask, TciDirective};
use eapold_core::types::{eapol, Tci};
use eapold_packet::eapol::{describe_code, describe_type};
use eapold_packet::view::PacketView;

/// Evaluate a filter mask against a packet. `from` is the ingress interface
/// name when evaluating an egress filter, `None` on ingress; it only affects
/// the log line.
pub fn filter_drops(mask: &FilterMask, pkt: &PacketView, name: &str, from: Option<&str>) -> bool {
    let ty = pkt.eapol_type();

    if mask.drops_type(ty) {
        match from {
            None => info!("filtered {} frame entering on '{}'", describe_type(ty), name),
            Some(orig) => info!(
                "filtered {} frame from '{}' leaving on '{}'",
                describe_type(ty),
                orig,
                name
            ),
        }
        return true;
    }

    if ty == eapol::EAP_PACKET {
        if let Some(code) = pkt.eap_code() {
            if mask.drops_code(code) {
                match from {
                    None => info!(
                        "filtered {} EAP-Packet entering on '{}'",
                        describe_code(code),
                        name
                    ),
                    Some(orig) => info!(
                        "filtered {} EAP-Packet from '{}' leaving on '{}'",
                        describe_code(code),
                        orig,
                        name
                    ),
                }
                return true;
            }
        }
    }

    false
}

/// Apply an egress interface's 802.1Q directive to a fresh copy of the
/// packet view, starting from the original tag state, and recompute the
/// frame length.
pub fn apply_tci(pkt: &mut PacketView, directive: Option<&TciDirective>) {
    pkt.vlan = match directive {
        None => pkt.vlan_orig,
        Some(TciDirective::Strip) => None,
        Some(TciDirective::Rewrite { pcp, dei, vid }) => {
            let base = pkt.vlan_orig.unwrap_or_default();
            Some(Tci {
                pcp: pcp.unwrap_or(base.pcp),
                dei: dei.unwrap_or(base.dei),
                vid: vid.unwrap_or(base.vid),
            })
        }
    };

    pkt.len = match (pkt.vlan.is_some(), pkt.vlan_orig.is_some()) {
        (true, false) => pkt.len_orig + 4,
        (false, true) => pkt.len_orig - 4,
        _ => pkt.len_orig,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use eapold_core::types::MacAddr;
    use eapold_packet::eapol::EapolPdu;
    use std::time::SystemTime;

    fn view(pdu: &[u8], vlan: Option<Tci>) -> PacketView {
        let len = if vlan.is_some() { 64 } else { 60 };
        PacketView {
            timestamp: SystemTime::UNIX_EPOCH,
            ingress: 0,
            current: 0,
            len,
            len_orig: len,
            dest: MacAddr::new([0x01, 0x80, 0xc2, 0x00, 0x00, 0x03]),
            source: MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
            vlan,
            vlan_orig: vlan,
            pdu: EapolPdu::parse(pdu).unwrap(),
        }
    }

    const START: &[u8] = &[0x02, 0x01, 0x00, 0x00];
    const LOGOFF: &[u8] = &[0x02, 0x02, 0x00, 0x00];
    const EAP_SUCCESS: &[u8] = &[0x01, 0x00, 0x00, 0x04, 0x03, 0x07, 0x00, 0x04];

    #[test]
    fn test_filter_by_type() {
        let mut mask = FilterMask::default();
        mask.set_type(eapol::LOGOFF);

        assert!(filter_drops(&mask, &view(LOGOFF, None), "eth0", None));
        assert!(!filter_drops(&mask, &view(START, None), "eth0", None));
        assert!(!filter_drops(&mask, &view(EAP_SUCCESS, None), "eth0", None));
    }

    #[test]
    fn test_filter_by_code() {
        let mut mask = FilterMask::default();
        mask.set_code(eapol::CODE_SUCCESS);

        assert!(filter_drops(
            &mask,
            &view(EAP_SUCCESS, None),
            "eth1",
            Some("eth0")
        ));
        assert!(!filter_drops(&mask, &view(START, None), "eth1", Some("eth0")));
    }

    #[test]
    fn test_no_directive_preserves_tag() {
        let tci = Tci::new(3, 0, 100);
        let mut pkt = view(START, Some(tci));
        apply_tci(&mut pkt, None);
        assert_eq!(pkt.vlan, Some(tci));
        assert_eq!(pkt.len, pkt.len_orig);

        let mut pkt = view(START, None);
        apply_tci(&mut pkt, None);
        assert_eq!(pkt.vlan, None);
        assert_eq!(pkt.len, pkt.len_orig);
    }

    #[test]
    fn test_strip_is_idempotent() {
        let mut tagged = view(START, Some(Tci::new(3, 0, 100)));
        apply_tci(&mut tagged, Some(&TciDirective::Strip));
        assert_eq!(tagged.vlan, None);
        assert_eq!(tagged.len, tagged.len_orig - 4);

        let mut untagged = view(START, None);
        apply_tci(&mut untagged, Some(&TciDirective::Strip));
        assert_eq!(untagged.vlan, None);
        assert_eq!(untagged.len, untagged.len_orig);
    }

    #[test]
    fn test_rewrite_pointwise() {
        // priority 7 over (pcp=3, dei=0, vid=100) -> (7, 0, 100)
        let directive = TciDirective::Rewrite {
            pcp: Some(7),
            dei: None,
            vid: None,
        };
        let mut pkt = view(START, Some(Tci::new(3, 0, 100)));
        apply_tci(&mut pkt, Some(&directive));
        assert_eq!(pkt.vlan, Some(Tci::new(7, 0, 100)));
        assert_eq!(pkt.len, pkt.len_orig);
    }

    #[test]
    fn test_rewrite_injects_zero_defaults() {
        // priority 7 over an untagged frame -> (7, 0, 0), length grows by 4
        let directive = TciDirective::Rewrite {
            pcp: Some(7),
            dei: None,
            vid: None,
        };
        let mut pkt = view(START, None);
        apply_tci(&mut pkt, Some(&directive));
        assert_eq!(pkt.vlan, Some(Tci::new(7, 0, 0)));
        assert_eq!(pkt.len, pkt.len_orig + 4);
    }

    #[test]
    fn test_rewrite_priority_injection_scenario() {
        // dot1q { priority 5; id 10; } over untagged -> TCI 0xA00A
        let directive = TciDirective::Rewrite {
            pcp: Some(5),
            dei: None,
            vid: Some(10),
        };
        let mut pkt = view(START, None);
        apply_tci(&mut pkt, Some(&directive));
        assert_eq!(pkt.vlan.unwrap().to_u16(), 0xa00a);
        assert_eq!(pkt.len, pkt.len_orig + 4);
    }

    #[test]
    fn test_rewrite_is_per_copy() {
        // Two egress interfaces with different directives see independent
        // results computed from the same original.
        let original = view(START, Some(Tci::new(3, 0, 100)));

        let mut a = original;
        apply_tci(&mut a, Some(&TciDirective::Strip));

        let mut b = original;
        apply_tci(
            &mut b,
            Some(&TciDirective::Rewrite {
                pcp: None,
                dei: None,
                vid: Some(200),
            }),
        );

        assert_eq!(a.vlan, None);
        assert_eq!(b.vlan, Some(Tci::new(3, 0, 200)));
        assert_eq!(original.vlan, Some(Tci::new(3, 0, 100)));
    }
}
