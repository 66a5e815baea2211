//! The shared frame buffer
//!
//! One buffer, sized once for the largest interface MTU, holds every frame the
//! proxy handles. Layout:
//!
//! ```text
//! [0 ..12)   scratch for destination + source MAC
//! [12..16)   scratch for an 802.1Q tag (TPID 0x8100 + TCI)
//! [16..18)   EtherType 0x888E
//! [18.. )    EAPOL PDU
//! ```
//!
//! Receive places the wire bytes following the MAC addresses at offset 16; the
//! MACs land in the packet view and any VLAN tag is recovered from kernel
//! auxiliary data, so neither is in the buffer. [`FrameBuffer::frame`] rebuilds
//! the first 12 or 16 bytes immediately before each send, which lets the same
//! PDU ship to any number of egress interfaces with different tag decisions
//! without copying it.

use eapold_core::types::{ethertypes, MacAddr, Tci, ETH_ALEN};

/// MAC scratch plus tag scratch
const PREFIX: usize = 2 * ETH_ALEN + 4;

/// The single scratch region shared by receive and send
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Allocate for the given MTU: 12 MAC bytes + 4 tag bytes + 2 EtherType
    /// bytes + MTU (1518 bytes on a 1500-MTU link)
    pub fn new(max_mtu: u32) -> Self {
        Self {
            buf: vec![0; PREFIX + 2 + max_mtu as usize],
        }
    }

    /// Capacity of the PDU region (EtherType + MTU)
    pub fn pdu_capacity(&self) -> usize {
        self.buf.len() - PREFIX
    }

    /// The PDU region, starting at the EtherType
    pub fn pdu(&self) -> &[u8] {
        &self.buf[PREFIX..]
    }

    /// Mutable PDU region, for the receive scatter vector
    pub fn pdu_mut(&mut self) -> &mut [u8] {
        &mut self.buf[PREFIX..]
    }

    /// Rebuild the frame head and return the complete frame of `len` bytes,
    /// suitable for a single write to the kernel.
    ///
    /// With a tag the frame starts at offset 0; without one the MACs are
    /// written at offset 4 so that the frame still ends flush against the
    /// shared PDU region.
    pub fn frame(&mut self, dest: MacAddr, source: MacAddr, vlan: Option<Tci>, len: usize) -> &[u8] {
        let start = match vlan {
            Some(tci) => {
                self.buf[0..6].copy_from_slice(dest.as_bytes());
                self.buf[6..12].copy_from_slice(source.as_bytes());
                self.buf[12..14].copy_from_slice(&ethertypes::DOT1Q.to_be_bytes());
                self.buf[14..16].copy_from_slice(&tci.to_u16().to_be_bytes());
                0
            }
            None => {
                self.buf[4..10].copy_from_slice(dest.as_bytes());
                self.buf[10..16].copy_from_slice(source.as_bytes());
                4
            }
        };
        &self.buf[start..start + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEST: MacAddr = MacAddr::new([0x01, 0x80, 0xc2, 0x00, 0x00, 0x03]);
    const SOURCE: MacAddr = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

    fn buffer_with_start_pdu() -> FrameBuffer {
        let mut buf = FrameBuffer::new(1500);
        // EtherType + EAPOL v2 Start
        buf.pdu_mut()[..6].copy_from_slice(&[0x88, 0x8e, 0x02, 0x01, 0x00, 0x00]);
        buf
    }

    #[test]
    fn test_sizing() {
        let buf = FrameBuffer::new(1500);
        assert_eq!(buf.pdu_capacity(), 1502);
        assert_eq!(buf.pdu().len(), 1502);
    }

    #[test]
    fn test_untagged_frame() {
        let mut buf = buffer_with_start_pdu();
        let frame = buf.frame(DEST, SOURCE, None, 18);
        assert_eq!(frame.len(), 18);
        assert_eq!(&frame[0..6], DEST.as_bytes());
        assert_eq!(&frame[6..12], SOURCE.as_bytes());
        assert_eq!(&frame[12..18], &[0x88, 0x8e, 0x02, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_tagged_frame() {
        let mut buf = buffer_with_start_pdu();
        let frame = buf.frame(DEST, SOURCE, Some(Tci::new(5, 0, 10)), 22);
        assert_eq!(frame.len(), 22);
        assert_eq!(&frame[0..6], DEST.as_bytes());
        assert_eq!(&frame[6..12], SOURCE.as_bytes());
        // TPID 0x8100, TCI 0xA00A
        assert_eq!(&frame[12..16], &[0x81, 0x00, 0xa0, 0x0a]);
        assert_eq!(&frame[16..22], &[0x88, 0x8e, 0x02, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_pdu_shared_across_tag_decisions() {
        let mut buf = buffer_with_start_pdu();

        let tagged: Vec<u8> = buf
            .frame(DEST, SOURCE, Some(Tci::new(7, 1, 100)), 22)
            .to_vec();
        let untagged: Vec<u8> = buf.frame(DEST, SOURCE, None, 18).to_vec();
        let retagged: Vec<u8> = buf.frame(DEST, SOURCE, Some(Tci::new(0, 0, 0)), 22).to_vec();

        // The PDU bytes are identical in every rendering
        assert_eq!(&tagged[16..], &untagged[12..]);
        assert_eq!(&retagged[16..], &untagged[12..]);
        // Only the tag differs
        assert_eq!(&tagged[12..16], &[0x81, 0x00, 0xf0, 0x64]);
        assert_eq!(&retagged[12..16], &[0x81, 0x00, 0x00, 0x00]);
    }
}
