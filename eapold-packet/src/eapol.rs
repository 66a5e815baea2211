//! EAPOL and EAP header classification
//!
//! ## EAPOL PDU structure
//!
//! ```text
//! +------------------+
//! | Protocol Version | 1 byte
//! +------------------+
//! | Packet Type      | 1 byte
//! +------------------+
//! | Body Length      | 2 bytes (network order)
//! +------------------+
//! | Body             | Variable
//! +------------------+
//! ```
//!
//! When the Packet Type is EAP-Packet (0), the body begins with an EAP header
//! `{code, identifier, length, type}` (RFC 3748 §4); when it is EAPOL-Key (3),
//! the body begins with an RC4 Key Descriptor (IEEE Std 802.1X-2001 §7.6).
//!
//! The proxy never consumes the body beyond these fixed headers; classification
//! only has to answer "which Type/Code is this" and render a log line. Unknown
//! Types and Codes are therefore not errors here: they parse, describe as
//! "Unknown", and are still proxied unless a filter drops them.

use eapold_core::types::eapol::*;
use eapold_core::{Error, Result};

/// Size of the fixed EAPOL header (version, type, body length)
pub const EAPOL_HEADER_SIZE: usize = 4;

/// Size of the fixed EAP header (code, identifier, length)
pub const EAP_HEADER_SIZE: usize = 4;

/// Offset of the key index within an EAPOL-Key RC4 descriptor body:
/// type (1) + key length (2) + replay counter (8) + IV (16)
const KEY_INDEX_OFFSET: usize = 27;

/// Describe an EAPOL Packet Type
pub fn describe_type(ty: u8) -> &'static str {
    match ty {
        EAP_PACKET => "EAP-Packet",
        START => "EAPOL-Start",
        LOGOFF => "EAPOL-Logoff",
        KEY => "EAPOL-Key",
        ENCAP_ASF_ALERT => "EAPOL-Encapsulated-ASF-Alert",
        MKA => "EAPOL-MKA",
        ANNOUNCEMENT_GENERIC => "EAPOL-Announcement (Generic)",
        ANNOUNCEMENT_SPECIFIC => "EAPOL-Announcement (Specific)",
        ANNOUNCEMENT_REQ => "EAPOL-Announcement-Req",
        _ => "Unknown",
    }
}

/// Describe an EAP Code
pub fn describe_code(code: u8) -> &'static str {
    match code {
        CODE_REQUEST => "Request",
        CODE_RESPONSE => "Response",
        CODE_SUCCESS => "Success",
        CODE_FAILURE => "Failure",
        _ => "Unknown",
    }
}

/// Describe the Type of an EAP Request or Response (RFC 3748 §5 and friends)
pub fn describe_eap_type(ty: u8) -> &'static str {
    match ty {
        1 => "Identity",
        2 => "Notification",
        3 => "Nak (Response only)",
        4 => "MD5-Challenge",
        5 => "One Time Password (OTP)",
        6 => "Generic Token Card (GTC)",
        13 => "EAP TLS",
        18 => "EAP-SIM",
        21 => "EAP-TTLS",
        23 => "EAP-AKA",
        25 => "PEAP",
        26 => "EAP MS-CHAP-V2",
        29 => "EAP MS-CHAP V2",
        43 => "EAP-FAST",
        49 => "EAP-IKEv2",
        254 => "Expanded Types",
        255 => "Experimental use",
        _ => "Unknown",
    }
}

/// Describe an EAPOL-Key Descriptor Type
pub fn describe_key_type(ty: u8) -> &'static str {
    match ty {
        1 => "RC4",
        _ => "Unknown",
    }
}

/// Fixed EAP header, present when the EAPOL Packet Type is EAP-Packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EapHeader {
    /// EAP Code (1=Request, 2=Response, 3=Success, 4=Failure)
    pub code: u8,
    /// Identifier, for matching requests with responses
    pub id: u8,
    /// Total EAP packet length
    pub len: u16,
    /// Type of a Request or Response, absent otherwise
    pub rtype: Option<u8>,
}

/// EAPOL-Key RC4 descriptor header, kept for log rendering only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDescriptor {
    pub desc_type: u8,
    pub key_len: u16,
    pub key_index: u8,
}

/// Classified EAPOL PDU: the fixed headers, without the body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EapolPdu {
    /// EAPOL protocol version
    pub version: u8,
    /// EAPOL Packet Type; unknown values are carried as-is
    pub packet_type: u8,
    /// Declared body length
    pub body_len: u16,
    /// EAP header, when the Packet Type is EAP-Packet
    pub eap: Option<EapHeader>,
    /// Key descriptor header, when the Packet Type is EAPOL-Key
    pub key: Option<KeyDescriptor>,
}

impl EapolPdu {
    /// Parse the EAPOL PDU. `pdu` starts at the EAPOL protocol version byte,
    /// immediately after the EtherType.
    pub fn parse(pdu: &[u8]) -> Result<Self> {
        if pdu.len() < EAPOL_HEADER_SIZE {
            return Err(Error::parsing(format!(
                "EAPOL PDU too short: {} bytes (need at least {})",
                pdu.len(),
                EAPOL_HEADER_SIZE
            )));
        }

        let version = pdu[0];
        let packet_type = pdu[1];
        let body_len = u16::from_be_bytes([pdu[2], pdu[3]]);
        let body = &pdu[EAPOL_HEADER_SIZE..];

        let eap = if packet_type == EAP_PACKET && body.len() >= EAP_HEADER_SIZE {
            let code = body[0];
            let rtype = if (code == CODE_REQUEST || code == CODE_RESPONSE)
                && body.len() > EAP_HEADER_SIZE
            {
                Some(body[4])
            } else {
                None
            };
            Some(EapHeader {
                code,
                id: body[1],
                len: u16::from_be_bytes([body[2], body[3]]),
                rtype,
            })
        } else {
            None
        };

        let key = if packet_type == KEY && body.len() > KEY_INDEX_OFFSET {
            Some(KeyDescriptor {
                desc_type: body[0],
                key_len: u16::from_be_bytes([body[1], body[2]]),
                key_index: body[KEY_INDEX_OFFSET],
            })
        } else {
            None
        };

        Ok(EapolPdu {
            version,
            packet_type,
            body_len,
            eap,
            key,
        })
    }

    /// EAP Code, when the frame encapsulates an EAP-Packet
    pub fn eap_code(&self) -> Option<u8> {
        self.eap.map(|eap| eap.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        // EAPOL v2, Type=Start, body length 0
        let pdu = EapolPdu::parse(&[0x02, 0x01, 0x00, 0x00]).unwrap();
        assert_eq!(pdu.version, 2);
        assert_eq!(pdu.packet_type, START);
        assert_eq!(pdu.body_len, 0);
        assert!(pdu.eap.is_none());
        assert!(pdu.key.is_none());
    }

    #[test]
    fn test_parse_too_short() {
        assert!(EapolPdu::parse(&[0x01, 0x00]).is_err());
    }

    #[test]
    fn test_parse_eap_success() {
        // EAPOL v1, EAP-Packet; EAP Success, id 7, len 4
        let pdu = EapolPdu::parse(&[0x01, 0x00, 0x00, 0x04, 0x03, 0x07, 0x00, 0x04]).unwrap();
        let eap = pdu.eap.unwrap();
        assert_eq!(eap.code, CODE_SUCCESS);
        assert_eq!(eap.id, 7);
        assert_eq!(eap.len, 4);
        assert_eq!(eap.rtype, None);
        assert_eq!(pdu.eap_code(), Some(CODE_SUCCESS));
    }

    #[test]
    fn test_parse_eap_response_identity() {
        // EAP Response/Identity, id 152, identity "user"
        let frame = [
            0x01, 0x00, 0x00, 0x09, // EAPOL header, body len 9
            0x02, 152, 0x00, 0x09, // EAP Response, id 152, len 9
            0x01, b'u', b's', b'e', b'r', // Type Identity + data
        ];
        let pdu = EapolPdu::parse(&frame).unwrap();
        let eap = pdu.eap.unwrap();
        assert_eq!(eap.code, CODE_RESPONSE);
        assert_eq!(eap.id, 152);
        assert_eq!(eap.rtype, Some(1));
    }

    #[test]
    fn test_parse_key_descriptor() {
        let mut frame = vec![0x01, 0x03, 0x00, 0x2c];
        let mut body = vec![0u8; 44];
        body[0] = 1; // RC4
        body[1] = 0x00;
        body[2] = 0x10; // 16-byte key
        body[KEY_INDEX_OFFSET] = 0x80 | 0x40; // unicast, index 64
        frame.extend_from_slice(&body);

        let pdu = EapolPdu::parse(&frame).unwrap();
        let key = pdu.key.unwrap();
        assert_eq!(key.desc_type, 1);
        assert_eq!(key.key_len, 16);
        assert_eq!(key.key_index & 0x7f, 64);
        assert_ne!(key.key_index & 0x80, 0);
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let pdu = EapolPdu::parse(&[0x03, 0x77, 0x00, 0x00]).unwrap();
        assert_eq!(pdu.packet_type, 0x77);
        assert_eq!(describe_type(pdu.packet_type), "Unknown");
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(describe_type(EAP_PACKET), "EAP-Packet");
        assert_eq!(describe_type(START), "EAPOL-Start");
        assert_eq!(describe_type(ANNOUNCEMENT_REQ), "EAPOL-Announcement-Req");
        assert_eq!(describe_code(CODE_RESPONSE), "Response");
        assert_eq!(describe_eap_type(1), "Identity");
        assert_eq!(describe_eap_type(6), "Generic Token Card (GTC)");
        assert_eq!(describe_key_type(1), "RC4");
    }
}
