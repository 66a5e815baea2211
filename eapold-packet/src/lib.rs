//! Eapold Packet Library
//!
//! EAPOL/EAP header classification, text descriptions for logging, and the
//! in-memory view of one proxied frame.

pub mod eapol;
pub mod view;

pub use eapol::{EapHeader, EapolPdu, KeyDescriptor};
pub use view::PacketView;
