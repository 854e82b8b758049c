//! Per-frame-type flag bits (§4.1 "Flag-bit assignments"). This crate's
//! wire draft uses a two-byte pad-length preamble (PAD_LOW/PAD_HIGH)
//! rather than the single PADDED bit of the final RFC 7540 registry, and
//! reserves 0x2 for END_SEGMENT, which every flag set below parses and
//! discards (§9 Open Questions: "treat as accepted-and-ignored").

use bitflags::bitflags;

bitflags! {
    pub struct DataFlags: u8 {
        const END_STREAM = 0x1;
        const END_SEGMENT = 0x2;
        const PAD_LOW = 0x10;
        const PAD_HIGH = 0x20;
    }

    pub struct HeadersFlags: u8 {
        const END_STREAM = 0x1;
        const END_SEGMENT = 0x2;
        const END_HEADERS = 0x4;
        const PRIORITY = 0x8;
        const PAD_LOW = 0x10;
        const PAD_HIGH = 0x20;
    }

    pub struct SettingsFlags: u8 {
        const ACK = 0x1;
    }

    pub struct PushPromiseFlags: u8 {
        const END_HEADERS = 0x4;
        const PAD_LOW = 0x10;
        const PAD_HIGH = 0x20;
    }

    pub struct PingFlags: u8 {
        const ACK = 0x1;
    }

    pub struct ContinuationFlags: u8 {
        const END_HEADERS = 0x4;
        const PAD_LOW = 0x10;
        const PAD_HIGH = 0x20;
    }
}
