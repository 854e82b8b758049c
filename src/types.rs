//! Shared wire-level types: stream ids, frame/setting/error enumerations.

use num_derive::{FromPrimitive, ToPrimitive};
use std::num::NonZeroU32;

/// The largest value a 31-bit stream id or window can hold.
pub const U31_MAX: u32 = u32::MAX >> 1;

/// Safety: `U31_MAX` is `u32::MAX >> 1`, which is never zero.
pub const NONZERO_U31_MAX: NonZeroU32 = unsafe { NonZeroU32::new_unchecked(U31_MAX) };

pub type StreamId = u32;

/// `MAX_FRAME_SIZE` default per §6: 2^14 - 1.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384 - 1;

/// Default per-stream and per-connection flow-control window per §6.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Default HPACK dynamic table bound per §6.
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// The fixed 24-byte client connection preface token (§6).
pub const CONNECTION_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// One of the nine HTTP/2 frame types (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    ResetStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

/// Protocol error codes carried on RST_STREAM/GOAWAY and used by the
/// error taxonomy in §7 (wire values per §6's power-of-two table, not
/// RFC 7540's sequential one — (sic), this draft's codes really do
/// double per entry past PROTOCOL_ERROR/INTERNAL_ERROR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ErrorType {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x4,
    SettingsTimeout = 0x8,
    StreamClosed = 0x10,
    FrameSizeError = 0x20,
    RefusedStream = 0x40,
    Cancel = 0x80,
    CompressionError = 0x100,
    ConnectError = 0x200,
    EnhanceYourCalm = 0x400,
    InadequateSecurity = 0x800,
}

/// SETTINGS parameter identifiers this crate recognizes (§3). Any other
/// id received on the wire is a ProtocolError per §4.1's SETTINGS rule.
/// Each record on the wire is 5 bytes: a 1-byte id followed by a 4-byte
/// value, not RFC 7540's 2-byte id (§4.1).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive, enum_map::Enum,
)]
#[repr(u8)]
pub enum SettingsParameter {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
}

/// An ordered header list: duplicate names are preserved, pseudo-headers
/// (leading `:`) are distinguished only by their name, matching §3's
/// "Request/response header maps preserve insertion order and accept
/// duplicate names".
pub type HeaderList = Vec<(String, String)>;

pub(crate) fn is_pseudo_header(name: &str) -> bool {
    name.starts_with(':')
}

/// Stable ordering used when emitting a header block: pseudo-headers first,
/// each group internally stable (§4.2 "Pseudo-headers... must appear before
/// regular headers in the emitted sequence").
pub(crate) fn sort_pseudo_first(headers: &mut HeaderList) {
    headers.sort_by_key(|(name, _)| !is_pseudo_header(name));
}
