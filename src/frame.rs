//! Frame codec (§4.1): a sans-I/O, bijective mapping between the 8-byte
//! wire header + payload bytes and a tagged `Frame` value, with per-type
//! payload validation. No I/O happens here; `connection.rs` owns reading
//! and writing bytes on the transport.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_traits::{FromPrimitive, ToPrimitive};

use crate::error::ConnectionError;
use crate::flags::*;
use crate::types::*;

pub const FRAME_HEADER_LEN: usize = 8;

/// The 8-byte frame header (§3 "Frame header (wire)"): a 14-bit length, an
/// 8-bit type, an 8-bit flags octet, and a 31-bit stream id, with one
/// reserved bit each in the length and stream-id fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u16,
    pub type_raw: u8,
    pub flags: u8,
    pub stream_id: StreamId,
}

impl FrameHeader {
    #[must_use]
    pub fn parse(bytes: [u8; FRAME_HEADER_LEN]) -> Self {
        let length = u16::from_be_bytes([bytes[0], bytes[1]]) & 0x3FFF;
        let type_raw = bytes[2];
        let flags = bytes[3];
        let stream_id =
            u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) & U31_MAX;
        Self {
            length,
            type_raw,
            flags,
            stream_id,
        }
    }

    pub fn serialize_into(&self, out: &mut BytesMut) {
        out.put_u16(self.length & 0x3FFF);
        out.put_u8(self.type_raw);
        out.put_u8(self.flags);
        out.put_u32(self.stream_id & U31_MAX);
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.type_raw)
    }
}

/// Presence and value of the optional pad-high/pad-low preamble bytes
/// (§4.1). Total padding = `pad_high * 256 + pad_low`; a byte that is
/// absent contributes 0 but also omits its flag bit and its wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    pub pad_low: Option<u8>,
    pub pad_high: Option<u8>,
}

impl Padding {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.pad_high.unwrap_or(0) as usize * 256 + self.pad_low.unwrap_or(0) as usize
    }

    fn write_preamble(&self, out: &mut BytesMut) {
        if let Some(high) = self.pad_high {
            out.put_u8(high);
        }
        if let Some(low) = self.pad_low {
            out.put_u8(low);
        }
    }

    fn write_trailer(&self, out: &mut BytesMut) {
        out.put_bytes(0, self.total());
    }

    fn parse(payload: &mut Bytes, pad_low: bool, pad_high: bool) -> Result<Self, ConnectionError> {
        let mut padding = Self::none();
        if pad_high {
            if payload.is_empty() {
                return Err(ConnectionError::protocol("truncated pad-high preamble"));
            }
            padding.pad_high = Some(payload.get_u8());
        }
        if pad_low {
            if payload.is_empty() {
                return Err(ConnectionError::protocol("truncated pad-low preamble"));
            }
            padding.pad_low = Some(payload.get_u8());
        }
        if padding.total() > payload.remaining() {
            return Err(ConnectionError::protocol("padding exceeds payload length"));
        }
        Ok(padding)
    }

    fn split_payload(&self, mut payload: Bytes) -> Bytes {
        let data_len = payload.remaining() - self.total();
        payload.split_to(data_len)
    }
}

/// A fully-typed HTTP/2 frame (§3 "Frame"). One variant per frame type;
/// every code path over `Frame` is exhaustive and compiler-checked (§9
/// "Dynamic dispatch over frame types").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: StreamId,
        end_stream: bool,
        padding: Padding,
        data: Bytes,
    },
    Headers {
        stream_id: StreamId,
        end_stream: bool,
        end_headers: bool,
        priority: Option<u32>,
        padding: Padding,
        fragment: Bytes,
    },
    Priority {
        stream_id: StreamId,
        priority: u32,
    },
    ResetStream {
        stream_id: StreamId,
        error: ErrorType,
    },
    Settings {
        ack: bool,
        params: Vec<(SettingsParameter, u32)>,
    },
    PushPromise {
        stream_id: StreamId,
        promised_stream_id: StreamId,
        end_headers: bool,
        padding: Padding,
        fragment: Bytes,
    },
    Ping {
        ack: bool,
        data: [u8; 8],
    },
    GoAway {
        last_stream_id: StreamId,
        error: ErrorType,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: StreamId,
        increment: u32,
    },
    Continuation {
        stream_id: StreamId,
        end_headers: bool,
        padding: Padding,
        fragment: Bytes,
    },
}

impl Frame {
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Data { stream_id, .. }
            | Self::Headers { stream_id, .. }
            | Self::Priority { stream_id, .. }
            | Self::ResetStream { stream_id, .. }
            | Self::PushPromise { stream_id, .. }
            | Self::WindowUpdate { stream_id, .. }
            | Self::Continuation { stream_id, .. } => *stream_id,
            Self::Settings { .. } | Self::Ping { .. } | Self::GoAway { .. } => 0,
        }
    }

    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Data { .. } => FrameType::Data,
            Self::Headers { .. } => FrameType::Headers,
            Self::Priority { .. } => FrameType::Priority,
            Self::ResetStream { .. } => FrameType::ResetStream,
            Self::Settings { .. } => FrameType::Settings,
            Self::PushPromise { .. } => FrameType::PushPromise,
            Self::Ping { .. } => FrameType::Ping,
            Self::GoAway { .. } => FrameType::GoAway,
            Self::WindowUpdate { .. } => FrameType::WindowUpdate,
            Self::Continuation { .. } => FrameType::Continuation,
        }
    }

    /// True for frame types whose payload counts against the flow-control
    /// window (§3 "DataFrame lengths count toward a window only on data
    /// frames").
    #[must_use]
    pub fn is_flow_controlled(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    /// Serializes header + payload into `out`. `length` in the header is
    /// computed from the encoded payload, never supplied separately (§4.1
    /// "Length is a property of the payload").
    pub fn serialize(&self, out: &mut BytesMut) -> Result<(), ConnectionError> {
        let mut payload = BytesMut::new();
        let flags = self.encode_payload(&mut payload)?;
        if payload.len() > 0x3FFF {
            return Err(ConnectionError::FrameSize(format!(
                "payload of {} bytes exceeds 14-bit length field",
                payload.len()
            )));
        }
        let header = FrameHeader {
            length: payload.len() as u16,
            type_raw: self
                .frame_type()
                .to_u8()
                .expect("FrameType is repr(u8)"),
            flags,
            stream_id: self.stream_id(),
        };
        header.serialize_into(out);
        out.extend_from_slice(&payload);
        Ok(())
    }

    fn encode_payload(&self, out: &mut BytesMut) -> Result<u8, ConnectionError> {
        match self {
            Self::Data {
                end_stream,
                padding,
                data,
                ..
            } => {
                let mut flags = DataFlags::empty();
                if *end_stream {
                    flags |= DataFlags::END_STREAM;
                }
                if padding.pad_low.is_some() {
                    flags |= DataFlags::PAD_LOW;
                }
                if padding.pad_high.is_some() {
                    flags |= DataFlags::PAD_HIGH;
                }
                padding.write_preamble(out);
                out.extend_from_slice(data);
                padding.write_trailer(out);
                Ok(flags.bits())
            }
            Self::Headers {
                end_stream,
                end_headers,
                priority,
                padding,
                fragment,
                ..
            } => {
                let mut flags = HeadersFlags::empty();
                if *end_stream {
                    flags |= HeadersFlags::END_STREAM;
                }
                if *end_headers {
                    flags |= HeadersFlags::END_HEADERS;
                }
                if priority.is_some() {
                    flags |= HeadersFlags::PRIORITY;
                }
                if padding.pad_low.is_some() {
                    flags |= HeadersFlags::PAD_LOW;
                }
                if padding.pad_high.is_some() {
                    flags |= HeadersFlags::PAD_HIGH;
                }
                padding.write_preamble(out);
                if let Some(priority) = priority {
                    out.put_u32(priority & U31_MAX);
                }
                out.extend_from_slice(fragment);
                padding.write_trailer(out);
                Ok(flags.bits())
            }
            Self::Priority { priority, .. } => {
                out.put_u32(priority & U31_MAX);
                Ok(0)
            }
            Self::ResetStream { error, .. } => {
                out.put_u32(error.to_u32().expect("ErrorType is repr(u32)"));
                Ok(0)
            }
            Self::Settings { ack, params } => {
                if *ack {
                    return Ok(SettingsFlags::ACK.bits());
                }
                for (id, value) in params {
                    out.put_u8(id.to_u8().expect("SettingsParameter is repr(u8)"));
                    out.put_u32(*value);
                }
                Ok(0)
            }
            Self::PushPromise {
                promised_stream_id,
                end_headers,
                padding,
                fragment,
                ..
            } => {
                let mut flags = PushPromiseFlags::empty();
                if *end_headers {
                    flags |= PushPromiseFlags::END_HEADERS;
                }
                if padding.pad_low.is_some() {
                    flags |= PushPromiseFlags::PAD_LOW;
                }
                if padding.pad_high.is_some() {
                    flags |= PushPromiseFlags::PAD_HIGH;
                }
                padding.write_preamble(out);
                out.put_u32(promised_stream_id & U31_MAX);
                out.extend_from_slice(fragment);
                padding.write_trailer(out);
                Ok(flags.bits())
            }
            Self::Ping { ack, data } => {
                out.extend_from_slice(data);
                Ok(if *ack { PingFlags::ACK.bits() } else { 0 })
            }
            Self::GoAway {
                last_stream_id,
                error,
                debug_data,
            } => {
                out.put_u32(last_stream_id & U31_MAX);
                out.put_u32(error.to_u32().expect("ErrorType is repr(u32)"));
                out.extend_from_slice(debug_data);
                Ok(0)
            }
            Self::WindowUpdate { increment, .. } => {
                out.put_u32(increment & U31_MAX);
                Ok(0)
            }
            Self::Continuation {
                end_headers,
                padding,
                fragment,
                ..
            } => {
                let mut flags = ContinuationFlags::empty();
                if *end_headers {
                    flags |= ContinuationFlags::END_HEADERS;
                }
                if padding.pad_low.is_some() {
                    flags |= ContinuationFlags::PAD_LOW;
                }
                if padding.pad_high.is_some() {
                    flags |= ContinuationFlags::PAD_HIGH;
                }
                padding.write_preamble(out);
                out.extend_from_slice(fragment);
                padding.write_trailer(out);
                Ok(flags.bits())
            }
        }
    }

    /// Parses a frame's payload given its already-parsed header. Implements
    /// every per-type rule in §4.1.
    pub fn parse_payload(
        header: &FrameHeader,
        payload: Bytes,
    ) -> Result<Self, ConnectionError> {
        let ty = header
            .frame_type()
            .ok_or_else(|| ConnectionError::protocol(format!("unknown frame type {}", header.type_raw)))?;
        match ty {
            FrameType::Data => Self::parse_data(header, payload),
            FrameType::Headers => Self::parse_headers(header, payload),
            FrameType::Priority => Self::parse_priority(header, payload),
            FrameType::ResetStream => Self::parse_reset_stream(header, payload),
            FrameType::Settings => Self::parse_settings(header, payload),
            FrameType::PushPromise => Self::parse_push_promise(header, payload),
            FrameType::Ping => Self::parse_ping(header, payload),
            FrameType::GoAway => Self::parse_goaway(header, payload),
            FrameType::WindowUpdate => Self::parse_window_update(header, payload),
            FrameType::Continuation => Self::parse_continuation(header, payload),
        }
    }

    fn parse_data(header: &FrameHeader, mut payload: Bytes) -> Result<Self, ConnectionError> {
        if header.stream_id == 0 {
            return Err(ConnectionError::protocol("DATA on stream 0"));
        }
        let flags = DataFlags::from_bits_truncate(header.flags);
        let padding = Padding::parse(
            &mut payload,
            flags.contains(DataFlags::PAD_LOW),
            flags.contains(DataFlags::PAD_HIGH),
        )?;
        let data = padding.split_payload(payload);
        Ok(Self::Data {
            stream_id: header.stream_id,
            end_stream: flags.contains(DataFlags::END_STREAM),
            padding,
            data,
        })
    }

    fn parse_headers(header: &FrameHeader, mut payload: Bytes) -> Result<Self, ConnectionError> {
        if header.stream_id == 0 {
            return Err(ConnectionError::protocol("HEADERS on stream 0"));
        }
        let flags = HeadersFlags::from_bits_truncate(header.flags);
        let padding = Padding::parse(
            &mut payload,
            flags.contains(HeadersFlags::PAD_LOW),
            flags.contains(HeadersFlags::PAD_HIGH),
        )?;
        let priority = if flags.contains(HeadersFlags::PRIORITY) {
            if payload.remaining() < 4 {
                return Err(ConnectionError::protocol("truncated HEADERS priority field"));
            }
            Some(payload.get_u32() & U31_MAX)
        } else {
            None
        };
        let fragment = padding.split_payload(payload);
        Ok(Self::Headers {
            stream_id: header.stream_id,
            end_stream: flags.contains(HeadersFlags::END_STREAM),
            end_headers: flags.contains(HeadersFlags::END_HEADERS),
            priority,
            padding,
            fragment,
        })
    }

    fn parse_priority(header: &FrameHeader, mut payload: Bytes) -> Result<Self, ConnectionError> {
        if header.stream_id == 0 {
            return Err(ConnectionError::protocol("PRIORITY on stream 0"));
        }
        if payload.remaining() != 4 {
            return Err(ConnectionError::FrameSize("PRIORITY payload must be 4 bytes".into()));
        }
        Ok(Self::Priority {
            stream_id: header.stream_id,
            priority: payload.get_u32() & U31_MAX,
        })
    }

    fn parse_reset_stream(header: &FrameHeader, mut payload: Bytes) -> Result<Self, ConnectionError> {
        if header.stream_id == 0 {
            return Err(ConnectionError::protocol("RST_STREAM on stream 0"));
        }
        if payload.remaining() != 4 {
            return Err(ConnectionError::FrameSize("RST_STREAM payload must be 4 bytes".into()));
        }
        let code = payload.get_u32();
        let error = ErrorType::from_u32(code)
            .ok_or_else(|| ConnectionError::protocol(format!("unknown RST_STREAM error code {code}")))?;
        Ok(Self::ResetStream {
            stream_id: header.stream_id,
            error,
        })
    }

    fn parse_settings(header: &FrameHeader, payload: Bytes) -> Result<Self, ConnectionError> {
        if header.stream_id != 0 {
            return Err(ConnectionError::protocol("SETTINGS on non-zero stream"));
        }
        let flags = SettingsFlags::from_bits_truncate(header.flags);
        if flags.contains(SettingsFlags::ACK) {
            if !payload.is_empty() {
                return Err(ConnectionError::FrameSize("SETTINGS ACK must be empty".into()));
            }
            return Ok(Self::Settings {
                ack: true,
                params: Vec::new(),
            });
        }
        if payload.len() % 5 != 0 {
            return Err(ConnectionError::FrameSize(
                "SETTINGS payload must be a multiple of 5 bytes".into(),
            ));
        }
        let mut params = Vec::with_capacity(payload.len() / 5);
        let mut buf = payload;
        while buf.has_remaining() {
            let id = buf.get_u8();
            let value = buf.get_u32();
            let param = SettingsParameter::from_u8(id)
                .ok_or_else(|| ConnectionError::protocol(format!("unknown SETTINGS id {id}")))?;
            params.push((param, value));
        }
        Ok(Self::Settings { ack: false, params })
    }

    fn parse_push_promise(header: &FrameHeader, mut payload: Bytes) -> Result<Self, ConnectionError> {
        if header.stream_id == 0 {
            return Err(ConnectionError::protocol("PUSH_PROMISE on stream 0"));
        }
        let flags = PushPromiseFlags::from_bits_truncate(header.flags);
        let padding = Padding::parse(
            &mut payload,
            flags.contains(PushPromiseFlags::PAD_LOW),
            flags.contains(PushPromiseFlags::PAD_HIGH),
        )?;
        if payload.remaining() < 4 {
            return Err(ConnectionError::protocol("truncated PUSH_PROMISE stream id"));
        }
        let promised_stream_id = payload.get_u32() & U31_MAX;
        let fragment = padding.split_payload(payload);
        Ok(Self::PushPromise {
            stream_id: header.stream_id,
            promised_stream_id,
            end_headers: flags.contains(PushPromiseFlags::END_HEADERS),
            padding,
            fragment,
        })
    }

    fn parse_ping(header: &FrameHeader, payload: Bytes) -> Result<Self, ConnectionError> {
        if header.stream_id != 0 {
            return Err(ConnectionError::protocol("PING on non-zero stream"));
        }
        if payload.len() != 8 {
            return Err(ConnectionError::FrameSize("PING payload must be 8 bytes".into()));
        }
        let flags = PingFlags::from_bits_truncate(header.flags);
        let mut data = [0u8; 8];
        data.copy_from_slice(&payload);
        Ok(Self::Ping {
            ack: flags.contains(PingFlags::ACK),
            data,
        })
    }

    fn parse_goaway(header: &FrameHeader, mut payload: Bytes) -> Result<Self, ConnectionError> {
        if header.stream_id != 0 {
            return Err(ConnectionError::protocol("GOAWAY on non-zero stream"));
        }
        if payload.remaining() < 8 {
            return Err(ConnectionError::FrameSize("GOAWAY payload shorter than 8 bytes".into()));
        }
        let last_stream_id = payload.get_u32() & U31_MAX;
        let code = payload.get_u32();
        let error = ErrorType::from_u32(code).unwrap_or(ErrorType::InternalError);
        Ok(Self::GoAway {
            last_stream_id,
            error,
            debug_data: payload,
        })
    }

    fn parse_window_update(header: &FrameHeader, mut payload: Bytes) -> Result<Self, ConnectionError> {
        if payload.remaining() != 4 {
            return Err(ConnectionError::FrameSize("WINDOW_UPDATE payload must be 4 bytes".into()));
        }
        let increment = payload.get_u32() & U31_MAX;
        if increment > U31_MAX {
            return Err(ConnectionError::FlowControl("WINDOW_UPDATE increment exceeds 2^31-1".into()));
        }
        Ok(Self::WindowUpdate {
            stream_id: header.stream_id,
            increment,
        })
    }

    fn parse_continuation(header: &FrameHeader, mut payload: Bytes) -> Result<Self, ConnectionError> {
        if header.stream_id == 0 {
            return Err(ConnectionError::protocol("CONTINUATION on stream 0"));
        }
        let flags = ContinuationFlags::from_bits_truncate(header.flags);
        let padding = Padding::parse(
            &mut payload,
            flags.contains(ContinuationFlags::PAD_LOW),
            flags.contains(ContinuationFlags::PAD_HIGH),
        )?;
        let fragment = padding.split_payload(payload);
        Ok(Self::Continuation {
            stream_id: header.stream_id,
            end_headers: flags.contains(ContinuationFlags::END_HEADERS),
            padding,
            fragment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let mut out = BytesMut::new();
        frame.serialize(&mut out).expect("serialize");
        let mut header_bytes = [0u8; FRAME_HEADER_LEN];
        header_bytes.copy_from_slice(&out[..FRAME_HEADER_LEN]);
        let header = FrameHeader::parse(header_bytes);
        let payload = out.split_off(FRAME_HEADER_LEN).freeze();
        let parsed = Frame::parse_payload(&header, payload).expect("parse");
        assert_eq!(frame, parsed);
    }

    #[test]
    fn data_roundtrip_unpadded() {
        roundtrip(Frame::Data {
            stream_id: 1,
            end_stream: true,
            padding: Padding::none(),
            data: Bytes::from_static(b"hello"),
        });
    }

    #[test]
    fn data_roundtrip_padded_low_and_high() {
        roundtrip(Frame::Data {
            stream_id: 3,
            end_stream: false,
            padding: Padding {
                pad_low: Some(5),
                pad_high: Some(1),
            },
            data: Bytes::from_static(b"x"),
        });
    }

    #[test]
    fn headers_roundtrip_with_priority() {
        roundtrip(Frame::Headers {
            stream_id: 1,
            end_stream: true,
            end_headers: true,
            priority: Some(42),
            padding: Padding::none(),
            fragment: Bytes::from_static(b"\x82\x84"),
        });
    }

    #[test]
    fn settings_ack_roundtrip() {
        roundtrip(Frame::Settings {
            ack: true,
            params: Vec::new(),
        });
    }

    #[test]
    fn settings_roundtrip() {
        roundtrip(Frame::Settings {
            ack: false,
            params: vec![
                (SettingsParameter::InitialWindowSize, 65_535),
                (SettingsParameter::EnablePush, 0),
            ],
        });
    }

    #[test]
    fn settings_unknown_id_is_protocol_error() {
        let header = FrameHeader {
            length: 5,
            type_raw: FrameType::Settings as u8,
            flags: 0,
            stream_id: 0,
        };
        let mut payload = BytesMut::new();
        payload.put_u8(0xFF);
        payload.put_u32(1);
        let err = Frame::parse_payload(&header, payload.freeze()).unwrap_err();
        assert!(matches!(err, ConnectionError::Protocol(_)));
    }

    #[test]
    fn settings_ack_with_payload_is_frame_size_error() {
        let header = FrameHeader {
            length: 5,
            type_raw: FrameType::Settings as u8,
            flags: SettingsFlags::ACK.bits(),
            stream_id: 0,
        };
        let mut payload = BytesMut::new();
        payload.put_u8(SettingsParameter::EnablePush as u8);
        payload.put_u32(0);
        let err = Frame::parse_payload(&header, payload.freeze()).unwrap_err();
        assert!(matches!(err, ConnectionError::FrameSize(_)));
    }

    #[test]
    fn reset_stream_unknown_code_is_protocol_error() {
        let header = FrameHeader {
            length: 4,
            type_raw: FrameType::ResetStream as u8,
            flags: 0,
            stream_id: 1,
        };
        let mut payload = BytesMut::new();
        payload.put_u32(0xDEAD_BEEF);
        let err = Frame::parse_payload(&header, payload.freeze()).unwrap_err();
        assert!(matches!(err, ConnectionError::Protocol(_)));
    }

    #[test]
    fn window_update_roundtrip() {
        roundtrip(Frame::WindowUpdate {
            stream_id: 0,
            increment: 100,
        });
    }

    #[test]
    fn ping_roundtrip() {
        roundtrip(Frame::Ping {
            ack: true,
            data: *b"12345678",
        });
    }

    #[test]
    fn goaway_roundtrip() {
        roundtrip(Frame::GoAway {
            last_stream_id: 7,
            error: ErrorType::NoError,
            debug_data: Bytes::from_static(b"bye"),
        });
    }

    #[test]
    fn data_padding_exceeding_payload_is_protocol_error() {
        let header = FrameHeader {
            length: 2,
            type_raw: FrameType::Data as u8,
            flags: DataFlags::PAD_LOW.bits(),
            stream_id: 1,
        };
        let mut payload = BytesMut::new();
        payload.put_u8(10); // claims 10 bytes of padding
        payload.put_u8(b'x'); // only 1 byte follows
        let err = Frame::parse_payload(&header, payload.freeze()).unwrap_err();
        assert!(matches!(err, ConnectionError::Protocol(_)));
    }

    #[test]
    fn continuation_roundtrip() {
        roundtrip(Frame::Continuation {
            stream_id: 1,
            end_headers: true,
            padding: Padding::none(),
            fragment: Bytes::from_static(b"\x82"),
        });
    }

    #[test]
    fn push_promise_roundtrip() {
        roundtrip(Frame::PushPromise {
            stream_id: 1,
            promised_stream_id: 2,
            end_headers: true,
            padding: Padding::none(),
            fragment: Bytes::from_static(b"\x84"),
        });
    }

    #[test]
    fn priority_roundtrip() {
        roundtrip(Frame::Priority {
            stream_id: 5,
            priority: 12,
        });
    }
}
