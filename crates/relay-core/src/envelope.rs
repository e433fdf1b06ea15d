//! Wire envelope shared by every tier.
//!
//! Frame layout (big-endian):
//!
//! ```text
//! kind: u8 | request_type: u16 | body_len: u32 | body
//! ```
//!
//! `kind` alone decides the next hop: requests are routed outbound through
//! dispatcher selection, responses are delivered inbound through a session
//! table.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::RelayError;

const HEADER_LEN: usize = 1 + 2 + 4;

/// Direction of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request,
    Response,
}

impl MessageKind {
    fn to_wire(self) -> u8 {
        match self {
            Self::Request => 1,
            Self::Response => 2,
        }
    }

    fn from_wire(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Request),
            2 => Some(Self::Response),
            _ => None,
        }
    }
}

/// Request type code carried in every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestType(pub u16);

impl RequestType {
    pub const AUTHENTICATE: RequestType = RequestType(1);
    pub const FETCH_MESSAGE: RequestType = RequestType(2);
    pub const SEND_MESSAGE: RequestType = RequestType(3);

    /// Human-readable name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::AUTHENTICATE => "authenticate",
            Self::FETCH_MESSAGE => "fetch_message",
            Self::SEND_MESSAGE => "send_message",
            _ => "unknown",
        }
    }

    pub fn code(self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

/// An immutable routed frame. Replies are new messages, never rewritten requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    request_type: RequestType,
    body: Bytes,
}

impl Message {
    pub fn request(request_type: RequestType, body: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Request,
            request_type,
            body: body.into(),
        }
    }

    pub fn response(request_type: RequestType, body: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Response,
            request_type,
            body: body.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Encode into a single wire frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        buf.put_u8(self.kind.to_wire());
        buf.put_u16(self.request_type.0);
        buf.put_u32(self.body.len() as u32);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Decode one complete wire frame. Trailing or missing bytes are errors.
    pub fn decode(frame: &[u8]) -> Result<Self, RelayError> {
        if frame.len() < HEADER_LEN {
            return Err(RelayError::Decode(format!(
                "frame too short: {} bytes",
                frame.len()
            )));
        }
        let mut buf = frame;
        let kind_byte = buf.get_u8();
        let kind = MessageKind::from_wire(kind_byte)
            .ok_or_else(|| RelayError::Decode(format!("unknown message kind {kind_byte}")))?;
        let request_type = RequestType(buf.get_u16());
        let body_len = buf.get_u32() as usize;
        if buf.remaining() != body_len {
            return Err(RelayError::Decode(format!(
                "body length mismatch: header says {body_len}, got {}",
                buf.remaining()
            )));
        }
        Ok(Self {
            kind,
            request_type,
            body: Bytes::copy_from_slice(buf),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_request() {
        let msg = Message::request(RequestType::FETCH_MESSAGE, &b"{\"uid\":\"a\"}"[..]);
        let frame = msg.encode();
        assert_eq!(frame[0], 1);
        let decoded = Message::decode(&frame).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.kind(), MessageKind::Request);
    }

    #[test]
    fn response_kind_on_wire() {
        let frame = Message::response(RequestType::AUTHENTICATE, Bytes::new()).encode();
        assert_eq!(frame.len(), HEADER_LEN);
        assert_eq!(frame[0], 2);
        assert_eq!(Message::decode(&frame).unwrap().kind(), MessageKind::Response);
    }

    #[test]
    fn short_frame_is_decode_error() {
        let err = Message::decode(&[1, 0]).unwrap_err();
        assert!(matches!(err, RelayError::Decode(_)));
    }

    #[test]
    fn unknown_kind_is_decode_error() {
        let mut frame = Message::request(RequestType(7), &b"x"[..]).encode().to_vec();
        frame[0] = 9;
        let err = Message::decode(&frame).unwrap_err();
        assert!(err.to_string().contains("unknown message kind 9"));
    }

    #[test]
    fn length_mismatch_is_decode_error() {
        let mut frame = Message::request(RequestType(7), &b"abc"[..]).encode().to_vec();
        frame.push(0);
        assert!(Message::decode(&frame).is_err());
        frame.truncate(frame.len() - 2);
        assert!(Message::decode(&frame).is_err());
    }

    #[test]
    fn request_type_names() {
        assert_eq!(RequestType::AUTHENTICATE.name(), "authenticate");
        assert_eq!(RequestType::FETCH_MESSAGE.name(), "fetch_message");
        assert_eq!(RequestType::SEND_MESSAGE.name(), "send_message");
        assert_eq!(RequestType(42).name(), "unknown");
        assert_eq!(RequestType::FETCH_MESSAGE.to_string(), "fetch_message(2)");
    }
}
