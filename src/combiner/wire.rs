use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::Error;

/// Size of the tag byte plus the length word that precede every payload.
pub const FRAME_HEADER_LEN: usize = 1 + 4;

/// Frames larger than this are rejected by [`decode_frame`] rather than
/// buffered.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// The backend message kinds a combiner has to reason about. Every tag a data
/// node can send maps onto exactly one variant; tags the combiner has no
/// policy for land in `Other` so that the dispatch stays exhaustive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// End of a COPY TO stream (`c`, CopyDone)
    CopyOutComplete,
    /// Statement finished, carries the command tag (`C`)
    CommandComplete,
    /// Result set schema (`T`)
    RowDescription,
    /// Run-time parameter report, sent after a `SET` (`S`)
    ParameterStatus,
    /// Node is ready to receive COPY FROM data (`G`)
    CopyInResponse,
    /// Node is about to stream COPY TO data (`H`)
    CopyOutResponse,
    /// One chunk of COPY data (`d`)
    CopyOutDataRow,
    /// One result row (`D`)
    DataRow,
    /// Statement failed on the node (`E`)
    ErrorResponse,
    /// Asynchronous LISTEN/NOTIFY delivery (`A`)
    Notification,
    /// Non-fatal notice (`N`)
    Notice,
    /// Empty query string (`I`). Never valid while combining.
    EmptyQuery,
    /// Any tag outside the set above.
    Other(u8),
}

impl MessageKind {
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            b'c' => MessageKind::CopyOutComplete,
            b'C' => MessageKind::CommandComplete,
            b'T' => MessageKind::RowDescription,
            b'S' => MessageKind::ParameterStatus,
            b'G' => MessageKind::CopyInResponse,
            b'H' => MessageKind::CopyOutResponse,
            b'd' => MessageKind::CopyOutDataRow,
            b'D' => MessageKind::DataRow,
            b'E' => MessageKind::ErrorResponse,
            b'A' => MessageKind::Notification,
            b'N' => MessageKind::Notice,
            b'I' => MessageKind::EmptyQuery,
            other => MessageKind::Other(other),
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            MessageKind::CopyOutComplete => b'c',
            MessageKind::CommandComplete => b'C',
            MessageKind::RowDescription => b'T',
            MessageKind::ParameterStatus => b'S',
            MessageKind::CopyInResponse => b'G',
            MessageKind::CopyOutResponse => b'H',
            MessageKind::CopyOutDataRow => b'd',
            MessageKind::DataRow => b'D',
            MessageKind::ErrorResponse => b'E',
            MessageKind::Notification => b'A',
            MessageKind::Notice => b'N',
            MessageKind::EmptyQuery => b'I',
            MessageKind::Other(tag) => *tag,
        }
    }
}

impl From<u8> for MessageKind {
    fn from(tag: u8) -> Self {
        Self::from_tag(tag)
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind.tag()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Other(tag) if !tag.is_ascii_graphic() => {
                write!(f, "Other(0x{:02X})", tag)
            }
            MessageKind::Other(tag) => write!(f, "Other('{}')", *tag as char),
            kind => write!(f, "{:?}", kind),
        }
    }
}

/// A single message read from a data node, with the tag already classified
/// and the length word stripped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendMessage {
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl BackendMessage {
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Builds a CommandComplete carrying `tag`, NUL terminated.
    pub fn command_complete(tag: &str) -> Self {
        let mut payload = BytesMut::with_capacity(tag.len() + 1);
        payload.put_slice(tag.as_bytes());
        payload.put_u8(b'\0');
        Self::new(MessageKind::CommandComplete, payload.freeze())
    }

    /// Builds a single column text DataRow. `None` encodes SQL NULL.
    pub fn text_row(value: Option<&str>) -> Self {
        let mut payload = BytesMut::new();
        payload.put_i16(1);
        put_field(&mut payload, value.map(str::as_bytes));
        Self::new(MessageKind::DataRow, payload.freeze())
    }

    /// Encodes the message as a complete frame.
    pub fn encode(&self, dst: &mut BytesMut) {
        encode_frame(self.kind, &self.payload, dst);
    }
}

/// Writes `tag | len | payload` to `dst`. The length counts itself but not the
/// tag.
pub fn encode_frame(kind: MessageKind, payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(FRAME_HEADER_LEN + payload.len());
    dst.put_u8(kind.tag());
    let mut len = [0u8; 4];
    BigEndian::write_u32(&mut len, (payload.len() + 4) as u32);
    dst.put_slice(&len);
    dst.put_slice(payload);
}

/// Appends one DataRow field: its `i32` length (-1 for NULL) then the bytes.
pub fn put_field(dst: &mut BytesMut, value: Option<&[u8]>) {
    match value {
        Some(value) => {
            dst.put_i32(value.len() as i32);
            dst.put_slice(value);
        }
        None => dst.put_i32(-1),
    }
}

/// Splits the next complete frame off `src`.
///
/// Returns `Ok(None)` until the whole frame has arrived; `src` is left
/// untouched in that case so the caller can keep appending to it.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<BackendMessage>, Error> {
    if src.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let len = BigEndian::read_i32(&src[1..FRAME_HEADER_LEN]);
    if len < 4 {
        return Err(Error::InvalidFrameLength(len));
    }
    let payload_len = len as usize - 4;
    if payload_len > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(payload_len));
    }
    if src.len() < FRAME_HEADER_LEN + payload_len {
        src.reserve(FRAME_HEADER_LEN + payload_len - src.len());
        return Ok(None);
    }
    let kind = MessageKind::from_tag(src[0]);
    src.advance(FRAME_HEADER_LEN);
    let payload = src.split_to(payload_len).freeze();
    Ok(Some(BackendMessage { kind, payload }))
}
