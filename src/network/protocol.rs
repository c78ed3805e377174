use thiserror::Error;

// Frame kind bytes.
pub const KIND_STORE: u8 = 0x01;
pub const KIND_BROADCAST: u8 = 0x02;
pub const KIND_ACK: u8 = 0x03;

/// Frame kind byte plus the big-endian payload length.
pub const HEADER_LEN: usize = 5;

/// Payloads above this are rejected before they are read into memory.
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// One file in flight. Content is raw bytes end to end; nothing in the
/// protocol assumes it is text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMessage {
    pub file_name: String,
    pub file_type: String,
    pub content: Vec<u8>,
}

impl FileMessage {
    pub fn new(
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_type: file_type.into(),
            content: content.into(),
        }
    }
}

/// What a peer asks the relay to do with one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Store(FileMessage),
    Broadcast(FileMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Ok,
    Error,
}

/// Reply frame for a processed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub status: AckStatus,
    pub message: String,
}

impl Ack {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Ok,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Error,
            message: message.into(),
        }
    }
}

/// One self-delimited unit on the wire: exactly one request or one ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Request(Request),
    Ack(Ack),
}

impl Frame {
    /// Wire name of the frame's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::Request(Request::Store(_)) => "store",
            Frame::Request(Request::Broadcast(_)) => "broadcast",
            Frame::Ack(_) => "ack",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame truncated")]
    Truncated,

    #[error("Payload length {len} exceeds maximum {max}")]
    Oversized { len: usize, max: usize },

    #[error("Unknown frame kind {0:#04x}")]
    UnknownKind(u8),

    #[error("Unknown ack status {0:#04x}")]
    UnknownStatus(u8),

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("File name longer than {} bytes", u16::MAX)]
    NameTooLong,

    #[error("File type longer than {} bytes", u8::MAX)]
    TypeTooLong,

    #[error("Content does not fit a 4-byte length prefix")]
    ContentTooLarge,

    #[error("Ack message longer than {} bytes", u16::MAX)]
    MessageTooLong,
}

/// Serialize one frame:
/// `[1B kind][4B BE payload-len][payload]`, where a request payload is
/// `[2B name-len][name][1B type-len][type][4B content-len][content]`
/// and an ack payload is `[1B status][2B msg-len][msg]`.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    let (kind, payload) = match frame {
        Frame::Request(Request::Store(message)) => (KIND_STORE, encode_file_message(message)?),
        Frame::Request(Request::Broadcast(message)) => {
            (KIND_BROADCAST, encode_file_message(message)?)
        }
        Frame::Ack(ack) => (KIND_ACK, encode_ack(ack)?),
    };
    if payload.len() as u64 > u32::MAX as u64 {
        return Err(EncodeError::ContentTooLarge);
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(kind);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Parse one complete frame. Any strict prefix of a valid frame fails with
/// `Truncated`, never with a wrong successful decode.
pub fn decode(bytes: &[u8], max_payload_len: usize) -> Result<Frame, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::Truncated);
    }
    let kind = bytes[0];
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    if len > max_payload_len {
        return Err(DecodeError::Oversized {
            len,
            max: max_payload_len,
        });
    }
    let payload = &bytes[HEADER_LEN..];
    if payload.len() < len {
        return Err(DecodeError::Truncated);
    }
    if payload.len() > len {
        return Err(DecodeError::TrailingBytes(payload.len() - len));
    }

    let mut reader = Reader::new(payload);
    let frame = match kind {
        KIND_STORE => Frame::Request(Request::Store(decode_file_message(&mut reader)?)),
        KIND_BROADCAST => Frame::Request(Request::Broadcast(decode_file_message(&mut reader)?)),
        KIND_ACK => Frame::Ack(decode_ack(&mut reader)?),
        other => return Err(DecodeError::UnknownKind(other)),
    };
    reader.finish()?;
    Ok(frame)
}

/// Payload length carried in a frame header.
pub fn payload_len(header: &[u8; HEADER_LEN]) -> usize {
    u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize
}

fn encode_file_message(message: &FileMessage) -> Result<Vec<u8>, EncodeError> {
    let name = message.file_name.as_bytes();
    let file_type = message.file_type.as_bytes();
    if name.len() > u16::MAX as usize {
        return Err(EncodeError::NameTooLong);
    }
    if file_type.len() > u8::MAX as usize {
        return Err(EncodeError::TypeTooLong);
    }
    if message.content.len() as u64 > u32::MAX as u64 {
        return Err(EncodeError::ContentTooLarge);
    }

    let mut buf = Vec::with_capacity(7 + name.len() + file_type.len() + message.content.len());
    buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
    buf.extend_from_slice(name);
    buf.push(file_type.len() as u8);
    buf.extend_from_slice(file_type);
    buf.extend_from_slice(&(message.content.len() as u32).to_be_bytes());
    buf.extend_from_slice(&message.content);
    Ok(buf)
}

fn encode_ack(ack: &Ack) -> Result<Vec<u8>, EncodeError> {
    let message = ack.message.as_bytes();
    if message.len() > u16::MAX as usize {
        return Err(EncodeError::MessageTooLong);
    }

    let mut buf = Vec::with_capacity(3 + message.len());
    buf.push(match ack.status {
        AckStatus::Ok => 0,
        AckStatus::Error => 1,
    });
    buf.extend_from_slice(&(message.len() as u16).to_be_bytes());
    buf.extend_from_slice(message);
    Ok(buf)
}

fn decode_file_message(reader: &mut Reader) -> Result<FileMessage, DecodeError> {
    let name_len = reader.u16()? as usize;
    let file_name = string_field(reader.take(name_len)?, "file_name")?;
    let type_len = reader.u8()? as usize;
    let file_type = string_field(reader.take(type_len)?, "file_type")?;
    let content_len = reader.u32()? as usize;
    let content = reader.take(content_len)?.to_vec();
    Ok(FileMessage {
        file_name,
        file_type,
        content,
    })
}

fn decode_ack(reader: &mut Reader) -> Result<Ack, DecodeError> {
    let status = match reader.u8()? {
        0 => AckStatus::Ok,
        1 => AckStatus::Error,
        other => return Err(DecodeError::UnknownStatus(other)),
    };
    let message_len = reader.u16()? as usize;
    let message = string_field(reader.take(message_len)?, "message")?;
    Ok(Ack { status, message })
}

fn string_field(bytes: &[u8], field: &'static str) -> Result<String, DecodeError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| DecodeError::InvalidUtf8(field))
}

/// Cursor over a payload; every read is bounds-checked so a short field
/// surfaces as `Truncated` rather than a panic.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() - self.pos < n {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn finish(&self) -> Result<(), DecodeError> {
        match self.buf.len() - self.pos {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let bytes = encode(&frame).unwrap();
        assert_eq!(decode(&bytes, DEFAULT_MAX_PAYLOAD_LEN).unwrap(), frame);
    }

    #[test]
    fn test_store_roundtrip() {
        roundtrip(Frame::Request(Request::Store(FileMessage::new(
            "a.txt", "txt", &b"hello"[..],
        ))));
    }

    #[test]
    fn test_broadcast_roundtrip() {
        roundtrip(Frame::Request(Request::Broadcast(FileMessage::new(
            "b.png",
            "png",
            vec![0u8, 255, 1, 254, 2, 253, 3, 252, 4, 251, 5, 250, 6, 249, 7, 248, 8],
        ))));
    }

    #[test]
    fn test_empty_fields_roundtrip() {
        roundtrip(Frame::Request(Request::Store(FileMessage::new(
            "",
            "",
            Vec::new(),
        ))));
    }

    #[test]
    fn test_arbitrary_content_bytes_roundtrip() {
        // Content is not UTF-8 and must survive untouched.
        let content: Vec<u8> = (0..=255u8).collect();
        roundtrip(Frame::Request(Request::Broadcast(FileMessage::new(
            "blob", "bin", content,
        ))));
    }

    #[test]
    fn test_ack_roundtrip() {
        roundtrip(Frame::Ack(Ack::ok("delivered 2/2")));
        roundtrip(Frame::Ack(Ack::error("storage full")));
        roundtrip(Frame::Ack(Ack::ok("")));
    }

    #[test]
    fn test_every_strict_prefix_is_truncated() {
        let frame = Frame::Request(Request::Store(FileMessage::new(
            "a.txt", "txt", &b"hello"[..],
        )));
        let bytes = encode(&frame).unwrap();
        for end in 0..bytes.len() {
            assert_eq!(
                decode(&bytes[..end], DEFAULT_MAX_PAYLOAD_LEN),
                Err(DecodeError::Truncated),
                "prefix of {} bytes must be truncated",
                end
            );
        }
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let bytes = encode(&Frame::Ack(Ack::ok("stored"))).unwrap();
        let payload = bytes.len() - HEADER_LEN;
        match decode(&bytes, payload - 1) {
            Err(DecodeError::Oversized { len, max }) => {
                assert_eq!(len, payload);
                assert_eq!(max, payload - 1);
            }
            other => panic!("expected oversized error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut bytes = encode(&Frame::Ack(Ack::ok("stored"))).unwrap();
        bytes[0] = 0x7f;
        assert_eq!(
            decode(&bytes, DEFAULT_MAX_PAYLOAD_LEN),
            Err(DecodeError::UnknownKind(0x7f))
        );
    }

    #[test]
    fn test_unknown_ack_status_rejected() {
        let mut bytes = encode(&Frame::Ack(Ack::ok("stored"))).unwrap();
        bytes[HEADER_LEN] = 9;
        assert_eq!(
            decode(&bytes, DEFAULT_MAX_PAYLOAD_LEN),
            Err(DecodeError::UnknownStatus(9))
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&Frame::Ack(Ack::ok("stored"))).unwrap();
        bytes.push(0);
        assert_eq!(
            decode(&bytes, DEFAULT_MAX_PAYLOAD_LEN),
            Err(DecodeError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_invalid_utf8_name_rejected() {
        let frame = Frame::Request(Request::Store(FileMessage::new("ab", "txt", Vec::new())));
        let mut bytes = encode(&frame).unwrap();
        // Corrupt the first name byte; 0xff is never valid UTF-8.
        bytes[HEADER_LEN + 2] = 0xff;
        assert_eq!(
            decode(&bytes, DEFAULT_MAX_PAYLOAD_LEN),
            Err(DecodeError::InvalidUtf8("file_name"))
        );
    }

    #[test]
    fn test_inner_length_beyond_payload_is_truncated() {
        let frame = Frame::Request(Request::Store(FileMessage::new(
            "a.txt", "txt", &b"hello"[..],
        )));
        let mut bytes = encode(&frame).unwrap();
        // Claim more content than the payload carries.
        let content_len_at = bytes.len() - 5 - 4;
        bytes[content_len_at..content_len_at + 4].copy_from_slice(&100u32.to_be_bytes());
        assert_eq!(
            decode(&bytes, DEFAULT_MAX_PAYLOAD_LEN),
            Err(DecodeError::Truncated)
        );
    }

    #[test]
    fn test_encode_field_caps() {
        let long_name = "x".repeat(u16::MAX as usize + 1);
        let frame = Frame::Request(Request::Store(FileMessage::new(long_name, "", Vec::new())));
        assert_eq!(encode(&frame), Err(EncodeError::NameTooLong));

        let long_type = "y".repeat(u8::MAX as usize + 1);
        let frame = Frame::Request(Request::Store(FileMessage::new("a", long_type, Vec::new())));
        assert_eq!(encode(&frame), Err(EncodeError::TypeTooLong));

        let long_message = "z".repeat(u16::MAX as usize + 1);
        assert_eq!(
            encode(&Frame::Ack(Ack::ok(long_message))),
            Err(EncodeError::MessageTooLong)
        );
    }
}
