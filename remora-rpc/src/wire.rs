use std::any::Any;

use thiserror::Error;

use remora_core::buffer::ChainedBuffer;
use remora_core::stream::{InputStream, OutputStream};

use crate::message::Message;

/// First header field of every frame; a mismatch poisons the connection.
///
pub const MAGIC: u32 = 0x30F8_CA9B;

/// Wire protocol version.
///
pub const VERSION: u32 = 1;

// All fixed-width integers on the wire are little-endian.

#[derive(Debug, Error)]
pub enum WireError {
    #[error("stream ended inside a record")]
    Truncated,
    #[error("bad magic 0x{0:08x}")]
    BadMagic(u32),
    #[error("unsupported protocol version {0}")]
    VersionMismatch(u32),
    #[error("unknown message type {0}")]
    BadMessageType(u8),
    #[error("string field is not valid utf-8")]
    BadUtf8,
    #[error("string field of {0} bytes exceeds the wire limit")]
    StringTooLong(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
}

impl MessageType {
    fn to_wire(self) -> u8 {
        match self {
            MessageType::Request => 0,
            MessageType::Response => 1,
        }
    }

    fn from_wire(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Response),
            other => Err(WireError::BadMessageType(other)),
        }
    }
}

// The schema-described header record carried ahead of every payload: magic,
// version, message type, request id, and the target service and method
// names. Magic and version are carried as parsed so the receive loops can
// validate them.
//
#[derive(Debug, Clone)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub message_type: MessageType,
    pub request_id: u64,
    pub service: String,
    pub method: String,
}

impl Header {
    pub fn request(request_id: u64, service: String, method: String) -> Self {
        Header {
            magic: MAGIC,
            version: VERSION,
            message_type: MessageType::Request,
            request_id,
            service,
            method,
        }
    }

    /// Response headers carry no routing; correlation is by id only.
    ///
    pub fn response(request_id: u64) -> Self {
        Header {
            magic: MAGIC,
            version: VERSION,
            message_type: MessageType::Response,
            request_id,
            service: String::new(),
            method: String::new(),
        }
    }
}

impl Default for Header {
    fn default() -> Self {
        Header {
            magic: 0,
            version: 0,
            message_type: MessageType::Request,
            request_id: 0,
            service: String::new(),
            method: String::new(),
        }
    }
}

impl Message for Header {
    fn encoded_len(&self) -> usize {
        4 + 4 + 1 + 8 + string_len(&self.service) + string_len(&self.method)
    }

    fn serialize(&self, out: &mut dyn OutputStream) -> Result<(), WireError> {
        write_u32(out, self.magic)?;
        write_u32(out, self.version)?;
        write_u8(out, self.message_type.to_wire())?;
        write_u64(out, self.request_id)?;
        write_string(out, &self.service)?;
        write_string(out, &self.method)?;
        Ok(())
    }

    fn parse(&mut self, input: &mut dyn InputStream) -> Result<(), WireError> {
        self.magic = read_u32(input)?;
        self.version = read_u32(input)?;
        self.message_type = MessageType::from_wire(read_u8(input)?)?;
        self.request_id = read_u64(input)?;
        self.service = read_string(input)?;
        self.method = read_string(input)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Serializes one frame — `u32 header_len | header | u32 payload_len |
/// payload` — into a connection's write buffer.
///
pub fn write_frame(
    buf: &mut ChainedBuffer,
    header: &Header,
    body: &dyn Message,
) -> Result<(), WireError> {
    let out: &mut dyn OutputStream = buf;
    write_u32(out, header.encoded_len() as u32)?;
    header.serialize(out)?;
    write_u32(out, body.encoded_len() as u32)?;
    body.serialize(out)?;
    Ok(())
}

// Primitive writers. Each one copies through whatever spans the stream
// hands out and returns the unused tail of the last span with back_up.

pub fn write_bytes(out: &mut dyn OutputStream, bytes: &[u8]) -> Result<(), WireError> {
    let mut offset = 0;
    while offset < bytes.len() {
        let span = out.next().ok_or(WireError::Truncated)?;
        let take = span.len().min(bytes.len() - offset);
        span[..take].copy_from_slice(&bytes[offset..offset + take]);
        let unused = span.len() - take;
        offset += take;
        if unused > 0 {
            out.back_up(unused);
        }
    }
    Ok(())
}

pub fn write_u8(out: &mut dyn OutputStream, value: u8) -> Result<(), WireError> {
    write_bytes(out, &[value])
}

pub fn write_u16(out: &mut dyn OutputStream, value: u16) -> Result<(), WireError> {
    write_bytes(out, &value.to_le_bytes())
}

pub fn write_u32(out: &mut dyn OutputStream, value: u32) -> Result<(), WireError> {
    write_bytes(out, &value.to_le_bytes())
}

pub fn write_u64(out: &mut dyn OutputStream, value: u64) -> Result<(), WireError> {
    write_bytes(out, &value.to_le_bytes())
}

/// Length-prefixed string: `u16 len | bytes`.
///
pub fn write_string(out: &mut dyn OutputStream, value: &str) -> Result<(), WireError> {
    if value.len() > u16::MAX as usize {
        return Err(WireError::StringTooLong(value.len()));
    }
    write_u16(out, value.len() as u16)?;
    write_bytes(out, value.as_bytes())
}

/// Encoded size of a length-prefixed string.
///
pub fn string_len(value: &str) -> usize {
    2 + value.len()
}

// Primitive readers, mirror images of the writers.

pub fn read_bytes(input: &mut dyn InputStream, dst: &mut [u8]) -> Result<(), WireError> {
    let mut offset = 0;
    while offset < dst.len() {
        let span = input.next().ok_or(WireError::Truncated)?;
        let take = span.len().min(dst.len() - offset);
        dst[offset..offset + take].copy_from_slice(&span[..take]);
        let unused = span.len() - take;
        offset += take;
        if unused > 0 {
            input.back_up(unused);
        }
    }
    Ok(())
}

pub fn read_u8(input: &mut dyn InputStream) -> Result<u8, WireError> {
    let mut bytes = [0u8; 1];
    read_bytes(input, &mut bytes)?;
    Ok(bytes[0])
}

pub fn read_u16(input: &mut dyn InputStream) -> Result<u16, WireError> {
    let mut bytes = [0u8; 2];
    read_bytes(input, &mut bytes)?;
    Ok(u16::from_le_bytes(bytes))
}

pub fn read_u32(input: &mut dyn InputStream) -> Result<u32, WireError> {
    let mut bytes = [0u8; 4];
    read_bytes(input, &mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

pub fn read_u64(input: &mut dyn InputStream) -> Result<u64, WireError> {
    let mut bytes = [0u8; 8];
    read_bytes(input, &mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

pub fn read_string(input: &mut dyn InputStream) -> Result<String, WireError> {
    let len = read_u16(input)? as usize;
    let mut bytes = vec![0u8; len];
    read_bytes(input, &mut bytes)?;
    String::from_utf8(bytes).map_err(|_| WireError::BadUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use remora_core::buffer::BLOCK_SIZE;

    #[test]
    fn test_header_round_trip() {
        let header = Header::request(77, "EchoService".to_string(), "Echo".to_string());

        let mut buffer = ChainedBuffer::new();
        header.serialize(&mut buffer).unwrap();
        assert_eq!(buffer.size(), header.encoded_len());

        let mut parsed = Header::default();
        parsed.parse(&mut buffer).unwrap();
        assert_eq!(parsed.magic, MAGIC);
        assert_eq!(parsed.version, VERSION);
        assert_eq!(parsed.message_type, MessageType::Request);
        assert_eq!(parsed.request_id, 77);
        assert_eq!(parsed.service, "EchoService");
        assert_eq!(parsed.method, "Echo");
    }

    #[test]
    fn test_header_parses_across_block_boundary() {
        let header = Header::request(0xDEAD_BEEF_CAFE, "Svc".to_string(), "Method".to_string());

        // Push the header right up against a block seam.
        //
        let mut buffer = ChainedBuffer::new();
        let filler = vec![0u8; BLOCK_SIZE - 9];
        buffer.write(&filler);
        header.serialize(&mut buffer).unwrap();
        assert!(buffer.input_skip(filler.len()));

        let mut parsed = Header::default();
        parsed.parse(&mut buffer).unwrap();
        assert_eq!(parsed.request_id, 0xDEAD_BEEF_CAFE);
        assert_eq!(parsed.service, "Svc");
        assert_eq!(parsed.method, "Method");
    }

    #[test]
    fn test_truncated_header_fails() {
        let header = Header::response(5);
        let mut buffer = ChainedBuffer::new();
        header.serialize(&mut buffer).unwrap();

        // Chop the tail off by bounding the parse short.
        //
        buffer.push_limit(header.encoded_len() - 3);
        let mut parsed = Header::default();
        assert!(matches!(parsed.parse(&mut buffer), Err(WireError::Truncated)));
    }

    #[test]
    fn test_bad_message_type_is_rejected() {
        let mut buffer = ChainedBuffer::new();
        write_u32(&mut buffer, MAGIC).unwrap();
        write_u32(&mut buffer, VERSION).unwrap();
        write_u8(&mut buffer, 9).unwrap();
        write_u64(&mut buffer, 1).unwrap();
        write_string(&mut buffer, "s").unwrap();
        write_string(&mut buffer, "m").unwrap();

        let mut parsed = Header::default();
        assert!(matches!(
            parsed.parse(&mut buffer),
            Err(WireError::BadMessageType(9))
        ));
    }

    #[test]
    fn test_primitives_round_trip() {
        let mut buffer = ChainedBuffer::new();
        write_u8(&mut buffer, 0xAB).unwrap();
        write_u16(&mut buffer, 0xBEEF).unwrap();
        write_u32(&mut buffer, 0xDEAD_BEEF).unwrap();
        write_u64(&mut buffer, u64::MAX - 1).unwrap();
        write_string(&mut buffer, "remora").unwrap();

        assert_eq!(read_u8(&mut buffer).unwrap(), 0xAB);
        assert_eq!(read_u16(&mut buffer).unwrap(), 0xBEEF);
        assert_eq!(read_u32(&mut buffer).unwrap(), 0xDEAD_BEEF);
        assert_eq!(read_u64(&mut buffer).unwrap(), u64::MAX - 1);
        assert_eq!(read_string(&mut buffer).unwrap(), "remora");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_lengths_are_little_endian() {
        let mut buffer = ChainedBuffer::new();
        write_u32(&mut buffer, 0x0102_0304).unwrap();

        let mut bytes = [0u8; 4];
        buffer.read(&mut bytes);
        assert_eq!(bytes, [0x04, 0x03, 0x02, 0x01]);
    }
}
