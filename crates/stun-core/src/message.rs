//! Minimal STUN message representation (RFC 5389 header layout).
//!
//! The transaction agent only needs three things from a message: its
//! transaction id, its raw bytes, and structural equality. This module
//! provides exactly that plus the handful of attributes a binding exchange
//! carries. Integrity and fingerprint validation are left to a full codec.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;

use crate::constants::{STUN_HEADER_SIZE, STUN_MAGIC_COOKIE, TRANSACTION_ID_SIZE};
use crate::error::{Error, Result};

/// Opaque 16-byte transaction identifier, carried in bytes 4..20 of the
/// encoded header.
///
/// Ids produced by [`TransactionId::new`] start with the RFC 5389 magic
/// cookie followed by 12 random bytes. Ids built with
/// [`TransactionId::from_bytes`] may hold any value and still round-trip.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct TransactionId([u8; TRANSACTION_ID_SIZE]);

impl TransactionId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        let mut bytes = [0u8; TRANSACTION_ID_SIZE];
        BigEndian::write_u32(&mut bytes[..4], STUN_MAGIC_COOKIE);
        rand::thread_rng().fill(&mut bytes[4..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; TRANSACTION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TRANSACTION_ID_SIZE] {
        &self.0
    }

    /// Key used to XOR addresses: magic cookie followed by the 12 random bytes.
    fn xor_key(&self) -> [u8; TRANSACTION_ID_SIZE] {
        let mut key = self.0;
        BigEndian::write_u32(&mut key[..4], STUN_MAGIC_COOKIE);
        key
    }
}

impl From<[u8; TRANSACTION_ID_SIZE]> for TransactionId {
    fn from(bytes: [u8; TRANSACTION_ID_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self)
    }
}

/// STUN message class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    Request,
    Indication,
    SuccessResponse,
    ErrorResponse,
}

impl MessageClass {
    fn to_bits(self) -> u16 {
        match self {
            Self::Request => 0b00,
            Self::Indication => 0b01,
            Self::SuccessResponse => 0b10,
            Self::ErrorResponse => 0b11,
        }
    }

    fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => Self::Request,
            0b01 => Self::Indication,
            0b10 => Self::SuccessResponse,
            _ => Self::ErrorResponse,
        }
    }
}

/// Binding method (RFC 5389 section 18.1)
pub const METHOD_BINDING: u16 = 0x001;

/// STUN message type: a 12-bit method plus a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType {
    pub method: u16,
    pub class: MessageClass,
}

impl MessageType {
    pub const BINDING_REQUEST: Self = Self::new(METHOD_BINDING, MessageClass::Request);
    pub const BINDING_SUCCESS: Self = Self::new(METHOD_BINDING, MessageClass::SuccessResponse);
    pub const BINDING_ERROR: Self = Self::new(METHOD_BINDING, MessageClass::ErrorResponse);

    pub const fn new(method: u16, class: MessageClass) -> Self {
        Self { method, class }
    }

    /// Interleave method and class bits as laid out in RFC 5389 section 6.
    pub fn to_u16(self) -> u16 {
        let method = self.method & 0x0FFF;
        let class = self.class.to_bits();
        (method & 0x000F)
            | ((method & 0x0070) << 1)
            | ((method & 0x0F80) << 2)
            | ((class & 0x01) << 4)
            | ((class & 0x02) << 7)
    }

    pub fn from_u16(value: u16) -> Self {
        let method = (value & 0x000F) | ((value >> 1) & 0x0070) | ((value >> 2) & 0x0F80);
        let class = ((value >> 4) & 0x01) | ((value >> 7) & 0x02);
        Self {
            method,
            class: MessageClass::from_bits(class),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = match self.method {
            METHOD_BINDING => "binding".to_string(),
            other => format!("0x{:03x}", other),
        };
        let class = match self.class {
            MessageClass::Request => "request",
            MessageClass::Indication => "indication",
            MessageClass::SuccessResponse => "success response",
            MessageClass::ErrorResponse => "error response",
        };
        write!(f, "{} {}", method, class)
    }
}

/// STUN attribute types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    MappedAddress,
    Username,
    MessageIntegrity,
    ErrorCode,
    UnknownAttributes,
    Realm,
    Nonce,
    XorMappedAddress,
    Software,
    Fingerprint,
    Other(u16),
}

impl From<u16> for AttributeType {
    fn from(value: u16) -> Self {
        match value {
            0x0001 => Self::MappedAddress,
            0x0006 => Self::Username,
            0x0008 => Self::MessageIntegrity,
            0x0009 => Self::ErrorCode,
            0x000A => Self::UnknownAttributes,
            0x0014 => Self::Realm,
            0x0015 => Self::Nonce,
            0x0020 => Self::XorMappedAddress,
            0x8022 => Self::Software,
            0x8028 => Self::Fingerprint,
            _ => Self::Other(value),
        }
    }
}

impl From<AttributeType> for u16 {
    fn from(attr_type: AttributeType) -> Self {
        match attr_type {
            AttributeType::MappedAddress => 0x0001,
            AttributeType::Username => 0x0006,
            AttributeType::MessageIntegrity => 0x0008,
            AttributeType::ErrorCode => 0x0009,
            AttributeType::UnknownAttributes => 0x000A,
            AttributeType::Realm => 0x0014,
            AttributeType::Nonce => 0x0015,
            AttributeType::XorMappedAddress => 0x0020,
            AttributeType::Software => 0x8022,
            AttributeType::Fingerprint => 0x8028,
            AttributeType::Other(value) => value,
        }
    }
}

/// STUN attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: AttributeType,
    pub value: Bytes,
}

impl Attribute {
    pub fn new(attr_type: AttributeType, value: Bytes) -> Self {
        Self { attr_type, value }
    }

    /// SOFTWARE attribute
    pub fn software(software: &str) -> Self {
        Self::new(AttributeType::Software, Bytes::copy_from_slice(software.as_bytes()))
    }

    /// XOR-MAPPED-ADDRESS attribute for the given transaction
    pub fn xor_mapped_address(addr: SocketAddr, transaction_id: &TransactionId) -> Self {
        let key = transaction_id.xor_key();
        let mut value = BytesMut::with_capacity(20);

        value.put_u8(0);
        match addr.ip() {
            IpAddr::V4(ipv4) => {
                value.put_u8(1);
                value.put_u16(addr.port() ^ (STUN_MAGIC_COOKIE >> 16) as u16);
                value.put_u32(u32::from_be_bytes(ipv4.octets()) ^ STUN_MAGIC_COOKIE);
            }
            IpAddr::V6(ipv6) => {
                value.put_u8(2);
                value.put_u16(addr.port() ^ (STUN_MAGIC_COOKIE >> 16) as u16);
                let octets = ipv6.octets();
                for i in 0..16 {
                    value.put_u8(octets[i] ^ key[i]);
                }
            }
        }

        Self::new(AttributeType::XorMappedAddress, value.freeze())
    }

    /// Read the socket address out of a XOR-MAPPED-ADDRESS attribute
    pub fn get_xor_mapped_address(&self, transaction_id: &TransactionId) -> Result<SocketAddr> {
        if self.attr_type != AttributeType::XorMappedAddress {
            return Err(Error::Decode("not a XOR-MAPPED-ADDRESS attribute".to_string()));
        }
        if self.value.len() < 8 {
            return Err(Error::Decode("XOR-MAPPED-ADDRESS too short".to_string()));
        }

        let mut value = self.value.clone();
        value.advance(1);
        let family = value.get_u8();
        let port = value.get_u16() ^ (STUN_MAGIC_COOKIE >> 16) as u16;

        let ip = match family {
            1 => IpAddr::from((value.get_u32() ^ STUN_MAGIC_COOKIE).to_be_bytes()),
            2 => {
                if value.remaining() < 16 {
                    return Err(Error::Decode("XOR-MAPPED-ADDRESS too short for IPv6".to_string()));
                }
                let key = transaction_id.xor_key();
                let mut octets = [0u8; 16];
                value.copy_to_slice(&mut octets);
                for i in 0..16 {
                    octets[i] ^= key[i];
                }
                IpAddr::from(octets)
            }
            _ => return Err(Error::Decode(format!("unsupported address family: {}", family))),
        };

        Ok(SocketAddr::new(ip, port))
    }
}

/// STUN message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    pub transaction_id: TransactionId,
    pub attributes: Vec<Attribute>,
}

impl Message {
    pub fn new(msg_type: MessageType, transaction_id: TransactionId) -> Self {
        Self {
            msg_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Binding request with a fresh transaction id
    pub fn binding_request() -> Self {
        Self::new(MessageType::BINDING_REQUEST, TransactionId::new())
    }

    /// Binding success response answering `transaction_id`
    pub fn binding_success(transaction_id: TransactionId) -> Self {
        Self::new(MessageType::BINDING_SUCCESS, transaction_id)
    }

    pub fn add_attribute(&mut self, attr: Attribute) -> &mut Self {
        self.attributes.push(attr);
        self
    }

    pub fn with_attribute(mut self, attr: Attribute) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn get_attribute(&self, attr_type: AttributeType) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.attr_type == attr_type)
    }

    /// Raw wire representation.
    ///
    /// Fails when an attribute value or the attribute section does not fit
    /// the 16-bit length fields.
    pub fn encode(&self) -> Result<Bytes> {
        if let Some(attr) = self.attributes.iter().find(|a| a.value.len() > MAX_LENGTH) {
            return Err(Error::Encode(format!(
                "{:?} value is {} bytes, limit is {}",
                attr.attr_type,
                attr.value.len(),
                MAX_LENGTH
            )));
        }
        let attr_size: usize = self
            .attributes
            .iter()
            .map(|attr| 4 + padded_len(attr.value.len()))
            .sum();
        if attr_size > MAX_LENGTH {
            return Err(Error::Encode(format!(
                "attributes take {} bytes, limit is {}",
                attr_size, MAX_LENGTH
            )));
        }

        let mut buf = BytesMut::with_capacity(STUN_HEADER_SIZE + attr_size);
        buf.put_u16(self.msg_type.to_u16());
        buf.put_u16(0);
        buf.put_slice(self.transaction_id.as_bytes());

        for attr in &self.attributes {
            buf.put_u16(attr.attr_type.into());
            buf.put_u16(attr.value.len() as u16);
            buf.put_slice(&attr.value);
            buf.put_bytes(0, padded_len(attr.value.len()) - attr.value.len());
        }

        BigEndian::write_u16(&mut buf[2..4], attr_size as u16);

        Ok(buf.freeze())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < STUN_HEADER_SIZE {
            return Err(Error::Decode("packet too small for STUN header".to_string()));
        }
        if bytes[0] & 0xC0 != 0 {
            return Err(Error::Decode("first two bits must be zero".to_string()));
        }

        let msg_type = MessageType::from_u16(BigEndian::read_u16(&bytes[0..2]));
        let msg_length = BigEndian::read_u16(&bytes[2..4]) as usize;

        if msg_length % 4 != 0 {
            return Err(Error::Decode(format!("length {} is not 4-byte aligned", msg_length)));
        }
        if bytes.len() < STUN_HEADER_SIZE + msg_length {
            return Err(Error::Decode("packet too small for STUN attributes".to_string()));
        }

        let mut id = [0u8; TRANSACTION_ID_SIZE];
        id.copy_from_slice(&bytes[4..STUN_HEADER_SIZE]);

        let end = STUN_HEADER_SIZE + msg_length;
        let mut attributes = Vec::new();
        let mut offset = STUN_HEADER_SIZE;

        while offset < end {
            if offset + 4 > end {
                return Err(Error::Decode("incomplete attribute header".to_string()));
            }
            let attr_type = BigEndian::read_u16(&bytes[offset..offset + 2]);
            let attr_len = BigEndian::read_u16(&bytes[offset + 2..offset + 4]) as usize;
            offset += 4;

            if offset + attr_len > end {
                return Err(Error::Decode("incomplete attribute value".to_string()));
            }
            attributes.push(Attribute {
                attr_type: attr_type.into(),
                value: Bytes::copy_from_slice(&bytes[offset..offset + attr_len]),
            });
            offset += padded_len(attr_len);
        }

        Ok(Self {
            msg_type,
            transaction_id: TransactionId(id),
            attributes,
        })
    }
}

/// Largest value a 16-bit length field can carry
const MAX_LENGTH: usize = u16::MAX as usize;

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

/// Cheap framing check used to route inbound datagrams to the agent.
///
/// Bytes 4..20 are an opaque transaction id, so the magic cookie is not
/// required; the zero top bits and a 4-byte aligned length that fits the
/// datagram are.
pub fn is_message(bytes: &[u8]) -> bool {
    if bytes.len() < STUN_HEADER_SIZE || bytes[0] & 0xC0 != 0 {
        return false;
    }
    let msg_length = BigEndian::read_u16(&bytes[2..4]) as usize;
    msg_length % 4 == 0 && bytes.len() >= STUN_HEADER_SIZE + msg_length
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_bits() {
        assert_eq!(MessageType::BINDING_REQUEST.to_u16(), 0x0001);
        assert_eq!(MessageType::BINDING_SUCCESS.to_u16(), 0x0101);
        assert_eq!(MessageType::BINDING_ERROR.to_u16(), 0x0111);
        assert_eq!(MessageType::from_u16(0x0101), MessageType::BINDING_SUCCESS);

        // Allocate (0x003) indication from RFC 5766 uses 0x0013
        let allocate_indication = MessageType::new(0x003, MessageClass::Indication);
        assert_eq!(allocate_indication.to_u16(), 0x0013);

        let high = MessageType::new(0x0ABC, MessageClass::ErrorResponse);
        assert_eq!(MessageType::from_u16(high.to_u16()), high);
    }

    #[test]
    fn transaction_id_carries_cookie() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
        assert_eq!(BigEndian::read_u32(&a.as_bytes()[..4]), STUN_MAGIC_COOKIE);
        assert_eq!(a.to_string().len(), TRANSACTION_ID_SIZE * 2);
    }

    #[test]
    fn encoded_response_keeps_request_id() {
        let request = Message::binding_request();
        let response = Message::binding_success(request.transaction_id)
            .with_attribute(Attribute::software("rvoip"));

        let raw = response.encode().unwrap();
        assert!(is_message(&raw));
        assert_eq!(raw.len() % 4, 0);

        let decoded = Message::decode(&raw).expect("decode response");
        assert_eq!(decoded, response);
        assert_eq!(decoded.transaction_id, request.transaction_id);
        assert_eq!(
            decoded.get_attribute(AttributeType::Software).map(|a| a.value.clone()),
            Some(Bytes::from_static(b"rvoip"))
        );
    }

    #[test]
    fn xor_mapped_address_v4_and_v6() {
        let id = TransactionId::new();
        for addr in ["192.0.2.1:32853", "[2001:db8::1]:3478"] {
            let addr: SocketAddr = addr.parse().unwrap();
            let attr = Attribute::xor_mapped_address(addr, &id);
            assert_eq!(attr.get_xor_mapped_address(&id).unwrap(), addr);
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(!is_message(b"INVITE sip:bob@example.com SIP/2.0\r\n"));
        assert!(!is_message(&[0u8; 8]));
        assert!(matches!(Message::decode(&[0u8; 4]), Err(Error::Decode(_))));

        let raw = Message::binding_request()
            .with_attribute(Attribute::software("x"))
            .encode()
            .unwrap()
            .to_vec();

        let mut marked = raw.clone();
        marked[0] |= 0x80;
        assert!(!is_message(&marked));
        assert!(matches!(Message::decode(&marked), Err(Error::Decode(_))));

        let mut misaligned = raw.clone();
        misaligned[3] = 6;
        assert!(!is_message(&misaligned));
        assert!(matches!(Message::decode(&misaligned), Err(Error::Decode(_))));

        let mut overlong = raw;
        overlong[3] = 64;
        assert!(!is_message(&overlong));
        assert!(matches!(Message::decode(&overlong), Err(Error::Decode(_))));
    }

    #[test]
    fn opaque_transaction_id_round_trips() {
        for bytes in [[0u8; TRANSACTION_ID_SIZE], [7u8; TRANSACTION_ID_SIZE]] {
            let id = TransactionId::from_bytes(bytes);
            let msg = Message::binding_success(id).with_attribute(Attribute::software("opaque"));

            let raw = msg.encode().unwrap();
            assert!(is_message(&raw));
            let decoded = Message::decode(&raw).expect("decode opaque id");
            assert_eq!(decoded.transaction_id, id);
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn oversized_attribute_rejected() {
        let big = Attribute::new(AttributeType::Other(0x8050), Bytes::from(vec![0u8; 70_000]));
        let msg = Message::binding_request().with_attribute(big);
        assert!(matches!(msg.encode(), Err(Error::Encode(_))));

        // Each value fits on its own, the sum does not
        let half = Bytes::from(vec![0u8; 40_000]);
        let msg = Message::binding_request()
            .with_attribute(Attribute::new(AttributeType::Other(0x8050), half.clone()))
            .with_attribute(Attribute::new(AttributeType::Other(0x8051), half));
        assert!(matches!(msg.encode(), Err(Error::Encode(_))));

        let fits = Attribute::new(AttributeType::Other(0x8050), Bytes::from(vec![1u8; 65_000]));
        let raw = Message::binding_request().with_attribute(fits).encode().unwrap();
        assert_eq!(Message::decode(&raw).unwrap().attributes[0].value.len(), 65_000);
    }

    #[test]
    fn rejects_truncated_attribute() {
        let msg = Message::binding_request().with_attribute(Attribute::software("truncated"));
        let raw = msg.encode().unwrap();
        assert!(Message::decode(&raw[..raw.len() - 4]).is_err());
    }
}
