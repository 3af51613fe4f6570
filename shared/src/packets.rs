//! Versioned binary packets exchanged between peers.
//!
//! Every packet starts with a fixed header, the protocol version followed by
//! the message type, then the type-specific body. Bodies are bincode
//! (fixed-width little-endian integers, length-prefixed strings and lists).
//! Decoding fails closed: a packet either decodes completely into the
//! expected message or yields a `CodecError`.

use crate::types::{AuthStatus, ConnectionStatus, NetworkUser, Quat, Vec3};
use crate::uid::Uid;
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Version stamped into every packet header.
pub const PROTOCOL_VERSION: u32 = 3;

/// Upper bound on an encoded packet, also used as the decode allocation limit.
pub const MAX_PACKET_SIZE: u64 = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Authenticate = 1,
    AuthenticationStatus = 2,
    ConnectionRequest = 3,
    ConnectionStatus = 4,
    ConnectionRoster = 5,
    ConnectionKicked = 6,
    ObjectCreate = 7,
    ObjectDestroy = 8,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Authenticate),
            2 => Some(MessageType::AuthenticationStatus),
            3 => Some(MessageType::ConnectionRequest),
            4 => Some(MessageType::ConnectionStatus),
            5 => Some(MessageType::ConnectionRoster),
            6 => Some(MessageType::ConnectionKicked),
            7 => Some(MessageType::ObjectCreate),
            8 => Some(MessageType::ObjectDestroy),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("unexpected message type: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        expected: MessageType,
        found: MessageType,
    },
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("malformed packet: {0}")]
    Malformed(#[from] bincode::Error),
    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    version: u32,
    message_type: u8,
}

/// Credentials sent to an authentication server. The password is already
/// encrypted by the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authenticate {
    pub request: Uid,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationStatusMsg {
    pub request: Uid,
    pub status: AuthStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub request: Uid,
    pub user: NetworkUser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatusMsg {
    pub request: Uid,
    pub status: ConnectionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRoster {
    pub users: Vec<NetworkUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionKicked {
    pub username: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectCreate {
    pub guid: String,
    pub prefab_id: u32,
    pub position: Vec3,
    pub rotation: Quat,
    pub owner: NetworkUser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDestroy {
    pub guid: String,
    pub owner: NetworkUser,
}

/// A decoded message of any supported kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Authenticate(Authenticate),
    AuthenticationStatus(AuthenticationStatusMsg),
    ConnectionRequest(ConnectionRequest),
    ConnectionStatus(ConnectionStatusMsg),
    ConnectionRoster(ConnectionRoster),
    ConnectionKicked(ConnectionKicked),
    ObjectCreate(ObjectCreate),
    ObjectDestroy(ObjectDestroy),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Authenticate(_) => MessageType::Authenticate,
            Message::AuthenticationStatus(_) => MessageType::AuthenticationStatus,
            Message::ConnectionRequest(_) => MessageType::ConnectionRequest,
            Message::ConnectionStatus(_) => MessageType::ConnectionStatus,
            Message::ConnectionRoster(_) => MessageType::ConnectionRoster,
            Message::ConnectionKicked(_) => MessageType::ConnectionKicked,
            Message::ObjectCreate(_) => MessageType::ObjectCreate,
            Message::ObjectDestroy(_) => MessageType::ObjectDestroy,
        }
    }
}

/// An immutable encoded packet.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Box<[u8]>,
}

impl Packet {
    pub fn from_bytes(bytes: impl Into<Box<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reads only the header, validating the version and type tag.
    pub fn message_type(&self) -> Result<MessageType, CodecError> {
        let mut reader: &[u8] = &self.bytes;
        read_header(&mut reader)
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message_type() {
            Ok(message_type) => write!(f, "Packet({:?}, {} bytes)", message_type, self.len()),
            Err(_) => write!(f, "Packet(<invalid>, {} bytes)", self.len()),
        }
    }
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_PACKET_SIZE)
}

fn read_header(reader: &mut &[u8]) -> Result<MessageType, CodecError> {
    let header: Header = wire_options().deserialize_from(&mut *reader)?;
    if header.version != PROTOCOL_VERSION {
        return Err(CodecError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            found: header.version,
        });
    }
    MessageType::from_u8(header.message_type).ok_or(CodecError::UnknownType(header.message_type))
}

fn write_body<T: Serialize>(bytes: &mut Vec<u8>, body: &T) -> Result<(), CodecError> {
    wire_options().serialize_into(bytes, body)?;
    Ok(())
}

/// Encodes `message` behind a header stamped with `PROTOCOL_VERSION`.
pub fn encode(message: &Message) -> Result<Packet, CodecError> {
    encode_with_version(message, PROTOCOL_VERSION)
}

/// Encodes `message` with an explicit header version.
pub fn encode_with_version(message: &Message, version: u32) -> Result<Packet, CodecError> {
    let header = Header {
        version,
        message_type: message.message_type() as u8,
    };

    let mut bytes = Vec::with_capacity(64);
    write_body(&mut bytes, &header)?;
    match message {
        Message::Authenticate(body) => write_body(&mut bytes, body)?,
        Message::AuthenticationStatus(body) => write_body(&mut bytes, body)?,
        Message::ConnectionRequest(body) => write_body(&mut bytes, body)?,
        Message::ConnectionStatus(body) => write_body(&mut bytes, body)?,
        Message::ConnectionRoster(body) => write_body(&mut bytes, body)?,
        Message::ConnectionKicked(body) => write_body(&mut bytes, body)?,
        Message::ObjectCreate(body) => write_body(&mut bytes, body)?,
        Message::ObjectDestroy(body) => write_body(&mut bytes, body)?,
    }

    Ok(Packet::from_bytes(bytes))
}

/// Decodes `packet`, requiring its header to carry `expected`.
pub fn decode(packet: &Packet, expected: MessageType) -> Result<Message, CodecError> {
    let mut reader: &[u8] = packet.as_bytes();
    let found = read_header(&mut reader)?;
    if found != expected {
        return Err(CodecError::TypeMismatch { expected, found });
    }

    let options = wire_options();
    let message = match expected {
        MessageType::Authenticate => Message::Authenticate(options.deserialize_from(&mut reader)?),
        MessageType::AuthenticationStatus => {
            Message::AuthenticationStatus(options.deserialize_from(&mut reader)?)
        }
        MessageType::ConnectionRequest => {
            Message::ConnectionRequest(options.deserialize_from(&mut reader)?)
        }
        MessageType::ConnectionStatus => {
            Message::ConnectionStatus(options.deserialize_from(&mut reader)?)
        }
        MessageType::ConnectionRoster => {
            Message::ConnectionRoster(options.deserialize_from(&mut reader)?)
        }
        MessageType::ConnectionKicked => {
            Message::ConnectionKicked(options.deserialize_from(&mut reader)?)
        }
        MessageType::ObjectCreate => Message::ObjectCreate(options.deserialize_from(&mut reader)?),
        MessageType::ObjectDestroy => {
            Message::ObjectDestroy(options.deserialize_from(&mut reader)?)
        }
    };

    if !reader.is_empty() {
        return Err(CodecError::TrailingBytes(reader.len()));
    }
    Ok(message)
}

/// Decodes `packet` as whatever type its header declares.
pub fn decode_any(packet: &Packet) -> Result<Message, CodecError> {
    let message_type = packet.message_type()?;
    decode(packet, message_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn sample_messages() -> Vec<Message> {
        let alice = NetworkUser::new("alice", "4f1c");
        vec![
            Message::Authenticate(Authenticate {
                request: Uid(7),
                username: "alice".to_string(),
                password: "digest".to_string(),
            }),
            Message::Authenticate(Authenticate {
                request: Uid(1),
                username: String::new(),
                password: String::new(),
            }),
            Message::AuthenticationStatus(AuthenticationStatusMsg {
                request: Uid(7),
                status: AuthStatus::InvalidPassword,
            }),
            Message::ConnectionRequest(ConnectionRequest {
                request: Uid(3),
                user: alice.clone(),
            }),
            Message::ConnectionStatus(ConnectionStatusMsg {
                request: Uid(3),
                status: ConnectionStatus::Full,
            }),
            Message::ConnectionRoster(ConnectionRoster {
                users: vec![alice.clone(), NetworkUser::new("bob", "")],
            }),
            Message::ConnectionRoster(ConnectionRoster { users: Vec::new() }),
            Message::ConnectionKicked(ConnectionKicked {
                username: "bob".to_string(),
                reason: String::new(),
            }),
            Message::ObjectCreate(ObjectCreate {
                guid: "obj-1".to_string(),
                prefab_id: 12,
                position: Vec3::new(1.5, -2.0, 300.25),
                rotation: Quat::new(0.0, 0.7071, 0.0, 0.7071),
                owner: alice.clone(),
            }),
            Message::ObjectCreate(ObjectCreate {
                guid: String::new(),
                prefab_id: 0,
                position: Vec3::ZERO,
                rotation: Quat::IDENTITY,
                owner: NetworkUser::bad(),
            }),
            Message::ObjectDestroy(ObjectDestroy {
                guid: "obj-1".to_string(),
                owner: alice,
            }),
        ]
    }

    #[test]
    fn test_packet_roundtrip_all_kinds() {
        for message in sample_messages() {
            let packet = encode(&message).unwrap();
            assert_eq!(packet.message_type().unwrap(), message.message_type());

            let decoded = decode(&packet, message.message_type()).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_roundtrip_keeps_session_guid() {
        let message = Message::ConnectionRequest(ConnectionRequest {
            request: Uid(9),
            user: NetworkUser::new("carol", "guid-xyz"),
        });

        let packet = encode(&message).unwrap();
        match decode(&packet, MessageType::ConnectionRequest).unwrap() {
            Message::ConnectionRequest(body) => {
                assert_eq!(body.user.username, "carol");
                assert_eq!(body.user.session_guid, "guid-xyz");
            }
            _ => panic!("Wrong message type after decoding"),
        }
    }

    #[test]
    fn test_vector_components_survive() {
        let message = Message::ObjectCreate(ObjectCreate {
            guid: "g".to_string(),
            prefab_id: 4,
            position: Vec3::new(0.1, 0.2, 0.3),
            rotation: Quat::new(0.5, 0.5, 0.5, 0.5),
            owner: NetworkUser::new("alice", ""),
        });

        match decode_any(&encode(&message).unwrap()).unwrap() {
            Message::ObjectCreate(body) => {
                assert_approx_eq!(body.position.x, 0.1);
                assert_approx_eq!(body.position.y, 0.2);
                assert_approx_eq!(body.position.z, 0.3);
                assert_approx_eq!(body.rotation.w, 0.5);
            }
            _ => panic!("Wrong message type after decoding"),
        }
    }

    #[test]
    fn test_header_layout() {
        let message = Message::ConnectionKicked(ConnectionKicked {
            username: "a".to_string(),
            reason: "b".to_string(),
        });
        let packet = encode(&message).unwrap();
        let bytes = packet.as_bytes();

        assert_eq!(&bytes[0..4], &PROTOCOL_VERSION.to_le_bytes());
        assert_eq!(bytes[4], MessageType::ConnectionKicked as u8);
    }

    #[test]
    fn test_decode_rejects_truncated() {
        for message in sample_messages() {
            let packet = encode(&message).unwrap();
            let bytes = packet.as_bytes();

            for cut in 0..bytes.len() {
                let truncated = Packet::from_bytes(bytes[..cut].to_vec());
                assert!(
                    decode(&truncated, message.message_type()).is_err(),
                    "{:?} decoded after truncation to {} bytes",
                    message.message_type(),
                    cut
                );
            }
        }
    }

    #[test]
    fn test_decode_rejects_wrong_version() {
        let message = Message::ConnectionStatus(ConnectionStatusMsg {
            request: Uid(2),
            status: ConnectionStatus::Good,
        });
        let packet = encode_with_version(&message, PROTOCOL_VERSION + 1).unwrap();

        match decode(&packet, MessageType::ConnectionStatus) {
            Err(CodecError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, PROTOCOL_VERSION);
                assert_eq!(found, PROTOCOL_VERSION + 1);
            }
            other => panic!("Expected version mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_wrong_type() {
        let message = Message::AuthenticationStatus(AuthenticationStatusMsg {
            request: Uid(2),
            status: AuthStatus::Good,
        });
        let packet = encode(&message).unwrap();

        match decode(&packet, MessageType::ConnectionStatus) {
            Err(CodecError::TypeMismatch { expected, found }) => {
                assert_eq!(expected, MessageType::ConnectionStatus);
                assert_eq!(found, MessageType::AuthenticationStatus);
            }
            other => panic!("Expected type mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let mut bytes = PROTOCOL_VERSION.to_le_bytes().to_vec();
        bytes.push(200);
        let packet = Packet::from_bytes(bytes);

        assert!(matches!(
            packet.message_type(),
            Err(CodecError::UnknownType(200))
        ));
        assert!(decode_any(&packet).is_err());
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let message = Message::ConnectionRoster(ConnectionRoster { users: Vec::new() });
        let mut bytes = encode(&message).unwrap().as_bytes().to_vec();
        bytes.extend_from_slice(&[0, 0]);

        assert!(matches!(
            decode(&Packet::from_bytes(bytes), MessageType::ConnectionRoster),
            Err(CodecError::TrailingBytes(2))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_status_code() {
        let message = Message::AuthenticationStatus(AuthenticationStatusMsg {
            request: Uid(1),
            status: AuthStatus::Good,
        });
        let mut bytes = encode(&message).unwrap().as_bytes().to_vec();
        // Status variant index is the final u32 of the body
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&99u32.to_le_bytes());

        assert!(decode(&Packet::from_bytes(bytes), MessageType::AuthenticationStatus).is_err());
    }

    #[test]
    fn test_decode_rejects_oversized_length_prefix() {
        let mut bytes = PROTOCOL_VERSION.to_le_bytes().to_vec();
        bytes.push(MessageType::ConnectionKicked as u8);
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());

        assert!(decode(&Packet::from_bytes(bytes), MessageType::ConnectionKicked).is_err());
    }
}
