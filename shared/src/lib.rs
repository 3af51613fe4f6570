//! # Shared Protocol Library
//!
//! Vocabulary shared by every peer in the network: the users and servers
//! that take part in a session, the status codes they exchange, and the
//! versioned packet codec that carries them.
//!
//! ## Modules
//!
//! - `uid`: recyclable request handles used to pair replies with requests
//! - `types`: `NetworkUser`, `NetworkServer`, `AccountDetails`, status codes
//!   and the vector types used by object lifecycle messages
//! - `packets`: the fixed-header binary codec
//! - `crypto`: caller-side password encryption
//!
//! The codec knows nothing about transports. It turns a `Message` into an
//! immutable `Packet` and back, refusing anything with the wrong version,
//! the wrong type, or a body that does not parse completely.

pub mod crypto;
pub mod packets;
pub mod types;
pub mod uid;

pub use crypto::encrypt_password;
pub use packets::{
    decode, decode_any, encode, CodecError, Message, MessageType, Packet, PROTOCOL_VERSION,
};
pub use types::{
    AccountDetails, AuthStatus, ConnectionStatus, NetworkServer, NetworkUser, Quat, ServerType,
    Vec3,
};
pub use uid::{Uid, UidPool};
