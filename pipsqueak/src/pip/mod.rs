pub mod port;
pub mod proto;

pub use port::{RawPacket, RecvError};
pub use proto::{DecodeError, Decoder, Variant};
