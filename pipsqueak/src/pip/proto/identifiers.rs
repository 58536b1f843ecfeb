/// Transmitter id of a tag. 21 bits on legacy readers, 24 bits on modern ones.
pub type TagId = u32;

/// Id of the base station (USB reader) that heard a packet.
pub type ReceiverId = u32;

/// Tag-local timestamp, in quarter microseconds. Informational only.
pub type DeviceTime = u32;
