//! Wire-level protocol layer: the bucket codec and the handshake
//! request/response seam shared with the outer protocol.

pub mod bucket;
pub mod message;
